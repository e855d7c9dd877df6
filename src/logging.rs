use std::sync::OnceLock;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: OnceLock<()> = OnceLock::new();

fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "takemi=debug,info"
    } else {
        "takemi=info,warn"
    }
}

/// Install the stderr subscriber. `RUST_LOG` wins over the verbosity flag.
///
/// Safe to call more than once; only the first call has an effect.
pub fn init(verbose: bool) {
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));

        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stderr)
                    .with_target(false),
            )
            .try_init();
    });
}
