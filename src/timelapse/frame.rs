use anyhow::Result as AnyResult;
use fast_image_resize::{images::Image, ResizeOptions, Resizer};
use image::{imageops, ImageBuffer, ImageReader, RgbImage};
use std::fs::File;
use std::io::BufReader;
use std::num::NonZeroU32;
use std::path::Path;

use crate::error::{Error, Result};

/// Captures keep a `.jpg` name whatever their content, so the format is sniffed
fn open_reader(path: &Path) -> Result<ImageReader<BufReader<File>>> {
    ImageReader::open(path)
        .and_then(|reader| reader.with_guessed_format())
        .map_err(|e| Error::decode(path, e))
}

/// Read the pixel dimensions from the image header without decoding it
pub fn frame_dimensions(path: &Path) -> Result<(u32, u32)> {
    let (width, height) = open_reader(path)?
        .into_dimensions()
        .map_err(|e| Error::decode(path, e))?;
    if width == 0 || height == 0 {
        return Err(Error::decode(path, "image has zero width or height"));
    }
    Ok((width, height))
}

/// Decode a still into an RGB frame of exactly `width` x `height`
///
/// Frames with a different aspect ratio are center-cropped before scaling so
/// the subject is not stretched.
pub fn load_frame(path: &Path, width: u32, height: u32) -> Result<RgbImage> {
    let img = open_reader(path)?
        .decode()
        .map_err(|e| Error::decode(path, e))?
        .to_rgb8();
    fit_to_frame(&img, width, height).map_err(|e| Error::decode(path, e))
}

fn fit_to_frame(img: &RgbImage, width: u32, height: u32) -> AnyResult<RgbImage> {
    let (src_width, src_height) = img.dimensions();
    if src_width == width && src_height == height {
        return Ok(img.clone());
    }

    let target_aspect = width as f64 / height as f64;
    let source_aspect = src_width as f64 / src_height as f64;

    let (crop_width, crop_height) = if source_aspect > target_aspect {
        // Source is wider - crop width
        let new_width = (src_height as f64 * target_aspect).round() as u32;
        (new_width.clamp(1, src_width), src_height)
    } else {
        // Source is taller - crop height
        let new_height = (src_width as f64 / target_aspect).round() as u32;
        (src_width, new_height.clamp(1, src_height))
    };

    let crop_x = (src_width - crop_width) / 2;
    let crop_y = (src_height - crop_height) / 2;
    let cropped = imageops::crop_imm(img, crop_x, crop_y, crop_width, crop_height).to_image();

    resize_image(&cropped, width, height)
}

/// Resize an image to exact dimensions using high-quality algorithm
fn resize_image(img: &RgbImage, width: u32, height: u32) -> AnyResult<RgbImage> {
    let (src_width, src_height) = img.dimensions();

    if src_width == width && src_height == height {
        return Ok(img.clone());
    }

    let src_width_nz = NonZeroU32::new(src_width).ok_or_else(|| anyhow::anyhow!("Source width is zero"))?;
    let src_height_nz = NonZeroU32::new(src_height).ok_or_else(|| anyhow::anyhow!("Source height is zero"))?;
    let dst_width_nz = NonZeroU32::new(width).ok_or_else(|| anyhow::anyhow!("Target width is zero"))?;
    let dst_height_nz = NonZeroU32::new(height).ok_or_else(|| anyhow::anyhow!("Target height is zero"))?;

    let src_image = Image::from_vec_u8(
        src_width_nz.get(),
        src_height_nz.get(),
        img.as_raw().clone(),
        fast_image_resize::PixelType::U8x3,
    )?;

    let mut dst_image = Image::new(
        dst_width_nz.get(),
        dst_height_nz.get(),
        fast_image_resize::PixelType::U8x3,
    );

    let mut resizer = Resizer::new();
    resizer.resize(&src_image, &mut dst_image, Some(&ResizeOptions::default()))?;

    ImageBuffer::from_raw(width, height, dst_image.into_vec())
        .ok_or_else(|| anyhow::anyhow!("Resized buffer does not match {}x{}", width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn create_test_image(width: u32, height: u32) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([
                (x % 256) as u8,
                (y % 256) as u8,
                ((x + y) % 256) as u8,
            ])
        })
    }

    #[test]
    fn test_resize_image() {
        let img = create_test_image(100, 100);
        let resized = resize_image(&img, 50, 50).unwrap();

        assert_eq!(resized.dimensions(), (50, 50));
    }

    #[test]
    fn test_fit_same_size_is_identity() {
        let img = create_test_image(64, 48);
        let fitted = fit_to_frame(&img, 64, 48).unwrap();
        assert_eq!(fitted, img);
    }

    #[test]
    fn test_fit_crops_to_target_aspect() {
        // 200x100 landscape into a square frame
        let img = create_test_image(200, 100);
        let fitted = fit_to_frame(&img, 40, 40).unwrap();
        assert_eq!(fitted.dimensions(), (40, 40));

        // 100x200 portrait into a landscape frame
        let img = create_test_image(100, 200);
        let fitted = fit_to_frame(&img, 80, 48).unwrap();
        assert_eq!(fitted.dimensions(), (80, 48));
    }

    #[test]
    fn test_load_frame_and_dimensions() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("frame.png");
        create_test_image(30, 20).save(&path).unwrap();

        assert_eq!(frame_dimensions(&path).unwrap(), (30, 20));
        assert_eq!(load_frame(&path, 16, 10).unwrap().dimensions(), (16, 10));
    }

    #[test]
    fn test_format_is_sniffed_from_content() {
        let tmp = tempfile::tempdir().unwrap();
        let png = tmp.path().join("frame.png");
        create_test_image(12, 8).save(&png).unwrap();
        let misnamed = tmp.path().join("2024-03-05_14-30-00.jpg");
        std::fs::copy(&png, &misnamed).unwrap();

        assert_eq!(frame_dimensions(&misnamed).unwrap(), (12, 8));
        assert!(load_frame(&misnamed, 12, 8).is_ok());
    }

    #[test]
    fn test_unreadable_frame_is_decode_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("broken.jpg");
        std::fs::write(&path, b"not an image").unwrap();

        assert!(matches!(frame_dimensions(&path), Err(Error::Decode { .. })));
        assert!(matches!(load_frame(&path, 10, 10), Err(Error::Decode { .. })));
    }
}
