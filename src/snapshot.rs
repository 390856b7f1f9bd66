//! PNG snapshots of compute target contents.

use std::path::Path;

use image::RgbaImage;

use crate::gpu::{ComputeTarget, TargetError};

/// Errors that can occur while taking a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Readback failed: {0}")]
    Target(#[from] TargetError),
    #[error("Image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("Expected {expected} bytes for a {width}x{width} image, got {got}")]
    Size {
        width: u32,
        expected: usize,
        got: usize,
    },
}

/// Copy the current contents of `target` into an image, top row first.
pub fn to_image(target: &ComputeTarget) -> Result<RgbaImage, SnapshotError> {
    let pixels = target.read_pixels()?;
    image_from_pixels(target.width(), pixels)
}

/// Write the current contents of `target` to a PNG file.
pub fn save_png(target: &ComputeTarget, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
    let path = path.as_ref();
    to_image(target)?.save_with_format(path, image::ImageFormat::Png)?;
    log::debug!("Saved {0}x{0} snapshot to {1}", target.width(), path.display());
    Ok(())
}

fn image_from_pixels(width: u32, pixels: Vec<u8>) -> Result<RgbaImage, SnapshotError> {
    let got = pixels.len();
    RgbaImage::from_raw(width, width, pixels).ok_or(SnapshotError::Size {
        width,
        expected: width as usize * width as usize * 4,
        got,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::GpuContext;

    #[test]
    fn test_image_from_pixels_layout() {
        let pixels: Vec<u8> = (0..16).collect();
        let image = image_from_pixels(2, pixels).unwrap();
        assert_eq!(image.dimensions(), (2, 2));
        assert_eq!(image.get_pixel(1, 0).0, [4, 5, 6, 7]);
        assert_eq!(image.get_pixel(0, 1).0, [8, 9, 10, 11]);
    }

    #[test]
    fn test_image_from_short_pixels_fails() {
        let result = image_from_pixels(2, vec![0; 12]);
        assert!(matches!(
            result,
            Err(SnapshotError::Size {
                width: 2,
                expected: 16,
                got: 12
            })
        ));
    }

    #[tokio::test]
    async fn test_save_png_round_trip() {
        let ctx = match GpuContext::new().await {
            Ok(ctx) => ctx,
            Err(_) => return,
        };

        let target = ComputeTarget::new(&ctx, 4).unwrap();
        let data: Vec<u8> = (0..64).map(|i| (i * 3) as u8).collect();
        target.push_texture_data(&data).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.png");
        save_png(&target, &path).unwrap();

        let loaded = image::open(&path).unwrap().to_rgba8();
        assert_eq!(loaded.dimensions(), (4, 4));
        assert_eq!(loaded.into_raw(), data);
    }
}
