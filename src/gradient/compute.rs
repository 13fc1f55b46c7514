//! The `computeGradient` collaborator: decodes an image, extracts a small
//! color palette and a CSS gradient string, and renders a tiny blurred
//! placeholder. Spec treats this algorithm as out of scope (an external
//! collaborator); what's in scope is the trait boundary the worker drives
//! with retries. Grounded on the `image` crate decode/resize usage in the
//! image-processor example from the pack.

use crate::error::{Error, Result};
use crate::gradient::meta::GradientData;
use base64::Engine;
use image::GenericImageView;

/// A narrow, swappable interface over gradient extraction. The worker's
/// retry/backoff logic is exercised against this trait, not against a
/// concrete image pipeline.
pub trait GradientComputer: Send + Sync {
    fn compute(&self, bytes: &[u8]) -> Result<GradientData>;
}

/// Downsamples the image to a coarse grid, buckets pixels into a small
/// palette, and picks primary/secondary/foreground by luminance contrast.
pub struct ImageGradientComputer {
    palette_size: usize,
}

impl Default for ImageGradientComputer {
    fn default() -> Self {
        Self { palette_size: 4 }
    }
}

impl GradientComputer for ImageGradientComputer {
    fn compute(&self, bytes: &[u8]) -> Result<GradientData> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| Error::internal(format!("image decode failed: {e}")))?;

        let grid = image.resize_exact(8, 8, image::imageops::FilterType::Triangle);
        let palette = bucket_palette(&grid, self.palette_size);

        if palette.is_empty() {
            return Err(Error::internal("image yielded no palette colors"));
        }

        let mut by_luminance = palette.clone();
        by_luminance.sort_by(|a, b| luminance(*a).total_cmp(&luminance(*b)));

        let primary = by_luminance[0];
        let secondary = *by_luminance.last().unwrap();
        let foreground = if luminance(primary) > 0.5 { (0, 0, 0) } else { (255, 255, 255) };

        let css = format!(
            "linear-gradient(135deg, {}, {})",
            to_hex(primary),
            to_hex(secondary)
        );

        let blur = image.resize_exact(4, 4, image::imageops::FilterType::Triangle);
        let mut png_bytes = Vec::new();
        blur.write_to(&mut std::io::Cursor::new(&mut png_bytes), image::ImageFormat::Png)
            .map_err(|e| Error::internal(format!("placeholder encode failed: {e}")))?;
        let blur_data_url = format!(
            "data:image/png;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(&png_bytes)
        );

        Ok(GradientData {
            palette: palette.iter().map(|c| to_hex(*c)).collect(),
            primary: to_hex(primary),
            secondary: to_hex(secondary),
            foreground: to_hex(foreground),
            css,
            blur_data_url,
        })
    }
}

fn bucket_palette(grid: &image::DynamicImage, size: usize) -> Vec<(u8, u8, u8)> {
    let mut buckets: Vec<(u8, u8, u8)> = Vec::new();
    for (_, _, pixel) in grid.pixels() {
        let rgb = (pixel[0], pixel[1], pixel[2]);
        if !buckets.contains(&rgb) {
            buckets.push(rgb);
        }
        if buckets.len() >= size {
            break;
        }
    }
    buckets
}

fn luminance((r, g, b): (u8, u8, u8)) -> f64 {
    (0.2126 * r as f64 + 0.7152 * g as f64 + 0.0722 * b as f64) / 255.0
}

fn to_hex((r, g, b): (u8, u8, u8)) -> String {
    format!("#{r:02x}{g:02x}{b:02x}")
}

/// Deterministic stand-in used by worker tests so retry/backoff behavior
/// can be exercised without decoding real images.
#[cfg(test)]
pub mod fake {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    pub struct ScriptedComputer {
        /// Queue of outcomes consumed in order, one per `compute` call.
        outcomes: Mutex<Vec<Result<()>>>,
        calls: AtomicUsize,
    }

    impl ScriptedComputer {
        pub fn new(outcomes: Vec<Result<()>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn sample() -> GradientData {
            GradientData {
                palette: vec!["#111111".into(), "#eeeeee".into()],
                primary: "#111111".into(),
                secondary: "#eeeeee".into(),
                foreground: "#ffffff".into(),
                css: "linear-gradient(135deg, #111111, #eeeeee)".into(),
                blur_data_url: "data:image/png;base64,AA==".into(),
            }
        }
    }

    impl GradientComputer for ScriptedComputer {
        fn compute(&self, _bytes: &[u8]) -> Result<GradientData> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut outcomes = self.outcomes.lock().unwrap();
            if outcomes.is_empty() {
                return Ok(Self::sample());
            }
            match outcomes.remove(0) {
                Ok(()) => Ok(Self::sample()),
                Err(e) => Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_rejects_garbage_bytes() {
        let computer = ImageGradientComputer::default();
        assert!(computer.compute(b"not an image").is_err());
    }

    #[test]
    fn compute_yields_primary_and_secondary_for_a_real_image() {
        let mut img = image::RgbImage::new(16, 16);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = if x < 8 {
                image::Rgb([10, 10, 10])
            } else {
                image::Rgb([240, 240, 240])
            };
            let _ = y;
        }
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();

        let computer = ImageGradientComputer::default();
        let gradient = computer.compute(&bytes).unwrap();
        assert!(!gradient.primary.is_empty());
        assert!(!gradient.secondary.is_empty());
        assert!(gradient.css.starts_with("linear-gradient"));
    }
}
