//! Screenshot normalization ahead of text extraction.
//!
//! Steps, in order: single-channel grayscale, fixed-threshold binarization,
//! median denoising. The output is PNG-encoded and byte-for-byte stable for a
//! given input and [`PreprocessSettings`].

use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use imageproc::filter::median_filter;
use std::io::Cursor;

/// Tunables for [`Preprocessor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreprocessSettings {
    /// Luminance below this value becomes black, everything else white.
    pub threshold: u8,
    /// Median filter radius in pixels. `0` disables denoising.
    pub denoise_radius: u32,
}

impl PreprocessSettings {
    pub const DEFAULT_THRESHOLD: u8 = 150;
    pub const DEFAULT_DENOISE_RADIUS: u32 = 1;
}

impl Default for PreprocessSettings {
    fn default() -> Self {
        Self {
            threshold: Self::DEFAULT_THRESHOLD,
            denoise_radius: Self::DEFAULT_DENOISE_RADIUS,
        }
    }
}

/// Errors raised while preprocessing an image.
#[derive(Debug, thiserror::Error)]
pub enum PreprocessError {
    /// The input bytes are not a decodable image.
    #[error("Image decode failed: {0}")]
    Decode(#[source] image::ImageError),

    /// The cleaned image could not be re-encoded.
    #[error("Image encode failed: {0}")]
    Encode(#[source] image::ImageError),
}

/// One intermediate image, kept for diagnostics.
#[derive(Debug, Clone)]
pub struct PreprocessStage {
    pub name: &'static str,
    pub png: Vec<u8>,
}

/// Pure image cleaner.
#[derive(Debug, Clone, Copy, Default)]
pub struct Preprocessor {
    settings: PreprocessSettings,
}

impl Preprocessor {
    pub fn new(settings: PreprocessSettings) -> Self {
        Self { settings }
    }

    /// Decode `bytes`, clean the image and return it as PNG.
    pub fn preprocess(&self, bytes: &[u8]) -> Result<Vec<u8>, PreprocessError> {
        let decoded = decode(bytes)?;
        let gray = decoded.to_luma8();
        let binary = self.binarize(&gray);
        let clean = self.denoise(&binary);
        encode_png(clean)
    }

    /// Same as [`Self::preprocess`] but returns every step. The last stage is
    /// the cleaned image.
    pub fn preprocess_with_stages(
        &self,
        bytes: &[u8],
    ) -> Result<Vec<PreprocessStage>, PreprocessError> {
        let decoded = decode(bytes)?;
        let gray = decoded.to_luma8();
        let binary = self.binarize(&gray);
        let clean = self.denoise(&binary);

        Ok(vec![
            PreprocessStage {
                name: "grayscale",
                png: encode_png(gray)?,
            },
            PreprocessStage {
                name: "binary",
                png: encode_png(binary)?,
            },
            PreprocessStage {
                name: "denoised",
                png: encode_png(clean)?,
            },
        ])
    }

    fn binarize(&self, gray: &GrayImage) -> GrayImage {
        let threshold = self.settings.threshold;
        let mut out = gray.clone();
        for Luma([value]) in out.pixels_mut() {
            *value = if *value < threshold { 0 } else { 255 };
        }
        out
    }

    fn denoise(&self, binary: &GrayImage) -> GrayImage {
        match self.settings.denoise_radius {
            0 => binary.clone(),
            r => median_filter(binary, r, r),
        }
    }
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, PreprocessError> {
    image::load_from_memory(bytes).map_err(PreprocessError::Decode)
}

fn encode_png(img: GrayImage) -> Result<Vec<u8>, PreprocessError> {
    let mut buf = Vec::new();
    DynamicImage::ImageLuma8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .map_err(PreprocessError::Encode)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn png_bytes(img: DynamicImage) -> Vec<u8> {
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn decode_gray(png: &[u8]) -> GrayImage {
        image::load_from_memory(png).unwrap().to_luma8()
    }

    #[test]
    fn test_threshold_boundary() {
        let mut gray = GrayImage::new(2, 1);
        gray.put_pixel(0, 0, Luma([149]));
        gray.put_pixel(1, 0, Luma([150]));
        let input = png_bytes(DynamicImage::ImageLuma8(gray));

        let pre = Preprocessor::new(PreprocessSettings {
            threshold: 150,
            denoise_radius: 0,
        });
        let out = decode_gray(&pre.preprocess(&input).unwrap());
        assert_eq!(out.get_pixel(0, 0), &Luma([0]));
        assert_eq!(out.get_pixel(1, 0), &Luma([255]));
    }

    #[test]
    fn test_color_input_becomes_single_channel() {
        let rgb = RgbImage::from_pixel(4, 4, Rgb([250, 250, 250]));
        let input = png_bytes(DynamicImage::ImageRgb8(rgb));

        let out = Preprocessor::default().preprocess(&input).unwrap();
        let decoded = image::load_from_memory(&out).unwrap();
        assert!(matches!(decoded, DynamicImage::ImageLuma8(_)));
        assert!(decoded.to_luma8().pixels().all(|p| p.0[0] == 255));
    }

    #[test]
    fn test_median_removes_isolated_speck() {
        let mut gray = GrayImage::from_pixel(5, 5, Luma([255]));
        gray.put_pixel(2, 2, Luma([0]));
        let input = png_bytes(DynamicImage::ImageLuma8(gray));

        let out = decode_gray(&Preprocessor::default().preprocess(&input).unwrap());
        assert_eq!(out.get_pixel(2, 2), &Luma([255]));
    }

    #[test]
    fn test_output_is_deterministic() {
        let rgb = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 16) as u8, (y * 16) as u8, 90]));
        let input = png_bytes(DynamicImage::ImageRgb8(rgb));

        let pre = Preprocessor::default();
        assert_eq!(pre.preprocess(&input).unwrap(), pre.preprocess(&input).unwrap());
    }

    #[test]
    fn test_stages_end_with_cleaned_image() {
        let rgb = RgbImage::from_pixel(3, 3, Rgb([10, 10, 10]));
        let input = png_bytes(DynamicImage::ImageRgb8(rgb));

        let pre = Preprocessor::default();
        let stages = pre.preprocess_with_stages(&input).unwrap();
        let names: Vec<_> = stages.iter().map(|s| s.name).collect();
        assert_eq!(names, ["grayscale", "binary", "denoised"]);
        assert_eq!(stages[2].png, pre.preprocess(&input).unwrap());
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let err = Preprocessor::default()
            .preprocess(b"definitely not an image")
            .unwrap_err();
        assert!(matches!(err, PreprocessError::Decode(_)));
    }
}
