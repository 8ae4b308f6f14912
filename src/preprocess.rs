use image::{Pixel, Rgb, RgbImage, imageops};
use palette::{FromColor, Hsv, Srgb};
use serde::Deserialize;

use crate::error::{PaletteError, Result};

/// Range accepted for caller-supplied brightness and contrast.
pub const ADJUSTMENT_RANGE: std::ops::RangeInclusive<i32> = -100..=100;

// ------------------------------------------------------------
// Preprocessing modes
// ------------------------------------------------------------

/// Fixed light-enhancement sequence: blur, saturation boost, mild contrast.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct AutoEnhance {
    /// Gaussian sigma. 0.8 is what a 3×3 kernel implies.
    pub blur_sigma: f32,
    pub saturation_factor: f32,
    /// Contrast factor in [-100, 100].
    pub contrast: i32,
}

impl Default for AutoEnhance {
    fn default() -> Self {
        Self {
            blur_sigma: 0.8,
            saturation_factor: 1.2,
            contrast: 10,
        }
    }
}

/// Caller-tunable adjustments. `Default` is the identity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Adjustments {
    brightness: i32,
    contrast: i32,
    grayscale: bool,
}

impl Adjustments {
    pub fn new(brightness: i32, contrast: i32, grayscale: bool) -> Result<Self> {
        check_range("brightness", brightness)?;
        check_range("contrast", contrast)?;
        Ok(Self {
            brightness,
            contrast,
            grayscale,
        })
    }
}

fn check_range(name: &'static str, value: i32) -> Result<()> {
    if ADJUSTMENT_RANGE.contains(&value) {
        Ok(())
    } else {
        Err(PaletteError::AdjustmentOutOfRange { name, value })
    }
}

/// How the decoded image is treated before clustering.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Preprocessing {
    /// Leave the pixels untouched.
    None,
    Auto(AutoEnhance),
    Manual(Adjustments),
}

impl Default for Preprocessing {
    fn default() -> Self {
        Self::Auto(AutoEnhance::default())
    }
}

/// Run the selected preprocessing mode. The output always has the input's
/// dimensions.
pub fn apply(img: RgbImage, mode: &Preprocessing) -> RgbImage {
    match mode {
        Preprocessing::None => img,
        Preprocessing::Auto(auto) => auto_enhance(&img, auto),
        Preprocessing::Manual(adjustments) => {
            let mut img = img;
            if adjustments.contrast != 0 || adjustments.brightness != 0 {
                adjust_contrast(&mut img, adjustments.contrast, adjustments.brightness);
            }
            if adjustments.grayscale {
                grayscale(&mut img);
            }
            img
        }
    }
}

/// Blur, then boost saturation, then apply a mild contrast stretch.
pub fn auto_enhance(img: &RgbImage, auto: &AutoEnhance) -> RgbImage {
    let mut out = blur(img, auto.blur_sigma);
    boost_saturation(&mut out, auto.saturation_factor);
    adjust_contrast(&mut out, auto.contrast, 0);
    out
}

// ------------------------------------------------------------
// Per-pixel filters
// ------------------------------------------------------------

/// Gaussian smoothing. A non-positive sigma is a no-op.
pub fn blur(img: &RgbImage, sigma: f32) -> RgbImage {
    if sigma <= 0.0 {
        return img.clone();
    }
    imageops::blur(img, sigma)
}

/// Scale the HSV saturation of every pixel by `factor`, clamped to [0, 1].
pub fn boost_saturation(img: &mut RgbImage, factor: f32) {
    for pixel in img.pixels_mut() {
        let rgb: Srgb = Srgb::new(pixel[0], pixel[1], pixel[2]).into_format();
        let mut hsv: Hsv = Hsv::from_color(rgb);
        hsv.saturation = (hsv.saturation * factor).clamp(0.0, 1.0);
        let rgb: Srgb = Srgb::from_color(hsv);
        let out: Srgb<u8> = rgb.into_format();
        *pixel = Rgb([out.red, out.green, out.blue]);
    }
}

/// `out = in * (1 + contrast / 127) - contrast + brightness`, clamped to the
/// channel range and truncated.
pub fn adjust_contrast(img: &mut RgbImage, contrast: i32, brightness: i32) {
    let gain = 1.0 + contrast as f32 / 127.0;
    let offset = (brightness - contrast) as f32;
    for channel in img.iter_mut() {
        *channel = (*channel as f32 * gain + offset).clamp(0.0, 255.0) as u8;
    }
}

/// Replace every pixel by its luma, keeping three channels.
pub fn grayscale(img: &mut RgbImage) {
    for pixel in img.pixels_mut() {
        let luma = pixel.to_luma()[0];
        *pixel = Rgb([luma, luma, luma]);
    }
}
