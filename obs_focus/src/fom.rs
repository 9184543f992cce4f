//! Figure-of-merit evaluation (§4.F): reduces an [`Image`] + measurement
//! window to a single scalar a [`crate::solver::Solver`] minimizes. Lower
//! is always "more in focus" by convention, matching FWHM/HFD semantics —
//! a brightness-style metric that should be *maximized* is wrapped as its
//! reciprocal by the caller rather than the trait growing a direction flag.

use obs_core::image::{Image, PixelBuffer, Rectangle};

pub trait FigureOfMerit: Send + Sync {
    fn evaluate(&self, image: &Image) -> f64;
}

fn intensity_at(image: &Image, x: u32, y: u32) -> f64 {
    let idx = (y as usize) * (image.width as usize) + (x as usize);
    match &image.pixels {
        PixelBuffer::U8(v) => v.get(idx).copied().unwrap_or(0) as f64,
        PixelBuffer::U16(v) => v.get(idx).copied().unwrap_or(0) as f64,
        PixelBuffer::F32(v) => v.get(idx).copied().unwrap_or(0.0) as f64,
        PixelBuffer::Rgb8(v) => v
            .get(idx)
            .map(|[r, g, b]| (*r as f64 + *g as f64 + *b as f64) / 3.0)
            .unwrap_or(0.0),
    }
}

fn clamp_window(image: &Image, window: Rectangle) -> Rectangle {
    let origin_x = window.origin_x.min(image.width.saturating_sub(1));
    let origin_y = window.origin_y.min(image.height.saturating_sub(1));
    let width = window.width.min(image.width - origin_x);
    let height = window.height.min(image.height - origin_y);
    Rectangle { origin_x, origin_y, width, height }
}

/// Estimates a half-flux diameter over `window` as twice the
/// intensity-weighted RMS radius around the window's flux centroid — a
/// cheap, dependency-free stand-in for a Gaussian/Moffat profile fit,
/// adequate for locating a focus minimum rather than reporting an
/// absolute seeing number.
pub struct HalfFluxDiameter {
    pub window: Rectangle,
}

impl FigureOfMerit for HalfFluxDiameter {
    fn evaluate(&self, image: &Image) -> f64 {
        let window = clamp_window(image, self.window);
        let mut sum_weight = 0.0;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        for y in window.origin_y..window.origin_y + window.height {
            for x in window.origin_x..window.origin_x + window.width {
                let w = intensity_at(image, x, y);
                sum_weight += w;
                sum_x += w * x as f64;
                sum_y += w * y as f64;
            }
        }
        if sum_weight <= 0.0 {
            return f64::INFINITY;
        }
        let cx = sum_x / sum_weight;
        let cy = sum_y / sum_weight;

        let mut sum_r2 = 0.0;
        for y in window.origin_y..window.origin_y + window.height {
            for x in window.origin_x..window.origin_x + window.width {
                let w = intensity_at(image, x, y);
                let dx = x as f64 - cx;
                let dy = y as f64 - cy;
                sum_r2 += w * (dx * dx + dy * dy);
            }
        }
        2.0 * (sum_r2 / sum_weight).sqrt()
    }
}

/// Reciprocal peak brightness over `window`, so a brighter (more in focus,
/// for an unsaturated star) image scores lower, preserving the
/// "lower is better" convention every [`crate::solver::Solver`] assumes.
pub struct InverseBrightness {
    pub window: Rectangle,
}

impl FigureOfMerit for InverseBrightness {
    fn evaluate(&self, image: &Image) -> f64 {
        let window = clamp_window(image, self.window);
        let mut peak = 0.0f64;
        for y in window.origin_y..window.origin_y + window.height {
            for x in window.origin_x..window.origin_x + window.width {
                peak = peak.max(intensity_at(image, x, y));
            }
        }
        if peak <= 0.0 {
            f64::INFINITY
        } else {
            1.0 / peak
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn gaussian_image(width: u32, height: u32, cx: f64, cy: f64, sigma: f64) -> Image {
        let mut pixels = vec![0u16; (width * height) as usize];
        for y in 0..height {
            for x in 0..width {
                let dx = x as f64 - cx;
                let dy = y as f64 - cy;
                let v = 50000.0 * (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp();
                pixels[(y * width + x) as usize] = v as u16 + 100;
            }
        }
        Image::new(width, height, PixelBuffer::U16(pixels))
    }

    #[test]
    fn test_hfd_increases_with_defocus() {
        let window = Rectangle::full_frame(32, 32);
        let fom = HalfFluxDiameter { window };
        let sharp = gaussian_image(32, 32, 16.0, 16.0, 1.5);
        let blurry = gaussian_image(32, 32, 16.0, 16.0, 5.0);
        assert!(fom.evaluate(&sharp) < fom.evaluate(&blurry));
    }

    #[test]
    fn test_inverse_brightness_decreases_with_peak() {
        let window = Rectangle::full_frame(16, 16);
        let fom = InverseBrightness { window };
        let bright = gaussian_image(16, 16, 8.0, 8.0, 1.0);
        let dim = gaussian_image(16, 16, 8.0, 8.0, 6.0);
        assert!(fom.evaluate(&bright) < fom.evaluate(&dim));
    }
}
