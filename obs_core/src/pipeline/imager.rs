//! Dark-subtraction, flat-division, and hot-pixel interpolation (§4.C).

use crate::image::{Image, PixelBuffer};

/// Wraps a raw image with the optional calibration steps §4.C specifies.
/// Applying the imager runs enabled steps in order dark → flat →
/// interpolate, in place where pixel types allow (here: only the `U16`
/// raw-sensor representation is calibrated in place; other pixel kinds
/// pass through untouched, matching "in place where pixel types allow").
#[derive(Debug, Clone, Default)]
pub struct Imager {
    pub dark: Option<Image>,
    pub flat: Option<Image>,
    pub interpolate_hot_pixels: bool,
    pub hot_pixel_sigma: f64,
}

impl Imager {
    pub fn apply(&self, image: &mut Image) {
        if let Some(dark) = &self.dark {
            subtract_dark(image, dark);
        }
        if let Some(flat) = &self.flat {
            divide_flat(image, flat);
        }
        if self.interpolate_hot_pixels {
            interpolate_hot_pixels(image, self.hot_pixel_sigma);
        }
    }
}

fn subtract_dark(image: &mut Image, dark: &Image) {
    if let (PixelBuffer::U16(pixels), PixelBuffer::U16(dark_pixels)) =
        (&mut image.pixels, &dark.pixels)
    {
        for (p, d) in pixels.iter_mut().zip(dark_pixels.iter()) {
            *p = p.saturating_sub(*d);
        }
    }
}

fn divide_flat(image: &mut Image, flat: &Image) {
    if let (PixelBuffer::U16(pixels), PixelBuffer::U16(flat_pixels)) =
        (&mut image.pixels, &flat.pixels)
    {
        let flat_mean = mean_u16(flat_pixels);
        if flat_mean <= 0.0 {
            return;
        }
        for (p, f) in pixels.iter_mut().zip(flat_pixels.iter()) {
            if *f == 0 {
                continue;
            }
            let corrected = (*p as f64) * flat_mean / (*f as f64);
            *p = corrected.round().clamp(0.0, u16::MAX as f64) as u16;
        }
    }
}

fn mean_u16(pixels: &[u16]) -> f64 {
    if pixels.is_empty() {
        return 0.0;
    }
    pixels.iter().map(|&p| p as f64).sum::<f64>() / pixels.len() as f64
}

/// Marks (and replaces with the local mean of) any pixel whose deviation
/// from its 3x3 neighborhood mean exceeds `sigma` standard deviations.
fn interpolate_hot_pixels(image: &mut Image, sigma: f64) {
    let width = image.width as usize;
    let height = image.height as usize;
    let PixelBuffer::U16(pixels) = &mut image.pixels else {
        return;
    };
    if width < 3 || height < 3 {
        return;
    }
    let original = pixels.clone();
    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let idx = y * width + x;
            let mut neighborhood = Vec::with_capacity(8);
            for dy in -1..=1i32 {
                for dx in -1..=1i32 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = (x as i32 + dx) as usize;
                    let ny = (y as i32 + dy) as usize;
                    neighborhood.push(original[ny * width + nx] as f64);
                }
            }
            let mean = neighborhood.iter().sum::<f64>() / neighborhood.len() as f64;
            let variance = neighborhood.iter().map(|v| (v - mean).powi(2)).sum::<f64>()
                / neighborhood.len() as f64;
            let std_dev = variance.sqrt();
            if std_dev > 0.0 && (original[idx] as f64 - mean).abs() > sigma * std_dev {
                pixels[idx] = mean.round().clamp(0.0, u16::MAX as f64) as u16;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn flat_image(w: u32, h: u32, value: u16) -> Image {
        Image::new(w, h, PixelBuffer::U16(vec![value; (w * h) as usize]))
    }

    #[test]
    fn test_dark_subtraction() {
        let mut image = flat_image(2, 2, 1000);
        let dark = flat_image(2, 2, 100);
        subtract_dark(&mut image, &dark);
        assert_eq!(image.pixels.as_u16().unwrap(), &[900, 900, 900, 900]);
    }

    #[test]
    fn test_dark_subtraction_saturates_at_zero() {
        let mut image = flat_image(2, 2, 50);
        let dark = flat_image(2, 2, 100);
        subtract_dark(&mut image, &dark);
        assert_eq!(image.pixels.as_u16().unwrap(), &[0, 0, 0, 0]);
    }

    #[test]
    fn test_flat_division_normalizes_around_mean() {
        let mut image = Image::new(2, 1, PixelBuffer::U16(vec![1000, 1000]));
        let flat = Image::new(2, 1, PixelBuffer::U16(vec![50000, 25000]));
        divide_flat(&mut image, &flat);
        let px = image.pixels.as_u16().unwrap();
        assert!(px[0] < px[1], "dimmer flat region should be boosted relative to brighter one");
    }

    #[test]
    fn test_hot_pixel_interpolation_replaces_outlier() {
        let mut pixels = vec![100u16; 9];
        pixels[4] = 60000;
        let mut image = Image::new(3, 3, PixelBuffer::U16(pixels));
        interpolate_hot_pixels(&mut image, 3.0);
        let px = image.pixels.as_u16().unwrap();
        assert!(px[4] < 60000);
    }
}
