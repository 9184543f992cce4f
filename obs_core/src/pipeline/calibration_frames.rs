//! Dark and flat calibration-frame acquisition (§4.C): take a burst of
//! frames, emit progress as each one lands, and fold them into a single
//! master frame.

use std::sync::Arc;
use std::time::Duration;

use crate::device::Ccd;
use crate::error::DeviceError;
use crate::events::{CalibrationImageProgress, Event, EventBus};
use crate::image::{Exposure, Image, PixelBuffer, Purpose};

/// Captures `count` dark frames at `exposure`'s timing and folds them into
/// one master dark by taking the per-pixel median, which rejects cosmic-ray
/// hits that a mean would smear across the whole frame.
pub async fn acquire_dark(
    ccd: Arc<dyn Ccd>,
    events: &EventBus,
    exposure: Exposure,
    count: usize,
) -> Result<Image, DeviceError> {
    let exposure = exposure.with_purpose(Purpose::Dark);
    let frames = acquire_burst(ccd, events, exposure, count).await?;
    Ok(fold_median(frames))
}

/// Captures `count` flat frames and folds them into one master flat, scaled
/// so its mean lands at `target_adu`. Converging exposure time toward a
/// target ADU level happens separately; this function performs only the
/// fold-and-scale step, leaving exposure-time convergence to the caller.
pub async fn acquire_flat(
    ccd: Arc<dyn Ccd>,
    events: &EventBus,
    exposure: Exposure,
    count: usize,
    target_adu: f64,
) -> Result<Image, DeviceError> {
    let exposure = exposure.with_purpose(Purpose::Flat);
    let frames = acquire_burst(ccd, events, exposure, count).await?;
    let mut master = fold_median(frames);
    scale_to_target(&mut master, target_adu);
    Ok(master)
}

async fn acquire_burst(
    ccd: Arc<dyn Ccd>,
    events: &EventBus,
    exposure: Exposure,
    count: usize,
) -> Result<Vec<Image>, DeviceError> {
    let mut frames = Vec::with_capacity(count);
    for image_no in 0..count {
        let image = crate::device::ccd::capture_image(ccd.clone(), exposure.clone()).await?;
        events.emit(Event::CalibrationImageProgress(CalibrationImageProgress {
            image_no: image_no + 1,
            image_count: count,
        }));
        frames.push(image);
    }
    Ok(frames)
}

fn fold_median(frames: Vec<Image>) -> Image {
    let first = frames.first().expect("acquire_burst never returns an empty set");
    let width = first.width;
    let height = first.height;
    let len = first.pixels.len();

    let mut columns: Vec<Vec<u16>> = vec![Vec::with_capacity(frames.len()); len];
    for frame in &frames {
        if let PixelBuffer::U16(pixels) = &frame.pixels {
            for (i, &p) in pixels.iter().enumerate() {
                columns[i].push(p);
            }
        }
    }

    let median_pixels: Vec<u16> = columns
        .into_iter()
        .map(|mut samples| {
            samples.sort_unstable();
            samples[samples.len() / 2]
        })
        .collect();

    Image::new(width, height, PixelBuffer::U16(median_pixels))
}

fn scale_to_target(image: &mut Image, target_adu: f64) {
    let PixelBuffer::U16(pixels) = &mut image.pixels else {
        return;
    };
    if pixels.is_empty() {
        return;
    }
    let mean = pixels.iter().map(|&p| p as f64).sum::<f64>() / pixels.len() as f64;
    if mean <= 0.0 {
        return;
    }
    let scale = target_adu / mean;
    for p in pixels.iter_mut() {
        *p = ((*p as f64) * scale).round().clamp(0.0, u16::MAX as f64) as u16;
    }
}

/// Flags any pixel whose deviation from its frame-wide mean exceeds `sigma`
/// standard deviations as a candidate bad pixel, for use against a master
/// dark or flat. Returns flat pixel indices, not (x, y) pairs, since callers
/// already know the frame's width to convert.
pub fn detect_bad_pixels(image: &Image, sigma: f64) -> Vec<usize> {
    let PixelBuffer::U16(pixels) = &image.pixels else {
        return Vec::new();
    };
    if pixels.is_empty() {
        return Vec::new();
    }
    let mean = pixels.iter().map(|&p| p as f64).sum::<f64>() / pixels.len() as f64;
    let variance = pixels.iter().map(|&p| (p as f64 - mean).powi(2)).sum::<f64>() / pixels.len() as f64;
    let std_dev = variance.sqrt();
    if std_dev <= 0.0 {
        return Vec::new();
    }
    pixels
        .iter()
        .enumerate()
        .filter(|(_, &p)| (p as f64 - mean).abs() > sigma * std_dev)
        .map(|(i, _)| i)
        .collect()
}

/// Number of darks/flats a calibration acquisition defaults to taking when
/// the caller doesn't specify a count.
pub const DEFAULT_FRAME_COUNT: usize = 9;

pub const DEFAULT_DARK_EXPOSURE: Duration = Duration::from_secs(30);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_fold_median_rejects_outlier() {
        let frames = vec![
            Image::new(1, 1, PixelBuffer::U16(vec![100])),
            Image::new(1, 1, PixelBuffer::U16(vec![102])),
            Image::new(1, 1, PixelBuffer::U16(vec![60000])),
        ];
        let master = fold_median(frames);
        assert_eq!(master.pixels.as_u16().unwrap(), &[102]);
    }

    #[test]
    fn test_scale_to_target() {
        let mut image = Image::new(2, 1, PixelBuffer::U16(vec![1000, 3000]));
        scale_to_target(&mut image, 20000.0);
        let px = image.pixels.as_u16().unwrap();
        let mean = (px[0] as f64 + px[1] as f64) / 2.0;
        assert!((mean - 20000.0).abs() < 1.0);
    }

    #[test]
    fn test_detect_bad_pixels() {
        let mut pixels = vec![100u16; 16];
        pixels[5] = 50000;
        let image = Image::new(4, 4, PixelBuffer::U16(pixels));
        let bad = detect_bad_pixels(&image, 3.0);
        assert_eq!(bad, vec![5]);
    }
}
