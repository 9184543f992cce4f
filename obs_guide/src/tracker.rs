//! Tracker variants (§4.D.1): each reduces an [`Image`] to a pixel offset.
//! Trackers hold no history across calls beyond whatever reference state
//! they were constructed with or latch on their first call — the guiding
//! loop supplies all temporal filtering.

use std::sync::Mutex;

use obs_core::image::{Image, PixelBuffer, Point2, Rectangle};

/// Reduces an image to a 2D pixel offset. Implementors must be safe to call
/// repeatedly from a single guiding loop; no implementation here is safe to
/// share across concurrent guiding runs (a fresh tracker is constructed per
/// run).
pub trait Tracker: Send + Sync {
    fn track(&self, image: &Image) -> Option<Point2<f64>>;
}

/// Trivial zero offset; useful for dry-running the guiding loop's actuator
/// and persistence plumbing without real star motion.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTracker;

impl Tracker for NullTracker {
    fn track(&self, _image: &Image) -> Option<Point2<f64>> {
        Some(Point2 { x: 0.0, y: 0.0 })
    }
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

/// Brightest-pixel-then-weighted-centroid tracker, grounded in the
/// star-statistics idiom of computing an intensity-weighted center over a
/// small aperture around a detected peak.
pub struct StarTracker {
    pub reference: Point2<f64>,
    pub window: Rectangle,
    pub aperture: u32,
}

impl StarTracker {
    pub fn new(reference: Point2<f64>, window: Rectangle, aperture: u32) -> Self {
        StarTracker { reference, window, aperture }
    }

    fn find_peak(&self, image: &Image, window: Rectangle) -> Option<(u32, u32)> {
        let mut best = None;
        let mut best_value = f64::NEG_INFINITY;
        for y in window.origin_y..window.origin_y + window.height {
            for x in window.origin_x..window.origin_x + window.width {
                let v = intensity_at(image, x, y);
                if v > best_value {
                    best_value = v;
                    best = Some((x, y));
                }
            }
        }
        best
    }

    fn weighted_centroid(&self, image: &Image, peak: (u32, u32)) -> Point2<f64> {
        let k = self.aperture as i64;
        let (px, py) = (peak.0 as i64, peak.1 as i64);
        let mut sum_weight = 0.0;
        let mut sum_x = 0.0;
        let mut sum_y = 0.0;
        for dy in -k..=k {
            for dx in -k..=k {
                let x = px + dx;
                let y = py + dy;
                if x < 0 || y < 0 || x as u32 >= image.width || y as u32 >= image.height {
                    continue;
                }
                let w = intensity_at(image, x as u32, y as u32);
                sum_weight += w;
                sum_x += w * x as f64;
                sum_y += w * y as f64;
            }
        }
        if sum_weight <= 0.0 {
            Point2 { x: px as f64, y: py as f64 }
        } else {
            Point2 { x: sum_x / sum_weight, y: sum_y / sum_weight }
        }
    }
}

impl Tracker for StarTracker {
    fn track(&self, image: &Image) -> Option<Point2<f64>> {
        let window = clamp_window(image, self.window);
        let peak = self.find_peak(image, window)?;
        let centroid = self.weighted_centroid(image, peak);
        Some(Point2 {
            x: centroid.x - self.reference.x,
            y: centroid.y - self.reference.y,
        })
    }
}

fn sum_squared_difference(a: &Image, b: &Image, shift_x: i32, shift_y: i32) -> f64 {
    let mut total = 0.0;
    let mut count = 0usize;
    for y in 0..a.height as i32 {
        let by = y + shift_y;
        if by < 0 || by >= b.height as i32 {
            continue;
        }
        for x in 0..a.width as i32 {
            let bx = x + shift_x;
            if bx < 0 || bx >= b.width as i32 {
                continue;
            }
            let diff = intensity_at(a, x as u32, y as u32) - intensity_at(b, bx as u32, by as u32);
            total += diff * diff;
            count += 1;
        }
    }
    if count == 0 {
        f64::INFINITY
    } else {
        total / count as f64
    }
}

/// Finds the integer-pixel shift of `current` relative to `reference` that
/// minimizes mean squared pixel difference, searching `±radius` in each
/// axis. A brute-force spatial-domain stand-in for FFT-based phase
/// correlation — no FFT crate is in this workspace's dependency stack, and
/// the search radii guiding cares about (a few pixels of drift per cycle)
/// make the O(radius²·pixels) cost negligible.
fn best_shift(reference: &Image, current: &Image, radius: i32) -> Point2<f64> {
    let mut best = Point2 { x: 0.0, y: 0.0 };
    let mut best_score = f64::INFINITY;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let score = sum_squared_difference(reference, current, dx, dy);
            if score < best_score {
                best_score = score;
                best = Point2 { x: dx as f64, y: dy as f64 };
            }
        }
    }
    best
}

/// Retains the first image it sees as a reference and reports the shift of
/// every subsequent frame against it.
pub struct PhaseTracker {
    reference: Mutex<Option<Image>>,
    search_radius: i32,
}

impl PhaseTracker {
    pub fn new(search_radius: i32) -> Self {
        PhaseTracker {
            reference: Mutex::new(None),
            search_radius,
        }
    }
}

impl Tracker for PhaseTracker {
    fn track(&self, image: &Image) -> Option<Point2<f64>> {
        let mut reference = self.reference.lock().unwrap();
        match reference.as_ref() {
            None => {
                *reference = Some(image.clone());
                Some(Point2 { x: 0.0, y: 0.0 })
            }
            Some(reference_image) => Some(best_shift(reference_image, image, self.search_radius)),
        }
    }
}

/// Tracks drift relative to the *previous* frame rather than a fixed
/// reference, suited to extended or slowly-evolving features (comet comas,
/// nebulosity) where no single fixed star dominates the frame.
pub struct DifferentialTracker {
    previous: Mutex<Option<Image>>,
    search_radius: i32,
}

impl DifferentialTracker {
    pub fn new(search_radius: i32) -> Self {
        DifferentialTracker {
            previous: Mutex::new(None),
            search_radius,
        }
    }
}

impl Tracker for DifferentialTracker {
    fn track(&self, image: &Image) -> Option<Point2<f64>> {
        let mut previous = self.previous.lock().unwrap();
        let offset = match previous.as_ref() {
            None => Point2 { x: 0.0, y: 0.0 },
            Some(prev) => best_shift(prev, image, self.search_radius),
        };
        *previous = Some(image.clone());
        Some(offset)
    }
}

/// Intensity-weighted centroid over the *entire* window with no peak-find
/// step first, for targets too large or diffuse for [`StarTracker`]'s
/// brightest-pixel seed to land on usefully.
pub struct LargeTracker {
    pub reference: Point2<f64>,
    pub window: Rectangle,
}

impl LargeTracker {
    pub fn new(reference: Point2<f64>, window: Rectangle) -> Self {
        LargeTracker { reference, window }
    }
}

impl Tracker for LargeTracker {
    fn track(&self, image: &Image) -> Option<Point2<f64>> {
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
            return None;
        }
        Some(Point2 {
            x: sum_x / sum_weight - self.reference.x,
            y: sum_y / sum_weight - self.reference.y,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn point_image(width: u32, height: u32, star_x: u32, star_y: u32) -> Image {
        let mut pixels = vec![100u16; (width * height) as usize];
        pixels[(star_y * width + star_x) as usize] = 60000;
        Image::new(width, height, PixelBuffer::U16(pixels))
    }

    #[test]
    fn test_star_tracker_zero_offset_at_reference() {
        let tracker = StarTracker::new(
            Point2 { x: 5.0, y: 5.0 },
            Rectangle::full_frame(11, 11),
            2,
        );
        let image = point_image(11, 11, 5, 5);
        let offset = tracker.track(&image).unwrap();
        assert!(offset.x.abs() < 0.5);
        assert!(offset.y.abs() < 0.5);
    }

    #[test]
    fn test_star_tracker_detects_shifted_star() {
        let tracker = StarTracker::new(
            Point2 { x: 5.0, y: 5.0 },
            Rectangle::full_frame(11, 11),
            2,
        );
        let image = point_image(11, 11, 7, 5);
        let offset = tracker.track(&image).unwrap();
        assert!(offset.x > 1.0, "expected positive x offset, got {}", offset.x);
    }

    #[test]
    fn test_null_tracker_is_always_zero() {
        let tracker = NullTracker;
        let image = point_image(4, 4, 1, 1);
        assert_eq!(tracker.track(&image), Some(Point2 { x: 0.0, y: 0.0 }));
    }

    #[test]
    fn test_phase_tracker_detects_integer_shift() {
        let tracker = PhaseTracker::new(4);
        let reference = point_image(16, 16, 8, 8);
        assert_eq!(tracker.track(&reference), Some(Point2 { x: 0.0, y: 0.0 }));

        let shifted = point_image(16, 16, 10, 9);
        let offset = tracker.track(&shifted).unwrap();
        assert_eq!(offset, Point2 { x: 2.0, y: 1.0 });
    }

    #[test]
    fn test_differential_tracker_tracks_consecutive_delta() {
        let tracker = DifferentialTracker::new(4);
        let first = point_image(16, 16, 8, 8);
        tracker.track(&first);
        let second = point_image(16, 16, 9, 8);
        let offset = tracker.track(&second).unwrap();
        assert_eq!(offset, Point2 { x: 1.0, y: 0.0 });
    }
}
