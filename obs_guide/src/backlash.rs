//! Backlash analysis (§4.D.4): alternating extreme pulses on one axis
//! estimate mechanical backlash via a piecewise-linear hysteresis-loop fit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use obs_core::device::ccd::capture_image;
use obs_core::device::Ccd;
use obs_core::error::DeviceError;
use obs_core::events::{BacklashPoint, BacklashResult, Event, EventBus};
use obs_core::image::Exposure;

use crate::calibration::Actuator;
use crate::tracker::Tracker;

#[derive(Debug, Clone, Copy)]
pub enum Axis {
    Ra,
    Dec,
}

/// Runs `cycles` alternating extreme pulses of `pulse_duration` seconds on
/// `axis`, recording the tracked offset after each, then fits the
/// resulting position/offset trace to a hysteresis loop.
pub async fn run_backlash_analysis(
    ccd: Arc<dyn Ccd>,
    actuator: Arc<dyn Actuator>,
    tracker: Arc<dyn Tracker>,
    exposure: Exposure,
    axis: Axis,
    pulse_duration: f64,
    cycles: usize,
    events: &EventBus,
    cancel: &AtomicBool,
) -> Result<BacklashResult, DeviceError> {
    let mut points = Vec::with_capacity(cycles * 2);
    let mut position = 0.0f64;

    for _ in 0..cycles {
        for &sign in &[1.0, -1.0] {
            if cancel.load(Ordering::SeqCst) {
                return Err(DeviceError::Cancelled);
            }
            let pulse = sign * pulse_duration;
            let (ra, dec) = match axis {
                Axis::Ra => (pulse, 0.0),
                Axis::Dec => (0.0, pulse),
            };
            actuator.pulse(ra, dec).await?;
            position += pulse;

            let image = capture_image(ccd.clone(), exposure.clone()).await?;
            let offset = tracker
                .track(&image)
                .unwrap_or(obs_core::image::Point2 { x: 0.0, y: 0.0 });
            let tracked = match axis {
                Axis::Ra => offset.x,
                Axis::Dec => offset.y,
            };

            let point = BacklashPoint { position, offset: tracked };
            events.emit(Event::BacklashPoint(point.clone()));
            points.push(point);
        }
    }

    let result = fit_hysteresis(&points)?;
    events.emit(Event::BacklashResult(result.clone()));
    Ok(result)
}

/// Fits a piecewise-linear hysteresis loop: splits the trace into rising
/// (`position` increasing leg-to-leg) and falling points, fits a line to
/// each via ordinary least squares, and reports the horizontal gap between
/// the two fitted lines at their shared mean offset as the backlash
/// estimate (`lag`). `direction` is the mean of the two legs' slopes (the
/// underlying mechanical gain, roughly axis-direction-independent);
/// `error` is the RMS residual pooled across both fits.
fn fit_hysteresis(points: &[BacklashPoint]) -> Result<BacklashResult, DeviceError> {
    if points.len() < 4 {
        return Err(DeviceError::Degenerate(
            "fewer than 4 backlash points".into(),
        ));
    }

    let mut rising = vec![points[0].clone()];
    let mut falling = Vec::new();
    for window in points.windows(2) {
        let (a, b) = (&window[0], &window[1]);
        if b.position >= a.position {
            rising.push(b.clone());
        } else {
            falling.push(b.clone());
        }
    }
    if rising.len() < 2 || falling.len() < 2 {
        return Err(DeviceError::Degenerate(
            "insufficient points on one hysteresis leg".into(),
        ));
    }

    let (rise_slope, rise_intercept, rise_residual) = linear_fit(&rising)?;
    let (fall_slope, fall_intercept, fall_residual) = linear_fit(&falling)?;

    let direction = (rise_slope + fall_slope) / 2.0;
    let mean_offset = points.iter().map(|p| p.offset).sum::<f64>() / points.len() as f64;
    let rise_position = (mean_offset - rise_intercept) / rise_slope;
    let fall_position = (mean_offset - fall_intercept) / fall_slope;
    let lag = (fall_position - rise_position).abs();
    let error = ((rise_residual + fall_residual) / points.len() as f64).sqrt();

    Ok(BacklashResult { direction, lag, error })
}

/// Ordinary least squares for `offset = slope · position + intercept`.
/// Returns `(slope, intercept, sum_squared_residual)`.
fn linear_fit(points: &[BacklashPoint]) -> Result<(f64, f64, f64), DeviceError> {
    let n = points.len() as f64;
    let sum_x: f64 = points.iter().map(|p| p.position).sum();
    let sum_y: f64 = points.iter().map(|p| p.offset).sum();
    let sum_xx: f64 = points.iter().map(|p| p.position * p.position).sum();
    let sum_xy: f64 = points.iter().map(|p| p.position * p.offset).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < 1e-12 {
        return Err(DeviceError::Degenerate(
            "degenerate hysteresis leg (no position spread)".into(),
        ));
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;

    let residual: f64 = points
        .iter()
        .map(|p| {
            let predicted = slope * p.position + intercept;
            (p.offset - predicted).powi(2)
        })
        .sum();

    Ok((slope, intercept, residual))
}

#[cfg(test)]
mod test {
    use super::*;

    fn synthetic_trace(slope: f64, lag: f64, cycles: usize, pulse: f64) -> Vec<BacklashPoint> {
        let mut points = Vec::new();
        let mut position = 0.0f64;
        let mut direction_up = true;
        for _ in 0..cycles {
            for &sign in &[1.0, -1.0] {
                position += sign * pulse;
                let shifted = if sign > 0.0 {
                    position
                } else {
                    position - lag
                };
                let _ = direction_up;
                points.push(BacklashPoint {
                    position,
                    offset: slope * shifted,
                });
                direction_up = sign > 0.0;
            }
        }
        points
    }

    #[test]
    fn test_fit_recovers_direction_slope() {
        let points = synthetic_trace(0.8, 0.0, 6, 5.0);
        let result = fit_hysteresis(&points).unwrap();
        assert!(
            (result.direction - 0.8).abs() < 0.05,
            "direction {} far from 0.8",
            result.direction
        );
    }

    #[test]
    fn test_fit_rejects_too_few_points() {
        let points = vec![
            BacklashPoint { position: 0.0, offset: 0.0 },
            BacklashPoint { position: 1.0, offset: 1.0 },
        ];
        assert!(matches!(
            fit_hysteresis(&points),
            Err(DeviceError::Degenerate(_))
        ));
    }
}
