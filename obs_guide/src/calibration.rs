//! Guider calibration (§4.D.2): estimate the linear map from actuator pulse
//! durations to pixel drift by walking a small grid of test pulses.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;

use obs_core::device::ccd::capture_image;
use obs_core::device::{AdaptiveOptics, Ccd, GuidePort};
use obs_core::error::DeviceError;
use obs_core::events::{CalibrationPoint, CalibrationResult, Event, EventBus, ProgressInfo};
use obs_core::image::Exposure;

use crate::tracker::Tracker;

/// A drift-correction actuator a calibration run can pulse: either a
/// `GuidePort` (pulse duration per channel) or an `AdaptiveOptics` tip/tilt
/// stage (pulse approximated as a bounded incremental position step, since
/// an AO mirror has no native "duration" concept).
#[async_trait]
pub trait Actuator: Send + Sync {
    async fn pulse(&self, ra: f64, dec: f64) -> Result<(), DeviceError>;
}

pub struct GuidePortActuator(pub Arc<dyn GuidePort>);

#[async_trait]
impl Actuator for GuidePortActuator {
    async fn pulse(&self, ra: f64, dec: f64) -> Result<(), DeviceError> {
        let ra_plus = ra.max(0.0);
        let ra_minus = (-ra).max(0.0);
        let dec_plus = dec.max(0.0);
        let dec_minus = (-dec).max(0.0);
        self.0.activate(ra_plus, ra_minus, dec_plus, dec_minus).await
    }
}

/// Scales pulse "durations" into AO step sizes so the same grid-walk
/// calibration routine can drive either actuator kind.
pub struct AdaptiveOpticsActuator {
    pub ao: Arc<dyn AdaptiveOptics>,
    pub volts_per_second: f64,
}

#[async_trait]
impl Actuator for AdaptiveOpticsActuator {
    async fn pulse(&self, ra: f64, dec: f64) -> Result<(), DeviceError> {
        let current = self.ao.get().await;
        let target = obs_core::image::Point2 {
            x: (current.x + ra * self.volts_per_second).clamp(-1.0, 1.0),
            y: (current.y + dec * self.volts_per_second).clamp(-1.0, 1.0),
        };
        self.ao.set(target).await
    }
}

/// §4.D.2's grid constant: `max(2, 10·(pixelsize_um/7.4)·(100mm/focallength))` seconds.
pub fn grid_constant(pixel_size_um: f64, focal_length_mm: f64) -> f64 {
    let scaled = 10.0 * (pixel_size_um / 7.4) * (100.0 / focal_length_mm);
    scaled.max(2.0)
}

/// Minimum `|det|` for a calibration to be accepted (§4.D.2, §8 invariant 2).
pub const DETERMINANT_FLOOR: f64 = 1e-9;

/// Walks the `{-1,0,1}²` pulse grid, recording one forward and one reverse
/// [`CalibrationPoint`] per cell, then solves the resulting system. Checks
/// `cancel` before every step (§5).
pub async fn run_calibration(
    ccd: Arc<dyn Ccd>,
    actuator: Arc<dyn Actuator>,
    tracker: Arc<dyn Tracker>,
    exposure: Exposure,
    events: &EventBus,
    grid_constant: f64,
    cancel: &AtomicBool,
) -> Result<CalibrationResult, DeviceError> {
    const R: i32 = 1;
    let cells: Vec<(i32, i32)> = (-R..=R).flat_map(|i| (-R..=R).map(move |j| (i, j))).collect();
    let total = cells.len() * 2;
    let start = Instant::now();
    let mut points = Vec::with_capacity(total);
    let mut step = 0usize;

    for (i, j) in cells {
        if cancel.load(Ordering::SeqCst) {
            return Err(DeviceError::Cancelled);
        }
        let commanded = (i as f64 * grid_constant, j as f64 * grid_constant);
        actuator.pulse(commanded.0, commanded.1).await?;
        let observed = observe(&ccd, &tracker, exposure.clone()).await?;
        step += 1;
        record_point(events, &mut points, start, commanded, observed, step, total);

        if cancel.load(Ordering::SeqCst) {
            return Err(DeviceError::Cancelled);
        }
        let reverse = (-commanded.0, -commanded.1);
        actuator.pulse(reverse.0, reverse.1).await?;
        let observed = observe(&ccd, &tracker, exposure.clone()).await?;
        step += 1;
        record_point(events, &mut points, start, reverse, observed, step, total);
    }

    solve_calibration(&points)
}

async fn observe(
    ccd: &Arc<dyn Ccd>,
    tracker: &Arc<dyn Tracker>,
    exposure: Exposure,
) -> Result<(f64, f64), DeviceError> {
    let image = capture_image(ccd.clone(), exposure).await?;
    let offset = tracker.track(&image).unwrap_or(obs_core::image::Point2 { x: 0.0, y: 0.0 });
    Ok((offset.x, offset.y))
}

fn record_point(
    events: &EventBus,
    points: &mut Vec<CalibrationPoint>,
    start: Instant,
    commanded: (f64, f64),
    observed: (f64, f64),
    step: usize,
    total: usize,
) {
    let point = CalibrationPoint {
        elapsed: start.elapsed(),
        commanded,
        observed,
    };
    events.emit(Event::CalibrationPoint(point.clone()));
    points.push(point);
    events.emit(Event::ProgressInfo(ProgressInfo { step, total }));
}

/// Fits `dx = a0·dt_ra + a1·dt_dec + a2·dt_elapsed` and
/// `dy = a3·dt_ra + a4·dt_dec + a5·dt_elapsed` (§3's affine model) as two
/// independent 3-unknown ordinary least squares problems, each solved via a
/// closed-form Cramer's-rule inverse of its 3×3 normal-equation Gram matrix.
pub fn solve_calibration(points: &[CalibrationPoint]) -> Result<CalibrationResult, DeviceError> {
    if points.len() < 3 {
        return Err(DeviceError::Degenerate("fewer than 3 calibration points".into()));
    }
    let rows: Vec<[f64; 3]> = points
        .iter()
        .map(|p| [p.commanded.0, p.commanded.1, p.elapsed.as_secs_f64()])
        .collect();
    let dx: Vec<f64> = points.iter().map(|p| p.observed.0).collect();
    let dy: Vec<f64> = points.iter().map(|p| p.observed.1).collect();

    let [a0, a1, a2] = ols_3(&rows, &dx)?;
    let [a3, a4, a5] = ols_3(&rows, &dy)?;

    let coefficients = [a0, a1, a2, a3, a4, a5];
    let determinant = a0 * a4 - a1 * a3;
    if determinant.abs() < DETERMINANT_FLOOR {
        return Err(DeviceError::Degenerate(format!(
            "|det| = {} below floor {}",
            determinant.abs(),
            DETERMINANT_FLOOR
        )));
    }
    Ok(CalibrationResult { coefficients, determinant })
}

/// Solves `min ||X·beta - y||²` for a 3-column design matrix via the normal
/// equations `(XᵀX) beta = Xᵀy`, inverting the 3×3 Gram matrix by Cramer's
/// rule.
fn ols_3(rows: &[[f64; 3]], y: &[f64]) -> Result<[f64; 3], DeviceError> {
    let mut gram = [[0.0f64; 3]; 3];
    let mut rhs = [0.0f64; 3];
    for (row, &target) in rows.iter().zip(y.iter()) {
        for r in 0..3 {
            rhs[r] += row[r] * target;
            for c in 0..3 {
                gram[r][c] += row[r] * row[c];
            }
        }
    }
    solve_3x3(gram, rhs)
}

fn det3(m: &[[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

fn solve_3x3(m: [[f64; 3]; 3], rhs: [f64; 3]) -> Result<[f64; 3], DeviceError> {
    let d = det3(&m);
    if d.abs() < 1e-15 {
        return Err(DeviceError::Degenerate("singular normal-equations matrix".into()));
    }
    let mut result = [0.0; 3];
    for col in 0..3 {
        let mut replaced = m;
        for row in 0..3 {
            replaced[row][col] = rhs[row];
        }
        result[col] = det3(&replaced) / d;
    }
    Ok(result)
}

/// Reparametrizes linear coefficients fit on raw grid indices into
/// coefficients fit on durations already multiplied by `g`: since
/// `dx = a·i = a·(i·g)/g`, the slope with respect to `i·g` is `a/g`, i.e.
/// `rescale(1.0 / g)`.
pub fn rescale(result: &CalibrationResult, factor: f64) -> CalibrationResult {
    let c = result.coefficients;
    let coefficients = [
        c[0] * factor,
        c[1] * factor,
        c[2],
        c[3] * factor,
        c[4] * factor,
        c[5],
    ];
    CalibrationResult {
        coefficients,
        determinant: result.determinant * factor * factor,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// `elapsed` is varied per point (rather than held at zero) so the
    /// design matrix's third column isn't degenerate; `dx`/`dy` have no
    /// elapsed-time dependency here, so the fitted `a2`/`a5` should land
    /// near zero.
    fn synthetic_points(a: [[f64; 2]; 2], g: f64) -> Vec<CalibrationPoint> {
        let mut points = Vec::new();
        let mut step = 0u32;
        for i in -1..=1 {
            for j in -1..=1 {
                let dt_ra = i as f64 * g;
                let dt_dec = j as f64 * g;
                let dx = a[0][0] * dt_ra + a[0][1] * dt_dec;
                let dy = a[1][0] * dt_ra + a[1][1] * dt_dec;
                points.push(CalibrationPoint {
                    elapsed: std::time::Duration::from_millis(100 * step as u64),
                    commanded: (dt_ra, dt_dec),
                    observed: (dx, dy),
                });
                step += 1;
            }
        }
        points
    }

    #[test]
    fn test_solve_recovers_linear_map() {
        let a = [[0.5, 0.0], [0.0, 0.5]];
        let points = synthetic_points(a, 3.0);
        let result = solve_calibration(&points).unwrap();
        assert!((result.coefficients[0] - 0.5).abs() < 1e-6);
        assert!((result.coefficients[4] - 0.5).abs() < 1e-6);
        assert!((result.determinant - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_degenerate_matrix_rejected() {
        let points = synthetic_points([[0.0, 0.0], [0.0, 0.0]], 3.0);
        assert!(matches!(
            solve_calibration(&points),
            Err(DeviceError::Degenerate(_))
        ));
    }

    #[test]
    fn test_rescale_matches_fit_on_scaled_durations() {
        let a = [[0.5, 0.1], [-0.2, 0.6]];
        let g = 4.0;

        let raw_points = synthetic_points(a, 1.0);
        let raw_fit = solve_calibration(&raw_points).unwrap();

        let scaled_points = synthetic_points(a, g);
        let scaled_fit = solve_calibration(&scaled_points).unwrap();

        let rescaled = rescale(&raw_fit, 1.0 / g);
        for k in 0..6 {
            assert!(
                (rescaled.coefficients[k] - scaled_fit.coefficients[k]).abs() < 1e-6,
                "coefficient {} mismatch: {} vs {}",
                k,
                rescaled.coefficients[k],
                scaled_fit.coefficients[k]
            );
        }
    }

    #[test]
    fn test_grid_constant_floor() {
        assert_eq!(grid_constant(3.8, 1000.0), 2.0);
        assert!(grid_constant(9.0, 50.0) > 2.0);
    }
}
