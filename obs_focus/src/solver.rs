//! Focus solvers (§4.F): pick a target position from `(position, figure_of
//! merit)` samples, where lower is always better. The same
//! curve-fit-over-sweep-samples idiom as a hyperbolic-fit focus solver,
//! expressed here as "parabolic" and "brent" variants rather than a
//! 4-parameter hyperbolic fit (no `rmpfit`-equivalent crate is in this
//! workspace's stack).

use obs_core::error::DeviceError;

pub trait Solver: Send + Sync {
    /// `samples` need not be sorted by position; implementations that care
    /// about ordering sort internally. Returns the chosen position, or
    /// `Degenerate` if no minimum can be identified within the sampled
    /// range.
    fn solve(&self, samples: &[(f64, f64)]) -> Result<f64, DeviceError>;
}

/// Fits `value = a·position² + b·position + c` by ordinary least squares
/// and returns the parabola's vertex. Rejects a concave-down fit (no
/// minimum exists) or a vertex outside the sampled range.
pub struct ParabolicSolver;

impl Solver for ParabolicSolver {
    fn solve(&self, samples: &[(f64, f64)]) -> Result<f64, DeviceError> {
        if samples.len() < 3 {
            return Err(DeviceError::Degenerate("fewer than 3 focus samples".into()));
        }
        let (a, b, _c) = quadratic_fit(samples)?;
        if a <= 0.0 {
            return Err(DeviceError::Degenerate(
                "concave-down focus curve has no minimum".into(),
            ));
        }
        let vertex = -b / (2.0 * a);
        let (min_pos, max_pos) = position_range(samples);
        if vertex < min_pos || vertex > max_pos {
            return Err(DeviceError::Degenerate(format!(
                "solved position {} outside sampled range [{}, {}]",
                vertex, min_pos, max_pos
            )));
        }
        Ok(vertex)
    }
}

/// Finds the sample with the lowest value, then refines it via classic
/// three-point parabolic interpolation around its immediate neighbors (the
/// Brent-style "bracket then locally interpolate" pattern, without the
/// full golden-section bracket-narrowing loop since a fixed discrete
/// sweep already supplies the bracket).
pub struct BrentSolver;

impl Solver for BrentSolver {
    fn solve(&self, samples: &[(f64, f64)]) -> Result<f64, DeviceError> {
        if samples.len() < 3 {
            return Err(DeviceError::Degenerate("fewer than 3 focus samples".into()));
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap());

        let best = sorted
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.1.partial_cmp(&b.1).unwrap())
            .map(|(i, _)| i)
            .unwrap();

        if best == 0 || best == sorted.len() - 1 {
            return Err(DeviceError::Degenerate(
                "focus minimum at sweep boundary, out of range".into(),
            ));
        }

        let (x0, y0) = sorted[best - 1];
        let (x1, y1) = sorted[best];
        let (x2, y2) = sorted[best + 1];

        let numerator = (x1 - x0).powi(2) * (y1 - y2) - (x1 - x2).powi(2) * (y1 - y0);
        let denominator = (x1 - x0) * (y1 - y2) - (x1 - x2) * (y1 - y0);
        if denominator.abs() < 1e-12 {
            return Ok(x1);
        }
        let refined = x1 - 0.5 * numerator / denominator;

        let (min_pos, max_pos) = (x0, x2);
        Ok(refined.clamp(min_pos, max_pos))
    }
}

fn position_range(samples: &[(f64, f64)]) -> (f64, f64) {
    let min = samples.iter().map(|(p, _)| *p).fold(f64::INFINITY, f64::min);
    let max = samples.iter().map(|(p, _)| *p).fold(f64::NEG_INFINITY, f64::max);
    (min, max)
}

/// Least-squares fit of `value = a·x² + b·x + c` via the normal equations
/// over a 3×3 Gram matrix, mirroring the Cramer's-rule solve used for
/// guider calibration.
fn quadratic_fit(samples: &[(f64, f64)]) -> Result<(f64, f64, f64), DeviceError> {
    let mut gram = [[0.0f64; 3]; 3];
    let mut rhs = [0.0f64; 3];
    for &(x, y) in samples {
        let row = [x * x, x, 1.0];
        for r in 0..3 {
            rhs[r] += row[r] * y;
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

fn solve_3x3(m: [[f64; 3]; 3], rhs: [f64; 3]) -> Result<(f64, f64, f64), DeviceError> {
    let d = det3(&m);
    if d.abs() < 1e-15 {
        return Err(DeviceError::Degenerate("singular focus-fit normal equations".into()));
    }
    let mut result = [0.0; 3];
    for col in 0..3 {
        let mut replaced = m;
        for row in 0..3 {
            replaced[row][col] = rhs[row];
        }
        result[col] = det3(&replaced) / d;
    }
    Ok((result[0], result[1], result[2]))
}

#[cfg(test)]
mod test {
    use super::*;

    fn synthetic_curve(vertex: f64, width: f64, steps: usize) -> Vec<(f64, f64)> {
        (0..steps)
            .map(|i| {
                let x = vertex - width + 2.0 * width * i as f64 / (steps - 1) as f64;
                let y = (x - vertex).powi(2) + 1.0;
                (x, y)
            })
            .collect()
    }

    #[test]
    fn test_parabolic_solver_recovers_vertex() {
        let samples = synthetic_curve(5000.0, 2000.0, 9);
        let solved = ParabolicSolver.solve(&samples).unwrap();
        assert!((solved - 5000.0).abs() < 1.0, "solved {}", solved);
    }

    #[test]
    fn test_parabolic_solver_rejects_concave_up_inverted() {
        let samples: Vec<(f64, f64)> = synthetic_curve(5000.0, 2000.0, 9)
            .into_iter()
            .map(|(x, y)| (x, -y))
            .collect();
        assert!(ParabolicSolver.solve(&samples).is_err());
    }

    #[test]
    fn test_brent_solver_refines_near_vertex() {
        let samples = synthetic_curve(5000.0, 2000.0, 9);
        let solved = BrentSolver.solve(&samples).unwrap();
        assert!((solved - 5000.0).abs() < 250.0, "solved {}", solved);
    }

    #[test]
    fn test_brent_solver_rejects_boundary_minimum() {
        let samples: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, i as f64)).collect();
        assert!(BrentSolver.solve(&samples).is_err());
    }
}
