//! Focusing core (§4.F): figure-of-merit evaluation, curve solvers, and the
//! sweep that drives a [`obs_core::device::Focuser`] to its best position.

pub mod fom;
pub mod solver;
pub mod sweep;

pub use fom::{FigureOfMerit, HalfFluxDiameter, InverseBrightness};
pub use solver::{BrentSolver, ParabolicSolver, Solver};
pub use sweep::{run_focus_sweep, FocusState};
