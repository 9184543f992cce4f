//! Focus-sweep endpoint (§4.F, §6): drives a sweep across the focuser's
//! travel, reporting the solved best position.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use obs_core::image::{Binning, Exposure, Purpose, Rectangle, ShutterState};
use obs_focus::{run_focus_sweep, BrentSolver, HalfFluxDiameter, InverseBrightness, ParabolicSolver, Solver};

use crate::error::ApiError;
use crate::instrument::Instrument;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/instruments/:name/focus/sweep", post(sweep))
}

fn find(state: &AppState, name: &str) -> Result<Arc<Instrument>, ApiError> {
    state
        .instrument(name)
        .ok_or_else(|| obs_core::error::DeviceError::NotFound(format!("instrument {}", name)).into())
}

#[derive(Deserialize)]
struct WindowDto {
    origin_x: u32,
    origin_y: u32,
    width: u32,
    height: u32,
}

impl From<WindowDto> for Rectangle {
    fn from(w: WindowDto) -> Self {
        Rectangle { origin_x: w.origin_x, origin_y: w.origin_y, width: w.width, height: w.height }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum FigureOfMeritDto {
    HalfFluxDiameter,
    InverseBrightness,
}

#[derive(Deserialize)]
#[serde(rename_all = "lowercase")]
enum SolverDto {
    Parabolic,
    Brent,
}

#[derive(Deserialize)]
struct SweepRequestDto {
    window: WindowDto,
    #[serde(default = "default_fom")]
    fom: FigureOfMeritDto,
    #[serde(default = "default_solver")]
    solver: SolverDto,
    origin_x: u32,
    origin_y: u32,
    width: u32,
    height: u32,
    exposure_time_ms: u64,
    #[serde(default)]
    gain: f64,
    min: i32,
    max: i32,
    steps: usize,
}

fn default_fom() -> FigureOfMeritDto {
    FigureOfMeritDto::HalfFluxDiameter
}

fn default_solver() -> SolverDto {
    SolverDto::Parabolic
}

#[derive(Serialize)]
struct SweepResponseDto {
    position: i32,
}

async fn sweep(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<SweepRequestDto>,
) -> Result<Json<SweepResponseDto>, ApiError> {
    let instrument = find(&state, &name)?;
    let focuser = instrument
        .focuser
        .clone()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("focuser".into()))?;

    let window: Rectangle = req.window.into();
    let fom: Arc<dyn obs_focus::FigureOfMerit> = match req.fom {
        FigureOfMeritDto::HalfFluxDiameter => Arc::new(HalfFluxDiameter { window }),
        FigureOfMeritDto::InverseBrightness => Arc::new(InverseBrightness { window }),
    };
    let solver: Arc<dyn Solver> = match req.solver {
        SolverDto::Parabolic => Arc::new(ParabolicSolver),
        SolverDto::Brent => Arc::new(BrentSolver),
    };

    let exposure = Exposure {
        frame: Rectangle {
            origin_x: req.origin_x,
            origin_y: req.origin_y,
            width: req.width,
            height: req.height,
        },
        binning: Binning { x: 1, y: 1 },
        exposure_time: Duration::from_millis(req.exposure_time_ms),
        gain: req.gain,
        vmax_limit: f64::INFINITY,
        shutter: ShutterState::Open,
        purpose: Purpose::Focus,
    };

    let cancel = AtomicBool::new(false);
    let position = run_focus_sweep(
        focuser,
        instrument.ccd.clone(),
        exposure,
        fom,
        solver,
        req.min,
        req.max,
        req.steps,
        &instrument.events,
        &cancel,
    )
    .await?;

    Ok(Json(SweepResponseDto { position }))
}
