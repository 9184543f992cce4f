//! Guiding endpoints (§4.D, §6): calibrate, start/stop the guiding loop,
//! and run a backlash analysis, each persisting its result through
//! `obs_store`'s calibration/tracking tables.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;

use obs_core::events::{ControlType, Event};
use obs_core::image::{Binning, Exposure, Point2, Purpose, Rectangle, ShutterState};
use obs_guide::calibration::GuidePortActuator;
use obs_guide::tracker::{NullTracker, StarTracker, Tracker};
use obs_guide::{run_backlash_analysis, run_calibration, run_guiding, Axis, GuideMatrix, GuiderConfig};
use obs_store::tables::calibration::save_run;
use obs_store::tables::tracking::start_run;
use obs_store::DbTrackingSink;

use crate::error::ApiError;
use crate::instrument::Instrument;
use crate::state::{AppState, GuidingRun};

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/instruments/:name/guider/calibrate", post(calibrate))
        .route("/api/instruments/:name/guider/backlash", post(backlash))
        .route("/api/instruments/:name/guider/start", post(start_guiding))
        .route("/api/instruments/:name/guider/stop", post(stop_guiding))
}

fn find(state: &AppState, name: &str) -> Result<Arc<Instrument>, ApiError> {
    state
        .instrument(name)
        .ok_or_else(|| obs_core::error::DeviceError::NotFound(format!("instrument {}", name)).into())
}

#[derive(Deserialize)]
struct ExposureDto {
    origin_x: u32,
    origin_y: u32,
    width: u32,
    height: u32,
    #[serde(default = "one")]
    bin_x: u32,
    #[serde(default = "one")]
    bin_y: u32,
    exposure_time_ms: u64,
    #[serde(default)]
    gain: f64,
}

fn one() -> u32 {
    1
}

impl From<ExposureDto> for Exposure {
    fn from(dto: ExposureDto) -> Self {
        Exposure {
            frame: Rectangle {
                origin_x: dto.origin_x,
                origin_y: dto.origin_y,
                width: dto.width,
                height: dto.height,
            },
            binning: Binning { x: dto.bin_x, y: dto.bin_y },
            exposure_time: Duration::from_millis(dto.exposure_time_ms),
            gain: dto.gain,
            vmax_limit: f64::INFINITY,
            shutter: ShutterState::Open,
            purpose: Purpose::Guide,
        }
    }
}

#[derive(Deserialize)]
struct TrackerDto {
    reference_x: f64,
    reference_y: f64,
    window_origin_x: u32,
    window_origin_y: u32,
    window_width: u32,
    window_height: u32,
    aperture: u32,
}

fn build_tracker(dto: Option<TrackerDto>) -> Arc<dyn Tracker> {
    match dto {
        Some(t) => Arc::new(StarTracker::new(
            Point2 { x: t.reference_x, y: t.reference_y },
            Rectangle {
                origin_x: t.window_origin_x,
                origin_y: t.window_origin_y,
                width: t.window_width,
                height: t.window_height,
            },
            t.aperture,
        )),
        None => Arc::new(NullTracker),
    }
}

#[derive(Deserialize)]
struct CalibrateRequestDto {
    exposure: ExposureDto,
    grid_constant: f64,
    #[serde(default)]
    tracker: Option<TrackerDto>,
}

#[derive(Serialize)]
struct CalibrationResultDto {
    coefficients: [f64; 6],
    determinant: f64,
}

/// Runs a full grid-walk calibration (§4.D.2). The run's points aren't
/// returned by `run_calibration` itself, so this subscribes to the
/// instrument's event bus for the run's duration to collect them for
/// [`save_run`], the same way a UI would render live calibration progress.
async fn calibrate(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<CalibrateRequestDto>,
) -> Result<Json<CalibrationResultDto>, ApiError> {
    let instrument = find(&state, &name)?;
    let guide_port = instrument
        .guide_port
        .clone()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("guide port".into()))?;

    if instrument.busy.swap(true, Ordering::SeqCst) {
        return Err(ApiError::bad_request("instrument is already running a calibration or guiding session"));
    }

    let actuator = Arc::new(GuidePortActuator(guide_port));
    let tracker = build_tracker(req.tracker);
    let cancel = AtomicBool::new(false);
    let mut point_stream = instrument.events.subscribe();
    let collected = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let collector = collected.clone();
    let collector_task = tokio::spawn(async move {
        while let Some(Ok(event)) = point_stream.next().await {
            if let Event::CalibrationPoint(point) = event {
                collector.lock().await.push(point);
            }
        }
    });

    let result = run_calibration(
        instrument.ccd.clone(),
        actuator,
        tracker,
        req.exposure.into(),
        &instrument.events,
        req.grid_constant,
        &cancel,
    )
    .await;

    collector_task.abort();
    instrument.busy.store(false, Ordering::SeqCst);
    let result = result?;
    let points = collected.lock().await;

    let mut conn = state.db.lock().await;
    save_run(&mut conn, &name, &result, &points).await?;
    drop(conn);

    let matrix = GuideMatrix::from_coefficients(&result.coefficients)?;
    state.calibration.lock().await.insert(name, matrix);

    Ok(Json(CalibrationResultDto {
        coefficients: result.coefficients,
        determinant: result.determinant,
    }))
}

#[derive(Deserialize)]
struct BacklashRequestDto {
    exposure: ExposureDto,
    axis: AxisDto,
    pulse_duration_secs: f64,
    cycles: usize,
    #[serde(default)]
    tracker: Option<TrackerDto>,
}

#[derive(Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
enum AxisDto {
    Ra,
    Dec,
}

impl From<AxisDto> for Axis {
    fn from(dto: AxisDto) -> Self {
        match dto {
            AxisDto::Ra => Axis::Ra,
            AxisDto::Dec => Axis::Dec,
        }
    }
}

#[derive(Serialize)]
struct BacklashResultDto {
    direction: f64,
    lag: f64,
    error: f64,
}

async fn backlash(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<BacklashRequestDto>,
) -> Result<Json<BacklashResultDto>, ApiError> {
    let instrument = find(&state, &name)?;
    let guide_port = instrument
        .guide_port
        .clone()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("guide port".into()))?;

    if instrument.busy.swap(true, Ordering::SeqCst) {
        return Err(ApiError::bad_request("instrument is already running a calibration or guiding session"));
    }

    let actuator = Arc::new(GuidePortActuator(guide_port));
    let tracker = build_tracker(req.tracker);
    let cancel = AtomicBool::new(false);

    let result = run_backlash_analysis(
        instrument.ccd.clone(),
        actuator,
        tracker,
        req.exposure.into(),
        req.axis.into(),
        req.pulse_duration_secs,
        req.cycles,
        &instrument.events,
        &cancel,
    )
    .await;

    instrument.busy.store(false, Ordering::SeqCst);
    let result = result?;

    Ok(Json(BacklashResultDto {
        direction: result.direction,
        lag: result.lag,
        error: result.error,
    }))
}

#[derive(Deserialize)]
struct StartGuidingDto {
    exposure: ExposureDto,
    #[serde(default)]
    tracker: Option<TrackerDto>,
    #[serde(default)]
    cycle_secs: Option<u64>,
}

/// Spawns the guiding loop (§4.D.3) in the background; it runs until
/// `/guider/stop` raises the per-instrument stop flag or a fatal exposure
/// error ends it on its own.
async fn start_guiding(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<StartGuidingDto>,
) -> Result<(), ApiError> {
    let instrument = find(&state, &name)?;
    let guide_port = instrument
        .guide_port
        .clone()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("guide port".into()))?;

    let matrix = *state
        .calibration
        .lock()
        .await
        .get(&name)
        .ok_or_else(|| ApiError::bad_request("instrument has no calibration on file; run /guider/calibrate first"))?;

    if instrument.busy.swap(true, Ordering::SeqCst) {
        return Err(ApiError::bad_request("instrument is already running a calibration or guiding session"));
    }

    let mut conn = state.db.lock().await;
    let run_id = start_run(&mut conn, &name, ControlType::GuidePort).await?;
    drop(conn);
    let history = Arc::new(DbTrackingSink::new(state.db.clone(), run_id));

    let actuator = Arc::new(GuidePortActuator(guide_port));
    let tracker = build_tracker(req.tracker);
    let stop = instrument.guiding_stop.clone();
    stop.store(false, Ordering::SeqCst);
    let config = GuiderConfig {
        cycle: Duration::from_secs(req.cycle_secs.unwrap_or(10)),
        control: ControlType::GuidePort,
    };
    let exposure: Exposure = req.exposure.into();
    let events = instrument.events.clone();
    let ccd = instrument.ccd.clone();
    let busy = instrument.busy.clone();
    let stop_for_task = stop.clone();

    let handle = tokio::spawn(async move {
        let _ = run_guiding(
            ccd,
            actuator,
            tracker,
            matrix,
            exposure,
            config,
            &events,
            history.as_ref(),
            None,
            &stop_for_task,
        )
        .await;
        busy.store(false, Ordering::SeqCst);
    });

    state
        .guiding
        .lock()
        .await
        .insert(name, GuidingRun { handle, stop });

    Ok(())
}

async fn stop_guiding(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<(), ApiError> {
    let mut guiding = state.guiding.lock().await;
    let run = guiding
        .remove(&name)
        .ok_or_else(|| ApiError::bad_request("instrument is not guiding"))?;
    run.stop.store(true, Ordering::SeqCst);
    drop(guiding);
    let _ = run.handle.await;
    Ok(())
}
