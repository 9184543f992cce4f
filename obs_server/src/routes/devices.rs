//! Device-control endpoints (§6): enumeration, exposure start/wait/cancel/
//! read, cooler set/on/off, filter-wheel select, focuser moveto, guide-port
//! activate, mount Goto/cancel/position-read — one instrument's worth of
//! devices per route, addressed by the instrument name in `Settings`.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use obs_core::device::ccd::ExposureStatus;
use obs_core::device::cooler::is_stable;
use obs_core::device::filter_wheel::select_by_name;
use obs_core::device::mount::{MountState, RaDec};
use obs_core::device::FilterWheelState;
use obs_core::image::{Binning, Exposure, Purpose, Rectangle, ShutterState};

use crate::error::ApiError;
use crate::instrument::Instrument;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/instruments", get(list_instruments))
        .route("/api/instruments/:name/ccd", get(ccd_info))
        .route(
            "/api/instruments/:name/ccd/exposure",
            post(start_exposure).get(exposure_status).delete(cancel_exposure),
        )
        .route("/api/instruments/:name/ccd/wait", post(wait_exposure))
        .route("/api/instruments/:name/ccd/image", get(read_image))
        .route(
            "/api/instruments/:name/ccd/stream",
            post(start_stream).delete(stop_stream),
        )
        .route("/api/instruments/:name/cooler", get(cooler_state).post(set_cooler))
        .route(
            "/api/instruments/:name/filter_wheel",
            get(filter_wheel_state).post(select_filter),
        )
        .route("/api/instruments/:name/focuser", get(focuser_state).post(moveto))
        .route(
            "/api/instruments/:name/guide_port",
            get(guide_port_state).post(activate),
        )
        .route(
            "/api/instruments/:name/mount",
            get(mount_state).post(mount_goto).delete(mount_cancel),
        )
}

fn find(state: &AppState, name: &str) -> Result<Arc<Instrument>, ApiError> {
    state
        .instrument(name)
        .ok_or_else(|| obs_core::error::DeviceError::NotFound(format!("instrument {}", name)).into())
}

async fn list_instruments(State(state): State<Arc<AppState>>) -> Json<Vec<String>> {
    Json(state.instruments.keys().cloned().collect())
}

#[derive(Serialize)]
struct CcdInfoDto {
    name: String,
    width: u32,
    height: u32,
    pixel_width_um: f64,
    pixel_height_um: f64,
    has_shutter: bool,
    has_cooler: bool,
    has_guide_port: bool,
}

async fn ccd_info(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<CcdInfoDto>, ApiError> {
    let instrument = find(&state, &name)?;
    let info = instrument.ccd.info();
    Ok(Json(CcdInfoDto {
        name: instrument.ccd.name().to_string(),
        width: info.width,
        height: info.height,
        pixel_width_um: info.pixel_width_um,
        pixel_height_um: info.pixel_height_um,
        has_shutter: info.has_shutter,
        has_cooler: info.has_cooler,
        has_guide_port: info.has_guide_port,
    }))
}

#[derive(Deserialize)]
struct ExposureDto {
    origin_x: u32,
    origin_y: u32,
    width: u32,
    height: u32,
    bin_x: u32,
    bin_y: u32,
    exposure_time_ms: u64,
    gain: f64,
    #[serde(default)]
    vmax_limit: Option<f64>,
    #[serde(default)]
    purpose: Option<Purpose>,
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
            binning: Binning {
                x: dto.bin_x.max(1),
                y: dto.bin_y.max(1),
            },
            exposure_time: Duration::from_millis(dto.exposure_time_ms),
            gain: dto.gain,
            vmax_limit: dto.vmax_limit.unwrap_or(f64::INFINITY),
            shutter: ShutterState::Open,
            purpose: dto.purpose.unwrap_or(Purpose::Light),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "lowercase")]
enum ExposureStatusDto {
    Idle,
    Exposing,
    Exposed,
    Cancelling,
    Streaming,
    Broken,
}

impl From<ExposureStatus> for ExposureStatusDto {
    fn from(value: ExposureStatus) -> Self {
        match value {
            ExposureStatus::Idle => ExposureStatusDto::Idle,
            ExposureStatus::Exposing => ExposureStatusDto::Exposing,
            ExposureStatus::Exposed => ExposureStatusDto::Exposed,
            ExposureStatus::Cancelling => ExposureStatusDto::Cancelling,
            ExposureStatus::Streaming => ExposureStatusDto::Streaming,
            ExposureStatus::Broken => ExposureStatusDto::Broken,
        }
    }
}

async fn start_exposure(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(dto): Json<ExposureDto>,
) -> Result<(), ApiError> {
    let instrument = find(&state, &name)?;
    instrument.ccd.start_exposure(dto.into()).await?;
    Ok(())
}

async fn exposure_status(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<ExposureStatusDto>, ApiError> {
    let instrument = find(&state, &name)?;
    Ok(Json(instrument.ccd.exposure_status().await.into()))
}

async fn wait_exposure(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<(), ApiError> {
    let instrument = find(&state, &name)?;
    instrument.ccd.wait().await?;
    Ok(())
}

async fn cancel_exposure(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<(), ApiError> {
    let instrument = find(&state, &name)?;
    instrument.ccd.cancel_exposure().await?;
    Ok(())
}

/// Reads the ready image (clearing it, per the `Ccd` contract) and returns
/// it FITS-encoded, the wire format §6 names for image payloads.
async fn read_image(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let instrument = find(&state, &name)?;
    let image = instrument.ccd.get_image().await?;
    let bytes = obs_store::fits::encode(&image);
    Ok(([("content-type", "application/fits")], bytes))
}

async fn start_stream(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(dto): Json<ExposureDto>,
) -> Result<(), ApiError> {
    let instrument = find(&state, &name)?;
    instrument.ccd.start_stream(dto.into()).await?;
    Ok(())
}

async fn stop_stream(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<(), ApiError> {
    let instrument = find(&state, &name)?;
    instrument.ccd.stop_stream().await?;
    Ok(())
}

#[derive(Serialize)]
struct CoolerStateDto {
    set_temperature: f64,
    actual_temperature: f64,
    is_on: bool,
    stable: bool,
}

#[derive(Deserialize)]
struct CoolerRequestDto {
    set_temperature: Option<f64>,
    on: Option<bool>,
}

async fn cooler_state(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<CoolerStateDto>, ApiError> {
    let instrument = find(&state, &name)?;
    let cooler = instrument
        .cooler
        .as_ref()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("cooler".into()))?;
    Ok(Json(CoolerStateDto {
        set_temperature: cooler.get_set_temperature().await,
        actual_temperature: cooler.get_actual_temperature().await,
        is_on: cooler.is_on().await,
        stable: is_stable(cooler.as_ref()).await,
    }))
}

async fn set_cooler(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<CoolerRequestDto>,
) -> Result<(), ApiError> {
    let instrument = find(&state, &name)?;
    let cooler = instrument
        .cooler
        .as_ref()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("cooler".into()))?;
    if let Some(target) = req.set_temperature {
        cooler.set_temperature(target).await?;
    }
    if let Some(on) = req.on {
        cooler.set_on(on).await?;
    }
    Ok(())
}

#[derive(Serialize)]
struct FilterWheelStateDto {
    n_filters: usize,
    current_position: usize,
    names: Vec<Option<String>>,
    state: &'static str,
}

#[derive(Deserialize)]
struct FilterSelectDto {
    index: Option<usize>,
    name: Option<String>,
}

async fn filter_wheel_state(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<FilterWheelStateDto>, ApiError> {
    let instrument = find(&state, &name)?;
    let wheel = instrument
        .filter_wheel
        .as_ref()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("filter wheel".into()))?;
    let names = (0..wheel.n_filters()).map(|i| wheel.filter_name(i)).collect();
    let wheel_state = match wheel.state().await {
        FilterWheelState::Idle => "idle",
        FilterWheelState::Moving => "moving",
        FilterWheelState::Unknown => "unknown",
    };
    Ok(Json(FilterWheelStateDto {
        n_filters: wheel.n_filters(),
        current_position: wheel.current_position().await,
        names,
        state: wheel_state,
    }))
}

async fn select_filter(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<FilterSelectDto>,
) -> Result<(), ApiError> {
    let instrument = find(&state, &name)?;
    let wheel = instrument
        .filter_wheel
        .as_ref()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("filter wheel".into()))?;
    match (req.index, req.name) {
        (Some(index), _) => wheel.select(index).await?,
        (None, Some(name)) => select_by_name(wheel.as_ref(), &name).await?,
        (None, None) => return Err(ApiError::bad_request("select requires index or name")),
    }
    Ok(())
}

#[derive(Serialize)]
struct FocuserStateDto {
    min: i32,
    max: i32,
    current: i32,
    backlash: i32,
}

#[derive(Deserialize)]
struct MoveToDto {
    position: i32,
}

async fn focuser_state(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<FocuserStateDto>, ApiError> {
    let instrument = find(&state, &name)?;
    let focuser = instrument
        .focuser
        .as_ref()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("focuser".into()))?;
    Ok(Json(FocuserStateDto {
        min: focuser.min(),
        max: focuser.max(),
        current: focuser.current().await,
        backlash: focuser.backlash(),
    }))
}

async fn moveto(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<MoveToDto>,
) -> Result<(), ApiError> {
    let instrument = find(&state, &name)?;
    let focuser = instrument
        .focuser
        .as_ref()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("focuser".into()))?;
    focuser.moveto(req.position).await?;
    Ok(())
}

#[derive(Serialize)]
struct GuidePortStateDto {
    ra_plus: bool,
    ra_minus: bool,
    dec_plus: bool,
    dec_minus: bool,
}

#[derive(Deserialize, Default)]
struct ActivateDto {
    #[serde(default)]
    ra_plus: f64,
    #[serde(default)]
    ra_minus: f64,
    #[serde(default)]
    dec_plus: f64,
    #[serde(default)]
    dec_minus: f64,
}

async fn guide_port_state(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<GuidePortStateDto>, ApiError> {
    let instrument = find(&state, &name)?;
    let port = instrument
        .guide_port
        .as_ref()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("guide port".into()))?;
    let bits = port.active();
    Ok(Json(GuidePortStateDto {
        ra_plus: bits.ra_plus,
        ra_minus: bits.ra_minus,
        dec_plus: bits.dec_plus,
        dec_minus: bits.dec_minus,
    }))
}

async fn activate(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<ActivateDto>,
) -> Result<(), ApiError> {
    let instrument = find(&state, &name)?;
    let port = instrument
        .guide_port
        .as_ref()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("guide port".into()))?;
    port.activate(req.ra_plus, req.ra_minus, req.dec_plus, req.dec_minus)
        .await?;
    Ok(())
}

#[derive(Serialize)]
struct MountStateDto {
    state: &'static str,
    ra_hours: f64,
    dec_degrees: f64,
    azimuth_degrees: f64,
    altitude_degrees: f64,
}

#[derive(Deserialize)]
struct GotoDto {
    ra_hours: f64,
    dec_degrees: f64,
}

async fn mount_state(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<MountStateDto>, ApiError> {
    let instrument = find(&state, &name)?;
    let mount = instrument
        .mount
        .as_ref()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("mount".into()))?;
    let radec = mount.get_ra_dec().await;
    let azmalt = mount.get_azm_alt().await;
    let state_name = match mount.state().await {
        MountState::Idle => "idle",
        MountState::Aligned => "aligned",
        MountState::Tracking => "tracking",
        MountState::Goto => "goto",
        MountState::Limit => "limit",
        MountState::Parked => "parked",
    };
    Ok(Json(MountStateDto {
        state: state_name,
        ra_hours: radec.ra_hours,
        dec_degrees: radec.dec_degrees,
        azimuth_degrees: azmalt.azimuth_degrees,
        altitude_degrees: azmalt.altitude_degrees,
    }))
}

async fn mount_goto(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<GotoDto>,
) -> Result<(), ApiError> {
    let instrument = find(&state, &name)?;
    let mount = instrument
        .mount
        .as_ref()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("mount".into()))?;
    mount
        .goto(RaDec {
            ra_hours: req.ra_hours,
            dec_degrees: req.dec_degrees,
        })
        .await?;
    Ok(())
}

async fn mount_cancel(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<(), ApiError> {
    let instrument = find(&state, &name)?;
    let mount = instrument
        .mount
        .as_ref()
        .ok_or_else(|| obs_core::error::DeviceError::NotFound("mount".into()))?;
    mount.cancel().await?;
    Ok(())
}
