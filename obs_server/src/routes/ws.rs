//! Event-stream WebSocket endpoint (§6): a reader future forwarding
//! client pings/closes, a writer future draining an internal broadcast
//! channel back to the socket, and a stream future fanning the
//! instrument's [`EventBus`] into that channel as JSON text frames.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Serialize;

use obs_core::events::{
    BacklashPoint, BacklashResult, CalibrationImageProgress, CalibrationPoint, CalibrationResult,
    ControlType, CoolerInfo, DewHeater, Event, FocusPoint, FocusResult, ProgressInfo, Temperature,
    TrackingPoint,
};

use crate::error::ApiError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/instruments/:name/ws", get(upgrade))
}

async fn upgrade(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, ApiError> {
    let instrument = state
        .instrument(&name)
        .ok_or_else(|| obs_core::error::DeviceError::NotFound(format!("instrument {}", name)))?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, instrument)))
}

#[derive(Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum WireEvent<'a> {
    ImageReady { device: String },
    CalibrationPoint(&'a CalibrationPoint),
    CalibrationComplete(&'a CalibrationResult),
    TrackingPoint(WireTrackingPoint),
    ProgressInfo(&'a ProgressInfo),
    BacklashPoint(&'a BacklashPoint),
    BacklashResult(&'a BacklashResult),
    CalibrationImageProgress(&'a CalibrationImageProgress),
    FocusPoint(&'a FocusPoint),
    FocusResult(&'a FocusResult),
    Heartbeat,
    CoolerInfo(&'a CoolerInfo),
    DewHeater(&'a DewHeater),
    Temperature(&'a Temperature),
}

#[derive(Serialize)]
struct WireTrackingPoint {
    star_offset: (f64, f64),
    correction_issued: (f64, f64),
    control_type: &'static str,
}

fn control_type_str(control: ControlType) -> &'static str {
    match control {
        ControlType::GuidePort => "guide_port",
        ControlType::AdaptiveOptics => "adaptive_optics",
    }
}

fn to_wire(event: &Event) -> WireEvent<'_> {
    match event {
        Event::ImageReady { device, .. } => WireEvent::ImageReady {
            device: device.unparse(),
        },
        Event::CalibrationPoint(p) => WireEvent::CalibrationPoint(p),
        Event::CalibrationComplete(r) => WireEvent::CalibrationComplete(r),
        Event::TrackingPoint(t) => WireEvent::TrackingPoint(WireTrackingPoint {
            star_offset: t.star_offset,
            correction_issued: t.correction_issued,
            control_type: control_type_str(t.control_type),
        }),
        Event::ProgressInfo(p) => WireEvent::ProgressInfo(p),
        Event::BacklashPoint(p) => WireEvent::BacklashPoint(p),
        Event::BacklashResult(r) => WireEvent::BacklashResult(r),
        Event::CalibrationImageProgress(p) => WireEvent::CalibrationImageProgress(p),
        Event::FocusPoint(p) => WireEvent::FocusPoint(p),
        Event::FocusResult(r) => WireEvent::FocusResult(r),
        Event::Heartbeat => WireEvent::Heartbeat,
        Event::CoolerInfo(c) => WireEvent::CoolerInfo(c),
        Event::DewHeater(d) => WireEvent::DewHeater(d),
        Event::Temperature(t) => WireEvent::Temperature(t),
    }
}

async fn handle_socket(socket: WebSocket, instrument: Arc<crate::instrument::Instrument>) {
    let (ws_send, mut ws_recv) = tokio::sync::broadcast::channel::<Message>(1024);
    let (mut writer, mut reader) = socket.split();

    let reader_future = {
        let ws_send = ws_send.clone();
        async move {
            while let Some(msg) = reader.next().await {
                match msg {
                    Ok(Message::Close(frame)) => {
                        let _ = ws_send.send(Message::Close(frame));
                        break;
                    }
                    Ok(Message::Ping(payload)) => {
                        let _ = ws_send.send(Message::Pong(payload));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "websocket read error");
                        break;
                    }
                }
            }
        }
    };

    let writer_future = async move {
        loop {
            match ws_recv.recv().await {
                Ok(msg) => {
                    let is_close = matches!(msg, Message::Close(_));
                    if writer.send(msg).await.is_err() || is_close {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
        let _ = writer.close().await;
    };

    let stream_future = {
        let ws_send = ws_send.clone();
        let mut events = instrument.events.subscribe();
        async move {
            while let Some(Ok(event)) = events.next().await {
                let text = serde_json::to_string(&to_wire(&event)).unwrap_or_default();
                if ws_send.send(Message::Text(text)).is_err() {
                    break;
                }
            }
            let _ = ws_send.send(Message::Close(Some(CloseFrame {
                code: axum::extract::ws::close_code::NORMAL,
                reason: "end of data".into(),
            })));
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        _ = reader_future => {}
        _ = writer_future => {}
        _ = stream_future => {}
    }
}
