//! The typed multicast callback bus.
//!
//! A shared mutable callback set is the usual naive design here (§9); this
//! is a [`tokio::sync::broadcast`] channel of [`Event`] values instead.
//! A subscription is a `Stream` handle; dropping it unregisters implicitly,
//! so there is no manual `removeCallback` call to forget.

use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::image::Image;
use crate::name::DeviceName;

#[derive(Debug, Clone, serde::Serialize)]
pub struct CalibrationPoint {
    pub elapsed: std::time::Duration,
    pub commanded: (f64, f64),
    pub observed: (f64, f64),
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CalibrationResult {
    pub coefficients: [f64; 6],
    pub determinant: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TrackingPoint {
    pub at: SystemTime,
    pub star_offset: (f64, f64),
    pub correction_issued: (f64, f64),
    pub control_type: ControlType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ControlType {
    GuidePort,
    AdaptiveOptics,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ProgressInfo {
    pub step: usize,
    pub total: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BacklashPoint {
    pub position: f64,
    pub offset: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BacklashResult {
    pub direction: f64,
    pub lag: f64,
    pub error: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CalibrationImageProgress {
    pub image_no: usize,
    pub image_count: usize,
}

/// One (position, figure-of-merit) sample from a focus sweep (§4.F step 1).
#[derive(Debug, Clone, serde::Serialize)]
pub struct FocusPoint {
    pub position: i32,
    pub value: f64,
}

/// The solver's chosen target position and its (fitted or sampled)
/// figure-of-merit value, emitted once a sweep reaches FOCUSED.
#[derive(Debug, Clone, serde::Serialize)]
pub struct FocusResult {
    pub position: i32,
    pub value: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct CoolerInfo {
    pub set_temperature: f64,
    pub actual_temperature: f64,
    pub is_on: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DewHeater {
    pub current: f64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct Temperature {
    pub set_temperature: f64,
}

/// The tagged sum type flowing over the callback bus. Producers never know
/// who (if anyone) is listening.
#[derive(Debug, Clone)]
pub enum Event {
    ImageReady {
        device: DeviceName,
        image: Arc<Image>,
    },
    CalibrationPoint(CalibrationPoint),
    CalibrationComplete(CalibrationResult),
    TrackingPoint(TrackingPoint),
    ProgressInfo(ProgressInfo),
    BacklashPoint(BacklashPoint),
    BacklashResult(BacklashResult),
    CalibrationImageProgress(CalibrationImageProgress),
    FocusPoint(FocusPoint),
    FocusResult(FocusResult),
    Heartbeat,
    CoolerInfo(CoolerInfo),
    DewHeater(DewHeater),
    Temperature(Temperature),
}

/// A per-device event bus. Emitting iterates the broadcast channel's
/// subscribers; a slow subscriber only ever sees `RecvError::Lagged` on its
/// own stream, never stalls the producer and never affects any other
/// subscriber.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl Default for EventBus {
    fn default() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        EventBus { tx }
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        EventBus { tx }
    }

    /// Publishes an event. Returns the number of subscribers that received
    /// it (zero is not an error: nobody is required to be listening).
    pub fn emit(&self, event: Event) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> BroadcastStream<Event> {
        BroadcastStream::new(self.tx.subscribe())
    }
}
