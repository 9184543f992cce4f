//! The periodic guiding loop (§4.D.3): expose, track, solve, correct, repeat.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use obs_core::device::ccd::capture_image;
use obs_core::device::Ccd;
use obs_core::error::DeviceError;
use obs_core::events::{ControlType, Event, EventBus, TrackingPoint};
use obs_core::image::{Exposure, Image};

use crate::calibration::Actuator;
use crate::tracker::Tracker;

/// Inverse of the calibration's upper-left 2x2 block, cached once per
/// guiding run rather than re-solved every cycle.
#[derive(Debug, Clone, Copy)]
pub struct GuideMatrix {
    inverse: [[f64; 2]; 2],
}

impl GuideMatrix {
    /// Inverts `[[a0,a1],[a3,a4]]` from a solved calibration. A calibration
    /// accepted by [`crate::calibration::solve_calibration`] has already
    /// cleared the determinant floor, but this is re-checked here since a
    /// `GuideMatrix` can also be built directly from stored coefficients.
    pub fn from_coefficients(coefficients: &[f64; 6]) -> Result<Self, DeviceError> {
        let [a0, a1, _, a3, a4, _] = *coefficients;
        let det = a0 * a4 - a1 * a3;
        if det.abs() < crate::calibration::DETERMINANT_FLOOR {
            return Err(DeviceError::Degenerate(format!(
                "|det| = {} below floor {}",
                det.abs(),
                crate::calibration::DETERMINANT_FLOOR
            )));
        }
        Ok(GuideMatrix {
            inverse: [[a4 / det, -a1 / det], [-a3 / det, a0 / det]],
        })
    }

    /// Solves `M · (dt_ra, dt_dec) = -offset` for the pulse durations that
    /// cancel `offset`.
    pub fn solve(&self, offset: (f64, f64)) -> (f64, f64) {
        let target = (-offset.0, -offset.1);
        (
            self.inverse[0][0] * target.0 + self.inverse[0][1] * target.1,
            self.inverse[1][0] * target.0 + self.inverse[1][1] * target.1,
        )
    }
}

/// Splits a signed duration pair into four non-negative channel durations,
/// each clamped to `[0, cycle]` so one guiding cycle cannot command more
/// correction than it has time to apply (§4.D.3 step 3).
pub fn split_and_clamp(dt_ra: f64, dt_dec: f64, cycle: Duration) -> (f64, f64, f64, f64) {
    let max = cycle.as_secs_f64();
    (
        dt_ra.max(0.0).min(max),
        (-dt_ra).max(0.0).min(max),
        dt_dec.max(0.0).min(max),
        (-dt_dec).max(0.0).min(max),
    )
}

/// Persists one guiding cycle's outcome; implemented by the tracking-history
/// table in the persistence crate and, in tests, by an in-memory recorder.
pub trait TrackingSink: Send + Sync {
    fn record(&self, point: &TrackingPoint);
}

impl TrackingSink for () {
    fn record(&self, _point: &TrackingPoint) {}
}

/// Optional hook for archiving guide-cycle frames. Most deployments leave
/// this `None` and keep only the tracking history, not every subframe.
pub trait ImageSink: Send + Sync {
    fn save(&self, image: &Image);
}

#[derive(Debug, Clone, Copy)]
pub struct GuiderConfig {
    pub cycle: Duration,
    pub control: ControlType,
}

impl Default for GuiderConfig {
    fn default() -> Self {
        GuiderConfig {
            cycle: Duration::from_secs(10),
            control: ControlType::GuidePort,
        }
    }
}

/// Runs the guiding loop until `stop` is set or a fatal exposure error
/// occurs. A failed exposure is reported by propagating the error out of
/// the loop rather than retrying inline; a `Cancelled` error always
/// terminates, any other exposure error is treated as fatal too since the
/// caller cannot distinguish "camera busy" from "camera gone" without
/// driver-specific knowledge (§4.D.3: "one failed cycle is reported and the
/// next proceeds" is honored at the tracker level — a frame the tracker
/// can't lock onto is skipped without aborting the run).
pub async fn run_guiding(
    ccd: Arc<dyn Ccd>,
    actuator: Arc<dyn Actuator>,
    tracker: Arc<dyn Tracker>,
    matrix: GuideMatrix,
    exposure: Exposure,
    config: GuiderConfig,
    events: &EventBus,
    history: &dyn TrackingSink,
    images: Option<&dyn ImageSink>,
    stop: &AtomicBool,
) -> Result<(), DeviceError> {
    loop {
        if stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        let image = capture_image(ccd.clone(), exposure.clone()).await?;

        if stop.load(Ordering::SeqCst) {
            return Ok(());
        }

        let Some(offset) = tracker.track(&image) else {
            tokio::time::sleep(config.cycle).await;
            continue;
        };

        let (dt_ra, dt_dec) = matrix.solve((offset.x, offset.y));
        let (ra_plus, ra_minus, dec_plus, dec_minus) =
            split_and_clamp(dt_ra, dt_dec, config.cycle);
        let clamped_ra = ra_plus - ra_minus;
        let clamped_dec = dec_plus - dec_minus;

        actuator.pulse(clamped_ra, clamped_dec).await?;

        let point = TrackingPoint {
            at: SystemTime::now(),
            star_offset: (offset.x, offset.y),
            correction_issued: (clamped_ra, clamped_dec),
            control_type: config.control,
        };
        events.emit(Event::TrackingPoint(point.clone()));
        history.record(&point);
        if let Some(sink) = images {
            sink.save(&image);
        }

        tokio::time::sleep(config.cycle).await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use obs_core::device::{Device, ExposureStatus};
    use obs_core::events::EventBus;
    use obs_core::image::{PixelBuffer, Point2, Rectangle};
    use obs_core::name::{DeviceName, DeviceType};

    #[test]
    fn test_guide_matrix_recovers_identity_correction() {
        let matrix = GuideMatrix::from_coefficients(&[0.5, 0.0, 0.0, 0.0, 0.5, 0.0]).unwrap();
        let (dt_ra, dt_dec) = matrix.solve((1.0, -2.0));
        assert!((dt_ra - -2.0).abs() < 1e-9);
        assert!((dt_dec - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_guide_matrix_rejects_degenerate_calibration() {
        assert!(GuideMatrix::from_coefficients(&[0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn test_split_and_clamp_caps_at_cycle() {
        let (ra_plus, ra_minus, dec_plus, dec_minus) =
            split_and_clamp(100.0, -100.0, Duration::from_secs(10));
        assert_eq!(ra_plus, 10.0);
        assert_eq!(ra_minus, 0.0);
        assert_eq!(dec_plus, 0.0);
        assert_eq!(dec_minus, 10.0);
    }

    struct NullCcd {
        name: DeviceName,
        events: EventBus,
        info: obs_core::image::CcdInfo,
    }

    impl Device for NullCcd {
        fn name(&self) -> &DeviceName {
            &self.name
        }
        fn events(&self) -> &EventBus {
            &self.events
        }
    }

    #[async_trait]
    impl Ccd for NullCcd {
        fn info(&self) -> &obs_core::image::CcdInfo {
            &self.info
        }
        async fn start_exposure(&self, _exposure: Exposure) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn exposure_status(&self) -> ExposureStatus {
            ExposureStatus::Exposed
        }
        async fn wait(&self) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn get_image(&self) -> Result<Image, DeviceError> {
            Ok(Image::new(4, 4, PixelBuffer::U16(vec![100; 16])))
        }
        async fn cancel_exposure(&self) -> Result<(), DeviceError> {
            Ok(())
        }
        async fn start_stream(&self, _exposure: Exposure) -> Result<(), DeviceError> {
            Err(DeviceError::CannotStream("not supported".into()))
        }
        async fn stop_stream(&self) -> Result<(), DeviceError> {
            Ok(())
        }
    }

    struct RecordingActuator {
        calls: AtomicUsize,
        last: Mutex<(f64, f64)>,
    }

    #[async_trait]
    impl Actuator for RecordingActuator {
        async fn pulse(&self, ra: f64, dec: f64) -> Result<(), DeviceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = (ra, dec);
            Ok(())
        }
    }

    struct CountingHistory(AtomicUsize);
    impl TrackingSink for CountingHistory {
        fn record(&self, _point: &TrackingPoint) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_guiding_loop_stops_promptly() {
        let ccd = Arc::new(NullCcd {
            name: DeviceName::new(DeviceType::Ccd, vec!["null".to_string()]),
            events: EventBus::default(),
            info: obs_core::image::CcdInfo {
                width: 4,
                height: 4,
                pixel_width_um: 5.0,
                pixel_height_um: 5.0,
                binning_modes: vec![],
                has_shutter: false,
                has_cooler: false,
                has_guide_port: false,
                default_frame: Rectangle::full_frame(4, 4),
            },
        });
        let actuator = Arc::new(RecordingActuator {
            calls: AtomicUsize::new(0),
            last: Mutex::new((0.0, 0.0)),
        });
        let tracker: Arc<dyn Tracker> = Arc::new(crate::tracker::StarTracker::new(
            Point2 { x: 2.0, y: 2.0 },
            Rectangle::full_frame(4, 4),
            1,
        ));
        let matrix = GuideMatrix::from_coefficients(&[1.0, 0.0, 0.0, 0.0, 1.0, 0.0]).unwrap();
        let events = EventBus::default();
        let history = CountingHistory(AtomicUsize::new(0));
        let stop = AtomicBool::new(false);

        let exposure = Exposure::new(Rectangle::full_frame(4, 4), Duration::from_millis(1));
        let config = GuiderConfig {
            cycle: Duration::from_millis(1),
            control: ControlType::GuidePort,
        };

        stop.store(true, Ordering::SeqCst);
        run_guiding(
            ccd,
            actuator.clone(),
            tracker,
            matrix,
            exposure,
            config,
            &events,
            &history,
            None,
            &stop,
        )
        .await
        .unwrap();

        assert_eq!(actuator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(history.0.load(Ordering::SeqCst), 0);
    }
}
