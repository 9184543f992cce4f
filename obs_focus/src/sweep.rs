//! Sweep-based autofocus run (§4.F): position → expose → evaluate figure
//! of merit → repeat, then hand the samples to a solver and move there.
//! State machine: IDLE → MOVING → MEASURING → … → FOCUSED, or → FAILED on
//! any propagated error or out-of-range solver answer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use obs_core::device::ccd::capture_image;
use obs_core::device::{Ccd, Focuser};
use obs_core::error::DeviceError;
use obs_core::events::{Event, EventBus, FocusPoint, FocusResult, ProgressInfo};
use obs_core::image::Exposure;

use crate::fom::FigureOfMerit;
use crate::solver::Solver;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FocusState {
    Idle,
    Moving,
    Measuring,
    Focused,
    Failed,
}

/// Runs one focus sweep: `steps` positions evenly spaced across
/// `[min, max]`, each reached via the focuser's own backlash-compensated
/// `moveto` (§4.B), each measured with `fom`, then handed to `solver`.
/// Returns the final focuser position on success.
pub async fn run_focus_sweep(
    focuser: Arc<dyn Focuser>,
    ccd: Arc<dyn Ccd>,
    exposure: Exposure,
    fom: Arc<dyn FigureOfMerit>,
    solver: Arc<dyn Solver>,
    min: i32,
    max: i32,
    steps: usize,
    events: &EventBus,
    cancel: &AtomicBool,
) -> Result<i32, DeviceError> {
    if steps < 2 {
        return Err(DeviceError::Degenerate(
            "focus sweep needs at least 2 steps".into(),
        ));
    }
    let mut samples = Vec::with_capacity(steps);

    for k in 0..steps {
        if cancel.load(Ordering::SeqCst) {
            return Err(DeviceError::Cancelled);
        }
        let position = min + ((k as i64 * (max - min) as i64) / (steps as i64 - 1)) as i32;

        focuser.moveto(position).await?;

        if cancel.load(Ordering::SeqCst) {
            return Err(DeviceError::Cancelled);
        }

        let image = capture_image(ccd.clone(), exposure.clone()).await?;
        let value = fom.evaluate(&image);

        events.emit(Event::FocusPoint(FocusPoint { position, value }));
        events.emit(Event::ProgressInfo(ProgressInfo {
            step: k + 1,
            total: steps,
        }));
        samples.push((position as f64, value));
    }

    let solved = solver.solve(&samples)?.round() as i32;
    if solved < min || solved > max {
        return Err(DeviceError::Degenerate(format!(
            "solver answer {} outside sweep range [{}, {}]",
            solved, min, max
        )));
    }

    focuser.moveto(solved).await?;
    let value = nearest_sample_value(&samples, solved);
    events.emit(Event::FocusResult(FocusResult {
        position: solved,
        value,
    }));
    Ok(solved)
}

fn nearest_sample_value(samples: &[(f64, f64)], position: i32) -> f64 {
    samples
        .iter()
        .min_by(|(a, _), (b, _)| {
            (a - position as f64)
                .abs()
                .partial_cmp(&(b - position as f64).abs())
                .unwrap()
        })
        .map(|(_, v)| *v)
        .unwrap_or(f64::INFINITY)
}

#[cfg(test)]
mod test {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicI32;

    use obs_core::device::{Device, ExposureStatus};
    use obs_core::events::EventBus;
    use obs_core::image::{CcdInfo, Image, MetadataValue, PixelBuffer, Rectangle};
    use obs_core::name::{DeviceName, DeviceType};

    use crate::solver::ParabolicSolver;

    struct StubFocuser {
        name: DeviceName,
        events: EventBus,
        position: AtomicI32,
    }

    #[async_trait]
    impl Device for StubFocuser {
        fn name(&self) -> &DeviceName {
            &self.name
        }
        fn events(&self) -> &EventBus {
            &self.events
        }
    }

    #[async_trait]
    impl Focuser for StubFocuser {
        fn min(&self) -> i32 {
            0
        }
        fn max(&self) -> i32 {
            10000
        }
        async fn current(&self) -> i32 {
            self.position.load(Ordering::SeqCst)
        }
        fn backlash(&self) -> i32 {
            0
        }
        async fn moveto(&self, target: i32) -> Result<(), DeviceError> {
            self.position.store(target, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubCcd {
        name: DeviceName,
        events: EventBus,
        info: CcdInfo,
        focuser: Arc<StubFocuser>,
    }

    impl Device for StubCcd {
        fn name(&self) -> &DeviceName {
            &self.name
        }
        fn events(&self) -> &EventBus {
            &self.events
        }
    }

    #[async_trait]
    impl Ccd for StubCcd {
        fn info(&self) -> &CcdInfo {
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
            let mut image = Image::new(2, 2, PixelBuffer::U16(vec![0, 0, 0, 0]));
            let position = self.focuser.position.load(Ordering::SeqCst) as f64;
            image.metadata.set("FOCUSPOS", MetadataValue::Float(position), None);
            Ok(image)
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

    struct ParabolaAroundFocusPos {
        vertex: f64,
    }
    impl FigureOfMerit for ParabolaAroundFocusPos {
        fn evaluate(&self, image: &Image) -> f64 {
            let position = match image.metadata.get("FOCUSPOS").unwrap().value {
                MetadataValue::Float(f) => f,
                _ => unreachable!(),
            };
            (position - self.vertex).powi(2) + 1.0
        }
    }

    #[tokio::test]
    async fn test_sweep_converges_near_true_focus() {
        let focuser = Arc::new(StubFocuser {
            name: DeviceName::new(DeviceType::Focuser, vec!["stub".into()]),
            events: EventBus::default(),
            position: AtomicI32::new(0),
        });
        let ccd = Arc::new(StubCcd {
            name: DeviceName::new(DeviceType::Ccd, vec!["stub".into()]),
            events: EventBus::default(),
            info: CcdInfo {
                width: 2,
                height: 2,
                pixel_width_um: 5.0,
                pixel_height_um: 5.0,
                binning_modes: vec![],
                has_shutter: false,
                has_cooler: false,
                has_guide_port: false,
                default_frame: Rectangle::full_frame(2, 2),
            },
            focuser: focuser.clone(),
        });
        let fom: Arc<dyn FigureOfMerit> = Arc::new(ParabolaAroundFocusPos { vertex: 5000.0 });
        let solver: Arc<dyn Solver> = Arc::new(ParabolicSolver);
        let events = EventBus::default();
        let cancel = AtomicBool::new(false);

        let exposure = Exposure::new(Rectangle::full_frame(2, 2), std::time::Duration::from_millis(1));
        let result = run_focus_sweep(
            focuser, ccd, exposure, fom, solver, 0, 10000, 9, &events, &cancel,
        )
        .await
        .unwrap();

        assert!((result - 5000).abs() < 200, "result {}", result);
    }

    #[tokio::test]
    async fn test_sweep_rejects_too_few_steps() {
        let focuser = Arc::new(StubFocuser {
            name: DeviceName::new(DeviceType::Focuser, vec!["stub".into()]),
            events: EventBus::default(),
            position: AtomicI32::new(0),
        });
        let ccd = Arc::new(StubCcd {
            name: DeviceName::new(DeviceType::Ccd, vec!["stub".into()]),
            events: EventBus::default(),
            info: CcdInfo {
                width: 2,
                height: 2,
                pixel_width_um: 5.0,
                pixel_height_um: 5.0,
                binning_modes: vec![],
                has_shutter: false,
                has_cooler: false,
                has_guide_port: false,
                default_frame: Rectangle::full_frame(2, 2),
            },
            focuser: focuser.clone(),
        });
        let fom: Arc<dyn FigureOfMerit> = Arc::new(ParabolaAroundFocusPos { vertex: 5000.0 });
        let solver: Arc<dyn Solver> = Arc::new(ParabolicSolver);
        let events = EventBus::default();
        let cancel = AtomicBool::new(false);
        let exposure = Exposure::new(Rectangle::full_frame(2, 2), std::time::Duration::from_millis(1));

        let result = run_focus_sweep(
            focuser, ccd, exposure, fom, solver, 0, 10000, 1, &events, &cancel,
        )
        .await;
        assert!(result.is_err());
    }
}
