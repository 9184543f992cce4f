//! Resolves an [`InstrumentConfig`](crate::settings::InstrumentConfig)'s
//! device-name strings into concrete capability handles through a
//! [`ModuleRepository`], once at startup.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;

use obs_core::device::{AdaptiveOptics, Ccd, Cooler, FilterWheel, Focuser, GuidePort, Mount};
use obs_core::error::{DeviceError, LocatorError};
use obs_core::events::EventBus;
use obs_core::locator::ModuleRepository;
use obs_core::name::DeviceName;
use obs_queue::{DeviceResolver, DeviceSet};

use crate::settings::InstrumentConfig;

fn resolve_name(raw: &str) -> Result<DeviceName, DeviceError> {
    DeviceName::parse(raw)
        .ok_or_else(|| DeviceError::NotFound(format!("malformed device name {:?}", raw)))
}

/// One instrument's concrete device handles plus the bookkeeping a guiding
/// run and a task-executor resolution both need. Calibration and guiding
/// are mutually exclusive per instrument (§5); `busy` enforces that.
pub struct Instrument {
    pub name: String,
    pub ccd: Arc<dyn Ccd>,
    pub cooler: Option<Arc<dyn Cooler>>,
    pub filter_wheel: Option<Arc<dyn FilterWheel>>,
    pub focuser: Option<Arc<dyn Focuser>>,
    pub mount: Option<Arc<dyn Mount>>,
    pub guide_port: Option<Arc<dyn GuidePort>>,
    pub adaptive_optics: Option<Arc<dyn AdaptiveOptics>>,
    /// Emits guiding/calibration/focus progress events, which have no
    /// single owning device (§3's `CallbackDataPtr` bus payload spans
    /// several producers per instrument).
    pub events: EventBus,
    /// Set while a calibration or guiding run owns this instrument's
    /// actuator; cleared when that run ends.
    pub busy: Arc<AtomicBool>,
    /// Raised to stop the current guiding run, if one is active.
    pub guiding_stop: Arc<AtomicBool>,
}

impl Instrument {
    pub async fn resolve(
        name: &str,
        config: &InstrumentConfig,
        repo: &ModuleRepository,
    ) -> Result<Instrument, LocatorError> {
        let ccd_name = resolve_name(&config.ccd)?;
        let ccd = repo.get_device_locator(&ccd_name)?.get_ccd(&ccd_name).await?;

        let cooler = match &config.cooler {
            Some(raw) => {
                let n = resolve_name(raw)?;
                Some(repo.get_device_locator(&n)?.get_cooler(&n).await?)
            }
            None => None,
        };
        let filter_wheel = match &config.filter_wheel {
            Some(raw) => {
                let n = resolve_name(raw)?;
                Some(repo.get_device_locator(&n)?.get_filter_wheel(&n).await?)
            }
            None => None,
        };
        let focuser = match &config.focuser {
            Some(raw) => {
                let n = resolve_name(raw)?;
                Some(repo.get_device_locator(&n)?.get_focuser(&n).await?)
            }
            None => None,
        };
        let mount = match &config.mount {
            Some(raw) => {
                let n = resolve_name(raw)?;
                Some(repo.get_device_locator(&n)?.get_mount(&n).await?)
            }
            None => None,
        };
        let guide_port = match &config.guide_port {
            Some(raw) => {
                let n = resolve_name(raw)?;
                Some(repo.get_device_locator(&n)?.get_guide_port(&n).await?)
            }
            None => None,
        };

        Ok(Instrument {
            name: name.to_string(),
            ccd,
            cooler,
            filter_wheel,
            focuser,
            mount,
            guide_port,
            adaptive_optics: None,
            events: EventBus::default(),
            busy: Arc::new(AtomicBool::new(false)),
            guiding_stop: Arc::new(AtomicBool::new(false)),
        })
    }
}

pub type InstrumentMap = std::collections::HashMap<String, Arc<Instrument>>;

/// Resolves a task's instrument name against the whole instrument table and,
/// within it, assumes every [`obs_queue::entry::DeviceSelector`] index is
/// `0` — an `Instrument` binds exactly one device per role (multi-unit
/// instruments are an Open Question left to a future `DeviceSelector`
/// revision, not modeled here). One resolver, shared by the one scheduler
/// that serves every instrument's task queue.
pub struct InstrumentDeviceResolver {
    pub instruments: InstrumentMap,
}

#[async_trait]
impl DeviceResolver for InstrumentDeviceResolver {
    async fn resolve(
        &self,
        parameters: &obs_queue::TaskParameters,
    ) -> Result<DeviceSet, DeviceError> {
        let instrument = self
            .instruments
            .get(&parameters.instrument)
            .ok_or_else(|| DeviceError::NotFound(format!("instrument {}", parameters.instrument)))?;
        Ok(DeviceSet {
            ccd: instrument.ccd.clone(),
            cooler: instrument.cooler.clone(),
            filter_wheel: instrument.filter_wheel.clone(),
        })
    }
}
