//! The `sim` driver module: a [`DeviceLocator`] vending one of each
//! capability, backed by the in-process simulator backends in this module.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::device::{AdaptiveOptics, Ccd, Cooler, FilterWheel, Focuser, GuidePort, Mount};
use crate::error::LocatorError;
use crate::image::{Binning, CcdInfo, Rectangle};
use crate::locator::{DeviceLocator, DeviceLocatorFactory, ModuleDescriptor};
use crate::name::{DeviceName, DeviceType};

use super::{SimAdaptiveOptics, SimCcd, SimCooler, SimFilterWheel, SimFocuser, SimGuidePort, SimMount};

fn sim_name(device_type: DeviceType, unit: &str) -> DeviceName {
    DeviceName::new(device_type, vec!["sim".to_string(), unit.to_string()])
}

pub struct SimLocator {
    ccds: HashMap<DeviceName, Arc<dyn Ccd>>,
    coolers: HashMap<DeviceName, Arc<dyn Cooler>>,
    filter_wheels: HashMap<DeviceName, Arc<dyn FilterWheel>>,
    focusers: HashMap<DeviceName, Arc<dyn Focuser>>,
    guide_ports: HashMap<DeviceName, Arc<dyn GuidePort>>,
    adaptive_optics: HashMap<DeviceName, Arc<dyn AdaptiveOptics>>,
    mounts: HashMap<DeviceName, Arc<dyn Mount>>,
}

impl Default for SimLocator {
    fn default() -> Self {
        let ccd_name = sim_name(DeviceType::Ccd, "cam0");
        let ccd_info = CcdInfo {
            width: 1280,
            height: 1024,
            pixel_width_um: 3.8,
            pixel_height_um: 3.8,
            binning_modes: vec![Binning { x: 1, y: 1 }, Binning { x: 2, y: 2 }],
            has_shutter: true,
            has_cooler: true,
            has_guide_port: true,
            default_frame: Rectangle::full_frame(1280, 1024),
        };

        let mut ccds: HashMap<DeviceName, Arc<dyn Ccd>> = HashMap::new();
        ccds.insert(ccd_name.clone(), Arc::new(SimCcd::new(ccd_name, ccd_info)));

        let cooler_name = sim_name(DeviceType::Cooler, "cooler0");
        let mut coolers: HashMap<DeviceName, Arc<dyn Cooler>> = HashMap::new();
        coolers.insert(cooler_name.clone(), Arc::new(SimCooler::new(cooler_name, 20.0)));

        let wheel_name = sim_name(DeviceType::FilterWheel, "wheel0");
        let mut filter_wheels: HashMap<DeviceName, Arc<dyn FilterWheel>> = HashMap::new();
        filter_wheels.insert(
            wheel_name.clone(),
            Arc::new(SimFilterWheel::new(
                wheel_name,
                vec!["Ha".into(), "OIII".into(), "SII".into(), "L".into(), "R".into(), "G".into(), "B".into()],
            )),
        );

        let focuser_name = sim_name(DeviceType::Focuser, "focuser0");
        let mut focusers: HashMap<DeviceName, Arc<dyn Focuser>> = HashMap::new();
        focusers.insert(
            focuser_name.clone(),
            Arc::new(SimFocuser::new(focuser_name, 0, 60_000, 250, 30_000)),
        );

        let guide_port_name = sim_name(DeviceType::GuidePort, "guideport0");
        let mut guide_ports: HashMap<DeviceName, Arc<dyn GuidePort>> = HashMap::new();
        guide_ports.insert(guide_port_name.clone(), Arc::new(SimGuidePort::new(guide_port_name)));

        let ao_name = sim_name(DeviceType::AdaptiveOptics, "ao0");
        let mut adaptive_optics: HashMap<DeviceName, Arc<dyn AdaptiveOptics>> = HashMap::new();
        adaptive_optics.insert(ao_name.clone(), Arc::new(SimAdaptiveOptics::new(ao_name)));

        let mount_name = sim_name(DeviceType::Mount, "mount0");
        let mut mounts: HashMap<DeviceName, Arc<dyn Mount>> = HashMap::new();
        mounts.insert(mount_name.clone(), Arc::new(SimMount::new(mount_name)));

        SimLocator {
            ccds,
            coolers,
            filter_wheels,
            focusers,
            guide_ports,
            adaptive_optics,
            mounts,
        }
    }
}

#[async_trait]
impl DeviceLocator for SimLocator {
    fn get_device_list(&self, device_type: DeviceType) -> Vec<DeviceName> {
        match device_type {
            DeviceType::Ccd => self.ccds.keys().cloned().collect(),
            DeviceType::Cooler => self.coolers.keys().cloned().collect(),
            DeviceType::FilterWheel => self.filter_wheels.keys().cloned().collect(),
            DeviceType::Focuser => self.focusers.keys().cloned().collect(),
            DeviceType::GuidePort => self.guide_ports.keys().cloned().collect(),
            DeviceType::AdaptiveOptics => self.adaptive_optics.keys().cloned().collect(),
            DeviceType::Mount => self.mounts.keys().cloned().collect(),
            DeviceType::Camera => Vec::new(),
        }
    }

    async fn get_ccd(&self, name: &DeviceName) -> Result<Arc<dyn Ccd>, LocatorError> {
        self.ccds
            .get(name)
            .cloned()
            .ok_or_else(|| LocatorError::Device(crate::error::DeviceError::NotFound(name.to_string())))
    }

    async fn get_cooler(&self, name: &DeviceName) -> Result<Arc<dyn Cooler>, LocatorError> {
        self.coolers
            .get(name)
            .cloned()
            .ok_or_else(|| LocatorError::Device(crate::error::DeviceError::NotFound(name.to_string())))
    }

    async fn get_filter_wheel(&self, name: &DeviceName) -> Result<Arc<dyn FilterWheel>, LocatorError> {
        self.filter_wheels
            .get(name)
            .cloned()
            .ok_or_else(|| LocatorError::Device(crate::error::DeviceError::NotFound(name.to_string())))
    }

    async fn get_focuser(&self, name: &DeviceName) -> Result<Arc<dyn Focuser>, LocatorError> {
        self.focusers
            .get(name)
            .cloned()
            .ok_or_else(|| LocatorError::Device(crate::error::DeviceError::NotFound(name.to_string())))
    }

    async fn get_guide_port(&self, name: &DeviceName) -> Result<Arc<dyn GuidePort>, LocatorError> {
        self.guide_ports
            .get(name)
            .cloned()
            .ok_or_else(|| LocatorError::Device(crate::error::DeviceError::NotFound(name.to_string())))
    }

    async fn get_adaptive_optics(&self, name: &DeviceName) -> Result<Arc<dyn AdaptiveOptics>, LocatorError> {
        self.adaptive_optics
            .get(name)
            .cloned()
            .ok_or_else(|| LocatorError::Device(crate::error::DeviceError::NotFound(name.to_string())))
    }

    async fn get_mount(&self, name: &DeviceName) -> Result<Arc<dyn Mount>, LocatorError> {
        self.mounts
            .get(name)
            .cloned()
            .ok_or_else(|| LocatorError::Device(crate::error::DeviceError::NotFound(name.to_string())))
    }
}

pub struct SimLocatorFactory;

impl DeviceLocatorFactory for SimLocatorFactory {
    fn descriptor(&self) -> ModuleDescriptor {
        ModuleDescriptor {
            name: "sim".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            has_device_locator: true,
        }
    }

    fn create_locator(&self) -> Arc<dyn DeviceLocator> {
        Arc::new(SimLocator::default())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::locator::ModuleRepository;

    #[tokio::test]
    async fn test_sim_module_registers_and_resolves() {
        let mut repo = ModuleRepository::new();
        repo.register("sim", Arc::new(SimLocatorFactory));

        let ccd_name = sim_name(DeviceType::Ccd, "cam0");
        let locator = repo.get_device_locator(&ccd_name).unwrap();
        let ccd = locator.get_ccd(&ccd_name).await.unwrap();
        assert_eq!(ccd.info().width, 1280);
    }

    #[test]
    fn test_device_list_returns_registered_units() {
        let locator = SimLocator::default();
        let names = locator.get_device_list(DeviceType::Ccd);
        assert_eq!(names.len(), 1);
    }
}
