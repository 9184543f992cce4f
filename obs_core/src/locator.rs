//! Device Name & Locator (§4.A).
//!
//! A dynamically-loaded module exposing two C-linkage entry points would
//! be one way to register a driver; that legacy-binding concession is
//! avoided here. Instead a [`ModuleRepository`] holds a statically-
//! registered table of [`DeviceLocatorFactory`] implementations keyed by
//! module name, populated at process startup by each compiled-in driver.
//! Lookup is lazy and memoized, without an `unsafe` FFI boundary;
//! swapping in a `libloading`-based dynamic registration later would not
//! change any call site.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::device::{AdaptiveOptics, Ccd, Cooler, FilterWheel, Focuser, GuidePort, Mount};
use crate::error::LocatorError;
use crate::name::{DeviceName, DeviceType};

#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    pub name: String,
    pub version: String,
    pub has_device_locator: bool,
}

/// Discovery interface a driver module exposes (§4.A).
#[async_trait]
pub trait DeviceLocator: Send + Sync {
    fn get_device_list(&self, device_type: DeviceType) -> Vec<DeviceName>;

    async fn get_ccd(&self, name: &DeviceName) -> Result<Arc<dyn Ccd>, LocatorError> {
        let _ = name;
        Err(LocatorError::Device(crate::error::DeviceError::NotFound(
            "ccd".into(),
        )))
    }
    async fn get_cooler(&self, name: &DeviceName) -> Result<Arc<dyn Cooler>, LocatorError> {
        let _ = name;
        Err(LocatorError::Device(crate::error::DeviceError::NotFound(
            "cooler".into(),
        )))
    }
    async fn get_filter_wheel(
        &self,
        name: &DeviceName,
    ) -> Result<Arc<dyn FilterWheel>, LocatorError> {
        let _ = name;
        Err(LocatorError::Device(crate::error::DeviceError::NotFound(
            "filter wheel".into(),
        )))
    }
    async fn get_focuser(&self, name: &DeviceName) -> Result<Arc<dyn Focuser>, LocatorError> {
        let _ = name;
        Err(LocatorError::Device(crate::error::DeviceError::NotFound(
            "focuser".into(),
        )))
    }
    async fn get_guide_port(&self, name: &DeviceName) -> Result<Arc<dyn GuidePort>, LocatorError> {
        let _ = name;
        Err(LocatorError::Device(crate::error::DeviceError::NotFound(
            "guide port".into(),
        )))
    }
    async fn get_adaptive_optics(
        &self,
        name: &DeviceName,
    ) -> Result<Arc<dyn AdaptiveOptics>, LocatorError> {
        let _ = name;
        Err(LocatorError::Device(crate::error::DeviceError::NotFound(
            "adaptive optics".into(),
        )))
    }
    async fn get_mount(&self, name: &DeviceName) -> Result<Arc<dyn Mount>, LocatorError> {
        let _ = name;
        Err(LocatorError::Device(crate::error::DeviceError::NotFound(
            "mount".into(),
        )))
    }
}

/// A driver module: a descriptor plus (optionally) a locator.
pub struct Module {
    descriptor: ModuleDescriptor,
    locator: Option<Arc<dyn DeviceLocator>>,
}

impl Module {
    pub fn descriptor(&self) -> &ModuleDescriptor {
        &self.descriptor
    }

    pub fn get_device_locator(&self) -> Result<Arc<dyn DeviceLocator>, LocatorError> {
        self.locator
            .clone()
            .ok_or_else(|| LocatorError::ModuleNotFound(self.descriptor.name.clone()))
    }
}

/// A factory a compiled-in driver registers with the repository. Modules
/// are only instantiated the first time they're requested (lazy) and the
/// resulting [`Module`] is cached (memoized) for subsequent lookups.
pub trait DeviceLocatorFactory: Send + Sync {
    fn descriptor(&self) -> ModuleDescriptor;
    fn create_locator(&self) -> Arc<dyn DeviceLocator>;
}

/// Scans a statically-registered module table; modules are loaded lazily
/// and memoized (§4.A). Lookups are serialized by a cache mutex; device
/// *use* (once resolved) is not (§5).
#[derive(Default)]
pub struct ModuleRepository {
    factories: HashMap<String, Arc<dyn DeviceLocatorFactory>>,
    cache: Mutex<HashMap<String, Arc<Module>>>,
}

impl ModuleRepository {
    pub fn new() -> Self {
        ModuleRepository::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: Arc<dyn DeviceLocatorFactory>) {
        self.factories.insert(name.into(), factory);
    }

    pub fn get_module(&self, name: &str) -> Result<Arc<Module>, LocatorError> {
        if let Some(cached) = self.cache.lock().unwrap().get(name) {
            return Ok(cached.clone());
        }
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| LocatorError::ModuleNotFound(name.to_string()))?;
        let module = Arc::new(Module {
            descriptor: factory.descriptor(),
            locator: Some(factory.create_locator()),
        });
        self.cache
            .lock()
            .unwrap()
            .insert(name.to_string(), module.clone());
        Ok(module)
    }

    /// Resolves a [`DeviceName`] straight through to its module's locator,
    /// the common case callers want.
    pub fn get_device_locator(&self, name: &DeviceName) -> Result<Arc<dyn DeviceLocator>, LocatorError> {
        let module_name = name
            .module_name()
            .ok_or_else(|| LocatorError::Device(crate::error::DeviceError::NotFound(
                "device name has no module component".into(),
            )))?;
        self.get_module(module_name)?.get_device_locator()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    struct EmptyLocator;
    #[async_trait]
    impl DeviceLocator for EmptyLocator {
        fn get_device_list(&self, _device_type: DeviceType) -> Vec<DeviceName> {
            vec![]
        }
    }

    struct StubFactory;
    impl DeviceLocatorFactory for StubFactory {
        fn descriptor(&self) -> ModuleDescriptor {
            ModuleDescriptor {
                name: "stub".to_string(),
                version: "0.0.0".to_string(),
                has_device_locator: true,
            }
        }
        fn create_locator(&self) -> Arc<dyn DeviceLocator> {
            Arc::new(EmptyLocator)
        }
    }

    #[test]
    fn test_missing_module_errors() {
        let repo = ModuleRepository::new();
        assert!(matches!(
            repo.get_module("nonexistent"),
            Err(LocatorError::ModuleNotFound(_))
        ));
    }

    #[test]
    fn test_lazy_memoized_lookup() {
        let mut repo = ModuleRepository::new();
        repo.register("stub", Arc::new(StubFactory));
        let a = repo.get_module("stub").unwrap();
        let b = repo.get_module("stub").unwrap();
        assert!(Arc::ptr_eq(&a, &b), "second lookup should hit the memoized cache");
    }
}
