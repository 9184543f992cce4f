//! Device abstraction, driver runtime, and image pipeline for a distributed
//! astrophotography control system.
//!
//! A device capability (a CCD, a cooler, a focuser, …) is a small
//! `#[async_trait]` trait rather than a branch of a monolithic class
//! hierarchy; a driver module registers a [`locator::DeviceLocatorFactory`]
//! with a [`locator::ModuleRepository`] and is loaded lazily on first use.
//! State changes fan out over a per-device [`events::EventBus`] instead of a
//! manually-managed callback list.
//!
//! ## Quickstart
//! ```no_run
//! use std::sync::Arc;
//! use obs_core::locator::ModuleRepository;
//! use obs_core::name::{DeviceName, DeviceType};
//!
//! # async fn run(repo: ModuleRepository) -> Result<(), Box<dyn std::error::Error>> {
//! let name = DeviceName::new(DeviceType::Ccd, vec!["sim".into(), "cam0".into()]);
//! let locator = repo.get_device_locator(&name)?;
//! let ccd = locator.get_ccd(&name).await?;
//! let _ = ccd.info();
//! # Ok(())
//! # }
//! ```

pub mod device;
pub mod error;
pub mod events;
pub mod image;
pub mod locator;
pub mod name;
pub mod pipeline;
pub mod properties;
pub mod sim;

pub use error::{DeviceError, LocatorError};
pub use events::{Event, EventBus};
pub use image::{CcdInfo, Exposure, Image};
pub use locator::{DeviceLocator, DeviceLocatorFactory, Module, ModuleRepository};
pub use name::{DeviceName, DeviceType};
