//! Typed, path-like device identifiers.
//!
//! A [`DeviceName`] pairs a [`DeviceType`] tag with an ordered sequence of
//! path components. The first component is always the driver module name;
//! the second identifies the physical unit; any further components
//! sub-address within that unit (e.g. a camera's imaging vs. guiding chip).

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DeviceType {
    AdaptiveOptics,
    Camera,
    Ccd,
    Cooler,
    FilterWheel,
    Focuser,
    GuidePort,
    Mount,
}

impl DeviceType {
    fn tag(&self) -> &'static str {
        match self {
            DeviceType::AdaptiveOptics => "adaptiveoptics",
            DeviceType::Camera => "camera",
            DeviceType::Ccd => "ccd",
            DeviceType::Cooler => "cooler",
            DeviceType::FilterWheel => "filterwheel",
            DeviceType::Focuser => "focuser",
            DeviceType::GuidePort => "guideport",
            DeviceType::Mount => "mount",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct DeviceName {
    device_type: DeviceType,
    components: Vec<String>,
}

impl DeviceName {
    pub fn new(device_type: DeviceType, components: Vec<String>) -> Self {
        DeviceName {
            device_type,
            components,
        }
    }

    pub fn device_type(&self) -> DeviceType {
        self.device_type
    }

    pub fn module_name(&self) -> Option<&str> {
        self.components.first().map(String::as_str)
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    /// Returns a prefix-truncated copy of this name retagged as `t`,
    /// keeping only the module + unit components (the first two).
    pub fn parent(&self, t: DeviceType) -> DeviceName {
        let keep = self.components.len().min(2);
        DeviceName {
            device_type: t,
            components: self.components[..keep].to_vec(),
        }
    }

    /// Renders the canonical `type:comp1/comp2/...` textual form used in
    /// logs and over the wire.
    pub fn unparse(&self) -> String {
        format!("{}:{}", self.device_type.tag(), self.components.join("/"))
    }

    pub fn parse(s: &str) -> Option<DeviceName> {
        let (tag, rest) = s.split_once(':')?;
        let device_type = match tag {
            "adaptiveoptics" => DeviceType::AdaptiveOptics,
            "camera" => DeviceType::Camera,
            "ccd" => DeviceType::Ccd,
            "cooler" => DeviceType::Cooler,
            "filterwheel" => DeviceType::FilterWheel,
            "focuser" => DeviceType::Focuser,
            "guideport" => DeviceType::GuidePort,
            "mount" => DeviceType::Mount,
            _ => return None,
        };
        let components = rest.split('/').map(String::from).collect();
        Some(DeviceName {
            device_type,
            components,
        })
    }
}

impl fmt::Display for DeviceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.unparse())
    }
}

/// USB bus/address/identity tuple, encoded per the `BBB-AAA-iproduct-VVVV-PPPP[-serial]`
/// grammar in §6. Stable across re-enumeration as long as bus position and
/// descriptor strings don't change; this is the "second component" of a
/// USB-backed [`DeviceName`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbIdentity {
    pub bus: u16,
    pub address: u16,
    pub product: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial: Option<String>,
}

impl UsbIdentity {
    pub fn unparse(&self) -> String {
        let base = format!(
            "{:03}-{:03}-{}-{:04x}-{:04x}",
            self.bus, self.address, self.product, self.vendor_id, self.product_id
        );
        match &self.serial {
            Some(serial) => format!("{}-{}", base, serial),
            None => base,
        }
    }

    /// Inverse of [`UsbIdentity::unparse`]. Returns `None` for malformed input.
    pub fn parse(s: &str) -> Option<UsbIdentity> {
        let mut parts = s.splitn(6, '-');
        let bus = parts.next()?.parse().ok()?;
        let address = parts.next()?.parse().ok()?;
        let product = parts.next()?.to_string();
        let vendor_id = u16::from_str_radix(parts.next()?, 16).ok()?;
        let product_id = u16::from_str_radix(parts.next()?, 16).ok()?;
        let serial = parts.next().map(str::to_string);
        Some(UsbIdentity {
            bus,
            address,
            product,
            vendor_id,
            product_id,
            serial,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_usb_name_grammar() {
        let id = UsbIdentity {
            bus: 3,
            address: 17,
            product: "Camera".to_string(),
            vendor_id: 0x1618,
            product_id: 0x8301,
            serial: Some("A42".to_string()),
        };
        assert_eq!(id.unparse(), "003-017-Camera-1618-8301-A42");
    }

    #[test]
    fn test_usb_name_roundtrip() {
        let id = UsbIdentity {
            bus: 1,
            address: 2,
            product: "Focuser".to_string(),
            vendor_id: 0x04d8,
            product_id: 0x000a,
            serial: None,
        };
        let unparsed = id.unparse();
        assert_eq!(UsbIdentity::parse(&unparsed), Some(id));
    }

    #[test]
    fn test_device_name_roundtrip() {
        let n = DeviceName::new(
            DeviceType::Ccd,
            vec!["sx".to_string(), "003-017-Camera-1618-8301-A42".to_string(), "Imaging".to_string()],
        );
        assert_eq!(DeviceName::parse(&n.unparse()).as_ref(), Some(&n));
    }

    #[test]
    fn test_parent_truncates() {
        let n = DeviceName::new(
            DeviceType::Ccd,
            vec!["sx".to_string(), "unit0".to_string(), "Imaging".to_string()],
        );
        let p = n.parent(DeviceType::Camera);
        assert_eq!(p.device_type(), DeviceType::Camera);
        assert_eq!(p.components(), &["sx".to_string(), "unit0".to_string()]);
    }
}
