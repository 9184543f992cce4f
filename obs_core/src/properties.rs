//! Layered device property files (§6).
//!
//! Precedence, earliest to latest: a compiled-in default map, an optional
//! system file, an optional `./device.properties`, an optional path named
//! by the `DEVICEPROPERTIES` environment variable. Keys are dotted
//! `<devicename>.<property>`; lines are `key=value`, whitespace-tolerant,
//! `#`-commented.

use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    pub fn new() -> Self {
        Properties::default()
    }

    pub fn get(&self, device_name: &str, property: &str) -> Option<&str> {
        self.values
            .get(&format!("{}.{}", device_name, property))
            .map(String::as_str)
    }

    /// Merges `other` over `self`, `other`'s values winning on conflict —
    /// the idiom used to apply each layer in precedence order.
    pub fn merge_over(&mut self, other: Properties) {
        for (k, v) in other.values {
            self.values.insert(k, v);
        }
    }

    pub fn parse_str(text: &str) -> Properties {
        let mut values = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                values.insert(key.trim().to_string(), value.trim().to_string());
            }
        }
        Properties { values }
    }

    pub fn load_file(path: &Path) -> std::io::Result<Properties> {
        let text = std::fs::read_to_string(path)?;
        Ok(Properties::parse_str(&text))
    }

    /// Builds the full layered stack per §6's precedence order. Any layer
    /// whose path does not exist (or whose env var isn't set) is silently
    /// skipped — this is a best-effort bootstrap, not a hard dependency.
    pub fn load_layered(defaults: Properties, system_path: Option<&Path>) -> Properties {
        let mut result = defaults;
        if let Some(path) = system_path {
            if let Ok(p) = Properties::load_file(path) {
                result.merge_over(p);
            }
        }
        if let Ok(p) = Properties::load_file(Path::new("./device.properties")) {
            result.merge_over(p);
        }
        if let Ok(env_path) = std::env::var("DEVICEPROPERTIES") {
            if let Ok(p) = Properties::load_file(Path::new(&env_path)) {
                result.merge_over(p);
            }
        }
        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_whitespace_and_comments() {
        let text = "# a comment\n  sx.gain = 10  \n\nfilterwheel.timeout=20\n";
        let props = Properties::parse_str(text);
        assert_eq!(props.get("sx", "gain"), Some("10"));
        assert_eq!(props.get("filterwheel", "timeout"), Some("20"));
    }

    #[test]
    fn test_merge_precedence() {
        let mut base = Properties::parse_str("sx.gain=10\n");
        let override_layer = Properties::parse_str("sx.gain=20\nsx.offset=5\n");
        base.merge_over(override_layer);
        assert_eq!(base.get("sx", "gain"), Some("20"));
        assert_eq!(base.get("sx", "offset"), Some("5"));
    }
}
