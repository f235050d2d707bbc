// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

/// Device type name used for a port with nothing plugged into it.
pub const DEVTYPE_NONE: &str = "None";

/// Configuration for the USB subsystem.
#[derive(Clone, Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct Config {
    /// Serial of the title currently running, if known.  Peripherals which
    /// carry per-title calibration tables key off of this.
    #[serde(
        default,
        rename = "game-serial",
        skip_serializing_if = "Option::is_none"
    )]
    pub game_serial: Option<String>,

    /// Per-port sections, keyed by [Config::port_section].
    #[serde(default, rename = "port")]
    pub ports: BTreeMap<String, Port>,
}

/// One physical port's configuration section.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct Port {
    #[serde(rename = "Type", default = "default_device_type")]
    pub device_type: String,

    #[serde(flatten, default)]
    pub options: BTreeMap<String, toml::Value>,
}
impl Default for Port {
    fn default() -> Self {
        Self { device_type: default_device_type(), options: BTreeMap::new() }
    }
}

fn default_device_type() -> String {
    DEVTYPE_NONE.to_string()
}

impl Port {
    pub fn get_string<S: AsRef<str>>(&self, key: S) -> Option<&str> {
        self.options.get(key.as_ref())?.as_str()
    }

    pub fn get<T: FromStr, S: AsRef<str>>(&self, key: S) -> Option<T> {
        self.get_string(key)?.parse().ok()
    }

    pub fn get_bool<S: AsRef<str>>(&self, key: S) -> Option<bool> {
        match self.options.get(key.as_ref())? {
            toml::Value::Boolean(b) => Some(*b),
            toml::Value::Integer(i) => Some(*i != 0),
            toml::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_int<S: AsRef<str>>(&self, key: S) -> Option<i64> {
        match self.options.get(key.as_ref())? {
            toml::Value::Integer(i) => Some(*i),
            toml::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn get_float<S: AsRef<str>>(&self, key: S) -> Option<f64> {
        match self.options.get(key.as_ref())? {
            toml::Value::Float(f) => Some(*f),
            toml::Value::Integer(i) => Some(*i as f64),
            toml::Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }
}

/// The part of a port's configuration which determines what device lives in
/// it.  Two equal selections mean the device can be updated in place; any
/// difference requires the device to be recreated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortSelection {
    pub device_type: String,
    pub subtype: u32,
}

/// Key under which a device's setting (or binding) lives in its port section.
pub fn device_key(devname: &str, key: &str) -> String {
    format!("{devname}_{key}")
}

/// Key under which a device binding lives in its port section.
pub fn bind_key(devname: &str, bind_name: &str) -> String {
    device_key(devname, bind_name)
}

impl Config {
    /// Name of the section holding the configuration of (0-based) `port`.
    pub fn port_section(port: usize) -> String {
        format!("USB{}", port + 1)
    }

    pub fn port(&self, port: usize) -> Option<&Port> {
        self.ports.get(&Self::port_section(port))
    }

    pub fn port_mut(&mut self, port: usize) -> &mut Port {
        self.ports.entry(Self::port_section(port)).or_default()
    }

    /// Configured device type for `port`, [DEVTYPE_NONE] if unset.
    pub fn device_type(&self, port: usize) -> &str {
        self.port(port).map(|p| p.device_type.as_str()).unwrap_or(DEVTYPE_NONE)
    }

    pub fn set_device_type(&mut self, port: usize, devtype: &str) {
        self.port_mut(port).device_type = devtype.to_string();
    }

    pub fn subtype(&self, port: usize, devname: &str) -> u32 {
        self.port(port)
            .and_then(|p| p.get_int(device_key(devname, "subtype")))
            .and_then(|v| u32::try_from(v).ok())
            .unwrap_or(0)
    }

    pub fn set_subtype(&mut self, port: usize, devname: &str, subtype: u32) {
        self.port_mut(port).options.insert(
            device_key(devname, "subtype"),
            toml::Value::Integer(subtype.into()),
        );
    }

    pub fn selection(&self, port: usize) -> PortSelection {
        let device_type = self.device_type(port).to_string();
        let subtype = self.subtype(port, &device_type);
        PortSelection { device_type, subtype }
    }

    pub fn get_bool(
        &self,
        port: usize,
        devname: &str,
        key: &str,
        default: bool,
    ) -> bool {
        self.port(port)
            .and_then(|p| p.get_bool(device_key(devname, key)))
            .unwrap_or(default)
    }

    pub fn get_int(
        &self,
        port: usize,
        devname: &str,
        key: &str,
        default: i32,
    ) -> i32 {
        self.port(port)
            .and_then(|p| p.get_int(device_key(devname, key)))
            .and_then(|v| i32::try_from(v).ok())
            .unwrap_or(default)
    }

    pub fn get_float(
        &self,
        port: usize,
        devname: &str,
        key: &str,
        default: f32,
    ) -> f32 {
        self.port(port)
            .and_then(|p| p.get_float(device_key(devname, key)))
            .map(|v| v as f32)
            .unwrap_or(default)
    }

    pub fn get_string(
        &self,
        port: usize,
        devname: &str,
        key: &str,
        default: &str,
    ) -> String {
        self.port(port)
            .and_then(|p| p.get_string(device_key(devname, key)))
            .unwrap_or(default)
            .to_string()
    }

    pub fn set_value(
        &mut self,
        port: usize,
        key: String,
        value: impl Into<toml::Value>,
    ) {
        self.port_mut(port).options.insert(key, value.into());
    }

    /// Removes `key` from the port's section, returning whether it was set.
    pub fn delete_value(&mut self, port: usize, key: &str) -> bool {
        match self.ports.get_mut(&Self::port_section(port)) {
            Some(p) => p.options.remove(key).is_some(),
            None => false,
        }
    }
}

/// Errors which may be returned when parsing the USB configuration.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Cannot parse toml: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parses a TOML file into a configuration object.
pub fn parse<P: AsRef<Path>>(path: P) -> Result<Config, ParseError> {
    let contents = std::fs::read_to_string(path.as_ref())?;
    let cfg = toml::from_str::<Config>(&contents)?;
    Ok(cfg)
}

impl FromStr for Config {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str::<Config>(s)?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn config_can_be_serialized_as_toml() {
        let mut cfg = Config::default();
        cfg.set_device_type(0, "guncon2");
        cfg.set_subtype(0, "guncon2", 0);
        cfg.set_value(0, device_key("guncon2", "scale_x"), 90.25);
        let serialized = toml::ser::to_string(&cfg).unwrap();
        let deserialized: Config = toml::de::from_str(&serialized).unwrap();
        assert_eq!(cfg, deserialized);
    }

    #[test]
    fn parse_basic_config() {
        let raw = r#"
game-serial = "SLUS-20219"

[port.USB1]
Type = "guncon2"
guncon2_subtype = 0
guncon2_custom_config = true
guncon2_scale_x = 90.25
guncon2_screen_width = 640
guncon2_Trigger = "Pointer-0/LeftButton"

[port.USB2]
"#;
        let cfg: Config = raw.parse().unwrap();

        assert_eq!(cfg.game_serial.as_deref(), Some("SLUS-20219"));
        assert_eq!(cfg.device_type(0), "guncon2");
        assert_eq!(cfg.device_type(1), DEVTYPE_NONE);
        assert_eq!(cfg.subtype(0, "guncon2"), 0);
        assert!(cfg.get_bool(0, "guncon2", "custom_config", false));
        assert_eq!(cfg.get_float(0, "guncon2", "scale_x", 100.0), 90.25);
        assert_eq!(cfg.get_float(0, "guncon2", "scale_y", 100.0), 100.0);
        assert_eq!(cfg.get_int(0, "guncon2", "screen_width", 1), 640);
        assert_eq!(
            cfg.get_string(0, "guncon2", "Trigger", ""),
            "Pointer-0/LeftButton"
        );
    }

    #[test]
    fn missing_port_uses_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.device_type(3), DEVTYPE_NONE);
        assert_eq!(
            cfg.selection(1),
            PortSelection { device_type: DEVTYPE_NONE.to_string(), subtype: 0 }
        );
        assert_eq!(cfg.get_int(1, "guncon2", "screen_height", 480), 480);
    }

    #[test]
    fn delete_value() {
        let mut cfg = Config::default();
        cfg.set_value(1, bind_key("guncon2", "A"), "Keyboard/A");
        assert!(cfg.delete_value(1, "guncon2_A"));
        assert!(!cfg.delete_value(1, "guncon2_A"));
        assert!(!cfg.delete_value(0, "guncon2_A"));
    }

    #[test]
    fn parse_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[port.USB2]\nType = \"guncon2\"").unwrap();
        let cfg = parse(file.path()).unwrap();
        assert_eq!(cfg.device_type(1), "guncon2");
    }
}
