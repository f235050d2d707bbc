// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Registry of the peripheral types which can be plugged into a port.
//!
//! Each type is described by a stateless [DeviceProxy], which knows the
//! type's names, its input bindings and settings, and how to build a
//! [Device] from configuration.

use slog::Logger;
use thiserror::Error;
use usb_config_toml::{bind_key, Config, DEVTYPE_NONE};

use super::devices;
use super::usbdev::Device;
use crate::migrate::{StateReader, StateWriter};

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} has no subtype {1}")]
    UnsupportedSubtype(&'static str, u32),

    #[error("failed to create {0}: {1}")]
    Failed(&'static str, String),
}

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InputBindingType {
    Button,
    Axis,
    HalfAxis,
    Motor,
    Pointer,
}

/// Host-independent controller inputs a peripheral binding may default to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum GenericInputBinding {
    Unknown,
    DPadUp,
    DPadRight,
    DPadDown,
    DPadLeft,
    LeftStickUp,
    LeftStickRight,
    LeftStickDown,
    LeftStickLeft,
    L3,
    RightStickUp,
    RightStickRight,
    RightStickDown,
    RightStickLeft,
    R3,
    Triangle,
    Circle,
    Cross,
    Square,
    Select,
    Start,
    System,
    L1,
    L2,
    R1,
    R2,
    LargeMotor,
    SmallMotor,
}

#[derive(Copy, Clone, Debug)]
pub struct InputBindingInfo {
    /// Key suffix of the binding in the port's configuration section.
    pub name: &'static str,
    pub display_name: &'static str,
    pub bind_type: InputBindingType,
    /// Index passed to [DeviceProxy::binding_value] and friends.
    pub bind_index: u32,
    pub generic_mapping: GenericInputBinding,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SettingType {
    Boolean,
    Integer,
    Float,
    String,
}

/// Schema of one per-port setting of a peripheral type.
#[derive(Copy, Clone, Debug)]
pub struct SettingInfo {
    pub setting_type: SettingType,
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub default_value: &'static str,
    pub min_value: Option<&'static str>,
    pub max_value: Option<&'static str>,
    pub step_value: Option<&'static str>,
    /// printf-style format for display, e.g. "%.2f%%".
    pub format: Option<&'static str>,
    pub multiplier: f32,
}

/// Describes, and builds, one type of peripheral.
pub trait DeviceProxy: Send + Sync + 'static {
    /// Human-readable name.
    fn name(&self) -> &'static str;

    /// Name under which the type is configured and registered.
    fn type_name(&self) -> &'static str;

    fn subtypes(&self) -> &'static [&'static str] {
        &[]
    }

    fn bindings(&self, _subtype: u32) -> &'static [InputBindingInfo] {
        &[]
    }

    fn settings(&self, _subtype: u32) -> &'static [SettingInfo] {
        &[]
    }

    /// Builds a device for `port` from its configuration.
    fn create(
        &self,
        config: &Config,
        port: usize,
        subtype: u32,
        log: &Logger,
    ) -> Result<Device>;

    fn update_settings(&self, dev: &mut Device, config: &Config, port: usize) {
        dev.model_mut().update_settings(config, port);
    }

    /// Writes the peripheral block of `dev`.
    fn freeze_save(
        &self,
        dev: &Device,
        w: &mut StateWriter,
    ) -> crate::migrate::Result<()> {
        dev.model().export(w)
    }

    /// Reads a peripheral block written by [DeviceProxy::freeze_save].
    fn freeze_load(
        &self,
        dev: &mut Device,
        r: &mut StateReader,
    ) -> crate::migrate::Result<()> {
        dev.model_mut().import(r)
    }

    fn binding_value(&self, dev: &Device, bind_index: u32) -> f32 {
        dev.model().binding_value(bind_index)
    }

    fn set_binding_value(&self, dev: &mut Device, bind_index: u32, value: f32) {
        dev.model_mut().set_binding_value(bind_index, value);
    }

    fn input_device_connected(&self, dev: &mut Device, identifier: &str) {
        dev.model_mut().input_device_connected(identifier);
    }

    fn input_device_disconnected(&self, dev: &mut Device, identifier: &str) {
        dev.model_mut().input_device_disconnected(identifier);
    }
}

/// Set of peripheral types, in registration order.
#[derive(Default)]
pub struct Registry {
    proxies: Vec<&'static dyn DeviceProxy>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `proxy` to the registry.
    ///
    /// # Panics
    ///
    /// If a proxy with the same type name is already registered.
    pub fn register(&mut self, proxy: &'static dyn DeviceProxy) {
        let name = proxy.type_name();
        assert!(
            self.index_of(name).is_none(),
            "duplicate USB device type {name}"
        );
        self.proxies.push(proxy);
    }

    pub fn lookup(&self, type_name: &str) -> Option<&'static dyn DeviceProxy> {
        self.index_of(type_name).map(|i| self.proxies[i])
    }

    pub fn lookup_index(&self, index: usize) -> Option<&'static dyn DeviceProxy> {
        self.proxies.get(index).copied()
    }

    pub fn index_of(&self, type_name: &str) -> Option<usize> {
        if type_name.is_empty() || type_name.eq_ignore_ascii_case(DEVTYPE_NONE) {
            return None;
        }
        self.proxies.iter().position(|p| p.type_name() == type_name)
    }

    /// `(type_name, name)` of every registered type.
    pub fn enumerate(
        &self,
    ) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.proxies.iter().map(|p| (p.type_name(), p.name()))
    }

    /// Binds every input of the device configured on `port` whose generic
    /// mapping appears in `mapping` to the host input given there, and
    /// removes the bindings of the rest.
    ///
    /// Returns whether any binding was set.
    pub fn map_device(
        &self,
        config: &mut Config,
        port: usize,
        mapping: &[(GenericInputBinding, String)],
    ) -> bool {
        let devtype = config.device_type(port).to_string();
        let Some(proxy) = self.lookup(&devtype) else {
            return false;
        };
        let subtype = config.subtype(port, &devtype);
        let mut mapped = 0;
        for bi in proxy.bindings(subtype) {
            let key = bind_key(&devtype, bi.name);
            let host = (bi.generic_mapping != GenericInputBinding::Unknown)
                .then(|| mapping.iter().find(|(g, _)| *g == bi.generic_mapping))
                .flatten();
            match host {
                Some((_, host)) => {
                    config.set_value(port, key, host.as_str());
                    mapped += 1;
                }
                None => {
                    config.delete_value(port, &key);
                }
            }
        }
        mapped > 0
    }

    /// Removes every binding of the device type configured on `port`.
    pub fn clear_port_bindings(&self, config: &mut Config, port: usize) {
        let devtype = config.device_type(port).to_string();
        let Some(proxy) = self.lookup(&devtype) else {
            return;
        };
        let subtype = config.subtype(port, &devtype);
        for bi in proxy.bindings(subtype) {
            config.delete_value(port, &bind_key(&devtype, bi.name));
        }
    }
}

lazy_static::lazy_static! {
    static ref BUILTIN: Registry = {
        let mut reg = Registry::new();
        devices::register_all(&mut reg);
        reg
    };
}

/// The registry of built-in peripheral types.
pub fn registry() -> &'static Registry {
    &BUILTIN
}
