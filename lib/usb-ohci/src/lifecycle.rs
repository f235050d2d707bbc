// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Creation and destruction of the devices plugged into each port.
//!
//! Ports are numbered as the guest (and the configuration) sees them; the
//! translation to root-hub ports happens here, through [root_hub_port].

use std::sync::{Arc, Mutex};

use slog::{o, Logger};
use thiserror::Error;
use usb_config_toml::{Config, DEVTYPE_NONE};

use crate::hw::usb::ohci::{root_hub_port, OhciState, NUM_PORTS};
use crate::hw::usb::proxy::{self, DeviceProxy, Registry};
use crate::hw::usb::usbdev::Device;

#[derive(Debug, Error)]
pub enum Error {
    #[error("no USB port {0}")]
    UnknownPort(usize),

    #[error("failed to create device for port {port}")]
    CreateFailed {
        port: usize,
        #[source]
        source: proxy::Error,
    },
}

pub type Result<T> = core::result::Result<T, Error>;

fn check_port(port: usize) -> Result<usize> {
    match port {
        p if p < NUM_PORTS => Ok(root_hub_port(p)),
        p => Err(Error::UnknownPort(p)),
    }
}

/// Keeps the devices in the controller's ports in line with the
/// configuration.
pub struct Lifecycle {
    config: Arc<Mutex<Config>>,
    registry: &'static Registry,
    log: Logger,
}

impl Lifecycle {
    pub fn new(
        config: Arc<Mutex<Config>>,
        registry: &'static Registry,
        log: &Logger,
    ) -> Self {
        Self { config, registry, log: log.new(o!("component" => "lifecycle")) }
    }

    pub fn config(&self) -> &Arc<Mutex<Config>> {
        &self.config
    }

    pub fn registry(&self) -> &'static Registry {
        self.registry
    }

    /// Proxy of the type `dev` was built from.
    pub fn proxy_of(&self, dev: &Device) -> Option<&'static dyn DeviceProxy> {
        self.registry.lookup(dev.type_name())
    }

    /// Builds the device configured for `port` and plugs it in.  A port
    /// configured with no (or an unknown) device type is left empty.
    pub fn create(&self, ohci: &mut OhciState, port: usize) -> Result<()> {
        let rh = check_port(port)?;
        let built = {
            let config = self.config.lock().unwrap();
            let sel = config.selection(port);
            let Some(proxy) = self.registry.lookup(&sel.device_type) else {
                if !sel.device_type.eq_ignore_ascii_case(DEVTYPE_NONE)
                    && !sel.device_type.is_empty()
                {
                    slog::warn!(self.log, "unknown device type";
                        "port" => port, "type" => &sel.device_type);
                }
                return Ok(());
            };
            proxy
                .create(&config, port, sel.subtype, &self.log)
                .map(|dev| (dev, proxy))
        };

        match built {
            Ok((dev, proxy)) => {
                slog::info!(self.log, "created device";
                    "port" => port, "type" => proxy.type_name());
                if let Some(mut old) = ohci.attach_device(rh, dev) {
                    old.unrealize();
                }
                Ok(())
            }
            Err(e) => {
                slog::error!(self.log, "device creation failed: {e}";
                    "port" => port);
                Err(Error::CreateFailed { port, source: e })
            }
        }
    }

    /// Unplugs and tears down the device in `port`, if any.
    pub fn destroy(&self, ohci: &mut OhciState, port: usize) -> Result<()> {
        let rh = check_port(port)?;
        if let Some(mut dev) = ohci.detach_device(rh) {
            slog::info!(self.log, "destroying device";
                "port" => port, "type" => dev.type_name());
            dev.unrealize();
        }
        Ok(())
    }

    /// Re-reads the settings of the live device in `port`.
    pub fn update(&self, ohci: &mut OhciState, port: usize) -> Result<()> {
        let rh = check_port(port)?;
        let Some(dev) = ohci.device_mut(rh) else {
            return Ok(());
        };
        let Some(proxy) = self.registry.lookup(dev.type_name()) else {
            return Ok(());
        };
        let config = self.config.lock().unwrap();
        proxy.update_settings(dev, &config, port);
        Ok(())
    }

    /// Applies a configuration change from `old` to `new`.  Ports whose
    /// device selection is unchanged keep their device and only have its
    /// settings refreshed; the others are rebuilt.
    ///
    /// Every port is processed even if one fails; the first failure is
    /// returned.
    pub fn reconcile(
        &self,
        ohci: &mut OhciState,
        old: &Config,
        new: &Config,
    ) -> Result<()> {
        let mut res = Ok(());
        for port in 0..NUM_PORTS {
            let step = if old.selection(port) == new.selection(port) {
                self.update(ohci, port)
            } else {
                slog::info!(self.log, "port configuration changed";
                    "port" => port,
                    "from" => old.device_type(port),
                    "to" => new.device_type(port));
                self.destroy(ohci, port).and_then(|_| self.create(ohci, port))
            };
            res = res.and(step);
        }
        res
    }
}
