// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The USB subsystem as seen by the rest of the emulator: a clock sink, a
//! register window on the memory bus, and a participant in save states.

use std::sync::{Arc, Mutex};

use slog::{o, Logger};
use thiserror::Error;
use usb_config_toml::{Config, PortSelection};

use crate::hw::usb::ohci::migrate::OhciV1;
use crate::hw::usb::ohci::{
    root_hub_port, OhciState, NUM_PORTS, OHCI_BASE, OHCI_LEN, PSXCLK,
};
use crate::hw::usb::packet::migrate::PacketV1;
use crate::hw::usb::packet::{EndpointSlot, PacketStatus};
use crate::hw::usb::proxy::{self, InputBindingInfo, Registry, SettingInfo};
use crate::hw::usb::usbdev::migrate::DeviceV1;
use crate::intr_pins::IntrPin;
use crate::lifecycle::{self, Lifecycle};
use crate::memory::GuestMemory;
use crate::migrate::{
    StateError, StateReader, StateWriter, FORMAT_VERSION,
};

const USB_MARKER: &str = "USB";

/// Space a caller must set aside for a saved subsystem.
pub const FREEZE_SIZE: usize = 0x10000;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FreezeAction {
    Load,
    Save,
    /// Report the buffer size needed to save.
    Size,
}

#[derive(Debug, Error)]
pub enum FreezeError {
    /// The saved state could not be applied; the subsystem was reset.
    #[error("USB state not loaded, subsystem reset: {0}")]
    Reset(#[source] StateError),

    #[error("USB state not saved: {0}")]
    Save(#[source] StateError),
}

pub type Result<T> = core::result::Result<T, FreezeError>;

pub struct UsbSubsystem {
    ohci: OhciState,
    devices: Lifecycle,
    /// Absolute cycle count of the last [UsbSubsystem::advance_to].
    last_cycle: i64,
    log: Logger,
}

impl UsbSubsystem {
    /// Builds the controller and the devices configured for each port,
    /// drawing device types from the built-in registry.
    pub fn open(
        log: &Logger,
        config: Arc<Mutex<Config>>,
        memory: Arc<dyn GuestMemory>,
        irq: Arc<dyn IntrPin>,
    ) -> Self {
        Self::open_with_registry(log, config, memory, irq, proxy::registry())
    }

    pub fn open_with_registry(
        log: &Logger,
        config: Arc<Mutex<Config>>,
        memory: Arc<dyn GuestMemory>,
        irq: Arc<dyn IntrPin>,
        registry: &'static Registry,
    ) -> Self {
        let log = log.new(o!("component" => "usb"));
        let mut usb = Self {
            ohci: OhciState::new(memory, irq, &log),
            devices: Lifecycle::new(config, registry, &log),
            last_cycle: 0,
            log,
        };
        for port in 0..NUM_PORTS {
            if let Err(e) = usb.devices.create(&mut usb.ohci, port) {
                slog::warn!(usb.log, "port left empty: {e}"; "port" => port);
            }
        }
        usb
    }

    /// Tears down every device.
    pub fn close(&mut self) {
        for port in 0..NUM_PORTS {
            if let Err(e) = self.devices.destroy(&mut self.ohci, port) {
                slog::warn!(self.log, "device not torn down: {e}";
                    "port" => port);
            }
        }
    }

    /// Zeroes the clocks and hard-resets the controller.  Devices stay
    /// plugged in.
    pub fn reset(&mut self) {
        slog::info!(self.log, "reset");
        self.last_cycle = 0;
        self.ohci.reset_clocks();
        self.ohci.hard_reset();
    }

    pub fn controller(&self) -> &OhciState {
        &self.ohci
    }

    pub fn registry(&self) -> &'static Registry {
        self.devices.registry()
    }

    pub fn ticks_per_second(&self) -> i64 {
        PSXCLK
    }

    pub fn current_clock(&self) -> i64 {
        self.ohci.clocks()
    }

    /// Runs the controller for `cycles` more cycles.
    pub fn advance(&mut self, cycles: i64) {
        self.last_cycle += cycles;
        self.ohci.advance(cycles);
    }

    /// Runs the controller up to absolute cycle `cycle`.
    pub fn advance_to(&mut self, cycle: i64) {
        let delta = cycle - self.last_cycle;
        if delta > 0 {
            self.advance(delta);
        }
    }

    fn window(addr: u32) -> Option<usize> {
        addr.checked_sub(OHCI_BASE)
            .map(|off| off as usize)
            .filter(|off| *off < OHCI_LEN)
    }

    pub fn read8(&mut self, addr: u32) -> u8 {
        slog::trace!(self.log, "ignored 8-bit read"; "addr" => addr);
        0
    }

    pub fn read16(&mut self, addr: u32) -> u16 {
        slog::trace!(self.log, "ignored 16-bit read"; "addr" => addr);
        0
    }

    pub fn read32(&mut self, addr: u32) -> u32 {
        match Self::window(addr) {
            Some(off) => self.ohci.reg_read(off),
            None => 0,
        }
    }

    pub fn write8(&mut self, addr: u32, value: u8) {
        slog::trace!(self.log, "ignored 8-bit write";
            "addr" => addr, "value" => value);
    }

    pub fn write16(&mut self, addr: u32, value: u16) {
        slog::trace!(self.log, "ignored 16-bit write";
            "addr" => addr, "value" => value);
    }

    pub fn write32(&mut self, addr: u32, value: u32) {
        if let Some(off) = Self::window(addr) {
            self.ohci.reg_write(off, value);
        }
    }

    /// Re-evaluates the devices of every port after the configuration
    /// changed from `old` to its current contents.
    pub fn check_for_config_changes(&mut self, old: &Config) -> lifecycle::Result<()> {
        let new = self.devices.config().lock().unwrap().clone();
        self.devices.reconcile(&mut self.ohci, old, &new)
    }

    /// Finishes the packet a device on (guest) `port` left outstanding on
    /// `slot`.
    pub fn complete_async(
        &mut self,
        port: usize,
        slot: EndpointSlot,
        status: PacketStatus,
        data: &[u8],
    ) {
        if port < NUM_PORTS {
            self.ohci.complete_async(root_hub_port(port), slot, status, data);
        }
    }

    fn selection(&self, port: usize) -> PortSelection {
        self.devices.config().lock().unwrap().selection(port)
    }

    /// Bindings of the device type configured on `port`.
    pub fn device_bindings(&self, port: usize) -> &'static [InputBindingInfo] {
        let sel = self.selection(port);
        self.device_bindings_for(&sel.device_type, sel.subtype)
    }

    pub fn binding_value(&self, port: usize, bind_index: u32) -> f32 {
        if port >= NUM_PORTS {
            return 0.0;
        }
        let Some(dev) = self.ohci.device(root_hub_port(port)) else {
            return 0.0;
        };
        match self.devices.proxy_of(dev) {
            Some(proxy) => proxy.binding_value(dev, bind_index),
            None => 0.0,
        }
    }

    pub fn set_binding_value(&mut self, port: usize, bind_index: u32, value: f32) {
        if port >= NUM_PORTS {
            return;
        }
        let Some(dev) = self.ohci.device_mut(root_hub_port(port)) else {
            return;
        };
        if let Some(proxy) = self.devices.proxy_of(dev) {
            proxy.set_binding_value(dev, bind_index, value);
        }
    }

    /// Host pointer position for the device on `port`, in normalized
    /// display coordinates.
    pub fn set_pointer_position(&mut self, port: usize, x: f32, y: f32) {
        if port >= NUM_PORTS {
            return;
        }
        if let Some(dev) = self.ohci.device_mut(root_hub_port(port)) {
            dev.model_mut().set_pointer_position(x, y);
        }
    }

    pub fn input_device_connected(&mut self, identifier: &str) {
        for rh in 0..NUM_PORTS {
            let Some(dev) = self.ohci.device_mut(rh) else {
                continue;
            };
            if let Some(proxy) = self.devices.proxy_of(dev) {
                proxy.input_device_connected(dev, identifier);
            }
        }
    }

    pub fn input_device_disconnected(&mut self, identifier: &str) {
        for rh in 0..NUM_PORTS {
            let Some(dev) = self.ohci.device_mut(rh) else {
                continue;
            };
            if let Some(proxy) = self.devices.proxy_of(dev) {
                proxy.input_device_disconnected(dev, identifier);
            }
        }
    }

    /// `(type_name, name)` of every device type that can be configured.
    pub fn device_types(&self) -> Vec<(&'static str, &'static str)> {
        self.registry().enumerate().collect()
    }

    pub fn device_name(&self, type_name: &str) -> &'static str {
        self.registry()
            .lookup(type_name)
            .map(|p| p.name())
            .unwrap_or("Not Connected")
    }

    pub fn device_subtypes(&self, type_name: &str) -> &'static [&'static str] {
        self.registry().lookup(type_name).map(|p| p.subtypes()).unwrap_or(&[])
    }

    pub fn device_bindings_for(
        &self,
        type_name: &str,
        subtype: u32,
    ) -> &'static [InputBindingInfo] {
        self.registry()
            .lookup(type_name)
            .map(|p| p.bindings(subtype))
            .unwrap_or(&[])
    }

    pub fn device_settings(
        &self,
        type_name: &str,
        subtype: u32,
    ) -> &'static [SettingInfo] {
        self.registry()
            .lookup(type_name)
            .map(|p| p.settings(subtype))
            .unwrap_or(&[])
    }

    /// Saves to the end of `buf`, or loads from the start of it.  Returns
    /// the number of bytes written or consumed, or for
    /// [FreezeAction::Size] the space a save needs.
    ///
    /// A load which fails partway leaves the subsystem hard-reset.  A device
    /// whose own state fails to load is removed, without disturbing the
    /// other ports.
    pub fn freeze(
        &mut self,
        action: FreezeAction,
        buf: &mut Vec<u8>,
    ) -> Result<usize> {
        match action {
            FreezeAction::Size => Ok(FREEZE_SIZE),
            FreezeAction::Save => {
                let start = buf.len();
                self.save(buf).map_err(|e| {
                    slog::error!(self.log, "failed to save state: {e}");
                    FreezeError::Save(e)
                })?;
                Ok(buf.len() - start)
            }
            FreezeAction::Load => {
                let mut r = StateReader::new(buf.as_slice());
                match self.load(&mut r) {
                    Ok(()) => Ok(r.position() as usize),
                    Err(e) => {
                        slog::error!(self.log,
                            "failed to load state, resetting: {e}");
                        self.reset();
                        Err(FreezeError::Reset(e))
                    }
                }
            }
        }
    }

    fn save(&self, buf: &mut Vec<u8>) -> crate::migrate::Result<()> {
        let selections: [PortSelection; NUM_PORTS] = {
            let config = self.devices.config().lock().unwrap();
            std::array::from_fn(|port| config.selection(port))
        };

        let mut w = StateWriter::new(buf);
        w.marker(USB_MARKER)?;
        w.u32(FORMAT_VERSION)?;
        OhciV1 { last_cycle: self.last_cycle, ..self.ohci.export() }
            .write(&mut w)?;

        for (port, sel) in selections.iter().enumerate() {
            w.string(&sel.device_type)?;
            w.u32(sel.subtype)?;
            let size_pos = w.reserve_u32()?;
            let start = w.position();
            if let Some(dev) = self.ohci.device(root_hub_port(port)) {
                dev.core.export().write(&mut w)?;
                let proxy = self.devices.proxy_of(dev).ok_or_else(|| {
                    StateError::Peripheral(format!(
                        "no proxy for {}",
                        dev.type_name()
                    ))
                })?;
                proxy.freeze_save(dev, &mut w)?;
            }
            let size = u32::try_from(w.position() - start).map_err(|_| {
                StateError::Invalid("device block size", port as i64)
            })?;
            w.patch_u32(size_pos, size)?;
        }

        self.ohci.export_packet().write(&mut w)
    }

    fn load(&mut self, r: &mut StateReader) -> crate::migrate::Result<()> {
        r.expect_marker(USB_MARKER)?;
        let version = r.u32()?;
        if version > FORMAT_VERSION {
            return Err(StateError::Version(version));
        }
        let saved = OhciV1::read(r)?;
        self.ohci.cancel_all();
        self.ohci.import(&saved)?;
        self.last_cycle = saved.last_cycle;

        let mut loaded = [false; NUM_PORTS];
        for port in 0..NUM_PORTS {
            let devtype = r.string()?;
            let subtype = r.u32()?;
            let size = r.u32()?;
            let start = r.position();
            let rh = root_hub_port(port);

            let current = self.selection(port);
            let present = self.ohci.device(rh).is_some();
            let declared = size != 0;
            if !present && !declared {
                continue;
            }
            if !present
                || !declared
                || current.device_type != devtype
                || current.subtype != subtype
            {
                slog::warn!(self.log, "saved device does not match configuration";
                    "port" => port,
                    "saved" => &devtype,
                    "saved_subtype" => subtype,
                    "configured" => &current.device_type,
                    "configured_subtype" => current.subtype);
                self.ohci.reattach_device(rh);
                r.skip(size.into())?;
                continue;
            }

            match self.load_device(r, rh) {
                Ok(()) => loaded[rh] = true,
                Err(e) => {
                    slog::error!(self.log, "device state not loaded: {e}";
                        "port" => port, "type" => &devtype);
                    if let Err(e) = self.devices.destroy(&mut self.ohci, port) {
                        slog::warn!(self.log, "device not torn down: {e}";
                            "port" => port);
                    }
                }
            }
            let end = start + u64::from(size);
            if loaded[rh] && r.position() != end {
                slog::warn!(self.log, "device block size mismatch";
                    "port" => port,
                    "declared" => size,
                    "read" => r.position() - start);
            }
            r.seek(end)?;
        }

        let packet = PacketV1::read(r)?;
        self.ohci.import_packet(&packet, loaded)
    }

    fn load_device(
        &mut self,
        r: &mut StateReader,
        rh: usize,
    ) -> crate::migrate::Result<()> {
        let saved = DeviceV1::read(r)?;
        let dev = self
            .ohci
            .device_mut(rh)
            .ok_or(StateError::Invalid("device port", rh as i64))?;
        dev.core.import(&saved)?;
        let proxy = self.devices.proxy_of(dev).ok_or_else(|| {
            StateError::Peripheral(format!("no proxy for {}", dev.type_name()))
        })?;
        proxy.freeze_load(dev, r)
    }
}
