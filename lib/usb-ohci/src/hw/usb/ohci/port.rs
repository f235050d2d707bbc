// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::hw::usb::usbdev::{Device, Speed};

use super::bits::{FunctionalState, Intr, PortStatus, RhDescriptorA, RhStatus};
use super::controller::OhciState;
use super::NUM_PORTS;

/// A downstream port of the root hub, and the device plugged into it.
#[derive(Default)]
pub struct RootHubPort {
    pub ctrl: PortStatus,
    pub(super) dev: Option<Device>,
}

impl RootHubPort {
    pub fn device(&self) -> Option<&Device> {
        self.dev.as_ref()
    }
}

impl OhciState {
    pub fn port(&self, port: usize) -> &RootHubPort {
        &self.ports[port]
    }

    pub fn device(&self, port: usize) -> Option<&Device> {
        self.ports.get(port)?.dev.as_ref()
    }

    pub fn device_mut(&mut self, port: usize) -> Option<&mut Device> {
        self.ports.get_mut(port)?.dev.as_mut()
    }

    /// Plugs `dev` into root-hub port `port` and signals the connection to
    /// the guest.  A device already in the port is unplugged and returned.
    pub fn attach_device(&mut self, port: usize, mut dev: Device) -> Option<Device> {
        let old = self.detach_device(port);
        slog::info!(self.log, "device attached";
            "port" => port, "type" => dev.type_name());
        dev.core.attached = true;
        self.ports[port].dev = Some(dev);
        self.port_attach(port);
        old
    }

    /// Unplugs the device in root-hub port `port`, dropping any packets it
    /// holds.
    pub fn detach_device(&mut self, port: usize) -> Option<Device> {
        self.ports.get(port)?.dev.as_ref()?;
        self.port_detach(port);
        let mut dev = self.ports[port].dev.take()?;
        dev.cancel_all();
        dev.core.attached = false;
        slog::info!(self.log, "device detached";
            "port" => port, "type" => dev.type_name());
        Some(dev)
    }

    /// Signals a disconnect of `port` followed, if a device is plugged in,
    /// by its reconnection.
    pub fn reattach_device(&mut self, port: usize) {
        self.port_detach(port);
        if self.ports[port].dev.is_some() {
            self.port_attach(port);
        }
    }

    /// Connect event for the device in `port`.
    pub(super) fn port_attach(&mut self, port: usize) {
        let rh = &mut self.ports[port];
        let old_state = rh.ctrl;
        let Some(dev) = rh.dev.as_mut() else {
            return;
        };

        rh.ctrl |= PortStatus::CCS | PortStatus::CSC;
        if dev.core.speed == Speed::Low {
            rh.ctrl |= PortStatus::LSDA;
        } else {
            rh.ctrl.remove(PortStatus::LSDA);
        }
        dev.attach();
        let changed = old_state != rh.ctrl;

        if self.ctl.hcfs() == FunctionalState::Suspend {
            self.set_interrupt(Intr::RD);
        }
        if changed {
            self.set_interrupt(Intr::RHSC);
        }
    }

    /// Disconnect event for the device in `port`.
    pub(super) fn port_detach(&mut self, port: usize) {
        self.cancel_async_for_port(port);

        let rh = &mut self.ports[port];
        let old_state = rh.ctrl;
        if rh.ctrl.contains(PortStatus::CCS) {
            rh.ctrl.remove(PortStatus::CCS);
            rh.ctrl.insert(PortStatus::CSC);
        }
        if rh.ctrl.contains(PortStatus::PES) {
            rh.ctrl.remove(PortStatus::PES);
            rh.ctrl.insert(PortStatus::PESC);
        }
        if let Some(dev) = rh.dev.as_mut() {
            dev.detach();
        }
        if old_state != rh.ctrl {
            self.set_interrupt(Intr::RHSC);
        }
    }

    /// Resets the root hub.  Attached devices are reconnected and reset.
    pub(super) fn roothub_reset(&mut self) {
        self.bus_stop();
        self.rhdesc_a = RhDescriptorA::NPS.bits() | NUM_PORTS as u32;
        self.rhdesc_b = 0;
        self.rhstatus = RhStatus::empty();

        for port in 0..NUM_PORTS {
            self.ports[port].ctrl = PortStatus::empty();
            let attached = self.ports[port]
                .dev
                .as_ref()
                .map(|dev| dev.core.attached)
                .unwrap_or(false);
            if attached {
                self.port_detach(port);
                self.port_attach(port);
                if let Some(dev) = self.ports[port].dev.as_mut() {
                    dev.reset();
                }
            }
        }
        self.cancel_async();
    }

    fn port_power(&mut self, port: usize, on: bool) {
        let ctrl = &mut self.ports[port].ctrl;
        if on {
            ctrl.insert(PortStatus::PPS);
        } else {
            ctrl.remove(
                PortStatus::PPS
                    | PortStatus::CCS
                    | PortStatus::PSS
                    | PortStatus::PRS,
            );
        }
    }

    /// Sets `bits` in the port if a device is connected, returning whether
    /// any of them were newly set.  Without a connection the write is
    /// reported as a connect status change instead.
    fn port_set_if_connected(&mut self, port: usize, bits: PortStatus) -> bool {
        if bits.is_empty() {
            return false;
        }
        let ctrl = &mut self.ports[port].ctrl;
        if !ctrl.contains(PortStatus::CCS) {
            ctrl.insert(PortStatus::CSC);
            self.set_interrupt(Intr::RHSC);
            return false;
        }
        let newly_set = !ctrl.intersects(bits);
        ctrl.insert(bits);
        newly_set
    }

    /// Guest write to HcRhPortStatus of `port`.
    pub(super) fn port_set_status(&mut self, port: usize, val: u32) {
        let val = PortStatus::from_bits_retain(val);
        let old_state = self.ports[port].ctrl;

        self.ports[port].ctrl.remove(val & PortStatus::WTC);
        // CCS written: ClearPortEnable
        if val.contains(PortStatus::CCS) {
            self.ports[port].ctrl.remove(PortStatus::PES);
        }

        self.port_set_if_connected(port, val & PortStatus::PES);
        if self.port_set_if_connected(port, val & PortStatus::PSS) {
            slog::debug!(self.log, "port suspended"; "port" => port);
        }
        if self.port_set_if_connected(port, val & PortStatus::PRS) {
            slog::debug!(self.log, "port reset"; "port" => port);
            if let Some(dev) = self.ports[port].dev.as_mut() {
                dev.reset();
            }
            let ctrl = &mut self.ports[port].ctrl;
            ctrl.remove(PortStatus::PRS);
            ctrl.insert(PortStatus::PES | PortStatus::PRSC);
        }

        // Power off before on, so a write of both leaves the port powered.
        if val.contains(PortStatus::LSDA) {
            self.port_power(port, false);
        }
        if val.contains(PortStatus::PPS) {
            self.port_power(port, true);
        }

        if old_state != self.ports[port].ctrl {
            self.set_interrupt(Intr::RHSC);
        }
    }

    /// Guest write to HcRhStatus.
    pub(super) fn set_hub_status(&mut self, val: u32) {
        let val = RhStatus::from_bits_retain(val);
        let old_state = self.rhstatus;

        if val.contains(RhStatus::OCIC) {
            self.rhstatus.remove(RhStatus::OCIC);
        }
        if val.contains(RhStatus::LPS) {
            for port in 0..NUM_PORTS {
                self.port_power(port, false);
            }
            slog::debug!(self.log, "root hub powered down");
        }
        if val.contains(RhStatus::LPSC) {
            for port in 0..NUM_PORTS {
                self.port_power(port, true);
            }
            slog::debug!(self.log, "root hub powered up");
        }
        if val.contains(RhStatus::DRWE) {
            self.rhstatus.insert(RhStatus::DRWE);
        }
        if val.contains(RhStatus::CRWE) {
            self.rhstatus.remove(RhStatus::DRWE);
        }

        if old_state != self.rhstatus {
            self.set_interrupt(Intr::RHSC);
        }
    }
}
