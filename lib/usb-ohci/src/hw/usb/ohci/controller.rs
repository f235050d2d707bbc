// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Arc;

use slog::{o, Logger};

use crate::hw::usb::packet::migrate::PacketV1;
use crate::hw::usb::packet::{
    EndpointAddr, EndpointSlot, Packet, PacketState, PacketStatus, Pid,
};
use crate::hw::usb::usbdev::DATA_BUF_SIZE;
use crate::intr_pins::IntrPin;
use crate::memory::GuestMemory;
use crate::migrate::StateError;

use super::bits::{
    CommandStatus, Control, FmInterval, FunctionalState, Intr, PortStatus,
    RhStatus, DONE_COUNT_IDLE, EDPTR_MASK, FI_RESET, FSMPS_RESET, HCCA_MASK,
    LS_THRESH, REVISION, RHA_RW_MASK,
};
use super::migrate::OhciV1;
use super::port::RootHubPort;
use super::registers::{OhciReg, OHCI_REGS};
use super::{root_hub_port, BIT_TIME, FRAME_TIME, NUM_PORTS};

/// Value read back from unmapped or unaligned register offsets.
const INVALID_READ: u32 = 0xffff_ffff;

pub struct OhciState {
    pub(super) mem: Arc<dyn GuestMemory>,
    irq: Arc<dyn IntrPin>,
    pub(super) log: Logger,

    /// Cycles the controller has been advanced by.
    pub(super) clocks: i64,
    /// Cycles received but not yet consumed by the frame timer.
    remaining: i64,
    /// Cycles until the next frame boundary; 0 while the bus is stopped.
    pub(super) eof_timer: i64,
    /// Value of `clocks` at the last start-of-frame.
    sof_time: i64,

    pub(super) ctl: Control,
    /// `ctl` as of the previous frame boundary.
    pub(super) old_ctl: Control,
    pub(super) status: CommandStatus,
    pub(super) intr_status: Intr,
    pub(super) intr: Intr,
    pub(super) hcca: u32,
    pub(super) ctrl_head: u32,
    pub(super) ctrl_cur: u32,
    pub(super) bulk_head: u32,
    pub(super) bulk_cur: u32,
    pub(super) per_cur: u32,
    /// Head of the done queue not yet written back to the HCCA.
    pub(super) done: u32,
    /// Frames until the done queue is written back.
    pub(super) done_count: i32,

    fsmps: u32,
    pub(super) fit: u32,
    fi: u32,
    pub(super) frt: u32,
    pub(super) frame_number: u16,
    pstart: u32,
    lst: u32,

    pub(super) rhdesc_a: u32,
    pub(super) rhdesc_b: u32,
    pub(super) rhstatus: RhStatus,
    pub(super) ports: [RootHubPort; NUM_PORTS],

    /// Scratch buffer holding the data of the TD in flight.
    pub(super) usb_buf: Box<[u8]>,
    /// The controller's packet, or `None` while a device holds it parked
    /// on an endpoint queue.
    pub(super) usb_packet: Option<Packet>,
    /// TD whose packet is outstanding on a device, or 0.
    pub(super) async_td: u32,
    /// Set once the device has handed the outstanding packet back.
    pub(super) async_complete: bool,
}

impl OhciState {
    pub fn new(
        mem: Arc<dyn GuestMemory>,
        irq: Arc<dyn IntrPin>,
        log: &Logger,
    ) -> Self {
        let mut state = Self {
            mem,
            irq,
            log: log.new(o!("component" => "ohci")),
            clocks: 0,
            remaining: 0,
            eof_timer: 0,
            sof_time: 0,
            ctl: Control(0),
            old_ctl: Control(0),
            status: CommandStatus::empty(),
            intr_status: Intr::empty(),
            intr: Intr::empty(),
            hcca: 0,
            ctrl_head: 0,
            ctrl_cur: 0,
            bulk_head: 0,
            bulk_cur: 0,
            per_cur: 0,
            done: 0,
            done_count: DONE_COUNT_IDLE,
            fsmps: 0,
            fit: 0,
            fi: 0,
            frt: 0,
            frame_number: 0,
            pstart: 0,
            lst: 0,
            rhdesc_a: 0,
            rhdesc_b: 0,
            rhstatus: RhStatus::empty(),
            ports: Default::default(),
            usb_buf: vec![0u8; DATA_BUF_SIZE].into_boxed_slice(),
            usb_packet: Some(Packet::default()),
            async_td: 0,
            async_complete: false,
        };
        state.hard_reset();
        state
    }

    /// Returns the controller to its power-on state.  Attached devices stay
    /// plugged in and see a port reset.
    pub fn hard_reset(&mut self) {
        self.soft_reset();
        self.ctl = Control(0);
        self.roothub_reset();
    }

    /// HcCommandStatus.HCR: resets the operational registers, leaving the
    /// root hub alone.
    pub(super) fn soft_reset(&mut self) {
        slog::debug!(self.log, "soft reset");
        self.bus_stop();
        self.ctl = Control(0)
            .with_ir(self.ctl.ir())
            .with_hcfs(FunctionalState::Suspend);
        self.old_ctl = Control(0);
        self.status = CommandStatus::empty();
        self.intr_status = Intr::empty();
        self.intr = Intr::MIE;

        self.hcca = 0;
        self.ctrl_head = 0;
        self.ctrl_cur = 0;
        self.bulk_head = 0;
        self.bulk_cur = 0;
        self.per_cur = 0;
        self.done = 0;
        self.done_count = DONE_COUNT_IDLE;

        self.fsmps = FSMPS_RESET;
        self.fi = FI_RESET;
        self.fit = 0;
        self.frt = 0;
        self.frame_number = 0;
        self.pstart = 0;
        self.lst = LS_THRESH;
        self.intr_update();
    }

    /// Cycles the controller has been advanced by.
    pub fn clocks(&self) -> i64 {
        self.clocks
    }

    /// Zeroes the cycle counters.
    pub fn reset_clocks(&mut self) {
        self.clocks = 0;
        self.remaining = 0;
        self.sof_time = 0;
    }

    /// Whether the frame timer is running.
    pub fn bus_running(&self) -> bool {
        self.eof_timer > 0
    }

    /// Consumes `cycles` of elapsed time, running a frame boundary for
    /// every full frame while the bus is running.
    pub fn advance(&mut self, cycles: i64) {
        let end = self.clocks + cycles;
        self.remaining += cycles;

        if self.eof_timer > 0 {
            while self.remaining >= self.eof_timer {
                self.remaining -= self.eof_timer;
                self.eof_timer = 0;
                // the boundary sees the clock as of the boundary itself
                self.clocks = end - self.remaining;
                self.frame_boundary();
                if self.eof_timer == 0 {
                    break;
                }
            }
        }
        self.clocks = end;
        if self.remaining > 0 && self.eof_timer > 0 {
            let m = self.remaining.min(self.eof_timer);
            self.remaining -= m;
            self.eof_timer -= m;
        }
    }

    pub(super) fn bus_start(&mut self) {
        slog::debug!(self.log, "bus start");
        self.eof_timer = 0;
        self.sof();
    }

    pub(super) fn bus_stop(&mut self) {
        if self.eof_timer != 0 {
            slog::debug!(self.log, "bus stop");
        }
        self.eof_timer = 0;
    }

    /// Start of frame.
    pub(super) fn sof(&mut self) {
        self.sof_time = self.clocks;
        self.eof_timer = FRAME_TIME;
        self.set_interrupt(Intr::SF);
    }

    /// Unrecoverable error: raise UE and stop the bus.
    pub(super) fn die(&mut self, reason: &str) {
        slog::error!(self.log, "unrecoverable error: {reason}";
            "frame" => self.frame_number);
        self.set_interrupt(Intr::UE);
        self.bus_stop();
    }

    pub(super) fn set_interrupt(&mut self, intr: Intr) {
        self.intr_status |= intr;
        self.intr_update();
    }

    pub(super) fn intr_update(&self) {
        let level = self.intr.contains(Intr::MIE)
            && !(self.intr_status & self.intr).is_empty();
        self.irq.set_state(level);
    }

    fn set_ctl(&mut self, val: u32) {
        let old_state = self.ctl.hcfs();
        self.ctl = Control(val);
        let new_state = self.ctl.hcfs();
        if old_state == new_state {
            return;
        }
        slog::debug!(self.log, "functional state change";
            "from" => ?old_state, "to" => ?new_state);
        match new_state {
            FunctionalState::Operational => self.bus_start(),
            FunctionalState::Suspend => {
                self.bus_stop();
                // a pending SF would keep the guest's handler spinning
                self.intr_status.remove(Intr::SF);
                self.intr_update();
            }
            FunctionalState::Resume => {}
            FunctionalState::Reset => self.roothub_reset(),
        }
    }

    fn frame_remaining(&self) -> u32 {
        let frt = self.frt << 31;
        if self.ctl.hcfs() != FunctionalState::Operational {
            return frt;
        }
        let tks = (self.clocks - self.sof_time).max(0);
        if tks >= FRAME_TIME {
            return frt;
        }
        let fr = (i64::from(self.fi) - tks / BIT_TIME) as u16;
        frt | u32::from(fr)
    }

    /// Handles a 32-bit read at `offset` into the register window.
    pub fn reg_read(&mut self, offset: usize) -> u32 {
        let Some(access) = OHCI_REGS.lookup(offset, 4) else {
            slog::warn!(self.log, "bad register read"; "offset" => offset);
            return INVALID_READ;
        };
        if access.offset != 0 {
            slog::warn!(self.log, "unaligned register read"; "offset" => offset);
            return INVALID_READ;
        }

        let value = match *access.id {
            OhciReg::Revision => REVISION,
            OhciReg::Control => self.ctl.0,
            OhciReg::CommandStatus => self.status.bits(),
            OhciReg::InterruptStatus => self.intr_status.bits(),
            OhciReg::InterruptEnable | OhciReg::InterruptDisable => {
                self.intr.bits()
            }
            OhciReg::Hcca => self.hcca,
            OhciReg::PeriodCurrentEd => self.per_cur,
            OhciReg::ControlHeadEd => self.ctrl_head,
            OhciReg::ControlCurrentEd => self.ctrl_cur,
            OhciReg::BulkHeadEd => self.bulk_head,
            OhciReg::BulkCurrentEd => self.bulk_cur,
            OhciReg::DoneHead => self.done,
            OhciReg::FmInterval => {
                (self.fit << 31) | (self.fsmps << 16) | self.fi
            }
            OhciReg::FmRemaining => self.frame_remaining(),
            OhciReg::FmNumber => u32::from(self.frame_number),
            OhciReg::PeriodicStart => self.pstart,
            OhciReg::LsThreshold => self.lst,
            OhciReg::RhDescriptorA => self.rhdesc_a,
            OhciReg::RhDescriptorB => self.rhdesc_b,
            OhciReg::RhStatus => self.rhstatus.bits(),
            // Ports are always powered (NPS).
            OhciReg::RhPortStatus(i) => {
                (self.ports[usize::from(i)].ctrl | PortStatus::PPS).bits()
            }
            OhciReg::Reserved => {
                slog::warn!(self.log, "read of reserved register";
                    "offset" => offset);
                INVALID_READ
            }
        };
        slog::trace!(self.log, "register read";
            "reg" => ?access.id, "value" => value);
        value
    }

    /// Handles a 32-bit write of `val` at `offset` into the register window.
    pub fn reg_write(&mut self, offset: usize, val: u32) {
        let Some(access) = OHCI_REGS.lookup(offset, 4) else {
            slog::warn!(self.log, "bad register write";
                "offset" => offset, "value" => val);
            return;
        };
        if access.offset != 0 {
            slog::warn!(self.log, "unaligned register write";
                "offset" => offset, "value" => val);
            return;
        }
        slog::trace!(self.log, "register write";
            "reg" => ?access.id, "value" => val);

        match *access.id {
            OhciReg::Control => self.set_ctl(val),
            OhciReg::CommandStatus => {
                self.status |= CommandStatus::from_bits_retain(val)
                    - CommandStatus::SOC;
                if self.status.contains(CommandStatus::HCR) {
                    self.soft_reset();
                }
            }
            OhciReg::InterruptStatus => {
                self.intr_status &= !Intr::from_bits_retain(val);
                self.intr_update();
            }
            OhciReg::InterruptEnable => {
                self.intr |= Intr::from_bits_retain(val);
                self.intr_update();
            }
            OhciReg::InterruptDisable => {
                self.intr &= !Intr::from_bits_retain(val);
                self.intr_update();
            }
            OhciReg::Hcca => self.hcca = val & HCCA_MASK,
            OhciReg::ControlHeadEd => self.ctrl_head = val & EDPTR_MASK,
            OhciReg::ControlCurrentEd => self.ctrl_cur = val & EDPTR_MASK,
            OhciReg::BulkHeadEd => self.bulk_head = val & EDPTR_MASK,
            OhciReg::BulkCurrentEd => self.bulk_cur = val & EDPTR_MASK,
            OhciReg::FmInterval => {
                let fi = val & FmInterval::FI.bits();
                if fi != self.fi {
                    slog::debug!(self.log, "frame interval changed";
                        "from" => self.fi, "to" => fi);
                }
                self.fi = fi;
                self.fit = val >> 31;
                self.fsmps = (val & FmInterval::FSMPS.bits()) >> 16;
            }
            OhciReg::PeriodicStart => self.pstart = val & 0xffff,
            OhciReg::LsThreshold => self.lst = val & 0xffff,
            OhciReg::RhDescriptorA => {
                self.rhdesc_a =
                    (self.rhdesc_a & !RHA_RW_MASK) | (val & RHA_RW_MASK);
            }
            OhciReg::RhDescriptorB => self.rhdesc_b = val,
            OhciReg::RhStatus => self.set_hub_status(val),
            OhciReg::RhPortStatus(i) => {
                self.port_set_status(usize::from(i), val)
            }
            OhciReg::Revision
            | OhciReg::PeriodCurrentEd
            | OhciReg::DoneHead
            | OhciReg::FmRemaining
            | OhciReg::FmNumber
            | OhciReg::Reserved => {
                slog::warn!(self.log, "write to read-only register";
                    "reg" => ?access.id, "value" => val);
            }
        }
    }

    /// Root-hub port holding the parked packet with `id`.
    pub(super) fn find_parked(&self, id: u64) -> Option<EndpointAddr> {
        self.ports.iter().enumerate().find_map(|(port, rh)| {
            let dev = rh.dev.as_ref()?;
            dev.core
                .endpoints()
                .find(|ep| ep.queued().any(|p| p.id == id))
                .map(|ep| EndpointAddr { port, slot: ep.slot })
        })
    }

    /// Root-hub port the outstanding packet is addressed to, if any.
    fn async_port(&self) -> Option<usize> {
        if self.async_td == 0 {
            return None;
        }
        match self.usb_packet.as_ref() {
            Some(p) => p.ep.map(|ep| ep.port),
            None => self.find_parked(u64::from(self.async_td)).map(|ep| ep.port),
        }
    }

    /// Withdraws the outstanding packet from its device, if there is one.
    pub(super) fn cancel_async(&mut self) {
        if self.async_td != 0 {
            let id = u64::from(self.async_td);
            if let Some(ep) = self.find_parked(id) {
                slog::debug!(self.log, "canceling outstanding packet";
                    "td" => self.async_td, "ep" => ?ep);
                let canceled = self.ports[ep.port]
                    .dev
                    .as_mut()
                    .and_then(|dev| dev.cancel(ep.slot, id));
                if canceled.is_some() {
                    self.usb_packet = canceled;
                }
            }
            self.async_td = 0;
        }
        if self.usb_packet.is_none() {
            self.usb_packet = Some(Packet::default());
        }
        self.async_complete = false;
    }

    /// Cancels the outstanding packet if it belongs to root-hub port `port`.
    pub(super) fn cancel_async_for_port(&mut self, port: usize) {
        if self.async_port() == Some(port) {
            self.cancel_async();
        }
        if let Some(p) = self.usb_packet.as_mut() {
            if p.ep.map(|ep| ep.port) == Some(port) {
                p.ep = None;
            }
        }
    }

    /// Finishes the packet parked on `slot` of the device in root-hub port
    /// `port`.  For IN transfers `data` is the payload returned by the
    /// device.
    pub fn complete_async(
        &mut self,
        port: usize,
        slot: EndpointSlot,
        status: PacketStatus,
        data: &[u8],
    ) {
        let n = data.len().min(self.usb_buf.len());
        self.usb_buf[..n].copy_from_slice(&data[..n]);
        let Some(dev) = self.ports.get_mut(port).and_then(|p| p.dev.as_mut())
        else {
            slog::warn!(self.log, "async completion for empty port";
                "port" => port);
            return;
        };
        let done = dev.complete_async(slot, status, n, &mut self.usb_buf);
        let mut ours = false;
        for p in done {
            if self.async_td != 0 && p.id == u64::from(self.async_td) {
                self.usb_packet = Some(p);
                ours = true;
            } else {
                slog::debug!(self.log, "dropping completed packet";
                    "id" => p.id, "status" => ?p.status);
            }
        }
        if ours {
            self.async_complete = true;
            self.process_lists();
        }
    }

    /// Withdraws every packet parked on any device, leaving the controller
    /// with its own packet back.
    pub fn cancel_all(&mut self) {
        for port in self.ports.iter_mut() {
            if let Some(dev) = port.dev.as_mut() {
                for p in dev.cancel_all() {
                    if self.async_td != 0 && p.id == u64::from(self.async_td) {
                        self.usb_packet = Some(p);
                    }
                }
            }
        }
        if self.usb_packet.is_none() {
            self.usb_packet = Some(Packet::default());
        }
    }

    pub fn export(&self) -> OhciV1 {
        OhciV1 {
            last_cycle: 0,
            clocks: self.clocks,
            remaining: self.remaining,
            eof_timer: self.eof_timer,
            sof_time: self.sof_time,
            ctl: self.ctl.0,
            status: self.status.bits(),
            intr_status: self.intr_status.bits(),
            intr: self.intr.bits(),
            hcca: self.hcca,
            ctrl_head: self.ctrl_head,
            ctrl_cur: self.ctrl_cur,
            bulk_head: self.bulk_head,
            bulk_cur: self.bulk_cur,
            per_cur: self.per_cur,
            done: self.done,
            done_count: self.done_count,
            fsmps: self.fsmps,
            fit: self.fit,
            fi: self.fi,
            frt: self.frt,
            frame_number: self.frame_number,
            pstart: self.pstart,
            lst: self.lst,
            rhdesc_a: self.rhdesc_a,
            rhdesc_b: self.rhdesc_b,
            rhstatus: self.rhstatus.bits(),
            port_ctrl: std::array::from_fn(|i| self.ports[i].ctrl.bits()),
            old_ctl: self.old_ctl.0,
            usb_buf: self.usb_buf.to_vec(),
            async_td: self.async_td,
            async_complete: self.async_complete,
        }
    }

    /// Applies saved register state.  Devices and the packet are restored
    /// separately.
    pub fn import(&mut self, v: &OhciV1) -> crate::migrate::Result<()> {
        if v.usb_buf.len() != self.usb_buf.len() {
            return Err(StateError::Invalid(
                "transfer buffer length",
                v.usb_buf.len() as i64,
            ));
        }
        if v.eof_timer < 0 || v.remaining < 0 {
            return Err(StateError::Invalid("frame timer", v.eof_timer));
        }
        self.clocks = v.clocks;
        self.remaining = v.remaining;
        self.eof_timer = v.eof_timer;
        self.sof_time = v.sof_time;
        self.ctl = Control(v.ctl);
        self.status = CommandStatus::from_bits_retain(v.status);
        self.intr_status = Intr::from_bits_retain(v.intr_status);
        self.intr = Intr::from_bits_retain(v.intr);
        self.hcca = v.hcca;
        self.ctrl_head = v.ctrl_head;
        self.ctrl_cur = v.ctrl_cur;
        self.bulk_head = v.bulk_head;
        self.bulk_cur = v.bulk_cur;
        self.per_cur = v.per_cur;
        self.done = v.done;
        self.done_count = v.done_count;
        self.fsmps = v.fsmps;
        self.fit = v.fit & 1;
        self.fi = v.fi;
        self.frt = v.frt & 1;
        self.frame_number = v.frame_number;
        self.pstart = v.pstart;
        self.lst = v.lst;
        self.rhdesc_a = v.rhdesc_a;
        self.rhdesc_b = v.rhdesc_b;
        self.rhstatus = RhStatus::from_bits_retain(v.rhstatus);
        for (port, ctrl) in self.ports.iter_mut().zip(v.port_ctrl) {
            port.ctrl = PortStatus::from_bits_retain(ctrl);
        }
        self.old_ctl = Control(v.old_ctl);
        self.usb_buf.copy_from_slice(&v.usb_buf);
        self.async_td = v.async_td;
        self.async_complete = v.async_complete;
        self.intr_update();
        Ok(())
    }

    /// Describes the controller's packet, wherever it currently is.
    pub fn export_packet(&self) -> PacketV1 {
        let parked = match self.usb_packet.as_ref() {
            Some(p) => Some((p, false)),
            None => self.find_parked(u64::from(self.async_td)).and_then(|ep| {
                self.ports[ep.port]
                    .dev
                    .as_ref()?
                    .core
                    .endpoint(ep.slot)
                    .queued()
                    .find(|p| p.id == u64::from(self.async_td))
                    .map(|p| (p, true))
            }),
        };
        let fallback = Packet::default();
        let (p, queued) = parked.unwrap_or((&fallback, false));
        let (dev_index, ep_index) = match p.ep {
            Some(ep) => {
                (root_hub_port(ep.port) as i32, ep.slot.to_index() as i32)
            }
            None => (-1, -1),
        };
        PacketV1 {
            dev_index,
            ep_index,
            buffer_size: p.buffer_size as u32,
            queued,
            pid: p.pid as u8,
            id: p.id,
            short_not_ok: p.short_not_ok,
            int_req: p.int_req,
            status: p.status as i32,
            actual_length: p.actual_length as u32,
            state: p.state as u8,
        }
    }

    /// Restores the controller's packet.  Its endpoint is only resolved
    /// against root-hub ports flagged in `loaded`; otherwise the packet
    /// comes back detached with an empty buffer.
    pub fn import_packet(
        &mut self,
        v: &PacketV1,
        loaded: [bool; NUM_PORTS],
    ) -> crate::migrate::Result<()> {
        let pid = Pid::from_repr(v.pid)
            .ok_or(StateError::Invalid("packet pid", v.pid.into()))?;
        let status = PacketStatus::from_repr(v.status)
            .ok_or(StateError::Invalid("packet status", v.status.into()))?;
        let state = PacketState::from_repr(v.state)
            .ok_or(StateError::Invalid("packet state", v.state.into()))?;
        let buffer_size = v.buffer_size as usize;
        if buffer_size > DATA_BUF_SIZE {
            return Err(StateError::Invalid(
                "packet buffer size",
                v.buffer_size.into(),
            ));
        }

        let ep = usize::try_from(v.dev_index)
            .ok()
            .filter(|p| *p < NUM_PORTS)
            .map(root_hub_port)
            .filter(|p| loaded[*p] && self.ports[*p].dev.is_some())
            .zip(usize::try_from(v.ep_index).ok().and_then(EndpointSlot::from_index))
            .map(|(port, slot)| EndpointAddr { port, slot });

        let mut p = Packet {
            pid,
            id: v.id,
            ep,
            buffer_size: if ep.is_some() { buffer_size } else { 0 },
            short_not_ok: v.short_not_ok,
            int_req: v.int_req,
            status,
            actual_length: (v.actual_length as usize).min(buffer_size),
            state,
        };

        match (ep, v.queued) {
            (Some(addr), true) => {
                if let Some(dev) = self.ports[addr.port].dev.as_mut() {
                    dev.core.endpoint_mut(addr.slot).queue.push_back(p);
                    self.usb_packet = None;
                }
            }
            (None, true) => {
                slog::warn!(self.log, "dropping packet of unloaded device";
                    "id" => v.id, "dev" => v.dev_index);
                p.state = PacketState::Canceled;
                self.usb_packet = Some(p);
                self.async_td = 0;
                self.async_complete = false;
            }
            (_, false) => self.usb_packet = Some(p),
        }
        Ok(())
    }
}
