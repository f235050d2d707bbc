// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Dispatch of packets to device endpoints.
//!
//! A packet submitted to an idle endpoint is processed immediately.  If the
//! device cannot answer yet it parks the packet on the endpoint (state
//! [PacketState::Async]), and later packets for the same endpoint queue up
//! behind it until [Device::complete_async] drains them in arrival order.
//!
//! Endpoint 0 carries control transfers, whose SETUP, data, and status
//! stages are tracked in the device's [DeviceCore].
//!
//! [DeviceCore]: super::usbdev::DeviceCore

use super::packet::{EndpointSlot, Packet, PacketState, PacketStatus, Pid};
use super::usbdev::requests::SetupData;
use super::usbdev::{Device, SetupState, DATA_BUF_SIZE};

impl Device {
    /// Submits `p` to its endpoint, with `buf` holding the packet's data
    /// window.
    ///
    /// Returns the packet if it completed (or was NAKed) synchronously, or
    /// `None` if it was parked on the endpoint.
    pub fn handle_packet(
        &mut self,
        mut p: Packet,
        buf: &mut [u8],
    ) -> Option<Packet> {
        let Some(addr) = p.ep else {
            p.status = PacketStatus::NoDev;
            return Some(p);
        };
        debug_assert_eq!(p.state, PacketState::Setup);

        let ep = self.core.endpoint(addr.slot);
        if ep.halted {
            slog::debug!(self.core.log, "packet to halted endpoint";
                "ep" => ?addr.slot, "id" => p.id);
            p.status = PacketStatus::Stall;
            p.state = PacketState::Complete;
            return Some(p);
        }

        if ep.queue.is_empty() || ep.pipeline {
            self.process_one(&mut p, buf);
            match p.status {
                PacketStatus::Async => {
                    p.state = PacketState::Async;
                    self.core.endpoint_mut(addr.slot).queue.push_back(p);
                    None
                }
                PacketStatus::AddToQueue => {
                    p.status = PacketStatus::Async;
                    p.state = PacketState::Queued;
                    self.core.endpoint_mut(addr.slot).queue.push_back(p);
                    None
                }
                PacketStatus::Nak => Some(p),
                _ => {
                    p.state = PacketState::Complete;
                    Some(p)
                }
            }
        } else {
            p.status = PacketStatus::Async;
            p.state = PacketState::Queued;
            self.core.endpoint_mut(addr.slot).queue.push_back(p);
            None
        }
    }

    /// Finishes the parked packet at the head of `slot`'s queue with
    /// `status` and `actual_length`, then runs the packets queued behind it
    /// until one parks again.  The head may be one the device asked to have
    /// queued rather than one it answered asynchronously.
    ///
    /// Returns every packet completed along the way, in completion order.
    /// After a failed completion the endpoint halts, and the rest of its
    /// queue is returned with [PacketStatus::RemoveFromQueue].
    pub fn complete_async(
        &mut self,
        slot: EndpointSlot,
        status: PacketStatus,
        actual_length: usize,
        buf: &mut [u8],
    ) -> Vec<Packet> {
        let mut done = Vec::new();
        let ep = self.core.endpoint_mut(slot);
        let Some(mut head) = ep.queue.pop_front() else {
            slog::warn!(self.core.log, "async completion with empty queue";
                "ep" => ?slot);
            return done;
        };
        if !head.is_inflight() {
            let state = head.state;
            ep.queue.push_front(head);
            slog::warn!(self.core.log, "async completion of idle packet";
                "ep" => ?slot, "state" => ?state);
            return done;
        }
        head.status = status;
        head.actual_length = actual_length.min(head.buffer_size);
        self.complete_one(slot, head, &mut done);

        loop {
            let ep = self.core.endpoint_mut(slot);
            let Some(front) = ep.queue.front() else {
                break;
            };
            if ep.halted {
                if let Some(mut p) = ep.queue.pop_front() {
                    p.status = PacketStatus::RemoveFromQueue;
                    p.state = PacketState::Complete;
                    done.push(p);
                }
                continue;
            }
            if front.state == PacketState::Async {
                break;
            }
            let Some(mut p) = ep.queue.pop_front() else {
                break;
            };
            debug_assert_eq!(p.state, PacketState::Queued);
            p.status = PacketStatus::Success;
            p.actual_length = 0;
            self.process_one(&mut p, buf);
            if p.status == PacketStatus::Async {
                p.state = PacketState::Async;
                self.core.endpoint_mut(slot).queue.push_front(p);
                break;
            }
            self.complete_one(slot, p, &mut done);
        }
        done
    }

    fn complete_one(
        &mut self,
        slot: EndpointSlot,
        mut p: Packet,
        done: &mut Vec<Packet>,
    ) {
        debug_assert!(
            p.status != PacketStatus::Async && p.status != PacketStatus::Nak
        );
        if p.status != PacketStatus::Success
            || (p.short_not_ok && p.actual_length < p.buffer_size)
        {
            self.core.endpoint_mut(slot).halted = true;
        }
        p.state = PacketState::Complete;
        done.push(p);
    }

    /// Withdraws a parked packet.
    pub fn cancel(&mut self, slot: EndpointSlot, id: u64) -> Option<Packet> {
        let queue = &mut self.core.endpoint_mut(slot).queue;
        let pos = queue.iter().position(|p| p.id == id)?;
        let mut p = queue.remove(pos)?;
        debug_assert!(p.is_inflight());
        p.state = PacketState::Canceled;
        Some(p)
    }

    /// Withdraws every parked packet on every endpoint.
    pub fn cancel_all(&mut self) -> Vec<Packet> {
        let mut canceled = Vec::new();
        for ep in self.core.endpoints_mut() {
            for mut p in ep.clear_queue() {
                p.state = PacketState::Canceled;
                canceled.push(p);
            }
        }
        canceled
    }

    fn process_one(&mut self, p: &mut Packet, buf: &mut [u8]) {
        let Some(addr) = p.ep else {
            p.status = PacketStatus::NoDev;
            return;
        };
        let len = p.buffer_size.min(buf.len());
        let buf = &mut buf[..len];
        match addr.slot {
            EndpointSlot::Control => match p.pid {
                Pid::Setup => self.do_token_setup(p, buf),
                Pid::In => self.do_token_in(p, buf),
                Pid::Out => self.do_token_out(p, buf),
            },
            _ => self.handle_data(p, buf),
        }
    }

    fn do_token_setup(&mut self, p: &mut Packet, buf: &mut [u8]) {
        if p.buffer_size != 8 {
            p.status = PacketStatus::Stall;
            return;
        }
        let mut raw = [0u8; 8];
        p.pull_data(buf, &mut raw);
        let setup = SetupData::from_bytes(raw);
        let core = &mut self.core;
        core.setup_buf = raw;
        core.setup_index = 0;
        p.actual_length = 0;
        core.setup_len = usize::from(setup.length());
        if core.setup_len > DATA_BUF_SIZE {
            slog::warn!(core.log, "control transfer too long";
                "len" => core.setup_len);
            p.status = PacketStatus::Stall;
            return;
        }
        slog::trace!(core.log, "SETUP"; "request" => ?setup);

        if setup.is_device_to_host() {
            self.handle_control(p, setup);
            let core = &mut self.core;
            if p.status == PacketStatus::Async {
                core.setup_state = SetupState::Setup;
            }
            if p.status != PacketStatus::Success {
                return;
            }
            core.setup_len = core.setup_len.min(p.actual_length);
            core.setup_state = SetupState::Data;
        } else if core.setup_len == 0 {
            core.setup_state = SetupState::Ack;
        } else {
            core.setup_state = SetupState::Data;
        }
        p.actual_length = 8;
    }

    fn do_token_in(&mut self, p: &mut Packet, buf: &mut [u8]) {
        let setup = SetupData::from_bytes(self.core.setup_buf);
        match self.core.setup_state {
            SetupState::Ack => {
                if !setup.is_device_to_host() {
                    self.handle_control(p, setup);
                    if p.status == PacketStatus::Async {
                        return;
                    }
                    self.core.setup_state = SetupState::Idle;
                    p.actual_length = 0;
                }
            }
            SetupState::Data => {
                if setup.is_device_to_host() {
                    let core = &mut self.core;
                    let start = core.setup_index;
                    let len = core.setup_len.saturating_sub(start).min(p.buffer_size);
                    p.push_data(buf, &core.data_buf()[start..start + len]);
                    core.setup_index += len;
                    if core.setup_index >= core.setup_len {
                        core.setup_state = SetupState::Ack;
                    }
                    return;
                }
                self.core.setup_state = SetupState::Idle;
                p.status = PacketStatus::Stall;
            }
            _ => p.status = PacketStatus::Stall,
        }
    }

    fn do_token_out(&mut self, p: &mut Packet, buf: &mut [u8]) {
        let setup = SetupData::from_bytes(self.core.setup_buf);
        let core = &mut self.core;
        match core.setup_state {
            SetupState::Ack => {
                if setup.is_device_to_host() {
                    core.setup_state = SetupState::Idle;
                }
                // additional OUT data for a host-to-device request is ignored
            }
            SetupState::Data => {
                if !setup.is_device_to_host() {
                    let start = core.setup_index;
                    let len = core.setup_len.saturating_sub(start).min(p.buffer_size);
                    p.pull_data(buf, &mut core.data_buf_mut()[start..start + len]);
                    core.setup_index += len;
                    if core.setup_index >= core.setup_len {
                        core.setup_state = SetupState::Ack;
                    }
                    return;
                }
                core.setup_state = SetupState::Idle;
                p.status = PacketStatus::Stall;
            }
            _ => p.status = PacketStatus::Stall,
        }
    }
}
