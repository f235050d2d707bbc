// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;

use crate::hw::usb::packet::{EndpointSlot, Packet, Pid};

use super::descriptor::TransferType;

/// One endpoint of a device, along with the packets parked on it.
#[derive(Debug)]
pub struct Endpoint {
    pub slot: EndpointSlot,
    /// Transfer type, or `None` while the endpoint is not part of the active
    /// configuration.
    pub transfer_type: Option<TransferType>,
    pub ifnum: u8,
    pub max_packet_size: u16,
    /// Whether the device may have several packets in flight at once.
    pub pipeline: bool,
    pub halted: bool,
    pub(crate) queue: VecDeque<Packet>,
}

impl Endpoint {
    pub fn new(slot: EndpointSlot) -> Self {
        let mut ep = Self {
            slot,
            transfer_type: None,
            ifnum: 0,
            max_packet_size: 0,
            pipeline: false,
            halted: false,
            queue: VecDeque::new(),
        };
        ep.reset();
        ep
    }

    /// Returns the endpoint to its unconfigured state.  Parked packets are
    /// kept; they belong to whoever dispatched them.
    pub fn reset(&mut self) {
        match self.slot {
            EndpointSlot::Control => {
                self.transfer_type = Some(TransferType::Control);
                self.max_packet_size = 64;
            }
            _ => {
                self.transfer_type = None;
                self.max_packet_size = 0;
            }
        }
        self.ifnum = 0;
        self.pipeline = false;
        self.halted = false;
    }

    pub fn pid(&self) -> Pid {
        match self.slot {
            EndpointSlot::In(_) => Pid::In,
            _ => Pid::Out,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.transfer_type.is_some()
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queued(&self) -> impl Iterator<Item = &Packet> {
        self.queue.iter()
    }

    /// Drops every parked packet.
    pub fn clear_queue(&mut self) -> Vec<Packet> {
        self.queue.drain(..).collect()
    }
}
