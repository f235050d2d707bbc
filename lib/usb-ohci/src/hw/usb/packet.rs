// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-flight USB transactions.
//!
//! A [Packet] never owns data: its payload lives in a buffer supplied by
//! whoever dispatches it (the controller's scratch buffer), and its target
//! endpoint is named by index rather than by reference.

use strum::FromRepr;

/// Number of non-control endpoints per direction.
pub const MAX_ENDPOINTS: usize = 15;

/// Maximum number of interfaces tracked per device.
pub const MAX_INTERFACES: usize = 16;

/// USB token PIDs.
#[repr(u8)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Pid {
    Setup = 0x2d,
    In = 0x69,
    Out = 0xe1,
}

/// One endpoint of a device: the control endpoint, or an IN/OUT slot.  Slot
/// `n` holds endpoint number `n + 1`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum EndpointSlot {
    Control,
    In(u8),
    Out(u8),
}

impl EndpointSlot {
    /// Endpoint addressed by a token with `pid` to endpoint number `ep`.
    pub fn from_token(pid: Pid, ep: u8) -> Option<Self> {
        match ep {
            0 => Some(Self::Control),
            n if usize::from(n) <= MAX_ENDPOINTS => match pid {
                Pid::In => Some(Self::In(n - 1)),
                Pid::Out | Pid::Setup => Some(Self::Out(n - 1)),
            },
            _ => None,
        }
    }

    /// Endpoint addressed by a `wIndex` of an endpoint-recipient request.
    pub fn from_address(addr: u8) -> Option<Self> {
        let pid = if addr & 0x80 != 0 { Pid::In } else { Pid::Out };
        Self::from_token(pid, addr & 0xf)
    }

    pub fn number(&self) -> u8 {
        match self {
            Self::Control => 0,
            Self::In(n) | Self::Out(n) => n + 1,
        }
    }

    /// Flat index: 0 for control, then the IN slots, then the OUT slots.
    pub fn to_index(&self) -> usize {
        match self {
            Self::Control => 0,
            Self::In(n) => 1 + usize::from(*n),
            Self::Out(n) => 1 + MAX_ENDPOINTS + usize::from(*n),
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::Control),
            i if i < 1 + MAX_ENDPOINTS => Some(Self::In((i - 1) as u8)),
            i if i < 1 + 2 * MAX_ENDPOINTS => {
                Some(Self::Out((i - 1 - MAX_ENDPOINTS) as u8))
            }
            _ => None,
        }
    }

    /// Every endpoint slot, in flat index order.
    pub fn all() -> impl Iterator<Item = Self> {
        (0..1 + 2 * MAX_ENDPOINTS).filter_map(Self::from_index)
    }
}

/// Names an endpoint of the device plugged into a root-hub port.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct EndpointAddr {
    /// Root-hub (not guest-visible) port index.
    pub port: usize,
    pub slot: EndpointSlot,
}

/// Completion status of a packet.
#[repr(i32)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketStatus {
    Success = 0,
    NoDev = -1,
    Nak = -2,
    Stall = -3,
    Babble = -4,
    IoError = -5,
    Async = -6,
    AddToQueue = -7,
    RemoveFromQueue = -8,
}

#[repr(u8)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketState {
    Undefined = 0,
    Setup = 1,
    Queued = 2,
    Async = 3,
    Complete = 4,
    Canceled = 5,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub pid: Pid,
    /// Identifier chosen by the dispatcher (the controller uses the TD
    /// address).
    pub id: u64,
    pub ep: Option<EndpointAddr>,
    pub buffer_size: usize,
    pub short_not_ok: bool,
    pub int_req: bool,
    pub status: PacketStatus,
    pub actual_length: usize,
    pub state: PacketState,
}

impl Default for Packet {
    fn default() -> Self {
        Self {
            pid: Pid::Out,
            id: 0,
            ep: None,
            buffer_size: 0,
            short_not_ok: false,
            int_req: false,
            status: PacketStatus::Success,
            actual_length: 0,
            state: PacketState::Undefined,
        }
    }
}

impl Packet {
    /// Prepares the packet for a new transaction.
    pub fn setup(
        &mut self,
        pid: Pid,
        ep: EndpointAddr,
        id: u64,
        short_not_ok: bool,
        int_req: bool,
        buffer_size: usize,
    ) {
        debug_assert!(!self.is_inflight());
        self.pid = pid;
        self.ep = Some(ep);
        self.id = id;
        self.short_not_ok = short_not_ok;
        self.int_req = int_req;
        self.buffer_size = buffer_size;
        self.status = PacketStatus::Success;
        self.actual_length = 0;
        self.state = PacketState::Setup;
    }

    pub fn is_inflight(&self) -> bool {
        matches!(self.state, PacketState::Queued | PacketState::Async)
    }

    fn remaining(&self) -> usize {
        self.buffer_size.saturating_sub(self.actual_length)
    }

    /// Appends device-to-host data to the packet's buffer, returning how
    /// much of `src` fit.
    pub fn push_data(&mut self, buf: &mut [u8], src: &[u8]) -> usize {
        let n = src.len().min(self.remaining());
        let start = self.actual_length;
        buf[start..start + n].copy_from_slice(&src[..n]);
        self.actual_length += n;
        n
    }

    /// Consumes host-to-device data from the packet's buffer into `dst`,
    /// returning how many bytes were taken.
    pub fn pull_data(&mut self, buf: &[u8], dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.remaining());
        let start = self.actual_length;
        dst[..n].copy_from_slice(&buf[start..start + n]);
        self.actual_length += n;
        n
    }
}

pub mod migrate {
    use crate::migrate::{StateReader, StateWriter};

    pub const PACKET_MARKER: &str = "USBPacket";

    /// The controller's packet.  `dev_index` is the guest-visible port and
    /// `ep_index` the flat endpoint index; both are -1 for a packet without
    /// an endpoint.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct PacketV1 {
        pub dev_index: i32,
        pub ep_index: i32,
        pub buffer_size: u32,
        /// Whether the packet was parked on its endpoint's queue.
        pub queued: bool,
        pub pid: u8,
        pub id: u64,
        pub short_not_ok: bool,
        pub int_req: bool,
        pub status: i32,
        pub actual_length: u32,
        pub state: u8,
    }

    impl PacketV1 {
        pub fn write(&self, w: &mut StateWriter) -> crate::migrate::Result<()> {
            w.marker(PACKET_MARKER)?;
            w.i32(self.dev_index)?;
            w.i32(self.ep_index)?;
            w.u32(self.buffer_size)?;
            w.bool(self.queued)?;
            w.u8(self.pid)?;
            w.u64(self.id)?;
            w.bool(self.short_not_ok)?;
            w.bool(self.int_req)?;
            w.i32(self.status)?;
            w.u32(self.actual_length)?;
            w.u8(self.state)
        }

        pub fn read(r: &mut StateReader) -> crate::migrate::Result<Self> {
            r.expect_marker(PACKET_MARKER)?;
            Ok(Self {
                dev_index: r.i32()?,
                ep_index: r.i32()?,
                buffer_size: r.u32()?,
                queued: r.bool()?,
                pid: r.u8()?,
                id: r.u64()?,
                short_not_ok: r.bool()?,
                int_req: r.bool()?,
                status: r.i32()?,
                actual_length: r.u32()?,
                state: r.u8()?,
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slot_index_mapping() {
        assert_eq!(EndpointSlot::Control.to_index(), 0);
        assert_eq!(EndpointSlot::In(0).to_index(), 1);
        assert_eq!(EndpointSlot::In(14).to_index(), 15);
        assert_eq!(EndpointSlot::Out(0).to_index(), 16);
        assert_eq!(EndpointSlot::Out(14).to_index(), 30);
        assert_eq!(EndpointSlot::from_index(31), None);
        for slot in EndpointSlot::all() {
            assert_eq!(EndpointSlot::from_index(slot.to_index()), Some(slot));
        }
        assert_eq!(EndpointSlot::all().count(), 31);
    }

    #[test]
    fn slot_from_token() {
        assert_eq!(
            EndpointSlot::from_token(Pid::Setup, 0),
            Some(EndpointSlot::Control)
        );
        assert_eq!(EndpointSlot::from_token(Pid::In, 1), Some(EndpointSlot::In(0)));
        assert_eq!(
            EndpointSlot::from_token(Pid::Out, 15),
            Some(EndpointSlot::Out(14))
        );
        assert_eq!(EndpointSlot::from_token(Pid::In, 16), None);
        assert_eq!(EndpointSlot::from_address(0x81), Some(EndpointSlot::In(0)));
        assert_eq!(EndpointSlot::from_address(0x02), Some(EndpointSlot::Out(1)));
    }

    #[test]
    fn data_copies_are_clamped() {
        let mut p = Packet::default();
        let ep = EndpointAddr { port: 0, slot: EndpointSlot::In(0) };
        p.setup(Pid::In, ep, 1, false, false, 4);

        let mut buf = [0u8; 4];
        assert_eq!(p.push_data(&mut buf, &[1, 2, 3]), 3);
        assert_eq!(p.push_data(&mut buf, &[4, 5, 6]), 1);
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(p.actual_length, 4);

        let mut q = Packet::default();
        q.setup(Pid::Out, ep, 2, false, false, 3);
        let mut dst = [0u8; 8];
        assert_eq!(q.pull_data(&[9, 8, 7], &mut dst), 3);
        assert_eq!(&dst[..3], &[9, 8, 7]);
    }
}
