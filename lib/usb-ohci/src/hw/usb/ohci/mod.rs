// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*!
## Emulated OHCI host controller

The controller is a plain state machine driven from outside: the owner feeds
it elapsed CPU cycles through [OhciState::advance], and forwards 32-bit
register accesses to [OhciState::reg_read] and [OhciState::reg_write].  No
threads are involved; every list walk and device callback runs on the
caller's stack.

```text
 advance(cycles)
   |
   v  every FRAME_TIME cycles while Operational
 frame_boundary ---> periodic list (HCCA.intr[frame & 31])
   |            \--> control list, bulk list
   |                    |
   |                    v  one TD at a time
   |                 service_td ---> Device::handle_packet
   v
 done queue writeback, SF interrupt, HCCA frame number
```

### Ports

Two root-hub ports are exposed.  The guest's port numbering is the reverse
of the root hub's; [root_hub_port] converts between the two, and is the only
place the swap is expressed.

### Asynchronous packets

The controller owns a single [Packet].  While a device holds it parked on an
endpoint queue the controller's copy is `None` and `async_td` names the TD it
belongs to; that TD is retried on every pass until the device completes the
packet, at which point the packet is handed back and the TD retired.

[Packet]: crate::hw::usb::packet::Packet
*/

pub mod bits;
mod controller;
mod port;
pub mod registers;
mod schedule;

pub use controller::OhciState;
pub use port::RootHubPort;

/// Number of downstream ports on the root hub.
pub const NUM_PORTS: usize = 2;

/// Guest physical address of the register window.
pub const OHCI_BASE: u32 = 0x1f80_1600;

/// Length of the register window.
pub const OHCI_LEN: usize = 0x100;

/// Rate of the clock driving [OhciState::advance].
pub const PSXCLK: i64 = 36_864_000;

/// Cycles per 1ms USB frame.
pub const FRAME_TIME: i64 = PSXCLK / 1000;

/// Cycles per full-speed bit time (12 Mbit/s).
pub const BIT_TIME: i64 = PSXCLK / 12_000_000;

/// Maps a guest-visible port number to the root-hub port it is wired to,
/// and back.
pub const fn root_hub_port(port: usize) -> usize {
    NUM_PORTS - 1 - port
}

pub mod migrate {
    use crate::migrate::{StateReader, StateWriter};

    use super::NUM_PORTS;
    use crate::hw::usb::usbdev::DATA_BUF_SIZE;

    pub const OHCI_MARKER: &str = "USBOHCI";

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct OhciV1 {
        pub last_cycle: i64,
        pub clocks: i64,
        pub remaining: i64,
        pub eof_timer: i64,
        pub sof_time: i64,

        pub ctl: u32,
        pub status: u32,
        pub intr_status: u32,
        pub intr: u32,
        pub hcca: u32,
        pub ctrl_head: u32,
        pub ctrl_cur: u32,
        pub bulk_head: u32,
        pub bulk_cur: u32,
        pub per_cur: u32,
        pub done: u32,
        pub done_count: i32,

        pub fsmps: u32,
        pub fit: u32,
        pub fi: u32,
        pub frt: u32,
        pub frame_number: u16,
        pub pstart: u32,
        pub lst: u32,
        pub rhdesc_a: u32,
        pub rhdesc_b: u32,
        pub rhstatus: u32,
        pub port_ctrl: [u32; NUM_PORTS],
        pub old_ctl: u32,

        pub usb_buf: Vec<u8>,
        pub async_td: u32,
        pub async_complete: bool,
    }

    impl OhciV1 {
        pub fn write(&self, w: &mut StateWriter) -> crate::migrate::Result<()> {
            w.marker(OHCI_MARKER)?;
            w.i64(self.last_cycle)?;
            w.i64(self.clocks)?;
            w.i64(self.remaining)?;
            w.i64(self.eof_timer)?;
            w.i64(self.sof_time)?;
            for v in [
                self.ctl,
                self.status,
                self.intr_status,
                self.intr,
                self.hcca,
                self.ctrl_head,
                self.ctrl_cur,
                self.bulk_head,
                self.bulk_cur,
                self.per_cur,
                self.done,
            ] {
                w.u32(v)?;
            }
            w.i32(self.done_count)?;
            w.u32(self.fsmps)?;
            w.u32(self.fit)?;
            w.u32(self.fi)?;
            w.u32(self.frt)?;
            w.u16(self.frame_number)?;
            w.u16(0)?;
            w.u32(self.pstart)?;
            w.u32(self.lst)?;
            w.u32(self.rhdesc_a)?;
            w.u32(self.rhdesc_b)?;
            w.u32(self.rhstatus)?;
            for ctrl in self.port_ctrl {
                w.u32(ctrl)?;
            }
            w.u32(self.old_ctl)?;
            w.bytes(&self.usb_buf)?;
            w.u32(self.async_td)?;
            w.bool(self.async_complete)
        }

        pub fn read(r: &mut StateReader) -> crate::migrate::Result<Self> {
            r.expect_marker(OHCI_MARKER)?;
            let last_cycle = r.i64()?;
            let clocks = r.i64()?;
            let remaining = r.i64()?;
            let eof_timer = r.i64()?;
            let sof_time = r.i64()?;
            let mut regs = [0u32; 11];
            for v in regs.iter_mut() {
                *v = r.u32()?;
            }
            let [ctl, status, intr_status, intr, hcca, ctrl_head, ctrl_cur, bulk_head, bulk_cur, per_cur, done] =
                regs;
            let done_count = r.i32()?;
            let fsmps = r.u32()?;
            let fit = r.u32()?;
            let fi = r.u32()?;
            let frt = r.u32()?;
            let frame_number = r.u16()?;
            let _pad = r.u16()?;
            let pstart = r.u32()?;
            let lst = r.u32()?;
            let rhdesc_a = r.u32()?;
            let rhdesc_b = r.u32()?;
            let rhstatus = r.u32()?;
            let mut port_ctrl = [0u32; NUM_PORTS];
            for ctrl in port_ctrl.iter_mut() {
                *ctrl = r.u32()?;
            }
            let old_ctl = r.u32()?;
            let mut usb_buf = vec![0u8; DATA_BUF_SIZE];
            r.bytes(&mut usb_buf)?;
            let async_td = r.u32()?;
            let async_complete = r.bool()?;
            Ok(Self {
                last_cycle,
                clocks,
                remaining,
                eof_timer,
                sof_time,
                ctl,
                status,
                intr_status,
                intr,
                hcca,
                ctrl_head,
                ctrl_cur,
                bulk_head,
                bulk_cur,
                per_cur,
                done,
                done_count,
                fsmps,
                fit,
                fi,
                frt,
                frame_number,
                pstart,
                lst,
                rhdesc_a,
                rhdesc_b,
                rhstatus,
                port_ctrl,
                old_ctl,
                usb_buf,
                async_td,
                async_complete,
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn port_swap_is_an_involution() {
        assert_eq!(root_hub_port(0), 1);
        assert_eq!(root_hub_port(1), 0);
        for p in 0..NUM_PORTS {
            assert_eq!(root_hub_port(root_hub_port(p)), p);
        }
    }

    #[test]
    fn clock_constants() {
        assert_eq!(FRAME_TIME, 36_864);
        assert_eq!(BIT_TIME, 3);
    }
}
