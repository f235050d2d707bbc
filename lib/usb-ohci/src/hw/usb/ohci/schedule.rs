// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Walking the endpoint descriptor lists (OHCI 1.0a section 6).

use crate::common::GuestAddr;
use crate::hw::usb::packet::{EndpointAddr, EndpointSlot, PacketStatus, Pid};
use crate::hw::usb::usbdev::DeviceState;

use super::bits::{
    CommandStatus, ConditionCode, Control, Direction, Ed, Hcca, Intr,
    PortStatus, Td, DONE_COUNT_IDLE, ED_HEAD_CARRY, ED_HEAD_HALTED,
    ED_LINK_LIMIT, EDPTR_MASK, TD_SERVICE_LIMIT,
};
use super::controller::OhciState;

/// Which way [OhciState::copy_td] moves data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum DmaDir {
    ToDevice,
    FromDevice,
}

impl OhciState {
    /// End of a 1ms frame.
    pub(super) fn frame_boundary(&mut self) {
        let Some(mut hcca) = Hcca::read(self.mem.as_ref(), self.hcca) else {
            self.die("HCCA read failed");
            return;
        };

        if self.ctl.ple() {
            let n = usize::from(self.frame_number & 0x1f);
            self.service_ed_list(hcca.intr[n]);
        }

        // A list was just disabled: withdraw whatever it had in flight.
        if self.old_ctl.0 & !self.ctl.0 & Control::LIST_ENABLES != 0 {
            self.cancel_async();
        }
        self.old_ctl = self.ctl;
        self.process_lists();

        if self.intr_status.contains(Intr::UE) {
            return;
        }

        self.frt = self.fit;
        self.frame_number = self.frame_number.wrapping_add(1);
        hcca.frame = self.frame_number;
        hcca.pad = 0;

        if self.done_count == 0 && !self.intr_status.contains(Intr::WD) {
            if self.done == 0 {
                self.die("done queue writeback with empty queue");
                return;
            }
            if !(self.intr & self.intr_status).is_empty() {
                self.done |= 1;
            }
            hcca.done = self.done;
            self.done = 0;
            self.done_count = DONE_COUNT_IDLE;
            self.set_interrupt(Intr::WD);
        }

        if self.done_count != DONE_COUNT_IDLE && self.done_count != 0 {
            self.done_count -= 1;
        }

        self.sof();

        if !hcca.write(self.mem.as_ref(), self.hcca) {
            self.die("HCCA write failed");
        }
    }

    /// Services the control and bulk lists the guest has marked filled.
    pub(super) fn process_lists(&mut self) {
        if self.ctl.cle() && self.status.contains(CommandStatus::CLF) {
            if self.ctrl_cur != 0 && self.ctrl_cur != self.ctrl_head {
                slog::trace!(self.log, "control list resumed mid-list";
                    "head" => self.ctrl_head, "cur" => self.ctrl_cur);
            }
            if !self.service_ed_list(self.ctrl_head) {
                self.ctrl_cur = 0;
                self.status.remove(CommandStatus::CLF);
            }
        }
        if self.ctl.ble() && self.status.contains(CommandStatus::BLF) {
            if !self.service_ed_list(self.bulk_head) {
                self.bulk_cur = 0;
                self.status.remove(CommandStatus::BLF);
            }
        }
    }

    /// Walks the ED list starting at `head`, returning whether any ED had
    /// work queued.
    pub(super) fn service_ed_list(&mut self, head: u32) -> bool {
        let mut active = false;
        let mut cur = head;
        let mut links = 0;

        while cur != 0 && links < ED_LINK_LIMIT {
            links += 1;
            let Some(mut ed) = Ed::read(self.mem.as_ref(), cur) else {
                self.die("ED read failed");
                return false;
            };
            let next = ed.next & EDPTR_MASK;

            if ed.halted() || ed.flags.skip() {
                // Withdraw the packet of a paused endpoint.
                if self.async_td != 0 && ed.head_td() == self.async_td {
                    self.cancel_async();
                }
                cur = next;
                continue;
            }

            let mut serviced = 0;
            while ed.head_td() != ed.tail {
                active = true;
                if ed.flags.iso() {
                    slog::warn!(self.log, "isochronous ED not supported";
                        "ed" => cur);
                    break;
                }
                if serviced == TD_SERVICE_LIMIT {
                    slog::debug!(self.log, "ED service deferred"; "ed" => cur);
                    break;
                }
                serviced += 1;
                if self.service_td(&mut ed) {
                    break;
                }
            }

            if !ed.write(self.mem.as_ref(), cur) {
                self.die("ED write failed");
                return false;
            }
            cur = next;
        }
        if cur != 0 {
            slog::debug!(self.log, "ED list cut short"; "head" => head);
        }
        active
    }

    /// Copies `len` bytes between the TD's buffer in guest memory and the
    /// scratch buffer.  The guest buffer may cross one page boundary.
    fn copy_td(&mut self, td: &Td, len: usize, dir: DmaDir) -> bool {
        let ptr = GuestAddr(td.cbp);
        let n = (0x1000 - ptr.page_offset()).min(len);
        let second = GuestAddr(td.be).page_base();
        let mem = self.mem.as_ref();
        let buf = &mut self.usb_buf[..len];
        let (first, rest) = buf.split_at_mut(n);
        match dir {
            DmaDir::ToDevice => {
                mem.read_bytes(ptr, first)
                    && (rest.is_empty() || mem.read_bytes(second, rest))
            }
            DmaDir::FromDevice => {
                mem.write_bytes(ptr, first)
                    && (rest.is_empty() || mem.write_bytes(second, rest))
            }
        }
    }

    /// Root-hub port of the enabled, addressable device with address `addr`.
    fn find_device(&self, addr: u8) -> Option<usize> {
        self.ports.iter().position(|rh| {
            rh.ctrl.contains(PortStatus::PES)
                && rh.dev.as_ref().is_some_and(|dev| {
                    dev.core.attached
                        && dev.core.state >= DeviceState::Default
                        && dev.core.addr == addr
                })
        })
    }

    /// Services the TD at the head of `ed`.  Returns true when no further
    /// TDs of the ED should be processed this pass.
    fn service_td(&mut self, ed: &mut Ed) -> bool {
        let addr = ed.head_td();
        if addr == 0 {
            self.die("null TD on ED");
            return true;
        }

        let completion = addr == self.async_td;
        if completion && !self.async_complete {
            slog::trace!(self.log, "TD still in flight"; "td" => addr);
            return true;
        }
        let Some(mut td) = Td::read(self.mem.as_ref(), addr) else {
            self.die("TD read failed");
            return true;
        };
        if td.next & EDPTR_MASK == addr {
            self.die("TD links to itself");
            return true;
        }

        let dir = match ed.flags.dir() {
            dir @ (Direction::Out | Direction::In) => dir,
            _ => td.flags.dp(),
        };
        let pid = match dir {
            Direction::In => Pid::In,
            Direction::Out => Pid::Out,
            Direction::Setup => {
                if ed.flags.en() > 0 {
                    self.die("SETUP to non-control endpoint");
                    return true;
                }
                Pid::Setup
            }
            Direction::FromTd => {
                slog::warn!(self.log, "bad TD direction"; "td" => addr);
                return true;
            }
        };

        let mut len = 0usize;
        let mut pktlen = 0usize;
        if td.cbp != 0 && td.be != 0 {
            let cbp = GuestAddr(td.cbp);
            let be = GuestAddr(td.be);
            len = if cbp.page_base() != be.page_base() {
                be.page_offset() + 0x1001 - cbp.page_offset()
            } else {
                if td.cbp > td.be {
                    self.die("TD buffer ends before it starts");
                    return true;
                }
                (td.be - td.cbp) as usize + 1
            };
            len = len.min(self.usb_buf.len());

            pktlen = len;
            if len != 0 && dir != Direction::In {
                // The endpoint may not accept all of it at once.
                pktlen = usize::from(ed.flags.mps()).min(len);
                if pktlen == 0 {
                    self.die("zero max packet size");
                    return true;
                }
                if !completion && !self.copy_td(&td, pktlen, DmaDir::ToDevice) {
                    self.die("TD buffer read failed");
                    return true;
                }
            }
        }

        let flag_r = td.flags.rounding();
        slog::trace!(self.log, "TD";
            "td" => addr, "dir" => ?dir, "len" => len, "pktlen" => pktlen,
            "rounding" => flag_r);

        if completion {
            self.async_td = 0;
            self.async_complete = false;
        } else {
            let Some(port) = self.find_device(ed.flags.fa()) else {
                slog::debug!(self.log, "no device at address";
                    "addr" => ed.flags.fa());
                return true;
            };
            if self.async_td != 0 {
                // One packet in flight per controller.
                slog::trace!(self.log, "packet already pending";
                    "td" => self.async_td);
                return true;
            }
            let Some(slot) = EndpointSlot::from_token(pid, ed.flags.en())
            else {
                return true;
            };
            let mut p = self.usb_packet.take().unwrap_or_default();
            p.setup(
                pid,
                EndpointAddr { port, slot },
                u64::from(addr),
                !flag_r,
                td.flags.di() == 0,
                pktlen,
            );
            let Some(dev) = self.ports[port].dev.as_mut() else {
                self.usb_packet = Some(p);
                return true;
            };
            match dev.handle_packet(p, &mut self.usb_buf) {
                Some(p) => self.usb_packet = Some(p),
                None => {
                    slog::trace!(self.log, "packet parked"; "td" => addr);
                    self.async_td = addr;
                    return true;
                }
            }
        }

        let (status, actual) = match self.usb_packet.as_ref() {
            Some(p) => (p.status, p.actual_length),
            None => (PacketStatus::IoError, 0),
        };
        let mut ret: Result<usize, PacketStatus> = match status {
            PacketStatus::Success => Ok(actual),
            err => Err(err),
        };

        if let Ok(n) = ret {
            if dir == Direction::In {
                if !self.copy_td(&td, n, DmaDir::FromDevice) {
                    self.die("TD buffer write failed");
                }
            } else {
                ret = Ok(pktlen);
            }
        }

        let succeeded = ret == Ok(pktlen)
            || (dir == Direction::In && ret.is_ok() && flag_r);
        if succeeded {
            let n = ret.unwrap_or(0);
            if n == len {
                td.cbp = 0;
            } else if (td.cbp & 0xfff) as usize + n > 0xfff {
                td.cbp = (td.be & !0xfff)
                    + ((td.cbp.wrapping_add(n as u32)) & 0xfff);
            } else {
                td.cbp += n as u32;
            }
            td.flags = td
                .flags
                .with_t1(true)
                .with_t0(!td.flags.t0())
                .with_condition(ConditionCode::NoError)
                .with_ec(0);

            if dir != Direction::In && n != len {
                // Partial transfer: the TD stays on the ED.
                return self.put_td(addr, &td);
            }

            ed.head &= !ED_HEAD_CARRY;
            if td.flags.t0() {
                ed.head |= ED_HEAD_CARRY;
            }
        } else {
            match ret {
                Ok(_) => {
                    slog::debug!(self.log, "data underrun"; "td" => addr);
                    td.flags = td.flags.with_condition(ConditionCode::DataUnderrun);
                }
                Err(status) => {
                    td.flags = match status {
                        PacketStatus::IoError | PacketStatus::NoDev => td
                            .flags
                            .with_condition(ConditionCode::DeviceNotResponding),
                        PacketStatus::Nak => {
                            slog::trace!(self.log, "NAK"; "td" => addr);
                            return true;
                        }
                        PacketStatus::Stall => {
                            slog::debug!(self.log, "STALL"; "td" => addr);
                            td.flags.with_condition(ConditionCode::Stall)
                        }
                        PacketStatus::Babble => {
                            td.flags.with_condition(ConditionCode::DataOverrun)
                        }
                        other => {
                            slog::warn!(self.log, "bad device response";
                                "td" => addr, "status" => ?other);
                            td.flags
                                .with_condition(ConditionCode::UnexpectedPid)
                                .with_ec(3)
                        }
                    };
                    // Errors flush the done queue at the next frame.
                    self.done_count = 0;
                }
            }
            ed.head |= ED_HEAD_HALTED;
        }

        // Retire the TD onto the done queue.
        ed.head = (ed.head & !EDPTR_MASK) | (td.next & EDPTR_MASK);
        td.next = self.done;
        self.done = addr;
        self.done_count = self.done_count.min(i32::from(td.flags.di()));

        self.put_td(addr, &td)
    }

    /// Writes `td` back, returning whether servicing of its ED should stop.
    fn put_td(&mut self, addr: u32, td: &Td) -> bool {
        if !td.write(self.mem.as_ref(), addr) {
            self.die("TD write failed");
            return true;
        }
        td.flags.condition() != Some(ConditionCode::NoError)
    }
}

#[cfg(test)]
mod test {
    use std::sync::Arc;

    use super::*;
    use crate::hw::usb::ohci::bits::{EdFlags, TdFlags};
    use crate::intr_pins::NullPin;
    use crate::memory::{GuestMemory, VecMemory};
    use crate::test_util::{build_log, scripted_device, GuestLists, Reply};

    const HCCA: u32 = 0x1000;

    struct Rig {
        ohci: OhciState,
        mem: Arc<VecMemory>,
        lists: GuestLists,
    }

    /// A running controller with an enabled, addressed (address 1),
    /// configured test device on root-hub port 0.
    fn rig() -> (Rig, crate::test_util::Script) {
        let mem = Arc::new(VecMemory::new(0x10000));
        let mut ohci =
            OhciState::new(mem.clone(), Arc::new(NullPin::default()), &build_log());
        let (dev, script) = scripted_device();
        ohci.attach_device(0, dev);
        ohci.reg_write(0x54, PortStatus::PRS.bits());
        {
            let dev = ohci.device_mut(0).unwrap();
            dev.core.addr = 1;
            dev.core.state = DeviceState::Configured;
            dev.core.set_config(1).unwrap();
        }
        ohci.reg_write(0x18, HCCA);
        let lists = GuestLists::new(mem.clone(), 0x2000);
        (Rig { ohci, mem, lists }, script)
    }

    impl Rig {
        fn start(&mut self, ctl: u32) {
            self.ohci.reg_write(0x04, 0x80 | ctl);
        }
        fn frame(&mut self) {
            self.ohci.advance(super::super::FRAME_TIME);
        }
    }

    fn in_ed() -> EdFlags {
        EdFlags(0).with_fa(1).with_en(1).with_dir(Direction::In).with_mps(8)
    }

    #[test]
    fn interrupt_in_completes_onto_done_queue() {
        let (mut rig, script) = rig();
        script.push(Reply::Data(vec![1, 2, 3, 4, 5, 6]));

        let buf = rig.lists.buffer(8);
        let td = rig.lists.td(TdFlags(0).with_rounding(true).with_di(0), buf, 8);
        let ed = rig.lists.ed(in_ed(), &[td]);
        rig.lists.set_interrupt_heads(HCCA, ed);
        rig.start(1 << 2);
        rig.frame();

        let mut data = [0u8; 6];
        assert!(rig.mem.read_bytes(GuestAddr(buf), &mut data));
        assert_eq!(data, [1, 2, 3, 4, 5, 6]);

        let td_back = Td::read(rig.mem.as_ref(), td).unwrap();
        assert_eq!(td_back.flags.condition(), Some(ConditionCode::NoError));
        assert_eq!(td_back.cbp, buf + 6);
        let ed_back = Ed::read(rig.mem.as_ref(), ed).unwrap();
        assert_eq!(ed_back.head_td(), ed_back.tail);
        assert!(!ed_back.halted());
        assert_eq!(ed_back.head & ED_HEAD_CARRY, ED_HEAD_CARRY);

        // DI == 0: written back at the same frame boundary
        let hcca = Hcca::read(rig.mem.as_ref(), HCCA).unwrap();
        assert_eq!(hcca.done & !1, td);
        assert!(rig.ohci.intr_status.contains(Intr::WD));
        assert_eq!(rig.ohci.reg_read(0x30), 0);
    }

    #[test]
    fn short_packet_without_rounding_underruns() {
        let (mut rig, script) = rig();
        script.push(Reply::Data(vec![9, 9]));

        let buf = rig.lists.buffer(8);
        let td = rig.lists.td(TdFlags(0).with_di(7), buf, 8);
        let ed = rig.lists.ed(in_ed(), &[td]);
        rig.lists.set_interrupt_heads(HCCA, ed);
        rig.start(1 << 2);
        rig.frame();

        let td_back = Td::read(rig.mem.as_ref(), td).unwrap();
        assert_eq!(td_back.flags.condition(), Some(ConditionCode::DataUnderrun));
        assert!(Ed::read(rig.mem.as_ref(), ed).unwrap().halted());
    }

    #[test]
    fn stall_halts_ed_and_flushes_done_queue() {
        let (mut rig, script) = rig();
        script.push(Reply::Stall);

        let buf = rig.lists.buffer(8);
        let td = rig.lists.td(TdFlags(0).with_di(7), buf, 8);
        let ed = rig.lists.ed(in_ed(), &[td]);
        rig.lists.set_interrupt_heads(HCCA, ed);
        rig.start(1 << 2);
        rig.frame();

        let td_back = Td::read(rig.mem.as_ref(), td).unwrap();
        assert_eq!(td_back.flags.condition(), Some(ConditionCode::Stall));
        assert!(Ed::read(rig.mem.as_ref(), ed).unwrap().halted());

        // DI of 7 is overridden by the error
        assert_eq!(Hcca::read(rig.mem.as_ref(), HCCA).unwrap().done & !1, td);
        assert_eq!(rig.ohci.done_count, DONE_COUNT_IDLE);
        assert!(rig.ohci.intr_status.contains(Intr::WD));

        // a halted ED is skipped
        let before = Ed::read(rig.mem.as_ref(), ed).unwrap();
        rig.frame();
        assert_eq!(Ed::read(rig.mem.as_ref(), ed).unwrap(), before);
    }

    #[test]
    fn nak_leaves_td_queued() {
        let (mut rig, script) = rig();
        // empty script: the device NAKs
        let buf = rig.lists.buffer(8);
        let td = rig.lists.td(TdFlags(0), buf, 8);
        let ed = rig.lists.ed(in_ed(), &[td]);
        rig.lists.set_interrupt_heads(HCCA, ed);
        rig.start(1 << 2);
        rig.frame();
        assert_eq!(Ed::read(rig.mem.as_ref(), ed).unwrap().head_td(), td);

        script.push(Reply::Data(vec![7]));
        rig.frame();
        assert_ne!(Ed::read(rig.mem.as_ref(), ed).unwrap().head_td(), td);
    }

    #[test]
    fn async_packet_completes_later() {
        let (mut rig, script) = rig();
        script.push(Reply::Async);

        let buf = rig.lists.buffer(8);
        let td = rig.lists.td(TdFlags(0).with_rounding(true).with_di(0), buf, 8);
        let ed = rig.lists.ed(in_ed(), &[td]);
        rig.lists.set_interrupt_heads(HCCA, ed);
        rig.start(1 << 2);
        rig.frame();
        assert_eq!(rig.ohci.async_td, td);
        assert!(rig.ohci.usb_packet.is_none());

        // retried while outstanding, without being resubmitted
        rig.frame();
        assert_eq!(Ed::read(rig.mem.as_ref(), ed).unwrap().head_td(), td);
        assert_eq!(script.remaining(), 0);

        rig.ohci.complete_async(0, EndpointSlot::In(0), PacketStatus::Success, &[4, 2]);
        assert!(rig.ohci.async_complete);
        assert!(rig.ohci.usb_packet.is_some());
        rig.frame();

        assert_eq!(rig.ohci.async_td, 0);
        let mut data = [0u8; 2];
        assert!(rig.mem.read_bytes(GuestAddr(buf), &mut data));
        assert_eq!(data, [4, 2]);
        let ed_back = Ed::read(rig.mem.as_ref(), ed).unwrap();
        assert_eq!(ed_back.head_td(), ed_back.tail);
    }

    #[test]
    fn skipping_ed_cancels_outstanding_packet() {
        let (mut rig, script) = rig();
        script.push(Reply::Async);

        let buf = rig.lists.buffer(8);
        let td = rig.lists.td(TdFlags(0), buf, 8);
        let ed = rig.lists.ed(in_ed(), &[td]);
        rig.lists.set_interrupt_heads(HCCA, ed);
        rig.start(1 << 2);
        rig.frame();
        assert_eq!(rig.ohci.async_td, td);

        let mut ed_back = Ed::read(rig.mem.as_ref(), ed).unwrap();
        ed_back.flags = ed_back.flags.with_skip(true);
        assert!(ed_back.write(rig.mem.as_ref(), ed));
        rig.frame();

        assert_eq!(rig.ohci.async_td, 0);
        assert!(rig.ohci.usb_packet.is_some());
        let dev = rig.ohci.device(0).unwrap();
        assert_eq!(dev.core.endpoint(EndpointSlot::In(0)).queue_len(), 0);
    }

    #[test]
    fn control_list_runs_when_filled() {
        let (mut rig, _script) = rig();
        let get_status = [0x80, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00];
        let setup_buf = rig.lists.buffer(8);
        assert!(rig.mem.write_bytes(GuestAddr(setup_buf), &get_status));
        let data_buf = rig.lists.buffer(2);

        let setup = rig.lists.td(TdFlags(0).with_dp(Direction::Setup), setup_buf, 8);
        let data = rig.lists.td(
            TdFlags(0).with_dp(Direction::In).with_t0(true).with_t1(true),
            data_buf,
            2,
        );
        let status = rig.lists.td(
            TdFlags(0).with_dp(Direction::Out).with_t0(true).with_t1(true),
            0,
            0,
        );
        let flags = EdFlags(0).with_fa(1).with_dir(Direction::FromTd).with_mps(8);
        let ed = rig.lists.ed(flags, &[setup, data, status]);
        rig.ohci.reg_write(0x20, ed);
        rig.start(1 << 4);

        // nothing happens until CLF is set
        rig.frame();
        assert_eq!(Ed::read(rig.mem.as_ref(), ed).unwrap().head_td(), setup);

        rig.ohci.reg_write(0x08, CommandStatus::CLF.bits());
        rig.frame();
        let ed_back = Ed::read(rig.mem.as_ref(), ed).unwrap();
        assert_eq!(ed_back.head_td(), ed_back.tail);
        for td in [setup, data, status] {
            let td = Td::read(rig.mem.as_ref(), td).unwrap();
            assert_eq!(td.flags.condition(), Some(ConditionCode::NoError));
        }
        // the list stays filled while it had work
        assert!(rig.ohci.status.contains(CommandStatus::CLF));
        rig.frame();
        assert!(!rig.ohci.status.contains(CommandStatus::CLF));
    }

    #[test]
    fn setup_to_data_endpoint_is_unrecoverable() {
        let (mut rig, _script) = rig();
        let buf = rig.lists.buffer(8);
        let td = rig.lists.td(TdFlags(0).with_dp(Direction::Setup), buf, 8);
        let flags = EdFlags(0).with_fa(1).with_en(1).with_dir(Direction::FromTd);
        let ed = rig.lists.ed(flags, &[td]);
        rig.lists.set_interrupt_heads(HCCA, ed);
        rig.start(1 << 2);
        rig.frame();
        assert!(rig.ohci.intr_status.contains(Intr::UE));
        assert!(!rig.ohci.bus_running());
    }

    #[test]
    fn long_ed_chains_are_cut() {
        let (mut rig, _script) = rig();
        // an ED linked to itself
        let ed = rig.lists.ed(in_ed().with_skip(true), &[]);
        let mut looped = Ed::read(rig.mem.as_ref(), ed).unwrap();
        looped.next = ed;
        assert!(looped.write(rig.mem.as_ref(), ed));
        assert!(!rig.ohci.service_ed_list(ed));
        assert!(!rig.ohci.intr_status.contains(Intr::UE));
    }

    #[test]
    fn buffer_crossing_a_page() {
        let (mut rig, script) = rig();
        script.push(Reply::Data((1..=8).collect()));

        // four bytes at the end of one page, four at the start of the next
        let td = rig.lists.td(TdFlags(0).with_rounding(true), 0x3ffc, 8);
        let mut raw = Td::read(rig.mem.as_ref(), td).unwrap();
        raw.be = 0x5003;
        assert!(raw.write(rig.mem.as_ref(), td));
        let ed = rig.lists.ed(in_ed(), &[td]);
        rig.lists.set_interrupt_heads(HCCA, ed);
        rig.start(1 << 2);
        rig.frame();

        let mut lo = [0u8; 4];
        let mut hi = [0u8; 4];
        assert!(rig.mem.read_bytes(GuestAddr(0x3ffc), &mut lo));
        assert!(rig.mem.read_bytes(GuestAddr(0x5000), &mut hi));
        assert_eq!(lo, [1, 2, 3, 4]);
        assert_eq!(hi, [5, 6, 7, 8]);
        assert_eq!(Td::read(rig.mem.as_ref(), td).unwrap().cbp, 0);
    }

    #[test]
    fn zero_max_packet_out_is_unrecoverable() {
        let (mut rig, script) = rig();
        for _ in 0..4 {
            script.push(Reply::Data(vec![]));
        }
        let buf = rig.lists.buffer(8);
        let td = rig.lists.td(TdFlags(0), buf, 8);
        let flags = EdFlags(0).with_fa(1).with_en(1).with_dir(Direction::Out);
        let ed = rig.lists.ed(flags, &[td]);
        rig.ohci.reg_write(0x28, ed);
        rig.start(1 << 5);
        rig.ohci.reg_write(0x08, CommandStatus::BLF.bits());
        rig.frame();

        assert!(rig.ohci.intr_status.contains(Intr::UE));
        assert!(!rig.ohci.bus_running());
        assert_eq!(script.remaining(), 4);
        assert_eq!(Ed::read(rig.mem.as_ref(), ed).unwrap().head_td(), td);
    }

    #[test]
    fn self_linked_td_is_unrecoverable() {
        let (mut rig, script) = rig();
        for _ in 0..4 {
            script.push(Reply::Data(vec![1]));
        }
        let buf = rig.lists.buffer(8);
        let td = rig.lists.td(TdFlags(0), buf, 8);
        let ed = rig.lists.ed(in_ed(), &[td]);
        let mut raw = Td::read(rig.mem.as_ref(), td).unwrap();
        raw.next = td;
        assert!(raw.write(rig.mem.as_ref(), td));
        rig.lists.set_interrupt_heads(HCCA, ed);
        rig.start(1 << 2);
        rig.frame();

        assert!(rig.ohci.intr_status.contains(Intr::UE));
        assert!(!rig.ohci.bus_running());
        assert_eq!(script.remaining(), 4);
    }

    #[test]
    fn reversed_td_buffer_is_unrecoverable() {
        let (mut rig, script) = rig();
        script.push(Reply::Data(vec![1]));
        let buf = rig.lists.buffer(16);
        let td = rig.lists.td(TdFlags(0), buf, 8);
        let mut raw = Td::read(rig.mem.as_ref(), td).unwrap();
        raw.cbp = buf + 8;
        raw.be = buf;
        assert!(raw.write(rig.mem.as_ref(), td));
        let ed = rig.lists.ed(in_ed(), &[td]);
        rig.lists.set_interrupt_heads(HCCA, ed);
        rig.start(1 << 2);
        rig.frame();

        assert!(rig.ohci.intr_status.contains(Intr::UE));
        assert!(!rig.ohci.bus_running());
        assert_eq!(script.remaining(), 1);
    }
}
