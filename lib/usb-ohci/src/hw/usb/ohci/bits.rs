// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Register fields and in-memory structures of the OHCI 1.0a interface.

use bitstruct::bitstruct;
use strum::FromRepr;

use crate::common::GuestAddr;
use crate::memory::GuestMemory;

/// HcRevision: OHCI 1.0.
pub const REVISION: u32 = 0x10;

/// Mask of the HCCA pointer in HcHCCA (256-byte aligned).
pub const HCCA_MASK: u32 = 0xffff_ff00;

/// Mask of ED and TD pointers (16-byte aligned).
pub const EDPTR_MASK: u32 = 0xffff_fff0;

/// Reset value of HcLSThreshold.
pub const LS_THRESH: u32 = 0x628;

/// Reset values of HcFmInterval.
pub const FSMPS_RESET: u32 = 0x2778;
pub const FI_RESET: u32 = 0x2edf;

/// Interrupt delay value meaning "no delay pending".
pub const DONE_COUNT_IDLE: i32 = 7;

/// Upper bound on the EDs visited per list walk.
pub const ED_LINK_LIMIT: usize = 32;

/// Upper bound on the TD services per ED visit.  A partial transfer that
/// hits it resumes on the next pass over the list.
pub const TD_SERVICE_LIMIT: usize = 256;

/// HcControl Host Controller Functional State.
#[repr(u8)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum FunctionalState {
    Reset = 0,
    Resume = 1,
    Operational = 2,
    Suspend = 3,
}
impl From<u8> for FunctionalState {
    fn from(value: u8) -> Self {
        Self::from_repr(value & 0b11).unwrap_or(Self::Reset)
    }
}
impl Into<u8> for FunctionalState {
    fn into(self) -> u8 {
        self as u8
    }
}

bitstruct! {
    /// HcControl (OHCI 7.1.2).
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Control(pub u32) {
        /// ControlBulkServiceRatio.
        pub cbsr: u8 = 0..2;
        /// PeriodicListEnable.
        pub ple: bool = 2;
        /// IsochronousEnable.
        pub ie: bool = 3;
        /// ControlListEnable.
        pub cle: bool = 4;
        /// BulkListEnable.
        pub ble: bool = 5;
        pub hcfs: FunctionalState = 6..8;
        /// InterruptRouting.
        pub ir: bool = 8;
        /// RemoteWakeupConnected.
        pub rwc: bool = 9;
        /// RemoteWakeupEnable.
        pub rwe: bool = 10;
    }
}

impl Control {
    /// Bits of the list enables, for detecting a list being switched off.
    pub const LIST_ENABLES: u32 = (1 << 4) | (1 << 5);
}

bitflags! {
    /// HcCommandStatus (OHCI 7.1.3).
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct CommandStatus: u32 {
        /// HostControllerReset.
        const HCR = 1 << 0;
        /// ControlListFilled.
        const CLF = 1 << 1;
        /// BulkListFilled.
        const BLF = 1 << 2;
        /// OwnershipChangeRequest.
        const OCR = 1 << 3;
        /// SchedulingOverrunCount; never writable by the guest.
        const SOC = (1 << 6) | (1 << 7);

        const _ = !0;
    }
}

bitflags! {
    /// HcInterruptStatus/Enable/Disable (OHCI 7.1.4-7.1.6).
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct Intr: u32 {
        /// SchedulingOverrun.
        const SO = 1 << 0;
        /// WritebackDoneHead.
        const WD = 1 << 1;
        /// StartofFrame.
        const SF = 1 << 2;
        /// ResumeDetected.
        const RD = 1 << 3;
        /// UnrecoverableError.
        const UE = 1 << 4;
        /// FrameNumberOverflow.
        const FNO = 1 << 5;
        /// RootHubStatusChange.
        const RHSC = 1 << 6;
        /// OwnershipChange.
        const OC = 1 << 30;
        /// MasterInterruptEnable.
        const MIE = 1 << 31;

        const _ = !0;
    }
}

bitflags! {
    /// HcRhDescriptorA (OHCI 7.4.1).
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct RhDescriptorA: u32 {
        /// NoPowerSwitching.
        const NPS = 1 << 9;

        const _ = !0;
    }
}

/// Guest-writable bits of HcRhDescriptorA.
pub const RHA_RW_MASK: u32 = 0;

bitflags! {
    /// HcRhStatus (OHCI 7.4.3).
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct RhStatus: u32 {
        /// LocalPowerStatus (write: ClearGlobalPower).
        const LPS = 1 << 0;
        /// OverCurrentIndicator.
        const OCI = 1 << 1;
        /// DeviceRemoteWakeupEnable (write: SetRemoteWakeupEnable).
        const DRWE = 1 << 15;
        /// LocalPowerStatusChange (write: SetGlobalPower).
        const LPSC = 1 << 16;
        /// OverCurrentIndicatorChange.
        const OCIC = 1 << 17;
        /// ClearRemoteWakeupEnable.
        const CRWE = 1 << 31;

        const _ = !0;
    }
}

bitflags! {
    /// HcRhPortStatus (OHCI 7.4.4).
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct PortStatus: u32 {
        /// CurrentConnectStatus.
        const CCS = 1 << 0;
        /// PortEnableStatus.
        const PES = 1 << 1;
        /// PortSuspendStatus.
        const PSS = 1 << 2;
        /// PortOverCurrentIndicator.
        const POCI = 1 << 3;
        /// PortResetStatus.
        const PRS = 1 << 4;
        /// PortPowerStatus.
        const PPS = 1 << 8;
        /// LowSpeedDeviceAttached (write: ClearPortPower).
        const LSDA = 1 << 9;
        /// ConnectStatusChange.
        const CSC = 1 << 16;
        /// PortEnableStatusChange.
        const PESC = 1 << 17;
        /// PortSuspendStatusChange.
        const PSSC = 1 << 18;
        /// PortOverCurrentIndicatorChange.
        const OCIC = 1 << 19;
        /// PortResetStatusChange.
        const PRSC = 1 << 20;

        /// Change bits, cleared by writing 1.
        const WTC = Self::CSC.bits()
            | Self::PESC.bits()
            | Self::PSSC.bits()
            | Self::OCIC.bits()
            | Self::PRSC.bits();

        const _ = !0;
    }
}

bitflags! {
    /// HcFmInterval (OHCI 7.3.1).
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct FmInterval: u32 {
        /// FrameInterval.
        const FI = 0x3fff;
        /// FSLargestDataPacket.
        const FSMPS = 0xffff_0000;
        /// FrameIntervalToggle.
        const FIT = 1 << 31;
    }
}

/// Direction of an ED or TD.
#[repr(u8)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    Setup = 0,
    Out = 1,
    In = 2,
    /// In an ED: take the direction from the TD.
    FromTd = 3,
}
impl From<u8> for Direction {
    fn from(value: u8) -> Self {
        Self::from_repr(value & 0b11).unwrap_or(Self::FromTd)
    }
}
impl Into<u8> for Direction {
    fn into(self) -> u8 {
        self as u8
    }
}

/// TD ConditionCode (OHCI table 4-7).
#[repr(u8)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConditionCode {
    NoError = 0,
    Crc = 1,
    BitStuffing = 2,
    DataToggleMismatch = 3,
    Stall = 4,
    DeviceNotResponding = 5,
    PidCheckFailure = 6,
    UnexpectedPid = 7,
    DataOverrun = 8,
    DataUnderrun = 9,
    BufferOverrun = 12,
    BufferUnderrun = 13,
    NotAccessed = 15,
}

bitstruct! {
    /// Dword 0 of an Endpoint Descriptor (OHCI 4.2.1).
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct EdFlags(pub u32) {
        /// FunctionAddress.
        pub fa: u8 = 0..7;
        /// EndpointNumber.
        pub en: u8 = 7..11;
        pub dir: Direction = 11..13;
        /// Low speed.
        pub speed: bool = 13;
        /// sKip.
        pub skip: bool = 14;
        /// Isochronous TD format.
        pub iso: bool = 15;
        /// MaximumPacketSize.
        pub mps: u16 = 16..27;
    }
}

/// ED TD Queue Head pointer flags.
pub const ED_HEAD_HALTED: u32 = 1 << 0;
pub const ED_HEAD_CARRY: u32 = 1 << 1;

bitstruct! {
    /// Dword 0 of a General Transfer Descriptor (OHCI 4.3.1).
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct TdFlags(pub u32) {
        /// bufferRounding: short packets are not an error.
        pub rounding: bool = 18;
        /// Direction/PID.
        pub dp: Direction = 19..21;
        /// DelayInterrupt.
        pub di: u8 = 21..24;
        /// Data toggle LSB.
        pub t0: bool = 24;
        /// Data toggle taken from the TD rather than the ED.
        pub t1: bool = 25;
        /// ErrorCount.
        pub ec: u8 = 26..28;
        pub cc: u8 = 28..32;
    }
}

impl TdFlags {
    pub fn condition(&self) -> Option<ConditionCode> {
        ConditionCode::from_repr(self.cc())
    }
    pub fn with_condition(self, cc: ConditionCode) -> Self {
        self.with_cc(cc as u8)
    }
}

/// Endpoint Descriptor.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Ed {
    pub flags: EdFlags,
    pub tail: u32,
    pub head: u32,
    pub next: u32,
}

impl Ed {
    pub const SIZE: usize = 16;

    pub fn read(mem: &dyn GuestMemory, addr: u32) -> Option<Self> {
        let [flags, tail, head, next] = read_dwords(mem, addr)?;
        Some(Self { flags: EdFlags(flags), tail, head, next })
    }

    pub fn write(&self, mem: &dyn GuestMemory, addr: u32) -> bool {
        write_dwords(mem, addr, [self.flags.0, self.tail, self.head, self.next])
    }

    /// Address of the first TD queued on the ED.
    pub fn head_td(&self) -> u32 {
        self.head & EDPTR_MASK
    }

    pub fn halted(&self) -> bool {
        self.head & ED_HEAD_HALTED != 0
    }
}

/// General Transfer Descriptor.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Td {
    pub flags: TdFlags,
    /// CurrentBufferPointer.
    pub cbp: u32,
    pub next: u32,
    /// BufferEnd.
    pub be: u32,
}

impl Td {
    pub const SIZE: usize = 16;

    pub fn read(mem: &dyn GuestMemory, addr: u32) -> Option<Self> {
        let [flags, cbp, next, be] = read_dwords(mem, addr)?;
        Some(Self { flags: TdFlags(flags), cbp, next, be })
    }

    pub fn write(&self, mem: &dyn GuestMemory, addr: u32) -> bool {
        write_dwords(mem, addr, [self.flags.0, self.cbp, self.next, self.be])
    }
}

/// The parts of the Host Controller Communications Area the controller
/// uses (OHCI 4.4).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Hcca {
    /// Heads of the 32 interrupt ED lists.
    pub intr: [u32; 32],
    pub frame: u16,
    pub pad: u16,
    pub done: u32,
}

impl Hcca {
    pub const INTR_OFFSET: usize = 0x00;
    pub const FRAME_OFFSET: usize = 0x80;
    pub const DONE_OFFSET: usize = 0x84;

    pub fn read(mem: &dyn GuestMemory, addr: u32) -> Option<Self> {
        let mut buf = [0u8; 0x88];
        mem.read_bytes(GuestAddr(addr), &mut buf).then_some(())?;
        let mut intr = [0u32; 32];
        for (i, chunk) in buf[..0x80].chunks_exact(4).enumerate() {
            intr[i] = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        let dword = |off: usize| {
            u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
        };
        let frame_word = dword(Self::FRAME_OFFSET);
        Some(Self {
            intr,
            frame: frame_word as u16,
            pad: (frame_word >> 16) as u16,
            done: dword(Self::DONE_OFFSET),
        })
    }

    /// Writes back the controller-owned fields: the frame number and the
    /// done queue head.
    pub fn write(&self, mem: &dyn GuestMemory, addr: u32) -> bool {
        let frame_word = u32::from(self.frame) | (u32::from(self.pad) << 16);
        let mut buf = [0u8; 8];
        buf[..4].copy_from_slice(&frame_word.to_le_bytes());
        buf[4..].copy_from_slice(&self.done.to_le_bytes());
        mem.write_bytes(GuestAddr(addr) + Self::FRAME_OFFSET, &buf)
    }
}

fn read_dwords(mem: &dyn GuestMemory, addr: u32) -> Option<[u32; 4]> {
    let mut buf = [0u8; 16];
    mem.read_bytes(GuestAddr(addr), &mut buf).then_some(())?;
    let mut out = [0u32; 4];
    for (v, chunk) in out.iter_mut().zip(buf.chunks_exact(4)) {
        *v = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Some(out)
}

fn write_dwords(mem: &dyn GuestMemory, addr: u32, dwords: [u32; 4]) -> bool {
    let mut buf = [0u8; 16];
    for (chunk, v) in buf.chunks_exact_mut(4).zip(dwords) {
        chunk.copy_from_slice(&v.to_le_bytes());
    }
    mem.write_bytes(GuestAddr(addr), &buf)
}
