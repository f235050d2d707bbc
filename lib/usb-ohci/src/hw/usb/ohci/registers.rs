// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Operational register layout (OHCI 1.0a section 7).

use crate::util::regmap::RegMap;

use super::{NUM_PORTS, OHCI_LEN};

use lazy_static::lazy_static;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OhciReg {
    Revision,
    Control,
    CommandStatus,
    InterruptStatus,
    /// Writing sets interrupt enables; reads return the enable mask.
    InterruptEnable,
    /// Writing clears interrupt enables; reads return the enable mask.
    InterruptDisable,
    Hcca,
    PeriodCurrentEd,
    ControlHeadEd,
    ControlCurrentEd,
    BulkHeadEd,
    BulkCurrentEd,
    DoneHead,
    FmInterval,
    FmRemaining,
    FmNumber,
    PeriodicStart,
    LsThreshold,
    RhDescriptorA,
    RhDescriptorB,
    RhStatus,
    /// Status/control of a guest-visible downstream port.
    RhPortStatus(u8),
    Reserved,
}

lazy_static! {
    pub static ref OHCI_REGS: RegMap<OhciReg> = {
        use OhciReg::*;
        let layout = [
            (Revision, 4),
            (Control, 4),
            (CommandStatus, 4),
            (InterruptStatus, 4),
            (InterruptEnable, 4),
            (InterruptDisable, 4),
            (Hcca, 4),
            (PeriodCurrentEd, 4),
            (ControlHeadEd, 4),
            (ControlCurrentEd, 4),
            (BulkHeadEd, 4),
            (BulkCurrentEd, 4),
            (DoneHead, 4),
            (FmInterval, 4),
            (FmRemaining, 4),
            (FmNumber, 4),
            (PeriodicStart, 4),
            (LsThreshold, 4),
            (RhDescriptorA, 4),
            (RhDescriptorB, 4),
            (RhStatus, 4),
        ];
        let ports = (0..NUM_PORTS as u8).map(|i| (RhPortStatus(i), 4));
        let used = (layout.len() + NUM_PORTS) * 4;
        RegMap::create_packed_iter(
            OHCI_LEN,
            layout
                .into_iter()
                .chain(ports)
                .chain([(Reserved, OHCI_LEN - used)]),
        )
    };
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layout() {
        let reg = |off| OHCI_REGS.lookup(off, 4).map(|a| *a.id);
        assert_eq!(reg(0x00), Some(OhciReg::Revision));
        assert_eq!(reg(0x34), Some(OhciReg::FmInterval));
        assert_eq!(reg(0x50), Some(OhciReg::RhStatus));
        assert_eq!(reg(0x54), Some(OhciReg::RhPortStatus(0)));
        assert_eq!(reg(0x58), Some(OhciReg::RhPortStatus(1)));
        assert_eq!(reg(0x5c), Some(OhciReg::Reserved));
        assert_eq!(reg(0xfc), Some(OhciReg::Reserved));
        assert!(OHCI_REGS.lookup(0x06, 4).is_none());
        assert!(OHCI_REGS.lookup(0x100, 4).is_none());
    }
}
