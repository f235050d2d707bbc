// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Guest physical memory, as seen by the controller's bus-master engine.

use std::sync::Mutex;

use crate::common::GuestAddr;

/// Bus-master access to guest memory.
///
/// Accesses which fall (even partially) outside of memory fail as a whole;
/// the controller treats such a failure as a bus error.
pub trait GuestMemory: Send + Sync + 'static {
    /// Fills `buf` from guest memory at `addr`.
    fn read_bytes(&self, addr: GuestAddr, buf: &mut [u8]) -> bool;

    /// Copies `data` into guest memory at `addr`.
    fn write_bytes(&self, addr: GuestAddr, data: &[u8]) -> bool;

    fn read_u32(&self, addr: GuestAddr) -> Option<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(addr, &mut buf).then(|| u32::from_le_bytes(buf))
    }

    fn write_u32(&self, addr: GuestAddr, val: u32) -> bool {
        self.write_bytes(addr, &val.to_le_bytes())
    }

    fn read_u16(&self, addr: GuestAddr) -> Option<u16> {
        let mut buf = [0u8; 2];
        self.read_bytes(addr, &mut buf).then(|| u16::from_le_bytes(buf))
    }

    fn write_u16(&self, addr: GuestAddr, val: u16) -> bool {
        self.write_bytes(addr, &val.to_le_bytes())
    }
}

/// Guest memory backed by a flat buffer starting at guest address 0.
pub struct VecMemory {
    mem: Mutex<Vec<u8>>,
}

impl VecMemory {
    pub fn new(size: usize) -> Self {
        Self { mem: Mutex::new(vec![0; size]) }
    }

    pub fn len(&self) -> usize {
        self.mem.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn range(
        addr: GuestAddr,
        len: usize,
        size: usize,
    ) -> Option<std::ops::Range<usize>> {
        let start = addr.0 as usize;
        let end = start.checked_add(len)?;
        (end <= size).then_some(start..end)
    }
}

impl GuestMemory for VecMemory {
    fn read_bytes(&self, addr: GuestAddr, buf: &mut [u8]) -> bool {
        let mem = self.mem.lock().unwrap();
        match Self::range(addr, buf.len(), mem.len()) {
            Some(r) => {
                buf.copy_from_slice(&mem[r]);
                true
            }
            None => false,
        }
    }

    fn write_bytes(&self, addr: GuestAddr, data: &[u8]) -> bool {
        let mut mem = self.mem.lock().unwrap();
        let size = mem.len();
        match Self::range(addr, data.len(), size) {
            Some(r) => {
                mem[r].copy_from_slice(data);
                true
            }
            None => false,
        }
    }
}
