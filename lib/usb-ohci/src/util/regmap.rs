// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;
use std::ops::Bound::Included;

#[derive(Debug)]
struct RegDef<ID> {
    id: ID,
    len: usize,
}

/// Represents a mapping of registers within an address space.
#[derive(Debug)]
pub struct RegMap<ID> {
    len: usize,
    regs: BTreeMap<usize, RegDef<ID>>,
}

/// Result of resolving an access against a [RegMap].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RegAccess<'a, ID> {
    pub id: &'a ID,
    /// Offset of the access within the register.
    pub offset: usize,
    /// Width of the register.
    pub reg_len: usize,
}

impl<ID> RegMap<ID> {
    pub fn new(len: usize) -> Self {
        Self { len, regs: BTreeMap::new() }
    }

    /// Length of the mapped space.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn define(&mut self, start: usize, len: usize, id: ID) {
        assert!(len != 0);
        assert!(start + len <= self.len, "register beyond end of map");
        if let Some((s, def)) =
            self.regs.range((Included(0), Included(start + len - 1))).last()
        {
            assert!(s + def.len <= start, "overlapping register at {start:#x}");
        }
        self.regs.insert(start, RegDef { id, len });
    }

    /// Finds the register containing the byte at `offset`.
    ///
    /// An access of `len` bytes which does not fit entirely within that
    /// register does not resolve.
    pub fn lookup(&self, offset: usize, len: usize) -> Option<RegAccess<'_, ID>> {
        if len == 0 || offset.checked_add(len)? > self.len {
            return None;
        }
        let (start, def) =
            self.regs.range((Included(0), Included(offset))).next_back()?;
        let reg_off = offset - start;
        if reg_off + len > def.len {
            return None;
        }
        Some(RegAccess { id: &def.id, offset: reg_off, reg_len: def.len })
    }
}

impl<ID: Copy + Eq> RegMap<ID> {
    /// Lays out `regdef` back to back, starting at offset 0.
    pub fn create_packed(size: usize, regdef: &[(ID, usize)]) -> Self {
        RegMap::create_packed_iter(size, regdef.iter().copied())
    }
    pub fn create_packed_iter(
        size: usize,
        regdef: impl IntoIterator<Item = (ID, usize)>,
    ) -> Self {
        let mut map = RegMap::new(size);
        let mut off = 0;
        for (id, reg_size) in regdef {
            map.define(off, reg_size, id);
            off += reg_size;
        }
        assert_eq!(size, off);

        map
    }
}
