// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::ops::{Add, BitAnd};

/// An address within the guest's (32-bit) physical address space.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Ord, PartialOrd)]
pub struct GuestAddr(pub u32);

impl GuestAddr {
    /// Offset of this address within its page.
    pub const fn page_offset(&self) -> usize {
        self.0 as usize & PAGE_OFFSET
    }

    /// Base address of the page this address lies within.
    pub const fn page_base(&self) -> Self {
        Self(self.0 & !(PAGE_OFFSET as u32))
    }
}

impl Add<usize> for GuestAddr {
    type Output = Self;

    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0.wrapping_add(rhs as u32))
    }
}
impl BitAnd<u32> for GuestAddr {
    type Output = Self;

    fn bitand(self, rhs: u32) -> Self::Output {
        Self(self.0 & rhs)
    }
}

pub const PAGE_OFFSET: usize = 0xfff;

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn page_math() {
        let addr = GuestAddr(0x1234_5678);
        assert_eq!(addr.page_offset(), 0x678);
        assert_eq!(addr.page_base(), GuestAddr(0x1234_5000));
        assert_eq!(GuestAddr(u32::MAX) + 1, GuestAddr(0));
    }
}
