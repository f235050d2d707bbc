// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![allow(clippy::style)]

#[macro_use]
extern crate bitflags;

pub mod common;
pub mod hw;
pub mod intr_pins;
pub mod lifecycle;
pub mod memory;
pub mod migrate;
pub mod subsystem;
pub mod util;

#[cfg(test)]
mod test_util;

pub use subsystem::{FreezeAction, UsbSubsystem};

pub fn version() -> &'static str {
    lazy_static::lazy_static! {
        static ref VERSION: String = format!(
            "v{} (save format {})",
            env!("CARGO_PKG_VERSION"),
            migrate::FORMAT_VERSION,
        );
    };
    &VERSION
}
