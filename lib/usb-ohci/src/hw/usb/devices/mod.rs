// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Built-in peripherals.

use super::proxy::Registry;

pub mod guncon2;

static GUNCON2: guncon2::GunCon2Proxy = guncon2::GunCon2Proxy;

pub(crate) fn register_all(reg: &mut Registry) {
    reg.register(&GUNCON2);
}
