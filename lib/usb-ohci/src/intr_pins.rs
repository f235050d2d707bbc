// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::sync::Mutex;

pub trait IntrPin: Send + Sync + 'static {
    fn assert(&self);
    fn deassert(&self);
    fn is_asserted(&self) -> bool;
    fn set_state(&self, is_asserted: bool) {
        if is_asserted {
            self.assert();
        } else {
            self.deassert();
        }
    }
}

/// Interrupt pin which reports its 0->1 and 1->0 transitions to a host
/// supplied function, e.g. the IOP interrupt controller's USB source.
pub struct FuncPin {
    asserted: Mutex<bool>,
    notify: Box<dyn Fn(bool) + Send + Sync + 'static>,
}
impl FuncPin {
    pub fn new(notify: impl Fn(bool) + Send + Sync + 'static) -> Self {
        Self { asserted: Mutex::new(false), notify: Box::new(notify) }
    }
}
impl IntrPin for FuncPin {
    fn assert(&self) {
        let mut asserted = self.asserted.lock().unwrap();
        if !*asserted {
            *asserted = true;
            (self.notify)(true);
        }
    }
    fn deassert(&self) {
        let mut asserted = self.asserted.lock().unwrap();
        if *asserted {
            *asserted = false;
            (self.notify)(false);
        }
    }
    fn is_asserted(&self) -> bool {
        *self.asserted.lock().unwrap()
    }
}

/// Pin with nothing connected to it.
#[derive(Default)]
pub struct NullPin {
    asserted: Mutex<bool>,
}
impl IntrPin for NullPin {
    fn assert(&self) {
        *self.asserted.lock().unwrap() = true;
    }
    fn deassert(&self) {
        *self.asserted.lock().unwrap() = false;
    }
    fn is_asserted(&self) -> bool {
        *self.asserted.lock().unwrap()
    }
}
