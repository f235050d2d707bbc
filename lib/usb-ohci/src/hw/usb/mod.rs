// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! USB host controller and peripheral emulation.
//!
//! ```text
//!  +-------------+    frame loop     +------------+
//!  | OhciState   |------------------>| ED/TD      |  (guest memory)
//!  | (registers) |                   | lists      |
//!  +-------------+                   +------------+
//!        | root-hub ports                 |
//!        v                                v  Packet
//!  +-------------+   handle_packet   +------------+
//!  |   Device    |<------------------| queue      |
//!  | DeviceCore  |                   | engine     |
//!  | DeviceModel |                   +------------+
//!  +-------------+
//! ```
//!
//! Devices are created from the [proxy] registry by name, live in the
//! controller's root-hub ports, and are addressed by packets through an
//! [packet::EndpointAddr] rather than by reference.

pub mod devices;
pub mod ohci;
pub mod packet;
pub mod proxy;
pub mod queue;
pub mod usbdev;
