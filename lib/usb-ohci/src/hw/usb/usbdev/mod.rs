// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use descriptor::DescriptorType;
use requests::Request;
use strum::FromRepr;

pub mod descriptor;
pub mod device;
pub mod endpoint;
pub mod requests;

pub use device::{Device, DeviceCore, DeviceModel};
pub use endpoint::Endpoint;

pub use crate::hw::usb::packet::MAX_INTERFACES;

/// Size of a device's control-transfer data buffer.
pub const DATA_BUF_SIZE: usize = 4096;

/// Reasons the device core declined a standard request.  A model which sees
/// one of these either handles the request itself or stalls it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unimplemented request {0:?}")]
    UnimplementedRequest(Request),
    #[error("unimplemented descriptor type: {0:?}")]
    UnimplementedDescriptor(DescriptorType),
    #[error("unknown descriptor type: {0:#x}")]
    UnknownDescriptorType(u8),
    #[error("no {0:?} descriptor at index {1}")]
    NoSuchDescriptor(DescriptorType, u8),
    #[error("invalid device address {0}")]
    InvalidAddress(u16),
    #[error("no configuration with value {0}")]
    NoSuchConfiguration(u8),
    #[error("no interface {0} with alternate setting {1}")]
    NoSuchInterface(u16, u16),
    #[error("invalid endpoint {0:#x}")]
    InvalidEndpoint(u16),
}

pub type Result<T> = core::result::Result<T, Error>;

#[repr(u8)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum Speed {
    Low = 0,
    Full = 1,
    High = 2,
}

/// Enumeration state of a device, in the order a device passes through them.
#[repr(u8)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeviceState {
    NotAttached = 0,
    Attached = 1,
    Default = 2,
    Addressed = 3,
    Configured = 4,
}

/// Progress through a control transfer on endpoint 0.
#[repr(u8)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum SetupState {
    Idle = 0,
    Setup = 1,
    Data = 2,
    Ack = 3,
}

pub mod migrate {
    use crate::hw::usb::packet::MAX_ENDPOINTS;
    use crate::migrate::{StateReader, StateWriter};

    use super::{DATA_BUF_SIZE, MAX_INTERFACES};

    pub const DEVICE_MARKER: &str = "USBDevice";

    /// Number of endpoints serialized per device: control, then IN, then OUT.
    pub const NUM_ENDPOINTS: usize = 1 + 2 * MAX_ENDPOINTS;

    #[derive(Clone, Debug, Default, PartialEq, Eq)]
    pub struct EndpointV1 {
        pub pipeline: bool,
        pub halted: bool,
    }

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct DeviceV1 {
        pub speed: u8,
        pub addr: u8,
        pub state: u8,
        pub setup_buf: [u8; 8],
        pub data_buf: Vec<u8>,
        pub remote_wakeup: bool,
        pub setup_state: u8,
        pub setup_len: i32,
        pub setup_index: i32,
        pub configuration: u8,
        pub altsetting: [u8; MAX_INTERFACES],
        pub endpoints: Vec<EndpointV1>,
    }

    impl DeviceV1 {
        pub fn write(&self, w: &mut StateWriter) -> crate::migrate::Result<()> {
            w.marker(DEVICE_MARKER)?;
            w.u8(self.speed)?;
            w.u8(self.addr)?;
            w.u8(self.state)?;
            w.bytes(&self.setup_buf)?;
            w.bytes(&self.data_buf)?;
            w.bool(self.remote_wakeup)?;
            w.u8(self.setup_state)?;
            w.i32(self.setup_len)?;
            w.i32(self.setup_index)?;
            w.u8(self.configuration)?;
            w.bytes(&self.altsetting)?;
            for ep in self.endpoints.iter() {
                w.bool(ep.pipeline)?;
                w.bool(ep.halted)?;
            }
            Ok(())
        }

        pub fn read(r: &mut StateReader) -> crate::migrate::Result<Self> {
            r.expect_marker(DEVICE_MARKER)?;
            let speed = r.u8()?;
            let addr = r.u8()?;
            let state = r.u8()?;
            let mut setup_buf = [0u8; 8];
            r.bytes(&mut setup_buf)?;
            let mut data_buf = vec![0u8; DATA_BUF_SIZE];
            r.bytes(&mut data_buf)?;
            let remote_wakeup = r.bool()?;
            let setup_state = r.u8()?;
            let setup_len = r.i32()?;
            let setup_index = r.i32()?;
            let configuration = r.u8()?;
            let mut altsetting = [0u8; MAX_INTERFACES];
            r.bytes(&mut altsetting)?;
            let mut endpoints = Vec::with_capacity(NUM_ENDPOINTS);
            for _ in 0..NUM_ENDPOINTS {
                endpoints
                    .push(EndpointV1 { pipeline: r.bool()?, halted: r.bool()? });
            }
            Ok(Self {
                speed,
                addr,
                state,
                setup_buf,
                data_buf,
                remote_wakeup,
                setup_state,
                setup_len,
                setup_index,
                configuration,
                altsetting,
                endpoints,
            })
        }
    }
}
