// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bitstruct::bitstruct;
use strum::FromRepr;

#[repr(u8)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestDirection {
    HostToDevice = 0,
    DeviceToHost = 1,
}
impl From<bool> for RequestDirection {
    fn from(value: bool) -> Self {
        if value {
            Self::DeviceToHost
        } else {
            Self::HostToDevice
        }
    }
}
impl Into<bool> for RequestDirection {
    fn into(self) -> bool {
        self as u8 != 0
    }
}

#[repr(u8)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestType {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    Reserved = 3,
}
impl From<u8> for RequestType {
    fn from(value: u8) -> Self {
        Self::from_repr(value & 0b11).unwrap_or(Self::Reserved)
    }
}
impl Into<u8> for RequestType {
    fn into(self) -> u8 {
        self as u8
    }
}

#[repr(u8)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum RequestRecipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
    /// Any of the values 4..=31 reserved by USB 2.0 table 9-2.
    Reserved = 31,
}
impl From<u8> for RequestRecipient {
    fn from(value: u8) -> Self {
        match value {
            0..=3 => Self::from_repr(value).unwrap_or(Self::Reserved),
            _ => Self::Reserved,
        }
    }
}
impl Into<u8> for RequestRecipient {
    fn into(self) -> u8 {
        self as u8
    }
}

#[repr(u8)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum StandardRequest {
    GetStatus = 0,
    ClearFeature = 1,
    Reserved2 = 2,
    SetFeature = 3,
    Reserved4 = 4,
    SetAddress = 5,
    GetDescriptor = 6,
    SetDescriptor = 7,
    GetConfiguration = 8,
    SetConfiguration = 9,
    GetInterface = 10,
    SetInterface = 11,
    SynchFrame = 12,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Standard(StandardRequest),
    Other(u8),
}
impl From<u8> for Request {
    fn from(value: u8) -> Self {
        StandardRequest::from_repr(value)
            .map(Self::Standard)
            .unwrap_or(Self::Other(value))
    }
}
impl Into<u8> for Request {
    fn into(self) -> u8 {
        match self {
            Request::Standard(standard_request) => standard_request as u8,
            Request::Other(x) => x,
        }
    }
}

/// Feature selectors for SET_FEATURE / CLEAR_FEATURE (USB 2.0 table 9-6).
pub const FEATURE_ENDPOINT_HALT: u16 = 0;
pub const FEATURE_DEVICE_REMOTE_WAKEUP: u16 = 1;

/// Combined `bmRequestType << 8 | bRequest` codes, as matched by device
/// control handlers.
pub mod codes {
    pub const DEVICE_REQUEST: u16 = 0x8000;
    pub const DEVICE_OUT_REQUEST: u16 = 0x0000;
    pub const INTERFACE_REQUEST: u16 = 0x8100;
    pub const INTERFACE_OUT_REQUEST: u16 = 0x0100;
    pub const ENDPOINT_REQUEST: u16 = 0x8200;
    pub const ENDPOINT_OUT_REQUEST: u16 = 0x0200;
    pub const CLASS_INTERFACE_REQUEST: u16 = 0xa100;
    pub const CLASS_INTERFACE_OUT_REQUEST: u16 = 0x2100;
    pub const VENDOR_DEVICE_REQUEST: u16 = 0xc000;
    pub const VENDOR_DEVICE_OUT_REQUEST: u16 = 0x4000;
}

bitstruct! {
    /// USB 2.0 table 9-2.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct SetupData(pub u64) {
        /// Part of bRequestType. Whether the request is addressed to the device,
        /// one of its interfaces, one of its endpoints, or otherwise.
        pub recipient: RequestRecipient = 0..5;
        /// Part of bRequestType. Standard, Class, or Vendor.
        pub request_type: RequestType = 5..7;
        /// Part of bRequestType. Data transfer direction.
        pub direction: RequestDirection = 7;
        /// bRequest. Specific type of request (USB 2.0 table 9-3)
        pub request: Request = 8..16;
        /// wValue. Meaning varies according to bRequest.
        pub value: u16 = 16..32;
        /// wIndex. Meaning varies according to bRequest.
        /// Typically used to pass an index or offset.
        pub index: u16 = 32..48;
        /// wLength. Number of bytes to transfer if there is a Data Stage.
        pub length: u16 = 48..64;
    }
}

impl SetupData {
    /// Parses the 8-byte SETUP packet as it appears on the wire.
    pub fn from_bytes(buf: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(buf))
    }

    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// `bmRequestType << 8 | bRequest`, for matching against [codes].
    pub fn code(&self) -> u16 {
        let bytes = self.to_bytes();
        u16::from_be_bytes([bytes[0], bytes[1]])
    }

    pub fn is_device_to_host(&self) -> bool {
        self.direction() == RequestDirection::DeviceToHost
    }
}

impl core::fmt::Debug for SetupData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "SetupData {{ \
                recipient: {:?}, \
                request_type: {:?}, \
                direction: {:?}, \
                request: {:?}, \
                value: {}, \
                index: {}, \
                length: {}, \
            }}",
            self.recipient(),
            self.request_type(),
            self.direction(),
            self.request(),
            self.value(),
            self.index(),
            self.length()
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_get_descriptor() {
        // GET_DESCRIPTOR(Device), 18 bytes
        let setup =
            SetupData::from_bytes([0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x12, 0x00]);
        assert_eq!(setup.recipient(), RequestRecipient::Device);
        assert_eq!(setup.request_type(), RequestType::Standard);
        assert!(setup.is_device_to_host());
        assert_eq!(
            setup.request(),
            Request::Standard(StandardRequest::GetDescriptor)
        );
        assert_eq!(setup.value(), 0x0100);
        assert_eq!(setup.length(), 18);
        assert_eq!(setup.code(), codes::DEVICE_REQUEST | 0x06);
    }

    #[test]
    fn class_request_code() {
        let setup =
            SetupData::from_bytes([0x21, 0x09, 0x00, 0x00, 0x00, 0x00, 0x06, 0x00]);
        assert_eq!(setup.request_type(), RequestType::Class);
        assert_eq!(setup.recipient(), RequestRecipient::Interface);
        assert_eq!(setup.code(), codes::CLASS_INTERFACE_OUT_REQUEST | 0x09);
    }
}
