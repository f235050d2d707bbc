// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use bitstruct::bitstruct;
use strum::FromRepr;

#[repr(transparent)]
#[derive(Copy, Clone)]
pub struct Bcd16(pub u16);
impl core::fmt::Debug for Bcd16 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bcd16({:#x})", self.0)
    }
}

pub const USB_VER_1_0: Bcd16 = Bcd16(0x100);
pub const USB_VER_1_1: Bcd16 = Bcd16(0x110);

#[repr(transparent)]
#[derive(Copy, Clone, Debug)]
pub struct ClassCode(pub u8);
#[repr(transparent)]
#[derive(Copy, Clone, Debug)]
pub struct SubclassCode(pub u8);
#[repr(transparent)]
#[derive(Copy, Clone, Debug)]
pub struct ProtocolCode(pub u8);

#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub enum MaxSizeZeroEP {
    _8 = 8,
    _16 = 16,
    _32 = 32,
    _64 = 64,
}

#[repr(transparent)]
#[derive(Copy, Clone, Debug)]
pub struct VendorId(pub u16);
#[repr(transparent)]
#[derive(Copy, Clone, Debug)]
pub struct ProductId(pub u16);
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct StringIndex(pub u8);
#[repr(transparent)]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ConfigurationValue(pub u8);

bitstruct! {
    #[derive(Copy, Clone, Debug)]
    pub struct ConfigurationAttributes(pub u8) {
        reserved: u8 = 0..5;
        pub remote_wakeup: bool = 5;
        pub self_powered: bool = 6;
        /// Reserved, but set to 1
        pub one: bool = 7;
    }
}
impl Default for ConfigurationAttributes {
    fn default() -> Self {
        Self(0).with_one(true)
    }
}

/// USB 2.0 table 9-13, bmAttributes bits 1..0.
#[repr(u8)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransferType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}
impl From<u8> for TransferType {
    fn from(value: u8) -> Self {
        match value & 0b11 {
            0 => Self::Control,
            1 => Self::Isochronous,
            2 => Self::Bulk,
            _ => Self::Interrupt,
        }
    }
}
impl Into<u8> for TransferType {
    fn into(self) -> u8 {
        self as u8
    }
}

bitstruct! {
    #[derive(Copy, Clone, Debug)]
    pub struct EndpointAttributes(pub u8) {
        pub transfer_type: TransferType = 0..2;
        pub isoch_synch_type: u8 = 2..4;
        pub isoch_usage_type: u8 = 4..6;
        reserved: u8 = 6..8;
    }
}
impl Default for EndpointAttributes {
    fn default() -> Self {
        Self(0)
    }
}

/// USB 2.0 table 9-5
#[repr(u8)]
#[derive(FromRepr, Copy, Clone, Debug, PartialEq, Eq)]
pub enum DescriptorType {
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
    DeviceQualifier = 6,
    OtherSpeedConfiguration = 7,
    InterfacePower = 8,
    // OTG and Embedded Host Supplement v1.1a
    OnTheGo = 9,
    Debug = 10,
    InterfaceAssociation = 11,
    HID = 33,
}

#[derive(Debug, Copy, Clone)]
pub enum LanguageId {
    Known(KnownLanguageId),
    Other(u16),
}
impl From<&LanguageId> for u16 {
    fn from(value: &LanguageId) -> Self {
        match value {
            LanguageId::Known(langid) => *langid as u16,
            LanguageId::Other(x) => *x,
        }
    }
}
impl From<&u16> for LanguageId {
    fn from(value: &u16) -> Self {
        KnownLanguageId::from_repr(*value)
            .map(Self::Known)
            .unwrap_or(Self::Other(*value))
    }
}

#[repr(u16)]
#[derive(FromRepr, Copy, Clone, Debug)]
pub enum KnownLanguageId {
    EnglishUS = 0x0409,
}

#[repr(transparent)]
#[derive(Copy, Clone, Debug)]
pub struct InterfaceClass(pub u8);
#[repr(transparent)]
#[derive(Copy, Clone, Debug)]
pub struct InterfaceSubclass(pub u8);
#[repr(transparent)]
#[derive(Copy, Clone, Debug)]
pub struct InterfaceProtocol(pub u8);

pub trait Descriptor: core::fmt::Debug {
    /// bLength. Size of serialized descriptor in bytes.
    fn length(&self) -> u8;

    fn descriptor_type(&self) -> DescriptorType;

    fn header(&self) -> [u8; 2] {
        [self.length(), self.descriptor_type() as u8]
    }

    fn serialize(&self) -> Box<dyn Iterator<Item = u8> + '_>;
}

/// Used in Configuration Descriptor's computation of wTotalLength to give
/// the size of all the descriptors provided when GET_DESCRIPTOR(Configuration)
/// is requested, and to follow Configuration Descriptor's own serialization
/// with their own payloads.
pub trait NestedDescriptor: Descriptor {
    fn total_length(&self) -> u16;
    fn serialize_all(&self) -> Box<dyn Iterator<Item = u8> + '_>;
}

/// Device Descriptor, along with everything reachable from it.
#[derive(Debug)]
pub struct DeviceDescriptor {
    /// bcdUSB. USB version in binary-coded decimal.
    pub usb_version: Bcd16,
    /// bDeviceClass.
    pub device_class: ClassCode,
    /// bDeviceSubClass.
    pub device_subclass: SubclassCode,
    /// bDeviceProtocol.
    pub device_protocol: ProtocolCode,
    /// bMaxPacketSize0.
    pub max_packet_size_0: MaxSizeZeroEP,
    /// idVendor.
    pub vendor_id: VendorId,
    /// idProduct.
    pub product_id: ProductId,
    /// bcdDevice.
    pub device_version: Bcd16,
    /// iManufacturer.
    pub manufacturer_name: StringIndex,
    /// iProduct.
    pub product_name: StringIndex,
    /// iSerial.
    pub serial: StringIndex,

    /// bNumConfigurations (u8) is the length of:
    pub configurations: Vec<ConfigurationDescriptor>,

    /// String table.  Entry `n` is served for string index `n + 1`; index 0
    /// is the language list.
    pub strings: Vec<&'static str>,
}

impl DeviceDescriptor {
    pub fn configuration(
        &self,
        value: ConfigurationValue,
    ) -> Option<&ConfigurationDescriptor> {
        self.configurations.iter().find(|c| c.config_value == value)
    }

    /// Serialized String Descriptor for `index`, if one exists.
    pub fn string(&self, index: u8) -> Option<Vec<u8>> {
        if index == 0 {
            let langs = StringLanguageIdentifierDescriptor {
                language_ids: vec![LanguageId::Known(
                    KnownLanguageId::EnglishUS,
                )],
            };
            return Some(langs.serialize().collect());
        }
        let string = self.strings.get(usize::from(index) - 1)?;
        Some(StringDescriptor { string: string.to_string() }.serialize().collect())
    }
}

impl Descriptor for DeviceDescriptor {
    /// bLength is 18 for Device Descriptor.
    fn length(&self) -> u8 {
        18
    }

    /// bDescriptorType is 1 for Device Descriptor.
    fn descriptor_type(&self) -> DescriptorType {
        DescriptorType::Device
    }

    /// USB 2.0 table 9-8
    fn serialize(&self) -> Box<dyn Iterator<Item = u8> + '_> {
        Box::new(
            self.header()
                .into_iter() // 0, 1
                .chain(self.usb_version.0.to_le_bytes()) // 2-3
                .chain([
                    self.device_class.0,          // 4
                    self.device_subclass.0,       // 5
                    self.device_protocol.0,       // 6
                    self.max_packet_size_0 as u8, // 7
                ])
                .chain(self.vendor_id.0.to_le_bytes()) // 8-9
                .chain(self.product_id.0.to_le_bytes()) // 10-11
                .chain(self.device_version.0.to_le_bytes()) // 12-13
                .chain([
                    self.manufacturer_name.0,        // 14
                    self.product_name.0,             // 15
                    self.serial.0,                   // 16
                    self.configurations.len() as u8, // 17
                ]),
        )
    }
}

#[derive(Debug)]
pub struct ConfigurationDescriptor {
    /// wTotalLength (u16) is calculated based on serialization of,
    /// and bNumInterfaces (u8) is the length of:
    pub interfaces: Vec<InterfaceDescriptor>,

    /// bConfigurationValue.
    pub config_value: ConfigurationValue,

    /// iConfiguration.
    pub configuration_name: StringIndex,

    /// bmAttributes.
    pub attributes: ConfigurationAttributes,

    /// bMaxPower, in 2mA units.
    pub max_power: u8,
}

impl ConfigurationDescriptor {
    /// Number of distinct interface numbers (alternate settings of one
    /// interface share a number).
    pub fn num_interfaces(&self) -> usize {
        let mut nums: Vec<u8> =
            self.interfaces.iter().map(|i| i.interface_num).collect();
        nums.sort_unstable();
        nums.dedup();
        nums.len()
    }

    pub fn interface(
        &self,
        interface_num: u8,
        alternate_setting: u8,
    ) -> Option<&InterfaceDescriptor> {
        self.interfaces.iter().find(|i| {
            i.interface_num == interface_num
                && i.alternate_setting == alternate_setting
        })
    }
}

impl Descriptor for ConfigurationDescriptor {
    /// bLength is 9 for Configuration Descriptor.
    /// (The combined length of other descriptors provided alongside it
    /// are given in wTotalLength)
    fn length(&self) -> u8 {
        9
    }

    /// bDescriptorType. 2 for Configuration Descriptor.
    fn descriptor_type(&self) -> DescriptorType {
        DescriptorType::Configuration
    }

    /// USB 2.0 table 9-10
    fn serialize(&self) -> Box<dyn Iterator<Item = u8> + '_> {
        // wTotalLength. Total length of all data returned when requesting
        // this descriptor, including interface and endpoint descriptors.
        let total_length = self.length() as u16
            + self
                .interfaces
                .iter()
                .map(NestedDescriptor::total_length)
                .sum::<u16>();
        Box::new(
            self.header()
                .into_iter() // 0, 1
                .chain(total_length.to_le_bytes()) // 2-3
                .chain([
                    self.num_interfaces() as u8, // 4
                    self.config_value.0,         // 5
                    self.configuration_name.0,   // 6
                    self.attributes.0,           // 7
                    self.max_power,              // 8
                ])
                .chain(
                    self.interfaces
                        .iter()
                        .flat_map(NestedDescriptor::serialize_all),
                ),
        )
    }
}

#[derive(Debug)]
pub struct InterfaceDescriptor {
    /// bInterfaceNumber
    pub interface_num: u8,

    /// bAlternateSetting.
    pub alternate_setting: u8,

    /// bNumEndpoints is the length of:
    pub endpoints: Vec<EndpointDescriptor>,

    /// bInterfaceClass.
    pub class: InterfaceClass, // u8

    /// bInterfaceSubClass.
    pub subclass: InterfaceSubclass, // u8

    /// bInterfaceProtocol.
    pub protocol: InterfaceProtocol, // u8,

    /// iInterface.
    pub interface_name: StringIndex, // u8
}

impl Descriptor for InterfaceDescriptor {
    /// bLength is 9 for Interface Descriptor.
    fn length(&self) -> u8 {
        9
    }

    /// bDescriptorType. 4 for Interface Descriptor.
    fn descriptor_type(&self) -> DescriptorType {
        DescriptorType::Interface
    }

    /// USB 2.0 table 9-12
    fn serialize(&self) -> Box<dyn Iterator<Item = u8> + '_> {
        Box::new(
            self.header()
                .into_iter() // 0, 1
                .chain([
                    self.interface_num,         // 2
                    self.alternate_setting,     // 3
                    self.endpoints.len() as u8, // 4
                    self.class.0,               // 5
                    self.subclass.0,            // 6
                    self.protocol.0,            // 7
                    self.interface_name.0,      // 8
                ]),
        )
    }
}

impl NestedDescriptor for InterfaceDescriptor {
    fn total_length(&self) -> u16 {
        self.length() as u16
            + self
                .endpoints
                .iter()
                .map(|endpoint| endpoint.total_length())
                .sum::<u16>()
    }

    fn serialize_all(&self) -> Box<dyn Iterator<Item = u8> + '_> {
        Box::new(
            self.serialize().chain(
                self.endpoints.iter().flat_map(NestedDescriptor::serialize_all),
            ),
        )
    }
}

#[derive(Debug)]
pub struct EndpointDescriptor {
    /// bEndpointAddress.  Bit 7 set for IN endpoints.
    pub endpoint_addr: u8,

    /// bmAttributes.
    pub attributes: EndpointAttributes,

    /// wMaxPacketSize. Largest packet endpoint is capable of transmitting.
    pub max_packet_size: u16,

    /// bInterval. Interval for polling transfers in frames on Interrupt and Isoch endpoints.
    /// Always 1 for Isoch. Ignored for Bulk and Control endpoints.
    pub interval: u8,
}

impl EndpointDescriptor {
    pub fn number(&self) -> u8 {
        self.endpoint_addr & 0xf
    }

    pub fn is_in(&self) -> bool {
        self.endpoint_addr & 0x80 != 0
    }
}

impl Descriptor for EndpointDescriptor {
    /// bLength. 7 for Endpoint Descriptor.
    fn length(&self) -> u8 {
        7
    }

    /// bDescriptorType. 5 for Endpoint Descriptor.
    fn descriptor_type(&self) -> DescriptorType {
        DescriptorType::Endpoint
    }

    /// USB 2.0 table 9-13
    fn serialize(&self) -> Box<dyn Iterator<Item = u8> + '_> {
        Box::new(
            self.header()
                .into_iter() // 0, 1
                .chain([self.endpoint_addr, self.attributes.0]) // 2, 3
                .chain(self.max_packet_size.to_le_bytes()) // 4-5
                .chain([self.interval]), // 6
        )
    }
}

impl NestedDescriptor for EndpointDescriptor {
    fn total_length(&self) -> u16 {
        self.length() as u16
    }

    fn serialize_all(&self) -> Box<dyn Iterator<Item = u8> + '_> {
        self.serialize()
    }
}

#[derive(Debug)]
pub struct StringDescriptor {
    /// bString. Uses UTF-16 encoding in payloads.
    pub string: String,
}

impl Descriptor for StringDescriptor {
    fn length(&self) -> u8 {
        (self.header().len()
            + (self.string.encode_utf16().count() * std::mem::size_of::<u16>()))
            as u8
    }

    /// bDescriptorType. 3 for String Descriptor.
    fn descriptor_type(&self) -> DescriptorType {
        DescriptorType::String
    }

    fn serialize(&self) -> Box<dyn Iterator<Item = u8> + '_> {
        let utf16: Vec<u16> = self.string.encode_utf16().collect();
        let length = 2 + (utf16.len() * std::mem::size_of::<u16>()) as u8;
        Box::new(
            [length, self.descriptor_type() as u8]
                .into_iter()
                .chain(utf16.into_iter().flat_map(|w| w.to_le_bytes())),
        )
    }
}

/// special-case for GET_DESCRIPTOR(String, 0)
#[derive(Debug)]
pub struct StringLanguageIdentifierDescriptor {
    /// wLANGID.
    pub language_ids: Vec<LanguageId>,
}

impl Descriptor for StringLanguageIdentifierDescriptor {
    /// bLength.
    fn length(&self) -> u8 {
        (self.header().len() + (self.language_ids.len() * std::mem::size_of::<u16>()))
            as u8
    }

    /// bDescriptorType. 3, as it was with String Descriptor
    fn descriptor_type(&self) -> DescriptorType {
        DescriptorType::String
    }

    fn serialize(&self) -> Box<dyn Iterator<Item = u8> + '_> {
        Box::new(
            self.header().into_iter().chain(
                self.language_ids
                    .iter()
                    .flat_map(|langid| u16::from(langid).to_le_bytes()),
            ),
        )
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn hid_like() -> DeviceDescriptor {
        DeviceDescriptor {
            usb_version: USB_VER_1_1,
            device_class: ClassCode(0),
            device_subclass: SubclassCode(0),
            device_protocol: ProtocolCode(0),
            max_packet_size_0: MaxSizeZeroEP::_8,
            vendor_id: VendorId(0x1234),
            product_id: ProductId(0x5678),
            device_version: Bcd16(0x0100),
            manufacturer_name: StringIndex(1),
            product_name: StringIndex(0),
            serial: StringIndex(0),
            configurations: vec![ConfigurationDescriptor {
                interfaces: vec![InterfaceDescriptor {
                    interface_num: 0,
                    alternate_setting: 0,
                    endpoints: vec![EndpointDescriptor {
                        endpoint_addr: 0x81,
                        attributes: EndpointAttributes::default()
                            .with_transfer_type(TransferType::Interrupt),
                        max_packet_size: 8,
                        interval: 10,
                    }],
                    class: InterfaceClass(3),
                    subclass: InterfaceSubclass(0),
                    protocol: InterfaceProtocol(0),
                    interface_name: StringIndex(0),
                }],
                config_value: ConfigurationValue(1),
                configuration_name: StringIndex(0),
                attributes: ConfigurationAttributes::default(),
                max_power: 50,
            }],
            strings: vec!["Acme"],
        }
    }

    #[test]
    fn device_descriptor_bytes() {
        let desc = hid_like();
        let bytes: Vec<u8> = desc.serialize().collect();
        assert_eq!(
            bytes,
            [
                0x12, 0x01, 0x10, 0x01, 0, 0, 0, 8, 0x34, 0x12, 0x78, 0x56,
                0x00, 0x01, 1, 0, 0, 1
            ]
        );
    }

    #[test]
    fn configuration_total_length() {
        let desc = hid_like();
        let bytes: Vec<u8> = desc.configurations[0].serialize().collect();
        assert_eq!(bytes.len(), 9 + 9 + 7);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 25);
        assert_eq!(bytes[4], 1);
        assert_eq!(bytes[7], 0x80);
        assert_eq!(bytes[8], 50);
        // endpoint descriptor is last
        assert_eq!(&bytes[18..], &[7, 5, 0x81, 0x03, 8, 0, 10]);
    }

    #[test]
    fn strings() {
        let desc = hid_like();
        assert_eq!(desc.string(0).unwrap(), [4, 3, 0x09, 0x04]);
        assert_eq!(
            desc.string(1).unwrap(),
            [10, 3, b'A', 0, b'c', 0, b'm', 0, b'e', 0]
        );
        assert!(desc.string(2).is_none());
    }
}
