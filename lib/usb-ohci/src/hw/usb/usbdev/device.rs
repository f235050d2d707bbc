// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use usb_config_toml::Config;

use crate::hw::usb::packet::{EndpointSlot, Packet, PacketStatus};
use crate::migrate::{StateError, StateReader, StateWriter};

use super::descriptor::*;
use super::endpoint::Endpoint;
use super::migrate::{DeviceV1, EndpointV1, NUM_ENDPOINTS};
use super::requests::{
    codes::*, SetupData, StandardRequest, FEATURE_DEVICE_REMOTE_WAKEUP,
    FEATURE_ENDPOINT_HALT,
};
use super::{
    DeviceState, Error, Result, SetupState, Speed, DATA_BUF_SIZE,
    MAX_INTERFACES,
};

/// Behaviour of a particular kind of peripheral.
///
/// The bus-level state every device shares lives in the [DeviceCore] passed
/// to each hook; implementors only carry what is specific to their
/// peripheral.
pub trait DeviceModel: Send + 'static {
    /// Type name of the peripheral, as found in the proxy registry.
    fn type_name(&self) -> &'static str;

    fn handle_attach(&mut self, _core: &mut DeviceCore) {}

    fn handle_reset(&mut self, _core: &mut DeviceCore) {}

    /// Handles a request on the control endpoint.
    ///
    /// Response data for device-to-host requests is placed at the start of
    /// [DeviceCore::data_buf_mut] with its length in `p.actual_length`; data
    /// received for host-to-device requests is found in
    /// [DeviceCore::data_buf].  Unsupported requests set `p.status` to
    /// [PacketStatus::Stall].
    fn handle_control(
        &mut self,
        core: &mut DeviceCore,
        p: &mut Packet,
        setup: SetupData,
    );

    /// Handles a transfer on a non-control endpoint.  `buf` is the packet's
    /// data window, `p.buffer_size` bytes long.
    fn handle_data(
        &mut self,
        core: &mut DeviceCore,
        p: &mut Packet,
        buf: &mut [u8],
    );

    fn unrealize(&mut self) {}

    /// Re-reads the peripheral's settings for `port` from `config`.
    fn update_settings(&mut self, _config: &Config, _port: usize) {}

    /// Writes peripheral-specific state.
    fn export(&self, _w: &mut StateWriter) -> crate::migrate::Result<()> {
        Ok(())
    }

    /// Reads state written by [DeviceModel::export].
    fn import(&mut self, _r: &mut StateReader) -> crate::migrate::Result<()> {
        Ok(())
    }

    fn binding_value(&self, _bind_index: u32) -> f32 {
        0.0
    }

    fn set_binding_value(&mut self, _bind_index: u32, _value: f32) {}

    fn input_device_connected(&mut self, _identifier: &str) {}

    fn input_device_disconnected(&mut self, _identifier: &str) {}

    /// Host pointer position in normalized display coordinates; negative
    /// values mean the pointer is off-screen.
    fn set_pointer_position(&mut self, _x: f32, _y: f32) {}
}

/// Bus-level state shared by every USB device.
pub struct DeviceCore {
    pub speed: Speed,
    pub addr: u8,
    pub state: DeviceState,
    /// Set while the device is plugged into a port.
    pub attached: bool,
    pub remote_wakeup: bool,

    pub(crate) setup_buf: [u8; 8],
    pub(crate) setup_state: SetupState,
    pub(crate) setup_len: usize,
    pub(crate) setup_index: usize,
    data_buf: Box<[u8]>,

    configuration: u8,
    ninterfaces: usize,
    altsetting: [u8; MAX_INTERFACES],

    descriptor: DeviceDescriptor,
    endpoints: Vec<Endpoint>,

    pub(crate) log: slog::Logger,
}

impl DeviceCore {
    pub fn new(
        speed: Speed,
        descriptor: DeviceDescriptor,
        log: slog::Logger,
    ) -> Self {
        Self {
            speed,
            addr: 0,
            state: DeviceState::NotAttached,
            attached: false,
            remote_wakeup: false,
            setup_buf: [0; 8],
            setup_state: SetupState::Idle,
            setup_len: 0,
            setup_index: 0,
            data_buf: vec![0u8; DATA_BUF_SIZE].into_boxed_slice(),
            configuration: 0,
            ninterfaces: 0,
            altsetting: [0; MAX_INTERFACES],
            descriptor,
            endpoints: EndpointSlot::all().map(Endpoint::new).collect(),
            log,
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub fn configuration(&self) -> u8 {
        self.configuration
    }

    pub fn altsetting(&self, ifnum: usize) -> Option<u8> {
        self.altsetting.get(ifnum).copied()
    }

    pub fn setup_state(&self) -> SetupState {
        self.setup_state
    }

    pub fn data_buf(&self) -> &[u8] {
        &self.data_buf
    }

    pub fn data_buf_mut(&mut self) -> &mut [u8] {
        &mut self.data_buf
    }

    pub fn endpoint(&self, slot: EndpointSlot) -> &Endpoint {
        &self.endpoints[slot.to_index()]
    }

    pub fn endpoint_mut(&mut self, slot: EndpointSlot) -> &mut Endpoint {
        &mut self.endpoints[slot.to_index()]
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    pub(crate) fn endpoints_mut(&mut self) -> impl Iterator<Item = &mut Endpoint> {
        self.endpoints.iter_mut()
    }

    fn active_config(&self) -> Option<&ConfigurationDescriptor> {
        match self.configuration {
            0 => None,
            v => self.descriptor.configuration(ConfigurationValue(v)),
        }
    }

    /// Returns every endpoint to its unconfigured state.
    pub fn ep_reset(&mut self) {
        for ep in self.endpoints.iter_mut() {
            ep.reset();
        }
    }

    /// Configures endpoints from the active configuration's interfaces.
    fn ep_init(&mut self) {
        self.ep_reset();
        let mut found = Vec::new();
        if let Some(config) = self.active_config() {
            for i in 0..self.ninterfaces {
                let Some(iface) = config.interface(i as u8, self.altsetting[i])
                else {
                    continue;
                };
                for ep in iface.endpoints.iter() {
                    found.push((
                        ep.endpoint_addr,
                        ep.attributes.transfer_type(),
                        ep.max_packet_size,
                        iface.interface_num,
                    ));
                }
            }
        }
        for (addr, transfer_type, mps, ifnum) in found {
            match EndpointSlot::from_address(addr) {
                Some(EndpointSlot::Control) | None => continue,
                Some(slot) => {
                    let ep = self.endpoint_mut(slot);
                    ep.transfer_type = Some(transfer_type);
                    ep.ifnum = ifnum;
                    ep.max_packet_size = mps;
                }
            }
        }
    }

    /// Selects configuration `value` (0 deconfigures).  Enumeration state is
    /// left to the caller.
    pub fn set_config(&mut self, value: u8) -> Result<()> {
        if value == 0 {
            self.configuration = 0;
            self.ninterfaces = 0;
        } else {
            let config = self
                .descriptor
                .configuration(ConfigurationValue(value))
                .ok_or(Error::NoSuchConfiguration(value))?;
            self.ninterfaces = config.num_interfaces().min(MAX_INTERFACES);
            self.configuration = value;
            for i in 0..self.ninterfaces {
                let _ = self.set_interface(i as u16, 0);
            }
        }
        for alt in self.altsetting[self.ninterfaces..].iter_mut() {
            *alt = 0;
        }
        self.ep_init();
        Ok(())
    }

    pub fn set_interface(&mut self, index: u16, value: u16) -> Result<()> {
        let missing = Error::NoSuchInterface(index, value);
        let (Ok(ifnum), Ok(alt)) = (u8::try_from(index), u8::try_from(value))
        else {
            return Err(missing);
        };
        if usize::from(ifnum) >= MAX_INTERFACES {
            return Err(missing);
        }
        self.active_config()
            .and_then(|c| c.interface(ifnum, alt))
            .ok_or(missing)?;
        self.altsetting[usize::from(ifnum)] = alt;
        self.ep_init();
        Ok(())
    }

    /// Copies up to `length` bytes of `data` into the data buffer as the
    /// response to a device-to-host request.
    pub fn reply(&mut self, p: &mut Packet, data: &[u8], length: usize) {
        let n = data.len().min(length).min(DATA_BUF_SIZE);
        self.data_buf[..n].copy_from_slice(&data[..n]);
        p.actual_length = n;
    }

    fn get_descriptor(
        &mut self,
        p: &mut Packet,
        value: u16,
        length: usize,
    ) -> Result<()> {
        let [index, raw_type] = value.to_le_bytes();
        slog::trace!(self.log, "GET_DESCRIPTOR";
            "type" => raw_type, "index" => index);

        let desc_type = DescriptorType::from_repr(raw_type)
            .ok_or(Error::UnknownDescriptorType(raw_type))?;
        let bytes: Vec<u8> = match desc_type {
            DescriptorType::Device => self.descriptor.serialize().collect(),
            DescriptorType::Configuration => self
                .descriptor
                .configurations
                .get(usize::from(index))
                .ok_or(Error::NoSuchDescriptor(desc_type, index))?
                .serialize()
                .collect(),
            DescriptorType::String => self
                .descriptor
                .string(index)
                .ok_or(Error::NoSuchDescriptor(desc_type, index))?,
            other => return Err(Error::UnimplementedDescriptor(other)),
        };
        self.reply(p, &bytes, length);
        Ok(())
    }

    /// Serves the standard requests answerable from the descriptor tree and
    /// enumeration state.  Anything else is returned as an [Error] for the
    /// model to handle or stall.
    pub fn handle_standard_request(
        &mut self,
        p: &mut Packet,
        setup: SetupData,
    ) -> Result<()> {
        let value = setup.value();
        let index = setup.index();
        let length = usize::from(setup.length());
        let [_, request] = setup.code().to_be_bytes();
        let unimplemented = Error::UnimplementedRequest(setup.request());

        let Some(request) = StandardRequest::from_repr(request) else {
            return Err(unimplemented);
        };
        let recipient = setup.code() & 0xff00;

        use StandardRequest::*;
        match (recipient, request) {
            (DEVICE_OUT_REQUEST, SetAddress) => {
                if value > 127 {
                    return Err(Error::InvalidAddress(value));
                }
                self.addr = value as u8;
                self.state = if value == 0 {
                    DeviceState::Default
                } else {
                    DeviceState::Addressed
                };
                slog::debug!(self.log, "address set"; "addr" => self.addr);
            }
            (DEVICE_REQUEST, GetDescriptor) => {
                self.get_descriptor(p, value, length)?;
            }
            (DEVICE_REQUEST, GetConfiguration) => {
                let config = self.configuration;
                self.reply(p, &[config], length);
            }
            (DEVICE_OUT_REQUEST, SetConfiguration) => {
                self.set_config(value as u8)?;
                self.state = if self.configuration != 0 {
                    DeviceState::Configured
                } else {
                    DeviceState::Addressed
                };
            }
            (DEVICE_REQUEST, GetStatus) => {
                let mut status = 0u8;
                if self
                    .active_config()
                    .map(|c| c.attributes.self_powered())
                    .unwrap_or(false)
                {
                    status |= 1;
                }
                if self.remote_wakeup {
                    status |= 1 << 1;
                }
                self.reply(p, &[status, 0], length);
            }
            (DEVICE_OUT_REQUEST, ClearFeature)
                if value == FEATURE_DEVICE_REMOTE_WAKEUP =>
            {
                self.remote_wakeup = false;
            }
            (DEVICE_OUT_REQUEST, SetFeature)
                if value == FEATURE_DEVICE_REMOTE_WAKEUP =>
            {
                self.remote_wakeup = true;
            }
            (INTERFACE_REQUEST, GetStatus) => {
                self.reply(p, &[0, 0], length);
            }
            (INTERFACE_REQUEST, GetInterface) => {
                let ifnum = usize::from(index);
                if ifnum >= self.ninterfaces {
                    return Err(Error::NoSuchInterface(index, 0));
                }
                let alt = self.altsetting[ifnum];
                self.reply(p, &[alt], length);
            }
            (INTERFACE_OUT_REQUEST, SetInterface) => {
                self.set_interface(index, value)?;
            }
            (ENDPOINT_REQUEST, GetStatus) => {
                let slot = self.valid_endpoint(index)?;
                let halted = self.endpoint(slot).halted as u8;
                self.reply(p, &[halted, 0], length);
            }
            (ENDPOINT_OUT_REQUEST, ClearFeature | SetFeature)
                if value == FEATURE_ENDPOINT_HALT =>
            {
                let slot = self.valid_endpoint(index)?;
                self.endpoint_mut(slot).halted = request == SetFeature;
            }
            _ => return Err(unimplemented),
        }
        Ok(())
    }

    fn valid_endpoint(&self, index: u16) -> Result<EndpointSlot> {
        u8::try_from(index)
            .ok()
            .and_then(EndpointSlot::from_address)
            .filter(|slot| self.endpoint(*slot).is_valid())
            .ok_or(Error::InvalidEndpoint(index))
    }

    pub fn export(&self) -> DeviceV1 {
        DeviceV1 {
            speed: self.speed as u8,
            addr: self.addr,
            state: self.state as u8,
            setup_buf: self.setup_buf,
            data_buf: self.data_buf.to_vec(),
            remote_wakeup: self.remote_wakeup,
            setup_state: self.setup_state as u8,
            setup_len: self.setup_len as i32,
            setup_index: self.setup_index as i32,
            configuration: self.configuration,
            altsetting: self.altsetting,
            endpoints: self
                .endpoints
                .iter()
                .map(|ep| EndpointV1 {
                    pipeline: ep.pipeline,
                    halted: ep.halted,
                })
                .collect(),
        }
    }

    /// Applies saved state.  The configuration and alternate settings are
    /// re-selected so that endpoint types follow the descriptors; parked
    /// packets are dropped.
    pub fn import(&mut self, v: &DeviceV1) -> crate::migrate::Result<()> {
        let speed = Speed::from_repr(v.speed)
            .ok_or(StateError::Invalid("speed", v.speed.into()))?;
        let state = DeviceState::from_repr(v.state)
            .ok_or(StateError::Invalid("device state", v.state.into()))?;
        let setup_state = SetupState::from_repr(v.setup_state).ok_or(
            StateError::Invalid("setup state", v.setup_state.into()),
        )?;
        let buf_index = |name, val: i32| {
            usize::try_from(val)
                .ok()
                .filter(|v| *v <= DATA_BUF_SIZE)
                .ok_or(StateError::Invalid(name, val.into()))
        };
        let setup_len = buf_index("setup length", v.setup_len)?;
        let setup_index = buf_index("setup index", v.setup_index)?;
        if setup_index > setup_len {
            return Err(StateError::Invalid("setup index", v.setup_index.into()));
        }
        if v.data_buf.len() != DATA_BUF_SIZE {
            return Err(StateError::Invalid(
                "data buffer length",
                v.data_buf.len() as i64,
            ));
        }
        if v.endpoints.len() != NUM_ENDPOINTS {
            return Err(StateError::Invalid(
                "endpoint count",
                v.endpoints.len() as i64,
            ));
        }

        self.speed = speed;
        self.addr = v.addr;
        self.state = state;
        self.setup_buf = v.setup_buf;
        self.data_buf.copy_from_slice(&v.data_buf);
        self.remote_wakeup = v.remote_wakeup;
        self.setup_state = setup_state;
        self.setup_len = setup_len;
        self.setup_index = setup_index;

        if let Err(e) = self.set_config(v.configuration) {
            slog::warn!(self.log, "saved configuration not applied: {e}");
        }
        for (i, alt) in v.altsetting.iter().enumerate() {
            if *alt == 0 {
                continue;
            }
            if let Err(e) = self.set_interface(i as u16, u16::from(*alt)) {
                slog::warn!(self.log, "saved alternate setting not applied: {e}";
                    "interface" => i);
            }
        }
        for (ep, saved) in self.endpoints.iter_mut().zip(v.endpoints.iter()) {
            ep.pipeline = saved.pipeline;
            ep.halted = saved.halted;
            ep.queue.clear();
        }
        Ok(())
    }
}

/// A USB device: shared bus state plus the peripheral behind it.
pub struct Device {
    pub core: DeviceCore,
    model: Box<dyn DeviceModel>,
}

impl Device {
    pub fn new(core: DeviceCore, model: Box<dyn DeviceModel>) -> Self {
        Self { core, model }
    }

    pub fn type_name(&self) -> &'static str {
        self.model.type_name()
    }

    pub fn model(&self) -> &dyn DeviceModel {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> &mut dyn DeviceModel {
        self.model.as_mut()
    }

    /// Connects the device to its port's bus.
    pub fn attach(&mut self) {
        self.core.state = DeviceState::Attached;
        self.model.handle_attach(&mut self.core);
    }

    pub fn detach(&mut self) {
        self.core.state = DeviceState::NotAttached;
    }

    /// Bus reset.  The device returns to the default state with address 0
    /// and no active configuration.
    pub fn reset(&mut self) {
        if !self.core.attached {
            return;
        }
        self.model.handle_reset(&mut self.core);
        self.core.remote_wakeup = false;
        self.core.addr = 0;
        self.core.state = DeviceState::Default;
        self.core.setup_state = SetupState::Idle;
        let _ = self.core.set_config(0);
    }

    pub fn unrealize(&mut self) {
        self.model.unrealize();
    }

    pub(crate) fn handle_control(&mut self, p: &mut Packet, setup: SetupData) {
        self.model.handle_control(&mut self.core, p, setup);
    }

    pub(crate) fn handle_data(&mut self, p: &mut Packet, buf: &mut [u8]) {
        self.model.handle_data(&mut self.core, p, buf);
    }
}

/// Stalls `p` unless it already carries a failure.
pub fn stall(p: &mut Packet) {
    if p.status == PacketStatus::Success {
        p.status = PacketStatus::Stall;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hw::usb::packet::{EndpointAddr, Pid};
    use crate::hw::usb::usbdev::requests::{
        Request, RequestDirection, RequestRecipient, RequestType,
    };

    fn descriptor() -> DeviceDescriptor {
        DeviceDescriptor {
            usb_version: USB_VER_1_1,
            device_class: ClassCode(0),
            device_subclass: SubclassCode(0),
            device_protocol: ProtocolCode(0),
            max_packet_size_0: MaxSizeZeroEP::_8,
            vendor_id: VendorId(0x1234),
            product_id: ProductId(0x0001),
            device_version: Bcd16(0x0100),
            manufacturer_name: StringIndex(1),
            product_name: StringIndex(0),
            serial: StringIndex(0),
            configurations: vec![ConfigurationDescriptor {
                interfaces: vec![
                    InterfaceDescriptor {
                        interface_num: 0,
                        alternate_setting: 0,
                        endpoints: vec![EndpointDescriptor {
                            endpoint_addr: 0x81,
                            attributes: EndpointAttributes::default()
                                .with_transfer_type(TransferType::Interrupt),
                            max_packet_size: 8,
                            interval: 8,
                        }],
                        class: InterfaceClass(0xff),
                        subclass: InterfaceSubclass(0),
                        protocol: InterfaceProtocol(0),
                        interface_name: StringIndex(0),
                    },
                    InterfaceDescriptor {
                        interface_num: 0,
                        alternate_setting: 1,
                        endpoints: vec![EndpointDescriptor {
                            endpoint_addr: 0x02,
                            attributes: EndpointAttributes::default()
                                .with_transfer_type(TransferType::Bulk),
                            max_packet_size: 64,
                            interval: 0,
                        }],
                        class: InterfaceClass(0xff),
                        subclass: InterfaceSubclass(0),
                        protocol: InterfaceProtocol(0),
                        interface_name: StringIndex(0),
                    },
                ],
                config_value: ConfigurationValue(1),
                configuration_name: StringIndex(0),
                attributes: ConfigurationAttributes::default()
                    .with_self_powered(true),
                max_power: 0x19,
            }],
            strings: vec!["Test"],
        }
    }

    fn core() -> DeviceCore {
        DeviceCore::new(
            Speed::Full,
            descriptor(),
            slog::Logger::root(slog::Discard, slog::o!()),
        )
    }

    fn setup(dir: RequestDirection, recipient: RequestRecipient, req: StandardRequest, value: u16, index: u16, length: u16) -> SetupData {
        SetupData(0)
            .with_direction(dir)
            .with_recipient(recipient)
            .with_request_type(RequestType::Standard)
            .with_request(Request::Standard(req))
            .with_value(value)
            .with_index(index)
            .with_length(length)
    }

    fn packet() -> Packet {
        let mut p = Packet::default();
        let ep = EndpointAddr { port: 0, slot: EndpointSlot::Control };
        p.setup(Pid::Setup, ep, 0, false, false, 8);
        p
    }

    #[test]
    fn set_address() {
        let mut core = core();
        let mut p = packet();
        let req = setup(
            RequestDirection::HostToDevice,
            RequestRecipient::Device,
            StandardRequest::SetAddress,
            5,
            0,
            0,
        );
        core.handle_standard_request(&mut p, req).unwrap();
        assert_eq!(core.addr, 5);
        assert_eq!(core.state, DeviceState::Addressed);

        let bad = req.with_value(128);
        assert!(core.handle_standard_request(&mut p, bad).is_err());
        assert_eq!(core.addr, 5);
    }

    #[test]
    fn device_descriptor_is_truncated_to_length() {
        let mut core = core();
        let mut p = packet();
        let req = setup(
            RequestDirection::DeviceToHost,
            RequestRecipient::Device,
            StandardRequest::GetDescriptor,
            (DescriptorType::Device as u16) << 8,
            0,
            8,
        );
        core.handle_standard_request(&mut p, req).unwrap();
        assert_eq!(p.actual_length, 8);
        assert_eq!(&core.data_buf()[..2], &[18, 1]);

        let qualifier = req.with_value((DescriptorType::DeviceQualifier as u16) << 8);
        assert!(matches!(
            core.handle_standard_request(&mut p, qualifier),
            Err(Error::UnimplementedDescriptor(DescriptorType::DeviceQualifier))
        ));
        let missing_string = req.with_value(((DescriptorType::String as u16) << 8) | 7);
        assert!(core.handle_standard_request(&mut p, missing_string).is_err());
    }

    #[test]
    fn configuration_enables_endpoints() {
        let mut core = core();
        let mut p = packet();
        assert!(!core.endpoint(EndpointSlot::In(0)).is_valid());

        let req = setup(
            RequestDirection::HostToDevice,
            RequestRecipient::Device,
            StandardRequest::SetConfiguration,
            1,
            0,
            0,
        );
        core.handle_standard_request(&mut p, req).unwrap();
        assert_eq!(core.state, DeviceState::Configured);
        assert_eq!(core.configuration(), 1);
        let ep = core.endpoint(EndpointSlot::In(0));
        assert_eq!(ep.transfer_type, Some(TransferType::Interrupt));
        assert_eq!(ep.max_packet_size, 8);

        // alternate setting 1 swaps the interrupt IN for a bulk OUT
        let alt = setup(
            RequestDirection::HostToDevice,
            RequestRecipient::Interface,
            StandardRequest::SetInterface,
            1,
            0,
            0,
        );
        core.handle_standard_request(&mut p, alt).unwrap();
        assert!(!core.endpoint(EndpointSlot::In(0)).is_valid());
        assert_eq!(
            core.endpoint(EndpointSlot::Out(1)).transfer_type,
            Some(TransferType::Bulk)
        );
        assert!(core.handle_standard_request(&mut p, alt.with_value(2)).is_err());

        let bad = req.with_value(3);
        assert!(matches!(
            core.handle_standard_request(&mut p, bad),
            Err(Error::NoSuchConfiguration(3))
        ));

        core.handle_standard_request(&mut p, req.with_value(0)).unwrap();
        assert_eq!(core.state, DeviceState::Addressed);
        assert!(!core.endpoint(EndpointSlot::Out(1)).is_valid());
    }

    #[test]
    fn status_and_features() {
        let mut core = core();
        let mut p = packet();
        core.set_config(1).unwrap();

        let get_status = setup(
            RequestDirection::DeviceToHost,
            RequestRecipient::Device,
            StandardRequest::GetStatus,
            0,
            0,
            2,
        );
        let set_wakeup = setup(
            RequestDirection::HostToDevice,
            RequestRecipient::Device,
            StandardRequest::SetFeature,
            FEATURE_DEVICE_REMOTE_WAKEUP,
            0,
            0,
        );
        core.handle_standard_request(&mut p, set_wakeup).unwrap();
        core.handle_standard_request(&mut p, get_status).unwrap();
        assert_eq!(p.actual_length, 2);
        assert_eq!(&core.data_buf()[..2], &[0b11, 0]);

        let halt = setup(
            RequestDirection::HostToDevice,
            RequestRecipient::Endpoint,
            StandardRequest::SetFeature,
            FEATURE_ENDPOINT_HALT,
            0x81,
            0,
        );
        core.handle_standard_request(&mut p, halt).unwrap();
        assert!(core.endpoint(EndpointSlot::In(0)).halted);
        let unhalt = halt.with_request(Request::Standard(StandardRequest::ClearFeature));
        core.handle_standard_request(&mut p, unhalt).unwrap();
        assert!(!core.endpoint(EndpointSlot::In(0)).halted);

        // endpoint not in the active configuration
        assert!(core.handle_standard_request(&mut p, halt.with_index(0x83)).is_err());
    }

    #[test]
    fn export_import_reapplies_configuration() {
        let mut core = core();
        core.set_config(1).unwrap();
        core.state = DeviceState::Configured;
        core.addr = 9;
        core.endpoint_mut(EndpointSlot::In(0)).halted = true;
        let saved = core.export();

        let mut other = self::core();
        other.import(&saved).unwrap();
        assert_eq!(other.export(), saved);
        assert_eq!(
            other.endpoint(EndpointSlot::In(0)).transfer_type,
            Some(TransferType::Interrupt)
        );

        let mut corrupt = saved.clone();
        corrupt.state = 42;
        assert!(other.import(&corrupt).is_err());
    }

    #[test]
    fn import_rejects_setup_index_past_length() {
        let mut core = core();
        let mut saved = core.export();
        saved.setup_state = SetupState::Data as u8;
        saved.setup_len = 4;
        saved.setup_index = 100;
        assert!(core.import(&saved).is_err());

        saved.setup_index = 4;
        core.import(&saved).unwrap();
        assert_eq!(core.setup_index, 4);
    }

    #[test]
    fn import_ignores_unknown_alternate_setting() {
        let mut core = core();
        core.set_config(1).unwrap();
        let mut saved = core.export();
        saved.altsetting[0] = 3;
        saved.altsetting[7] = 1;

        let mut other = self::core();
        other.import(&saved).unwrap();
        assert_eq!(other.configuration, 1);
        assert!(other.altsetting.iter().all(|alt| *alt == 0));

        saved.altsetting = [0; MAX_INTERFACES];
        saved.altsetting[0] = 1;
        other.import(&saved).unwrap();
        assert_eq!(other.altsetting(0), Some(1));
    }
}
