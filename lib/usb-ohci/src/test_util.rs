// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Helpers shared by the crate's tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use slog::{o, Drain, Logger};
use usb_config_toml::Config;

use crate::common::GuestAddr;
use crate::hw::usb::devices;
use crate::hw::usb::ohci::bits::{Ed, EdFlags, Td, TdFlags};
use crate::hw::usb::packet::{Packet, PacketStatus, Pid};
use crate::hw::usb::proxy::{self, DeviceProxy, Registry};
use crate::hw::usb::usbdev::descriptor::*;
use crate::hw::usb::usbdev::device::stall;
use crate::hw::usb::usbdev::requests::SetupData;
use crate::hw::usb::usbdev::{Device, DeviceCore, DeviceModel, Speed};
use crate::intr_pins::NullPin;
use crate::memory::{GuestMemory, VecMemory};
use crate::migrate::{StateReader, StateWriter};
use crate::subsystem::UsbSubsystem;

pub fn build_log() -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(std::io::stdout());
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(drain, o!())
}

/// How the scripted device answers its next data transfer.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Complete with this payload (IN) or accept the data (OUT).
    Data(Vec<u8>),
    Async,
    Nak,
    Stall,
}

/// Queue of replies feeding a scripted device.  An empty script NAKs.
#[derive(Clone, Default)]
pub struct Script(Arc<Mutex<VecDeque<Reply>>>);

impl Script {
    pub fn push(&self, reply: Reply) {
        self.0.lock().unwrap().push_back(reply);
    }

    pub fn remaining(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    fn pop(&self) -> Option<Reply> {
        self.0.lock().unwrap().pop_front()
    }
}

pub const SCRIPTED_TYPE: &str = "scripted";

/// Full-speed device with one configuration exposing an 8-byte interrupt IN
/// endpoint (0x81).  Data transfers are answered from a [Script]; control
/// transfers only know the standard requests.
struct Scripted {
    script: Script,
    /// Data transfers answered so far.
    handled: u32,
}

impl DeviceModel for Scripted {
    fn type_name(&self) -> &'static str {
        SCRIPTED_TYPE
    }

    fn handle_control(
        &mut self,
        core: &mut DeviceCore,
        p: &mut Packet,
        setup: SetupData,
    ) {
        if core.handle_standard_request(p, setup).is_err() {
            stall(p);
        }
    }

    fn handle_data(
        &mut self,
        _core: &mut DeviceCore,
        p: &mut Packet,
        buf: &mut [u8],
    ) {
        match self.script.pop() {
            Some(Reply::Data(data)) => {
                if p.pid == Pid::In {
                    p.push_data(buf, &data);
                } else {
                    let mut sink = vec![0u8; p.buffer_size];
                    p.pull_data(buf, &mut sink);
                }
            }
            Some(Reply::Async) => p.status = PacketStatus::Async,
            Some(Reply::Stall) => p.status = PacketStatus::Stall,
            Some(Reply::Nak) | None => {
                p.status = PacketStatus::Nak;
                return;
            }
        }
        self.handled += 1;
    }

    fn export(&self, w: &mut StateWriter) -> crate::migrate::Result<()> {
        w.marker("ScriptedDevice")?;
        w.u32(self.handled)
    }

    fn import(&mut self, r: &mut StateReader) -> crate::migrate::Result<()> {
        r.expect_marker("ScriptedDevice")?;
        self.handled = r.u32()?;
        Ok(())
    }

    fn binding_value(&self, bind_index: u32) -> f32 {
        match bind_index {
            0 => self.handled as f32,
            _ => 0.0,
        }
    }

    fn set_binding_value(&mut self, bind_index: u32, value: f32) {
        if bind_index == 0 {
            self.handled = value as u32;
        }
    }
}

fn scripted_descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        usb_version: USB_VER_1_1,
        device_class: ClassCode(0),
        device_subclass: SubclassCode(0),
        device_protocol: ProtocolCode(0),
        max_packet_size_0: MaxSizeZeroEP::_8,
        vendor_id: VendorId(0x1234),
        product_id: ProductId(0x5678),
        device_version: Bcd16(0x0100),
        manufacturer_name: StringIndex(0),
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
                    interval: 1,
                }],
                class: InterfaceClass(0xff),
                subclass: InterfaceSubclass(0),
                protocol: InterfaceProtocol(0),
                interface_name: StringIndex(0),
            }],
            config_value: ConfigurationValue(1),
            configuration_name: StringIndex(0),
            attributes: ConfigurationAttributes::default(),
            max_power: 0x19,
        }],
        strings: vec![],
    }
}

fn scripted_with_log(log: Logger) -> (Device, Script) {
    let script = Script::default();
    let core = DeviceCore::new(Speed::Full, scripted_descriptor(), log);
    let model = Scripted { script: script.clone(), handled: 0 };
    (Device::new(core, Box::new(model)), script)
}

pub fn scripted_device() -> (Device, Script) {
    scripted_with_log(build_log())
}

/// Proxy building scripted devices.  Subtype 1 fails to build.
pub struct TestProxy;

impl DeviceProxy for TestProxy {
    fn name(&self) -> &'static str {
        "Scripted Test Device"
    }

    fn type_name(&self) -> &'static str {
        SCRIPTED_TYPE
    }

    fn subtypes(&self) -> &'static [&'static str] {
        &["Working", "Broken"]
    }

    fn create(
        &self,
        _config: &Config,
        port: usize,
        subtype: u32,
        log: &Logger,
    ) -> proxy::Result<Device> {
        match subtype {
            0 => {
                let log = log.new(o!("dev" => SCRIPTED_TYPE, "port" => port));
                Ok(scripted_with_log(log).0)
            }
            1 => Err(proxy::Error::Failed(SCRIPTED_TYPE, "broken".to_string())),
            other => Err(proxy::Error::UnsupportedSubtype(SCRIPTED_TYPE, other)),
        }
    }
}

static TEST_PROXY: TestProxy = TestProxy;

lazy_static::lazy_static! {
    /// The built-in peripherals plus the scripted test device.
    pub static ref TEST_REGISTRY: Registry = {
        let mut reg = Registry::new();
        devices::register_all(&mut reg);
        reg.register(&TEST_PROXY);
        reg
    };
}

/// A subsystem over 64KiB of guest memory, using [TEST_REGISTRY].
pub fn subsystem(config: Config) -> (UsbSubsystem, Arc<VecMemory>) {
    let mem = Arc::new(VecMemory::new(0x10000));
    let usb = UsbSubsystem::open_with_registry(
        &build_log(),
        Arc::new(Mutex::new(config)),
        mem.clone(),
        Arc::new(NullPin::default()),
        &TEST_REGISTRY,
    );
    (usb, mem)
}

/// Lays out EDs, TDs, and transfer buffers in guest memory the way a host
/// controller driver would, bump-allocating from a base address.
pub struct GuestLists {
    mem: Arc<VecMemory>,
    next: u32,
}

impl GuestLists {
    pub fn new(mem: Arc<VecMemory>, base: u32) -> Self {
        Self { mem, next: base }
    }

    fn alloc(&mut self, len: u32) -> u32 {
        let addr = (self.next + 15) & !15;
        self.next = addr + len.max(1);
        addr
    }

    /// A buffer of `len` bytes which does not cross a page boundary.
    pub fn buffer(&mut self, len: u32) -> u32 {
        let mut addr = (self.next + 15) & !15;
        if (addr & 0xfff) + len > 0x1000 {
            addr = (addr + 0xfff) & !0xfff;
        }
        self.next = addr + len.max(1);
        addr
    }

    /// A general TD covering `len` bytes at `buf`.
    pub fn td(&mut self, flags: TdFlags, buf: u32, len: u32) -> u32 {
        let addr = self.alloc(Td::SIZE as u32);
        let (cbp, be) = match len {
            0 => (0, 0),
            n => (buf, buf + n - 1),
        };
        let td = Td { flags, cbp, next: 0, be };
        assert!(td.write(self.mem.as_ref(), addr));
        addr
    }

    /// An ED with `tds` queued in order, terminated by a fresh dummy TD.
    pub fn ed(&mut self, flags: EdFlags, tds: &[u32]) -> u32 {
        let tail = self.td(TdFlags(0), 0, 0);
        for (i, addr) in tds.iter().enumerate() {
            let mut td = Td::read(self.mem.as_ref(), *addr).unwrap();
            td.next = tds.get(i + 1).copied().unwrap_or(tail);
            assert!(td.write(self.mem.as_ref(), *addr));
        }
        let addr = self.alloc(Ed::SIZE as u32);
        let head = tds.first().copied().unwrap_or(tail);
        let ed = Ed { flags, tail, head, next: 0 };
        assert!(ed.write(self.mem.as_ref(), addr));
        addr
    }

    /// Points every interrupt list of the HCCA at `hcca` to `ed`.
    pub fn set_interrupt_heads(&mut self, hcca: u32, ed: u32) {
        for i in 0..32 {
            assert!(self.mem.write_u32(GuestAddr(hcca) + i * 4, ed));
        }
    }
}
