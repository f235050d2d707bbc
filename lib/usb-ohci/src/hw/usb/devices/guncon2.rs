// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Namco GunCon 2 light gun.
//!
//! The gun reports its buttons (active low) and a screen position in the
//! game's own coordinate system on interrupt endpoint 1.  The host supplies
//! the aim point in normalized display coordinates; converting that to the
//! coordinates a title expects needs a per-title scale and centre, which is
//! taken from a built-in table keyed by game serial unless the port is
//! configured with custom values.

use byteorder::{ByteOrder, LE};
use slog::Logger;
use usb_config_toml::Config;

use crate::hw::usb::packet::{EndpointSlot, Packet, Pid};
use crate::hw::usb::proxy::{
    self, DeviceProxy, GenericInputBinding, InputBindingInfo,
    InputBindingType, SettingInfo, SettingType,
};
use crate::hw::usb::usbdev::descriptor::*;
use crate::hw::usb::usbdev::device::stall;
use crate::hw::usb::usbdev::requests::{codes::*, SetupData};
use crate::hw::usb::usbdev::{Device, DeviceCore, DeviceModel, Speed};
use crate::migrate::{StateReader, StateWriter};

pub const TYPE_NAME: &str = "guncon2";

/// `param_mode` bit selecting progressive-scan coordinates.
const FLAG_PROGRESSIVE: u16 = 0x0100;

/// Reports between a recalibration press and the (0, 0) report.
const CALIBRATION_DELAY: u16 = 9;

const SET_PARAM: u16 = CLASS_INTERFACE_OUT_REQUEST | 0x09;

const BID_C: u32 = 1;
const BID_B: u32 = 2;
const BID_A: u32 = 3;
const BID_DPAD_UP: u32 = 4;
const BID_DPAD_RIGHT: u32 = 5;
const BID_DPAD_DOWN: u32 = 6;
const BID_DPAD_LEFT: u32 = 7;
const BID_TRIGGER: u32 = 13;
const BID_SELECT: u32 = 14;
const BID_START: u32 = 15;
const BID_SHOOT_OFFSCREEN: u32 = 16;
const BID_RECALIBRATE: u32 = 17;

const DEFAULT_SCREEN_WIDTH: u32 = 640;
const DEFAULT_SCREEN_HEIGHT: u32 = 480;
const DEFAULT_CENTER_X: f32 = 320.0;
const DEFAULT_CENTER_Y: f32 = 120.0;
const DEFAULT_SCALE: f32 = 100.0;

/// Calibration of one title.  Scales are in percent.
struct GameConfig {
    serial: &'static str,
    scale_x: f32,
    scale_y: f32,
    center_x: u16,
    center_y: u16,
    screen_width: u16,
    screen_height: u16,
}

const fn game(
    serial: &'static str,
    scale_x: f32,
    scale_y: f32,
    center_x: u16,
    center_y: u16,
    screen_width: u16,
    screen_height: u16,
) -> GameConfig {
    GameConfig {
        serial,
        scale_x,
        scale_y,
        center_x,
        center_y,
        screen_width,
        screen_height,
    }
}

#[rustfmt::skip]
const GAME_CONFIGS: &[GameConfig] = &[
    game("SLUS-20485", 90.25, 92.5, 390, 132, 640, 240),   // Dino Stalker (U)
    game("SLUS-20389", 89.25, 93.5, 422, 141, 640, 240),   // Endgame (U)
    game("SLES-52620", 90.5, 114.75, 390, 146, 640, 256),  // Guncom 2 (E)
    game("SLES-51289", 84.5, 89.0, 456, 164, 640, 256),    // Gunfighter 2 - Jesse James (E)
    game("SLPS-25165", 90.25, 98.0, 390, 138, 640, 240),   // Gunvari Collection (J)
    game("SCES-50889", 90.25, 94.5, 390, 169, 640, 256),   // Ninja Assault (E)
    game("SLUS-20492", 90.25, 92.5, 390, 132, 640, 240),   // Ninja Assault (U)
    game("SLES-50650", 84.75, 96.0, 454, 164, 640, 240),   // Resident Evil Survivor 2 (E)
    game("SLES-51448", 90.25, 93.5, 420, 132, 640, 240),   // Starsky & Hutch (E)
    game("SLUS-20619", 90.25, 91.75, 453, 154, 640, 256),  // Starsky & Hutch (U)
    game("SLUS-20219", 90.25, 97.5, 390, 154, 640, 240),   // Time Crisis 2 (U)
    game("SLUS-20645", 90.25, 97.5, 390, 154, 640, 240),   // Time Crisis 3 (U)
    game("SLUS-20927", 90.25, 99.0, 390, 153, 640, 240),   // Time Crisis - Crisis Zone (U)
    game("SLUS-20221", 97.5, 104.75, 423, 407, 768, 768),  // Vampire Night (U)
    game("SLES-51229", 88.75, 100.0, 454, 164, 640, 256),  // Virtua Cop - Elite Edition (E)
];

const fn button(
    name: &'static str,
    display_name: &'static str,
    bind_index: u32,
    generic_mapping: GenericInputBinding,
) -> InputBindingInfo {
    InputBindingInfo {
        name,
        display_name,
        bind_type: InputBindingType::Button,
        bind_index,
        generic_mapping,
    }
}

const BINDINGS: &[InputBindingInfo] = &[
    button("Up", "D-Pad Up", BID_DPAD_UP, GenericInputBinding::DPadUp),
    button("Down", "D-Pad Down", BID_DPAD_DOWN, GenericInputBinding::DPadDown),
    button("Left", "D-Pad Left", BID_DPAD_LEFT, GenericInputBinding::DPadLeft),
    button(
        "Right",
        "D-Pad Right",
        BID_DPAD_RIGHT,
        GenericInputBinding::DPadRight,
    ),
    button("Trigger", "Trigger", BID_TRIGGER, GenericInputBinding::R2),
    button(
        "ShootOffscreen",
        "Shoot Offscreen",
        BID_SHOOT_OFFSCREEN,
        GenericInputBinding::R1,
    ),
    button(
        "Recalibrate",
        "Calibration Shot",
        BID_RECALIBRATE,
        GenericInputBinding::Unknown,
    ),
    button("A", "A", BID_A, GenericInputBinding::Cross),
    button("B", "B", BID_B, GenericInputBinding::Circle),
    button("C", "C", BID_C, GenericInputBinding::Triangle),
    button("Select", "Select", BID_SELECT, GenericInputBinding::Select),
    button("Start", "Start", BID_START, GenericInputBinding::Start),
];

const SETTINGS: &[SettingInfo] = &[
    SettingInfo {
        setting_type: SettingType::Boolean,
        name: "custom_config",
        display_name: "Manual Screen Configuration",
        description: "Forces the use of the screen parameters below, instead \
            of automatic parameters if available.",
        default_value: "false",
        min_value: None,
        max_value: None,
        step_value: None,
        format: None,
        multiplier: 0.0,
    },
    SettingInfo {
        setting_type: SettingType::Float,
        name: "scale_x",
        display_name: "X Scale (Sensitivity)",
        description: "Scales the position to simulate CRT curvature.",
        default_value: "100",
        min_value: Some("0"),
        max_value: Some("100"),
        step_value: Some("0.1"),
        format: Some("%.2f%%"),
        multiplier: 1.0,
    },
    SettingInfo {
        setting_type: SettingType::Float,
        name: "scale_y",
        display_name: "Y Scale (Sensitivity)",
        description: "Scales the position to simulate CRT curvature.",
        default_value: "100",
        min_value: Some("0"),
        max_value: Some("100"),
        step_value: Some("0.1"),
        format: Some("%.2f%%"),
        multiplier: 1.0,
    },
    SettingInfo {
        setting_type: SettingType::Float,
        name: "center_x",
        display_name: "Center X",
        description: "Sets the horizontal center position of the simulated \
            screen.",
        default_value: "320",
        min_value: Some("0"),
        max_value: Some("1024"),
        step_value: Some("1"),
        format: Some("%.0fpx"),
        multiplier: 1.0,
    },
    SettingInfo {
        setting_type: SettingType::Float,
        name: "center_y",
        display_name: "Center Y",
        description: "Sets the vertical center position of the simulated \
            screen.",
        default_value: "120",
        min_value: Some("0"),
        max_value: Some("1024"),
        step_value: Some("1"),
        format: Some("%.0fpx"),
        multiplier: 1.0,
    },
    SettingInfo {
        setting_type: SettingType::Integer,
        name: "screen_width",
        display_name: "Screen Width",
        description: "Sets the width of the simulated screen.",
        default_value: "640",
        min_value: Some("1"),
        max_value: Some("1024"),
        step_value: Some("1"),
        format: Some("%dpx"),
        multiplier: 0.0,
    },
    SettingInfo {
        setting_type: SettingType::Integer,
        name: "screen_height",
        display_name: "Screen Height",
        description: "Sets the height of the simulated screen.",
        default_value: "480",
        min_value: Some("1"),
        max_value: Some("1024"),
        step_value: Some("1"),
        format: Some("%dpx"),
        multiplier: 0.0,
    },
];

fn descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        usb_version: USB_VER_1_0,
        device_class: ClassCode(0),
        device_subclass: SubclassCode(0),
        device_protocol: ProtocolCode(0),
        max_packet_size_0: MaxSizeZeroEP::_8,
        vendor_id: VendorId(0x0b9a),
        product_id: ProductId(0x016a),
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
                    interval: 8,
                }],
                class: InterfaceClass(0xff),
                subclass: InterfaceSubclass(0x6a),
                protocol: InterfaceProtocol(0),
                interface_name: StringIndex(0),
            }],
            config_value: ConfigurationValue(1),
            configuration_name: StringIndex(0),
            attributes: ConfigurationAttributes::default(),
            max_power: 0x19,
        }],
        strings: vec!["Namco GunCon2"],
    }
}

pub struct GunCon2 {
    game_serial: Option<String>,
    custom_config: bool,

    screen_width: u32,
    screen_height: u32,
    center_x: f32,
    center_y: f32,
    /// Fraction, not percent.
    scale_x: f32,
    scale_y: f32,

    button_state: u32,
    pointer: (f32, f32),

    // set by the game
    param_x: i16,
    param_y: i16,
    param_mode: u16,

    calibration_timer: u16,
    calibration_pos_x: i16,
    calibration_pos_y: i16,
    auto_config_done: bool,

    log: Logger,
}

impl GunCon2 {
    pub fn new(log: Logger) -> Self {
        Self {
            game_serial: None,
            custom_config: false,
            screen_width: DEFAULT_SCREEN_WIDTH,
            screen_height: 240,
            center_x: DEFAULT_CENTER_X,
            center_y: DEFAULT_CENTER_Y,
            scale_x: 1.0,
            scale_y: 1.0,
            button_state: 0,
            pointer: (-1.0, -1.0),
            param_x: 0,
            param_y: 0,
            param_mode: 0,
            calibration_timer: 0,
            calibration_pos_x: 0,
            calibration_pos_y: 0,
            auto_config_done: false,
            log,
        }
    }

    fn auto_configure(&mut self) {
        let serial = self.game_serial.as_deref().unwrap_or("");
        let Some(gc) = GAME_CONFIGS.iter().find(|gc| gc.serial == serial)
        else {
            slog::warn!(self.log, "no automatic config for {serial:?}");
            return;
        };
        slog::info!(self.log, "using automatic config for {serial}";
            "scale" => format!("{}x{}", gc.scale_x / 100.0, gc.scale_y / 100.0),
            "center" => format!("{}x{}", gc.center_x, gc.center_y),
            "screen" => format!("{}x{}", gc.screen_width, gc.screen_height));
        self.scale_x = gc.scale_x / 100.0;
        self.scale_y = gc.scale_y / 100.0;
        self.center_x = f32::from(gc.center_x);
        self.center_y = f32::from(gc.center_y);
        self.screen_width = u32::from(gc.screen_width);
        self.screen_height = u32::from(gc.screen_height);
    }

    fn pressed(&self, bid: u32) -> bool {
        self.button_state & (1 << bid) != 0
    }

    /// Aim point in the game's coordinates; (0, 0) when off-screen.
    fn calculate_position(&self) -> (i16, i16) {
        let (px, py) = self.pointer;
        if px < 0.0 || py < 0.0 || self.pressed(BID_SHOOT_OFFSCREEN) {
            return (0, 0);
        }

        let axis = |p: f32, size: u32, scale: f32, center: f32, param: i16| {
            let f = (p * size as f32 - (size / 2) as f32) * scale;
            let mut v = (f + center).round() as i32;
            v -= if self.param_mode & FLAG_PROGRESSIVE != 0 {
                i32::from(param) / 2
            } else {
                i32::from(param)
            };
            // 0 is reserved for off-screen
            v.clamp(1, i32::from(i16::MAX)) as i16
        };
        (
            axis(px, self.screen_width, self.scale_x, self.center_x, self.param_x),
            axis(py, self.screen_height, self.scale_y, self.center_y, self.param_y),
        )
    }

    /// Builds the 6-byte input report.
    fn report(&mut self) -> [u8; 6] {
        let (mut pos_x, mut pos_y) = self.calculate_position();

        if self.pressed(BID_RECALIBRATE) && self.calibration_timer == 0 {
            self.calibration_timer = CALIBRATION_DELAY;
            self.calibration_pos_x = pos_x;
            self.calibration_pos_y = pos_y;
        }

        let mut buttons =
            (!self.button_state) as u16 | (self.param_mode & FLAG_PROGRESSIVE);
        if self.calibration_timer > 0 {
            buttons &= !(1 << BID_TRIGGER);
            pos_x = self.calibration_pos_x;
            pos_y = self.calibration_pos_y;
            self.calibration_timer -= 1;
            if self.calibration_timer == 0 {
                (pos_x, pos_y) = (0, 0);
            }
        } else if self.pressed(BID_SHOOT_OFFSCREEN) {
            buttons &= !(1 << BID_TRIGGER);
            (pos_x, pos_y) = (0, 0);
        }

        let mut out = [0u8; 6];
        LE::write_u16(&mut out[0..2], buttons);
        LE::write_i16(&mut out[2..4], pos_x);
        LE::write_i16(&mut out[4..6], pos_y);
        out
    }
}

impl DeviceModel for GunCon2 {
    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn handle_control(
        &mut self,
        core: &mut DeviceCore,
        p: &mut Packet,
        setup: SetupData,
    ) {
        // The title is loaded by the time the gun is enumerated.
        if !self.auto_config_done && !self.custom_config {
            self.auto_configure();
            self.auto_config_done = true;
        }

        slog::trace!(self.log, "control request"; "setup" => ?setup);
        if core.handle_standard_request(p, setup).is_ok() {
            return;
        }

        if setup.code() == SET_PARAM {
            let data = core.data_buf();
            self.param_x = LE::read_i16(&data[0..2]);
            self.param_y = LE::read_i16(&data[2..4]);
            self.param_mode = LE::read_u16(&data[4..6]);
            slog::debug!(self.log, "set param";
                "mode" => self.param_mode,
                "x" => self.param_x,
                "y" => self.param_y);
            return;
        }

        stall(p);
    }

    fn handle_data(
        &mut self,
        _core: &mut DeviceCore,
        p: &mut Packet,
        buf: &mut [u8],
    ) {
        let slot = p.ep.map(|ep| ep.slot);
        match (p.pid, slot) {
            (Pid::In, Some(EndpointSlot::In(0))) => {
                let report = self.report();
                p.push_data(buf, &report);
            }
            _ => {
                slog::error!(self.log, "unhandled data request";
                    "pid" => ?p.pid, "ep" => ?slot);
                stall(p);
            }
        }
    }

    fn update_settings(&mut self, config: &Config, port: usize) {
        self.game_serial = config.game_serial.clone();
        self.custom_config =
            config.get_bool(port, TYPE_NAME, "custom_config", false);

        // Settings are only reloaded when auto configuration is not in effect.
        if self.auto_config_done && !self.custom_config {
            return;
        }
        let dimension = |key, default: u32| {
            let v = config.get_int(port, TYPE_NAME, key, default as i32);
            u32::try_from(v).ok().filter(|v| *v > 0).unwrap_or(default)
        };
        self.screen_width = dimension("screen_width", DEFAULT_SCREEN_WIDTH);
        self.screen_height = dimension("screen_height", DEFAULT_SCREEN_HEIGHT);
        self.center_x =
            config.get_float(port, TYPE_NAME, "center_x", DEFAULT_CENTER_X);
        self.center_y =
            config.get_float(port, TYPE_NAME, "center_y", DEFAULT_CENTER_Y);
        self.scale_x =
            config.get_float(port, TYPE_NAME, "scale_x", DEFAULT_SCALE) / 100.0;
        self.scale_y =
            config.get_float(port, TYPE_NAME, "scale_y", DEFAULT_SCALE) / 100.0;
    }

    fn export(&self, w: &mut StateWriter) -> crate::migrate::Result<()> {
        migrate::GunCon2V1 {
            param_x: self.param_x,
            param_y: self.param_y,
            param_mode: self.param_mode,
            calibration_timer: self.calibration_timer,
            calibration_pos_x: self.calibration_pos_x,
            calibration_pos_y: self.calibration_pos_y,
            auto_config_done: self.auto_config_done,
            scale_x: self.scale_x,
            scale_y: self.scale_y,
            center_x: self.center_x,
            center_y: self.center_y,
            screen_width: self.screen_width,
            screen_height: self.screen_height,
        }
        .write(w)
    }

    fn import(&mut self, r: &mut StateReader) -> crate::migrate::Result<()> {
        let saved = migrate::GunCon2V1::read(r)?;
        self.param_x = saved.param_x;
        self.param_y = saved.param_y;
        self.param_mode = saved.param_mode;
        self.calibration_timer = saved.calibration_timer;
        self.calibration_pos_x = saved.calibration_pos_x;
        self.calibration_pos_y = saved.calibration_pos_y;
        self.auto_config_done = saved.auto_config_done;

        // Only automatic screen parameters are taken from the save.
        if !self.custom_config && self.auto_config_done {
            self.scale_x = saved.scale_x;
            self.scale_y = saved.scale_y;
            self.center_x = saved.center_x;
            self.center_y = saved.center_y;
            self.screen_width = saved.screen_width;
            self.screen_height = saved.screen_height;
        }
        Ok(())
    }

    fn binding_value(&self, bind_index: u32) -> f32 {
        match 1u32.checked_shl(bind_index) {
            Some(bit) if self.button_state & bit != 0 => 1.0,
            _ => 0.0,
        }
    }

    fn set_binding_value(&mut self, bind_index: u32, value: f32) {
        let Some(bit) = 1u32.checked_shl(bind_index) else {
            return;
        };
        if value >= 0.5 {
            self.button_state |= bit;
        } else {
            self.button_state &= !bit;
        }
    }

    fn set_pointer_position(&mut self, x: f32, y: f32) {
        self.pointer = (x, y);
    }
}

pub struct GunCon2Proxy;

impl DeviceProxy for GunCon2Proxy {
    fn name(&self) -> &'static str {
        "GunCon 2"
    }

    fn type_name(&self) -> &'static str {
        TYPE_NAME
    }

    fn bindings(&self, _subtype: u32) -> &'static [InputBindingInfo] {
        BINDINGS
    }

    fn settings(&self, _subtype: u32) -> &'static [SettingInfo] {
        SETTINGS
    }

    fn create(
        &self,
        config: &Config,
        port: usize,
        subtype: u32,
        log: &Logger,
    ) -> proxy::Result<Device> {
        if subtype != 0 {
            return Err(proxy::Error::UnsupportedSubtype(TYPE_NAME, subtype));
        }
        let log = log.new(slog::o!("dev" => TYPE_NAME, "port" => port));
        let core = DeviceCore::new(Speed::Full, descriptor(), log.clone());
        let mut gun = GunCon2::new(log);
        gun.update_settings(config, port);
        Ok(Device::new(core, Box::new(gun)))
    }
}

pub mod migrate {
    use crate::migrate::{StateReader, StateWriter};

    pub const MARKER: &str = "GunCon2Device";

    #[derive(Clone, Debug, PartialEq)]
    pub struct GunCon2V1 {
        pub param_x: i16,
        pub param_y: i16,
        pub param_mode: u16,
        pub calibration_timer: u16,
        pub calibration_pos_x: i16,
        pub calibration_pos_y: i16,
        pub auto_config_done: bool,
        pub scale_x: f32,
        pub scale_y: f32,
        pub center_x: f32,
        pub center_y: f32,
        pub screen_width: u32,
        pub screen_height: u32,
    }

    impl GunCon2V1 {
        pub fn write(&self, w: &mut StateWriter) -> crate::migrate::Result<()> {
            w.marker(MARKER)?;
            w.i16(self.param_x)?;
            w.i16(self.param_y)?;
            w.u16(self.param_mode)?;
            w.u16(self.calibration_timer)?;
            w.i16(self.calibration_pos_x)?;
            w.i16(self.calibration_pos_y)?;
            w.bool(self.auto_config_done)?;
            w.f32(self.scale_x)?;
            w.f32(self.scale_y)?;
            w.f32(self.center_x)?;
            w.f32(self.center_y)?;
            w.u32(self.screen_width)?;
            w.u32(self.screen_height)?;
            Ok(())
        }

        pub fn read(r: &mut StateReader) -> crate::migrate::Result<Self> {
            r.expect_marker(MARKER)?;
            Ok(Self {
                param_x: r.i16()?,
                param_y: r.i16()?,
                param_mode: r.u16()?,
                calibration_timer: r.u16()?,
                calibration_pos_x: r.i16()?,
                calibration_pos_y: r.i16()?,
                auto_config_done: r.bool()?,
                scale_x: r.f32()?,
                scale_y: r.f32()?,
                center_x: r.f32()?,
                center_y: r.f32()?,
                screen_width: r.u32()?,
                screen_height: r.u32()?,
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hw::usb::packet::{EndpointAddr, PacketStatus};
    use crate::hw::usb::usbdev::requests::{
        Request, RequestDirection, RequestRecipient, RequestType,
        StandardRequest,
    };
    use crate::test_util::build_log;

    fn gun(config: &Config) -> (DeviceCore, GunCon2) {
        let log = build_log();
        let core = DeviceCore::new(Speed::Full, descriptor(), log.clone());
        let mut gun = GunCon2::new(log);
        gun.update_settings(config, 0);
        (core, gun)
    }

    fn poll(core: &mut DeviceCore, gun: &mut GunCon2) -> (u16, i16, i16) {
        let mut p = Packet::default();
        let ep = EndpointAddr { port: 0, slot: EndpointSlot::In(0) };
        p.setup(Pid::In, ep, 1, false, false, 8);
        let mut buf = [0u8; 8];
        gun.handle_data(core, &mut p, &mut buf);
        assert_eq!(p.actual_length, 6);
        (
            LE::read_u16(&buf[0..2]),
            LE::read_i16(&buf[2..4]),
            LE::read_i16(&buf[4..6]),
        )
    }

    fn control(core: &mut DeviceCore, gun: &mut GunCon2, setup: SetupData) -> Packet {
        let mut p = Packet::default();
        let ep = EndpointAddr { port: 0, slot: EndpointSlot::Control };
        p.setup(Pid::Setup, ep, 1, false, false, 8);
        gun.handle_control(core, &mut p, setup);
        p
    }

    #[test]
    fn centered_pointer_reports_center() {
        let (mut core, mut gun) = gun(&Config::default());
        gun.set_pointer_position(0.5, 0.5);
        assert_eq!(poll(&mut core, &mut gun), (0xffff, 320, 120));

        gun.set_binding_value(BID_TRIGGER, 1.0);
        assert_eq!(gun.binding_value(BID_TRIGGER), 1.0);
        let (buttons, _, _) = poll(&mut core, &mut gun);
        assert_eq!(buttons, !(1u16 << BID_TRIGGER));

        gun.set_binding_value(BID_TRIGGER, 0.4);
        assert_eq!(gun.binding_value(BID_TRIGGER), 0.0);
    }

    #[test]
    fn offscreen_positions() {
        let (mut core, mut gun) = gun(&Config::default());
        gun.set_pointer_position(-1.0, 0.5);
        assert_eq!(poll(&mut core, &mut gun), (0xffff, 0, 0));

        // shooting off-screen also pulls the trigger
        gun.set_pointer_position(0.5, 0.5);
        gun.set_binding_value(BID_SHOOT_OFFSCREEN, 1.0);
        let (buttons, x, y) = poll(&mut core, &mut gun);
        assert_eq!((x, y), (0, 0));
        assert_eq!(buttons & (1 << BID_TRIGGER), 0);

        // the top-left corner is clamped away from (0, 0)
        gun.set_binding_value(BID_SHOOT_OFFSCREEN, 0.0);
        gun.set_pointer_position(0.0, 0.0);
        let (_, x, y) = poll(&mut core, &mut gun);
        assert_eq!((x, y), (1, 1));
    }

    #[test]
    fn recalibration_sequence() {
        let (mut core, mut gun) = gun(&Config::default());
        gun.set_pointer_position(0.5, 0.5);
        gun.set_binding_value(BID_RECALIBRATE, 1.0);

        for _ in 0..CALIBRATION_DELAY - 1 {
            let (buttons, x, y) = poll(&mut core, &mut gun);
            assert_eq!(buttons & (1 << BID_TRIGGER), 0);
            assert_eq!((x, y), (320, 120));
            // the stored shot position wins over pointer movement
            gun.set_pointer_position(0.75, 0.75);
        }
        gun.set_binding_value(BID_RECALIBRATE, 0.0);
        let (_, x, y) = poll(&mut core, &mut gun);
        assert_eq!((x, y), (0, 0));

        let (buttons, x, _) = poll(&mut core, &mut gun);
        assert_eq!(buttons, 0xffff);
        assert_eq!(x, 480);
    }

    #[test]
    fn auto_config_applies_on_first_control_request() {
        let config = Config {
            game_serial: Some("SLUS-20219".to_string()),
            ..Default::default()
        };
        let (mut core, mut gun) = gun(&config);
        let get_config = SetupData(0)
            .with_direction(RequestDirection::DeviceToHost)
            .with_recipient(RequestRecipient::Device)
            .with_request_type(RequestType::Standard)
            .with_request(Request::Standard(StandardRequest::GetConfiguration))
            .with_length(1);
        let p = control(&mut core, &mut gun, get_config);
        assert_eq!(p.status, PacketStatus::Success);
        assert_eq!(p.actual_length, 1);

        assert!(gun.auto_config_done);
        assert_eq!(gun.scale_x, 90.25 / 100.0);
        assert_eq!(gun.center_y, 154.0);
        assert_eq!((gun.screen_width, gun.screen_height), (640, 240));

        // settings no longer override the automatic values
        let mut custom = config.clone();
        custom.set_value(0, usb_config_toml::device_key(TYPE_NAME, "center_y"), 10.0);
        gun.update_settings(&custom, 0);
        assert_eq!(gun.center_y, 154.0);

        custom.set_value(
            0,
            usb_config_toml::device_key(TYPE_NAME, "custom_config"),
            true,
        );
        gun.update_settings(&custom, 0);
        assert_eq!(gun.center_y, 10.0);
    }

    #[test]
    fn set_param_and_progressive_offset() {
        let (mut core, mut gun) = gun(&Config::default());
        let set_param = SetupData(0)
            .with_direction(RequestDirection::HostToDevice)
            .with_recipient(RequestRecipient::Interface)
            .with_request_type(RequestType::Class)
            .with_request(Request::Other(0x09))
            .with_length(6);
        core.data_buf_mut()[..6].copy_from_slice(&[10, 0, 4, 0, 0x00, 0x01]);
        let p = control(&mut core, &mut gun, set_param);
        assert_eq!(p.status, PacketStatus::Success);
        assert_eq!((gun.param_x, gun.param_y, gun.param_mode), (10, 4, 0x100));

        gun.set_pointer_position(0.5, 0.5);
        let (buttons, x, y) = poll(&mut core, &mut gun);
        assert_eq!(buttons, 0xffff);
        assert_eq!((x, y), (315, 118));

        let vendor = set_param.with_request_type(RequestType::Vendor);
        let p = control(&mut core, &mut gun, vendor);
        assert_eq!(p.status, PacketStatus::Stall);
    }

    #[test]
    fn out_transfers_stall() {
        let (mut core, mut gun) = gun(&Config::default());
        let mut p = Packet::default();
        let ep = EndpointAddr { port: 0, slot: EndpointSlot::Out(0) };
        p.setup(Pid::Out, ep, 1, false, false, 8);
        gun.handle_data(&mut core, &mut p, &mut [0u8; 8]);
        assert_eq!(p.status, PacketStatus::Stall);
    }

    #[test]
    fn state_round_trip() {
        let config = Config {
            game_serial: Some("SLUS-20221".to_string()),
            ..Default::default()
        };
        let (_, mut gun) = gun(&config);
        gun.auto_configure();
        gun.auto_config_done = true;
        gun.param_x = -3;
        gun.calibration_timer = 4;

        let mut buf = Vec::new();
        gun.export(&mut StateWriter::new(&mut buf)).unwrap();

        let (_, mut other) = self::gun(&Config::default());
        other.import(&mut StateReader::new(&buf)).unwrap();
        assert_eq!(other.param_x, -3);
        assert_eq!(other.calibration_timer, 4);
        assert_eq!((other.screen_width, other.screen_height), (768, 768));

        // a custom configuration keeps its own screen parameters
        let mut custom = Config::default();
        custom.set_value(
            0,
            usb_config_toml::device_key(TYPE_NAME, "custom_config"),
            true,
        );
        let (_, mut manual) = self::gun(&custom);
        manual.import(&mut StateReader::new(&buf)).unwrap();
        assert_eq!(manual.param_x, -3);
        assert_eq!((manual.screen_width, manual.screen_height), (640, 480));
    }

    #[test]
    fn proxy_builds_full_speed_device() {
        let dev = GunCon2Proxy
            .create(&Config::default(), 1, 0, &build_log())
            .unwrap();
        assert_eq!(dev.type_name(), TYPE_NAME);
        assert_eq!(dev.core.speed, Speed::Full);
        assert_eq!(dev.core.descriptor().vendor_id.0, 0x0b9a);
        assert!(GunCon2Proxy
            .create(&Config::default(), 1, 1, &build_log())
            .is_err());
    }
}
