//! Kernel event type/code numbers and name lookup.
//!
//! Codes are kept as plain `u16` so that bitmaps, mappings and the device
//! handlers can compare them without converting between the evdev newtypes.

use evdev::{
    AbsoluteAxisCode, EventType, KeyCode, MiscCode, RelativeAxisCode, SwitchCode,
    SynchronizationCode,
};

pub const EV_SYN: u16 = EventType::SYNCHRONIZATION.0;
pub const EV_KEY: u16 = EventType::KEY.0;
pub const EV_REL: u16 = EventType::RELATIVE.0;
pub const EV_ABS: u16 = EventType::ABSOLUTE.0;
pub const EV_MSC: u16 = EventType::MISC.0;
pub const EV_SW: u16 = EventType::SWITCH.0;
pub const EV_LED: u16 = EventType::LED.0;
pub const EV_SND: u16 = EventType::SOUND.0;
pub const EV_REP: u16 = EventType::REPEAT.0;
pub const EV_FF: u16 = EventType::FORCEFEEDBACK.0;
pub const EV_PWR: u16 = EventType::POWER.0;
pub const EV_FF_STATUS: u16 = EventType::FORCEFEEDBACKSTATUS.0;

// Bitmap sizes, mirroring <linux/input-event-codes.h>.
pub const EV_CNT: usize = 0x20;
pub const KEY_CNT: usize = 0x300;
pub const REL_CNT: usize = 0x10;
pub const ABS_CNT: usize = 0x40;
pub const MSC_CNT: usize = 0x08;
pub const SW_CNT: usize = 0x11;

/// Highest switch code; used as the "no such switch" answer of reverse lookups.
pub const SW_MAX: u16 = 0x10;

pub const SYN_REPORT: u16 = SynchronizationCode::SYN_REPORT.0;
pub const SYN_MT_REPORT: u16 = SynchronizationCode::SYN_MT_REPORT.0;

pub const KEY_BACK: u16 = KeyCode::KEY_BACK.0;
pub const KEY_CAMERA: u16 = KeyCode::KEY_CAMERA.0;
pub const KEY_CAMERA_FOCUS: u16 = KeyCode::KEY_CAMERA_FOCUS.0;
pub const KEY_HOMEPAGE: u16 = KeyCode::KEY_HOMEPAGE.0;
pub const KEY_MENU: u16 = KeyCode::KEY_MENU.0;
pub const KEY_P: u16 = KeyCode::KEY_P.0;
pub const KEY_POWER: u16 = KeyCode::KEY_POWER.0;
pub const KEY_Q: u16 = KeyCode::KEY_Q.0;
// Shares its number with KEY_COFFEE.
pub const KEY_SCREENLOCK: u16 = 152;
pub const KEY_VOLUMEDOWN: u16 = KeyCode::KEY_VOLUMEDOWN.0;
pub const KEY_VOLUMEUP: u16 = KeyCode::KEY_VOLUMEUP.0;
pub const KEY_WAKEUP: u16 = KeyCode::KEY_WAKEUP.0;

pub const BTN_MOUSE: u16 = KeyCode::BTN_LEFT.0;
pub const BTN_TOUCH: u16 = KeyCode::BTN_TOUCH.0;
// BTN_X and BTN_Y in the kernel headers.
pub const BTN_X: u16 = KeyCode::BTN_NORTH.0;
pub const BTN_Y: u16 = KeyCode::BTN_WEST.0;
pub const BTN_Z: u16 = KeyCode::BTN_Z.0;

pub const REL_X: u16 = RelativeAxisCode::REL_X.0;
pub const REL_Y: u16 = RelativeAxisCode::REL_Y.0;
pub const REL_Z: u16 = RelativeAxisCode::REL_Z.0;

pub const ABS_X: u16 = AbsoluteAxisCode::ABS_X.0;
pub const ABS_Y: u16 = AbsoluteAxisCode::ABS_Y.0;
pub const ABS_Z: u16 = AbsoluteAxisCode::ABS_Z.0;
pub const ABS_PRESSURE: u16 = AbsoluteAxisCode::ABS_PRESSURE.0;
pub const ABS_DISTANCE: u16 = AbsoluteAxisCode::ABS_DISTANCE.0;
pub const ABS_MISC: u16 = AbsoluteAxisCode::ABS_MISC.0;
pub const ABS_MT_TOUCH_MAJOR: u16 = AbsoluteAxisCode::ABS_MT_TOUCH_MAJOR.0;
pub const ABS_MT_POSITION_X: u16 = AbsoluteAxisCode::ABS_MT_POSITION_X.0;
pub const ABS_MT_POSITION_Y: u16 = AbsoluteAxisCode::ABS_MT_POSITION_Y.0;
pub const ABS_MT_TRACKING_ID: u16 = AbsoluteAxisCode::ABS_MT_TRACKING_ID.0;
pub const ABS_MT_PRESSURE: u16 = AbsoluteAxisCode::ABS_MT_PRESSURE.0;

pub const MSC_GESTURE: u16 = MiscCode::MSC_GESTURE.0;

pub const SW_LID: u16 = SwitchCode::SW_LID.0;
pub const SW_HEADPHONE_INSERT: u16 = SwitchCode::SW_HEADPHONE_INSERT.0;
pub const SW_MICROPHONE_INSERT: u16 = SwitchCode::SW_MICROPHONE_INSERT.0;
pub const SW_CAMERA_LENS_COVER: u16 = SwitchCode::SW_CAMERA_LENS_COVER.0;
pub const SW_KEYPAD_SLIDE: u16 = SwitchCode::SW_KEYPAD_SLIDE.0;
pub const SW_FRONT_PROXIMITY: u16 = SwitchCode::SW_FRONT_PROXIMITY.0;
pub const SW_LINEOUT_INSERT: u16 = SwitchCode::SW_LINEOUT_INSERT.0;
pub const SW_VIDEOOUT_INSERT: u16 = SwitchCode::SW_VIDEOOUT_INSERT.0;

/// MSC_GESTURE value for a double tap.
pub const GESTURE_DOUBLETAP: i32 = 4;
/// Flag or-ed into gesture values that were produced in user space.
pub const GESTURE_SYNTHESIZED: i32 = 1 << 8;

/// Human readable event type name, for logging.
pub fn type_name(ev_type: u16) -> String {
    match ev_type {
        EV_SYN => "EV_SYN".into(),
        EV_KEY => "EV_KEY".into(),
        EV_REL => "EV_REL".into(),
        EV_ABS => "EV_ABS".into(),
        EV_MSC => "EV_MSC".into(),
        EV_SW => "EV_SW".into(),
        EV_LED => "EV_LED".into(),
        EV_SND => "EV_SND".into(),
        EV_REP => "EV_REP".into(),
        EV_FF => "EV_FF".into(),
        EV_PWR => "EV_PWR".into(),
        EV_FF_STATUS => "EV_FF_STATUS".into(),
        other => format!("EV_0x{other:02x}"),
    }
}

/// Human readable code name, falling back to hex for codes evdev does not know.
pub fn code_name(ev_type: u16, code: u16) -> String {
    let name = match ev_type {
        EV_SYN => format!("{:?}", SynchronizationCode(code)),
        EV_KEY => format!("{:?}", KeyCode(code)),
        EV_REL => format!("{:?}", RelativeAxisCode(code)),
        EV_ABS => format!("{:?}", AbsoluteAxisCode(code)),
        EV_MSC => format!("{:?}", MiscCode(code)),
        EV_SW => format!("{:?}", SwitchCode(code)),
        _ => String::new(),
    };
    if is_symbolic(&name) {
        name
    } else {
        format!("0x{code:03x}")
    }
}

/// Event type implied by a code name prefix.
pub fn type_for_name(name: &str) -> Option<u16> {
    if name.starts_with("KEY_") || name.starts_with("BTN_") {
        Some(EV_KEY)
    } else if name.starts_with("SW_") {
        Some(EV_SW)
    } else {
        None
    }
}

/// Kernel header names that share a number with another name. evdev prints
/// only one name per code, so both spellings are listed here.
const ALIASES: &[(u16, &str, u16)] = &[
    (EV_KEY, "KEY_HANGEUL", 122),
    (EV_KEY, "KEY_HANGUEL", 122),
    (EV_KEY, "KEY_COFFEE", 152),
    (EV_KEY, "KEY_SCREENLOCK", 152),
    (EV_KEY, "KEY_ROTATE_DISPLAY", 153),
    (EV_KEY, "KEY_DIRECTION", 153),
    (EV_KEY, "KEY_BRIGHTNESS_AUTO", 244),
    (EV_KEY, "KEY_BRIGHTNESS_ZERO", 244),
    (EV_KEY, "KEY_WWAN", 246),
    (EV_KEY, "KEY_WIMAX", 246),
    (EV_KEY, "BTN_0", 0x100),
    (EV_KEY, "BTN_MISC", 0x100),
    (EV_KEY, "BTN_LEFT", 0x110),
    (EV_KEY, "BTN_MOUSE", 0x110),
    (EV_KEY, "BTN_TRIGGER", 0x120),
    (EV_KEY, "BTN_JOYSTICK", 0x120),
    (EV_KEY, "BTN_SOUTH", 0x130),
    (EV_KEY, "BTN_A", 0x130),
    (EV_KEY, "BTN_GAMEPAD", 0x130),
    (EV_KEY, "BTN_EAST", 0x131),
    (EV_KEY, "BTN_B", 0x131),
    (EV_KEY, "BTN_NORTH", 0x133),
    (EV_KEY, "BTN_X", 0x133),
    (EV_KEY, "BTN_WEST", 0x134),
    (EV_KEY, "BTN_Y", 0x134),
    (EV_KEY, "BTN_TOOL_PEN", 0x140),
    (EV_KEY, "BTN_DIGI", 0x140),
    (EV_KEY, "BTN_GEAR_DOWN", 0x150),
    (EV_KEY, "BTN_WHEEL", 0x150),
    (EV_KEY, "KEY_ZOOM", 0x174),
    (EV_KEY, "KEY_FULL_SCREEN", 0x174),
    (EV_KEY, "KEY_DISPLAYTOGGLE", 0x1af),
    (EV_KEY, "KEY_BRIGHTNESS_TOGGLE", 0x1af),
    (EV_SW, "SW_RFKILL_ALL", 0x03),
    (EV_SW, "SW_RADIO", 0x03),
];

/// Resolves a code name such as `KEY_POWER` within the given event type.
pub fn code_by_name(ev_type: u16, name: &str) -> Option<u16> {
    if let Some(&(_, _, code)) = ALIASES
        .iter()
        .find(|&&(t, alias, _)| t == ev_type && alias == name)
    {
        return Some(code);
    }
    let limit = match ev_type {
        EV_KEY => KEY_CNT,
        EV_SW => SW_CNT,
        EV_REL => REL_CNT,
        EV_ABS => ABS_CNT,
        EV_MSC => MSC_CNT,
        _ => return None,
    };
    (0..limit as u16).find(|&code| code_name(ev_type, code) == name)
}

fn is_symbolic(name: &str) -> bool {
    let mut parts = name.splitn(2, '_');
    match (parts.next(), parts.next()) {
        (Some(prefix), Some(rest)) => {
            !prefix.is_empty()
                && !rest.is_empty()
                && name
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
        }
        _ => false,
    }
}
