//! Deciding what a device is from its capability bitmaps.

use serde::Serialize;
use std::fmt;

use crate::caps::DeviceCapabilities;
use crate::codes::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Reject,
    Touch,
    Input,
    Activity,
    Ignore,
    Doubletap,
    ProximitySensor,
    AmbientLight,
    VolumeKey,
    Keyboard,
}

impl DeviceKind {
    pub fn repr(self) -> &'static str {
        match self {
            DeviceKind::Reject => "REJECT",
            DeviceKind::Touch => "TOUCH",
            DeviceKind::Input => "INPUT",
            DeviceKind::Activity => "ACTIVITY",
            DeviceKind::Ignore => "IGNORE",
            DeviceKind::Doubletap => "DOUBLE_TAP",
            DeviceKind::ProximitySensor => "PROXIMITY_SENSOR",
            DeviceKind::AmbientLight => "LIGHT_SENSOR",
            DeviceKind::VolumeKey => "VOLUME_KEYS",
            DeviceKind::Keyboard => "KEYBOARD",
        }
    }

    /// Parses a type name as used in device type override rules.
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name.trim().to_ascii_uppercase().as_str() {
            "REJECT" => DeviceKind::Reject,
            "TOUCH" => DeviceKind::Touch,
            "INPUT" => DeviceKind::Input,
            "ACTIVITY" => DeviceKind::Activity,
            "IGNORE" => DeviceKind::Ignore,
            "DOUBLE_TAP" | "DBLTAP" => DeviceKind::Doubletap,
            "PS" | "PROXIMITY_SENSOR" => DeviceKind::ProximitySensor,
            "ALS" | "LIGHT_SENSOR" => DeviceKind::AmbientLight,
            "VOLKEY" | "VOLUME_KEYS" => DeviceKind::VolumeKey,
            "KEYBOARD" => DeviceKind::Keyboard,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.repr())
    }
}

const DOUBLETAP_KEYS: &[u16] = &[KEY_POWER, KEY_MENU, KEY_BACK, KEY_HOMEPAGE];

const VOLUME_KEYS: &[u16] = &[KEY_VOLUMEDOWN, KEY_VOLUMEUP];

const INPUT_KEYS: &[u16] = &[
    KEY_CAMERA,
    KEY_CAMERA_FOCUS,
    KEY_POWER,
    KEY_SCREENLOCK,
    KEY_VOLUMEDOWN,
    KEY_VOLUMEUP,
    KEY_WAKEUP,
];

const INPUT_SWITCHES: &[u16] = &[
    SW_CAMERA_LENS_COVER,
    SW_FRONT_PROXIMITY,
    SW_HEADPHONE_INSERT,
    SW_KEYPAD_SLIDE,
    SW_LID,
    SW_LINEOUT_INSERT,
    SW_MICROPHONE_INSERT,
    SW_VIDEOOUT_INSERT,
];

const ACTIVITY_TYPES: &[u16] = &[EV_KEY, EV_REL, EV_ABS, EV_MSC, EV_SW];

/// Classifies a device; the first matching rule decides.
pub fn classify(caps: &DeviceCapabilities) -> DeviceKind {
    if let Some(kind) = sensor_kind(caps) {
        return kind;
    }

    // joysticks and 3D pointers
    if caps.has_code(EV_KEY, BTN_Z) || caps.has_code(EV_REL, REL_Z) || caps.has_code(EV_ABS, ABS_Z)
    {
        return DeviceKind::Reject;
    }

    if is_touch(caps) {
        return DeviceKind::Touch;
    }

    if caps.match_types_exact(&[EV_KEY], &[]) && caps.match_codes_exact(EV_KEY, DOUBLETAP_KEYS) {
        return DeviceKind::Doubletap;
    }

    if caps.has_code(EV_KEY, KEY_Q) && caps.has_code(EV_KEY, KEY_P) {
        return DeviceKind::Keyboard;
    }

    if is_volume_keys(caps) {
        return DeviceKind::VolumeKey;
    }

    if caps.has_any_code(EV_KEY, INPUT_KEYS) || caps.has_any_code(EV_SW, INPUT_SWITCHES) {
        return DeviceKind::Input;
    }

    if is_lonely_axis(caps) {
        return DeviceKind::Reject;
    }

    if caps.has_any_type(ACTIVITY_TYPES) {
        return DeviceKind::Activity;
    }

    DeviceKind::Ignore
}

fn sensor_kind(caps: &DeviceCapabilities) -> Option<DeviceKind> {
    if !caps.match_types_exact(&[EV_ABS], &[]) {
        return None;
    }
    if caps.match_codes_exact(EV_ABS, &[ABS_MISC]) {
        Some(DeviceKind::AmbientLight)
    } else if caps.match_codes_exact(EV_ABS, &[ABS_DISTANCE]) {
        Some(DeviceKind::ProximitySensor)
    } else {
        None
    }
}

fn is_touch(caps: &DeviceCapabilities) -> bool {
    let single = caps.has_code(EV_KEY, BTN_TOUCH)
        && caps.has_code(EV_ABS, ABS_X)
        && caps.has_code(EV_ABS, ABS_Y);
    let multi =
        caps.has_code(EV_ABS, ABS_MT_POSITION_X) && caps.has_code(EV_ABS, ABS_MT_POSITION_Y);
    let mouse = caps.has_code(EV_KEY, BTN_MOUSE)
        && caps.has_code(EV_REL, REL_X)
        && caps.has_code(EV_REL, REL_Y);
    single || multi || mouse
}

// Plain volume key devices may also advertise autorepeat; the variant that
// carries a lid switch may not.
fn is_volume_keys(caps: &DeviceCapabilities) -> bool {
    let plain = caps.match_types_exact(&[EV_KEY], &[EV_REP])
        && caps.match_codes_exact(EV_KEY, VOLUME_KEYS);
    let with_lid = caps.match_types_exact(&[EV_KEY, EV_SW], &[])
        && caps.match_codes_exact(EV_KEY, VOLUME_KEYS)
        && caps.match_codes_exact(EV_SW, &[SW_LID]);
    plain || with_lid
}

// Half of a coordinate pair, or a sensor-like axis on an ABS-only device
// that did not match the sensor rules.
fn is_lonely_axis(caps: &DeviceCapabilities) -> bool {
    let abs_only_sensor_axis = caps.match_types_exact(&[EV_ABS], &[])
        && (caps.has_code(EV_ABS, ABS_MISC) ^ caps.has_code(EV_ABS, ABS_DISTANCE))
        && caps
            .bitmap(EV_ABS)
            .map(|m| m.codes().all(|c| c == ABS_MISC || c == ABS_DISTANCE))
            .unwrap_or(false);
    let half = |t: u16, a: u16, b: u16| caps.has_code(t, a) ^ caps.has_code(t, b);
    abs_only_sensor_axis || half(EV_KEY, BTN_X, BTN_Y) || half(EV_REL, REL_X, REL_Y) || half(EV_ABS, ABS_X, ABS_Y)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TypeRule {
    kind: DeviceKind,
    on_probed: Option<DeviceKind>,
}

/// Per-device overrides of the probed kind.
///
/// Rules are `TYPE[:ON_PROBED]` separated by `;`. The first rule whose
/// `ON_PROBED` is absent or equals the probed kind wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeOverride {
    rules: Vec<TypeRule>,
}

impl TypeOverride {
    pub fn parse(text: &str) -> Option<Self> {
        let mut rules = Vec::new();
        for rule in text.split(';').map(str::trim).filter(|r| !r.is_empty()) {
            let (kind, on) = match rule.split_once(':') {
                Some((k, on)) => (k, Some(on)),
                None => (rule, None),
            };
            let Some(kind) = DeviceKind::parse(kind) else {
                log::warn!("device type override '{rule}': unknown type");
                continue;
            };
            let on_probed = match on.map(str::trim).filter(|s| !s.is_empty()) {
                None => None,
                Some(on) => match DeviceKind::parse(on) {
                    Some(k) => Some(k),
                    None => {
                        log::warn!("device type override '{rule}': unknown probed type");
                        continue;
                    }
                },
            };
            rules.push(TypeRule { kind, on_probed });
        }
        if rules.is_empty() { None } else { Some(Self { rules }) }
    }

    pub fn apply(&self, probed: DeviceKind) -> DeviceKind {
        self.rules
            .iter()
            .find(|r| r.on_probed.is_none_or(|k| k == probed))
            .map(|r| r.kind)
            .unwrap_or(probed)
    }
}

/// Turns a device name into a configuration key: illegal characters at the
/// ends are dropped and inner runs of them become a single `_`.
pub fn sanitize_key(name: &str) -> String {
    let illegal = |c: char| c <= ' ' || c >= '\u{80}' || matches!(c, '[' | ']' | '=');
    let mut out = String::with_capacity(name.len());
    let mut pending = false;
    for c in name.trim_matches(illegal).chars() {
        if illegal(c) {
            pending = true;
            continue;
        }
        if pending {
            out.push('_');
            pending = false;
        }
        out.push(c);
    }
    out
}

/// Configuration key derived from bus, vendor and product ids.
pub fn id_key(bus: u16, vendor: u16, product: u16) -> String {
    format!("b{bus:04x}v{vendor:04x}p{product:04x}")
}
