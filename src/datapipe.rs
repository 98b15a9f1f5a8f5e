//! Everything the input subsystem tells the rest of the daemon.
//!
//! The subsystem only publishes through [`Datapipe`]; ambient light and
//! proximity sensor nodes are handed over through [`SensorHub`].

use log::{debug, info};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::devices::EvdevNode;
use crate::event::RawEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverState {
    Undef,
    Open,
    Closed,
}

impl CoverState {
    pub fn closed_if(closed: bool) -> Self {
        if closed { Self::Closed } else { Self::Open }
    }
}

/// Whether a grab controller currently lets input through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputPolicy {
    Unknown,
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverSource {
    LensCover,
    KeyboardSlide,
    Proximity,
    Lid,
    JackSense,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayState {
    #[default]
    Undef,
    Off,
    LpmOff,
    LpmOn,
    Dim,
    On,
    PowerUp,
    PowerDown,
}

impl DisplayState {
    pub fn parse(name: &str) -> Option<Self> {
        let state = match name.trim().to_ascii_lowercase().as_str() {
            "undef" => Self::Undef,
            "off" => Self::Off,
            "lpm_off" | "lpm-off" => Self::LpmOff,
            "lpm_on" | "lpm-on" => Self::LpmOn,
            "dim" => Self::Dim,
            "on" => Self::On,
            "power_up" | "power-up" => Self::PowerUp,
            "power_down" | "power-down" => Self::PowerDown,
            _ => return None,
        };
        Some(state)
    }

    pub fn is_on(self) -> bool {
        matches!(self, Self::On | Self::Dim)
    }

    /// Display is off or showing only the low power view.
    pub fn is_low_power(self) -> bool {
        matches!(self, Self::Off | Self::LpmOff | Self::LpmOn)
    }
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Undef => "undef",
            Self::Off => "off",
            Self::LpmOff => "lpm_off",
            Self::LpmOn => "lpm_on",
            Self::Dim => "dim",
            Self::On => "on",
            Self::PowerUp => "power_up",
            Self::PowerDown => "power_down",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    TouchGrabActive(bool),
    KeypadGrabActive(bool),
    TouchInputPolicy(InputPolicy),
    KeypadInputPolicy(InputPolicy),
    TouchDetected(bool),
    Cover(CoverSource, CoverState),
    KeyboardAvailable(CoverState),
    LockKey(bool),
    Keypress(RawEvent),
    Touchscreen(RawEvent),
    /// Rate limited activity from ordinary input.
    Activity(RawEvent),
    /// Rate limited activity from power key and gestures.
    RawActivity(RawEvent),
    LedPattern { pattern: &'static str, active: bool },
}

pub trait Datapipe {
    fn publish(&mut self, signal: Signal);
}

/// Receiver of ambient light and proximity sensor nodes.
pub trait SensorHub {
    fn attach_als(&mut self, node: Box<dyn EvdevNode>);
    fn attach_ps(&mut self, node: Box<dyn EvdevNode>);
    /// Drops the sensor node at `path`; returns whether one was held.
    fn detach(&mut self, path: &Path) -> bool;
}

/// Production datapipe: logs every signal and keeps the latest state values
/// for `status` queries.
#[derive(Debug, Default)]
pub struct StatePipe {
    states: BTreeMap<&'static str, serde_json::Value>,
    events: u64,
}

impl StatePipe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> serde_json::Value {
        let mut v = serde_json::json!(self.states);
        v["events"] = serde_json::json!(self.events);
        v
    }

    fn set<T: Serialize>(&mut self, key: &'static str, value: T) {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        if self.states.get(key) != Some(&value) {
            info!("{key} = {value}");
            self.states.insert(key, value);
        }
    }
}

fn cover_key(source: CoverSource) -> &'static str {
    match source {
        CoverSource::LensCover => "lens_cover",
        CoverSource::KeyboardSlide => "keyboard_slide",
        CoverSource::Proximity => "proximity",
        CoverSource::Lid => "lid",
        CoverSource::JackSense => "jack_sense",
    }
}

impl Datapipe for StatePipe {
    fn publish(&mut self, signal: Signal) {
        match signal {
            Signal::TouchGrabActive(on) => self.set("touch_grab_active", on),
            Signal::KeypadGrabActive(on) => self.set("keypad_grab_active", on),
            Signal::TouchInputPolicy(p) => self.set("touch_input_policy", p),
            Signal::KeypadInputPolicy(p) => self.set("keypad_input_policy", p),
            Signal::TouchDetected(on) => self.set("touch_detected", on),
            Signal::Cover(source, state) => self.set(cover_key(source), state),
            Signal::KeyboardAvailable(state) => self.set("keyboard_available", state),
            Signal::LockKey(on) => self.set("lockkey", on),
            Signal::LedPattern { pattern, active } => {
                info!("led {pattern}: {}", if active { "activate" } else { "deactivate" });
                self.set("touch_blocked_led", active);
            }
            Signal::Keypress(ev) | Signal::Touchscreen(ev) => {
                self.events += 1;
                debug!("input {}", ev.describe());
            }
            Signal::Activity(ev) => debug!("activity ({})", ev.describe()),
            Signal::RawActivity(ev) => debug!("raw activity ({})", ev.describe()),
        }
    }
}

/// Keeps sensor nodes open until their device node goes away.
#[derive(Default)]
pub struct HeldSensors {
    als: HashMap<PathBuf, Box<dyn EvdevNode>>,
    ps: HashMap<PathBuf, Box<dyn EvdevNode>>,
}

impl HeldSensors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .als
            .keys()
            .chain(self.ps.keys())
            .map(|p| p.display().to_string())
            .collect();
        paths.sort();
        paths
    }
}

impl SensorHub for HeldSensors {
    fn attach_als(&mut self, node: Box<dyn EvdevNode>) {
        info!("{}: ambient light sensor handed over", node.path().display());
        self.ps.remove(node.path());
        self.als.insert(node.path().to_path_buf(), node);
    }

    fn attach_ps(&mut self, node: Box<dyn EvdevNode>) {
        info!("{}: proximity sensor handed over", node.path().display());
        self.als.remove(node.path());
        self.ps.insert(node.path().to_path_buf(), node);
    }

    fn detach(&mut self, path: &Path) -> bool {
        let held = self.als.remove(path).is_some() | self.ps.remove(path).is_some();
        if held {
            info!("{}: sensor released", path.display());
        }
        held
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Records everything published.
    #[derive(Debug, Default)]
    pub(crate) struct Recorder {
        pub signals: Vec<Signal>,
    }

    impl Recorder {
        pub fn take(&mut self) -> Vec<Signal> {
            std::mem::take(&mut self.signals)
        }
    }

    impl Datapipe for Recorder {
        fn publish(&mut self, signal: Signal) {
            self.signals.push(signal);
        }
    }

    #[test]
    fn state_pipe_keeps_latest_values() {
        let mut pipe = StatePipe::new();
        pipe.publish(Signal::TouchGrabActive(true));
        pipe.publish(Signal::Cover(CoverSource::Lid, CoverState::Closed));
        pipe.publish(Signal::TouchGrabActive(false));
        let snap = pipe.snapshot();
        assert_eq!(snap["touch_grab_active"], serde_json::json!(false));
        assert_eq!(snap["lid"], serde_json::json!("closed"));
    }

    #[test]
    fn display_state_names() {
        assert_eq!(DisplayState::parse("LPM_ON"), Some(DisplayState::LpmOn));
        assert_eq!(DisplayState::parse("power-up"), Some(DisplayState::PowerUp));
        assert_eq!(DisplayState::parse("bright"), None);
        assert!(DisplayState::Dim.is_on());
        assert!(DisplayState::LpmOff.is_low_power());
        assert!(!DisplayState::PowerDown.is_low_power());
        assert_eq!(DisplayState::LpmOff.to_string(), "lpm_off");
    }
}
