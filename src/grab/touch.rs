//! Touch screen grab: keeps the panel grabbed while the display is off and
//! makes sure a finger already on the glass cannot leak into the UI.

use log::{debug, error, info};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{GrabPolicy, GrabTarget, InputGrab};
use crate::classify::DeviceKind;
use crate::codes::*;
use crate::datapipe::{DisplayState, InputPolicy, Signal};
use crate::event::RawEvent;
use crate::timer::{self, Timer};

pub const DEFAULT_UNBLOCK_DELAY: Duration = Duration::from_millis(100);
/// Release delay while the display is powering up.
pub const UNBLANK_DELAY: Duration = Duration::from_millis(600);
pub const LED_ACTIVATE_DELAY: Duration = Duration::from_millis(200);
pub const LED_PATTERN_TOUCH_BLOCKED: &str = "PatternTouchInputBlocked";
pub const DEFAULT_PALM_PATH: &str = "/sys/devices/i2c-3/3-0020/palm_status";

/// Per-device "is a finger down" tracking.
#[derive(Debug, Clone, Default)]
pub struct TouchFilter {
    button: bool,
    pos_x: bool,
    pos_y: bool,
    contact: bool,
    frame_touching: bool,
    touching: bool,
}

impl TouchFilter {
    pub fn touching(&self) -> bool {
        self.touching
    }

    /// Feeds one event; returns the touch state at the end of every frame.
    pub fn feed(&mut self, ev: &RawEvent) -> Option<bool> {
        match (ev.ev_type, ev.code) {
            (EV_KEY, BTN_TOUCH | BTN_MOUSE) => self.button = ev.value != 0,
            (EV_ABS, ABS_MT_POSITION_X) => self.pos_x = true,
            (EV_ABS, ABS_MT_POSITION_Y) => self.pos_y = true,
            (EV_ABS, ABS_MT_PRESSURE | ABS_MT_TOUCH_MAJOR) => {
                if ev.value > 0 {
                    self.contact = true;
                }
            }
            (EV_SYN, SYN_MT_REPORT) => self.end_contact(),
            (EV_SYN, SYN_REPORT) => {
                self.end_contact();
                self.touching = self.button || self.frame_touching;
                self.frame_touching = false;
                return Some(self.touching);
            }
            _ => {}
        }
        None
    }

    fn end_contact(&mut self) {
        if self.pos_x && self.pos_y && self.contact {
            self.frame_touching = true;
        }
        self.pos_x = false;
        self.pos_y = false;
        self.contact = false;
    }
}

/// Palm detection flag exported by some touch controllers.
#[derive(Debug, Clone)]
pub struct PalmSensor {
    path: PathBuf,
}

impl PalmSensor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True unless the sensor reports a palm on the panel.
    pub fn released(&self) -> bool {
        match fs::read_to_string(&self.path) {
            Ok(text) => parse_flag(&text) == 0,
            Err(e) if e.kind() == io::ErrorKind::NotFound => true,
            Err(e) => {
                error!("can't read {}: {e}", self.path.display());
                true
            }
        }
    }
}

// strtol-style: optional sign, 0x/0 prefixes, trailing junk ignored
fn parse_flag(text: &str) -> i64 {
    let t = text.trim_start();
    let (neg, t) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t.strip_prefix('+').unwrap_or(t)),
    };
    let (radix, digits) = if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        (16, hex)
    } else if t.len() > 1 && t.starts_with('0') {
        (8, &t[1..])
    } else {
        (10, t)
    };
    let end = digits
        .find(|c: char| !c.is_digit(radix))
        .unwrap_or(digits.len());
    let value = i64::from_str_radix(&digits[..end], radix).unwrap_or(0);
    if neg { -value } else { value }
}

#[derive(Debug)]
pub struct TouchGrabPolicy {
    palm: PalmSensor,
}

impl<E: GrabTarget + ?Sized> GrabPolicy<E> for TouchGrabPolicy {
    fn grab_changed(&mut self, env: &mut E, grab: bool) {
        env.grab_devices(DeviceKind::Touch, grab);
        env.publish(Signal::TouchGrabActive(grab));
    }

    fn release_verify(&mut self, _env: &mut E) -> bool {
        self.palm.released()
    }

    fn policy_changed(&mut self, env: &mut E, policy: InputPolicy) {
        env.publish(Signal::TouchInputPolicy(policy));
    }
}

/// Touch grab controller ("ts").
#[derive(Debug)]
pub struct TouchGrab {
    grab: InputGrab<TouchGrabPolicy>,
    unblock_delay: Duration,
    display: DisplayState,
    touch_detected: bool,
    led_wanted: bool,
    led_timer: Timer,
}

impl TouchGrab {
    pub fn new(unblock_delay: Duration, palm: PalmSensor) -> Self {
        info!("touch unblock delay: {} ms", unblock_delay.as_millis());
        Self {
            grab: InputGrab::new("ts", unblock_delay, TouchGrabPolicy { palm }),
            unblock_delay,
            display: DisplayState::Undef,
            touch_detected: false,
            led_wanted: false,
            led_timer: Timer::default(),
        }
    }

    pub fn state(&self) -> &InputGrab<TouchGrabPolicy> {
        &self.grab
    }

    pub fn display(&self) -> DisplayState {
        self.display
    }

    pub fn touch_detected(&self) -> bool {
        self.touch_detected
    }

    pub fn unblock_delay(&self) -> Duration {
        self.unblock_delay
    }

    /// New delay is used from the next unblank on.
    pub fn set_unblock_delay(&mut self, delay: Duration) {
        if self.unblock_delay != delay {
            info!(
                "touch unblock delay changed: {} -> {} ms",
                self.unblock_delay.as_millis(),
                delay.as_millis()
            );
            self.unblock_delay = delay;
        }
    }

    pub fn request<E: GrabTarget + ?Sized>(&mut self, env: &mut E, want: bool, now: Instant) {
        self.grab.request_grab(env, want, now);
        self.rethink_led(env, now);
    }

    pub fn allow<E: GrabTarget + ?Sized>(&mut self, env: &mut E, allow: bool, now: Instant) {
        self.grab.allow_grab(env, allow, now);
        self.rethink_led(env, now);
    }

    /// Aggregate finger-on-panel state from all touch devices.
    pub fn set_touch_detected<E: GrabTarget + ?Sized>(
        &mut self,
        env: &mut E,
        detected: bool,
        now: Instant,
    ) {
        if self.touch_detected != detected {
            debug!("touch_detected = {detected}");
            self.touch_detected = detected;
            env.publish(Signal::TouchDetected(detected));
        }
        self.grab.set_touching(env, detected, now);
        self.rethink_led(env, now);
    }

    pub fn display_changed<E: GrabTarget + ?Sized>(
        &mut self,
        env: &mut E,
        state: DisplayState,
        now: Instant,
    ) {
        let prev = self.display;
        if prev == state {
            return;
        }
        self.display = state;
        debug!("display state {prev} -> {state}");

        match state {
            DisplayState::PowerDown
            | DisplayState::Off
            | DisplayState::LpmOn
            | DisplayState::LpmOff => {
                // grab without waiting for the finger to lift
                self.grab.reset();
                self.grab.rethink(env, now);
            }
            DisplayState::PowerUp | DisplayState::On | DisplayState::Dim => {
                if state == DisplayState::PowerUp {
                    // fake a touch so the grab is held until real input arrives
                    self.grab.set_release_delay(UNBLANK_DELAY);
                    if !self.touch_detected {
                        self.grab.set_touching(env, true, now);
                        self.grab.set_touching(env, false, now);
                    }
                }
                self.grab.set_release_delay(self.unblock_delay);
                if !prev.is_on() {
                    self.grab.set_touching(env, self.touch_detected, now);
                }
            }
            DisplayState::Undef => {}
        }
        self.rethink_led(env, now);
    }

    pub fn poll<E: GrabTarget + ?Sized>(&mut self, env: &mut E, now: Instant) {
        self.grab.poll(env, now);
        if self.led_timer.expire(now) {
            env.publish(Signal::LedPattern {
                pattern: LED_PATTERN_TOUCH_BLOCKED,
                active: true,
            });
        }
        self.rethink_led(env, now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        timer::earliest([self.grab.release_deadline(), self.led_timer.deadline()])
    }

    /// Drops pending state without touching the devices; used at shutdown.
    pub fn reset(&mut self) {
        self.grab.reset();
        self.led_timer.cancel();
    }

    // activation is debounced, deactivation is immediate
    fn rethink_led<E: GrabTarget + ?Sized>(&mut self, env: &mut E, now: Instant) {
        let enable = self.display.is_on() && self.grab.is_grabbed();
        if self.led_wanted == enable {
            return;
        }
        self.led_wanted = enable;
        if enable {
            self.led_timer.restart(now, LED_ACTIVATE_DELAY);
        } else {
            let pending = self.led_timer.is_armed();
            self.led_timer.cancel();
            if !pending {
                env.publish(Signal::LedPattern {
                    pattern: LED_PATTERN_TOUCH_BLOCKED,
                    active: false,
                });
            }
        }
    }

    pub fn status(&self) -> serde_json::Value {
        let mut v = self.grab.status();
        v["display"] = serde_json::json!(self.display);
        v["touch_detected"] = serde_json::json!(self.touch_detected);
        v["unblock_delay_ms"] = serde_json::json!(self.unblock_delay.as_millis() as u64);
        v["palm_status"] = serde_json::json!(self.grab.policy().palm.path());
        v
    }
}
