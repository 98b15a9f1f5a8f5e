//! Volume key grab ("kp"): while the grab is wanted, volume keys go to the
//! daemon only. A held key keeps the current state until it is released.

use std::time::{Duration, Instant};

use super::{GrabPolicy, GrabTarget, InputGrab};
use crate::classify::DeviceKind;
use crate::codes::{EV_KEY, KEY_VOLUMEDOWN, KEY_VOLUMEUP};
use crate::datapipe::{InputPolicy, Signal};
use crate::event::RawEvent;

pub const KEYPAD_RELEASE_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Default)]
pub struct KeypadGrabPolicy;

impl<E: GrabTarget + ?Sized> GrabPolicy<E> for KeypadGrabPolicy {
    fn grab_changed(&mut self, env: &mut E, grab: bool) {
        env.grab_devices(DeviceKind::VolumeKey, grab);
        env.publish(Signal::KeypadGrabActive(grab));
    }

    fn policy_changed(&mut self, env: &mut E, policy: InputPolicy) {
        env.publish(Signal::KeypadInputPolicy(policy));
    }
}

#[derive(Debug)]
pub struct KeypadGrab {
    grab: InputGrab<KeypadGrabPolicy>,
    vol_up: bool,
    vol_dn: bool,
}

impl Default for KeypadGrab {
    fn default() -> Self {
        Self::new()
    }
}

impl KeypadGrab {
    pub fn new() -> Self {
        Self {
            grab: InputGrab::new("kp", KEYPAD_RELEASE_DELAY, KeypadGrabPolicy),
            vol_up: false,
            vol_dn: false,
        }
    }

    pub fn state(&self) -> &InputGrab<KeypadGrabPolicy> {
        &self.grab
    }

    pub fn request<E: GrabTarget + ?Sized>(&mut self, env: &mut E, want: bool, now: Instant) {
        self.grab.request_grab(env, want, now);
    }

    pub fn allow<E: GrabTarget + ?Sized>(&mut self, env: &mut E, allow: bool, now: Instant) {
        self.grab.allow_grab(env, allow, now);
    }

    /// Tracks volume key up/down state from a key event.
    pub fn filter<E: GrabTarget + ?Sized>(&mut self, env: &mut E, ev: &RawEvent, now: Instant) {
        if ev.ev_type != EV_KEY {
            return;
        }
        match ev.code {
            KEY_VOLUMEUP => self.vol_up = ev.value != 0,
            KEY_VOLUMEDOWN => self.vol_dn = ev.value != 0,
            _ => return,
        }
        self.grab.set_touching(env, self.vol_up || self.vol_dn, now);
    }

    pub fn poll<E: GrabTarget + ?Sized>(&mut self, env: &mut E, now: Instant) {
        self.grab.poll(env, now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.grab.release_deadline()
    }

    pub fn reset(&mut self) {
        self.vol_up = false;
        self.vol_dn = false;
        self.grab.reset();
    }

    pub fn status(&self) -> serde_json::Value {
        let mut v = self.grab.status();
        v["volume_up_held"] = serde_json::json!(self.vol_up);
        v["volume_down_held"] = serde_json::json!(self.vol_dn);
        v
    }
}
