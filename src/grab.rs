//! Debounced "take exclusive control of an input device" state machine.
//!
//! A grab may be wanted at any time, but it is only taken or dropped while
//! the user is not touching the device. After the last touch ends, the
//! state is held for a release delay before the grab is re-evaluated, so
//! that a finger lifted at the wrong moment cannot leak a half gesture to
//! whoever gets the input next.

pub mod keypad;
pub mod touch;

use log::{debug, info};
use std::time::{Duration, Instant};

use crate::classify::DeviceKind;
use crate::datapipe::{Datapipe, InputPolicy};
use crate::timer::Timer;

/// What grab controllers act on: the devices of one kind, and the datapipe.
pub trait GrabTarget: Datapipe {
    fn grab_devices(&mut self, kind: DeviceKind, grab: bool);
}

/// Per-controller hooks. `E` is whatever the hooks need to act on the
/// outside world.
pub trait GrabPolicy<E: ?Sized> {
    /// The effective grab state changed.
    fn grab_changed(&mut self, env: &mut E, grab: bool);

    /// Asked when the release delay expires; returning false keeps the
    /// touch alive for another delay.
    fn release_verify(&mut self, _env: &mut E) -> bool {
        true
    }

    fn policy_changed(&mut self, _env: &mut E, _policy: InputPolicy) {}
}

#[derive(Debug)]
pub struct InputGrab<P> {
    name: &'static str,
    policy: P,
    touching: bool,
    touched: bool,
    want_grab: bool,
    have_grab: bool,
    allow_grab: bool,
    real_grab: bool,
    state: InputPolicy,
    release_delay: Duration,
    release_timer: Timer,
}

impl<P> InputGrab<P> {
    pub fn new(name: &'static str, release_delay: Duration, policy: P) -> Self {
        Self {
            name,
            policy,
            touching: false,
            touched: false,
            want_grab: false,
            have_grab: false,
            allow_grab: true,
            real_grab: false,
            state: InputPolicy::Unknown,
            release_delay,
            release_timer: Timer::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn policy(&self) -> &P {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut P {
        &mut self.policy
    }

    pub fn touching(&self) -> bool {
        self.touching
    }

    pub fn touched(&self) -> bool {
        self.touched
    }

    pub fn want_grab(&self) -> bool {
        self.want_grab
    }

    pub fn have_grab(&self) -> bool {
        self.have_grab
    }

    /// Grab as applied to the devices: held and allowed.
    pub fn is_grabbed(&self) -> bool {
        self.real_grab
    }

    pub fn input_policy(&self) -> InputPolicy {
        self.state
    }

    pub fn release_delay(&self) -> Duration {
        self.release_delay
    }

    /// Takes effect the next time the release timer is started.
    pub fn set_release_delay(&mut self, delay: Duration) {
        self.release_delay = delay;
    }

    pub fn release_deadline(&self) -> Option<Instant> {
        self.release_timer.deadline()
    }

    /// Forgets touch state and pending release without notifying anyone.
    pub fn reset(&mut self) {
        self.touching = false;
        self.touched = false;
        self.release_timer.cancel();
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "touching": self.touching,
            "touched": self.touched,
            "want_grab": self.want_grab,
            "have_grab": self.have_grab,
            "allow_grab": self.allow_grab,
            "grabbed": self.real_grab,
            "policy": self.state,
            "release_delay_ms": self.release_delay.as_millis() as u64,
            "release_pending": self.release_timer.is_armed(),
        })
    }
}

impl<P> InputGrab<P> {
    pub fn set_touching<E: ?Sized>(&mut self, env: &mut E, touching: bool, now: Instant)
    where
        P: GrabPolicy<E>,
    {
        if self.touching == touching {
            return;
        }
        debug!("{}: touching={touching}", self.name);
        self.touching = touching;
        if touching {
            self.touched = true;
        }
        self.rethink(env, now);
    }

    pub fn request_grab<E: ?Sized>(&mut self, env: &mut E, want: bool, now: Instant)
    where
        P: GrabPolicy<E>,
    {
        if self.want_grab == want {
            return;
        }
        debug!("{}: want_grab={want}", self.name);
        self.want_grab = want;
        self.rethink(env, now);
    }

    pub fn allow_grab<E: ?Sized>(&mut self, env: &mut E, allow: bool, now: Instant)
    where
        P: GrabPolicy<E>,
    {
        if self.allow_grab == allow {
            return;
        }
        debug!("{}: allow_grab={allow}", self.name);
        self.allow_grab = allow;
        self.rethink(env, now);
    }

    pub fn rethink<E: ?Sized>(&mut self, env: &mut E, now: Instant)
    where
        P: GrabPolicy<E>,
    {
        if self.touching {
            self.release_timer.cancel();
        } else if self.touched {
            self.release_timer.start(now, self.release_delay);
        } else {
            self.have_grab = self.want_grab;
        }

        let real = self.have_grab && self.allow_grab;
        if self.real_grab != real {
            self.real_grab = real;
            info!("{}: grab={real}", self.name);
            self.policy.grab_changed(env, real);
        }

        let state = if self.want_grab || self.have_grab {
            InputPolicy::Disabled
        } else {
            InputPolicy::Enabled
        };
        if self.state != state {
            self.state = state;
            debug!("{}: policy={state:?}", self.name);
            self.policy.policy_changed(env, state);
        }
    }

    /// Fires the release timer if it is due.
    pub fn poll<E: ?Sized>(&mut self, env: &mut E, now: Instant)
    where
        P: GrabPolicy<E>,
    {
        if !self.release_timer.expire(now) {
            return;
        }
        if !self.policy.release_verify(env) {
            debug!("{}: release rejected, holding", self.name);
            self.release_timer.restart(now, self.release_delay);
            return;
        }
        debug!("{}: released", self.name);
        self.touched = false;
        self.rethink(env, now);
    }
}
