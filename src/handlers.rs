//! Per-kind processing of device events.
//!
//! Handlers see one (already translated) event at a time. They publish
//! directly, but anything that needs other devices or the grab controllers
//! is queued as a [`Followup`] and applied by the context afterwards.

use log::{debug, info};

use crate::classify::DeviceKind;
use crate::codes::*;
use crate::datapipe::{CoverSource, CoverState, Datapipe, Signal};
use crate::doubletap::DoubletapEmulator;
use crate::event::RawEvent;
use crate::grab::touch::TouchFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Followup {
    /// A touch device changed its finger-down state.
    TouchState(bool),
    /// Volume key event for the keypad grab filter.
    VolumeKey(RawEvent),
    /// Keypad slide moved; keyboard availability needs a re-scan.
    KeyboardRescan,
}

/// Activity notifications, at most one per event-second on each stream.
#[derive(Debug, Default)]
pub struct ActivityLimiter {
    last_cooked: Option<i64>,
    last_raw: Option<i64>,
}

impl ActivityLimiter {
    pub fn generate(&mut self, pipe: &mut dyn Datapipe, ev: &RawEvent, cooked: bool, raw: bool) {
        let sec = ev.second();
        if raw && self.last_raw != Some(sec) {
            self.last_raw = Some(sec);
            pipe.publish(Signal::RawActivity(*ev));
        }
        if cooked && self.last_cooked != Some(sec) {
            self.last_cooked = Some(sec);
            pipe.publish(Signal::Activity(*ev));
        }
    }
}

pub struct HandlerCx<'a> {
    pub pipe: &'a mut dyn Datapipe,
    pub activity: &'a mut ActivityLimiter,
    /// Touch input is wanted by the daemon only.
    pub touch_grab_wanted: bool,
    /// Emulated gestures may be injected.
    pub gestures_allowed: bool,
    pub followups: Vec<Followup>,
}

impl HandlerCx<'_> {
    fn activity(&mut self, ev: &RawEvent, cooked: bool, raw: bool) {
        self.activity.generate(&mut *self.pipe, ev, cooked, raw);
    }
}

pub trait DeviceHandler {
    fn handle(&mut self, ev: RawEvent, cx: &mut HandlerCx<'_>);

    /// Finger currently on the device; only meaningful for touch devices.
    fn touching(&self) -> bool {
        false
    }
}

/// Handler for a freshly registered device, `None` for kinds that are not
/// monitored.
pub fn handler_for(kind: DeviceKind) -> Option<Box<dyn DeviceHandler>> {
    match kind {
        DeviceKind::Touch => Some(Box::new(TouchHandler::default())),
        DeviceKind::Doubletap => Some(Box::new(DoubletapHandler)),
        DeviceKind::Input | DeviceKind::Keyboard | DeviceKind::VolumeKey => {
            Some(Box::new(KeypressHandler))
        }
        DeviceKind::Activity => Some(Box::new(ActivityHandler)),
        DeviceKind::Reject
        | DeviceKind::Ignore
        | DeviceKind::ProximitySensor
        | DeviceKind::AmbientLight => None,
    }
}

fn gesture(ev: &RawEvent, value: i32) -> RawEvent {
    RawEvent::at(ev.time_ms, EV_MSC, MSC_GESTURE, value)
}

#[derive(Debug, Default)]
pub struct TouchHandler {
    filter: TouchFilter,
    doubletap: DoubletapEmulator,
}

impl DeviceHandler for TouchHandler {
    fn handle(&mut self, ev: RawEvent, cx: &mut HandlerCx<'_>) {
        debug!("touch {}", ev.describe());

        let was_touching = self.filter.touching();
        if let Some(touching) = self.filter.feed(&ev) {
            if touching != was_touching {
                cx.followups.push(Followup::TouchState(touching));
            }
        }

        let mut ev = ev;
        if self.doubletap.feed(&ev) && cx.gestures_allowed {
            info!("doubletap emulated from touch input");
            ev = gesture(&ev, GESTURE_DOUBLETAP | GESTURE_SYNTHESIZED);
        }
        touch_output(ev, cx);
    }

    fn touching(&self) -> bool {
        self.filter.touching()
    }
}

fn touch_output(ev: RawEvent, cx: &mut HandlerCx<'_>) {
    let mut ev = ev;
    // power key release from a touch panel is how some panels report a double tap
    if ev.is(EV_KEY, KEY_POWER) && ev.value == 0 {
        info!("doubletap reported as power key release");
        ev = gesture(&ev, GESTURE_DOUBLETAP);
    }

    if !matches!(ev.ev_type, EV_ABS | EV_KEY | EV_MSC) {
        return;
    }

    if !cx.touch_grab_wanted {
        cx.activity(&ev, true, true);
    }

    if ev.is(EV_MSC, MSC_GESTURE) {
        cx.activity(&ev, false, true);
        cx.pipe.publish(Signal::Keypress(ev));
    } else if ev.is(EV_ABS, ABS_PRESSURE) || ev.is(EV_KEY, BTN_TOUCH) {
        cx.pipe.publish(Signal::Touchscreen(ev));
    }
}

/// Power key device that reports double taps.
#[derive(Debug, Default)]
pub struct DoubletapHandler;

impl DeviceHandler for DoubletapHandler {
    fn handle(&mut self, ev: RawEvent, cx: &mut HandlerCx<'_>) {
        if ev.is(EV_MSC, MSC_GESTURE) || ev.is(EV_KEY, KEY_POWER) {
            touch_output(ev, cx);
        }
    }
}

/// Buttons, switches, volume keys and keyboards.
#[derive(Debug, Default)]
pub struct KeypressHandler;

fn cover_source(code: u16) -> Option<CoverSource> {
    match code {
        SW_CAMERA_LENS_COVER => Some(CoverSource::LensCover),
        SW_KEYPAD_SLIDE => Some(CoverSource::KeyboardSlide),
        SW_FRONT_PROXIMITY => Some(CoverSource::Proximity),
        SW_LID => Some(CoverSource::Lid),
        SW_HEADPHONE_INSERT | SW_MICROPHONE_INSERT | SW_LINEOUT_INSERT | SW_VIDEOOUT_INSERT => {
            Some(CoverSource::JackSense)
        }
        _ => None,
    }
}

impl DeviceHandler for KeypressHandler {
    fn handle(&mut self, ev: RawEvent, cx: &mut HandlerCx<'_>) {
        if ev.is(EV_SW, SW_LID) {
            info!("keypress {}", ev.describe());
        } else {
            debug!("keypress {}", ev.describe());
        }

        if ev.is(EV_KEY, KEY_VOLUMEUP) || ev.is(EV_KEY, KEY_VOLUMEDOWN) {
            cx.followups.push(Followup::VolumeKey(ev));
        }

        if ev.ev_type != EV_KEY && ev.ev_type != EV_SW {
            return;
        }

        let mut ev = ev;
        if ev.ev_type == EV_KEY {
            if ev.code == KEY_SCREENLOCK && ev.value != 2 {
                cx.pipe.publish(Signal::LockKey(ev.value != 0));
            } else if ev.code == KEY_WAKEUP {
                info!("wakeup key as doubletap gesture");
                ev = gesture(&ev, GESTURE_DOUBLETAP);
                cx.pipe.publish(Signal::Keypress(ev));
            }

            // no repeats, and focus/lock keys are not key presses
            if ev.ev_type == EV_KEY
                && ev.code != KEY_CAMERA_FOCUS
                && ev.code != KEY_SCREENLOCK
                && (ev.value == 0 || ev.value == 1)
            {
                cx.pipe.publish(Signal::Keypress(ev));
            }
        }

        if ev.ev_type == EV_SW {
            if let Some(source) = cover_source(ev.code) {
                if ev.value != 2 {
                    let state = CoverState::closed_if(ev.value != 0);
                    cx.pipe.publish(Signal::Cover(source, state));
                    if source == CoverSource::KeyboardSlide {
                        cx.followups.push(Followup::KeyboardRescan);
                    }
                }
                // closing a cover is not user activity
                let silent = matches!(source, CoverSource::LensCover | CoverSource::KeyboardSlide);
                if silent && ev.value == 1 {
                    return;
                }
            }
        }

        if ev.is(EV_KEY, KEY_POWER) || ev.is(EV_MSC, MSC_GESTURE) {
            if ev.value != 2 {
                cx.activity(&ev, false, true);
            }
            return;
        }

        cx.activity(&ev, true, false);
    }
}

/// Anything else that indicates a user is present.
#[derive(Debug, Default)]
pub struct ActivityHandler;

impl DeviceHandler for ActivityHandler {
    fn handle(&mut self, ev: RawEvent, cx: &mut HandlerCx<'_>) {
        if matches!(ev.ev_type, EV_SYN | EV_LED | EV_SND | EV_FF | EV_FF_STATUS) {
            return;
        }
        debug!("activity {}", ev.describe());
        cx.activity(&ev, true, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datapipe::tests::Recorder;

    struct Rig {
        pipe: Recorder,
        activity: ActivityLimiter,
        grab_wanted: bool,
        gestures: bool,
        followups: Vec<Followup>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                pipe: Recorder::default(),
                activity: ActivityLimiter::default(),
                grab_wanted: false,
                gestures: false,
                followups: Vec::new(),
            }
        }

        fn feed(&mut self, h: &mut dyn DeviceHandler, evs: &[RawEvent]) -> Vec<Signal> {
            let mut cx = HandlerCx {
                pipe: &mut self.pipe,
                activity: &mut self.activity,
                touch_grab_wanted: self.grab_wanted,
                gestures_allowed: self.gestures,
                followups: Vec::new(),
            };
            for ev in evs {
                h.handle(*ev, &mut cx);
            }
            self.followups.extend(cx.followups);
            self.pipe.take()
        }
    }

    fn ev(t: i64, ev_type: u16, code: u16, value: i32) -> RawEvent {
        RawEvent::at(t, ev_type, code, value)
    }

    #[test]
    fn activity_is_rate_limited_per_second() {
        let mut rig = Rig::new();
        let mut h = ActivityHandler;
        let out = rig.feed(
            &mut h,
            &[
                ev(1_000, EV_REL, REL_X, 1),
                ev(1_000, EV_SYN, SYN_REPORT, 0),
                ev(1_500, EV_REL, REL_X, 1),
                ev(2_000, EV_REL, REL_X, 1),
                ev(2_100, EV_LED, 0, 1),
            ],
        );
        assert_eq!(
            out,
            vec![
                Signal::Activity(ev(1_000, EV_REL, REL_X, 1)),
                Signal::Activity(ev(2_000, EV_REL, REL_X, 1)),
            ]
        );
    }

    #[test]
    fn raw_and_cooked_streams_are_independent() {
        let mut limiter = ActivityLimiter::default();
        let mut pipe = Recorder::default();
        let e = ev(5_000, EV_KEY, KEY_POWER, 1);
        limiter.generate(&mut pipe, &e, false, true);
        limiter.generate(&mut pipe, &e, true, false);
        limiter.generate(&mut pipe, &e, true, true);
        assert_eq!(pipe.take(), vec![Signal::RawActivity(e), Signal::Activity(e)]);
    }

    #[test]
    fn keypress_publishes_presses_not_repeats() {
        let mut rig = Rig::new();
        let mut h = KeypressHandler;
        let out = rig.feed(
            &mut h,
            &[
                ev(0, EV_KEY, KEY_CAMERA, 1),
                ev(0, EV_KEY, KEY_CAMERA, 2),
                ev(0, EV_KEY, KEY_CAMERA, 0),
                ev(0, EV_KEY, KEY_CAMERA_FOCUS, 1),
            ],
        );
        let presses: Vec<_> = out
            .iter()
            .filter_map(|s| match s {
                Signal::Keypress(e) => Some(e.value),
                _ => None,
            })
            .collect();
        assert_eq!(presses, vec![1, 0]);
    }

    #[test]
    fn power_key_is_raw_activity() {
        let mut rig = Rig::new();
        let mut h = KeypressHandler;
        let press = ev(3_000, EV_KEY, KEY_POWER, 1);
        let out = rig.feed(&mut h, &[press]);
        assert_eq!(out, vec![Signal::Keypress(press), Signal::RawActivity(press)]);
    }

    #[test]
    fn screenlock_key_sets_lock_state() {
        let mut rig = Rig::new();
        let mut h = KeypressHandler;
        let out = rig.feed(
            &mut h,
            &[
                ev(0, EV_KEY, KEY_SCREENLOCK, 1),
                ev(0, EV_KEY, KEY_SCREENLOCK, 2),
                ev(0, EV_KEY, KEY_SCREENLOCK, 0),
            ],
        );
        let locks: Vec<_> = out
            .iter()
            .filter(|s| matches!(s, Signal::LockKey(_) | Signal::Keypress(_)))
            .cloned()
            .collect();
        assert_eq!(locks, vec![Signal::LockKey(true), Signal::LockKey(false)]);
    }

    #[test]
    fn wakeup_key_becomes_gesture() {
        let mut rig = Rig::new();
        let mut h = KeypressHandler;
        let out = rig.feed(&mut h, &[ev(7_000, EV_KEY, KEY_WAKEUP, 1)]);
        let g = ev(7_000, EV_MSC, MSC_GESTURE, GESTURE_DOUBLETAP);
        assert_eq!(out, vec![Signal::Keypress(g), Signal::RawActivity(g)]);
    }

    #[test]
    fn switches_publish_cover_states() {
        let mut rig = Rig::new();
        let mut h = KeypressHandler;
        let out = rig.feed(
            &mut h,
            &[
                ev(1_000, EV_SW, SW_KEYPAD_SLIDE, 1),
                ev(2_000, EV_SW, SW_HEADPHONE_INSERT, 1),
                ev(3_000, EV_SW, SW_LID, 0),
            ],
        );
        assert_eq!(
            out,
            vec![
                Signal::Cover(CoverSource::KeyboardSlide, CoverState::Closed),
                Signal::Cover(CoverSource::JackSense, CoverState::Closed),
                Signal::Activity(ev(2_000, EV_SW, SW_HEADPHONE_INSERT, 1)),
                Signal::Cover(CoverSource::Lid, CoverState::Open),
                Signal::Activity(ev(3_000, EV_SW, SW_LID, 0)),
            ]
        );
        assert_eq!(rig.followups, vec![Followup::KeyboardRescan]);
    }

    #[test]
    fn volume_keys_reach_keypad_filter() {
        let mut rig = Rig::new();
        let mut h = KeypressHandler;
        let up = ev(0, EV_KEY, KEY_VOLUMEUP, 1);
        rig.feed(&mut h, &[up, ev(0, EV_KEY, KEY_POWER, 1)]);
        assert_eq!(rig.followups, vec![Followup::VolumeKey(up)]);
    }

    fn touch_frame(t: i64, down: bool) -> Vec<RawEvent> {
        let mut evs = vec![
            ev(t, EV_ABS, ABS_X, 100),
            ev(t, EV_ABS, ABS_Y, 100),
            ev(t, EV_ABS, ABS_PRESSURE, if down { 30 } else { 0 }),
            ev(t, EV_KEY, BTN_TOUCH, i32::from(down)),
        ];
        evs.push(ev(t, EV_SYN, SYN_REPORT, 0));
        evs
    }

    #[test]
    fn touch_reports_state_changes_and_pressure() {
        let mut rig = Rig::new();
        let mut h = TouchHandler::default();
        let out = rig.feed(&mut h, &touch_frame(1_000, true));
        assert!(h.touching());
        assert!(out.contains(&Signal::Touchscreen(ev(1_000, EV_KEY, BTN_TOUCH, 1))));
        assert!(out.contains(&Signal::Touchscreen(ev(1_000, EV_ABS, ABS_PRESSURE, 30))));
        assert!(out.iter().any(|s| matches!(s, Signal::Activity(_))));

        rig.feed(&mut h, &touch_frame(1_100, true));
        rig.feed(&mut h, &touch_frame(1_200, false));
        assert!(!h.touching());
        assert_eq!(rig.followups, vec![Followup::TouchState(true), Followup::TouchState(false)]);
    }

    #[test]
    fn grabbed_touch_generates_no_activity() {
        let mut rig = Rig::new();
        rig.grab_wanted = true;
        let mut h = TouchHandler::default();
        let out = rig.feed(&mut h, &touch_frame(1_000, true));
        assert!(
            out.iter()
                .all(|s| !matches!(s, Signal::Activity(_) | Signal::RawActivity(_)))
        );
    }

    fn double_tap(rig: &mut Rig, h: &mut TouchHandler) -> Vec<Signal> {
        let mut evs = touch_frame(1_000, true);
        evs.extend(touch_frame(1_050, false));
        evs.extend(touch_frame(1_200, true));
        evs.extend(touch_frame(1_250, false));
        rig.feed(h, &evs)
    }

    #[test]
    fn emulated_doubletap_needs_permission() {
        let mut rig = Rig::new();
        rig.grab_wanted = true;
        let mut h = TouchHandler::default();
        let out = double_tap(&mut rig, &mut h);
        assert!(out.iter().all(|s| !matches!(s, Signal::Keypress(_))));

        rig.gestures = true;
        let mut h = TouchHandler::default();
        let out = double_tap(&mut rig, &mut h);
        let g = ev(1_250, EV_MSC, MSC_GESTURE, GESTURE_DOUBLETAP | GESTURE_SYNTHESIZED);
        assert!(out.contains(&Signal::Keypress(g)));
        assert!(out.contains(&Signal::RawActivity(g)));
    }

    #[test]
    fn power_release_from_panel_is_a_doubletap() {
        let mut rig = Rig::new();
        let mut h = DoubletapHandler;
        let out = rig.feed(
            &mut h,
            &[
                ev(9_000, EV_KEY, KEY_POWER, 1),
                ev(9_000, EV_KEY, KEY_POWER, 0),
                ev(9_000, EV_KEY, KEY_MENU, 1),
            ],
        );
        let g = ev(9_000, EV_MSC, MSC_GESTURE, GESTURE_DOUBLETAP);
        assert!(out.contains(&Signal::Keypress(g)));
        assert!(out.iter().all(|s| *s != Signal::Keypress(ev(9_000, EV_KEY, KEY_MENU, 1))));
    }

    #[test]
    fn unmonitored_kinds_have_no_handler() {
        assert!(handler_for(DeviceKind::Reject).is_none());
        assert!(handler_for(DeviceKind::AmbientLight).is_none());
        assert!(handler_for(DeviceKind::Keyboard).is_some());
    }
}
