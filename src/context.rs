//! All input subsystem state, owned by the event loop.

use log::{debug, info};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::classify::DeviceKind;
use crate::datapipe::{CoverSource, CoverState, Datapipe, DisplayState, SensorHub, Signal};
use crate::devices::{DeviceRegistry, SwitchScan};
use crate::grab::GrabTarget;
use crate::grab::keypad::KeypadGrab;
use crate::grab::touch::{PalmSensor, TouchGrab};
use crate::handlers::{ActivityLimiter, Followup, HandlerCx};
use crate::mapping::EventTranslationTable;
use crate::timer;
use crate::watcher::{self, DirChange};

pub const GRAB_ALLOWED_TOUCH: u8 = 1 << 0;
pub const GRAB_ALLOWED_KEYPAD: u8 = 1 << 1;
pub const GRAB_ALLOWED_ALL: u8 = GRAB_ALLOWED_TOUCH | GRAB_ALLOWED_KEYPAD;

/// Runtime adjustable settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    pub grab_allowed: u8,
    pub touch_unblock_delay: Duration,
    pub doubletap_emulation: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            grab_allowed: GRAB_ALLOWED_ALL,
            touch_unblock_delay: crate::grab::touch::DEFAULT_UNBLOCK_DELAY,
            doubletap_emulation: false,
        }
    }
}

/// What the grab controllers and handlers act on.
struct Core<D, S> {
    registry: DeviceRegistry,
    table: EventTranslationTable,
    pipe: D,
    sensors: S,
    activity: ActivityLimiter,
}

impl<D: Datapipe, S> Datapipe for Core<D, S> {
    fn publish(&mut self, signal: Signal) {
        self.pipe.publish(signal);
    }
}

impl<D: Datapipe, S> GrabTarget for Core<D, S> {
    fn grab_devices(&mut self, kind: DeviceKind, grab: bool) {
        self.registry.iterate_by_kind(kind, |e| e.set_grab(grab));
    }
}

pub struct InputContext<D, S> {
    core: Core<D, S>,
    touch: TouchGrab,
    keypad: KeypadGrab,
    settings: Settings,
}

impl<D: Datapipe, S: SensorHub> InputContext<D, S> {
    pub fn new(
        registry: DeviceRegistry,
        table: EventTranslationTable,
        settings: Settings,
        palm: PalmSensor,
        pipe: D,
        sensors: S,
        now: Instant,
    ) -> Self {
        let mut ctx = Self {
            core: Core {
                registry,
                table,
                pipe,
                sensors,
                activity: ActivityLimiter::default(),
            },
            touch: TouchGrab::new(settings.touch_unblock_delay, palm),
            keypad: KeypadGrab::new(),
            settings,
        };
        ctx.apply_grab_allowed(now);
        ctx
    }

    pub fn pipe(&self) -> &D {
        &self.core.pipe
    }

    pub fn pipe_mut(&mut self) -> &mut D {
        &mut self.core.pipe
    }

    pub fn sensors(&self) -> &S {
        &self.core.sensors
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.core.registry
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn touch(&self) -> &TouchGrab {
        &self.touch
    }

    pub fn keypad(&self) -> &KeypadGrab {
        &self.keypad
    }

    /// Registers every event node present in `dir`.
    pub fn scan_devices(&mut self, dir: &Path, now: Instant) -> anyhow::Result<()> {
        for path in watcher::scan(dir)? {
            self.core.registry.add(&path, &mut self.core.sensors);
        }
        info!("{}: {} devices monitored", dir.display(), self.core.registry.len());
        self.devices_changed(now);
        Ok(())
    }

    pub fn device_changed(&mut self, change: &DirChange, now: Instant) {
        match change {
            DirChange::Added(path) => {
                self.core.registry.add(path, &mut self.core.sensors);
            }
            DirChange::Removed(path) => {
                self.core.registry.remove(path, &mut self.core.sensors);
            }
        }
        self.devices_changed(now);
    }

    fn devices_changed(&mut self, now: Instant) {
        // a newly added device must follow the current grab state
        let touch = self.touch.state().is_grabbed();
        let keypad = self.keypad.state().is_grabbed();
        self.core.grab_devices(DeviceKind::Touch, touch);
        self.core.grab_devices(DeviceKind::VolumeKey, keypad);

        for scan in self.core.registry.scan_switches(&self.core.table) {
            self.publish_switches(&scan);
        }
        self.publish_keyboard_available();
        let touching = self.core.registry.any_touching();
        self.touch.set_touch_detected(&mut self.core, touching, now);
    }

    fn publish_switches(&mut self, scan: &SwitchScan) {
        let states = [
            (CoverSource::LensCover, scan.lens_cover),
            (CoverSource::KeyboardSlide, scan.keypad_slide),
            (CoverSource::Proximity, scan.front_proximity),
            (CoverSource::Lid, scan.lid),
            (CoverSource::JackSense, scan.jack),
        ];
        for (source, closed) in states {
            if let Some(closed) = closed {
                self.core
                    .publish(Signal::Cover(source, CoverState::closed_if(closed)));
            }
        }
    }

    fn publish_keyboard_available(&mut self) {
        let available = self.core.registry.keyboard_available(&self.core.table);
        self.core
            .publish(Signal::KeyboardAvailable(CoverState::closed_if(!available)));
    }

    /// Reads all devices and applies what their handlers queued.
    pub fn pump_devices(&mut self, now: Instant) {
        let touch_grab_wanted = self.touch.state().want_grab();
        let gestures_allowed = touch_grab_wanted
            && self.settings.doubletap_emulation
            && self.touch.display().is_low_power();

        let mut cx = HandlerCx {
            pipe: &mut self.core.pipe,
            activity: &mut self.core.activity,
            touch_grab_wanted,
            gestures_allowed,
            followups: Vec::new(),
        };
        let dead = self.core.registry.pump(&self.core.table, &mut cx);
        let followups = cx.followups;

        let mut rescan_keyboard = false;
        for followup in followups {
            match followup {
                Followup::TouchState(touching) => {
                    let detected = touching || self.core.registry.any_touching();
                    self.touch.set_touch_detected(&mut self.core, detected, now);
                }
                Followup::VolumeKey(ev) => self.keypad.filter(&mut self.core, &ev, now),
                Followup::KeyboardRescan => rescan_keyboard = true,
            }
        }
        if rescan_keyboard {
            self.publish_keyboard_available();
        }

        if !dead.is_empty() {
            for path in &dead {
                self.core.registry.remove(path, &mut self.core.sensors);
            }
            self.devices_changed(now);
        }
    }

    pub fn poll_timers(&mut self, now: Instant) {
        self.touch.poll(&mut self.core, now);
        self.keypad.poll(&mut self.core, now);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        timer::earliest([self.touch.next_deadline(), self.keypad.next_deadline()])
    }

    pub fn request_touch_grab(&mut self, want: bool, now: Instant) {
        self.touch.request(&mut self.core, want, now);
    }

    pub fn request_keypad_grab(&mut self, want: bool, now: Instant) {
        self.keypad.request(&mut self.core, want, now);
    }

    pub fn set_display_state(&mut self, state: DisplayState, now: Instant) {
        self.touch.display_changed(&mut self.core, state, now);
    }

    pub fn set_grab_allowed(&mut self, mask: u8, now: Instant) {
        if self.settings.grab_allowed != mask {
            info!("input grab allowed: {mask:#x}");
            self.settings.grab_allowed = mask;
        }
        self.apply_grab_allowed(now);
    }

    fn apply_grab_allowed(&mut self, now: Instant) {
        let mask = self.settings.grab_allowed;
        self.touch
            .allow(&mut self.core, mask & GRAB_ALLOWED_TOUCH != 0, now);
        self.keypad
            .allow(&mut self.core, mask & GRAB_ALLOWED_KEYPAD != 0, now);
    }

    pub fn set_touch_unblock_delay(&mut self, delay: Duration) {
        self.settings.touch_unblock_delay = delay;
        self.touch.set_unblock_delay(delay);
    }

    pub fn set_doubletap_emulation(&mut self, enabled: bool) {
        if self.settings.doubletap_emulation != enabled {
            debug!("doubletap emulation: {enabled}");
            self.settings.doubletap_emulation = enabled;
        }
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "devices": self.core.registry.status(),
            "touch_grab": self.touch.status(),
            "keypad_grab": self.keypad.status(),
            "settings": {
                "input_grab_allowed": self.settings.grab_allowed,
                "touch_unblock_delay_ms": self.settings.touch_unblock_delay.as_millis() as u64,
                "doubletap_emulation": self.settings.doubletap_emulation,
            },
            "translations": self.core.table.len(),
        })
    }

    /// Forgets pending grab state and releases every device.
    pub fn shutdown(&mut self) {
        self.touch.reset();
        self.keypad.reset();
        for kind in [DeviceKind::Touch, DeviceKind::VolumeKey] {
            self.core.grab_devices(kind, false);
        }
        info!("input subsystem shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::*;
    use crate::datapipe::tests::Recorder;
    use crate::devices::DeviceRules;
    use crate::devices::tests::{FakeSensors, FakeTree, NodeState};
    use crate::event::RawEvent;
    use std::cell::RefCell;
    use std::path::PathBuf;
    use std::rc::Rc;

    type Ctx = InputContext<Recorder, FakeSensors>;

    fn ms(t0: Instant, n: u64) -> Instant {
        t0 + Duration::from_millis(n)
    }

    fn context(tree: &FakeTree, settings: Settings, t0: Instant) -> Ctx {
        InputContext::new(
            DeviceRegistry::new(Box::new(tree.clone()), DeviceRules::default()),
            EventTranslationTable::default(),
            settings,
            PalmSensor::new("/nonexistent/palm_status"),
            Recorder::default(),
            FakeSensors::default(),
            t0,
        )
    }

    fn add(ctx: &mut Ctx, path: &str, now: Instant) {
        ctx.device_changed(&DirChange::Added(PathBuf::from(path)), now);
    }

    fn push(state: &Rc<RefCell<NodeState>>, events: &[(u16, u16, i32)]) {
        let mut st = state.borrow_mut();
        for &(t, c, v) in events {
            st.queue.push_back(RawEvent::new(t, c, v));
        }
    }

    const TOUCH_CAPS: &[(u16, &[u16])] = &[
        (EV_KEY, &[BTN_TOUCH]),
        (EV_ABS, &[ABS_X, ABS_Y, ABS_PRESSURE]),
    ];

    #[test]
    fn touch_release_delays_grab() {
        let t0 = Instant::now();
        let tree = FakeTree::default();
        let node = tree.add("/dev/input/event0", "touch", TOUCH_CAPS);
        let mut ctx = context(&tree, Settings::default(), t0);
        add(&mut ctx, "/dev/input/event0", t0);
        assert_eq!(
            ctx.registry().get(Path::new("/dev/input/event0")).map(|e| e.kind),
            Some(DeviceKind::Touch)
        );

        push(&node, &[(EV_KEY, BTN_TOUCH, 1), (EV_SYN, SYN_REPORT, 0)]);
        ctx.pump_devices(t0);
        assert!(ctx.touch().state().touching());

        ctx.request_touch_grab(true, ms(t0, 10));
        assert!(!node.borrow().grabbed);

        push(&node, &[(EV_KEY, BTN_TOUCH, 0), (EV_SYN, SYN_REPORT, 0)]);
        ctx.pump_devices(ms(t0, 50));
        assert!(ctx.touch().state().touched());
        assert_eq!(ctx.next_deadline(), Some(ms(t0, 150)));

        ctx.poll_timers(ms(t0, 149));
        assert!(!node.borrow().grabbed);
        ctx.poll_timers(ms(t0, 150));
        assert!(!ctx.touch().state().touched());
        assert!(node.borrow().grabbed);
        assert_eq!(node.borrow().grab_calls, 1);

        let signals = ctx.pipe_mut().take();
        let grabs: Vec<_> = signals
            .iter()
            .filter(|s| matches!(s, Signal::TouchGrabActive(_)))
            .collect();
        assert_eq!(grabs, vec![&Signal::TouchGrabActive(true)]);
        assert!(signals.contains(&Signal::TouchDetected(true)));
        assert!(signals.contains(&Signal::TouchDetected(false)));
    }

    #[test]
    fn tap_within_one_read_still_counts_as_touch() {
        let t0 = Instant::now();
        let tree = FakeTree::default();
        let node = tree.add("/dev/input/event0", "touch", TOUCH_CAPS);
        let mut ctx = context(&tree, Settings::default(), t0);
        add(&mut ctx, "/dev/input/event0", t0);

        push(
            &node,
            &[
                (EV_KEY, BTN_TOUCH, 1),
                (EV_SYN, SYN_REPORT, 0),
                (EV_KEY, BTN_TOUCH, 0),
                (EV_SYN, SYN_REPORT, 0),
            ],
        );
        ctx.pump_devices(t0);
        assert!(!ctx.touch().state().touching());
        assert!(ctx.touch().state().touched());
    }

    #[test]
    fn volume_keys_vs_input() {
        let t0 = Instant::now();
        let tree = FakeTree::default();
        tree.add("/dev/input/event0", "vol", &[(EV_KEY, &[KEY_VOLUMEUP, KEY_VOLUMEDOWN])]);
        tree.add(
            "/dev/input/event1",
            "vol+power",
            &[(EV_KEY, &[KEY_VOLUMEUP, KEY_VOLUMEDOWN, KEY_POWER])],
        );
        let mut ctx = context(&tree, Settings::default(), t0);
        add(&mut ctx, "/dev/input/event0", t0);
        add(&mut ctx, "/dev/input/event1", t0);
        let kind = |p: &str| ctx.registry().get(Path::new(p)).map(|e| e.kind);
        assert_eq!(kind("/dev/input/event0"), Some(DeviceKind::VolumeKey));
        assert_eq!(kind("/dev/input/event1"), Some(DeviceKind::Input));
    }

    #[test]
    fn light_and_proximity_go_to_sensors() {
        let t0 = Instant::now();
        let tree = FakeTree::default();
        tree.add("/dev/input/event0", "als", &[(EV_ABS, &[ABS_MISC])]);
        tree.add("/dev/input/event1", "ps", &[(EV_ABS, &[ABS_DISTANCE])]);
        tree.add("/dev/input/event2", "both", &[(EV_ABS, &[ABS_MISC, ABS_DISTANCE])]);
        let mut ctx = context(&tree, Settings::default(), t0);
        for n in 0..3 {
            add(&mut ctx, &format!("/dev/input/event{n}"), t0);
        }
        assert_eq!(ctx.sensors().als, vec![PathBuf::from("/dev/input/event0")]);
        assert_eq!(ctx.sensors().ps, vec![PathBuf::from("/dev/input/event1")]);
        // both axes: not a sensor, ends up as a generic activity source
        assert_eq!(
            ctx.registry().get(Path::new("/dev/input/event2")).map(|e| e.kind),
            Some(DeviceKind::Activity)
        );
    }

    #[test]
    fn held_volume_key_defers_keypad_grab() {
        let t0 = Instant::now();
        let tree = FakeTree::default();
        let node = tree.add("/dev/input/event0", "vol", &[(EV_KEY, &[KEY_VOLUMEUP, KEY_VOLUMEDOWN])]);
        let mut ctx = context(&tree, Settings::default(), t0);
        add(&mut ctx, "/dev/input/event0", t0);

        push(&node, &[(EV_KEY, KEY_VOLUMEUP, 1), (EV_SYN, SYN_REPORT, 0)]);
        ctx.pump_devices(t0);
        ctx.request_keypad_grab(true, t0);
        assert!(!node.borrow().grabbed);

        push(&node, &[(EV_KEY, KEY_VOLUMEUP, 0), (EV_SYN, SYN_REPORT, 0)]);
        ctx.pump_devices(ms(t0, 20));
        ctx.poll_timers(ms(t0, 220));
        assert!(node.borrow().grabbed);
    }

    #[test]
    fn grab_mask_blocks_device_grab() {
        let t0 = Instant::now();
        let tree = FakeTree::default();
        let node = tree.add("/dev/input/event0", "touch", TOUCH_CAPS);
        let settings = Settings {
            grab_allowed: GRAB_ALLOWED_KEYPAD,
            ..Settings::default()
        };
        let mut ctx = context(&tree, settings, t0);
        add(&mut ctx, "/dev/input/event0", t0);

        ctx.request_touch_grab(true, t0);
        assert!(ctx.touch().state().have_grab());
        assert!(!node.borrow().grabbed);

        ctx.set_grab_allowed(GRAB_ALLOWED_ALL, t0);
        assert!(node.borrow().grabbed);
    }

    #[test]
    fn new_device_follows_current_grab() {
        let t0 = Instant::now();
        let tree = FakeTree::default();
        let node = tree.add("/dev/input/event0", "touch", TOUCH_CAPS);
        let mut ctx = context(&tree, Settings::default(), t0);
        ctx.request_touch_grab(true, t0);
        add(&mut ctx, "/dev/input/event0", t0);
        assert!(node.borrow().grabbed);
    }

    #[test]
    fn switch_states_published_on_add() {
        let t0 = Instant::now();
        let tree = FakeTree::default();
        let node = tree.add(
            "/dev/input/event0",
            "gpio-keys",
            &[(EV_SW, &[SW_LID, SW_HEADPHONE_INSERT])],
        );
        node.borrow_mut().switches = vec![SW_LID];
        let mut ctx = context(&tree, Settings::default(), t0);
        add(&mut ctx, "/dev/input/event0", t0);
        let signals = ctx.pipe_mut().take();
        assert!(signals.contains(&Signal::Cover(CoverSource::Lid, CoverState::Closed)));
        assert!(signals.contains(&Signal::Cover(CoverSource::JackSense, CoverState::Open)));
        assert!(!signals.iter().any(|s| matches!(s, Signal::Cover(CoverSource::LensCover, _))));
        // no keyboard at all
        assert!(signals.contains(&Signal::KeyboardAvailable(CoverState::Closed)));
    }

    #[test]
    fn slide_event_rescans_keyboard() {
        let t0 = Instant::now();
        let tree = FakeTree::default();
        let node = tree.add(
            "/dev/input/event0",
            "kbd",
            &[(EV_KEY, &[KEY_Q, KEY_P]), (EV_SW, &[SW_KEYPAD_SLIDE])],
        );
        let mut ctx = context(&tree, Settings::default(), t0);
        add(&mut ctx, "/dev/input/event0", t0);
        assert!(ctx.pipe_mut().take().contains(&Signal::KeyboardAvailable(CoverState::Open)));

        node.borrow_mut().switches = vec![SW_KEYPAD_SLIDE];
        push(&node, &[(EV_SW, SW_KEYPAD_SLIDE, 1), (EV_SYN, SYN_REPORT, 0)]);
        ctx.pump_devices(t0);
        let signals = ctx.pipe_mut().take();
        assert!(signals.contains(&Signal::Cover(CoverSource::KeyboardSlide, CoverState::Closed)));
        assert!(signals.contains(&Signal::KeyboardAvailable(CoverState::Closed)));
    }

    #[test]
    fn dead_device_is_dropped() {
        let t0 = Instant::now();
        let tree = FakeTree::default();
        let node = tree.add("/dev/input/event0", "vol", &[(EV_KEY, &[KEY_VOLUMEUP, KEY_VOLUMEDOWN])]);
        let mut ctx = context(&tree, Settings::default(), t0);
        add(&mut ctx, "/dev/input/event0", t0);
        node.borrow_mut().broken = true;
        ctx.pump_devices(t0);
        assert!(ctx.registry().is_empty());
    }

    #[test]
    fn emulated_doubletap_needs_grab_and_blank_display() {
        let t0 = Instant::now();
        let tree = FakeTree::default();
        let node = tree.add("/dev/input/event0", "touch", TOUCH_CAPS);
        let settings = Settings {
            doubletap_emulation: true,
            ..Settings::default()
        };
        let mut ctx = context(&tree, settings, t0);
        add(&mut ctx, "/dev/input/event0", t0);
        ctx.set_display_state(DisplayState::Off, t0);
        ctx.request_touch_grab(true, t0);
        ctx.pipe_mut().take();

        let mut now = 1_000;
        for _ in 0..2 {
            for down in [true, false] {
                let mut st = node.borrow_mut();
                let v = i32::from(down);
                st.queue.push_back(RawEvent::at(now, EV_ABS, ABS_X, 10));
                st.queue.push_back(RawEvent::at(now, EV_ABS, ABS_Y, 10));
                st.queue.push_back(RawEvent::at(now, EV_ABS, ABS_PRESSURE, v * 40));
                st.queue.push_back(RawEvent::at(now, EV_KEY, BTN_TOUCH, v));
                st.queue.push_back(RawEvent::at(now, EV_SYN, SYN_REPORT, 0));
                drop(st);
                ctx.pump_devices(t0);
                now += 50;
            }
        }
        let gesture = ctx
            .pipe_mut()
            .take()
            .into_iter()
            .any(|s| matches!(s, Signal::Keypress(ev) if ev.is(EV_MSC, MSC_GESTURE)));
        assert!(gesture);
    }

    #[test]
    fn shutdown_releases_devices() {
        let t0 = Instant::now();
        let tree = FakeTree::default();
        let node = tree.add("/dev/input/event0", "touch", TOUCH_CAPS);
        let mut ctx = context(&tree, Settings::default(), t0);
        add(&mut ctx, "/dev/input/event0", t0);
        ctx.request_touch_grab(true, t0);
        assert!(node.borrow().grabbed);
        ctx.shutdown();
        assert!(!node.borrow().grabbed);
    }
}
