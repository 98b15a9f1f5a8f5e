//! Double tap detection for touch panels that cannot report it themselves.
//!
//! The last four synchronized frames are kept in a ring. Each frame remembers
//! where the contact was and how many "contact present" indications were
//! seen. A tap-release-tap-release sequence with both presses close together
//! in time and space is a double tap.

use crate::codes::*;
use crate::event::RawEvent;

const HISTORY: usize = 4;

/// Presses further apart than this are two single taps.
pub const DOUBLETAP_MAX_INTERVAL_MS: i64 = 500;
/// Maximum travel between the two presses, in panel units.
pub const DOUBLETAP_MAX_DISTANCE: i64 = 100;

// nibble positions inside the click mask
const CLICK_BUTTON: u32 = 0;
const CLICK_PRESSURE: u32 = 4;
const CLICK_TOUCH_MAJOR: u32 = 8;
const CLICK_TRACKING: u32 = 12;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct TouchSample {
    time_ms: i64,
    x: i64,
    y: i64,
    click: u32,
}

impl TouchSample {
    fn bump(&mut self, shift: u32) {
        if (self.click >> shift) & 0xf < 0xf {
            self.click += 1 << shift;
        }
    }

    /// Number of contacts: the strongest of the four indications.
    fn contacts(&self) -> u32 {
        [CLICK_BUTTON, CLICK_PRESSURE, CLICK_TOUCH_MAJOR, CLICK_TRACKING]
            .iter()
            .map(|s| (self.click >> s) & 0xf)
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct DoubletapEmulator {
    hist: [TouchSample; HISTORY],
    head: usize,
    x_acc: i64,
    y_acc: i64,
    // BTN_TOUCH / BTN_MOUSE state; reported once per change, so it is
    // carried over to every following frame
    button: bool,
    dirty: bool,
}

impl DoubletapEmulator {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, back: usize) -> &TouchSample {
        &self.hist[(self.head + HISTORY - back) % HISTORY]
    }

    fn current(&mut self) -> &mut TouchSample {
        &mut self.hist[self.head]
    }

    /// Feeds one event; returns true when it completes a double tap.
    pub fn feed(&mut self, ev: &RawEvent) -> bool {
        match ev.ev_type {
            EV_KEY => {
                if ev.code == BTN_TOUCH || ev.code == BTN_MOUSE {
                    self.button = ev.value != 0;
                    self.dirty = true;
                }
                false
            }
            EV_REL => {
                match ev.code {
                    REL_X => self.x_acc = self.x_acc.saturating_add(i64::from(ev.value)),
                    REL_Y => self.y_acc = self.y_acc.saturating_add(i64::from(ev.value)),
                    _ => return false,
                }
                self.dirty = true;
                false
            }
            EV_ABS => {
                match ev.code {
                    ABS_X | ABS_MT_POSITION_X => self.x_acc = i64::from(ev.value),
                    ABS_Y | ABS_MT_POSITION_Y => self.y_acc = i64::from(ev.value),
                    ABS_PRESSURE | ABS_MT_PRESSURE => {
                        if ev.value > 0 {
                            self.current().bump(CLICK_PRESSURE);
                        }
                    }
                    ABS_MT_TOUCH_MAJOR => {
                        if ev.value > 0 {
                            self.current().bump(CLICK_TOUCH_MAJOR);
                        }
                    }
                    ABS_MT_TRACKING_ID => {
                        if ev.value != -1 {
                            self.current().bump(CLICK_TRACKING);
                        }
                    }
                    _ => return false,
                }
                self.dirty = true;
                false
            }
            EV_SYN => match ev.code {
                SYN_MT_REPORT => {
                    self.dirty = true;
                    false
                }
                SYN_REPORT if self.dirty => {
                    self.dirty = false;
                    self.end_frame(ev.time_ms)
                }
                _ => false,
            },
            _ => false,
        }
    }

    fn end_frame(&mut self, time_ms: i64) -> bool {
        let (x, y, button) = (self.x_acc, self.y_acc, self.button);
        let cur = self.current();
        cur.time_ms = time_ms;
        cur.x = x;
        cur.y = y;
        if button {
            cur.bump(CLICK_BUTTON);
        }

        let counts: Vec<u32> = (0..HISTORY).map(|back| self.slot(back).contacts()).collect();
        let mut detected = false;
        if counts[0] != counts[1] && counts == [0, 1, 0, 1] {
            let (second, first) = (self.slot(1), self.slot(3));
            let dt = second.time_ms - first.time_ms;
            let dx = second.x.saturating_sub(first.x);
            let dy = second.y.saturating_sub(first.y);
            let dist2 = dx.saturating_mul(dx).saturating_add(dy.saturating_mul(dy));
            let max = DOUBLETAP_MAX_DISTANCE;
            if dt <= DOUBLETAP_MAX_INTERVAL_MS && dist2 <= max * max {
                detected = true;
            }
        }

        if detected {
            self.reset();
        } else {
            self.head = (self.head + 1) % HISTORY;
            *self.current() = TouchSample::default();
        }
        detected
    }

    pub fn reset(&mut self) {
        self.hist = [TouchSample::default(); HISTORY];
        self.head = 0;
        self.x_acc = 0;
        self.y_acc = 0;
        self.button = false;
        self.dirty = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Single touch panel frames.
    fn press(dt: &mut DoubletapEmulator, t: i64, x: i32, y: i32) -> bool {
        let evs = [
            RawEvent::at(t, EV_ABS, ABS_X, x),
            RawEvent::at(t, EV_ABS, ABS_Y, y),
            RawEvent::at(t, EV_ABS, ABS_PRESSURE, 40),
            RawEvent::at(t, EV_KEY, BTN_TOUCH, 1),
            RawEvent::at(t, EV_SYN, SYN_REPORT, 0),
        ];
        evs.iter().fold(false, |hit, ev| dt.feed(ev) || hit)
    }

    fn release(dt: &mut DoubletapEmulator, t: i64) -> bool {
        let evs = [
            RawEvent::at(t, EV_ABS, ABS_PRESSURE, 0),
            RawEvent::at(t, EV_KEY, BTN_TOUCH, 0),
            RawEvent::at(t, EV_SYN, SYN_REPORT, 0),
        ];
        evs.iter().fold(false, |hit, ev| dt.feed(ev) || hit)
    }

    fn tap_tap(dt: &mut DoubletapEmulator, t0: i64, gap: i64, second_x: i32) -> bool {
        assert!(!press(dt, t0, 100, 100));
        assert!(!release(dt, t0 + 50));
        assert!(!press(dt, t0 + gap, second_x, 100));
        release(dt, t0 + gap + 50)
    }

    #[test]
    fn detects_quick_double_tap() {
        let mut dt = DoubletapEmulator::new();
        assert!(tap_tap(&mut dt, 1_000, 200, 110));
    }

    #[test]
    fn slow_taps_are_not_a_double_tap() {
        let mut dt = DoubletapEmulator::new();
        assert!(!tap_tap(&mut dt, 1_000, 700, 100));
    }

    #[test]
    fn distant_taps_are_not_a_double_tap() {
        let mut dt = DoubletapEmulator::new();
        assert!(!tap_tap(&mut dt, 1_000, 200, 300));
    }

    #[test]
    fn interval_limit_is_inclusive() {
        let mut dt = DoubletapEmulator::new();
        assert!(tap_tap(&mut dt, 1_000, DOUBLETAP_MAX_INTERVAL_MS, 100));
        let mut dt = DoubletapEmulator::new();
        assert!(!tap_tap(&mut dt, 1_000, DOUBLETAP_MAX_INTERVAL_MS + 1, 100));
    }

    #[test]
    fn distance_limit_is_inclusive() {
        let mut dt = DoubletapEmulator::new();
        assert!(tap_tap(&mut dt, 1_000, 200, 200));
        let mut dt = DoubletapEmulator::new();
        assert!(!tap_tap(&mut dt, 1_000, 200, 201));
    }

    #[test]
    fn extreme_coordinates_do_not_overflow() {
        let mut dt = DoubletapEmulator::new();
        assert!(!press(&mut dt, 0, -2_000_000_000, -2_000_000_000));
        assert!(!release(&mut dt, 50));
        assert!(!press(&mut dt, 100, 2_000_000_000, 2_000_000_000));
        assert!(!release(&mut dt, 150));
    }

    #[test]
    fn relative_motion_saturates() {
        let mut dt = DoubletapEmulator::new();
        for t in 0..3 {
            assert!(!dt.feed(&RawEvent::at(t, EV_REL, REL_X, i32::MAX)));
            assert!(!dt.feed(&RawEvent::at(t, EV_REL, REL_Y, i32::MIN)));
            assert!(!dt.feed(&RawEvent::at(t, EV_SYN, SYN_REPORT, 0)));
        }
        assert_eq!(dt.x_acc, 3 * i64::from(i32::MAX));
        assert_eq!(dt.y_acc, 3 * i64::from(i32::MIN));
    }

    #[test]
    fn detection_clears_history() {
        let mut dt = DoubletapEmulator::new();
        assert!(tap_tap(&mut dt, 1_000, 200, 100));
        // a third tap right after is only the first tap of a new pair
        assert!(!press(&mut dt, 1_400, 100, 100));
        assert!(!release(&mut dt, 1_450));
        assert!(!press(&mut dt, 1_600, 100, 100));
        assert!(release(&mut dt, 1_650));
    }

    #[test]
    fn multitouch_protocol_b() {
        let mut dt = DoubletapEmulator::new();
        let mut frame = |t: i64, tracking: i32| {
            let mut evs = vec![RawEvent::at(t, EV_ABS, ABS_MT_TRACKING_ID, tracking)];
            if tracking != -1 {
                evs.push(RawEvent::at(t, EV_ABS, ABS_MT_POSITION_X, 500));
                evs.push(RawEvent::at(t, EV_ABS, ABS_MT_POSITION_Y, 700));
            }
            evs.push(RawEvent::at(t, EV_SYN, SYN_REPORT, 0));
            evs.iter().fold(false, |hit, ev| dt.feed(ev) || hit)
        };
        assert!(!frame(0, 7));
        assert!(!frame(60, -1));
        assert!(!frame(250, 8));
        assert!(frame(300, -1));
    }

    #[test]
    fn sync_without_input_is_ignored() {
        let mut dt = DoubletapEmulator::new();
        assert!(!press(&mut dt, 0, 10, 10));
        // bare syncs do not consume history slots
        for t in 1..10 {
            assert!(!dt.feed(&RawEvent::at(t, EV_SYN, SYN_REPORT, 0)));
        }
        assert!(!release(&mut dt, 50));
        assert!(!press(&mut dt, 100, 10, 10));
        assert!(release(&mut dt, 150));
    }

    #[test]
    fn counters_saturate() {
        let mut s = TouchSample::default();
        for _ in 0..40 {
            s.bump(CLICK_PRESSURE);
        }
        assert_eq!(s.contacts(), 15);
        assert_eq!(s.click >> CLICK_TOUCH_MAJOR, 0);
    }
}
