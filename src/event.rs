use std::time::UNIX_EPOCH;

use crate::codes;

/// One kernel input event, detached from the evdev types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawEvent {
    /// Kernel timestamp in milliseconds since the epoch.
    pub time_ms: i64,
    pub ev_type: u16,
    pub code: u16,
    pub value: i32,
}

impl RawEvent {
    pub fn new(ev_type: u16, code: u16, value: i32) -> Self {
        Self {
            time_ms: 0,
            ev_type,
            code,
            value,
        }
    }

    pub fn at(time_ms: i64, ev_type: u16, code: u16, value: i32) -> Self {
        Self {
            time_ms,
            ev_type,
            code,
            value,
        }
    }

    pub fn is(&self, ev_type: u16, code: u16) -> bool {
        self.ev_type == ev_type && self.code == code
    }

    /// Whole seconds of the timestamp, used for activity rate limiting.
    pub fn second(&self) -> i64 {
        self.time_ms.div_euclid(1000)
    }

    pub fn describe(&self) -> String {
        format!(
            "{}:{} = {}",
            codes::type_name(self.ev_type),
            codes::code_name(self.ev_type, self.code),
            self.value
        )
    }
}

impl From<&evdev::InputEvent> for RawEvent {
    fn from(ev: &evdev::InputEvent) -> Self {
        let time_ms = match ev.timestamp().duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_millis() as i64,
            Err(e) => -(e.duration().as_millis() as i64),
        };
        Self::at(time_ms, ev.event_type().0, ev.code(), ev.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::{EV_KEY, KEY_POWER};

    #[test]
    fn second_rounds_down() {
        assert_eq!(RawEvent::at(1999, EV_KEY, KEY_POWER, 1).second(), 1);
        assert_eq!(RawEvent::at(2000, EV_KEY, KEY_POWER, 1).second(), 2);
        assert_eq!(RawEvent::at(-1, EV_KEY, KEY_POWER, 1).second(), -1);
    }

    #[test]
    fn converts_from_evdev() {
        let ev = evdev::InputEvent::new(EV_KEY, KEY_POWER, 1);
        let raw = RawEvent::from(&ev);
        assert!(raw.is(EV_KEY, KEY_POWER));
        assert_eq!(raw.value, 1);
    }
}
