//! Configurable rewriting of kernel key/switch codes into the codes the
//! rest of the daemon expects.

use log::{info, warn};
use thiserror::Error;

use crate::codes::{self, EV_KEY, EV_SW, SW_MAX};
use crate::event::RawEvent;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MappingError {
    #[error("cannot infer event type of '{0}'")]
    UnknownPrefix(String),
    #[error("unknown event code '{0}'")]
    UnknownCode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventPair {
    pub ev_type: u16,
    pub code: u16,
}

impl EventPair {
    pub fn parse(name: &str) -> Result<Self, MappingError> {
        let ev_type =
            codes::type_for_name(name).ok_or_else(|| MappingError::UnknownPrefix(name.into()))?;
        let code = codes::code_by_name(ev_type, name)
            .ok_or_else(|| MappingError::UnknownCode(name.into()))?;
        Ok(Self { ev_type, code })
    }

    fn matches(&self, ev: &RawEvent) -> bool {
        ev.is(self.ev_type, self.code)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMapping {
    pub kernel_emits: EventPair,
    pub mce_expects: EventPair,
}

impl EventMapping {
    pub fn parse(kernel: &str, expected: &str) -> Result<Self, MappingError> {
        Ok(Self {
            kernel_emits: EventPair::parse(kernel)?,
            mce_expects: EventPair::parse(expected)?,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventTranslationTable {
    maps: Vec<EventMapping>,
}

impl EventTranslationTable {
    pub fn new(maps: Vec<EventMapping>) -> Self {
        Self { maps }
    }

    /// Builds the table from `kernel_name = expected_name` pairs, skipping
    /// entries that do not resolve. With no usable entries, translation
    /// becomes a no-op.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut maps = Vec::new();
        for (kernel, expected) in entries {
            match EventMapping::parse(kernel, expected) {
                Ok(m) => maps.push(m),
                Err(e) => warn!("evdev mapping {kernel} -> {expected} skipped: {e}"),
            }
        }
        if !maps.is_empty() {
            info!("evdev mappings: {}", maps.len());
        }
        Self { maps }
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn mappings(&self) -> &[EventMapping] {
        &self.maps
    }

    /// Rewrites the event if a mapping matches; returns the translated event
    /// or `None` when it passes through unchanged.
    pub fn apply(&self, ev: &RawEvent) -> Option<RawEvent> {
        if ev.ev_type != EV_KEY && ev.ev_type != EV_SW {
            return None;
        }
        let m = self.maps.iter().find(|m| m.kernel_emits.matches(ev))?;
        Some(RawEvent {
            ev_type: m.mce_expects.ev_type,
            code: m.mce_expects.code,
            ..*ev
        })
    }

    pub fn translate(&self, ev: RawEvent) -> RawEvent {
        self.apply(&ev).unwrap_or(ev)
    }

    /// Finds which kernel switch produces the switch the daemon expects.
    ///
    /// A switch that is itself remapped to something else has no kernel
    /// source for its own meaning; `SW_MAX` is returned for it.
    pub fn reverse_lookup_switch(&self, expected: u16) -> u16 {
        let switches = || self.maps.iter().filter(|m| m.kernel_emits.ev_type == EV_SW);
        if let Some(m) = switches().find(|m| {
            m.mce_expects.ev_type == EV_SW && m.mce_expects.code == expected
        }) {
            return m.kernel_emits.code;
        }
        if switches().any(|m| m.kernel_emits.code == expected) {
            return SW_MAX;
        }
        expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codes::*;

    fn pair(ev_type: u16, code: u16) -> EventPair {
        EventPair { ev_type, code }
    }

    fn map(from: EventPair, to: EventPair) -> EventMapping {
        EventMapping {
            kernel_emits: from,
            mce_expects: to,
        }
    }

    #[test]
    fn first_match_wins() {
        let t = EventTranslationTable::new(vec![
            map(pair(EV_KEY, KEY_CAMERA), pair(EV_KEY, KEY_POWER)),
            map(pair(EV_KEY, KEY_CAMERA), pair(EV_KEY, KEY_MENU)),
        ]);
        let out = t.translate(RawEvent::at(5, EV_KEY, KEY_CAMERA, 1));
        assert_eq!(out, RawEvent::at(5, EV_KEY, KEY_POWER, 1));
    }

    #[test]
    fn translation_does_not_chain() {
        let t = EventTranslationTable::new(vec![
            map(pair(EV_KEY, KEY_CAMERA), pair(EV_KEY, KEY_POWER)),
            map(pair(EV_KEY, KEY_POWER), pair(EV_KEY, KEY_MENU)),
        ]);
        let once = t.translate(RawEvent::new(EV_KEY, KEY_CAMERA, 1));
        assert_eq!(once.code, KEY_POWER);
        // a second lookup of the output is a separate event, not a loop
        assert_eq!(t.translate(once).code, KEY_MENU);
    }

    #[test]
    fn switch_to_key_changes_type() {
        let t = EventTranslationTable::new(vec![map(
            pair(EV_SW, SW_CAMERA_LENS_COVER),
            pair(EV_KEY, KEY_CAMERA),
        )]);
        let out = t.translate(RawEvent::new(EV_SW, SW_CAMERA_LENS_COVER, 0));
        assert_eq!((out.ev_type, out.code, out.value), (EV_KEY, KEY_CAMERA, 0));
    }

    #[test]
    fn only_key_and_switch_events_are_looked_up() {
        let t = EventTranslationTable::new(vec![map(pair(EV_KEY, 0), pair(EV_KEY, KEY_POWER))]);
        // EV_SYN/SYN_REPORT shares code 0 with KEY_RESERVED
        let syn = RawEvent::new(EV_SYN, SYN_REPORT, 0);
        assert_eq!(t.apply(&syn), None);
        let abs = RawEvent::new(EV_ABS, ABS_X, 10);
        assert_eq!(t.translate(abs), abs);
    }

    #[test]
    fn empty_table_is_identity() {
        let t = EventTranslationTable::default();
        let ev = RawEvent::new(EV_KEY, KEY_POWER, 1);
        assert!(t.is_empty());
        assert_eq!(t.translate(ev), ev);
        assert_eq!(t.reverse_lookup_switch(SW_LID), SW_LID);
    }

    #[test]
    fn reverse_lookup_round_trip() {
        let t = EventTranslationTable::new(vec![map(
            pair(EV_SW, SW_LID),
            pair(EV_SW, SW_KEYPAD_SLIDE),
        )]);
        let source = t.reverse_lookup_switch(SW_KEYPAD_SLIDE);
        assert_eq!(source, SW_LID);
        let fwd = t.translate(RawEvent::new(EV_SW, source, 1));
        assert_eq!(fwd.code, SW_KEYPAD_SLIDE);
        // the remapped source no longer means itself
        assert_eq!(t.reverse_lookup_switch(SW_LID), SW_MAX);
        assert_eq!(t.reverse_lookup_switch(SW_HEADPHONE_INSERT), SW_HEADPHONE_INSERT);
    }

    #[test]
    fn parses_names_and_skips_bad_entries() {
        let t = EventTranslationTable::from_entries([
            ("KEY_CAMERA", "KEY_POWER"),
            ("ABS_X", "KEY_POWER"),
            ("KEY_NOPE", "KEY_POWER"),
            ("SW_LID", "SW_KEYPAD_SLIDE"),
        ]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.mappings()[0].kernel_emits, pair(EV_KEY, KEY_CAMERA));
        assert_eq!(t.mappings()[1].mce_expects, pair(EV_SW, SW_KEYPAD_SLIDE));
    }

    #[test]
    fn kernel_alias_names_resolve() {
        let t = EventTranslationTable::from_entries([
            ("KEY_SCREENLOCK", "KEY_POWER"),
            ("BTN_MOUSE", "KEY_SCREENLOCK"),
        ]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.mappings()[0].kernel_emits, pair(EV_KEY, KEY_SCREENLOCK));
        assert_eq!(t.mappings()[1].kernel_emits, pair(EV_KEY, BTN_MOUSE));
        assert_eq!(t.mappings()[1].mce_expects, pair(EV_KEY, KEY_SCREENLOCK));
    }

    #[test]
    fn parse_errors_name_the_problem() {
        assert_eq!(
            EventPair::parse("LED_CAPSL"),
            Err(MappingError::UnknownPrefix("LED_CAPSL".into()))
        );
        assert_eq!(
            EventPair::parse("SW_NOPE"),
            Err(MappingError::UnknownCode("SW_NOPE".into()))
        );
    }
}
