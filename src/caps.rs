//! Capability bitmaps of an evdev node.

use log::warn;
use std::io;
use thiserror::Error;

use crate::codes::{
    self, ABS_CNT, EV_ABS, EV_CNT, EV_KEY, EV_MSC, EV_REL, EV_SW, EV_SYN, KEY_CNT, MSC_CNT,
    REL_CNT, SW_CNT,
};

/// Source of "which codes of this type does the device emit" answers.
pub trait CapabilityProbe {
    fn event_bits(&self, ev_type: u16) -> io::Result<Vec<u16>>;
}

#[derive(Debug, Error)]
#[error("probing {type_name} capabilities: {source}")]
pub struct ProbeError {
    pub type_name: String,
    #[source]
    pub source: io::Error,
}

/// Number of codes tracked for an event type; `None` for untracked types.
pub fn code_count(ev_type: u16) -> Option<usize> {
    match ev_type {
        EV_SYN => Some(EV_CNT),
        EV_KEY => Some(KEY_CNT),
        EV_REL => Some(REL_CNT),
        EV_ABS => Some(ABS_CNT),
        EV_MSC => Some(MSC_CNT),
        EV_SW => Some(SW_CNT),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityBitmap {
    event_type: u16,
    code_count: usize,
    bits: Vec<u64>,
}

impl CapabilityBitmap {
    pub fn create(event_type: u16) -> Option<Self> {
        let code_count = code_count(event_type)?;
        Some(Self {
            event_type,
            code_count,
            bits: vec![0; code_count.div_ceil(64)],
        })
    }

    pub fn event_type(&self) -> u16 {
        self.event_type
    }

    pub fn code_count(&self) -> usize {
        self.code_count
    }

    /// Refills the bitmap from the device. On failure the bitmap is left
    /// all clear.
    pub fn probe<P: CapabilityProbe + ?Sized>(&mut self, src: &P) -> Result<(), ProbeError> {
        self.clear();
        let codes = src.event_bits(self.event_type).map_err(|source| ProbeError {
            type_name: codes::type_name(self.event_type),
            source,
        })?;
        for code in codes {
            self.set(code);
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|w| *w = 0);
    }

    /// Codes beyond the tracked range are dropped.
    pub fn set(&mut self, code: u16) {
        let code = code as usize;
        if code < self.code_count {
            self.bits[code / 64] |= 1u64 << (code % 64);
        }
    }

    pub fn test(&self, code: usize) -> bool {
        if code >= self.code_count {
            return false;
        }
        self.bits[code / 64] & (1u64 << (code % 64)) != 0
    }

    pub fn codes(&self) -> impl Iterator<Item = u16> + '_ {
        (0..self.code_count).filter(|&c| self.test(c)).map(|c| c as u16)
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }
}

/// All capability bitmaps of one device, indexed by event type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    masks: Vec<Option<CapabilityBitmap>>,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceCapabilities {
    pub fn new() -> Self {
        Self {
            masks: (0..EV_CNT as u16).map(CapabilityBitmap::create).collect(),
        }
    }

    /// Probes EV_SYN first; every other tracked type is only queried when
    /// EV_SYN advertises it. Type probe failures are logged and leave that
    /// type empty; an EV_SYN failure is returned.
    pub fn probe<P: CapabilityProbe + ?Sized>(src: &P) -> Result<Self, ProbeError> {
        let mut caps = Self::new();
        if let Some(syn) = caps.masks[EV_SYN as usize].as_mut() {
            syn.probe(src)?;
        }
        for ev_type in 1..EV_CNT as u16 {
            let advertised = caps.has_type(ev_type);
            if let Some(mask) = caps.masks[ev_type as usize].as_mut() {
                if !advertised {
                    mask.clear();
                } else if let Err(e) = mask.probe(src) {
                    warn!("{e}");
                }
            }
        }
        Ok(caps)
    }

    pub fn bitmap(&self, ev_type: u16) -> Option<&CapabilityBitmap> {
        self.masks.get(ev_type as usize)?.as_ref()
    }

    pub fn has_type(&self, ev_type: u16) -> bool {
        self.has_code(EV_SYN, ev_type)
    }

    pub fn has_any_type(&self, types: &[u16]) -> bool {
        types.iter().any(|&t| self.has_type(t))
    }

    pub fn has_code(&self, ev_type: u16, code: u16) -> bool {
        self.bitmap(ev_type)
            .map(|m| m.test(code as usize))
            .unwrap_or(false)
    }

    pub fn has_any_code(&self, ev_type: u16, codes: &[u16]) -> bool {
        codes.iter().any(|&c| self.has_code(ev_type, c))
    }

    /// Supported types (EV_SYN excluded, `ignored` skipped) are exactly `required`.
    pub fn match_types_exact(&self, required: &[u16], ignored: &[u16]) -> bool {
        (1..EV_CNT as u16)
            .filter(|t| !ignored.contains(t))
            .all(|t| self.has_type(t) == required.contains(&t))
    }

    /// Supported codes of `ev_type` are exactly `codes`.
    pub fn match_codes_exact(&self, ev_type: u16, codes: &[u16]) -> bool {
        (0..KEY_CNT as u16).all(|c| self.has_code(ev_type, c) == codes.contains(&c))
    }

    /// `(type, codes)` pairs of everything advertised, for logging and `probe` output.
    pub fn summary(&self) -> Vec<(u16, Vec<u16>)> {
        (1..EV_CNT as u16)
            .filter(|&t| self.has_type(t))
            .map(|t| {
                let codes = self.bitmap(t).map(|m| m.codes().collect()).unwrap_or_default();
                (t, codes)
            })
            .collect()
    }
}

impl CapabilityProbe for evdev::Device {
    fn event_bits(&self, ev_type: u16) -> io::Result<Vec<u16>> {
        let out = match ev_type {
            EV_SYN => self.supported_events().iter().map(|t| t.0).collect(),
            EV_KEY => self
                .supported_keys()
                .map(|s| s.iter().map(|c| c.0).collect())
                .unwrap_or_default(),
            EV_REL => self
                .supported_relative_axes()
                .map(|s| s.iter().map(|c| c.0).collect())
                .unwrap_or_default(),
            EV_ABS => self
                .supported_absolute_axes()
                .map(|s| s.iter().map(|c| c.0).collect())
                .unwrap_or_default(),
            EV_MSC => self
                .misc_properties()
                .map(|s| s.iter().map(|c| c.0).collect())
                .unwrap_or_default(),
            EV_SW => self
                .supported_switches()
                .map(|s| s.iter().map(|c| c.0).collect())
                .unwrap_or_default(),
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("{} is not tracked", codes::type_name(other)),
                ));
            }
        };
        Ok(out)
    }
}
