//! The set of monitored input devices.

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use crate::caps::{CapabilityProbe, DeviceCapabilities};
use crate::classify::{self, DeviceKind, TypeOverride};
use crate::codes::*;
use crate::datapipe::SensorHub;
use crate::event::RawEvent;
use crate::handlers::{DeviceHandler, HandlerCx, handler_for};
use crate::mapping::EventTranslationTable;

/// An open evdev node.
pub trait EvdevNode: CapabilityProbe {
    fn path(&self) -> &Path;
    fn name(&self) -> &str;
    /// Bus, vendor and product ids.
    fn input_id(&self) -> (u16, u16, u16);
    /// Appends whatever is available without blocking.
    fn fetch(&mut self, out: &mut Vec<RawEvent>) -> io::Result<()>;
    fn set_grab(&mut self, grab: bool) -> io::Result<()>;
    /// Switches currently in the "set" state.
    fn switch_state(&self) -> io::Result<Vec<u16>>;
}

pub trait NodeOpener {
    fn open(&mut self, path: &Path) -> io::Result<Box<dyn EvdevNode>>;
}

pub struct EvdevDevice {
    path: PathBuf,
    name: String,
    dev: evdev::Device,
}

impl EvdevDevice {
    pub fn open(path: &Path) -> io::Result<Self> {
        let dev = evdev::Device::open(path)?;
        dev.set_nonblocking(true)?;
        let name = dev.name().unwrap_or("unknown").to_string();
        Ok(Self {
            path: path.to_path_buf(),
            name,
            dev,
        })
    }
}

impl CapabilityProbe for EvdevDevice {
    fn event_bits(&self, ev_type: u16) -> io::Result<Vec<u16>> {
        self.dev.event_bits(ev_type)
    }
}

impl EvdevNode for EvdevDevice {
    fn path(&self) -> &Path {
        &self.path
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn input_id(&self) -> (u16, u16, u16) {
        let id = self.dev.input_id();
        (id.bus_type().0, id.vendor(), id.product())
    }

    fn fetch(&mut self, out: &mut Vec<RawEvent>) -> io::Result<()> {
        match self.dev.fetch_events() {
            Ok(events) => {
                out.extend(events.map(|ev| RawEvent::from(&ev)));
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn set_grab(&mut self, grab: bool) -> io::Result<()> {
        if grab { self.dev.grab() } else { self.dev.ungrab() }
    }

    fn switch_state(&self) -> io::Result<Vec<u16>> {
        Ok(self.dev.get_switch_state()?.iter().map(|c| c.0).collect())
    }
}

/// Opens real device files.
#[derive(Debug, Default)]
pub struct EvdevOpener;

impl NodeOpener for EvdevOpener {
    fn open(&mut self, path: &Path) -> io::Result<Box<dyn EvdevNode>> {
        Ok(Box::new(EvdevDevice::open(path)?))
    }
}

/// Name based device configuration.
#[derive(Debug, Clone, Default)]
pub struct DeviceRules {
    pub blacklist: Vec<String>,
    /// Keyed by `bXXXXvXXXXpXXXX` id or sanitized device name.
    pub type_overrides: HashMap<String, TypeOverride>,
    /// Keyboard device name -> device that reports its keypad slide switch.
    pub keypad_slide: HashMap<String, String>,
}

impl DeviceRules {
    pub fn is_blacklisted(&self, name: &str) -> bool {
        self.blacklist.iter().any(|b| b == name)
    }

    pub fn type_override(&self, id: (u16, u16, u16), name: &str) -> Option<&TypeOverride> {
        let (bus, vendor, product) = id;
        self.type_overrides
            .get(&classify::id_key(bus, vendor, product))
            .or_else(|| self.type_overrides.get(&classify::sanitize_key(name)))
    }

    /// The kind a device ends up as once its override rule, if any, is applied.
    pub fn resolve_kind(&self, id: (u16, u16, u16), name: &str, probed: DeviceKind) -> DeviceKind {
        self.type_override(id, name)
            .map_or(probed, |o| o.apply(probed))
    }
}

pub struct DeviceEntry {
    pub path: PathBuf,
    pub name: String,
    pub caps: DeviceCapabilities,
    pub kind: DeviceKind,
    /// Name of the device reporting this keyboard's slide switch.
    pub keypad_slide_source: Option<String>,
    grabbed: bool,
    node: Box<dyn EvdevNode>,
    handler: Box<dyn DeviceHandler>,
}

impl DeviceEntry {
    pub fn is_grabbed(&self) -> bool {
        self.grabbed
    }

    pub fn touching(&self) -> bool {
        self.handler.touching()
    }

    pub fn set_grab(&mut self, grab: bool) {
        if self.grabbed == grab {
            return;
        }
        match self.node.set_grab(grab) {
            Ok(()) => {
                self.grabbed = grab;
                info!(
                    "{}: {}",
                    self.path.display(),
                    if grab { "grabbed" } else { "ungrabbed" }
                );
            }
            Err(e) => error!(
                "{}: EVIOCGRAB({}) failed: {e}",
                self.path.display(),
                u8::from(grab)
            ),
        }
    }

    pub fn switch_state(&self) -> io::Result<Vec<u16>> {
        self.node.switch_state()
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::json!({
            "path": self.path,
            "name": self.name,
            "kind": self.kind,
            "grabbed": self.grabbed,
        })
    }
}

/// Switch states read from one device at registration time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwitchScan {
    pub lens_cover: Option<bool>,
    pub keypad_slide: Option<bool>,
    pub front_proximity: Option<bool>,
    pub lid: Option<bool>,
    /// Any of the headphone, microphone, line-out or video-out jacks.
    pub jack: Option<bool>,
}

pub struct DeviceRegistry {
    opener: Box<dyn NodeOpener>,
    rules: DeviceRules,
    entries: Vec<DeviceEntry>,
}

impl DeviceRegistry {
    pub fn new(opener: Box<dyn NodeOpener>, rules: DeviceRules) -> Self {
        Self {
            opener,
            rules,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[DeviceEntry] {
        &self.entries
    }

    pub fn get(&self, path: &Path) -> Option<&DeviceEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Opens, probes and classifies a device node. Monitored kinds are kept,
    /// sensors go to the sensor hub and everything else is closed again.
    ///
    /// Returns the kind the device ended up as, or `None` if it was skipped.
    pub fn add(&mut self, path: &Path, sensors: &mut dyn SensorHub) -> Option<DeviceKind> {
        if self.remove(path, sensors) {
            debug!("{}: re-adding", path.display());
        }

        let node = match self.opener.open(path) {
            Ok(node) => node,
            Err(e) => {
                warn!("{}: can't open: {e}", path.display());
                return None;
            }
        };
        let name = node.name().to_string();

        if self.rules.is_blacklisted(&name) {
            info!("{}: \"{name}\": blacklisted", path.display());
            return None;
        }

        let caps = DeviceCapabilities::probe(&*node).unwrap_or_else(|e| {
            warn!("{}: {e}", path.display());
            DeviceCapabilities::new()
        });

        let probed = classify::classify(&caps);
        let kind = self.rules.resolve_kind(node.input_id(), &name, probed);
        if kind != probed {
            info!("{}: type {probed} overridden to {kind}", path.display());
        }

        info!("{}: \"{name}\", probed as {kind}", path.display());
        for (ev_type, codes) in caps.summary() {
            let names: Vec<String> = codes.iter().map(|&c| code_name(ev_type, c)).collect();
            debug!("  {}: {}", type_name(ev_type), names.join(" "));
        }

        match kind {
            DeviceKind::AmbientLight => sensors.attach_als(node),
            DeviceKind::ProximitySensor => sensors.attach_ps(node),
            _ => match handler_for(kind) {
                Some(handler) => {
                    let keypad_slide_source = match kind {
                        DeviceKind::Keyboard => self.rules.keypad_slide.get(&name).cloned(),
                        _ => None,
                    };
                    self.entries.push(DeviceEntry {
                        path: path.to_path_buf(),
                        name,
                        caps,
                        kind,
                        keypad_slide_source,
                        grabbed: false,
                        node,
                        handler,
                    });
                }
                None => debug!("{}: not monitored", path.display()),
            },
        }
        Some(kind)
    }

    /// Forgets a monitored device or releases a held sensor.
    pub fn remove(&mut self, path: &Path, sensors: &mut dyn SensorHub) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.path != path);
        let removed = self.entries.len() != before;
        if removed {
            info!("{}: removed", path.display());
        }
        sensors.detach(path) || removed
    }

    pub fn iterate_by_kind(&mut self, kind: DeviceKind, mut f: impl FnMut(&mut DeviceEntry)) {
        self.entries
            .iter_mut()
            .filter(|e| e.kind == kind)
            .for_each(|e| f(e));
    }

    pub fn any_touching(&self) -> bool {
        self.entries
            .iter()
            .filter(|e| e.kind == DeviceKind::Touch)
            .any(DeviceEntry::touching)
    }

    /// Reads every device and feeds its events, translated, to its handler.
    /// Returns the devices that failed and should be dropped.
    pub fn pump(&mut self, table: &EventTranslationTable, cx: &mut HandlerCx<'_>) -> Vec<PathBuf> {
        let mut dead = Vec::new();
        let mut buf = Vec::new();
        for entry in self.entries.iter_mut() {
            buf.clear();
            if let Err(e) = entry.node.fetch(&mut buf) {
                warn!("{}: read failed: {e}", entry.path.display());
                dead.push(entry.path.clone());
                continue;
            }
            for ev in buf.drain(..) {
                entry.handler.handle(table.translate(ev), cx);
            }
        }
        dead
    }

    /// Current switch states of the input and volume key devices, with codes
    /// resolved through the translation table.
    pub fn scan_switches(&self, table: &EventTranslationTable) -> Vec<SwitchScan> {
        let watched = |kind: DeviceKind| matches!(kind, DeviceKind::Input | DeviceKind::VolumeKey);
        let mut scans = Vec::new();
        for entry in self.entries.iter().filter(|e| watched(e.kind)) {
            let set = match entry.switch_state() {
                Ok(set) => set,
                Err(e) => {
                    error!("{}: EVIOCGSW failed: {e}", entry.path.display());
                    continue;
                }
            };
            let read = |expected: u16| {
                let code = table.reverse_lookup_switch(expected);
                entry.caps.has_code(EV_SW, code).then(|| set.contains(&code))
            };
            let jack = [
                SW_HEADPHONE_INSERT,
                SW_MICROPHONE_INSERT,
                SW_LINEOUT_INSERT,
                SW_VIDEOOUT_INSERT,
            ]
            .into_iter()
            .filter_map(read)
            .reduce(|a, b| a || b);
            scans.push(SwitchScan {
                lens_cover: read(SW_CAMERA_LENS_COVER),
                keypad_slide: read(SW_KEYPAD_SLIDE),
                front_proximity: read(SW_FRONT_PROXIMITY),
                lid: read(SW_LID),
                jack,
            });
        }
        scans
    }

    /// At least one keyboard is usable: it has no keypad slide, or the
    /// slide is open.
    pub fn keyboard_available(&self, table: &EventTranslationTable) -> bool {
        let code = table.reverse_lookup_switch(SW_KEYPAD_SLIDE);
        self.entries
            .iter()
            .filter(|e| e.kind == DeviceKind::Keyboard)
            .any(|kb| {
                let slide = kb
                    .keypad_slide_source
                    .as_deref()
                    .and_then(|name| self.entries.iter().find(|e| e.name == name))
                    .unwrap_or(kb);
                if slide.path != kb.path {
                    debug!("\"{}\" gets slide state from \"{}\"", kb.name, slide.name);
                }
                if !slide.caps.has_code(EV_SW, code) {
                    debug!("\"{}\" is a non-sliding keyboard", kb.name);
                    return true;
                }
                match slide.switch_state() {
                    Ok(set) => {
                        let open = !set.contains(&code);
                        debug!(
                            "\"{}\" is a sliding keyboard in {} position",
                            kb.name,
                            if open { "open" } else { "closed" }
                        );
                        open
                    }
                    Err(e) => {
                        warn!("{}: EVIOCGSW failed: {e}", slide.path.display());
                        false
                    }
                }
            })
    }

    pub fn status(&self) -> serde_json::Value {
        serde_json::Value::Array(self.entries.iter().map(DeviceEntry::status).collect())
    }
}
