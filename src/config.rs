use anyhow::{Context, Result, anyhow};
use directories::ProjectDirs;
use log::{info, warn};
use serde::Deserialize;
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::classify::{self, TypeOverride};
use crate::context::{GRAB_ALLOWED_ALL, Settings};
use crate::devices::DeviceRules;
use crate::grab::touch::{DEFAULT_PALM_PATH, DEFAULT_UNBLOCK_DELAY};
use crate::mapping::EventTranslationTable;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Blacklist {
    pub devices: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SettingsSection {
    pub input_grab_allowed: u8,
    pub touch_unblock_delay_ms: u64,
    pub doubletap_emulation: bool,
}

impl Default for SettingsSection {
    fn default() -> Self {
        Self {
            input_grab_allowed: GRAB_ALLOWED_ALL,
            touch_unblock_delay_ms: DEFAULT_UNBLOCK_DELAY.as_millis() as u64,
            doubletap_emulation: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Paths {
    pub input_dir: PathBuf,
    pub palm_status: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("/dev/input"),
            palm_status: PathBuf::from(DEFAULT_PALM_PATH),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `kernel_emits = "expected"`, kept in file order.
    pub evdev: toml::Table,
    pub blacklist: Blacklist,
    pub device_types: HashMap<String, String>,
    pub keypad_slide: HashMap<String, String>,
    pub settings: SettingsSection,
    pub paths: Paths,
}

pub fn default_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "evind").map(|d| d.config_dir().join("evind.toml"))
}

impl Config {
    /// Reads `path`, or the default location when `None`. A missing file
    /// yields the defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match default_config_path() {
                Some(p) => p,
                None => {
                    warn!("no config directory; using defaults");
                    return Ok(Self::default());
                }
            },
        };
        if !path.exists() {
            info!("{} not found; using defaults", path.display());
            return Ok(Self::default());
        }
        let txt = fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let cfg = Self::parse(&txt).with_context(|| format!("in {}", path.display()))?;
        info!("config loaded from {}", path.display());
        Ok(cfg)
    }

    pub fn parse(txt: &str) -> Result<Self> {
        let cfg: Config = toml::from_str(txt).map_err(|e| anyhow!("failed to parse: {e}"))?;
        validate(&cfg)?;
        Ok(cfg)
    }

    pub fn translation_table(&self) -> EventTranslationTable {
        let entries = self.evdev.iter().filter_map(|(k, v)| match v.as_str() {
            Some(s) => Some((k.as_str(), s)),
            None => {
                warn!("evdev mapping '{k}' value must be a string, got {}", v.type_str());
                None
            }
        });
        EventTranslationTable::from_entries(entries)
    }

    pub fn device_rules(&self) -> DeviceRules {
        let mut type_overrides = HashMap::new();
        for (key, rules) in &self.device_types {
            match TypeOverride::parse(rules) {
                Some(o) => {
                    type_overrides.insert(classify::sanitize_key(key), o);
                }
                None => warn!("device type override '{key}': no usable rules"),
            }
        }
        DeviceRules {
            blacklist: self.blacklist.devices.clone(),
            type_overrides,
            keypad_slide: self.keypad_slide.clone(),
        }
    }

    pub fn runtime_settings(&self) -> Settings {
        Settings {
            grab_allowed: self.settings.input_grab_allowed,
            touch_unblock_delay: Duration::from_millis(self.settings.touch_unblock_delay_ms),
            doubletap_emulation: self.settings.doubletap_emulation,
        }
    }
}

fn validate(cfg: &Config) -> Result<()> {
    validate_grab_allowed(cfg.settings.input_grab_allowed)?;
    for name in &cfg.blacklist.devices {
        if name.trim().is_empty() {
            return Err(anyhow!("blacklist.devices contains an empty name"));
        }
    }
    for (kb, src) in &cfg.keypad_slide {
        if src.trim().is_empty() {
            return Err(anyhow!("keypad_slide '{kb}' has an empty source device"));
        }
    }
    Ok(())
}

pub fn validate_grab_allowed(mask: u8) -> Result<()> {
    if mask & !GRAB_ALLOWED_ALL != 0 {
        return Err(anyhow!(
            "input_grab_allowed must be in 0..={GRAB_ALLOWED_ALL}, got {mask}"
        ));
    }
    Ok(())
}

pub fn doctor_report(cfg: &Config, config_path: Option<&Path>) -> serde_json::Value {
    let input_dir = &cfg.paths.input_dir;
    let readable: Vec<String> = crate::watcher::scan(input_dir)
        .unwrap_or_default()
        .into_iter()
        .filter(|p| fs::File::open(p).is_ok())
        .map(|p| p.display().to_string())
        .collect();
    serde_json::json!({
        "config": config_path.map(Path::to_path_buf).or_else(default_config_path),
        "input_dir": input_dir,
        "input_dir_present": input_dir.is_dir(),
        "readable_devices": readable,
        "input_group_member": check_in_input_group(),
        "palm_status_present": cfg.paths.palm_status.exists(),
        "hints": {
            "add_user_to_input_group": "sudo usermod -aG input $USER && newgrp input"
        }
    })
}

fn check_in_input_group() -> bool {
    let Ok(s) = fs::read_to_string("/etc/group") else {
        return false;
    };
    let user = whoami::username();
    s.lines()
        .filter(|l| l.starts_with("input:"))
        .any(|l| l.split(':').nth(3).unwrap_or("").split(',').any(|u| u == user))
}
