use anyhow::Result;
use log::info;
use std::time::{Duration, Instant};

use super::dispatch::DaemonContext;
use crate::config::Config;
use crate::context::InputContext;
use crate::datapipe::{HeldSensors, StatePipe};
use crate::devices::{DeviceRegistry, EvdevOpener};
use crate::grab::touch::PalmSensor;
use crate::watcher::DeviceDirWatcher;

/// Longest nap between loop iterations.
const IDLE_TICK: Duration = Duration::from_millis(5);

/// Device side of the daemon: the input context plus the directory watch
/// feeding it.
pub struct Pipeline {
    ctx: DaemonContext,
    watcher: DeviceDirWatcher,
}

impl Pipeline {
    pub fn new(cfg: &Config) -> Result<Self> {
        let now = Instant::now();
        let registry = DeviceRegistry::new(Box::new(EvdevOpener), cfg.device_rules());
        let mut ctx = InputContext::new(
            registry,
            cfg.translation_table(),
            cfg.runtime_settings(),
            PalmSensor::new(&cfg.paths.palm_status),
            StatePipe::new(),
            HeldSensors::new(),
            now,
        );
        // watch first so nothing appearing during the scan is missed
        let watcher = DeviceDirWatcher::new(&cfg.paths.input_dir)?;
        ctx.scan_devices(watcher.dir(), now)?;
        Ok(Self { ctx, watcher })
    }

    pub fn ctx_mut(&mut self) -> &mut DaemonContext {
        &mut self.ctx
    }

    /// One pass: hotplug, device input, expired timers.
    pub fn tick(&mut self, now: Instant) {
        for change in self.watcher.drain() {
            self.ctx.device_changed(&change, now);
        }
        self.ctx.pump_devices(now);
        self.ctx.poll_timers(now);
    }

    /// How long the loop may sleep before the next tick.
    pub fn idle_for(&self, now: Instant) -> Duration {
        match self.ctx.next_deadline() {
            Some(deadline) => deadline.saturating_duration_since(now).min(IDLE_TICK),
            None => IDLE_TICK,
        }
    }

    pub fn shutdown(&mut self) {
        self.ctx.shutdown();
        info!("pipeline stopped");
    }
}
