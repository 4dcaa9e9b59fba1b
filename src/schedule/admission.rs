//! Memory-pressure admission control.
//!
//! Two independent thresholds are used on purpose: a notification is refused
//! inline only above `admit_ceiling`, while the periodic monitor pauses the
//! intake above `resume_below` and resumes it at or under that mark. The
//! monitor re-evaluates from scratch on every tick; there is no debounce.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use sysinfo::System;
use tracing::{info, warn};

use crate::config::AdmissionConfig;
use crate::schedule::queue::IntakeGate;

/// Source of the current memory-utilization ratio in `[0.0, 1.0]`.
pub trait MemoryProbe: Send + Sync + 'static {
    fn usage_ratio(&self) -> f64;
}

/// Host memory as reported by the OS: `(total - available) / total`.
pub struct SysinfoMemoryProbe {
    system: Mutex<System>,
}

impl Default for SysinfoMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl MemoryProbe for SysinfoMemoryProbe {
    fn usage_ratio(&self) -> f64 {
        let Ok(mut system) = self.system.lock() else {
            return 0.0;
        };
        system.refresh_memory();
        let total = system.total_memory();
        if total == 0 {
            return 0.0;
        }
        let used = total.saturating_sub(system.available_memory());
        used as f64 / total as f64
    }
}

pub struct AdmissionController {
    probe: Arc<dyn MemoryProbe>,
    gate: IntakeGate,
    config: AdmissionConfig,
}

impl AdmissionController {
    pub fn new(probe: Arc<dyn MemoryProbe>, gate: IntakeGate, config: AdmissionConfig) -> Self {
        Self { probe, gate, config }
    }

    pub fn gate(&self) -> &IntakeGate {
        &self.gate
    }

    pub fn usage_ratio(&self) -> f64 {
        self.probe.usage_ratio()
    }

    /// Inline pre-check before a notification is processed.
    pub fn should_admit(&self) -> bool {
        let ratio = self.probe.usage_ratio();
        if ratio > self.config.admit_ceiling {
            warn!("Memory usage ratio is too high: {:.2}%", ratio * 100.0);
            return false;
        }
        true
    }

    /// Stops delivery of further notifications.
    pub fn pause_intake(&self) {
        if self.gate.pause() {
            warn!("Paused task intake");
        }
    }

    /// One monitor tick. Returns whether the intake is paused afterwards.
    pub fn check(&self) -> bool {
        let ratio = self.probe.usage_ratio();
        if ratio > self.config.resume_below {
            if self.gate.pause() {
                warn!("Memory usage is high: {:.2}%, paused task intake", ratio * 100.0);
            }
            true
        } else {
            if self.gate.resume() {
                info!("Memory back to normal: {:.2}%, resumed task intake", ratio * 100.0);
            }
            false
        }
    }

    pub fn monitor_interval(&self) -> Duration {
        self.config.monitor_interval
    }

    /// Runs `check` on a fixed delay until the task is aborted.
    pub async fn run_monitor(self: Arc<Self>) {
        loop {
            self.check();
            tokio::time::sleep(self.config.monitor_interval).await;
        }
    }
}
