//! Per-class count thresholds with a shared alert cooldown.
//!
use std::{
    fmt,
    sync::Mutex,
    time::{Duration, Instant},
};

use itertools::Itertools;

use crate::{config::AlertRule, nn::Detection};

/// One raised threshold violation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Warning {
    pub label: String,
    pub count: usize,
    pub max_count: usize,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x {} in view (tolerated: {})",
            self.count, self.label, self.max_count
        )
    }
}

/// Channel surfacing warnings to the user.
pub trait Notifier: Send + Sync {
    fn warn(&self, warning: &Warning);
}

/// Notifier writing to the log at warn level.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn warn(&self, warning: &Warning) {
        log::warn!("{warning}");
    }
}

/// Recording notifier for tests.
#[derive(Default)]
pub struct MemoryNotifier {
    warnings: Mutex<Vec<Warning>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warnings(&self) -> Vec<Warning> {
        self.warnings.lock().unwrap().clone()
    }
}

impl Notifier for MemoryNotifier {
    fn warn(&self, warning: &Warning) {
        self.warnings.lock().unwrap().push(warning.clone());
    }
}

/// Tally detections per monitored class and throttle threshold violations.
pub struct AlertPolicy {
    cooldown: Duration,
    rules: Vec<AlertRule>,
    last_alert: Option<Instant>,
}

impl AlertPolicy {
    pub fn new(cooldown: Duration, rules: Vec<AlertRule>) -> Self {
        Self {
            cooldown,
            rules,
            last_alert: None,
        }
    }

    /// Evaluate one cycle's detections against the rules.
    ///
    /// Within the cooldown window after the previous alert the result is
    /// empty and the state stays untouched. Otherwise every rule whose class
    /// count exceeds its tolerated maximum yields a warning, in rule order,
    /// and one shared timestamp is recorded for the whole batch.
    pub fn evaluate(&mut self, detections: &[Detection], now: Instant) -> Vec<Warning> {
        if let Some(last_alert) = self.last_alert {
            if now.saturating_duration_since(last_alert) <= self.cooldown {
                return Vec::new();
            }
        }

        let counts = detections.iter().map(|d| d.label.as_str()).counts();

        let warnings: Vec<Warning> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let count = counts.get(rule.label.as_str()).copied().unwrap_or(0);
                (count > rule.max_count).then(|| Warning {
                    label: rule.label.clone(),
                    count,
                    max_count: rule.max_count,
                })
            })
            .collect();

        if !warnings.is_empty() {
            self.last_alert = Some(now);
        }

        warnings
    }
}
