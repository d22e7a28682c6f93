//! Watch loop configuration.
//!
use std::{path::PathBuf, str::FromStr, time::Duration};

/// Default detection period in milliseconds.
pub const DEFAULT_PERIOD_MS: u64 = 200;

/// Default minimum time between alert batches in milliseconds.
pub const DEFAULT_COOLDOWN_MS: u64 = 3000;

/// One monitored class: warn when more than `max_count` instances are in view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AlertRule {
    pub label: String,
    pub max_count: usize,
}

impl AlertRule {
    pub fn new(label: impl Into<String>, max_count: usize) -> Self {
        Self {
            label: label.into(),
            max_count,
        }
    }
}

impl FromStr for AlertRule {
    type Err = String;

    /// Parse `"label=max_count"`; a bare `"label"` tolerates one instance.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (label, max_count) = match s.split_once('=') {
            Some((label, count)) => {
                let max_count = count
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| format!("invalid max count in rule {s:?}"))?;
                (label, max_count)
            }
            None => (s, 1),
        };

        let label = label.trim();
        if label.is_empty() {
            return Err(format!("empty label in rule {s:?}"));
        }

        Ok(AlertRule::new(label, max_count))
    }
}

/// Configuration of the detection loop and its alert policy.
#[derive(Clone, Debug)]
pub struct WatchConfig {
    /// Fixed period between detection cycles.
    pub period: Duration,
    /// Minimum time between alert batches.
    pub cooldown: Duration,
    /// Monitored classes with their tolerated counts.
    pub rules: Vec<AlertRule>,
    /// Detections below this confidence are discarded.
    pub min_confidence: f32,
    /// Same-class boxes overlapping more than this are suppressed.
    pub max_iou: f32,
    /// Model file to load; resolved to the cache directory when unset.
    pub model_path: Option<PathBuf>,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(DEFAULT_PERIOD_MS),
            cooldown: Duration::from_millis(DEFAULT_COOLDOWN_MS),
            rules: vec![AlertRule::new("person", 1), AlertRule::new("cell phone", 1)],
            min_confidence: 0.5,
            max_iou: 0.5,
            model_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_demo_constants() {
        let config = WatchConfig::default();
        assert_eq!(config.period, Duration::from_millis(200));
        assert_eq!(config.cooldown, Duration::from_millis(3000));
        assert_eq!(
            config.rules,
            vec![AlertRule::new("person", 1), AlertRule::new("cell phone", 1)]
        );
    }

    #[test]
    fn parse_rule_with_count() {
        let rule: AlertRule = "person=2".parse().unwrap();
        assert_eq!(rule, AlertRule::new("person", 2));
    }

    #[test]
    fn parse_bare_label_defaults_to_one() {
        let rule: AlertRule = "cell phone".parse().unwrap();
        assert_eq!(rule, AlertRule::new("cell phone", 1));
    }

    #[test]
    fn parse_rejects_bad_count_and_empty_label() {
        assert!("person=lots".parse::<AlertRule>().is_err());
        assert!("=3".parse::<AlertRule>().is_err());
    }
}
