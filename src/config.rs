//! Runtime configuration.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Configuration for the default schedulers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Max queued background tasks before listener callbacks block.
    pub background_queue_capacity: usize,
    /// Max queued foreground tasks before background work blocks.
    pub foreground_queue_capacity: usize,
    /// Thread name of the background worker.
    pub background_thread_name: String,
    /// Thread name of the foreground worker.
    pub foreground_thread_name: String,
    /// Hold each subscription's first emission until the host is stable.
    pub stabilization_gate: bool,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            background_queue_capacity: 1024,
            foreground_queue_capacity: 1024,
            background_thread_name: "livequery-bg".to_string(),
            foreground_thread_name: "livequery-fg".to_string(),
            stabilization_gate: true,
        }
    }
}

impl LiveConfig {
    /// Reject configurations the schedulers cannot run with.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for (field, capacity) in [
            ("background_queue_capacity", self.background_queue_capacity),
            ("foreground_queue_capacity", self.foreground_queue_capacity),
        ] {
            if capacity == 0 {
                return Err(ValidationError::InvalidConfig {
                    field: field.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        for (field, name) in [
            ("background_thread_name", &self.background_thread_name),
            ("foreground_thread_name", &self.foreground_thread_name),
        ] {
            if name.trim().is_empty() {
                return Err(ValidationError::InvalidConfig {
                    field: field.to_string(),
                    reason: "cannot be empty".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(LiveConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let cfg: LiveConfig = serde_json::from_str(r#"{"stabilization_gate": false}"#).unwrap();
        assert!(!cfg.stabilization_gate);
        assert_eq!(cfg.background_queue_capacity, 1024);
    }

    #[test]
    fn rejects_zero_capacity_and_blank_names() {
        let cfg = LiveConfig {
            background_queue_capacity: 0,
            ..LiveConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(format!("{err}").contains("background_queue_capacity"));

        let cfg = LiveConfig {
            foreground_thread_name: "  ".to_string(),
            ..LiveConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
