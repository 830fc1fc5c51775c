use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::MemoryConfig;

/// Health relative to the configured ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryHealth {
    Ok,
    Warning,
    Critical,
}

impl fmt::Display for MemoryHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemoryHealth::Ok => "healthy",
            MemoryHealth::Warning => "warning",
            MemoryHealth::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// Fractions of `max_memory_mb`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryThresholds {
    /// `Warning` when `usage / ceiling >= warning`.
    pub warning: f64,
    /// `Critical` when `usage / ceiling >= critical`; also the admission limit.
    pub critical: f64,
}

impl Default for MemoryThresholds {
    fn default() -> Self {
        Self {
            warning: 0.8,
            critical: 0.9,
        }
    }
}

impl From<&MemoryConfig> for MemoryThresholds {
    fn from(cfg: &MemoryConfig) -> Self {
        Self {
            warning: cfg.warning,
            critical: cfg.critical,
        }
    }
}

impl MemoryThresholds {
    pub fn level_for_ratio(self, ratio: f64) -> MemoryHealth {
        if ratio >= self.critical {
            MemoryHealth::Critical
        } else if ratio >= self.warning {
            MemoryHealth::Warning
        } else {
            MemoryHealth::Ok
        }
    }
}
