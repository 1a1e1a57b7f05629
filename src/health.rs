//! Stream staleness detection
//!
//! Driven by its own low-frequency tick so a hung sensor, which stops
//! notifications altogether, is still noticed.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pipeline::StreamStatus;
use crate::HealthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Normal,
    TimedOut,
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthState::Normal => f.write_str("normal"),
            HealthState::TimedOut => f.write_str("timed out"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StalenessMonitor {
    /// Seconds after driver start during which health is always `Normal`
    grace: f64,
    /// Lower bound on the period used for the threshold
    min_period_floor: f64,
}

impl StalenessMonitor {
    pub fn new(grace: f64, min_period_floor: f64) -> Self {
        Self {
            grace,
            min_period_floor,
        }
    }

    pub fn from_config(config: &HealthConfig) -> Self {
        Self::new(config.grace_secs, config.min_period_floor_secs)
    }

    /// Age at which a stream with this period counts as stale
    pub fn threshold(&self, period: f64) -> f64 {
        2.0 * period.max(self.min_period_floor)
    }

    pub fn is_stale(&self, status: &StreamStatus, now: f64) -> bool {
        if !status.enabled {
            return false;
        }
        match status.last_saved_at {
            Some(last) => now - last >= self.threshold(status.period),
            None => true,
        }
    }

    /// Aggregate health at driver-local time `now`
    pub fn check(&self, streams: &[StreamStatus], now: f64) -> HealthState {
        if now < self.grace {
            return HealthState::Normal;
        }
        if streams.iter().any(|status| self.is_stale(status, now)) {
            HealthState::TimedOut
        } else {
            HealthState::Normal
        }
    }
}

impl Default for StalenessMonitor {
    fn default() -> Self {
        Self::from_config(&HealthConfig::default())
    }
}
