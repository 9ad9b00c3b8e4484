//! Configuration surface
//!
//! Defaults mirror the reference firmware: 250 Hz sampling into a 250-sample
//! window, ten-sample confirmation, a 300-slot capture queue, and a 30 second
//! collection session.

use serde::{Deserialize, Serialize};

use crate::error::ComputeError;

/// Default sampling rate (Hz)
pub const DEFAULT_SAMPLE_RATE_HZ: u32 = 250;

/// Default sliding-window capacity (samples, ~1 s at 250 Hz)
pub const DEFAULT_WINDOW_CAPACITY: usize = 250;

/// Consecutive qualifying samples required to accept a state transition
pub const DEFAULT_CONFIRM_COUNT: u32 = 10;

/// Default capture queue capacity (slots)
pub const DEFAULT_QUEUE_CAPACITY: usize = 300;

/// Default bounded recent-IBI history capacity
pub const DEFAULT_RECENT_CAPACITY: usize = 20;

/// Default collection duration for a timed session (ms)
pub const DEFAULT_COLLECTION_DURATION_MS: u64 = 30_000;

/// Detector tuning parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Sampling rate in Hz
    pub sample_rate_hz: u32,
    /// Sliding-window capacity in samples; also sets the analysis lag
    /// (lag seconds = window_capacity / sample_rate_hz)
    pub window_capacity: usize,
    /// Consecutive-sample confirmation count (debounce)
    pub confirm_count: u32,
    /// Lowest BPM accepted into the live reading
    pub bpm_min: f64,
    /// Highest BPM accepted into the live reading
    pub bpm_max: f64,
    /// Bounded recent-IBI ring capacity
    pub recent_capacity: usize,
    /// Capture queue capacity in slots
    pub queue_capacity: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: DEFAULT_SAMPLE_RATE_HZ,
            window_capacity: DEFAULT_WINDOW_CAPACITY,
            confirm_count: DEFAULT_CONFIRM_COUNT,
            bpm_min: 40.0,
            bpm_max: 180.0,
            recent_capacity: DEFAULT_RECENT_CAPACITY,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl DetectorConfig {
    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize configuration to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Trace update cadence: one tenth of the fastest plausible beat period
    pub fn update_interval_ms(&self) -> u64 {
        (60_000.0 / self.bpm_max / 10.0) as u64
    }

    /// Validate a BPM reading against the plausibility bounds.
    pub fn check_bpm(&self, bpm: f64) -> Result<f64, ComputeError> {
        if bpm < self.bpm_min || bpm > self.bpm_max {
            return Err(ComputeError::OutOfPhysiologicalRange(bpm));
        }
        Ok(bpm)
    }
}

/// Timed-session parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Collection duration in milliseconds
    pub collection_duration_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            collection_duration_ms: DEFAULT_COLLECTION_DURATION_MS,
        }
    }
}

impl SessionConfig {
    /// Load configuration from JSON
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
