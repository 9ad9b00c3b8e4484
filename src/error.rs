//! Error types for Pulseflux

use thiserror::Error;

/// Errors that can occur during detection, analysis, or persistence
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("no inter-beat intervals recorded yet")]
    DataUnavailable,

    #[error("degenerate inter-beat interval: peak at {first} ms followed by peak at {second} ms")]
    DegenerateInterval { first: u64, second: u64 },

    #[error("BPM {0:.1} outside physiological range")]
    OutOfPhysiologicalRange(f64),

    #[error("insufficient data for HRV analysis: {0}")]
    InsufficientData(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Delivery failed: {0}")]
    DeliveryError(String),
}
