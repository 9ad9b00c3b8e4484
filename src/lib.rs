//! Pulseflux - Real-time cardiac peak detection and HRV analysis engine
//!
//! Pulseflux turns a fixed-rate stream of raw PPG samples into validated beat
//! timestamps, inter-beat intervals, and HRV statistics through a
//! deterministic pipeline: capture → queue → peak detection → IBI history →
//! HRV analysis → result snapshot.
//!
//! ## Modules
//!
//! - **sampler / queue**: fixed-rate capture into a lock-free SPSC ring
//! - **detector**: two-state adaptive-threshold beat detection
//! - **hrv**: pure statistical pipeline over the IBI history
//! - **session / storage**: timed collection, persistence, and delivery seams

pub mod config;
pub mod detector;
pub mod error;
pub mod hrv;
pub mod queue;
pub mod sampler;
pub mod session;
pub mod storage;

pub use config::{DetectorConfig, SessionConfig};
pub use detector::{BeatEvent, EdgeState, PeakDetector, StepEvent, ThresholdLevels};
pub use error::ComputeError;
pub use hrv::{AutonomicBalance, HrvMetrics, HrvResult};
pub use queue::{sample_queue, SampleConsumer, SampleProducer};
pub use sampler::{SampleSource, Sampler, SamplerHandle, SyntheticPulse, SAMPLE_MAX};
pub use session::{
    deliver_all, publish, Clock, DeliverySink, MeasurementSession, MonotonicClock, NullTraceSink,
    TraceSink, Transport,
};
pub use storage::MeasurementStore;

/// Pulseflux version embedded in CLI output
pub const PULSEFLUX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Producer name for emitted records and logs
pub const PRODUCER_NAME: &str = "pulseflux";
