//! Timed measurement sessions and collaborator seams
//!
//! The session owns the consumer side of the capture queue and the detector,
//! enforces the fixed collection duration by comparing wall-clock time (the
//! detector itself carries no timing policy), and fans the final snapshot out
//! to delivery sinks. Display, persistence, and network collaborators plug in
//! behind the [`TraceSink`], [`DeliverySink`], and [`Transport`] traits; their
//! failures are reported but never corrupt detector state.

use std::time::Instant;

use log::{debug, warn};

use crate::config::SessionConfig;
use crate::detector::PeakDetector;
use crate::error::ComputeError;
use crate::hrv::HrvResult;
use crate::queue::SampleConsumer;

/// Monotonic millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Clock counting from its construction instant.
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Live-trace collaborator (display or equivalent). All methods default to
/// no-ops so implementers override only what they render.
pub trait TraceSink {
    /// Latest raw reading with the current window extremes.
    fn on_trace(&mut self, _reading: u16, _min: u16, _max: u16) {}
    /// Live BPM reading changed or was refreshed.
    fn on_bpm(&mut self, _bpm: f64) {}
    /// Seconds left in a timed collection.
    fn on_countdown(&mut self, _seconds_left: u64) {}
}

/// Trace sink that discards everything.
pub struct NullTraceSink;

impl TraceSink for NullTraceSink {}

/// Append-only persistence collaborator.
pub trait DeliverySink {
    fn deliver(&mut self, record: &HrvResult) -> Result<(), ComputeError>;
}

/// Opaque publish/request transport (e.g. an MQTT bridge).
pub trait Transport {
    fn request(&mut self, payload: &str) -> Result<String, ComputeError>;
}

/// Deliver `record` to every sink; failures are logged and skipped.
/// Returns the number of successful deliveries.
pub fn deliver_all(record: &HrvResult, sinks: &mut [&mut dyn DeliverySink]) -> usize {
    let mut delivered = 0;
    for sink in sinks.iter_mut() {
        match sink.deliver(record) {
            Ok(()) => delivered += 1,
            Err(err) => warn!("result delivery failed: {err}"),
        }
    }
    delivered
}

/// Publish `record` over a transport as JSON, returning the response.
pub fn publish(record: &HrvResult, transport: &mut dyn Transport) -> Result<String, ComputeError> {
    let payload = serde_json::to_string(record)?;
    transport.request(&payload)
}

/// One timed collection run: drain samples until the configured duration has
/// elapsed, then derive the HRV snapshot from the raw IBI history.
pub struct MeasurementSession<C: Clock> {
    detector: PeakDetector,
    consumer: SampleConsumer,
    config: SessionConfig,
    clock: C,
    started_at_ms: u64,
}

impl<C: Clock> MeasurementSession<C> {
    pub fn new(
        detector: PeakDetector,
        consumer: SampleConsumer,
        config: SessionConfig,
        clock: C,
    ) -> Self {
        let started_at_ms = clock.now_ms();
        debug!(
            "session started, collecting for {} ms",
            config.collection_duration_ms
        );
        Self {
            detector,
            consumer,
            config,
            clock,
            started_at_ms,
        }
    }

    /// Process everything currently queued; reports the countdown to `sink`.
    /// Returns the number of samples consumed.
    pub fn tick(&mut self, sink: &mut dyn TraceSink) -> u32 {
        let remaining = self.remaining_secs();
        self.detector
            .drain(&self.consumer, &self.clock, sink, Some(remaining))
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.clock.now_ms().saturating_sub(self.started_at_ms)
    }

    pub fn remaining_secs(&self) -> u64 {
        self.config
            .collection_duration_ms
            .saturating_sub(self.elapsed_ms())
            / 1000
    }

    pub fn is_complete(&self) -> bool {
        self.elapsed_ms() >= self.config.collection_duration_ms
    }

    pub fn detector(&self) -> &PeakDetector {
        &self.detector
    }

    /// Derive the session snapshot from the raw IBI history and reset the
    /// detector for the next run.
    pub fn finish(&mut self) -> Result<HrvResult, ComputeError> {
        let history = self.detector.ibi_history()?.to_vec();
        let result = HrvResult::compute(&history)?;
        self.detector.reset();
        debug!(
            "session finished: mean HR {:.2}, {} raw intervals",
            result.mean_hr,
            history.len()
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectorConfig;
    use crate::hrv::HrvMetrics;
    use crate::queue::sample_queue;
    use crate::sampler::{SampleSource, SyntheticPulse};
    use pretty_assertions::assert_eq;
    use std::cell::Cell;

    /// Deterministic clock advancing a fixed step per reading, mimicking the
    /// 4 ms spacing of 250 Hz consumption.
    struct SteppingClock {
        now: Cell<u64>,
        step: u64,
    }

    impl SteppingClock {
        fn new(step: u64) -> Self {
            Self {
                now: Cell::new(0),
                step,
            }
        }
    }

    impl Clock for SteppingClock {
        fn now_ms(&self) -> u64 {
            let now = self.now.get();
            self.now.set(now + self.step);
            now
        }
    }

    #[derive(Default)]
    struct CountingTrace {
        traces: usize,
        last_bpm: Option<f64>,
        last_countdown: Option<u64>,
    }

    impl TraceSink for CountingTrace {
        fn on_trace(&mut self, _reading: u16, _min: u16, _max: u16) {
            self.traces += 1;
        }
        fn on_bpm(&mut self, bpm: f64) {
            self.last_bpm = Some(bpm);
        }
        fn on_countdown(&mut self, seconds_left: u64) {
            self.last_countdown = Some(seconds_left);
        }
    }

    fn sample_result() -> HrvResult {
        HrvResult::from_metrics(
            "test".to_string(),
            1_700_000_000,
            &HrvMetrics {
                mean_hr: 75.0,
                mean_ppi: 800.0,
                rmssd: 25,
                sdnn: 40.0,
            },
        )
    }

    #[test]
    fn test_full_collection_produces_result() {
        let (producer, consumer) = sample_queue(8192);
        let mut source = SyntheticPulse::new(250, 800);
        // 30 s of samples at 250 Hz
        for _ in 0..7500 {
            producer.push(source.read_sample());
        }

        let mut session = MeasurementSession::new(
            PeakDetector::new(DetectorConfig::default()),
            consumer,
            SessionConfig::default(),
            SteppingClock::new(4),
        );
        assert!(!session.is_complete());

        let mut trace = CountingTrace::default();
        let consumed = session.tick(&mut trace);
        assert_eq!(consumed, 7500);
        // 7500 samples at 4 ms each exhaust the 30 s collection window
        assert!(session.is_complete());
        assert!(trace.traces > 0);
        assert_eq!(trace.last_countdown, Some(29));
        let bpm = trace.last_bpm.expect("live BPM never reported");
        assert!((bpm - 75.0).abs() < 2.0);

        let result = session.finish().unwrap();
        assert!((result.mean_hr - 75.0).abs() < 2.0);
        assert!(result.mean_ppi > 750.0 && result.mean_ppi < 850.0);
        assert!(!result.id.is_empty());

        // Detector came back reset
        assert_eq!(session.detector(), &PeakDetector::default());
    }

    #[test]
    fn test_finish_without_beats() {
        let (_producer, consumer) = sample_queue(16);
        let mut session = MeasurementSession::new(
            PeakDetector::default(),
            consumer,
            SessionConfig::default(),
            SteppingClock::new(4),
        );
        assert!(matches!(
            session.finish(),
            Err(ComputeError::DataUnavailable)
        ));
    }

    #[test]
    fn test_session_not_complete_before_duration() {
        let (producer, consumer) = sample_queue(1024);
        for _ in 0..100 {
            producer.push(2000);
        }
        let mut session = MeasurementSession::new(
            PeakDetector::default(),
            consumer,
            SessionConfig {
                collection_duration_ms: 30_000,
            },
            SteppingClock::new(4),
        );
        session.tick(&mut NullTraceSink);
        assert!(!session.is_complete());
        assert!(session.remaining_secs() <= 30);
    }

    struct FailingSink;
    impl DeliverySink for FailingSink {
        fn deliver(&mut self, _record: &HrvResult) -> Result<(), ComputeError> {
            Err(ComputeError::DeliveryError("sink offline".to_string()))
        }
    }

    struct RecordingSink {
        records: Vec<HrvResult>,
    }
    impl DeliverySink for RecordingSink {
        fn deliver(&mut self, record: &HrvResult) -> Result<(), ComputeError> {
            self.records.push(record.clone());
            Ok(())
        }
    }

    #[test]
    fn test_delivery_failures_are_not_fatal() {
        let record = sample_result();
        let mut failing = FailingSink;
        let mut recording = RecordingSink {
            records: Vec::new(),
        };
        let delivered = deliver_all(
            &record,
            &mut [&mut failing as &mut dyn DeliverySink, &mut recording],
        );
        assert_eq!(delivered, 1);
        assert_eq!(recording.records.len(), 1);
        assert_eq!(recording.records[0], record);
    }

    struct EchoTransport;
    impl Transport for EchoTransport {
        fn request(&mut self, payload: &str) -> Result<String, ComputeError> {
            Ok(payload.to_string())
        }
    }

    #[test]
    fn test_publish_serializes_record() {
        let record = sample_result();
        let response = publish(&record, &mut EchoTransport).unwrap();
        let echoed: HrvResult = serde_json::from_str(&response).unwrap();
        assert_eq!(echoed, record);
    }
}
