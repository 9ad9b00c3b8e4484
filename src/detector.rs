//! Cardiac peak detection
//!
//! A two-state adaptive-threshold machine over a sliding window of raw
//! samples. Threshold and margin levels track the window; transitions are
//! evaluated on the oldest retained element, so detection runs one window
//! (~1 s at defaults) behind the live signal. The lag buys stability against
//! transient noise and is tuned through [`DetectorConfig::window_capacity`].
//!
//! False positives self-correct: a peak whose descent is never confirmed is
//! popped from the pending stack and the machine returns to the rising state.

use std::collections::VecDeque;

use log::{debug, warn};

use crate::config::DetectorConfig;
use crate::error::ComputeError;
use crate::queue::SampleConsumer;
use crate::session::{Clock, TraceSink};

/// Detection state of the edge machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeState {
    RisingEdge,
    FallingEdge,
}

/// Scalar levels derived from the sample window.
///
/// `range == 0` collapses threshold and margin onto the baseline; the machine
/// then stalls without confirming any beat, which is a valid state rather
/// than an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ThresholdLevels {
    pub min: u16,
    pub max: u16,
    pub baseline: u16,
    pub threshold: u16,
    pub margin: u16,
}

impl ThresholdLevels {
    fn from_window(window: &VecDeque<u16>) -> Self {
        let min = window.iter().copied().min().unwrap_or(0);
        let max = window.iter().copied().max().unwrap_or(0);
        let sum: u64 = window.iter().map(|&v| v as u64).sum();
        let baseline = if window.is_empty() {
            0
        } else {
            (sum / window.len() as u64) as u16
        };
        let range = (max - min) as f64;
        Self {
            min,
            max,
            baseline,
            threshold: baseline + (range * 0.4) as u16,
            margin: baseline + (range * 0.2) as u16,
        }
    }
}

/// Bounded stack of pending peak timestamps (ms). Holding at most two makes
/// the false-positive rollback an O(1) pop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct PeakStack {
    slots: [u64; 2],
    len: usize,
}

impl PeakStack {
    fn push(&mut self, timestamp_ms: u64) {
        if self.len == 2 {
            self.slots[0] = self.slots[1];
            self.len = 1;
        }
        self.slots[self.len] = timestamp_ms;
        self.len += 1;
    }

    fn pop(&mut self) -> Option<u64> {
        if self.len == 0 {
            return None;
        }
        self.len -= 1;
        Some(self.slots[self.len])
    }

    fn clear(&mut self) {
        self.len = 0;
    }

    fn len(&self) -> usize {
        self.len
    }

    fn pair(&self) -> Option<(u64, u64)> {
        (self.len == 2).then(|| (self.slots[0], self.slots[1]))
    }
}

/// Outcome of consuming one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepEvent {
    /// No state change of interest
    Idle,
    /// A candidate peak was pushed onto the pending stack
    PeakMarked,
    /// A pending peak was rolled back as a false positive
    PeakDiscarded,
    /// Two pending peaks carried a non-positive span; both were dropped
    DegenerateInterval,
    /// A beat cycle completed and an IBI was recorded
    Beat(BeatEvent),
}

/// A completed beat cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatEvent {
    /// Inter-beat interval in milliseconds
    pub ibi_ms: u32,
    /// 60000 / IBI
    pub bpm: f64,
    /// Whether the BPM fell inside the plausibility bounds and updated the
    /// live reading
    pub accepted: bool,
}

/// Millisecond span between two consecutive peak timestamps.
///
/// Rejects identical or inverted timestamps before any division can happen.
pub fn interval_between(first: u64, second: u64) -> Result<u32, ComputeError> {
    if second <= first {
        return Err(ComputeError::DegenerateInterval { first, second });
    }
    Ok((second - first).min(u32::MAX as u64) as u32)
}

/// Adaptive-threshold cardiac peak detector.
#[derive(Debug, Clone, PartialEq)]
pub struct PeakDetector {
    config: DetectorConfig,
    state: EdgeState,
    window: VecDeque<u16>,
    levels: ThresholdLevels,
    confirm: u32,
    up: bool,
    fall: bool,
    peaks: PeakStack,
    ibi_raw: Vec<u32>,
    ibi_recent: VecDeque<u32>,
    bpm: Option<f64>,
    last_trace_ms: u64,
}

impl Default for PeakDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

impl PeakDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let window_capacity = config.window_capacity;
        let recent_capacity = config.recent_capacity;
        Self {
            config,
            state: EdgeState::RisingEdge,
            window: VecDeque::with_capacity(window_capacity),
            levels: ThresholdLevels::default(),
            confirm: 0,
            up: false,
            fall: false,
            peaks: PeakStack::default(),
            ibi_raw: Vec::new(),
            ibi_recent: VecDeque::with_capacity(recent_capacity),
            bpm: None,
            last_trace_ms: 0,
        }
    }

    /// Consume one sample stamped at `now_ms` (monotonic).
    pub fn step(&mut self, sample: u16, now_ms: u64) -> StepEvent {
        if self.window.len() == self.config.window_capacity {
            self.window.pop_front();
        }
        self.window.push_back(sample);
        if self.window.len() == self.config.window_capacity {
            self.levels = ThresholdLevels::from_window(&self.window);
        }
        // Transitions see the oldest retained element, one window behind the
        // newest sample.
        let value = match self.window.front() {
            Some(&value) => value,
            None => return StepEvent::Idle,
        };
        match self.state {
            EdgeState::RisingEdge => self.step_rising(value, now_ms),
            EdgeState::FallingEdge => self.step_falling(value),
        }
    }

    fn step_rising(&mut self, value: u16, now_ms: u64) -> StepEvent {
        if value >= self.levels.threshold && !self.up {
            self.confirm += 1;
            if self.confirm >= self.config.confirm_count {
                self.up = true;
                self.fall = false;
                self.confirm = 0;
            }
        }
        if value <= self.levels.threshold {
            // Noise reset
            self.confirm = 0;
        }
        if value > self.levels.margin && self.up {
            // Still ascending or plateauing
            self.fall = true;
            StepEvent::Idle
        } else {
            self.peaks.push(now_ms);
            self.up = false;
            self.state = EdgeState::FallingEdge;
            StepEvent::PeakMarked
        }
    }

    fn step_falling(&mut self, value: u16) -> StepEvent {
        if value <= self.levels.margin {
            self.confirm += 1;
            if self.confirm >= self.config.confirm_count {
                self.fall = true;
            }
        }
        if value > self.levels.threshold && !self.fall {
            // The signal climbed back before the descent was confirmed: the
            // pending peak was a false positive.
            self.confirm = 0;
            let _ = self.peaks.pop();
            self.state = EdgeState::RisingEdge;
            debug!("rolled back unconfirmed peak");
            return StepEvent::PeakDiscarded;
        }
        if value > self.levels.threshold && self.fall {
            self.fall = false;
            let event = match self.peaks.pair() {
                Some((first, second)) => self.complete_beat(first, second),
                None => StepEvent::Idle,
            };
            self.state = EdgeState::RisingEdge;
            return event;
        }
        StepEvent::Idle
    }

    fn complete_beat(&mut self, first: u64, second: u64) -> StepEvent {
        self.peaks.clear();
        let ibi_ms = match interval_between(first, second) {
            Ok(ibi_ms) => ibi_ms,
            Err(err) => {
                warn!("discarding beat cycle: {err}");
                return StepEvent::DegenerateInterval;
            }
        };
        self.ibi_raw.push(ibi_ms);
        if self.ibi_recent.len() == self.config.recent_capacity {
            self.ibi_recent.pop_front();
        }
        self.ibi_recent.push_back(ibi_ms);
        let bpm = 60_000.0 / ibi_ms as f64;
        let accepted = match self.config.check_bpm(bpm) {
            Ok(bpm) => {
                self.bpm = Some(bpm);
                true
            }
            Err(err) => {
                debug!("{err}; live reading unchanged");
                false
            }
        };
        StepEvent::Beat(BeatEvent {
            ibi_ms,
            bpm,
            accepted,
        })
    }

    /// Process every currently queued sample, reporting to `sink` at the
    /// throttled trace cadence. Returns the number of samples consumed.
    pub fn drain(
        &mut self,
        consumer: &SampleConsumer,
        clock: &dyn Clock,
        sink: &mut dyn TraceSink,
        countdown_secs: Option<u64>,
    ) -> u32 {
        let mut processed = 0;
        while let Some(sample) = consumer.pop() {
            let now_ms = clock.now_ms();
            self.step(sample, now_ms);
            processed += 1;
            if now_ms.saturating_sub(self.last_trace_ms) > self.config.update_interval_ms() {
                self.last_trace_ms = now_ms;
                sink.on_trace(sample, self.levels.min, self.levels.max);
                if let Some(secs) = countdown_secs {
                    sink.on_countdown(secs);
                }
                if let Some(bpm) = self.bpm {
                    sink.on_bpm(bpm);
                }
            }
        }
        processed
    }

    /// Raw IBI history since the last reset.
    pub fn ibi_history(&self) -> Result<&[u32], ComputeError> {
        if self.ibi_raw.is_empty() {
            return Err(ComputeError::DataUnavailable);
        }
        Ok(&self.ibi_raw)
    }

    /// Bounded recent-IBI ring, oldest first.
    pub fn recent_ibis(&self) -> &VecDeque<u32> {
        &self.ibi_recent
    }

    /// Live BPM reading, if any beat inside the plausibility bounds has been
    /// confirmed.
    pub fn bpm(&self) -> Option<f64> {
        self.bpm
    }

    pub fn levels(&self) -> ThresholdLevels {
        self.levels
    }

    pub fn state(&self) -> EdgeState {
        self.state
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Clear all detector state: window, levels, counters, latches, pending
    /// peaks, histories, and the live reading.
    pub fn reset(&mut self) {
        self.state = EdgeState::RisingEdge;
        self.window.clear();
        self.levels = ThresholdLevels::default();
        self.confirm = 0;
        self.up = false;
        self.fall = false;
        self.peaks.clear();
        self.ibi_raw.clear();
        self.ibi_recent.clear();
        self.bpm = None;
        self.last_trace_ms = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampler::{SampleSource, SyntheticPulse};
    use pretty_assertions::assert_eq;

    const RATE_HZ: u32 = 250;
    const MS_PER_SAMPLE: u64 = 4;

    /// Run `seconds` of the given source through the detector at 250 Hz,
    /// collecting every step event.
    fn run_detector(
        detector: &mut PeakDetector,
        source: &mut dyn FnMut() -> u16,
        seconds: u64,
    ) -> Vec<StepEvent> {
        let total = seconds * RATE_HZ as u64;
        (0..total)
            .map(|i| detector.step(source(), i * MS_PER_SAMPLE))
            .collect()
    }

    fn beats(events: &[StepEvent]) -> Vec<BeatEvent> {
        events
            .iter()
            .filter_map(|e| match e {
                StepEvent::Beat(beat) => Some(*beat),
                _ => None,
            })
            .collect()
    }

    fn surviving_peaks(events: &[StepEvent]) -> i64 {
        events.iter().fold(0i64, |acc, e| match e {
            StepEvent::PeakMarked => acc + 1,
            StepEvent::PeakDiscarded => acc - 1,
            _ => acc,
        })
    }

    #[test]
    fn test_levels_follow_full_window() {
        let config = DetectorConfig {
            window_capacity: 4,
            ..Default::default()
        };
        let mut detector = PeakDetector::new(config);
        for (i, v) in [100u16, 200, 300, 400].into_iter().enumerate() {
            detector.step(v, i as u64 * MS_PER_SAMPLE);
        }
        let levels = detector.levels();
        assert_eq!(levels.min, 100);
        assert_eq!(levels.max, 400);
        assert_eq!(levels.baseline, 250);
        // range 300: threshold = 250 + 120, margin = 250 + 60
        assert_eq!(levels.threshold, 370);
        assert_eq!(levels.margin, 310);
    }

    #[test]
    fn test_degenerate_range_collapses_levels() {
        let config = DetectorConfig {
            window_capacity: 4,
            ..Default::default()
        };
        let mut detector = PeakDetector::new(config);
        for i in 0..4u64 {
            detector.step(512, i * MS_PER_SAMPLE);
        }
        let levels = detector.levels();
        assert_eq!(levels.threshold, levels.baseline);
        assert_eq!(levels.margin, levels.baseline);
    }

    #[test]
    fn test_periodic_input_yields_periodic_ibis() {
        // 800 ms pulse train for 20 s: every recorded IBI must sit within one
        // confirmation window (40 ms) of the true period.
        let mut detector = PeakDetector::default();
        let mut source = SyntheticPulse::new(RATE_HZ, 800);
        let events = run_detector(&mut detector, &mut || source.read_sample(), 20);

        let beats = beats(&events);
        assert!(!beats.is_empty(), "no beats detected");
        for beat in &beats {
            let err = (beat.ibi_ms as i64 - 800).abs();
            assert!(err <= 40, "IBI {} too far from 800 ms", beat.ibi_ms);
            assert!(beat.accepted, "75 BPM should be accepted");
        }
        let live = detector.bpm().unwrap();
        assert!((live - 75.0).abs() < 2.0, "live BPM {live}");

        // Net surviving peak registrations track the number of beats seen by
        // the machine (one window of lag shaves off roughly one period).
        let expected_beats: i64 = 20_000 / 800;
        let survivors = surviving_peaks(&events);
        assert!(
            (survivors - expected_beats).unsigned_abs() <= 3,
            "{survivors} surviving peaks for {expected_beats} beats"
        );
    }

    #[test]
    fn test_constant_input_never_confirms_a_beat() {
        let mut detector = PeakDetector::default();
        let events = run_detector(&mut detector, &mut || 3000, 10);
        assert!(beats(&events).is_empty());
        assert!(matches!(
            detector.ibi_history(),
            Err(ComputeError::DataUnavailable)
        ));
        assert_eq!(detector.bpm(), None);
    }

    #[test]
    fn test_out_of_range_bpm_kept_in_history_only() {
        // Drive one accepted beat, then force a cycle whose IBI maps to an
        // implausible BPM by completing the machine manually.
        let mut detector = PeakDetector::default();
        let mut source = SyntheticPulse::new(RATE_HZ, 800);
        run_detector(&mut detector, &mut || source.read_sample(), 20);
        let live = detector.bpm();
        let history_len = detector.ibi_history().map(|h| h.len()).unwrap_or(0);
        assert!(live.is_some());
        assert!(history_len >= 2);

        // 250 ms IBI = 240 BPM: recorded, not displayed.
        let event = detector.complete_beat(1_000, 1_250);
        match event {
            StepEvent::Beat(beat) => {
                assert!(!beat.accepted);
                assert_eq!(beat.ibi_ms, 250);
            }
            other => panic!("expected beat event, got {other:?}"),
        }
        assert_eq!(detector.bpm(), live);
        assert_eq!(detector.ibi_history().unwrap().len(), history_len + 1);
    }

    #[test]
    fn test_degenerate_interval_rejected() {
        let mut detector = PeakDetector::default();
        assert_eq!(
            detector.complete_beat(5_000, 5_000),
            StepEvent::DegenerateInterval
        );
        assert_eq!(
            detector.complete_beat(5_000, 4_000),
            StepEvent::DegenerateInterval
        );
        assert!(detector.ibi_history().is_err());
    }

    #[test]
    fn test_recent_ring_evicts_oldest() {
        let config = DetectorConfig {
            recent_capacity: 3,
            ..Default::default()
        };
        let mut detector = PeakDetector::new(config);
        for i in 0..5u64 {
            detector.complete_beat(i * 1_000, i * 1_000 + 800 + i);
        }
        let recent: Vec<u32> = detector.recent_ibis().iter().copied().collect();
        assert_eq!(recent, vec![802, 803, 804]);
        assert_eq!(detector.ibi_history().unwrap().len(), 5);
    }

    #[test]
    fn test_reset_matches_fresh_instance() {
        let mut detector = PeakDetector::default();
        let mut source = SyntheticPulse::new(RATE_HZ, 700).with_noise(100, 3);
        run_detector(&mut detector, &mut || source.read_sample(), 12);
        assert!(detector.ibi_history().is_ok());

        detector.reset();
        assert_eq!(detector, PeakDetector::default());
    }

    #[test]
    fn test_interval_between() {
        assert_eq!(interval_between(100, 900).unwrap(), 800);
        assert!(matches!(
            interval_between(900, 900),
            Err(ComputeError::DegenerateInterval { .. })
        ));
        assert!(matches!(
            interval_between(900, 100),
            Err(ComputeError::DegenerateInterval { .. })
        ));
    }

    #[test]
    fn test_peak_stack_rollback_is_bounded() {
        let mut stack = PeakStack::default();
        assert_eq!(stack.pop(), None);
        stack.push(10);
        stack.push(20);
        stack.push(30);
        // Bounded at two: keeps the most recent pair
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.pair(), Some((20, 30)));
        assert_eq!(stack.pop(), Some(30));
        assert_eq!(stack.len(), 1);
        stack.clear();
        assert_eq!(stack.len(), 0);
    }
}
