//! Sample acquisition
//!
//! A [`SampleSource`] yields one raw reading per call — the seam where an ADC
//! driver plugs in. [`Sampler::start`] arms a fixed-rate capture thread that
//! reads one sample per tick and pushes it into the capture queue; the loop
//! takes no lock and performs no allocation, matching the contract of a
//! periodic interrupt handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::debug;

use crate::queue::SampleProducer;

/// Highest raw reading a source may produce (14-bit ADC domain)
pub const SAMPLE_MAX: u16 = 16383;

/// Something that can be read for one raw sample at a time.
pub trait SampleSource: Send {
    /// Read the current sample, in `0..=SAMPLE_MAX`.
    fn read_sample(&mut self) -> u16;
}

/// Deterministic synthetic PPG-like waveform.
///
/// Each period carries one systolic bump (a half-sine over the first 15% of
/// the period) on a flat baseline, with optional pseudo-random jitter from a
/// seeded LCG. Useful for demos and for exercising the detector without
/// hardware.
#[derive(Debug, Clone)]
pub struct SyntheticPulse {
    sample_rate_hz: u32,
    period_ms: u32,
    baseline: u16,
    amplitude: u16,
    noise: u16,
    rng_state: u32,
    tick: u64,
}

impl SyntheticPulse {
    /// A clean pulse train: `period_ms` per beat at `sample_rate_hz`.
    pub fn new(sample_rate_hz: u32, period_ms: u32) -> Self {
        Self {
            sample_rate_hz,
            period_ms,
            baseline: 2000,
            amplitude: 6000,
            noise: 0,
            rng_state: 0x2545_f491,
            tick: 0,
        }
    }

    /// Add uniform jitter in `[-noise, +noise]` counts, from `seed`.
    pub fn with_noise(mut self, noise: u16, seed: u32) -> Self {
        self.noise = noise;
        self.rng_state = seed | 1;
        self
    }

    fn next_noise(&mut self) -> i32 {
        if self.noise == 0 {
            return 0;
        }
        self.rng_state = self
            .rng_state
            .wrapping_mul(1_664_525)
            .wrapping_add(1_013_904_223);
        let span = 2 * self.noise as u32 + 1;
        ((self.rng_state >> 16) % span) as i32 - self.noise as i32
    }
}

impl SampleSource for SyntheticPulse {
    fn read_sample(&mut self) -> u16 {
        let elapsed_ms = self.tick * 1000 / self.sample_rate_hz as u64;
        self.tick += 1;
        let phase_ms = (elapsed_ms % self.period_ms as u64) as f64;
        let bump_ms = self.period_ms as f64 * 0.15;
        let pulse = if phase_ms < bump_ms {
            (std::f64::consts::PI * phase_ms / bump_ms).sin() * self.amplitude as f64
        } else {
            0.0
        };
        let value = self.baseline as i32 + pulse as i32 + self.next_noise();
        value.clamp(0, SAMPLE_MAX as i32) as u16
    }
}

/// Fixed-rate capture driver.
pub struct Sampler;

impl Sampler {
    /// Arm a periodic capture thread at `rate_hz`.
    ///
    /// The thread schedules against absolute deadlines so timing error does
    /// not accumulate. Panics if `rate_hz` is zero.
    pub fn start(
        mut source: impl SampleSource + 'static,
        producer: SampleProducer,
        rate_hz: u32,
    ) -> SamplerHandle {
        assert!(rate_hz > 0, "sampling rate must be non-zero");
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::spawn(move || {
            let period = Duration::from_secs_f64(1.0 / rate_hz as f64);
            let mut deadline = Instant::now() + period;
            while !flag.load(Ordering::Relaxed) {
                producer.push(source.read_sample());
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                }
                deadline += period;
            }
            debug!("capture thread stopped");
        });
        SamplerHandle {
            stop,
            thread: Some(thread),
        }
    }
}

/// Handle to a running capture thread; stopping detaches the timer.
pub struct SamplerHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl SamplerHandle {
    /// Stop the capture thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
