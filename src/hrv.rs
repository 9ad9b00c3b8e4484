//! HRV analysis
//!
//! Pure statistical pipeline from a list of inter-beat intervals to a metrics
//! snapshot: outlier filtering, mean heart rate, mean pulse-to-pulse interval,
//! RMSSD, SDNN, and an autonomic-balance heuristic. All functions are
//! deterministic; nothing here touches the detector or any I/O.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ComputeError;

/// Shortest interval ever considered physiological (ms)
const MIN_PLAUSIBLE_IBI_MS: f64 = 300.0;

fn mean_of(values: &[u32]) -> f64 {
    values.iter().map(|&v| v as f64).sum::<f64>() / values.len() as f64
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Remove implausible intervals.
///
/// Intervals at or above 1.3x the raw mean are dropped first; the lower bound
/// `max(300, 0.7 * mean)` is then applied against the mean of what remains,
/// so one long artifact cannot inflate the mean enough to reject every
/// genuine interval. Bounds are exclusive on both sides.
pub fn filter(raw: &[u32]) -> Vec<u32> {
    if raw.is_empty() {
        return Vec::new();
    }
    let upper = mean_of(raw) * 1.3;
    let kept: Vec<u32> = raw
        .iter()
        .copied()
        .filter(|&ibi| (ibi as f64) < upper)
        .collect();
    if kept.is_empty() {
        return kept;
    }
    let lower = (mean_of(&kept) * 0.7).max(MIN_PLAUSIBLE_IBI_MS);
    kept.into_iter()
        .filter(|&ibi| (ibi as f64) > lower)
        .collect()
}

/// Mean heart rate in BPM, rounded to two decimals.
///
/// Expects a non-empty, already-filtered list; [`analyze`] enforces that.
pub fn mean_hr(ibi: &[u32]) -> f64 {
    round2(60_000.0 / mean_of(ibi))
}

/// Mean pulse-to-pulse interval in ms, rounded to two decimals.
///
/// Expects a non-empty, already-filtered list; [`analyze`] enforces that.
pub fn mean_ppi(ibi: &[u32]) -> f64 {
    round2(mean_of(ibi))
}

/// Root mean square of successive differences, rounded to an integer.
///
/// Fewer than two intervals yield 0.
pub fn rmssd(ibi: &[u32]) -> u32 {
    if ibi.len() < 2 {
        return 0;
    }
    let sum_sq: f64 = ibi
        .windows(2)
        .map(|pair| {
            let diff = pair[1] as f64 - pair[0] as f64;
            diff * diff
        })
        .sum();
    (sum_sq / (ibi.len() - 1) as f64).sqrt().round() as u32
}

/// Sample standard deviation (Bessel-corrected), rounded to two decimals.
///
/// Fewer than two intervals yield 0.
pub fn sdnn(ibi: &[u32]) -> f64 {
    if ibi.len() < 2 {
        return 0.0;
    }
    let mean = mean_of(ibi);
    let variance: f64 = ibi
        .iter()
        .map(|&v| {
            let dev = v as f64 - mean;
            dev * dev
        })
        .sum::<f64>()
        / (ibi.len() - 1) as f64;
    round2(variance.sqrt())
}

/// Coarse sympathetic/parasympathetic split estimated from RMSSD.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AutonomicBalance {
    pub sympathetic: f64,
    pub parasympathetic: f64,
}

/// Estimate autonomic balance from an RMSSD value.
pub fn autonomic_balance(rmssd: u32) -> AutonomicBalance {
    let (sympathetic, parasympathetic) = if rmssd < 20 {
        (0.8, 0.2)
    } else if rmssd < 50 {
        (0.6, 0.4)
    } else {
        (0.3, 0.7)
    };
    AutonomicBalance {
        sympathetic,
        parasympathetic,
    }
}

/// Metrics derived from one filtered IBI list.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HrvMetrics {
    pub mean_hr: f64,
    pub mean_ppi: f64,
    pub rmssd: u32,
    pub sdnn: f64,
}

impl HrvMetrics {
    pub fn balance(&self) -> AutonomicBalance {
        autonomic_balance(self.rmssd)
    }
}

/// Run the full pipeline over a raw IBI list.
pub fn analyze(ibi_raw: &[u32]) -> Result<HrvMetrics, ComputeError> {
    if ibi_raw.is_empty() {
        return Err(ComputeError::InsufficientData(
            "no intervals recorded".to_string(),
        ));
    }
    let filtered = filter(ibi_raw);
    if filtered.is_empty() {
        return Err(ComputeError::InsufficientData(
            "every interval rejected by the outlier filter".to_string(),
        ));
    }
    Ok(HrvMetrics {
        mean_hr: mean_hr(&filtered),
        mean_ppi: mean_ppi(&filtered),
        rmssd: rmssd(&filtered),
        sdnn: sdnn(&filtered),
    })
}

/// Immutable per-session result snapshot.
///
/// Serializes with the record keys the persistence format and downstream
/// consumers expect: `id`, `time`, `"Mean HR"`, `"PPI (ms)"`, `"RMSSD"`,
/// `"SDNN"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrvResult {
    pub id: String,
    /// Wall-clock timestamp, seconds since the Unix epoch
    pub time: i64,
    #[serde(rename = "Mean HR")]
    pub mean_hr: f64,
    #[serde(rename = "PPI (ms)")]
    pub mean_ppi: f64,
    #[serde(rename = "RMSSD")]
    pub rmssd: u32,
    #[serde(rename = "SDNN")]
    pub sdnn: f64,
}

impl HrvResult {
    pub fn from_metrics(id: String, time: i64, metrics: &HrvMetrics) -> Self {
        Self {
            id,
            time,
            mean_hr: metrics.mean_hr,
            mean_ppi: metrics.mean_ppi,
            rmssd: metrics.rmssd,
            sdnn: metrics.sdnn,
        }
    }

    /// Analyze `ibi_raw` and stamp the snapshot with a fresh id and the
    /// current wall-clock time.
    pub fn compute(ibi_raw: &[u32]) -> Result<Self, ComputeError> {
        let metrics = analyze(ibi_raw)?;
        Ok(Self::from_metrics(
            Uuid::new_v4().simple().to_string(),
            Utc::now().timestamp(),
            &metrics,
        ))
    }

    pub fn metrics(&self) -> HrvMetrics {
        HrvMetrics {
            mean_hr: self.mean_hr,
            mean_ppi: self.mean_ppi,
            rmssd: self.rmssd,
            sdnn: self.sdnn,
        }
    }
}
