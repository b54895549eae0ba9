//! Core data types for the transport pipeline.
//!
//! Records are plain structs with named fields. The store boundary wraps them
//! in [`crate::store::Record`], everything else passes them around typed.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One acquisition tick of the raw stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawSample {
    /// Acquisition time in seconds, non-decreasing within a stream.
    pub time: f64,
    /// Raw channel readings keyed by channel name.
    pub channels: HashMap<String, f64>,
    /// Trigger code reported by the sweep source.
    pub trigger: i32,
}

impl RawSample {
    /// Sample with no channel readings yet.
    pub fn new(time: f64, trigger: i32) -> Self {
        Self {
            time,
            channels: HashMap::new(),
            trigger,
        }
    }

    /// Builder-style helper to attach a channel reading.
    pub fn with_channel(mut self, name: impl Into<String>, value: f64) -> Self {
        self.channels.insert(name.into(), value);
        self
    }

    /// Reading of `name`, NaN when the channel is absent.
    pub fn channel(&self, name: &str) -> f64 {
        self.channels.get(name).copied().unwrap_or(f64::NAN)
    }
}

/// What the sweep source was doing during a segment.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepCase {
    /// `case == 0`: drive off, used for offset calibration.
    BiasOff,
    /// `case == -1`: constant-voltage hold.
    ConstantVoltage,
    /// `case > 0`: one half-cycle of a sweep.
    Sweep(i32),
}

impl SweepCase {
    /// Decode a raw case code. Codes below -1 are undefined.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(SweepCase::BiasOff),
            -1 => Some(SweepCase::ConstantVoltage),
            n if n > 0 => Some(SweepCase::Sweep(n)),
            _ => None,
        }
    }
}

/// Direction of a sweep half-cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SweepDirection {
    /// Voltage increasing.
    Up,
    /// Voltage decreasing.
    Down,
}

impl SweepDirection {
    /// Direction of sweep case `case` (> 0). The parity convention depends on
    /// the trigger polarity of the source, hence `odd_is_up`.
    pub fn from_case(case: i32, odd_is_up: bool) -> Self {
        let odd = case.rem_euclid(2) == 1;
        if odd == odd_is_up {
            SweepDirection::Up
        } else {
            SweepDirection::Down
        }
    }

    /// Lowercase name, also used in stream paths.
    pub fn as_str(&self) -> &'static str {
        match self {
            SweepDirection::Up => "up",
            SweepDirection::Down => "down",
        }
    }
}

/// Closed, inclusive index range `[start, stop]` of the raw stream sharing one case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Position in the segment stream, consecutive from 0.
    pub index: i64,
    /// First raw index.
    pub start: i64,
    /// Last raw index.
    pub stop: i64,
    /// Case code shared by every sample of the range.
    pub case: i32,
}

impl Segment {
    /// Number of raw samples covered.
    pub fn len(&self) -> usize {
        usize::try_from(self.stop - self.start + 1).unwrap_or(0)
    }

    /// True when `stop < start`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decoded case code, `None` when undefined.
    pub fn sweep_case(&self) -> Option<SweepCase> {
        SweepCase::from_code(self.case)
    }
}

/// Per-channel baseline measured over a bias-off segment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOffset {
    /// Time of the first sample of the source segment.
    pub time: f64,
    /// Mean raw reading of each channel.
    pub offsets: HashMap<String, f64>,
    /// Standard deviation of each channel over the same samples.
    #[serde(default)]
    pub spread: HashMap<String, f64>,
}

/// Resistance estimators for one sweep half-cycle. NaN marks undefined values.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportEstimate {
    /// Time of the first sample of the segment.
    pub time: f64,
    /// `ptp(V) / ptp(I)`.
    pub r_ptp: f64,
    /// `rms(V) / rms(I)`.
    pub r_rms: f64,
    /// Inverse slope of the least-squares line `I(V)`.
    pub r_lin: f64,
    /// Intercept of that line, the current at zero voltage.
    pub i_0: f64,
}

/// Estimate for a constant-voltage hold.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstantVoltageEstimate {
    /// Time of the first sample of the segment.
    pub time: f64,
    /// `|mean(V) / mean(I)|`.
    pub r_mean: f64,
    /// Propagated uncertainty of `r_mean`.
    pub u_r: f64,
    /// Mean voltage.
    pub v_mean: f64,
    /// Voltage standard deviation.
    pub v_std: f64,
    /// Mean current.
    pub i_mean: f64,
    /// Current standard deviation.
    pub i_std: f64,
}

/// Grid parameters a [`BinnedCurve`] was built with.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinnedCurveMeta {
    /// First edge.
    pub start: f64,
    /// Last edge.
    pub stop: f64,
    /// Number of edges.
    pub point_count: usize,
}

/// Current resampled onto a fixed voltage grid.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BinnedCurve {
    /// Time of the first sample of the segment.
    pub time: f64,
    /// Sweep direction of the segment.
    pub direction: SweepDirection,
    /// Left bin edges (V).
    pub grid: Vec<f64>,
    /// Mean current per bin (A), NaN for empty bins.
    pub values: Vec<f64>,
    /// Grid parameters.
    pub meta: BinnedCurveMeta,
}

/// Point-by-point `V / I` over one sweep half-cycle.
///
/// Entries whose current magnitude is at or below `threshold` are NaN.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResistanceTrace {
    /// Segment the trace was computed from.
    pub segment: i64,
    /// Time of the first sample of the segment.
    pub time: f64,
    /// Sweep direction of the segment.
    pub direction: SweepDirection,
    /// Current threshold (A) in force when the trace was computed.
    pub threshold: f64,
    /// Resistance (Ω) per raw sample, in sample order.
    pub values: Vec<f64>,
}

/// Scalar reading on a `status/` stream (amplifier gain, reference resistor).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusValue {
    /// Time from which the value applies.
    pub time: f64,
    /// The reading.
    pub value: f64,
}

/// Outcome recorded in the derived stream, one per processed segment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DerivedRecord {
    /// Bias-off segment; offsets were appended to the calibration stream.
    Calibration {
        /// Segment index.
        segment: i64,
        /// Offsets measured.
        offset: CalibrationOffset,
    },
    /// Constant-voltage hold.
    ConstantVoltage {
        /// Segment index.
        segment: i64,
        /// Hold estimate.
        estimate: ConstantVoltageEstimate,
    },
    /// Sweep half-cycle.
    Sweep {
        /// Segment index.
        segment: i64,
        /// Sweep direction.
        direction: SweepDirection,
        /// Resistance estimators.
        estimate: TransportEstimate,
    },
    /// Segment that could not be processed and is never retried.
    Skipped {
        /// Segment index.
        segment: i64,
        /// Error that caused the skip.
        reason: String,
    },
}

impl DerivedRecord {
    /// Index of the segment this record commits.
    pub fn segment(&self) -> i64 {
        match self {
            DerivedRecord::Calibration { segment, .. }
            | DerivedRecord::ConstantVoltage { segment, .. }
            | DerivedRecord::Sweep { segment, .. }
            | DerivedRecord::Skipped { segment, .. } => *segment,
        }
    }

    /// Serde tag of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            DerivedRecord::Calibration { .. } => "calibration",
            DerivedRecord::ConstantVoltage { .. } => "constant_voltage",
            DerivedRecord::Sweep { .. } => "sweep",
            DerivedRecord::Skipped { .. } => "skipped",
        }
    }
}

/// Resume point of one (raw stream, derived stream) pair.
///
/// Never persisted on its own: `last_processed` is the length of the derived
/// stream at the time it was read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Watermark {
    /// Stream key.
    pub stream_id: String,
    /// Number of segments committed to the derived stream.
    pub last_processed: i64,
}
