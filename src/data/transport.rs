//! Transport extraction for a single segment.
//!
//! [`TransportExtractor::extract`] takes one [`Segment`], waits until its raw
//! samples are committed, converts them to physical voltage and current and
//! then branches on the case code:
//!
//! | case  | result                                                      |
//! |-------|-------------------------------------------------------------|
//! | `0`   | offset calibration ([`CalibrationTracker::record_offset`])  |
//! | `-1`  | [`ConstantVoltageEstimate`]                                 |
//! | `> 0` | [`TransportEstimate`] plus a [`BinnedCurve`]                |
//! | `< -1`| [`PipelineError::UndefinedCase`]                            |
//!
//! Conversion uses `V = (raw_V - offset_V) / amp_V` and
//! `I = (raw_I - offset_I) / amp_I / R_ref`. Missing offsets fall back to 0,
//! missing gains and reference resistance to 1; each fallback is logged as a
//! warning and never fails the segment.
use crate::config::{BinningConfig, ExtractorConfig, PipelineConfig};
use crate::core::{
    BinnedCurve, BinnedCurveMeta, CalibrationOffset, ConstantVoltageEstimate, RawSample, Segment,
    SweepCase, SweepDirection, TransportEstimate,
};
use crate::data::calibration::CalibrationTracker;
use crate::data::histogram::{bin, linspace};
use crate::data::stats::{linear_fit, mean, peak_to_peak, rms, std_dev};
use crate::data::status::StatusLookup;
use crate::error::{PipelineError, PipelineResult};
use crate::store::{read_range, SampleStore, StreamPaths};
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Result of extracting one segment.
#[derive(Debug, Clone, PartialEq)]
pub enum Extraction {
    /// Bias-off segment; the offsets still have to be committed.
    Calibration(CalibrationOffset),
    /// Constant-voltage hold.
    ConstantVoltage(ConstantVoltageEstimate),
    /// Sweep half-cycle.
    Sweep {
        /// Direction decoded from the case code.
        direction: SweepDirection,
        /// Resistance estimators.
        estimate: TransportEstimate,
        /// Current binned onto the voltage grid.
        curve: BinnedCurve,
        /// Per-sample `V / I`, NaN where the current is at or below threshold.
        resistance: Vec<f64>,
    },
}

/// Scale factors resolved for one segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scales {
    /// Raw voltage-channel offset.
    pub offset_v: f64,
    /// Raw current-channel offset.
    pub offset_i: f64,
    /// Voltage amplifier gain.
    pub amp_v: f64,
    /// Current amplifier gain.
    pub amp_i: f64,
    /// Reference resistance (Ω).
    pub r_ref: f64,
}

impl Default for Scales {
    fn default() -> Self {
        Self {
            offset_v: 0.0,
            offset_i: 0.0,
            amp_v: 1.0,
            amp_i: 1.0,
            r_ref: 1.0,
        }
    }
}

/// Turns one segment of raw samples into calibration offsets or transport
/// estimates, using the calibration and status streams of its store.
pub struct TransportExtractor {
    store: Arc<dyn SampleStore>,
    paths: StreamPaths,
    calibration: CalibrationTracker,
    status: StatusLookup,
    config: ExtractorConfig,
    binning: BinningConfig,
    edges: Vec<f64>,
}

impl TransportExtractor {
    /// Extractor for the streams under `paths`. Bin edges are built once here.
    pub fn new(store: Arc<dyn SampleStore>, paths: StreamPaths, config: &PipelineConfig) -> Self {
        let binning = config.binning.clone();
        let edges = linspace(binning.start, binning.stop, binning.points);
        Self {
            calibration: CalibrationTracker::new(store.clone(), paths.clone()),
            status: StatusLookup::new(store.clone()),
            store,
            paths,
            config: config.extractor.clone(),
            binning,
            edges,
        }
    }

    /// Offset tracker of this stream.
    pub fn calibration(&self) -> &CalibrationTracker {
        &self.calibration
    }

    /// Current magnitude (A) at or below which resistance is undefined.
    pub fn current_threshold(&self) -> f64 {
        self.config.current_threshold
    }

    /// Extract `segment`.
    ///
    /// Errors of class [`crate::error::ErrorClass::Invalid`] and
    /// [`crate::error::ErrorClass::Unrecoverable`] concern this segment only;
    /// store errors are returned as-is.
    pub async fn extract(&self, segment: &Segment) -> PipelineResult<Extraction> {
        let Some(case) = segment.sweep_case() else {
            return Err(PipelineError::UndefinedCase {
                index: segment.index,
                case: segment.case,
            });
        };

        let samples = self.retrieve(segment).await?;
        let v_channel = self.config.voltage_channel.as_str();
        let i_channel = self.config.current_channel.as_str();

        let sweep_code = match case {
            SweepCase::BiasOff => {
                return Ok(Extraction::Calibration(CalibrationTracker::record_offset(
                    segment,
                    &samples,
                    &[v_channel, i_channel],
                )));
            }
            SweepCase::ConstantVoltage => None,
            SweepCase::Sweep(code) => Some(code),
        };

        let time = samples.first().map_or(f64::NAN, |s| s.time);
        let scales = self.resolve_scales(segment, time).await?;
        let (v, i) = to_physical(&samples, v_channel, i_channel, &scales);

        let Some(code) = sweep_code else {
            return Ok(Extraction::ConstantVoltage(constant_voltage_estimate(
                time, &v, &i,
            )));
        };

        let direction = SweepDirection::from_case(code, self.config.odd_case_is_up);
        let estimate = sweep_estimate(time, &v, &i);
        let resistance = resistance_trace(&v, &i, self.config.current_threshold);
        let curve = BinnedCurve {
            time,
            direction,
            grid: self.edges.clone(),
            values: bin(&v, &i, &self.edges),
            meta: BinnedCurveMeta {
                start: self.binning.start,
                stop: self.binning.stop,
                point_count: self.binning.points,
            },
        };
        debug!(
            segment = segment.index,
            direction = direction.as_str(),
            r_lin = estimate.r_lin,
            undefined = resistance.iter().filter(|r| r.is_nan()).count(),
            "Sweep extracted"
        );
        Ok(Extraction::Sweep {
            direction,
            estimate,
            curve,
            resistance,
        })
    }

    /// Raw samples of `segment`, waiting with a bounded backoff for samples
    /// that are not committed yet.
    async fn retrieve(&self, segment: &Segment) -> PipelineResult<Vec<RawSample>> {
        let deadline = Instant::now() + self.config.retrieve_timeout;
        loop {
            match self.try_retrieve(segment).await {
                Err(PipelineError::DataNotYetAvailable {
                    path,
                    required,
                    available,
                }) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(PipelineError::RetrieveTimeout {
                            path,
                            waited: self.config.retrieve_timeout,
                        });
                    }
                    debug!(
                        segment = segment.index,
                        required, available, "Samples not committed yet, retrying"
                    );
                    sleep(self.config.retry_backoff.min(deadline - now)).await;
                }
                other => return other,
            }
        }
    }

    async fn try_retrieve(&self, segment: &Segment) -> PipelineResult<Vec<RawSample>> {
        if segment.is_empty() {
            return Ok(Vec::new());
        }
        let (Ok(start), Ok(stop)) = (usize::try_from(segment.start), usize::try_from(segment.stop))
        else {
            return Err(PipelineError::ShapeMismatch {
                index: segment.index,
                expected: segment.len(),
                actual: 0,
            });
        };

        let raw_path = self.paths.raw();
        let available = self.store.len(&raw_path).await?;
        if available <= stop {
            return Err(PipelineError::DataNotYetAvailable {
                path: raw_path,
                required: stop + 1,
                available,
            });
        }

        let samples: Vec<RawSample> = read_range(self.store.as_ref(), &raw_path, start, stop).await?;
        if samples.len() != segment.len() {
            return Err(PipelineError::ShapeMismatch {
                index: segment.index,
                expected: segment.len(),
                actual: samples.len(),
            });
        }
        Ok(samples)
    }

    async fn resolve_scales(&self, segment: &Segment, time: f64) -> PipelineResult<Scales> {
        let v_channel = self.config.voltage_channel.as_str();
        let i_channel = self.config.current_channel.as_str();
        let mut scales = Scales::default();

        match self.calibration.lookup_offset(time).await? {
            Some(offsets) => {
                scales.offset_v = offset_or_zero(&offsets, v_channel, segment);
                scales.offset_i = offset_or_zero(&offsets, i_channel, segment);
            }
            None => warn!(
                stream = self.paths.key(),
                segment = segment.index,
                "No calibration before segment, using zero offsets"
            ),
        }

        scales.amp_v = self.gain_or_one(v_channel, time, segment).await?;
        scales.amp_i = self.gain_or_one(i_channel, time, segment).await?;

        scales.r_ref = match self.status.reference_resistance(time).await? {
            Some(r) => r,
            None => {
                warn!(
                    stream = self.paths.key(),
                    segment = segment.index,
                    "No reference resistance, using 1 Ohm"
                );
                1.0
            }
        };
        Ok(scales)
    }

    async fn gain_or_one(&self, channel: &str, time: f64, segment: &Segment) -> PipelineResult<f64> {
        Ok(match self.status.amplification(channel, time).await? {
            Some(gain) => gain,
            None => {
                warn!(
                    stream = self.paths.key(),
                    segment = segment.index,
                    channel,
                    "No amplifier status, using gain 1"
                );
                1.0
            }
        })
    }
}

fn offset_or_zero(
    offsets: &std::collections::HashMap<String, f64>,
    channel: &str,
    segment: &Segment,
) -> f64 {
    match offsets.get(channel) {
        Some(offset) if offset.is_finite() => *offset,
        _ => {
            warn!(segment = segment.index, channel, "Calibration lacks channel, using zero offset");
            0.0
        }
    }
}

/// Convert raw samples to physical voltage and current.
pub fn to_physical(
    samples: &[RawSample],
    v_channel: &str,
    i_channel: &str,
    scales: &Scales,
) -> (Vec<f64>, Vec<f64>) {
    samples
        .iter()
        .map(|s| {
            let v = (s.channel(v_channel) - scales.offset_v) / scales.amp_v;
            let i = (s.channel(i_channel) - scales.offset_i) / scales.amp_i / scales.r_ref;
            (v, i)
        })
        .unzip()
}

/// `a / b`, NaN when the quotient is not finite.
fn ratio(a: f64, b: f64) -> f64 {
    let q = a / b;
    if q.is_finite() {
        q
    } else {
        f64::NAN
    }
}

/// Peak-to-peak, RMS and linear-fit resistance of one sweep half-cycle.
pub fn sweep_estimate(time: f64, v: &[f64], i: &[f64]) -> TransportEstimate {
    let r_ptp = ratio(peak_to_peak(v).abs(), peak_to_peak(i).abs());
    let r_rms = ratio(rms(v), rms(i));
    // Fit I = V / R_lin + I_0
    let (slope, i_0) = linear_fit(v, i);
    TransportEstimate {
        time,
        r_ptp,
        r_rms,
        r_lin: ratio(1.0, slope),
        i_0,
    }
}

/// Mean resistance of a constant-voltage hold with propagated uncertainty.
pub fn constant_voltage_estimate(time: f64, v: &[f64], i: &[f64]) -> ConstantVoltageEstimate {
    let (v_mean, v_std) = (mean(v), std_dev(v));
    let (i_mean, i_std) = (mean(i), std_dev(i));
    let u_r = ratio(v_std, i_mean).abs() + ratio(i_std * v_mean, i_mean * i_mean).abs();
    ConstantVoltageEstimate {
        time,
        r_mean: ratio(v_mean, i_mean).abs(),
        u_r,
        v_mean,
        v_std,
        i_mean,
        i_std,
    }
}

/// Instantaneous `V / I`; NaN wherever `|I| <= threshold`.
pub fn resistance_trace(v: &[f64], i: &[f64], threshold: f64) -> Vec<f64> {
    v.iter()
        .zip(i)
        .map(|(&v, &i)| if i.abs() <= threshold { f64::NAN } else { v / i })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{append_typed, MemoryStore};
    use std::f64::consts::PI;
    use tracing_test::traced_test;

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol * b.abs().max(1.0)
    }

    #[test]
    fn test_linear_fit_recovers_resistance_and_offset() {
        let v: Vec<f64> = (0..101).map(|k| -1.0 + k as f64 * 0.02).collect();
        let i: Vec<f64> = v.iter().map(|v| v / 1000.0 + 0.002).collect();
        let est = sweep_estimate(0.0, &v, &i);

        assert!(close(est.r_lin, 1000.0, 1e-9), "r_lin = {}", est.r_lin);
        assert!(close(est.i_0, 0.002, 1e-9), "i_0 = {}", est.i_0);
    }

    #[test]
    fn test_estimators_agree_on_clean_sinusoid() {
        let r = 470.0;
        let v: Vec<f64> = (0..400)
            .map(|k| 0.3 * (2.0 * PI * k as f64 / 400.0).sin())
            .collect();
        let i: Vec<f64> = v.iter().map(|v| v / r).collect();
        let est = sweep_estimate(0.0, &v, &i);

        assert!(close(est.r_ptp, r, 1e-9));
        assert!(close(est.r_rms, r, 1e-9));
        assert!(close(est.r_lin, r, 1e-9));
        assert!(est.i_0.abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_sweep_is_nan() {
        let est = sweep_estimate(0.0, &[], &[]);
        assert!(est.r_ptp.is_nan() && est.r_rms.is_nan() && est.r_lin.is_nan() && est.i_0.is_nan());

        let flat = sweep_estimate(0.0, &[0.1, 0.2, 0.3], &[0.0, 0.0, 0.0]);
        assert!(flat.r_ptp.is_nan());
        assert!(flat.r_rms.is_nan());
        assert!(flat.r_lin.is_nan());
    }

    #[test]
    fn test_constant_voltage_estimate() {
        let est = constant_voltage_estimate(1.0, &[2.0, 2.0], &[0.5, 0.5]);
        assert_eq!(est.r_mean, 4.0);
        assert_eq!(est.u_r, 0.0);

        let noisy = constant_voltage_estimate(1.0, &[1.0, 3.0], &[-0.5, -0.5]);
        assert_eq!(noisy.r_mean, 4.0);
        // σ_V / |mean I| = 1 / 0.5
        assert_eq!(noisy.u_r, 2.0);
    }

    #[test]
    fn test_resistance_trace_threshold() {
        let trace = resistance_trace(&[1.0, 1.0], &[0.005, 0.02], 0.01);
        assert!(trace[0].is_nan());
        assert_eq!(trace[1], 1.0 / 0.02);

        // Exactly at threshold is undefined
        let at = resistance_trace(&[1.0], &[0.01], 0.01);
        assert!(at[0].is_nan());

        // Zero current with zero threshold never divides
        assert!(resistance_trace(&[1.0], &[0.0], 0.0)[0].is_nan());
    }

    async fn seeded_store(samples: &[(f64, i32, f64, f64)]) -> (MemoryStore, StreamPaths) {
        let store = MemoryStore::new();
        let paths = StreamPaths::new("run");
        for &(t, trigger, v, i) in samples {
            let sample = RawSample::new(t, trigger).with_channel("v", v).with_channel("i", i);
            append_typed(&store, &paths.raw(), sample).await.unwrap();
        }
        (store, paths)
    }

    fn extractor(store: &MemoryStore, paths: &StreamPaths) -> TransportExtractor {
        TransportExtractor::new(Arc::new(store.clone()), paths.clone(), &PipelineConfig::default())
    }

    #[tokio::test]
    #[traced_test]
    async fn test_missing_calibration_falls_back_with_warning() {
        let (store, paths) = seeded_store(&[(0.0, 1, -0.5, -0.005), (0.1, 1, 0.5, 0.005)]).await;
        let segment = Segment { index: 0, start: 0, stop: 1, case: 1 };

        let result = extractor(&store, &paths).extract(&segment).await.unwrap();
        match result {
            Extraction::Sweep { direction, estimate, .. } => {
                assert_eq!(direction, SweepDirection::Up);
                assert!(close(estimate.r_ptp, 100.0, 1e-9));
            }
            other => panic!("expected sweep, got {other:?}"),
        }
        assert!(logs_contain("No calibration before segment"));
        assert!(logs_contain("No reference resistance"));
    }

    #[tokio::test]
    async fn test_bias_off_yields_offsets_without_commit() {
        let (store, paths) = seeded_store(&[(3.0, 0, 0.5, 0.25), (3.1, 0, 0.5, 0.25)]).await;
        let segment = Segment { index: 0, start: 0, stop: 1, case: 0 };

        let ex = extractor(&store, &paths);
        match ex.extract(&segment).await.unwrap() {
            Extraction::Calibration(offset) => {
                assert_eq!(offset.time, 3.0);
                assert_eq!(offset.offsets["v"], 0.5);
                assert_eq!(offset.offsets["i"], 0.25);
            }
            other => panic!("expected calibration, got {other:?}"),
        }
        assert_eq!(ex.calibration().lookup_offset(10.0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_calibration_is_subtracted() {
        let (store, paths) = seeded_store(&[(0.0, -1, 2.5, 0.75), (0.1, -1, 2.5, 0.75)]).await;
        let ex = extractor(&store, &paths);
        let mut offsets = std::collections::HashMap::new();
        offsets.insert("v".to_string(), 0.5);
        offsets.insert("i".to_string(), 0.25);
        ex.calibration()
            .commit(CalibrationOffset { time: 0.0, offsets, spread: Default::default() })
            .await
            .unwrap();

        let segment = Segment { index: 3, start: 0, stop: 1, case: -1 };
        match ex.extract(&segment).await.unwrap() {
            Extraction::ConstantVoltage(est) => {
                assert_eq!(est.v_mean, 2.0);
                assert_eq!(est.i_mean, 0.5);
                assert_eq!(est.r_mean, 4.0);
            }
            other => panic!("expected constant voltage, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_undefined_case_is_rejected_before_reading() {
        let store = MemoryStore::new();
        let paths = StreamPaths::new("run");
        let segment = Segment { index: 7, start: 0, stop: 99, case: -3 };

        let err = extractor(&store, &paths).extract(&segment).await.unwrap_err();
        assert!(matches!(err, PipelineError::UndefinedCase { index: 7, case: -3 }));
    }

    #[test]
    fn test_to_physical_applies_scales() {
        let samples = vec![RawSample::new(0.0, 1).with_channel("v", 1.1).with_channel("i", 2.5)];
        let scales = Scales {
            offset_v: 0.1,
            offset_i: 0.5,
            amp_v: 10.0,
            amp_i: 100.0,
            r_ref: 2.0,
        };
        let (v, i) = to_physical(&samples, "v", "i", &scales);
        assert!(close(v[0], 0.1, 1e-12));
        assert!(close(i[0], 0.01, 1e-12));
    }
}
