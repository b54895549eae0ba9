//! Simulated sweep source.
//!
//! Generates the raw stream a cryostat rig would produce when sweeping a
//! known resistor: each cycle runs bias-off, an up sweep, a down sweep and a
//! constant-voltage hold. The raw readings carry channel offsets, amplifier
//! gains and a reference resistor, so the extracted resistance only comes out
//! right when calibration and status lookups are applied.
//!
//! ```text
//! case:   0 | 1 (up)  | 2 (down) | -1 (hold) | 0 | 1 ...
//! V:      0 | -A → +A | +A → -A  | hold_V    | 0 | ...
//! ```
//!
//! A single trailing bias-off sample closes the last segment of the run.
use crate::core::{RawSample, StatusValue};
use crate::error::PipelineResult;
use crate::store::{
    amplifier_status_path, append_typed, reference_status_path, SampleStore, StreamPaths,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Case codes of one simulated cycle, in order.
pub const CYCLE_CASES: [i32; 4] = [0, 1, 2, -1];

/// Parameters of the simulated rig.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Device under test (Ω)
    pub resistance: f64,
    /// Sweep amplitude (V)
    pub amplitude: f64,
    /// Voltage of the constant-voltage hold (V)
    pub hold_voltage: f64,
    /// Seconds between samples
    pub sample_interval: f64,
    /// Samples per phase
    pub samples_per_phase: usize,
    /// Raw voltage-channel offset
    pub offset_v: f64,
    /// Raw current-channel offset
    pub offset_i: f64,
    /// Voltage amplifier gain
    pub amp_v: f64,
    /// Current amplifier gain
    pub amp_i: f64,
    /// Reference resistor (Ω)
    pub r_ref: f64,
    /// Peak noise added to every raw reading
    pub noise: f64,
    /// RNG seed for the noise
    pub seed: u64,
    /// Name of the raw voltage channel
    pub voltage_channel: String,
    /// Name of the raw current channel
    pub current_channel: String,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            resistance: 1000.0,
            amplitude: 0.8,
            hold_voltage: 0.5,
            sample_interval: 0.01,
            samples_per_phase: 50,
            offset_v: 0.002,
            offset_i: -0.001,
            amp_v: 10.0,
            amp_i: 100.0,
            r_ref: 10.0,
            noise: 0.0,
            seed: 7,
            voltage_channel: "v".to_string(),
            current_channel: "i".to_string(),
        }
    }
}

/// Deterministic generator of raw samples and status records.
pub struct SweepSimulator {
    config: SimulatorConfig,
    rng: StdRng,
    next_sample: usize,
}

impl SweepSimulator {
    /// Simulator starting at time zero.
    pub fn new(config: SimulatorConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            config,
            next_sample: 0,
        }
    }

    /// Parameters in use.
    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Number of segments the recorder closes for `cycles` cycles.
    pub fn expected_segments(cycles: usize) -> usize {
        cycles * CYCLE_CASES.len()
    }

    /// Amplifier gains and reference resistance, stamped at time zero.
    pub fn status_records(&self) -> Vec<(String, StatusValue)> {
        let c = &self.config;
        let at_start = |value| StatusValue { time: 0.0, value };
        vec![
            (amplifier_status_path(&c.voltage_channel), at_start(c.amp_v)),
            (amplifier_status_path(&c.current_channel), at_start(c.amp_i)),
            (reference_status_path(), at_start(c.r_ref)),
        ]
    }

    /// Raw samples of one full cycle.
    pub fn cycle(&mut self) -> Vec<RawSample> {
        let n = self.config.samples_per_phase;
        let a = self.config.amplitude;
        let mut samples = Vec::with_capacity(n * CYCLE_CASES.len());
        for &case in &CYCLE_CASES {
            for k in 0..n {
                // Fraction of the phase, 0 at its first sample, 1 at its last
                let f = if n > 1 { k as f64 / (n - 1) as f64 } else { 0.0 };
                let v = match case {
                    0 => 0.0,
                    1 => -a + 2.0 * a * f,
                    2 => a - 2.0 * a * f,
                    _ => self.config.hold_voltage,
                };
                samples.push(self.sample(case, v));
            }
        }
        samples
    }

    /// One bias-off sample; closes the segment before it.
    pub fn closing_sample(&mut self) -> RawSample {
        self.sample(0, 0.0)
    }

    fn sample(&mut self, case: i32, v: f64) -> RawSample {
        let (noise_v, noise_i) = (self.noise(), self.noise());
        let c = &self.config;
        let time = self.next_sample as f64 * c.sample_interval;
        self.next_sample += 1;

        let i = v / c.resistance;
        let raw_v = v * c.amp_v + c.offset_v;
        let raw_i = i * c.r_ref * c.amp_i + c.offset_i;
        RawSample::new(time, case)
            .with_channel(c.voltage_channel.as_str(), raw_v + noise_v)
            .with_channel(c.current_channel.as_str(), raw_i + noise_i)
    }

    /// Triangular noise in `[-noise, noise]`.
    fn noise(&mut self) -> f64 {
        let peak = self.config.noise;
        if peak <= 0.0 {
            return 0.0;
        }
        (self.rng.gen_range(-peak..=peak) + self.rng.gen_range(-peak..=peak)) / 2.0
    }

    /// Write status records, `cycles` cycles and the closing sample to the
    /// store. Returns the number of raw samples written.
    pub async fn publish(
        &mut self,
        store: &dyn SampleStore,
        paths: &StreamPaths,
        cycles: usize,
    ) -> PipelineResult<usize> {
        for (path, status) in self.status_records() {
            append_typed(store, &path, status).await?;
        }
        let mut written = 0;
        for _ in 0..cycles {
            for sample in self.cycle() {
                append_typed(store, &paths.raw(), sample).await?;
                written += 1;
            }
        }
        append_typed(store, &paths.raw(), self.closing_sample()).await?;
        written += 1;
        info!(stream = paths.key(), cycles, samples = written, "Simulated run published");
        Ok(written)
    }
}
