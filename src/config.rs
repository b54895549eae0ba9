//! Pipeline configuration using Figment
//!
//! Configuration is loaded from:
//! 1. a TOML file (base configuration, `config/transport.toml` by default)
//! 2. Environment variables (prefixed with TRANSPORT_DAQ_, sections split on `__`)
//!
//! Every section has defaults, so an empty file is a valid configuration.
//!
//! # Example
//! ```no_run
//! use transport_daq::config::PipelineConfig;
//!
//! let config = PipelineConfig::load()?;
//! println!("Poll interval: {:?}", config.orchestrator.poll_interval);
//! # Ok::<(), transport_daq::error::PipelineError>(())
//! ```

use crate::error::{PipelineError, PipelineResult};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Segment boundary detection
    pub segmenter: SegmenterConfig,
    /// Transport extraction
    pub extractor: ExtractorConfig,
    /// Voltage grid for binned curves
    pub binning: BinningConfig,
    /// Streaming loop settings
    pub orchestrator: OrchestratorConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

/// Segmenter settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterConfig {
    /// Minimum time in seconds between boundaries while idling (case <= 0)
    pub min_dwell_s: f64,
    /// Raw samples read per recorder poll
    pub batch_size: usize,
}

/// Transport extractor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractorConfig {
    /// Raw channel carrying the voltage reading
    pub voltage_channel: String,
    /// Raw channel carrying the current-amplifier reading
    pub current_channel: String,
    /// Currents at or below this magnitude (A) give undefined resistance
    pub current_threshold: f64,
    /// Upper bound on waiting for a segment's samples to be committed
    #[serde(with = "humantime_serde")]
    pub retrieve_timeout: Duration,
    /// Sleep between retrieval attempts
    #[serde(with = "humantime_serde")]
    pub retry_backoff: Duration,
    /// Whether odd sweep case codes are up-sweeps
    pub odd_case_is_up: bool,
}

/// Bin edges of the binned curves
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinningConfig {
    /// First bin edge (V)
    pub start: f64,
    /// Last bin edge (V)
    pub stop: f64,
    /// Number of edges
    pub points: usize,
}

/// Streaming loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Idle wait between polls of the segment stream
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "transport_daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            min_dwell_s: 1.0,
            batch_size: 4096,
        }
    }
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            voltage_channel: "v".to_string(),
            current_channel: "i".to_string(),
            current_threshold: 0.0,
            retrieve_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(100),
            odd_case_is_up: true,
        }
    }
}

impl Default for BinningConfig {
    fn default() -> Self {
        Self {
            start: -1.0,
            stop: 1.0,
            points: 101,
        }
    }
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from config/transport.toml and environment variables
    ///
    /// Environment variables can override configuration with prefix TRANSPORT_DAQ_
    /// Example: TRANSPORT_DAQ_APPLICATION__LOG_LEVEL=debug
    pub fn load() -> PipelineResult<Self> {
        Self::load_from("config/transport.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from<P: AsRef<Path>>(path: P) -> PipelineResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("TRANSPORT_DAQ_").split("__"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from an in-memory TOML document (no env overrides)
    pub fn from_toml_str(toml: &str) -> PipelineResult<Self> {
        let config: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> PipelineResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(PipelineError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if !(self.segmenter.min_dwell_s >= 0.0) {
            return Err(PipelineError::Configuration(format!(
                "Invalid min_dwell_s {}. Must be >= 0",
                self.segmenter.min_dwell_s
            )));
        }
        if self.segmenter.batch_size == 0 {
            return Err(PipelineError::Configuration(
                "segmenter.batch_size must be positive".to_string(),
            ));
        }

        let extractor = &self.extractor;
        if !(extractor.current_threshold >= 0.0) {
            return Err(PipelineError::Configuration(format!(
                "Invalid current_threshold {}. Must be >= 0",
                extractor.current_threshold
            )));
        }
        if extractor.voltage_channel == extractor.current_channel {
            return Err(PipelineError::Configuration(format!(
                "voltage_channel and current_channel both name '{}'",
                extractor.voltage_channel
            )));
        }
        if extractor.retrieve_timeout.is_zero() || extractor.retry_backoff.is_zero() {
            return Err(PipelineError::Configuration(
                "retrieve_timeout and retry_backoff must be non-zero".to_string(),
            ));
        }

        if self.binning.points < 2 {
            return Err(PipelineError::Configuration(format!(
                "Invalid binning.points {}. Need at least 2 edges",
                self.binning.points
            )));
        }
        if !self.binning.start.is_finite() || !self.binning.stop.is_finite() {
            return Err(PipelineError::Configuration(format!(
                "binning.start ({}) and binning.stop ({}) must be finite",
                self.binning.start, self.binning.stop
            )));
        }
        if !(self.binning.start < self.binning.stop) {
            return Err(PipelineError::Configuration(format!(
                "binning.start ({}) must be below binning.stop ({})",
                self.binning.start, self.binning.stop
            )));
        }

        if self.orchestrator.poll_interval.is_zero() {
            return Err(PipelineError::Configuration(
                "orchestrator.poll_interval must be non-zero".to_string(),
            ));
        }

        Ok(())
    }
}
