//! # Transport DAQ Core Library
//!
//! This crate turns the raw stream of a cryostat transport measurement into
//! resistance estimates. A sweep source labels every sample with a trigger
//! code; the pipeline splits the stream into segments of constant code,
//! calibrates channel offsets during bias-off periods and extracts the
//! resistance of each sweep or constant-voltage hold, incrementally and
//! resumably.
//!
//! ## Crate Structure
//!
//! - **`config`**: Figment-based [`config::PipelineConfig`] loaded from TOML and
//!   `TRANSPORT_DAQ_` environment variables.
//! - **`core`**: Record types shared by all stages (`RawSample`, `Segment`,
//!   `TransportEstimate`, `DerivedRecord`, ...).
//! - **`data`**: The processing stages. `segmenter` and `recorder` detect
//!   boundaries, `calibration` tracks offsets, `histogram` bins curves onto a
//!   voltage grid, `transport` extracts estimates and `storage` exports CSV.
//! - **`error`**: The `PipelineError` enum and its handling classes.
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`orchestrator`**: The per-stream polling loop that drives extraction.
//! - **`sim`**: A simulated sweep source for demos and tests.
//! - **`store`**: The append-only stream store boundary and an in-memory
//!   implementation.
//!
//! ## Data Flow
//!
//! ```text
//! <key>/raw ──► SegmentRecorder ──► <key>/segments ──► StreamingOrchestrator ──► <key>/derived
//! ```
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod sim;
pub mod store;

pub use crate::config::PipelineConfig;
pub use crate::error::{PipelineError, PipelineResult};
pub use crate::orchestrator::{OrchestratorHandle, StreamingOrchestrator};
pub use crate::store::{MemoryStore, SampleStore, StreamPaths};
