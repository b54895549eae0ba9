//! Segment-level processing: boundary detection, calibration, binning,
//! transport extraction and export.
pub mod calibration;
pub mod histogram;
pub mod recorder;
pub mod segmenter;
pub mod stats;
pub mod status;
pub mod storage;
pub mod transport;
