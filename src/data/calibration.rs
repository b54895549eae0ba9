//! Offset calibration from bias-off segments.
//!
//! While the drive is off every channel should read zero, so the mean over a
//! `case == 0` segment is the baseline to subtract from later readings. Each
//! calibration is appended as a new [`CalibrationOffset`] record; nothing is
//! corrected in place. A lookup returns the latest offset taken at or before
//! the requested time, so a newer calibration only affects later segments.
use crate::core::{CalibrationOffset, RawSample, Segment};
use crate::data::stats::{mean, std_dev};
use crate::error::PipelineResult;
use crate::store::{append_typed, find_latest, SampleStore, StreamPaths};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Reads and writes the calibration stream of one measurement.
#[derive(Clone)]
pub struct CalibrationTracker {
    store: Arc<dyn SampleStore>,
    paths: StreamPaths,
}

impl CalibrationTracker {
    /// Tracker for the calibration stream under `paths`.
    pub fn new(store: Arc<dyn SampleStore>, paths: StreamPaths) -> Self {
        Self { store, paths }
    }

    /// Mean and spread of each of `channels` over the samples of a bias-off
    /// segment. `samples` must be exactly the segment's `[start, stop]` range.
    pub fn record_offset(
        segment: &Segment,
        samples: &[RawSample],
        channels: &[&str],
    ) -> CalibrationOffset {
        let mut offsets = HashMap::with_capacity(channels.len());
        let mut spread = HashMap::with_capacity(channels.len());
        for &channel in channels {
            let values: Vec<f64> = samples.iter().map(|s| s.channel(channel)).collect();
            offsets.insert(channel.to_string(), mean(&values));
            spread.insert(channel.to_string(), std_dev(&values));
        }
        debug!(segment = segment.index, ?offsets, "Computed offsets");
        CalibrationOffset {
            time: samples.first().map_or(f64::NAN, |s| s.time),
            offsets,
            spread,
        }
    }

    /// Append `offset` to the calibration stream.
    pub async fn commit(&self, offset: CalibrationOffset) -> PipelineResult<()> {
        append_typed(self.store.as_ref(), &self.paths.calibration(), offset).await
    }

    /// Offsets of the most recent calibration taken at or before `before_time`.
    ///
    /// `Ok(None)` means no calibration exists yet; callers fall back to zero.
    pub async fn lookup_offset(
        &self,
        before_time: f64,
    ) -> PipelineResult<Option<HashMap<String, f64>>> {
        let latest = find_latest(
            self.store.as_ref(),
            &self.paths.calibration(),
            |record: &CalibrationOffset| record.time <= before_time,
        )
        .await?;
        Ok(latest.map(|record| record.offsets))
    }
}
