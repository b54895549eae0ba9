//! Producer-side driver that turns the raw stream into segment records.
//!
//! `SegmentRecorder` owns the [`SegmenterState`] and a read cursor into the
//! raw stream. Each poll reads at most `batch_size` new samples, runs them
//! through the segmenter and appends every closed segment. On construction
//! the state is rebuilt from the segment stream already in the store, so a
//! restarted recorder continues numbering where the previous one stopped.
use crate::config::SegmenterConfig;
use crate::core::{RawSample, Segment};
use crate::data::segmenter::{segment_batch, SegmenterState};
use crate::error::PipelineResult;
use crate::store::{append_typed, read_one, read_range, SampleStore, StreamPaths};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Feeds new raw samples through the segmenter and stores closed segments.
pub struct SegmentRecorder {
    store: Arc<dyn SampleStore>,
    paths: StreamPaths,
    config: SegmenterConfig,
    state: SegmenterState,
}

impl SegmentRecorder {
    /// Create a recorder for the measurement behind `paths`, resuming after
    /// any segments already stored.
    pub async fn new(
        store: Arc<dyn SampleStore>,
        paths: StreamPaths,
        config: SegmenterConfig,
    ) -> PipelineResult<Self> {
        let segments_path = paths.segments();
        let emitted = store.len(&segments_path).await?;
        let state = match read_one::<Segment>(store.as_ref(), &segments_path, -1).await? {
            Some(last) => SegmenterState::resume(last.index + 1, last.stop + 1),
            None => SegmenterState::new(),
        };
        debug!(
            stream = paths.key(),
            emitted,
            resume_at = state.next_index,
            "Segment recorder ready"
        );
        Ok(Self {
            store,
            paths,
            config,
            state,
        })
    }

    /// Segmenter state after the last poll.
    pub fn state(&self) -> &SegmenterState {
        &self.state
    }

    /// Consume up to one batch of new raw samples. Returns the number of
    /// segments appended.
    #[instrument(skip(self), fields(stream = self.paths.key()))]
    pub async fn poll_once(&mut self) -> PipelineResult<usize> {
        let raw_path = self.paths.raw();
        let available = self.store.len(&raw_path).await?;
        let Ok(start) = usize::try_from(self.state.next_index) else {
            return Ok(0);
        };
        if start >= available {
            return Ok(0);
        }
        let stop = (start + self.config.batch_size - 1).min(available - 1);

        let samples: Vec<RawSample> =
            read_range(self.store.as_ref(), &raw_path, start, stop).await?;
        let closed: Vec<Segment> = segment_batch(
            &mut self.state,
            self.config.min_dwell_s,
            samples.iter().map(|s| (s.time, s.trigger)),
        )
        .collect();

        let segments_path = self.paths.segments();
        for segment in &closed {
            append_typed(self.store.as_ref(), &segments_path, *segment).await?;
        }
        if !closed.is_empty() {
            debug!(count = closed.len(), read = samples.len(), "Appended segments");
        }
        Ok(closed.len())
    }

    /// Poll until every committed raw sample has been consumed.
    pub async fn drain(&mut self) -> PipelineResult<usize> {
        let mut total = 0;
        loop {
            let before = self.state.next_index;
            total += self.poll_once().await?;
            if self.state.next_index == before {
                return Ok(total);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn push_triggers(store: &MemoryStore, paths: &StreamPaths, triggers: &[i32], t0: usize) {
        for (k, &t) in triggers.iter().enumerate() {
            let sample = RawSample::new((t0 + k) as f64 * 0.01, t).with_channel("v", 0.0);
            append_typed(store, &paths.raw(), sample).await.unwrap();
        }
    }

    fn config(batch_size: usize) -> SegmenterConfig {
        SegmenterConfig {
            min_dwell_s: 10.0,
            batch_size,
        }
    }

    #[tokio::test]
    async fn test_recorder_appends_closed_segments() {
        let store = MemoryStore::new();
        let paths = StreamPaths::new("run");
        push_triggers(&store, &paths, &[0, 0, 0, 1, 1, 1, 0, 0], 0).await;

        let mut recorder = SegmentRecorder::new(Arc::new(store.clone()), paths.clone(), config(3))
            .await
            .unwrap();
        assert_eq!(recorder.drain().await.unwrap(), 2);

        let segments: Vec<Segment> = crate::store::read_all(&store, &paths.segments())
            .await
            .unwrap();
        assert_eq!(segments[1], Segment { index: 1, start: 3, stop: 5, case: 1 });
        assert_eq!(recorder.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_recorder_resumes_from_store() {
        let store = MemoryStore::new();
        let paths = StreamPaths::new("run");
        push_triggers(&store, &paths, &[0, 0, 1, 1, 2, 2], 0).await;

        {
            let mut first = SegmentRecorder::new(Arc::new(store.clone()), paths.clone(), config(64))
                .await
                .unwrap();
            assert_eq!(first.drain().await.unwrap(), 2);
        }

        push_triggers(&store, &paths, &[2, 1, 1], 6).await;
        let mut second = SegmentRecorder::new(Arc::new(store.clone()), paths.clone(), config(64))
            .await
            .unwrap();
        assert_eq!(second.state().next_index, 4);
        assert_eq!(second.drain().await.unwrap(), 1);

        let segments: Vec<Segment> = crate::store::read_all(&store, &paths.segments())
            .await
            .unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[2], Segment { index: 2, start: 4, stop: 6, case: 2 });
    }
}
