//! Streaming orchestrator: drives transport extraction over new segments.
//!
//! One orchestrator runs per measurement stream. Each cycle compares the
//! length of the segment stream (`available`) with the length of the derived
//! stream (`processed`) and extracts segments `processed..available` in
//! index order, appending one [`DerivedRecord`] per segment right after it is
//! done. The derived stream length is therefore the watermark: restarting an
//! orchestrator resumes exactly after the last committed segment, and running
//! it with no new segments appends nothing.
//!
//! # Architecture
//!
//! ```text
//! <key>/segments ──► StreamingOrchestrator ──► TransportExtractor
//!                            │                     │ reads <key>/raw, <key>/calibration,
//!                            │                     │       status/amplifier/*, status/reference
//!                            ▼                     ▼
//!  <key>/calibration, <key>/resistance, <key>/curves/*  then  <key>/derived (commit)
//! ```
//!
//! Side-stream records (offsets, resistance traces, binned curves) are appended before the
//! derived record that commits the segment.
//!
//! # Failure handling
//!
//! Undefined case codes are logged at error level, shape mismatches and
//! retrieve timeouts at warning level; both commit a
//! [`DerivedRecord::Skipped`] so the segment is never retried. Only fatal
//! errors (store unreachable) end the loop.
//!
//! # Cancellation
//!
//! The shutdown signal is checked at the top of each cycle and after each
//! segment. A segment that has started is always finished first, so a
//! derived record is never half-written.
use crate::config::PipelineConfig;
use crate::core::{DerivedRecord, ResistanceTrace, Segment, Watermark};
use crate::data::transport::{Extraction, TransportExtractor};
use crate::error::{ErrorClass, PipelineError, PipelineResult};
use crate::store::{append_typed, read_range, SampleStore, StreamPaths};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

/// Counters of a running or finished orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorStats {
    /// Segments committed to the derived stream (including skipped ones)
    pub processed: u64,
    /// Segments committed as skipped
    pub skipped: u64,
    /// Poll cycles executed
    pub cycles: u64,
}

/// Extracts the segments of one measurement stream as they arrive.
pub struct StreamingOrchestrator {
    store: Arc<dyn SampleStore>,
    paths: StreamPaths,
    extractor: TransportExtractor,
    poll_interval: Duration,
    stats: OrchestratorStats,
}

impl StreamingOrchestrator {
    /// Orchestrator for the streams under `paths`.
    pub fn new(store: Arc<dyn SampleStore>, paths: StreamPaths, config: &PipelineConfig) -> Self {
        Self {
            extractor: TransportExtractor::new(store.clone(), paths.clone(), config),
            store,
            paths,
            poll_interval: config.orchestrator.poll_interval,
            stats: OrchestratorStats::default(),
        }
    }

    /// Streams handled by this orchestrator.
    pub fn paths(&self) -> &StreamPaths {
        &self.paths
    }

    /// Counters so far.
    pub fn stats(&self) -> &OrchestratorStats {
        &self.stats
    }

    /// Current resume point, read from the derived stream length.
    pub async fn watermark(&self) -> PipelineResult<Watermark> {
        let processed = self.store.len(&self.paths.derived()).await?;
        Ok(Watermark {
            stream_id: self.paths.key().to_string(),
            last_processed: i64::try_from(processed)
                .map_err(|_| PipelineError::Store("derived stream too long".to_string()))?,
        })
    }

    /// Run one cycle: extract every segment not yet in the derived stream.
    ///
    /// Stops early, between segments, once `shutdown` reads `true`. Returns the
    /// number of derived records appended.
    pub async fn process_pending(
        &mut self,
        shutdown: Option<&watch::Receiver<bool>>,
    ) -> PipelineResult<usize> {
        self.stats.cycles += 1;
        let available = self.store.len(&self.paths.segments()).await?;
        let processed = self.store.len(&self.paths.derived()).await?;
        if available <= processed {
            return Ok(0);
        }

        let pending: Vec<Segment> = read_range(
            self.store.as_ref(),
            &self.paths.segments(),
            processed,
            available - 1,
        )
        .await?;
        debug!(
            stream = self.paths.key(),
            processed,
            available,
            "Processing pending segments"
        );

        let mut appended = 0;
        for segment in pending {
            let record = self.process_segment(&segment).await?;
            append_typed(self.store.as_ref(), &self.paths.derived(), record).await?;
            appended += 1;
            self.stats.processed += 1;

            if shutdown.is_some_and(|rx| *rx.borrow()) {
                debug!(stream = self.paths.key(), "Shutdown requested mid-batch");
                break;
            }
        }
        Ok(appended)
    }

    /// Extract one segment and write its side-stream records. Returns the
    /// derived record that commits it.
    async fn process_segment(&mut self, segment: &Segment) -> PipelineResult<DerivedRecord> {
        let result = self.extractor.extract(segment).await;
        let record = match result {
            Ok(Extraction::Calibration(offset)) => {
                self.extractor.calibration().commit(offset.clone()).await?;
                DerivedRecord::Calibration {
                    segment: segment.index,
                    offset,
                }
            }
            Ok(Extraction::ConstantVoltage(estimate)) => DerivedRecord::ConstantVoltage {
                segment: segment.index,
                estimate,
            },
            Ok(Extraction::Sweep {
                direction,
                estimate,
                curve,
                resistance,
            }) => {
                let trace = ResistanceTrace {
                    segment: segment.index,
                    time: estimate.time,
                    direction,
                    threshold: self.extractor.current_threshold(),
                    values: resistance,
                };
                append_typed(self.store.as_ref(), &self.paths.resistance(), trace).await?;
                append_typed(self.store.as_ref(), &self.paths.curves(direction), curve).await?;
                DerivedRecord::Sweep {
                    segment: segment.index,
                    direction,
                    estimate,
                }
            }
            Err(err) => {
                match err.class() {
                    ErrorClass::Fatal => return Err(err),
                    ErrorClass::Invalid => error!(
                        stream = self.paths.key(),
                        segment = segment.index,
                        case = segment.case,
                        error = %err,
                        "Dropping invalid segment"
                    ),
                    ErrorClass::Unrecoverable | ErrorClass::Transient => warn!(
                        stream = self.paths.key(),
                        segment = segment.index,
                        error = %err,
                        "Skipping segment"
                    ),
                }
                self.stats.skipped += 1;
                DerivedRecord::Skipped {
                    segment: segment.index,
                    reason: err.to_string(),
                }
            }
        };
        Ok(record)
    }

    /// Poll until `shutdown` turns `true` (or its sender is dropped).
    ///
    /// Returns the final counters, or the fatal error that ended the loop.
    #[instrument(skip_all, fields(stream = %self.paths.key()))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> PipelineResult<OrchestratorStats> {
        let watermark = self.watermark().await?;
        info!(resume_at = watermark.last_processed, "Orchestrator started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let appended = match self.process_pending(Some(&shutdown)).await {
                Ok(n) => n,
                Err(err) => {
                    error!(error = %err, "Orchestrator aborted");
                    return Err(err);
                }
            };

            if appended == 0 {
                tokio::select! {
                    _ = sleep(self.poll_interval) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
        }

        info!(
            processed = self.stats.processed,
            skipped = self.stats.skipped,
            "Orchestrator stopped"
        );
        Ok(self.stats)
    }

    /// Run on a new tokio task.
    pub fn spawn(self) -> OrchestratorHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(shutdown_rx));
        OrchestratorHandle { shutdown_tx, task }
    }
}

/// Handle to an orchestrator running on its own task.
pub struct OrchestratorHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<PipelineResult<OrchestratorStats>>,
}

impl OrchestratorHandle {
    /// Ask the orchestrator to stop after its in-flight segment.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// True once the task has returned.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to end.
    pub async fn join(self) -> PipelineResult<OrchestratorStats> {
        self.task.await?
    }

    /// Stop and wait.
    pub async fn shutdown(self) -> PipelineResult<OrchestratorStats> {
        self.stop();
        self.join().await
    }
}

/// Stop every handle and wait for all of them, in order.
pub async fn shutdown_all(handles: Vec<OrchestratorHandle>) -> Vec<PipelineResult<OrchestratorStats>> {
    for handle in &handles {
        handle.stop();
    }
    futures::future::join_all(handles.into_iter().map(OrchestratorHandle::join)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::RawSample;
    use crate::store::MemoryStore;

    async fn seed(store: &MemoryStore, paths: &StreamPaths, segments: &[Segment], samples: usize) {
        for k in 0..samples {
            let sample = RawSample::new(k as f64 * 0.01, 1)
                .with_channel("v", k as f64 * 0.01)
                .with_channel("i", k as f64 * 0.001);
            append_typed(store, &paths.raw(), sample).await.unwrap();
        }
        for seg in segments {
            append_typed(store, &paths.segments(), *seg).await.unwrap();
        }
    }

    fn orchestrator(store: &MemoryStore, paths: &StreamPaths) -> StreamingOrchestrator {
        StreamingOrchestrator::new(Arc::new(store.clone()), paths.clone(), &PipelineConfig::default())
    }

    #[tokio::test]
    async fn test_second_pass_appends_nothing() {
        let store = MemoryStore::new();
        let paths = StreamPaths::new("run");
        seed(
            &store,
            &paths,
            &[
                Segment { index: 0, start: 0, stop: 4, case: 0 },
                Segment { index: 1, start: 5, stop: 9, case: 1 },
            ],
            10,
        )
        .await;

        let mut orch = orchestrator(&store, &paths);
        assert_eq!(orch.process_pending(None).await.unwrap(), 2);
        assert_eq!(orch.process_pending(None).await.unwrap(), 0);
        assert_eq!(orch.watermark().await.unwrap().last_processed, 2);

        let mut restarted = orchestrator(&store, &paths);
        assert_eq!(restarted.process_pending(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_undefined_case_is_skipped_not_fatal() {
        let store = MemoryStore::new();
        let paths = StreamPaths::new("run");
        seed(
            &store,
            &paths,
            &[
                Segment { index: 0, start: 0, stop: 4, case: -2 },
                Segment { index: 1, start: 5, stop: 9, case: 1 },
            ],
            10,
        )
        .await;

        let mut orch = orchestrator(&store, &paths);
        assert_eq!(orch.process_pending(None).await.unwrap(), 2);
        assert_eq!(orch.stats().skipped, 1);

        let derived: Vec<DerivedRecord> = crate::store::read_all(&store, &paths.derived())
            .await
            .unwrap();
        assert!(matches!(derived[0], DerivedRecord::Skipped { segment: 0, .. }));
        assert!(matches!(derived[1], DerivedRecord::Sweep { segment: 1, .. }));
    }

    #[tokio::test]
    async fn test_shutdown_between_segments() {
        let store = MemoryStore::new();
        let paths = StreamPaths::new("run");
        seed(
            &store,
            &paths,
            &[
                Segment { index: 0, start: 0, stop: 2, case: 1 },
                Segment { index: 1, start: 3, stop: 5, case: 2 },
            ],
            6,
        )
        .await;

        let (tx, rx) = watch::channel(true);
        let mut orch = orchestrator(&store, &paths);
        // The first segment is always finished before the signal is honoured.
        assert_eq!(orch.process_pending(Some(&rx)).await.unwrap(), 1);
        drop(tx);
        assert_eq!(orch.process_pending(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_closed_store_aborts_run() {
        let store = MemoryStore::new();
        let paths = StreamPaths::new("run");
        let handle = orchestrator(&store, &paths).spawn();
        store.close();

        let result = handle.join().await;
        assert!(matches!(result, Err(PipelineError::Store(_))));
    }
}
