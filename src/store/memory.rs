//! In-process store backend.
//!
//! `MemoryStore` keeps every stream in a `Vec` behind a `tokio::sync::RwLock`.
//! Clones share the same streams, so one clone can be handed to the producer
//! and others to any number of readers.
use super::{Record, SampleStore};
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// [`SampleStore`] held entirely in memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    streams: Arc<RwLock<HashMap<String, Vec<Record>>>>,
    closed: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Empty, open store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every further operation fail as if the backend went away.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Names of all streams created so far.
    pub async fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.streams.read().await.keys().cloned().collect();
        paths.sort();
        paths
    }

    fn check_open(&self) -> PipelineResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(PipelineError::Store("memory store is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SampleStore for MemoryStore {
    async fn append(&self, path: &str, record: Record) -> PipelineResult<()> {
        self.check_open()?;
        self.streams
            .write()
            .await
            .entry(path.to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    async fn len(&self, path: &str) -> PipelineResult<usize> {
        self.check_open()?;
        Ok(self.streams.read().await.get(path).map_or(0, Vec::len))
    }

    async fn get_range(
        &self,
        path: &str,
        start: usize,
        stop: usize,
    ) -> PipelineResult<Vec<Record>> {
        self.check_open()?;
        let streams = self.streams.read().await;
        let Some(stream) = streams.get(path) else {
            return Ok(Vec::new());
        };
        if start > stop || start >= stream.len() {
            return Ok(Vec::new());
        }
        let end = stop.saturating_add(1).min(stream.len());
        Ok(stream[start..end].to_vec())
    }

    async fn get(&self, path: &str, index: i64) -> PipelineResult<Option<Record>> {
        self.check_open()?;
        let streams = self.streams.read().await;
        let Some(stream) = streams.get(path) else {
            return Ok(None);
        };
        let resolved = if index < 0 {
            i64::try_from(stream.len()).ok().map(|len| len + index)
        } else {
            Some(index)
        };
        Ok(resolved
            .and_then(|i| usize::try_from(i).ok())
            .and_then(|i| stream.get(i).cloned()))
    }
}
