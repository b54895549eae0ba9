//! Read-only lookups on the shared `status/` streams.
//!
//! Amplifier gains and the reference resistance are written by other
//! components. Lookups take a snapshot of what is committed now and never wait
//! for a future value: an absent value is reported as `None`.
use crate::core::StatusValue;
use crate::error::PipelineResult;
use crate::store::{amplifier_status_path, find_latest, reference_status_path, SampleStore};
use std::sync::Arc;

/// Point-in-time reader of amplifier gains and the reference resistance.
#[derive(Clone)]
pub struct StatusLookup {
    store: Arc<dyn SampleStore>,
}

impl StatusLookup {
    /// Lookup over the `status/` streams of `store`.
    pub fn new(store: Arc<dyn SampleStore>) -> Self {
        Self { store }
    }

    /// Gain of the amplifier on `channel` in effect at `before_time`.
    pub async fn amplification(&self, channel: &str, before_time: f64) -> PipelineResult<Option<f64>> {
        self.latest(&amplifier_status_path(channel), before_time).await
    }

    /// Reference resistance (Ω) in effect at `before_time`.
    pub async fn reference_resistance(&self, before_time: f64) -> PipelineResult<Option<f64>> {
        self.latest(&reference_status_path(), before_time).await
    }

    async fn latest(&self, path: &str, before_time: f64) -> PipelineResult<Option<f64>> {
        let latest = find_latest(self.store.as_ref(), path, |status: &StatusValue| {
            status.time <= before_time
        })
        .await?;
        Ok(latest.map(|status| status.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{append_typed, MemoryStore};

    #[tokio::test]
    async fn test_latest_value_before_time() {
        let store = MemoryStore::new();
        let path = amplifier_status_path("i");
        append_typed(&store, &path, StatusValue { time: 1.0, value: 1e6 }).await.unwrap();
        append_typed(&store, &path, StatusValue { time: 5.0, value: 1e7 }).await.unwrap();

        let lookup = StatusLookup::new(Arc::new(store));
        assert_eq!(lookup.amplification("i", 0.5).await.unwrap(), None);
        assert_eq!(lookup.amplification("i", 3.0).await.unwrap(), Some(1e6));
        assert_eq!(lookup.amplification("i", 5.0).await.unwrap(), Some(1e7));
        assert_eq!(lookup.amplification("v", 5.0).await.unwrap(), None);
        assert_eq!(lookup.reference_resistance(5.0).await.unwrap(), None);
    }
}
