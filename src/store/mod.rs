//! Append-only record store boundary.
//!
//! The pipeline never owns persistence. It talks to any backend through the
//! [`SampleStore`] trait: a single writer appends records to named streams, any
//! number of readers query lengths and index ranges. Records already appended
//! are never modified; corrections are new records.
//!
//! Streams are addressed by string paths following [`StreamPaths`] for the
//! per-measurement streams and [`amplifier_status_path`] /
//! [`reference_status_path`] for the shared `status/` streams.
use crate::core::{
    BinnedCurve, CalibrationOffset, DerivedRecord, RawSample, ResistanceTrace, Segment,
    StatusValue, SweepDirection,
};
use crate::error::{PipelineError, PipelineResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod memory;

pub use memory::MemoryStore;

/// Root of the upstream status streams.
pub const STATUS_ROOT: &str = "status";

/// Schema-less envelope for everything the pipeline reads or writes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Record {
    /// `<key>/raw`
    Sample(RawSample),
    /// `<key>/segments`
    Segment(Segment),
    /// `<key>/calibration`
    Calibration(CalibrationOffset),
    /// `<key>/derived`
    Derived(DerivedRecord),
    /// `<key>/curves/*`
    Curve(BinnedCurve),
    /// `<key>/resistance`
    Resistance(ResistanceTrace),
    /// `status/*`
    Status(StatusValue),
}

/// Typed view onto a [`Record`] variant.
pub trait StoredRecord: Sized {
    /// Name used in error messages.
    const KIND: &'static str;

    /// Unwrap the matching variant, `None` for any other.
    fn from_record(record: Record) -> Option<Self>;

    /// Wrap into the envelope.
    fn into_record(self) -> Record;
}

macro_rules! stored_record {
    ($ty:ty, $variant:ident, $kind:literal) => {
        impl StoredRecord for $ty {
            const KIND: &'static str = $kind;

            fn from_record(record: Record) -> Option<Self> {
                match record {
                    Record::$variant(inner) => Some(inner),
                    _ => None,
                }
            }

            fn into_record(self) -> Record {
                Record::$variant(self)
            }
        }
    };
}

stored_record!(RawSample, Sample, "sample");
stored_record!(Segment, Segment, "segment");
stored_record!(CalibrationOffset, Calibration, "calibration");
stored_record!(DerivedRecord, Derived, "derived");
stored_record!(BinnedCurve, Curve, "curve");
stored_record!(ResistanceTrace, Resistance, "resistance");
stored_record!(StatusValue, Status, "status");

/// Append-only store used by the pipeline.
///
/// Implementations must make an appended record visible to later `len` calls
/// from any task, but callers never assume a just-appended index is readable
/// from a different store replica.
#[async_trait]
pub trait SampleStore: Send + Sync {
    /// Append one record to the end of `path`, creating the stream if needed.
    async fn append(&self, path: &str, record: Record) -> PipelineResult<()>;

    /// Number of records currently committed to `path` (0 for unknown paths).
    async fn len(&self, path: &str) -> PipelineResult<usize>;

    /// Records `start..=stop` of `path`. Returns only what exists, which may be
    /// fewer records than requested.
    async fn get_range(&self, path: &str, start: usize, stop: usize)
        -> PipelineResult<Vec<Record>>;

    /// Single record. Negative indices count from the end, `-1` is the most recent.
    async fn get(&self, path: &str, index: i64) -> PipelineResult<Option<Record>>;

    /// Whole stream.
    async fn get_all(&self, path: &str) -> PipelineResult<Vec<Record>> {
        let len = self.len(path).await?;
        if len == 0 {
            return Ok(Vec::new());
        }
        self.get_range(path, 0, len - 1).await
    }
}

/// Append a typed record.
pub async fn append_typed<T: StoredRecord>(
    store: &dyn SampleStore,
    path: &str,
    value: T,
) -> PipelineResult<()> {
    store.append(path, value.into_record()).await
}

/// Read `start..=stop` of `path` as records of type `T`.
///
/// A record of another type in the range means the stream is corrupt and is
/// reported as a store error.
pub async fn read_range<T: StoredRecord>(
    store: &dyn SampleStore,
    path: &str,
    start: usize,
    stop: usize,
) -> PipelineResult<Vec<T>> {
    store
        .get_range(path, start, stop)
        .await?
        .into_iter()
        .map(|record| decode::<T>(path, record))
        .collect()
}

/// Read every record of `path` as type `T`.
pub async fn read_all<T: StoredRecord>(
    store: &dyn SampleStore,
    path: &str,
) -> PipelineResult<Vec<T>> {
    store
        .get_all(path)
        .await?
        .into_iter()
        .map(|record| decode::<T>(path, record))
        .collect()
}

/// Read a single record of `path` as type `T` (`-1` is the most recent).
pub async fn read_one<T: StoredRecord>(
    store: &dyn SampleStore,
    path: &str,
    index: i64,
) -> PipelineResult<Option<T>> {
    match store.get(path, index).await? {
        Some(record) => decode::<T>(path, record).map(Some),
        None => Ok(None),
    }
}

/// Most recent record of `path` matching `predicate`.
///
/// Walks the stream backwards one record at a time and stops at the first
/// match, so lookups near the end of a long stream stay cheap.
pub async fn find_latest<T, F>(
    store: &dyn SampleStore,
    path: &str,
    predicate: F,
) -> PipelineResult<Option<T>>
where
    T: StoredRecord,
    F: Fn(&T) -> bool,
{
    let len = store.len(path).await?;
    let len = i64::try_from(len)
        .map_err(|_| PipelineError::Store(format!("stream '{}' too long", path)))?;
    for index in (0..len).rev() {
        let Some(record) = store.get(path, index).await? else {
            continue;
        };
        let value = decode::<T>(path, record)?;
        if predicate(&value) {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

fn decode<T: StoredRecord>(path: &str, record: Record) -> PipelineResult<T> {
    T::from_record(record).ok_or_else(|| {
        PipelineError::Store(format!("stream '{}' holds a non-{} record", path, T::KIND))
    })
}

/// Path convention for the streams of one measurement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamPaths {
    key: String,
}

impl StreamPaths {
    /// Paths below `key`.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// Measurement key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Raw acquisition ticks.
    pub fn raw(&self) -> String {
        format!("{}/raw", self.key)
    }

    /// Segment boundary records.
    pub fn segments(&self) -> String {
        format!("{}/segments", self.key)
    }

    /// One derived record per processed segment.
    pub fn derived(&self) -> String {
        format!("{}/derived", self.key)
    }

    /// Offsets measured over bias-off segments.
    pub fn calibration(&self) -> String {
        format!("{}/calibration", self.key)
    }

    /// Per-sample resistance traces of sweep segments.
    pub fn resistance(&self) -> String {
        format!("{}/resistance", self.key)
    }

    /// Binned curves of one sweep direction.
    pub fn curves(&self, direction: SweepDirection) -> String {
        format!("{}/curves/{}", self.key, direction.as_str())
    }
}

/// Gain stream of the amplifier in front of `channel`.
pub fn amplifier_status_path(channel: &str) -> String {
    format!("{}/amplifier/{}", STATUS_ROOT, channel)
}

/// Reference (shunt) resistance stream.
pub fn reference_status_path() -> String {
    format!("{}/reference", STATUS_ROOT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_stream_paths() {
        let paths = StreamPaths::new("cooldown3/iv");
        assert_eq!(paths.raw(), "cooldown3/iv/raw");
        assert_eq!(paths.segments(), "cooldown3/iv/segments");
        assert_eq!(paths.derived(), "cooldown3/iv/derived");
        assert_eq!(paths.curves(SweepDirection::Down), "cooldown3/iv/curves/down");
        assert_eq!(paths.resistance(), "cooldown3/iv/resistance");
        assert_eq!(amplifier_status_path("i"), "status/amplifier/i");
        assert_eq!(reference_status_path(), "status/reference");
    }

    #[test]
    fn test_typed_record_conversion() {
        let seg = Segment {
            index: 2,
            start: 10,
            stop: 19,
            case: 1,
        };
        let record = seg.into_record();
        assert_eq!(Segment::from_record(record.clone()), Some(seg));
        assert_eq!(RawSample::from_record(record), None);
    }

    /// Counts single-record and range reads passed through to a memory store.
    struct CountingStore {
        inner: MemoryStore,
        gets: AtomicUsize,
        ranges: AtomicUsize,
    }

    #[async_trait]
    impl SampleStore for CountingStore {
        async fn append(&self, path: &str, record: Record) -> PipelineResult<()> {
            self.inner.append(path, record).await
        }

        async fn len(&self, path: &str) -> PipelineResult<usize> {
            self.inner.len(path).await
        }

        async fn get_range(&self, path: &str, start: usize, stop: usize) -> PipelineResult<Vec<Record>> {
            self.ranges.fetch_add(1, Ordering::SeqCst);
            self.inner.get_range(path, start, stop).await
        }

        async fn get(&self, path: &str, index: i64) -> PipelineResult<Option<Record>> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            self.inner.get(path, index).await
        }
    }

    #[tokio::test]
    async fn test_find_latest_stops_at_first_match() {
        let store = CountingStore {
            inner: MemoryStore::new(),
            gets: AtomicUsize::new(0),
            ranges: AtomicUsize::new(0),
        };
        for k in 0..100 {
            let status = StatusValue { time: k as f64, value: k as f64 * 10.0 };
            append_typed(&store, "status/reference", status).await.unwrap();
        }

        let found: Option<StatusValue> =
            find_latest(&store, "status/reference", |s: &StatusValue| s.time <= 97.5)
                .await
                .unwrap();
        assert_eq!(found.map(|s| s.value), Some(970.0));
        // Records 99, 98 and 97 only, no full-stream read
        assert_eq!(store.gets.load(Ordering::SeqCst), 3);
        assert_eq!(store.ranges.load(Ordering::SeqCst), 0);

        let none: Option<StatusValue> =
            find_latest(&store, "status/reference", |s: &StatusValue| s.time < 0.0)
                .await
                .unwrap();
        assert_eq!(none, None);
        let empty: Option<StatusValue> = find_latest(&store, "status/absent", |_: &StatusValue| true)
            .await
            .unwrap();
        assert_eq!(empty, None);
    }

    #[tokio::test]
    async fn test_read_range_rejects_foreign_records() {
        let store = MemoryStore::new();
        store
            .append("run/segments", Record::Status(StatusValue { time: 0.0, value: 1.0 }))
            .await
            .unwrap();

        let result = read_range::<Segment>(&store, "run/segments", 0, 0).await;
        assert!(matches!(result, Err(PipelineError::Store(_))));
    }
}
