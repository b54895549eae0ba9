//! Segment boundary detection on the trigger channel.
//!
//! A new boundary is declared at sample `i` (trigger `t`, time `τ`) when
//! `t` differs from the current case, or when idling (`t <= 0`) and at least
//! `min_dwell` seconds passed since the last boundary. The segment that ends
//! at a boundary is only known once the *next* boundary is seen, so the most
//! recent run of samples always stays open.
//!
//! The segmenter itself is a plain function over [`SegmenterState`]; the state
//! lives with the caller because the raw stream is consumed in bounded
//! batches across many polls.
use crate::core::Segment;

/// Carry-over state between batches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmenterState {
    /// Case of the open segment; `None` before the first sample.
    pub current_case: Option<i32>,
    /// Time of the boundary that opened the current segment.
    pub last_boundary_time: f64,
    /// Raw index of the first sample of the open segment.
    pub open_start: i64,
    /// Absolute raw index of the next sample to be fed.
    pub next_index: i64,
    /// Index assigned to the next emitted segment.
    pub next_segment: i64,
}

impl SegmenterState {
    /// State of a fresh stream.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resume after `segments_emitted` segments, with the open segment starting
    /// at raw index `open_start`. Samples from `open_start` onwards must be fed
    /// again.
    pub fn resume(segments_emitted: i64, open_start: i64) -> Self {
        Self {
            current_case: None,
            last_boundary_time: 0.0,
            open_start,
            next_index: open_start,
            next_segment: segments_emitted,
        }
    }
}

/// Feed one sample; returns the segment closed by it, if any.
pub fn push_sample(
    state: &mut SegmenterState,
    min_dwell: f64,
    time: f64,
    trigger: i32,
) -> Option<Segment> {
    let index = state.next_index;
    state.next_index += 1;

    let Some(current) = state.current_case else {
        // First boundary of a run: nothing is open yet.
        state.current_case = Some(trigger);
        state.last_boundary_time = time;
        state.open_start = index;
        return None;
    };

    let changed = trigger != current;
    let dwelled = trigger <= 0 && time - state.last_boundary_time >= min_dwell;
    if !(changed || dwelled) {
        return None;
    }

    let closed = Segment {
        index: state.next_segment,
        start: state.open_start,
        stop: index - 1,
        case: current,
    };
    state.next_segment += 1;
    state.current_case = Some(trigger);
    state.last_boundary_time = time;
    state.open_start = index;
    Some(closed)
}

/// Feed a batch of `(time, trigger)` pairs and collect every closed segment.
///
/// Lazily yields segments as the batch iterator is consumed.
pub fn segment_batch<'a, I>(
    state: &'a mut SegmenterState,
    min_dwell: f64,
    samples: I,
) -> impl Iterator<Item = Segment> + 'a
where
    I: IntoIterator<Item = (f64, i32)>,
    I::IntoIter: 'a,
{
    samples
        .into_iter()
        .filter_map(move |(time, trigger)| push_sample(state, min_dwell, time, trigger))
}
