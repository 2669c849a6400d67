use std::future::Future;

use crate::{
    config::{BUFFER_GC_GAP_BEEFY, BUFFER_GC_GAP_CALM},
    error::{KagiError, KagiResult},
};

/// A time range, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

/// Media buffer segments are appended to.
pub trait SegmentBuffer: Send + Sync {
    type Chunk: Send + Sync;

    /// Append a chunk. Fails with [`KagiError::QuotaExceeded`] when the
    /// buffer is full.
    fn push_chunk(&self, chunk: &Self::Chunk) -> impl Future<Output = KagiResult<()>> + Send;

    fn remove(&self, start: f64, end: f64) -> impl Future<Output = KagiResult<()>> + Send;

    /// Currently buffered ranges, in order.
    fn buffered(&self) -> Vec<TimeRange>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PlaybackObservation {
    pub position: f64,
    pub wanted_time_offset: f64,
}

pub trait PlaybackObserver: Send + Sync {
    /// Last playback observation.
    fn observation(&self) -> PlaybackObservation;
}

/// Append `chunk` to `buffer`. When the buffer is full, buffered data far
/// from the playback position is removed and the append is tried once more.
pub async fn append_segment_to_buffer<B, O>(
    observer: &O,
    buffer: &B,
    chunk: &B::Chunk,
) -> KagiResult<()>
where
    B: SegmentBuffer,
    O: PlaybackObserver,
{
    match buffer.push_chunk(chunk).await {
        Ok(()) => return Ok(()),
        Err(KagiError::QuotaExceeded) => {}
        Err(e) => return Err(KagiError::BufferAppendError(e.to_string())),
    }

    let PlaybackObservation {
        position,
        wanted_time_offset,
    } = observer.observation();
    let current_position = position + wanted_time_offset;
    tracing::warn!("Stream: Buffer full, collecting garbage around {current_position}");

    let retry = async {
        force_garbage_collection(current_position, buffer).await?;
        buffer.push_chunk(chunk).await
    };
    retry
        .await
        .map_err(|e| KagiError::BufferFullError(e.to_string()))
}

/// Remove buffered data farther than a calm gap from `position`, or than a
/// beefy one when nothing is that far.
pub async fn force_garbage_collection<B: SegmentBuffer>(position: f64, buffer: &B) -> KagiResult<()> {
    tracing::info!("Stream: Running garbage collector");
    let buffered = buffer.buffered();
    let mut ranges = select_gc_ranges(position, &buffered, BUFFER_GC_GAP_CALM);
    if ranges.is_empty() {
        ranges = select_gc_ranges(position, &buffered, BUFFER_GC_GAP_BEEFY);
    }

    tracing::debug!("Stream: GC cleaning {} range(s)", ranges.len());
    for range in ranges {
        buffer.remove(range.start, range.end).await?;
    }
    Ok(())
}

/// Parts of `buffered` outside of `[position - gap, position + gap]`.
pub fn select_gc_ranges(position: f64, buffered: &[TimeRange], gap: f64) -> Vec<TimeRange> {
    let keep_start = position - gap;
    let keep_end = position + gap;
    let mut ranges = Vec::new();
    for range in buffered {
        if range.start < keep_start {
            ranges.push(TimeRange::new(range.start, range.end.min(keep_start)));
        }
        if range.end > keep_end {
            ranges.push(TimeRange::new(range.start.max(keep_end), range.end));
        }
    }
    ranges
}
