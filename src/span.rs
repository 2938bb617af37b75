//! Read-only, seekable sequence of data points for one series.
//!
//! A [`Span`] stores an ordered list of [`RowView`]s. Each view gives `O(1)` access to its
//! points, which is what the downsampler relies on to look ahead over a bucket and then replay
//! it without buffering.

use crate::aggregator::Aggregator;
use crate::error::QueryError;
use crate::rowseq::{PointSequence, RowView};
use crate::types::{DataPoint, RandomAccessSeries, SeekableSeries, Timestamp, Value};

/// Position of the next point to read: row view index and offset inside that view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cursor {
    pub view: usize,
    pub offset: usize,
}

#[derive(Debug, Clone)]
pub struct Span {
    views: Vec<RowView>,
    /// `ends[i]` is the global index one past the last point of `views[i]`.
    ends: Vec<usize>,
}

impl Span {
    /// Builds a span from row views ordered by time. Fails if `views` is empty, if a view is
    /// empty, or if a view does not start strictly after the previous one ends.
    pub fn new(views: Vec<RowView>) -> Result<Self, QueryError> {
        if views.is_empty() {
            return Err(QueryError::IllegalData("empty span".to_string()));
        }
        let mut ends = Vec::with_capacity(views.len());
        let mut total = 0usize;
        for (i, view) in views.iter().enumerate() {
            if view.size() == 0 {
                return Err(QueryError::IllegalData(format!("row view #{} is empty", i)));
            }
            if i > 0 && views[i - 1].last_timestamp() >= view.first_timestamp() {
                return Err(QueryError::IllegalData(format!(
                    "row view #{} starts at {} but the previous one ends at {}",
                    i,
                    view.first_timestamp(),
                    views[i - 1].last_timestamp()
                )));
            }
            total += view.size();
            ends.push(total);
        }
        Ok(Self { views, ends })
    }

    /// Builds a single-view span from decoded points.
    pub fn from_points(points: Vec<DataPoint>) -> Result<Self, QueryError> {
        Self::new(vec![PointSequence::new(points)?.into()])
    }

    pub fn views(&self) -> &[RowView] {
        &self.views
    }

    pub fn first_timestamp(&self) -> Timestamp {
        self.views[0].first_timestamp()
    }

    pub fn last_timestamp(&self) -> Timestamp {
        self.views[self.views.len() - 1].last_timestamp()
    }

    pub fn iter(&self) -> SpanIterator<'_> {
        SpanIterator {
            span: self,
            cursor: Cursor::default(),
        }
    }

    /// Iterator producing one point per `interval` seconds using `aggregator`.
    pub fn downsampler(
        &self,
        interval: u64,
        aggregator: Aggregator,
    ) -> Result<DownsamplingIterator<'_>, QueryError> {
        if interval == 0 {
            return Err(QueryError::InvalidQuery(
                "downsample interval must be > 0".to_string(),
            ));
        }
        Ok(DownsamplingIterator {
            span: self,
            interval,
            aggregator,
            cursor: Cursor::default(),
        })
    }

    /// Maps a global index to its view and offset.
    fn locate(&self, i: usize) -> Cursor {
        let view = self.ends.partition_point(|&end| end <= i);
        let start = if view == 0 { 0 } else { self.ends[view - 1] };
        Cursor {
            view,
            offset: i - start,
        }
    }

    /// Moves `c` past exhausted views. `None` once every view is consumed.
    fn normalize(&self, mut c: Cursor) -> Option<Cursor> {
        while c.view < self.views.len() {
            if c.offset < self.views[c.view].size() {
                return Some(c);
            }
            c.view += 1;
            c.offset = 0;
        }
        None
    }

    /// Cursor positioned on the first point with timestamp `>= ts`: binds to the first view
    /// whose last point is not before `ts` (or the last view), then seeks inside it.
    fn seek_cursor(&self, ts: Timestamp) -> Cursor {
        let mut view = self.views.partition_point(|v| v.last_timestamp() < ts);
        if view == self.views.len() {
            view -= 1;
        }
        Cursor {
            view,
            offset: self.views[view].seek_offset(ts),
        }
    }

    #[inline]
    fn timestamp_at(&self, c: Cursor) -> Timestamp {
        self.views[c.view].timestamp(c.offset)
    }
}

impl RandomAccessSeries for Span {
    fn size(&self) -> usize {
        self.ends[self.ends.len() - 1]
    }

    fn timestamp(&self, i: usize) -> Timestamp {
        let c = self.locate(i);
        self.views[c.view].timestamp(c.offset)
    }

    fn is_integer(&self, i: usize) -> bool {
        let c = self.locate(i);
        self.views[c.view].is_integer(c.offset)
    }

    fn long_value(&self, i: usize) -> i64 {
        let c = self.locate(i);
        self.views[c.view].long_value(c.offset)
    }

    fn double_value(&self, i: usize) -> f64 {
        let c = self.locate(i);
        self.views[c.view].double_value(c.offset)
    }
}

/// Plain forward iterator over every point of a span.
#[derive(Debug, Clone)]
pub struct SpanIterator<'a> {
    span: &'a Span,
    cursor: Cursor,
}

impl Iterator for SpanIterator<'_> {
    type Item = DataPoint;

    fn next(&mut self) -> Option<DataPoint> {
        let c = self.span.normalize(self.cursor)?;
        let point = self.span.views[c.view].point(c.offset);
        self.cursor = Cursor {
            view: c.view,
            offset: c.offset + 1,
        };
        Some(point)
    }
}

impl SeekableSeries for SpanIterator<'_> {
    fn seek(&mut self, timestamp: Timestamp) {
        self.cursor = self.span.seek_cursor(timestamp);
    }
}

/// Extra bit set on the packed timestamp word of floating point output values.
const FLAG_FLOAT: u64 = 0x8000_0000_0000_0000;
/// Mask removing [`FLAG_FLOAT`].
const TIME_MASK: u64 = 0x7FFF_FFFF_FFFF_FFFF;

/// Iterator that reduces every `interval` seconds of points to one point.
///
/// Buckets start at the first unread point and end `interval` seconds later (exclusive).
/// The emitted timestamp is the mean of the bucket's timestamps. The value stays an integer
/// only when every point in the bucket is one.
#[derive(Debug, Clone)]
pub struct DownsamplingIterator<'a> {
    span: &'a Span,
    interval: u64,
    aggregator: Aggregator,
    cursor: Cursor,
}

impl DownsamplingIterator<'_> {
    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn aggregator(&self) -> Aggregator {
        self.aggregator
    }

    /// Reduces the bucket starting at the current cursor. Returns the packed timestamp word,
    /// the raw value bits, and the cursor past the bucket.
    fn reduce_bucket(&self) -> Option<(u64, u64, Cursor)> {
        let span = self.span;
        let start = span.normalize(self.cursor)?;
        let bound = span.timestamp_at(start).saturating_add(self.interval);

        // Look ahead: count the bucket, sum its timestamps, check whether it is all integers.
        let mut npoints = 0u64;
        let mut ts_sum = 0u128;
        let mut integer = true;
        let mut end = start;
        while let Some(c) = span.normalize(end) {
            let view = &span.views[c.view];
            let ts = view.timestamp(c.offset);
            if npoints > 0 && ts >= bound {
                break;
            }
            npoints += 1;
            ts_sum += ts as u128;
            integer &= view.is_integer(c.offset);
            end = Cursor {
                view: c.view,
                offset: c.offset + 1,
            };
        }
        let mean = (ts_sum / npoints as u128) as u64;

        // Replay the same bucket from the saved position as a single-typed sequence.
        let replay = BucketReplay {
            span,
            cursor: start,
            bound,
        };
        let (time, value) = if integer {
            let v = self
                .aggregator
                .run_long(replay.map(|c| span.views[c.view].long_value(c.offset)));
            (mean & TIME_MASK, v as u64)
        } else {
            let v = self
                .aggregator
                .run_double(replay.map(|c| span.views[c.view].double_value(c.offset)));
            ((mean & TIME_MASK) | FLAG_FLOAT, v.to_bits())
        };
        Some((time, value, end))
    }
}

impl Iterator for DownsamplingIterator<'_> {
    type Item = DataPoint;

    fn next(&mut self) -> Option<DataPoint> {
        let (time, raw, end) = self.reduce_bucket()?;
        self.cursor = end;
        let value = if time & FLAG_FLOAT == 0 {
            Value::Integer(raw as i64)
        } else {
            Value::Float(f64::from_bits(raw))
        };
        Some(DataPoint {
            timestamp: time & TIME_MASK,
            value,
        })
    }
}

impl SeekableSeries for DownsamplingIterator<'_> {
    fn seek(&mut self, timestamp: Timestamp) {
        self.cursor = self.span.seek_cursor(timestamp);
    }
}

/// Lazy sequence of the positions inside one bucket, consumed once by an aggregator.
struct BucketReplay<'a> {
    span: &'a Span,
    cursor: Cursor,
    bound: Timestamp,
}

impl Iterator for BucketReplay<'_> {
    type Item = Cursor;

    fn next(&mut self) -> Option<Cursor> {
        let c = self.span.normalize(self.cursor)?;
        if self.span.timestamp_at(c) >= self.bound {
            return None;
        }
        self.cursor = Cursor {
            view: c.view,
            offset: c.offset + 1,
        };
        Some(c)
    }
}
