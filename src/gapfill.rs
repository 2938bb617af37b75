//! Gap filling for availability metrics.
//!
//! Availability series must report a value for every aligned interval of the query range, even
//! when nothing was written. [`GapFillIterator`] decorates a real series with fallback points,
//! [`EmptySpan`] manufactures a whole series out of fallbacks, and [`insert_empty_spans`] adds
//! one empty span per tag combination the query implies but the scan did not find.

use crate::error::QueryError;
use crate::planner::{GroupMode, QueryPlan};
use crate::rowkey::{RowKeyCodec, SeriesKey, TagPair};
use crate::series::SeriesSpan;
use crate::span::{DownsamplingIterator, Span, SpanIterator};
use crate::types::{DataPoint, RandomAccessSeries, SeekableSeries, TagSet, Timestamp, Value};
use crate::uid::{IdKind, UniqueIdResolver};
use std::collections::{BTreeMap, BTreeSet};

/// Alignment interval, fallback value and `[start, end)` range of a gap-filled series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GapFillParams {
    interval: u64,
    fallback: Value,
    start: Timestamp,
    end: Timestamp,
}

impl GapFillParams {
    pub fn new(
        interval: u64,
        fallback: Value,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Self, QueryError> {
        if interval == 0 {
            return Err(QueryError::InvalidQuery(
                "gap fill interval must be > 0".to_string(),
            ));
        }
        if start >= end {
            return Err(QueryError::InvalidTimeRange { start, end });
        }
        Ok(Self {
            interval,
            fallback,
            start,
            end,
        })
    }

    pub fn interval(&self) -> u64 {
        self.interval
    }

    pub fn fallback(&self) -> Value {
        self.fallback
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// First slot boundary: `start` rounded down to the interval.
    pub fn aligned_start(&self) -> Timestamp {
        self.start - self.start % self.interval
    }

    /// Number of slot boundaries `b` with `aligned_start <= b < end`.
    pub fn slot_count(&self) -> usize {
        let span = self.end - self.aligned_start();
        span.div_ceil(self.interval) as usize
    }

    /// First boundary `>= ts` that is still inside the range.
    fn first_slot_at_or_after(&self, ts: Timestamp) -> Option<Timestamp> {
        let aligned = self.aligned_start();
        let b = if ts <= aligned {
            aligned
        } else {
            let rem = (ts - aligned) % self.interval;
            if rem == 0 {
                ts
            } else {
                ts.checked_add(self.interval - rem)?
            }
        };
        (b < self.end).then_some(b)
    }

    /// The boundary following `b`, if still inside the range.
    fn next_slot(&self, b: Timestamp) -> Option<Timestamp> {
        b.checked_add(self.interval).filter(|&nb| nb < self.end)
    }

    fn fallback_at(&self, timestamp: Timestamp) -> DataPoint {
        DataPoint {
            timestamp,
            value: self.fallback,
        }
    }
}

/// Wraps a seekable source and inserts a fallback point for every slot without real data.
///
/// Real points are always emitted, including those outside `[start, end)`. A fallback is
/// emitted at the slot boundary when the slot `[b, b + interval)` holds no real point.
#[derive(Debug, Clone)]
pub struct GapFillIterator<S> {
    source: S,
    params: GapFillParams,
    pending: Option<DataPoint>,
    next_slot: Option<Timestamp>,
}

impl<S: SeekableSeries> GapFillIterator<S> {
    pub fn new(source: S, params: GapFillParams) -> Self {
        Self {
            source,
            next_slot: Some(params.aligned_start()),
            params,
            pending: None,
        }
    }

    pub fn params(&self) -> &GapFillParams {
        &self.params
    }
}

impl<S: SeekableSeries> Iterator for GapFillIterator<S> {
    type Item = DataPoint;

    fn next(&mut self) -> Option<DataPoint> {
        if self.pending.is_none() {
            self.pending = self.source.next();
        }
        let slot = match self.next_slot {
            Some(b) => b,
            None => return self.pending.take(),
        };
        let slot_end = slot.saturating_add(self.params.interval);
        match self.pending {
            // Before the slot: part of an earlier, already covered slot or before the range.
            Some(p) if p.timestamp < slot => self.pending.take(),
            Some(p) if p.timestamp < slot_end => {
                self.next_slot = self.params.next_slot(slot);
                self.pending.take()
            }
            _ => {
                self.next_slot = self.params.next_slot(slot);
                Some(self.params.fallback_at(slot))
            }
        }
    }
}

impl<S: SeekableSeries> SeekableSeries for GapFillIterator<S> {
    fn seek(&mut self, timestamp: Timestamp) {
        self.source.seek(timestamp);
        self.pending = None;
        self.next_slot = self.params.first_slot_at_or_after(timestamp);
    }
}

/// A real span whose iterators are gap filled.
#[derive(Debug, Clone)]
pub struct GapFillSpan {
    span: Span,
    params: GapFillParams,
}

impl GapFillSpan {
    pub fn new(span: Span, params: GapFillParams) -> Self {
        Self { span, params }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn params(&self) -> &GapFillParams {
        &self.params
    }

    pub fn iter(&self) -> GapFillIterator<SpanIterator<'_>> {
        GapFillIterator::new(self.span.iter(), self.params)
    }

    /// Downsamples the real points, then fills the slots left without output.
    pub fn downsampler(
        &self,
        interval: u64,
        aggregator: crate::aggregator::Aggregator,
    ) -> Result<GapFillIterator<DownsamplingIterator<'_>>, QueryError> {
        Ok(GapFillIterator::new(
            self.span.downsampler(interval, aggregator)?,
            self.params,
        ))
    }
}

/// A series with no backing rows: the fallback value at every slot boundary.
#[derive(Debug, Clone)]
pub struct EmptySpan {
    params: GapFillParams,
    metric: String,
    tags: TagSet,
}

impl EmptySpan {
    pub fn new(params: GapFillParams, metric: impl Into<String>) -> Self {
        Self {
            params,
            metric: metric.into(),
            tags: TagSet::new(),
        }
    }

    pub fn add_tag(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.tags.insert(name.into(), value.into());
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn params(&self) -> &GapFillParams {
        &self.params
    }

    pub fn iter(&self) -> EmptyIterator {
        EmptyIterator {
            params: self.params,
            index: 0,
            len: self.size(),
        }
    }
}

impl RandomAccessSeries for EmptySpan {
    fn size(&self) -> usize {
        self.params.slot_count()
    }

    fn timestamp(&self, i: usize) -> Timestamp {
        self.params.aligned_start() + i as u64 * self.params.interval
    }

    fn is_integer(&self, _i: usize) -> bool {
        self.params.fallback.is_integer()
    }

    fn long_value(&self, _i: usize) -> i64 {
        self.params.fallback.to_i64()
    }

    fn double_value(&self, _i: usize) -> f64 {
        self.params.fallback.to_f64()
    }

    fn value(&self, _i: usize) -> Value {
        self.params.fallback
    }
}

/// Iterator over the slot boundaries of an [`EmptySpan`].
#[derive(Debug, Clone)]
pub struct EmptyIterator {
    params: GapFillParams,
    index: usize,
    len: usize,
}

impl Iterator for EmptyIterator {
    type Item = DataPoint;

    fn next(&mut self) -> Option<DataPoint> {
        if self.index >= self.len {
            return None;
        }
        let ts = self.params.aligned_start() + self.index as u64 * self.params.interval;
        self.index += 1;
        Some(self.params.fallback_at(ts))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.len - self.index.min(self.len);
        (n, Some(n))
    }
}

impl SeekableSeries for EmptyIterator {
    fn seek(&mut self, timestamp: Timestamp) {
        self.index = match self.params.first_slot_at_or_after(timestamp) {
            Some(b) => ((b - self.params.aligned_start()) / self.params.interval) as usize,
            None => self.len,
        };
    }
}

/// Adds an [`EmptySpan`] for every tag combination implied by `plan` that has no series in
/// `spans`. Returns how many were inserted.
///
/// Each exact tag contributes its single value and each per-value or collapsed group-by its
/// value list; `*` group-bys cannot be enumerated and are left out of the combinations. The
/// cross product is walked odometer style, and combinations are keyed by their canonical
/// (timestamp-less) row key.
pub fn insert_empty_spans(
    spans: &mut BTreeMap<SeriesKey, SeriesSpan>,
    codec: &RowKeyCodec,
    resolver: &dyn UniqueIdResolver,
    plan: &QueryPlan,
    params: &GapFillParams,
) -> Result<usize, QueryError> {
    let mut choices: BTreeMap<&[u8], BTreeSet<&[u8]>> = BTreeMap::new();
    for (name, value) in plan.exact_tags() {
        choices.entry(name).or_default().insert(value);
    }
    for group_by in plan.group_bys() {
        let values = match &group_by.mode {
            GroupMode::Any => continue,
            GroupMode::PerValueGroups(ids) | GroupMode::CollapsedAggregate(ids) => ids,
        };
        let entry = choices.entry(group_by.name_id.as_slice()).or_default();
        entry.extend(values.iter().map(Vec::as_slice));
    }
    if choices.is_empty() || choices.values().any(BTreeSet::is_empty) {
        return Ok(0);
    }

    let dims: Vec<(&[u8], Vec<&[u8]>)> = choices
        .into_iter()
        .map(|(name, values)| (name, values.into_iter().collect()))
        .collect();
    let mut odometer = vec![0usize; dims.len()];
    let mut inserted = 0;
    loop {
        let mut tags: Vec<TagPair> = dims
            .iter()
            .zip(&odometer)
            .map(|((name, values), &i)| (name.to_vec(), values[i].to_vec()))
            .collect();
        let key = codec.series_key(&codec.encode(plan.metric_id(), &mut tags)?)?;
        if !spans.contains_key(&key) {
            let mut empty = EmptySpan::new(*params, plan.metric());
            for (name, value) in &tags {
                empty.add_tag(
                    resolver.get_name(IdKind::TagName, name)?,
                    resolver.get_name(IdKind::TagValue, value)?,
                );
            }
            spans.insert(key, SeriesSpan::Empty(empty));
            inserted += 1;
        }

        // Advance the rightmost wheel; carry to the left when it wraps.
        let mut wheel = dims.len();
        loop {
            if wheel == 0 {
                return Ok(inserted);
            }
            wheel -= 1;
            odometer[wheel] += 1;
            if odometer[wheel] < dims[wheel].1.len() {
                break;
            }
            odometer[wheel] = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(start: u64, end: u64, interval: u64) -> GapFillParams {
        GapFillParams::new(interval, Value::Float(0.0), start, end).unwrap()
    }

    fn timestamps<I: Iterator<Item = DataPoint>>(it: I) -> Vec<u64> {
        it.map(|p| p.timestamp).collect()
    }

    #[test]
    fn rejects_zero_interval_and_empty_range() {
        assert!(GapFillParams::new(0, Value::Integer(0), 0, 10).is_err());
        assert!(matches!(
            GapFillParams::new(10, Value::Integer(0), 10, 10),
            Err(QueryError::InvalidTimeRange { .. })
        ));
    }

    #[test]
    fn one_point_per_slot_real_point_kept() {
        let span = Span::from_points(vec![DataPoint::integer(15, 7)]).unwrap();
        let filled: Vec<_> = GapFillIterator::new(span.iter(), params(0, 30, 10)).collect();
        assert_eq!(
            filled,
            vec![
                DataPoint::float(0, 0.0),
                DataPoint::integer(15, 7),
                DataPoint::float(20, 0.0),
            ]
        );
    }

    #[test]
    fn alignment_rounds_start_down() {
        let p = params(25, 61, 10);
        assert_eq!(p.aligned_start(), 20);
        assert_eq!(p.slot_count(), 5);
        let empty = EmptySpan::new(p, "m");
        assert_eq!(timestamps(empty.iter()), vec![20, 30, 40, 50, 60]);
        assert_eq!(empty.size(), 5);
        assert_eq!(empty.timestamp(4), 60);
        assert_eq!(empty.value(2), Value::Float(0.0));
    }

    #[test]
    fn points_outside_range_are_not_dropped() {
        let span = Span::from_points(vec![
            DataPoint::integer(3, 1),
            DataPoint::integer(12, 1),
            DataPoint::integer(14, 1),
            DataPoint::integer(45, 1),
        ])
        .unwrap();
        let got = timestamps(GapFillIterator::new(span.iter(), params(10, 30, 10)));
        assert_eq!(got, vec![3, 12, 14, 20, 45]);
    }

    #[test]
    fn seek_skips_earlier_slots() {
        let span = Span::from_points(vec![DataPoint::integer(5, 1), DataPoint::integer(35, 1)])
            .unwrap();
        let mut it = GapFillIterator::new(span.iter(), params(0, 50, 10));
        it.seek(21);
        // slot 30 holds the real point 35
        assert_eq!(timestamps(it), vec![35, 40]);

        let mut empty = EmptySpan::new(params(0, 50, 10), "m").iter();
        empty.seek(21);
        assert_eq!(timestamps(empty.clone()), vec![30, 40]);
        empty.seek(50);
        assert_eq!(empty.next(), None);
    }

    #[test]
    fn integer_fallback_keeps_type() {
        let p = GapFillParams::new(10, Value::Integer(1), 0, 20).unwrap();
        let empty = EmptySpan::new(p, "m");
        assert!(empty.is_integer(0));
        assert_eq!(empty.iter().next(), Some(DataPoint::integer(0, 1)));
    }
}
