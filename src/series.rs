//! The closed set of per-series spans a query can produce, and their iterators.

use crate::aggregator::Aggregator;
use crate::error::QueryError;
use crate::gapfill::{EmptyIterator, EmptySpan, GapFillIterator, GapFillSpan};
use crate::span::{DownsamplingIterator, Span, SpanIterator};
use crate::types::{DataPoint, RandomAccessSeries, SeekableSeries, TagSet, Timestamp};

/// One assembled series.
#[derive(Debug, Clone)]
pub enum SeriesSpan {
    /// Points read from storage.
    Plain(Span),
    /// Points read from storage, reported with a fallback in every empty slot.
    GapFill(GapFillSpan),
    /// A series the query implies but storage does not have.
    Empty(EmptySpan),
}

impl SeriesSpan {
    pub fn iter(&self) -> SeriesIter<'_> {
        match self {
            SeriesSpan::Plain(span) => SeriesIter::Plain(span.iter()),
            SeriesSpan::GapFill(span) => SeriesIter::GapFill(span.iter()),
            SeriesSpan::Empty(span) => SeriesIter::Empty(span.iter()),
        }
    }

    /// Downsampled iteration. Empty spans already hold a single value per slot and are
    /// iterated as is.
    pub fn downsampler(
        &self,
        interval: u64,
        aggregator: Aggregator,
    ) -> Result<SeriesIter<'_>, QueryError> {
        Ok(match self {
            SeriesSpan::Plain(span) => {
                SeriesIter::Downsampled(span.downsampler(interval, aggregator)?)
            }
            SeriesSpan::GapFill(span) => {
                SeriesIter::GapFillDownsampled(span.downsampler(interval, aggregator)?)
            }
            SeriesSpan::Empty(span) => SeriesIter::Empty(span.iter()),
        })
    }

    /// Tags carried by synthesized spans. Spans read from storage are described by their
    /// row key instead.
    pub fn synthesized_tags(&self) -> Option<&TagSet> {
        match self {
            SeriesSpan::Empty(span) => Some(span.tags()),
            _ => None,
        }
    }

    /// The real points behind this series, if any.
    pub fn stored(&self) -> Option<&Span> {
        match self {
            SeriesSpan::Plain(span) => Some(span),
            SeriesSpan::GapFill(span) => Some(span.span()),
            SeriesSpan::Empty(_) => None,
        }
    }
}

impl RandomAccessSeries for SeriesSpan {
    fn size(&self) -> usize {
        match self {
            SeriesSpan::Plain(s) => s.size(),
            SeriesSpan::GapFill(s) => s.span().size(),
            SeriesSpan::Empty(s) => s.size(),
        }
    }

    fn timestamp(&self, i: usize) -> Timestamp {
        match self {
            SeriesSpan::Plain(s) => s.timestamp(i),
            SeriesSpan::GapFill(s) => s.span().timestamp(i),
            SeriesSpan::Empty(s) => s.timestamp(i),
        }
    }

    fn is_integer(&self, i: usize) -> bool {
        match self {
            SeriesSpan::Plain(s) => s.is_integer(i),
            SeriesSpan::GapFill(s) => s.span().is_integer(i),
            SeriesSpan::Empty(s) => s.is_integer(i),
        }
    }

    fn long_value(&self, i: usize) -> i64 {
        match self {
            SeriesSpan::Plain(s) => s.long_value(i),
            SeriesSpan::GapFill(s) => s.span().long_value(i),
            SeriesSpan::Empty(s) => s.long_value(i),
        }
    }

    fn double_value(&self, i: usize) -> f64 {
        match self {
            SeriesSpan::Plain(s) => s.double_value(i),
            SeriesSpan::GapFill(s) => s.span().double_value(i),
            SeriesSpan::Empty(s) => s.double_value(i),
        }
    }
}

/// Iterator over any [`SeriesSpan`], plain or downsampled.
#[derive(Debug, Clone)]
pub enum SeriesIter<'a> {
    Plain(SpanIterator<'a>),
    Downsampled(DownsamplingIterator<'a>),
    GapFill(GapFillIterator<SpanIterator<'a>>),
    GapFillDownsampled(GapFillIterator<DownsamplingIterator<'a>>),
    Empty(EmptyIterator),
}

impl Iterator for SeriesIter<'_> {
    type Item = DataPoint;

    fn next(&mut self) -> Option<DataPoint> {
        match self {
            SeriesIter::Plain(it) => it.next(),
            SeriesIter::Downsampled(it) => it.next(),
            SeriesIter::GapFill(it) => it.next(),
            SeriesIter::GapFillDownsampled(it) => it.next(),
            SeriesIter::Empty(it) => it.next(),
        }
    }
}

impl SeekableSeries for SeriesIter<'_> {
    fn seek(&mut self, timestamp: Timestamp) {
        match self {
            SeriesIter::Plain(it) => it.seek(timestamp),
            SeriesIter::Downsampled(it) => it.seek(timestamp),
            SeriesIter::GapFill(it) => it.seek(timestamp),
            SeriesIter::GapFillDownsampled(it) => it.seek(timestamp),
            SeriesIter::Empty(it) => it.seek(timestamp),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gapfill::GapFillParams;
    use crate::types::Value;

    fn span() -> Span {
        Span::from_points(vec![
            DataPoint::integer(0, 1),
            DataPoint::integer(5, 3),
            DataPoint::integer(30, 10),
        ])
        .unwrap()
    }

    #[test]
    fn variants_dispatch_iteration() {
        let plain = SeriesSpan::Plain(span());
        assert_eq!(plain.iter().count(), 3);
        let down: Vec<_> = plain.downsampler(10, Aggregator::Sum).unwrap().collect();
        assert_eq!(down, vec![DataPoint::integer(2, 4), DataPoint::integer(30, 10)]);

        let params = GapFillParams::new(10, Value::Integer(0), 0, 40).unwrap();
        let filled = SeriesSpan::GapFill(GapFillSpan::new(span(), params));
        let ts: Vec<_> = filled.iter().map(|p| p.timestamp).collect();
        assert_eq!(ts, vec![0, 5, 10, 20, 30]);
        let ts: Vec<_> = filled
            .downsampler(10, Aggregator::Max)
            .unwrap()
            .map(|p| p.timestamp)
            .collect();
        assert_eq!(ts, vec![2, 10, 20, 30]);
        assert_eq!(filled.size(), 3);
        assert!(filled.synthesized_tags().is_none());
    }

    #[test]
    fn empty_variant_reports_tags_and_fallbacks() {
        let params = GapFillParams::new(10, Value::Float(0.0), 0, 30).unwrap();
        let mut empty = EmptySpan::new(params, "uptime");
        empty.add_tag("host", "a");
        let series = SeriesSpan::Empty(empty);
        assert_eq!(series.synthesized_tags().unwrap().get("host").unwrap(), "a");
        assert!(series.stored().is_none());
        let mut it = series.downsampler(60, Aggregator::Sum).unwrap();
        it.seek(10);
        assert_eq!(it.next(), Some(DataPoint::float(10, 0.0)));
    }
}
