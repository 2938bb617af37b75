//! Folds scanned storage rows into one span per series.

use crate::error::QueryError;
use crate::gapfill::{GapFillParams, GapFillSpan};
use crate::planner::QueryPlan;
use crate::rowkey::{RowKeyCodec, SeriesKey};
use crate::rowseq::{can_time_delta_fit, RowSequence, RowView, StorageRow};
use crate::series::SeriesSpan;
use crate::span::Span;
use crate::telemetry::{noop_event_listener, QueryEvent, QueryEventListener};
use crate::types::Timestamp;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Counters collected while assembling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    /// Rows accepted into a series.
    pub rows: u64,
    /// Rows skipped because they carry an excluded tag.
    pub skipped: u64,
    /// Rows dropped because they did not start after the series' last point.
    pub out_of_order: u64,
}

/// Assembles rows of one metric into per-series spans.
///
/// Rows of a series must arrive in time order, as a key-ordered scan yields them. A row is
/// merged into the series' last [`RowSequence`] while its points stay within the qualifier
/// delta range of that sequence's base time.
#[derive(Debug)]
pub struct SpanAssembler {
    codec: RowKeyCodec,
    metric_id: Vec<u8>,
    excluded: Vec<Vec<u8>>,
    gap_fill: Option<GapFillParams>,
    listener: Arc<dyn QueryEventListener>,
    series: BTreeMap<SeriesKey, Vec<RowSequence>>,
    stats: AssemblyStats,
}

impl SpanAssembler {
    pub fn new(codec: RowKeyCodec, metric_id: Vec<u8>) -> Self {
        Self {
            codec,
            metric_id,
            excluded: Vec::new(),
            gap_fill: None,
            listener: noop_event_listener(),
            series: BTreeMap::new(),
            stats: AssemblyStats::default(),
        }
    }

    /// Assembler configured from a query plan (metric, exclusions, gap filling).
    pub fn for_plan(
        codec: RowKeyCodec,
        plan: &QueryPlan,
        listener: Arc<dyn QueryEventListener>,
    ) -> Self {
        let mut assembler = Self::new(codec, plan.metric_id().to_vec())
            .excluding(plan.excluded().to_vec())
            .with_listener(listener);
        assembler.gap_fill = plan.gap_fill().copied();
        assembler
    }

    /// Rows carrying any of these tag name ids are skipped.
    pub fn excluding(mut self, mut names: Vec<Vec<u8>>) -> Self {
        names.sort();
        names.dedup();
        self.excluded = names;
        self
    }

    /// Publishes gap-filled spans instead of plain ones.
    pub fn with_gap_fill(mut self, params: GapFillParams) -> Self {
        self.gap_fill = Some(params);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn QueryEventListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn stats(&self) -> AssemblyStats {
        self.stats
    }

    pub fn add_rows<'r, I: IntoIterator<Item = &'r StorageRow>>(
        &mut self,
        rows: I,
    ) -> Result<(), QueryError> {
        for row in rows {
            self.add_row(row)?;
        }
        Ok(())
    }

    pub fn add_row(&mut self, row: &StorageRow) -> Result<(), QueryError> {
        let key = &row.key;
        self.codec.tag_count(key)?;
        if self.codec.metric_id(key)? != self.metric_id.as_slice() {
            return Err(QueryError::IllegalData(format!(
                "row {:02x?} does not belong to metric {:02x?}",
                key, self.metric_id
            )));
        }
        if self.is_excluded(key)? {
            self.stats.skipped += 1;
            self.listener
                .on_event(QueryEvent::RowSkipped { key: key.clone() });
            return Ok(());
        }

        let seq = RowSequence::from_row(&self.codec, row)?;
        let series_key = self.codec.series_key(key)?;
        let rows = self.series.entry(series_key).or_default();
        if let Some(last) = rows.last_mut() {
            if !self.codec.same_series(last.key(), key) {
                return Err(QueryError::IllegalData(format!(
                    "row {:02x?} does not match series row {:02x?}",
                    key,
                    last.key()
                )));
            }
            let previous: Timestamp = last.last_timestamp();
            if seq.first_timestamp() <= previous {
                self.stats.out_of_order += 1;
                self.listener.on_event(QueryEvent::RowOutOfOrder {
                    key: key.clone(),
                    first_timestamp: seq.first_timestamp(),
                    previous_timestamp: previous,
                });
                return Ok(());
            }
            let base = Timestamp::from(last.base_time());
            if seq.base_time() >= last.base_time()
                && can_time_delta_fit(seq.last_timestamp() - base)
            {
                last.absorb(seq);
                self.stats.rows += 1;
                return Ok(());
            }
        }
        rows.push(seq);
        self.stats.rows += 1;
        Ok(())
    }

    /// Publishes one span per series, ordered by series key.
    pub fn finish(self) -> Result<(BTreeMap<SeriesKey, SeriesSpan>, AssemblyStats), QueryError> {
        let mut spans = BTreeMap::new();
        for (key, rows) in self.series {
            let span = Span::new(rows.into_iter().map(RowView::from).collect())?;
            let span = match self.gap_fill {
                Some(params) => SeriesSpan::GapFill(GapFillSpan::new(span, params)),
                None => SeriesSpan::Plain(span),
            };
            spans.insert(key, span);
        }
        Ok((spans, self.stats))
    }

    fn is_excluded(&self, key: &[u8]) -> Result<bool, QueryError> {
        if self.excluded.is_empty() {
            return Ok(false);
        }
        Ok(self
            .codec
            .tags(key)?
            .any(|(name, _)| self.excluded.iter().any(|e| e.as_slice() == name)))
    }
}
