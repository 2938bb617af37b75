use std::sync::Arc;
use std::time::Duration;

/// Structured, in-process event hook for observability.
///
/// The engine is a library and never logs on its own. Callers plug in an implementation that
/// forwards these events to `tracing`, metrics or custom sinks ([`TracingEventListener`] does
/// the first).
pub trait QueryEventListener: std::fmt::Debug + Send + Sync + 'static {
    fn on_event(&self, event: QueryEvent);
}

/// Structured events emitted while planning, scanning and grouping.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryEvent {
    /// A scan finished. `rows` counts rows returned by storage.
    ScanCompleted {
        metric: String,
        rows: u64,
        series: usize,
        duration: Duration,
    },

    /// A row whose first point does not come after the series' last point was dropped.
    RowOutOfOrder {
        key: Vec<u8>,
        first_timestamp: u64,
        previous_timestamp: u64,
    },

    /// A row carrying an excluded tag was skipped client side.
    RowSkipped { key: Vec<u8> },

    /// A series lacks one of the group-by tags and cannot be placed in a group.
    SpanDroppedNoGroup { key: Vec<u8> },

    /// A value of a `|` or space separated list has no identifier and was left out.
    UnknownTagValueSkipped { tag: String, value: String },

    /// Placeholder series synthesized for an availability query.
    EmptySpansInserted { metric: String, count: usize },
}

#[derive(Debug)]
pub struct NoopEventListener;

impl QueryEventListener for NoopEventListener {
    #[inline]
    fn on_event(&self, _event: QueryEvent) {}
}

pub fn noop_event_listener() -> Arc<dyn QueryEventListener> {
    Arc::new(NoopEventListener)
}

/// Forwards events to `tracing`: data anomalies at `warn`, the rest at `debug`.
#[derive(Debug, Default)]
pub struct TracingEventListener;

impl QueryEventListener for TracingEventListener {
    fn on_event(&self, event: QueryEvent) {
        match event {
            QueryEvent::ScanCompleted {
                metric,
                rows,
                series,
                duration,
            } => tracing::debug!(
                %metric,
                rows,
                series,
                elapsed_ms = duration.as_secs_f64() * 1e3,
                "scan completed"
            ),
            QueryEvent::RowOutOfOrder {
                key,
                first_timestamp,
                previous_timestamp,
            } => tracing::warn!(
                key = ?key,
                first_timestamp,
                previous_timestamp,
                "dropping out of order row"
            ),
            QueryEvent::RowSkipped { key } => {
                tracing::debug!(key = ?key, "skipping row with excluded tag")
            }
            QueryEvent::SpanDroppedNoGroup { key } => tracing::warn!(
                key = ?key,
                "dropping series without a matching group-by tag"
            ),
            QueryEvent::UnknownTagValueSkipped { tag, value } => {
                tracing::warn!(%tag, %value, "ignoring unknown tag value")
            }
            QueryEvent::EmptySpansInserted { metric, count } => {
                tracing::debug!(%metric, count, "inserted empty spans")
            }
        }
    }
}

pub fn tracing_event_listener() -> Arc<dyn QueryEventListener> {
    Arc::new(TracingEventListener)
}

/// Query metrics through the `metrics` facade.
///
/// Recording is effectively a no-op until the application installs a recorder.
pub mod query_metrics {
    use super::Duration;
    use ::metrics::{describe_counter, describe_histogram, Unit};

    // Counters are exposed as `<name>_total` by the Prometheus exporter.
    pub const SCAN_DURATION_SECONDS: &str = "tsq_scan_duration_seconds";
    pub const SCAN_ROWS: &str = "tsq_scan_rows";
    pub const ROWS_OUT_OF_ORDER: &str = "tsq_rows_out_of_order";
    pub const EMPTY_SPANS: &str = "tsq_empty_spans";
    pub const QUERIES: &str = "tsq_queries";

    #[inline]
    pub fn record_scan(duration: Duration, rows: u64) {
        ::metrics::histogram!(SCAN_DURATION_SECONDS).record(duration.as_secs_f64());
        if rows > 0 {
            ::metrics::counter!(SCAN_ROWS).increment(rows);
        }
    }

    #[inline]
    pub fn record_out_of_order(rows: u64) {
        if rows > 0 {
            ::metrics::counter!(ROWS_OUT_OF_ORDER).increment(rows);
        }
    }

    #[inline]
    pub fn record_empty_spans(count: u64) {
        if count > 0 {
            ::metrics::counter!(EMPTY_SPANS).increment(count);
        }
    }

    #[inline]
    pub fn record_query() {
        ::metrics::counter!(QUERIES).increment(1);
    }

    /// Registers descriptions for every metric above with the installed recorder.
    pub fn describe_all() {
        describe_histogram!(
            SCAN_DURATION_SECONDS,
            Unit::Seconds,
            "Time spent scanning and assembling rows for one query."
        );
        describe_counter!(SCAN_ROWS, Unit::Count, "Rows returned by storage scans.");
        describe_counter!(
            ROWS_OUT_OF_ORDER,
            Unit::Count,
            "Rows dropped because they were not after the series' last point."
        );
        describe_counter!(
            EMPTY_SPANS,
            Unit::Count,
            "Placeholder series synthesized for availability queries."
        );
        describe_counter!(QUERIES, Unit::Count, "Queries executed.");
    }
}
