#![doc = include_str!("../README.md")]
// Declare modules
pub mod aggregator;
pub mod assembler;
pub mod config;
pub mod error;
pub mod executor;
pub mod filter;
pub mod gapfill;
pub mod planner;
pub mod query;
pub mod rowkey;
pub mod rowseq;
pub mod series;
pub mod span;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod uid;

/// Named streaming reducers (`sum`, `min`, `max`, `avg`, `dev`, `pctN`).
pub use crate::aggregator::Aggregator;
/// Folds scanned rows into per-series spans.
pub use crate::assembler::{AssemblyStats, SpanAssembler};
/// Configuration options for the query engine.
pub use crate::config::{AvailabilityConfig, EngineConfig, KeyWidths};
/// Error type for query operations.
pub use crate::error::QueryError;
/// Bounded worker pool for independent queries.
pub use crate::executor::QueryExecutor;
/// Row key filter pushed down to storage.
pub use crate::filter::ScanFilter;
/// Gap filling for availability metrics.
pub use crate::gapfill::{EmptySpan, GapFillIterator, GapFillParams, GapFillSpan};
/// Query requests and plans.
pub use crate::planner::{Availability, GroupBy, GroupMode, QueryPlan, QueryPlanner, QueryRequest};
/// Main entry point for running queries.
pub use crate::query::{
    AggregationParams, GroupAggregator, PointwiseAggregator, QueryEngine, ResultSeries, SpanGroup,
};
/// Binary row key codec.
pub use crate::rowkey::{RowKeyCodec, SeriesKey};
/// Decoded storage rows.
pub use crate::rowseq::{Cell, PointSequence, RowSequence, RowView, StorageRow};
/// One assembled series of any kind.
pub use crate::series::{SeriesIter, SeriesSpan};
/// Random-access span over row views and its iterators.
pub use crate::span::{DownsamplingIterator, Span, SpanIterator};
/// Storage collaborator contract and in-memory implementation.
pub use crate::storage::{MemoryRowStore, RowScanner, RowStore, ScanRequest};
/// Structured event hook for observability.
pub use crate::telemetry::{QueryEvent, QueryEventListener, TracingEventListener};
/// Core data types.
pub use crate::types::{
    DataPoint, RandomAccessSeries, SeekableSeries, TagSet, Timestamp, Value,
};
/// Name ↔ identifier resolution.
pub use crate::uid::{IdKind, MemoryDirectory, UniqueIdResolver};
