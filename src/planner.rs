//! Query planning: resolves names, classifies tag constraints, pads the scan range and builds
//! the row key filter.
//!
//! Tag constraint syntax:
//!
//! | value          | meaning                                                   |
//! |----------------|-----------------------------------------------------------|
//! | `web01`        | exact match                                               |
//! | `*`            | group by every value                                      |
//! | `a\|b\|c`      | one output group per listed value                         |
//! | `a b c`        | the listed values aggregated into a single output group   |
//! | `<empty>`      | rows carrying this tag are excluded                       |

use crate::aggregator::Aggregator;
use crate::config::{AvailabilityConfig, EngineConfig};
use crate::error::QueryError;
use crate::filter::ScanFilter;
use crate::gapfill::GapFillParams;
use crate::rowkey::{sort_tags, RowKeyCodec, TagPair};
use crate::storage::ScanRequest;
use crate::telemetry::{QueryEvent, QueryEventListener};
use crate::types::{TagSet, Timestamp, Value};
use crate::uid::{IdKind, UniqueIdResolver};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Tag value requesting one group per distinct value.
pub const WILDCARD: &str = "*";
/// Tag value excluding every row that carries the tag.
pub const EXCLUDED: &str = "<empty>";

/// Gap filling requested by an availability query. An interval of 0 takes the configured one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Availability {
    pub interval: u64,
    pub fallback: Value,
}

impl From<&AvailabilityConfig> for Availability {
    fn from(config: &AvailabilityConfig) -> Self {
        Self {
            interval: config.interval_secs,
            fallback: config.fallback_value(),
        }
    }
}

/// A query as received from the outer surface.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub metric: String,
    /// `(tag name, constraint)` pairs in the syntax of the module docs.
    pub tags: Vec<(String, String)>,
    pub aggregator: Aggregator,
    pub rate: bool,
    pub downsample: Option<(u64, Aggregator)>,
    pub start: Timestamp,
    pub end: Timestamp,
    pub availability: Option<Availability>,
}

impl QueryRequest {
    pub fn new(metric: impl Into<String>, start: Timestamp, end: Timestamp) -> Self {
        Self {
            metric: metric.into(),
            tags: Vec::new(),
            aggregator: Aggregator::Sum,
            rate: false,
            downsample: None,
            start,
            end,
            availability: None,
        }
    }

    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((name.into(), value.into()));
        self
    }

    pub fn aggregator(mut self, aggregator: Aggregator) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn rate(mut self, rate: bool) -> Self {
        self.rate = rate;
        self
    }

    pub fn downsample(mut self, interval: u64, aggregator: Aggregator) -> Self {
        self.downsample = Some((interval, aggregator));
        self
    }

    pub fn availability(mut self, interval: u64, fallback: Value) -> Self {
        self.availability = Some(Availability { interval, fallback });
        self
    }
}

/// How a group-by tag partitions the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMode {
    /// `*`: one group per value found.
    Any,
    /// `a|b`: one group per listed value.
    PerValueGroups(Vec<Vec<u8>>),
    /// `a b`: every listed value in one group.
    CollapsedAggregate(Vec<Vec<u8>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupBy {
    pub name: String,
    pub name_id: Vec<u8>,
    pub mode: GroupMode,
}

/// The resolved, validated form of a [`QueryRequest`].
#[derive(Debug, Clone)]
pub struct QueryPlan {
    metric: String,
    metric_id: Vec<u8>,
    start: Timestamp,
    end: Timestamp,
    scan_start: Timestamp,
    scan_end: Timestamp,
    exact: Vec<TagPair>,
    group_bys: Vec<GroupBy>,
    excluded: Vec<Vec<u8>>,
    display_tags: TagSet,
    filter: Option<ScanFilter>,
    aggregator: Aggregator,
    rate: bool,
    downsample: Option<(u64, Aggregator)>,
    gap_fill: Option<GapFillParams>,
}

impl QueryPlan {
    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn metric_id(&self) -> &[u8] {
        &self.metric_id
    }

    pub fn start(&self) -> Timestamp {
        self.start
    }

    pub fn end(&self) -> Timestamp {
        self.end
    }

    /// First second to scan, padded back so the row holding `start` and the one before are read.
    pub fn scan_start(&self) -> Timestamp {
        self.scan_start
    }

    /// Scan stop (exclusive), padded forward by a row and the downsample interval.
    pub fn scan_end(&self) -> Timestamp {
        self.scan_end
    }

    /// Exact `(name_id, value_id)` constraints, sorted by name id.
    pub fn exact_tags(&self) -> impl Iterator<Item = (&[u8], &[u8])> {
        self.exact.iter().map(|(n, v)| (n.as_slice(), v.as_slice()))
    }

    /// Group-by tags, sorted by name id.
    pub fn group_bys(&self) -> &[GroupBy] {
        &self.group_bys
    }

    /// Excluded tag name ids, sorted.
    pub fn excluded(&self) -> &[Vec<u8>] {
        &self.excluded
    }

    /// Display-only tags of collapsed groups, e.g. `host=a+b`.
    pub fn display_tags(&self) -> &TagSet {
        &self.display_tags
    }

    pub fn filter(&self) -> Option<&ScanFilter> {
        self.filter.as_ref()
    }

    pub fn aggregator(&self) -> Aggregator {
        self.aggregator
    }

    pub fn rate(&self) -> bool {
        self.rate
    }

    pub fn downsample(&self) -> Option<(u64, Aggregator)> {
        self.downsample
    }

    pub fn gap_fill(&self) -> Option<&GapFillParams> {
        self.gap_fill.as_ref()
    }

    /// Row key range and filter for storage.
    pub fn scan_request(&self, codec: &RowKeyCodec) -> Result<ScanRequest, QueryError> {
        Ok(ScanRequest {
            start_row: codec.scan_bound(&self.metric_id, self.scan_start)?,
            stop_row: codec.scan_bound(&self.metric_id, self.scan_end)?,
            filter: self.filter.clone(),
            family: ScanRequest::DEFAULT_FAMILY.to_vec(),
        })
    }

    /// Group identity of a series key: for each group-by (name id order) the key's value id, or
    /// the tag name id for a collapsed group. `None` if the key lacks a group-by tag.
    ///
    /// Without group-bys every series belongs to the single empty key.
    pub fn group_key(&self, codec: &RowKeyCodec, key: &[u8]) -> Result<Option<Vec<u8>>, QueryError> {
        let mut group = Vec::new();
        for group_by in &self.group_bys {
            match group_by.mode {
                GroupMode::CollapsedAggregate(_) => group.extend_from_slice(&group_by.name_id),
                _ => match codec.tag_value(key, &group_by.name_id)? {
                    Some(value) => group.extend_from_slice(value),
                    None => return Ok(None),
                },
            }
        }
        Ok(Some(group))
    }
}

/// Turns requests into plans against a name directory.
pub struct QueryPlanner<'a, R: UniqueIdResolver + ?Sized> {
    resolver: &'a R,
    config: &'a EngineConfig,
    listener: Arc<dyn QueryEventListener>,
}

impl<'a, R: UniqueIdResolver + ?Sized> QueryPlanner<'a, R> {
    pub fn new(
        resolver: &'a R,
        config: &'a EngineConfig,
        listener: Arc<dyn QueryEventListener>,
    ) -> Self {
        Self {
            resolver,
            config,
            listener,
        }
    }

    pub fn plan(&self, request: &QueryRequest) -> Result<QueryPlan, QueryError> {
        let (start, end) = (request.start, request.end);
        if start >= end || end > u64::from(u32::MAX) {
            return Err(QueryError::InvalidTimeRange { start, end });
        }
        let interval = match request.downsample {
            Some((0, _)) => {
                return Err(QueryError::InvalidQuery(
                    "downsample interval must be > 0".to_string(),
                ))
            }
            Some((interval, _)) => interval,
            None => 0,
        };
        let row_span = u64::from(self.config.row_span_secs);

        let metric_id = self.resolver.get_id(IdKind::Metric, &request.metric)?;

        let mut exact = Vec::new();
        let mut group_bys = Vec::new();
        let mut excluded = Vec::new();
        let mut display_tags = TagSet::new();
        let mut seen: BTreeMap<&str, &str> = BTreeMap::new();
        for (name, constraint) in &request.tags {
            if let Some(previous) = seen.insert(name.as_str(), constraint.trim()) {
                let detail = if previous == EXCLUDED || constraint.trim() == EXCLUDED {
                    "is both constrained and excluded"
                } else {
                    "is constrained twice"
                };
                return Err(QueryError::InvalidQuery(format!("tag '{}' {}", name, detail)));
            }

            let name_id = self.resolver.get_id(IdKind::TagName, name)?;
            let constraint = constraint.trim();
            if constraint == EXCLUDED {
                excluded.push(name_id);
            } else if constraint == WILDCARD {
                group_bys.push(GroupBy {
                    name: name.clone(),
                    name_id,
                    mode: GroupMode::Any,
                });
            } else if constraint.contains('|') {
                let ids = self.resolve_list(name, constraint, constraint.split('|'))?;
                group_bys.push(GroupBy {
                    name: name.clone(),
                    name_id,
                    mode: GroupMode::PerValueGroups(ids),
                });
            } else if constraint.contains(char::is_whitespace) {
                let ids = self.resolve_list(name, constraint, constraint.split_whitespace())?;
                display_tags.insert(
                    name.clone(),
                    constraint.split_whitespace().collect::<Vec<_>>().join("+"),
                );
                group_bys.push(GroupBy {
                    name: name.clone(),
                    name_id,
                    mode: GroupMode::CollapsedAggregate(ids),
                });
            } else {
                let value_id = self.resolver.get_id(IdKind::TagValue, constraint)?;
                exact.push((name_id, value_id));
            }
        }
        sort_tags(&mut exact);
        group_bys.sort_by(|a, b| a.name_id.cmp(&b.name_id));
        excluded.sort();

        let filter = ScanFilter::build(self.config.widths, &exact, &group_bys, &excluded)?;
        let gap_fill = request
            .availability
            .map(|a| {
                let interval = match a.interval {
                    0 => self.config.availability.interval_secs,
                    n => n,
                };
                GapFillParams::new(interval, a.fallback, start, end)
            })
            .transpose()?;

        Ok(QueryPlan {
            metric: request.metric.clone(),
            metric_id,
            start,
            end,
            scan_start: start.saturating_sub(row_span.saturating_mul(2).saturating_add(interval)),
            scan_end: end
                .saturating_add(row_span + 1)
                .saturating_add(interval),
            exact,
            group_bys,
            excluded,
            display_tags,
            filter,
            aggregator: request.aggregator,
            rate: request.rate,
            downsample: request.downsample,
            gap_fill,
        })
    }

    /// Resolves a value list, skipping unknown values. Fails if none resolve.
    fn resolve_list<'v>(
        &self,
        tag: &str,
        constraint: &str,
        values: impl Iterator<Item = &'v str>,
    ) -> Result<Vec<Vec<u8>>, QueryError> {
        let mut ids = Vec::new();
        for value in values.map(str::trim).filter(|v| !v.is_empty()) {
            match self.resolver.get_id(IdKind::TagValue, value) {
                Ok(id) => ids.push(id),
                Err(QueryError::NoSuchName { .. }) => {
                    self.listener.on_event(QueryEvent::UnknownTagValueSkipped {
                        tag: tag.to_string(),
                        value: value.to_string(),
                    })
                }
                Err(e) => return Err(e),
            }
        }
        if ids.is_empty() {
            return Err(QueryError::NoSuchName {
                kind: IdKind::TagValue.as_str(),
                name: constraint.to_string(),
            });
        }
        ids.sort();
        ids.dedup();
        Ok(ids)
    }
}
