use crate::aggregator::Aggregator;
use crate::assembler::SpanAssembler;
use crate::config::EngineConfig;
use crate::error::QueryError;
use crate::gapfill::insert_empty_spans;
use crate::planner::{QueryPlan, QueryPlanner, QueryRequest};
use crate::rowkey::{RowKeyCodec, SeriesKey};
use crate::series::SeriesSpan;
use crate::storage::RowStore;
use crate::telemetry::{noop_event_listener, query_metrics, QueryEvent, QueryEventListener};
use crate::types::{DataPoint, SeekableSeries, TagSet, Timestamp, Value};
use crate::uid::{IdKind, UniqueIdResolver};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

/// Everything a [`GroupAggregator`] needs besides the spans.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregationParams {
    pub start: Timestamp,
    pub end: Timestamp,
    pub rate: bool,
    pub aggregator: Aggregator,
    pub downsample: Option<(u64, Aggregator)>,
}

impl AggregationParams {
    pub fn from_plan(plan: &QueryPlan) -> Self {
        Self {
            start: plan.start(),
            end: plan.end(),
            rate: plan.rate(),
            aggregator: plan.aggregator(),
            downsample: plan.downsample(),
        }
    }
}

/// One series of a group, with its tags resolved to names.
#[derive(Debug, Clone)]
pub struct GroupMember {
    pub key: SeriesKey,
    pub tags: TagSet,
    pub span: SeriesSpan,
}

/// Series sharing one group key.
#[derive(Debug, Clone)]
pub struct SpanGroup {
    pub group_key: Vec<u8>,
    pub metric: String,
    /// Display-only tags of collapsed group-bys (`host=a+b`).
    pub display_tags: TagSet,
    pub members: Vec<GroupMember>,
}

impl SpanGroup {
    /// Tags with the same value in every member, overlaid with the display tags.
    pub fn common_tags(&self) -> TagSet {
        let mut members = self.members.iter();
        let mut common = match members.next() {
            Some(first) => first.tags.clone(),
            None => TagSet::new(),
        };
        for member in members {
            common.retain(|name, value| member.tags.get(name) == Some(&*value));
        }
        for (name, value) in &self.display_tags {
            common.insert(name.clone(), value.clone());
        }
        common
    }

    /// Tag names that vary across members (or are missing from some of them).
    pub fn aggregated_tags(&self) -> Vec<String> {
        let common = self.common_tags();
        let mut names: Vec<String> = self
            .members
            .iter()
            .flat_map(|m| m.tags.keys())
            .filter(|name| !common.contains_key(*name))
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }
}

/// One externally visible result series.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSeries {
    pub metric: String,
    pub tags: TagSet,
    pub aggregated_tags: Vec<String>,
    pub points: Vec<DataPoint>,
}

/// Cross-series aggregation of one group into a result series.
pub trait GroupAggregator: std::fmt::Debug + Send + Sync {
    fn aggregate(
        &self,
        group: &SpanGroup,
        params: &AggregationParams,
    ) -> Result<ResultSeries, QueryError>;
}

/// Reference aggregator: each member is downsampled (if requested), optionally turned into a
/// per-second rate, cut to `[start, end]`, and then values at equal timestamps are reduced
/// with the query aggregator. There is no interpolation between series.
#[derive(Debug, Default, Clone, Copy)]
pub struct PointwiseAggregator;

impl PointwiseAggregator {
    fn member_points(
        member: &GroupMember,
        params: &AggregationParams,
    ) -> Result<Vec<DataPoint>, QueryError> {
        let mut iter = match params.downsample {
            Some((interval, aggregator)) => member.span.downsampler(interval, aggregator)?,
            None => member.span.iter(),
        };
        let points: Vec<DataPoint> = if params.rate {
            // Keep the point before `start` so the first rate in range has a predecessor.
            let mut raw = Vec::new();
            for p in iter {
                if p.timestamp > params.end {
                    break;
                }
                raw.push(p);
            }
            raw.windows(2)
                .filter(|w| w[1].timestamp >= params.start)
                .map(|w| {
                    let dt = (w[1].timestamp - w[0].timestamp) as f64;
                    DataPoint::float(w[1].timestamp, (w[1].value.to_f64() - w[0].value.to_f64()) / dt)
                })
                .collect()
        } else {
            iter.seek(params.start);
            iter.take_while(|p| p.timestamp <= params.end).collect()
        };
        Ok(points)
    }
}

impl GroupAggregator for PointwiseAggregator {
    fn aggregate(
        &self,
        group: &SpanGroup,
        params: &AggregationParams,
    ) -> Result<ResultSeries, QueryError> {
        let mut by_time: BTreeMap<Timestamp, Vec<Value>> = BTreeMap::new();
        for member in &group.members {
            for p in Self::member_points(member, params)? {
                by_time.entry(p.timestamp).or_default().push(p.value);
            }
        }
        let points = by_time
            .into_iter()
            .map(|(timestamp, values)| {
                let value = if values.iter().all(Value::is_integer) {
                    Value::Integer(params.aggregator.run_long(values.iter().map(Value::to_i64)))
                } else {
                    Value::Float(params.aggregator.run_double(values.iter().map(Value::to_f64)))
                };
                DataPoint { timestamp, value }
            })
            .collect();
        Ok(ResultSeries {
            metric: group.metric.clone(),
            tags: group.common_tags(),
            aggregated_tags: group.aggregated_tags(),
            points,
        })
    }
}

/// Runs queries end to end: plan, scan, assemble, synthesize empty series, group, aggregate.
///
/// A query runs on the calling thread. Independent queries can share one engine from several
/// threads (see [`crate::executor::QueryExecutor`]).
#[derive(Debug, Clone)]
pub struct QueryEngine {
    config: EngineConfig,
    codec: RowKeyCodec,
    store: Arc<dyn RowStore>,
    resolver: Arc<dyn UniqueIdResolver>,
    aggregator: Arc<dyn GroupAggregator>,
    listener: Arc<dyn QueryEventListener>,
}

impl QueryEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn RowStore>,
        resolver: Arc<dyn UniqueIdResolver>,
    ) -> Result<Self, QueryError> {
        config.validate()?;
        Ok(Self {
            codec: RowKeyCodec::new(config.widths),
            config,
            store,
            resolver,
            aggregator: Arc::new(PointwiseAggregator),
            listener: noop_event_listener(),
        })
    }

    pub fn with_group_aggregator(mut self, aggregator: Arc<dyn GroupAggregator>) -> Self {
        self.aggregator = aggregator;
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn QueryEventListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn codec(&self) -> &RowKeyCodec {
        &self.codec
    }

    pub fn plan(&self, request: &QueryRequest) -> Result<QueryPlan, QueryError> {
        QueryPlanner::new(self.resolver.as_ref(), &self.config, Arc::clone(&self.listener))
            .plan(request)
    }

    /// Scans and assembles every series of the plan. Availability plans also get an empty
    /// span for each implied tag combination that storage has no data for.
    pub fn find_spans(
        &self,
        plan: &QueryPlan,
    ) -> Result<BTreeMap<SeriesKey, SeriesSpan>, QueryError> {
        let started = Instant::now();
        let request = plan.scan_request(&self.codec)?;
        let mut scanner = self.store.scan(&request)?;
        let mut assembler = SpanAssembler::for_plan(self.codec, plan, Arc::clone(&self.listener));
        let mut rows = 0u64;
        while let Some(page) = scanner.next_rows()? {
            rows += page.len() as u64;
            assembler.add_rows(&page)?;
        }
        let (mut spans, stats) = assembler.finish()?;

        let elapsed = started.elapsed();
        query_metrics::record_scan(elapsed, rows);
        query_metrics::record_out_of_order(stats.out_of_order);
        self.listener.on_event(QueryEvent::ScanCompleted {
            metric: plan.metric().to_string(),
            rows,
            series: spans.len(),
            duration: elapsed,
        });

        if let Some(params) = plan.gap_fill() {
            let count = insert_empty_spans(
                &mut spans,
                &self.codec,
                self.resolver.as_ref(),
                plan,
                params,
            )?;
            if count > 0 {
                query_metrics::record_empty_spans(count as u64);
                self.listener.on_event(QueryEvent::EmptySpansInserted {
                    metric: plan.metric().to_string(),
                    count,
                });
            }
        }
        Ok(spans)
    }

    /// Partitions spans by group key. Series missing a group-by tag are dropped and reported.
    pub fn group(
        &self,
        plan: &QueryPlan,
        spans: BTreeMap<SeriesKey, SeriesSpan>,
    ) -> Result<Vec<SpanGroup>, QueryError> {
        let mut groups: BTreeMap<Vec<u8>, SpanGroup> = BTreeMap::new();
        for (key, span) in spans {
            let group_key = match plan.group_key(&self.codec, key.as_bytes())? {
                Some(group_key) => group_key,
                None => {
                    self.listener.on_event(QueryEvent::SpanDroppedNoGroup {
                        key: key.into_bytes(),
                    });
                    continue;
                }
            };
            let tags = match span.synthesized_tags() {
                Some(tags) => tags.clone(),
                None => self.resolve_tags(&key)?,
            };
            groups
                .entry(group_key.clone())
                .or_insert_with(|| SpanGroup {
                    group_key,
                    metric: plan.metric().to_string(),
                    display_tags: plan.display_tags().clone(),
                    members: Vec::new(),
                })
                .members
                .push(GroupMember { key, tags, span });
        }
        Ok(groups.into_values().collect())
    }

    /// Runs `request` and returns one result series per group. No matching data is `Ok(vec![])`.
    pub fn run(&self, request: &QueryRequest) -> Result<Vec<ResultSeries>, QueryError> {
        query_metrics::record_query();
        let plan = self.plan(request)?;
        let spans = self.find_spans(&plan)?;
        if spans.is_empty() {
            return Ok(Vec::new());
        }
        let params = AggregationParams::from_plan(&plan);
        self.group(&plan, spans)?
            .iter()
            .map(|group| self.aggregator.aggregate(group, &params))
            .collect()
    }

    fn resolve_tags(&self, key: &SeriesKey) -> Result<TagSet, QueryError> {
        let mut tags = TagSet::new();
        for (name, value) in self.codec.tags(key.as_bytes())? {
            tags.insert(
                self.resolver.get_name(IdKind::TagName, name)?,
                self.resolver.get_name(IdKind::TagValue, value)?,
            );
        }
        Ok(tags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gapfill::GapFillParams;
    use crate::span::Span;

    fn member(tags: &[(&str, &str)], points: Vec<DataPoint>) -> GroupMember {
        GroupMember {
            key: RowKeyCodec::new(Default::default())
                .series_key(&[0u8; 7])
                .unwrap(),
            tags: tags.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
            span: SeriesSpan::Plain(Span::from_points(points).unwrap()),
        }
    }

    fn params() -> AggregationParams {
        AggregationParams {
            start: 0,
            end: 100,
            rate: false,
            aggregator: Aggregator::Sum,
            downsample: None,
        }
    }

    #[test]
    fn common_and_aggregated_tags() {
        let group = SpanGroup {
            group_key: vec![],
            metric: "cpu".into(),
            display_tags: [("dc".to_string(), "ams+fra".to_string())].into(),
            members: vec![
                member(&[("host", "a"), ("dc", "ams"), ("role", "web")], vec![DataPoint::integer(1, 1)]),
                member(&[("host", "b"), ("dc", "fra"), ("role", "web")], vec![DataPoint::integer(1, 1)]),
            ],
        };
        let tags = group.common_tags();
        assert_eq!(tags.get("role").unwrap(), "web");
        assert_eq!(tags.get("dc").unwrap(), "ams+fra");
        assert!(!tags.contains_key("host"));
        assert_eq!(group.aggregated_tags(), vec!["host".to_string()]);
    }

    #[test]
    fn pointwise_merges_equal_timestamps_and_cuts_range() {
        let group = SpanGroup {
            group_key: vec![],
            metric: "m".into(),
            display_tags: TagSet::new(),
            members: vec![
                member(&[], vec![DataPoint::integer(10, 1), DataPoint::integer(20, 2), DataPoint::integer(200, 9)]),
                member(&[], vec![DataPoint::integer(20, 5), DataPoint::float(30, 0.5)]),
            ],
        };
        let out = PointwiseAggregator.aggregate(&group, &params()).unwrap();
        assert_eq!(
            out.points,
            vec![
                DataPoint::integer(10, 1),
                DataPoint::integer(20, 7),
                DataPoint::float(30, 0.5),
            ]
        );
    }

    #[test]
    fn pointwise_rate_and_downsample() {
        let group = SpanGroup {
            group_key: vec![],
            metric: "m".into(),
            display_tags: TagSet::new(),
            members: vec![member(
                &[],
                vec![
                    DataPoint::integer(0, 0),
                    DataPoint::integer(10, 20),
                    DataPoint::integer(20, 30),
                    DataPoint::integer(25, 40),
                ],
            )],
        };
        let mut p = params();
        p.rate = true;
        let out = PointwiseAggregator.aggregate(&group, &p).unwrap();
        assert_eq!(
            out.points,
            vec![
                DataPoint::float(10, 2.0),
                DataPoint::float(20, 1.0),
                DataPoint::float(25, 2.0),
            ]
        );

        let mut p = params();
        p.downsample = Some((20, Aggregator::Max));
        let out = PointwiseAggregator.aggregate(&group, &p).unwrap();
        assert_eq!(out.points, vec![DataPoint::integer(5, 20), DataPoint::integer(22, 40)]);
    }

    #[test]
    fn empty_members_aggregate_to_fallbacks() {
        let params_gf = GapFillParams::new(50, Value::Integer(0), 0, 100).unwrap();
        let group = SpanGroup {
            group_key: vec![],
            metric: "up".into(),
            display_tags: TagSet::new(),
            members: vec![GroupMember {
                key: RowKeyCodec::new(Default::default()).series_key(&[0u8; 7]).unwrap(),
                tags: TagSet::new(),
                span: SeriesSpan::Empty(crate::gapfill::EmptySpan::new(params_gf, "up")),
            }],
        };
        let out = PointwiseAggregator.aggregate(&group, &params()).unwrap();
        assert_eq!(out.points, vec![DataPoint::integer(0, 0), DataPoint::integer(50, 0)]);
    }
}
