use proptest::prelude::*;
use std::collections::BTreeMap;

use tsq::{
    Aggregator, DataPoint, EngineConfig, KeyWidths, MemoryRowStore, RowKeyCodec, RowStore,
    ScanRequest, SeekableSeries, Span, SpanAssembler, Value,
};

fn span_of(points: &BTreeMap<u64, i64>) -> Span {
    Span::from_points(
        points
            .iter()
            .map(|(&ts, &v)| DataPoint::integer(ts, v))
            .collect(),
    )
    .unwrap()
}

/// Writes `points` through the in-memory store and assembles them back from a scan.
fn assembled(points: &BTreeMap<u64, i64>, compact: bool) -> Span {
    let config = EngineConfig {
        widths: KeyWidths::new(1, 1, 1),
        scan_page_size: 3,
        ..EngineConfig::default()
    };
    let store = MemoryRowStore::new(&config);
    let tags = vec![(vec![1], vec![1])];
    for (&ts, &v) in points {
        store.put_point(&[1], &tags, DataPoint::integer(ts, v)).unwrap();
    }
    if compact {
        store.compact().unwrap();
    }

    let codec = RowKeyCodec::new(config.widths);
    let request = ScanRequest {
        start_row: codec.scan_bound(&[1], 0).unwrap(),
        stop_row: codec.scan_bound(&[1], u64::MAX).unwrap(),
        filter: None,
        family: ScanRequest::DEFAULT_FAMILY.to_vec(),
    };
    let mut scanner = store.scan(&request).unwrap();
    let mut assembler = SpanAssembler::new(codec, vec![1]);
    while let Some(page) = scanner.next_rows().unwrap() {
        assembler.add_rows(&page).unwrap();
    }
    let (spans, stats) = assembler.finish().unwrap();
    assert_eq!(stats.out_of_order, 0);
    assert_eq!(spans.len(), 1);
    spans.into_values().next().unwrap().stored().unwrap().clone()
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_assembly_preserves_points(
        points in prop::collection::btree_map(0u64..50_000, -1_000i64..1_000, 1..200),
        compact in any::<bool>(),
    ) {
        let span = assembled(&points, compact);
        let got: Vec<_> = span.iter().map(|p| (p.timestamp, p.value)).collect();
        let want: Vec<_> = points.iter().map(|(&t, &v)| (t, Value::Integer(v))).collect();
        prop_assert_eq!(got, want);
    }

    #[test]
    fn prop_integer_sum_is_preserved_by_downsampling(
        points in prop::collection::btree_map(0u64..100_000, -1_000i64..1_000, 1..200),
        interval in 1u64..5_000,
    ) {
        let span = span_of(&points);
        let first = *points.keys().next().unwrap();
        let last = *points.keys().last().unwrap();
        let out: Vec<_> = span.downsampler(interval, Aggregator::Sum).unwrap().collect();

        prop_assert!(out.len() <= points.len());
        prop_assert!(out.iter().all(|p| p.is_integer()));
        prop_assert!(out.iter().all(|p| p.timestamp >= first && p.timestamp <= last));
        prop_assert!(out.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        let total: i64 = out.iter().map(|p| p.value.to_i64()).sum();
        prop_assert_eq!(total, points.values().sum::<i64>());
    }

    #[test]
    fn prop_seek_yields_the_suffix(
        points in prop::collection::btree_map(0u64..100_000, -1_000i64..1_000, 1..200),
        target in 0u64..110_000,
    ) {
        let span = span_of(&points);
        let mut iter = span.iter();
        iter.seek(target);
        let got: Vec<_> = iter.map(|p| p.timestamp).collect();
        let want: Vec<_> = points.range(target..).map(|(&t, _)| t).collect();
        prop_assert_eq!(got, want);
    }

    #[test]
    fn prop_percentiles_stay_within_bounds(
        values in prop::collection::vec(-10_000i64..10_000, 1..100),
        p in 1u8..=100,
    ) {
        let min = *values.iter().min().unwrap();
        let max = *values.iter().max().unwrap();
        let got = Aggregator::Percentile(p).run_long(values.iter().copied());
        prop_assert!(got >= min && got <= max);
        prop_assert_eq!(Aggregator::Percentile(100).run_long(values.iter().copied()), max);
        let avg = Aggregator::Avg.run_double(values.iter().map(|&v| v as f64));
        prop_assert!(avg >= min as f64 && avg <= max as f64);
    }
}

#[test]
fn mixed_bucket_is_reported_as_float() {
    let span = Span::from_points(vec![
        DataPoint::integer(0, 1),
        DataPoint::float(4, 2.5),
        DataPoint::integer(20, 7),
    ])
    .unwrap();
    let out: Vec<_> = span.downsampler(10, Aggregator::Avg).unwrap().collect();
    assert_eq!(out, vec![DataPoint::float(2, 1.75), DataPoint::integer(20, 7)]);
}

#[test]
fn downsampled_seek_starts_at_bucket_holding_target() {
    let span = Span::from_points((0..10).map(|i| DataPoint::integer(i * 10, i as i64)).collect())
        .unwrap();
    let mut iter = span.downsampler(30, Aggregator::Max).unwrap();
    iter.seek(35);
    // buckets start at the first point at or after the target: 40, 50, 60 | 70, 80, 90
    assert_eq!(
        iter.collect::<Vec<_>>(),
        vec![DataPoint::integer(50, 6), DataPoint::integer(80, 9)]
    );
}
