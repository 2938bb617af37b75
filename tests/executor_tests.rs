use std::sync::Arc;
use tsq::*;

fn executor(threads: usize) -> QueryExecutor {
    let config = EngineConfig {
        worker_threads: threads,
        ..EngineConfig::default()
    };
    let dir = Arc::new(MemoryDirectory::new(config.widths));
    let store = Arc::new(MemoryRowStore::new(&config));
    let host = dir.get_or_create_id(IdKind::TagName, "host").unwrap();
    for (m, metric) in ["cpu", "mem", "disk"].iter().enumerate() {
        let metric = dir.get_or_create_id(IdKind::Metric, metric).unwrap();
        for h in 0..4 {
            let value = dir.get_or_create_id(IdKind::TagValue, &format!("h{}", h)).unwrap();
            for ts in (0..7200).step_by(30) {
                store
                    .put_point(
                        &metric,
                        &[(host.clone(), value.clone())],
                        DataPoint::integer(ts, (m + 1) as i64),
                    )
                    .unwrap();
            }
        }
    }
    let engine = QueryEngine::new(config, store, dir).unwrap();
    QueryExecutor::new(engine).unwrap()
}

#[test]
fn pool_is_sized_from_config() {
    assert_eq!(executor(3).threads(), 3);
}

#[test]
fn run_matches_engine() {
    let ex = executor(2);
    let request = QueryRequest::new("mem", 0, 7200).tag("host", "*");
    assert_eq!(ex.run(&request).unwrap(), ex.engine().run(&request).unwrap());
}

#[test]
fn run_all_keeps_request_order_and_isolates_failures() {
    let ex = executor(4);
    let requests = vec![
        QueryRequest::new("cpu", 0, 7200),
        QueryRequest::new("nope", 0, 7200),
        QueryRequest::new("disk", 0, 7200).downsample(600, Aggregator::Avg),
        QueryRequest::new("mem", 100, 50),
        QueryRequest::new("mem", 0, 3600).tag("host", "h1|h2"),
    ];
    let results = ex.run_all(&requests);
    assert_eq!(results.len(), 5);

    let cpu = results[0].as_ref().unwrap();
    assert_eq!(cpu.len(), 1);
    assert!(cpu[0].points.iter().all(|p| p.value == Value::Integer(4)));

    assert!(matches!(results[1], Err(QueryError::NoSuchName { .. })));

    let disk = results[2].as_ref().unwrap();
    assert_eq!(disk[0].points.len(), 12);
    assert!(disk[0].points.iter().all(|p| p.value == Value::Integer(12)));

    assert!(matches!(results[3], Err(QueryError::InvalidTimeRange { .. })));
    assert_eq!(results[4].as_ref().unwrap().len(), 2);
}

#[test]
fn zero_workers_is_rejected() {
    let config = EngineConfig {
        worker_threads: 0,
        ..EngineConfig::default()
    };
    let dir = Arc::new(MemoryDirectory::new(config.widths));
    let store = Arc::new(MemoryRowStore::new(&config));
    assert!(matches!(
        QueryEngine::new(config, store, dir),
        Err(QueryError::Config(_))
    ));
}
