//! Bounded worker pool for running independent queries in parallel.

use crate::error::QueryError;
use crate::planner::QueryRequest;
use crate::query::{QueryEngine, ResultSeries};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::Arc;

/// Runs queries on a dedicated `rayon` pool sized by `EngineConfig::worker_threads`.
///
/// Each query still executes single-threaded; the pool only spreads independent queries.
#[derive(Debug)]
pub struct QueryExecutor {
    engine: Arc<QueryEngine>,
    pool: ThreadPool,
}

impl QueryExecutor {
    pub fn new(engine: QueryEngine) -> Result<Self, QueryError> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(engine.config().worker_threads)
            .thread_name(|i| format!("tsq-query-{}", i))
            .build()
            .map_err(|e| QueryError::Internal(format!("failed to build query pool: {}", e)))?;
        Ok(Self {
            engine: Arc::new(engine),
            pool,
        })
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs one query on the pool and waits for it.
    pub fn run(&self, request: &QueryRequest) -> Result<Vec<ResultSeries>, QueryError> {
        let engine = &self.engine;
        self.pool.install(|| engine.run(request))
    }

    /// Runs every request in parallel. Results keep the order of `requests`; one failing query
    /// does not affect the others.
    pub fn run_all(&self, requests: &[QueryRequest]) -> Vec<Result<Vec<ResultSeries>, QueryError>> {
        let engine = &self.engine;
        self.pool
            .install(|| requests.par_iter().map(|r| engine.run(r)).collect())
    }
}
