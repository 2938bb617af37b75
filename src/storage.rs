use crate::config::EngineConfig;
use crate::error::QueryError;
use crate::filter::ScanFilter;
use crate::rowkey::{RowKeyCodec, TagPair};
use crate::rowseq::{can_time_delta_fit, Cell, StorageRow};
use crate::types::{DataPoint, Value};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// A paged scan over `[start_row, stop_row)`.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub start_row: Vec<u8>,
    pub stop_row: Vec<u8>,
    /// Rows whose key does not match are not returned.
    pub filter: Option<ScanFilter>,
    pub family: Vec<u8>,
}

impl ScanRequest {
    /// Column family holding data points.
    pub const DEFAULT_FAMILY: &'static [u8] = b"t";
}

/// Source of pages of rows. `Ok(None)` signals exhaustion.
pub trait RowScanner: Send {
    fn next_rows(&mut self) -> Result<Option<Vec<StorageRow>>, QueryError>;
}

/// Storage collaborator: opens scanners over the row key space.
pub trait RowStore: std::fmt::Debug + Send + Sync {
    fn scan(&self, request: &ScanRequest) -> Result<Box<dyn RowScanner + '_>, QueryError>;
}

/// Simple in-memory row store, ordered by row key.
///
/// Points written through [`MemoryRowStore::put_point`] land in the row of their bucket as one
/// cell each; [`MemoryRowStore::compact`] merges every row into a single compacted cell.
/// Uses RwLock so concurrent queries can scan while the store is read-mostly.
#[derive(Debug)]
pub struct MemoryRowStore {
    rows: RwLock<BTreeMap<Vec<u8>, Vec<Cell>>>,
    codec: RowKeyCodec,
    row_span: u32,
    page_size: usize,
}

impl MemoryRowStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            rows: RwLock::new(BTreeMap::new()),
            codec: RowKeyCodec::new(config.widths),
            row_span: config.row_span_secs,
            page_size: config.scan_page_size.max(1),
        }
    }

    /// Appends the cells of `row`, creating the row if needed.
    pub fn put_row(&self, row: StorageRow) -> Result<(), QueryError> {
        self.codec.tag_count(&row.key)?;
        self.rows
            .write()?
            .entry(row.key)
            .or_default()
            .extend(row.cells);
        Ok(())
    }

    /// Writes one point into the row of its time bucket.
    pub fn put_point(
        &self,
        metric: &[u8],
        tags: &[TagPair],
        point: DataPoint,
    ) -> Result<(), QueryError> {
        let ts = u32::try_from(point.timestamp).map_err(|_| {
            QueryError::InvalidQuery(format!("timestamp {} does not fit u32", point.timestamp))
        })?;
        let base = ts - ts % self.row_span;
        let delta = ts - base;
        if !can_time_delta_fit(u64::from(delta)) {
            return Err(QueryError::Config(format!(
                "row_span_secs {} exceeds the qualifier delta range",
                self.row_span
            )));
        }
        let cell = match point.value {
            Value::Integer(v) => Cell::integer(delta as u16, v),
            Value::Float(v) => Cell::float(delta as u16, v),
        };
        let mut tags = tags.to_vec();
        let key = self.codec.encode_at(metric, base, &mut tags)?;
        self.put_row(StorageRow {
            key,
            cells: vec![cell],
        })
    }

    /// Merges the single-point cells of every row into one compacted cell, sorted by delta.
    /// Rows already holding a compacted cell are left alone.
    pub fn compact(&self) -> Result<(), QueryError> {
        let mut rows = self.rows.write()?;
        for cells in rows.values_mut() {
            if cells.len() < 2 || cells.iter().any(|c| c.qualifier.len() != 2) {
                continue;
            }
            cells.sort_by_key(|c| u16::from_be_bytes([c.qualifier[0], c.qualifier[1]]));
            cells.dedup();
            let compacted = Cell::concat(cells);
            *cells = vec![compacted];
        }
        Ok(())
    }

    /// Number of physical rows.
    pub fn len(&self) -> Result<usize, QueryError> {
        Ok(self.rows.read()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, QueryError> {
        Ok(self.len()? == 0)
    }
}

impl RowStore for MemoryRowStore {
    fn scan(&self, request: &ScanRequest) -> Result<Box<dyn RowScanner + '_>, QueryError> {
        if request.start_row > request.stop_row {
            return Err(QueryError::Storage(format!(
                "scan start {:02x?} is after stop {:02x?}",
                request.start_row, request.stop_row
            )));
        }
        if request.family != ScanRequest::DEFAULT_FAMILY {
            return Err(QueryError::Storage(format!(
                "unknown column family {:?}",
                String::from_utf8_lossy(&request.family)
            )));
        }
        // Snapshot the range so the lock is not held across pages.
        let rows: Vec<StorageRow> = self
            .rows
            .read()?
            .range(request.start_row.clone()..request.stop_row.clone())
            .filter(|(key, _)| request.filter.as_ref().map_or(true, |f| f.is_match(key)))
            .map(|(key, cells)| StorageRow {
                key: key.clone(),
                cells: cells.clone(),
            })
            .collect();
        Ok(Box::new(MemoryScanner {
            rows: rows.into_iter(),
            page_size: self.page_size,
        }))
    }
}

struct MemoryScanner {
    rows: std::vec::IntoIter<StorageRow>,
    page_size: usize,
}

impl RowScanner for MemoryScanner {
    fn next_rows(&mut self) -> Result<Option<Vec<StorageRow>>, QueryError> {
        let page: Vec<StorageRow> = self.rows.by_ref().take(self.page_size).collect();
        if page.is_empty() {
            Ok(None)
        } else {
            Ok(Some(page))
        }
    }
}
