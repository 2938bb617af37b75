//! Decoded storage rows.
//!
//! A physical row holds one cell per data point, or a single compacted cell whose qualifier and
//! value are the concatenation of many. Each 2-byte qualifier is
//! `delta_seconds << FLAG_BITS | flags`, where `flags & FLAG_FLOAT` marks a floating point value
//! and `flags & LENGTH_MASK` is the value length minus one. Values are big-endian.

use crate::error::QueryError;
use crate::rowkey::RowKeyCodec;
use crate::types::{DataPoint, RandomAccessSeries, Timestamp, Value};

/// Number of low qualifier bits holding value flags.
pub const FLAG_BITS: u32 = 4;
/// Flag bit set on floating point values.
pub const FLAG_FLOAT: u16 = 0x8;
/// Mask extracting `value length - 1` from the flags.
pub const LENGTH_MASK: u16 = 0x7;
/// Exclusive upper bound of a time delta that fits in a qualifier.
pub const MAX_DELTA: u64 = 1 << (16 - FLAG_BITS);

/// Whether `delta` seconds can be stored in a qualifier.
#[inline]
pub fn can_time_delta_fit(delta: u64) -> bool {
    delta < MAX_DELTA
}

/// One stored cell: a qualifier (possibly several concatenated) and the matching value bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub qualifier: Vec<u8>,
    pub value: Vec<u8>,
}

impl Cell {
    /// Encodes an integer on the smallest of 1, 2, 4 or 8 bytes.
    pub fn integer(delta: u16, value: i64) -> Self {
        let bytes: Vec<u8> = if let Ok(v) = i8::try_from(value) {
            v.to_be_bytes().to_vec()
        } else if let Ok(v) = i16::try_from(value) {
            v.to_be_bytes().to_vec()
        } else if let Ok(v) = i32::try_from(value) {
            v.to_be_bytes().to_vec()
        } else {
            value.to_be_bytes().to_vec()
        };
        Self::with_flags(delta, (bytes.len() as u16 - 1) & LENGTH_MASK, bytes)
    }

    /// Encodes an 8-byte float.
    pub fn float(delta: u16, value: f64) -> Self {
        Self::with_flags(delta, FLAG_FLOAT | 0x7, value.to_be_bytes().to_vec())
    }

    /// Encodes a 4-byte float.
    pub fn float32(delta: u16, value: f32) -> Self {
        Self::with_flags(delta, FLAG_FLOAT | 0x3, value.to_be_bytes().to_vec())
    }

    fn with_flags(delta: u16, flags: u16, value: Vec<u8>) -> Self {
        let q = (delta << FLAG_BITS) | flags;
        Self {
            qualifier: q.to_be_bytes().to_vec(),
            value,
        }
    }

    /// Concatenates cells into one compacted cell. Cells must already be in delta order.
    pub fn concat(cells: &[Cell]) -> Self {
        let mut out = Cell {
            qualifier: Vec::new(),
            value: Vec::new(),
        };
        for c in cells {
            out.qualifier.extend_from_slice(&c.qualifier);
            out.value.extend_from_slice(&c.value);
        }
        out
    }
}

/// A physical row as returned by a storage scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageRow {
    pub key: Vec<u8>,
    pub cells: Vec<Cell>,
}

#[derive(Debug, Clone, Copy)]
struct CellRef {
    /// Seconds since the sequence's base time.
    delta: u32,
    flags: u16,
    offset: u32,
}

impl CellRef {
    #[inline]
    fn is_float(&self) -> bool {
        self.flags & FLAG_FLOAT != 0
    }

    #[inline]
    fn len(&self) -> usize {
        ((self.flags & LENGTH_MASK) + 1) as usize
    }
}

/// Decoded contents of one physical row, possibly extended with later rows of the same series.
#[derive(Debug, Clone)]
pub struct RowSequence {
    key: Vec<u8>,
    base_time: u32,
    cells: Vec<CellRef>,
    values: Vec<u8>,
}

impl RowSequence {
    /// Decodes and compacts a storage row. Cells are sorted by time delta; exact duplicates are
    /// dropped and two different values at the same delta are rejected.
    pub fn from_row(codec: &RowKeyCodec, row: &StorageRow) -> Result<Self, QueryError> {
        let base_time = codec.base_time(&row.key)?;

        let mut decoded: Vec<(u32, u16, &[u8])> = Vec::new();
        for cell in &row.cells {
            decode_cell(cell, &mut decoded)?;
        }
        if decoded.is_empty() {
            return Err(QueryError::IllegalData(format!(
                "row {:02x?} has no cells",
                row.key
            )));
        }
        decoded.sort_by_key(|&(delta, _, _)| delta);

        let mut seq = RowSequence {
            key: row.key.clone(),
            base_time,
            cells: Vec::with_capacity(decoded.len()),
            values: Vec::new(),
        };
        let mut prev: Option<(u32, u16, &[u8])> = None;
        for (delta, flags, bytes) in decoded {
            if let Some((pdelta, pflags, pbytes)) = prev {
                if pdelta == delta {
                    if pflags == flags && pbytes == bytes {
                        continue;
                    }
                    return Err(QueryError::IllegalData(format!(
                        "duplicate timestamp {} with different values in row {:02x?}",
                        base_time as u64 + delta as u64,
                        row.key
                    )));
                }
            }
            seq.push(delta, flags, bytes);
            prev = Some((delta, flags, bytes));
        }
        Ok(seq)
    }

    fn push(&mut self, delta: u32, flags: u16, bytes: &[u8]) {
        self.cells.push(CellRef {
            delta,
            flags,
            offset: self.values.len() as u32,
        });
        self.values.extend_from_slice(bytes);
    }

    /// The row key of the first row absorbed in this sequence.
    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn base_time(&self) -> u32 {
        self.base_time
    }

    pub fn first_timestamp(&self) -> Timestamp {
        self.timestamp(0)
    }

    pub fn last_timestamp(&self) -> Timestamp {
        self.timestamp(self.cells.len() - 1)
    }

    /// Appends all points of `other`, a later row of the same series.
    ///
    /// The caller guarantees ordering and that `other.last_timestamp() - self.base_time()`
    /// fits in a qualifier delta.
    pub(crate) fn absorb(&mut self, other: RowSequence) {
        let shift = other.base_time - self.base_time;
        for cell in &other.cells {
            let start = cell.offset as usize;
            let bytes = &other.values[start..start + cell.len()];
            self.push(cell.delta + shift, cell.flags, bytes);
        }
    }

    fn raw(&self, i: usize) -> (&CellRef, &[u8]) {
        let cell = &self.cells[i];
        let start = cell.offset as usize;
        (cell, &self.values[start..start + cell.len()])
    }
}

fn decode_cell<'a>(cell: &'a Cell, out: &mut Vec<(u32, u16, &'a [u8])>) -> Result<(), QueryError> {
    let q = &cell.qualifier;
    if q.is_empty() || q.len() % 2 != 0 {
        return Err(QueryError::IllegalData(format!(
            "invalid qualifier length {}",
            q.len()
        )));
    }
    let mut offset = 0usize;
    for chunk in q.chunks_exact(2) {
        let qual = u16::from_be_bytes([chunk[0], chunk[1]]);
        let flags = qual & ((1 << FLAG_BITS) - 1);
        let len = ((flags & LENGTH_MASK) + 1) as usize;
        if flags & FLAG_FLOAT != 0 && len != 4 && len != 8 {
            return Err(QueryError::IllegalData(format!(
                "float value of {} bytes in qualifier {:#06x}",
                len, qual
            )));
        }
        if flags & FLAG_FLOAT == 0 && !matches!(len, 1 | 2 | 4 | 8) {
            return Err(QueryError::IllegalData(format!(
                "integer value of {} bytes in qualifier {:#06x}",
                len, qual
            )));
        }
        let end = offset + len;
        if end > cell.value.len() {
            return Err(QueryError::IllegalData(format!(
                "cell value too short: need {} bytes, have {}",
                end,
                cell.value.len()
            )));
        }
        out.push((u32::from(qual >> FLAG_BITS), flags, &cell.value[offset..end]));
        offset = end;
    }
    if offset != cell.value.len() {
        return Err(QueryError::IllegalData(format!(
            "cell value has {} trailing bytes",
            cell.value.len() - offset
        )));
    }
    Ok(())
}

fn decode_integer(bytes: &[u8]) -> i64 {
    match bytes.len() {
        1 => i8::from_be_bytes([bytes[0]]) as i64,
        2 => i16::from_be_bytes([bytes[0], bytes[1]]) as i64,
        4 => i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        _ => {
            let mut b = [0u8; 8];
            b.copy_from_slice(&bytes[..8]);
            i64::from_be_bytes(b)
        }
    }
}

fn decode_float(bytes: &[u8]) -> f64 {
    if bytes.len() == 4 {
        f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
    } else {
        let mut b = [0u8; 8];
        b.copy_from_slice(&bytes[..8]);
        f64::from_be_bytes(b)
    }
}

impl RandomAccessSeries for RowSequence {
    fn size(&self) -> usize {
        self.cells.len()
    }

    fn timestamp(&self, i: usize) -> Timestamp {
        self.base_time as Timestamp + self.cells[i].delta as Timestamp
    }

    fn is_integer(&self, i: usize) -> bool {
        !self.cells[i].is_float()
    }

    /// Float values are truncated.
    fn long_value(&self, i: usize) -> i64 {
        let (cell, bytes) = self.raw(i);
        if cell.is_float() {
            decode_float(bytes) as i64
        } else {
            decode_integer(bytes)
        }
    }

    fn double_value(&self, i: usize) -> f64 {
        let (cell, bytes) = self.raw(i);
        if cell.is_float() {
            decode_float(bytes)
        } else {
            decode_integer(bytes) as f64
        }
    }
}

/// A row view over already decoded points, as produced by backends that do not store
/// compacted cells (e.g. a relational store).
#[derive(Debug, Clone)]
pub struct PointSequence {
    points: Vec<DataPoint>,
}

impl PointSequence {
    /// Points must be non-empty and in strictly increasing timestamp order.
    pub fn new(points: Vec<DataPoint>) -> Result<Self, QueryError> {
        if points.is_empty() {
            return Err(QueryError::IllegalData("empty point sequence".to_string()));
        }
        if let Some(w) = points.windows(2).find(|w| w[0].timestamp >= w[1].timestamp) {
            return Err(QueryError::IllegalData(format!(
                "points out of order: {} then {}",
                w[0].timestamp, w[1].timestamp
            )));
        }
        Ok(Self { points })
    }
}

impl RandomAccessSeries for PointSequence {
    fn size(&self) -> usize {
        self.points.len()
    }

    fn timestamp(&self, i: usize) -> Timestamp {
        self.points[i].timestamp
    }

    fn is_integer(&self, i: usize) -> bool {
        self.points[i].is_integer()
    }

    fn long_value(&self, i: usize) -> i64 {
        self.points[i].value.to_i64()
    }

    fn double_value(&self, i: usize) -> f64 {
        self.points[i].value.to_f64()
    }

    fn value(&self, i: usize) -> Value {
        self.points[i].value
    }
}

/// One ordered run of points inside a span.
#[derive(Debug, Clone)]
pub enum RowView {
    Compacted(RowSequence),
    Points(PointSequence),
}

impl RowView {
    pub fn first_timestamp(&self) -> Timestamp {
        self.timestamp(0)
    }

    pub fn last_timestamp(&self) -> Timestamp {
        self.timestamp(self.size() - 1)
    }

    /// Offset of the first point with timestamp `>= ts` (`size()` if none).
    pub fn seek_offset(&self, ts: Timestamp) -> usize {
        let (mut lo, mut hi) = (0usize, self.size());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.timestamp(mid) < ts {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }
}

impl From<RowSequence> for RowView {
    fn from(seq: RowSequence) -> Self {
        RowView::Compacted(seq)
    }
}

impl From<PointSequence> for RowView {
    fn from(seq: PointSequence) -> Self {
        RowView::Points(seq)
    }
}

impl RandomAccessSeries for RowView {
    fn size(&self) -> usize {
        match self {
            RowView::Compacted(r) => r.size(),
            RowView::Points(p) => p.size(),
        }
    }

    fn timestamp(&self, i: usize) -> Timestamp {
        match self {
            RowView::Compacted(r) => r.timestamp(i),
            RowView::Points(p) => p.timestamp(i),
        }
    }

    fn is_integer(&self, i: usize) -> bool {
        match self {
            RowView::Compacted(r) => r.is_integer(i),
            RowView::Points(p) => p.is_integer(i),
        }
    }

    fn long_value(&self, i: usize) -> i64 {
        match self {
            RowView::Compacted(r) => r.long_value(i),
            RowView::Points(p) => p.long_value(i),
        }
    }

    fn double_value(&self, i: usize) -> f64 {
        match self {
            RowView::Compacted(r) => r.double_value(i),
            RowView::Points(p) => p.double_value(i),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyWidths;

    fn codec() -> RowKeyCodec {
        RowKeyCodec::new(KeyWidths::new(3, 3, 3))
    }

    fn row(base: u32, cells: Vec<Cell>) -> StorageRow {
        let key = codec()
            .encode_at(&[0, 0, 1], base, &mut [(vec![0, 0, 1], vec![0, 0, 1])])
            .unwrap();
        StorageRow { key, cells }
    }

    #[test]
    fn integer_widths_round_trip() {
        let cells = vec![
            Cell::integer(0, 5),
            Cell::integer(1, -300),
            Cell::integer(2, 70_000),
            Cell::integer(3, i64::MIN),
        ];
        assert_eq!(cells[0].value.len(), 1);
        assert_eq!(cells[1].value.len(), 2);
        assert_eq!(cells[2].value.len(), 4);
        assert_eq!(cells[3].value.len(), 8);
        let seq = RowSequence::from_row(&codec(), &row(3600, cells)).unwrap();
        assert_eq!(seq.size(), 4);
        assert_eq!(seq.long_value(0), 5);
        assert_eq!(seq.long_value(1), -300);
        assert_eq!(seq.long_value(2), 70_000);
        assert_eq!(seq.long_value(3), i64::MIN);
        assert_eq!(seq.timestamp(3), 3603);
    }

    #[test]
    fn floats_decode_from_both_widths() {
        let seq = RowSequence::from_row(
            &codec(),
            &row(0, vec![Cell::float(1, 1.25), Cell::float32(2, 0.5)]),
        )
        .unwrap();
        assert!(!seq.is_integer(0));
        assert_eq!(seq.double_value(0), 1.25);
        assert_eq!(seq.double_value(1), 0.5);
        assert_eq!(seq.value(0), Value::Float(1.25));
    }

    #[test]
    fn compacted_cells_are_split_and_sorted() {
        let compacted = Cell::concat(&[Cell::integer(10, 1), Cell::float(20, 2.0)]);
        let seq = RowSequence::from_row(
            &codec(),
            &row(0, vec![Cell::integer(30, 3), compacted, Cell::integer(5, 0)]),
        )
        .unwrap();
        let ts: Vec<_> = (0..seq.size()).map(|i| seq.timestamp(i)).collect();
        assert_eq!(ts, vec![5, 10, 20, 30]);
        assert_eq!(seq.value(2), Value::Float(2.0));
    }

    #[test]
    fn duplicates_are_dropped_conflicts_rejected() {
        let seq = RowSequence::from_row(
            &codec(),
            &row(0, vec![Cell::integer(1, 1), Cell::integer(1, 1)]),
        )
        .unwrap();
        assert_eq!(seq.size(), 1);

        let r = RowSequence::from_row(
            &codec(),
            &row(0, vec![Cell::integer(1, 1), Cell::integer(1, 2)]),
        );
        assert!(matches!(r, Err(QueryError::IllegalData(_))));
    }

    #[test]
    fn malformed_cells_are_rejected() {
        let bad_len = Cell {
            qualifier: vec![0, 0x01],
            value: vec![1],
        };
        assert!(RowSequence::from_row(&codec(), &row(0, vec![bad_len])).is_err());
        let odd = Cell {
            qualifier: vec![0],
            value: vec![1],
        };
        assert!(RowSequence::from_row(&codec(), &row(0, vec![odd])).is_err());
        assert!(RowSequence::from_row(&codec(), &row(0, vec![])).is_err());
    }

    #[test]
    fn absorb_rebases_deltas() {
        let mut a = RowSequence::from_row(&codec(), &row(0, vec![Cell::integer(10, 1)])).unwrap();
        let b = RowSequence::from_row(&codec(), &row(100, vec![Cell::integer(5, 2)])).unwrap();
        a.absorb(b);
        assert_eq!(a.size(), 2);
        assert_eq!(a.last_timestamp(), 105);
        assert_eq!(a.long_value(1), 2);
        assert!(can_time_delta_fit(4095));
        assert!(!can_time_delta_fit(4096));
    }

    #[test]
    fn point_sequence_requires_order() {
        assert!(PointSequence::new(vec![]).is_err());
        assert!(PointSequence::new(vec![DataPoint::integer(2, 1), DataPoint::integer(2, 1)]).is_err());
        let view: RowView = PointSequence::new(vec![DataPoint::integer(1, 1), DataPoint::float(3, 2.0)])
            .unwrap()
            .into();
        assert_eq!(view.seek_offset(2), 1);
        assert_eq!(view.seek_offset(0), 0);
        assert_eq!(view.seek_offset(4), 2);
        assert_eq!(view.last_timestamp(), 3);
    }
}
