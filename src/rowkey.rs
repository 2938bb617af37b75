//! Binary row key codec.
//!
//! Layout: `metric_id ++ base_timestamp (u32 BE) ++ (tag_name_id ++ tag_value_id)*`, tag pairs
//! sorted by raw byte order. Two keys belong to the same series iff they are equal except for
//! the four timestamp bytes.

use crate::config::KeyWidths;
use crate::error::QueryError;
use crate::types::Timestamp;
use std::fmt;

/// Width of the base timestamp embedded in every row key.
pub const TIMESTAMP_BYTES: usize = 4;

/// A `(tag_name_id, tag_value_id)` pair.
pub type TagPair = (Vec<u8>, Vec<u8>);

/// Canonical identity of a series: a row key with its timestamp zeroed.
///
/// The derived byte ordering is the same-series ordering used to collect rows into spans.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey(Vec<u8>);

impl SeriesKey {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}

impl AsRef<[u8]> for SeriesKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SeriesKey({:02x?})", self.0)
    }
}

/// Encodes and decodes row keys for one set of identifier widths.
#[derive(Debug, Clone, Copy)]
pub struct RowKeyCodec {
    widths: KeyWidths,
}

impl RowKeyCodec {
    pub fn new(widths: KeyWidths) -> Self {
        Self { widths }
    }

    pub fn widths(&self) -> KeyWidths {
        self.widths
    }

    /// Offset of the first tag pair.
    #[inline]
    pub fn prefix_len(&self) -> usize {
        self.widths.metric + TIMESTAMP_BYTES
    }

    /// Builds a row key with a zeroed timestamp. Tags are sorted in place with the storage
    /// comparator, so callers may pass them in any order.
    pub fn encode(&self, metric: &[u8], tags: &mut [TagPair]) -> Result<Vec<u8>, QueryError> {
        self.encode_at(metric, 0, tags)
    }

    /// Builds a row key for the row starting at `base_time`.
    pub fn encode_at(
        &self,
        metric: &[u8],
        base_time: u32,
        tags: &mut [TagPair],
    ) -> Result<Vec<u8>, QueryError> {
        self.check_id("metric", metric, self.widths.metric)?;
        for (name, value) in tags.iter() {
            self.check_id("tag name", name, self.widths.tag_name)?;
            self.check_id("tag value", value, self.widths.tag_value)?;
        }
        sort_tags(tags);

        let mut key = Vec::with_capacity(self.prefix_len() + tags.len() * self.widths.tag_pair());
        key.extend_from_slice(metric);
        key.extend_from_slice(&base_time.to_be_bytes());
        for (name, value) in tags.iter() {
            key.extend_from_slice(name);
            key.extend_from_slice(value);
        }
        Ok(key)
    }

    /// Decodes a key into `(metric_id, base_time, tags)`.
    pub fn decode(&self, key: &[u8]) -> Result<(Vec<u8>, u32, Vec<TagPair>), QueryError> {
        let tags = self
            .tags(key)?
            .map(|(n, v)| (n.to_vec(), v.to_vec()))
            .collect();
        Ok((self.metric_id(key)?.to_vec(), self.base_time(key)?, tags))
    }

    /// Checks that `key` is `W_m + 4 + k * (W_n + W_v)` bytes long and returns `k`.
    pub fn tag_count(&self, key: &[u8]) -> Result<usize, QueryError> {
        let prefix = self.prefix_len();
        let pair = self.widths.tag_pair();
        if key.len() < prefix || (key.len() - prefix) % pair != 0 {
            return Err(QueryError::MalformedKey {
                len: key.len(),
                details: format!(
                    "expected {} + k*{} bytes for widths {:?}",
                    prefix, pair, self.widths
                ),
            });
        }
        Ok((key.len() - prefix) / pair)
    }

    pub fn metric_id<'k>(&self, key: &'k [u8]) -> Result<&'k [u8], QueryError> {
        self.tag_count(key)?;
        Ok(&key[..self.widths.metric])
    }

    pub fn base_time(&self, key: &[u8]) -> Result<u32, QueryError> {
        self.tag_count(key)?;
        let m = self.widths.metric;
        let mut ts = [0u8; TIMESTAMP_BYTES];
        ts.copy_from_slice(&key[m..m + TIMESTAMP_BYTES]);
        Ok(u32::from_be_bytes(ts))
    }

    /// Iterates the tag pairs of a validated key.
    pub fn tags<'k>(&self, key: &'k [u8]) -> Result<TagIter<'k>, QueryError> {
        self.tag_count(key)?;
        Ok(TagIter {
            rest: &key[self.prefix_len()..],
            name_width: self.widths.tag_name,
            pair_width: self.widths.tag_pair(),
        })
    }

    /// Returns the `index`-th tag pair, or `None` past the last one.
    pub fn tag_at<'k>(
        &self,
        key: &'k [u8],
        index: usize,
    ) -> Result<Option<(&'k [u8], &'k [u8])>, QueryError> {
        Ok(self.tags(key)?.nth(index))
    }

    /// Returns the value id stored for `name_id`, if the key carries that tag.
    pub fn tag_value<'k>(
        &self,
        key: &'k [u8],
        name_id: &[u8],
    ) -> Result<Option<&'k [u8]>, QueryError> {
        Ok(self
            .tags(key)?
            .find(|(name, _)| *name == name_id)
            .map(|(_, value)| value))
    }

    pub fn has_tag(&self, key: &[u8], name_id: &[u8]) -> Result<bool, QueryError> {
        Ok(self.tag_value(key, name_id)?.is_some())
    }

    /// True iff `a` and `b` are equal except for their timestamp bytes.
    pub fn same_series(&self, a: &[u8], b: &[u8]) -> bool {
        let m = self.widths.metric;
        if a.len() != b.len() || a.len() < self.prefix_len() {
            return false;
        }
        a[..m] == b[..m] && a[m + TIMESTAMP_BYTES..] == b[m + TIMESTAMP_BYTES..]
    }

    /// Canonical series identity of `key` (timestamp zeroed).
    pub fn series_key(&self, key: &[u8]) -> Result<SeriesKey, QueryError> {
        self.tag_count(key)?;
        let m = self.widths.metric;
        let mut canonical = key.to_vec();
        canonical[m..m + TIMESTAMP_BYTES].fill(0);
        Ok(SeriesKey(canonical))
    }

    /// Physical key of the row of `series` starting at `base_time`.
    pub fn row_key_at(&self, series: &SeriesKey, base_time: u32) -> Vec<u8> {
        let m = self.widths.metric;
        let mut key = series.0.clone();
        key[m..m + TIMESTAMP_BYTES].copy_from_slice(&base_time.to_be_bytes());
        key
    }

    /// Start/stop row key for scanning `metric` from `timestamp` (clamped to u32).
    pub fn scan_bound(&self, metric: &[u8], timestamp: Timestamp) -> Result<Vec<u8>, QueryError> {
        self.check_id("metric", metric, self.widths.metric)?;
        let ts = u32::try_from(timestamp).unwrap_or(u32::MAX);
        let mut key = Vec::with_capacity(self.prefix_len());
        key.extend_from_slice(metric);
        key.extend_from_slice(&ts.to_be_bytes());
        Ok(key)
    }

    fn check_id(&self, kind: &str, id: &[u8], width: usize) -> Result<(), QueryError> {
        if id.len() != width {
            return Err(QueryError::MalformedKey {
                len: id.len(),
                details: format!("{} id must be {} bytes", kind, width),
            });
        }
        Ok(())
    }
}

/// Sorts tag pairs by the byte order of the concatenated `name_id ++ value_id`.
pub fn sort_tags(tags: &mut [TagPair]) {
    tags.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
}

/// Iterator over the tag pairs of a row key.
#[derive(Debug, Clone)]
pub struct TagIter<'k> {
    rest: &'k [u8],
    name_width: usize,
    pair_width: usize,
}

impl<'k> Iterator for TagIter<'k> {
    type Item = (&'k [u8], &'k [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < self.pair_width {
            return None;
        }
        let (pair, rest) = self.rest.split_at(self.pair_width);
        self.rest = rest;
        Some(pair.split_at(self.name_width))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.rest.len() / self.pair_width;
        (n, Some(n))
    }
}

impl ExactSizeIterator for TagIter<'_> {}
