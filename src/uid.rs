//! Name ↔ fixed-width identifier resolution.
//!
//! The query core only consumes [`UniqueIdResolver`]. [`MemoryDirectory`] is a process-local
//! implementation with insert-or-get semantics, safe to share across concurrent queries.

use crate::config::KeyWidths;
use crate::error::QueryError;
use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

/// Kind of identifier embedded in a row key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Metric,
    TagName,
    TagValue,
}

impl IdKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdKind::Metric => "metric",
            IdKind::TagName => "tag name",
            IdKind::TagValue => "tag value",
        }
    }

    fn index(&self) -> usize {
        match self {
            IdKind::Metric => 0,
            IdKind::TagName => 1,
            IdKind::TagValue => 2,
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolves names to identifiers and back.
///
/// Implementations must report an unknown name as [`QueryError::NoSuchName`] and an unknown
/// identifier as [`QueryError::NoSuchId`]; callers rely on telling them apart.
pub trait UniqueIdResolver: std::fmt::Debug + Send + Sync {
    /// Width in bytes of identifiers of `kind`.
    fn width(&self, kind: IdKind) -> usize;

    fn get_id(&self, kind: IdKind, name: &str) -> Result<Vec<u8>, QueryError>;

    fn get_name(&self, kind: IdKind, id: &[u8]) -> Result<String, QueryError>;
}

#[derive(Debug, Default)]
struct Table {
    by_name: HashMap<String, Vec<u8>>,
    by_id: HashMap<Vec<u8>, String>,
    next: u64,
}

/// In-memory identifier directory. Identifiers are assigned sequentially from 1, big-endian.
#[derive(Debug)]
pub struct MemoryDirectory {
    widths: KeyWidths,
    tables: RwLock<[Table; 3]>,
}

impl MemoryDirectory {
    pub fn new(widths: KeyWidths) -> Self {
        Self {
            widths,
            tables: RwLock::new(Default::default()),
        }
    }

    /// Returns the identifier of `name`, assigning the next free one if it has none.
    pub fn get_or_create_id(&self, kind: IdKind, name: &str) -> Result<Vec<u8>, QueryError> {
        if let Some(id) = self.tables.read()?[kind.index()].by_name.get(name) {
            return Ok(id.clone());
        }

        let width = self.width(kind);
        let mut tables = self.tables.write()?;
        let table = &mut tables[kind.index()];
        // Another writer may have won the race between the two locks.
        if let Some(id) = table.by_name.get(name) {
            return Ok(id.clone());
        }
        let seq = table.next + 1;
        if width < 8 && seq >> (8 * width) != 0 {
            return Err(QueryError::Internal(format!(
                "{} identifier space of {} bytes exhausted",
                kind, width
            )));
        }
        let n = width.min(8);
        let mut id = vec![0u8; width];
        id[width - n..].copy_from_slice(&seq.to_be_bytes()[8 - n..]);
        table.next = seq;
        table.by_name.insert(name.to_string(), id.clone());
        table.by_id.insert(id.clone(), name.to_string());
        Ok(id)
    }

    /// Number of names registered for `kind`.
    pub fn len(&self, kind: IdKind) -> Result<usize, QueryError> {
        Ok(self.tables.read()?[kind.index()].by_name.len())
    }
}

impl UniqueIdResolver for MemoryDirectory {
    fn width(&self, kind: IdKind) -> usize {
        match kind {
            IdKind::Metric => self.widths.metric,
            IdKind::TagName => self.widths.tag_name,
            IdKind::TagValue => self.widths.tag_value,
        }
    }

    fn get_id(&self, kind: IdKind, name: &str) -> Result<Vec<u8>, QueryError> {
        self.tables.read()?[kind.index()]
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| QueryError::NoSuchName {
                kind: kind.as_str(),
                name: name.to_string(),
            })
    }

    fn get_name(&self, kind: IdKind, id: &[u8]) -> Result<String, QueryError> {
        self.tables.read()?[kind.index()]
            .by_id
            .get(id)
            .cloned()
            .ok_or_else(|| QueryError::NoSuchId {
                kind: kind.as_str(),
                id: id.to_vec(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn assigns_sequential_fixed_width_ids() {
        let dir = MemoryDirectory::new(KeyWidths::new(3, 2, 4));
        assert_eq!(dir.get_or_create_id(IdKind::Metric, "cpu").unwrap(), vec![0, 0, 1]);
        assert_eq!(dir.get_or_create_id(IdKind::Metric, "mem").unwrap(), vec![0, 0, 2]);
        assert_eq!(dir.get_or_create_id(IdKind::TagName, "host").unwrap(), vec![0, 1]);
        assert_eq!(dir.get_or_create_id(IdKind::TagValue, "web01").unwrap(), vec![0, 0, 0, 1]);
        // insert-or-get
        assert_eq!(dir.get_or_create_id(IdKind::Metric, "cpu").unwrap(), vec![0, 0, 1]);
        assert_eq!(dir.len(IdKind::Metric).unwrap(), 2);
    }

    #[test]
    fn unknown_name_and_id_are_distinct_errors() {
        let dir = MemoryDirectory::new(KeyWidths::default());
        assert!(matches!(
            dir.get_id(IdKind::TagName, "dc"),
            Err(QueryError::NoSuchName { kind: "tag name", .. })
        ));
        assert!(matches!(
            dir.get_name(IdKind::TagValue, &[0, 0, 9]),
            Err(QueryError::NoSuchId { kind: "tag value", .. })
        ));
        let id = dir.get_or_create_id(IdKind::TagValue, "x").unwrap();
        assert_eq!(dir.get_name(IdKind::TagValue, &id).unwrap(), "x");
    }

    #[test]
    fn exhausted_id_space_is_an_error() {
        let dir = MemoryDirectory::new(KeyWidths::new(1, 1, 1));
        for i in 0..255 {
            dir.get_or_create_id(IdKind::Metric, &format!("m{}", i)).unwrap();
        }
        assert!(matches!(
            dir.get_or_create_id(IdKind::Metric, "overflow"),
            Err(QueryError::Internal(_))
        ));
    }

    #[test]
    fn concurrent_insert_or_get_agrees() {
        let dir = Arc::new(MemoryDirectory::new(KeyWidths::default()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dir = Arc::clone(&dir);
                thread::spawn(move || dir.get_or_create_id(IdKind::TagName, "host").unwrap())
            })
            .collect();
        let ids: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(dir.len(IdKind::TagName).unwrap(), 1);
    }
}
