//! Server-side row key filter.
//!
//! The filter is a byte regular expression over the row key layout. It skips the metric and
//! timestamp prefix, then requires each constrained tag (in tag-name id order, the order pairs
//! have in the key) with arbitrary other pairs allowed around them. When the query excludes
//! tags, those "other pairs" may not use an excluded name.
//!
//! Every byte is written as a `\xHH` escape with Unicode disabled, so NUL, backslash and quote
//! sequences in identifiers are matched literally.

use crate::config::KeyWidths;
use crate::error::QueryError;
use crate::planner::{GroupBy, GroupMode};
use crate::rowkey::{TagPair, TIMESTAMP_BYTES};
use regex::bytes::Regex;
use std::collections::BTreeMap;
use std::fmt::Write;

/// How the value of one constrained tag must look.
#[derive(Debug, Clone, Copy)]
enum ValueMatch<'a> {
    Literal(&'a [u8]),
    Any,
    OneOf(&'a [Vec<u8>]),
}

/// Compiled row key filter.
#[derive(Debug, Clone)]
pub struct ScanFilter {
    regex: Regex,
}

impl ScanFilter {
    /// Builds the filter for the given constraints. Returns `None` when nothing is constrained.
    ///
    /// `exact` and `group_bys` may come in any order; excluded names must not be constrained.
    pub fn build(
        widths: KeyWidths,
        exact: &[TagPair],
        group_bys: &[GroupBy],
        excluded: &[Vec<u8>],
    ) -> Result<Option<Self>, QueryError> {
        if exact.is_empty() && group_bys.is_empty() && excluded.is_empty() {
            return Ok(None);
        }

        let mut constraints: BTreeMap<&[u8], ValueMatch<'_>> = BTreeMap::new();
        for (name, value) in exact {
            constraints.insert(name.as_slice(), ValueMatch::Literal(value.as_slice()));
        }
        for group_by in group_bys {
            let matcher = match &group_by.mode {
                GroupMode::Any => ValueMatch::Any,
                GroupMode::PerValueGroups(ids) | GroupMode::CollapsedAggregate(ids) => {
                    ValueMatch::OneOf(ids)
                }
            };
            if constraints.insert(group_by.name_id.as_slice(), matcher).is_some() {
                return Err(QueryError::InvalidQuery(format!(
                    "tag '{}' is constrained twice",
                    group_by.name
                )));
            }
        }

        let skip = skip_pattern(widths, excluded);
        let mut pattern = format!("(?s-u)^.{{{}}}", widths.metric + TIMESTAMP_BYTES);
        for (name, matcher) in &constraints {
            push_skip(&mut pattern, skip.as_deref());
            push_literal(&mut pattern, name);
            match matcher {
                ValueMatch::Literal(value) => push_literal(&mut pattern, value),
                ValueMatch::Any => {
                    let _ = write!(pattern, ".{{{}}}", widths.tag_value);
                }
                ValueMatch::OneOf(values) => {
                    pattern.push_str("(?:");
                    for (i, value) in values.iter().enumerate() {
                        if i > 0 {
                            pattern.push('|');
                        }
                        push_literal(&mut pattern, value);
                    }
                    pattern.push(')');
                }
            }
        }
        push_skip(&mut pattern, skip.as_deref());
        pattern.push('$');

        let regex = Regex::new(&pattern)
            .map_err(|e| QueryError::InvalidQuery(format!("row key filter: {}", e)))?;
        Ok(Some(Self { regex }))
    }

    pub fn is_match(&self, key: &[u8]) -> bool {
        self.regex.is_match(key)
    }

    /// The regular expression sent to storage.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}

/// One unconstrained tag pair. `None` when no pair can be skipped at all.
fn skip_pattern(widths: KeyWidths, excluded: &[Vec<u8>]) -> Option<String> {
    if excluded.is_empty() {
        return Some(format!(".{{{}}}", widths.tag_pair()));
    }
    let mut names: Vec<&[u8]> = excluded.iter().map(Vec::as_slice).collect();
    names.sort_unstable();
    names.dedup();
    complement(&names).map(|name| format!("{}.{{{}}}", name, widths.tag_value))
}

/// Pattern matching every byte string of the common length of `names` except `names`.
///
/// Built as a trie: at each position either the byte is none of the listed first bytes (and
/// the rest is anything), or it is one of them and the rest avoids the matching suffixes.
fn complement(names: &[&[u8]]) -> Option<String> {
    let len = names[0].len();
    let mut by_first: BTreeMap<u8, Vec<&[u8]>> = BTreeMap::new();
    for name in names {
        by_first.entry(name[0]).or_default().push(&name[1..]);
    }

    let mut alternatives = Vec::new();
    if by_first.len() < 256 {
        let mut class = String::from("[^");
        for b in by_first.keys() {
            push_literal(&mut class, &[*b]);
        }
        class.push(']');
        if len > 1 {
            let _ = write!(class, ".{{{}}}", len - 1);
        }
        alternatives.push(class);
    }
    if len > 1 {
        for (b, suffixes) in &by_first {
            if let Some(rest) = complement(suffixes) {
                let mut alt = String::new();
                push_literal(&mut alt, &[*b]);
                alt.push_str(&rest);
                alternatives.push(alt);
            }
        }
    }

    match alternatives.len() {
        0 => None,
        1 => alternatives.pop(),
        _ => Some(format!("(?:{})", alternatives.join("|"))),
    }
}

fn push_skip(pattern: &mut String, skip: Option<&str>) {
    if let Some(skip) = skip {
        let _ = write!(pattern, "(?:{})*", skip);
    }
}

fn push_literal(pattern: &mut String, bytes: &[u8]) {
    for b in bytes {
        let _ = write!(pattern, "\\x{:02x}", b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rowkey::RowKeyCodec;

    fn widths() -> KeyWidths {
        KeyWidths::new(1, 1, 1)
    }

    fn key(tags: &[(u8, u8)]) -> Vec<u8> {
        let mut pairs: Vec<TagPair> = tags.iter().map(|&(n, v)| (vec![n], vec![v])).collect();
        RowKeyCodec::new(widths())
            .encode_at(&[9], 1234, &mut pairs)
            .unwrap()
    }

    fn group(name: u8, mode: GroupMode) -> GroupBy {
        GroupBy {
            name: format!("t{}", name),
            name_id: vec![name],
            mode,
        }
    }

    #[test]
    fn nothing_constrained_means_no_filter() {
        assert!(ScanFilter::build(widths(), &[], &[], &[]).unwrap().is_none());
    }

    #[test]
    fn pattern_escapes_every_byte() {
        let f = ScanFilter::build(widths(), &[(vec![0x5c], vec![0x00])], &[], &[])
            .unwrap()
            .unwrap();
        assert_eq!(
            f.pattern(),
            "(?s-u)^.{5}(?:.{2})*\\x5c\\x00(?:.{2})*$"
        );
        assert!(f.is_match(&key(&[(0x5c, 0x00)])));
        assert!(f.is_match(&key(&[(0x01, 0x45), (0x5c, 0x00), (0x60, 0x5c)])));
        assert!(!f.is_match(&key(&[(0x5c, 0x01)])));
    }

    #[test]
    fn exact_and_group_bys_merge_by_name_id() {
        let f = ScanFilter::build(
            widths(),
            &[(vec![3], vec![30])],
            &[
                group(5, GroupMode::PerValueGroups(vec![vec![1], vec![2]])),
                group(1, GroupMode::Any),
            ],
            &[],
        )
        .unwrap()
        .unwrap();
        assert!(f.is_match(&key(&[(1, 7), (3, 30), (5, 2)])));
        assert!(f.is_match(&key(&[(1, 7), (2, 2), (3, 30), (4, 4), (5, 1), (6, 6)])));
        assert!(!f.is_match(&key(&[(3, 30), (5, 2)]))); // missing group-by tag 1
        assert!(!f.is_match(&key(&[(1, 7), (3, 31), (5, 2)]))); // wrong exact value
        assert!(!f.is_match(&key(&[(1, 7), (3, 30), (5, 3)]))); // value not enumerated
    }

    #[test]
    fn excluded_names_reject_rows() {
        let f = ScanFilter::build(widths(), &[(vec![3], vec![30])], &[], &[vec![4]])
            .unwrap()
            .unwrap();
        assert!(f.is_match(&key(&[(3, 30)])));
        assert!(f.is_match(&key(&[(2, 1), (3, 30), (5, 1)])));
        assert!(!f.is_match(&key(&[(3, 30), (4, 1)])));
        assert!(!f.is_match(&key(&[(3, 30), (4, 30)])));

        let only_excluded = ScanFilter::build(widths(), &[], &[], &[vec![4]])
            .unwrap()
            .unwrap();
        assert!(only_excluded.is_match(&key(&[])));
        assert!(only_excluded.is_match(&key(&[(1, 1), (9, 9)])));
        assert!(!only_excluded.is_match(&key(&[(1, 1), (4, 9)])));
    }

    #[test]
    fn multi_byte_excluded_names() {
        let w = KeyWidths::new(1, 2, 1);
        let f = ScanFilter::build(w, &[], &[], &[vec![0, 4], vec![1, 0]])
            .unwrap()
            .unwrap();
        let k = |tags: &[([u8; 2], u8)]| {
            let mut pairs: Vec<TagPair> = tags.iter().map(|(n, v)| (n.to_vec(), vec![*v])).collect();
            RowKeyCodec::new(w).encode_at(&[1], 0, &mut pairs).unwrap()
        };
        assert!(f.is_match(&k(&[([0, 3], 1), ([0, 5], 1), ([1, 1], 1), ([4, 0], 1)])));
        assert!(!f.is_match(&k(&[([0, 3], 1), ([0, 4], 1)])));
        assert!(!f.is_match(&k(&[([1, 0], 0)])));
    }

    #[test]
    fn complement_of_full_byte_range() {
        let all: Vec<Vec<u8>> = (0..=255u8).map(|b| vec![b]).collect();
        let names: Vec<&[u8]> = all.iter().map(Vec::as_slice).collect();
        assert!(complement(&names).is_none());
        let f = ScanFilter::build(widths(), &[], &[], &all).unwrap().unwrap();
        assert!(f.is_match(&key(&[])));
        assert!(!f.is_match(&key(&[(7, 7)])));
    }
}
