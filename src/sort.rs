//! Sort keys and the searches built on them.
//!
//! Specifiers are resolved against the [`Schema`] into a [`SortComparator`]: a
//! requested direction without a comparator falls back to the other direction,
//! and a field with no comparator at all is dropped.

use crate::schema::{Comparator, Schema};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// One sort key: a field and a direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortFieldSpecifier {
    pub field_index: usize,
    pub ascending: bool,
}

impl SortFieldSpecifier {
    pub fn new(field_index: usize, ascending: bool) -> Self {
        SortFieldSpecifier {
            field_index,
            ascending,
        }
    }

    pub fn ascending(field_index: usize) -> Self {
        Self::new(field_index, true)
    }

    pub fn descending(field_index: usize) -> Self {
        Self::new(field_index, false)
    }
}

/// Record comparator evaluating its keys left to right
pub struct SortComparator<R> {
    keys: Vec<Comparator<R>>,
}

impl<R> Clone for SortComparator<R> {
    fn clone(&self) -> Self {
        SortComparator {
            keys: self.keys.clone(),
        }
    }
}

impl<R> SortComparator<R> {
    pub fn compare(&self, a: &R, b: &R) -> Ordering {
        for key in &self.keys {
            match key(a, b) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }
}

/// Resolve specifiers against the schema.
///
/// Returns the specifiers actually in effect (duplicates removed, directions
/// corrected, unsortable fields dropped, at most `max` entries) and the
/// comparator chain, or `None` when nothing is sortable.
pub fn resolve_specifiers<R>(
    schema: &Schema<R>,
    specifiers: &[SortFieldSpecifier],
    max: usize,
) -> (Vec<SortFieldSpecifier>, Option<SortComparator<R>>) {
    let mut resolved: Vec<SortFieldSpecifier> = Vec::new();
    let mut keys = Vec::new();

    for spec in specifiers {
        if resolved.len() >= max {
            break;
        }
        if resolved.iter().any(|s| s.field_index == spec.field_index) {
            continue;
        }
        let Some(field) = schema.field(spec.field_index) else {
            continue;
        };
        let (preferred, fallback) = if spec.ascending {
            (field.compare(), field.compare_desc())
        } else {
            (field.compare_desc(), field.compare())
        };
        let (key, ascending) = match (preferred, fallback) {
            (Some(key), _) => (key, spec.ascending),
            (None, Some(key)) => (key, !spec.ascending),
            (None, None) => continue,
        };
        resolved.push(SortFieldSpecifier::new(spec.field_index, ascending));
        keys.push(key.clone());
    }

    let comparator = if keys.is_empty() {
        None
    } else {
        Some(SortComparator { keys })
    };
    (resolved, comparator)
}

/// Binary search over `[lo, hi)` of a sequence with the slot `skip` removed.
///
/// Indices are virtual: position `v` is the element that would sit at `v` once
/// `skip` is taken out. `cmp_at` receives the actual index and returns how that
/// element orders against the target. Returns the first virtual position whose
/// element is not `Less`, i.e. where the target belongs.
pub fn binary_search_with_skip<F>(lo: usize, hi: usize, skip: Option<usize>, mut cmp_at: F) -> usize
where
    F: FnMut(usize) -> Ordering,
{
    let actual = |v: usize| match skip {
        Some(s) if v >= s => v + 1,
        _ => v,
    };

    let mut lo = lo;
    let mut hi = hi;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cmp_at(actual(mid)) == Ordering::Less {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}
