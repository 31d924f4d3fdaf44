//! Ordered dual index map
//!
//! Keeps two independently reorderable index spaces, "left" and "right",
//! cross-referenced in O(log n) even when entries exist on only one side.
//!
//! # Design
//!
//! Each paired entry carries one sparse integer "ref" per side. Refs are drawn
//! from `[0, REF_MAX)` and increase with position along their side (ignoring
//! unpaired slots, which hold [`NO_REF`]). Four parallel arrays hold them:
//!
//! - `left_to_ref[l]`: left ref of the entry at left position `l`
//! - `ref_to_right[r]`: left ref of the entry at right position `r`
//! - `right_to_ref[r]`: right ref of the entry at right position `r`
//! - `ref_to_left[l]`: right ref of the entry at left position `l`
//!
//! So `get_right_index(l)` is a binary search of `right_to_ref` for
//! `ref_to_left[l]`. Inserting picks the midpoint between the nearest neighbour
//! refs; when neighbours are adjacent integers the side is redistributed around
//! the insertion point and the insert retried.
//!
//! # Examples
//!
//! ```
//! use liverows::OrderedDualIndexMap;
//!
//! let mut map = OrderedDualIndexMap::new();
//! map.add(Some(0), Some(0)).unwrap();
//! map.add(Some(1), Some(0)).unwrap(); // left 1 pairs with right 0; old right 0 shifts to 1
//! map.add(Some(2), None).unwrap();    // left only
//!
//! assert_eq!(map.get_right_index(0), Some(1));
//! assert_eq!(map.get_right_index(1), Some(0));
//! assert_eq!(map.get_right_index(2), None);
//! assert_eq!(map.get_left_index(1), Some(0));
//! assert!(map.verify().is_ok());
//! ```

use crate::error::{ConsistencyError, DualIndexMapError, DualIndexMapResult, Side};
use std::collections::HashMap;
use std::hash::Hash;

/// Sentinel for "no counterpart on the other side"
pub const NO_REF: i32 = -1;
/// Exclusive upper bound of the ref space
pub const REF_MAX: i32 = 0x7FFF_FFFF;
/// Ref given to the first entry of an empty side
pub const REF_MIDPOINT: i32 = 0x4000_0000;

/// One side's pair of arrays: its own refs and the other side's refs of its counterparts
#[derive(Debug, Clone, Default)]
struct Lane {
    to_ref: Vec<i32>,
    other_ref: Vec<i32>,
}

impl Lane {
    fn len(&self) -> usize {
        self.to_ref.len()
    }

    fn insert_unpaired(&mut self, index: usize) {
        self.to_ref.insert(index, NO_REF);
        self.other_ref.insert(index, NO_REF);
    }

    fn remove(&mut self, index: usize) {
        self.to_ref.remove(index);
        self.other_ref.remove(index);
    }

    fn unpair(&mut self, index: usize) {
        self.to_ref[index] = NO_REF;
        self.other_ref[index] = NO_REF;
    }

    fn is_paired(&self, index: usize) -> bool {
        self.to_ref[index] != NO_REF
    }

    fn clear(&mut self) {
        self.to_ref.clear();
        self.other_ref.clear();
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrderedDualIndexMap {
    left: Lane,
    right: Lane,
}

impl OrderedDualIndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map with `length` entries paired 1:1 in the same order
    pub fn with_one_to_one(length: usize) -> Self {
        let mut map = Self::new();
        map.one_to_one(length);
        map
    }

    pub fn left_count(&self) -> usize {
        self.left.len()
    }

    pub fn right_count(&self) -> usize {
        self.right.len()
    }

    /// Number of paired entries
    pub fn pair_count(&self) -> usize {
        self.left.to_ref.iter().filter(|&&r| r != NO_REF).count()
    }

    pub fn clear(&mut self) {
        self.left.clear();
        self.right.clear();
    }

    /// Insert an entry. With both indices the new left and right entries are
    /// paired; with one index the entry exists on that side only.
    pub fn add(&mut self, left_index: Option<usize>, right_index: Option<usize>) -> DualIndexMapResult<()> {
        if let Some(l) = left_index {
            check_insert_bound(Side::Left, l, self.left.len())?;
        }
        if let Some(r) = right_index {
            check_insert_bound(Side::Right, r, self.right.len())?;
        }

        match (left_index, right_index) {
            (Some(l), Some(r)) => {
                self.left.insert_unpaired(l);
                self.right.insert_unpaired(r);
                pair_at(&mut self.left, &mut self.right, l, r);
            }
            (Some(l), None) => self.left.insert_unpaired(l),
            (None, Some(r)) => self.right.insert_unpaired(r),
            (None, None) => {}
        }
        Ok(())
    }

    /// Inverse of `add`. A pair must actually correspond; a single index must be unpaired.
    pub fn remove(&mut self, left_index: Option<usize>, right_index: Option<usize>) -> DualIndexMapResult<()> {
        if let Some(l) = left_index {
            check_bound(Side::Left, l, self.left.len())?;
        }
        if let Some(r) = right_index {
            check_bound(Side::Right, r, self.right.len())?;
        }
        let mismatch = DualIndexMapError::NotCorresponding {
            left: left_index,
            right: right_index,
        };

        match (left_index, right_index) {
            (Some(l), Some(r)) => {
                let corresponds = self.left.is_paired(l)
                    && self.left.other_ref[l] == self.right.to_ref[r]
                    && self.right.other_ref[r] == self.left.to_ref[l];
                if !corresponds {
                    return Err(mismatch);
                }
                self.left.remove(l);
                self.right.remove(r);
            }
            (Some(l), None) => {
                if self.left.is_paired(l) {
                    return Err(mismatch);
                }
                self.left.remove(l);
            }
            (None, Some(r)) => {
                if self.right.is_paired(r) {
                    return Err(mismatch);
                }
                self.right.remove(r);
            }
            (None, None) => {}
        }
        Ok(())
    }

    pub fn get_right_index(&self, left_index: usize) -> Option<usize> {
        counterpart(&self.left, &self.right, left_index)
    }

    pub fn get_left_index(&self, right_index: usize) -> Option<usize> {
        counterpart(&self.right, &self.left, right_index)
    }

    /// Right index the left entry maps to, or where it would map if it were paired
    pub fn get_nearest_right_index(&self, left_index: usize) -> DualIndexMapResult<usize> {
        check_bound(Side::Left, left_index, self.left.len())?;
        Ok(nearest(&self.left, &self.right, left_index))
    }

    /// Left index the right entry maps to, or where it would map if it were paired
    pub fn get_nearest_left_index(&self, right_index: usize) -> DualIndexMapResult<usize> {
        check_bound(Side::Right, right_index, self.right.len())?;
        Ok(nearest(&self.right, &self.left, right_index))
    }

    /// Re-pair the left entry with a new right entry inserted at `right_index`,
    /// removing its previous right entry. `None` just removes the right entry.
    /// Returns the prior right index.
    pub fn update_left(&mut self, left_index: usize, right_index: Option<usize>) -> DualIndexMapResult<Option<usize>> {
        update(&mut self.left, &mut self.right, Side::Left, left_index, right_index)
    }

    /// Mirror of `update_left`
    pub fn update_right(&mut self, right_index: usize, left_index: Option<usize>) -> DualIndexMapResult<Option<usize>> {
        update(&mut self.right, &mut self.left, Side::Right, right_index, left_index)
    }

    /// Reset to `length` entries per side, entry `i` paired with `i`
    pub fn one_to_one(&mut self, length: usize) {
        let refs: Vec<i32> = (0..length).map(|i| spread_ref(i, length)).collect();
        self.left.to_ref = refs.clone();
        self.left.other_ref = refs.clone();
        self.right.to_ref = refs.clone();
        self.right.other_ref = refs;
    }

    /// Rebuild from two sequences, pairing equal values (first unused match wins).
    /// Unmatched values become single-sided entries.
    pub fn populate<T: Eq + Hash>(&mut self, left: &[T], right: &[T]) {
        let mut positions: HashMap<&T, Vec<usize>> = HashMap::with_capacity(right.len());
        for (r, value) in right.iter().enumerate().rev() {
            positions.entry(value).or_default().push(r);
        }

        let matches: Vec<Option<usize>> = left
            .iter()
            .map(|value| positions.get_mut(value).and_then(|p| p.pop()))
            .collect();

        self.clear();
        self.left.to_ref = vec![NO_REF; left.len()];
        self.left.other_ref = vec![NO_REF; left.len()];
        self.right.to_ref = vec![NO_REF; right.len()];
        self.right.other_ref = vec![NO_REF; right.len()];

        for (l, matched) in matches.iter().enumerate() {
            if matched.is_some() {
                self.left.to_ref[l] = spread_ref(l, left.len());
            }
        }
        for (l, matched) in matches.into_iter().enumerate() {
            if let Some(r) = matched {
                let right_ref = spread_ref(r, right.len());
                self.right.to_ref[r] = right_ref;
                self.right.other_ref[r] = self.left.to_ref[l];
                self.left.other_ref[l] = right_ref;
            }
        }
    }

    /// O(n) cross validation of all four arrays
    pub fn verify(&self) -> Result<(), ConsistencyError> {
        verify_lane(&self.left, &self.right, Side::Left)?;
        verify_lane(&self.right, &self.left, Side::Right)?;

        let left_pairs = self.pair_count();
        let right_pairs = self.right.to_ref.iter().filter(|&&r| r != NO_REF).count();
        if left_pairs != right_pairs {
            return Err(ConsistencyError::PairCountMismatch {
                left: left_pairs,
                right: right_pairs,
            });
        }
        Ok(())
    }
}

fn check_bound(side: Side, index: usize, len: usize) -> DualIndexMapResult<()> {
    if index >= len {
        return Err(DualIndexMapError::OutOfRange { side, index, len });
    }
    Ok(())
}

fn check_insert_bound(side: Side, index: usize, len: usize) -> DualIndexMapResult<()> {
    if index > len {
        return Err(DualIndexMapError::OutOfRange { side, index, len });
    }
    Ok(())
}

/// Evenly spaced ref for position `index` of `len`
fn spread_ref(index: usize, len: usize) -> i32 {
    ((index as u64 + 1) * REF_MAX as u64 / (len as u64 + 1)) as i32
}

/// Binary search over refs that may contain `NO_REF` runs.
///
/// A sentinel probe is replaced by the nearest valid ref below it within the
/// current window, or above it if the lower part of the window is all sentinels.
/// Returns `Ok(position)` or `Err(insertion point)`.
fn search(refs: &[i32], target: i32) -> Result<usize, usize> {
    let mut lo = 0;
    let mut hi = refs.len();
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        let probe = match (lo..=mid).rev().find(|&i| refs[i] != NO_REF) {
            Some(p) => p,
            None => match (mid + 1..hi).find(|&i| refs[i] != NO_REF) {
                Some(p) => p,
                None => return Err(lo),
            },
        };
        match refs[probe].cmp(&target) {
            std::cmp::Ordering::Equal => return Ok(probe),
            std::cmp::Ordering::Less => lo = probe + 1,
            std::cmp::Ordering::Greater => hi = probe,
        }
    }
    Err(lo)
}

/// Position of `target` in `refs`; the ref must be present
fn locate(refs: &[i32], target: i32) -> usize {
    match search(refs, target) {
        Ok(position) => position,
        Err(_) => panic!("dual index map: ref {target} has no counterpart"),
    }
}

fn counterpart(this: &Lane, other: &Lane, index: usize) -> Option<usize> {
    let other_ref = *this.other_ref.get(index)?;
    if other_ref == NO_REF {
        return None;
    }
    search(&other.to_ref, other_ref).ok()
}

fn nearest(this: &Lane, other: &Lane, index: usize) -> usize {
    if let Some(position) = counterpart(this, other, index) {
        return position;
    }
    if let Some(below) = (0..index).rev().find(|&i| this.is_paired(i)) {
        return locate(&other.to_ref, this.other_ref[below]) + 1;
    }
    if let Some(above) = (index + 1..this.len()).find(|&i| this.is_paired(i)) {
        return locate(&other.to_ref, this.other_ref[above]);
    }
    other.len()
}

/// Ref strictly between the nearest valid neighbours of `index`, or `NO_REF`
/// if they are adjacent integers
fn allocate_ref(refs: &[i32], index: usize) -> i32 {
    let lower = refs[..index].iter().rev().find(|&&r| r != NO_REF).copied();
    let upper = refs[index + 1..].iter().find(|&&r| r != NO_REF).copied();
    if lower.is_none() && upper.is_none() {
        return REF_MIDPOINT;
    }
    let lo = lower.map_or(-1i64, i64::from);
    let hi = upper.map_or(REF_MAX as i64, i64::from);
    if hi - lo < 2 {
        NO_REF
    } else {
        (lo + (hi - lo) / 2) as i32
    }
}

fn relabel(this: &mut Lane, other: &mut Lane, index: usize, new_ref: i32) {
    let other_ref = this.other_ref[index];
    if other_ref != NO_REF {
        let position = locate(&other.to_ref, other_ref);
        other.other_ref[position] = new_ref;
    }
    this.to_ref[index] = new_ref;
}

/// Spread refs outward from `index` towards their ideal values, stopping on
/// each side at the first ref that already leaves enough room.
fn redistribute(this: &mut Lane, other: &mut Lane, index: usize) {
    let n = this.len().saturating_sub(1) as u64;
    let ideal = |i: usize| ((i as u64 + 1) * REF_MAX as u64 / (n + 3)) as i32;
    let mut moved = 0usize;

    for k in index + 1..this.len() {
        let current = this.to_ref[k];
        if current == NO_REF {
            continue;
        }
        let target = ideal(k);
        if current >= target {
            break;
        }
        relabel(this, other, k, target);
        moved += 1;
    }

    for k in (0..index).rev() {
        let current = this.to_ref[k];
        if current == NO_REF {
            continue;
        }
        let target = ideal(k);
        if current <= target {
            break;
        }
        relabel(this, other, k, target);
        moved += 1;
    }

    log::debug!("redistributed {} refs around index {} of {}", moved, index, this.len());
}

fn assign_ref(this: &mut Lane, other: &mut Lane, index: usize) -> i32 {
    let mut new_ref = allocate_ref(&this.to_ref, index);
    if new_ref == NO_REF {
        redistribute(this, other, index);
        new_ref = allocate_ref(&this.to_ref, index);
        assert_ne!(new_ref, NO_REF, "dual index map: redistribution left no room at {index}");
    }
    this.to_ref[index] = new_ref;
    new_ref
}

/// Pair two existing unpaired slots
fn pair_at(this: &mut Lane, other: &mut Lane, this_index: usize, other_index: usize) {
    let this_ref = assign_ref(this, other, this_index);
    let other_ref = assign_ref(other, this, other_index);
    this.other_ref[this_index] = other_ref;
    other.other_ref[other_index] = this_ref;
}

fn update(
    this: &mut Lane,
    other: &mut Lane,
    side: Side,
    index: usize,
    new_other_index: Option<usize>,
) -> DualIndexMapResult<Option<usize>> {
    check_bound(side, index, this.len())?;
    let previous = counterpart(this, other, index);
    if let Some(new_index) = new_other_index {
        let other_len = other.len() - usize::from(previous.is_some());
        let other_side = match side {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        };
        check_insert_bound(other_side, new_index, other_len)?;
    }

    if let Some(old_index) = previous {
        other.remove(old_index);
        this.unpair(index);
    }
    if let Some(new_index) = new_other_index {
        other.insert_unpaired(new_index);
        pair_at(this, other, index, new_index);
    }
    Ok(previous)
}

fn verify_lane(this: &Lane, other: &Lane, side: Side) -> Result<(), ConsistencyError> {
    if this.to_ref.len() != this.other_ref.len() {
        return Err(ConsistencyError::LengthMismatch {
            side,
            refs: this.to_ref.len(),
            cross: this.other_ref.len(),
        });
    }

    let mut previous: Option<i32> = None;
    for (index, (&own, &cross)) in this.to_ref.iter().zip(this.other_ref.iter()).enumerate() {
        if (own == NO_REF) != (cross == NO_REF) {
            return Err(ConsistencyError::HalfPaired { side, index });
        }
        if own == NO_REF {
            continue;
        }
        if !(0..REF_MAX).contains(&own) {
            return Err(ConsistencyError::RefOutOfSpace { side, index, value: own });
        }
        if previous.is_some_and(|p| p >= own) {
            return Err(ConsistencyError::RefOrder { side, index });
        }
        previous = Some(own);

        match search(&other.to_ref, cross) {
            Ok(position) if other.other_ref[position] == own => {}
            _ => return Err(ConsistencyError::Unpaired { side, index }),
        }
    }
    Ok(())
}
