//! Record/row binding
//!
//! [`RecordRowBinder`] mirrors the store's record order in `records` and keeps
//! the displayed order in `rows`. A record is bound to at most one row; the
//! binding lives in the record's slot inside this binder, so the same `Rc<R>`
//! can be shown by several independent engines.
//!
//! Invariants outside a bracketed mutation:
//! - `rows[i].index == i`
//! - `records[rows[i].record_index].row == Some(i)`
//! - every bound slot is referenced by exactly one row

use crate::error::ConsistencyError;
use crate::recent_changes::{RowChange, ValueChange};
use std::rc::Rc;

/// Displayed projection of a visible record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub(crate) record_index: usize,
    pub(crate) index: usize,
    pub(crate) recent_change: Option<RowChange>,
    pub(crate) value_recent_changes: Vec<ValueChange>,
}

impl Row {
    fn new(record_index: usize, index: usize) -> Self {
        Row {
            record_index,
            index,
            recent_change: None,
            value_recent_changes: Vec::new(),
        }
    }

    pub fn record_index(&self) -> usize {
        self.record_index
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn recent_change(&self) -> Option<&RowChange> {
        self.recent_change.as_ref()
    }

    pub fn value_recent_changes(&self) -> &[ValueChange] {
        &self.value_recent_changes
    }

    pub fn value_recent_change(&self, field_index: usize) -> Option<&ValueChange> {
        self.value_recent_changes
            .iter()
            .find(|c| c.field_index == field_index)
    }

    /// Number of recent change tags carried by this row
    pub(crate) fn tag_count(&self) -> usize {
        usize::from(self.recent_change.is_some()) + self.value_recent_changes.len()
    }
}

#[derive(Debug)]
struct RecordSlot<R> {
    record: Rc<R>,
    row: Option<usize>,
}

#[derive(Debug)]
pub struct RecordRowBinder<R> {
    records: Vec<RecordSlot<R>>,
    rows: Vec<Row>,
}

impl<R> Default for RecordRowBinder<R> {
    fn default() -> Self {
        RecordRowBinder {
            records: Vec::new(),
            rows: Vec::new(),
        }
    }
}

impl<R> RecordRowBinder<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn record(&self, record_index: usize) -> &Rc<R> {
        &self.records[record_index].record
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub(crate) fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }

    pub fn row(&self, row_index: usize) -> Option<&Row> {
        self.rows.get(row_index)
    }

    /// Row bound to a record, if the record is visible
    pub fn row_of_record(&self, record_index: usize) -> Option<usize> {
        self.records.get(record_index).and_then(|slot| slot.row)
    }

    pub fn record_of_row(&self, row_index: usize) -> Option<usize> {
        self.rows.get(row_index).map(|row| row.record_index)
    }

    /// Replace every record and drop every row
    pub fn load_records(&mut self, records: Vec<Rc<R>>) {
        self.rows.clear();
        self.records = records
            .into_iter()
            .map(|record| RecordSlot { record, row: None })
            .collect();
    }

    pub fn clear(&mut self) {
        self.rows.clear();
        self.records.clear();
    }

    // ==================== Records ====================

    pub fn insert_record(&mut self, record_index: usize, record: Rc<R>) {
        self.insert_records(record_index, vec![record]);
    }

    /// Splice unbound records in at `record_index`
    pub fn insert_records(&mut self, record_index: usize, records: Vec<Rc<R>>) {
        let count = records.len();
        self.records.splice(
            record_index..record_index,
            records.into_iter().map(|record| RecordSlot { record, row: None }),
        );
        self.reindex_records(record_index + count, self.records.len());
    }

    /// Remove a record; returns the index its row had, if it was visible
    pub fn remove_record(&mut self, record_index: usize) -> Option<usize> {
        let row_index = self.records[record_index].row;
        if let Some(row_index) = row_index {
            self.remove_row(row_index);
        }
        self.records.remove(record_index);
        self.reindex_records(record_index, self.records.len());
        row_index
    }

    /// Remove `count` records. Any rows still bound are removed one at a time;
    /// callers wanting coalesced row removal unbind them first.
    pub fn remove_records(&mut self, record_index: usize, count: usize) -> Vec<usize> {
        let mut removed_rows = Vec::new();
        for slot_index in (record_index..record_index + count).rev() {
            if let Some(row_index) = self.records[slot_index].row {
                self.remove_row(row_index);
                removed_rows.push(row_index);
            }
        }
        self.records.drain(record_index..record_index + count);
        self.reindex_records(record_index, self.records.len());
        removed_rows
    }

    /// Swap in a new record object; returns the bound row index
    pub fn replace_record(&mut self, record_index: usize, record: Rc<R>) -> Option<usize> {
        let slot = &mut self.records[record_index];
        slot.record = record;
        slot.row
    }

    /// Move `count` records from `from` so they start at `to`. Rows keep their order.
    pub fn move_records(&mut self, from: usize, to: usize, count: usize) {
        if from == to || count == 0 {
            return;
        }
        let moved: Vec<RecordSlot<R>> = self.records.drain(from..from + count).collect();
        self.records.splice(to..to, moved);
        self.reindex_records(from.min(to), from.max(to) + count);
    }

    fn reindex_records(&mut self, start: usize, end: usize) {
        for record_index in start..end {
            if let Some(row_index) = self.records[record_index].row {
                self.rows[row_index].record_index = record_index;
            }
        }
    }

    // ==================== Rows ====================

    /// Bind an unbound record to a new row at `row_index`
    pub fn insert_row(&mut self, row_index: usize, record_index: usize) {
        self.insert_rows(&[(row_index, record_index)]);
    }

    /// Bind several unbound records in one splice.
    ///
    /// Each insertion is `(position, record_index)` where `position` is a row
    /// index among the rows present before the call. Insertions must be ordered
    /// by position; those sharing a position land in the given order. Returns
    /// the new rows as contiguous `(row_index, count)` runs in final row order.
    pub fn insert_rows(&mut self, insertions: &[(usize, usize)]) -> Vec<(usize, usize)> {
        let Some(&(first, _)) = insertions.first() else {
            return Vec::new();
        };
        let old_len = self.rows.len();
        let mut tail = self.rows.split_off(first).into_iter();
        self.rows.reserve(old_len - first + insertions.len());

        let mut runs: Vec<(usize, usize)> = Vec::new();
        let mut consumed = first;
        for &(position, record_index) in insertions {
            assert!(
                position >= consumed && position <= old_len,
                "row insertion at {position} out of order"
            );
            assert!(
                self.records[record_index].row.is_none(),
                "record {record_index} is already bound to a row"
            );
            self.rows.extend(tail.by_ref().take(position - consumed));
            consumed = position;

            let row_index = self.rows.len();
            match runs.last_mut() {
                Some((start, count)) if *start + *count == row_index => *count += 1,
                _ => runs.push((row_index, 1)),
            }
            self.rows.push(Row::new(record_index, row_index));
        }
        self.rows.extend(tail);
        self.reindex_rows(first, self.rows.len());
        runs
    }

    pub fn remove_row(&mut self, row_index: usize) -> Row {
        let row = self.rows.remove(row_index);
        self.records[row.record_index].row = None;
        self.reindex_rows(row_index, self.rows.len());
        row
    }

    pub fn remove_rows(&mut self, row_index: usize, count: usize) -> Vec<Row> {
        let removed: Vec<Row> = self.rows.drain(row_index..row_index + count).collect();
        for row in &removed {
            self.records[row.record_index].row = None;
        }
        self.reindex_rows(row_index, self.rows.len());
        removed
    }

    pub fn move_row(&mut self, from: usize, to: usize) {
        self.move_rows(from, to, 1);
    }

    /// Move `count` rows from `from` so they start at `to`, reindexing only the affected span
    pub fn move_rows(&mut self, from: usize, to: usize, count: usize) {
        if from == to || count == 0 {
            return;
        }
        if count == 1 {
            let row = self.rows.remove(from);
            self.rows.insert(to, row);
        } else {
            let moved: Vec<Row> = self.rows.drain(from..from + count).collect();
            self.rows.splice(to..to, moved);
        }
        self.reindex_rows(from.min(to), from.max(to) + count);
    }

    /// Replace all rows with fresh, untagged rows for `record_order`
    pub fn rebuild_rows(&mut self, record_order: &[usize]) {
        for row in &self.rows {
            self.records[row.record_index].row = None;
        }
        self.rows = record_order
            .iter()
            .enumerate()
            .map(|(row_index, &record_index)| Row::new(record_index, row_index))
            .collect();
        for row in &self.rows {
            self.records[row.record_index].row = Some(row.index);
        }
    }

    fn reindex_rows(&mut self, start: usize, end: usize) {
        for row_index in start..end {
            let row = &mut self.rows[row_index];
            row.index = row_index;
            self.records[row.record_index].row = Some(row_index);
        }
    }

    /// Row position for an unbound record when rows follow record order.
    ///
    /// Walks outward from the record looking for a bound neighbour, at most
    /// `scan_limit` steps each way, then falls back to a binary search of the
    /// rows by record index.
    pub fn find_insert_row_index(&self, record_index: usize, scan_limit: usize) -> usize {
        let record_count = self.records.len();
        for distance in 1..=scan_limit {
            let below = record_index.checked_sub(distance);
            let above = record_index + distance;
            if let Some(row_index) = below.and_then(|i| self.records[i].row) {
                return row_index + 1;
            }
            if above < record_count {
                if let Some(row_index) = self.records[above].row {
                    return row_index;
                }
            }
            if below.is_none() && above >= record_count {
                // scanned every record without finding a bound one
                return 0;
            }
        }
        self.rows.partition_point(|row| row.record_index < record_index)
    }

    /// O(rows + records) invariant check
    pub fn check_consistency(&self) -> Result<(), ConsistencyError> {
        for (position, row) in self.rows.iter().enumerate() {
            if row.index != position {
                return Err(ConsistencyError::RowIndexMismatch {
                    position,
                    index: row.index,
                });
            }
            let slot = self
                .records
                .get(row.record_index)
                .ok_or(ConsistencyError::RowRecordOutOfRange {
                    row: position,
                    record: row.record_index,
                })?;
            if slot.row != Some(position) {
                return Err(ConsistencyError::RecordBackReference {
                    row: position,
                    record: row.record_index,
                    bound: slot.row,
                });
            }
        }

        let bound = self.records.iter().filter(|slot| slot.row.is_some()).count();
        if bound != self.rows.len() {
            return Err(ConsistencyError::BoundCountMismatch {
                bound,
                rows: self.rows.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binder_with(values: &[i32]) -> RecordRowBinder<i32> {
        let mut binder = RecordRowBinder::new();
        binder.load_records(values.iter().map(|v| Rc::new(*v)).collect());
        let order: Vec<usize> = (0..values.len()).collect();
        binder.rebuild_rows(&order);
        binder
    }

    fn row_values(binder: &RecordRowBinder<i32>) -> Vec<i32> {
        binder.rows().iter().map(|r| **binder.record(r.record_index())).collect()
    }

    #[test]
    fn test_insert_and_remove_records() {
        let mut binder = binder_with(&[10, 20, 30]);
        binder.insert_record(1, Rc::new(15));
        assert_eq!(binder.row_of_record(1), None);
        assert_eq!(binder.record_of_row(1), Some(2));
        binder.insert_row(1, 1);
        assert_eq!(row_values(&binder), vec![10, 15, 20, 30]);
        binder.check_consistency().unwrap();

        assert_eq!(binder.remove_record(0), Some(0));
        assert_eq!(row_values(&binder), vec![15, 20, 30]);
        assert_eq!(binder.row_of_record(0), Some(0));
        binder.check_consistency().unwrap();
    }

    #[test]
    fn test_insert_rows_in_one_splice() {
        let mut binder = binder_with(&[10, 20, 30]);
        binder.insert_records(3, vec![Rc::new(5), Rc::new(25), Rc::new(26), Rc::new(40)]);
        // positions refer to the three existing rows
        let runs = binder.insert_rows(&[(0, 3), (2, 4), (2, 5), (3, 6)]);
        assert_eq!(row_values(&binder), vec![5, 10, 20, 25, 26, 30, 40]);
        assert_eq!(runs, vec![(0, 1), (3, 2), (6, 1)]);
        binder.check_consistency().unwrap();

        assert!(binder.insert_rows(&[]).is_empty());
    }

    #[test]
    fn test_insert_rows_adjacent_positions_merge() {
        let mut binder = binder_with(&[1, 2]);
        binder.remove_row(1);
        binder.insert_records(2, vec![Rc::new(3), Rc::new(4)]);
        let runs = binder.insert_rows(&[(1, 1), (1, 2), (1, 3)]);
        assert_eq!(runs, vec![(1, 3)]);
        assert_eq!(row_values(&binder), vec![1, 2, 3, 4]);
        binder.check_consistency().unwrap();
    }

    #[test]
    #[should_panic(expected = "out of order")]
    fn test_insert_rows_rejects_unordered_positions() {
        let mut binder = binder_with(&[1, 2, 3]);
        binder.insert_records(3, vec![Rc::new(4), Rc::new(5)]);
        binder.insert_rows(&[(2, 3), (1, 4)]);
    }

    #[test]
    fn test_remove_unbound_record() {
        let mut binder = binder_with(&[1, 2, 3]);
        binder.remove_row(1);
        assert_eq!(binder.remove_record(1), None);
        assert_eq!(row_values(&binder), vec![1, 3]);
        assert_eq!(binder.record_of_row(1), Some(1));
        binder.check_consistency().unwrap();
    }

    #[test]
    fn test_remove_records_range() {
        let mut binder = binder_with(&[1, 2, 3, 4, 5]);
        let removed = binder.remove_records(1, 3);
        assert_eq!(removed, vec![3, 2, 1]);
        assert_eq!(row_values(&binder), vec![1, 5]);
        binder.check_consistency().unwrap();
    }

    #[test]
    fn test_replace_record() {
        let mut binder = binder_with(&[1, 2]);
        assert_eq!(binder.replace_record(1, Rc::new(7)), Some(1));
        assert_eq!(row_values(&binder), vec![1, 7]);
    }

    #[test]
    fn test_move_rows_reindexes_span() {
        let mut binder = binder_with(&[0, 1, 2, 3, 4, 5]);
        binder.move_rows(1, 3, 2);
        assert_eq!(row_values(&binder), vec![0, 3, 4, 1, 2, 5]);
        binder.check_consistency().unwrap();

        binder.move_row(5, 0);
        assert_eq!(row_values(&binder), vec![5, 0, 3, 4, 1, 2]);
        binder.check_consistency().unwrap();
    }

    #[test]
    fn test_move_records_keeps_rows() {
        let mut binder = binder_with(&[0, 1, 2, 3]);
        binder.move_records(0, 2, 2);
        // rows still show 0,1,2,3 but their record indices changed
        assert_eq!(row_values(&binder), vec![0, 1, 2, 3]);
        assert_eq!(binder.record_of_row(0), Some(2));
        assert_eq!(binder.record_of_row(2), Some(0));
        binder.check_consistency().unwrap();
    }

    #[test]
    fn test_find_insert_row_index() {
        let mut binder = binder_with(&[0, 1, 2, 3, 4, 5]);
        binder.remove_row(2);
        binder.remove_row(2); // record 3
        assert_eq!(binder.find_insert_row_index(2, 10), 2);
        assert_eq!(binder.find_insert_row_index(3, 10), 2);

        // nothing bound within the scan limit: binary search fallback
        let mut sparse = binder_with(&[0, 1, 2, 3, 4, 5, 6, 7]);
        sparse.remove_rows(1, 6);
        assert_eq!(sparse.find_insert_row_index(3, 1), 1);
        assert_eq!(sparse.find_insert_row_index(6, 1), 1);

        let mut empty = binder_with(&[0, 1]);
        empty.remove_rows(0, 2);
        assert_eq!(empty.find_insert_row_index(1, 5), 0);
    }

    #[test]
    fn test_consistency_detects_corruption() {
        let mut binder = binder_with(&[1, 2, 3]);
        binder.rows[1].index = 7;
        assert!(matches!(
            binder.check_consistency(),
            Err(ConsistencyError::RowIndexMismatch { position: 1, index: 7 })
        ));

        let mut binder = binder_with(&[1, 2, 3]);
        binder.records[0].row = Some(2);
        assert!(matches!(
            binder.check_consistency(),
            Err(ConsistencyError::RecordBackReference { .. })
        ));
    }
}
