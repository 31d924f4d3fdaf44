//! Record store contract.
//!
//! The store owns the records and their canonical order. The view engine only
//! reads it: when the host reports a mutation (`records_inserted`, ...) the
//! engine pulls the affected records by index.
//!
//! ```
//! use liverows::{RecordStore, VecRecordStore};
//!
//! let mut store = VecRecordStore::from_values(vec![5, 1, 3]);
//! store.insert(1, 9);
//! assert_eq!(store.record_count(), 4);
//! assert_eq!(*store.get_record(1), 9);
//! ```

use std::rc::Rc;

pub trait RecordStore {
    type Record;

    fn record_count(&self) -> usize;

    /// Record at `index`. Panics if out of range, like slice indexing.
    fn get_record(&self, index: usize) -> Rc<Self::Record>;

    fn get_records(&self) -> Vec<Rc<Self::Record>> {
        (0..self.record_count()).map(|i| self.get_record(i)).collect()
    }
}

/// Store backed by a `Vec<Rc<R>>`
#[derive(Debug, Clone)]
pub struct VecRecordStore<R> {
    records: Vec<Rc<R>>,
}

impl<R> Default for VecRecordStore<R> {
    fn default() -> Self {
        VecRecordStore {
            records: Vec::new(),
        }
    }
}

impl<R> VecRecordStore<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_values(values: Vec<R>) -> Self {
        VecRecordStore {
            records: values.into_iter().map(Rc::new).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn push(&mut self, value: R) -> usize {
        self.records.push(Rc::new(value));
        self.records.len() - 1
    }

    pub fn insert(&mut self, index: usize, value: R) {
        self.records.insert(index, Rc::new(value));
    }

    pub fn insert_many(&mut self, index: usize, values: Vec<R>) {
        self.records
            .splice(index..index, values.into_iter().map(Rc::new));
    }

    pub fn remove(&mut self, index: usize, count: usize) -> Vec<Rc<R>> {
        self.records.drain(index..index + count).collect()
    }

    /// Move `count` records from `from` so they start at `to`
    pub fn move_records(&mut self, from: usize, to: usize, count: usize) {
        let moved: Vec<Rc<R>> = self.records.drain(from..from + count).collect();
        self.records.splice(to..to, moved);
    }

    /// Replace the record at `index` with a new object
    pub fn replace(&mut self, index: usize, value: R) -> Rc<R> {
        std::mem::replace(&mut self.records[index], Rc::new(value))
    }

    pub fn set_all(&mut self, values: Vec<R>) {
        self.records = values.into_iter().map(Rc::new).collect();
    }
}

impl<R> RecordStore for VecRecordStore<R> {
    type Record = R;

    fn record_count(&self) -> usize {
        self.records.len()
    }

    fn get_record(&self, index: usize) -> Rc<R> {
        self.records[index].clone()
    }

    fn get_records(&self) -> Vec<Rc<R>> {
        self.records.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_move_records() {
        let mut store = VecRecordStore::from_values(vec!['a', 'b', 'c', 'd', 'e']);
        store.move_records(1, 3, 2);
        let values: Vec<char> = store.get_records().iter().map(|r| **r).collect();
        assert_eq!(values, vec!['a', 'd', 'e', 'b', 'c']);
    }

    #[test]
    fn test_replace_returns_old() {
        let mut store = VecRecordStore::from_values(vec![1, 2]);
        let old = store.replace(0, 10);
        assert_eq!(*old, 1);
        assert_eq!(*store.get_record(0), 10);
    }

    #[test]
    fn test_insert_and_remove_many() {
        let mut store = VecRecordStore::from_values(vec![1, 5]);
        store.insert_many(1, vec![2, 3, 4]);
        assert_eq!(store.len(), 5);
        let removed = store.remove(0, 2);
        assert_eq!(removed.len(), 2);
        assert_eq!(*store.get_record(0), 3);
    }
}
