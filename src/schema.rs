//! Field registry consumed by the view engine.
//!
//! A [`Schema`] is an ordered list of [`Field`]s. Each field may supply an
//! ascending and/or descending comparator; a field with neither cannot be
//! sorted on. Schema mutators return the [`FieldListChange`] the host must
//! forward to `ViewEngine::field_list_changed`.
//!
//! # Examples
//!
//! ```
//! use liverows::{Field, Schema};
//!
//! struct Trade { price: i64, symbol: String }
//!
//! let schema: Schema<Trade> = Schema::new(vec![
//!     Field::by_key("price", |t: &Trade| t.price),
//!     Field::by_key("symbol", |t: &Trade| t.symbol.clone()),
//!     Field::new("notes"),
//! ]);
//!
//! assert_eq!(schema.len(), 3);
//! assert_eq!(schema.get_field_index("symbol"), Some(1));
//! assert!(!schema.field(2).unwrap().is_sortable());
//! ```

use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

/// Compares two records by one field
pub type Comparator<R> = Rc<dyn Fn(&R, &R) -> Ordering>;

pub struct Field<R> {
    name: String,
    compare: Option<Comparator<R>>,
    compare_desc: Option<Comparator<R>>,
}

impl<R> Clone for Field<R> {
    fn clone(&self) -> Self {
        Field {
            name: self.name.clone(),
            compare: self.compare.clone(),
            compare_desc: self.compare_desc.clone(),
        }
    }
}

impl<R> fmt::Debug for Field<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("compare", &self.compare.is_some())
            .field("compare_desc", &self.compare_desc.is_some())
            .finish()
    }
}

impl<R> Field<R> {
    /// A field without comparators (not sortable)
    pub fn new(name: impl Into<String>) -> Self {
        Field {
            name: name.into(),
            compare: None,
            compare_desc: None,
        }
    }

    /// A field sortable both ways by an `Ord` key
    pub fn by_key<K, F>(name: impl Into<String>, key: F) -> Self
    where
        K: Ord,
        F: Fn(&R) -> K + 'static,
        R: 'static,
    {
        let key = Rc::new(key);
        let desc_key = key.clone();
        Field {
            name: name.into(),
            compare: Some(Rc::new(move |a: &R, b: &R| key(a).cmp(&key(b)))),
            compare_desc: Some(Rc::new(move |a: &R, b: &R| desc_key(b).cmp(&desc_key(a)))),
        }
    }

    pub fn with_compare<F>(mut self, compare: F) -> Self
    where
        F: Fn(&R, &R) -> Ordering + 'static,
    {
        self.compare = Some(Rc::new(compare));
        self
    }

    pub fn with_compare_desc<F>(mut self, compare_desc: F) -> Self
    where
        F: Fn(&R, &R) -> Ordering + 'static,
    {
        self.compare_desc = Some(Rc::new(compare_desc));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn compare(&self) -> Option<&Comparator<R>> {
        self.compare.as_ref()
    }

    pub fn compare_desc(&self) -> Option<&Comparator<R>> {
        self.compare_desc.as_ref()
    }

    pub fn is_sortable(&self) -> bool {
        self.compare.is_some() || self.compare_desc.is_some()
    }
}

/// Kind of structural change to the field list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldListChangeKind {
    Insert,
    Remove,
    Move,
    Set,
    Clear,
}

/// A field list change: `count` fields at `index`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldListChange {
    pub kind: FieldListChangeKind,
    pub index: usize,
    pub count: usize,
}

impl FieldListChange {
    pub fn new(kind: FieldListChangeKind, index: usize, count: usize) -> Self {
        FieldListChange { kind, index, count }
    }
}

pub struct Schema<R> {
    fields: Vec<Field<R>>,
}

impl<R> Clone for Schema<R> {
    fn clone(&self) -> Self {
        Schema {
            fields: self.fields.clone(),
        }
    }
}

impl<R> fmt::Debug for Schema<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.fields.iter()).finish()
    }
}

impl<R> Default for Schema<R> {
    fn default() -> Self {
        Schema { fields: Vec::new() }
    }
}

impl<R> Schema<R> {
    pub fn new(fields: Vec<Field<R>>) -> Self {
        Schema { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[Field<R>] {
        &self.fields
    }

    pub fn field(&self, index: usize) -> Option<&Field<R>> {
        self.fields.get(index)
    }

    /// Returns the index of a field by name, or None if not found.
    pub fn get_field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    /// Insert fields at `index` (clamped to the end)
    pub fn insert_fields(&mut self, index: usize, fields: Vec<Field<R>>) -> FieldListChange {
        let index = index.min(self.fields.len());
        let count = fields.len();
        self.fields.splice(index..index, fields);
        FieldListChange::new(FieldListChangeKind::Insert, index, count)
    }

    /// Remove up to `count` fields starting at `index`
    pub fn remove_fields(&mut self, index: usize, count: usize) -> FieldListChange {
        let start = index.min(self.fields.len());
        let end = (index + count).min(self.fields.len());
        self.fields.drain(start..end);
        FieldListChange::new(FieldListChangeKind::Remove, start, end - start)
    }

    /// Move `count` fields from `from` so they start at `to`
    pub fn move_fields(&mut self, from: usize, to: usize, count: usize) -> FieldListChange {
        let moved: Vec<Field<R>> = self.fields.drain(from..from + count).collect();
        self.fields.splice(to..to, moved);
        FieldListChange::new(FieldListChangeKind::Move, from, count)
    }

    /// Replace every field
    pub fn set_fields(&mut self, fields: Vec<Field<R>>) -> FieldListChange {
        self.fields = fields;
        FieldListChange::new(FieldListChangeKind::Set, 0, self.fields.len())
    }

    pub fn clear(&mut self) -> FieldListChange {
        let count = self.fields.len();
        self.fields.clear();
        FieldListChange::new(FieldListChangeKind::Clear, 0, count)
    }
}
