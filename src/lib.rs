//! liverows - live sorted/filtered row views over an external record store
//!
//! A [`ViewEngine`] keeps the displayed row sequence of a virtualized table in
//! sync with a mutable record collection. It sorts by up to a few keys, filters
//! with a pluggable predicate, tags recently changed rows and cells with
//! expiring highlights, and hands the renderer minimal, precise notifications.
//!
//! The building blocks are usable on their own: [`RecordRowBinder`] for the
//! record to row binding, [`RecentChangeTracker`] for expiring highlights and
//! [`OrderedDualIndexMap`] for sparse correspondences between two independently
//! reorderable index spaces.
//!
//! ```
//! use liverows::{Field, RecordingClient, Schema, VecRecordStore, ViewConfig, ViewEngine};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let store = Rc::new(RefCell::new(VecRecordStore::from_values(vec![5i64, 1, 3])));
//! let schema = Rc::new(RefCell::new(Schema::new(vec![Field::by_key("value", |v: &i64| *v)])));
//! let client = RecordingClient::new();
//!
//! let mut view = ViewEngine::new(store.clone(), schema, Box::new(client.clone()), ViewConfig::default());
//! view.sort_by(0, None).unwrap();
//! let rows: Vec<i64> = view.visible_records().iter().map(|v| **v).collect();
//! assert_eq!(rows, vec![1, 3, 5]);
//!
//! store.borrow_mut().push(2);
//! view.records_inserted(3, 1, true).unwrap();
//! assert_eq!(*view.get_row_record(1).unwrap(), 2);
//! ```

pub mod binder;
pub mod changeset;
pub mod client;
pub mod clock;
pub mod config;
pub mod dual_index_map;
pub mod error;
pub mod recent_changes;
pub mod schema;
pub mod sort;
pub mod store;
pub mod view;

pub use binder::{RecordRowBinder, Row};
pub use changeset::{ClientNotification, IndexAdjuster, IndexRuns, NotificationQueue};
pub use client::{NullClient, RecordingClient, ViewClient, ViewCommand, ViewCommands};
pub use clock::{Clock, ExpiryTimer, ManualClock, NoopTimer, RecordingTimer, SystemClock};
pub use config::ViewConfig;
pub use dual_index_map::OrderedDualIndexMap;
pub use error::{ConfigError, ConsistencyError, DualIndexMapError, DualIndexMapResult, Side, ViewError, ViewResult};
pub use recent_changes::{
    CellPosition, ChangeId, RecentChangeDurations, RecentChangeTracker, RowChange, RowChangeKind,
    ValueChange, ValueChangeKind,
};
pub use schema::{Comparator, Field, FieldListChange, FieldListChangeKind, Schema};
pub use sort::{SortComparator, SortFieldSpecifier};
pub use store::{RecordStore, VecRecordStore};
pub use view::{RecordFilter, ViewEngine};
