//! Recent change tracking
//!
//! Rows and cells that changed recently carry a short-lived tag so the renderer
//! can highlight them. Every live tag also sits in an expiry queue ordered by
//! `(expiry, id)`; one timer, set for the earliest expiry, drives batched
//! removal.
//!
//! Invariant: each queue entry is held by exactly one row (as its row change or
//! as the value change for the entry's field) and every tag held by a row is
//! queued. The view engine keeps this true across its reindexing operations by
//! calling the `process_*` hooks below.

use crate::binder::{RecordRowBinder, Row};
use crate::changeset::IndexAdjuster;
use crate::clock::{Clock, ExpiryTimer};
use crate::config::ViewConfig;
use crate::error::ConsistencyError;
use crate::schema::{FieldListChange, FieldListChangeKind};
use std::rc::Rc;

/// Identity of a recent change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChangeId(u64);

impl ChangeId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowChangeKind {
    Inserted,
    Updated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueChangeKind {
    Changed,
    Increased,
    Decreased,
}

/// Row level recent change tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowChange {
    pub id: ChangeId,
    pub kind: RowChangeKind,
    pub expiry_ms: u64,
}

/// Cell level recent change tag
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueChange {
    pub id: ChangeId,
    pub field_index: usize,
    pub kind: ValueChangeKind,
    pub expiry_ms: u64,
}

/// Position of an expired cell highlight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellPosition {
    pub field_index: usize,
    pub row_index: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChangeTarget {
    Row(RowChangeKind),
    Value { field_index: usize, kind: ValueChangeKind },
}

#[derive(Debug, Clone)]
struct QueueEntry {
    id: ChangeId,
    expiry_ms: u64,
    target: ChangeTarget,
    /// Row index, or record index between pre and post reindex
    index: usize,
}

/// Lifetimes per change kind; 0 disables a kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecentChangeDurations {
    pub record_inserted_ms: u64,
    pub record_updated_ms: u64,
    pub value_changed_ms: u64,
}

impl From<&ViewConfig> for RecentChangeDurations {
    fn from(config: &ViewConfig) -> Self {
        RecentChangeDurations {
            record_inserted_ms: config.record_inserted_duration_ms,
            record_updated_ms: config.record_updated_duration_ms,
            value_changed_ms: config.value_changed_duration_ms,
        }
    }
}

pub struct RecentChangeTracker {
    durations: RecentChangeDurations,
    clock: Rc<dyn Clock>,
    timer: Box<dyn ExpiryTimer>,
    queue: Vec<QueueEntry>,
    next_id: u64,
    scheduled: Option<u64>,
    reindexing: bool,
}

impl RecentChangeTracker {
    pub fn new(durations: RecentChangeDurations, clock: Rc<dyn Clock>, timer: Box<dyn ExpiryTimer>) -> Self {
        RecentChangeTracker {
            durations,
            clock,
            timer,
            queue: Vec::new(),
            next_id: 0,
            scheduled: None,
            reindexing: false,
        }
    }

    pub fn durations(&self) -> RecentChangeDurations {
        self.durations
    }

    pub fn set_durations(&mut self, durations: RecentChangeDurations) {
        self.durations = durations;
    }

    /// Number of live changes
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Time the timer is currently set for
    pub fn scheduled_expiry(&self) -> Option<u64> {
        self.scheduled
    }

    pub fn add_record_inserted_change(&mut self, rows: &mut [Row], row_index: usize) {
        self.add_row_change(rows, row_index, RowChangeKind::Inserted);
    }

    pub fn add_record_updated_change(&mut self, rows: &mut [Row], row_index: usize) {
        self.add_row_change(rows, row_index, RowChangeKind::Updated);
    }

    /// Create or refresh the row level change of a row
    pub fn add_row_change(&mut self, rows: &mut [Row], row_index: usize, kind: RowChangeKind) {
        let duration = match kind {
            RowChangeKind::Inserted => self.durations.record_inserted_ms,
            RowChangeKind::Updated => self.durations.record_updated_ms,
        };
        if duration == 0 {
            return;
        }
        assert!(!self.reindexing, "recent change added during a reindex");

        if let Some(existing) = rows[row_index].recent_change.take() {
            self.remove_entry(existing.id, existing.expiry_ms);
        }
        let id = self.allocate_id();
        let expiry_ms = self.clock.now_ms() + duration;
        rows[row_index].recent_change = Some(RowChange { id, kind, expiry_ms });
        self.enqueue(QueueEntry {
            id,
            expiry_ms,
            target: ChangeTarget::Row(kind),
            index: row_index,
        });
    }

    /// Create or refresh the change of one cell
    pub fn add_value_change(&mut self, rows: &mut [Row], field_index: usize, row_index: usize, kind: ValueChangeKind) {
        let duration = self.durations.value_changed_ms;
        if duration == 0 {
            return;
        }
        assert!(!self.reindexing, "recent change added during a reindex");

        let row = &mut rows[row_index];
        if let Some(position) = row
            .value_recent_changes
            .iter()
            .position(|c| c.field_index == field_index)
        {
            let existing = row.value_recent_changes.swap_remove(position);
            self.remove_entry(existing.id, existing.expiry_ms);
        }
        let id = self.allocate_id();
        let expiry_ms = self.clock.now_ms() + duration;
        rows[row_index].value_recent_changes.push(ValueChange {
            id,
            field_index,
            kind,
            expiry_ms,
        });
        self.enqueue(QueueEntry {
            id,
            expiry_ms,
            target: ChangeTarget::Value { field_index, kind },
            index: row_index,
        });
    }

    pub fn add_record_values_changes(&mut self, rows: &mut [Row], row_index: usize, changes: &[(usize, ValueChangeKind)]) {
        for &(field_index, kind) in changes {
            self.add_value_change(rows, field_index, row_index, kind);
        }
    }

    // ==================== Reindexing protocol ====================

    /// Switch every entry from its row index to its record index, before rows are rebuilt
    pub fn process_pre_reindex(&mut self, rows: &[Row]) {
        assert!(!self.reindexing, "nested reindex");
        for entry in &mut self.queue {
            entry.index = rows[entry.index].record_index;
        }
        self.reindexing = true;
    }

    /// Switch entries back to row indices and reattach their tags to the rebuilt rows.
    ///
    /// Entries whose record lost its row are dropped, unless `all_rows_kept`
    /// was asserted, in which case a missing row is an invariant violation.
    pub fn process_post_reindex<R>(&mut self, binder: &mut RecordRowBinder<R>, all_rows_kept: bool) {
        assert!(self.reindexing, "post reindex without pre reindex");
        self.reindexing = false;

        let mut dropped = 0usize;
        let mut kept = Vec::with_capacity(self.queue.len());
        for mut entry in self.queue.drain(..) {
            match binder.row_of_record(entry.index) {
                Some(row_index) => {
                    entry.index = row_index;
                    attach(&mut binder.rows_mut()[row_index], &entry);
                    kept.push(entry);
                }
                None => {
                    assert!(
                        !all_rows_kept,
                        "record {} lost its row during a reindex that kept all rows",
                        entry.index
                    );
                    dropped += 1;
                }
            }
        }
        self.queue = kept;
        if dropped > 0 {
            log::debug!("dropped {} recent changes of rows removed by reindex", dropped);
        }
        self.update_timer();
    }

    // ==================== Structural adjustment ====================

    pub fn process_rows_inserted(&mut self, row_index: usize, count: usize) {
        for entry in &mut self.queue {
            entry.index = IndexAdjuster::adjust_for_insert(entry.index, row_index, count);
        }
    }

    /// Drop the changes of deleted rows and shift the rest
    pub fn process_rows_deleted(&mut self, row_index: usize, count: usize) {
        let before = self.queue.len();
        self.queue.retain_mut(|entry| {
            match IndexAdjuster::adjust_for_delete(entry.index, row_index, count) {
                Some(index) => {
                    entry.index = index;
                    true
                }
                None => false,
            }
        });
        if self.queue.len() != before {
            self.update_timer();
        }
    }

    pub fn process_rows_moved(&mut self, from: usize, to: usize, count: usize) {
        for entry in &mut self.queue {
            entry.index = IndexAdjuster::adjust_for_move(entry.index, from, to, count);
        }
    }

    /// Keep cell changes on their fields after the field list changed. Changes of
    /// removed fields are dropped; `Set` and `Clear` drop every cell change.
    pub fn process_fields_changed(&mut self, rows: &mut [Row], change: FieldListChange) {
        let FieldListChange { kind, index, count } = change;
        let remap = |field_index: usize| -> Option<usize> {
            match kind {
                FieldListChangeKind::Insert => Some(IndexAdjuster::adjust_for_insert(field_index, index, count)),
                FieldListChangeKind::Remove => IndexAdjuster::adjust_for_delete(field_index, index, count),
                FieldListChangeKind::Set | FieldListChangeKind::Clear => None,
                FieldListChangeKind::Move => panic!("moving fields is not supported by the recent change tracker"),
            }
        };

        for row in rows.iter_mut() {
            row.value_recent_changes.retain_mut(|c| match remap(c.field_index) {
                Some(field_index) => {
                    c.field_index = field_index;
                    true
                }
                None => false,
            });
        }
        let before = self.queue.len();
        self.queue.retain_mut(|entry| match &mut entry.target {
            ChangeTarget::Row(_) => true,
            ChangeTarget::Value { field_index, .. } => match remap(*field_index) {
                Some(shifted) => {
                    *field_index = shifted;
                    true
                }
                None => false,
            },
        });
        if self.queue.len() != before {
            log::debug!("dropped {} cell changes of removed fields", before - self.queue.len());
            self.update_timer();
        }
    }

    // ==================== Expiry ====================

    /// Remove every change that has expired, clear its tag and report the batch
    /// to `on_expired(cells, rows)` once. Returns the number of expired changes.
    pub fn process_next_expiry_timeout<F>(&mut self, rows: &mut [Row], on_expired: F) -> usize
    where
        F: FnOnce(&[CellPosition], &[usize]),
    {
        self.scheduled = None;
        let now = self.clock.now_ms();
        let expired_count = self.queue.partition_point(|e| e.expiry_ms <= now);

        let mut cells = Vec::new();
        let mut expired_rows = Vec::new();
        for entry in self.queue.drain(..expired_count) {
            let row = &mut rows[entry.index];
            match entry.target {
                ChangeTarget::Row(_) => {
                    row.recent_change = None;
                    expired_rows.push(entry.index);
                }
                ChangeTarget::Value { field_index, .. } => {
                    row.value_recent_changes.retain(|c| c.id != entry.id);
                    cells.push(CellPosition {
                        field_index,
                        row_index: entry.index,
                    });
                }
            }
        }

        if expired_count > 0 {
            log::debug!(
                "expired {} recent changes ({} cells, {} rows)",
                expired_count,
                cells.len(),
                expired_rows.len()
            );
            on_expired(&cells, &expired_rows);
        }
        self.update_timer();
        expired_count
    }

    /// Remove every change ("all changed" reset)
    pub fn clear(&mut self, rows: &mut [Row]) {
        for entry in self.queue.drain(..) {
            if let Some(row) = rows.get_mut(entry.index) {
                row.recent_change = None;
                row.value_recent_changes.clear();
            }
        }
        self.reindexing = false;
        self.update_timer();
    }

    /// Forget every change and cancel the timer; used when the owning view goes away
    pub fn teardown(&mut self) {
        self.queue.clear();
        if self.scheduled.take().is_some() {
            self.timer.cancel();
        }
    }

    /// Bidirectional reachability between queue entries and row tags
    pub fn check_consistency(&self, rows: &[Row]) -> Result<(), ConsistencyError> {
        for (position, pair) in self.queue.windows(2).enumerate() {
            if (pair[0].expiry_ms, pair[0].id) >= (pair[1].expiry_ms, pair[1].id) {
                return Err(ConsistencyError::QueueOrder { position: position + 1 });
            }
        }

        for entry in &self.queue {
            let orphaned = ConsistencyError::OrphanedChange {
                id: entry.id.value(),
                row: entry.index,
            };
            let Some(row) = rows.get(entry.index) else {
                return Err(orphaned);
            };
            let held = match entry.target {
                ChangeTarget::Row(_) => row.recent_change.map(|c| c.id),
                ChangeTarget::Value { field_index, .. } => {
                    row.value_recent_change(field_index).map(|c| c.id)
                }
            };
            if held != Some(entry.id) {
                return Err(orphaned);
            }
        }

        let tagged: usize = rows.iter().map(Row::tag_count).sum();
        if tagged != self.queue.len() {
            // find a tag the queue does not know about
            for row in rows {
                let ids = row
                    .recent_change
                    .iter()
                    .map(|c| c.id)
                    .chain(row.value_recent_changes.iter().map(|c| c.id));
                for id in ids {
                    if !self.queue.iter().any(|e| e.id == id) {
                        return Err(ConsistencyError::UnqueuedChange {
                            id: id.value(),
                            row: row.index,
                        });
                    }
                }
            }
        }

        let expected = self.queue.first().map(|e| e.expiry_ms);
        if expected != self.scheduled {
            return Err(ConsistencyError::TimerMismatch {
                expected,
                scheduled: self.scheduled,
            });
        }
        Ok(())
    }

    fn allocate_id(&mut self) -> ChangeId {
        let id = ChangeId(self.next_id);
        self.next_id += 1;
        id
    }

    fn enqueue(&mut self, entry: QueueEntry) {
        let position = self.queue.partition_point(|e| e.expiry_ms <= entry.expiry_ms);
        self.queue.insert(position, entry);
        self.update_timer();
    }

    fn remove_entry(&mut self, id: ChangeId, expiry_ms: u64) {
        let position = self
            .queue
            .partition_point(|e| (e.expiry_ms, e.id) < (expiry_ms, id));
        assert!(
            self.queue.get(position).is_some_and(|e| e.id == id),
            "recent change {} held by a row is not queued",
            id.value()
        );
        self.queue.remove(position);
    }

    /// Point the timer at the earliest expiry
    fn update_timer(&mut self) {
        let due = self.queue.first().map(|e| e.expiry_ms);
        if due == self.scheduled {
            return;
        }
        if self.scheduled.is_some() {
            self.timer.cancel();
        }
        if let Some(due) = due {
            self.timer.schedule(due);
        }
        self.scheduled = due;
    }
}

impl Drop for RecentChangeTracker {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn attach(row: &mut Row, entry: &QueueEntry) {
    match entry.target {
        ChangeTarget::Row(kind) => {
            row.recent_change = Some(RowChange {
                id: entry.id,
                kind,
                expiry_ms: entry.expiry_ms,
            });
        }
        ChangeTarget::Value { field_index, kind } => {
            row.value_recent_changes.retain(|c| c.field_index != field_index);
            row.value_recent_changes.push(ValueChange {
                id: entry.id,
                field_index,
                kind,
                expiry_ms: entry.expiry_ms,
            });
        }
    }
}
