//! Host client contract.
//!
//! The renderer is the only consumer of the row sequence. It receives
//! notifications in public row indices (already mapped through row order
//! reversal) and queries the engine synchronously for row content.
//!
//! Handlers must not call back into the engine while it is dispatching. A
//! client that needs to react with a mutation pushes a [`ViewCommand`] onto a
//! [`ViewCommands`] handle shared with the engine; the engine runs the queued
//! commands once the batch has been delivered and then delivers whatever
//! those commands produced.

use crate::changeset::ClientNotification;
use crate::recent_changes::ValueChangeKind;
use std::cell::RefCell;
use std::rc::Rc;

pub trait ViewClient {
    fn begin_change(&mut self);
    fn end_change(&mut self);

    fn rows_inserted(&mut self, index: usize, count: usize);
    fn rows_deleted(&mut self, index: usize, count: usize);
    fn rows_moved(&mut self, from: usize, to: usize, count: usize);
    fn rows_loaded(&mut self);
    fn all_rows_deleted(&mut self);

    fn invalidate_all(&mut self);
    fn invalidate_row(&mut self, row: usize);
    fn invalidate_cell(&mut self, field: usize, row: usize);
    fn invalidate_row_cells(&mut self, row: usize, fields: &[usize]);
    fn invalidate_row_columns(&mut self, row: usize, field: usize, count: usize);

    /// Rows are about to be torn down and rebuilt
    fn pre_reindex(&mut self);
    /// Rows were rebuilt; `all_rows_kept` is true if every previously visible row survived
    fn post_reindex(&mut self, all_rows_kept: bool);
}

/// Client that ignores everything
#[derive(Debug, Default)]
pub struct NullClient;

impl ViewClient for NullClient {
    fn begin_change(&mut self) {}
    fn end_change(&mut self) {}
    fn rows_inserted(&mut self, _index: usize, _count: usize) {}
    fn rows_deleted(&mut self, _index: usize, _count: usize) {}
    fn rows_moved(&mut self, _from: usize, _to: usize, _count: usize) {}
    fn rows_loaded(&mut self) {}
    fn all_rows_deleted(&mut self) {}
    fn invalidate_all(&mut self) {}
    fn invalidate_row(&mut self, _row: usize) {}
    fn invalidate_cell(&mut self, _field: usize, _row: usize) {}
    fn invalidate_row_cells(&mut self, _row: usize, _fields: &[usize]) {}
    fn invalidate_row_columns(&mut self, _row: usize, _field: usize, _count: usize) {}
    fn pre_reindex(&mut self) {}
    fn post_reindex(&mut self, _all_rows_kept: bool) {}
}

/// A mutation deferred until the current notification batch is delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewCommand {
    RecordsInserted { index: usize, count: usize, recent: bool },
    RecordsDeleted { index: usize, count: usize },
    RecordsMoved { from: usize, to: usize, count: usize },
    RecordsReplaced { index: usize, count: usize, recent: bool },
    RecordsLoaded { recent: bool },
    InvalidateValue { field: usize, record: usize, change: Option<ValueChangeKind> },
    InvalidateRecord { record: usize, recent: bool },
    InvalidateAllRecords,
    SortBy { field: usize, ascending: Option<bool> },
    ClearSort,
    InvalidateFiltering,
    SetRowOrderReversed(bool),
    ProcessExpiryTimeout,
    ClearRecentChanges,
}

/// Shared queue of deferred commands. Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct ViewCommands {
    queue: Rc<RefCell<Vec<ViewCommand>>>,
}

impl ViewCommands {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: ViewCommand) {
        self.queue.borrow_mut().push(command);
    }

    pub fn len(&self) -> usize {
        self.queue.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.borrow().is_empty()
    }

    /// Take the pending commands in the order they were pushed
    pub fn take(&self) -> Vec<ViewCommand> {
        std::mem::take(&mut *self.queue.borrow_mut())
    }
}

/// Client that records every notification. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct RecordingClient {
    log: Rc<RefCell<RecordingLog>>,
}

#[derive(Debug, Default)]
struct RecordingLog {
    notifications: Vec<ClientNotification>,
    batches: usize,
    depth: usize,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications received so far, excluding bracket calls
    pub fn notifications(&self) -> Vec<ClientNotification> {
        self.log.borrow().notifications.clone()
    }

    /// Take and clear the recorded notifications
    pub fn take(&self) -> Vec<ClientNotification> {
        std::mem::take(&mut self.log.borrow_mut().notifications)
    }

    /// Number of completed outermost begin/end brackets
    pub fn batches(&self) -> usize {
        self.log.borrow().batches
    }

    pub fn in_change(&self) -> bool {
        self.log.borrow().depth > 0
    }

    fn record(&self, notification: ClientNotification) {
        self.log.borrow_mut().notifications.push(notification);
    }
}

impl ViewClient for RecordingClient {
    fn begin_change(&mut self) {
        self.log.borrow_mut().depth += 1;
    }

    fn end_change(&mut self) {
        let mut log = self.log.borrow_mut();
        log.depth = log.depth.saturating_sub(1);
        if log.depth == 0 {
            log.batches += 1;
        }
    }

    fn rows_inserted(&mut self, index: usize, count: usize) {
        self.record(ClientNotification::RowsInserted { index, count });
    }

    fn rows_deleted(&mut self, index: usize, count: usize) {
        self.record(ClientNotification::RowsDeleted { index, count });
    }

    fn rows_moved(&mut self, from: usize, to: usize, count: usize) {
        self.record(ClientNotification::RowsMoved { from, to, count });
    }

    fn rows_loaded(&mut self) {
        self.record(ClientNotification::RowsLoaded);
    }

    fn all_rows_deleted(&mut self) {
        self.record(ClientNotification::AllRowsDeleted);
    }

    fn invalidate_all(&mut self) {
        self.record(ClientNotification::InvalidateAll);
    }

    fn invalidate_row(&mut self, row: usize) {
        self.record(ClientNotification::InvalidateRow { row });
    }

    fn invalidate_cell(&mut self, field: usize, row: usize) {
        self.record(ClientNotification::InvalidateCell { field, row });
    }

    fn invalidate_row_cells(&mut self, row: usize, fields: &[usize]) {
        self.record(ClientNotification::InvalidateRowCells {
            row,
            fields: fields.to_vec(),
        });
    }

    fn invalidate_row_columns(&mut self, row: usize, field: usize, count: usize) {
        self.record(ClientNotification::InvalidateRowColumns { row, field, count });
    }

    fn pre_reindex(&mut self) {
        self.record(ClientNotification::PreReindex);
    }

    fn post_reindex(&mut self, all_rows_kept: bool) {
        self.record(ClientNotification::PostReindex { all_rows_kept });
    }
}
