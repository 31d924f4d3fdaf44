//! Changeset - buffered host notifications and index bookkeeping helpers
//!
//! While a change bracket is open the view engine does not talk to its client
//! directly. Every notification is pushed onto a [`NotificationQueue`] in public
//! (reversal-aware) row indices and the queue is drained in one batch when the
//! outermost bracket closes.
//!
//! # Helpers
//!
//! - [`IndexAdjuster`]: shifts a stored index across an insert, delete or block move
//! - [`IndexRuns`]: coalesces a set of indices into contiguous runs so bulk
//!   deletes splice each run once

use crate::client::ViewClient;

/// A single notification owed to the host client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientNotification {
    RowsInserted { index: usize, count: usize },
    RowsDeleted { index: usize, count: usize },
    /// Block of `count` rows starting at `from` now starts at `to`
    RowsMoved { from: usize, to: usize, count: usize },
    RowsLoaded,
    AllRowsDeleted,
    InvalidateAll,
    InvalidateRow { row: usize },
    InvalidateCell { field: usize, row: usize },
    InvalidateRowCells { row: usize, fields: Vec<usize> },
    InvalidateRowColumns { row: usize, field: usize, count: usize },
    PreReindex,
    PostReindex { all_rows_kept: bool },
}

impl ClientNotification {
    /// Forward this notification to a client
    pub fn dispatch(&self, client: &mut dyn ViewClient) {
        match self {
            ClientNotification::RowsInserted { index, count } => client.rows_inserted(*index, *count),
            ClientNotification::RowsDeleted { index, count } => client.rows_deleted(*index, *count),
            ClientNotification::RowsMoved { from, to, count } => client.rows_moved(*from, *to, *count),
            ClientNotification::RowsLoaded => client.rows_loaded(),
            ClientNotification::AllRowsDeleted => client.all_rows_deleted(),
            ClientNotification::InvalidateAll => client.invalidate_all(),
            ClientNotification::InvalidateRow { row } => client.invalidate_row(*row),
            ClientNotification::InvalidateCell { field, row } => client.invalidate_cell(*field, *row),
            ClientNotification::InvalidateRowCells { row, fields } => {
                client.invalidate_row_cells(*row, fields)
            }
            ClientNotification::InvalidateRowColumns { row, field, count } => {
                client.invalidate_row_columns(*row, *field, *count)
            }
            ClientNotification::PreReindex => client.pre_reindex(),
            ClientNotification::PostReindex { all_rows_kept } => client.post_reindex(*all_rows_kept),
        }
    }
}

/// Notifications accumulated inside a change bracket
#[derive(Debug, Clone, Default)]
pub struct NotificationQueue {
    notifications: Vec<ClientNotification>,
}

impl NotificationQueue {
    pub fn new() -> Self {
        NotificationQueue {
            notifications: Vec::new(),
        }
    }

    pub fn push(&mut self, notification: ClientNotification) {
        self.notifications.push(notification);
    }

    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    /// Take ownership of the pending notifications, leaving the queue empty
    pub fn drain(&mut self) -> Vec<ClientNotification> {
        std::mem::take(&mut self.notifications)
    }
}

/// Index arithmetic for structural row/record changes
pub struct IndexAdjuster;

impl IndexAdjuster {
    /// Adjust an index after `count` entries were inserted at `insert_index`
    pub fn adjust_for_insert(index: usize, insert_index: usize, count: usize) -> usize {
        if index >= insert_index {
            index + count
        } else {
            index
        }
    }

    /// Adjust an index after `count` entries were deleted at `delete_index`.
    /// Returns None if the index itself was deleted.
    pub fn adjust_for_delete(index: usize, delete_index: usize, count: usize) -> Option<usize> {
        if index < delete_index {
            Some(index)
        } else if index < delete_index + count {
            None
        } else {
            Some(index - count)
        }
    }

    /// Adjust an index after the block `[from, from + count)` was moved so it starts at `to`
    pub fn adjust_for_move(index: usize, from: usize, to: usize, count: usize) -> usize {
        if index >= from && index < from + count {
            return to + (index - from);
        }
        if to < from {
            // block moved up: entries in [to, from) shift down
            if index >= to && index < from {
                return index + count;
            }
        } else if index >= from + count && index < to + count {
            return index - count;
        }
        index
    }
}

/// Contiguous runs built from an arbitrary set of indices
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexRuns {
    /// (start, count), ascending and non-adjacent
    runs: Vec<(usize, usize)>,
}

impl IndexRuns {
    /// Sort and merge indices into runs. Duplicates are ignored.
    pub fn from_indices(mut indices: Vec<usize>) -> Self {
        indices.sort_unstable();
        indices.dedup();

        let mut runs: Vec<(usize, usize)> = Vec::new();
        for index in indices {
            match runs.last_mut() {
                Some((start, count)) if *start + *count == index => *count += 1,
                _ => runs.push((index, 1)),
            }
        }
        IndexRuns { runs }
    }

    pub fn runs(&self) -> &[(usize, usize)] {
        &self.runs
    }

    /// Runs from the highest start down, so splicing one never shifts the next
    pub fn iter_descending(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.runs.iter().rev().copied()
    }
}
