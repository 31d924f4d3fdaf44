//! Live view engine
//!
//! A [`ViewEngine`] turns record-level mutation events from the host into a
//! sorted, optionally filtered row sequence and tells its [`ViewClient`] exactly
//! which rows and cells changed.
//!
//! Two strategies are chosen automatically. In static mode (no sort keys, no
//! continuous filter) record events map 1:1 onto row events and rows always
//! follow record order. In continuous mode every touched record is re-filtered
//! and, when a sort key it carries changed, relocated with a binary search
//! anchored at its old row instead of resorting everything.
//!
//! All public row indices are reversal-aware; internally rows are always kept
//! in canonical order.

use crate::binder::RecordRowBinder;
use crate::changeset::{ClientNotification, IndexRuns, NotificationQueue};
use crate::client::{ViewClient, ViewCommand, ViewCommands};
use crate::clock::{Clock, ExpiryTimer, NoopTimer, SystemClock};
use crate::config::ViewConfig;
use crate::error::{ConsistencyError, ViewError, ViewResult};
use crate::recent_changes::{
    CellPosition, RecentChangeDurations, RecentChangeTracker, RowChange, ValueChange, ValueChangeKind,
};
use crate::schema::{FieldListChange, FieldListChangeKind, Schema};
use crate::sort::{binary_search_with_skip, resolve_specifiers, SortComparator, SortFieldSpecifier};
use crate::store::RecordStore;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

/// Record filter predicate
pub type RecordFilter<R> = Rc<dyn Fn(&R) -> bool>;

/// Where a refreshed record ended up
enum Refresh {
    /// The record has no row (filtered out before and after, or just hidden)
    Gone,
    /// The record just became visible at this row
    Shown(usize),
    /// The record kept its row, possibly at a new position
    Kept(usize),
}

pub struct ViewEngine<R> {
    store: Rc<RefCell<dyn RecordStore<Record = R>>>,
    schema: Rc<RefCell<Schema<R>>>,
    client: Box<dyn ViewClient>,
    config: ViewConfig,
    binder: RecordRowBinder<R>,
    tracker: RecentChangeTracker,
    sort_specifiers: Vec<SortFieldSpecifier>,
    comparator: Option<SortComparator<R>>,
    filter: Option<RecordFilter<R>>,
    continuous_filtering: bool,
    row_order_reversed: bool,
    change_depth: usize,
    notifications: NotificationQueue,
    commands: ViewCommands,
}

impl<R: 'static> ViewEngine<R> {
    /// Engine on the system clock; the host polls `process_expiry_timeout`
    pub fn new(
        store: Rc<RefCell<dyn RecordStore<Record = R>>>,
        schema: Rc<RefCell<Schema<R>>>,
        client: Box<dyn ViewClient>,
        config: ViewConfig,
    ) -> Self {
        Self::with_timer(
            store,
            schema,
            client,
            config,
            Rc::new(SystemClock::new()),
            Box::new(NoopTimer),
        )
    }

    pub fn with_timer(
        store: Rc<RefCell<dyn RecordStore<Record = R>>>,
        schema: Rc<RefCell<Schema<R>>>,
        client: Box<dyn ViewClient>,
        config: ViewConfig,
        clock: Rc<dyn Clock>,
        timer: Box<dyn ExpiryTimer>,
    ) -> Self {
        let tracker = RecentChangeTracker::new(RecentChangeDurations::from(&config), clock, timer);
        let mut engine = ViewEngine {
            store,
            schema,
            client,
            continuous_filtering: config.continuous_filtering,
            config,
            binder: RecordRowBinder::new(),
            tracker,
            sort_specifiers: Vec::new(),
            comparator: None,
            filter: None,
            row_order_reversed: false,
            change_depth: 0,
            notifications: NotificationQueue::new(),
            commands: ViewCommands::new(),
        };
        let records = engine.store.borrow().get_records();
        engine.binder.load_records(records);
        let order = engine.visible_record_order(true);
        engine.binder.rebuild_rows(&order);
        engine
    }

    /// Share a command queue with the client, which may push to it from its handlers
    pub fn with_commands(mut self, commands: ViewCommands) -> Self {
        self.commands = commands;
        self
    }

    pub fn config(&self) -> &ViewConfig {
        &self.config
    }

    /// Handle to the queue of deferred commands
    pub fn commands(&self) -> ViewCommands {
        self.commands.clone()
    }

    // ==================== Change brackets ====================

    pub fn begin_change(&mut self) {
        self.change_depth += 1;
    }

    /// Close a bracket. Closing the outermost one checks consistency (when
    /// enabled), hands the buffered notifications to the client and then runs
    /// any commands the client queued, repeating until both are empty.
    pub fn end_change(&mut self) {
        assert!(self.change_depth > 0, "end_change without a matching begin_change");
        self.change_depth -= 1;
        if self.change_depth == 0 {
            self.flush();
        }
    }

    pub fn in_change(&self) -> bool {
        self.change_depth > 0
    }

    fn flush(&mut self) {
        loop {
            if self.config.check_consistency {
                if let Err(err) = self.check_consistency() {
                    panic!("view engine is inconsistent: {err}");
                }
            }
            if !self.notifications.is_empty() {
                // taken before dispatch so handlers see a settled engine
                log::trace!("dispatching {} notifications", self.notifications.len());
                let batch = self.notifications.drain();
                self.client.begin_change();
                for notification in &batch {
                    notification.dispatch(self.client.as_mut());
                }
                self.client.end_change();
            }

            let commands = self.commands.take();
            if commands.is_empty() {
                return;
            }
            self.change_depth += 1;
            for command in commands {
                self.execute(command);
            }
            self.change_depth -= 1;
        }
    }

    /// Run a deferred command. Errors cannot reach the caller that queued it, so they are logged.
    fn execute(&mut self, command: ViewCommand) {
        log::debug!("running queued {:?}", command);
        let result = match command.clone() {
            ViewCommand::RecordsInserted { index, count, recent } => self.records_inserted(index, count, recent),
            ViewCommand::RecordsDeleted { index, count } => self.records_deleted(index, count),
            ViewCommand::RecordsMoved { from, to, count } => self.records_moved(from, to, count),
            ViewCommand::RecordsReplaced { index, count, recent } => self.records_replaced(index, count, recent),
            ViewCommand::RecordsLoaded { recent } => {
                self.records_loaded(recent);
                Ok(())
            }
            ViewCommand::InvalidateValue { field, record, change } => self.invalidate_value(field, record, change),
            ViewCommand::InvalidateRecord { record, recent } => self.invalidate_record(record, recent),
            ViewCommand::InvalidateAllRecords => {
                self.invalidate_all_records();
                Ok(())
            }
            ViewCommand::SortBy { field, ascending } => self.sort_by(field, ascending),
            ViewCommand::ClearSort => {
                self.clear_sort();
                Ok(())
            }
            ViewCommand::InvalidateFiltering => {
                self.invalidate_filtering();
                Ok(())
            }
            ViewCommand::SetRowOrderReversed(reversed) => {
                self.set_row_order_reversed(reversed);
                Ok(())
            }
            ViewCommand::ProcessExpiryTimeout => {
                self.process_expiry_timeout();
                Ok(())
            }
            ViewCommand::ClearRecentChanges => {
                self.clear_recent_changes();
                Ok(())
            }
        };
        if let Err(err) = result {
            log::warn!("queued {:?} failed: {}", command, err);
        }
    }

    // ==================== Queries ====================

    pub fn row_count(&self) -> usize {
        self.binder.row_count()
    }

    pub fn record_count(&self) -> usize {
        self.binder.record_count()
    }

    /// Record shown at a row
    pub fn get_row_record(&self, row: usize) -> ViewResult<Rc<R>> {
        let row = self.internal_row(row)?;
        let record_index = self.binder.rows()[row].record_index();
        Ok(self.binder.record(record_index).clone())
    }

    /// Record index shown at a row
    pub fn get_record_index(&self, row: usize) -> ViewResult<usize> {
        let row = self.internal_row(row)?;
        Ok(self.binder.rows()[row].record_index())
    }

    /// Row showing a record, or None if the record is filtered out
    pub fn get_row_index(&self, record_index: usize) -> ViewResult<Option<usize>> {
        self.check_record(record_index)?;
        Ok(self
            .binder
            .row_of_record(record_index)
            .map(|row| self.reverse_row_index(row)))
    }

    pub fn get_row_recent_change(&self, row: usize) -> ViewResult<Option<RowChange>> {
        let row = self.internal_row(row)?;
        Ok(self.binder.rows()[row].recent_change().copied())
    }

    pub fn get_value_recent_change(&self, field_index: usize, row: usize) -> ViewResult<Option<ValueChange>> {
        let row = self.internal_row(row)?;
        Ok(self.binder.rows()[row].value_recent_change(field_index).copied())
    }

    /// Visible records in row order
    pub fn visible_records(&self) -> Vec<Rc<R>> {
        (0..self.row_count())
            .map(|row| {
                let row = self.reverse_row_index(row);
                self.binder.record(self.binder.rows()[row].record_index()).clone()
            })
            .collect()
    }

    pub fn sort_specifiers(&self) -> &[SortFieldSpecifier] {
        &self.sort_specifiers
    }

    pub fn is_sorting(&self) -> bool {
        self.comparator.is_some()
    }

    pub fn is_field_sorted(&self, field_index: usize) -> bool {
        self.sort_specifiers.iter().any(|s| s.field_index == field_index)
    }

    pub fn is_filtering(&self) -> bool {
        self.filter.is_some()
    }

    pub fn continuous_filtering(&self) -> bool {
        self.continuous_filtering
    }

    pub fn is_row_order_reversed(&self) -> bool {
        self.row_order_reversed
    }

    /// Number of live recent change highlights
    pub fn recent_change_count(&self) -> usize {
        self.tracker.len()
    }

    /// Every row follows its successor in sort order, plus the binder and tracker invariants
    pub fn check_consistency(&self) -> Result<(), ConsistencyError> {
        self.binder.check_consistency()?;
        self.tracker.check_consistency(self.binder.rows())?;
        for (row, pair) in self.binder.rows().windows(2).enumerate() {
            if self.compare_records(pair[0].record_index(), pair[1].record_index()) != Ordering::Less {
                return Err(ConsistencyError::Unsorted { row, next: row + 1 });
            }
        }
        Ok(())
    }

    // ==================== Record events ====================

    /// `count` records were inserted into the store at `index`
    pub fn records_inserted(&mut self, index: usize, count: usize, recent: bool) -> ViewResult<()> {
        let record_count = self.binder.record_count();
        if index > record_count {
            return Err(ViewError::RecordIndexOutOfRange {
                index,
                len: record_count,
            });
        }
        let store_count = self.store.borrow().record_count();
        if index + count > store_count {
            return Err(ViewError::RecordIndexOutOfRange {
                index: index.max(store_count),
                len: store_count,
            });
        }
        if count == 0 {
            return Ok(());
        }

        self.begin_change();
        let records: Vec<Rc<R>> = (index..index + count)
            .map(|i| self.store.borrow().get_record(i))
            .collect();
        self.binder.insert_records(index, records);

        let mut accepted: Vec<usize> = (index..index + count)
            .filter(|&record_index| self.accepts(record_index))
            .collect();
        let insertions: Vec<(usize, usize)> = if self.comparator.is_none() {
            // rows follow record order: the accepted records land side by side
            let row = self
                .binder
                .find_insert_row_index(index, self.config.find_insert_scan_limit);
            accepted.into_iter().map(|record_index| (row, record_index)).collect()
        } else {
            // in key order the positions among the existing rows never decrease
            accepted.sort_by(|&a, &b| self.compare_records(a, b));
            accepted
                .into_iter()
                .map(|record_index| (self.insertion_row_index(record_index), record_index))
                .collect()
        };

        let rows_before = self.binder.row_count();
        let runs = self.binder.insert_rows(&insertions);
        let mut rows_after = rows_before;
        for &(start, run_count) in &runs {
            rows_after += run_count;
            self.tracker.process_rows_inserted(start, run_count);
            self.push_rows_inserted(start, run_count, rows_after);
        }
        if recent {
            for row in runs.iter().flat_map(|&(start, run_count)| start..start + run_count) {
                self.tracker.add_record_inserted_change(self.binder.rows_mut(), row);
            }
        }
        self.end_change();
        Ok(())
    }

    /// `count` records were deleted from the store at `index`
    pub fn records_deleted(&mut self, index: usize, count: usize) -> ViewResult<()> {
        self.check_record_span(index, count)?;
        if count == 0 {
            return Ok(());
        }

        self.begin_change();
        let bound: Vec<usize> = (index..index + count)
            .filter_map(|record_index| self.binder.row_of_record(record_index))
            .collect();
        let runs = IndexRuns::from_indices(bound);
        for (start, run_count) in runs.iter_descending() {
            self.tracker.process_rows_deleted(start, run_count);
            self.binder.remove_rows(start, run_count);
            let rows_before = self.binder.row_count() + run_count;
            self.push_rows_deleted(start, run_count, rows_before);
        }
        self.binder.remove_records(index, count);
        self.end_change();
        Ok(())
    }

    /// `count` records at `from` were moved in the store so they now start at `to`
    pub fn records_moved(&mut self, from: usize, to: usize, count: usize) -> ViewResult<()> {
        self.check_record_span(from, count)?;
        self.check_record_span(to, count)?;
        if count == 0 || from == to {
            return Ok(());
        }

        self.begin_change();
        if self.comparator.is_some() {
            // keys are unchanged but tie order follows record order
            self.binder.move_records(from, to, count);
            self.reindex(false);
        } else {
            // rows of a contiguous record block are themselves contiguous
            let rows = self.binder.rows();
            let row_before = |record_index: usize| rows.partition_point(|row| row.record_index() < record_index);
            let start = row_before(from);
            let end = row_before(from + count);
            let target = if to < from {
                row_before(to)
            } else {
                start + (row_before(to + count) - end)
            };
            let row_count = end - start;

            self.binder.move_records(from, to, count);
            if row_count > 0 && start != target {
                self.binder.move_rows(start, target, row_count);
                self.tracker.process_rows_moved(start, target, row_count);
                self.push_rows_moved(start, target, row_count);
            }
        }
        self.end_change();
        Ok(())
    }

    /// The store swapped in new objects for `count` records at `index`
    pub fn records_replaced(&mut self, index: usize, count: usize, recent: bool) -> ViewResult<()> {
        self.check_record_span(index, count)?;
        let store_count = self.store.borrow().record_count();
        if index + count > store_count {
            return Err(ViewError::RecordIndexOutOfRange {
                index: index.max(store_count),
                len: store_count,
            });
        }
        if count == 0 {
            return Ok(());
        }

        self.begin_change();
        for record_index in index..index + count {
            let record = self.store.borrow().get_record(record_index);
            self.binder.replace_record(record_index, record);
            let sorted = self.is_sorting();
            if let Some((row, kept)) = self.refresh_record(record_index, sorted) {
                if recent {
                    self.tracker.add_record_updated_change(self.binder.rows_mut(), row);
                }
                if kept {
                    let row = self.reverse_row_index(row);
                    self.notifications.push(ClientNotification::InvalidateRow { row });
                }
            }
        }
        self.end_change();
        Ok(())
    }

    /// Delete `delete_count` records at `index`, then insert `insert_count` there
    pub fn records_spliced(
        &mut self,
        index: usize,
        delete_count: usize,
        insert_count: usize,
        recent: bool,
    ) -> ViewResult<()> {
        self.check_record_span(index, delete_count)?;
        let store_count = self.store.borrow().record_count();
        if index + insert_count > store_count {
            return Err(ViewError::RecordIndexOutOfRange {
                index: index.max(store_count),
                len: store_count,
            });
        }

        self.begin_change();
        let result = self
            .records_deleted(index, delete_count)
            .and_then(|_| self.records_inserted(index, insert_count, recent));
        self.end_change();
        result
    }

    /// The store was replaced wholesale; rebuild everything and drop every highlight
    pub fn records_loaded(&mut self, recent: bool) {
        self.begin_change();
        let had_rows = self.binder.row_count() > 0;
        self.tracker.clear(self.binder.rows_mut());
        let records = self.store.borrow().get_records();
        self.binder.load_records(records);
        let order = self.visible_record_order(true);
        self.binder.rebuild_rows(&order);
        if recent {
            for row in 0..self.binder.row_count() {
                self.tracker.add_record_inserted_change(self.binder.rows_mut(), row);
            }
        }
        log::debug!(
            "loaded {} records, {} visible",
            self.binder.record_count(),
            self.binder.row_count()
        );
        if had_rows && self.binder.row_count() == 0 {
            self.notifications.push(ClientNotification::AllRowsDeleted);
        } else {
            self.notifications.push(ClientNotification::RowsLoaded);
        }
        self.end_change();
    }

    // ==================== Invalidation ====================

    /// One value of a record changed
    pub fn invalidate_value(
        &mut self,
        field_index: usize,
        record_index: usize,
        change: Option<ValueChangeKind>,
    ) -> ViewResult<()> {
        self.check_field_span(field_index, 1)?;
        self.check_record(record_index)?;

        self.begin_change();
        let sort_affected = self.is_field_sorted(field_index);
        if let Some((row, kept)) = self.refresh_record(record_index, sort_affected) {
            if let Some(kind) = change {
                self.tracker
                    .add_value_change(self.binder.rows_mut(), field_index, row, kind);
            }
            if kept {
                let row = self.reverse_row_index(row);
                self.notifications.push(ClientNotification::InvalidateCell {
                    field: field_index,
                    row,
                });
            }
        }
        self.end_change();
        Ok(())
    }

    /// Anything about a record may have changed
    pub fn invalidate_record(&mut self, record_index: usize, recent: bool) -> ViewResult<()> {
        self.check_record(record_index)?;

        self.begin_change();
        let sorted = self.is_sorting();
        if let Some((row, kept)) = self.refresh_record(record_index, sorted) {
            if recent {
                self.tracker.add_record_updated_change(self.binder.rows_mut(), row);
            }
            if kept {
                let row = self.reverse_row_index(row);
                self.notifications.push(ClientNotification::InvalidateRow { row });
            }
        }
        self.end_change();
        Ok(())
    }

    /// Several values of a record changed, each with its own change kind
    pub fn invalidate_record_values(
        &mut self,
        record_index: usize,
        changes: &[(usize, ValueChangeKind)],
    ) -> ViewResult<()> {
        self.check_record(record_index)?;
        for &(field_index, _) in changes {
            self.check_field_span(field_index, 1)?;
        }
        if changes.is_empty() {
            return Ok(());
        }

        self.begin_change();
        let sort_affected = changes.iter().any(|&(field, _)| self.is_field_sorted(field));
        if let Some((row, kept)) = self.refresh_record(record_index, sort_affected) {
            self.tracker
                .add_record_values_changes(self.binder.rows_mut(), row, changes);
            if kept {
                let fields = changes.iter().map(|&(field, _)| field).collect();
                let row = self.reverse_row_index(row);
                self.notifications
                    .push(ClientNotification::InvalidateRowCells { row, fields });
            }
        }
        self.end_change();
        Ok(())
    }

    /// Fields `[field_index, field_index + count)` of a record changed
    pub fn invalidate_record_fields(&mut self, record_index: usize, field_index: usize, count: usize) -> ViewResult<()> {
        self.check_record(record_index)?;
        self.check_field_span(field_index, count)?;
        if count == 0 {
            return Ok(());
        }

        self.begin_change();
        let sort_affected = self
            .sort_specifiers
            .iter()
            .any(|s| s.field_index >= field_index && s.field_index < field_index + count);
        if let Some((row, true)) = self.refresh_record(record_index, sort_affected) {
            let row = self.reverse_row_index(row);
            self.notifications.push(ClientNotification::InvalidateRowColumns {
                row,
                field: field_index,
                count,
            });
        }
        self.end_change();
        Ok(())
    }

    /// Record-level and value-level change in one step
    pub fn invalidate_record_and_values(
        &mut self,
        record_index: usize,
        recent: bool,
        changes: &[(usize, ValueChangeKind)],
    ) -> ViewResult<()> {
        self.check_record(record_index)?;
        for &(field_index, _) in changes {
            self.check_field_span(field_index, 1)?;
        }

        self.begin_change();
        let sorted = self.is_sorting();
        if let Some((row, kept)) = self.refresh_record(record_index, sorted) {
            if recent {
                self.tracker.add_record_updated_change(self.binder.rows_mut(), row);
            }
            self.tracker
                .add_record_values_changes(self.binder.rows_mut(), row, changes);
            if kept {
                let row = self.reverse_row_index(row);
                self.notifications.push(ClientNotification::InvalidateRow { row });
            }
        }
        self.end_change();
        Ok(())
    }

    /// Every record may have changed: re-filter and re-sort
    pub fn invalidate_all_records(&mut self) {
        self.reindex(true);
    }

    // ==================== Sorting ====================

    /// Make `field_index` the primary sort key.
    ///
    /// With `ascending == None` the direction toggles when the field already is
    /// the primary key and is ascending otherwise. Former keys follow as
    /// secondary keys up to `max_sort_fields`.
    pub fn sort_by(&mut self, field_index: usize, ascending: Option<bool>) -> ViewResult<()> {
        self.check_field_span(field_index, 1)?;
        let ascending = ascending.unwrap_or_else(|| match self.sort_specifiers.first() {
            Some(primary) if primary.field_index == field_index => !primary.ascending,
            _ => true,
        });
        let mut specifiers = vec![SortFieldSpecifier::new(field_index, ascending)];
        specifiers.extend(
            self.sort_specifiers
                .iter()
                .filter(|s| s.field_index != field_index)
                .copied(),
        );
        self.apply_sort(specifiers);
        Ok(())
    }

    pub fn sort_by_many(&mut self, specifiers: &[SortFieldSpecifier]) -> ViewResult<()> {
        for spec in specifiers {
            self.check_field_span(spec.field_index, 1)?;
        }
        self.apply_sort(specifiers.to_vec());
        Ok(())
    }

    /// Back to record order
    pub fn clear_sort(&mut self) {
        self.apply_sort(Vec::new());
    }

    fn apply_sort(&mut self, specifiers: Vec<SortFieldSpecifier>) {
        let (resolved, comparator) = {
            let schema = self.schema.borrow();
            resolve_specifiers(&schema, &specifiers, self.config.max_sort_fields)
        };
        if resolved == self.sort_specifiers {
            self.comparator = comparator;
            return;
        }
        log::debug!("sorting by {:?}", resolved);
        self.sort_specifiers = resolved;
        self.comparator = comparator;
        self.reindex(false);
    }

    /// The schema's field list changed; keep the sort keys pointing at the same fields
    pub fn field_list_changed(&mut self, change: FieldListChange) {
        let FieldListChange { kind, index, count } = change;
        let previous = self.sort_specifiers.clone();
        let specifiers: Vec<SortFieldSpecifier> = match kind {
            FieldListChangeKind::Insert => previous
                .iter()
                .map(|s| {
                    let mut s = *s;
                    if s.field_index >= index {
                        s.field_index += count;
                    }
                    s
                })
                .collect(),
            FieldListChangeKind::Remove => previous
                .iter()
                .filter(|s| s.field_index < index || s.field_index >= index + count)
                .map(|s| {
                    let mut s = *s;
                    if s.field_index >= index + count {
                        s.field_index -= count;
                    }
                    s
                })
                .collect(),
            FieldListChangeKind::Move => {
                panic!("moving fields ({count} at {index}) is not supported by the view engine")
            }
            FieldListChangeKind::Set | FieldListChangeKind::Clear => Vec::new(),
        };
        self.tracker.process_fields_changed(self.binder.rows_mut(), change);

        let (resolved, comparator) = {
            let schema = self.schema.borrow();
            resolve_specifiers(&schema, &specifiers, self.config.max_sort_fields)
        };
        let keys_lost = resolved.len() != previous.len() || kind == FieldListChangeKind::Set;
        self.sort_specifiers = resolved;
        self.comparator = comparator;
        if keys_lost && !(previous.is_empty() && self.sort_specifiers.is_empty()) {
            log::debug!("field list {:?} changed sort keys to {:?}", kind, self.sort_specifiers);
            self.reindex(false);
        }
    }

    // ==================== Filtering ====================

    pub fn set_filter(&mut self, filter: Option<RecordFilter<R>>) {
        log::debug!("filter {}", if filter.is_some() { "set" } else { "cleared" });
        self.filter = filter;
        self.reindex(true);
    }

    pub fn set_continuous_filtering(&mut self, continuous: bool) {
        if self.continuous_filtering == continuous {
            return;
        }
        self.continuous_filtering = continuous;
        if continuous && self.filter.is_some() {
            // membership may have gone stale while filtering was static
            self.reindex(true);
        }
    }

    /// Re-evaluate the filter on every record
    pub fn invalidate_filtering(&mut self) {
        self.reindex(true);
    }

    /// Rebuild the row sequence from the records. Returns true when every
    /// previously visible record is still visible.
    pub fn repopulate_rows(&mut self) -> bool {
        self.reindex(true)
    }

    // ==================== Presentation ====================

    pub fn set_row_order_reversed(&mut self, reversed: bool) {
        if self.row_order_reversed == reversed {
            return;
        }
        self.begin_change();
        self.row_order_reversed = reversed;
        self.notifications.push(ClientNotification::RowsLoaded);
        self.end_change();
    }

    /// Map between public and canonical row order (the map is its own inverse)
    pub fn reverse_row_index(&self, row: usize) -> usize {
        if self.row_order_reversed {
            self.binder.row_count() - row - 1
        } else {
            row
        }
    }

    // ==================== Recent changes ====================

    /// Expire due highlights; call when the expiry timer fires
    pub fn process_expiry_timeout(&mut self) -> usize {
        self.begin_change();
        let mut expired_cells: Vec<CellPosition> = Vec::new();
        let mut expired_rows: Vec<usize> = Vec::new();
        let expired = self
            .tracker
            .process_next_expiry_timeout(self.binder.rows_mut(), |cells, rows| {
                expired_cells.extend_from_slice(cells);
                expired_rows.extend_from_slice(rows);
            });
        for cell in expired_cells {
            let row = self.reverse_row_index(cell.row_index);
            self.notifications.push(ClientNotification::InvalidateCell {
                field: cell.field_index,
                row,
            });
        }
        for row in expired_rows {
            let row = self.reverse_row_index(row);
            self.notifications.push(ClientNotification::InvalidateRow { row });
        }
        self.end_change();
        expired
    }

    /// Drop every highlight
    pub fn clear_recent_changes(&mut self) {
        if self.tracker.is_empty() {
            return;
        }
        self.begin_change();
        self.tracker.clear(self.binder.rows_mut());
        self.notifications.push(ClientNotification::InvalidateAll);
        self.end_change();
    }

    // ==================== Internals ====================

    fn accepts(&self, record_index: usize) -> bool {
        match &self.filter {
            Some(filter) => filter(&**self.binder.record(record_index)),
            None => true,
        }
    }

    fn filters_continuously(&self) -> bool {
        self.filter.is_some() && self.continuous_filtering
    }

    /// Sort keys first, record order on ties
    fn compare_records(&self, a: usize, b: usize) -> Ordering {
        let by_keys = match &self.comparator {
            Some(comparator) => comparator.compare(&**self.binder.record(a), &**self.binder.record(b)),
            None => Ordering::Equal,
        };
        by_keys.then(a.cmp(&b))
    }

    /// Row an unbound record belongs at
    fn insertion_row_index(&self, record_index: usize) -> usize {
        if self.comparator.is_none() {
            return self
                .binder
                .find_insert_row_index(record_index, self.config.find_insert_scan_limit);
        }
        let rows = self.binder.rows();
        binary_search_with_skip(0, rows.len(), None, |i| {
            self.compare_records(rows[i].record_index(), record_index)
        })
    }

    /// Where a bound row belongs after its keys changed, searching only on the
    /// side of its old position that it moved towards
    fn relocation_target(&self, row: usize) -> usize {
        let rows = self.binder.rows();
        let record_index = rows[row].record_index();
        let cmp_at = |i: usize| self.compare_records(rows[i].record_index(), record_index);

        if row > 0 && cmp_at(row - 1) != Ordering::Less {
            binary_search_with_skip(0, row, Some(row), cmp_at)
        } else if row + 1 < rows.len() && cmp_at(row + 1) != Ordering::Greater {
            binary_search_with_skip(row, rows.len() - 1, Some(row), cmp_at)
        } else {
            row
        }
    }

    fn bind_row(&mut self, row: usize, record_index: usize, recent: bool) {
        self.binder.insert_row(row, record_index);
        self.tracker.process_rows_inserted(row, 1);
        if recent {
            self.tracker.add_record_inserted_change(self.binder.rows_mut(), row);
        }
    }

    /// Re-filter a record (in continuous mode) and relocate its row if its sort keys changed.
    /// Returns the record's row and whether it already had one.
    fn refresh_record(&mut self, record_index: usize, sort_affected: bool) -> Option<(usize, bool)> {
        let bound = self.binder.row_of_record(record_index);
        let visible = if self.filters_continuously() {
            self.accepts(record_index)
        } else {
            bound.is_some()
        };

        let outcome = match (bound, visible) {
            (Some(row), false) => {
                self.tracker.process_rows_deleted(row, 1);
                self.binder.remove_row(row);
                let rows_before = self.binder.row_count() + 1;
                self.push_rows_deleted(row, 1, rows_before);
                Refresh::Gone
            }
            (None, true) => {
                let row = self.insertion_row_index(record_index);
                self.bind_row(row, record_index, false);
                let rows_after = self.binder.row_count();
                self.push_rows_inserted(row, 1, rows_after);
                Refresh::Shown(row)
            }
            (None, false) => Refresh::Gone,
            (Some(row), true) => {
                let target = if sort_affected && self.comparator.is_some() {
                    self.relocation_target(row)
                } else {
                    row
                };
                if target != row {
                    log::trace!("record {} moves from row {} to {}", record_index, row, target);
                    self.binder.move_row(row, target);
                    self.tracker.process_rows_moved(row, target, 1);
                    self.push_rows_moved(row, target, 1);
                }
                Refresh::Kept(target)
            }
        };

        match outcome {
            Refresh::Gone => None,
            Refresh::Shown(row) => Some((row, false)),
            Refresh::Kept(row) => Some((row, true)),
        }
    }

    /// Records that should be visible, in row order
    fn visible_record_order(&self, refilter: bool) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.binder.record_count())
            .filter(|&record_index| {
                if refilter {
                    self.accepts(record_index)
                } else {
                    self.binder.row_of_record(record_index).is_some()
                }
            })
            .collect();
        if self.comparator.is_some() {
            order.sort_by(|&a, &b| self.compare_records(a, b));
        }
        order
    }

    /// Full rebuild bracketed by pre/post reindex. Recent changes follow their
    /// records; those of records that lost their row are dropped.
    fn reindex(&mut self, refilter: bool) -> bool {
        self.begin_change();
        self.notifications.push(ClientNotification::PreReindex);
        let rows_before = self.binder.row_count();
        self.tracker.process_pre_reindex(self.binder.rows());

        let order = self.visible_record_order(refilter);
        let all_rows_kept = if refilter {
            let mut visible = vec![false; self.binder.record_count()];
            for &record_index in &order {
                visible[record_index] = true;
            }
            self.binder.rows().iter().all(|row| visible[row.record_index()])
        } else {
            true
        };
        self.binder.rebuild_rows(&order);
        self.tracker.process_post_reindex(&mut self.binder, all_rows_kept);

        log::debug!(
            "reindexed {} -> {} rows (all kept: {})",
            rows_before,
            self.binder.row_count(),
            all_rows_kept
        );
        if all_rows_kept && rows_before == self.binder.row_count() {
            self.notifications.push(ClientNotification::InvalidateAll);
        } else {
            self.notifications.push(ClientNotification::RowsLoaded);
        }
        self.notifications
            .push(ClientNotification::PostReindex { all_rows_kept });
        self.end_change();
        all_rows_kept
    }

    fn push_rows_inserted(&mut self, index: usize, count: usize, rows_after: usize) {
        let index = if self.row_order_reversed {
            rows_after - index - count
        } else {
            index
        };
        self.notifications
            .push(ClientNotification::RowsInserted { index, count });
    }

    fn push_rows_deleted(&mut self, index: usize, count: usize, rows_before: usize) {
        let index = if self.row_order_reversed {
            rows_before - index - count
        } else {
            index
        };
        self.notifications
            .push(ClientNotification::RowsDeleted { index, count });
    }

    fn push_rows_moved(&mut self, from: usize, to: usize, count: usize) {
        let (from, to) = if self.row_order_reversed {
            let rows = self.binder.row_count();
            (rows - from - count, rows - to - count)
        } else {
            (from, to)
        };
        self.notifications
            .push(ClientNotification::RowsMoved { from, to, count });
    }

    fn internal_row(&self, row: usize) -> ViewResult<usize> {
        let len = self.binder.row_count();
        if row >= len {
            return Err(ViewError::RowIndexOutOfRange { index: row, len });
        }
        Ok(self.reverse_row_index(row))
    }

    fn check_record(&self, record_index: usize) -> ViewResult<()> {
        let len = self.binder.record_count();
        if record_index >= len {
            return Err(ViewError::RecordIndexOutOfRange {
                index: record_index,
                len,
            });
        }
        Ok(())
    }

    fn check_record_span(&self, index: usize, count: usize) -> ViewResult<()> {
        let len = self.binder.record_count();
        if index + count > len || index > len {
            return Err(ViewError::RecordIndexOutOfRange {
                index: index.max(len),
                len,
            });
        }
        Ok(())
    }

    fn check_field_span(&self, field_index: usize, count: usize) -> ViewResult<()> {
        let len = self.schema.borrow().len();
        if field_index + count > len || field_index >= len {
            return Err(ViewError::FieldIndexOutOfRange {
                index: field_index.max(len),
                len,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RecordingClient;
    use crate::clock::{ManualClock, RecordingTimer};
    use crate::recent_changes::RowChangeKind;
    use crate::schema::Field;
    use crate::store::VecRecordStore;
    use std::cell::Cell;

    const VALUE: usize = 1;

    #[derive(Debug)]
    struct Item {
        id: u32,
        value: Cell<i64>,
    }

    impl Item {
        fn value(&self) -> i64 {
            self.value.get()
        }
    }

    struct Harness {
        store: Rc<RefCell<VecRecordStore<Item>>>,
        schema: Rc<RefCell<Schema<Item>>>,
        client: RecordingClient,
        clock: ManualClock,
        timer: RecordingTimer,
        engine: ViewEngine<Item>,
    }

    fn item(id: u32, value: i64) -> Item {
        Item {
            id,
            value: Cell::new(value),
        }
    }

    fn harness(values: &[i64]) -> Harness {
        let store = Rc::new(RefCell::new(VecRecordStore::from_values(
            values
                .iter()
                .enumerate()
                .map(|(i, &v)| item(i as u32, v))
                .collect(),
        )));
        let schema = Rc::new(RefCell::new(Schema::new(vec![
            Field::by_key("id", |i: &Item| i.id),
            Field::by_key("value", |i: &Item| i.value()),
            Field::new("note"),
        ])));
        let client = RecordingClient::new();
        let clock = ManualClock::new(0);
        let timer = RecordingTimer::new();
        let engine = ViewEngine::with_timer(
            store.clone(),
            schema.clone(),
            Box::new(client.clone()),
            ViewConfig::default().with_consistency_checks(true),
            Rc::new(clock.clone()),
            Box::new(timer.clone()),
        );
        Harness {
            store,
            schema,
            client,
            clock,
            timer,
            engine,
        }
    }

    fn values(engine: &ViewEngine<Item>) -> Vec<i64> {
        engine.visible_records().iter().map(|i| i.value()).collect()
    }

    fn greater_than(limit: i64) -> Option<RecordFilter<Item>> {
        Some(Rc::new(move |i: &Item| i.value() > limit))
    }

    #[test]
    fn test_initial_rows_follow_records() {
        let h = harness(&[5, 1, 3]);
        assert_eq!(values(&h.engine), vec![5, 1, 3]);
        assert_eq!(h.engine.row_count(), 3);
        assert!(h.client.notifications().is_empty());
        h.engine.check_consistency().unwrap();
    }

    #[test]
    fn test_sort_and_toggle() {
        let mut h = harness(&[5, 1, 3]);
        h.engine.sort_by(VALUE, None).unwrap();
        assert_eq!(values(&h.engine), vec![1, 3, 5]);
        assert_eq!(
            h.client.take(),
            vec![
                ClientNotification::PreReindex,
                ClientNotification::InvalidateAll,
                ClientNotification::PostReindex { all_rows_kept: true },
            ]
        );

        h.engine.sort_by(VALUE, None).unwrap();
        assert_eq!(values(&h.engine), vec![5, 3, 1]);
        assert_eq!(h.engine.sort_specifiers(), &[SortFieldSpecifier::descending(VALUE)]);

        h.engine.clear_sort();
        assert_eq!(values(&h.engine), vec![5, 1, 3]);
        assert!(!h.engine.is_sorting());
    }

    #[test]
    fn test_secondary_keys_and_max() {
        let mut h = harness(&[2, 1, 2]);
        h.engine.sort_by(0, Some(false)).unwrap();
        h.engine.sort_by(VALUE, Some(true)).unwrap();
        assert_eq!(
            h.engine.sort_specifiers(),
            &[SortFieldSpecifier::ascending(VALUE), SortFieldSpecifier::descending(0)]
        );
        // value ascending, then id descending
        let ids: Vec<u32> = h.engine.visible_records().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 0]);

        // unsortable field is dropped entirely
        h.engine.sort_by_many(&[SortFieldSpecifier::ascending(2)]).unwrap();
        assert!(!h.engine.is_sorting());
        assert!(h.engine.sort_by(7, None).is_err());
    }

    #[test]
    fn test_continuous_filter_inserts_without_repopulating() {
        let mut h = harness(&[5, 15, 20, 3]);
        h.engine.set_filter(greater_than(10));
        assert_eq!(values(&h.engine), vec![15, 20]);
        assert_eq!(
            h.client.take(),
            vec![
                ClientNotification::PreReindex,
                ClientNotification::RowsLoaded,
                ClientNotification::PostReindex { all_rows_kept: false },
            ]
        );

        h.store.borrow().get_record(0).value.set(25);
        h.engine
            .invalidate_value(VALUE, 0, Some(ValueChangeKind::Increased))
            .unwrap();
        assert_eq!(values(&h.engine), vec![25, 15, 20]);
        assert_eq!(
            h.client.take(),
            vec![ClientNotification::RowsInserted { index: 0, count: 1 }]
        );
        assert_eq!(
            h.engine.get_value_recent_change(VALUE, 0).unwrap().map(|c| c.kind),
            Some(ValueChangeKind::Increased)
        );

        // dropping below the limit hides the row again
        h.store.borrow().get_record(2).value.set(1);
        h.engine.invalidate_value(VALUE, 2, None).unwrap();
        assert_eq!(values(&h.engine), vec![25, 15]);
        assert_eq!(
            h.client.take(),
            vec![ClientNotification::RowsDeleted { index: 2, count: 1 }]
        );
    }

    #[test]
    fn test_static_filter_waits_for_refilter() {
        let mut h = harness(&[5, 15, 20, 3]);
        h.engine.set_continuous_filtering(false);
        h.engine.set_filter(greater_than(10));
        h.client.take();

        h.store.borrow().get_record(3).value.set(30);
        h.engine.invalidate_value(VALUE, 3, None).unwrap();
        assert_eq!(values(&h.engine), vec![15, 20]);
        assert!(h.client.take().is_empty());

        // new records are still checked against the filter
        h.store.borrow_mut().push(item(4, 40));
        h.store.borrow_mut().push(item(5, 4));
        h.engine.records_inserted(4, 2, false).unwrap();
        assert_eq!(values(&h.engine), vec![15, 20, 40]);

        assert!(h.engine.repopulate_rows());
        assert_eq!(values(&h.engine), vec![15, 20, 30, 40]);
        assert_eq!(
            h.client.take(),
            vec![
                ClientNotification::RowsInserted { index: 2, count: 1 },
                ClientNotification::PreReindex,
                ClientNotification::RowsLoaded,
                ClientNotification::PostReindex { all_rows_kept: true },
            ]
        );
    }

    #[test]
    fn test_refilter_reports_lost_rows() {
        let mut h = harness(&[5, 15, 20]);
        h.engine.set_filter(greater_than(10));
        h.client.take();
        h.engine.set_filter(greater_than(17));
        assert_eq!(values(&h.engine), vec![20]);
        assert_eq!(
            h.client.take().last(),
            Some(&ClientNotification::PostReindex { all_rows_kept: false })
        );
    }

    #[test]
    fn test_sorted_insert_positions() {
        let mut h = harness(&[10, 30, 20]);
        h.engine.sort_by(VALUE, Some(true)).unwrap();
        h.client.take();

        h.store.borrow_mut().insert_many(1, vec![item(7, 25), item(8, 5)]);
        h.engine.records_inserted(1, 2, true).unwrap();
        assert_eq!(values(&h.engine), vec![5, 10, 20, 25, 30]);
        assert_eq!(
            h.client.take(),
            vec![
                ClientNotification::RowsInserted { index: 0, count: 1 },
                ClientNotification::RowsInserted { index: 3, count: 1 },
            ]
        );
        assert_eq!(
            h.engine.get_row_recent_change(3).unwrap().map(|c| c.kind),
            Some(RowChangeKind::Inserted)
        );
        assert_eq!(h.engine.get_row_index(2).unwrap(), Some(0));
    }

    #[test]
    fn test_bulk_insert_lands_as_one_run() {
        let mut h = harness(&[1, 2, 3]);
        h.store
            .borrow_mut()
            .insert_many(1, (10..210).map(|id| item(id, id as i64)).collect());
        h.engine.records_inserted(1, 200, true).unwrap();
        assert_eq!(h.engine.row_count(), 203);
        assert_eq!(h.engine.get_record_index(1).unwrap(), 1);
        assert_eq!(h.engine.get_record_index(201).unwrap(), 201);
        assert_eq!(
            h.client.take(),
            vec![ClientNotification::RowsInserted { index: 1, count: 200 }]
        );
        assert_eq!(h.engine.recent_change_count(), 200);
        assert!(h.engine.get_row_recent_change(0).unwrap().is_none());
        assert!(h.engine.get_row_recent_change(200).unwrap().is_some());
    }

    #[test]
    fn test_sorted_bulk_insert_groups_runs() {
        let mut h = harness(&[10, 20, 30]);
        h.engine.sort_by(VALUE, Some(true)).unwrap();
        h.engine.set_row_order_reversed(true);
        h.client.take();

        // 12, 15 and 17 all fall between 10 and 20; 40 goes last
        h.store
            .borrow_mut()
            .insert_many(0, vec![item(7, 17), item(8, 40), item(9, 12), item(10, 15)]);
        h.engine.records_inserted(0, 4, false).unwrap();
        assert_eq!(values(&h.engine), vec![40, 30, 20, 17, 15, 12, 10]);
        // canonical runs (1, 3) then (6, 1), reported mirrored
        assert_eq!(
            h.client.take(),
            vec![
                ClientNotification::RowsInserted { index: 2, count: 3 },
                ClientNotification::RowsInserted { index: 0, count: 1 },
            ]
        );
    }

    #[test]
    fn test_value_change_relocates_row() {
        let mut h = harness(&[1, 3, 5]);
        h.engine.sort_by(VALUE, Some(true)).unwrap();
        h.client.take();

        h.store.borrow().get_record(0).value.set(4);
        h.engine
            .invalidate_value(VALUE, 0, Some(ValueChangeKind::Increased))
            .unwrap();
        assert_eq!(values(&h.engine), vec![3, 4, 5]);
        assert_eq!(
            h.client.take(),
            vec![
                ClientNotification::RowsMoved { from: 0, to: 1, count: 1 },
                ClientNotification::InvalidateCell { field: VALUE, row: 1 },
            ]
        );
        assert!(h.engine.get_value_recent_change(VALUE, 1).unwrap().is_some());

        // a field outside the sort keys never moves the row
        h.engine.invalidate_value(0, 2, None).unwrap();
        assert_eq!(
            h.client.take(),
            vec![ClientNotification::InvalidateCell { field: 0, row: 2 }]
        );

        h.store.borrow().get_record(2).value.set(0);
        h.engine.invalidate_record(2, true).unwrap();
        assert_eq!(values(&h.engine), vec![0, 3, 4]);
        assert_eq!(
            h.client.take(),
            vec![
                ClientNotification::RowsMoved { from: 2, to: 0, count: 1 },
                ClientNotification::InvalidateRow { row: 0 },
            ]
        );
    }

    #[test]
    fn test_bulk_delete_is_coalesced() {
        let mut h = harness(&[0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        h.store.borrow_mut().remove(2, 3);
        h.engine.records_deleted(2, 3).unwrap();
        assert_eq!(
            h.client.take(),
            vec![ClientNotification::RowsDeleted { index: 2, count: 3 }]
        );
        assert_eq!(h.client.batches(), 1);
        assert_eq!(values(&h.engine), vec![0, 1, 5, 6, 7, 8, 9]);
    }

    #[test]
    fn test_sorted_delete_splits_into_runs() {
        let mut h = harness(&[4, 0, 3, 1, 2]);
        h.engine.sort_by(VALUE, Some(true)).unwrap();
        h.client.take();
        // records 0..3 hold values 4, 0, 3 which sit at rows 4, 0, 3
        h.store.borrow_mut().remove(0, 3);
        h.engine.records_deleted(0, 3).unwrap();
        assert_eq!(
            h.client.take(),
            vec![
                ClientNotification::RowsDeleted { index: 3, count: 2 },
                ClientNotification::RowsDeleted { index: 0, count: 1 },
            ]
        );
        assert_eq!(values(&h.engine), vec![1, 2]);
    }

    #[test]
    fn test_records_moved() {
        let mut h = harness(&[1, 2, 3, 4, 5]);
        h.store.borrow_mut().move_records(0, 3, 2);
        h.engine.records_moved(0, 3, 2).unwrap();
        assert_eq!(values(&h.engine), vec![3, 4, 5, 1, 2]);
        assert_eq!(
            h.client.take(),
            vec![ClientNotification::RowsMoved { from: 0, to: 3, count: 2 }]
        );

        let mut h = harness(&[1, 20, 30, 2, 40]);
        h.engine.set_filter(greater_than(10));
        h.client.take();
        h.store.borrow_mut().move_records(1, 3, 2);
        h.engine.records_moved(1, 3, 2).unwrap();
        assert_eq!(values(&h.engine), vec![40, 20, 30]);
        assert_eq!(
            h.client.take(),
            vec![ClientNotification::RowsMoved { from: 0, to: 1, count: 2 }]
        );
    }

    #[test]
    fn test_records_moved_while_sorted_keeps_ties_in_record_order() {
        let mut h = harness(&[7, 7, 1]);
        h.engine.sort_by(VALUE, Some(true)).unwrap();
        h.store.borrow_mut().move_records(0, 1, 1);
        h.engine.records_moved(0, 1, 1).unwrap();
        let ids: Vec<u32> = h.engine.visible_records().iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![2, 1, 0]);
    }

    #[test]
    fn test_replace_and_splice() {
        let mut h = harness(&[1, 2, 3]);
        h.engine.sort_by(VALUE, Some(true)).unwrap();
        h.client.take();

        h.store.borrow_mut().replace(0, item(9, 10));
        h.engine.records_replaced(0, 1, false).unwrap();
        assert_eq!(values(&h.engine), vec![2, 3, 10]);

        h.store.borrow_mut().remove(1, 1);
        h.store.borrow_mut().insert_many(1, vec![item(10, 0), item(11, 11)]);
        h.client.take();
        h.engine.records_spliced(1, 1, 2, false).unwrap();
        assert_eq!(values(&h.engine), vec![0, 3, 10, 11]);
        assert_eq!(h.client.batches(), 3);
    }

    #[test]
    fn test_records_loaded() {
        let mut h = harness(&[1, 2]);
        h.engine
            .invalidate_value(VALUE, 0, Some(ValueChangeKind::Changed))
            .unwrap();
        h.store
            .borrow_mut()
            .set_all(vec![item(0, 8), item(1, 9), item(2, 7)]);
        h.client.take();
        h.engine.records_loaded(true);
        assert_eq!(values(&h.engine), vec![8, 9, 7]);
        assert_eq!(h.client.take(), vec![ClientNotification::RowsLoaded]);
        assert_eq!(h.engine.recent_change_count(), 3);

        h.store.borrow_mut().set_all(Vec::new());
        h.engine.records_loaded(false);
        assert_eq!(h.client.take(), vec![ClientNotification::AllRowsDeleted]);
        assert_eq!(h.engine.recent_change_count(), 0);
    }

    #[test]
    fn test_expiry_forwards_invalidations_once() {
        let mut h = harness(&[1, 2, 3]);
        h.engine
            .invalidate_value(VALUE, 1, Some(ValueChangeKind::Decreased))
            .unwrap();
        assert_eq!(
            h.engine.get_value_recent_change(VALUE, 1).unwrap().map(|c| c.expiry_ms),
            Some(1000)
        );
        assert_eq!(h.timer.due(), Some(1000));
        h.client.take();

        h.clock.advance(1001);
        assert_eq!(h.engine.process_expiry_timeout(), 1);
        assert_eq!(
            h.client.take(),
            vec![ClientNotification::InvalidateCell { field: VALUE, row: 1 }]
        );
        assert!(h.engine.get_value_recent_change(VALUE, 1).unwrap().is_none());

        // nothing left to expire
        assert_eq!(h.engine.process_expiry_timeout(), 0);
        assert!(h.client.take().is_empty());
    }

    #[test]
    fn test_recent_changes_follow_rows_across_resort() {
        let mut h = harness(&[3, 1, 2]);
        h.engine.invalidate_record(0, true).unwrap();
        h.engine.sort_by(VALUE, Some(true)).unwrap();
        assert_eq!(
            h.engine.get_row_recent_change(2).unwrap().map(|c| c.kind),
            Some(RowChangeKind::Updated)
        );
        h.engine.clear_recent_changes();
        assert_eq!(h.engine.recent_change_count(), 0);
    }

    #[test]
    fn test_reversed_rows() {
        let mut h = harness(&[1, 2, 3]);
        h.engine.set_row_order_reversed(true);
        assert_eq!(values(&h.engine), vec![3, 2, 1]);
        assert_eq!(h.client.take(), vec![ClientNotification::RowsLoaded]);

        h.store.borrow_mut().push(item(3, 4));
        h.engine.records_inserted(3, 1, false).unwrap();
        assert_eq!(values(&h.engine), vec![4, 3, 2, 1]);
        assert_eq!(
            h.client.take(),
            vec![ClientNotification::RowsInserted { index: 0, count: 1 }]
        );

        h.store.borrow_mut().remove(0, 1);
        h.engine.records_deleted(0, 1).unwrap();
        assert_eq!(
            h.client.take(),
            vec![ClientNotification::RowsDeleted { index: 3, count: 1 }]
        );

        h.engine.invalidate_value(VALUE, 0, None).unwrap();
        assert_eq!(
            h.client.take(),
            vec![ClientNotification::InvalidateCell { field: VALUE, row: 2 }]
        );
        assert_eq!(h.engine.get_record_index(0).unwrap(), 2);
    }

    #[test]
    fn test_reversed_move() {
        let mut h = harness(&[1, 2, 3, 4]);
        h.engine.set_row_order_reversed(true);
        h.client.take();
        h.store.borrow_mut().move_records(0, 2, 1);
        h.engine.records_moved(0, 2, 1).unwrap();
        assert_eq!(values(&h.engine), vec![4, 1, 3, 2]);
        assert_eq!(
            h.client.take(),
            vec![ClientNotification::RowsMoved { from: 3, to: 1, count: 1 }]
        );
    }

    #[test]
    fn test_nested_brackets_flush_once() {
        let mut h = harness(&[1]);
        h.engine.begin_change();
        h.store.borrow_mut().push(item(1, 2));
        h.engine.records_inserted(1, 1, false).unwrap();
        h.store.borrow_mut().push(item(2, 3));
        h.engine.records_inserted(2, 1, false).unwrap();
        assert!(h.client.notifications().is_empty());
        h.engine.end_change();
        assert_eq!(h.client.batches(), 1);
        assert_eq!(
            h.client.take(),
            vec![
                ClientNotification::RowsInserted { index: 1, count: 1 },
                ClientNotification::RowsInserted { index: 2, count: 1 },
            ]
        );
    }

    #[test]
    fn test_range_errors_change_nothing() {
        let mut h = harness(&[1, 2, 3]);
        assert_eq!(
            h.engine.records_deleted(2, 2),
            Err(ViewError::RecordIndexOutOfRange { index: 3, len: 3 })
        );
        assert_eq!(
            h.engine.records_inserted(5, 0, false),
            Err(ViewError::RecordIndexOutOfRange { index: 5, len: 3 })
        );
        assert_eq!(
            h.engine.get_row_record(3).map(|_| ()),
            Err(ViewError::RowIndexOutOfRange { index: 3, len: 3 })
        );
        assert_eq!(
            h.engine.invalidate_value(3, 0, None),
            Err(ViewError::FieldIndexOutOfRange { index: 3, len: 3 })
        );
        assert!(h.engine.records_deleted(1, 0).is_ok());
        assert!(h.client.notifications().is_empty());
        assert_eq!(values(&h.engine), vec![1, 2, 3]);
    }

    #[test]
    fn test_invalidate_record_values_and_fields() {
        let mut h = harness(&[1, 2]);
        h.engine
            .invalidate_record_values(
                1,
                &[(0, ValueChangeKind::Changed), (VALUE, ValueChangeKind::Increased)],
            )
            .unwrap();
        h.engine.invalidate_record_fields(0, 1, 2).unwrap();
        h.engine
            .invalidate_record_and_values(0, true, &[(2, ValueChangeKind::Changed)])
            .unwrap();
        assert_eq!(
            h.client.take(),
            vec![
                ClientNotification::InvalidateRowCells { row: 1, fields: vec![0, VALUE] },
                ClientNotification::InvalidateRowColumns { row: 0, field: 1, count: 2 },
                ClientNotification::InvalidateRow { row: 0 },
            ]
        );
        assert_eq!(h.engine.recent_change_count(), 4);
        assert!(h.engine.invalidate_record_fields(0, 2, 2).is_err());
    }

    #[test]
    fn test_field_list_changes_shift_sort_keys() {
        let mut h = harness(&[2, 1]);
        h.engine.sort_by(VALUE, Some(true)).unwrap();
        h.client.take();

        let change = h.schema.borrow_mut().insert_fields(0, vec![Field::new("flag")]);
        h.engine.field_list_changed(change);
        assert_eq!(h.engine.sort_specifiers(), &[SortFieldSpecifier::ascending(2)]);
        assert!(h.client.take().is_empty());
        assert_eq!(values(&h.engine), vec![1, 2]);

        let change = h.schema.borrow_mut().remove_fields(2, 1);
        h.engine.field_list_changed(change);
        assert!(h.engine.sort_specifiers().is_empty());
        assert_eq!(values(&h.engine), vec![2, 1]);
        assert_eq!(
            h.client.take(),
            vec![
                ClientNotification::PreReindex,
                ClientNotification::InvalidateAll,
                ClientNotification::PostReindex { all_rows_kept: true },
            ]
        );
    }

    #[test]
    fn test_cell_highlights_follow_field_list_changes() {
        let mut h = harness(&[1]);
        h.engine
            .invalidate_value(VALUE, 0, Some(ValueChangeKind::Increased))
            .unwrap();

        let change = h.schema.borrow_mut().insert_fields(0, vec![Field::new("flag")]);
        h.engine.field_list_changed(change);
        assert!(h.engine.get_value_recent_change(VALUE + 1, 0).unwrap().is_some());
        assert!(h.engine.get_value_recent_change(VALUE, 0).unwrap().is_none());
        h.engine.check_consistency().unwrap();

        // drop "id" and "value", leaving "flag" and "note"
        let change = h.schema.borrow_mut().remove_fields(1, 2);
        h.engine.field_list_changed(change);
        assert_eq!(h.engine.recent_change_count(), 0);
        h.engine.check_consistency().unwrap();

        h.client.take();
        h.clock.advance(1001);
        assert_eq!(h.engine.process_expiry_timeout(), 0);
        assert!(h.client.take().is_empty());
    }

    #[test]
    fn test_field_set_and_clear_drop_sorting() {
        let mut h = harness(&[3, 1, 2]);
        h.engine.sort_by(VALUE, Some(false)).unwrap();
        assert_eq!(values(&h.engine), vec![3, 2, 1]);
        h.client.take();

        let change = h.schema.borrow_mut().set_fields(vec![
            Field::by_key("id", |i: &Item| i.id),
            Field::by_key("value", |i: &Item| i.value()),
        ]);
        h.engine.field_list_changed(change);
        assert!(!h.engine.is_sorting());
        assert_eq!(values(&h.engine), vec![3, 1, 2]);
        assert_eq!(h.client.take().first(), Some(&ClientNotification::PreReindex));

        h.engine.sort_by(VALUE, None).unwrap();
        assert_eq!(values(&h.engine), vec![1, 2, 3]);
        let change = h.schema.borrow_mut().clear();
        h.engine.field_list_changed(change);
        assert!(h.engine.sort_specifiers().is_empty());
        assert_eq!(values(&h.engine), vec![3, 1, 2]);

        // nothing left to sort by, so a second clear changes nothing
        h.client.take();
        let change = h.schema.borrow_mut().clear();
        h.engine.field_list_changed(change);
        assert!(h.client.take().is_empty());
    }

    #[test]
    fn test_descending_only_field_cannot_toggle() {
        let mut h = harness(&[2, 3, 1]);
        let change = h.schema.borrow_mut().insert_fields(
            3,
            vec![Field::new("rank").with_compare_desc(|a: &Item, b: &Item| b.value().cmp(&a.value()))],
        );
        h.engine.field_list_changed(change);

        h.engine.sort_by(3, None).unwrap();
        assert_eq!(h.engine.sort_specifiers(), &[SortFieldSpecifier::descending(3)]);
        assert_eq!(values(&h.engine), vec![3, 2, 1]);
        h.client.take();

        // toggling asks for ascending, which falls back to descending again
        h.engine.sort_by(3, None).unwrap();
        assert_eq!(h.engine.sort_specifiers(), &[SortFieldSpecifier::descending(3)]);
        assert_eq!(values(&h.engine), vec![3, 2, 1]);
        assert!(h.client.take().is_empty());
    }

    #[test]
    fn test_enabling_continuous_filtering_refilters() {
        let mut h = harness(&[5, 15, 20, 3]);
        h.engine.set_continuous_filtering(false);
        h.engine.set_filter(greater_than(10));
        assert_eq!(values(&h.engine), vec![15, 20]);

        h.store.borrow().get_record(0).value.set(25);
        h.engine.invalidate_value(VALUE, 0, None).unwrap();
        assert_eq!(values(&h.engine), vec![15, 20]);
        h.client.take();

        h.engine.set_continuous_filtering(true);
        assert!(h.engine.continuous_filtering());
        assert_eq!(values(&h.engine), vec![25, 15, 20]);
        assert_eq!(
            h.client.take(),
            vec![
                ClientNotification::PreReindex,
                ClientNotification::RowsLoaded,
                ClientNotification::PostReindex { all_rows_kept: true },
            ]
        );

        // membership now follows every change
        h.store.borrow().get_record(1).value.set(1);
        h.engine.invalidate_value(VALUE, 1, None).unwrap();
        assert_eq!(values(&h.engine), vec![25, 20]);
        assert_eq!(
            h.client.take(),
            vec![ClientNotification::RowsDeleted { index: 1, count: 1 }]
        );
    }

    /// Drops every highlight as soon as rows show up
    struct HighlightResetClient {
        log: RecordingClient,
        commands: ViewCommands,
    }

    impl ViewClient for HighlightResetClient {
        fn begin_change(&mut self) {
            self.log.begin_change();
        }
        fn end_change(&mut self) {
            self.log.end_change();
        }
        fn rows_inserted(&mut self, index: usize, count: usize) {
            self.log.rows_inserted(index, count);
            self.commands.push(ViewCommand::ClearRecentChanges);
        }
        fn rows_deleted(&mut self, index: usize, count: usize) {
            self.log.rows_deleted(index, count);
        }
        fn rows_moved(&mut self, from: usize, to: usize, count: usize) {
            self.log.rows_moved(from, to, count);
        }
        fn rows_loaded(&mut self) {
            self.log.rows_loaded();
        }
        fn all_rows_deleted(&mut self) {
            self.log.all_rows_deleted();
        }
        fn invalidate_all(&mut self) {
            self.log.invalidate_all();
        }
        fn invalidate_row(&mut self, row: usize) {
            self.log.invalidate_row(row);
        }
        fn invalidate_cell(&mut self, field: usize, row: usize) {
            self.log.invalidate_cell(field, row);
        }
        fn invalidate_row_cells(&mut self, row: usize, fields: &[usize]) {
            self.log.invalidate_row_cells(row, fields);
        }
        fn invalidate_row_columns(&mut self, row: usize, field: usize, count: usize) {
            self.log.invalidate_row_columns(row, field, count);
        }
        fn pre_reindex(&mut self) {
            self.log.pre_reindex();
        }
        fn post_reindex(&mut self, all_rows_kept: bool) {
            self.log.post_reindex(all_rows_kept);
        }
    }

    #[test]
    fn test_client_commands_run_after_dispatch() {
        let h = harness(&[1]);
        let commands = ViewCommands::new();
        let log = RecordingClient::new();
        let client = HighlightResetClient {
            log: log.clone(),
            commands: commands.clone(),
        };
        let mut engine = ViewEngine::with_timer(
            h.store.clone(),
            h.schema.clone(),
            Box::new(client),
            ViewConfig::default().with_consistency_checks(true),
            Rc::new(h.clock.clone()),
            Box::new(RecordingTimer::new()),
        )
        .with_commands(commands.clone());

        h.store.borrow_mut().push(item(1, 2));
        engine.records_inserted(1, 1, true).unwrap();
        assert_eq!(engine.recent_change_count(), 0);
        assert_eq!(log.batches(), 2);
        assert_eq!(
            log.take(),
            vec![
                ClientNotification::RowsInserted { index: 1, count: 1 },
                ClientNotification::InvalidateAll,
            ]
        );
        assert!(commands.is_empty());

        // a failing command is dropped without touching the view
        commands.push(ViewCommand::RecordsDeleted { index: 9, count: 1 });
        engine.begin_change();
        engine.end_change();
        assert!(engine.commands().is_empty());
        assert_eq!(engine.row_count(), 2);
        assert!(log.take().is_empty());
    }

    #[test]
    #[should_panic(expected = "not supported")]
    fn test_field_move_is_fatal() {
        let mut h = harness(&[1]);
        let change = h.schema.borrow_mut().move_fields(0, 2, 1);
        h.engine.field_list_changed(change);
    }
}
