//! Recent Changes Example
//!
//! Simulates a ticking price board: values change, the engine tags the
//! changed cells, and a manual clock drives the expiry timer so the
//! highlights fade in batches.

use liverows::{
    Clock, Field, ManualClock, RecordStore, RecordingClient, RecordingTimer, Schema, ValueChangeKind,
    VecRecordStore, ViewConfig, ViewEngine,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct Ticker {
    symbol: &'static str,
    last: Cell<i64>,
}

fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    println!("=== LiveRows Recent Changes Example ===\n");

    let store = Rc::new(RefCell::new(VecRecordStore::from_values(
        [("ACME", 120), ("BOLT", 45), ("CRUX", 310), ("DYNE", 78)]
            .into_iter()
            .map(|(symbol, last)| Ticker {
                symbol,
                last: Cell::new(last),
            })
            .collect(),
    )));
    let schema = Rc::new(RefCell::new(Schema::new(vec![
        Field::by_key("symbol", |t: &Ticker| t.symbol),
        Field::by_key("last", |t: &Ticker| t.last.get()),
    ])));

    let clock = ManualClock::new(0);
    let timer = RecordingTimer::new();
    let client = RecordingClient::new();
    let config = ViewConfig {
        value_changed_duration_ms: 1500,
        ..ViewConfig::default()
    };
    let mut view = ViewEngine::with_timer(
        store.clone(),
        schema,
        Box::new(client.clone()),
        config,
        Rc::new(clock.clone()),
        Box::new(timer.clone()),
    );
    view.sort_by(1, Some(false)).unwrap();
    client.take();

    let ticks = [(1, 52), (3, 81), (0, 118), (1, 49), (2, 330)];
    for (step, &(record, last)) in ticks.iter().enumerate() {
        let ticker = store.borrow().get_record(record);
        let previous = ticker.last.replace(last);
        let kind = if last > previous {
            ValueChangeKind::Increased
        } else {
            ValueChangeKind::Decreased
        };
        view.invalidate_value(1, record, Some(kind)).unwrap();

        println!("t={:>4}ms {} {} -> {}", clock.now_ms(), ticker.symbol, previous, last);
        for row in 0..view.row_count() {
            let t = view.get_row_record(row).unwrap();
            let mark = match view.get_value_recent_change(1, row).unwrap() {
                Some(change) if change.kind == ValueChangeKind::Increased => "^",
                Some(_) => "v",
                None => " ",
            };
            println!("   {:<5} {:>5} {mark}", t.symbol, t.last.get());
        }
        println!("   timer due at {:?}\n", timer.due());

        clock.advance(400 + 200 * step as u64);
        if timer.due().is_some_and(|due| due <= clock.now_ms()) {
            let expired = view.process_expiry_timeout();
            println!("   expired {expired} highlight(s): {:?}\n", client.take());
        }
        client.take();
    }

    println!("{} highlight(s) still live", view.recent_change_count());
    println!("=== Example Complete ===");
}
