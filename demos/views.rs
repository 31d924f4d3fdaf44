//! Views Example
//!
//! This example demonstrates:
//! - Sorting a live view by one and then two fields
//! - Continuous filtering as record values change
//! - Incremental inserts and deletes reported to a client
//! - Reversing the row order
//!
//! Run with `RUST_LOG=debug` to see the engine's reindex logging.

use liverows::{
    Field, RecordStore, RecordingClient, Schema, SortFieldSpecifier, ValueChangeKind, VecRecordStore, ViewConfig,
    ViewEngine,
};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

struct Product {
    name: &'static str,
    category: &'static str,
    price: Cell<f64>,
    stock: Cell<i32>,
}

fn product(name: &'static str, category: &'static str, price: f64, stock: i32) -> Product {
    Product {
        name,
        category,
        price: Cell::new(price),
        stock: Cell::new(stock),
    }
}

fn print_rows(title: &str, view: &ViewEngine<Product>) {
    println!("{title}");
    for (row, p) in view.visible_records().iter().enumerate() {
        println!(
            "   {row}: {:<8} {:<12} {:>8.2} {:>4}",
            p.name,
            p.category,
            p.price.get(),
            p.stock.get()
        );
    }
    println!();
}

fn print_notifications(client: &RecordingClient) {
    for notification in client.take() {
        println!("   -> {notification:?}");
    }
    println!();
}

fn main() {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    println!("=== LiveRows Views Example ===\n");

    // 1. Store and schema
    let store = Rc::new(RefCell::new(VecRecordStore::from_values(vec![
        product("Laptop", "Electronics", 999.99, 5),
        product("Mouse", "Electronics", 29.99, 20),
        product("Desk", "Furniture", 299.99, 3),
        product("Chair", "Furniture", 199.99, 8),
        product("Monitor", "Electronics", 399.99, 10),
    ])));
    let schema = Rc::new(RefCell::new(Schema::new(vec![
        Field::by_key("name", |p: &Product| p.name),
        Field::by_key("category", |p: &Product| p.category),
        Field::new("price").with_compare(|a: &Product, b: &Product| a.price.get().total_cmp(&b.price.get())),
        Field::by_key("stock", |p: &Product| p.stock.get()),
    ])));
    let price = schema.borrow().get_field_index("price").unwrap_or(2);
    let stock = schema.borrow().get_field_index("stock").unwrap_or(3);

    let client = RecordingClient::new();
    let mut view = ViewEngine::new(
        store.clone(),
        schema.clone(),
        Box::new(client.clone()),
        ViewConfig::default(),
    );
    print_rows("1. Unsorted view:", &view);

    // 2. Sort by price, then toggle
    view.sort_by(price, None).unwrap();
    print_rows("2. Sorted by price (ascending):", &view);
    view.sort_by(price, None).unwrap();
    print_rows("   Clicked again (price only sorts ascending, so it falls back):", &view);

    // 3. Two keys
    view.sort_by_many(&[
        SortFieldSpecifier::ascending(1),
        SortFieldSpecifier::descending(stock),
    ])
    .unwrap();
    print_rows("3. Sorted by category, then stock descending:", &view);
    client.take();

    // 4. Filter on stock
    view.set_filter(Some(Rc::new(|p: &Product| p.stock.get() >= 5)));
    print_rows("4. Filtered to stock >= 5:", &view);
    client.take();

    // 5. A value change moves a product into the view
    store.borrow().get_record(2).stock.set(12);
    view.invalidate_value(stock, 2, Some(ValueChangeKind::Increased)).unwrap();
    print_rows("5. Desk restocked to 12:", &view);
    print_notifications(&client);

    // 6. Inserts and deletes
    store.borrow_mut().push(product("Lamp", "Furniture", 49.99, 7));
    let count = store.borrow().record_count();
    view.records_inserted(count - 1, 1, true).unwrap();
    print_rows("6. Lamp added:", &view);
    print_notifications(&client);

    store.borrow_mut().remove(0, 2);
    view.records_deleted(0, 2).unwrap();
    print_rows("   Laptop and Mouse removed:", &view);
    print_notifications(&client);

    // 7. Reverse the rows
    view.set_row_order_reversed(true);
    print_rows("7. Reversed:", &view);

    println!("=== Example Complete ===");
}
