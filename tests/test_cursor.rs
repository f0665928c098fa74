use lumokv::{Access, CursorState, Database, Environment, Error, HandleKind, Order};
use tempfile::TempDir;

fn setup_test_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db = lumokv::open(Access::READ_WRITE | Access::CREATE, temp_dir.path()).unwrap();
    (temp_dir, db)
}

fn fill(db: &Database) {
    for (key, value) in [("1", "one"), ("2", "two"), ("3", "three"), ("4", "four")] {
        db.set(key, value).unwrap();
    }
}

fn collect(db: &Database, order: Order, start: Option<&[u8]>) -> Vec<(String, String)> {
    db.cursor(order, start)
        .unwrap()
        .map(|row| {
            let (key, value) = row.unwrap();
            (
                String::from_utf8(key).unwrap(),
                String::from_utf8(value).unwrap(),
            )
        })
        .collect()
}

fn keys(db: &Database, order: Order, start: Option<&[u8]>) -> Vec<String> {
    collect(db, order, start).into_iter().map(|(k, _)| k).collect()
}

#[test]
fn test_cursor_greater_than() {
    let (_dir, mut db) = setup_test_db();
    fill(&db);

    let mut cursor = db.cursor(Order::GT, Some(&b"1"[..])).unwrap();
    let mut rows = Vec::new();
    while cursor.fetch().unwrap() {
        rows.push((cursor.key_str().unwrap(), cursor.value_str().unwrap()));
    }
    cursor.close().unwrap();
    drop(cursor);

    assert_eq!(
        rows,
        vec![
            ("2".to_string(), "two".to_string()),
            ("3".to_string(), "three".to_string()),
            ("4".to_string(), "four".to_string()),
        ]
    );
    db.close().unwrap();
}

#[test]
fn test_cursor_less_than_first_key_is_empty() {
    let (_dir, mut db) = setup_test_db();
    fill(&db);

    let mut cursor = db.cursor(Order::LT, Some(&b"1"[..])).unwrap();
    assert!(!cursor.fetch().unwrap());
    assert_eq!(cursor.state(), CursorState::Exhausted);
    cursor.close().unwrap();
    drop(cursor);

    db.close().unwrap();
}

#[test]
fn test_cursor_orders() {
    let (_dir, mut db) = setup_test_db();
    fill(&db);

    assert_eq!(keys(&db, Order::GT, None), vec!["1", "2", "3", "4"]);
    assert_eq!(keys(&db, Order::GTE, None), vec!["1", "2", "3", "4"]);
    assert_eq!(keys(&db, Order::LT, None), vec!["4", "3", "2", "1"]);
    assert_eq!(keys(&db, Order::LTE, None), vec!["4", "3", "2", "1"]);

    assert_eq!(keys(&db, Order::GTE, Some(&b"2"[..])), vec!["2", "3", "4"]);
    assert_eq!(keys(&db, Order::GT, Some(&b"2"[..])), vec!["3", "4"]);
    assert_eq!(keys(&db, Order::LTE, Some(&b"3"[..])), vec!["3", "2", "1"]);
    assert_eq!(keys(&db, Order::LT, Some(&b"3"[..])), vec!["2", "1"]);

    // Start keys that are not stored
    assert_eq!(keys(&db, Order::GTE, Some(&b"25"[..])), vec!["3", "4"]);
    assert_eq!(keys(&db, Order::LTE, Some(&b"25"[..])), vec!["2", "1"]);
    assert_eq!(keys(&db, Order::GTE, Some(&b""[..])), vec!["1", "2", "3", "4"]);

    db.close().unwrap();
}

#[test]
fn test_cursor_empty_database() {
    let (_dir, mut db) = setup_test_db();

    let mut cursor = db.cursor(Order::GTE, None).unwrap();
    assert!(!cursor.fetch().unwrap());
    cursor.close().unwrap();
    drop(cursor);

    db.close().unwrap();
}

#[test]
fn test_cursor_states() {
    let (_dir, mut db) = setup_test_db();
    db.set("only", "row").unwrap();

    let mut cursor = db.cursor(Order::GT, None).unwrap();
    assert_eq!(cursor.state(), CursorState::Unstarted);
    assert_eq!(cursor.key(), Err(Error::NotPositioned));
    assert_eq!(cursor.value(), Err(Error::NotPositioned));

    assert!(cursor.fetch().unwrap());
    assert_eq!(cursor.state(), CursorState::Positioned);
    assert_eq!(cursor.key_size().unwrap(), 4);
    assert_eq!(cursor.value_size().unwrap(), 3);
    assert_eq!(cursor.key().unwrap(), b"only");
    assert_eq!(cursor.value().unwrap(), b"row");

    assert!(!cursor.fetch().unwrap());
    assert_eq!(cursor.state(), CursorState::Exhausted);
    assert_eq!(cursor.key(), Err(Error::NotPositioned));

    // Exhaustion is sticky
    assert!(!cursor.fetch().unwrap());

    cursor.close().unwrap();
    assert_eq!(cursor.state(), CursorState::Closed);
    assert_eq!(cursor.fetch(), Err(Error::Closed(HandleKind::Cursor)));
    assert_eq!(cursor.key(), Err(Error::Closed(HandleKind::Cursor)));
    cursor.close().unwrap();
    assert!(cursor.next().is_none());

    drop(cursor);
    db.close().unwrap();
}

#[test]
fn test_partial_iteration_then_close() {
    let (_dir, mut db) = setup_test_db();
    fill(&db);

    {
        let mut cursor = db.cursor(Order::GTE, None).unwrap();
        assert!(cursor.fetch().unwrap());
        assert_eq!(cursor.key().unwrap(), b"1");
        cursor.close().unwrap();
    }

    db.set("5", "five").unwrap();
    assert_eq!(db.get("2").unwrap(), b"two");
    assert!(db.has("5").unwrap());
    assert_eq!(keys(&db, Order::GT, None), vec!["1", "2", "3", "4", "5"]);

    db.close().unwrap();
}

#[test]
fn test_cursor_released_on_drop() {
    let (_dir, mut db) = setup_test_db();
    fill(&db);

    {
        let mut cursor = db.cursor(Order::GT, None).unwrap();
        assert!(cursor.fetch().unwrap());
    }

    db.close().unwrap();
}

#[test]
fn test_close_with_leaked_cursor() {
    let (_dir, mut db) = setup_test_db();
    fill(&db);

    let cursor = db.cursor(Order::GT, None).unwrap();
    std::mem::forget(cursor);

    assert_eq!(db.close(), Err(Error::CursorsOpen(1)));
    assert!(!db.is_closed());
}

#[test]
fn test_cursor_is_a_snapshot() {
    let (_dir, mut db) = setup_test_db();
    fill(&db);

    let mut cursor = db.cursor(Order::GT, None).unwrap();
    db.set("0", "zero").unwrap();
    db.delete("4").unwrap();

    let mut seen = Vec::new();
    while cursor.fetch().unwrap() {
        seen.push(cursor.key_str().unwrap());
    }
    assert_eq!(seen, vec!["1", "2", "3", "4"]);
    cursor.close().unwrap();
    drop(cursor);

    assert_eq!(keys(&db, Order::GT, None), vec!["0", "1", "2", "3"]);
    db.close().unwrap();
}

#[test]
fn test_cursor_from_and_each() {
    let (_dir, mut db) = setup_test_db();
    fill(&db);

    let mut cursor = db.cursor_from(Order::LTE, "2").unwrap();
    assert!(cursor.fetch().unwrap());
    assert_eq!(cursor.value_str().unwrap(), "two");
    cursor.close().unwrap();
    drop(cursor);

    let mut rows = Vec::new();
    db.each(Order::GT, Some(&b"2"[..]), |key, value| {
        rows.push((key.to_vec(), value.to_vec()));
    })
    .unwrap();
    assert_eq!(
        rows,
        vec![
            (b"3".to_vec(), b"three".to_vec()),
            (b"4".to_vec(), b"four".to_vec()),
        ]
    );

    db.close().unwrap();
}

#[test]
fn test_custom_comparator() {
    let dir = TempDir::new().unwrap();

    let mut env = Environment::new().unwrap();
    env.set_directory(Access::READ_WRITE | Access::CREATE, dir.path())
        .unwrap();
    env.set_comparator(|a, b| b.cmp(a)).unwrap();
    let mut db = env.open().unwrap();
    fill(&db);

    assert_eq!(keys(&db, Order::GT, None), vec!["4", "3", "2", "1"]);
    assert_eq!(keys(&db, Order::GT, Some(&b"3"[..])), vec!["2", "1"]);
    assert_eq!(keys(&db, Order::LTE, Some(&b"2"[..])), vec!["2", "3", "4"]);
    assert_eq!(db.get("3").unwrap(), b"three");

    db.close().unwrap();
}

#[test]
fn test_comparator_numeric_keys() {
    let dir = TempDir::new().unwrap();

    let mut env = Environment::new().unwrap();
    env.set_directory(Access::READ_WRITE | Access::CREATE, dir.path())
        .unwrap();
    env.set_comparator(|a, b| {
        let a: u64 = std::str::from_utf8(a).unwrap().parse().unwrap();
        let b: u64 = std::str::from_utf8(b).unwrap().parse().unwrap();
        a.cmp(&b)
    })
    .unwrap();
    let mut db = env.open().unwrap();

    for key in ["10", "9", "100", "1"] {
        db.set(key, key).unwrap();
    }
    assert_eq!(keys(&db, Order::GT, None), vec!["1", "9", "10", "100"]);

    db.close().unwrap();

    // The comparator is needed again on reopen
    let mut env = Environment::new().unwrap();
    env.set_directory(Access::READ_WRITE, dir.path()).unwrap();
    env.set_comparator(|a, b| {
        let a: u64 = std::str::from_utf8(a).unwrap().parse().unwrap();
        let b: u64 = std::str::from_utf8(b).unwrap().parse().unwrap();
        a.cmp(&b)
    })
    .unwrap();
    let mut db = env.open().unwrap();
    assert_eq!(keys(&db, Order::LT, None), vec!["100", "10", "9", "1"]);
    db.close().unwrap();
}
