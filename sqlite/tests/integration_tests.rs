//! Integration tests for the dbcommand-sqlite crate.

use std::path::Path;

use dbcommand_core::{
    Command, CommandResult, CommandType, Record, RecordBindingType, Status, Transaction, Value,
};
use dbcommand_sqlite::{ConnectionState, Database, DatabaseConfig, MetaTable};
use rusqlite::Connection;

/// Opens a database on a file inside `dir`.
fn file_database(dir: &Path) -> Database {
    Database::new(DatabaseConfig::new(dir.join("test.db"))).unwrap()
}

fn initialize(version: i32, compatible_version: i32) -> Transaction {
    Transaction::new(version, compatible_version).with_command(Command::initialize())
}

fn single(command: Command) -> Transaction {
    Transaction::new(1, 1).with_command(command)
}

/// Initializes and creates the `t(id, name)` table used by most tests.
fn setup_table(db: &mut Database) {
    let tx = initialize(1, 1)
        .with_command(Command::execute("CREATE TABLE t (id INTEGER, name TEXT)"));
    assert_eq!(db.run_transaction(&tx).status, Status::Ok);
}

fn read_all(db: &mut Database, sql: &str) -> Vec<Record> {
    let response = db.run_transaction(&single(Command::read(sql)));
    assert_eq!(response.status, Status::Ok);
    response.records().unwrap().to_vec()
}

/// Snapshot of every user row, independent of the executor.
fn dump(path: &Path) -> Vec<(i64, String)> {
    let conn = Connection::open(path).unwrap();
    let mut stmt = conn.prepare("SELECT id, name FROM t ORDER BY rowid").unwrap();
    stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap()
}

// =============================================================================
// End-to-end scenarios
// =============================================================================

#[test]
fn test_end_to_end_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = file_database(dir.path());

    let response = db.run_transaction(&initialize(1, 1));
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.value(), Some(&Value::Int(1)));

    let response = db.run_transaction(&single(Command::execute(
        "CREATE TABLE t(id INTEGER, name TEXT)",
    )));
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.value(), Some(&Value::Int(0)));

    let response = db.run_transaction(&single(
        Command::run("INSERT INTO t VALUES(?,?)")
            .bind(0, 1i64)
            .bind(1, "a"),
    ));
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.value(), Some(&Value::Int(1)));

    let response = db.run_transaction(&single(Command::read("SELECT id,name FROM t")));
    assert_eq!(response.status, Status::Ok);
    assert_eq!(
        response.result,
        Some(CommandResult::Records(vec![Record::new(vec![
            Value::Int64(1),
            Value::String("a".into()),
        ])]))
    );
}

#[test]
fn test_open_failure_is_initialization_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("nested").join("test.db");
    let mut db = Database::new(DatabaseConfig::new(path)).unwrap();

    let response = db.run_transaction(&initialize(1, 1));
    assert_eq!(response.status, Status::InitializationError);
    assert_eq!(db.state(), ConnectionState::Unopened);
}

// =============================================================================
// Schema version bookkeeping
// =============================================================================

#[test]
fn test_fresh_database_bootstrap() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let mut db = file_database(dir.path());

    let response = db.run_transaction(&initialize(7, 4));
    assert_eq!(response.value(), Some(&Value::Int(7)));
    drop(db);

    let conn = Connection::open(&path).unwrap();
    let meta = MetaTable::default();
    assert!(meta.exists(&conn).unwrap());
    assert_eq!(meta.version(&conn).unwrap(), 7);
    assert_eq!(meta.compatible_version(&conn).unwrap(), 4);
}

#[test]
fn test_initialize_is_idempotent() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();

    let first = db.run_transaction(&initialize(2, 1));
    let second = db.run_transaction(&initialize(9, 9));
    assert_eq!(first.value(), Some(&Value::Int(2)));
    assert_eq!(second.value(), first.value());

    let tables = read_all(
        &mut db,
        "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
    );
    assert_eq!(tables, vec![Record::new(vec![Value::String("meta".into())])]);
}

#[test]
fn test_initialize_twice_in_one_batch() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
    let tx = initialize(3, 3).with_command(Command::initialize());
    let response = db.run_transaction(&tx);
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.value(), Some(&Value::Int(3)));
}

#[test]
fn test_existing_database_reports_stored_version() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut db = file_database(dir.path());
        assert!(db.run_transaction(&initialize(2, 2)).is_ok());
    }

    let mut db = file_database(dir.path());
    let response = db.run_transaction(&initialize(10, 8));
    assert_eq!(response.value(), Some(&Value::Int(2)));
}

#[test]
fn test_migrate_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = file_database(dir.path());
    assert!(db.run_transaction(&initialize(1, 1)).is_ok());

    let migrate = Transaction::new(5, 3)
        .with_command(Command::execute("CREATE TABLE t (id INTEGER, name TEXT)"))
        .with_command(Command::migrate());
    assert_eq!(db.run_transaction(&migrate).status, Status::Ok);

    assert!(db.run_transaction(&single(Command::close())).is_ok());
    assert_eq!(db.state(), ConnectionState::Closed);

    let response = db.run_transaction(&initialize(1, 1));
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.value(), Some(&Value::Int(5)));

    let conn = Connection::open(dir.path().join("test.db")).unwrap();
    assert_eq!(MetaTable::default().compatible_version(&conn).unwrap(), 3);
}

#[test]
fn test_custom_meta_table_name() {
    let mut config = DatabaseConfig::in_memory();
    config.meta_table = "schema_meta".into();
    let mut db = Database::new(config).unwrap();
    assert!(db.run_transaction(&initialize(1, 1)).is_ok());

    let tables = read_all(
        &mut db,
        "SELECT name FROM sqlite_master WHERE type = 'table'",
    );
    assert_eq!(tables, vec![Record::new(vec![Value::String("schema_meta".into())])]);
}

// =============================================================================
// Atomicity
// =============================================================================

#[test]
fn test_failing_command_rolls_back_batch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let mut db = file_database(dir.path());
    setup_table(&mut db);
    assert!(db
        .run_transaction(&single(
            Command::run("INSERT INTO t VALUES (?, ?)").bind(0, 1i64).bind(1, "a")
        ))
        .is_ok());
    let before = dump(&path);

    let tx = Transaction::new(1, 1)
        .with_command(Command::run("INSERT INTO t VALUES (?, ?)").bind(0, 2i64).bind(1, "b"))
        .with_command(Command::execute("UPDATE t SET name = 'changed'"))
        .with_command(Command::execute("INSERT INTO no_such_table VALUES (1)"))
        .with_command(Command::run("INSERT INTO t VALUES (3, 'c')"));
    let response = db.run_transaction(&tx);
    assert_eq!(response.status, Status::CommandError);
    assert!(response.result.is_none());

    assert_eq!(dump(&path), before);
}

#[test]
fn test_failed_migrate_batch_keeps_version() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
    assert!(db.run_transaction(&initialize(1, 1)).is_ok());

    let tx = Transaction::new(2, 2)
        .with_command(Command::migrate())
        .with_command(Command::execute("THIS IS NOT SQL"));
    assert_eq!(db.run_transaction(&tx).status, Status::CommandError);

    assert_eq!(db.run_transaction(&initialize(1, 1)).value(), Some(&Value::Int(1)));
}

#[test]
fn test_constraint_violation_rolls_back() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
    let tx = initialize(1, 1)
        .with_command(Command::execute("CREATE TABLE u (id INTEGER PRIMARY KEY)"))
        .with_command(Command::run("INSERT INTO u VALUES (?)").bind(0, 1i64));
    assert!(db.run_transaction(&tx).is_ok());

    let tx = Transaction::new(1, 1)
        .with_command(Command::run("INSERT INTO u VALUES (?)").bind(0, 2i64))
        .with_command(Command::run("INSERT INTO u VALUES (?)").bind(0, 1i64));
    assert_eq!(db.run_transaction(&tx).status, Status::CommandError);

    let rows = read_all(&mut db, "SELECT id FROM u");
    assert_eq!(rows, vec![Record::new(vec![Value::Int64(1)])]);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_close_must_be_alone() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
    setup_table(&mut db);

    let tx = Transaction::new(1, 1)
        .with_command(Command::run("INSERT INTO t VALUES (1, 'a')"))
        .with_command(Command::close());
    assert_eq!(db.run_transaction(&tx).status, Status::CommandError);
    assert_eq!(db.state(), ConnectionState::Open { initialized: true });
    assert!(read_all(&mut db, "SELECT * FROM t").is_empty());
}

#[test]
fn test_close_then_reopen_requires_initialize() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = file_database(dir.path());
    setup_table(&mut db);

    assert!(db.run_transaction(&single(Command::close())).is_ok());
    assert_eq!(db.state(), ConnectionState::Closed);

    let response = db.run_transaction(&single(Command::read("SELECT * FROM t")));
    assert_eq!(response.status, Status::InitializationError);
    assert_eq!(db.state(), ConnectionState::Open { initialized: false });

    assert!(db.run_transaction(&initialize(1, 1)).is_ok());
    assert!(read_all(&mut db, "SELECT * FROM t").is_empty());
}

#[test]
fn test_uninitialized_gate() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let mut db = file_database(dir.path());

    for command in [
        Command::read("SELECT 1"),
        Command::execute("CREATE TABLE t (id INTEGER, name TEXT)"),
        Command::run("CREATE TABLE t (id INTEGER, name TEXT)"),
        Command::migrate(),
    ] {
        let command_type = command.command_type;
        let response = db.run_transaction(&single(command));
        assert_eq!(
            response.status,
            Status::InitializationError,
            "{command_type:?} ran before Initialize"
        );
    }

    let conn = Connection::open(&path).unwrap();
    let tables: i64 = conn
        .query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get(0))
        .unwrap();
    assert_eq!(tables, 0);
}

#[test]
fn test_initialize_earlier_in_same_batch_opens_gate() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
    let tx = initialize(1, 1)
        .with_command(Command::execute("CREATE TABLE t (id INTEGER, name TEXT)"))
        .with_command(Command::read("SELECT COUNT(*) FROM t"));
    let response = db.run_transaction(&tx);
    assert_eq!(response.status, Status::Ok);
    assert_eq!(
        response.records().unwrap(),
        &[Record::new(vec![Value::Int64(0)])]
    );
}

#[test]
fn test_vacuum_runs_after_commit() {
    let dir = tempfile::tempdir().unwrap();
    let mut db = file_database(dir.path());
    setup_table(&mut db);

    let tx = Transaction::new(1, 1)
        .with_command(Command::vacuum())
        .with_command(Command::run("INSERT INTO t VALUES (1, 'a')"));
    let response = db.run_transaction(&tx);
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.value(), Some(&Value::Int(1)));
    assert_eq!(read_all(&mut db, "SELECT id FROM t").len(), 1);
}

/// Fills `t` with ~500 KiB of rows and deletes them again, leaving free pages.
fn fill_and_delete(db: &mut Database) {
    let fill = single(Command::execute(
        "WITH RECURSIVE n(i) AS (SELECT 1 UNION ALL SELECT i + 1 FROM n WHERE i < 500) \
         INSERT INTO t SELECT i, hex(randomblob(512)) FROM n",
    ));
    assert!(db.run_transaction(&fill).is_ok());
    assert!(db.run_transaction(&single(Command::execute("DELETE FROM t"))).is_ok());
}

fn freelist_count(path: &Path) -> i64 {
    let conn = Connection::open(path).unwrap();
    conn.query_row("PRAGMA freelist_count", [], |row| row.get(0))
        .unwrap()
}

#[test]
fn test_vacuum_reclaims_free_pages() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let mut db = file_database(dir.path());
    setup_table(&mut db);
    fill_and_delete(&mut db);
    assert!(freelist_count(&path) > 0);

    let response = db.run_transaction(&single(Command::vacuum()));
    assert_eq!(response.status, Status::Ok);
    assert_eq!(freelist_count(&path), 0);
}

#[test]
fn test_failed_vacuum_keeps_ok_status() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("test.db");
    let config = DatabaseConfig {
        busy_timeout_ms: Some(0),
        ..DatabaseConfig::new(&path)
    };
    let mut db = Database::new(config).unwrap();
    setup_table(&mut db);
    fill_and_delete(&mut db);

    // An open read transaction elsewhere keeps VACUUM from taking its lock.
    let reader = Connection::open(&path).unwrap();
    reader.execute_batch("BEGIN").unwrap();
    let held: i64 = reader
        .query_row("SELECT COUNT(*) FROM t", [], |row| row.get(0))
        .unwrap();
    assert_eq!(held, 0);

    let tx = Transaction::new(1, 1)
        .with_command(Command::read("SELECT COUNT(*) FROM t"))
        .with_command(Command::vacuum());
    let response = db.run_transaction(&tx);
    assert_eq!(response.status, Status::Ok);
    assert_eq!(response.records().unwrap()[0].fields, vec![Value::Int64(0)]);

    reader.execute_batch("ROLLBACK").unwrap();
    assert!(freelist_count(&path) > 0);

    assert!(db.run_transaction(&single(Command::vacuum())).is_ok());
    assert_eq!(freelist_count(&path), 0);
}

#[test]
fn test_vacuum_in_failed_batch_is_skipped() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
    setup_table(&mut db);
    let tx = Transaction::new(1, 1)
        .with_command(Command::vacuum())
        .with_command(Command::execute("BROKEN"));
    assert_eq!(db.run_transaction(&tx).status, Status::CommandError);
}

// =============================================================================
// Reads and bindings
// =============================================================================

#[test]
fn test_read_preserves_insertion_order_and_is_idempotent() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
    setup_table(&mut db);

    let mut tx = Transaction::new(1, 1);
    for (id, name) in [(1i64, "A"), (2, "B"), (3, "C")] {
        tx = tx.with_command(Command::run("INSERT INTO t VALUES (?, ?)").bind(0, id).bind(1, name));
    }
    assert!(db.run_transaction(&tx).is_ok());

    let first = read_all(&mut db, "SELECT name FROM t");
    let names: Vec<_> = first.iter().map(|r| r.fields[0].clone()).collect();
    assert_eq!(names, vec![Value::from("A"), Value::from("B"), Value::from("C")]);

    let second = read_all(&mut db, "SELECT name FROM t");
    assert_eq!(first, second);
}

#[test]
fn test_read_with_bindings() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
    setup_table(&mut db);
    let tx = Transaction::new(1, 1)
        .with_command(Command::run("INSERT INTO t VALUES (1, 'a')"))
        .with_command(Command::run("INSERT INTO t VALUES (2, 'b')"))
        .with_command(Command::read("SELECT name FROM t WHERE id = ?").bind(0, 2i64));
    let response = db.run_transaction(&tx);
    assert_eq!(
        response.records().unwrap(),
        &[Record::new(vec![Value::String("b".into())])]
    );
}

#[test]
fn test_read_with_legacy_record_bindings() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
    setup_table(&mut db);
    assert!(db
        .run_transaction(&single(Command::run("INSERT INTO t VALUES (5, 'x')")))
        .is_ok());

    let read = Command::read("SELECT id, name, id FROM t").with_record_bindings([
        RecordBindingType::Int,
        RecordBindingType::String,
        RecordBindingType::Bool,
    ]);
    let response = db.run_transaction(&single(read));
    assert_eq!(
        response.records().unwrap(),
        &[Record::new(vec![
            Value::Int(5),
            Value::String("x".into()),
            Value::Bool(true),
        ])]
    );
}

#[test]
fn test_binding_round_trip_for_every_tag() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
    let tx = initialize(1, 1).with_command(Command::execute("CREATE TABLE v (x)"));
    assert!(db.run_transaction(&tx).is_ok());

    let cases = [
        (Value::String("héllo".into()), RecordBindingType::String, None),
        (Value::Int(i32::MIN), RecordBindingType::Int, None),
        (Value::Int64(i64::MAX), RecordBindingType::Int64, None),
        (Value::Double(0.1 + 0.2), RecordBindingType::Double, None),
        (Value::Bool(true), RecordBindingType::Bool, None),
        (Value::Null, RecordBindingType::Int64, Some(Value::Null)),
    ];

    for (value, record_type, inferred) in cases {
        let tx = Transaction::new(1, 1)
            .with_command(Command::execute("DELETE FROM v"))
            .with_command(Command::run("INSERT INTO v VALUES (?)").bind(0, value.clone()));
        assert!(db.run_transaction(&tx).is_ok());

        if let Some(expected) = inferred {
            let rows = read_all(&mut db, "SELECT x FROM v");
            assert_eq!(rows, vec![Record::new(vec![expected])]);
            continue;
        }

        let read = Command::read("SELECT x FROM v").with_record_bindings([record_type]);
        let response = db.run_transaction(&single(read));
        assert_eq!(
            response.records().unwrap(),
            &[Record::new(vec![value.clone()])],
            "round trip of {}",
            value.type_name()
        );
    }
}

#[test]
fn test_double_is_bit_exact() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
    let tx = initialize(1, 1)
        .with_command(Command::execute("CREATE TABLE d (x REAL)"))
        .with_command(Command::run("INSERT INTO d VALUES (?)").bind(0, std::f64::consts::PI))
        .with_command(Command::run("INSERT INTO d VALUES (?)").bind(0, f64::MIN_POSITIVE));
    assert!(db.run_transaction(&tx).is_ok());

    let rows = read_all(&mut db, "SELECT x FROM d");
    let bits: Vec<u64> = rows
        .iter()
        .map(|r| r.fields[0].as_f64().unwrap().to_bits())
        .collect();
    assert_eq!(
        bits,
        vec![std::f64::consts::PI.to_bits(), f64::MIN_POSITIVE.to_bits()]
    );
}

#[test]
fn test_blob_reads_as_string() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
    assert!(db.run_transaction(&initialize(1, 1)).is_ok());
    let rows = read_all(&mut db, "SELECT x'68656c6c6f'");
    assert_eq!(rows, vec![Record::new(vec![Value::String("hello".into())])]);
}

#[test]
fn test_run_reports_changed_rows() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
    setup_table(&mut db);
    let tx = Transaction::new(1, 1)
        .with_command(Command::execute("INSERT INTO t VALUES (1, 'a'), (2, 'b'), (3, 'c')"))
        .with_command(Command::run("UPDATE t SET name = ? WHERE id > ?").bind(0, "z").bind(1, 1i64));
    let response = db.run_transaction(&tx);
    assert_eq!(response.value(), Some(&Value::Int(2)));
}

#[test]
fn test_invalid_transactions_are_rejected_before_running() {
    let mut db = Database::new(DatabaseConfig::in_memory()).unwrap();
    setup_table(&mut db);

    let tx = Transaction::new(1, 1)
        .with_command(Command::run("INSERT INTO t VALUES (9, 'z')"))
        .with_command(Command::new(CommandType::Read, ""));
    assert_eq!(db.run_transaction(&tx).status, Status::CommandError);
    assert!(read_all(&mut db, "SELECT * FROM t").is_empty());
}

// =============================================================================
// Configuration
// =============================================================================

#[test]
fn test_database_from_yaml_config() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("db.yml");
    let db_path = dir.path().join("app.db");
    std::fs::write(
        &config_path,
        format!(
            "location: !File {}\nmeta_table: versions\nbusy_timeout_ms: 100\nforeign_keys: true\n",
            db_path.display()
        ),
    )
    .unwrap();

    let config = DatabaseConfig::load(&config_path).unwrap();
    let mut db = Database::new(config).unwrap();
    let tx = initialize(1, 1)
        .with_command(Command::execute("CREATE TABLE p (id INTEGER PRIMARY KEY)"))
        .with_command(Command::execute(
            "CREATE TABLE c (p INTEGER REFERENCES p(id))",
        ));
    assert!(db.run_transaction(&tx).is_ok());

    let orphan = single(Command::run("INSERT INTO c VALUES (?)").bind(0, 42i64));
    assert_eq!(db.run_transaction(&orphan).status, Status::CommandError);

    let conn = Connection::open(&db_path).unwrap();
    assert_eq!(MetaTable::new("versions").unwrap().version(&conn).unwrap(), 1);
}
