// INSERT ... RETURNING against a real database file, with two sessions
// sharing one write lock
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use litegate::core::{DatabaseError, Privilege, PrivilegeSet, SessionGrant, SessionId, Value};
use litegate::executor::{build_statement, EngineSettings, ExecutionContext, Outcome, SessionRegistry};
use litegate::parser::parse_statement;
use litegate::transaction::{LockCoordinator, WriteLock};

fn open(path: &Path, session: SessionId, lock: Arc<dyn WriteLock>) -> ExecutionContext {
    open_as(path, session, lock, SessionGrant::superuser("root", "main"))
}

fn open_as(path: &Path, session: SessionId, lock: Arc<dyn WriteLock>, grant: SessionGrant) -> ExecutionContext {
    ExecutionContext::open(
        path,
        session,
        lock,
        EngineSettings {
            lock_wait: Duration::ZERO,
            busy_retry: Duration::ZERO,
        },
        grant,
    )
    .unwrap()
}

fn grant_of(username: &str, privileges: &[Privilege]) -> SessionGrant {
    SessionGrant {
        username: username.to_string(),
        database: "main".to_string(),
        is_superuser: false,
        privileges: PrivilegeSet::of(privileges),
        read_only: false,
    }
}

/// Runs a statement up to its first result
fn try_exec(ctx: &mut ExecutionContext, sql: &str) -> Result<Outcome, DatabaseError> {
    let registry = SessionRegistry::new();
    let mut stmt = build_statement(parse_statement(sql)?, ctx, &registry)?;
    stmt.prepare(ctx)?;
    stmt.pre_execute(ctx, 0)?;
    let outcome = stmt.execute(ctx, 0)?;
    if outcome == Outcome::ResultSet {
        stmt.result_set()?;
    }
    stmt.complete(ctx, true)?;
    Ok(outcome)
}

fn exec(ctx: &mut ExecutionContext, sql: &str) {
    let registry = SessionRegistry::new();
    let mut stmt = build_statement(parse_statement(sql).unwrap(), ctx, &registry).unwrap();
    stmt.prepare(ctx).unwrap();
    stmt.pre_execute(ctx, 0).unwrap();
    if stmt.execute(ctx, 0).unwrap() == Outcome::ResultSet {
        stmt.result_set().unwrap();
    }
    stmt.complete(ctx, true).unwrap();
}

fn count(ctx: &ExecutionContext) -> i64 {
    ctx.connection()
        .query_row("SELECT count(*) FROM t", [], |r| r.get(0))
        .unwrap()
}

/// Refuses the first `refusals` acquisitions, then behaves like the real lock
#[derive(Default)]
struct FlakyLock {
    inner: LockCoordinator,
    refusals: AtomicUsize,
    attempts: AtomicUsize,
}

impl fmt::Debug for FlakyLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlakyLock")
            .field("refusals", &self.refusals.load(Ordering::SeqCst))
            .finish()
    }
}

impl WriteLock for FlakyLock {
    fn acquire(&self, session: SessionId, timeout: Duration) -> bool {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return false;
        }
        self.inner.acquire(session, timeout)
    }

    fn release(&self, session: SessionId) -> Result<(), DatabaseError> {
        self.inner.release(session)
    }
}

#[test]
fn test_returning_scenario_on_empty_table() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.db");
    let lock = LockCoordinator::new();
    let mut ctx = open(&path, 1, Arc::new(lock.clone()));
    exec(&mut ctx, "CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)");

    let registry = SessionRegistry::new();
    let descriptor = parse_statement("INSERT INTO t(v) VALUES ('a'),('b') RETURNING id, v").unwrap();
    let mut stmt = build_statement(descriptor, &mut ctx, &registry).unwrap();
    stmt.prepare(&mut ctx).unwrap();
    stmt.pre_execute(&mut ctx, 0).unwrap();
    assert_eq!(stmt.execute(&mut ctx, 0).unwrap(), Outcome::ResultSet);
    assert_eq!(stmt.update_count(), Some(2));

    let rows = stmt.result_set().unwrap();
    assert_eq!(rows.columns, vec!["id".to_string(), "v".to_string()]);
    assert_eq!(
        rows.rows,
        vec![
            vec![Value::Integer(1), Value::Text("a".into())],
            vec![Value::Integer(2), Value::Text("b".into())],
        ]
    );
    stmt.complete(&mut ctx, true).unwrap();

    // committed without any visible BEGIN/COMMIT, and visible to another connection
    assert!(!ctx.in_transaction());
    let other = open(&path, 2, Arc::new(lock.clone()));
    assert_eq!(count(&other), 2);
    assert!(lock.acquire(2, Duration::ZERO));
}

#[test]
fn test_returning_ids_follow_existing_rows() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = open(&dir.path().join("t.db"), 1, Arc::new(LockCoordinator::new()));
    exec(&mut ctx, "CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)");
    exec(&mut ctx, "INSERT INTO t(v) VALUES ('a'),('b'),('c'),('d')");
    exec(&mut ctx, "DELETE FROM t WHERE id = 2");

    let registry = SessionRegistry::new();
    let descriptor = parse_statement("INSERT INTO t(v) SELECT v FROM t RETURNING id").unwrap();
    let mut stmt = build_statement(descriptor, &mut ctx, &registry).unwrap();
    stmt.prepare(&mut ctx).unwrap();
    stmt.execute(&mut ctx, 0).unwrap();
    let rows = stmt.result_set().unwrap();
    assert_eq!(
        rows.column_values("id"),
        vec![&Value::Integer(5), &Value::Integer(6), &Value::Integer(7)]
    );
    stmt.complete(&mut ctx, true).unwrap();
}

#[test]
fn test_second_writer_is_busy_until_first_commits() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.db");
    let lock = LockCoordinator::new();
    let mut a = open(&path, 1, Arc::new(lock.clone()));
    let mut b = open(&path, 2, Arc::new(lock.clone()));
    exec(&mut a, "CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)");

    exec(&mut a, "BEGIN");
    exec(&mut a, "INSERT INTO t(v) VALUES ('from a')");

    let registry = SessionRegistry::new();
    let descriptor = parse_statement("INSERT INTO t(v) VALUES ('from b') RETURNING id").unwrap();
    let mut stmt = build_statement(descriptor, &mut b, &registry).unwrap();
    stmt.prepare(&mut b).unwrap();
    for _ in 0..3 {
        let err = stmt.execute(&mut b, 0).unwrap_err();
        assert!(err.is_retryable(), "{err}");
    }

    exec(&mut a, "COMMIT");
    stmt.pre_execute(&mut b, 0).unwrap();
    stmt.execute(&mut b, 0).unwrap();
    assert_eq!(stmt.result_set().unwrap().column_values("id"), vec![&Value::Integer(2)]);
    stmt.complete(&mut b, true).unwrap();
    assert_eq!(count(&a), 2);
}

#[test]
fn test_resumes_without_redoing_steps() {
    let dir = tempfile::tempdir().unwrap();
    let lock = Arc::new(FlakyLock {
        refusals: AtomicUsize::new(3),
        ..FlakyLock::default()
    });
    let mut ctx = open(&dir.path().join("t.db"), 1, lock.clone());
    ctx.connection()
        .execute_batch("CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)")
        .unwrap();

    let registry = SessionRegistry::new();
    let descriptor = parse_statement("INSERT INTO t(v) VALUES ('a'),('b') RETURNING id").unwrap();
    let mut stmt = build_statement(descriptor, &mut ctx, &registry).unwrap();
    stmt.prepare(&mut ctx).unwrap();
    let mut busy = 0;
    loop {
        match stmt.pre_execute(&mut ctx, 0).and_then(|()| stmt.execute(&mut ctx, 0)) {
            Ok(outcome) => {
                assert_eq!(outcome, Outcome::ResultSet);
                break;
            }
            Err(err) if err.is_retryable() => busy += 1,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }
    assert_eq!(busy, 3);
    assert_eq!(lock.attempts.load(Ordering::SeqCst), 4);
    assert_eq!(stmt.result_set().unwrap().len(), 2);
    stmt.complete(&mut ctx, true).unwrap();
    assert_eq!(count(&ctx), 2);
}

#[test]
fn test_engine_busy_mid_sequence_resumes_at_insert() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.db");
    let mut ctx = open(&path, 1, Arc::new(LockCoordinator::new()));
    exec(&mut ctx, "CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)");
    exec(&mut ctx, "INSERT INTO t(v) VALUES ('seed')");

    // a writer the lock coordinator knows nothing about
    let outsider = rusqlite::Connection::open(&path).unwrap();
    outsider.execute_batch("BEGIN IMMEDIATE").unwrap();

    exec(&mut ctx, "BEGIN");
    let registry = SessionRegistry::new();
    let descriptor = parse_statement("INSERT INTO t(v) VALUES ('x') RETURNING id, v").unwrap();
    let mut stmt = build_statement(descriptor, &mut ctx, &registry).unwrap();
    stmt.prepare(&mut ctx).unwrap();
    let err = stmt.execute(&mut ctx, 0).unwrap_err();
    assert!(err.is_retryable(), "{err}");

    outsider.execute_batch("ROLLBACK").unwrap();
    stmt.execute(&mut ctx, 0).unwrap();
    let rows = stmt.result_set().unwrap();
    assert_eq!(rows.rows, vec![vec![Value::Integer(2), Value::Text("x".into())]]);
    stmt.complete(&mut ctx, true).unwrap();
    exec(&mut ctx, "COMMIT");
    assert_eq!(count(&ctx), 2);
}

#[test]
fn test_cancel_releases_lock() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.db");
    let lock = LockCoordinator::new();
    let mut ctx = open(&path, 1, Arc::new(lock.clone()));
    exec(&mut ctx, "CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)");
    exec(&mut ctx, "BEGIN IMMEDIATE");
    exec(&mut ctx, "INSERT INTO t(v) VALUES ('kept until rollback')");

    let registry = SessionRegistry::new();
    let descriptor = parse_statement("INSERT INTO t(v) VALUES ('x') RETURNING id").unwrap();
    let mut stmt = build_statement(descriptor, &mut ctx, &registry).unwrap();
    stmt.prepare(&mut ctx).unwrap();
    ctx.cancel_handle().cancel_query();
    assert!(matches!(stmt.execute(&mut ctx, 0), Err(DatabaseError::Cancelled)));
    stmt.close(&mut ctx);

    // the explicit transaction survives a cancelled statement; closing the session frees the lock
    assert!(ctx.in_transaction());
    assert!(!lock.acquire(2, Duration::ZERO));
    drop(ctx);
    assert!(lock.acquire(2, Duration::ZERO));
    let check = open(&path, 3, Arc::new(LockCoordinator::new()));
    assert_eq!(count(&check), 0);
}

#[test]
fn test_explicit_rowid_is_unsupported() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = open(&dir.path().join("t.db"), 1, Arc::new(LockCoordinator::new()));
    exec(&mut ctx, "CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)");
    let registry = SessionRegistry::new();
    let descriptor = parse_statement("INSERT INTO t(rowid, v) VALUES (7, 'x') RETURNING v").unwrap();
    let mut stmt = build_statement(descriptor, &mut ctx, &registry).unwrap();
    assert!(matches!(stmt.prepare(&mut ctx), Err(DatabaseError::Unsupported(_))));
}

#[test]
fn test_insert_without_column_list_keeps_ids_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = open(&dir.path().join("t.db"), 1, Arc::new(LockCoordinator::new()));
    exec(&mut ctx, "CREATE TABLE t(id INTEGER PRIMARY KEY, v TEXT)");
    exec(&mut ctx, "INSERT INTO t(v) VALUES ('a'),('b')");

    for sql in [
        "INSERT INTO t VALUES (1000, 'a'), (500, 'b') RETURNING id, v",
        "INSERT INTO t SELECT id + 100, v FROM t RETURNING id",
    ] {
        assert!(matches!(try_exec(&mut ctx, sql), Err(DatabaseError::Unsupported(_))), "{sql}");
    }
    assert_eq!(count(&ctx), 2);
    assert!(!ctx.in_transaction());

    let registry = SessionRegistry::new();
    let descriptor = parse_statement("INSERT INTO t(v) VALUES ('c') RETURNING id").unwrap();
    let mut stmt = build_statement(descriptor, &mut ctx, &registry).unwrap();
    stmt.prepare(&mut ctx).unwrap();
    stmt.execute(&mut ctx, 0).unwrap();
    assert_eq!(stmt.result_set().unwrap().column_values("id"), vec![&Value::Integer(3)]);
    stmt.complete(&mut ctx, true).unwrap();
}

#[test]
fn test_insert_or_replace_returns_the_new_row() {
    let dir = tempfile::tempdir().unwrap();
    let mut ctx = open(&dir.path().join("t.db"), 1, Arc::new(LockCoordinator::new()));
    exec(&mut ctx, "CREATE TABLE t(id INTEGER PRIMARY KEY, k TEXT UNIQUE, v TEXT)");
    exec(&mut ctx, "INSERT INTO t(k, v) VALUES ('a', 'old'), ('b', 'old')");

    let registry = SessionRegistry::new();
    let descriptor = parse_statement("INSERT OR REPLACE INTO t(k, v) VALUES ('a', 'new') RETURNING id, k, v").unwrap();
    let mut stmt = build_statement(descriptor, &mut ctx, &registry).unwrap();
    stmt.prepare(&mut ctx).unwrap();
    stmt.pre_execute(&mut ctx, 0).unwrap();
    stmt.execute(&mut ctx, 0).unwrap();
    assert_eq!(
        stmt.result_set().unwrap().rows,
        vec![vec![Value::Integer(3), Value::Text("a".into()), Value::Text("new".into())]]
    );
    stmt.complete(&mut ctx, true).unwrap();
    assert_eq!(count(&ctx), 2);
}

#[test]
fn test_restricted_grants_cover_cte_writes_and_replace() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("t.db");
    let lock: Arc<dyn WriteLock> = Arc::new(LockCoordinator::new());
    let mut root = open(&path, 1, lock.clone());
    exec(&mut root, "CREATE TABLE t(v TEXT)");

    let mut reader = open_as(&path, 2, lock.clone(), grant_of("bob", &[Privilege::Select]));
    assert!(matches!(
        try_exec(&mut reader, "WITH x AS (SELECT 'w') INSERT INTO t SELECT * FROM x"),
        Err(DatabaseError::PermissionDenied(_))
    ));
    assert_eq!(try_exec(&mut reader, "WITH x AS (SELECT v FROM t) SELECT * FROM x").unwrap(), Outcome::ResultSet);

    let mut writer = open_as(&path, 3, lock, grant_of("carol", &[Privilege::Select, Privilege::Insert]));
    try_exec(&mut writer, "WITH x AS (SELECT 'w') INSERT INTO t SELECT * FROM x").unwrap();
    assert!(matches!(
        try_exec(&mut writer, "REPLACE INTO t(v) VALUES ('r')"),
        Err(DatabaseError::PermissionDenied(msg)) if msg.starts_with("DELETE")
    ));
    assert!(matches!(
        try_exec(&mut writer, "INSERT OR REPLACE INTO t(v) VALUES ('r') RETURNING v"),
        Err(DatabaseError::PermissionDenied(_))
    ));
    assert_eq!(count(&root), 1);
}
