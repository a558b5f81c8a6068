//! SQLite persistence.
//!
//! `Db` owns one connection and exposes the data operations, split by area
//! into the submodules. `DbHandle` wraps it for async callers.

mod assets;
mod flows;
mod organization;
mod projects;
mod repair;
pub mod sequence;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};

/// Async-safe handle to the database.
///
/// Wraps `Db` behind `Arc<Mutex>` and runs all access on tokio's blocking
/// thread pool via `spawn_blocking`, keeping synchronous SQLite I/O off the
/// async worker threads.
#[derive(Clone)]
pub struct DbHandle {
    inner: Arc<std::sync::Mutex<Db>>,
}

impl DbHandle {
    pub fn new(db: Db) -> Self {
        Self {
            inner: Arc::new(std::sync::Mutex::new(db)),
        }
    }

    /// Run a closure with access to the database on a blocking thread.
    /// All data passed into `f` must be owned (`'static`).
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Db) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let db = self.inner.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))?;
            f(&guard)
        })
        .await
        .context("DB task panicked")?
    }

    /// Acquire the database mutex synchronously. For startup and tests only;
    /// never call this from an async request path.
    pub fn lock_sync(&self) -> Result<std::sync::MutexGuard<'_, Db>> {
        self.inner
            .lock()
            .map_err(|e| anyhow::anyhow!("DB lock poisoned: {}", e))
    }
}

pub struct Db {
    conn: Connection,
}

impl Db {
    pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn new(path: &Path, busy_timeout: Duration) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database at {}", path.display()))?;
        conn.busy_timeout(busy_timeout)
            .context("Failed to set busy timeout")?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("Failed to enable WAL journal")?;
        let db = Self { conn };
        db.init()?;
        tracing::debug!(path = %path.display(), "database ready");
        Ok(db)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn new_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> Result<()> {
        self.conn
            .execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        self.run_migrations().context("Failed to run migrations")?;
        Ok(())
    }

    /// Begin a transaction that takes the database write lock up front.
    ///
    /// Every read made inside it is serialized against other writers, which
    /// is what the sequence allocator relies on.
    pub(crate) fn immediate(&self) -> Result<Transaction<'_>> {
        Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .context("Failed to begin immediate transaction")
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS hospitals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    grade TEXT,
                    address TEXT,
                    contact TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS departments (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    hospital_id INTEGER NOT NULL REFERENCES hospitals(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    contact TEXT,
                    attri TEXT NOT NULL DEFAULT 'other',
                    desc TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(hospital_id, name)
                );

                CREATE TABLE IF NOT EXISTS accounts (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT NOT NULL UNIQUE,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS staff (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    hospital_id INTEGER NOT NULL REFERENCES hospitals(id) ON DELETE CASCADE,
                    department_id INTEGER REFERENCES departments(id) ON DELETE SET NULL,
                    account_id INTEGER NOT NULL UNIQUE REFERENCES accounts(id),
                    name TEXT NOT NULL,
                    title TEXT,
                    contact TEXT,
                    email TEXT,
                    roles TEXT NOT NULL DEFAULT '[]',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS asset_devices (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    hospital_id INTEGER NOT NULL REFERENCES hospitals(id) ON DELETE CASCADE,
                    department_id INTEGER REFERENCES departments(id) ON DELETE SET NULL,
                    asset_no TEXT NOT NULL,
                    title TEXT NOT NULL,
                    serial_no TEXT,
                    type_spec TEXT,
                    manufacturer TEXT,
                    service_life INTEGER,
                    purchase_date TEXT,
                    storage_place TEXT,
                    responsible_id INTEGER REFERENCES staff(id) ON DELETE SET NULL,
                    status TEXT NOT NULL DEFAULT 'using',
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(hospital_id, asset_no)
                );

                CREATE TABLE IF NOT EXISTS sequences (
                    key TEXT PRIMARY KEY,
                    value INTEGER NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS fault_types (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    hospital_id INTEGER NOT NULL REFERENCES hospitals(id) ON DELETE CASCADE,
                    parent_id INTEGER REFERENCES fault_types(id),
                    title TEXT NOT NULL,
                    desc TEXT NOT NULL DEFAULT ''
                );

                CREATE TABLE IF NOT EXISTS repair_orders (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    hospital_id INTEGER NOT NULL REFERENCES hospitals(id),
                    order_no TEXT NOT NULL UNIQUE,
                    asset_id INTEGER NOT NULL REFERENCES asset_devices(id),
                    applicant_id INTEGER NOT NULL REFERENCES staff(id),
                    fault_type_id INTEGER REFERENCES fault_types(id),
                    priority TEXT NOT NULL DEFAULT 'normal',
                    desc TEXT NOT NULL DEFAULT '',
                    status TEXT NOT NULL DEFAULT 'submitted',
                    maintainer_id INTEGER REFERENCES staff(id),
                    result TEXT,
                    solution TEXT,
                    expenses REAL,
                    rating INTEGER,
                    comment TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    dispatched_at TEXT,
                    completed_at TEXT,
                    closed_at TEXT,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS repair_order_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    order_id INTEGER NOT NULL REFERENCES repair_orders(id),
                    operator_id INTEGER NOT NULL REFERENCES staff(id),
                    action TEXT NOT NULL,
                    from_status TEXT,
                    to_status TEXT NOT NULL,
                    message TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS project_flows (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    hospital_id INTEGER NOT NULL REFERENCES hospitals(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    default_flow INTEGER NOT NULL DEFAULT 0,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS milestones (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    flow_id INTEGER NOT NULL REFERENCES project_flows(id) ON DELETE CASCADE,
                    parent_id INTEGER REFERENCES milestones(id) ON DELETE CASCADE,
                    title TEXT NOT NULL,
                    idx INTEGER NOT NULL DEFAULT 0,
                    desc TEXT NOT NULL DEFAULT ''
                );

                CREATE TABLE IF NOT EXISTS project_plans (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    hospital_id INTEGER NOT NULL REFERENCES hospitals(id),
                    title TEXT NOT NULL,
                    handing_type TEXT NOT NULL DEFAULT 'assigned',
                    project_cate TEXT NOT NULL DEFAULT 'hardware',
                    purpose TEXT NOT NULL DEFAULT '',
                    pre_amount REAL NOT NULL DEFAULT 0,
                    creator_id INTEGER NOT NULL REFERENCES staff(id),
                    related_dept_id INTEGER REFERENCES departments(id) ON DELETE SET NULL,
                    performer_id INTEGER REFERENCES staff(id),
                    assistant_id INTEGER REFERENCES staff(id),
                    attached_flow_id INTEGER REFERENCES project_flows(id),
                    current_milestone_id INTEGER REFERENCES milestones(id),
                    status TEXT NOT NULL DEFAULT 'pending',
                    overrule_reason TEXT,
                    startup_at TEXT,
                    completed_at TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS project_devices (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES project_plans(id) ON DELETE CASCADE,
                    name TEXT NOT NULL,
                    type_spec TEXT,
                    num INTEGER NOT NULL DEFAULT 1,
                    measure TEXT,
                    purpose TEXT,
                    planned_price REAL NOT NULL DEFAULT 0
                );

                CREATE TABLE IF NOT EXISTS project_milestone_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    project_id INTEGER NOT NULL REFERENCES project_plans(id),
                    milestone_id INTEGER NOT NULL REFERENCES milestones(id),
                    action TEXT NOT NULL,
                    operator_id INTEGER NOT NULL REFERENCES staff(id),
                    summary TEXT NOT NULL DEFAULT '',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_departments_hospital ON departments(hospital_id);
                CREATE INDEX IF NOT EXISTS idx_staff_hospital ON staff(hospital_id);
                CREATE INDEX IF NOT EXISTS idx_assets_hospital ON asset_devices(hospital_id, status);
                CREATE INDEX IF NOT EXISTS idx_repair_orders_hospital ON repair_orders(hospital_id, status);
                CREATE INDEX IF NOT EXISTS idx_repair_orders_asset ON repair_orders(asset_id);
                CREATE INDEX IF NOT EXISTS idx_repair_records_order ON repair_order_records(order_id);
                CREATE INDEX IF NOT EXISTS idx_milestones_flow ON milestones(flow_id);
                CREATE INDEX IF NOT EXISTS idx_projects_hospital ON project_plans(hospital_id, status);
                CREATE INDEX IF NOT EXISTS idx_project_devices_project ON project_devices(project_id);
                CREATE INDEX IF NOT EXISTS idx_milestone_records_project ON project_milestone_records(project_id);
                ",
            )
            .context("Failed to create tables")?;

        // Milestone records are an append-only audit trail.
        self.conn
            .execute_batch(
                "
                CREATE TRIGGER IF NOT EXISTS trg_milestone_records_no_update
                BEFORE UPDATE ON project_milestone_records
                BEGIN
                    SELECT RAISE(ABORT, 'project milestone records are immutable');
                END;

                CREATE TRIGGER IF NOT EXISTS trg_milestone_records_no_delete
                BEFORE DELETE ON project_milestone_records
                BEGIN
                    SELECT RAISE(ABORT, 'project milestone records are immutable');
                END;
                ",
            )
            .context("Failed to create milestone record triggers")?;

        Ok(())
    }
}

/// Parse an enum column, naming the column on failure.
pub(crate) fn parse_column<T>(value: &str, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e: String| anyhow::anyhow!("invalid {} in database: {}", column, e))
}

/// Whether a statement failed on a UNIQUE constraint.
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
