//! SQLite access shared by the DAOs, with transaction scopes that carry
//! post-commit hooks.
//!
//! A DAO obtains its connection through [`Database::conn`]: inside a
//! [`with_transaction`] scope that is the transaction's connection,
//! otherwise a pooled one.

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool};
use tokio::sync::{Mutex, MutexGuard};

pub use sqlx::SqliteConnection;

use crate::context::Context;
use crate::error::{Error, Result};

type Hook = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;
type Open = Option<sqlx::Transaction<'static, Sqlite>>;

/// Connections kept for a file-backed database. Readers proceed while a
/// transaction holds a connection; writers queue on SQLite's busy timeout.
const FILE_POOL_SIZE: u32 = 8;

/// Handle to the SQLite pool.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("size", &self.pool.size())
            .finish()
    }
}

impl Database {
    /// Connects using a `sqlite:` URL (`sqlite::memory:` for a private
    /// in-memory database).
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the database cannot be opened.
    pub async fn connect(url: &str) -> Result<Self> {
        let mut options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let in_memory = url.contains(":memory:");
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // An in-memory database is private to its connection.
        let max_connections = if in_memory { 1 } else { FILE_POOL_SIZE };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        tracing::debug!(url, "opened database");
        Ok(Self { pool })
    }

    /// Opens (creating if missing) a database file.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory or the file cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::connect(&format!("sqlite:{}?mode=rwc", path.display())).await
    }

    /// Opens a private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot be initialized.
    pub async fn in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:").await
    }

    /// Returns the underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Executes each statement of a schema script in order.
    ///
    /// # Errors
    ///
    /// Returns the first failing statement's error.
    pub async fn migrate(&self, statements: &[&str]) -> Result<()> {
        for statement in statements {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Returns the connection `ctx` must use.
    ///
    /// # Errors
    ///
    /// Returns an error if no pooled connection can be acquired.
    pub async fn conn<'a>(&'a self, ctx: &'a Context) -> Result<Conn<'a>> {
        match ctx.transaction() {
            Some(tx) => Ok(Conn::Transaction(tx.open.lock().await)),
            None => Ok(Conn::Pooled(self.pool.acquire().await?)),
        }
    }
}

/// A connection borrowed for one DAO call.
pub enum Conn<'a> {
    /// The connection of the enclosing transaction.
    Transaction(MutexGuard<'a, Open>),
    /// A connection checked out of the pool.
    Pooled(PoolConnection<Sqlite>),
}

impl Conn<'_> {
    /// Returns the executor.
    ///
    /// # Errors
    ///
    /// Returns an error if the enclosing transaction already finished.
    pub fn get(&mut self) -> Result<&mut SqliteConnection> {
        match self {
            Self::Transaction(open) => open
                .as_mut()
                .map(|tx| &mut **tx)
                .ok_or_else(|| Error::unknown("transaction already finished")),
            Self::Pooled(conn) => Ok(&mut **conn),
        }
    }
}

/// An open transaction plus the hooks to run once it commits.
pub struct Transaction {
    open: Mutex<Open>,
    committed: AtomicBool,
    hooks: parking_lot::Mutex<Vec<Hook>>,
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("committed", &self.is_committed())
            .field("hooks", &self.hooks.lock().len())
            .finish()
    }
}

impl Transaction {
    fn new(tx: sqlx::Transaction<'static, Sqlite>) -> Self {
        Self {
            open: Mutex::new(Some(tx)),
            committed: AtomicBool::new(false),
            hooks: parking_lot::Mutex::new(Vec::new()),
        }
    }

    /// Returns true once the transaction committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.committed.load(Ordering::Acquire)
    }

    /// Registers work to run after a successful commit. Hooks are dropped
    /// without running when the transaction rolls back.
    pub fn on_commit<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.hooks.lock().push(Box::new(move || Box::pin(hook())));
    }

    async fn commit(&self) -> Result<()> {
        if let Some(tx) = self.open.lock().await.take() {
            tx.commit().await?;
        }
        self.committed.store(true, Ordering::Release);

        let hooks = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks {
            hook().await;
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.hooks.lock().clear();
        if let Some(tx) = self.open.lock().await.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}

/// Runs `f` inside a transaction.
///
/// The transaction commits when `f` succeeds and its post-commit hooks run
/// afterwards; it rolls back when `f` fails. A context that already carries a
/// transaction joins it instead of opening a nested one.
///
/// # Errors
///
/// Returns the error of `f`, or the error of begin/commit.
pub async fn with_transaction<T, F, Fut>(db: &Database, ctx: &Context, f: F) -> Result<T>
where
    F: FnOnce(Context) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if ctx.transaction().is_some() {
        return f(ctx.clone()).await;
    }

    let tx = db.pool.begin().await?;
    let handle = Arc::new(Transaction::new(tx));
    let scoped = ctx.with_transaction(Arc::clone(&handle));

    match f(scoped).await {
        Ok(value) => {
            handle.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = handle.rollback().await {
                tracing::warn!(error = %rollback, "transaction rollback failed");
            }
            Err(err)
        }
    }
}

/// Converts a database error, giving unique and foreign-key violations the
/// supplied messages. Both surface as `CONFLICT`.
pub fn conflict_error(err: sqlx::Error, unique: &str, foreign_key: &str) -> Error {
    let message = match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => Some(unique),
        sqlx::Error::Database(db) if db.is_foreign_key_violation() => Some(foreign_key),
        _ => None,
    };
    let converted = Error::from(err);
    match message {
        Some(message) => converted.with_message(message),
        None => converted,
    }
}
