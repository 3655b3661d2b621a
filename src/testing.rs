//! Test support: an in-memory driver that records what the crate asks of it.
//!
//! [`RecordingDriver`] can be passed to [`crate::plugin::register_with`] in
//! place of the sqlx driver. Every statement is logged, every lease and
//! release is counted, and connect or statement failures can be scripted.
//!
//! ```ignore
//! let driver = RecordingDriver::new();
//! driver.fail_statement("COMMIT");
//! let db = register_with(&mut host, &driver, DatabaseConfig::new("recording://app"))?;
//! assert!(db.transact(|_| async { Ok(()) }).await.is_err());
//! assert_eq!(driver.outstanding(), 0);
//! ```

use crate::config::DatabaseConfig;
use crate::db::driver::{Connection, Driver, Pool};
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryResult};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

#[derive(Debug, Default)]
struct RecordingState {
    statements: Mutex<Vec<String>>,
    failing: Mutex<Vec<String>>,
    fail_connect: AtomicBool,
    acquired: AtomicUsize,
    released: AtomicUsize,
    discarded: AtomicUsize,
    closed: AtomicBool,
    pools_created: AtomicUsize,
    native_pools: AtomicUsize,
}

impl RecordingState {
    fn should_fail(&self, sql: &str) -> bool {
        let upper = sql.trim_start().to_ascii_uppercase();
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|prefix| upper.starts_with(prefix.as_str()))
    }
}

/// Driver double. Clones share their recorded state.
#[derive(Debug, Clone, Default)]
pub struct RecordingDriver {
    state: Arc<RecordingState>,
    native: bool,
    native_available: bool,
}

impl RecordingDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make [`Driver::native`] return a variant instead of `None`.
    pub fn with_native_variant(mut self) -> Self {
        self.native_available = true;
        self
    }

    /// Make every subsequent `connect` fail (or succeed again).
    pub fn fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make statements starting with `prefix` (case-insensitive) fail.
    pub fn fail_statement(&self, prefix: &str) {
        self.state
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prefix.trim().to_ascii_uppercase());
    }

    /// Every statement issued so far, in order, across all connections.
    pub fn statements(&self) -> Vec<String> {
        self.state
            .statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear_statements(&self) {
        self.state
            .statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn acquired(&self) -> usize {
        self.state.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.state.released.load(Ordering::SeqCst)
    }

    /// Releases that closed the connection instead of pooling it.
    pub fn discarded(&self) -> usize {
        self.state.discarded.load(Ordering::SeqCst)
    }

    /// Connections leased but not yet released.
    pub fn outstanding(&self) -> usize {
        self.acquired() - self.released()
    }

    /// Wait for background rollbacks of dropped clients to hand their
    /// connections back. Gives up after one second.
    pub async fn wait_until_idle(&self) {
        for _ in 0..100 {
            if self.outstanding() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }

    pub fn pools_created(&self) -> usize {
        self.state.pools_created.load(Ordering::SeqCst)
    }

    /// Pools built by the native variant.
    pub fn native_pools(&self) -> usize {
        self.state.native_pools.load(Ordering::SeqCst)
    }
}

impl Driver for RecordingDriver {
    type Pool = RecordingPool;

    fn name(&self) -> &'static str {
        if self.native { "recording-native" } else { "recording" }
    }

    fn native(&self) -> Option<Self> {
        self.native_available.then(|| Self {
            state: Arc::clone(&self.state),
            native: true,
            native_available: true,
        })
    }

    fn create_pool(&self, config: &DatabaseConfig) -> DbResult<RecordingPool> {
        if config.connection_string.is_empty() {
            return Err(DbError::invalid_input("Connection string cannot be empty"));
        }
        self.state.pools_created.fetch_add(1, Ordering::SeqCst);
        if self.native {
            self.state.native_pools.fetch_add(1, Ordering::SeqCst);
        }
        Ok(RecordingPool {
            state: Arc::clone(&self.state),
            native: self.native,
        })
    }
}

#[derive(Debug, Clone)]
pub struct RecordingPool {
    state: Arc<RecordingState>,
    native: bool,
}

impl RecordingPool {
    pub fn is_native(&self) -> bool {
        self.native
    }
}

impl Pool for RecordingPool {
    type Connection = RecordingConnection;

    async fn connect(&self) -> DbResult<RecordingConnection> {
        if self.is_closed() {
            return Err(DbError::connection(
                "Connection pool is closed",
                "The host has shut down; no new connections are handed out",
            ));
        }
        if self.state.fail_connect.load(Ordering::SeqCst) {
            return Err(DbError::connection(
                "connection refused",
                "Check that the database server is running and accessible",
            ));
        }
        self.state.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(RecordingConnection {
            state: Arc::clone(&self.state),
        })
    }

    async fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct RecordingConnection {
    state: Arc<RecordingState>,
}

impl Connection for RecordingConnection {
    async fn query(&mut self, sql: &str, _params: &[QueryParam]) -> DbResult<QueryResult> {
        self.state
            .statements
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sql.to_string());
        if self.state.should_fail(sql) {
            return Err(DbError::database(
                format!("{} failed", sql),
                None,
                "Injected failure",
            ));
        }
        Ok(QueryResult::write_result(0, 0))
    }

    fn release(self) {
        self.state.released.fetch_add(1, Ordering::SeqCst);
    }

    fn discard(self) {
        self.state.discarded.fetch_add(1, Ordering::SeqCst);
        self.state.released.fetch_add(1, Ordering::SeqCst);
    }
}
