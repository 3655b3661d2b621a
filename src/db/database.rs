//! The database handle exposed to application code.

use crate::db::client::Client;
use crate::db::driver::{Connection, Pool};
use crate::db::executor::{CommitTrigger, TransactionExecutor};
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryResult};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// A registered database: its pool plus connect, query and transaction helpers.
///
/// Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct Database<P> {
    name: Option<Arc<str>>,
    executor: TransactionExecutor<P>,
}

impl<P: Pool> Database<P> {
    /// `name` of `None` or `""` denotes the default database.
    pub fn new(name: Option<&str>, pool: P) -> Self {
        let name = name.filter(|n| !n.is_empty());
        Self {
            name: name.map(Arc::from),
            executor: TransactionExecutor::new(pool, name),
        }
    }

    /// Registry name, `None` for the default database.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn display_name(&self) -> &str {
        self.name().unwrap_or("default")
    }

    pub fn pool(&self) -> &P {
        self.executor.pool()
    }

    pub fn executor(&self) -> &TransactionExecutor<P> {
        &self.executor
    }

    /// Lease a connection. The caller should [`Client::release`] it; dropping
    /// every handle instead returns it too.
    pub async fn connect(&self) -> DbResult<Client<P::Connection>> {
        self.pool()
            .connect()
            .await
            .map(Client::new)
            .map_err(DbError::pool_acquisition)
    }

    /// Run one statement on a connection leased for just this call.
    pub async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        let mut connection = self
            .pool()
            .connect()
            .await
            .map_err(DbError::pool_acquisition)?;
        let result = connection.query(sql, params).await;
        connection.release();
        result
    }

    /// Callback form of [`query`](Self::query); `on_done` runs exactly once on a spawned task.
    pub fn query_callback<D>(
        &self,
        sql: impl Into<String>,
        params: Vec<QueryParam>,
        on_done: D,
    ) -> JoinHandle<()>
    where
        D: FnOnce(DbResult<QueryResult>) + Send + 'static,
    {
        let database = self.clone();
        let sql = sql.into();
        tokio::spawn(async move { on_done(database.query(&sql, &params).await) })
    }

    /// See [`TransactionExecutor::transact`].
    pub async fn transact<T, F, Fut>(&self, work: F) -> DbResult<T>
    where
        F: FnOnce(Client<P::Connection>) -> Fut + Send,
        Fut: Future<Output = DbResult<T>> + Send,
        T: Send,
    {
        self.executor.transact(work).await
    }

    /// See [`TransactionExecutor::transact_with_commit`].
    pub async fn transact_with_commit<T, F, Fut>(&self, work: F) -> DbResult<T>
    where
        F: FnOnce(Client<P::Connection>, CommitTrigger<T>) -> Fut + Send,
        Fut: Future<Output = DbResult<()>> + Send,
        T: Send,
    {
        self.executor.transact_with_commit(work).await
    }

    /// See [`TransactionExecutor::transact_callback`].
    pub fn transact_callback<T, F, Fut, D>(&self, work: F, on_done: D) -> JoinHandle<()>
    where
        F: FnOnce(Client<P::Connection>) -> Fut + Send + 'static,
        Fut: Future<Output = DbResult<T>> + Send + 'static,
        T: Send + 'static,
        D: FnOnce(DbResult<T>) + Send + 'static,
    {
        self.executor.transact_callback(work, on_done)
    }

    /// See [`TransactionExecutor::transact_with_commit_callback`].
    pub fn transact_with_commit_callback<T, F, Fut, D>(
        &self,
        work: F,
        on_done: D,
    ) -> JoinHandle<()>
    where
        F: FnOnce(Client<P::Connection>, CommitTrigger<T>) -> Fut + Send + 'static,
        Fut: Future<Output = DbResult<()>> + Send + 'static,
        T: Send + 'static,
        D: FnOnce(DbResult<T>) + Send + 'static,
    {
        self.executor.transact_with_commit_callback(work, on_done)
    }

    /// Close the pool. Leased connections finish normally; no new ones are handed out.
    pub async fn close(&self) {
        self.pool().close().await;
        info!(database = %self.display_name(), "Database pool closed");
    }
}
