//! Shareable handle over one leased connection.

use crate::db::driver::Connection;
use crate::error::{DbError, DbResult};
use crate::models::{QueryParam, QueryResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::warn;

pub(crate) const BEGIN: &str = "BEGIN";
pub(crate) const COMMIT: &str = "COMMIT";
pub(crate) const ROLLBACK: &str = "ROLLBACK";

/// The connection shared by every clone of a [`Client`].
struct Lease<C> {
    conn: Mutex<Option<C>>,
    in_transaction: AtomicBool,
    abandon: fn(C, bool),
}

impl<C> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            (self.abandon)(conn, *self.in_transaction.get_mut());
        }
    }
}

/// Give back a connection whose last handle was dropped without a release.
///
/// An open transaction is rolled back on the runtime before the connection
/// returns to its pool. If that is not possible the connection is discarded.
fn abandon<C: Connection>(mut conn: C, in_transaction: bool) {
    if !in_transaction {
        warn!("Client dropped without release; returning connection to pool");
        conn.release();
        return;
    }
    match Handle::try_current() {
        Ok(handle) => {
            warn!("Client dropped inside an open transaction; rolling back");
            handle.spawn(async move {
                let rolled_back = conn.query(ROLLBACK, &[]).await;
                match rolled_back {
                    Ok(_) => conn.release(),
                    Err(error) => {
                        warn!(error = %error, "Rollback of abandoned transaction failed; closing connection");
                        conn.discard();
                    }
                }
            });
        }
        Err(_) => {
            warn!("Client dropped inside an open transaction with no runtime; closing connection");
            conn.discard();
        }
    }
}

/// A leased connection that can be cloned into handlers and hooks.
///
/// All clones share the same connection. [`Client::release`] hands the
/// connection back to its pool exactly once; later releases are no-ops and
/// later queries fail with [`DbError::ConnectionReleased`].
///
/// Dropping the last clone without releasing also gives the connection back.
/// A transaction opened with [`Client::begin`] and never finished is rolled
/// back first, so an abandoned request or cancelled unit of work never leaks
/// its writes into the next lease.
pub struct Client<C> {
    lease: Arc<Lease<C>>,
}

impl<C> Clone for Client<C> {
    fn clone(&self) -> Self {
        Self {
            lease: Arc::clone(&self.lease),
        }
    }
}

impl<C> std::fmt::Debug for Client<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("handles", &Arc::strong_count(&self.lease))
            .field("in_transaction", &self.in_transaction())
            .finish()
    }
}

impl<C> Client<C> {
    /// Whether a transaction started with [`begin`](Self::begin) is still open.
    pub fn in_transaction(&self) -> bool {
        self.lease.in_transaction.load(Ordering::SeqCst)
    }
}

impl<C: Connection> Client<C> {
    pub fn new(connection: C) -> Self {
        Self {
            lease: Arc::new(Lease {
                conn: Mutex::new(Some(connection)),
                in_transaction: AtomicBool::new(false),
                abandon: abandon::<C>,
            }),
        }
    }

    /// Run a statement on the leased connection.
    pub async fn query(&self, sql: &str, params: &[QueryParam]) -> DbResult<QueryResult> {
        let mut guard = self.lease.conn.lock().await;
        match guard.as_mut() {
            Some(conn) => conn.query(sql, params).await,
            None => Err(DbError::ConnectionReleased),
        }
    }

    /// Run a statement without parameters.
    pub async fn execute(&self, sql: &str) -> DbResult<QueryResult> {
        self.query(sql, &[]).await
    }

    /// Issue `BEGIN`.
    ///
    /// The transaction counts as open from the moment the statement is sent,
    /// so a handle dropped while `BEGIN` is in flight still rolls back.
    pub async fn begin(&self) -> DbResult<()> {
        self.lease.in_transaction.store(true, Ordering::SeqCst);
        if let Err(error) = self.execute(BEGIN).await {
            self.lease.in_transaction.store(false, Ordering::SeqCst);
            return Err(error);
        }
        Ok(())
    }

    /// Issue `COMMIT`. A failed commit leaves the transaction marked open.
    pub async fn commit(&self) -> DbResult<()> {
        self.execute(COMMIT).await?;
        self.lease.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Issue `ROLLBACK`. A failed rollback leaves the transaction marked open.
    pub async fn rollback(&self) -> DbResult<()> {
        self.execute(ROLLBACK).await?;
        self.lease.in_transaction.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Return the connection to its pool.
    ///
    /// A connection whose transaction never finished cleanly is discarded
    /// instead, so its state cannot reach the next lease.
    ///
    /// Returns `true` if this call released it, `false` if it was already released.
    pub async fn release(&self) -> bool {
        let taken = self.lease.conn.lock().await.take();
        match taken {
            Some(conn) => {
                if self.lease.in_transaction.swap(false, Ordering::SeqCst) {
                    warn!("Releasing a connection with an unfinished transaction; closing it");
                    conn.discard();
                } else {
                    conn.release();
                }
                true
            }
            None => {
                warn!("Connection release requested twice; ignoring");
                false
            }
        }
    }

    pub async fn is_released(&self) -> bool {
        self.lease.conn.lock().await.is_none()
    }

    /// Whether two handles share the same connection.
    pub fn same_connection(&self, other: &Client<C>) -> bool {
        Arc::ptr_eq(&self.lease, &other.lease)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::driver::{Driver, Pool};
    use crate::testing::RecordingDriver;
    use crate::config::DatabaseConfig;

    async fn client(driver: &RecordingDriver) -> Client<crate::testing::RecordingConnection> {
        let pool = driver
            .create_pool(&DatabaseConfig::new("recording://test"))
            .unwrap();
        Client::new(pool.connect().await.unwrap())
    }

    #[tokio::test]
    async fn test_release_is_exactly_once() {
        let driver = RecordingDriver::new();
        let client = client(&driver).await;
        let other = client.clone();

        assert!(client.release().await);
        assert!(!other.release().await);
        assert!(!client.release().await);
        assert_eq!(driver.released(), 1);
        assert!(other.is_released().await);
    }

    #[tokio::test]
    async fn test_query_after_release_fails() {
        let driver = RecordingDriver::new();
        let client = client(&driver).await;
        client.execute("SELECT 1").await.unwrap();
        client.release().await;

        let err = client.execute("SELECT 1").await.unwrap_err();
        assert!(matches!(err, DbError::ConnectionReleased));
        assert_eq!(driver.statements(), vec!["SELECT 1"]);
    }

    #[tokio::test]
    async fn test_clones_share_connection() {
        let driver = RecordingDriver::new();
        let a = client(&driver).await;
        let b = client(&driver).await;
        assert!(a.same_connection(&a.clone()));
        assert!(!a.same_connection(&b));
        a.release().await;
        b.release().await;
        assert_eq!(driver.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_transaction_flag_follows_statements() {
        let driver = RecordingDriver::new();
        let client = client(&driver).await;
        assert!(!client.in_transaction());

        client.begin().await.unwrap();
        assert!(client.in_transaction());
        client.commit().await.unwrap();
        assert!(!client.in_transaction());

        driver.fail_statement("BEGIN");
        assert!(client.begin().await.is_err());
        assert!(!client.in_transaction());
        client.release().await;
        assert_eq!(driver.discarded(), 0);
    }

    #[tokio::test]
    async fn test_release_after_failed_commit_discards() {
        let driver = RecordingDriver::new();
        driver.fail_statement("COMMIT");
        let client = client(&driver).await;
        client.begin().await.unwrap();
        assert!(client.commit().await.is_err());
        assert!(client.in_transaction());

        assert!(client.release().await);
        assert_eq!(driver.discarded(), 1);
        assert_eq!(driver.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_dropped_client_returns_connection() {
        let driver = RecordingDriver::new();
        let client = client(&driver).await;
        let other = client.clone();
        drop(client);
        assert_eq!(driver.outstanding(), 1);
        drop(other);

        assert_eq!(driver.outstanding(), 0);
        assert!(driver.statements().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_client_rolls_back_open_transaction() {
        let driver = RecordingDriver::new();
        let client = client(&driver).await;
        client.begin().await.unwrap();
        client.execute("INSERT INTO t VALUES (1)").await.unwrap();
        drop(client);

        driver.wait_until_idle().await;
        assert_eq!(
            driver.statements(),
            vec!["BEGIN", "INSERT INTO t VALUES (1)", "ROLLBACK"]
        );
        assert_eq!(driver.released(), 1);
        assert_eq!(driver.discarded(), 0);
    }

    #[tokio::test]
    async fn test_dropped_client_discards_when_rollback_fails() {
        let driver = RecordingDriver::new();
        driver.fail_statement("ROLLBACK");
        let client = client(&driver).await;
        client.begin().await.unwrap();
        drop(client);

        driver.wait_until_idle().await;
        assert_eq!(driver.discarded(), 1);
    }

    #[test]
    fn test_dropped_client_without_runtime_discards() {
        let driver = RecordingDriver::new();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let client = runtime.block_on(async {
            let client = client(&driver).await;
            client.begin().await.unwrap();
            client
        });
        drop(runtime);
        drop(client);

        assert_eq!(driver.discarded(), 1);
        assert_eq!(driver.outstanding(), 0);
    }
}
