//! Driver abstraction.
//!
//! A [`Driver`] builds a [`Pool`] from registration options; a pool leases
//! [`Connection`]s. Transaction control is plain SQL (`BEGIN`, `COMMIT`,
//! `ROLLBACK`) issued through [`Connection::query`], so any driver that can run
//! statements can back the transaction executor.

use crate::config::DatabaseConfig;
use crate::error::DbResult;
use crate::models::{QueryParam, QueryResult};
use std::future::Future;

/// An exclusively leased database connection.
pub trait Connection: Send + 'static {
    /// Run one statement.
    fn query(
        &mut self,
        sql: &str,
        params: &[QueryParam],
    ) -> impl Future<Output = DbResult<QueryResult>> + Send;

    /// Hand the connection back to its pool.
    fn release(self);

    /// Give up the lease without letting the pool reuse the connection.
    /// Used when its session state is unknown, such as a transaction that
    /// could not be finished.
    fn discard(self);
}

/// A long-lived pool handing out connections. Clones share the same pool.
pub trait Pool: Clone + Send + Sync + 'static {
    type Connection: Connection;

    /// Lease a connection.
    fn connect(&self) -> impl Future<Output = DbResult<Self::Connection>> + Send;

    /// Stop handing out connections and close idle ones.
    fn close(&self) -> impl Future<Output = ()> + Send;

    fn is_closed(&self) -> bool;
}

/// Factory for pools.
pub trait Driver: Send + Sync + 'static {
    type Pool: Pool;

    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// The driver's native variant, if it has one.
    fn native(&self) -> Option<Self>
    where
        Self: Sized;

    /// Build a pool. Connections are opened lazily, so connectivity errors
    /// surface on first use rather than here.
    fn create_pool(&self, config: &DatabaseConfig) -> DbResult<Self::Pool>;
}
