//! Database layer.
//!
//! - `driver`: the `Driver` / `Pool` / `Connection` traits
//! - `pool`: the sqlx implementation of those traits
//! - `client`: shareable handle over one leased connection
//! - `executor`: BEGIN / COMMIT / ROLLBACK around a unit of work
//! - `database`: the handle application code holds
//! - `registry`: default and named databases

pub mod client;
pub mod database;
pub mod driver;
pub mod executor;
#[macro_use]
pub mod macros;
pub(crate) mod params;
pub mod pool;
pub mod registry;
pub mod types;

pub use client::Client;
pub use database::Database;
pub use driver::{Connection, Driver, Pool};
pub use executor::{CommitTrigger, TransactionExecutor};
pub use pool::{DbConnection, DbPool, SqlxDriver};
pub use registry::{RESERVED_NAMES, Registry};
