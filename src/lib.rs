//! db-transact
//!
//! Attaches SQL connection pools (PostgreSQL, MySQL, SQLite) to an axum
//! host, keeps them in a named registry and runs work inside transactions,
//! either explicitly through [`Database::transact`] or per request for routes
//! marked with [`RouteOptions::transact`].
//!
//! ```ignore
//! let mut host = Host::new();
//! let db = plugin::register(&mut host, DatabaseConfig::parse("sqlite:app.db")?)?;
//! host.route("/orders", post(create_order), RouteOptions::new().transact());
//! let (router, handle) = host.into_router();
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod hooks;
pub mod models;
pub mod plugin;
pub mod server;
pub mod testing;

pub use config::{Config, DatabaseConfig};
pub use db::{Client, CommitTrigger, Database, DbPool, Registry};
pub use error::{DbError, DbResult};
pub use server::{Host, HostHandle, RequestScope, RouteOptions, TransactMarker};
