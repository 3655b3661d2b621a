//! Data models shared across the crate.

pub mod connection;
pub mod query;

pub use connection::{
    DatabaseType, TransactionInfo, TransactionState, generate_transaction_id,
    masked_connection_string,
};
pub use query::{ColumnMetadata, QueryParam, QueryResult, returns_rows};
