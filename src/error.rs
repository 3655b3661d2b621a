//! Error types for db-transact.
//!
//! Every failure the crate can report is a variant of [`DbError`]. Variants that
//! wrap another failure (acquisition, BEGIN, COMMIT, rollback) keep the cause as
//! their `source` so callers can inspect the driver error underneath.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "42P01" for undefined table
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Timeout: {operation} exceeded {elapsed_secs}s")]
    Timeout {
        operation: String,
        elapsed_secs: u64,
    },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Failed to acquire a connection from the pool: {source}")]
    PoolAcquisition {
        #[source]
        source: Box<DbError>,
    },

    #[error("Failed to begin transaction: {source}")]
    TransactionStart {
        #[source]
        source: Box<DbError>,
    },

    /// Failure signalled by the unit of work itself. Displays the message verbatim.
    #[error("{message}")]
    Work { message: String },

    #[error("Commit trigger was dropped without being invoked")]
    CommitTriggerDropped,

    #[error("Failed to commit transaction: {source}")]
    Commit {
        #[source]
        source: Box<DbError>,
    },

    #[error("Failed to roll back transaction: {source}")]
    Rollback {
        #[source]
        source: Box<DbError>,
    },

    #[error("Connection has already been released")]
    ConnectionReleased,

    #[error("A default database has already been registered")]
    DuplicateDefault,

    #[error("'{name}' instance name has already been registered")]
    DuplicateName { name: String },

    #[error("'{name}' is a reserved keyword")]
    ReservedName { name: String },

    #[error("{}", not_found_message(.name))]
    NotFound { name: Option<String> },

    #[error("{}", duplicate_client_message(.name))]
    DuplicateRequestClient { name: Option<String> },

    #[error("{}", unknown_client_message(.name))]
    UnknownNamedClient { name: Option<String> },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, elapsed_secs: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed_secs,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create a unit-of-work failure. `to_string()` returns `message` unchanged.
    pub fn work(message: impl Into<String>) -> Self {
        Self::Work {
            message: message.into(),
        }
    }

    pub fn pool_acquisition(source: DbError) -> Self {
        Self::PoolAcquisition {
            source: Box::new(source),
        }
    }

    pub fn transaction_start(source: DbError) -> Self {
        Self::TransactionStart {
            source: Box::new(source),
        }
    }

    pub fn commit(source: DbError) -> Self {
        Self::Commit {
            source: Box::new(source),
        }
    }

    pub fn rollback(source: DbError) -> Self {
        Self::Rollback {
            source: Box::new(source),
        }
    }

    pub fn duplicate_name(name: impl Into<String>) -> Self {
        Self::DuplicateName { name: name.into() }
    }

    pub fn reserved_name(name: impl Into<String>) -> Self {
        Self::ReservedName { name: name.into() }
    }

    pub fn not_found(name: Option<&str>) -> Self {
        Self::NotFound {
            name: name.map(String::from),
        }
    }

    pub fn duplicate_request_client(name: Option<&str>) -> Self {
        Self::DuplicateRequestClient {
            name: name.map(String::from),
        }
    }

    pub fn unknown_named_client(name: Option<&str>) -> Self {
        Self::UnknownNamedClient {
            name: name.map(String::from),
        }
    }

    /// Get the suggestion for this error, if available.
    ///
    /// Wrapping variants report the suggestion of the error they wrap.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            Self::Timeout { .. } => {
                Some("Consider raising acquire_timeout or max_connections for this pool")
            }
            Self::PoolAcquisition { source }
            | Self::TransactionStart { source }
            | Self::Commit { source }
            | Self::Rollback { source } => source.suggestion(),
            Self::CommitTriggerDropped => {
                Some("Invoke the commit trigger exactly once before dropping it")
            }
            Self::ReservedName { .. } => {
                Some("Choose a name other than connect, pool, Client, query or transact")
            }
            _ => None,
        }
    }

    /// Check if this error is retryable.
    ///
    /// Nothing in this crate retries; the flag is for callers.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::Timeout { .. } => true,
            Self::PoolAcquisition { source } => source.is_retryable(),
            _ => false,
        }
    }

    /// HTTP status used when this error becomes a response.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput { .. } | Self::Database { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::PoolAcquisition { .. } | Self::Timeout { .. } | Self::Connection { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            // Pool acquisition maps this with the pool's own timeout; 30s is sqlx's default.
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire", 30),
            sqlx::Error::PoolClosed => DbError::connection(
                "Connection pool is closed",
                "The host has shut down; no new connections are handed out",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::invalid_input(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

fn not_found_message(name: &Option<String>) -> String {
    match name {
        Some(name) => format!("Database '{name}' is not registered"),
        None => "No default database is registered".to_string(),
    }
}

fn duplicate_client_message(name: &Option<String>) -> String {
    match name {
        Some(name) => format!("Request client '{name}' has already been registered"),
        None => "Request client has already been registered".to_string(),
    }
}

fn unknown_client_message(name: &Option<String>) -> String {
    match name {
        Some(name) => format!("Request client '{name}' does not exist"),
        None => "Default request client does not exist".to_string(),
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

/// Render the error as a JSON body: `{ "error": ..., "suggestion": ... }`.
impl IntoResponse for DbError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut body = serde_json::json!({ "error": self.to_string() });
        if let Some(suggestion) = self.suggestion() {
            body["suggestion"] = serde_json::Value::String(suggestion.to_string());
        }
        if let Self::Database {
            sql_state: Some(code),
            ..
        } = &self
        {
            body["sql_state"] = serde_json::Value::String(code.clone());
        }
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_work_error_displays_message_verbatim() {
        assert_eq!(DbError::work("boom").to_string(), "boom");
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database(
            "Syntax error",
            Some("42601".to_string()),
            "Check SQL syntax",
        );
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
    }

    #[test]
    fn test_wrapped_error_keeps_source_suggestion() {
        let err = DbError::commit(DbError::database("deadlock", None, "Retry later"));
        assert_eq!(err.suggestion(), Some("Retry later"));
        assert!(err.to_string().starts_with("Failed to commit transaction"));

        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Database error: deadlock"));
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::timeout("acquire", 30).is_retryable());
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(DbError::pool_acquisition(DbError::timeout("acquire", 1)).is_retryable());
        assert!(!DbError::work("boom").is_retryable());
        assert!(!DbError::commit(DbError::timeout("acquire", 1)).is_retryable());
    }

    #[test]
    fn test_registration_messages() {
        assert_eq!(
            DbError::duplicate_name("users").to_string(),
            "'users' instance name has already been registered"
        );
        assert_eq!(
            DbError::reserved_name("Client").to_string(),
            "'Client' is a reserved keyword"
        );
        assert_eq!(
            DbError::DuplicateDefault.to_string(),
            "A default database has already been registered"
        );
    }

    #[test]
    fn test_request_client_messages() {
        assert_eq!(
            DbError::duplicate_request_client(None).to_string(),
            "Request client has already been registered"
        );
        assert_eq!(
            DbError::unknown_named_client(Some("users")).to_string(),
            "Request client 'users' does not exist"
        );
        assert_eq!(
            DbError::not_found(Some("audit")).to_string(),
            "Database 'audit' is not registered"
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            DbError::invalid_input("bad").status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            DbError::pool_acquisition(DbError::timeout("acquire", 1)).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            DbError::work("boom").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            DbError::not_found(None).status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_into_response_body() {
        let response =
            DbError::database("syntax error", Some("42601".to_string()), "check syntax")
                .into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Database error: syntax error");
        assert_eq!(body["suggestion"], "check syntax");
        assert_eq!(body["sql_state"], "42601");
    }
}
