//! Connection and transaction data models.

use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Mask the password of a connection URL so it can be logged.
pub fn masked_connection_string(connection_string: &str) -> String {
    if let Some(at_pos) = connection_string.find('@') {
        if let Some(colon_pos) = connection_string[..at_pos].rfind(':') {
            // A colon right after the scheme means there is no password.
            if !connection_string[colon_pos..].starts_with("://") {
                let prefix = &connection_string[..colon_pos + 1];
                let suffix = &connection_string[at_pos..];
                return format!("{}****{}", prefix, suffix);
            }
        }
    }
    connection_string.to_string()
}

/// Lifecycle of one transaction invocation.
///
/// `Idle -> Acquiring -> Began -> Running -> Committing | RollingBack -> Released`.
/// Acquisition and BEGIN failures jump straight to `Released`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Idle,
    Acquiring,
    Began,
    Running,
    Committing,
    RollingBack,
    Released,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Acquiring => "acquiring",
            Self::Began => "began",
            Self::Running => "running",
            Self::Committing => "committing",
            Self::RollingBack => "rolling_back",
            Self::Released => "released",
        }
    }

    /// True while the transaction still holds a connection.
    pub fn holds_connection(&self) -> bool {
        matches!(
            self,
            Self::Began | Self::Running | Self::Committing | Self::RollingBack
        )
    }

    /// Whether moving from `self` to `next` follows the lifecycle.
    pub fn can_transition_to(&self, next: TransactionState) -> bool {
        use TransactionState::*;
        matches!(
            (self, next),
            (Idle, Acquiring)
                | (Acquiring, Began)
                | (Acquiring, Released)
                | (Began, Running)
                | (Began, Released)
                | (Running, Committing)
                | (Running, RollingBack)
                | (Committing, Released)
                | (RollingBack, Released)
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-invocation transaction context used for logging.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionInfo {
    pub id: String,
    /// Registry name, `None` for the default database.
    pub database: Option<String>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub state: TransactionState,
}

impl TransactionInfo {
    pub fn new(database: Option<&str>) -> Self {
        Self {
            id: generate_transaction_id(),
            database: database.map(String::from),
            started_at: chrono::Utc::now(),
            state: TransactionState::Idle,
        }
    }

    pub fn database_name(&self) -> &str {
        self.database.as_deref().unwrap_or("default")
    }

    pub fn elapsed_ms(&self) -> i64 {
        chrono::Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }
}

/// Generate a unique transaction ID.
pub fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}
