//! Error types for the bartender database layer.
//!
//! Every fallible operation in the crate returns [`DbResult`]. Driver errors are
//! folded into a handful of variants; those that an operator can act on carry a
//! suggestion, which the HTTP layer logs next to the trace id.

use thiserror::Error;

/// SQLSTATE codes after which running the same transaction again can succeed.
const RETRYABLE_SQL_STATES: &[&str] = &[
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
    "57P01", // admin_shutdown
];

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Cannot reach PostgreSQL: {message}")]
    Connection { message: String, suggestion: String },

    #[error("No free connection in pool: {message}")]
    PoolExhausted { message: String },

    #[error("Query failed: {message}")]
    Database {
        message: String,
        /// Five-character SQLSTATE reported by the server
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Schema mismatch on {object}: {message}")]
    Schema { message: String, object: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::PoolExhausted {
            message: message.into(),
        }
    }

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

    pub fn schema(message: impl Into<String>, object: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
            object: object.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// What an operator should check, when there is something to say.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } | Self::Database { suggestion, .. } => {
                Some(suggestion)
            }
            Self::PoolExhausted { .. } => {
                Some("Raise max_connections or shorten transactions holding connections")
            }
            _ => None,
        }
    }

    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Whether repeating the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection { .. } | Self::PoolExhausted { .. } => true,
            Self::Database { sql_state, .. } => sql_state
                .as_deref()
                .is_some_and(|state| RETRYABLE_SQL_STATES.contains(&state)),
            _ => false,
        }
    }

    /// Stable machine-readable code, used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::Connection { .. } => "database_unavailable",
            Self::PoolExhausted { .. } => "database_busy",
            Self::Database { .. } => "database_error",
            Self::Schema { .. } => "schema_error",
            Self::Internal { .. } => "internal_error",
        }
    }
}

/// Suggestion for a server-reported SQLSTATE, keyed on its class.
fn suggestion_for_sql_state(state: Option<&str>) -> &'static str {
    let Some(state) = state else {
        return "Inspect the server log for details";
    };
    match state {
        "42P01" => "Run the migrations that create the referenced table",
        "23505" => "A row with the same key already exists",
        _ if RETRYABLE_SQL_STATES.contains(&state) => "Retry the transaction",
        _ => match &state[..state.len().min(2)] {
            "08" => "Check that PostgreSQL is running and reachable",
            "23" => "The row violates a table constraint",
            "28" => "Check the user and password in PG_CONNECTION_STRING",
            "42" => "Check the SQL text and the objects it references",
            "53" => "The server is out of resources; lower max_connections",
            _ => "Inspect the server log for details",
        },
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        use sqlx::Error as E;

        match err {
            E::Configuration(e) => DbError::configuration(e.to_string()),
            E::Database(db_err) => {
                let state = db_err.code().map(|c| c.into_owned());
                let suggestion = suggestion_for_sql_state(state.as_deref());
                DbError::database(db_err.message(), state, suggestion)
            }
            E::PoolTimedOut => DbError::pool_exhausted("timed out waiting for a free connection"),
            E::PoolClosed => {
                DbError::connection("the pool has been closed", "Reset the pool provider")
            }
            E::Io(e) => DbError::connection(
                e.to_string(),
                "Check that PostgreSQL is running and reachable",
            ),
            E::Tls(e) => DbError::connection(
                format!("TLS handshake failed: {e}"),
                "Verify PG_SSL_MODE and the server certificate",
            ),
            E::Protocol(msg) => DbError::connection(
                format!("unexpected message from server: {msg}"),
                "Check that the server really is PostgreSQL",
            ),
            E::ColumnNotFound(column) => {
                DbError::schema("column missing from result set", column)
            }
            E::TypeNotFound { type_name } => {
                DbError::schema("type unknown to the server", type_name)
            }
            E::RowNotFound => DbError::internal("query returned no rows"),
            other @ (E::ColumnIndexOutOfBounds { .. }
            | E::ColumnDecode { .. }
            | E::Decode(_)) => DbError::internal(format!("failed to decode row: {other}")),
            other => DbError::internal(other.to_string()),
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;
