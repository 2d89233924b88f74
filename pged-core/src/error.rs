/// Structured error types shared by the pged crates.
///
/// Library code returns [`Error`]; the CLI wraps it in `anyhow` at the edge.
/// Errors coming from the database link are boxed so this crate stays
/// independent of any particular driver.
use thiserror::Error;

/// Boxed error raised by a database link implementation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Main error type for pged operations
#[derive(Error, Debug)]
pub enum Error {
    /// Condition input had a shape that cannot be normalized
    #[error("Invalid condition: {reason}")]
    InvalidCondition { reason: String },

    /// `$`-prefixed keyword that is neither an operator nor a comparer
    #[error("Unknown modifier {modifier}")]
    UnknownModifier { modifier: String },

    /// `null` compared with something other than `$eq` / `$ne`
    #[error("Modifier {comparer} is not usable with null values")]
    NullComparison { comparer: String },

    /// Join declaration is malformed
    #[error("Invalid join: {reason}")]
    InvalidJoin { reason: String },

    /// Insert/update/upsert key-value input is malformed
    #[error("Invalid values: {reason}")]
    InvalidValues { reason: String },

    /// Value handed to the result cache is not object shaped
    #[error("Invalid cache value: {reason}")]
    InvalidCacheValue { reason: String },

    /// A statement was issued while no connection is retained
    #[error("No connection is retained by session {session}")]
    NotConnected { session: u64 },

    /// `release` was called more times than `retain`
    #[error("Session {session} released a connection it does not hold")]
    NotRetained { session: u64 },

    /// `end_transaction` was called with no open transaction
    #[error("Session {session} has no open transaction")]
    NoTransaction { session: u64 },

    /// Every connection attempt failed
    #[error("Failed to connect after {attempts} attempt(s): {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: BoxError,
    },

    /// The database rejected or failed a statement
    #[error("Database error: {source}")]
    Link {
        #[source]
        source: BoxError,
    },

    /// A column value could not be decoded into a record field
    #[error("Cannot decode column '{column}' of type {type_name}")]
    Decode { column: String, type_name: String },

    /// Configuration error
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// The process-wide database has not been initialized
    #[error("Database pool is not initialized (call pool::init first)")]
    PoolNotInitialized,

    /// JSON serialization failed
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

/// Result type alias for pged operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create an invalid condition error
    pub fn invalid_condition(reason: impl Into<String>) -> Self {
        Self::InvalidCondition {
            reason: reason.into(),
        }
    }

    /// Create an unknown modifier error
    pub fn unknown_modifier(modifier: impl Into<String>) -> Self {
        Self::UnknownModifier {
            modifier: modifier.into(),
        }
    }

    /// Create an invalid join error
    pub fn invalid_join(reason: impl Into<String>) -> Self {
        Self::InvalidJoin {
            reason: reason.into(),
        }
    }

    /// Create an invalid values error
    pub fn invalid_values(reason: impl Into<String>) -> Self {
        Self::InvalidValues {
            reason: reason.into(),
        }
    }

    /// Create an invalid cache value error
    pub fn invalid_cache_value(reason: impl Into<String>) -> Self {
        Self::InvalidCacheValue {
            reason: reason.into(),
        }
    }

    /// Wrap a driver error raised while executing a statement
    pub fn link(source: impl Into<BoxError>) -> Self {
        Self::Link {
            source: source.into(),
        }
    }

    /// Create a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }

    /// True for caller mistakes that retrying can never fix.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidCondition { .. }
                | Self::UnknownModifier { .. }
                | Self::NullComparison { .. }
                | Self::InvalidJoin { .. }
                | Self::InvalidValues { .. }
                | Self::InvalidCacheValue { .. }
        )
    }
}
