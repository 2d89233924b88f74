use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::casing::Casing;
use crate::error::{Error, Result};

/// Configuration for a pged session and the process-wide pool.
///
/// Every section has defaults, so an empty TOML document is valid. Keys are
/// snake_case; the camelCase spellings used by older configs are accepted as
/// aliases.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PgedConfig {
    pub casing: CasingConfig,
    #[serde(alias = "defaultPrimaryKey")]
    pub default_primary_key: String,
    pub transactions: TransactionConfig,
    /// When false every transaction ends in ROLLBACK (dry runs, tests)
    pub commit: bool,
    /// Drop null-valued fields from returned records
    #[serde(alias = "nullIsUndefined")]
    pub null_is_undefined: bool,
    pub connection: ConnectionConfig,
    pub schema: SchemaConfig,
    pub pool: PoolConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CasingConfig {
    /// Storage convention (table and column names)
    pub db: Casing,
    /// Application convention (record keys)
    #[serde(alias = "js")]
    pub app: Casing,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    pub mode: IsolationLevel,
    /// Run every statement inside a transaction
    pub always: bool,
}

/// Transaction isolation level
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    #[default]
    #[serde(alias = "readCommitted")]
    ReadCommitted,
    #[serde(alias = "repeatableRead")]
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// Statement issued right after BEGIN, if the level is not the default.
    pub fn statement(self) -> Option<&'static str> {
        match self {
            IsolationLevel::ReadCommitted => None,
            IsolationLevel::RepeatableRead => {
                Some("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ")
            }
            IsolationLevel::Serializable => Some("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub retry: RetryConfig,
}

/// Bounded retry for the initial connect of a session
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, including the first one
    pub count: u32,
    /// Fixed pause between attempts ("250ms", "2s", or milliseconds)
    #[serde(with = "delay_format")]
    pub delay: Duration,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Introspect column types to coerce JSON and typed-text values
    pub introspect: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub database_url: Option<String>,
    pub max_connections: u32,
}

impl Default for PgedConfig {
    fn default() -> Self {
        Self {
            casing: CasingConfig::default(),
            default_primary_key: "id".to_string(),
            transactions: TransactionConfig::default(),
            commit: true,
            null_is_undefined: true,
            connection: ConnectionConfig::default(),
            schema: SchemaConfig::default(),
            pool: PoolConfig::default(),
        }
    }
}

impl Default for CasingConfig {
    fn default() -> Self {
        Self {
            db: Casing::Snake,
            app: Casing::Camel,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            count: 1,
            delay: Duration::ZERO,
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self { introspect: true }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            max_connections: 5,
        }
    }
}

impl CasingConfig {
    /// Application name → storage name
    pub fn to_db(&self, name: &str) -> String {
        self.db.convert(name)
    }

    /// Storage name → application name
    pub fn to_app(&self, name: &str) -> String {
        self.app.convert(name)
    }
}

impl RetryConfig {
    /// Attempts to make; a zero count still tries once.
    pub fn attempts(&self) -> u32 {
        self.count.max(1)
    }
}

impl PgedConfig {
    /// Parse a TOML document, expanding `${VAR}` references in the database URL.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)
            .map_err(|e| Error::config(format!("invalid TOML: {}", e)))?;

        if let Some(url) = config.pool.database_url.take() {
            config.pool.database_url = Some(expand_env(&url));
        }

        Ok(config)
    }

    /// Load config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {:?}: {}", path, e)))?;
        Self::from_toml_str(&content)
    }

    /// Database URL from config, falling back to `DATABASE_URL`.
    pub fn database_url(&self) -> Result<String> {
        self.pool
            .database_url
            .clone()
            .filter(|url| !url.is_empty())
            .or_else(|| env::var("DATABASE_URL").ok())
            .ok_or_else(|| Error::config("no pool.database_url and DATABASE_URL is not set"))
    }
}

/// Replace `${VAR}` with the environment value (empty when unset).
fn expand_env(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                result.push_str(&env::var(&after[..end]).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }

    result.push_str(rest);
    result
}

mod delay_format {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(delay: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*delay).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(ms) => Ok(Duration::from_millis(ms)),
            Raw::Text(text) => {
                humantime::parse_duration(text.trim()).map_err(serde::de::Error::custom)
            }
        }
    }
}
