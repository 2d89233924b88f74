//! Database link - the narrow interface pged needs from a pooled client
//!
//! A [`ConnectionPool`] hands out [`PooledClient`]s; a client executes one
//! parameterized statement at a time and goes back to the pool on release.
//! Sessions only ever talk to these traits, so tests can swap the
//! PostgreSQL link for a scripted one.

pub mod postgres;

use async_trait::async_trait;
use serde_json::{Map, Value};

use pged_core::Result;

pub use postgres::PgLink;

/// A row or application record: field name → JSON value.
pub type Record = Map<String, Value>;

/// Source of physical connections.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    /// Check out one physical connection.
    async fn connect(&self) -> Result<Box<dyn PooledClient>>;

    /// Close every connection; the pool is unusable afterwards.
    async fn end(&self) -> Result<()>;
}

/// One checked-out physical connection.
#[async_trait]
pub trait PooledClient: Send {
    /// Run `sql` with positional parameters (`$1` = `params[0]`).
    ///
    /// Rows come back keyed by the column names the database reports.
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Record>>;

    /// Give the connection back to its pool.
    fn release(self: Box<Self>);
}
