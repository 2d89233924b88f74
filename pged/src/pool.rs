//! Process-wide database handle
//!
//! One [`Database`] (link + schema cache) is shared by every session created
//! with [`Session::new`](crate::Session::new). Tests build their own and
//! pass it to [`Session::with_database`](crate::Session::with_database)
//! instead of touching the global slot.

use std::sync::{Arc, PoisonError, RwLock};

use pged_core::{Error, PgedConfig, Result};

use crate::link::{ConnectionPool, PgLink};
use crate::schema::SchemaCache;

static DATABASE: RwLock<Option<Database>> = RwLock::new(None);

/// Connection source plus the column metadata cached for it
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

struct DatabaseInner {
    link: Arc<dyn ConnectionPool>,
    schema: SchemaCache,
}

impl Database {
    pub fn new(link: impl ConnectionPool + 'static) -> Self {
        Self::from_link(Arc::new(link))
    }

    pub fn from_link(link: Arc<dyn ConnectionPool>) -> Self {
        Self {
            inner: Arc::new(DatabaseInner {
                link,
                schema: SchemaCache::new(),
            }),
        }
    }

    pub fn link(&self) -> &Arc<dyn ConnectionPool> {
        &self.inner.link
    }

    pub fn schema(&self) -> &SchemaCache {
        &self.inner.schema
    }
}

/// Install `database` as the process-wide handle, replacing any previous one.
pub fn init(database: Database) {
    let mut slot = DATABASE.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        tracing::warn!("replacing an initialized database pool");
    }
    *slot = Some(database);
}

/// Build a lazy PostgreSQL pool from config and install it.
pub fn connect(config: &PgedConfig) -> Result<Database> {
    let url = config.database_url()?;
    let link = PgLink::lazy(&url, config.pool.max_connections)?;
    let database = Database::new(link);
    init(database.clone());
    tracing::info!(max_connections = config.pool.max_connections, "database pool ready");
    Ok(database)
}

/// The process-wide handle.
pub fn database() -> Result<Database> {
    DATABASE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(Error::PoolNotInitialized)
}

/// Close every pooled connection and clear the process-wide handle.
///
/// Calling this with no initialized pool is a no-op.
pub async fn shutdown() -> Result<()> {
    let database = DATABASE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();

    match database {
        Some(database) => {
            database.link().end().await?;
            tracing::info!("database pool closed");
            Ok(())
        }
        None => Ok(()),
    }
}
