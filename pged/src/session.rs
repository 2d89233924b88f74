//! Reference-counted connection and transaction manager
//!
//! A [`Session`] shares one physical connection across nested uses. The
//! connection is checked out when the reference count goes 0 → 1 and handed
//! back when it returns to 0; transactions nest the same way, so only the
//! outermost frame issues BEGIN and COMMIT/ROLLBACK.
//!
//! Every state transition runs through the session's connection queue, one
//! at a time and in submission order.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

use pged_core::{Error, PgedConfig, Result, TaskQueue};

use crate::cache::EntityCache;
use crate::events::{DbEvent, EventPublisher};
use crate::link::{PooledClient, Record};
use crate::models::{First, Output};
use crate::pool::{self, Database};
use crate::query::QueryBuilder;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// One executed statement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRecord {
    pub query: String,
    pub parameters: Vec<Value>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: f64,
    pub succeeded: bool,
}

/// Options for [`Session::exec_with`]
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Run inside a transaction frame
    pub transaction: bool,
    /// Shape of the returned value
    pub first: First,
    /// Return rows exactly as the database reported them
    pub raw: bool,
}

impl ExecOptions {
    pub fn transaction() -> Self {
        Self {
            transaction: true,
            ..Self::default()
        }
    }

    pub fn raw() -> Self {
        Self {
            raw: true,
            ..Self::default()
        }
    }

    pub fn first(mut self, first: First) -> Self {
        self.first = first;
        self
    }
}

/// Options for [`Session::end_transaction`]
#[derive(Debug, Clone, Copy)]
pub struct EndOptions {
    /// Return the error handed to `end_transaction` after cleaning up
    pub rethrow: bool,
}

impl Default for EndOptions {
    fn default() -> Self {
        Self { rethrow: true }
    }
}

#[derive(Default)]
struct ConnectionState {
    count: u32,
    depth: u32,
    client: Option<Box<dyn PooledClient>>,
}

/// Logical database-access context
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: u64,
    database: Database,
    config: PgedConfig,
    connection: TaskQueue<ConnectionState>,
    history: Mutex<Vec<HistoryRecord>>,
    events: EventPublisher,
    caches: Mutex<HashMap<String, EntityCache>>,
    cache_hits: Arc<AtomicU64>,
}

impl Session {
    /// Create a session on the process-wide database.
    pub fn new(config: PgedConfig) -> Result<Self> {
        Ok(Self::with_database(pool::database()?, config))
    }

    /// Create a session on an explicit database.
    pub fn with_database(database: Database, config: PgedConfig) -> Self {
        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: Arc::new(SessionInner {
                id,
                database,
                config,
                connection: TaskQueue::new(
                    format!("pged_connection_{}", id),
                    ConnectionState::default(),
                ),
                history: Mutex::new(Vec::new()),
                events: EventPublisher::new(),
                caches: Mutex::new(HashMap::new()),
                cache_hits: Arc::new(AtomicU64::new(0)),
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn config(&self) -> &PgedConfig {
        &self.inner.config
    }

    pub fn database(&self) -> &Database {
        &self.inner.database
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DbEvent> {
        self.inner.events.subscribe()
    }

    /// Every statement executed so far, oldest first.
    pub fn history(&self) -> Vec<HistoryRecord> {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current reference count, read through the connection queue.
    pub async fn connection_count(&self) -> u32 {
        self.inner.connection.run(|state| state.count).await
    }

    pub async fn transaction_depth(&self) -> u32 {
        self.inner.connection.run(|state| state.depth).await
    }

    /// Cache hits across every entity cache of this session.
    pub fn cache_hits(&self) -> u64 {
        self.inner.cache_hits.load(Ordering::Relaxed)
    }

    /// Result cache for one entity type, created on first use.
    pub fn cache(&self, entity: &str) -> EntityCache {
        let mut caches = self
            .inner
            .caches
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        caches
            .entry(entity.to_string())
            .or_insert_with(|| {
                EntityCache::new(entity, self.inner.id, self.inner.cache_hits.clone())
            })
            .clone()
    }

    /// Start a query against `table`.
    pub fn from(&self, table: &str) -> QueryBuilder {
        QueryBuilder::new(self.clone(), table)
    }

    pub async fn retain(&self) -> Result<()> {
        let mut state = self.inner.connection.enter().await;
        self.retain_locked(&mut state).await
    }

    pub async fn release(&self) -> Result<()> {
        let mut state = self.inner.connection.enter().await;
        self.release_locked(&mut state)
    }

    /// Run `task` with a retained connection, releasing it afterwards.
    ///
    /// The task's error wins over a release error.
    pub async fn retained<F, Fut, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.retain().await?;
        let result = task(self.clone()).await;
        let released = self.release().await;
        settle(result, released)
    }

    pub async fn begin_transaction(&self) -> Result<()> {
        let mut state = self.inner.connection.enter().await;
        self.retain_locked(&mut state).await?;
        state.depth += 1;
        if state.depth > 1 {
            return Ok(());
        }

        if let Err(err) = self.open_transaction(&mut state).await {
            state.depth -= 1;
            if let Err(cleanup) = self.release_locked(&mut state) {
                tracing::warn!(session = self.inner.id, error = %cleanup, "release after failed BEGIN");
            }
            return Err(err);
        }

        self.inner
            .events
            .publish(DbEvent::StartedTransaction { session: self.inner.id });
        Ok(())
    }

    /// Close one transaction frame.
    ///
    /// With `error` set, the outermost frame rolls back and the error is
    /// returned again unless `options.rethrow` is false.
    pub async fn end_transaction(&self, error: Option<Error>, options: EndOptions) -> Result<()> {
        let outcome = self.finish_transaction(error.as_ref()).await;
        match error {
            Some(err) if options.rethrow => {
                if let Err(cleanup) = outcome {
                    tracing::warn!(session = self.inner.id, error = %cleanup, "ending transaction failed");
                }
                Err(err)
            }
            _ => outcome,
        }
    }

    /// Run `task` inside a transaction frame.
    ///
    /// Nested calls share the outermost BEGIN/COMMIT. An error from `task`
    /// rolls the outermost frame back and is returned unchanged.
    pub async fn transaction<F, Fut, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.begin_transaction().await?;
        let result = task(self.clone()).await;
        let ended = self.finish_transaction(result.as_ref().err()).await;
        settle(result, ended)
    }

    /// Run one statement on the retained connection and return its rows
    /// unconverted.
    pub async fn statement(&self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        let mut state = self.inner.connection.enter().await;
        self.statement_locked(&mut state, sql, params).await
    }

    pub async fn exec(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Record>> {
        Ok(self
            .exec_with(sql, params, ExecOptions::default())
            .await?
            .into_rows())
    }

    /// Run `sql` in its own retained (or transactional) frame and shape the
    /// converted rows.
    pub async fn exec_with(
        &self,
        sql: &str,
        params: Vec<Value>,
        options: ExecOptions,
    ) -> Result<Output> {
        let session = self.inner.id;
        self.inner.events.publish(DbEvent::PreQuery {
            session,
            sql: sql.to_string(),
            params: params.clone(),
        });

        let run = |session: Session| {
            let params = &params;
            async move { session.statement(sql, params).await }
        };
        let result = if options.transaction || self.inner.config.transactions.always {
            self.transaction(run).await
        } else {
            self.retained(run).await
        };

        self.inner.events.publish(DbEvent::Query {
            session,
            sql: sql.to_string(),
            params,
        });

        let rows = result?;
        let rows: Vec<Record> = if options.raw {
            rows
        } else {
            rows.into_iter().map(|row| self.convert_row(row)).collect()
        };

        Ok(match options.first {
            First::All => Output::Rows(rows),
            First::Row => Output::Row(rows.into_iter().next()),
            First::Field(field) => Output::Value(
                rows.into_iter()
                    .next()
                    .and_then(|mut row| row.remove(&field)),
            ),
        })
    }

    /// Roll back any open transaction and drop every reference.
    pub async fn close(&self) -> Result<()> {
        let mut state = self.inner.connection.enter().await;
        let mut outcome = Ok(());

        if state.depth > 0 {
            state.depth = 0;
            outcome = self
                .statement_locked(&mut state, "ROLLBACK", &[])
                .await
                .map(|_| ());
            self.inner.events.publish(DbEvent::EndedTransaction {
                session: self.inner.id,
                error: Some("session closed".to_string()),
                committed: false,
            });
        }

        if state.count > 0 {
            state.count = 0;
            if let Some(client) = state.client.take() {
                client.release();
            }
            self.inner
                .events
                .publish(DbEvent::Disconnected { session: self.inner.id });
        }

        outcome
    }

    async fn retain_locked(&self, state: &mut ConnectionState) -> Result<()> {
        state.count += 1;
        if state.count > 1 {
            return Ok(());
        }

        match self.connect().await {
            Ok(client) => {
                state.client = Some(client);
                self.inner
                    .events
                    .publish(DbEvent::Connected { session: self.inner.id });
                Ok(())
            }
            Err(err) => {
                state.count -= 1;
                Err(err)
            }
        }
    }

    fn release_locked(&self, state: &mut ConnectionState) -> Result<()> {
        // An open transaction keeps its own reference.
        if state.count <= state.depth {
            return Err(Error::NotRetained {
                session: self.inner.id,
            });
        }

        state.count -= 1;
        if state.count == 0 {
            if let Some(client) = state.client.take() {
                client.release();
            }
            self.inner
                .events
                .publish(DbEvent::Disconnected { session: self.inner.id });
        }
        Ok(())
    }

    async fn connect(&self) -> Result<Box<dyn PooledClient>> {
        let retry = self.inner.config.connection.retry;
        let attempts = retry.attempts();
        let mut attempt = 1;

        loop {
            match self.inner.database.link().connect().await {
                Ok(client) => return Ok(client),
                Err(err) if attempt < attempts => {
                    tracing::warn!(
                        session = self.inner.id,
                        attempt,
                        attempts,
                        error = %err,
                        "connect failed, retrying"
                    );
                    tokio::time::sleep(retry.delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    return Err(Error::Connect {
                        attempts,
                        source: Box::new(err),
                    })
                }
            }
        }
    }

    async fn open_transaction(&self, state: &mut ConnectionState) -> Result<()> {
        self.statement_locked(state, "BEGIN", &[]).await?;

        if let Some(isolation) = self.inner.config.transactions.mode.statement() {
            if let Err(err) = self.statement_locked(state, isolation, &[]).await {
                if let Err(cleanup) = self.statement_locked(state, "ROLLBACK", &[]).await {
                    tracing::warn!(session = self.inner.id, error = %cleanup, "rollback failed");
                }
                return Err(err);
            }
        }
        Ok(())
    }

    async fn finish_transaction(&self, error: Option<&Error>) -> Result<()> {
        let mut state = self.inner.connection.enter().await;
        if state.depth == 0 {
            return Err(Error::NoTransaction {
                session: self.inner.id,
            });
        }

        state.depth -= 1;
        let mut outcome = Ok(());

        if state.depth == 0 {
            let commit = error.is_none() && self.inner.config.commit;
            let sql = if commit { "COMMIT" } else { "ROLLBACK" };
            let result = self.statement_locked(&mut state, sql, &[]).await;

            self.inner.events.publish(DbEvent::EndedTransaction {
                session: self.inner.id,
                error: error.map(|err| err.to_string()),
                committed: commit && result.is_ok(),
            });
            outcome = result.map(|_| ());
        }

        let released = self.release_locked(&mut state);
        outcome.and(released)
    }

    async fn statement_locked(
        &self,
        state: &mut ConnectionState,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Record>> {
        let client = state.client.as_mut().ok_or(Error::NotConnected {
            session: self.inner.id,
        })?;

        let started_at = Utc::now();
        let timer = Instant::now();
        let result = client.query(sql, params).await;
        let elapsed_ms = timer.elapsed().as_secs_f64() * 1000.0;

        tracing::debug!(
            session = self.inner.id,
            sql,
            params = ?params,
            elapsed_ms,
            succeeded = result.is_ok(),
            "statement"
        );

        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(HistoryRecord {
                query: sql.to_string(),
                parameters: params.to_vec(),
                started_at,
                elapsed_ms,
                succeeded: result.is_ok(),
            });

        result
    }

    fn convert_row(&self, row: Record) -> Record {
        let casing = &self.inner.config.casing;
        let drop_nulls = self.inner.config.null_is_undefined;
        row.into_iter()
            .filter(|(_, value)| !(drop_nulls && value.is_null()))
            .map(|(key, value)| (casing.to_app(&key), value))
            .collect()
    }
}

/// Combine a task's result with its cleanup, keeping the task's error.
fn settle<T>(result: Result<T>, cleanup: Result<()>) -> Result<T> {
    match (result, cleanup) {
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(cleanup)) => {
            tracing::warn!(error = %cleanup, "cleanup failed while an error was propagating");
            Err(err)
        }
    }
}
