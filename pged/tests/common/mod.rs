//! Scripted in-memory link shared by the integration tests
//!
//! Records every connect, release and statement, answers statements with
//! canned rows chosen by SQL fragment, and can fail connects or statements
//! on demand.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use pged::{ConnectionPool, Database, PgedConfig, PooledClient, Record, Session};
use pged_core::{Error, Result};

#[derive(Default)]
struct Script {
    connect_attempts: u32,
    connects: u32,
    releases: u32,
    failing_connects: u32,
    ended: bool,
    statements: Vec<(String, Vec<Value>)>,
    responses: Vec<(String, Vec<Record>)>,
    failures: Vec<String>,
}

#[derive(Clone, Default)]
pub struct ScriptedLink {
    script: Arc<Mutex<Script>>,
}

impl ScriptedLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer statements containing `fragment` with `rows` (a JSON array).
    pub fn respond(&self, fragment: &str, rows: Value) {
        let rows = rows
            .as_array()
            .expect("rows must be an array")
            .iter()
            .map(|row| row.as_object().cloned().expect("row must be an object"))
            .collect();
        self.lock().responses.push((fragment.to_string(), rows));
    }

    /// Fail statements containing `fragment`.
    pub fn fail_on(&self, fragment: &str) {
        self.lock().failures.push(fragment.to_string());
    }

    /// Fail the next `count` connects.
    pub fn fail_connects(&self, count: u32) {
        self.lock().failing_connects = count;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub fn connects(&self) -> u32 {
        self.lock().connects
    }

    pub fn releases(&self) -> u32 {
        self.lock().releases
    }

    pub fn ended(&self) -> bool {
        self.lock().ended
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock()
            .statements
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    pub fn params(&self, index: usize) -> Vec<Value> {
        self.lock().statements[index].1.clone()
    }

    pub fn database(&self) -> Database {
        Database::new(self.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }
}

#[async_trait]
impl ConnectionPool for ScriptedLink {
    async fn connect(&self) -> Result<Box<dyn PooledClient>> {
        let mut script = self.lock();
        script.connect_attempts += 1;
        if script.failing_connects > 0 {
            script.failing_connects -= 1;
            return Err(Error::link("connection refused"));
        }
        script.connects += 1;
        Ok(Box::new(ScriptedClient {
            script: self.script.clone(),
        }))
    }

    async fn end(&self) -> Result<()> {
        self.lock().ended = true;
        Ok(())
    }
}

struct ScriptedClient {
    script: Arc<Mutex<Script>>,
}

#[async_trait]
impl PooledClient for ScriptedClient {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        let mut script = self.script.lock().unwrap();
        script.statements.push((sql.to_string(), params.to_vec()));

        if script.failures.iter().any(|fragment| sql.contains(fragment.as_str())) {
            return Err(Error::link(format!("scripted failure: {}", sql)));
        }

        Ok(script
            .responses
            .iter()
            .find(|(fragment, _)| sql.contains(fragment.as_str()))
            .map(|(_, rows)| rows.clone())
            .unwrap_or_default())
    }

    fn release(self: Box<Self>) {
        self.script.lock().unwrap().releases += 1;
    }
}

/// Config without schema introspection, so statement logs stay minimal.
pub fn config() -> PgedConfig {
    let mut config = PgedConfig::default();
    config.schema.introspect = false;
    config
}

pub fn session(link: &ScriptedLink) -> Session {
    Session::with_database(link.database(), config())
}

pub fn session_with(link: &ScriptedLink, config: PgedConfig) -> Session {
    Session::with_database(link.database(), config)
}
