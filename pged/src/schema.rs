//! Column type introspection
//!
//! Types are loaded once per table from `information_schema.columns` and
//! shared by every session on the same [`Database`](crate::Database).
//! Lookups run through one queue, so two sessions asking for the same table
//! at once issue a single introspection statement.

use std::collections::HashMap;

use serde_json::Value;

use pged_core::{Result, TaskQueue};

use crate::link::Record;
use crate::session::{ExecOptions, Session};

const COLUMNS_SQL: &str = "SELECT column_name::text AS column_name, udt_name::text AS udt_name \
     FROM information_schema.columns \
     WHERE table_schema::text = COALESCE($1::text, current_schema()::text) \
     AND table_name::text = $2";

/// PostgreSQL type of one column, by `udt_name` (`int4`, `jsonb`, `_text`…)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnType(String);

impl ColumnType {
    pub fn new(udt_name: impl Into<String>) -> Self {
        Self(udt_name.into())
    }

    pub fn udt_name(&self) -> &str {
        &self.0
    }

    pub fn is_json(&self) -> bool {
        matches!(self.0.as_str(), "json" | "jsonb")
    }

    pub fn is_textual(&self) -> bool {
        matches!(
            self.0.as_str(),
            "text" | "varchar" | "bpchar" | "char" | "name" | "citext"
        )
    }

    /// Native array types are named after their element with a `_` prefix.
    pub fn is_array(&self) -> bool {
        self.0.starts_with('_')
    }
}

/// Column types of one table, keyed by storage column name
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    columns: HashMap<String, ColumnType>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnType> {
        self.columns.get(name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &ColumnType)> {
        self.columns.iter().map(|(name, ty)| (name.as_str(), ty))
    }

    fn from_rows(rows: Vec<Record>) -> Self {
        let columns = rows
            .into_iter()
            .filter_map(|row| {
                let name = row.get("column_name").and_then(Value::as_str)?;
                let udt = row.get("udt_name").and_then(Value::as_str)?;
                Some((name.to_string(), ColumnType::new(udt)))
            })
            .collect();
        Self { columns }
    }
}

impl FromIterator<(String, ColumnType)> for TableSchema {
    fn from_iter<I: IntoIterator<Item = (String, ColumnType)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Snapshot of the tables one query touches
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: HashMap<String, TableSchema>,
}

impl Schema {
    pub fn with_table(mut self, table: impl Into<String>, schema: TableSchema) -> Self {
        self.tables.insert(table.into(), schema);
        self
    }

    pub fn table(&self, table: &str) -> Option<&TableSchema> {
        self.tables.get(table)
    }

    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnType> {
        self.table(table)?.column(column)
    }
}

/// Process-wide cache of introspected tables
pub struct SchemaCache {
    tables: TaskQueue<HashMap<String, TableSchema>>,
}

impl SchemaCache {
    pub fn new() -> Self {
        Self {
            tables: TaskQueue::new("pged_schema", HashMap::new()),
        }
    }

    /// Make sure every table in `tables` (storage names) is loaded and
    /// return a snapshot of them.
    pub async fn ensure(&self, session: &Session, tables: &[String]) -> Result<Schema> {
        let mut cached = self.tables.enter().await;

        for table in tables {
            if cached.contains_key(table) {
                continue;
            }

            let (namespace, name) = split_table(table);
            let rows = session
                .exec_with(
                    COLUMNS_SQL,
                    vec![namespace.map_or(Value::Null, Value::from), Value::from(name)],
                    ExecOptions::raw(),
                )
                .await?
                .into_rows();
            let schema = TableSchema::from_rows(rows);
            tracing::debug!(table = %table, columns = schema.len(), "introspected table");
            cached.insert(table.clone(), schema);
        }

        Ok(Schema {
            tables: tables
                .iter()
                .filter_map(|table| cached.get(table).map(|s| (table.clone(), s.clone())))
                .collect(),
        })
    }

    /// Drop a table so the next query introspects it again.
    pub async fn forget(&self, table: &str) -> bool {
        self.tables.run(|cached| cached.remove(table).is_some()).await
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new()
    }
}

/// `audit.events` → `(Some("audit"), "events")`
fn split_table(table: &str) -> (Option<&str>, &str) {
    match table.rsplit_once('.') {
        Some((namespace, name)) => (Some(namespace), name),
        None => (None, table),
    }
}
