//! Query specification accumulated by a builder

use serde::Deserialize;
use serde_json::Value;

use pged_core::{Error, Result};

use crate::link::Record;
use crate::models::{First, Pagination};
use crate::query::Condition;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Command {
    #[default]
    Select,
    Insert,
    Update,
    Delete,
}

impl Command {
    /// Mutations always run inside a transaction frame.
    pub fn is_mutation(self) -> bool {
        !matches!(self, Command::Select)
    }
}

/// Which side of a join must have a matching row
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Required {
    /// CROSS JOIN
    None,
    /// LEFT JOIN
    Local,
    /// RIGHT JOIN
    Foreign,
    /// INNER JOIN
    #[default]
    Both,
}

impl Required {
    pub fn keyword(self) -> &'static str {
        match self {
            Required::None => "CROSS JOIN",
            Required::Local => "LEFT JOIN",
            Required::Foreign => "RIGHT JOIN",
            Required::Both => "INNER JOIN",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub table: String,
    /// Column of the main table; defaults to the primary key
    pub local: Option<String>,
    /// Column of the joined table; defaults to the primary key
    pub foreign: Option<String>,
    pub required: Required,
    /// Replaces the local/foreign pair when set
    pub conditions: Option<Vec<Condition>>,
}

#[derive(Deserialize)]
struct JoinInput {
    table: String,
    local: Option<String>,
    foreign: Option<String>,
    #[serde(default)]
    required: Required,
    conditions: Option<Value>,
}

impl Join {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            local: None,
            foreign: None,
            required: Required::default(),
            conditions: None,
        }
    }

    pub fn local(mut self, column: impl Into<String>) -> Self {
        self.local = Some(column.into());
        self
    }

    pub fn foreign(mut self, column: impl Into<String>) -> Self {
        self.foreign = Some(column.into());
        self
    }

    pub fn required(mut self, required: Required) -> Self {
        self.required = required;
        self
    }

    /// Join on column-to-column conditions, e.g.
    /// `{"orders.userId": "users.id", "orders.status": {"$ne": "users.state"}}`.
    pub fn on(mut self, conditions: &Value) -> Result<Self> {
        self.conditions = Some(Condition::parse_columns(conditions)?);
        Ok(self)
    }

    /// Parse `{table, local?, foreign?, required?, conditions?}`.
    pub fn from_value(value: &Value) -> Result<Self> {
        let input: JoinInput =
            serde_json::from_value(value.clone()).map_err(|e| Error::invalid_join(e.to_string()))?;

        let join = Self {
            table: input.table,
            local: input.local,
            foreign: input.foreign,
            required: input.required,
            conditions: None,
        };
        match input.conditions {
            Some(conditions) => join.on(&conditions),
            None => Ok(join),
        }
    }
}

/// Conflict resolution for INSERT
#[derive(Debug, Clone, PartialEq)]
pub enum OnConflict {
    DoNothing,
    /// `DO UPDATE SET` with the given key/value object
    Update(Value),
    /// `DO UPDATE SET col = EXCLUDED.col` for each column
    Merge(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Upsert {
    /// Conflict target columns
    pub columns: Vec<String>,
    pub action: OnConflict,
}

#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub table: String,
    pub command: Command,
    pub select: Vec<String>,
    pub conditions: Vec<Condition>,
    pub joins: Vec<Join>,
    pub sort: Vec<String>,
    pub group_by: Vec<String>,
    pub having: Vec<Condition>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub paginated: Option<Pagination>,
    pub upsert: Option<Upsert>,
    /// Insert or update assignments, in application naming
    pub values: Record,
    pub first: First,
}

impl QuerySpec {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    /// Main table followed by joined tables.
    pub fn tables(&self) -> Vec<&str> {
        std::iter::once(self.table.as_str())
            .chain(self.joins.iter().map(|join| join.table.as_str()))
            .collect()
    }
}
