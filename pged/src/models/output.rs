use serde::Serialize;
use serde_json::Value;

use crate::link::Record;
use crate::models::Paginated;

/// Which part of the result a statement should return
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum First {
    /// Every row
    #[default]
    All,
    /// The first row, if any
    Row,
    /// One field of the first row
    Field(String),
}

/// Shaped result of an executed statement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Output {
    Rows(Vec<Record>),
    Row(Option<Record>),
    Value(Option<Value>),
    Page(Paginated<Record>),
}

impl Output {
    pub fn into_rows(self) -> Vec<Record> {
        match self {
            Output::Rows(rows) => rows,
            Output::Row(row) => row.into_iter().collect(),
            Output::Value(value) => value
                .and_then(|v| match v {
                    Value::Object(record) => Some(record),
                    _ => None,
                })
                .into_iter()
                .collect(),
            Output::Page(page) => page.items,
        }
    }

    pub fn into_row(self) -> Option<Record> {
        self.into_rows().into_iter().next()
    }

    pub fn into_value(self) -> Option<Value> {
        match self {
            Output::Value(value) => value,
            Output::Row(row) => row.map(Value::Object),
            Output::Rows(rows) => rows.into_iter().next().map(Value::Object),
            Output::Page(page) => serde_json::to_value(page).ok(),
        }
    }

    pub fn into_page(self) -> Paginated<Record> {
        match self {
            Output::Page(page) => page,
            other => {
                let items = other.into_rows();
                Paginated {
                    total: items.len() as i64,
                    items,
                }
            }
        }
    }
}
