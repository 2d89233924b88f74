//! Condition tree
//!
//! Filters arrive as nested JSON (`{"name": "Alice", "age": {"$gte": 30}}`)
//! and are normalized once into [`Condition`] before any SQL is written.
//!
//! Accepted shapes:
//! - an object: every key is a term, terms are ANDed
//! - a list: every element is a term, terms are ANDed
//! - `{"$and": ..}` / `{"$or": ..}` with an object or a list
//! - `{"column": value}` compares with `$eq`
//! - `{"column": {"$gte": 30, "$lt": 65}}` applies comparers to one column
//! - `{"column": {"$or": {"$lt": 18, "$gt": 65}}}` groups comparers
//! - `{"$gte": {"age": 30}}` applies one comparer to several columns
//!
//! Column keys starting with `:` are raw SQL; keys starting with `!` are
//! cased but not quoted.

use serde_json::{Map, Value};

use pged_core::{Error, Result};

/// Comparison applied by a leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Comparer {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Regexp,
    Contains,
    NotContains,
    ArrayContains,
}

impl Comparer {
    pub const ALL: [Comparer; 10] = [
        Comparer::Eq,
        Comparer::Ne,
        Comparer::Lt,
        Comparer::Lte,
        Comparer::Gt,
        Comparer::Gte,
        Comparer::Regexp,
        Comparer::Contains,
        Comparer::NotContains,
        Comparer::ArrayContains,
    ];

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.keyword() == keyword)
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Comparer::Eq => "$eq",
            Comparer::Ne => "$ne",
            Comparer::Lt => "$lt",
            Comparer::Lte => "$lte",
            Comparer::Gt => "$gt",
            Comparer::Gte => "$gte",
            Comparer::Regexp => "$regexp",
            Comparer::Contains => "$contains",
            Comparer::NotContains => "$notContains",
            Comparer::ArrayContains => "$arrayContains",
        }
    }

    /// SQL operator between the column and the value.
    pub fn sql(self) -> &'static str {
        match self {
            Comparer::Eq => "=",
            Comparer::Ne => "!=",
            Comparer::Lt => "<",
            Comparer::Lte => "<=",
            Comparer::Gt => ">",
            Comparer::Gte => ">=",
            Comparer::Regexp => "~*",
            Comparer::Contains | Comparer::NotContains | Comparer::ArrayContains => "@>",
        }
    }

    /// Compares JSON documents rather than scalars.
    pub fn is_json(self) -> bool {
        matches!(
            self,
            Comparer::Contains | Comparer::NotContains | Comparer::ArrayContains
        )
    }
}

/// Boolean operator joining the children of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    And,
    Or,
}

impl Operator {
    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword {
            "$and" => Some(Operator::And),
            "$or" => Some(Operator::Or),
            _ => None,
        }
    }

    pub fn sql(self) -> &'static str {
        match self {
            Operator::And => "AND",
            Operator::Or => "OR",
        }
    }
}

/// Right-hand side of a leaf
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Bound as a positional parameter
    Value(Value),
    /// Another column, rendered as an identifier
    Column(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Leaf {
        column: String,
        comparer: Comparer,
        value: Operand,
    },
    Group {
        operator: Operator,
        children: Vec<Condition>,
    },
}

impl Condition {
    pub fn leaf(column: impl Into<String>, comparer: Comparer, value: impl Into<Value>) -> Self {
        Condition::Leaf {
            column: column.into(),
            comparer,
            value: Operand::Value(value.into()),
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::leaf(column, Comparer::Eq, value)
    }

    /// `column = other_column`
    pub fn columns(column: impl Into<String>, comparer: Comparer, other: impl Into<String>) -> Self {
        Condition::Leaf {
            column: column.into(),
            comparer,
            value: Operand::Column(other.into()),
        }
    }

    pub fn and(children: Vec<Condition>) -> Self {
        Condition::Group {
            operator: Operator::And,
            children,
        }
    }

    pub fn or(children: Vec<Condition>) -> Self {
        Condition::Group {
            operator: Operator::Or,
            children,
        }
    }

    /// Normalize filter input into top-level terms (ANDed together).
    pub fn parse(input: &Value) -> Result<Vec<Condition>> {
        Parser { columns: false }.terms(input)
    }

    /// Like [`Condition::parse`], but string values name columns instead of
    /// being bound as parameters. Used for join conditions.
    pub fn parse_columns(input: &Value) -> Result<Vec<Condition>> {
        Parser { columns: true }.terms(input)
    }

    /// Leaves in left-to-right order.
    pub fn leaves(&self) -> Vec<&Condition> {
        match self {
            Condition::Leaf { .. } => vec![self],
            Condition::Group { children, .. } => {
                children.iter().flat_map(Condition::leaves).collect()
            }
        }
    }
}

struct Parser {
    columns: bool,
}

impl Parser {
    fn terms(&self, input: &Value) -> Result<Vec<Condition>> {
        match input {
            Value::Null => Ok(Vec::new()),
            Value::Object(map) => map
                .iter()
                .map(|(key, value)| self.entry(key, value))
                .collect(),
            Value::Array(items) => {
                let mut terms = Vec::with_capacity(items.len());
                for item in items {
                    if let Some(term) = group(Operator::And, self.terms(item)?) {
                        terms.push(term);
                    }
                }
                Ok(terms)
            }
            other => Err(Error::invalid_condition(format!(
                "expected an object or a list, got {}",
                other
            ))),
        }
    }

    fn entry(&self, key: &str, value: &Value) -> Result<Condition> {
        if let Some(operator) = Operator::from_keyword(key) {
            return Ok(Condition::Group {
                operator,
                children: self.terms(value)?,
            });
        }

        if let Some(comparer) = Comparer::from_keyword(key) {
            let Value::Object(map) = value else {
                return Err(Error::invalid_condition(format!(
                    "{} expects an object of columns",
                    key
                )));
            };
            let leaves = map
                .iter()
                .map(|(column, value)| self.leaf(column, comparer, value))
                .collect::<Result<Vec<_>>>()?;
            return group(Operator::And, leaves)
                .ok_or_else(|| Error::invalid_condition(format!("{} has no columns", key)));
        }

        if key.starts_with('$') {
            return Err(Error::unknown_modifier(key));
        }

        self.column(key, value)
    }

    /// Conditions on one column.
    fn column(&self, column: &str, value: &Value) -> Result<Condition> {
        match value {
            Value::Object(map) if map.keys().any(|k| k.starts_with('$')) => {
                let terms = self.column_terms(column, map)?;
                group(Operator::And, terms).ok_or_else(|| {
                    Error::invalid_condition(format!("no comparers for column {}", column))
                })
            }
            Value::Object(_) => Err(Error::invalid_condition(format!(
                "column {} needs a comparer for an object value (try $contains)",
                column
            ))),
            other => self.leaf(column, Comparer::Eq, other),
        }
    }

    fn column_terms(&self, column: &str, map: &Map<String, Value>) -> Result<Vec<Condition>> {
        let mut terms = Vec::with_capacity(map.len());
        for (key, value) in map {
            if let Some(comparer) = Comparer::from_keyword(key) {
                terms.push(self.leaf(column, comparer, value)?);
            } else if let Some(operator) = Operator::from_keyword(key) {
                let children = match value {
                    Value::Object(inner) => self.column_terms(column, inner)?,
                    Value::Array(items) => items
                        .iter()
                        .map(|item| self.column(column, item))
                        .collect::<Result<Vec<_>>>()?,
                    other => {
                        return Err(Error::invalid_condition(format!(
                            "{} expects an object or a list, got {}",
                            key, other
                        )))
                    }
                };
                terms.push(Condition::Group { operator, children });
            } else if key.starts_with('$') {
                return Err(Error::unknown_modifier(key));
            } else {
                return Err(Error::invalid_condition(format!(
                    "cannot mix comparers and field {} under column {}",
                    key, column
                )));
            }
        }
        Ok(terms)
    }

    fn leaf(&self, column: &str, comparer: Comparer, value: &Value) -> Result<Condition> {
        if column.is_empty() {
            return Err(Error::invalid_condition("empty column name"));
        }

        if !self.columns {
            return Ok(Condition::leaf(column, comparer, value.clone()));
        }

        match value {
            Value::String(other) => Ok(Condition::columns(column, comparer, other.as_str())),
            other => Err(Error::invalid_condition(format!(
                "join condition on {} must name a column, got {}",
                column, other
            ))),
        }
    }
}

/// Wrap several terms in a group; a single term stands alone.
fn group(operator: Operator, mut terms: Vec<Condition>) -> Option<Condition> {
    match terms.len() {
        0 => None,
        1 => terms.pop(),
        _ => Some(Condition::Group {
            operator,
            children: terms,
        }),
    }
}
