//! SQL generation
//!
//! Compiles a [`QuerySpec`] into SQL text plus positional parameters.
//! Parameters are appended while the text is written, so `$n` always
//! matches the n-th value met in a left-to-right walk of the spec.

use std::fmt::Write;

use serde_json::Value;

use pged_core::{CasingConfig, Error, PgedConfig, Result};

use crate::link::Record;
use crate::query::{
    Command, Comparer, Condition, Join, OnConflict, Operand, Operator, QuerySpec, Required, Upsert,
};
use crate::schema::{ColumnType, Schema};

/// SQL text and its bound parameters (`$1` = `params[0]`)
#[derive(Debug, Clone, PartialEq)]
pub struct Compiled {
    pub sql: String,
    pub params: Vec<Value>,
}

/// How a value bound against a column is coerced
enum Slot {
    Unknown,
    Typed(ColumnType),
    /// `col->key`: compared as a JSON document
    JsonPath,
    /// `col->>key`: compared as text
    TextPath,
}

impl Slot {
    fn is_json(&self) -> bool {
        match self {
            Slot::Typed(ty) => ty.is_json(),
            Slot::JsonPath => true,
            Slot::Unknown | Slot::TextPath => false,
        }
    }

    fn is_array(&self) -> bool {
        matches!(self, Slot::Typed(ty) if ty.is_array())
    }
}

/// Compile `spec` using the naming rules of `config` and the column types
/// in `schema`.
pub fn compile(spec: &QuerySpec, config: &PgedConfig, schema: &Schema) -> Result<Compiled> {
    let mut compiler = Compiler {
        casing: config.casing,
        primary_key: &config.default_primary_key,
        schema,
        params: Vec::new(),
    };

    let sql = match spec.command {
        Command::Select => compiler.select(spec)?,
        Command::Insert => compiler.insert(spec)?,
        Command::Update => compiler.update(spec)?,
        Command::Delete => compiler.delete(spec)?,
    };

    Ok(Compiled {
        sql,
        params: compiler.params,
    })
}

struct Compiler<'a> {
    casing: CasingConfig,
    primary_key: &'a str,
    schema: &'a Schema,
    params: Vec<Value>,
}

impl Compiler<'_> {
    fn select(&mut self, spec: &QuerySpec) -> Result<String> {
        let table = self.name(&spec.table);
        let mut keys = self.keys(&spec.select);
        if spec.paginated.is_some() {
            keys.push("COUNT(*) OVER() AS total".to_string());
        }

        let mut sql = format!("SELECT {} FROM {}", keys.join(", "), table);

        for join in &spec.joins {
            let clause = self.join(&table, join)?;
            sql.push(' ');
            sql.push_str(&clause);
        }

        if let Some(clause) = self.conditions(&spec.table, &spec.conditions)? {
            let _ = write!(sql, " WHERE {}", clause);
        }

        if !spec.group_by.is_empty() {
            let columns: Vec<String> = spec.group_by.iter().map(|key| self.column(key)).collect();
            let _ = write!(sql, " GROUP BY {}", columns.join(", "));
        }

        if let Some(clause) = self.conditions(&spec.table, &spec.having)? {
            let _ = write!(sql, " HAVING {}", clause);
        }

        if !spec.sort.is_empty() {
            let keys: Vec<String> = spec.sort.iter().map(|key| self.sort_key(key)).collect();
            let _ = write!(sql, " ORDER BY {}", keys.join(", "));
        }

        let (offset, limit) = match spec.paginated {
            Some(page) => (Some(page.offset), Some(page.limit)),
            None => (spec.offset, spec.limit),
        };
        if let Some(limit) = limit {
            let _ = write!(sql, " LIMIT {}", limit);
        }
        if let Some(offset) = offset.filter(|offset| *offset > 0) {
            let _ = write!(sql, " OFFSET {}", offset);
        }

        Ok(sql)
    }

    fn insert(&mut self, spec: &QuerySpec) -> Result<String> {
        let table = self.name(&spec.table);

        let mut sql = if spec.values.is_empty() {
            format!("INSERT INTO {} DEFAULT VALUES", table)
        } else {
            let mut columns = Vec::with_capacity(spec.values.len());
            let mut values = Vec::with_capacity(spec.values.len());
            for (key, value) in &spec.values {
                columns.push(self.name(key));
                values.push(self.assigned(&spec.table, key, value));
            }
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                table,
                columns.join(", "),
                values.join(", ")
            )
        };

        if let Some(upsert) = &spec.upsert {
            let clause = self.on_conflict(&spec.table, upsert)?;
            sql.push_str(&clause);
        }

        let _ = write!(sql, " RETURNING {}", self.keys(&spec.select).join(", "));
        Ok(sql)
    }

    fn update(&mut self, spec: &QuerySpec) -> Result<String> {
        if spec.values.is_empty() {
            return Err(Error::invalid_values("update needs at least one column"));
        }

        let table = self.name(&spec.table);
        let assignments = self.assignments(&spec.table, &spec.values);
        let mut sql = format!("UPDATE {} SET {}", table, assignments);

        if let Some(clause) = self.conditions(&spec.table, &spec.conditions)? {
            let _ = write!(sql, " WHERE {}", clause);
        }

        let _ = write!(sql, " RETURNING {}", self.keys(&spec.select).join(", "));
        Ok(sql)
    }

    fn delete(&mut self, spec: &QuerySpec) -> Result<String> {
        let mut sql = format!("DELETE FROM {}", self.name(&spec.table));
        if let Some(clause) = self.conditions(&spec.table, &spec.conditions)? {
            let _ = write!(sql, " WHERE {}", clause);
        }
        Ok(sql)
    }

    fn join(&mut self, table: &str, join: &Join) -> Result<String> {
        if join.table.trim().is_empty() {
            return Err(Error::invalid_join("join table is empty"));
        }

        let joined = self.name(&join.table);
        if join.required == Required::None {
            return Ok(format!("CROSS JOIN {}", joined));
        }

        let on = match &join.conditions {
            Some(conditions) => self
                .conditions(&join.table, conditions)?
                .ok_or_else(|| Error::invalid_join(format!("no conditions for {}", join.table)))?,
            None => format!(
                "{} = {}",
                self.join_key(table, join.local.as_deref()),
                self.join_key(&joined, join.foreign.as_deref())
            ),
        };

        Ok(format!("{} {} ON {}", join.required.keyword(), joined, on))
    }

    fn join_key(&self, table: &str, key: Option<&str>) -> String {
        let key = key.unwrap_or(self.primary_key);
        if let Some(raw) = key.strip_prefix(':') {
            raw.to_string()
        } else if key.contains('.') {
            self.name(key)
        } else {
            format!("{}.{}", table, self.to_db(key))
        }
    }

    fn on_conflict(&mut self, table: &str, upsert: &Upsert) -> Result<String> {
        let target = if upsert.columns.is_empty() {
            String::new()
        } else {
            let columns: Vec<String> = upsert.columns.iter().map(|c| self.name(c)).collect();
            format!(" ({})", columns.join(", "))
        };

        if target.is_empty() && upsert.action != OnConflict::DoNothing {
            return Err(Error::invalid_values("DO UPDATE needs conflict columns"));
        }

        match &upsert.action {
            OnConflict::DoNothing => Ok(format!(" ON CONFLICT{} DO NOTHING", target)),
            OnConflict::Update(Value::Object(values)) if !values.is_empty() => {
                let assignments = self.assignments(table, values);
                Ok(format!(" ON CONFLICT{} DO UPDATE SET {}", target, assignments))
            }
            OnConflict::Update(other) => Err(Error::invalid_values(format!(
                "upsert values must be a non-empty object, got {}",
                other
            ))),
            OnConflict::Merge(columns) if !columns.is_empty() => {
                let assignments: Vec<String> = columns
                    .iter()
                    .map(|column| {
                        let column = self.name(column);
                        format!("{} = EXCLUDED.{}", column, column)
                    })
                    .collect();
                Ok(format!(
                    " ON CONFLICT{} DO UPDATE SET {}",
                    target,
                    assignments.join(", ")
                ))
            }
            OnConflict::Merge(_) => Err(Error::invalid_values("merge needs at least one column")),
        }
    }

    /// `SET` list of an update or `DO UPDATE`; a `:`-prefixed string value
    /// is raw SQL (`{"count": ":count + 1"}`).
    fn assignments(&mut self, table: &str, values: &Record) -> String {
        let mut parts = Vec::with_capacity(values.len());
        for (key, value) in values {
            let column = self.name(key);
            let value = match value.as_str().and_then(|text| text.strip_prefix(':')) {
                Some(raw) => raw.to_string(),
                None => self.assigned(table, key, value),
            };
            parts.push(format!("{} = {}", column, value));
        }
        parts.join(", ")
    }

    /// Value side of an insert or update assignment.
    fn assigned(&mut self, table: &str, key: &str, value: &Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        let slot = self.slot(table, key);
        self.bind(value.clone(), &slot)
    }

    fn conditions(&mut self, table: &str, terms: &[Condition]) -> Result<Option<String>> {
        self.group(table, Operator::And, terms, false)
    }

    fn group(
        &mut self,
        table: &str,
        operator: Operator,
        children: &[Condition],
        nested: bool,
    ) -> Result<Option<String>> {
        let mut parts = Vec::with_capacity(children.len());
        for child in children {
            match child {
                Condition::Leaf {
                    column,
                    comparer,
                    value,
                } => parts.push(self.leaf(table, column, *comparer, value)?),
                Condition::Group { operator, children } => {
                    if let Some(part) = self.group(table, *operator, children, true)? {
                        parts.push(part);
                    }
                }
            }
        }

        Ok(match parts.len() {
            // An empty `$and` holds, an empty `$or` never does.
            0 if nested => Some(match operator {
                Operator::And => "TRUE".to_string(),
                Operator::Or => "FALSE".to_string(),
            }),
            0 => None,
            1 if !nested => parts.pop(),
            _ => Some(format!(
                "({})",
                parts.join(&format!(" {} ", operator.sql()))
            )),
        })
    }

    fn leaf(
        &mut self,
        table: &str,
        column: &str,
        comparer: Comparer,
        operand: &Operand,
    ) -> Result<String> {
        let target = self.column(column);

        let value = match operand {
            Operand::Column(other) => {
                let other = self.column(other);
                return Ok(match comparer {
                    Comparer::NotContains => format!("NOT ({} @> {})", target, other),
                    _ => format!("{} {} {}", target, comparer.sql(), other),
                });
            }
            Operand::Value(value) => value,
        };

        if value.is_null() {
            return match comparer {
                Comparer::Eq => Ok(format!("{} IS NULL", target)),
                Comparer::Ne => Ok(format!("{} IS NOT NULL", target)),
                other => Err(Error::NullComparison {
                    comparer: other.keyword().to_string(),
                }),
            };
        }

        match comparer {
            Comparer::Contains => {
                let document = self.document(value);
                Ok(format!("{} @> {}", target, document))
            }
            Comparer::NotContains => {
                let document = self.document(value);
                Ok(format!("NOT ({} @> {})", target, document))
            }
            Comparer::ArrayContains if is_scalar(value) => {
                let element = self.push(value.clone());
                Ok(format!("{} @> jsonb_build_array({})", target, element))
            }
            Comparer::ArrayContains => {
                let document = self.document(value);
                Ok(format!("{} @> {}", target, document))
            }
            _ => {
                let slot = self.slot(table, column);
                match value {
                    Value::Array(items) if !slot.is_json() && !slot.is_array() => {
                        Ok(self.any(&target, comparer, items, &slot))
                    }
                    _ => {
                        let placeholder = self.bind(value.clone(), &slot);
                        Ok(format!("{} {} {}", target, comparer.sql(), placeholder))
                    }
                }
            }
        }
    }

    /// Array comparison; an empty list matches nothing (everything for `$ne`).
    fn any(&mut self, target: &str, comparer: Comparer, items: &[Value], slot: &Slot) -> String {
        if items.is_empty() {
            return if comparer == Comparer::Ne { "TRUE" } else { "FALSE" }.to_string();
        }

        let placeholders: Vec<String> = items
            .iter()
            .map(|item| self.bind(item.clone(), slot))
            .collect();
        let list = placeholders.join(", ");

        match comparer {
            Comparer::Ne => format!("{} != ALL(ARRAY[{}])", target, list),
            other => format!("{} {} ANY(ARRAY[{}])", target, other.sql(), list),
        }
    }

    /// Bind `value` as serialized JSON text cast to jsonb.
    fn document(&mut self, value: &Value) -> String {
        let placeholder = self.push(Value::String(value.to_string()));
        format!("{}::jsonb", placeholder)
    }

    fn bind(&mut self, value: Value, slot: &Slot) -> String {
        match slot {
            Slot::JsonPath => self.document(&value),
            Slot::TextPath => self.push(textual(value)),
            Slot::Typed(ty) if ty.is_json() => {
                let text = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                let placeholder = self.push(Value::String(text));
                format!("{}::{}", placeholder, ty.udt_name())
            }
            Slot::Typed(ty) if ty.is_array() && value.is_array() => {
                let placeholder = self.push(Value::String(array_literal(
                    value.as_array().map(Vec::as_slice).unwrap_or_default(),
                )));
                format!("{}::{}", placeholder, ty.udt_name())
            }
            Slot::Typed(ty) if ty.is_textual() => self.push(textual(value)),
            Slot::Typed(ty) => match value {
                Value::String(_) => {
                    let placeholder = self.push(value);
                    format!("{}::{}", placeholder, ty.udt_name())
                }
                other => self.push(other),
            },
            Slot::Unknown => self.push(value),
        }
    }

    fn push(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("${}", self.params.len())
    }

    fn slot(&self, table: &str, column: &str) -> Slot {
        if column.starts_with(':') {
            return Slot::Unknown;
        }
        let column = column.strip_prefix('!').unwrap_or(column);

        if let Some(index) = column.rfind("->") {
            return if column[index + 2..].starts_with('>') {
                Slot::TextPath
            } else {
                Slot::JsonPath
            };
        }

        let (table, column) = match column.rsplit_once('.') {
            Some((table, column)) => (self.name(table), column),
            None => (self.name(table), column),
        };

        match self.schema.column(&table, &self.to_db(column)) {
            Some(ty) => Slot::Typed(ty.clone()),
            None => Slot::Unknown,
        }
    }

    fn keys(&self, keys: &[String]) -> Vec<String> {
        if keys.is_empty() {
            return vec!["*".to_string()];
        }
        keys.iter().map(|key| self.key(key)).collect()
    }

    /// Select key: `name`, `name:alias` or `:raw sql`.
    fn key(&self, key: &str) -> String {
        if let Some(raw) = key.strip_prefix(':') {
            return raw.to_string();
        }
        match key.split_once(':') {
            Some((name, alias)) => format!("{} AS {}", self.name(name), self.name(alias)),
            None => self.name(key),
        }
    }

    fn sort_key(&self, key: &str) -> String {
        if let Some(key) = key.strip_prefix('-') {
            format!("{} DESC", self.column(key))
        } else if let Some(key) = key.strip_prefix('+') {
            format!("{} ASC", self.column(key))
        } else {
            self.column(key)
        }
    }

    /// Column reference in conditions, grouping and sorting.
    fn column(&self, name: &str) -> String {
        if let Some(raw) = name.strip_prefix(':') {
            raw.to_string()
        } else if let Some(bare) = name.strip_prefix('!') {
            self.name(bare)
        } else if name.contains("->") {
            self.json_path(name)
        } else if name.contains('.') {
            self.name(name)
        } else {
            format!("\"{}\"", self.to_db(name))
        }
    }

    /// `data->items->0->>firstName` → `"data"->'items'->0->>'firstName'`
    fn json_path(&self, path: &str) -> String {
        let mut segments = path.split("->");
        let head = segments.next().unwrap_or_default();
        let mut sql = if head.contains('.') {
            self.name(head)
        } else {
            format!("\"{}\"", self.to_db(head))
        };

        for segment in segments {
            let (arrow, key) = match segment.strip_prefix('>') {
                Some(key) => ("->>", key),
                None => ("->", segment),
            };
            if key.parse::<i64>().is_ok() {
                let _ = write!(sql, "{}{}", arrow, key);
            } else {
                let key = self.casing.to_app(key).replace('\'', "''");
                let _ = write!(sql, "{}'{}'", arrow, key);
            }
        }
        sql
    }

    fn name(&self, name: &str) -> String {
        storage_name(&self.casing, name)
    }

    fn to_db(&self, name: &str) -> String {
        if name == "*" {
            name.to_string()
        } else {
            self.casing.to_db(name)
        }
    }
}

/// Unquoted storage identifier, cased per dotted segment; `:raw` passes
/// through.
pub(crate) fn storage_name(casing: &CasingConfig, name: &str) -> String {
    if let Some(raw) = name.strip_prefix(':') {
        return raw.to_string();
    }
    name.split('.')
        .map(|segment| {
            if segment == "*" {
                segment.to_string()
            } else {
                casing.to_db(segment)
            }
        })
        .collect::<Vec<_>>()
        .join(".")
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

/// PostgreSQL array input text: `["a", null, 1]` → `{"a",NULL,1}`.
fn array_literal(items: &[Value]) -> String {
    let elements: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::Null => "NULL".to_string(),
            Value::Array(inner) => array_literal(inner),
            Value::String(text) => quote_element(text),
            Value::Object(_) => quote_element(&item.to_string()),
            Value::Number(_) | Value::Bool(_) => item.to_string(),
        })
        .collect();
    format!("{{{}}}", elements.join(","))
}

fn quote_element(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Numbers and booleans compared against text become strings.
fn textual(value: Value) -> Value {
    match value {
        Value::Number(_) | Value::Bool(_) => Value::String(value.to_string()),
        other => other,
    }
}
