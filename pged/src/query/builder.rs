//! Fluent query builder
//!
//! Methods accumulate a [`QuerySpec`]; nothing touches the database until a
//! terminal (`execute`, `count`, `sum`) consumes the builder. Input errors
//! are kept and returned by the terminal, so chains never need `?` midway.
//!
//! ```ignore
//! let adults = session
//!     .from("users")
//!     .filter(json!({"age": {"$gte": 18}}))
//!     .sorted(["-createdAt"])
//!     .paginated(Pagination::from_page(1, 20))
//!     .execute()
//!     .await?
//!     .into_page();
//! ```

use serde_json::Value;

use pged_core::{Error, Result};

use crate::models::{First, Output, Paginated, Pagination};
use crate::query::compile::{compile, storage_name, Compiled};
use crate::query::{Command, Condition, Join, OnConflict, QuerySpec, Upsert};
use crate::schema::Schema;
use crate::session::{ExecOptions, Session};

pub struct QueryBuilder {
    session: Session,
    spec: QuerySpec,
    error: Option<Error>,
}

impl QueryBuilder {
    pub(crate) fn new(session: Session, table: &str) -> Self {
        let error = table
            .trim()
            .is_empty()
            .then(|| Error::invalid_values("table name is empty"));
        Self {
            session,
            spec: QuerySpec::new(table),
            error,
        }
    }

    /// Accumulated specification.
    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Keys to return: `name`, `name:alias` or `:raw sql`.
    pub fn select<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.spec.select.extend(keys.into_iter().map(Into::into));
        self
    }

    /// Add filter terms, ANDed with any existing ones.
    pub fn filter(mut self, conditions: Value) -> Self {
        match Condition::parse(&conditions) {
            Ok(terms) => {
                self.spec.conditions.extend(terms);
                self
            }
            Err(err) => self.fail(err),
        }
    }

    pub fn filter_by(mut self, condition: Condition) -> Self {
        self.spec.conditions.push(condition);
        self
    }

    pub fn join(mut self, join: Join) -> Self {
        self.spec.joins.push(join);
        self
    }

    /// Add a join described as JSON (`{"table": .., "required": ..}`).
    pub fn join_value(self, join: &Value) -> Self {
        match Join::from_value(join) {
            Ok(join) => self.join(join),
            Err(err) => self.fail(err),
        }
    }

    /// Sort keys; `-key` sorts descending.
    pub fn sorted<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.spec.sort = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn group_by<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.spec.group_by = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn having(mut self, conditions: Value) -> Self {
        match Condition::parse(&conditions) {
            Ok(terms) => {
                self.spec.having.extend(terms);
                self
            }
            Err(err) => self.fail(err),
        }
    }

    pub fn offset_by(mut self, offset: u64) -> Self {
        self.spec.offset = Some(offset);
        self
    }

    pub fn limit_to(mut self, limit: u64) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    /// Return `{total, items}` for the given window.
    pub fn paginated(mut self, page: Pagination) -> Self {
        self.spec.paginated = Some(page);
        self
    }

    pub fn on_conflict<I, K>(mut self, columns: I, action: OnConflict) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.spec.upsert = Some(Upsert {
            columns: columns.into_iter().map(Into::into).collect(),
            action,
        });
        self
    }

    /// Insert one row and return it. `Value::Null` inserts defaults.
    pub fn insert(self, values: Value) -> Self {
        self.assign(Command::Insert, values)
    }

    /// Update matching rows and return the first one.
    pub fn update(self, values: Value) -> Self {
        self.assign(Command::Update, values)
    }

    pub fn delete(mut self) -> Self {
        self.spec.command = Command::Delete;
        self
    }

    /// Return only the first row.
    pub fn first(mut self) -> Self {
        self.spec.limit = Some(1);
        self.spec.first = First::Row;
        self
    }

    /// Select `key` and return its value from the first row.
    pub fn first_field(mut self, key: &str) -> Self {
        self.spec.limit = Some(1);
        self.spec.select.push(key.to_string());
        self.spec.first = First::Field(key.to_string());
        self
    }

    /// Compile without executing.
    pub async fn to_sql(self) -> Result<Compiled> {
        if let Some(err) = self.error {
            return Err(err);
        }
        compile_spec(&self.session, &self.spec).await
    }

    /// Compile and run the query.
    ///
    /// Inserts, updates and deletes run inside a transaction frame. A
    /// paginated query yields [`Output::Page`].
    pub async fn execute(self) -> Result<Output> {
        let QueryBuilder {
            session,
            mut spec,
            error,
        } = self;
        if let Some(err) = error {
            return Err(err);
        }

        if spec.first != First::All {
            spec.paginated = None;
        }

        let output = run(&session, &spec).await?;
        if spec.paginated.is_none() {
            return Ok(output);
        }

        let mut items = output.into_rows();
        let total = items
            .first()
            .and_then(|row| row.get("total"))
            .and_then(Value::as_i64);
        for item in &mut items {
            item.remove("total");
        }

        // The window total is absent when no row matched the window.
        let total = match total {
            Some(total) => total,
            None => count_rows(&session, spec, None).await?,
        };

        Ok(Output::Page(Paginated { total, items }))
    }

    /// Number of matching rows; with `key`, rows where that column is not null.
    pub async fn count(self, key: Option<&str>) -> Result<i64> {
        if let Some(err) = self.error {
            return Err(err);
        }
        count_rows(&self.session, self.spec, key).await
    }

    /// Sum of `key` over matching rows; `None` when nothing matched.
    pub async fn sum(self, key: &str) -> Result<Option<f64>> {
        if let Some(err) = self.error {
            return Err(err);
        }

        let casing = self.session.config().casing;
        let column = format!(
            "{}.{}",
            storage_name(&casing, &self.spec.table),
            storage_name(&casing, key)
        );
        let spec = aggregate(self.spec, format!(":SUM({})::float8 AS sum", column), "sum");

        Ok(run(&self.session, &spec)
            .await?
            .into_value()
            .and_then(|value| value.as_f64()))
    }

    fn assign(mut self, command: Command, values: Value) -> Self {
        self.spec.command = command;
        self.spec.first = First::Row;
        match values {
            Value::Object(values) => {
                self.spec.values = values;
                self
            }
            Value::Null if command == Command::Insert => self,
            other => self.fail(Error::invalid_values(format!(
                "expected an object of columns, got {}",
                other
            ))),
        }
    }

    fn fail(mut self, err: Error) -> Self {
        if self.error.is_none() {
            self.error = Some(err);
        }
        self
    }
}

async fn count_rows(session: &Session, spec: QuerySpec, key: Option<&str>) -> Result<i64> {
    let target = match key {
        Some(key) => {
            let casing = session.config().casing;
            format!(
                "{}.{}",
                storage_name(&casing, &spec.table),
                storage_name(&casing, key)
            )
        }
        None => "*".to_string(),
    };
    let spec = aggregate(spec, format!(":COUNT({})::bigint AS count", target), "count");

    Ok(run(session, &spec)
        .await?
        .into_value()
        .and_then(|value| value.as_i64())
        .unwrap_or(0))
}

/// Reuse filters and joins of `spec` for a single-value aggregate.
fn aggregate(mut spec: QuerySpec, select: String, field: &str) -> QuerySpec {
    spec.command = Command::Select;
    spec.select = vec![select];
    spec.sort.clear();
    spec.offset = None;
    spec.limit = None;
    spec.paginated = None;
    spec.first = First::Field(field.to_string());
    spec
}

async fn run(session: &Session, spec: &QuerySpec) -> Result<Output> {
    let compiled = compile_spec(session, spec).await?;
    let options = ExecOptions {
        transaction: spec.command.is_mutation(),
        first: spec.first.clone(),
        raw: false,
    };
    session
        .exec_with(&compiled.sql, compiled.params, options)
        .await
}

async fn compile_spec(session: &Session, spec: &QuerySpec) -> Result<Compiled> {
    let config = session.config();

    let schema = if config.schema.introspect {
        let tables: Vec<String> = spec
            .tables()
            .into_iter()
            .filter(|table| !table.trim().is_empty() && !table.starts_with(':'))
            .map(|table| storage_name(&config.casing, table))
            .collect();
        session.database().schema().ensure(session, &tables).await?
    } else {
        Schema::default()
    };

    compile(spec, config, &schema)
}
