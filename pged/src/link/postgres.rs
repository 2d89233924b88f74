//! PostgreSQL link backed by a sqlx `PgPool`
//!
//! Parameters are bound by JSON kind and rows are decoded by PostgreSQL
//! type name into `serde_json` values.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow, PgTypeInfo, PgTypeKind};
use sqlx::query::Query;
use sqlx::types::BigDecimal;
use sqlx::{Column, Decode, PgPool, Postgres, Row, Type, TypeInfo};
use uuid::Uuid;

use pged_core::{Error, Result};

use super::{ConnectionPool, PooledClient, Record};

/// Default maximum connections for the pool.
/// Kept low; sessions share one connection each.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Connection pool for PostgreSQL.
#[derive(Clone)]
pub struct PgLink {
    pool: PgPool,
}

impl PgLink {
    /// Wrap an existing sqlx pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create a pool that opens connections on first use.
    ///
    /// Nothing is dialed here, so connection failures surface in
    /// `Session::retain`, where the retry policy applies.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let link = PgLink::lazy("postgres://localhost/app", 5)?;
    /// ```
    pub fn lazy(database_url: &str, max_connections: u32) -> Result<Self> {
        let max_connections = if max_connections == 0 {
            DEFAULT_MAX_CONNECTIONS
        } else {
            max_connections
        };

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy(database_url)
            .map_err(Error::link)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionPool for PgLink {
    async fn connect(&self) -> Result<Box<dyn PooledClient>> {
        let conn = self.pool.acquire().await.map_err(Error::link)?;
        Ok(Box::new(PgClient { conn }))
    }

    async fn end(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

struct PgClient {
    conn: PoolConnection<Postgres>,
}

#[async_trait]
impl PooledClient for PgClient {
    async fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Record>> {
        let mut query = sqlx::query(sql);
        for param in params {
            query = bind_value(query, param);
        }

        let rows = query
            .fetch_all(&mut *self.conn)
            .await
            .map_err(Error::link)?;

        rows.iter().map(decode_row).collect()
    }

    fn release(self: Box<Self>) {
        // Dropping a PoolConnection hands it back to the pool.
        drop(self.conn);
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(b) => query.bind(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => query.bind(s.clone()),
        other => query.bind(sqlx::types::Json(other.clone())),
    }
}

fn decode_row(row: &PgRow) -> Result<Record> {
    let mut record = Record::new();
    for column in row.columns() {
        let type_info = column.type_info();
        let value = decode_column(row, column.ordinal(), type_info).map_err(|_| Error::Decode {
            column: column.name().to_string(),
            type_name: type_info.name().to_string(),
        })?;
        record.insert(column.name().to_string(), value);
    }
    Ok(record)
}

fn decode_column(
    row: &PgRow,
    idx: usize,
    type_info: &PgTypeInfo,
) -> std::result::Result<Value, sqlx::Error> {
    // Enum labels are sent as text in both wire formats.
    if let PgTypeKind::Enum(_) = type_info.kind() {
        return Ok(row
            .try_get_unchecked::<Option<String>, _>(idx)?
            .map_or(Value::Null, Value::from));
    }

    let value = match type_info.name() {
        "BOOL" => row.try_get::<Option<bool>, _>(idx)?.map(Value::from),
        "INT2" => row.try_get::<Option<i16>, _>(idx)?.map(Value::from),
        "INT4" => row.try_get::<Option<i32>, _>(idx)?.map(Value::from),
        "INT8" => row.try_get::<Option<i64>, _>(idx)?.map(Value::from),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)?
            .map(|f| Value::from(f64::from(f))),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.map(Value::from),
        // Decimal text keeps every digit; JSON numbers would round.
        "NUMERIC" => row
            .try_get::<Option<BigDecimal>, _>(idx)?
            .map(|d| Value::from(d.to_string())),
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(idx)?.map(Value::from)
        }
        "CITEXT" | "citext" => row
            .try_get_unchecked::<Option<String>, _>(idx)?
            .map(Value::from),
        "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(idx)?,
        "UUID" => row
            .try_get::<Option<Uuid>, _>(idx)?
            .map(|u| Value::from(u.to_string())),
        "TIMESTAMPTZ" => row
            .try_get::<Option<DateTime<Utc>>, _>(idx)?
            .map(|t| Value::from(t.to_rfc3339())),
        "TIMESTAMP" => row
            .try_get::<Option<NaiveDateTime>, _>(idx)?
            .map(|t| Value::from(t.format("%Y-%m-%dT%H:%M:%S%.f").to_string())),
        "DATE" => row
            .try_get::<Option<NaiveDate>, _>(idx)?
            .map(|d| Value::from(d.to_string())),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(idx)?
            .map(|t| Value::from(t.to_string())),
        "BOOL[]" => array::<bool, _>(row, idx, Value::from)?,
        "INT2[]" => array::<i16, _>(row, idx, Value::from)?,
        "INT4[]" => array::<i32, _>(row, idx, Value::from)?,
        "INT8[]" => array::<i64, _>(row, idx, Value::from)?,
        "FLOAT4[]" => array::<f32, _>(row, idx, |f| Value::from(f64::from(f)))?,
        "FLOAT8[]" => array::<f64, _>(row, idx, Value::from)?,
        "NUMERIC[]" => array::<BigDecimal, _>(row, idx, |d| Value::from(d.to_string()))?,
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => {
            array::<String, _>(row, idx, Value::from)?
        }
        "UUID[]" => array::<Uuid, _>(row, idx, |u| Value::from(u.to_string()))?,
        "JSONB[]" => array::<Value, _>(row, idx, |v| v)?,
        "VOID" => None,
        other => {
            return Err(sqlx::Error::TypeNotFound {
                type_name: other.to_string(),
            })
        }
    };

    Ok(value.unwrap_or(Value::Null))
}

/// One-dimensional array column; SQL NULL elements become JSON `null`.
fn array<'r, T, F>(
    row: &'r PgRow,
    idx: usize,
    convert: F,
) -> std::result::Result<Option<Value>, sqlx::Error>
where
    Vec<Option<T>>: Decode<'r, Postgres> + Type<Postgres>,
    F: Fn(T) -> Value,
{
    Ok(row
        .try_get::<Option<Vec<Option<T>>>, _>(idx)?
        .map(|items| {
            items
                .into_iter()
                .map(|item| item.map_or(Value::Null, &convert))
                .collect()
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Integration tests require a real database
    // Run with: DATABASE_URL=postgres://... cargo test -p pged -- --ignored

    #[tokio::test]
    #[ignore = "requires database"]
    async fn round_trips_common_types() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let link = PgLink::lazy(&url, 2).expect("pool creation failed");
        let mut client = link.connect().await.expect("connect failed");

        let rows = client
            .query(
                "SELECT $1::int8 AS n, $2::text AS s, $3::jsonb AS j, NULL::text AS missing",
                &[Value::from(7), Value::from("x"), serde_json::json!({"a": 1})],
            )
            .await
            .expect("query failed");

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["n"], Value::from(7));
        assert_eq!(rows[0]["s"], Value::from("x"));
        assert_eq!(rows[0]["j"], serde_json::json!({"a": 1}));
        assert_eq!(rows[0]["missing"], Value::Null);

        client.release();
        link.end().await.expect("end failed");
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn decodes_numeric_enum_and_array_columns() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let link = PgLink::lazy(&url, 2).expect("pool creation failed");
        let mut client = link.connect().await.expect("connect failed");

        client
            .query("CREATE TYPE pg_temp.mood AS ENUM ('ok', 'sad')", &[])
            .await
            .expect("create type failed");

        let rows = client
            .query(
                "SELECT 12.50::numeric AS price, 'ok'::pg_temp.mood AS mood, \
                 ARRAY['a', NULL]::text[] AS tags, ARRAY[1, 2]::int4[] AS ids, \
                 ARRAY[1.5]::numeric[] AS amounts, NULL::int8[] AS missing, \
                 $1::_text AS bound",
                &[Value::from(r#"{"x","y z"}"#)],
            )
            .await
            .expect("query failed");

        let row = &rows[0];
        let price: f64 = row["price"].as_str().unwrap().parse().unwrap();
        assert_eq!(price, 12.5);
        assert_eq!(row["mood"], json!("ok"));
        assert_eq!(row["tags"], json!(["a", null]));
        assert_eq!(row["ids"], json!([1, 2]));
        assert_eq!(row["amounts"].as_array().map(Vec::len), Some(1));
        assert_eq!(row["missing"], Value::Null);
        assert_eq!(row["bound"], json!(["x", "y z"]));

        client.release();
        link.end().await.expect("end failed");
    }

    #[tokio::test]
    async fn lazy_rejects_malformed_url() {
        assert!(PgLink::lazy("not a url", 1).is_err());
    }
}
