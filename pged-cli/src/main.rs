//! pged CLI - run statements and builder queries against PostgreSQL
//!
//! - `exec`: raw parameterized SQL through a session
//! - `select` / `count`: filter, sort and paginate a table
//! - `columns`: introspected column types of a table
//! - `sql`: compile a select offline and print the SQL with its parameters

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Value};
use tracing::info;

use pged::query::{compile, Condition, QuerySpec};
use pged::schema::Schema;
use pged::{pool, ExecOptions, First, Output, Pagination, QueryBuilder, Session};
use pged_core::PgedConfig;

mod tracing_setup;

#[derive(Parser, Debug)]
#[command(
    name = "pged",
    author,
    version,
    about = "PostgreSQL access layer: sessions, query compiler and result cache",
    long_about = "Run raw statements or JSON-filtered queries through reference-counted \
                  sessions. Column names are converted between application and storage casing."
)]
struct Cli {
    /// TOML config file (defaults apply when omitted)
    #[arg(long, global = true, env = "PGED_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Execute a raw SQL statement
    Exec(ExecArgs),
    /// Select rows from a table
    Select(QueryArgs),
    /// Count rows matching a filter
    Count(CountArgs),
    /// Show the column types of a table
    Columns(ColumnsArgs),
    /// Compile a select without connecting
    Sql(QueryArgs),
}

#[derive(Args, Debug)]
struct ExecArgs {
    /// SQL with $1..$n placeholders
    sql: String,

    /// Positional parameters as a JSON array
    #[arg(long, value_parser = parse_json, default_value = "[]")]
    params: Value,

    /// Return only the first row
    #[arg(long)]
    first: bool,

    /// Return only this field of the first row
    #[arg(long, value_name = "KEY", conflicts_with = "first")]
    field: Option<String>,

    /// Run inside a transaction
    #[arg(long)]
    transaction: bool,

    /// Keep storage column names and null fields
    #[arg(long)]
    raw: bool,
}

#[derive(Args, Debug)]
struct QueryArgs {
    /// Table name (application casing)
    table: String,

    /// JSON filter, e.g. '{"age": {"$gte": 30}}'
    #[arg(long = "where", value_name = "JSON", value_parser = parse_json)]
    filter: Option<Value>,

    /// Keys to return (comma-separated)
    #[arg(long, value_delimiter = ',')]
    select: Vec<String>,

    /// Sort keys, prefix with '-' for descending (comma-separated)
    #[arg(long, value_delimiter = ',', allow_hyphen_values = true)]
    sort: Vec<String>,

    /// Maximum rows
    #[arg(long)]
    limit: Option<u64>,

    /// Rows to skip
    #[arg(long)]
    offset: Option<u64>,

    /// Page number (1-based); returns {items, total}
    #[arg(long, conflicts_with_all = ["limit", "offset"])]
    page: Option<u64>,

    /// Rows per page
    #[arg(long, default_value_t = 20)]
    per_page: u64,

    /// Return only the first row
    #[arg(long, conflicts_with = "page")]
    first: bool,
}

#[derive(Args, Debug)]
struct CountArgs {
    table: String,

    /// JSON filter
    #[arg(long = "where", value_name = "JSON", value_parser = parse_json)]
    filter: Option<Value>,

    /// Count non-null values of this key instead of rows
    #[arg(long)]
    key: Option<String>,
}

#[derive(Args, Debug)]
struct ColumnsArgs {
    /// Storage table name
    table: String,
}

fn parse_json(raw: &str) -> Result<Value, String> {
    serde_json::from_str(raw).map_err(|err| format!("invalid JSON: {}", err))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before reading DATABASE_URL
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    tracing_setup::init(&tracing_setup::TracingConfig { debug: cli.debug })?;

    let config = match &cli.config {
        Some(path) => PgedConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PgedConfig::default(),
    };

    let result = run(cli.command, config).await;
    pool::shutdown().await.context("Failed to close the pool")?;
    result
}

async fn run(command: Commands, config: PgedConfig) -> Result<()> {
    match command {
        Commands::Sql(args) => {
            let spec = query_spec(&args)?;
            let compiled = compile(&spec, &config, &Schema::default())?;
            print_json(&json!({"sql": compiled.sql, "params": compiled.params}))
        }
        Commands::Exec(args) => {
            let session = open_session(config)?;
            let params = match args.params {
                Value::Array(params) => params,
                other => anyhow::bail!("--params must be a JSON array, got {}", other),
            };

            let mut options = ExecOptions {
                transaction: args.transaction,
                raw: args.raw,
                ..ExecOptions::default()
            };
            if let Some(field) = args.field {
                options = options.first(First::Field(field));
            } else if args.first {
                options = options.first(First::Row);
            }

            let output = session.exec_with(&args.sql, params, options).await?;
            print_json(&output)
        }
        Commands::Select(args) => {
            let session = open_session(config)?;
            let output = apply(session.from(&args.table), &args).execute().await?;
            if let (Output::Page(page), Some(number)) = (&output, args.page) {
                let window = Pagination::from_page(number, args.per_page);
                info!(
                    page = number,
                    total = page.total,
                    has_more = page.has_more(&window),
                    "page loaded"
                );
            }
            print_json(&output)
        }
        Commands::Count(args) => {
            let session = open_session(config)?;
            let mut builder = session.from(&args.table);
            if let Some(filter) = args.filter {
                builder = builder.filter(filter);
            }
            let count = builder.count(args.key.as_deref()).await?;
            println!("{}", count);
            Ok(())
        }
        Commands::Columns(args) => {
            let session = open_session(config)?;
            let schema = session
                .database()
                .schema()
                .ensure(&session, std::slice::from_ref(&args.table))
                .await?;

            let columns: serde_json::Map<String, Value> = schema
                .table(&args.table)
                .map(|table| {
                    table
                        .columns()
                        .map(|(name, kind)| (name.to_string(), Value::from(kind.udt_name())))
                        .collect()
                })
                .unwrap_or_default();

            if columns.is_empty() {
                anyhow::bail!("Table '{}' has no visible columns", args.table);
            }
            print_json(&columns)
        }
    }
}

fn open_session(config: PgedConfig) -> Result<Session> {
    let database = pool::connect(&config).context("Failed to create the pool")?;
    info!(url_set = config.pool.database_url.is_some(), "pool ready");
    Ok(Session::with_database(database, config))
}

fn apply(mut builder: QueryBuilder, args: &QueryArgs) -> QueryBuilder {
    if let Some(filter) = &args.filter {
        builder = builder.filter(filter.clone());
    }
    if !args.select.is_empty() {
        builder = builder.select(args.select.iter().cloned());
    }
    if !args.sort.is_empty() {
        builder = builder.sorted(args.sort.iter().cloned());
    }
    if let Some(offset) = args.offset {
        builder = builder.offset_by(offset);
    }
    if let Some(limit) = args.limit {
        builder = builder.limit_to(limit);
    }
    if let Some(page) = args.page {
        builder = builder.paginated(Pagination::from_page(page, args.per_page));
    }
    if args.first {
        builder = builder.first();
    }
    builder
}

/// Offline counterpart of [`apply`] for `pged sql`.
fn query_spec(args: &QueryArgs) -> Result<QuerySpec> {
    let mut spec = QuerySpec::new(&args.table);
    if let Some(filter) = &args.filter {
        spec.conditions = Condition::parse(filter)?;
    }
    spec.select = args.select.clone();
    spec.sort = args.sort.clone();
    spec.offset = args.offset;
    spec.limit = args.limit;
    spec.paginated = args
        .page
        .map(|page| Pagination::from_page(page, args.per_page));
    if args.first {
        spec.limit = Some(1);
        spec.first = First::Row;
    }
    Ok(spec)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("Failed to render output")?;
    println!("{}", rendered);
    Ok(())
}
