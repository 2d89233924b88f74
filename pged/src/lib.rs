//! PostgreSQL access layer
//!
//! - [`Session`]: reference-counted connection and nested transactions
//! - [`QueryBuilder`]: filters, joins, sorting, pagination and upserts
//!   compiled to parameterized SQL
//! - [`EntityCache`]: per-entity result cache with atomic read-modify-write
//!
//! ```ignore
//! pged::pool::connect(&config)?;
//! let session = Session::new(config)?;
//!
//! let user = session
//!     .from("users")
//!     .insert(json!({"firstName": "Bob"}))
//!     .execute()
//!     .await?
//!     .into_row();
//! ```

pub mod cache;
pub mod events;
pub mod link;
pub mod models;
pub mod pool;
pub mod query;
pub mod schema;
pub mod session;

pub use cache::EntityCache;
pub use events::{DbEvent, EventPublisher};
pub use link::{ConnectionPool, PgLink, PooledClient, Record};
pub use models::{First, Output, Paginated, Pagination};
pub use pool::Database;
pub use query::{Comparer, Condition, Join, OnConflict, QueryBuilder, Required};
pub use session::{EndOptions, ExecOptions, HistoryRecord, Session};

pub use pged_core::{Casing, Error, IsolationLevel, PgedConfig, Result};
