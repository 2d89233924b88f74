//! Query compiler
//!
//! - [`condition`]: filter input normalized into a condition tree
//! - [`spec`]: the specification a builder accumulates
//! - [`compile`]: specification → SQL + positional parameters
//! - [`builder`]: the fluent front end, executed through a session

pub mod builder;
pub mod compile;
pub mod condition;
pub mod spec;

pub use builder::QueryBuilder;
pub use compile::{compile, Compiled};
pub use condition::{Comparer, Condition, Operand, Operator};
pub use spec::{Command, Join, OnConflict, QuerySpec, Required, Upsert};
