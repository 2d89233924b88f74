//! Result shapes shared by sessions and query builders

pub mod output;
pub mod pagination;

pub use output::{First, Output};
pub use pagination::{Paginated, Pagination};
