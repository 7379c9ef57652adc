//! # relquery
//!
//! A relational query compiler: member-path filters and select trees over a
//! registered entity model, compiled to parameterized SQL for SQL Server,
//! MySQL and PostgreSQL.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │        Catalog (entities, columns, relationships)        │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [graph]
//! ┌─────────────────────────────────────────────────────────┐
//! │     Table graph (lazy children, structural identity)     │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [predicate + select]
//! ┌─────────────────────────────────────────────────────────┐
//! │  simplify → finalize (fan-out → correlated CTEs) →       │
//! │  render; select assembly, paging, JSON shaping, count    │
//! └─────────────────────────────────────────────────────────┘
//!                          │
//!                          ▼ [sql]
//! ┌─────────────────────────────────────────────────────────┐
//! │         Statement { sql, params } per dialect            │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Filters that reach through one-to-many relationships never join the many
//! side into the root query. They become `DISTINCT` or `GROUP BY ... HAVING`
//! CTEs keyed by the parent, joined once, so root rows are never multiplied.

pub mod cache;
pub mod compile;
pub mod config;
pub mod error;
pub mod graph;
pub mod predicate;
pub mod scope;
pub mod select;
pub mod sql;
pub mod value;

/// Re-exports for convenient usage.
pub mod prelude {
    pub use crate::config::Settings;
    pub use crate::error::{ErrorKind, QueryError, QueryResult};
    pub use crate::graph::{
        Catalog, CatalogBuilder, ColumnDef, EntityDef, JoinConditionDef, LinkDef, Path,
        RelationshipDef,
    };
    pub use crate::predicate::{Operand, Operator, Predicate, Quantifier, SubQuery};
    pub use crate::select::{CompiledQuery, FunctionArg, OutputShape, SelectQuery};
    pub use crate::sql::{Dialect, Parameter, SortDir, SqlDialect, Statement};
    pub use crate::value::Value;
}

// Also export at crate root for convenience
pub use error::{QueryError, QueryResult};
pub use graph::Catalog;
pub use predicate::Predicate;
pub use select::SelectQuery;
pub use sql::Dialect;
