//! SQL generation module.
//!
//! This module provides a type-safe SQL builder that generates multi-dialect SQL.
//! It includes:
//!
//! - [`query`] - SELECT query builder
//! - [`expr`] - Expression AST and builder DSL
//! - [`token`] - Token types for SQL generation
//! - [`statement`] - Rendered SQL text with its bound parameters
//! - [`dialect`] - SQL dialect implementations

pub mod dialect;
pub mod expr;
pub mod query;
pub mod statement;
pub mod token;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types at the sql module level
pub use dialect::{Dialect, JsonFunctions, SqlDialect};
pub use expr::{
    coalesce, col, combine, count_distinct, count_star, func, lit_int, lit_null, lit_str, max,
    min, param, star, table_col, typed_param, BinaryOperator, Expr, ExprExt, Literal,
};
pub use query::{
    Cte, ForJson, FromItem, Join, JoinType, LimitOffset, OrderByExpr, Query, SelectExpr, SortDir,
    TableRef,
};
pub use statement::{Parameter, Statement};
pub use token::{Token, TokenStream};
