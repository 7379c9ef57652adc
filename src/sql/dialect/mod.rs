//! SQL Dialect definitions and formatting rules.
//!
//! This module provides a trait-based abstraction for SQL dialect differences.
//! Each dialect implements `SqlDialect` to handle its specific syntax:
//!
//! - Identifier quoting: `"` (PostgreSQL), `` ` `` (MySQL), `[]` (SQL Server)
//! - Parameter placeholders: `$1`, `?`, `@p0`
//! - Pagination: LIMIT/OFFSET vs OFFSET FETCH vs TOP
//! - JSON result shaping: inline construction functions vs `FOR JSON PATH`
//!
//! # Usage
//!
//! ```
//! use relquery::sql::{Dialect, SqlDialect};
//!
//! let dialect = Dialect::PostgreSql;
//! assert_eq!(dialect.quote_identifier("user"), "\"user\"");
//! ```

pub mod helpers;
mod mysql;
mod postgres;
mod tsql;

pub use mysql::MySql;
pub use postgres::Postgres;
pub use tsql::TSql;

use serde::{Deserialize, Serialize};

use super::token::TokenStream;

/// Names of the functions a dialect uses to build JSON inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonFunctions {
    /// Builds an object from alternating key/value arguments.
    pub object: &'static str,
    /// Aggregates values into an array.
    pub array_agg: &'static str,
    /// Builds an array; called without arguments for the empty array.
    pub array: &'static str,
}

/// SQL dialect trait - defines how SQL constructs are rendered.
///
/// The default implementations follow ANSI SQL where possible.
pub trait SqlDialect: std::fmt::Debug {
    /// Dialect name for display/logging.
    fn name(&self) -> &'static str;

    // =========================================================================
    // Identifier and Literal Quoting
    // =========================================================================

    /// Quote an identifier (table, column, alias).
    fn quote_identifier(&self, ident: &str) -> String;

    /// Quote a string literal.
    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_single(s)
    }

    // =========================================================================
    // Parameters
    // =========================================================================

    /// Placeholder for the zero-based parameter `index`.
    fn placeholder(&self, index: usize) -> String;

    // =========================================================================
    // Pagination
    // =========================================================================

    /// Emit LIMIT/OFFSET or equivalent pagination clause.
    ///
    /// - PostgreSQL/MySQL: `LIMIT n OFFSET m` (default)
    /// - SQL Server: `OFFSET m ROWS FETCH NEXT n ROWS ONLY` (override)
    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        helpers::emit_limit_offset_standard(limit, offset)
    }

    /// Whether this dialect requires ORDER BY for OFFSET/LIMIT.
    fn requires_order_by_for_offset(&self) -> bool {
        false
    }

    /// Whether `SELECT TOP n` is the native way to cap a result.
    fn supports_top(&self) -> bool {
        false
    }

    // =========================================================================
    // JSON shaping
    // =========================================================================

    /// Inline JSON construction functions, or `None` when the dialect
    /// shapes JSON with `FOR JSON PATH` instead.
    fn json_functions(&self) -> Option<JsonFunctions> {
        None
    }

    // =========================================================================
    // Functions
    // =========================================================================

    /// Whether `COUNT(DISTINCT a, b)` style aggregates are accepted.
    fn supports_multi_arg_distinct(&self) -> bool {
        false
    }

    /// Remap a function name for this dialect.
    ///
    /// Returns `Some(new_name)` if the function should be remapped, `None` to keep original.
    /// The input is matched case-insensitively.
    fn remap_function(&self, name: &str) -> Option<&'static str> {
        let _ = name;
        None
    }
}

/// Supported SQL dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[serde(alias = "tsql", alias = "mssql")]
    SqlServer,
    MySql,
    #[default]
    #[serde(alias = "postgres")]
    PostgreSql,
}

impl Dialect {
    /// Get the dialect implementation.
    pub fn dialect(&self) -> &'static dyn SqlDialect {
        match self {
            Dialect::SqlServer => &TSql,
            Dialect::MySql => &MySql,
            Dialect::PostgreSql => &Postgres,
        }
    }

    /// Whether results come back as one aggregate JSON document rather
    /// than one JSON value per row.
    pub fn aggregates_json(&self) -> bool {
        self.json_functions().is_none()
    }
}

// Implement SqlDialect for Dialect enum by delegating to concrete types
impl SqlDialect for Dialect {
    fn name(&self) -> &'static str {
        self.dialect().name()
    }

    fn quote_identifier(&self, ident: &str) -> String {
        self.dialect().quote_identifier(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        self.dialect().quote_string(s)
    }

    fn placeholder(&self, index: usize) -> String {
        self.dialect().placeholder(index)
    }

    fn emit_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> TokenStream {
        self.dialect().emit_limit_offset(limit, offset)
    }

    fn requires_order_by_for_offset(&self) -> bool {
        self.dialect().requires_order_by_for_offset()
    }

    fn supports_top(&self) -> bool {
        self.dialect().supports_top()
    }

    fn json_functions(&self) -> Option<JsonFunctions> {
        self.dialect().json_functions()
    }

    fn supports_multi_arg_distinct(&self) -> bool {
        self.dialect().supports_multi_arg_distinct()
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        self.dialect().remap_function(name)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dialect().name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dialect_display() {
        assert_eq!(Dialect::PostgreSql.to_string(), "postgresql");
        assert_eq!(Dialect::SqlServer.to_string(), "sqlserver");
        assert_eq!(Dialect::MySql.to_string(), "mysql");
    }

    #[test]
    fn test_quote_identifier_escaping() {
        assert_eq!(
            Dialect::PostgreSql.quote_identifier("weird\"name"),
            "\"weird\"\"name\""
        );
        assert_eq!(
            Dialect::SqlServer.quote_identifier("weird]name"),
            "[weird]]name]"
        );
        assert_eq!(
            Dialect::MySql.quote_identifier("weird`name"),
            "`weird``name`"
        );
    }

    #[test]
    fn test_placeholders() {
        assert_eq!(Dialect::PostgreSql.placeholder(0), "$1");
        assert_eq!(Dialect::PostgreSql.placeholder(9), "$10");
        assert_eq!(Dialect::SqlServer.placeholder(3), "@p3");
        assert_eq!(Dialect::MySql.placeholder(3), "?");
    }

    #[test]
    fn test_json_shaping_modes() {
        assert!(Dialect::SqlServer.aggregates_json());
        assert!(!Dialect::PostgreSql.aggregates_json());
        assert_eq!(
            Dialect::MySql.json_functions().map(|j| j.array_agg),
            Some("JSON_ARRAYAGG")
        );
        assert_eq!(
            Dialect::PostgreSql.json_functions().map(|j| j.object),
            Some("jsonb_build_object")
        );
    }

    #[test]
    fn test_deserialize_aliases() {
        #[derive(Deserialize)]
        struct Holder {
            d: Dialect,
        }
        let h: Holder = toml::from_str("d = \"tsql\"").unwrap();
        assert_eq!(h.d, Dialect::SqlServer);
        let h: Holder = toml::from_str("d = \"postgres\"").unwrap();
        assert_eq!(h.d, Dialect::PostgreSql);
        let h: Holder = toml::from_str("d = \"mysql\"").unwrap();
        assert_eq!(h.d, Dialect::MySql);
    }

    #[test]
    fn test_remap_function_case_insensitive() {
        assert_eq!(Dialect::SqlServer.remap_function("length"), Some("LEN"));
        assert_eq!(Dialect::SqlServer.remap_function("Length"), Some("LEN"));
        assert_eq!(Dialect::MySql.remap_function("NVL"), Some("IFNULL"));
        assert_eq!(Dialect::PostgreSql.remap_function("CUSTOM_FUNC"), None);
    }
}
