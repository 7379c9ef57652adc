//! MySQL SQL dialect.
//!
//! MySQL specifics:
//! - Backtick identifier quoting
//! - Anonymous `?` parameters
//! - Backslash escapes inside string literals
//! - `JSON_OBJECT` / `JSON_ARRAYAGG` for inline result shaping
//! - `COUNT(DISTINCT a, b)` over several expressions

use super::helpers;
use super::{JsonFunctions, SqlDialect};

/// MySQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct MySql;

impl SqlDialect for MySql {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn quote_string(&self, s: &str) -> String {
        helpers::quote_string_mysql(s)
    }

    fn placeholder(&self, _index: usize) -> String {
        "?".into()
    }

    fn json_functions(&self) -> Option<JsonFunctions> {
        Some(JsonFunctions {
            object: "JSON_OBJECT",
            array_agg: "JSON_ARRAYAGG",
            array: "JSON_ARRAY",
        })
    }

    fn supports_multi_arg_distinct(&self) -> bool {
        true
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_mysql(name)
    }
}
