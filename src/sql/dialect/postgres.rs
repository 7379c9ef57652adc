//! PostgreSQL SQL dialect.
//!
//! PostgreSQL features used by the compiler:
//! - ANSI identifier quoting (`"`)
//! - Positional `$n` parameters
//! - `jsonb_build_object` / `jsonb_agg` for inline result shaping

use super::helpers;
use super::{JsonFunctions, SqlDialect};

/// PostgreSQL SQL dialect.
#[derive(Debug, Clone, Copy)]
pub struct Postgres;

impl SqlDialect for Postgres {
    fn name(&self) -> &'static str {
        "postgresql"
    }

    fn quote_identifier(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn placeholder(&self, index: usize) -> String {
        format!("${}", index + 1)
    }

    // Uses default emit_limit_offset (LIMIT ... OFFSET ...)

    fn json_functions(&self) -> Option<JsonFunctions> {
        Some(JsonFunctions {
            object: "jsonb_build_object",
            array_agg: "jsonb_agg",
            array: "jsonb_build_array",
        })
    }

    fn remap_function(&self, name: &str) -> Option<&'static str> {
        helpers::remap_function_postgres(name)
    }
}
