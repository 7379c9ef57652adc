//! Rendered statements handed to the execution layer.

use serde::Serialize;

use crate::value::Value;

/// A bound parameter, named in placeholder order (`p0`, `p1`, ...).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
    /// Declared column type, when the parameter is compared against a
    /// column that declares one.
    pub sql_type: Option<String>,
}

/// SQL text plus its ordered parameter list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Parameter>,
}
