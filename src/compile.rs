//! End-to-end compilation from a TOML query file to SQL.
//!
//! A query file names a root entity and describes the select list, filter,
//! ordering and paging in terms of member paths:
//!
//! ```text
//! Query file → QueryFile → SelectQuery (validated) → CompiledQuery → Statement
//! ```
//!
//! # Example
//!
//! ```toml
//! entity = "Order"
//! select = ["id", "status", "customer.name"]
//! include = ["lines"]
//! order = [{ path = "id", dir = "desc" }]
//! page = { page = 2, size = 10 }
//!
//! [[filter]]
//! path = "lines.qty"
//! op = ">"
//! value = 10
//!
//! [[filter]]
//! any = [
//!     { path = "status", op = "=", value = "open" },
//!     { related = "lines", none = true },
//! ]
//! ```
//!
//! Filters at the top level are ANDed. A comparison without `value` or
//! `values` compares against NULL.

use std::fs;
use std::path::{Path as FsPath, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{QueryError, QueryResult};
use crate::graph::{Catalog, Path};
use crate::predicate::{Operand, Operator, Predicate, Quantifier};
use crate::select::{OutputShape, SelectQuery};
use crate::sql::{Dialect, SortDir, Statement};
use crate::value::Value;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while compiling a query file.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid query file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error(transparent)]
    Query(#[from] QueryError),
}

pub type CompileResult<T> = Result<T, CompileError>;

// ============================================================================
// Options
// ============================================================================

/// Options for compilation.
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// SQL dialect to generate.
    pub dialect: Dialect,
    /// Also render the count statement.
    pub count: bool,
}

impl CompileOptions {
    /// Options using the catalog's configured dialect.
    pub fn for_catalog(catalog: &Catalog) -> Self {
        Self {
            dialect: catalog.settings().compiler.dialect,
            count: false,
        }
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = dialect;
        self
    }

    pub fn with_count(mut self, count: bool) -> Self {
        self.count = count;
        self
    }
}

// ============================================================================
// Query file
// ============================================================================

/// Deserialized query file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryFile {
    pub entity: String,
    /// Column or relationship paths. Empty selects every column.
    #[serde(default)]
    pub select: Vec<Path>,
    /// Relationship paths whose rows are nested in full.
    #[serde(default)]
    pub include: Vec<Path>,
    #[serde(default)]
    pub filter: Vec<FilterDef>,
    #[serde(default)]
    pub order: Vec<OrderDef>,
    #[serde(default)]
    pub top: Option<u64>,
    #[serde(default)]
    pub page: Option<PageDef>,
    #[serde(default)]
    pub limit: Option<LimitDef>,
    #[serde(default)]
    pub distinct: Option<bool>,
}

/// One filter entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FilterDef {
    /// Any of the nested filters holds.
    Any { any: Vec<FilterDef> },
    /// Some related row matches all nested filters; with `none`, no row does.
    Related {
        related: Path,
        #[serde(default)]
        none: bool,
        #[serde(default)]
        filter: Vec<FilterDef>,
    },
    Compare {
        path: Path,
        #[serde(default = "default_operator")]
        op: Operator,
        #[serde(default)]
        value: Option<Value>,
        #[serde(default)]
        values: Option<Vec<Value>>,
        #[serde(default)]
        quantifier: Quantifier,
        #[serde(default)]
        not: bool,
    },
}

fn default_operator() -> Operator {
    Operator::Eq
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderDef {
    pub path: Path,
    #[serde(default)]
    pub dir: SortDir,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PageDef {
    pub page: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct LimitDef {
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

impl FilterDef {
    pub fn to_predicate(&self) -> QueryResult<Predicate> {
        match self {
            FilterDef::Any { any } => Ok(Predicate::or(all_predicates(any)?)),
            FilterDef::Related {
                related,
                none,
                filter,
            } => {
                let exists =
                    Predicate::related(related.clone(), Predicate::and(all_predicates(filter)?));
                if *none {
                    exists.not()
                } else {
                    Ok(exists)
                }
            }
            FilterDef::Compare {
                path,
                op,
                value,
                values,
                quantifier,
                not,
            } => {
                let operand = match (values, value) {
                    (Some(values), _) => Operand::Values(values.clone()),
                    (None, Some(value)) => Operand::Value(value.clone()),
                    (None, None) => Operand::Value(Value::Null),
                };
                let predicate = Predicate::compare(path.clone(), *op, operand, *quantifier);
                if *not {
                    predicate.not()
                } else {
                    Ok(predicate)
                }
            }
        }
    }
}

fn all_predicates(filters: &[FilterDef]) -> QueryResult<Vec<Predicate>> {
    filters.iter().map(FilterDef::to_predicate).collect()
}

impl QueryFile {
    pub fn from_toml_str(content: &str) -> CompileResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Build and validate the select tree against `catalog`.
    pub fn build(&self, catalog: &Catalog) -> QueryResult<SelectQuery> {
        let mut query = catalog.query(&self.entity)?;

        if self.select.is_empty() && self.include.is_empty() {
            query = query.select_all();
        }
        for path in &self.select {
            query = query.select(path)?;
        }
        for path in &self.include {
            query = query.include(path)?;
        }

        if !self.filter.is_empty() {
            query = query.filter(Predicate::and(all_predicates(&self.filter)?))?;
        }
        for order in &self.order {
            query = query.order_by(&order.path, order.dir)?;
        }

        query = match (self.top, self.page, self.limit) {
            (None, None, None) => query,
            (Some(n), None, None) => query.top(n)?,
            (None, Some(p), None) => query.page(p.page, p.size)?,
            (None, None, Some(l)) => query.limit(l.limit, l.offset)?,
            _ => {
                return Err(QueryError::InvalidPaging(
                    "only one of top, page and limit may be given".into(),
                ))
            }
        };

        if let Some(distinct) = self.distinct {
            query = query.distinct(distinct);
        }
        Ok(query)
    }
}

// ============================================================================
// Result Types
// ============================================================================

/// Result of compiling a query file.
#[derive(Debug, Clone)]
pub struct CompileOutput {
    pub statement: Statement,
    /// Present when requested in [`CompileOptions`].
    pub count: Option<Statement>,
    pub shape: OutputShape,
    pub dialect: Dialect,
}

// ============================================================================
// Compilation Functions
// ============================================================================

/// Compile query file text against `catalog`.
pub fn compile_query(
    catalog: &Catalog,
    source: &str,
    options: &CompileOptions,
) -> CompileResult<CompileOutput> {
    let file = QueryFile::from_toml_str(source)?;
    let compiled = file.build(catalog)?.compile(options.dialect)?;

    debug!(entity = %file.entity, dialect = %options.dialect, "compiled query file");

    Ok(CompileOutput {
        statement: compiled.statement(),
        count: options.count.then(|| compiled.count_statement()),
        shape: compiled.shape().clone(),
        dialect: options.dialect,
    })
}

/// Compile the query file at `path` against `catalog`.
pub fn compile_file<P: AsRef<FsPath>>(
    catalog: &Catalog,
    path: P,
    options: &CompileOptions,
) -> CompileResult<CompileOutput> {
    let path = path.as_ref();
    let source = fs::read_to_string(path).map_err(|source| CompileError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    compile_query(catalog, &source, options)
}

// ============================================================================
// Tests
// ============================================================================
