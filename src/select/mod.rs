//! SELECT trees and their compilation.
//!
//! A [`SelectQuery`] is rooted at one table of the graph and holds a list of
//! [`SelectNode`]s. Columns reached through one-to-one relationships are
//! flattened into the root SELECT with LEFT JOINs; anything behind a
//! one-to-many relationship becomes a [`SelectNode::Nested`] node carrying an
//! independent query over the child table, rendered as a correlated
//! sub-select and shaped as JSON.
//!
//! ```
//! use relquery::prelude::*;
//!
//! let catalog = Catalog::builder()
//!     .entity(
//!         EntityDef::new("Order", "orders")
//!             .primary_key("id")
//!             .column("status")
//!             .relationship(RelationshipDef::one_to_many("lines", "OrderLine").right("order_id")),
//!     )
//!     .entity(
//!         EntityDef::new("OrderLine", "order_lines")
//!             .primary_key("id")
//!             .column("order_id")
//!             .column("qty"),
//!     )
//!     .build(&Settings::default())
//!     .unwrap();
//!
//! let compiled = catalog
//!     .query("Order").unwrap()
//!     .select("id").unwrap()
//!     .filter(Predicate::gt("lines.qty", 10)).unwrap()
//!     .page(1, 20).unwrap()
//!     .compile(Dialect::PostgreSql)
//!     .unwrap();
//!
//! let statement = compiled.statement();
//! assert!(statement.sql.starts_with("WITH"));
//! assert_eq!(statement.params.len(), 1);
//! ```

mod compile;
mod shape;

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::{QueryError, QueryResult};
use crate::graph::{Path, Relationship, Table};
use crate::predicate::Predicate;
use crate::scope::{RenderContext, Scope};
use crate::sql::{Dialect, Query, SortDir, Statement};
use crate::value::Value;

/// How a node takes part in GROUP BY inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    /// Grouped by when the select list also holds an aggregate.
    Key,
    Aggregate,
    /// Never grouped by.
    Neutral,
}

/// Argument of a function node.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArg {
    /// A column path; may cross one-to-many relationships, which flattens
    /// the join.
    Column(Path),
    Value(Value),
    Star,
}

impl FunctionArg {
    pub fn column(path: impl Into<Path>) -> Self {
        FunctionArg::Column(path.into())
    }
}

#[derive(Debug, Clone)]
pub enum SelectNode {
    /// A column of the root or of a one-to-one related table.
    Column { path: Path, alias: Option<String> },
    Function {
        name: String,
        args: Vec<FunctionArg>,
        distinct: bool,
        aggregate: bool,
        alias: String,
    },
    Case {
        when: Vec<(Predicate, Value)>,
        otherwise: Option<Value>,
        alias: String,
    },
    /// Rows related through `path`, selected by an independent query.
    Nested {
        path: Path,
        relationship: Arc<Relationship>,
        query: Box<SelectQuery>,
    },
}

impl SelectNode {
    pub fn grouping(&self) -> Grouping {
        match self {
            SelectNode::Column { .. } | SelectNode::Case { .. } => Grouping::Key,
            SelectNode::Function { aggregate: true, .. } => Grouping::Aggregate,
            SelectNode::Function { .. } => Grouping::Key,
            SelectNode::Nested { .. } => Grouping::Neutral,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub path: Path,
    pub dir: SortDir,
}

/// Result window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paging {
    Top(u64),
    /// 1-based page number and page size.
    Page { page: u64, size: u64 },
    Limit { limit: u64, offset: u64 },
}

/// A SELECT over one root table.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    root: Arc<Table>,
    nodes: Vec<SelectNode>,
    filter: Option<Predicate>,
    order: Vec<OrderBy>,
    paging: Option<Paging>,
    distinct: Option<bool>,
    eager_depth: usize,
    /// Entities of enclosing queries, skipped by the eager walk.
    ancestors: Vec<String>,
}

impl SelectQuery {
    pub fn new(root: Arc<Table>) -> Self {
        Self {
            root,
            nodes: Vec::new(),
            filter: None,
            order: Vec::new(),
            paging: None,
            distinct: None,
            eager_depth: 2,
            ancestors: Vec::new(),
        }
    }

    pub fn root(&self) -> &Arc<Table> {
        &self.root
    }

    pub fn nodes(&self) -> &[SelectNode] {
        &self.nodes
    }

    pub fn filter_predicate(&self) -> Option<&Predicate> {
        self.filter.as_ref()
    }

    pub fn ordering(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn paging(&self) -> Option<Paging> {
        self.paging
    }

    /// How many one-to-one hops `select_all` follows.
    pub fn eager_depth(mut self, depth: usize) -> Self {
        self.eager_depth = depth;
        self
    }

    /// Select a column, or include a relationship when `path` ends at one.
    pub fn select(mut self, path: impl Into<Path>) -> QueryResult<Self> {
        self.add_path(&path.into(), None)?;
        Ok(self)
    }

    /// Select a column under an explicit alias.
    pub fn select_as(mut self, path: impl Into<Path>, alias: &str) -> QueryResult<Self> {
        let path = path.into();
        self.root.resolve(&path)?;
        self.add_path(&path, Some(alias.to_string()))?;
        Ok(self)
    }

    /// Include every row related through `path`, with all their columns.
    pub fn include(mut self, path: impl Into<Path>) -> QueryResult<Self> {
        self.add_include(&path.into())?;
        Ok(self)
    }

    /// Select every root column, plus the columns of one-to-one related
    /// tables up to the eager depth.
    pub fn select_all(mut self) -> Self {
        self.add_all();
        self
    }

    /// Customize the nested query of the relationship at `path`, creating it
    /// if needed. A nested query left without columns selects all of them.
    pub fn nested(
        mut self,
        path: impl Into<Path>,
        build: impl FnOnce(SelectQuery) -> QueryResult<SelectQuery>,
    ) -> QueryResult<Self> {
        let path = path.into();
        let hops = self.root.resolve_relationship(&path)?;
        let target = match hops.iter().position(|r| r.causes_fanout()) {
            Some(i) if i + 1 < hops.len() => path.split_at(i + 1),
            _ => (path, Path::default()),
        };

        let (via, rest) = target;
        let slot = self.nested_mut(&via)?;
        let placeholder = SelectQuery::new(Arc::clone(&slot.root));
        let query = std::mem::replace(slot, placeholder);
        let mut query = if rest.is_empty() {
            build(query)?
        } else {
            query.nested(rest, build)?
        };
        if query.nodes.is_empty() {
            query.add_all();
        }
        *self.nested_mut(&via)? = query;
        Ok(self)
    }

    /// Aggregate function, e.g. `COUNT`, `SUM`.
    pub fn aggregate(self, name: &str, args: Vec<FunctionArg>, alias: &str) -> QueryResult<Self> {
        self.add_function(name, args, false, true, alias)
    }

    /// Aggregate over distinct arguments, e.g. `COUNT(DISTINCT x)`.
    pub fn aggregate_distinct(
        self,
        name: &str,
        args: Vec<FunctionArg>,
        alias: &str,
    ) -> QueryResult<Self> {
        self.add_function(name, args, true, true, alias)
    }

    /// Scalar function evaluated per row.
    pub fn function(self, name: &str, args: Vec<FunctionArg>, alias: &str) -> QueryResult<Self> {
        self.add_function(name, args, false, false, alias)
    }

    fn add_function(
        mut self,
        name: &str,
        args: Vec<FunctionArg>,
        distinct: bool,
        aggregate: bool,
        alias: &str,
    ) -> QueryResult<Self> {
        for arg in &args {
            if let FunctionArg::Column(path) = arg {
                self.root.resolve(path)?;
            }
        }
        self.nodes.push(SelectNode::Function {
            name: name.to_string(),
            args,
            distinct,
            aggregate,
            alias: alias.to_string(),
        });
        Ok(self)
    }

    /// `CASE WHEN p1 THEN v1 ... ELSE otherwise END`.
    pub fn case(
        mut self,
        when: Vec<(Predicate, Value)>,
        otherwise: Option<Value>,
        alias: &str,
    ) -> QueryResult<Self> {
        for (predicate, _) in &when {
            predicate.validate(&self.root)?;
        }
        self.nodes.push(SelectNode::Case {
            when,
            otherwise,
            alias: alias.to_string(),
        });
        Ok(self)
    }

    /// Add a WHERE condition, ANDed with any existing one.
    pub fn filter(mut self, predicate: Predicate) -> QueryResult<Self> {
        predicate.validate(&self.root)?;
        self.filter = Some(match self.filter.take() {
            Some(existing) => Predicate::and(vec![existing, predicate]),
            None => predicate,
        });
        Ok(self)
    }

    pub fn order_by(mut self, path: impl Into<Path>, dir: SortDir) -> QueryResult<Self> {
        let path = path.into();
        self.root.resolve(&path)?;
        self.order.push(OrderBy { path, dir });
        Ok(self)
    }

    pub fn top(mut self, n: u64) -> QueryResult<Self> {
        if n == 0 {
            return Err(QueryError::InvalidPaging("TOP must be positive".into()));
        }
        self.paging = Some(Paging::Top(n));
        Ok(self)
    }

    /// 1-based page of `size` rows.
    pub fn page(mut self, page: u64, size: u64) -> QueryResult<Self> {
        if page == 0 || size == 0 {
            return Err(QueryError::InvalidPaging(format!(
                "page {} of size {}: both are 1-based and must be positive",
                page, size
            )));
        }
        self.paging = Some(Paging::Page { page, size });
        Ok(self)
    }

    pub fn limit(mut self, limit: u64, offset: u64) -> QueryResult<Self> {
        if limit == 0 {
            return Err(QueryError::InvalidPaging("limit must be positive".into()));
        }
        self.paging = Some(Paging::Limit { limit, offset });
        Ok(self)
    }

    /// Force DISTINCT on or off instead of inferring it.
    pub fn distinct(mut self, distinct: bool) -> Self {
        self.distinct = Some(distinct);
        self
    }

    fn add_path(&mut self, path: &Path, alias: Option<String>) -> QueryResult<()> {
        if let Some(via) = self.enclosing_nested(path) {
            let (_, rest) = path.split_at(via.len());
            return self.nested_mut(&via)?.add_path(&rest, alias);
        }
        match self.root.resolve(path) {
            Ok(resolved) => match resolved.first_many() {
                None => {
                    let present = self
                        .nodes
                        .iter()
                        .any(|n| matches!(n, SelectNode::Column { path: p, .. } if p == path));
                    if !present {
                        self.nodes.push(SelectNode::Column {
                            path: path.clone(),
                            alias,
                        });
                    }
                    Ok(())
                }
                Some(index) => {
                    let (via, rest) = path.split_at(index + 1);
                    self.nested_mut(&via)?.add_path(&rest, alias)
                }
            },
            Err(QueryError::NotAColumn { .. }) => self.add_include(path),
            Err(e) => Err(e),
        }
    }

    fn add_include(&mut self, path: &Path) -> QueryResult<()> {
        if let Some(via) = self.enclosing_nested(path) {
            let (_, rest) = path.split_at(via.len());
            return self.nested_mut(&via)?.add_include(&rest);
        }
        let hops = self.root.resolve_relationship(path)?;
        match hops.iter().position(|r| r.causes_fanout()) {
            Some(index) if index + 1 < hops.len() => {
                let (via, rest) = path.split_at(index + 1);
                self.nested_mut(&via)?.add_include(&rest)
            }
            _ => {
                let fresh = !self.has_nested(path);
                let nested = self.nested_mut(path)?;
                if fresh || nested.nodes.is_empty() {
                    nested.add_all();
                }
                Ok(())
            }
        }
    }

    fn has_nested(&self, via: &Path) -> bool {
        self.nodes
            .iter()
            .any(|n| matches!(n, SelectNode::Nested { path, .. } if path == via))
    }

    /// Path of the nested node strictly enclosing `path`, if any. Members
    /// under a nested relationship belong to its document.
    fn enclosing_nested(&self, path: &Path) -> Option<Path> {
        self.nodes.iter().find_map(|n| match n {
            SelectNode::Nested { path: via, .. } if is_strict_prefix(via, path) => Some(via.clone()),
            _ => None,
        })
    }

    /// Query of the nested node for relationship path `via`, created empty
    /// on first use.
    fn nested_mut(&mut self, via: &Path) -> QueryResult<&mut SelectQuery> {
        let existing = self
            .nodes
            .iter()
            .position(|n| matches!(n, SelectNode::Nested { path, .. } if path == via));

        let index = match existing {
            Some(index) => index,
            None => {
                let hops = self.root.resolve_relationship(via)?;
                let relationship = match hops.last() {
                    Some(rel) => Arc::clone(rel),
                    None => return Err(self.not_a_relationship(via)),
                };
                let mut ancestors = self.ancestors.clone();
                ancestors.push(self.root.entity().to_string());

                let mut query = SelectQuery::new(Arc::clone(relationship.child()));
                query.eager_depth = self.eager_depth;
                query.ancestors = ancestors;

                // Members already selected below `via` move into its document.
                let (inner, kept): (Vec<_>, Vec<_>) =
                    std::mem::take(&mut self.nodes).into_iter().partition(|n| match n {
                        SelectNode::Column { path, .. } | SelectNode::Nested { path, .. } => {
                            is_strict_prefix(via, path)
                        }
                        _ => false,
                    });
                self.nodes = kept;
                query.nodes = inner
                    .into_iter()
                    .map(|node| match node {
                        SelectNode::Column { path, alias } => SelectNode::Column {
                            path: path.split_at(via.len()).1,
                            alias,
                        },
                        SelectNode::Nested {
                            path,
                            relationship,
                            query,
                        } => SelectNode::Nested {
                            path: path.split_at(via.len()).1,
                            relationship,
                            query,
                        },
                        other => other,
                    })
                    .collect();

                self.nodes.push(SelectNode::Nested {
                    path: via.clone(),
                    relationship,
                    query: Box::new(query),
                });
                self.nodes.len() - 1
            }
        };

        let err = self.not_a_relationship(via);
        match &mut self.nodes[index] {
            SelectNode::Nested { query, .. } => Ok(query),
            _ => Err(err),
        }
    }

    fn not_a_relationship(&self, path: &Path) -> QueryError {
        QueryError::NotARelationship {
            entity: self.root.entity().to_string(),
            path: path.to_string(),
        }
    }

    fn add_all(&mut self) {
        let mut visited = self.ancestors.clone();
        visited.push(self.root.entity().to_string());
        let root = Arc::clone(&self.root);
        self.add_columns(&root, &Path::default(), &mut visited, self.eager_depth);
    }

    fn add_columns(
        &mut self,
        table: &Arc<Table>,
        prefix: &Path,
        visited: &mut Vec<String>,
        depth: usize,
    ) {
        for column in table.columns() {
            let path = prefix.child(column.member());
            let present = self
                .nodes
                .iter()
                .any(|n| matches!(n, SelectNode::Column { path: p, .. } if *p == path));
            if !present {
                self.nodes.push(SelectNode::Column { path, alias: None });
            }
        }

        if depth == 0 {
            return;
        }
        for rel in table.relationships() {
            let entity = rel.child().entity().to_string();
            if rel.causes_fanout() || visited.contains(&entity) {
                continue;
            }
            visited.push(entity);
            self.add_columns(rel.child(), &prefix.child(rel.member()), visited, depth - 1);
            visited.pop();
        }
    }

    /// Compile into a data statement, its count statement and the shape of
    /// its result.
    pub fn compile(&self, dialect: Dialect) -> QueryResult<CompiledQuery> {
        let mut ctx = RenderContext::new();
        let scope = Scope::new(Arc::clone(&self.root), dialect);
        let assembled = compile::assemble(self, scope, None, &mut ctx)?;

        let (select, for_json, shape) = shape::top_level(&assembled, dialect);
        let mut query = assembled.query(select);
        if let Some(for_json) = for_json {
            query = query.for_json(for_json);
        }
        let count = assembled.count_query(ctx.ctes());

        let ctes = ctx.ctes().len();
        for cte in ctx.into_ctes() {
            query = query.with_cte(cte);
        }

        debug!(
            entity = self.root.entity(),
            dialect = %dialect,
            ctes,
            "compiled select"
        );

        Ok(CompiledQuery {
            dialect,
            query,
            count,
            shape,
        })
    }
}

fn is_strict_prefix(prefix: &Path, path: &Path) -> bool {
    path.len() > prefix.len() && path.starts_with(prefix)
}

/// One flat output column.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputColumn {
    /// SQL column alias.
    pub alias: String,
    /// Member path the value belongs to.
    pub key: Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonMode {
    /// One JSON document per result row.
    RowPerRow,
    /// The whole result as one JSON array, possibly split over rows.
    Aggregate,
}

/// How to read the result set of a compiled statement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputShape {
    Flat { columns: Vec<OutputColumn> },
    Json { column: String, mode: JsonMode },
}

/// A compiled SELECT with its companion count statement.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    dialect: Dialect,
    query: Query,
    count: Query,
    shape: OutputShape,
}

impl CompiledQuery {
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn count_query(&self) -> &Query {
        &self.count
    }

    pub fn shape(&self) -> &OutputShape {
        &self.shape
    }

    pub fn statement(&self) -> Statement {
        let statement = self.query.to_tokens_for_dialect(self.dialect).render(self.dialect);
        debug!(
            dialect = %self.dialect,
            params = statement.params.len(),
            sql = %statement.sql,
            "rendered statement"
        );
        statement
    }

    /// `COUNT(*)` over the rows the data statement returns before paging.
    pub fn count_statement(&self) -> Statement {
        let statement = self.count.to_tokens_for_dialect(self.dialect).render(self.dialect);
        debug!(
            dialect = %self.dialect,
            params = statement.params.len(),
            sql = %statement.sql,
            "rendered count statement"
        );
        statement
    }
}
