//! Query scope: the FROM table of one SELECT and the joins it has resolved.
//!
//! Each SELECT being assembled (the root query, a CTE body, a nested or
//! correlated sub-select) owns a [`Scope`]. Joins are keyed by structural
//! identity, so two paths reaching the same table share one join. CTEs are
//! collected in a [`RenderContext`] shared by every scope of a statement and
//! hoisted into the top-level WITH clause.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{QueryError, QueryResult};
use crate::graph::{is_same_or_child_of, Column, Relationship, Table};
use crate::sql::{
    combine, table_col, BinaryOperator, Cte, Dialect, Expr, FromItem, Join, JoinType, Query,
    TableRef,
};

/// Why a join was added. Only filter joins are carried into count queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOrigin {
    Filter,
    Select,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum JoinKey {
    Table(Uuid),
    Cte(String),
}

#[derive(Debug, Clone)]
pub struct ScopedJoin {
    key: JoinKey,
    pub join: Join,
    pub origin: JoinOrigin,
}

/// CTEs collected while compiling one statement.
#[derive(Debug, Default)]
pub struct RenderContext {
    ctes: Vec<Cte>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a CTE and return its name. Names follow registration order,
    /// so a CTE is always registered after the CTEs its body references.
    pub fn push_cte(&mut self, body: Query) -> String {
        let name = format!("cte_{}", self.ctes.len());
        self.ctes.push(Cte::new(&name, body));
        name
    }

    pub fn ctes(&self) -> &[Cte] {
        &self.ctes
    }

    pub fn into_ctes(self) -> Vec<Cte> {
        self.ctes
    }
}

/// FROM table and joins of one SELECT.
#[derive(Debug, Clone)]
pub struct Scope {
    root: Arc<Table>,
    dialect: Dialect,
    from: TableRef,
    /// INNER JOINs that bring a link table into a related scope.
    base_joins: Vec<Join>,
    /// Relationship filters on the FROM table of a related scope.
    base_filters: Vec<Expr>,
    /// Child-side correlation column of a related scope.
    link: Option<Expr>,
    joins: Vec<ScopedJoin>,
}

impl Scope {
    pub fn new(root: Arc<Table>, dialect: Dialect) -> Self {
        Self {
            from: root.table_ref(),
            root,
            dialect,
            base_joins: Vec::new(),
            base_filters: Vec::new(),
            link: None,
            joins: Vec::new(),
        }
    }

    /// Scope over the many side of `rel`, walking its joins backwards:
    /// FROM the child, INNER JOIN the link table for many-to-many.
    pub fn related(rel: &Relationship, dialect: Dialect) -> Self {
        let steps = rel.joins();
        let mut scope = Scope::new(Arc::clone(rel.child()), dialect);

        if let Some(last) = steps.last() {
            scope.from = last.table_ref();
            scope.base_filters = last.filter_exprs();
        }
        for pair in steps.windows(2).rev() {
            let (inner, outer) = (&pair[0], &pair[1]);
            let mut on = vec![outer.condition()];
            on.extend(inner.filter_exprs());
            scope.base_joins.push(Join {
                join_type: JoinType::Inner,
                table: inner.table_ref(),
                on: combine(BinaryOperator::And, on)
                    .unwrap_or_else(|| outer.condition()),
            });
        }
        scope.link = Some(rel.link_key());
        scope
    }

    pub fn root(&self) -> &Arc<Table> {
        &self.root
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Child-side correlation column, for related scopes.
    pub fn link(&self) -> Option<&Expr> {
        self.link.as_ref()
    }

    pub fn base_filters(&self) -> &[Expr] {
        &self.base_filters
    }

    pub fn joins(&self) -> &[ScopedJoin] {
        &self.joins
    }

    /// Expression for a column of a table in this scope.
    pub fn column(&self, table: &Table, column: &Column) -> Expr {
        table_col(table.alias(), column.name())
    }

    /// LEFT JOIN every step of `hops`, reusing joins already present.
    /// A join first added for the select list is promoted when a filter
    /// needs it too.
    pub fn join_hops(
        &mut self,
        hops: &[Arc<Relationship>],
        origin: JoinOrigin,
    ) -> QueryResult<()> {
        if let Some(first) = hops.first() {
            let owned = first
                .parent()
                .is_some_and(|parent| is_same_or_child_of(&parent, &self.root));
            if !owned {
                return Err(QueryError::PathNotFound {
                    entity: self.root.entity().to_string(),
                    path: first.member().to_string(),
                });
            }
        }

        for rel in hops {
            for step in rel.joins() {
                self.add_join(
                    JoinKey::Table(step.uuid),
                    Join {
                        join_type: JoinType::Left,
                        table: step.table_ref(),
                        on: step.on_expr(),
                    },
                    origin,
                );
            }
        }
        Ok(())
    }

    /// LEFT JOIN a CTE by name.
    pub fn join_cte(&mut self, name: &str, on: Expr, origin: JoinOrigin) {
        self.add_join(
            JoinKey::Cte(name.to_string()),
            Join {
                join_type: JoinType::Left,
                table: TableRef::new(name),
                on,
            },
            origin,
        );
    }

    fn add_join(&mut self, key: JoinKey, join: Join, origin: JoinOrigin) {
        match self.joins.iter_mut().find(|j| j.key == key) {
            Some(existing) => {
                if origin == JoinOrigin::Filter {
                    existing.origin = JoinOrigin::Filter;
                }
            }
            None => self.joins.push(ScopedJoin { key, join, origin }),
        }
    }

    pub fn has_joins(&self) -> bool {
        !self.joins.is_empty()
    }

    /// Apply FROM and joins to `query`. With `filter_only`, joins added only
    /// for the select list are skipped.
    pub fn apply(&self, mut query: Query, filter_only: bool) -> Query {
        query.from = Some(FromItem::Table(self.from.clone()));
        query.joins.extend(self.base_joins.iter().cloned());
        query.joins.extend(
            self.joins
                .iter()
                .filter(|j| !filter_only || j.origin == JoinOrigin::Filter)
                .map(|j| j.join.clone()),
        );
        query
    }
}
