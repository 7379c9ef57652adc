//! Assembly of one SELECT level: joins, select items, grouping, ordering
//! and paging. Result shaping lives in `shape`.

use std::sync::Arc;

use tracing::warn;

use super::{shape, FunctionArg, Grouping, OrderBy, Paging, SelectNode, SelectQuery};
use crate::error::{QueryError, QueryResult};
use crate::graph::{Path, Resolution, Table};
use crate::predicate;
use crate::scope::{JoinOrigin, RenderContext, Scope};
use crate::sql::{
    col, combine, count_star, lit_int, max, min, param, star, BinaryOperator, Cte, Expr, ExprExt,
    OrderByExpr, Query, SelectExpr, SortDir, SqlDialect,
};

/// Alias of the count column in count statements.
pub(super) const COUNT_COLUMN: &str = "count";

/// A non-nested select item.
#[derive(Debug, Clone)]
pub(super) struct FlatItem {
    pub expr: Expr,
    /// SQL alias, unique within the statement.
    pub alias: String,
    /// Member path of the value in the shaped result.
    pub key: Path,
    pub grouping: Grouping,
}

/// A nested relationship, already rendered as a correlated sub-select.
#[derive(Debug, Clone)]
pub(super) struct NestedItem {
    pub key: Path,
    pub expr: Expr,
}

/// Everything one SELECT level resolved, before shaping picks its select
/// list.
#[derive(Debug)]
pub(super) struct Assembled {
    pub scope: Scope,
    pub conditions: Vec<Expr>,
    pub items: Vec<FlatItem>,
    pub nested: Vec<NestedItem>,
    pub group_by: Vec<Expr>,
    pub order_by: Vec<OrderByExpr>,
    pub paging: Option<Paging>,
    pub distinct: bool,
    pub has_aggregate: bool,
    /// Number of leading CTEs registered by the WHERE clause.
    pub filter_ctes: usize,
}

/// Resolve `query` in `scope`. `correlation` ties a nested level to the row
/// of its parent.
pub(super) fn assemble(
    query: &SelectQuery,
    mut scope: Scope,
    correlation: Option<Expr>,
    ctx: &mut RenderContext,
) -> QueryResult<Assembled> {
    let dialect = scope.dialect();
    let root = Arc::clone(scope.root());

    let json_level = correlation.is_some();
    let mut conditions = scope.base_filters().to_vec();
    conditions.extend(correlation);
    if let Some(filter) = &query.filter {
        conditions.extend(predicate::compile(filter, &mut scope, ctx, JoinOrigin::Filter)?);
    }
    let filter_ctes = ctx.ctes().len();

    let mut items = Vec::new();
    let mut nested = Vec::new();
    let mut extra_keys = Vec::new();
    let mut fanout = false;

    for node in &query.nodes {
        match node {
            SelectNode::Column { path, alias } => {
                let resolved = root.resolve(path)?;
                scope.join_hops(&resolved.hops, JoinOrigin::Select)?;
                items.push(FlatItem {
                    expr: scope.column(&resolved.table, &resolved.column),
                    alias: alias
                        .clone()
                        .unwrap_or_else(|| resolved.column.alias().to_string()),
                    key: alias.as_deref().map(Path::parse).unwrap_or_else(|| path.clone()),
                    grouping: Grouping::Key,
                });
            }

            SelectNode::Function {
                name,
                args,
                distinct,
                aggregate,
                alias,
            } => {
                if *distinct && args.len() > 1 && !dialect.supports_multi_arg_distinct() {
                    return Err(QueryError::NotSupported {
                        dialect,
                        feature: format!("multi-argument DISTINCT {}", name),
                    });
                }
                let mut exprs = Vec::with_capacity(args.len());
                for arg in args {
                    exprs.push(match arg {
                        FunctionArg::Column(path) => {
                            let resolved = root.resolve(path)?;
                            fanout |= resolved.crosses_many();
                            scope.join_hops(&resolved.hops, JoinOrigin::Select)?;
                            scope.column(&resolved.table, &resolved.column)
                        }
                        FunctionArg::Value(value) => param(value.clone()),
                        FunctionArg::Star => star(),
                    });
                }
                items.push(FlatItem {
                    expr: Expr::Function {
                        name: name.clone(),
                        args: exprs,
                        distinct: *distinct,
                    },
                    alias: alias.clone(),
                    key: Path::parse(alias),
                    grouping: if *aggregate {
                        Grouping::Aggregate
                    } else {
                        Grouping::Key
                    },
                });
            }

            SelectNode::Case {
                when,
                otherwise,
                alias,
            } => {
                let mut when_clauses = Vec::with_capacity(when.len());
                for (condition, value) in when {
                    let condition =
                        predicate::compile(condition, &mut scope, ctx, JoinOrigin::Select)?
                            .unwrap_or_else(|| lit_int(1).eq(lit_int(1)));
                    when_clauses.push((condition, param(value.clone())));
                }
                items.push(FlatItem {
                    expr: Expr::Case {
                        when_clauses,
                        else_clause: otherwise.as_ref().map(|v| Box::new(param(v.clone()))),
                    },
                    alias: alias.clone(),
                    key: Path::parse(alias),
                    grouping: Grouping::Key,
                });
            }

            SelectNode::Nested {
                path,
                relationship,
                query: child,
            } => {
                let hops = root.resolve_relationship(path)?;
                if let Some((_, prefix)) = hops.split_last() {
                    scope.join_hops(prefix, JoinOrigin::Select)?;
                }
                let parent_key = relationship.parent_key();
                let child_scope = Scope::related(relationship, dialect);
                let link = relationship.link_key().eq(parent_key.clone());
                let assembled = assemble(child, child_scope, Some(link), ctx)?;
                nested.push(NestedItem {
                    key: path.clone(),
                    expr: shape::nested(&assembled, !relationship.causes_fanout(), dialect),
                });
                extra_keys.push(parent_key);
            }
        }
    }

    let mut orders: Vec<OrderBy> = query.order.clone();
    let paged = matches!(
        query.paging,
        Some(Paging::Page { .. }) | Some(Paging::Limit { .. })
    );
    if paged && orders.is_empty() {
        orders.push(OrderBy {
            path: fallback_order(&root)?,
            dir: SortDir::Asc,
        });
    }

    let mut order_by = Vec::with_capacity(orders.len());
    for order in &orders {
        let resolved = root.resolve(&order.path)?;
        let expr = match resolved.first_many() {
            Some(index) => {
                extra_keys.push(resolved.hops[index].parent_key());
                order_through_many(&resolved, index, order.dir, &mut scope)?
            }
            None => {
                scope.join_hops(&resolved.hops, JoinOrigin::Select)?;
                let expr = scope.column(&resolved.table, &resolved.column);
                let under_nested = nested.iter().any(|n| order.path.starts_with(&n.key));
                if !under_nested && !items.iter().any(|item| item.expr == expr) {
                    items.push(FlatItem {
                        expr: expr.clone(),
                        alias: resolved.column.alias().to_string(),
                        key: order.path.clone(),
                        grouping: Grouping::Key,
                    });
                }
                expr
            }
        };
        order_by.push(OrderByExpr {
            expr,
            dir: order.dir,
        });
    }

    if json_level || !nested.is_empty() {
        check_json_keys(&items, &nested)?;
    }

    let has_aggregate = items.iter().any(|i| i.grouping == Grouping::Aggregate);
    let has_key = items.iter().any(|i| i.grouping == Grouping::Key);

    // Keys group by the columns they read, so bound parameters are never
    // repeated outside the select list.
    let mut group_by: Vec<Expr> = Vec::new();
    if has_aggregate && has_key {
        let keys = items
            .iter()
            .filter(|i| i.grouping == Grouping::Key)
            .flat_map(|i| i.expr.column_refs())
            .chain(extra_keys);
        for key in keys {
            if !group_by.contains(&key) {
                group_by.push(key);
            }
        }
    }

    Ok(Assembled {
        scope,
        conditions,
        items,
        nested,
        group_by,
        order_by,
        paging: query.paging,
        distinct: query.distinct.unwrap_or(fanout && !has_aggregate),
        has_aggregate,
        filter_ctes,
    })
}

/// JSON documents cannot hold a key twice, nor a value where an object
/// nests.
fn check_json_keys(items: &[FlatItem], nested: &[NestedItem]) -> QueryResult<()> {
    let keys: Vec<&Path> = items
        .iter()
        .map(|i| &i.key)
        .chain(nested.iter().map(|n| &n.key))
        .collect();
    for (i, key) in keys.iter().enumerate() {
        for other in &keys[i + 1..] {
            if key.starts_with(other) || other.starts_with(key) {
                return Err(QueryError::ConflictingOutputKey {
                    key: other.to_string(),
                    other: key.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Primary key, else the first declared column.
fn fallback_order(root: &Arc<Table>) -> QueryResult<Path> {
    if let Some(pk) = root.primary_key() {
        return Ok(Path::parse(pk.member()));
    }
    match root.columns().first() {
        Some(column) => {
            warn!(
                entity = root.entity(),
                column = column.member(),
                "paging without order or primary key; ordering by first column"
            );
            Ok(Path::parse(column.member()))
        }
        None => Err(QueryError::PagingWithoutOrder(root.entity().to_string())),
    }
}

/// `(SELECT MIN(col) FROM child ... WHERE child.link = parent.key)`, or
/// `MAX` for descending order.
fn order_through_many(
    resolved: &Resolution,
    index: usize,
    dir: SortDir,
    scope: &mut Scope,
) -> QueryResult<Expr> {
    let relationship = &resolved.hops[index];
    scope.join_hops(&resolved.hops[..index], JoinOrigin::Select)?;

    let mut body = Scope::related(relationship, scope.dialect());
    body.join_hops(&resolved.hops[index + 1..], JoinOrigin::Select)?;
    let column = body.column(&resolved.table, &resolved.column);
    let value = match dir {
        SortDir::Asc => min(column),
        SortDir::Desc => max(column),
    };

    let mut conditions = body.base_filters().to_vec();
    conditions.push(relationship.link_key().eq(relationship.parent_key()));
    let mut query = Query::new().select(vec![value]);
    if let Some(condition) = combine(BinaryOperator::And, conditions) {
        query = query.filter(condition);
    }
    Ok(Expr::Subquery(Box::new(body.apply(query, false))))
}

impl Assembled {
    fn where_clause(&self) -> Option<Expr> {
        combine(BinaryOperator::And, self.conditions.clone())
    }

    /// The data query of this level with `select` as its select list.
    pub(super) fn query(&self, mut select: Vec<SelectExpr>) -> Query {
        // DISTINCT requires ORDER BY expressions in the select list; hidden
        // ones are ordered by alias.
        let mut order_by = self.order_by.clone();
        if self.distinct {
            for (i, order) in order_by.iter_mut().enumerate() {
                if !select.iter().any(|s| s.expr == order.expr) {
                    let alias = format!("o{}", i);
                    select.push(order.expr.clone().alias(&alias));
                    order.expr = col(&alias);
                }
            }
        }

        let mut query = Query::new().select(select);
        if self.distinct {
            query = query.distinct();
        }
        if let Some(condition) = self.where_clause() {
            query = query.filter(condition);
        }
        query = query
            .group_by(self.group_by.clone())
            .order_by(order_by);

        query = match self.paging {
            Some(Paging::Top(n)) => query.top(n),
            Some(Paging::Page { page, size }) => query
                .limit(size)
                .offset(page.saturating_sub(1).saturating_mul(size)),
            Some(Paging::Limit { limit, offset }) if offset > 0 => query.limit(limit).offset(offset),
            Some(Paging::Limit { limit, .. }) => query.limit(limit),
            None => query,
        };
        self.scope.apply(query, false)
    }

    /// Row count of the unpaged data query.
    ///
    /// Plain queries count over the filter joins only. Grouped, DISTINCT or
    /// aggregating queries are counted over a derived table of their
    /// flattened select list.
    pub(super) fn count_query(&self, ctes: &[Cte]) -> Query {
        let plain = !self.distinct && self.group_by.is_empty() && !self.has_aggregate;

        if plain {
            let mut query = Query::new().select(vec![count_star().alias(COUNT_COLUMN)]);
            for cte in ctes.iter().take(self.filter_ctes) {
                query = query.with_cte(cte.clone());
            }
            if let Some(condition) = self.where_clause() {
                query = query.filter(condition);
            }
            return self.scope.apply(query, true);
        }

        let select: Vec<SelectExpr> = if self.items.is_empty() {
            vec![lit_int(1).alias("g0")]
        } else {
            self.items
                .iter()
                .enumerate()
                .map(|(i, item)| item.expr.clone().alias(&format!("g{}", i)))
                .collect()
        };
        let mut inner = Query::new().select(select);
        if self.distinct {
            inner = inner.distinct();
        }
        if let Some(condition) = self.where_clause() {
            inner = inner.filter(condition);
        }
        let inner = self.scope.apply(inner.group_by(self.group_by.clone()), false);

        let mut query = Query::new()
            .select(vec![count_star().alias(COUNT_COLUMN)])
            .from_derived(inner, "counted");
        for cte in ctes {
            query = query.with_cte(cte.clone());
        }
        query
    }
}
