//! Render finalized predicates into SQL expressions.

use std::sync::Arc;

use tracing::trace;

use super::{compile, CorrelatedExists, Operand, Operator, Predicate, Quantifier, SubQuery};
use crate::error::{QueryError, QueryResult};
use crate::graph::Path;
use crate::scope::{JoinOrigin, RenderContext, Scope};
use crate::sql::{
    combine, count_distinct, lit_int, table_col, typed_param, BinaryOperator, Expr, ExprExt,
    Query, SelectExpr,
};
use crate::value::Value;

/// Column alias of a correlated CTE's key column.
pub(crate) const LINK_COLUMN: &str = "link";

/// Render a finalized predicate in `scope`, joining the one-to-one paths it
/// reads with `origin` and registering one CTE in `ctx` per correlated node.
///
/// Returns `None` for an empty group.
pub fn render(
    predicate: &Predicate,
    scope: &mut Scope,
    ctx: &mut RenderContext,
    origin: JoinOrigin,
) -> QueryResult<Option<Expr>> {
    match predicate {
        Predicate::Group { op, children } => {
            let mut parts = Vec::with_capacity(children.len());
            for child in children {
                if let Some(expr) = render(child, scope, ctx, origin)? {
                    parts.push(expr);
                }
            }
            Ok(combine(op.to_binary(), parts))
        }

        Predicate::ColumnValue {
            path,
            operator,
            operand,
            quantifier,
        } => {
            let (column, sql_type) = join_column(path, scope, origin)?;
            let target = Target {
                column,
                sql_type,
                path,
            };
            let expr = match operand {
                Operand::Value(value) => target.scalar(*operator, value)?,
                Operand::Values(values) => target.list(*operator, values, *quantifier)?,
                Operand::SubQuery(sq) => {
                    let negated = match operator {
                        Operator::Eq => false,
                        Operator::Ne => true,
                        other => {
                            return Err(QueryError::UnsupportedOperator {
                                operator: other.to_string(),
                                context: "a sub-query operand".into(),
                            })
                        }
                    };
                    Expr::InSubquery {
                        expr: Box::new(target.column),
                        subquery: Box::new(render_subquery(sq, scope, ctx)?),
                        negated,
                    }
                }
            };
            Ok(Some(expr))
        }

        Predicate::TwoColumn {
            left,
            operator,
            right,
        } => {
            let (l, _) = join_column(left, scope, origin)?;
            let (r, _) = join_column(right, scope, origin)?;
            let expr = match operator {
                Operator::NotLikeOrNull => {
                    let (null, unlike) = (l.clone().is_null(), l.binary(BinaryOperator::NotLike, r));
                    or_all(vec![null, unlike])
                }
                op => match op.to_binary() {
                    Some(bin) => l.binary(bin, r),
                    None => {
                        return Err(QueryError::UnsupportedOperator {
                            operator: op.to_string(),
                            context: "a column-to-column comparison".into(),
                        })
                    }
                },
            };
            Ok(Some(expr))
        }

        Predicate::Exists(e) => render_exists(e, scope, ctx, origin).map(Some),
    }
}

/// Join the hops of a column path and return the qualified column.
fn join_column(
    path: &Path,
    scope: &mut Scope,
    origin: JoinOrigin,
) -> QueryResult<(Expr, Option<String>)> {
    let root = Arc::clone(scope.root());
    let resolved = root.resolve(path)?;
    if resolved.crosses_many() {
        return Err(QueryError::UnsupportedOperator {
            operator: "direct comparison".into(),
            context: format!("'{}', which crosses a one-to-many relationship", path),
        });
    }
    scope.join_hops(&resolved.hops, origin)?;
    Ok((
        scope.column(&resolved.table, &resolved.column),
        resolved.column.sql_type().map(String::from),
    ))
}

/// Left-hand column of a leaf, with the type its parameters are bound as.
struct Target<'a> {
    column: Expr,
    sql_type: Option<String>,
    path: &'a Path,
}

impl Target<'_> {
    fn param(&self, value: &Value) -> Expr {
        typed_param(value.clone(), self.sql_type.clone())
    }

    fn scalar(&self, operator: Operator, value: &Value) -> QueryResult<Expr> {
        let column = self.column.clone();
        if value.is_null() {
            return match operator {
                Operator::Eq => Ok(column.is_null()),
                Operator::Ne => Ok(column.is_not_null()),
                other => Err(QueryError::UnsupportedOperator {
                    operator: other.to_string(),
                    context: format!("a NULL operand on '{}'", self.path),
                }),
            };
        }

        match operator {
            Operator::WordLike | Operator::NotWordLike => {
                let word = value.as_text().ok_or_else(|| QueryError::InvalidOperand {
                    path: self.path.to_string(),
                    reason: format!("word match needs a text value, got {}", value),
                })?;
                let patterns = [
                    word.to_string(),
                    format!("{} %", word),
                    format!("% {}", word),
                    format!("% {} %", word),
                ];
                let (bin, join) = if operator == Operator::WordLike {
                    (BinaryOperator::Like, BinaryOperator::Or)
                } else {
                    (BinaryOperator::NotLike, BinaryOperator::And)
                };
                let parts = patterns
                    .iter()
                    .map(|p| column.clone().binary(bin, self.param(&Value::Text(p.clone()))))
                    .collect();
                Ok(combine(join, parts).unwrap_or_else(|| lit_int(1)))
            }
            Operator::NotLikeOrNull => Ok(or_all(vec![
                column.clone().is_null(),
                column.binary(BinaryOperator::NotLike, self.param(value)),
            ])),
            op => match op.to_binary() {
                Some(bin) => Ok(column.binary(bin, self.param(value))),
                None => Err(QueryError::UnsupportedOperator {
                    operator: op.to_string(),
                    context: format!("'{}'", self.path),
                }),
            },
        }
    }

    fn list(&self, operator: Operator, values: &[Value], quantifier: Quantifier) -> QueryResult<Expr> {
        match values {
            // x IN () is false, x NOT IN () is true
            [] => Ok(match quantifier {
                Quantifier::Any => self.column.clone().in_list(Vec::new()),
                Quantifier::All => self.column.clone().not_in_list(Vec::new()),
            }),
            [single] => self.scalar(operator, single),
            _ => match (operator, quantifier) {
                (Operator::Eq, Quantifier::Any) => Ok(self
                    .column
                    .clone()
                    .in_list(values.iter().map(|v| self.param(v)).collect())),
                (Operator::Ne, Quantifier::All) => Ok(self
                    .column
                    .clone()
                    .not_in_list(values.iter().map(|v| self.param(v)).collect())),
                (Operator::Eq, Quantifier::All) | (Operator::Ne, Quantifier::Any) => {
                    Err(QueryError::QuantifierOutsideMany {
                        quantifier: quantifier.to_string(),
                        path: self.path.to_string(),
                    })
                }
                (op, q) => {
                    let parts = values
                        .iter()
                        .map(|v| self.scalar(op, v))
                        .collect::<QueryResult<Vec<_>>>()?;
                    let join = match q {
                        Quantifier::Any => BinaryOperator::Or,
                        Quantifier::All => BinaryOperator::And,
                    };
                    Ok(combine(join, parts).unwrap_or_else(|| lit_int(1)))
                }
            },
        }
    }
}

fn or_all(parts: Vec<Expr>) -> Expr {
    combine(BinaryOperator::Or, parts).unwrap_or_else(|| lit_int(0))
}

/// `SELECT column FROM table WHERE filter` in a scope of its own.
fn render_subquery(sq: &SubQuery, outer: &Scope, ctx: &mut RenderContext) -> QueryResult<Query> {
    let mut scope = Scope::new(Arc::clone(&sq.table), outer.dialect());
    let (column, _) = join_column(&sq.column, &mut scope, JoinOrigin::Filter)?;

    let mut query = Query::new().select(vec![column]);
    if let Some(filter) = &sq.filter {
        if let Some(condition) = compile(filter, &mut scope, ctx, JoinOrigin::Filter)? {
            query = query.filter(condition);
        }
    }
    Ok(scope.apply(query, false))
}

/// Render a correlated node as a LEFT JOIN against a CTE of matching keys,
/// tested for presence (or absence).
///
/// The CTE selects the child-side key of the last relationship in `via`
/// from the related rows satisfying the condition. Earlier hops in `via`
/// are one-to-one and joined into the outer scope.
fn render_exists(
    e: &CorrelatedExists,
    scope: &mut Scope,
    ctx: &mut RenderContext,
    origin: JoinOrigin,
) -> QueryResult<Expr> {
    let root = Arc::clone(scope.root());
    let hops = root.resolve_relationship(&e.via)?;
    let Some((target, prefix)) = hops.split_last() else {
        return Err(QueryError::NotARelationship {
            entity: root.entity().to_string(),
            path: e.via.to_string(),
        });
    };
    scope.join_hops(prefix, origin)?;

    let mut body = Scope::related(target, scope.dialect());
    let condition = compile(&e.condition, &mut body, ctx, JoinOrigin::Filter)?;
    let link = target.link_key();

    let mut query = Query::new().select(vec![SelectExpr::new(link.clone()).with_alias(LINK_COLUMN)]);
    let mut conditions = body.base_filters().to_vec();
    conditions.extend(condition);
    if let Some(condition) = combine(BinaryOperator::And, conditions) {
        query = query.filter(condition);
    }

    query = match &e.threshold {
        Some(threshold) => {
            let (counted, _) = join_column(&threshold.column, &mut body, JoinOrigin::Filter)?;
            let count = i64::try_from(threshold.count).unwrap_or(i64::MAX);
            query
                .group_by(vec![link])
                .having(count_distinct(counted).gte(lit_int(count)))
        }
        None => query.distinct(),
    };
    let query = body.apply(query, false);

    let name = ctx.push_cte(query);
    trace!(cte = %name, via = %e.via, inverted = e.inverted, "correlated CTE");

    scope.join_cte(&name, table_col(&name, LINK_COLUMN).eq(target.parent_key()), origin);
    let flag = table_col(&name, LINK_COLUMN);
    Ok(if e.inverted {
        flag.is_null()
    } else {
        flag.is_not_null()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::graph::{Catalog, CatalogBuilder, EntityDef, RelationshipDef};
    use crate::sql::test_utils::validate_sql;
    use crate::sql::Dialect;

    fn catalog() -> Catalog {
        CatalogBuilder::new()
            .entity(
                EntityDef::new("Order", "orders")
                    .primary_key("id")
                    .column("status")
                    .column("note")
                    .column("customer_id")
                    .relationship(RelationshipDef::one_to_many("lines", "OrderLine").right("order_id"))
                    .relationship(RelationshipDef::one_to_one("customer", "Customer").left("customer_id")),
            )
            .entity(
                EntityDef::new("OrderLine", "order_lines")
                    .primary_key("id")
                    .column("order_id")
                    .column("sku")
                    .typed_column("qty", "int"),
            )
            .entity(EntityDef::new("Customer", "customers").primary_key("id").column("name"))
            .build(&Settings::default())
            .unwrap()
    }

    fn statement(pred: &Predicate, dialect: Dialect) -> (String, usize, usize) {
        let catalog = catalog();
        let order = catalog.instance("Order").unwrap();
        let mut scope = Scope::new(Arc::clone(&order), dialect);
        let mut ctx = RenderContext::new();
        let condition = compile(pred, &mut scope, &mut ctx, JoinOrigin::Filter).unwrap();

        let mut query = Query::new().select(vec![table_col(order.alias(), "id")]);
        if let Some(c) = condition {
            query = query.filter(c);
        }
        let joins = scope.joins().len();
        let ctes = ctx.ctes().len();
        for cte in ctx.into_ctes() {
            query = query.with_cte(cte);
        }
        let sql = scope.apply(query, false).to_sql(dialect);
        (sql, joins, ctes)
    }

    #[test]
    fn test_simple_comparison() {
        let (sql, joins, ctes) = statement(&Predicate::eq("status", "open"), Dialect::PostgreSql);
        validate_sql(&sql, Dialect::PostgreSql).unwrap();
        assert!(sql.contains("\"status\" = $1"));
        assert_eq!((joins, ctes), (0, 0));
    }

    #[test]
    fn test_one_to_one_path_joins() {
        let (sql, joins, _) = statement(&Predicate::like("customer.name", "A%"), Dialect::MySql);
        validate_sql(&sql, Dialect::MySql).unwrap();
        assert!(sql.contains("LEFT JOIN `customers`"));
        assert!(sql.contains("`name` LIKE ?"));
        assert_eq!(joins, 1);
    }

    #[test]
    fn test_any_related_uses_one_cte() {
        let (sql, joins, ctes) = statement(&Predicate::gt("lines.qty", 10), Dialect::PostgreSql);
        validate_sql(&sql, Dialect::PostgreSql).unwrap();
        assert_eq!(ctes, 1);
        assert_eq!(joins, 1);
        assert!(sql.starts_with("WITH \"cte_0\" AS (\nSELECT DISTINCT"));
        assert!(sql.contains("\"cte_0\".\"link\" IS NOT NULL"));
        assert!(!sql.contains("LEFT JOIN \"order_lines\""));
    }

    #[test]
    fn test_all_related_inverts_condition() {
        let (sql, _, ctes) = statement(&Predicate::gt("lines.qty", 10).all(), Dialect::PostgreSql);
        validate_sql(&sql, Dialect::PostgreSql).unwrap();
        assert_eq!(ctes, 1);
        assert!(sql.contains("\"qty\" <= $1"));
        assert!(sql.contains("\"cte_0\".\"link\" IS NULL"));
    }

    #[test]
    fn test_containment_groups_with_threshold() {
        let (sql, _, ctes) = statement(
            &Predicate::contains_all("lines.sku", ["A", "B"]),
            Dialect::SqlServer,
        );
        validate_sql(&sql, Dialect::SqlServer).unwrap();
        assert_eq!(ctes, 1);
        assert!(sql.contains("GROUP BY"));
        assert!(sql.contains("HAVING COUNT(DISTINCT"));
        assert!(sql.contains(">= 2"));
        assert!(sql.contains("IN (@p0, @p1)"));
    }

    #[test]
    fn test_empty_in_list() {
        let empty: [i64; 0] = [];
        let (sql, _, _) = statement(&Predicate::is_in("status", empty), Dialect::PostgreSql);
        assert!(sql.contains("WHERE 1 = 0"));
        let (sql, _, _) = statement(&Predicate::not_in("status", empty), Dialect::PostgreSql);
        assert!(sql.contains("WHERE 1 = 1"));
    }

    #[test]
    fn test_null_comparisons() {
        let (sql, _, _) = statement(&Predicate::is_null("note"), Dialect::PostgreSql);
        assert!(sql.contains("\"note\" IS NULL"));
        let catalog = catalog();
        let order = catalog.instance("Order").unwrap();
        let mut scope = Scope::new(order, Dialect::PostgreSql);
        let mut ctx = RenderContext::new();
        let err = compile(
            &Predicate::gt("note", Value::Null),
            &mut scope,
            &mut ctx,
            JoinOrigin::Filter,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedOperator { .. }));
    }

    #[test]
    fn test_word_like() {
        let (sql, _, _) = statement(&Predicate::word_like("note", "rush"), Dialect::PostgreSql);
        validate_sql(&sql, Dialect::PostgreSql).unwrap();
        assert!(sql.contains("LIKE $4"));
        assert!(sql.contains(" OR "));
    }

    #[test]
    fn test_word_like_needs_text() {
        let catalog = catalog();
        let order = catalog.instance("Order").unwrap();
        let mut scope = Scope::new(order, Dialect::PostgreSql);
        let mut ctx = RenderContext::new();
        let err = render(
            &Predicate::compare("note", Operator::WordLike, Operand::Value(Value::Int(3)), Quantifier::Any),
            &mut scope,
            &mut ctx,
            JoinOrigin::Filter,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperand { .. }));
    }

    #[test]
    fn test_subquery_operand() {
        let catalog = catalog();
        let customer = catalog.instance("Customer").unwrap();
        let sq = SubQuery::new(customer, "id").filter(Predicate::like("name", "A%"));
        let (sql, _, _) = statement(&Predicate::in_subquery("customer_id", sq), Dialect::PostgreSql);
        validate_sql(&sql, Dialect::PostgreSql).unwrap();
        assert!(sql.contains("IN (SELECT"));
    }
}
