//! Result shaping per dialect.
//!
//! PostgreSQL and MySQL build one JSON object per row inline; nested
//! relationships become correlated sub-selects aggregating child objects
//! into an array. SQL Server has no inline builders: columns carry dotted
//! aliases and the statement ends in `FOR JSON PATH`, which nests them.

use super::compile::Assembled;
use super::{JsonMode, OutputColumn, OutputShape};
use crate::sql::{
    coalesce, func, lit_str, table_col, Dialect, Expr, ExprExt, ForJson, JsonFunctions, Query,
    SelectExpr, SqlDialect,
};

/// Column holding the per-row JSON document.
pub(super) const JSON_COLUMN: &str = "json";

/// Column name SQL Server gives to `FOR JSON` output.
pub(super) const FOR_JSON_COLUMN: &str = "JSON_F52E2B61-18A1-11d1-B105-00805F49916B";

/// Select list, optional FOR JSON clause and output shape of the top level.
pub(super) fn top_level(
    assembled: &Assembled,
    dialect: Dialect,
) -> (Vec<SelectExpr>, Option<ForJson>, OutputShape) {
    if assembled.nested.is_empty() {
        let select = assembled
            .items
            .iter()
            .map(|item| item.expr.clone().alias(&item.alias))
            .collect();
        let columns = assembled
            .items
            .iter()
            .map(|item| OutputColumn {
                alias: item.alias.clone(),
                key: item.key.clone(),
            })
            .collect();
        return (select, None, OutputShape::Flat { columns });
    }

    match dialect.json_functions() {
        Some(functions) => (
            vec![json_object(assembled, &functions).alias(JSON_COLUMN)],
            None,
            OutputShape::Json {
                column: JSON_COLUMN.into(),
                mode: JsonMode::RowPerRow,
            },
        ),
        None => (
            path_aliased(assembled),
            Some(ForJson {
                without_array_wrapper: false,
                include_null_values: true,
            }),
            OutputShape::Json {
                column: FOR_JSON_COLUMN.into(),
                mode: JsonMode::Aggregate,
            },
        ),
    }
}

/// Correlated sub-select producing the JSON of a nested level: an array for
/// one-to-many, a single object (or NULL) for one-to-one.
pub(super) fn nested(child: &Assembled, to_one: bool, dialect: Dialect) -> Expr {
    match dialect.json_functions() {
        Some(functions) => {
            let mut query = child.query(vec![json_object(child, &functions).alias(JSON_COLUMN)]);
            if to_one {
                if child.paging.is_none() {
                    query = query.top(1);
                }
                return Expr::Subquery(Box::new(query));
            }
            let rows = Query::new()
                .select(vec![func(functions.array_agg, vec![table_col("s", JSON_COLUMN)])])
                .from_derived(query, "s");
            coalesce(vec![
                Expr::Subquery(Box::new(rows)),
                func(functions.array, Vec::new()),
            ])
        }
        None => {
            let mut query = child.query(path_aliased(child)).for_json(ForJson {
                without_array_wrapper: to_one,
                include_null_values: true,
            });
            if to_one && child.paging.is_none() {
                query = query.top(1);
            }
            let document = Expr::Subquery(Box::new(query));
            if to_one {
                func("JSON_QUERY", vec![document])
            } else {
                func("JSON_QUERY", vec![coalesce(vec![document, lit_str("[]")])])
            }
        }
    }
}

/// Flat items and nested documents aliased by their dotted member path.
fn path_aliased(assembled: &Assembled) -> Vec<SelectExpr> {
    assembled
        .items
        .iter()
        .map(|item| (&item.key, &item.expr))
        .chain(assembled.nested.iter().map(|n| (&n.key, &n.expr)))
        .map(|(key, expr)| expr.clone().alias(&key.to_string()))
        .collect()
}

/// JSON object of every item and nested document, nesting keys by path
/// segment.
fn json_object(assembled: &Assembled, functions: &JsonFunctions) -> Expr {
    let entries: Vec<(&[String], &Expr)> = assembled
        .items
        .iter()
        .map(|item| (item.key.segments(), &item.expr))
        .chain(
            assembled
                .nested
                .iter()
                .map(|n| (n.key.segments(), &n.expr)),
        )
        .collect();
    build_object(&entries, functions)
}

fn build_object(entries: &[(&[String], &Expr)], functions: &JsonFunctions) -> Expr {
    let mut args = Vec::new();
    let mut done: Vec<&str> = Vec::new();

    for (key, expr) in entries {
        let Some((head, tail)) = key.split_first() else {
            continue;
        };
        if tail.is_empty() {
            args.push(lit_str(head));
            args.push((*expr).clone());
            continue;
        }
        if done.contains(&head.as_str()) {
            continue;
        }
        done.push(head);

        let children: Vec<(&[String], &Expr)> = entries
            .iter()
            .filter_map(|(k, e)| match k.split_first() {
                Some((h, t)) if h == head && !t.is_empty() => Some((t, *e)),
                _ => None,
            })
            .collect();
        args.push(lit_str(head));
        args.push(build_object(&children, functions));
    }

    func(functions.object, args)
}
