//! SELECT compilation: flattening, nesting, grouping, ordering, paging and
//! count derivation.

mod common;

use std::collections::HashSet;

use relquery::prelude::*;
use relquery::select::{JsonMode, OutputColumn, SelectNode};

fn flat_columns(compiled: &CompiledQuery) -> Vec<OutputColumn> {
    match compiled.shape() {
        OutputShape::Flat { columns } => columns.clone(),
        other => panic!("expected flat output, got {:?}", other),
    }
}

/// The outermost WHERE line of a rendered statement. CTE bodies come first.
fn where_line(sql: &str) -> &str {
    sql.lines()
        .rev()
        .find(|line| line.starts_with("WHERE "))
        .unwrap_or_default()
}

/// The GROUP BY line of a rendered statement.
fn group_by_line(sql: &str) -> &str {
    sql.lines()
        .find(|line| line.starts_with("GROUP BY "))
        .unwrap_or_default()
}

// ============================================================================
// Flat selection
// ============================================================================

#[test]
fn test_output_aliases_are_unique() {
    let catalog = common::catalog();
    let compiled = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .select("customer.id")
        .unwrap()
        .select("customer.name")
        .unwrap()
        .compile(Dialect::PostgreSql)
        .unwrap();

    let columns = flat_columns(&compiled);
    let aliases: HashSet<&str> = columns.iter().map(|c| c.alias.as_str()).collect();
    assert_eq!(aliases.len(), 3);
    assert_eq!(
        columns.iter().map(|c| c.key.to_string()).collect::<Vec<_>>(),
        vec!["id", "customer.id", "customer.name"]
    );

    let sql = compiled.statement().sql;
    assert_eq!(sql.matches("LEFT JOIN \"customers\"").count(), 1);
    common::validate(&sql, Dialect::PostgreSql);
}

#[test]
fn test_select_as_uses_alias() {
    let catalog = common::catalog();
    let compiled = catalog
        .query("Order")
        .unwrap()
        .select_as("customer.name", "customer_name")
        .unwrap()
        .compile(Dialect::MySql)
        .unwrap();

    let columns = flat_columns(&compiled);
    assert_eq!(columns[0].alias, "customer_name");
    assert!(compiled.statement().sql.contains("AS `customer_name`"));
}

#[test]
fn test_select_all_walks_one_to_one_only() {
    let catalog = common::catalog();
    let query = catalog.query("Order").unwrap().select_all();

    let paths: Vec<String> = query
        .nodes()
        .iter()
        .filter_map(|n| match n {
            SelectNode::Column { path, .. } => Some(path.to_string()),
            _ => None,
        })
        .collect();
    assert!(paths.contains(&"status".to_string()));
    assert!(paths.contains(&"customer.name".to_string()));
    assert!(!paths.iter().any(|p| p.starts_with("lines")));
    assert!(!paths.iter().any(|p| p.starts_with("tags")));
}

#[test]
fn test_zero_eager_depth_stays_on_root() {
    let catalog = common::catalog();
    let query = catalog.query("Order").unwrap().eager_depth(0).select_all();
    assert!(query.nodes().iter().all(|n| match n {
        SelectNode::Column { path, .. } => path.len() == 1,
        _ => false,
    }));
}

// ============================================================================
// Nested relationships
// ============================================================================

#[test]
fn test_include_one_to_many_postgres() {
    let catalog = common::catalog();
    let compiled = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .include("lines")
        .unwrap()
        .compile(Dialect::PostgreSql)
        .unwrap();

    assert_eq!(
        compiled.shape(),
        &OutputShape::Json {
            column: "json".into(),
            mode: JsonMode::RowPerRow
        }
    );
    let sql = compiled.statement().sql;
    assert!(sql.contains("COALESCE((SELECT"));
    assert!(sql.contains("JSONB_AGG(\"s\".\"json\")"));
    assert!(sql.contains("JSONB_BUILD_ARRAY()"));
    assert!(!sql.contains("LEFT JOIN \"order_lines\""));
    common::validate(&sql, Dialect::PostgreSql);
}

#[test]
fn test_include_one_to_many_mysql() {
    let catalog = common::catalog();
    let sql = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .include("lines")
        .unwrap()
        .compile(Dialect::MySql)
        .unwrap()
        .statement()
        .sql;
    assert!(sql.contains("JSON_ARRAYAGG("));
    assert!(sql.contains("JSON_ARRAY()"));
    assert!(sql.contains("JSON_OBJECT('id'"));
}

#[test]
fn test_include_one_to_many_sql_server() {
    let catalog = common::catalog();
    let compiled = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .include("lines")
        .unwrap()
        .compile(Dialect::SqlServer)
        .unwrap();

    assert!(matches!(
        compiled.shape(),
        OutputShape::Json {
            mode: JsonMode::Aggregate,
            ..
        }
    ));
    let sql = compiled.statement().sql;
    assert!(sql.contains("JSON_QUERY(COALESCE((SELECT"));
    assert!(sql.contains("AS [lines]"));
    assert!(sql.ends_with("FOR JSON PATH, INCLUDE_NULL_VALUES"));
}

#[test]
fn test_include_one_to_one_is_single_object() {
    let catalog = common::catalog();
    let query = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .include("customer")
        .unwrap();

    let pg = query.compile(Dialect::PostgreSql).unwrap().statement().sql;
    assert!(pg.contains("LIMIT 1"));
    assert!(!pg.contains("JSONB_AGG"));

    let tsql = query.compile(Dialect::SqlServer).unwrap().statement().sql;
    assert!(tsql.contains("SELECT TOP 1"));
    assert!(tsql.contains("WITHOUT_ARRAY_WRAPPER"));
}

#[test]
fn test_included_relationship_absorbs_selected_members() {
    let catalog = common::catalog();
    let query = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .select("customer.name")
        .unwrap()
        .include("customer")
        .unwrap();

    assert_eq!(query.nodes().len(), 2);
    match &query.nodes()[1] {
        SelectNode::Nested { path, query, .. } => {
            assert_eq!(path.to_string(), "customer");
            let members: Vec<String> = query
                .nodes()
                .iter()
                .filter_map(|n| match n {
                    SelectNode::Column { path, .. } => Some(path.to_string()),
                    _ => None,
                })
                .collect();
            assert_eq!(members, vec!["name", "id", "country"]);
        }
        other => panic!("expected nested node, got {:?}", other),
    }

    let pg = query.compile(Dialect::PostgreSql).unwrap().statement().sql;
    assert_eq!(pg.matches("'customer'").count(), 1, "{}", pg);
    common::validate(&pg, Dialect::PostgreSql);

    let tsql = query.compile(Dialect::SqlServer).unwrap().statement().sql;
    assert_eq!(tsql.matches("AS [customer]").count(), 1, "{}", tsql);
    assert!(!tsql.contains("[customer.name]"));
}

#[test]
fn test_members_selected_after_include_join_its_document() {
    let catalog = common::catalog();
    let query = catalog
        .query("Order")
        .unwrap()
        .include("customer")
        .unwrap()
        .select("customer.name")
        .unwrap()
        .order_by("customer.name", SortDir::Asc)
        .unwrap();

    assert_eq!(query.nodes().len(), 1);
    let sql = query.compile(Dialect::MySql).unwrap().statement().sql;
    assert_eq!(sql.matches("'customer'").count(), 1, "{}", sql);
    assert!(sql.contains("ORDER BY "));
    common::validate(&sql, Dialect::MySql);
}

#[test]
fn test_conflicting_json_keys_rejected() {
    let catalog = common::catalog();
    let err = catalog
        .query("Order")
        .unwrap()
        .include("customer")
        .unwrap()
        .function("UPPER", vec![FunctionArg::column("status")], "customer")
        .unwrap()
        .compile(Dialect::PostgreSql)
        .unwrap_err();
    assert_eq!(
        err,
        QueryError::ConflictingOutputKey {
            key: "customer".into(),
            other: "customer".into(),
        }
    );
    assert_eq!(err.kind(), ErrorKind::Compilation);
}

#[test]
fn test_select_through_many_nests() {
    let catalog = common::catalog();
    let query = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .select("lines.sku")
        .unwrap();

    match &query.nodes()[1] {
        SelectNode::Nested { path, query, .. } => {
            assert_eq!(path.to_string(), "lines");
            assert_eq!(query.nodes().len(), 1);
        }
        other => panic!("expected nested node, got {:?}", other),
    }
}

#[test]
fn test_nested_query_customization() {
    let catalog = common::catalog();
    let statement = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .nested("lines", |lines| {
            lines
                .select("sku")?
                .filter(Predicate::gt("qty", 1))?
                .order_by("qty", SortDir::Desc)
        })
        .unwrap()
        .compile(Dialect::PostgreSql)
        .unwrap()
        .statement();

    assert_eq!(statement.params.len(), 1);
    assert!(statement.sql.contains("\"qty\" > $1"));
    assert!(statement.sql.contains("\"qty\" DESC"));
}

#[test]
fn test_nested_many_to_many() {
    let catalog = common::catalog();
    let sql = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .include("tags")
        .unwrap()
        .compile(Dialect::PostgreSql)
        .unwrap()
        .statement()
        .sql;
    assert!(sql.contains("INNER JOIN \"order_tags\""));
    common::validate(&sql, Dialect::PostgreSql);
}

// ============================================================================
// Grouping and functions
// ============================================================================

#[test]
fn test_aggregate_groups_by_keys() {
    let catalog = common::catalog();
    let compiled = catalog
        .query("Order")
        .unwrap()
        .select("status")
        .unwrap()
        .aggregate("COUNT", vec![FunctionArg::Star], "orders")
        .unwrap()
        .compile(Dialect::PostgreSql)
        .unwrap();

    let sql = compiled.statement().sql;
    assert!(sql.contains("COUNT(*) AS \"orders\""));
    assert!(sql.contains("\nGROUP BY "));
    assert!(compiled.count_statement().sql.contains("AS \"counted\""));
    common::validate(&sql, Dialect::PostgreSql);
}

#[test]
fn test_aggregate_only_has_no_group_by() {
    let catalog = common::catalog();
    let sql = catalog
        .query("Order")
        .unwrap()
        .aggregate("SUM", vec![FunctionArg::column("total")], "total")
        .unwrap()
        .compile(Dialect::MySql)
        .unwrap()
        .statement()
        .sql;
    assert!(sql.contains("SUM("));
    assert!(!sql.contains("GROUP BY"));
}

#[test]
fn test_aggregate_through_many_joins_directly() {
    let catalog = common::catalog();
    let sql = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .aggregate("SUM", vec![FunctionArg::column("lines.qty")], "qty")
        .unwrap()
        .compile(Dialect::PostgreSql)
        .unwrap()
        .statement()
        .sql;
    assert!(sql.contains("LEFT JOIN \"order_lines\""));
    assert!(sql.contains("GROUP BY"));
    assert!(!sql.contains("SELECT DISTINCT"));
}

#[test]
fn test_scalar_function_through_many_is_distinct() {
    let catalog = common::catalog();
    let query = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .function("UPPER", vec![FunctionArg::column("lines.sku")], "sku")
        .unwrap();

    assert!(query
        .compile(Dialect::PostgreSql)
        .unwrap()
        .statement()
        .sql
        .starts_with("SELECT DISTINCT"));
    assert!(!query
        .distinct(false)
        .compile(Dialect::PostgreSql)
        .unwrap()
        .statement()
        .sql
        .contains("DISTINCT"));
}

#[test]
fn test_multi_argument_distinct_needs_dialect_support() {
    let catalog = common::catalog();
    let query = catalog
        .query("Order")
        .unwrap()
        .aggregate_distinct(
            "COUNT",
            vec![FunctionArg::column("status"), FunctionArg::column("customer_id")],
            "pairs",
        )
        .unwrap();

    let err = query.compile(Dialect::PostgreSql).unwrap_err();
    assert!(matches!(
        err,
        QueryError::NotSupported {
            dialect: Dialect::PostgreSql,
            ..
        }
    ));
    assert!(query
        .compile(Dialect::MySql)
        .unwrap()
        .statement()
        .sql
        .contains("COUNT(DISTINCT "));
}

#[test]
fn test_case_node() {
    let catalog = common::catalog();
    let statement = catalog
        .query("Order")
        .unwrap()
        .case(
            vec![(Predicate::eq("status", "open"), Value::from(1))],
            Some(Value::from(0)),
            "is_open",
        )
        .unwrap()
        .compile(Dialect::PostgreSql)
        .unwrap()
        .statement();
    assert!(statement.sql.contains("CASE WHEN "));
    assert!(statement.sql.contains(" ELSE $3 END AS \"is_open\""));
    assert_eq!(statement.params.len(), 3);
}

#[test]
fn test_case_with_aggregate_groups_by_columns_sql_server() {
    let catalog = common::catalog();
    let statement = catalog
        .query("Order")
        .unwrap()
        .case(
            vec![(Predicate::gt("total", 100), Value::from("big"))],
            Some(Value::from("small")),
            "size",
        )
        .unwrap()
        .aggregate("COUNT", vec![FunctionArg::Star], "orders")
        .unwrap()
        .compile(Dialect::SqlServer)
        .unwrap()
        .statement();

    let group_by = group_by_line(&statement.sql);
    assert!(group_by.contains("[total]"), "{}", statement.sql);
    assert!(!group_by.contains("@p"), "{}", statement.sql);
    assert!(!group_by.contains("CASE"));
    assert_eq!(statement.params.len(), 3);
    common::validate(&statement.sql, Dialect::SqlServer);
}

#[test]
fn test_function_with_value_arg_groups_by_columns_postgres() {
    let catalog = common::catalog();
    let compiled = catalog
        .query("Order")
        .unwrap()
        .function(
            "COALESCE",
            vec![FunctionArg::column("status"), FunctionArg::Value(Value::from("none"))],
            "status",
        )
        .unwrap()
        .aggregate("COUNT", vec![FunctionArg::Star], "orders")
        .unwrap()
        .compile(Dialect::PostgreSql)
        .unwrap();

    let statement = compiled.statement();
    let group_by = group_by_line(&statement.sql);
    assert!(group_by.contains("\"status\""), "{}", statement.sql);
    assert!(!group_by.contains('$'), "{}", statement.sql);
    assert_eq!(statement.params.len(), 1);
    common::validate(&statement.sql, Dialect::PostgreSql);

    let count = compiled.count_statement();
    assert!(!group_by_line(&count.sql).contains('$'));
    assert_eq!(count.params.len(), 1);
}

// ============================================================================
// Ordering and paging
// ============================================================================

#[test]
fn test_order_through_many_uses_correlated_min() {
    let catalog = common::catalog();
    let sql = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .order_by("lines.qty", SortDir::Asc)
        .unwrap()
        .compile(Dialect::PostgreSql)
        .unwrap()
        .statement()
        .sql;

    assert!(sql.contains("ORDER BY (SELECT"));
    assert!(sql.contains("MIN("));
    assert!(!sql.contains("GROUP BY"));
    assert!(!sql.contains("LEFT JOIN \"order_lines\""));
    common::validate(&sql, Dialect::PostgreSql);
}

#[test]
fn test_descending_order_through_many_uses_max() {
    let catalog = common::catalog();
    let sql = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .order_by("lines.qty", SortDir::Desc)
        .unwrap()
        .compile(Dialect::MySql)
        .unwrap()
        .statement()
        .sql;
    assert!(sql.contains("MAX("));
    assert!(sql.ends_with(") DESC"));
}

#[test]
fn test_page_without_order_uses_primary_key() {
    let catalog = common::catalog();
    let order = catalog.table("Order").unwrap();
    let query = catalog
        .query("Order")
        .unwrap()
        .select("status")
        .unwrap()
        .page(2, 10)
        .unwrap();

    let pg = query.compile(Dialect::PostgreSql).unwrap().statement().sql;
    assert!(pg.contains(&format!("ORDER BY \"{}\".\"id\" ASC", order.alias())));
    assert!(pg.ends_with("LIMIT 10 OFFSET 10"));

    let tsql = query.compile(Dialect::SqlServer).unwrap().statement().sql;
    assert!(tsql.contains(&format!("ORDER BY [{}].[id] ASC", order.alias())));
    assert!(tsql.ends_with("OFFSET 10 ROWS FETCH NEXT 10 ROWS ONLY"));
    common::validate(&tsql, Dialect::SqlServer);
}

#[test]
fn test_top() {
    let catalog = common::catalog();
    let query = catalog.query("Order").unwrap().select("id").unwrap().top(5).unwrap();

    assert!(query
        .compile(Dialect::SqlServer)
        .unwrap()
        .statement()
        .sql
        .starts_with("SELECT TOP 5"));
    assert!(query
        .compile(Dialect::PostgreSql)
        .unwrap()
        .statement()
        .sql
        .ends_with("LIMIT 5"));
}

#[test]
fn test_invalid_paging_rejected() {
    let catalog = common::catalog();
    let query = catalog.query("Order").unwrap();
    assert!(matches!(
        query.clone().page(0, 10).unwrap_err(),
        QueryError::InvalidPaging(_)
    ));
    assert!(query.clone().top(0).is_err());
    assert!(query.limit(0, 5).is_err());
}

#[test]
fn test_distinct_keeps_order_columns_in_select() {
    let catalog = common::catalog();
    let sql = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .order_by("customer.name", SortDir::Asc)
        .unwrap()
        .distinct(true)
        .compile(Dialect::PostgreSql)
        .unwrap()
        .statement()
        .sql;
    assert!(sql.starts_with("SELECT DISTINCT"));
    assert!(sql.contains("LEFT JOIN \"customers\""));
    common::validate(&sql, Dialect::PostgreSql);
}

#[test]
fn test_distinct_orders_hidden_columns_by_alias() {
    let catalog = common::catalog();
    let sql = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .order_by("lines.qty", SortDir::Desc)
        .unwrap()
        .distinct(true)
        .compile(Dialect::PostgreSql)
        .unwrap()
        .statement()
        .sql;
    assert!(sql.contains("AS \"o0\""), "{}", sql);
    assert!(sql.contains("ORDER BY \"o0\" DESC"), "{}", sql);
    assert_eq!(sql.matches("MAX(").count(), 1);
    common::validate(&sql, Dialect::PostgreSql);
}

// ============================================================================
// Count statements
// ============================================================================

#[test]
fn test_count_shares_filter() {
    let catalog = common::catalog();
    let compiled = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .select("customer.name")
        .unwrap()
        .filter(Predicate::and(vec![
            Predicate::eq("status", "open"),
            Predicate::gt("lines.qty", 10),
        ]))
        .unwrap()
        .page(3, 25)
        .unwrap()
        .compile(Dialect::PostgreSql)
        .unwrap();

    let data = compiled.statement();
    let count = compiled.count_statement();

    assert_eq!(data.params, count.params);
    assert_eq!(where_line(&data.sql), where_line(&count.sql));
    assert!(!where_line(&count.sql).is_empty());
    assert!(count.sql.starts_with("WITH \"cte_0\""));
    assert!(count.sql.contains("COUNT(*) AS \"count\""));
    // Joins needed only by the select list and paging are dropped.
    assert!(!count.sql.contains("\"customers\""));
    assert!(!count.sql.contains("ORDER BY"));
    assert!(!count.sql.contains("LIMIT"));
    common::validate(&count.sql, Dialect::PostgreSql);
}

#[test]
fn test_count_of_distinct_query_uses_derived_table() {
    let catalog = common::catalog();
    let count = catalog
        .query("Order")
        .unwrap()
        .select("id")
        .unwrap()
        .function("UPPER", vec![FunctionArg::column("lines.sku")], "sku")
        .unwrap()
        .compile(Dialect::SqlServer)
        .unwrap()
        .count_statement();

    assert!(count.sql.contains("FROM (SELECT DISTINCT"));
    assert!(count.sql.contains("AS [counted]"));
    common::validate(&count.sql, Dialect::SqlServer);
}
