//! Integration tests for the end-to-end query file → SQL pipeline.
//!
//! Each test loads a TOML model, compiles a TOML query file against it and
//! checks the statements that come out.

mod common;

use std::fs;
use std::path::PathBuf;

use relquery::compile::{compile_file, compile_query, CompileError, CompileOptions, QueryFile};
use relquery::prelude::*;
use relquery::select::JsonMode;

const MODEL: &str = r#"
    [[entity]]
    name = "Order"
    table = "orders"
    schema = "sales"
    primary_key = "id"
    columns = [
        { member = "id" },
        { member = "status" },
        { member = "customer_id" },
        { member = "total", sql_type = "decimal(18,2)" },
    ]

    [[entity.relationships]]
    member = "lines"
    kind = "one_to_many"
    target = "OrderLine"
    right = "order_id"

    [[entity.relationships]]
    member = "customer"
    kind = "one_to_one"
    target = "Customer"
    left = "customer_id"

    [[entity.relationships]]
    member = "tags"
    kind = "many_to_many"
    target = "Tag"
    link = { table = "order_tags", left = "order_id", right = "tag_id" }

    [[entity]]
    name = "OrderLine"
    table = "order_lines"
    schema = "sales"
    primary_key = "id"
    columns = [
        { member = "id" },
        { member = "order_id" },
        { member = "sku" },
        { member = "qty", sql_type = "int" },
    ]

    [[entity]]
    name = "Customer"
    table = "customers"
    primary_key = "id"
    columns = [{ member = "id" }, { member = "name", column = "FullName" }, { member = "country" }]

    [[entity]]
    name = "Tag"
    table = "tags"
    primary_key = "id"
    columns = [{ member = "id" }, { member = "label" }]
"#;

fn catalog() -> Catalog {
    Catalog::from_toml_str(MODEL, &Settings::default()).unwrap()
}

fn options(dialect: Dialect) -> CompileOptions {
    CompileOptions::default()
        .with_dialect(dialect)
        .with_count(true)
}

/// A scratch file under the system temp directory, removed on drop.
struct ScratchFile(PathBuf);

impl ScratchFile {
    fn new(name: &str, content: &str) -> Self {
        let path = std::env::temp_dir().join(format!("relquery-{}-{}", std::process::id(), name));
        fs::write(&path, content).unwrap();
        Self(path)
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

// ============================================================================
// Basic Compilation Tests
// ============================================================================

#[test]
fn test_query_without_select_lists_every_column() {
    let output = compile_query(&catalog(), r#"entity = "Customer""#, &options(Dialect::SqlServer))
        .unwrap();

    let sql = &output.statement.sql;
    assert!(sql.contains(".[FullName] AS [c_"));
    assert!(sql.contains(".[country] AS [c_"));
    match &output.shape {
        OutputShape::Flat { columns } => {
            let keys: Vec<String> = columns.iter().map(|c| c.key.to_string()).collect();
            assert_eq!(keys, ["id", "name", "country"]);
        }
        other => panic!("expected flat output, got {:?}", other),
    }
    common::validate(sql, Dialect::SqlServer);
}

#[test]
fn test_schema_qualified_tables() {
    let output = compile_query(
        &catalog(),
        r#"
        entity = "Order"
        select = ["id", "customer.name"]
        "#,
        &options(Dialect::PostgreSql),
    )
    .unwrap();

    let sql = &output.statement.sql;
    assert!(sql.contains("FROM \"sales\".\"orders\" AS \"t_"));
    assert!(sql.contains("LEFT JOIN \"customers\" AS \"t_"));
    assert!(sql.contains(".\"FullName\" AS \"c_"));
    common::validate(sql, Dialect::PostgreSql);
}

#[test]
fn test_dialect_defaults_to_settings() {
    let settings = Settings::from_toml_str("[compiler]\ndialect = \"mysql\"").unwrap();
    let catalog = Catalog::from_toml_str(MODEL, &settings).unwrap();
    let options = CompileOptions::for_catalog(&catalog);
    assert_eq!(options.dialect, Dialect::MySql);

    let output = compile_query(&catalog, r#"entity = "Tag""#, &options).unwrap();
    assert_eq!(output.dialect, Dialect::MySql);
    assert!(output.statement.sql.contains("FROM `tags`"));
    assert!(output.count.is_none());
}

// ============================================================================
// Filters
// ============================================================================

#[test]
fn test_fanout_filter_keeps_row_count() {
    let source = r#"
        entity = "Order"
        select = ["id", "total"]

        [[filter]]
        path = "status"
        value = "open"

        [[filter]]
        path = "lines.sku"
        op = "like"
        value = "AB%"
    "#;

    for dialect in [Dialect::PostgreSql, Dialect::MySql, Dialect::SqlServer] {
        let output = compile_query(&catalog(), source, &options(dialect)).unwrap();
        let sql = &output.statement.sql;
        assert_eq!(common::cte_count(sql), 1);
        assert!(sql.starts_with("WITH"));
        common::validate(sql, dialect);

        let count = output.count.unwrap();
        assert_eq!(count.params, output.statement.params);
        assert!(count.sql.contains("COUNT(*)"));
        common::validate(&count.sql, dialect);
    }
}

#[test]
fn test_all_quantifier_from_file() {
    let output = compile_query(
        &catalog(),
        r#"
        entity = "Order"
        select = ["id"]

        [[filter]]
        path = "lines.qty"
        op = ">="
        value = 1
        quantifier = "all"
        "#,
        &options(Dialect::PostgreSql),
    )
    .unwrap();

    let sql = &output.statement.sql;
    assert!(sql.contains("< $1"));
    assert!(sql.contains("IS NULL"));
    assert_eq!(output.statement.params[0].sql_type.as_deref(), Some("int"));
    common::validate(sql, Dialect::PostgreSql);
}

#[test]
fn test_related_filter_with_nested_conditions() {
    let output = compile_query(
        &catalog(),
        r#"
        entity = "Order"
        select = ["id"]

        [[filter]]
        related = "lines"
        filter = [
            { path = "sku", value = "X" },
            { path = "qty", op = ">", value = 5 },
        ]
        "#,
        &options(Dialect::PostgreSql),
    )
    .unwrap();

    // Both conditions must hold on the same line.
    let sql = &output.statement.sql;
    assert_eq!(common::cte_count(sql), 1);
    assert_eq!(output.statement.params.len(), 2);
    common::validate(sql, Dialect::PostgreSql);
}

#[test]
fn test_tag_containment_from_file() {
    let output = compile_query(
        &catalog(),
        r#"
        entity = "Order"
        select = ["id"]

        [[filter]]
        path = "tags.label"
        values = ["urgent", "vip"]
        quantifier = "all"
        "#,
        &options(Dialect::MySql),
    )
    .unwrap();

    let sql = &output.statement.sql;
    assert!(sql.contains("INNER JOIN `order_tags`"));
    assert!(sql.contains("HAVING COUNT(DISTINCT"));
    common::validate(sql, Dialect::MySql);
}

#[test]
fn test_comparison_without_value_is_null_check() {
    let output = compile_query(
        &catalog(),
        r#"
        entity = "Order"
        select = ["id"]

        [[filter]]
        path = "customer_id"
        not = true
        "#,
        &options(Dialect::SqlServer),
    )
    .unwrap();
    assert!(output.statement.sql.contains(".[customer_id] IS NOT NULL"));
    assert!(output.statement.params.is_empty());
}

// ============================================================================
// Ordering, paging and shaping
// ============================================================================

#[test]
fn test_order_and_limit_from_file() {
    let output = compile_query(
        &catalog(),
        r#"
        entity = "Order"
        select = ["id", "total"]
        order = [{ path = "total", dir = "desc" }, { path = "id" }]
        limit = { limit = 50, offset = 100 }
        "#,
        &options(Dialect::SqlServer),
    )
    .unwrap();

    let sql = &output.statement.sql;
    assert!(sql.contains(".[total] DESC, [t_"));
    assert!(sql.ends_with("OFFSET 100 ROWS FETCH NEXT 50 ROWS ONLY"));
    let count = output.count.unwrap();
    assert!(!count.sql.contains("ORDER BY"));
    assert!(!count.sql.contains("FETCH"));
    common::validate(sql, Dialect::SqlServer);
}

#[test]
fn test_include_on_sql_server_aggregates_json() {
    let output = compile_query(
        &catalog(),
        r#"
        entity = "Order"
        select = ["id", "customer.name"]
        include = ["lines", "tags"]
        "#,
        &options(Dialect::SqlServer),
    )
    .unwrap();

    let sql = &output.statement.sql;
    assert!(sql.contains("AS [lines]"));
    assert!(sql.contains("AS [tags]"));
    assert!(sql.contains("AS [customer.name]"));
    assert!(sql.ends_with("FOR JSON PATH, INCLUDE_NULL_VALUES"));
    match &output.shape {
        OutputShape::Json { mode, .. } => assert_eq!(*mode, JsonMode::Aggregate),
        other => panic!("expected JSON output, got {:?}", other),
    }
}

#[test]
fn test_include_on_postgres_returns_row_per_row() {
    let output = compile_query(
        &catalog(),
        r#"
        entity = "Order"
        select = ["id"]
        include = ["lines"]
        "#,
        &options(Dialect::PostgreSql),
    )
    .unwrap();

    match &output.shape {
        OutputShape::Json { column, mode } => {
            assert_eq!(column, "json");
            assert_eq!(*mode, JsonMode::RowPerRow);
        }
        other => panic!("expected JSON output, got {:?}", other),
    }
    assert!(output.statement.sql.contains("AS \"json\""));
    common::validate(&output.statement.sql, Dialect::PostgreSql);
}

#[test]
fn test_distinct_override_from_file() {
    let output = compile_query(
        &catalog(),
        r#"
        entity = "Order"
        select = ["status"]
        distinct = true
        "#,
        &options(Dialect::PostgreSql),
    )
    .unwrap();
    assert!(output.statement.sql.starts_with("SELECT DISTINCT"));
    assert!(output.count.unwrap().sql.contains("AS \"counted\""));
}

// ============================================================================
// Files and errors
// ============================================================================

#[test]
fn test_compile_file_and_model_file() {
    let model = ScratchFile::new("model.toml", MODEL);
    let query = ScratchFile::new(
        "query.toml",
        r#"
        entity = "Customer"
        select = ["name"]
        top = 10
        "#,
    );

    let catalog = Catalog::from_path(&model.0, &Settings::default()).unwrap();
    let output = compile_file(&catalog, &query.0, &options(Dialect::SqlServer)).unwrap();
    assert!(output.statement.sql.starts_with("SELECT TOP 10"));
}

#[test]
fn test_missing_query_file() {
    let path = std::env::temp_dir().join("relquery-does-not-exist.toml");
    let err = compile_file(&catalog(), &path, &options(Dialect::PostgreSql)).unwrap_err();
    match err {
        CompileError::Io { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_query_errors_keep_their_kind() {
    let catalog = catalog();
    let cases = [
        (r#"entity = "Invoice""#, ErrorKind::Configuration),
        (
            "entity = \"Order\"\nselect = [\"lines.nope\"]",
            ErrorKind::PathResolution,
        ),
        (
            "entity = \"Order\"\n[[filter]]\npath = \"status\"\nvalues = [\"a\", \"b\"]\nquantifier = \"all\"",
            ErrorKind::Compilation,
        ),
    ];

    for (source, kind) in cases {
        match compile_query(&catalog, source, &options(Dialect::PostgreSql)) {
            Err(CompileError::Query(e)) => assert_eq!(e.kind(), kind, "{}", source),
            other => panic!("unexpected result for {}: {:?}", source, other.map(|o| o.statement)),
        }
    }
}

#[test]
fn test_query_file_parses_without_catalog() {
    let file = QueryFile::from_toml_str(
        r#"
        entity = "Order"
        select = ["customer.name"]
        order = [{ path = "id", dir = "asc" }]
        page = { page = 1, size = 20 }
        "#,
    )
    .unwrap();
    assert_eq!(file.entity, "Order");
    assert_eq!(file.select, vec![Path::parse("customer.name")]);
    assert_eq!(file.order[0].dir, SortDir::Asc);
    assert_eq!(file.page.map(|p| p.size), Some(20));

    let query = file.build(&catalog()).unwrap();
    assert_eq!(query.nodes().len(), 1);
}
