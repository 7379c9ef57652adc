//! Shared fixture for integration tests: a small order model.
//!
//! ```text
//! Customer 1──N Order 1──N OrderLine
//!                 │
//!                 N──N Tag (via order_tags)
//! ```

#![allow(dead_code)]

use relquery::prelude::*;
use sqlparser::dialect::{MsSqlDialect, MySqlDialect, PostgreSqlDialect};
use sqlparser::parser::Parser;

pub fn catalog() -> Catalog {
    CatalogBuilder::new()
        .entity(
            EntityDef::new("Order", "orders")
                .primary_key("id")
                .column("status")
                .column("customer_id")
                .typed_column("total", "decimal(18,2)")
                .relationship(RelationshipDef::one_to_many("lines", "OrderLine").right("order_id"))
                .relationship(RelationshipDef::one_to_one("customer", "Customer").left("customer_id"))
                .relationship(
                    RelationshipDef::many_to_many("tags", "Tag")
                        .link(LinkDef::new("order_tags", "order_id", "tag_id")),
                ),
        )
        .entity(
            EntityDef::new("OrderLine", "order_lines")
                .primary_key("id")
                .column("order_id")
                .column("sku")
                .typed_column("qty", "int")
                .column("min_qty"),
        )
        .entity(
            EntityDef::new("Customer", "customers")
                .primary_key("id")
                .column("name")
                .column("country")
                .relationship(RelationshipDef::one_to_many("orders", "Order").right("customer_id")),
        )
        .entity(EntityDef::new("Tag", "tags").primary_key("id").column("label"))
        .build(&Settings::default())
        .expect("fixture model is valid")
}

/// Check that `sql` parses for `dialect`.
pub fn validate(sql: &str, dialect: Dialect) {
    let parser: Box<dyn sqlparser::dialect::Dialect> = match dialect {
        Dialect::PostgreSql => Box::new(PostgreSqlDialect {}),
        Dialect::MySql => Box::new(MySqlDialect {}),
        Dialect::SqlServer => Box::new(MsSqlDialect {}),
    };
    if let Err(e) = Parser::parse_sql(&*parser, sql) {
        panic!("invalid SQL for {}: {}\n{}", dialect, e, sql);
    }
}

/// Number of CTEs in the WITH clause of `sql`.
pub fn cte_count(sql: &str) -> usize {
    sql.matches(" AS (\n").count()
}
