//! Table graph: tables, columns and the relationships between them.
//!
//! A graph is rooted at one entity. Child tables are reached through
//! relationships and built lazily the first time a relationship set is
//! requested. Every table carries a structural identity (`uuid`):
//!
//! - a root gets a random UUID per instance
//! - a child derives its UUID from its parent's UUID, the source entity,
//!   the relationship member and the table name
//!
//! so two paths that reach the same relationship agree on identity while
//! two independent roots of the same entity never do. Aliases used in SQL
//! are derived from these identities.

mod catalog;
mod path;

pub use catalog::{
    Catalog, CatalogBuilder, ColumnDef, EntityDef, JoinConditionDef, LinkDef, RelationshipDef,
};
pub use path::{
    is_child_of, is_same_or_also_under_same_parent, is_same_or_child_of, Path, Resolution,
};

pub(crate) use catalog::{EntityModel, Registry, RelationshipModel};

use std::fmt;
use std::sync::{Arc, Weak};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cache::{derive_uuid, digest, short_hex};
use crate::sql::{combine, param, table_col, BinaryOperator, Expr, ExprExt, TableRef};
use crate::value::Value;

// ============================================================================
// Relationship kind
// ============================================================================

/// Cardinality of a relationship, seen from the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    OneToOne,
    OneToMany,
    ManyToMany,
}

impl RelationshipKind {
    /// Returns true if joining this relationship can multiply parent rows.
    pub fn causes_fanout(&self) -> bool {
        matches!(self, RelationshipKind::OneToMany | RelationshipKind::ManyToMany)
    }
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelationshipKind::OneToOne => write!(f, "1:1"),
            RelationshipKind::OneToMany => write!(f, "1:N"),
            RelationshipKind::ManyToMany => write!(f, "N:N"),
        }
    }
}

// ============================================================================
// Column
// ============================================================================

/// A column of a specific table instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    member: String,
    name: String,
    alias: String,
    sql_type: Option<String>,
}

impl Column {
    fn new(table_uuid: Uuid, member: &str, name: &str, sql_type: Option<&str>) -> Self {
        let hash = digest(&[table_uuid.as_bytes(), name.as_bytes()]);
        Self {
            member: member.into(),
            name: name.into(),
            alias: format!("c_{}", short_hex(&hash, 16)),
            sql_type: sql_type.map(Into::into),
        }
    }

    /// Member name on the entity.
    pub fn member(&self) -> &str {
        &self.member
    }

    /// Column name in the database.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique output alias.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn sql_type(&self) -> Option<&str> {
        self.sql_type.as_deref()
    }
}

// ============================================================================
// Table
// ============================================================================

/// One table instance in a graph.
pub struct Table {
    model: Arc<EntityModel>,
    registry: Arc<Registry>,
    default_schema: Option<String>,
    uuid: Uuid,
    alias: String,
    columns: Vec<Column>,
    parent: Option<Weak<Relationship>>,
    relationships: OnceCell<Vec<Arc<Relationship>>>,
}

impl Table {
    /// A new root with a fresh identity.
    pub(crate) fn root(
        model: Arc<EntityModel>,
        registry: Arc<Registry>,
        default_schema: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self::build(
            model,
            registry,
            default_schema,
            Uuid::new_v4(),
            None,
        ))
    }

    fn build(
        model: Arc<EntityModel>,
        registry: Arc<Registry>,
        default_schema: Option<String>,
        uuid: Uuid,
        parent: Option<Weak<Relationship>>,
    ) -> Self {
        let columns = model
            .columns
            .iter()
            .map(|c| Column::new(uuid, &c.member, &c.name, c.sql_type.as_deref()))
            .collect();
        Self {
            model,
            registry,
            default_schema,
            uuid,
            alias: table_alias(uuid),
            columns,
            parent,
            relationships: OnceCell::new(),
        }
    }

    /// Entity name.
    pub fn entity(&self) -> &str {
        &self.model.name
    }

    /// Table name in the database.
    pub fn name(&self) -> &str {
        &self.model.table
    }

    pub fn schema(&self) -> Option<&str> {
        self.model
            .schema
            .as_deref()
            .or(self.default_schema.as_deref())
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Column by member name.
    pub fn column(&self, member: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.member == member)
    }

    pub fn primary_key(&self) -> Option<&Column> {
        self.model
            .primary_key
            .as_deref()
            .and_then(|member| self.column(member))
    }

    /// The relationship this table was reached through, if it is a child
    /// and its parent is still alive.
    pub fn parent_relationship(&self) -> Option<Arc<Relationship>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub fn parent_table(&self) -> Option<Arc<Table>> {
        self.parent_relationship().and_then(|r| r.parent())
    }

    /// Child relationships, built on first access.
    pub fn relationships(self: &Arc<Self>) -> &[Arc<Relationship>] {
        self.relationships.get_or_init(|| {
            self.model
                .relationships
                .iter()
                .filter_map(|def| Relationship::build(self, def))
                .collect()
        })
    }

    /// Relationship by member name.
    pub fn relationship(self: &Arc<Self>, member: &str) -> Option<Arc<Relationship>> {
        self.relationships()
            .iter()
            .find(|r| r.member == member)
            .cloned()
    }

    pub fn table_ref(&self) -> TableRef {
        TableRef::new(self.name())
            .with_schema(self.schema())
            .with_alias(self.alias())
    }
}

impl fmt::Debug for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Table")
            .field("entity", &self.model.name)
            .field("table", &self.model.table)
            .field("alias", &self.alias)
            .field("uuid", &self.uuid)
            .finish()
    }
}

fn table_alias(uuid: Uuid) -> String {
    format!("t_{}", short_hex(uuid.as_bytes(), 16))
}

// ============================================================================
// Relationship
// ============================================================================

/// Extra predicate merged into a join's ON clause.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinFilter {
    /// Column name on the joined table.
    pub column: String,
    pub operator: BinaryOperator,
    pub value: Value,
}

impl JoinFilter {
    pub fn to_expr(&self, alias: &str) -> Expr {
        let column = table_col(alias, &self.column);
        match (&self.value, self.operator) {
            (Value::Null, BinaryOperator::Eq) => column.is_null(),
            (Value::Null, BinaryOperator::Ne) => column.is_not_null(),
            (value, op) => column.binary(op, param(value.clone())),
        }
    }
}

/// One join of a relationship: `left_alias.left_column = alias.right_column`.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinStep {
    pub schema: Option<String>,
    pub table: String,
    pub alias: String,
    pub uuid: Uuid,
    pub left_alias: String,
    pub left_column: String,
    pub right_column: String,
    pub filters: Vec<JoinFilter>,
}

impl JoinStep {
    pub fn table_ref(&self) -> TableRef {
        TableRef::new(&self.table)
            .with_schema(self.schema.as_deref())
            .with_alias(&self.alias)
    }

    /// The natural join condition alone.
    pub fn condition(&self) -> Expr {
        table_col(&self.left_alias, &self.left_column).eq(table_col(&self.alias, &self.right_column))
    }

    /// Extra filters against this step's table.
    pub fn filter_exprs(&self) -> Vec<Expr> {
        self.filters.iter().map(|f| f.to_expr(&self.alias)).collect()
    }

    /// Full ON clause: the natural condition plus the extra filters.
    pub fn on_expr(&self) -> Expr {
        let mut parts = vec![self.condition()];
        parts.extend(self.filter_exprs());
        combine(BinaryOperator::And, parts).unwrap_or_else(|| self.condition())
    }
}

/// A navigable relationship from a parent table to a child table.
pub struct Relationship {
    member: String,
    kind: RelationshipKind,
    parent: Weak<Table>,
    parent_entity: String,
    child: Arc<Table>,
    joins: Vec<JoinStep>,
}

impl Relationship {
    fn build(parent: &Arc<Table>, def: &RelationshipModel) -> Option<Arc<Self>> {
        let target = Arc::clone(parent.registry.get(&def.target)?);
        let child_uuid = derive_uuid(&[
            parent.uuid.as_bytes(),
            parent.model.name.as_bytes(),
            def.member.as_bytes(),
            target.table.as_bytes(),
        ]);

        Some(Arc::new_cyclic(|weak| {
            let child = Arc::new(Table::build(
                target,
                Arc::clone(&parent.registry),
                parent.default_schema.clone(),
                child_uuid,
                Some(weak.clone()),
            ));
            let filters_for = |index: usize| def.filters.get(index).cloned().unwrap_or_default();

            let joins = match &def.link {
                None => vec![JoinStep {
                    schema: child.schema().map(Into::into),
                    table: child.name().into(),
                    alias: child.alias.clone(),
                    uuid: child.uuid,
                    left_alias: parent.alias.clone(),
                    left_column: def.left.clone(),
                    right_column: def.right.clone(),
                    filters: filters_for(0),
                }],
                Some(link) => {
                    let link_uuid = derive_uuid(&[
                        parent.uuid.as_bytes(),
                        b"link:",
                        link.table.as_bytes(),
                        def.member.as_bytes(),
                    ]);
                    let link_alias = table_alias(link_uuid);
                    vec![
                        JoinStep {
                            schema: link
                                .schema
                                .clone()
                                .or_else(|| parent.default_schema.clone()),
                            table: link.table.clone(),
                            alias: link_alias.clone(),
                            uuid: link_uuid,
                            left_alias: parent.alias.clone(),
                            left_column: def.left.clone(),
                            right_column: link.left.clone(),
                            filters: filters_for(0),
                        },
                        JoinStep {
                            schema: child.schema().map(Into::into),
                            table: child.name().into(),
                            alias: child.alias.clone(),
                            uuid: child.uuid,
                            left_alias: link_alias,
                            left_column: link.right.clone(),
                            right_column: def.right.clone(),
                            filters: filters_for(1),
                        },
                    ]
                }
            };

            Relationship {
                member: def.member.clone(),
                kind: def.kind,
                parent: Arc::downgrade(parent),
                parent_entity: parent.model.name.clone(),
                child,
                joins,
            }
        }))
    }

    /// Member exposing the relationship on the parent entity.
    pub fn member(&self) -> &str {
        &self.member
    }

    pub fn kind(&self) -> RelationshipKind {
        self.kind
    }

    pub fn causes_fanout(&self) -> bool {
        self.kind.causes_fanout()
    }

    pub fn parent(&self) -> Option<Arc<Table>> {
        self.parent.upgrade()
    }

    pub fn parent_entity(&self) -> &str {
        &self.parent_entity
    }

    pub fn child(&self) -> &Arc<Table> {
        &self.child
    }

    /// Ordered joins from the parent to the child.
    pub fn joins(&self) -> &[JoinStep] {
        &self.joins
    }

    /// Parent-side column of the correlation (`parent.left`).
    pub fn parent_key(&self) -> Expr {
        let first = &self.joins[0];
        table_col(&first.left_alias, &first.left_column)
    }

    /// Child-side column of the correlation: the child's foreign key, or the
    /// link table's column for many-to-many.
    pub fn link_key(&self) -> Expr {
        let first = &self.joins[0];
        table_col(&first.alias, &first.right_column)
    }
}

impl fmt::Debug for Relationship {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relationship")
            .field("member", &self.member)
            .field("kind", &self.kind)
            .field("parent", &self.parent_entity)
            .field("child", &self.child)
            .field("joins", &self.joins.len())
            .finish()
    }
}
