//! Model catalog: entity registration and validation.
//!
//! Entities are registered explicitly (in code or from a TOML model file)
//! and validated once when the catalog is built. Every configuration error
//! surfaces here; the graph built from a catalog never fails at render time.
//!
//! ```toml
//! [[entity]]
//! name = "Order"
//! table = "orders"
//! primary_key = "id"
//! columns = [{ member = "id" }, { member = "customer_id", column = "CustomerId" }]
//!
//! [[entity.relationships]]
//! member = "lines"
//! kind = "one_to_many"
//! target = "OrderLine"
//! right = "order_id"
//! ```

use std::collections::HashMap;
use std::fs;
use std::path::Path as FsPath;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{JoinFilter, RelationshipKind, Table};
use crate::cache::{compute_hash, GraphCache};
use crate::config::Settings;
use crate::error::{QueryError, QueryResult};
use crate::select::SelectQuery;
use crate::sql::BinaryOperator;
use crate::value::Value;

// ============================================================================
// Definitions
// ============================================================================

/// A registered entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    pub name: String,
    pub table: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    /// Member name of the primary key column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_key: Option<String>,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub relationships: Vec<RelationshipDef>,
}

impl EntityDef {
    pub fn new(name: &str, table: &str) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            schema: None,
            primary_key: None,
            columns: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = Some(schema.into());
        self
    }

    /// Declare the primary key, adding the column if it is not declared yet.
    pub fn primary_key(mut self, member: &str) -> Self {
        self.primary_key = Some(member.into());
        if !self.columns.iter().any(|c| c.member == member) {
            self.columns.push(ColumnDef::new(member));
        }
        self
    }

    pub fn column(self, member: &str) -> Self {
        self.column_def(ColumnDef::new(member))
    }

    pub fn typed_column(self, member: &str, sql_type: &str) -> Self {
        self.column_def(ColumnDef::new(member).sql_type(sql_type))
    }

    /// Add a column definition, replacing one with the same member.
    pub fn column_def(mut self, def: ColumnDef) -> Self {
        match self.columns.iter_mut().find(|c| c.member == def.member) {
            Some(existing) => *existing = def,
            None => self.columns.push(def),
        }
        self
    }

    pub fn relationship(mut self, def: RelationshipDef) -> Self {
        self.relationships.push(def);
        self
    }
}

/// A column of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub member: String,
    /// Database column name; defaults to the member name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql_type: Option<String>,
}

impl ColumnDef {
    pub fn new(member: &str) -> Self {
        Self {
            member: member.into(),
            column: None,
            sql_type: None,
        }
    }

    pub fn named(mut self, column: &str) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn sql_type(mut self, sql_type: &str) -> Self {
        self.sql_type = Some(sql_type.into());
        self
    }

    fn db_name(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.member)
    }
}

/// A relationship from one entity to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDef {
    pub member: String,
    pub kind: RelationshipKind,
    pub target: String,
    /// Member on the parent; defaults to the parent's primary key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left: Option<String>,
    /// Member on the target; defaults to the target's primary key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right: Option<String>,
    /// Link table, required for many-to-many.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkDef>,
    #[serde(default)]
    pub conditions: Vec<JoinConditionDef>,
}

impl RelationshipDef {
    fn new(member: &str, kind: RelationshipKind, target: &str) -> Self {
        Self {
            member: member.into(),
            kind,
            target: target.into(),
            left: None,
            right: None,
            link: None,
            conditions: Vec::new(),
        }
    }

    pub fn one_to_one(member: &str, target: &str) -> Self {
        Self::new(member, RelationshipKind::OneToOne, target)
    }

    pub fn one_to_many(member: &str, target: &str) -> Self {
        Self::new(member, RelationshipKind::OneToMany, target)
    }

    pub fn many_to_many(member: &str, target: &str) -> Self {
        Self::new(member, RelationshipKind::ManyToMany, target)
    }

    pub fn left(mut self, member: &str) -> Self {
        self.left = Some(member.into());
        self
    }

    pub fn right(mut self, member: &str) -> Self {
        self.right = Some(member.into());
        self
    }

    pub fn link(mut self, link: LinkDef) -> Self {
        self.link = Some(link);
        self
    }

    pub fn condition(mut self, condition: JoinConditionDef) -> Self {
        self.conditions.push(condition);
        self
    }
}

/// Link table of a many-to-many relationship. Column names are database
/// names on the link table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkDef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    pub table: String,
    /// Column referencing the parent.
    pub left: String,
    /// Column referencing the target.
    pub right: String,
}

impl LinkDef {
    pub fn new(table: &str, left: &str, right: &str) -> Self {
        Self {
            schema: None,
            table: table.into(),
            left: left.into(),
            right: right.into(),
        }
    }
}

/// Extra predicate on one join of a relationship.
///
/// `join` indexes the relationship's joins: 0 is the target table, or the
/// link table for many-to-many (whose target is then join 1). `column` is a
/// member of the target entity, or a database column of the link table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinConditionDef {
    #[serde(default)]
    pub join: usize,
    pub column: String,
    #[serde(default = "default_condition_operator")]
    pub operator: String,
    pub value: Value,
}

fn default_condition_operator() -> String {
    "=".into()
}

impl JoinConditionDef {
    pub fn new(join: usize, column: &str, operator: &str, value: impl Into<Value>) -> Self {
        Self {
            join,
            column: column.into(),
            operator: operator.into(),
            value: value.into(),
        }
    }
}

/// Top-level layout of a model file.
#[derive(Debug, Clone, Default, Deserialize)]
struct ModelFile {
    #[serde(default)]
    entity: Vec<EntityDef>,
}

// ============================================================================
// Validated model
// ============================================================================

#[derive(Debug)]
pub(crate) struct ColumnModel {
    pub(crate) member: String,
    pub(crate) name: String,
    pub(crate) sql_type: Option<String>,
}

#[derive(Debug)]
pub(crate) struct LinkModel {
    pub(crate) schema: Option<String>,
    pub(crate) table: String,
    pub(crate) left: String,
    pub(crate) right: String,
}

#[derive(Debug)]
pub(crate) struct RelationshipModel {
    pub(crate) member: String,
    pub(crate) kind: RelationshipKind,
    pub(crate) target: String,
    /// Database column on the parent.
    pub(crate) left: String,
    /// Database column on the target.
    pub(crate) right: String,
    pub(crate) link: Option<LinkModel>,
    /// Extra filters per join.
    pub(crate) filters: Vec<Vec<JoinFilter>>,
}

#[derive(Debug)]
pub(crate) struct EntityModel {
    pub(crate) name: String,
    pub(crate) table: String,
    pub(crate) schema: Option<String>,
    pub(crate) primary_key: Option<String>,
    pub(crate) columns: Vec<ColumnModel>,
    pub(crate) relationships: Vec<RelationshipModel>,
}

pub(crate) type Registry = HashMap<String, Arc<EntityModel>>;

// ============================================================================
// Builder
// ============================================================================

/// Collects entity definitions and validates them into a [`Catalog`].
#[derive(Debug, Clone, Default)]
#[must_use = "builders have no effect until built"]
pub struct CatalogBuilder {
    entities: Vec<EntityDef>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(mut self, def: EntityDef) -> Self {
        self.entities.push(def);
        self
    }

    pub fn entities(mut self, defs: impl IntoIterator<Item = EntityDef>) -> Self {
        self.entities.extend(defs);
        self
    }

    /// Validate every definition and build the catalog.
    pub fn build(self, settings: &Settings) -> QueryResult<Catalog> {
        let mut by_name: HashMap<&str, &EntityDef> = HashMap::new();
        for def in &self.entities {
            if by_name.insert(def.name.as_str(), def).is_some() {
                return Err(QueryError::DuplicateEntity(def.name.clone()));
            }
        }

        let mut registry = Registry::new();
        for def in &self.entities {
            let model = validate_entity(def, &by_name)?;
            registry.insert(def.name.clone(), Arc::new(model));
        }

        debug!(entities = registry.len(), "catalog built");

        Ok(Catalog {
            registry: Arc::new(registry),
            definitions: self.entities,
            cache: GraphCache::new(settings.cache.ttl()),
            settings: settings.clone(),
        })
    }
}

fn validate_entity(def: &EntityDef, all: &HashMap<&str, &EntityDef>) -> QueryResult<EntityModel> {
    if let Some(pk) = &def.primary_key {
        member_column(def, pk).ok_or_else(|| QueryError::UnknownMember {
            entity: def.name.clone(),
            member: pk.clone(),
        })?;
    }

    let relationships = def
        .relationships
        .iter()
        .map(|rel| validate_relationship(def, rel, all))
        .collect::<QueryResult<Vec<_>>>()?;

    Ok(EntityModel {
        name: def.name.clone(),
        table: def.table.clone(),
        schema: def.schema.clone(),
        primary_key: def.primary_key.clone(),
        columns: def
            .columns
            .iter()
            .map(|c| ColumnModel {
                member: c.member.clone(),
                name: c.db_name().to_string(),
                sql_type: c.sql_type.clone(),
            })
            .collect(),
        relationships,
    })
}

fn validate_relationship(
    parent: &EntityDef,
    rel: &RelationshipDef,
    all: &HashMap<&str, &EntityDef>,
) -> QueryResult<RelationshipModel> {
    let invalid = |reason: &str| QueryError::InvalidRelationship {
        entity: parent.name.clone(),
        relationship: rel.member.clone(),
        reason: reason.into(),
    };

    if parent.columns.iter().any(|c| c.member == rel.member) {
        return Err(invalid("member is already a column"));
    }

    let target = all
        .get(rel.target.as_str())
        .copied()
        .ok_or_else(|| QueryError::UnknownEntity(rel.target.clone()))?;

    // Fan-out joins are deduplicated and correlated by primary key.
    if rel.kind.causes_fanout() {
        for side in [parent, target] {
            if side.primary_key.is_none() {
                return Err(QueryError::MissingPrimaryKey {
                    entity: side.name.clone(),
                    context: format!(
                        "{} relationship '{}.{}' needs keys on both sides",
                        rel.kind, parent.name, rel.member
                    ),
                });
            }
        }
    }

    let left = resolve_key(parent, rel, rel.left.as_deref(), parent)?;
    let right = resolve_key(parent, rel, rel.right.as_deref(), target)?;

    let link = match (rel.kind, &rel.link) {
        (RelationshipKind::ManyToMany, Some(link)) => Some(LinkModel {
            schema: link.schema.clone(),
            table: link.table.clone(),
            left: link.left.clone(),
            right: link.right.clone(),
        }),
        (RelationshipKind::ManyToMany, None) => {
            return Err(invalid("many-to-many relationship needs a link table"))
        }
        (_, Some(_)) => return Err(invalid("only many-to-many relationships take a link table")),
        (_, None) => None,
    };

    let joins = if link.is_some() { 2 } else { 1 };
    let mut filters = vec![Vec::new(); joins];
    for condition in &rel.conditions {
        if condition.join >= joins {
            return Err(QueryError::InvalidJoinIndex {
                entity: parent.name.clone(),
                relationship: rel.member.clone(),
                index: condition.join,
                joins,
            });
        }

        let targets_link = link.is_some() && condition.join == 0;
        let column = if targets_link {
            condition.column.clone()
        } else {
            member_column(target, &condition.column)
                .ok_or_else(|| QueryError::UnknownMember {
                    entity: target.name.clone(),
                    member: condition.column.clone(),
                })?
                .to_string()
        };

        let operator = parse_condition_operator(&condition.operator)
            .ok_or_else(|| invalid(&format!("unknown condition operator '{}'", condition.operator)))?;

        filters[condition.join].push(JoinFilter {
            column,
            operator,
            value: condition.value.clone(),
        });
    }

    Ok(RelationshipModel {
        member: rel.member.clone(),
        kind: rel.kind,
        target: rel.target.clone(),
        left,
        right,
        link,
        filters,
    })
}

/// Database column for a relationship key, falling back to the owner's
/// primary key.
fn resolve_key(
    parent: &EntityDef,
    rel: &RelationshipDef,
    member: Option<&str>,
    owner: &EntityDef,
) -> QueryResult<String> {
    let member = match member.or(owner.primary_key.as_deref()) {
        Some(member) => member,
        None => {
            return Err(QueryError::MissingPrimaryKey {
                entity: owner.name.clone(),
                context: format!(
                    "relationship '{}.{}' does not name its join column",
                    parent.name, rel.member
                ),
            })
        }
    };

    member_column(owner, member)
        .map(String::from)
        .ok_or_else(|| QueryError::UnresolvableForeignKey {
            entity: parent.name.clone(),
            relationship: rel.member.clone(),
            column: format!("{}.{}", owner.name, member),
        })
}

fn member_column<'a>(def: &'a EntityDef, member: &str) -> Option<&'a str> {
    def.columns
        .iter()
        .find(|c| c.member == member)
        .map(ColumnDef::db_name)
}

fn parse_condition_operator(op: &str) -> Option<BinaryOperator> {
    match op.trim().to_lowercase().as_str() {
        "=" | "==" | "eq" => Some(BinaryOperator::Eq),
        "<>" | "!=" | "ne" => Some(BinaryOperator::Ne),
        ">" | "gt" => Some(BinaryOperator::Gt),
        ">=" | "gte" => Some(BinaryOperator::Gte),
        "<" | "lt" => Some(BinaryOperator::Lt),
        "<=" | "lte" => Some(BinaryOperator::Lte),
        "like" => Some(BinaryOperator::Like),
        "not like" => Some(BinaryOperator::NotLike),
        _ => None,
    }
}

// ============================================================================
// Catalog
// ============================================================================

/// Validated entity definitions plus the cache of root graphs.
#[derive(Debug)]
pub struct Catalog {
    registry: Arc<Registry>,
    definitions: Vec<EntityDef>,
    settings: Settings,
    cache: GraphCache,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    /// Load a catalog from TOML model text.
    pub fn from_toml_str(content: &str, settings: &Settings) -> QueryResult<Self> {
        let file: ModelFile =
            toml::from_str(content).map_err(|e| QueryError::InvalidModel(e.to_string()))?;
        CatalogBuilder::new().entities(file.entity).build(settings)
    }

    /// Load a catalog from a TOML model file.
    pub fn from_path<P: AsRef<FsPath>>(path: P, settings: &Settings) -> QueryResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| QueryError::InvalidModel(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content, settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Registered entity names, sorted.
    pub fn entities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.registry.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn definitions(&self) -> &[EntityDef] {
        &self.definitions
    }

    /// Shared root graph of `entity`, built once and cached.
    pub fn table(&self, entity: &str) -> QueryResult<Arc<Table>> {
        let schema = self.settings.compiler.default_schema.as_deref();
        self.cache
            .get_or_build(entity, schema, || self.instance(entity))
    }

    /// A fresh, independent root of `entity` with its own identity.
    pub fn instance(&self, entity: &str) -> QueryResult<Arc<Table>> {
        let model = self
            .registry
            .get(entity)
            .ok_or_else(|| QueryError::UnknownEntity(entity.to_string()))?;
        Ok(Table::root(
            Arc::clone(model),
            Arc::clone(&self.registry),
            self.settings.compiler.default_schema.clone(),
        ))
    }

    /// Start a query rooted at the cached graph of `entity`.
    pub fn query(&self, entity: &str) -> QueryResult<SelectQuery> {
        Ok(SelectQuery::new(self.table(entity)?)
            .eager_depth(self.settings.compiler.eager_depth))
    }

    /// Stable fingerprint of the registered definitions.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        let mut defs: Vec<&EntityDef> = self.definitions.iter().collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        compute_hash(&defs)
    }

    pub fn cache(&self) -> &GraphCache {
        &self.cache
    }
}
