//! Member paths and their resolution against a table graph.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{Column, Relationship, Table};
use crate::error::{QueryError, QueryResult};

/// A dot-separated chain of member names, e.g. `lines.product.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Path(Vec<String>);

impl Path {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn parse(s: &str) -> Self {
        Self(
            s.split('.')
                .map(str::trim)
                .filter(|seg| !seg.is_empty())
                .map(String::from)
                .collect(),
        )
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn last(&self) -> Option<&str> {
        self.0.last().map(String::as_str)
    }

    /// Split into `[..at]` and `[at..]`.
    pub fn split_at(&self, at: usize) -> (Path, Path) {
        let at = at.min(self.0.len());
        (Path(self.0[..at].to_vec()), Path(self.0[at..].to_vec()))
    }

    /// This path followed by `other`.
    pub fn join(&self, other: &Path) -> Path {
        Path(self.0.iter().chain(other.0.iter()).cloned().collect())
    }

    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    pub fn child(&self, segment: &str) -> Path {
        let mut segments = self.0.clone();
        segments.push(segment.into());
        Path(segments)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl From<&str> for Path {
    fn from(s: &str) -> Self {
        Path::parse(s)
    }
}

impl From<String> for Path {
    fn from(s: String) -> Self {
        Path::parse(&s)
    }
}

impl From<&Path> for Path {
    fn from(p: &Path) -> Self {
        p.clone()
    }
}

impl From<Path> for String {
    fn from(p: Path) -> Self {
        p.to_string()
    }
}

/// A column path resolved against a graph.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Relationships walked from the root, in order.
    pub hops: Vec<Arc<Relationship>>,
    /// Table owning the column.
    pub table: Arc<Table>,
    pub column: Column,
}

impl Resolution {
    /// Index of the first hop that can fan out.
    pub fn first_many(&self) -> Option<usize> {
        self.hops.iter().position(|r| r.causes_fanout())
    }

    pub fn crosses_many(&self) -> bool {
        self.first_many().is_some()
    }
}

impl Table {
    /// Walk every segment of `path` as a relationship.
    pub fn walk(self: &Arc<Self>, path: &Path) -> Option<Vec<Arc<Relationship>>> {
        let mut hops: Vec<Arc<Relationship>> = Vec::with_capacity(path.len());
        let mut current = Arc::clone(self);
        for segment in path.segments() {
            let rel = current.relationship(segment)?;
            current = Arc::clone(rel.child());
            hops.push(rel);
        }
        Some(hops)
    }

    /// Relationship reached by `path`.
    pub fn find_relationship(self: &Arc<Self>, path: &Path) -> Option<Arc<Relationship>> {
        if path.is_empty() {
            return None;
        }
        self.walk(path).and_then(|hops| hops.last().cloned())
    }

    /// Column reached by `path`, with the table that owns it.
    pub fn find_column(self: &Arc<Self>, path: &Path) -> Option<(Arc<Table>, Column)> {
        self.resolve(path).ok().map(|r| (r.table, r.column))
    }

    /// First one-to-many or many-to-many relationship on `path`, with its
    /// hop index. `None` when the path is one-to-one only.
    pub fn find_first_many_relationship(
        self: &Arc<Self>,
        path: &Path,
    ) -> Option<(usize, Arc<Relationship>)> {
        let mut current = Arc::clone(self);
        for (index, segment) in path.segments().iter().enumerate() {
            let rel = current.relationship(segment)?;
            if rel.causes_fanout() {
                return Some((index, rel));
            }
            current = Arc::clone(rel.child());
        }
        None
    }

    /// Resolve a column path.
    pub fn resolve(self: &Arc<Self>, path: &Path) -> QueryResult<Resolution> {
        let not_found = || QueryError::PathNotFound {
            entity: self.entity().to_string(),
            path: path.to_string(),
        };

        let (prefix, last) = path.split_at(path.len().saturating_sub(1));
        let member = last.last().ok_or_else(not_found)?;
        let hops = self.walk(&prefix).ok_or_else(not_found)?;
        let table = hops
            .last()
            .map(|r| Arc::clone(r.child()))
            .unwrap_or_else(|| Arc::clone(self));

        match table.column(member) {
            Some(column) => Ok(Resolution {
                column: column.clone(),
                hops,
                table,
            }),
            None if table.relationship(member).is_some() => Err(QueryError::NotAColumn {
                entity: self.entity().to_string(),
                path: path.to_string(),
            }),
            None => Err(not_found()),
        }
    }

    /// Resolve a relationship path into its hops.
    pub fn resolve_relationship(
        self: &Arc<Self>,
        path: &Path,
    ) -> QueryResult<Vec<Arc<Relationship>>> {
        match self.walk(path) {
            Some(hops) if !hops.is_empty() => Ok(hops),
            _ => {
                let is_column = self.resolve(path).is_ok();
                if is_column {
                    Err(QueryError::NotARelationship {
                        entity: self.entity().to_string(),
                        path: path.to_string(),
                    })
                } else {
                    Err(QueryError::PathNotFound {
                        entity: self.entity().to_string(),
                        path: path.to_string(),
                    })
                }
            }
        }
    }
}

/// True when `a` was reached from `b` through one or more relationships.
pub fn is_child_of(a: &Table, b: &Table) -> bool {
    let mut current = a.parent_table();
    while let Some(table) = current {
        if table.uuid() == b.uuid() {
            return true;
        }
        current = table.parent_table();
    }
    false
}

pub fn is_same_or_child_of(a: &Table, b: &Table) -> bool {
    a.uuid() == b.uuid() || is_child_of(a, b)
}

/// True when `a` is `b`, lies below `b`, or lies below `b`'s parent
/// (a sibling branch of the same parent).
pub fn is_same_or_also_under_same_parent(a: &Table, b: &Table) -> bool {
    match b.parent_table() {
        Some(parent) => is_same_or_child_of(a, &parent) && a.uuid() != parent.uuid(),
        None => is_same_or_child_of(a, b),
    }
}
