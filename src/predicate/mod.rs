//! WHERE-clause algebra.
//!
//! A [`Predicate`] is an immutable tree of boolean groups and leaves whose
//! column paths are relative to the root of the query it filters. Compiling
//! a predicate runs `simplify → finalize → simplify → render`:
//!
//! - [`simplify`] flattens groups and merges compatible siblings
//! - [`finalize`] rewrites leaves that reach through a one-to-many
//!   relationship into [`CorrelatedExists`] nodes
//! - [`render`] turns the tree into an [`Expr`], registering one CTE per
//!   correlated node so the many side is never joined directly
//!
//! Every step returns a new tree, so the same predicate renders identically
//! for a data statement and its count statement.

mod finalize;
mod invert;
mod render;
mod simplify;

pub use finalize::finalize;
pub use invert::invert;
pub use render::render;
pub use simplify::{simplify, try_combine_into};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::QueryResult;
use crate::graph::{Path, Table};
use crate::scope::{JoinOrigin, RenderContext, Scope};
use crate::sql::{BinaryOperator, Expr};
use crate::value::Value;

// ============================================================================
// Operators
// ============================================================================

/// Boolean connective of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOp {
    And,
    Or,
}

impl LogicalOp {
    pub fn dual(self) -> Self {
        match self {
            LogicalOp::And => LogicalOp::Or,
            LogicalOp::Or => LogicalOp::And,
        }
    }

    pub fn to_binary(self) -> BinaryOperator {
        match self {
            LogicalOp::And => BinaryOperator::And,
            LogicalOp::Or => BinaryOperator::Or,
        }
    }
}

/// Comparison of a column against an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[serde(alias = "=", alias = "==")]
    Eq,
    #[serde(alias = "<>", alias = "!=")]
    Ne,
    #[serde(alias = ">")]
    Gt,
    #[serde(alias = ">=")]
    Gte,
    #[serde(alias = "<")]
    Lt,
    #[serde(alias = "<=")]
    Lte,
    Like,
    NotLike,
    /// Matches `value` as a whole space-separated word.
    WordLike,
    NotWordLike,
    /// `col IS NULL OR col NOT LIKE value`.
    NotLikeOrNull,
}

impl Operator {
    /// Plain SQL comparison, for operators that map onto one.
    pub fn to_binary(self) -> Option<BinaryOperator> {
        match self {
            Operator::Eq => Some(BinaryOperator::Eq),
            Operator::Ne => Some(BinaryOperator::Ne),
            Operator::Gt => Some(BinaryOperator::Gt),
            Operator::Gte => Some(BinaryOperator::Gte),
            Operator::Lt => Some(BinaryOperator::Lt),
            Operator::Lte => Some(BinaryOperator::Lte),
            Operator::Like => Some(BinaryOperator::Like),
            Operator::NotLike => Some(BinaryOperator::NotLike),
            Operator::WordLike | Operator::NotWordLike | Operator::NotLikeOrNull => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operator::Eq => "=",
            Operator::Ne => "<>",
            Operator::Gt => ">",
            Operator::Gte => ">=",
            Operator::Lt => "<",
            Operator::Lte => "<=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::WordLike => "WORD LIKE",
            Operator::NotWordLike => "NOT WORD LIKE",
            Operator::NotLikeOrNull => "NOT LIKE OR NULL",
        };
        write!(f, "{}", s)
    }
}

/// How a comparison applies across many related rows or many values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quantifier {
    #[default]
    Any,
    All,
}

impl Quantifier {
    pub fn flip(self) -> Self {
        match self {
            Quantifier::Any => Quantifier::All,
            Quantifier::All => Quantifier::Any,
        }
    }
}

impl fmt::Display for Quantifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantifier::Any => write!(f, "ANY"),
            Quantifier::All => write!(f, "ALL"),
        }
    }
}

// ============================================================================
// Tree
// ============================================================================

/// Right-hand side of a column comparison.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Value(Value),
    Values(Vec<Value>),
    SubQuery(Box<SubQuery>),
}

/// `SELECT column FROM table WHERE filter`, compiled in its own scope.
#[derive(Debug, Clone)]
pub struct SubQuery {
    pub table: Arc<Table>,
    pub column: Path,
    pub filter: Option<Predicate>,
}

impl SubQuery {
    pub fn new(table: Arc<Table>, column: impl Into<Path>) -> Self {
        Self {
            table,
            column: column.into(),
            filter: None,
        }
    }

    pub fn filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }
}

impl PartialEq for SubQuery {
    fn eq(&self, other: &Self) -> bool {
        self.table.uuid() == other.table.uuid()
            && self.column == other.column
            && self.filter == other.filter
    }
}

/// Minimum number of distinct matches a correlated row set must contain.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    /// Column counted, relative to the related table.
    pub column: Path,
    pub count: usize,
}

/// "Some related row through `via` satisfies `condition`" (or, inverted,
/// "none does").
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelatedExists {
    /// Relationship path from the query root; its last hop is the one
    /// correlated, earlier hops are joined.
    pub via: Path,
    /// Condition relative to the related table.
    pub condition: Box<Predicate>,
    pub inverted: bool,
    pub threshold: Option<Threshold>,
}

/// A WHERE-clause tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Group {
        op: LogicalOp,
        children: Vec<Predicate>,
    },
    ColumnValue {
        path: Path,
        operator: Operator,
        operand: Operand,
        quantifier: Quantifier,
    },
    TwoColumn {
        left: Path,
        operator: Operator,
        right: Path,
    },
    Exists(CorrelatedExists),
}

impl Predicate {
    pub fn compare(
        path: impl Into<Path>,
        operator: Operator,
        operand: Operand,
        quantifier: Quantifier,
    ) -> Self {
        Predicate::ColumnValue {
            path: path.into(),
            operator,
            operand,
            quantifier,
        }
    }

    fn value(path: impl Into<Path>, operator: Operator, value: impl Into<Value>) -> Self {
        Self::compare(
            path,
            operator,
            Operand::Value(value.into()),
            Quantifier::Any,
        )
    }

    fn values<V: Into<Value>>(
        path: impl Into<Path>,
        operator: Operator,
        values: impl IntoIterator<Item = V>,
        quantifier: Quantifier,
    ) -> Self {
        Self::compare(
            path,
            operator,
            Operand::Values(values.into_iter().map(Into::into).collect()),
            quantifier,
        )
    }

    pub fn eq(path: impl Into<Path>, value: impl Into<Value>) -> Self {
        Self::value(path, Operator::Eq, value)
    }

    pub fn ne(path: impl Into<Path>, value: impl Into<Value>) -> Self {
        Self::value(path, Operator::Ne, value)
    }

    pub fn gt(path: impl Into<Path>, value: impl Into<Value>) -> Self {
        Self::value(path, Operator::Gt, value)
    }

    pub fn gte(path: impl Into<Path>, value: impl Into<Value>) -> Self {
        Self::value(path, Operator::Gte, value)
    }

    pub fn lt(path: impl Into<Path>, value: impl Into<Value>) -> Self {
        Self::value(path, Operator::Lt, value)
    }

    pub fn lte(path: impl Into<Path>, value: impl Into<Value>) -> Self {
        Self::value(path, Operator::Lte, value)
    }

    pub fn like(path: impl Into<Path>, pattern: &str) -> Self {
        Self::value(path, Operator::Like, pattern)
    }

    pub fn not_like(path: impl Into<Path>, pattern: &str) -> Self {
        Self::value(path, Operator::NotLike, pattern)
    }

    pub fn word_like(path: impl Into<Path>, word: &str) -> Self {
        Self::value(path, Operator::WordLike, word)
    }

    pub fn not_word_like(path: impl Into<Path>, word: &str) -> Self {
        Self::value(path, Operator::NotWordLike, word)
    }

    pub fn not_like_or_null(path: impl Into<Path>, pattern: &str) -> Self {
        Self::value(path, Operator::NotLikeOrNull, pattern)
    }

    pub fn is_null(path: impl Into<Path>) -> Self {
        Self::value(path, Operator::Eq, Value::Null)
    }

    pub fn is_not_null(path: impl Into<Path>) -> Self {
        Self::value(path, Operator::Ne, Value::Null)
    }

    /// Equal to any of `values`.
    pub fn is_in<V: Into<Value>>(path: impl Into<Path>, values: impl IntoIterator<Item = V>) -> Self {
        Self::values(path, Operator::Eq, values, Quantifier::Any)
    }

    /// Different from all of `values`.
    pub fn not_in<V: Into<Value>>(path: impl Into<Path>, values: impl IntoIterator<Item = V>) -> Self {
        Self::values(path, Operator::Ne, values, Quantifier::All)
    }

    /// Related rows cover every one of `values`.
    pub fn contains_all<V: Into<Value>>(
        path: impl Into<Path>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::values(path, Operator::Eq, values, Quantifier::All)
    }

    pub fn in_subquery(path: impl Into<Path>, subquery: SubQuery) -> Self {
        Self::compare(
            path,
            Operator::Eq,
            Operand::SubQuery(Box::new(subquery)),
            Quantifier::Any,
        )
    }

    pub fn not_in_subquery(path: impl Into<Path>, subquery: SubQuery) -> Self {
        Self::compare(
            path,
            Operator::Ne,
            Operand::SubQuery(Box::new(subquery)),
            Quantifier::Any,
        )
    }

    /// Compare two columns of the same row.
    pub fn columns(left: impl Into<Path>, operator: Operator, right: impl Into<Path>) -> Self {
        Predicate::TwoColumn {
            left: left.into(),
            operator,
            right: right.into(),
        }
    }

    pub fn and(children: Vec<Predicate>) -> Self {
        Predicate::Group {
            op: LogicalOp::And,
            children,
        }
    }

    pub fn or(children: Vec<Predicate>) -> Self {
        Predicate::Group {
            op: LogicalOp::Or,
            children,
        }
    }

    /// Some row related through `via` satisfies `condition`.
    pub fn related(via: impl Into<Path>, condition: Predicate) -> Self {
        Predicate::Exists(CorrelatedExists {
            via: via.into(),
            condition: Box::new(condition),
            inverted: false,
            threshold: None,
        })
    }

    /// At least one row is related through `via`.
    pub fn any_related(via: impl Into<Path>) -> Self {
        Self::related(via, Predicate::and(Vec::new()))
    }

    /// No row is related through `via`.
    pub fn none_related(via: impl Into<Path>) -> Self {
        Predicate::Exists(CorrelatedExists {
            via: via.into(),
            condition: Box::new(Predicate::and(Vec::new())),
            inverted: true,
            threshold: None,
        })
    }

    /// Apply the comparison to every related row (or value) instead of any.
    pub fn all(self) -> Self {
        self.with_quantifier(Quantifier::All)
    }

    pub fn any(self) -> Self {
        self.with_quantifier(Quantifier::Any)
    }

    fn with_quantifier(self, q: Quantifier) -> Self {
        match self {
            Predicate::ColumnValue {
                path,
                operator,
                operand,
                ..
            } => Predicate::ColumnValue {
                path,
                operator,
                operand,
                quantifier: q,
            },
            other => other,
        }
    }

    /// Logical negation.
    pub fn not(&self) -> QueryResult<Self> {
        invert(self)
    }

    /// Every column path the predicate reads, relative to the query root.
    /// Sub-query operands are resolved against their own table and are not
    /// included.
    pub fn column_paths(&self) -> Vec<Path> {
        let mut out = Vec::new();
        self.collect_paths(&Path::default(), &mut out);
        out
    }

    fn collect_paths(&self, prefix: &Path, out: &mut Vec<Path>) {
        match self {
            Predicate::Group { children, .. } => {
                for child in children {
                    child.collect_paths(prefix, out);
                }
            }
            Predicate::ColumnValue { path, .. } => out.push(prefix.join(path)),
            Predicate::TwoColumn { left, right, .. } => {
                out.push(prefix.join(left));
                out.push(prefix.join(right));
            }
            Predicate::Exists(e) => {
                let inner = prefix.join(&e.via);
                e.condition.collect_paths(&inner, out);
                if let Some(t) = &e.threshold {
                    out.push(inner.join(&t.column));
                }
            }
        }
    }

    /// Resolve every path against `root`, reporting the first that fails.
    pub fn validate(&self, root: &Arc<Table>) -> QueryResult<()> {
        match self {
            Predicate::Group { children, .. } => {
                children.iter().try_for_each(|c| c.validate(root))
            }
            Predicate::ColumnValue { path, operand, .. } => {
                root.resolve(path)?;
                if let Operand::SubQuery(sq) = operand {
                    sq.table.resolve(&sq.column)?;
                    if let Some(filter) = &sq.filter {
                        filter.validate(&sq.table)?;
                    }
                }
                Ok(())
            }
            Predicate::TwoColumn { left, right, .. } => {
                root.resolve(left)?;
                root.resolve(right)?;
                Ok(())
            }
            Predicate::Exists(e) => {
                let hops = root.resolve_relationship(&e.via)?;
                match hops.last() {
                    Some(rel) => {
                        e.condition.validate(rel.child())?;
                        if let Some(t) = &e.threshold {
                            rel.child().resolve(&t.column)?;
                        }
                        Ok(())
                    }
                    None => Ok(()),
                }
            }
        }
    }
}

/// Compile `predicate` into a WHERE expression for `scope`.
///
/// Returns `None` when the predicate places no constraint.
pub fn compile(
    predicate: &Predicate,
    scope: &mut Scope,
    ctx: &mut RenderContext,
    origin: JoinOrigin,
) -> QueryResult<Option<Expr>> {
    let root = Arc::clone(scope.root());
    let finalized = simplify(finalize(simplify(predicate.clone()), &root)?);
    render(&finalized, scope, ctx, origin)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_paths_prefix_exists() {
        let p = Predicate::and(vec![
            Predicate::eq("status", "open"),
            Predicate::related("lines", Predicate::gt("qty", 10)),
            Predicate::columns("customer.id", Operator::Eq, "customer_id"),
        ]);
        let paths: Vec<String> = p.column_paths().iter().map(|p| p.to_string()).collect();
        assert_eq!(
            paths,
            vec!["status", "lines.qty", "customer.id", "customer_id"]
        );
    }

    #[test]
    fn test_all_sets_quantifier() {
        let p = Predicate::gt("lines.qty", 10).all();
        assert!(matches!(
            p,
            Predicate::ColumnValue {
                quantifier: Quantifier::All,
                ..
            }
        ));
    }

    #[test]
    fn test_operator_serde_aliases() {
        #[derive(Deserialize)]
        struct Holder {
            op: Operator,
        }
        let h: Holder = toml::from_str("op = \">=\"").unwrap();
        assert_eq!(h.op, Operator::Gte);
        let h: Holder = toml::from_str("op = \"not_like_or_null\"").unwrap();
        assert_eq!(h.op, Operator::NotLikeOrNull);
    }
}
