//! Logical negation of predicate trees.

use super::{CorrelatedExists, Operand, Operator, Predicate};
use crate::error::{QueryError, QueryResult};
use crate::value::Value;

impl Operator {
    /// Operator whose result is the negation of this one. `NotLikeOrNull`
    /// has no single-operator inverse.
    pub fn inverse(self) -> Option<Operator> {
        match self {
            Operator::Eq => Some(Operator::Ne),
            Operator::Ne => Some(Operator::Eq),
            Operator::Gt => Some(Operator::Lte),
            Operator::Lte => Some(Operator::Gt),
            Operator::Lt => Some(Operator::Gte),
            Operator::Gte => Some(Operator::Lt),
            Operator::Like => Some(Operator::NotLike),
            Operator::NotLike => Some(Operator::Like),
            Operator::WordLike => Some(Operator::NotWordLike),
            Operator::NotWordLike => Some(Operator::WordLike),
            Operator::NotLikeOrNull => None,
        }
    }
}

/// Negate `predicate`.
///
/// Groups swap AND/OR (De Morgan), leaves flip their operator and
/// quantifier, correlated nodes flip their inverted flag. Sub-query
/// operands and column comparisons without an inverse are rejected.
pub fn invert(predicate: &Predicate) -> QueryResult<Predicate> {
    match predicate {
        Predicate::Group { op, children } => Ok(Predicate::Group {
            op: op.dual(),
            children: children.iter().map(invert).collect::<QueryResult<_>>()?,
        }),

        Predicate::ColumnValue {
            path,
            operator,
            operand,
            quantifier,
        } => {
            if matches!(operand, Operand::SubQuery(_)) {
                return Err(QueryError::OperatorNotInvertible {
                    operator: format!("{} (sub-query)", operator),
                    path: path.to_string(),
                });
            }
            let quantifier = quantifier.flip();
            match operator.inverse() {
                Some(inverse) => Ok(Predicate::ColumnValue {
                    path: path.clone(),
                    operator: inverse,
                    operand: operand.clone(),
                    quantifier,
                }),
                // NOT (c IS NULL OR c NOT LIKE v) = c IS NOT NULL AND c LIKE v
                None => Ok(Predicate::and(vec![
                    Predicate::ColumnValue {
                        path: path.clone(),
                        operator: Operator::Ne,
                        operand: Operand::Value(Value::Null),
                        quantifier,
                    },
                    Predicate::ColumnValue {
                        path: path.clone(),
                        operator: Operator::Like,
                        operand: operand.clone(),
                        quantifier,
                    },
                ])),
            }
        }

        Predicate::TwoColumn {
            left,
            operator,
            right,
        } => {
            let inverse = match operator {
                Operator::WordLike | Operator::NotWordLike | Operator::NotLikeOrNull => None,
                op => op.inverse(),
            };
            match inverse {
                Some(inverse) => Ok(Predicate::TwoColumn {
                    left: left.clone(),
                    operator: inverse,
                    right: right.clone(),
                }),
                None => Err(QueryError::OperatorNotInvertible {
                    operator: operator.to_string(),
                    path: format!("{} / {}", left, right),
                }),
            }
        }

        Predicate::Exists(e) => Ok(Predicate::Exists(CorrelatedExists {
            inverted: !e.inverted,
            ..e.clone()
        })),
    }
}
