//! Rewrite leaves that reach through one-to-many relationships into
//! correlated existence checks.

use std::sync::Arc;

use super::simplify::expand_not_like_or_null;
use super::{invert, CorrelatedExists, Operand, Operator, Predicate, Quantifier, Threshold};
use crate::error::{QueryError, QueryResult};
use crate::graph::{Path, Table};
use crate::value::Value;

/// Finalize `predicate` against `root`.
///
/// For a leaf whose path crosses a fan-out relationship at hop `i`, the
/// path splits into `via = path[..=i]` and the remainder, and:
///
/// - `ANY` becomes "some related row matches"
/// - `= ALL (v1..vn)` becomes "related rows cover every distinct value"
/// - `<> ANY (v1..vn)` is its negation
/// - any other `ALL` becomes "no related row fails the comparison"
///
/// One-to-one paths are left alone; they are joined directly at render.
pub fn finalize(predicate: Predicate, root: &Arc<Table>) -> QueryResult<Predicate> {
    match predicate {
        Predicate::Group { op, children } => Ok(Predicate::Group {
            op,
            children: children
                .into_iter()
                .map(|c| finalize(c, root))
                .collect::<QueryResult<_>>()?,
        }),

        Predicate::ColumnValue {
            path,
            operator: Operator::NotLikeOrNull,
            operand,
            quantifier,
        } => finalize(expand_not_like_or_null(path, operand, quantifier), root),

        Predicate::ColumnValue {
            path,
            operator,
            operand,
            quantifier,
        } => {
            let Some((index, _)) = root.find_first_many_relationship(&path) else {
                return Ok(Predicate::ColumnValue {
                    path,
                    operator,
                    operand,
                    quantifier,
                });
            };
            let (via, rest) = path.split_at(index + 1);
            if rest.is_empty() {
                return Err(QueryError::NotAColumn {
                    entity: root.entity().to_string(),
                    path: path.to_string(),
                });
            }

            match (operator, quantifier, operand) {
                (Operator::Eq, Quantifier::All, Operand::Values(values)) => {
                    containment(root, &path, via, rest, values, false)
                }
                (Operator::Ne, Quantifier::Any, Operand::Values(values)) => {
                    containment(root, &path, via, rest, values, true)
                }
                (operator, Quantifier::Any, operand) => Ok(exists(
                    via,
                    Predicate::compare(rest, operator, operand, Quantifier::Any),
                    false,
                )),
                (operator, Quantifier::All, operand) => {
                    let failing =
                        invert(&Predicate::compare(rest, operator, operand, Quantifier::All))?;
                    Ok(exists(via, failing, true))
                }
            }
        }

        Predicate::TwoColumn {
            left,
            operator,
            right,
        } => {
            let left_many = root.find_first_many_relationship(&left);
            let right_many = root.find_first_many_relationship(&right);
            match (left_many, right_many) {
                (None, None) => Ok(Predicate::TwoColumn {
                    left,
                    operator,
                    right,
                }),
                (Some((li, lrel)), Some((ri, rrel)))
                    if li == ri && lrel.child().uuid() == rrel.child().uuid() =>
                {
                    let (via, left_rest) = left.split_at(li + 1);
                    let (_, right_rest) = right.split_at(ri + 1);
                    Ok(exists(
                        via,
                        Predicate::columns(left_rest, operator, right_rest),
                        false,
                    ))
                }
                _ => Err(QueryError::CrossBranchComparison {
                    left: left.to_string(),
                    right: right.to_string(),
                }),
            }
        }

        // A via crossing more than one fan-out nests one correlation per
        // fan-out hop.
        Predicate::Exists(e) => match root.find_first_many_relationship(&e.via) {
            Some((index, _)) if index + 1 < e.via.len() => {
                let (outer, inner) = e.via.split_at(index + 1);
                Ok(Predicate::Exists(CorrelatedExists {
                    via: outer,
                    condition: Box::new(Predicate::Exists(CorrelatedExists {
                        via: inner,
                        condition: e.condition,
                        inverted: false,
                        threshold: e.threshold,
                    })),
                    inverted: e.inverted,
                    threshold: None,
                }))
            }
            _ => Ok(Predicate::Exists(e)),
        },
    }
}

fn exists(via: Path, condition: Predicate, inverted: bool) -> Predicate {
    Predicate::Exists(CorrelatedExists {
        via,
        condition: Box::new(condition),
        inverted,
        threshold: None,
    })
}

/// Related rows through `via` cover every distinct value of `values` in
/// column `rest`. An empty list only requires some related row.
fn containment(
    root: &Arc<Table>,
    path: &Path,
    via: Path,
    rest: Path,
    values: Vec<Value>,
    inverted: bool,
) -> QueryResult<Predicate> {
    let child = root
        .find_relationship(&via)
        .map(|rel| Arc::clone(rel.child()))
        .ok_or_else(|| QueryError::PathNotFound {
            entity: root.entity().to_string(),
            path: via.to_string(),
        })?;
    if child.find_first_many_relationship(&rest).is_some() {
        return Err(QueryError::UnsupportedOperator {
            operator: "= ALL".into(),
            context: format!("'{}', which crosses a second one-to-many relationship", path),
        });
    }

    let mut distinct: Vec<Value> = Vec::with_capacity(values.len());
    for v in values {
        if !distinct.contains(&v) {
            distinct.push(v);
        }
    }

    if distinct.is_empty() {
        return Ok(exists(via, Predicate::and(Vec::new()), inverted));
    }

    let count = distinct.len();
    Ok(Predicate::Exists(CorrelatedExists {
        via,
        condition: Box::new(Predicate::compare(
            rest.clone(),
            Operator::Eq,
            Operand::Values(distinct),
            Quantifier::Any,
        )),
        inverted,
        threshold: (count > 1).then_some(Threshold {
            column: rest,
            count,
        }),
    }))
}
