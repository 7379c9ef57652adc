//! Structural normalization of predicate trees.

use super::{CorrelatedExists, LogicalOp, Operand, Operator, Predicate, Quantifier};
use crate::graph::Path;
use crate::value::Value;

/// Normalize `predicate`:
///
/// - `NotLikeOrNull` leaves expand to `IS NULL OR NOT LIKE`
/// - nested groups with the same connective are flattened
/// - empty groups are dropped, single-member groups unwrapped
/// - compatible siblings are merged until nothing changes
///
/// `simplify(simplify(p)) == simplify(p)`.
pub fn simplify(predicate: Predicate) -> Predicate {
    match predicate {
        Predicate::Group { op, children } => {
            let mut members = Vec::with_capacity(children.len());
            for child in children {
                match simplify(child) {
                    Predicate::Group {
                        op: inner,
                        children: grand,
                    } if inner == op || grand.is_empty() => members.extend(grand),
                    other => members.push(other),
                }
            }

            let mut members = merge_to_fixpoint(op, members);
            match members.len() {
                1 => members.remove(0),
                _ => Predicate::Group {
                    op,
                    children: members,
                },
            }
        }

        Predicate::ColumnValue {
            path,
            operator: Operator::NotLikeOrNull,
            operand,
            quantifier,
        } => expand_not_like_or_null(path, operand, quantifier),

        Predicate::Exists(e) => Predicate::Exists(CorrelatedExists {
            condition: Box::new(simplify(*e.condition)),
            ..e
        }),

        leaf => leaf,
    }
}

/// `c IS NULL OR c NOT LIKE v`, quantified like the original leaf.
pub(crate) fn expand_not_like_or_null(
    path: Path,
    operand: Operand,
    quantifier: Quantifier,
) -> Predicate {
    Predicate::or(vec![
        Predicate::ColumnValue {
            path: path.clone(),
            operator: Operator::Eq,
            operand: Operand::Value(Value::Null),
            quantifier,
        },
        Predicate::ColumnValue {
            path,
            operator: Operator::NotLike,
            operand,
            quantifier,
        },
    ])
}

fn merge_to_fixpoint(op: LogicalOp, mut members: Vec<Predicate>) -> Vec<Predicate> {
    loop {
        let before = members.len();
        let mut merged = Vec::with_capacity(before);
        for member in members {
            if let Some(rest) = try_combine_into(op, &mut merged, member) {
                merged.push(rest);
            }
        }
        members = merged;
        if members.len() == before {
            return members;
        }
    }
}

/// Merge `candidate` into the first compatible member of a group joined by
/// `op`. Returns the candidate back when no member accepts it.
pub fn try_combine_into(
    op: LogicalOp,
    group: &mut [Predicate],
    candidate: Predicate,
) -> Option<Predicate> {
    for member in group.iter_mut() {
        if let Some(combined) = combine_pair(op, member, &candidate) {
            *member = combined;
            return None;
        }
    }
    Some(candidate)
}

fn combine_pair(op: LogicalOp, a: &Predicate, b: &Predicate) -> Option<Predicate> {
    match (a, b) {
        (
            Predicate::ColumnValue {
                path: pa,
                operator: oa,
                operand: va,
                quantifier: qa,
            },
            Predicate::ColumnValue {
                path: pb,
                operator: ob,
                operand: vb,
                quantifier: qb,
            },
        ) if pa == pb && oa == ob && qa == qb => {
            // a = x OR a = y  =>  a IN (x, y)
            // a <> x AND a <> y  =>  a NOT IN (x, y)
            let mergeable = matches!(
                (op, oa, qa),
                (LogicalOp::Or, Operator::Eq, Quantifier::Any)
                    | (LogicalOp::And, Operator::Ne, Quantifier::All)
            );
            if !mergeable {
                return None;
            }
            let mut values = value_list(va)?;
            for v in value_list(vb)? {
                if !values.contains(&v) {
                    values.push(v);
                }
            }
            Some(Predicate::ColumnValue {
                path: pa.clone(),
                operator: *oa,
                operand: Operand::Values(values),
                quantifier: *qa,
            })
        }

        (Predicate::Exists(ea), Predicate::Exists(eb))
            if ea.via == eb.via
                && ea.inverted == eb.inverted
                && ea.threshold.is_none()
                && eb.threshold.is_none() =>
        {
            // EXISTS(x) OR EXISTS(y) = EXISTS(x OR y), and dually
            // NOT EXISTS(x) AND NOT EXISTS(y) = NOT EXISTS(x OR y).
            // A conjunction inside one EXISTS would require a single related
            // row to satisfy both, so those pairs stay apart.
            let inner = if ea.inverted { op.dual() } else { op };
            if inner == LogicalOp::And {
                return None;
            }
            Some(Predicate::Exists(CorrelatedExists {
                via: ea.via.clone(),
                condition: Box::new(simplify(Predicate::Group {
                    op: inner,
                    children: vec![(*ea.condition).clone(), (*eb.condition).clone()],
                })),
                inverted: ea.inverted,
                threshold: None,
            }))
        }

        _ => None,
    }
}

/// Non-null literal values of an operand, for IN-list merging.
fn value_list(operand: &Operand) -> Option<Vec<Value>> {
    match operand {
        Operand::Value(v) if !v.is_null() => Some(vec![v.clone()]),
        Operand::Values(vs) if !vs.iter().any(Value::is_null) => Some(vs.clone()),
        _ => None,
    }
}
