//! Expression evaluation over solutions.
//!
//! Residual FILTERs, BIND assignments, and HAVING predicates all evaluate
//! through [`eval`]. Evaluation errors yield `None`: a filter then drops
//! the solution, a BIND leaves its variable unbound.

use crate::query::{ArithOp, CmpOp, Expr};
use crate::term::{Scalar, Solution, Term};
use regex::Regex;
use std::cmp::Ordering;

/// Evaluate an expression against a solution. `None` on unbound variables,
/// type errors, or incomparable operands.
pub fn eval(expr: &Expr, solution: &Solution) -> Option<Scalar> {
    match expr {
        Expr::Const(s) => Some(s.clone()),
        Expr::Var(v) => match solution.get(v)? {
            Term::Literal(s) => Some(s.clone()),
            Term::Iri(iri) => Some(Scalar::string(iri.clone())),
            Term::Blank(_) => None,
        },
        Expr::Cmp(op, lhs, rhs) => {
            let l = eval(lhs, solution)?;
            let r = eval(rhs, solution)?;
            let result = match op {
                CmpOp::Eq => l == r,
                CmpOp::Neq => {
                    // equality is decidable on any pair; ordering is not
                    l != r
                }
                _ => {
                    let ord = l.compare(&r)?;
                    match op {
                        CmpOp::Lt => ord == Ordering::Less,
                        CmpOp::Lte => ord != Ordering::Greater,
                        CmpOp::Gt => ord == Ordering::Greater,
                        CmpOp::Gte => ord != Ordering::Less,
                        CmpOp::Eq | CmpOp::Neq => unreachable!(),
                    }
                }
            };
            Some(Scalar::Boolean(result))
        }
        Expr::And(exprs) => {
            for e in exprs {
                if !truthy(&eval(e, solution)?) {
                    return Some(Scalar::Boolean(false));
                }
            }
            Some(Scalar::Boolean(true))
        }
        Expr::Or(exprs) => {
            for e in exprs {
                if truthy(&eval(e, solution)?) {
                    return Some(Scalar::Boolean(true));
                }
            }
            Some(Scalar::Boolean(false))
        }
        Expr::Not(e) => Some(Scalar::Boolean(!truthy(&eval(e, solution)?))),
        Expr::Between(e, lo, hi) => {
            let v = eval(e, solution)?;
            let lo = eval(lo, solution)?;
            let hi = eval(hi, solution)?;
            let ge_lo = matches!(v.compare(&lo)?, Ordering::Greater | Ordering::Equal);
            let le_hi = matches!(v.compare(&hi)?, Ordering::Less | Ordering::Equal);
            Some(Scalar::Boolean(ge_lo && le_hi))
        }
        Expr::Arith(op, lhs, rhs) => {
            let l = eval(lhs, solution)?;
            let r = eval(rhs, solution)?;
            arith(*op, &l, &r)
        }
        Expr::Bound(v) => Some(Scalar::Boolean(solution.contains(v))),
        Expr::IsBlank(e) => match e.as_ref() {
            Expr::Var(v) => Some(Scalar::Boolean(matches!(
                solution.get(v),
                Some(Term::Blank(_))
            ))),
            _ => Some(Scalar::Boolean(false)),
        },
        Expr::Regex(e, pattern) => {
            let value = eval(e, solution)?;
            let text = match value {
                Scalar::String(s) => s,
                other => other.to_string(),
            };
            let re = Regex::new(pattern).ok()?;
            Some(Scalar::Boolean(re.is_match(&text)))
        }
    }
}

/// A filter passes only on the boolean `true`
pub fn eval_filter(expr: &Expr, solution: &Solution) -> bool {
    matches!(eval(expr, solution), Some(Scalar::Boolean(true)))
}

fn truthy(value: &Scalar) -> bool {
    matches!(value, Scalar::Boolean(true))
}

fn arith(op: ArithOp, l: &Scalar, r: &Scalar) -> Option<Scalar> {
    // integer arithmetic stays integral; any float operand promotes to f64
    let both_integral = matches!(l, Scalar::Int(_) | Scalar::Long(_))
        && matches!(r, Scalar::Int(_) | Scalar::Long(_));

    if both_integral {
        let a = match l {
            Scalar::Int(v) => i64::from(*v),
            Scalar::Long(v) => *v,
            _ => unreachable!(),
        };
        let b = match r {
            Scalar::Int(v) => i64::from(*v),
            Scalar::Long(v) => *v,
            _ => unreachable!(),
        };
        let out = match op {
            ArithOp::Add => a.checked_add(b)?,
            ArithOp::Sub => a.checked_sub(b)?,
            ArithOp::Mul => a.checked_mul(b)?,
            ArithOp::Div => a.checked_div(b)?,
        };
        return Some(Scalar::Long(out));
    }

    let a = as_f64(l)?;
    let b = as_f64(r)?;
    let out = match op {
        ArithOp::Add => a + b,
        ArithOp::Sub => a - b,
        ArithOp::Mul => a * b,
        ArithOp::Div => {
            if b == 0.0 {
                return None;
            }
            a / b
        }
    };
    Some(Scalar::Double(out))
}

fn as_f64(s: &Scalar) -> Option<f64> {
    match s {
        Scalar::Int(v) => Some(f64::from(*v)),
        Scalar::Long(v) => Some(*v as f64),
        Scalar::Float(v) => Some(f64::from(*v)),
        Scalar::Double(v) => Some(*v),
        _ => None,
    }
}
