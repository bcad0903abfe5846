//! Resolved expression trees for generated columns and expression indexes.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{DdlError, Result};
use crate::model::Datum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Column(String),
    Literal(Datum),
    Func { name: String, args: Vec<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
}

/// Deterministic functions allowed in generated columns and expression indexes.
pub const DETERMINISTIC_FUNCTIONS: &[&str] = &[
    "abs", "ceil", "floor", "round", "mod", "lower", "upper", "concat", "length",
    "char_length", "trim", "ltrim", "rtrim", "left", "right", "reverse", "coalesce",
    "ifnull", "if", "greatest", "least",
];

impl Expr {
    pub fn col(name: &str) -> Self {
        Expr::Column(name.to_string())
    }

    pub fn lit(value: impl Into<Datum>) -> Self {
        Expr::Literal(value.into())
    }

    pub fn func(name: &str, args: Vec<Expr>) -> Self {
        Expr::Func {
            name: name.to_lowercase(),
            args,
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// Lower-cased names of every column the expression reads.
    pub fn columns(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.walk(&mut |e| {
            if let Expr::Column(name) = e {
                out.insert(name.to_lowercase());
            }
        });
        out
    }

    /// Lower-cased names of every function the expression calls.
    pub fn functions(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.walk(&mut |e| {
            if let Expr::Func { name, .. } = e {
                out.insert(name.to_lowercase());
            }
        });
        out
    }

    fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        match self {
            Expr::Func { args, .. } => args.iter().for_each(|a| a.walk(f)),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
            Expr::Column(_) | Expr::Literal(_) => {}
        }
    }

    /// Evaluate against a row accessor that resolves lower-cased column names.
    pub fn eval(&self, row: &dyn Fn(&str) -> Option<Datum>) -> Result<Datum> {
        match self {
            Expr::Column(name) => Ok(row(&name.to_lowercase()).unwrap_or(Datum::Null)),
            Expr::Literal(d) => Ok(d.clone()),
            Expr::Binary { op, lhs, rhs } => {
                let l = lhs.eval(row)?;
                let r = rhs.eval(row)?;
                Ok(eval_binary(*op, &l, &r))
            }
            Expr::Func { name, args } => {
                let values = args
                    .iter()
                    .map(|a| a.eval(row))
                    .collect::<Result<Vec<_>>>()?;
                eval_func(name, &values)
            }
        }
    }
}

fn eval_binary(op: BinaryOp, l: &Datum, r: &Datum) -> Datum {
    if l.is_null() || r.is_null() {
        return Datum::Null;
    }
    if let (Datum::Int(a), Datum::Int(b)) = (l, r) {
        let v = match op {
            BinaryOp::Add => a.checked_add(*b),
            BinaryOp::Sub => a.checked_sub(*b),
            BinaryOp::Mul => a.checked_mul(*b),
            BinaryOp::Div => None,
        };
        if let Some(v) = v {
            return Datum::Int(v);
        }
    }
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => match op {
            BinaryOp::Add => Datum::Float(a + b),
            BinaryOp::Sub => Datum::Float(a - b),
            BinaryOp::Mul => Datum::Float(a * b),
            BinaryOp::Div if b == 0.0 => Datum::Null,
            BinaryOp::Div => Datum::Float(a / b),
        },
        _ => Datum::Null,
    }
}

fn string_arg(values: &[Datum], idx: usize) -> Option<String> {
    values.get(idx).filter(|d| !d.is_null()).map(|d| d.to_string())
}

fn eval_func(name: &str, values: &[Datum]) -> Result<Datum> {
    let first = values.first().cloned().unwrap_or(Datum::Null);
    let value = match name {
        "abs" => match first {
            Datum::Int(v) => Datum::Int(v.abs()),
            other => other.as_f64().map(|v| Datum::Float(v.abs())).unwrap_or(Datum::Null),
        },
        "ceil" => first.as_f64().map(|v| Datum::Int(v.ceil() as i64)).unwrap_or(Datum::Null),
        "floor" => first.as_f64().map(|v| Datum::Int(v.floor() as i64)).unwrap_or(Datum::Null),
        "round" => first.as_f64().map(|v| Datum::Int(v.round() as i64)).unwrap_or(Datum::Null),
        "mod" => match (first.as_i64(), values.get(1).and_then(Datum::as_i64)) {
            (Some(a), Some(b)) if b != 0 => Datum::Int(a % b),
            _ => Datum::Null,
        },
        "lower" => string_arg(values, 0).map(|s| Datum::String(s.to_lowercase())).unwrap_or(Datum::Null),
        "upper" => string_arg(values, 0).map(|s| Datum::String(s.to_uppercase())).unwrap_or(Datum::Null),
        "concat" => {
            if values.iter().any(Datum::is_null) {
                Datum::Null
            } else {
                Datum::String(values.iter().map(|d| d.to_string()).collect())
            }
        }
        "length" => string_arg(values, 0).map(|s| Datum::Int(s.len() as i64)).unwrap_or(Datum::Null),
        "char_length" => string_arg(values, 0)
            .map(|s| Datum::Int(s.chars().count() as i64))
            .unwrap_or(Datum::Null),
        "trim" => string_arg(values, 0).map(|s| Datum::String(s.trim().to_string())).unwrap_or(Datum::Null),
        "ltrim" => string_arg(values, 0)
            .map(|s| Datum::String(s.trim_start().to_string()))
            .unwrap_or(Datum::Null),
        "rtrim" => string_arg(values, 0)
            .map(|s| Datum::String(s.trim_end().to_string()))
            .unwrap_or(Datum::Null),
        "left" | "right" => match (string_arg(values, 0), values.get(1).and_then(Datum::as_i64)) {
            (Some(s), Some(n)) => {
                let chars: Vec<char> = s.chars().collect();
                let n = (n.max(0) as usize).min(chars.len());
                let slice = if name == "left" { &chars[..n] } else { &chars[chars.len() - n..] };
                Datum::String(slice.iter().collect())
            }
            _ => Datum::Null,
        },
        "reverse" => string_arg(values, 0)
            .map(|s| Datum::String(s.chars().rev().collect()))
            .unwrap_or(Datum::Null),
        "coalesce" | "ifnull" => values.iter().find(|d| !d.is_null()).cloned().unwrap_or(Datum::Null),
        "if" => {
            if first.is_true() {
                values.get(1).cloned().unwrap_or(Datum::Null)
            } else {
                values.get(2).cloned().unwrap_or(Datum::Null)
            }
        }
        "greatest" | "least" => {
            if values.iter().any(Datum::is_null) {
                Datum::Null
            } else {
                let nums: Option<Vec<f64>> = values.iter().map(Datum::as_f64).collect();
                let pick = |a: f64, b: f64| if name == "greatest" { a.max(b) } else { a.min(b) };
                match nums {
                    Some(nums) if !nums.is_empty() => {
                        let v = nums.iter().copied().fold(nums[0], pick);
                        if values.iter().all(|d| matches!(d, Datum::Int(_))) {
                            Datum::Int(v as i64)
                        } else {
                            Datum::Float(v)
                        }
                    }
                    _ => Datum::Null,
                }
            }
        }
        other => {
            return Err(DdlError::Internal(format!("function {} cannot be evaluated", other)));
        }
    };
    Ok(value)
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column(name) => write!(f, "`{}`", name),
            Expr::Literal(Datum::String(s)) => write!(f, "'{}'", s),
            Expr::Literal(d) => write!(f, "{}", d),
            Expr::Func { name, args } => {
                write!(f, "{}(", name)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Expr::Binary { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(name: &str) -> Option<Datum> {
        match name {
            "a" => Some(Datum::Int(1)),
            "b" => Some(Datum::Int(2)),
            "s" => Some(Datum::from("Abc")),
            _ => None,
        }
    }

    #[test]
    fn test_eval_arithmetic() {
        let e = Expr::binary(BinaryOp::Add, Expr::col("a"), Expr::col("B"));
        assert_eq!(e.eval(&row).unwrap(), Datum::Int(3));
        let e = Expr::binary(BinaryOp::Div, Expr::col("a"), Expr::lit(0));
        assert_eq!(e.eval(&row).unwrap(), Datum::Null);
    }

    #[test]
    fn test_eval_functions() {
        let e = Expr::func("UPPER", vec![Expr::col("s")]);
        assert_eq!(e.eval(&row).unwrap(), Datum::from("ABC"));
        let e = Expr::func("greatest", vec![Expr::col("a"), Expr::col("b")]);
        assert_eq!(e.eval(&row).unwrap(), Datum::Int(2));
        let e = Expr::func("left", vec![Expr::col("s"), Expr::lit(2)]);
        assert_eq!(e.eval(&row).unwrap(), Datum::from("Ab"));
    }

    #[test]
    fn test_references() {
        let e = Expr::binary(
            BinaryOp::Mul,
            Expr::func("abs", vec![Expr::col("A")]),
            Expr::col("b"),
        );
        assert_eq!(e.columns().into_iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert_eq!(e.functions().into_iter().collect::<Vec<_>>(), vec!["abs"]);
        assert_eq!(e.to_string(), "abs(`A`) * `b`");
    }
}
