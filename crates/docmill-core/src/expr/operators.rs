//! The stateless operator catalog: direct wrappers around host arithmetic
//! and string handling. Soft edge cases (nil operands) return null rather
//! than raising; genuine type mismatches are data errors.

use crate::{
    error::{Error, ErrorOrigin},
    expr::{Context, Expr, evaluate},
    value::{Value, canonical_cmp, is_equal},
};
use std::cmp::Ordering;

/// Evaluate an operator argument into its operand list: an array expression
/// yields one operand per element, anything else a single operand.
fn eval_operands(args: &Expr, doc: &Value, ctx: &Context) -> Result<Vec<Value>, Error> {
    match args {
        Expr::Array(items) => items.iter().map(|item| evaluate(doc, item, ctx)).collect(),
        other => Ok(vec![evaluate(doc, other, ctx)?]),
    }
}

fn expect_arity(name: &str, operands: &[Value], arity: usize) -> Result<(), Error> {
    if operands.len() == arity {
        Ok(())
    } else {
        Err(Error::config(
            ErrorOrigin::Expr,
            format!("{name} expects {arity} arguments, found {}", operands.len()),
        ))
    }
}

fn numeric_operand(name: &str, value: &Value) -> Result<f64, Error> {
    value.as_f64().ok_or_else(|| {
        Error::data(
            ErrorOrigin::Expr,
            format!("{name} expects numeric arguments, found {}", value.kind()),
        )
    })
}

// Integer-preserving numeric fold; promotes to float on overflow or any
// float operand.
#[expect(clippy::cast_precision_loss)]
fn fold_numbers(
    name: &str,
    operands: &[Value],
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, Error> {
    let mut acc: Option<Value> = None;
    for operand in operands {
        if operand.is_nil() {
            return Ok(Value::Null);
        }

        acc = Some(match (&acc, operand) {
            (None, value) => {
                numeric_operand(name, value)?;
                value.clone()
            }
            (Some(Value::Int(a)), Value::Int(b)) => match int_op(*a, *b) {
                Some(exact) => Value::Int(exact),
                None => Value::Float(float_op(*a as f64, *b as f64)),
            },
            (Some(current), value) => Value::Float(float_op(
                numeric_operand(name, current)?,
                numeric_operand(name, value)?,
            )),
        });
    }

    Ok(acc.unwrap_or(Value::Null))
}

///
/// ARITHMETIC
///

pub(super) fn add(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    let operands = eval_operands(args, doc, ctx)?;
    fold_numbers("$add", &operands, i64::checked_add, |a, b| a + b)
}

pub(super) fn multiply(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    let operands = eval_operands(args, doc, ctx)?;
    fold_numbers("$multiply", &operands, i64::checked_mul, |a, b| a * b)
}

pub(super) fn subtract(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    let operands = eval_operands(args, doc, ctx)?;
    expect_arity("$subtract", &operands, 2)?;
    fold_numbers("$subtract", &operands, i64::checked_sub, |a, b| a - b)
}

pub(super) fn divide(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    let operands = eval_operands(args, doc, ctx)?;
    expect_arity("$divide", &operands, 2)?;
    if operands.iter().any(Value::is_nil) {
        return Ok(Value::Null);
    }

    let divisor = numeric_operand("$divide", &operands[1])?;
    if divisor == 0.0 {
        return Err(Error::data(ErrorOrigin::Expr, "$divide by zero"));
    }

    Ok(Value::Float(numeric_operand("$divide", &operands[0])? / divisor))
}

pub(super) fn modulo(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    let operands = eval_operands(args, doc, ctx)?;
    expect_arity("$mod", &operands, 2)?;
    if operands.iter().any(Value::is_nil) {
        return Ok(Value::Null);
    }

    match (&operands[0], &operands[1]) {
        (Value::Int(a), Value::Int(b)) if *b != 0 => Ok(Value::Int(a % b)),
        (_, b) if numeric_operand("$mod", b)? == 0.0 => {
            Err(Error::data(ErrorOrigin::Expr, "$mod by zero"))
        }
        (a, b) => Ok(Value::Float(
            numeric_operand("$mod", a)? % numeric_operand("$mod", b)?,
        )),
    }
}

pub(super) fn abs(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    let operand = evaluate(doc, args, ctx)?;
    if operand.is_nil() {
        return Ok(Value::Null);
    }

    match operand {
        Value::Int(i) => Ok(Value::Int(i.saturating_abs())),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(Error::data(
            ErrorOrigin::Expr,
            format!("$abs expects a number, found {}", other.kind()),
        )),
    }
}

///
/// STRINGS
///

pub(super) fn concat(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    let operands = eval_operands(args, doc, ctx)?;
    let mut out = String::new();
    for operand in &operands {
        if operand.is_nil() {
            return Ok(Value::Null);
        }

        match operand.as_str() {
            Some(s) => out.push_str(s),
            None => {
                return Err(Error::data(
                    ErrorOrigin::Expr,
                    format!("$concat expects strings, found {}", operand.kind()),
                ));
            }
        }
    }

    Ok(Value::Text(out))
}

fn map_string(
    name: &str,
    args: &Expr,
    doc: &Value,
    ctx: &Context,
    f: fn(&str) -> String,
) -> Result<Value, Error> {
    let operand = evaluate(doc, args, ctx)?;
    if operand.is_nil() {
        // nil folds to the empty string, not null
        return Ok(Value::Text(String::new()));
    }

    operand.as_str().map(f).map(Value::Text).ok_or_else(|| {
        Error::data(
            ErrorOrigin::Expr,
            format!("{name} expects a string, found {}", operand.kind()),
        )
    })
}

pub(super) fn to_lower(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    map_string("$toLower", args, doc, ctx, str::to_lowercase)
}

pub(super) fn to_upper(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    map_string("$toUpper", args, doc, ctx, str::to_uppercase)
}

///
/// COMPARISON
///

fn compare_pair(name: &str, args: &Expr, doc: &Value, ctx: &Context) -> Result<Ordering, Error> {
    let operands = eval_operands(args, doc, ctx)?;
    expect_arity(name, &operands, 2)?;
    Ok(canonical_cmp(&operands[0], &operands[1]))
}

pub(super) fn cmp(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    let ordering = compare_pair("$cmp", args, doc, ctx)?;
    Ok(Value::Int(match ordering {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}

pub(super) fn eq(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    let operands = eval_operands(args, doc, ctx)?;
    expect_arity("$eq", &operands, 2)?;
    Ok(Value::Bool(is_equal(&operands[0], &operands[1])))
}

pub(super) fn ne(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    let operands = eval_operands(args, doc, ctx)?;
    expect_arity("$ne", &operands, 2)?;
    Ok(Value::Bool(!is_equal(&operands[0], &operands[1])))
}

pub(super) fn lt(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    Ok(Value::Bool(compare_pair("$lt", args, doc, ctx)? == Ordering::Less))
}

pub(super) fn lte(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    Ok(Value::Bool(compare_pair("$lte", args, doc, ctx)? != Ordering::Greater))
}

pub(super) fn gt(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    Ok(Value::Bool(compare_pair("$gt", args, doc, ctx)? == Ordering::Greater))
}

pub(super) fn gte(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    Ok(Value::Bool(compare_pair("$gte", args, doc, ctx)? != Ordering::Less))
}

///
/// CONDITIONAL
///

pub(super) fn cond(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    let (condition, then_branch, else_branch) = match args {
        Expr::Array(items) if items.len() == 3 => (&items[0], &items[1], &items[2]),
        Expr::Object(entries) if entries.len() == 3 => {
            let find = |name: &str| {
                entries
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, sub)| sub)
            };
            match (find("if"), find("then"), find("else")) {
                (Some(condition), Some(then_branch), Some(else_branch)) => {
                    (condition, then_branch, else_branch)
                }
                _ => {
                    return Err(Error::config(
                        ErrorOrigin::Expr,
                        "$cond requires if/then/else",
                    ));
                }
            }
        }
        _ => {
            return Err(Error::config(
                ErrorOrigin::Expr,
                "$cond requires [if, then, else] or {if, then, else}",
            ));
        }
    };

    // only the selected branch evaluates
    let selected = match evaluate(doc, condition, ctx)? {
        Value::Bool(true) => then_branch,
        Value::Bool(false) => else_branch,
        other if other.is_nil() => else_branch,
        _ => then_branch,
    };
    evaluate(doc, selected, ctx)
}

pub(super) fn if_null(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    let Expr::Array(items) = args else {
        return Err(Error::config(
            ErrorOrigin::Expr,
            "$ifNull requires an argument array",
        ));
    };
    if items.len() < 2 {
        return Err(Error::config(
            ErrorOrigin::Expr,
            "$ifNull requires at least 2 arguments",
        ));
    }

    for sub in items {
        let value = evaluate(doc, sub, ctx)?;
        if !value.is_nil() {
            return Ok(value);
        }
    }

    Ok(Value::Null)
}

///
/// INTROSPECTION
///

pub(super) fn size(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    let operand = evaluate(doc, args, ctx)?;
    match operand.as_array() {
        Some(items) => Ok(Value::Int(i64::try_from(items.len()).unwrap_or(i64::MAX))),
        None => Err(Error::data(
            ErrorOrigin::Expr,
            format!("$size expects an array, found {}", operand.kind()),
        )),
    }
}

pub(super) fn is_number(args: &Expr, doc: &Value, ctx: &Context) -> Result<Value, Error> {
    let operand = evaluate(doc, args, ctx)?;
    Ok(Value::Bool(operand.is_number()))
}

///
/// TESTS
///
