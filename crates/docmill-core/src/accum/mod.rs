//! Fold-style accumulators reducing one document group to one value.
//!
//! Every accumulator shares the shape `(documents, expression, context)`:
//! the expression projects each document inside the supplied evaluation
//! context, and the fold collapses the projection. The `n`-parameterized
//! variants read their group identifier from the context binding installed
//! by the grouping stage.

use crate::{
    error::{Error, ErrorOrigin},
    expr::{Context, Expr, evaluate},
    value::{Value, canonical_cmp, unique_with_hasher},
};
use std::cmp::Ordering;

/// Context variable carrying the active group key for `n` expressions.
pub const GROUP_ID_VAR: &str = "groupId";

///
/// AccumulatorFn
///
/// Polymorphic accumulator handler over a materialized document group.
///

pub type AccumulatorFn = fn(&[Value], &Expr, &Context) -> Result<Value, Error>;

/// Resolve an accumulator name to its handler.
#[must_use]
pub fn lookup(name: &str) -> Option<AccumulatorFn> {
    let handler: AccumulatorFn = match name {
        "$addToSet" => add_to_set,
        "$avg" => avg,
        "$count" => count,
        "$covariancePop" => covariance_pop,
        "$covarianceSamp" => covariance_samp,
        "$firstN" => first_n,
        "$lastN" => last_n,
        "$max" => max,
        "$maxN" => max_n,
        "$min" => min,
        "$minN" => min_n,
        "$push" => push,
        "$stdDevPop" => std_dev_pop,
        "$stdDevSamp" => std_dev_samp,
        "$sum" => sum,
        _ => return None,
    };

    Some(handler)
}

/// Project the expression over every document, preserving order and
/// duplicates. The base of every other accumulator.
pub fn project(docs: &[Value], expr: &Expr, ctx: &Context) -> Result<Vec<Value>, Error> {
    docs.iter().map(|doc| evaluate(doc, expr, ctx)).collect()
}

fn push(docs: &[Value], expr: &Expr, ctx: &Context) -> Result<Value, Error> {
    Ok(Value::Array(project(docs, expr, ctx)?))
}

fn add_to_set(docs: &[Value], expr: &Expr, ctx: &Context) -> Result<Value, Error> {
    let projected = project(docs, expr, ctx)?;
    Ok(Value::Array(unique_with_hasher(&projected, ctx.hasher())?))
}

fn count(docs: &[Value], _expr: &Expr, _ctx: &Context) -> Result<Value, Error> {
    Ok(Value::Int(i64::try_from(docs.len()).unwrap_or(i64::MAX)))
}

///
/// NUMERIC FOLDS
///

// Integer-exact running sum that degrades to float on overflow or any
// float contribution.
#[derive(Clone, Copy, Debug)]
enum RunningSum {
    Int(i64),
    Float(f64),
}

impl RunningSum {
    const ZERO: Self = Self::Int(0);

    #[expect(clippy::cast_precision_loss)]
    fn add(self, value: &Value) -> Self {
        match (self, value) {
            (Self::Int(acc), Value::Int(i)) => acc
                .checked_add(*i)
                .map_or(Self::Float(acc as f64 + *i as f64), Self::Int),
            (Self::Int(acc), Value::Float(f)) => Self::Float(acc as f64 + f),
            (Self::Float(acc), Value::Int(i)) => Self::Float(acc + *i as f64),
            (Self::Float(acc), Value::Float(f)) => Self::Float(acc + f),
            (acc, _) => acc,
        }
    }

    const fn into_value(self) -> Value {
        match self {
            Self::Int(i) => Value::Int(i),
            Self::Float(f) => Value::Float(f),
        }
    }
}

fn sum(docs: &[Value], expr: &Expr, ctx: &Context) -> Result<Value, Error> {
    // constant projection short-circuits to count × literal
    if let Some(literal) = expr.as_numeric_literal() {
        let n = i64::try_from(docs.len()).unwrap_or(i64::MAX);
        return Ok(match literal {
            #[expect(clippy::cast_precision_loss)]
            Value::Int(i) => i
                .checked_mul(n)
                .map_or(Value::Float(*i as f64 * n as f64), Value::Int),
            #[expect(clippy::cast_precision_loss)]
            Value::Float(f) => Value::Float(f * n as f64),
            _ => Value::Int(0),
        });
    }

    let projected = project(docs, expr, ctx)?;
    let total = projected
        .iter()
        .filter(|value| value.is_number())
        .fold(RunningSum::ZERO, RunningSum::add);
    Ok(total.into_value())
}

#[expect(clippy::cast_precision_loss)]
fn avg(docs: &[Value], expr: &Expr, ctx: &Context) -> Result<Value, Error> {
    let projected = project(docs, expr, ctx)?;
    let numbers = projected
        .iter()
        .filter_map(Value::as_f64)
        .collect::<Vec<_>>();

    let total: f64 = numbers.iter().sum();
    // empty input divides by 1, not 0
    Ok(Value::Float(total / (numbers.len().max(1)) as f64))
}

fn min(docs: &[Value], expr: &Expr, ctx: &Context) -> Result<Value, Error> {
    extremum(docs, expr, ctx, Ordering::Less)
}

fn max(docs: &[Value], expr: &Expr, ctx: &Context) -> Result<Value, Error> {
    extremum(docs, expr, ctx, Ordering::Greater)
}

// Linear scan skipping nil and NaN. The replace rule fixes the tie winner:
// min replaces only on strict improvement (first occurrence wins), max
// replaces on greater-or-equal (latest occurrence wins).
fn extremum(
    docs: &[Value],
    expr: &Expr,
    ctx: &Context,
    direction: Ordering,
) -> Result<Value, Error> {
    let projected = project(docs, expr, ctx)?;
    let mut best: Option<&Value> = None;
    for candidate in &projected {
        if candidate.is_nil() || matches!(candidate, Value::Float(f) if f.is_nan()) {
            continue;
        }

        let replace = match best {
            None => true,
            Some(current) => {
                let cmp = canonical_cmp(candidate, current);
                if direction == Ordering::Less {
                    cmp == Ordering::Less
                } else {
                    cmp != Ordering::Less
                }
            }
        };
        if replace {
            best = Some(candidate);
        }
    }

    Ok(best.cloned().unwrap_or(Value::Null))
}

///
/// N-LIMITED VARIANTS
///

// Split an `{n, input}` accumulator argument and resolve `n` per group
// against the group-identifier binding.
fn n_and_input<'e>(
    name: &str,
    args: &'e Expr,
    ctx: &Context,
) -> Result<(usize, &'e Expr), Error> {
    let Expr::Object(entries) = args else {
        return Err(Error::config(
            ErrorOrigin::Accumulator,
            format!("{name} requires {{n, input}} arguments"),
        ));
    };

    let find = |key: &str| entries.iter().find(|(k, _)| k == key).map(|(_, sub)| sub);
    let (Some(n_expr), Some(input)) = (find("n"), find("input")) else {
        return Err(Error::config(
            ErrorOrigin::Accumulator,
            format!("{name} requires {{n, input}} arguments"),
        ));
    };

    // n may reference the group key through the context binding
    let n_doc = ctx
        .var(GROUP_ID_VAR)
        .cloned()
        .map_or(Value::Null, |group_id| value!({ "_id": group_id }));
    let n = evaluate(&n_doc, n_expr, ctx)?;
    let n = n.as_i64().filter(|n| *n > 0).ok_or_else(|| {
        Error::config(
            ErrorOrigin::Accumulator,
            format!("{name} requires a positive integer n, found {}", n.kind()),
        )
    })?;

    Ok((usize::try_from(n).unwrap_or(usize::MAX), input))
}

fn sorted_truncated(
    name: &str,
    docs: &[Value],
    args: &Expr,
    ctx: &Context,
    descending: bool,
) -> Result<Value, Error> {
    let (n, input) = n_and_input(name, args, ctx)?;
    let mut kept = project(docs, input, ctx)?
        .into_iter()
        .filter(|value| !value.is_nil())
        .collect::<Vec<_>>();

    if descending {
        kept.sort_by(|a, b| canonical_cmp(b, a));
    } else {
        kept.sort_by(canonical_cmp);
    }
    kept.truncate(n);

    Ok(Value::Array(kept))
}

fn min_n(docs: &[Value], args: &Expr, ctx: &Context) -> Result<Value, Error> {
    sorted_truncated("$minN", docs, args, ctx, false)
}

fn max_n(docs: &[Value], args: &Expr, ctx: &Context) -> Result<Value, Error> {
    sorted_truncated("$maxN", docs, args, ctx, true)
}

// firstN/lastN slice the input documents, not a sorted projection: the
// pipeline-supplied order is the contract.
fn first_n(docs: &[Value], args: &Expr, ctx: &Context) -> Result<Value, Error> {
    let (n, input) = n_and_input("$firstN", args, ctx)?;
    let slice = &docs[..docs.len().min(n)];
    Ok(Value::Array(project(slice, input, ctx)?))
}

fn last_n(docs: &[Value], args: &Expr, ctx: &Context) -> Result<Value, Error> {
    let (n, input) = n_and_input("$lastN", args, ctx)?;
    let slice = &docs[docs.len().saturating_sub(n)..];
    Ok(Value::Array(project(slice, input, ctx)?))
}

///
/// STATISTICS
///

fn numeric_projection(docs: &[Value], expr: &Expr, ctx: &Context) -> Result<Vec<f64>, Error> {
    Ok(project(docs, expr, ctx)?
        .iter()
        .filter_map(Value::as_f64)
        .collect())
}

#[expect(clippy::cast_precision_loss)]
fn std_dev(docs: &[Value], expr: &Expr, ctx: &Context, sample: bool) -> Result<Value, Error> {
    let numbers = numeric_projection(docs, expr, ctx)?;
    let n = numbers.len();
    let divisor = if sample { n.saturating_sub(1) } else { n };
    if divisor == 0 {
        // N−1 ≤ 0 for the sample variant, empty input for population
        return Ok(Value::Null);
    }

    let mean = numbers.iter().sum::<f64>() / n as f64;
    let variance = numbers
        .iter()
        .map(|x| (x - mean).powi(2))
        .sum::<f64>()
        / divisor as f64;
    Ok(Value::Float(variance.sqrt()))
}

fn std_dev_pop(docs: &[Value], expr: &Expr, ctx: &Context) -> Result<Value, Error> {
    std_dev(docs, expr, ctx, false)
}

fn std_dev_samp(docs: &[Value], expr: &Expr, ctx: &Context) -> Result<Value, Error> {
    std_dev(docs, expr, ctx, true)
}

#[expect(clippy::cast_precision_loss)]
fn covariance(docs: &[Value], args: &Expr, ctx: &Context, sample: bool) -> Result<Value, Error> {
    let Expr::Array(exprs) = args else {
        return Err(Error::config(
            ErrorOrigin::Accumulator,
            "covariance requires [x, y] expressions",
        ));
    };
    let [x_expr, y_expr] = exprs.as_slice() else {
        return Err(Error::config(
            ErrorOrigin::Accumulator,
            "covariance requires exactly 2 expressions",
        ));
    };

    let mut pairs = Vec::with_capacity(docs.len());
    for doc in docs {
        let x = evaluate(doc, x_expr, ctx)?;
        let y = evaluate(doc, y_expr, ctx)?;
        if let (Some(x), Some(y)) = (x.as_f64(), y.as_f64()) {
            pairs.push((x, y));
        }
    }

    let n = pairs.len();
    let divisor = if sample { n.saturating_sub(1) } else { n };
    if divisor == 0 {
        return Ok(Value::Null);
    }

    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / n as f64;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / n as f64;
    let total: f64 = pairs
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    Ok(Value::Float(total / divisor as f64))
}

fn covariance_pop(docs: &[Value], args: &Expr, ctx: &Context) -> Result<Value, Error> {
    covariance(docs, args, ctx, false)
}

fn covariance_samp(docs: &[Value], args: &Expr, ctx: &Context) -> Result<Value, Error> {
    covariance(docs, args, ctx, true)
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    fn docs() -> Vec<Value> {
        vec![
            value!({"x": 1, "y": 2}),
            value!({"x": 4, "y": 3}),
            value!({"x": 1, "y": 6}),
            value!({"x": 9}),
        ]
    }

    fn run(name: &str, args: serde_json::Value) -> Value {
        run_on(&docs(), name, args)
    }

    fn run_on(group: &[Value], name: &str, args: serde_json::Value) -> Value {
        let expr = Expr::parse(&Value::from_json(&args)).unwrap();
        let ctx = Context::new().with_var(GROUP_ID_VAR, Value::Null);
        lookup(name).unwrap()(group, &expr, &ctx).unwrap()
    }

    #[test]
    fn push_preserves_order_and_duplicates() {
        assert_eq!(run("$push", serde_json::json!("$x")), value!([1, 4, 1, 9]));
    }

    #[test]
    fn push_keeps_absent_projections() {
        let out = run("$push", serde_json::json!("$y"));
        assert_eq!(out, Value::Array(vec![
            value!(2),
            value!(3),
            value!(6),
            Value::Absent,
        ]));
    }

    #[test]
    fn add_to_set_deduplicates_in_first_occurrence_order() {
        assert_eq!(run("$addToSet", serde_json::json!("$x")), value!([1, 4, 9]));
    }

    #[test]
    fn sum_ignores_non_numeric_projections() {
        assert_eq!(run("$sum", serde_json::json!("$x")), value!(15));
        assert_eq!(run("$sum", serde_json::json!("$y")), value!(11));
        assert_eq!(run("$sum", serde_json::json!("$missing")), value!(0));
    }

    #[test]
    fn sum_short_circuits_numeric_literals() {
        assert_eq!(run("$sum", serde_json::json!(1)), value!(4));
        assert_eq!(run("$sum", serde_json::json!(2.5)), value!(10.0));
    }

    #[test]
    fn avg_divides_by_the_numeric_count() {
        assert_eq!(run("$avg", serde_json::json!("$y")), value!(11.0 / 3.0));
        // empty input defaults the divisor to 1
        assert_eq!(run_on(&[], "$avg", serde_json::json!("$y")), value!(0.0));
    }

    #[test]
    fn min_and_max_skip_nil_and_use_tie_rules() {
        assert_eq!(run("$min", serde_json::json!("$x")), value!(1));
        assert_eq!(run("$max", serde_json::json!("$x")), value!(9));
        assert_eq!(run("$min", serde_json::json!("$y")), value!(2));
        assert_eq!(run_on(&[], "$min", serde_json::json!("$x")), Value::Null);
    }

    #[test]
    fn max_takes_the_latest_of_equal_candidates() {
        let group = vec![
            value!({"x": 2, "tag": "first"}),
            value!({"x": 2, "tag": "second"}),
        ];
        let expr = Expr::parse(&Value::from_json(&serde_json::json!({
            "v": "$x", "tag": "$tag"
        })))
        .unwrap();
        // objects compare equal-or-indeterminate, so max keeps the latest
        let out = lookup("$max").unwrap()(&group, &expr, &Context::new()).unwrap();
        assert_eq!(out, value!({"v": 2, "tag": "second"}));
    }

    #[test]
    fn min_n_sorts_ascending_and_truncates() {
        assert_eq!(
            run("$minN", serde_json::json!({"n": 2, "input": "$x"})),
            value!([1, 1])
        );
        assert_eq!(
            run("$maxN", serde_json::json!({"n": 2, "input": "$x"})),
            value!([9, 4])
        );
    }

    #[test]
    fn first_n_and_last_n_slice_documents_not_sorted_projections() {
        assert_eq!(
            run("$firstN", serde_json::json!({"n": 2, "input": "$x"})),
            value!([1, 4])
        );
        assert_eq!(
            run("$lastN", serde_json::json!({"n": 2, "input": "$x"})),
            value!([1, 9])
        );
    }

    #[test]
    fn n_must_be_a_positive_integer() {
        let expr = Expr::parse(&Value::from_json(&serde_json::json!({
            "n": 0, "input": "$x"
        })))
        .unwrap();
        let err = lookup("$minN").unwrap()(&docs(), &expr, &Context::new()).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn std_dev_population_and_sample_divisors() {
        let group = vec![value!({"x": 2}), value!({"x": 4})];
        assert_eq!(run_on(&group, "$stdDevPop", serde_json::json!("$x")), value!(1.0));
        assert_eq!(
            run_on(&group, "$stdDevSamp", serde_json::json!("$x")),
            value!(2.0f64.sqrt())
        );
    }

    #[test]
    fn std_dev_samp_of_single_element_group_is_null() {
        let group = vec![value!({"x": 2})];
        assert_eq!(
            run_on(&group, "$stdDevSamp", serde_json::json!("$x")),
            Value::Null
        );
        assert_eq!(
            run_on(&group, "$stdDevPop", serde_json::json!("$x")),
            value!(0.0)
        );
    }

    #[test]
    fn covariance_over_paired_projections() {
        let group = vec![
            value!({"x": 1, "y": 2}),
            value!({"x": 2, "y": 4}),
            value!({"x": 3, "y": 6}),
        ];
        assert_eq!(
            run_on(&group, "$covariancePop", serde_json::json!(["$x", "$y"])),
            value!(4.0 / 3.0)
        );
        assert_eq!(
            run_on(&group, "$covarianceSamp", serde_json::json!(["$x", "$y"])),
            value!(2.0)
        );
        assert_eq!(
            run_on(&[value!({"x": 1, "y": 1})], "$covarianceSamp", serde_json::json!(["$x", "$y"])),
            Value::Null
        );
    }

    #[test]
    fn count_is_the_group_size() {
        assert_eq!(run("$count", serde_json::json!({})), value!(4));
    }
}
