//! Expression trees and their evaluation against one document at a time.
//!
//! Expressions arrive document-encoded — `"$a.b"` field paths, `"$$name"`
//! variables, `{"$op": args}` operator calls — and are parsed once into an
//! [`Expr`] tree. Operator dispatch goes through the registry; unknown
//! operator names are configuration errors raised at parse time.

mod operators;
mod registry;

pub use registry::{OperatorFn, lookup};

use crate::{
    error::{Error, ErrorOrigin},
    path,
    value::{Value, ValueHasher, Xxh3Hasher},
};
use std::collections::BTreeMap;
use std::rc::Rc;

///
/// Expr
///
/// Parsed operator tree. `Object` is a document-shaped expression whose
/// fields evaluate independently; `Operator` is a registry dispatch.
///

#[derive(Clone, Debug)]
pub enum Expr {
    Literal(Value),
    FieldPath(String),
    Variable(String),
    Operator(String, Box<Expr>),
    Object(Vec<(String, Expr)>),
    Array(Vec<Expr>),
}

impl Expr {
    /// Parse a document-encoded expression.
    pub fn parse(encoded: &Value) -> Result<Self, Error> {
        match encoded {
            Value::Text(s) => {
                if let Some(name) = s.strip_prefix("$$") {
                    Ok(Self::Variable(name.to_string()))
                } else if let Some(path) = s.strip_prefix('$') {
                    Ok(Self::FieldPath(path.to_string()))
                } else {
                    Ok(Self::Literal(encoded.clone()))
                }
            }
            Value::Array(items) => Ok(Self::Array(
                items.iter().map(Self::parse).collect::<Result<_, _>>()?,
            )),
            Value::Object(fields) => {
                if fields.len() == 1
                    && let Some((name, args)) = fields.first()
                    && name.starts_with('$')
                {
                    // $literal short-circuits parsing: its argument is the
                    // value itself, never an expression.
                    if name == "$literal" {
                        return Ok(Self::Literal(args.clone()));
                    }
                    if !registry::is_operator(name) {
                        return Err(Error::config(
                            ErrorOrigin::Expr,
                            format!("unknown operator '{name}'"),
                        ));
                    }
                    return Ok(Self::Operator(name.clone(), Box::new(Self::parse(args)?)));
                }

                if let Some(key) = fields.keys().find(|key| key.starts_with('$')) {
                    return Err(Error::config(
                        ErrorOrigin::Expr,
                        format!("operator '{key}' cannot be mixed with plain fields"),
                    ));
                }

                let entries = fields
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), Self::parse(value)?)))
                    .collect::<Result<Vec<_>, Error>>()?;
                Ok(Self::Object(entries))
            }
            other => Ok(Self::Literal(other.clone())),
        }
    }

    /// The literal numeric payload, when this expression is one.
    ///
    /// Used by `$sum` to short-circuit a constant projection.
    #[must_use]
    pub const fn as_numeric_literal(&self) -> Option<&Value> {
        match self {
            Self::Literal(value) if value.is_number() => Some(value),
            _ => None,
        }
    }
}

///
/// Context
///
/// Evaluation bindings: lexically scoped variables plus the engine options
/// (value hasher) shared by every stage of one pipeline run.
///

#[derive(Clone)]
pub struct Context {
    vars: BTreeMap<String, Value>,
    hasher: Rc<dyn ValueHasher>,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self {
            vars: BTreeMap::new(),
            hasher: Rc::new(Xxh3Hasher::default()),
        }
    }

    #[must_use]
    pub fn with_hasher(hasher: Rc<dyn ValueHasher>) -> Self {
        Self {
            vars: BTreeMap::new(),
            hasher,
        }
    }

    /// Scoped copy with one extra variable binding.
    #[must_use]
    pub fn with_var(&self, name: impl Into<String>, value: Value) -> Self {
        let mut scoped = self.clone();
        scoped.vars.insert(name.into(), value);
        scoped
    }

    #[must_use]
    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    #[must_use]
    pub fn hasher(&self) -> Rc<dyn ValueHasher> {
        Rc::clone(&self.hasher)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

/// Evaluate an expression against one document within a binding context.
pub fn evaluate(doc: &Value, expr: &Expr, ctx: &Context) -> Result<Value, Error> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::FieldPath(path) => Ok(path::resolve(doc, path)),
        Expr::Variable(name) => Ok(ctx.var(name).cloned().unwrap_or(Value::Absent)),
        Expr::Operator(name, args) => {
            let handler = registry::lookup(name).ok_or_else(|| {
                Error::config(ErrorOrigin::Expr, format!("unknown operator '{name}'"))
            })?;
            handler(args, doc, ctx)
        }
        Expr::Object(entries) => {
            let mut out = indexmap::IndexMap::with_capacity(entries.len());
            for (key, sub) in entries {
                let value = evaluate(doc, sub, ctx)?;
                // absent fields stay off the document
                if !value.is_absent() {
                    out.insert(key.clone(), value);
                }
            }
            Ok(Value::Object(out))
        }
        Expr::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for sub in items {
                out.push(evaluate(doc, sub, ctx)?);
            }
            Ok(Value::Array(out))
        }
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: serde_json::Value) -> Expr {
        Expr::parse(&Value::from_json(&json)).unwrap()
    }

    #[test]
    fn field_paths_resolve_against_the_document() {
        let doc = value!({"a": {"b": 3}});
        let expr = parse(serde_json::json!("$a.b"));
        assert_eq!(evaluate(&doc, &expr, &Context::new()).unwrap(), value!(3));
    }

    #[test]
    fn variables_resolve_against_the_context() {
        let ctx = Context::new().with_var("tier", value!("gold"));
        let expr = parse(serde_json::json!("$$tier"));
        assert_eq!(evaluate(&value!({}), &expr, &ctx).unwrap(), value!("gold"));

        let unbound = parse(serde_json::json!("$$nope"));
        assert!(
            evaluate(&value!({}), &unbound, &Context::new())
                .unwrap()
                .is_absent()
        );
    }

    #[test]
    fn unknown_operators_fail_at_parse_time() {
        let err = Expr::parse(&value!({"$frobnicate": 1})).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn literal_operator_suppresses_interpretation() {
        let expr = parse(serde_json::json!({"$literal": "$a.b"}));
        assert_eq!(
            evaluate(&value!({"a": {"b": 3}}), &expr, &Context::new()).unwrap(),
            value!("$a.b")
        );
    }

    #[test]
    fn object_expressions_evaluate_per_field_and_drop_absent() {
        let doc = value!({"a": 1});
        let expr = parse(serde_json::json!({"x": "$a", "y": "$missing"}));
        assert_eq!(
            evaluate(&doc, &expr, &Context::new()).unwrap(),
            value!({"x": 1})
        );
    }

    #[test]
    fn operator_and_plain_fields_cannot_mix() {
        let err = Expr::parse(&value!({"a": 1, "$add": [1, 2]})).unwrap_err();
        assert!(err.is_config());
    }
}
