use crate::{
    error::Error,
    expr::{Context, Expr, operators},
    value::Value,
};

///
/// OperatorFn
///
/// Polymorphic operator handler: raw (unevaluated) argument expression,
/// current document, binding context. Handlers evaluate their own arguments
/// so conditional operators keep lazy branches.
///

pub type OperatorFn = fn(&Expr, &Value, &Context) -> Result<Value, Error>;

/// Resolve an operator name to its handler. Match-backed tagged dispatch;
/// the open set of operators grows by adding an arm, not a type.
#[must_use]
pub fn lookup(name: &str) -> Option<OperatorFn> {
    let handler: OperatorFn = match name {
        "$abs" => operators::abs,
        "$add" => operators::add,
        "$cmp" => operators::cmp,
        "$concat" => operators::concat,
        "$cond" => operators::cond,
        "$divide" => operators::divide,
        "$eq" => operators::eq,
        "$gt" => operators::gt,
        "$gte" => operators::gte,
        "$ifNull" => operators::if_null,
        "$isNumber" => operators::is_number,
        "$lt" => operators::lt,
        "$lte" => operators::lte,
        "$mod" => operators::modulo,
        "$multiply" => operators::multiply,
        "$ne" => operators::ne,
        "$size" => operators::size,
        "$subtract" => operators::subtract,
        "$toLower" => operators::to_lower,
        "$toUpper" => operators::to_upper,
        _ => return None,
    };

    Some(handler)
}

/// True when `name` dispatches to a registered handler.
///
/// `$literal` is handled structurally at parse time and counts as known.
#[must_use]
pub(crate) fn is_operator(name: &str) -> bool {
    name == "$literal" || lookup(name).is_some()
}
