//! Dotted-path addressing over nested object/array graphs.
//!
//! Reads distinguish three outcomes: a present value, an explicit null, and
//! an absent field (`Value::Absent`). Graph reconstruction additionally
//! tracks a missing sentinel — "this path was traversed but produced no
//! value" — which never escapes this module: [`GraphValue::into_value`]
//! prunes it before a plain value is handed back.

use crate::value::Value;
use indexmap::IndexMap;


/// True for path segments addressing an array index.
fn is_index_segment(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit())
}

fn get_key<'a>(value: &'a Value, segment: &str) -> Option<&'a Value> {
    match value {
        Value::Object(fields) => fields.get(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get(index)),
        _ => None,
    }
}

///
/// resolve
///

/// Resolve a dotted path against a document.
///
/// When the current value is an array and the next segment is non-numeric,
/// resolution descends into each element with the remaining path and
/// collects the non-absent results ("implicit array descent"). A re-entry
/// guard keeps descent to one occurrence per top-level call: a second
/// array-valued level encountered on the first remaining segment stops the
/// walk instead of descending again.
///
/// Returns `Value::Absent` when the path does not exist.
#[must_use]
pub fn resolve(doc: &Value, path: &str) -> Value {
    let segments = path.split('.').collect::<Vec<_>>();
    let mut depth = 0usize;
    resolve_segments(doc, &segments, &mut depth).unwrap_or(Value::Absent)
}

/// [`resolve`] that unwraps a single-element result array back to a scalar,
/// once per recorded descent level.
#[must_use]
pub fn resolve_unwrapped(doc: &Value, path: &str) -> Value {
    let segments = path.split('.').collect::<Vec<_>>();
    let mut depth = 0usize;
    match resolve_segments(doc, &segments, &mut depth) {
        None => Value::Absent,
        Some(Value::Array(items)) => unwrap_single(items, depth),
        Some(value) => value,
    }
}

fn resolve_segments(value: &Value, segments: &[&str], depth: &mut usize) -> Option<Value> {
    let mut current = value;
    for (i, segment) in segments.iter().enumerate() {
        if let Value::Array(items) = current
            && !is_index_segment(segment)
        {
            // Re-entry guard: one descent per top-level call.
            if i == 0 && *depth > 0 {
                break;
            }

            *depth += 1;
            let rest = &segments[i..];
            let collected = items
                .iter()
                .filter_map(|item| resolve_segments(item, rest, depth))
                .collect();
            return Some(Value::Array(collected));
        }

        match get_key(current, segment) {
            Some(next) => current = next,
            None => return None,
        }
    }

    Some(current.clone())
}

fn unwrap_single(items: Vec<Value>, depth: usize) -> Value {
    let mut value = Value::Array(items);
    for _ in 0..depth {
        match value {
            Value::Array(mut items) if items.len() == 1 => {
                value = items.pop().unwrap_or(Value::Absent);
            }
            other => return other,
        }
    }

    value
}

///
/// GraphValue
///
/// Shape-preserving result of a graph resolution: the traversed structure
/// with only the touched path populated. `Missing` is the sentinel for
/// "touched but produced no value" — distinct from a field that never
/// existed (the whole resolution returns `None` for those) and from an
/// explicit null leaf.
///

#[derive(Clone, Debug, PartialEq)]
pub enum GraphValue {
    Missing,
    Leaf(Value),
    Object(IndexMap<String, GraphValue>),
    Array(Vec<GraphValue>),
}

impl GraphValue {
    /// Collapse the graph into a plain value, stripping the missing
    /// sentinel: array slots are removed (shifting subsequent indices) and
    /// object fields are skipped, so the sentinel never leaves this module.
    #[must_use]
    pub fn into_value(self) -> Value {
        match self {
            Self::Missing => Value::Absent,
            Self::Leaf(value) => value,
            Self::Object(fields) => Value::Object(
                fields
                    .into_iter()
                    .filter(|(_, node)| !matches!(node, Self::Missing))
                    .map(|(key, node)| (key, node.into_value()))
                    .collect(),
            ),
            Self::Array(items) => Value::Array(
                items
                    .into_iter()
                    .filter(|node| !matches!(node, Self::Missing))
                    .map(Self::into_value)
                    .collect(),
            ),
        }
    }
}

///
/// GraphOptions
///

#[derive(Clone, Copy, Debug, Default)]
pub struct GraphOptions {
    /// Substitute the missing sentinel for absent per-element results during
    /// implicit array descent, so array shape survives reconstruction.
    pub preserve_missing: bool,
    /// Carry untouched sibling keys of traversed objects into the result.
    pub preserve_keys: bool,
}

/// Resolve a dotted path, reconstructing the shape of the traversed
/// structure rather than collapsing to a flat value. Returns `None` when
/// the path never existed.
#[must_use]
pub fn resolve_graph(doc: &Value, path: &str, options: GraphOptions) -> Option<GraphValue> {
    let segments = path.split('.').collect::<Vec<_>>();
    resolve_graph_at(doc, &segments, options)
}

fn resolve_graph_at(value: &Value, segments: &[&str], options: GraphOptions) -> Option<GraphValue> {
    let segment = *segments.first()?;
    let rest = &segments[1..];

    match value {
        Value::Array(items) => {
            if is_index_segment(segment) {
                let index = segment.parse::<usize>().ok()?;
                let element = items.get(index)?;
                let node = if rest.is_empty() {
                    GraphValue::Leaf(element.clone())
                } else {
                    resolve_graph_at(element, rest, options)?
                };
                // Reconstructed array shape holds just the touched element.
                Some(GraphValue::Array(vec![node]))
            } else {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match resolve_graph_at(item, segments, options) {
                        Some(node) => out.push(node),
                        None if options.preserve_missing => out.push(GraphValue::Missing),
                        None => {}
                    }
                }
                Some(GraphValue::Array(out))
            }
        }
        Value::Object(fields) => {
            let inner = fields.get(segment)?;
            let node = if rest.is_empty() {
                GraphValue::Leaf(inner.clone())
            } else {
                resolve_graph_at(inner, rest, options)?
            };

            let mut out = if options.preserve_keys {
                fields
                    .iter()
                    .map(|(key, value)| (key.clone(), GraphValue::Leaf(value.clone())))
                    .collect()
            } else {
                IndexMap::new()
            };
            out.insert(segment.to_string(), node);
            Some(GraphValue::Object(out))
        }
        _ => None,
    }
}

///
/// WalkOptions
///

#[derive(Clone, Copy, Debug, Default)]
pub struct WalkOptions {
    /// Auto-create empty objects along intermediate segments.
    pub build_graph: bool,
    /// Apply the walk across every element of a trailing array when the next
    /// segment is not a numeric index.
    pub descend_array: bool,
}

/// Generic path-driven tree walker: `visit` receives the container holding
/// the leaf segment plus the leaf segment itself.
pub fn walk(doc: &mut Value, path: &str, visit: &mut dyn FnMut(&mut Value, &str), options: WalkOptions) {
    let segments = path.split('.').collect::<Vec<_>>();
    if !segments.is_empty() {
        walk_segments(doc, &segments, visit, options);
    }
}

fn walk_segments(
    value: &mut Value,
    segments: &[&str],
    visit: &mut dyn FnMut(&mut Value, &str),
    options: WalkOptions,
) {
    let segment = segments[0];

    if segments.len() == 1 {
        if let Value::Array(items) = value
            && options.descend_array
            && !is_index_segment(segment)
        {
            for item in items {
                walk_segments(item, segments, visit, options);
            }
        } else {
            visit(value, segment);
        }
        return;
    }

    let rest = &segments[1..];
    if options.build_graph
        && let Value::Object(fields) = value
    {
        let entry = fields
            .entry(segment.to_string())
            .or_insert(Value::Absent);
        if entry.is_nil() {
            *entry = Value::Object(IndexMap::new());
        }
    }

    let next_is_index = is_index_segment(rest[0]);
    let next = match value {
        Value::Object(fields) => fields.get_mut(segment),
        Value::Array(items) => segment
            .parse::<usize>()
            .ok()
            .and_then(|index| items.get_mut(index)),
        _ => None,
    };
    let Some(next) = next else {
        return;
    };

    if let Value::Array(items) = next
        && options.descend_array
        && !next_is_index
    {
        for item in items {
            walk_segments(item, rest, visit, options);
        }
    } else {
        walk_segments(next, rest, visit, options);
    }
}

///
/// set / remove
///

/// Assign a literal value at a dotted path, auto-creating intermediate
/// objects.
pub fn set_value(doc: &mut Value, path: &str, value: &Value) {
    set_value_with(doc, path, |_| value.clone());
}

/// Assign through a value transform: the callback receives the prior value
/// (`Value::Absent` when the leaf did not exist) and returns the new one.
pub fn set_value_with(doc: &mut Value, path: &str, transform: impl Fn(&Value) -> Value) {
    let mut visit = |container: &mut Value, key: &str| match container {
        Value::Object(fields) => {
            let prior = fields.get(key).cloned().unwrap_or(Value::Absent);
            fields.insert(key.to_string(), transform(&prior));
        }
        Value::Array(items) => {
            if let Ok(index) = key.parse::<usize>() {
                if index < items.len() {
                    let next = transform(&items[index]);
                    items[index] = next;
                } else {
                    // Writing past the end pads the gap with nulls, keeping
                    // the addressed index addressable afterwards.
                    items.resize(index, Value::Null);
                    items.push(transform(&Value::Absent));
                }
            }
        }
        _ => {}
    };

    walk(
        doc,
        path,
        &mut visit,
        WalkOptions {
            build_graph: true,
            descend_array: false,
        },
    );
}

/// Delete the value at a dotted path: splice-style removal for numeric
/// array indices (shifting subsequent elements), key deletion for objects,
/// cascading into every element of an array when the leaf segment is
/// non-numeric.
pub fn remove_value(doc: &mut Value, path: &str) {
    let mut visit = |container: &mut Value, key: &str| match container {
        Value::Object(fields) => {
            fields.shift_remove(key);
        }
        Value::Array(items) => {
            if let Ok(index) = key.parse::<usize>()
                && index < items.len()
            {
                items.remove(index);
            }
        }
        _ => {}
    };

    walk(
        doc,
        path,
        &mut visit,
        WalkOptions {
            build_graph: false,
            descend_array: true,
        },
    );
}
