use crate::{
    error::{Error, ErrorOrigin},
    expr::{Context, Expr, evaluate},
    obs::{self, MetricsEvent},
    path,
    stage::{Lazy, SortStage},
    value::{Value, ValueMap},
};
use std::collections::HashMap;

///
/// WindowFieldsStage
///
/// Window-fill over ordered partitions: documents sharing the evaluated
/// `partitionBy` key, sorted by `sortBy`, get output fields filled by
/// `$locf` (last observation carried forward) or `$linearFill` (linear
/// interpolation between numeric neighbors).
///
/// Each fill operator computes its full-partition result once and memoizes
/// it keyed by partition ordinal + output field; the per-document call then
/// indexes into the cached result. Without the memo the same partition pass
/// would recompute once per document.
///

#[derive(Debug)]
pub struct WindowFieldsStage {
    partition_by: Option<Expr>,
    sort: SortStage,
    sort_field: String,
    outputs: Vec<FillOutput>,
}

#[derive(Debug)]
struct FillOutput {
    field: String,
    kind: FillKind,
    input: Expr,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum FillKind {
    Locf,
    Linear,
}

impl WindowFieldsStage {
    pub fn parse(config: &Value) -> Result<Self, Error> {
        let Some(fields) = config.as_object() else {
            return Err(Error::config(
                ErrorOrigin::Window,
                format!("$setWindowFields requires a document, found {}", config.kind()),
            ));
        };

        let partition_by = fields
            .get("partitionBy")
            .map(Expr::parse)
            .transpose()?;

        // deterministic ordering is the operators' precondition, so sortBy
        // is mandatory here
        let sort_encoded = fields.get("sortBy").ok_or_else(|| {
            Error::config(ErrorOrigin::Window, "$setWindowFields requires sortBy")
        })?;
        let sort = SortStage::parse(sort_encoded)?;
        let sort_field = sort_encoded
            .as_object()
            .and_then(indexmap::IndexMap::first)
            .map(|(field, _)| field.clone())
            .ok_or_else(|| Error::config(ErrorOrigin::Window, "sortBy must name a field"))?;

        let output = fields
            .get("output")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                Error::config(ErrorOrigin::Window, "$setWindowFields requires an output document")
            })?;

        let mut outputs = Vec::with_capacity(output.len());
        for (field, encoded) in output {
            let spec = encoded.as_object().filter(|fields| fields.len() == 1);
            let Some((name, input)) = spec.and_then(indexmap::IndexMap::first) else {
                return Err(Error::config(
                    ErrorOrigin::Window,
                    format!("output field '{field}' must be a single {{\"$fill\": expr}} document"),
                ));
            };
            let kind = match name.as_str() {
                "$locf" => FillKind::Locf,
                "$linearFill" => FillKind::Linear,
                _ => {
                    return Err(Error::config(
                        ErrorOrigin::Window,
                        format!("unknown window fill operator '{name}'"),
                    ));
                }
            };
            outputs.push(FillOutput {
                field: field.clone(),
                kind,
                input: Expr::parse(input)?,
            });
        }

        Ok(Self {
            partition_by,
            sort,
            sort_field,
            outputs,
        })
    }

    pub(super) fn apply(&self, input: Lazy, ctx: &Context) -> Result<Lazy, Error> {
        let docs = input.into_vec()?;

        // Partitions keep first-occurrence order of their key; documents
        // keep input order within a partition until the sort applies.
        let mut partitions: ValueMap<Vec<Value>> = ValueMap::with_hasher(ctx.hasher());
        for doc in docs {
            let key = match &self.partition_by {
                Some(expr) => match evaluate(&doc, expr, ctx)? {
                    Value::Absent => Value::Null,
                    key => key,
                },
                None => Value::Null,
            };
            partitions.get_or_insert_with(key, Vec::new)?.push(doc);
        }

        let mut cache = FillCache::default();
        let mut out = Vec::new();
        for (ordinal, (_, members)) in partitions.into_entries().into_iter().enumerate() {
            let mut members = members;
            members.sort_by(|a, b| self.sort.compare(a, b));

            for position in 0..members.len() {
                for output in &self.outputs {
                    let filled = cache.lookup(ordinal, &output.field, || {
                        self.compute_partition(&members, output, ctx)
                    })?;
                    let value = filled[position].clone();
                    path::set_value(&mut members[position], &output.field, &value);
                }
            }
            out.append(&mut members);
        }

        Ok(Lazy::from_vec(out))
    }

    // One full-partition pass for one output field.
    fn compute_partition(
        &self,
        members: &[Value],
        output: &FillOutput,
        ctx: &Context,
    ) -> Result<Vec<Value>, Error> {
        let mut values = Vec::with_capacity(members.len());
        for doc in members {
            values.push(evaluate(doc, &output.input, ctx)?);
        }

        match output.kind {
            FillKind::Locf => Ok(locf_fill(values)),
            FillKind::Linear => {
                let mut sort_keys = Vec::with_capacity(members.len());
                for doc in members {
                    sort_keys.push(path::resolve(doc, &self.sort_field));
                }
                linear_fill(&sort_keys, values)
            }
        }
    }
}

///
/// FillCache
///
/// Per-evaluation memo: (partition ordinal, output field) → the computed
/// full-partition fill result.
///

#[derive(Default)]
struct FillCache {
    entries: HashMap<(usize, String), Vec<Value>>,
}

impl FillCache {
    fn lookup(
        &mut self,
        ordinal: usize,
        field: &str,
        compute: impl FnOnce() -> Result<Vec<Value>, Error>,
    ) -> Result<&Vec<Value>, Error> {
        let key = (ordinal, field.to_string());
        if !self.entries.contains_key(&key) {
            obs::emit(MetricsEvent::FillCacheMiss);
            let computed = compute()?;
            self.entries.insert(key.clone(), computed);
        } else {
            obs::emit(MetricsEvent::FillCacheHit);
        }

        Ok(&self.entries[&key])
    }
}

/// Last observation carried forward: each nil position copies the nearest
/// preceding non-nil value; a leading nil run stays as it was.
fn locf_fill(values: Vec<Value>) -> Vec<Value> {
    let mut last_seen: Option<Value> = None;
    values
        .into_iter()
        .map(|value| {
            if value.is_nil() {
                last_seen.clone().unwrap_or(value)
            } else {
                last_seen = Some(value.clone());
                value
            }
        })
        .collect()
}

/// Linear interpolation across interior nil runs.
///
/// Every sort key must coerce to a number; otherwise the whole partition
/// aborts to an all-null result. Present values anchor the sweep and pass
/// through unchanged; nil positions between two anchors interpolate
/// `y = y1 + (x−x1)·(y2−y1)/(x2−x1)`; leading/trailing runs with only a
/// one-sided neighbor stay unfilled.
fn linear_fill(sort_keys: &[Value], values: Vec<Value>) -> Result<Vec<Value>, Error> {
    let mut xs = Vec::with_capacity(sort_keys.len());
    for key in sort_keys {
        match key.as_ordered_f64() {
            Some(x) => xs.push(x),
            None => return Ok(vec![Value::Null; values.len()]),
        }
    }

    // anchor positions: present numeric values
    let mut anchors = Vec::new();
    for (index, value) in values.iter().enumerate() {
        if value.is_nil() {
            continue;
        }
        match value.as_f64() {
            Some(_) => anchors.push(index),
            None => {
                return Err(Error::data(
                    ErrorOrigin::Window,
                    format!("$linearFill requires numeric values, found {}", value.kind()),
                ));
            }
        }
    }

    let mut out = values;
    for pair in anchors.windows(2) {
        let (left, right) = (pair[0], pair[1]);
        let (x1, x2) = (xs[left], xs[right]);
        let (Some(y1), Some(y2)) = (out[left].as_f64(), out[right].as_f64()) else {
            continue;
        };
        if x2 == x1 {
            continue;
        }

        for index in left + 1..right {
            let y = y1 + (xs[index] - x1) * (y2 - y1) / (x2 - x1);
            out[index] = Value::Float(y);
        }
    }

    // nil positions outside any anchor pair normalize to null
    for value in &mut out {
        if value.is_absent() {
            *value = Value::Null;
        }
    }

    Ok(out)
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obs::{MetricsSink, with_sink};
    use crate::stage::Stage;
    use std::cell::Cell;

    fn run(config: serde_json::Value, docs: Vec<Value>) -> Result<Vec<Value>, Error> {
        let stage = Stage::parse("$setWindowFields", &Value::from_json(&config))?;
        stage
            .apply(Lazy::from_vec(docs), &Context::new())?
            .into_vec()
    }

    #[test]
    fn locf_carries_the_last_observation_forward() {
        let out = run(
            serde_json::json!({
                "sortBy": {"t": 1},
                "output": {"v": {"$locf": "$v"}}
            }),
            vec![
                value!({"t": 1, "v": 1}),
                value!({"t": 2, "v": null}),
                value!({"t": 3, "v": null}),
                value!({"t": 4, "v": 4}),
            ],
        )
        .unwrap();

        let filled = out
            .iter()
            .map(|doc| path::resolve(doc, "v"))
            .collect::<Vec<_>>();
        assert_eq!(filled, vec![value!(1), value!(1), value!(1), value!(4)]);
    }

    #[test]
    fn locf_leaves_a_leading_nil_run() {
        let out = run(
            serde_json::json!({
                "sortBy": {"t": 1},
                "output": {"v": {"$locf": "$v"}}
            }),
            vec![
                value!({"t": 1, "v": null}),
                value!({"t": 2, "v": 2}),
                value!({"t": 3, "v": null}),
            ],
        )
        .unwrap();

        let filled = out
            .iter()
            .map(|doc| path::resolve(doc, "v"))
            .collect::<Vec<_>>();
        assert_eq!(filled, vec![Value::Null, value!(2), value!(2)]);
    }

    #[test]
    fn linear_fill_interpolates_interior_runs() {
        let out = run(
            serde_json::json!({
                "sortBy": {"t": 1},
                "output": {"v": {"$linearFill": "$v"}}
            }),
            vec![
                value!({"t": 1, "v": 10}),
                value!({"t": 2, "v": null}),
                value!({"t": 3, "v": 30}),
            ],
        )
        .unwrap();

        let filled = out
            .iter()
            .map(|doc| path::resolve(doc, "v"))
            .collect::<Vec<_>>();
        assert_eq!(filled, vec![value!(10), value!(20.0), value!(30)]);
    }

    #[test]
    fn linear_fill_respects_uneven_sort_key_spacing() {
        let out = run(
            serde_json::json!({
                "sortBy": {"t": 1},
                "output": {"v": {"$linearFill": "$v"}}
            }),
            vec![
                value!({"t": 0, "v": 0}),
                value!({"t": 1, "v": null}),
                value!({"t": 10, "v": 100}),
            ],
        )
        .unwrap();

        assert_eq!(path::resolve(&out[1], "v"), value!(10.0));
    }

    #[test]
    fn linear_fill_leaves_edge_runs_unfilled() {
        let out = run(
            serde_json::json!({
                "sortBy": {"t": 1},
                "output": {"v": {"$linearFill": "$v"}}
            }),
            vec![
                value!({"t": 1, "v": null}),
                value!({"t": 2, "v": 5}),
                value!({"t": 3, "v": null}),
            ],
        )
        .unwrap();

        let filled = out
            .iter()
            .map(|doc| path::resolve(doc, "v"))
            .collect::<Vec<_>>();
        assert_eq!(filled, vec![Value::Null, value!(5), Value::Null]);
    }

    #[test]
    fn linear_fill_aborts_on_non_numeric_sort_keys() {
        let out = run(
            serde_json::json!({
                "sortBy": {"t": 1},
                "output": {"v": {"$linearFill": "$v"}}
            }),
            vec![
                value!({"t": "a", "v": 1}),
                value!({"t": "b", "v": null}),
            ],
        )
        .unwrap();

        let filled = out
            .iter()
            .map(|doc| path::resolve(doc, "v"))
            .collect::<Vec<_>>();
        assert_eq!(filled, vec![Value::Null, Value::Null]);
    }

    #[test]
    fn partitions_fill_independently() {
        let out = run(
            serde_json::json!({
                "partitionBy": "$site",
                "sortBy": {"t": 1},
                "output": {"v": {"$locf": "$v"}}
            }),
            vec![
                value!({"site": "a", "t": 1, "v": 1}),
                value!({"site": "b", "t": 1, "v": 9}),
                value!({"site": "a", "t": 2, "v": null}),
                value!({"site": "b", "t": 2, "v": null}),
            ],
        )
        .unwrap();

        let filled = out
            .iter()
            .map(|doc| {
                (
                    path::resolve(doc, "site"),
                    path::resolve(doc, "v"),
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(
            filled,
            vec![
                (value!("a"), value!(1)),
                (value!("a"), value!(1)),
                (value!("b"), value!(9)),
                (value!("b"), value!(9)),
            ]
        );
    }

    #[test]
    fn partition_results_are_memoized_per_field() {
        struct FillSink {
            hits: Cell<usize>,
            misses: Cell<usize>,
        }
        impl MetricsSink for FillSink {
            fn record(&self, event: crate::obs::MetricsEvent) {
                match event {
                    MetricsEvent::FillCacheHit => self.hits.set(self.hits.get() + 1),
                    MetricsEvent::FillCacheMiss => self.misses.set(self.misses.get() + 1),
                    _ => {}
                }
            }
        }

        let sink = FillSink {
            hits: Cell::new(0),
            misses: Cell::new(0),
        };
        with_sink(&sink, || {
            run(
                serde_json::json!({
                    "sortBy": {"t": 1},
                    "output": {"v": {"$locf": "$v"}}
                }),
                vec![
                    value!({"t": 1, "v": 1}),
                    value!({"t": 2, "v": null}),
                    value!({"t": 3, "v": null}),
                ],
            )
            .unwrap();
        });

        // one partition pass, then one memo hit per remaining document
        assert_eq!(sink.misses.get(), 1);
        assert_eq!(sink.hits.get(), 2);
    }

    #[test]
    fn missing_sort_by_is_a_config_error() {
        let err = Stage::parse(
            "$setWindowFields",
            &Value::from_json(&serde_json::json!({"output": {"v": {"$locf": "$v"}}})),
        )
        .unwrap_err();
        assert!(err.is_config());
    }
}
