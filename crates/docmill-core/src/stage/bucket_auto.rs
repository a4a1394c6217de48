use crate::{
    error::{Error, ErrorOrigin},
    expr::{Context, Expr, evaluate},
    obs::{self, MetricsEvent},
    stage::{AccumSpec, Lazy, group_scope},
    value::{Value, canonical_cmp, is_equal},
};
use std::ops::Range;

///
/// Granularity
///
/// Named boundary-rounding scheme for auto-bucketing: a fixed canonical
/// numeric series scaled by powers of 10, or powers of two. Rounding uses
/// the scale-search-then-lookup rule: shift the series by decades until the
/// target fits, then binary-search the first entry not less than the scaled
/// target — an exact-equal target returns that entry.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Granularity {
    R5,
    R10,
    R20,
    R40,
    R80,
    E6,
    E12,
    E24,
    E48,
    E96,
    E192,
    OneTwoFive,
    PowersOfTwo,
}

// Preferred-number series over one decade, terminated by the next decade's
// first entry so in-decade round-up never runs off the table.
const SERIES_R5: &[f64] = &[1.0, 1.6, 2.5, 4.0, 6.3, 10.0];
const SERIES_R10: &[f64] = &[1.0, 1.25, 1.6, 2.0, 2.5, 3.15, 4.0, 5.0, 6.3, 8.0, 10.0];
const SERIES_R20: &[f64] = &[
    1.0, 1.12, 1.25, 1.4, 1.6, 1.8, 2.0, 2.24, 2.5, 2.8, 3.15, 3.55, 4.0, 4.5, 5.0, 5.6, 6.3,
    7.1, 8.0, 9.0, 10.0,
];
const SERIES_R40: &[f64] = &[
    1.0, 1.06, 1.12, 1.18, 1.25, 1.32, 1.4, 1.5, 1.6, 1.7, 1.8, 1.9, 2.0, 2.12, 2.24, 2.36, 2.5,
    2.65, 2.8, 3.0, 3.15, 3.35, 3.55, 3.75, 4.0, 4.25, 4.5, 4.75, 5.0, 5.3, 5.6, 6.0, 6.3, 6.7,
    7.1, 7.5, 8.0, 8.5, 9.0, 9.5, 10.0,
];
const SERIES_R80: &[f64] = &[
    1.0, 1.03, 1.06, 1.09, 1.12, 1.15, 1.18, 1.22, 1.25, 1.28, 1.32, 1.36, 1.4, 1.45, 1.5, 1.55,
    1.6, 1.65, 1.7, 1.75, 1.8, 1.85, 1.9, 1.95, 2.0, 2.06, 2.12, 2.18, 2.24, 2.3, 2.36, 2.43,
    2.5, 2.58, 2.65, 2.72, 2.8, 2.9, 3.0, 3.07, 3.15, 3.25, 3.35, 3.45, 3.55, 3.65, 3.75, 3.87,
    4.0, 4.12, 4.25, 4.37, 4.5, 4.62, 4.75, 4.87, 5.0, 5.15, 5.3, 5.45, 5.6, 5.8, 6.0, 6.15,
    6.3, 6.5, 6.7, 6.9, 7.1, 7.3, 7.5, 7.75, 8.0, 8.25, 8.5, 8.75, 9.0, 9.25, 9.5, 9.75, 10.0,
];
const SERIES_E6: &[f64] = &[1.0, 1.5, 2.2, 3.3, 4.7, 6.8, 10.0];
const SERIES_E12: &[f64] = &[1.0, 1.2, 1.5, 1.8, 2.2, 2.7, 3.3, 3.9, 4.7, 5.6, 6.8, 8.2, 10.0];
const SERIES_E24: &[f64] = &[
    1.0, 1.1, 1.2, 1.3, 1.5, 1.6, 1.8, 2.0, 2.2, 2.4, 2.7, 3.0, 3.3, 3.6, 3.9, 4.3, 4.7, 5.1,
    5.6, 6.2, 6.8, 7.5, 8.2, 9.1, 10.0,
];
const SERIES_E48: &[f64] = &[
    1.0, 1.05, 1.1, 1.15, 1.21, 1.27, 1.33, 1.4, 1.47, 1.54, 1.62, 1.69, 1.78, 1.87, 1.96, 2.05,
    2.15, 2.26, 2.37, 2.49, 2.61, 2.74, 2.87, 3.01, 3.16, 3.32, 3.48, 3.65, 3.83, 4.02, 4.22,
    4.42, 4.64, 4.87, 5.11, 5.36, 5.62, 5.9, 6.19, 6.49, 6.81, 7.15, 7.5, 7.87, 8.25, 8.66,
    9.09, 9.53, 10.0,
];
const SERIES_E96: &[f64] = &[
    1.0, 1.02, 1.05, 1.07, 1.1, 1.13, 1.15, 1.18, 1.21, 1.24, 1.27, 1.3, 1.33, 1.37, 1.4, 1.43,
    1.47, 1.5, 1.54, 1.58, 1.62, 1.65, 1.69, 1.74, 1.78, 1.82, 1.87, 1.91, 1.96, 2.0, 2.05, 2.1,
    2.15, 2.21, 2.26, 2.32, 2.37, 2.43, 2.49, 2.55, 2.61, 2.67, 2.74, 2.8, 2.87, 2.94, 3.01,
    3.09, 3.16, 3.24, 3.32, 3.4, 3.48, 3.57, 3.65, 3.74, 3.83, 3.92, 4.02, 4.12, 4.22, 4.32,
    4.42, 4.53, 4.64, 4.75, 4.87, 4.99, 5.11, 5.23, 5.36, 5.49, 5.62, 5.76, 5.9, 6.04, 6.19,
    6.34, 6.49, 6.65, 6.81, 6.98, 7.15, 7.32, 7.5, 7.68, 7.87, 8.06, 8.25, 8.45, 8.66, 8.87,
    9.09, 9.31, 9.53, 9.76, 10.0,
];
const SERIES_E192: &[f64] = &[
    1.0, 1.01, 1.02, 1.04, 1.05, 1.06, 1.07, 1.09, 1.1, 1.11, 1.13, 1.14, 1.15, 1.17, 1.18, 1.2,
    1.21, 1.23, 1.24, 1.26, 1.27, 1.29, 1.3, 1.32, 1.33, 1.35, 1.37, 1.38, 1.4, 1.42, 1.43,
    1.45, 1.47, 1.49, 1.5, 1.52, 1.54, 1.56, 1.58, 1.6, 1.62, 1.64, 1.65, 1.67, 1.69, 1.72,
    1.74, 1.76, 1.78, 1.8, 1.82, 1.84, 1.87, 1.89, 1.91, 1.93, 1.96, 1.98, 2.0, 2.03, 2.05,
    2.08, 2.1, 2.13, 2.15, 2.18, 2.21, 2.23, 2.26, 2.29, 2.32, 2.34, 2.37, 2.4, 2.43, 2.46,
    2.49, 2.52, 2.55, 2.58, 2.61, 2.64, 2.67, 2.71, 2.74, 2.77, 2.8, 2.84, 2.87, 2.91, 2.94,
    2.98, 3.01, 3.05, 3.09, 3.12, 3.16, 3.2, 3.24, 3.28, 3.32, 3.36, 3.4, 3.44, 3.48, 3.52,
    3.57, 3.61, 3.65, 3.7, 3.74, 3.79, 3.83, 3.88, 3.92, 3.97, 4.02, 4.07, 4.12, 4.17, 4.22,
    4.27, 4.32, 4.37, 4.42, 4.48, 4.53, 4.59, 4.64, 4.7, 4.75, 4.81, 4.87, 4.93, 4.99, 5.05,
    5.11, 5.17, 5.23, 5.3, 5.36, 5.42, 5.49, 5.56, 5.62, 5.69, 5.76, 5.83, 5.9, 5.97, 6.04,
    6.12, 6.19, 6.26, 6.34, 6.42, 6.49, 6.57, 6.65, 6.73, 6.81, 6.9, 6.98, 7.06, 7.15, 7.23,
    7.32, 7.41, 7.5, 7.59, 7.68, 7.77, 7.87, 7.96, 8.06, 8.16, 8.25, 8.35, 8.45, 8.56, 8.66,
    8.76, 8.87, 8.98, 9.09, 9.2, 9.31, 9.42, 9.53, 9.65, 9.76, 9.88, 10.0,
];
const SERIES_125: &[f64] = &[1.0, 2.0, 5.0, 10.0];

impl Granularity {
    /// Parse a granularity token; unknown tokens are configuration errors
    /// at the caller.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "R5" => Some(Self::R5),
            "R10" => Some(Self::R10),
            "R20" => Some(Self::R20),
            "R40" => Some(Self::R40),
            "R80" => Some(Self::R80),
            "E6" => Some(Self::E6),
            "E12" => Some(Self::E12),
            "E24" => Some(Self::E24),
            "E48" => Some(Self::E48),
            "E96" => Some(Self::E96),
            "E192" => Some(Self::E192),
            "1-2-5" => Some(Self::OneTwoFive),
            "POWERSOF2" => Some(Self::PowersOfTwo),
            _ => None,
        }
    }

    const fn series(self) -> Option<&'static [f64]> {
        match self {
            Self::R5 => Some(SERIES_R5),
            Self::R10 => Some(SERIES_R10),
            Self::R20 => Some(SERIES_R20),
            Self::R40 => Some(SERIES_R40),
            Self::R80 => Some(SERIES_R80),
            Self::E6 => Some(SERIES_E6),
            Self::E12 => Some(SERIES_E12),
            Self::E24 => Some(SERIES_E24),
            Self::E48 => Some(SERIES_E48),
            Self::E96 => Some(SERIES_E96),
            Self::E192 => Some(SERIES_E192),
            Self::OneTwoFive => Some(SERIES_125),
            Self::PowersOfTwo => None,
        }
    }

    /// Smallest boundary value not less than `value`. An exact-equal value
    /// returns itself — the reference tie-break, preserved bit-for-bit.
    #[must_use]
    pub fn round_up(self, value: f64) -> f64 {
        if value <= 0.0 {
            return 0.0;
        }

        match self.series() {
            Some(series) => series_search(series, value, false),
            None => {
                let down = pow2_round_down(value);
                if down == value { value } else { down * 2.0 }
            }
        }
    }

    /// Largest boundary value not greater than `value`; `0` for zero.
    #[must_use]
    pub fn round_down(self, value: f64) -> f64 {
        if value <= 0.0 {
            return 0.0;
        }

        match self.series() {
            Some(series) => {
                let up = series_search(series, value, false);
                if up == value {
                    value
                } else {
                    // step one series entry below the round-up result
                    series_search_below(series, value)
                }
            }
            None => pow2_round_down(value),
        }
    }

    /// Smallest boundary value strictly greater than `value`; used for
    /// bucket ceilings, which must sit above every member.
    fn round_up_strict(self, value: f64) -> f64 {
        if value <= 0.0 {
            return match self.series() {
                Some(series) => series[0],
                None => 1.0,
            };
        }

        match self.series() {
            Some(series) => series_search(series, value, true),
            None => pow2_round_down(value) * 2.0,
        }
    }
}

// Scale-search-then-lookup: multiply the series by 10 until the target fits
// at or below the series maximum (and scale down for sub-unit targets),
// then binary-search the first entry not less than — or strictly greater
// than — the target.
fn series_search(series: &[f64], value: f64, strict: bool) -> f64 {
    let mut scale = 1.0f64;
    while value > series[series.len() - 1] * scale {
        scale *= 10.0;
    }
    while value < series[0] * scale {
        scale /= 10.0;
    }

    let index = series.partition_point(|entry| {
        let boundary = entry * scale;
        if strict { boundary <= value } else { boundary < value }
    });
    match series.get(index) {
        Some(entry) => entry * scale,
        // value == series maximum under strict search: the next boundary is
        // the following decade's second entry (its first duplicates this
        // decade's maximum).
        None => series[1] * scale * 10.0,
    }
}

// Largest series entry strictly below `value` (callers guarantee value is
// not itself an entry and sits above the series minimum at this scale).
fn series_search_below(series: &[f64], value: f64) -> f64 {
    let mut scale = 1.0f64;
    while value > series[series.len() - 1] * scale {
        scale *= 10.0;
    }
    while value < series[0] * scale {
        scale /= 10.0;
    }

    let index = series.partition_point(|entry| entry * scale < value);
    if index == 0 {
        series[0] * scale
    } else {
        series[index - 1] * scale
    }
}

fn pow2_round_down(value: f64) -> f64 {
    if value <= 0.0 {
        return 0.0;
    }

    let exponent = value.log2().floor();
    let down = exponent.exp2();
    // float error near exact powers: correct one step if the rounding
    // overshot
    if down > value { down / 2.0 } else { down }
}

///
/// BucketAutoStage
///
/// Computed-boundary bucketing: sort by group-by key ascending (nil keys
/// first), then fill buckets to roughly `count / bucketCount` members under
/// the selected boundary strategy. No strategy ever emits an empty bucket,
/// and every bucket satisfies `min < max` except the terminal one, where
/// `min ≤ max` (default strategy: the terminal max is its own last key,
/// inclusive).
///

#[derive(Debug)]
pub struct BucketAutoStage {
    group_by: Expr,
    buckets: usize,
    granularity: Option<Granularity>,
    outputs: Vec<AccumSpec>,
}

impl BucketAutoStage {
    pub fn parse(config: &Value) -> Result<Self, Error> {
        let Some(fields) = config.as_object() else {
            return Err(Error::config(
                ErrorOrigin::Stage,
                format!("$bucketAuto requires a document, found {}", config.kind()),
            ));
        };

        let group_by = fields.get("groupBy").ok_or_else(|| {
            Error::config(ErrorOrigin::Stage, "$bucketAuto requires a groupBy expression")
        })?;
        let buckets = fields
            .get("buckets")
            .and_then(Value::as_i64)
            .filter(|n| *n > 0)
            .ok_or_else(|| {
                Error::config(
                    ErrorOrigin::Stage,
                    "$bucketAuto requires a positive integer bucket count",
                )
            })?;

        let granularity = match fields.get("granularity") {
            None => None,
            Some(token) => {
                let parsed = token.as_str().and_then(Granularity::parse);
                match parsed {
                    Some(granularity) => Some(granularity),
                    None => {
                        return Err(Error::config(
                            ErrorOrigin::Stage,
                            format!("invalid granularity {token:?}"),
                        ));
                    }
                }
            }
        };

        Ok(Self {
            group_by: Expr::parse(group_by)?,
            buckets: usize::try_from(buckets).unwrap_or(usize::MAX),
            granularity,
            outputs: AccumSpec::parse_outputs(fields.get("output"))?,
        })
    }

    pub(super) fn apply(&self, input: Lazy, ctx: &Context) -> Result<Lazy, Error> {
        let docs = input.into_vec()?;
        if docs.is_empty() {
            return Ok(Lazy::from_vec(Vec::new()));
        }

        let mut keyed = Vec::with_capacity(docs.len());
        for doc in docs {
            // nil group keys sort first and bucket as null
            let key = match evaluate(&doc, &self.group_by, ctx)? {
                Value::Absent => Value::Null,
                key => key,
            };
            keyed.push((key, doc));
        }
        keyed.sort_by(|a, b| canonical_cmp(&a.0, &b.0));

        let spans = match self.granularity {
            None => default_spans(&keyed, self.buckets),
            Some(granularity) => granular_spans(&keyed, self.buckets, granularity)?,
        };

        obs::emit(MetricsEvent::BucketsEmitted {
            buckets: spans.len(),
        });

        let mut out = Vec::with_capacity(spans.len());
        for span in spans {
            let members = keyed[span.members.clone()]
                .iter()
                .map(|(_, doc)| doc.clone())
                .collect::<Vec<_>>();
            let id = value!({"min": {span.min}, "max": {span.max}});
            let scoped = group_scope(ctx, &id);

            let mut doc = indexmap::IndexMap::with_capacity(self.outputs.len() + 1);
            for output in &self.outputs {
                let (field, value) = output.apply(&members, &scoped)?;
                doc.insert(field, value);
            }
            doc.insert("_id".to_string(), id);
            out.push(Value::Object(doc));
        }

        Ok(Lazy::from_vec(out))
    }
}

struct BucketSpan {
    min: Value,
    max: Value,
    members: Range<usize>,
}

/// Round-robin target size shared by every strategy.
#[expect(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn target_size(total: usize, buckets: usize) -> usize {
    ((total as f64 / buckets as f64).round() as usize).max(1)
}

// Default strategy: greedy fill to the target, never splitting a run of
// exactly-equal keys, with the final bucket absorbing the remainder. A
// bucket's max is the next bucket's first key (exclusive), except the
// terminal bucket, whose max is its own last key (inclusive).
fn default_spans(keyed: &[(Value, Value)], buckets: usize) -> Vec<BucketSpan> {
    let total = keyed.len();
    let target = target_size(total, buckets);

    let mut ranges: Vec<Range<usize>> = Vec::new();
    let mut start = 0usize;
    while start < total {
        let mut end = if ranges.len() + 1 == buckets {
            total
        } else {
            (start + target).min(total)
        };
        while end < total && is_equal(&keyed[end].0, &keyed[end - 1].0) {
            end += 1;
        }
        ranges.push(start..end);
        start = end;
    }

    let mut spans = Vec::with_capacity(ranges.len());
    for (index, range) in ranges.iter().enumerate() {
        let min = keyed[range.start].0.clone();
        let max = match ranges.get(index + 1) {
            Some(next) => keyed[next.start].0.clone(),
            None => keyed[range.end - 1].0.clone(),
        };
        spans.push(BucketSpan {
            min,
            max,
            members: range.clone(),
        });
    }

    spans
}

// Granularity strategies: numeric non-negative keys only. Each bucket fills
// to the target size or until the next value would exceed the running
// ceiling — the strict round-up of the last included key, re-derived as
// larger keys join — then absorbs any further values still below that
// ceiling. Boundaries are series values: min is the previous ceiling (the
// first bucket rounds its first key down), max is the final ceiling.
fn granular_spans(
    keyed: &[(Value, Value)],
    buckets: usize,
    granularity: Granularity,
) -> Result<Vec<BucketSpan>, Error> {
    let mut xs = Vec::with_capacity(keyed.len());
    for (key, _) in keyed {
        let x = key.as_ordered_f64().ok_or_else(|| {
            Error::data(
                ErrorOrigin::Stage,
                format!("granularity requires numeric group-by values, found {}", key.kind()),
            )
        })?;
        if x < 0.0 {
            return Err(Error::data(
                ErrorOrigin::Stage,
                "granularity requires non-negative group-by values",
            ));
        }
        xs.push(x);
    }

    let total = xs.len();
    let target = target_size(total, buckets);

    let mut spans = Vec::new();
    let mut prev_bound = granularity.round_down(xs[0]);
    let mut i = 0usize;
    while i < total {
        let start = i;
        let mut ceiling = granularity.round_up_strict(xs[i]);
        i += 1;

        while i < total && i - start < target {
            if xs[i] > ceiling {
                break;
            }
            ceiling = ceiling.max(granularity.round_up_strict(xs[i]));
            i += 1;
        }
        // absorb same-bucket values still below the ceiling
        while i < total && xs[i] < ceiling {
            i += 1;
        }

        spans.push(BucketSpan {
            min: num_value(prev_bound),
            max: num_value(ceiling),
            members: start..i,
        });
        prev_bound = ceiling;
    }

    Ok(spans)
}

// Integral boundaries render as integers; the series produce whole numbers
// for most real inputs and mixed output types read poorly.
#[expect(clippy::cast_possible_truncation)]
fn num_value(x: f64) -> Value {
    if x.fract() == 0.0 && x.abs() < 9.0e15 {
        Value::Int(x as i64)
    } else {
        Value::Float(x)
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::Stage;

    fn docs(values: &[i64]) -> Vec<Value> {
        values.iter().map(|v| value!({ "v": { *v } })).collect()
    }

    fn run(config: serde_json::Value, docs: Vec<Value>) -> Result<Vec<Value>, Error> {
        let stage = Stage::parse("$bucketAuto", &Value::from_json(&config))?;
        stage
            .apply(Lazy::from_vec(docs), &Context::new())?
            .into_vec()
    }

    #[test]
    fn splits_evenly_with_shared_boundary() {
        let out = run(
            serde_json::json!({"groupBy": "$v", "buckets": 2}),
            docs(&[1, 2, 3, 4, 5, 6]),
        )
        .unwrap();

        assert_eq!(
            out,
            vec![
                value!({"count": 3, "_id": {"min": 1, "max": 4}}),
                value!({"count": 3, "_id": {"min": 4, "max": 6}}),
            ]
        );
    }

    #[test]
    fn never_splits_a_run_of_equal_keys() {
        let out = run(
            serde_json::json!({"groupBy": "$v", "buckets": 2}),
            docs(&[1, 1, 1, 2]),
        )
        .unwrap();

        assert_eq!(
            out,
            vec![
                value!({"count": 3, "_id": {"min": 1, "max": 2}}),
                value!({"count": 1, "_id": {"min": 2, "max": 2}}),
            ]
        );
    }

    #[test]
    fn final_bucket_absorbs_the_remainder() {
        let out = run(
            serde_json::json!({"groupBy": "$v", "buckets": 3}),
            docs(&[1, 2, 3, 4, 5, 6, 7]),
        )
        .unwrap();

        let counts = out
            .iter()
            .map(|doc| crate::path::resolve(doc, "count"))
            .collect::<Vec<_>>();
        assert_eq!(counts, vec![value!(2), value!(2), value!(3)]);
    }

    #[test]
    fn nil_keys_sort_into_the_first_bucket() {
        let out = run(
            serde_json::json!({"groupBy": "$v", "buckets": 2}),
            vec![value!({"v": 5}), value!({}), value!({"v": 1})],
        )
        .unwrap();

        assert_eq!(
            out,
            vec![
                value!({"count": 2, "_id": {"min": null, "max": 5}}),
                value!({"count": 1, "_id": {"min": 5, "max": 5}}),
            ]
        );
    }

    #[test]
    fn powers_of_two_boundaries() {
        let out = run(
            serde_json::json!({"groupBy": "$v", "buckets": 2, "granularity": "POWERSOF2"}),
            docs(&[1, 2, 3, 4, 5, 6]),
        )
        .unwrap();

        assert_eq!(
            out,
            vec![
                value!({"count": 3, "_id": {"min": 1, "max": 4}}),
                value!({"count": 3, "_id": {"min": 4, "max": 8}}),
            ]
        );
    }

    #[test]
    fn granularity_rejects_non_numeric_keys() {
        let err = run(
            serde_json::json!({"groupBy": "$v", "buckets": 2, "granularity": "R5"}),
            vec![value!({"v": "a"})],
        )
        .unwrap_err();
        assert!(err.is_data());
    }

    #[test]
    fn invalid_granularity_token_is_a_config_error() {
        let err = run(
            serde_json::json!({"groupBy": "$v", "buckets": 2, "granularity": "R7"}),
            Vec::new(),
        )
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn bucket_count_must_be_positive() {
        let err = run(
            serde_json::json!({"groupBy": "$v", "buckets": 0}),
            Vec::new(),
        )
        .unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn series_round_up_returns_exact_matches_unchanged() {
        assert_eq!(Granularity::R5.round_up(2.5), 2.5);
        assert_eq!(Granularity::R5.round_up(3.0), 4.0);
        assert_eq!(Granularity::R5.round_up(30.0), 40.0);
        assert_eq!(Granularity::R5.round_up(0.3), 0.4);
        assert_eq!(Granularity::OneTwoFive.round_up(37.0), 50.0);
    }

    #[test]
    fn series_round_down_steps_to_the_entry_below() {
        assert_eq!(Granularity::R5.round_down(3.0), 2.5);
        assert_eq!(Granularity::R5.round_down(2.5), 2.5);
        assert_eq!(Granularity::PowersOfTwo.round_down(9.0), 8.0);
        assert_eq!(Granularity::PowersOfTwo.round_down(8.0), 8.0);
        assert_eq!(Granularity::R5.round_down(0.0), 0.0);
    }
}
