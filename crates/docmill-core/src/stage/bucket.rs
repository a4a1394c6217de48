use crate::{
    error::{Error, ErrorOrigin},
    expr::{Context, Expr, evaluate},
    obs::{self, MetricsEvent},
    stage::{AccumSpec, Lazy, group_scope},
    value::{Value, canonical_cmp},
};
use std::cmp::Ordering;

///
/// BucketStage
///
/// Fixed-boundary bucketing: ≥2 strictly ascending, same-ranked boundary
/// values; each document's group-by value lands in the `[lower, upper)`
/// bucket located by binary search, the last boundary being the exclusive
/// upper end. Out-of-range values fall to the explicit default key, or
/// abort the evaluation as a data error when no default is configured.
///

#[derive(Debug)]
pub struct BucketStage {
    group_by: Expr,
    boundaries: Vec<Value>,
    default_key: Option<Value>,
    outputs: Vec<AccumSpec>,
}

impl BucketStage {
    pub fn parse(config: &Value) -> Result<Self, Error> {
        let Some(fields) = config.as_object() else {
            return Err(Error::config(
                ErrorOrigin::Stage,
                format!("$bucket requires a document, found {}", config.kind()),
            ));
        };

        let group_by = fields.get("groupBy").ok_or_else(|| {
            Error::config(ErrorOrigin::Stage, "$bucket requires a groupBy expression")
        })?;
        let boundaries = fields
            .get("boundaries")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                Error::config(ErrorOrigin::Stage, "$bucket requires a boundaries array")
            })?;

        if boundaries.len() < 2 {
            return Err(Error::config(
                ErrorOrigin::Stage,
                "$bucket requires at least 2 boundaries",
            ));
        }
        let rank = boundaries[0].canonical_rank();
        for pair in boundaries.windows(2) {
            if pair[1].canonical_rank() != rank {
                return Err(Error::config(
                    ErrorOrigin::Stage,
                    "$bucket boundaries must share one type",
                ));
            }
            if canonical_cmp(&pair[0], &pair[1]) != Ordering::Less {
                return Err(Error::config(
                    ErrorOrigin::Stage,
                    "$bucket boundaries must be strictly ascending",
                ));
            }
        }

        Ok(Self {
            group_by: Expr::parse(group_by)?,
            boundaries: boundaries.to_vec(),
            default_key: fields.get("default").cloned(),
            outputs: AccumSpec::parse_outputs(fields.get("output"))?,
        })
    }

    // Binary search for the bucket whose [lower, upper) range holds `key`;
    // None when the key is outside every range or of a foreign type.
    fn locate(&self, key: &Value) -> Option<usize> {
        if key.canonical_rank() != self.boundaries[0].canonical_rank() {
            return None;
        }

        // count of boundaries ≤ key
        let at_or_below = self
            .boundaries
            .partition_point(|boundary| canonical_cmp(boundary, key) != Ordering::Greater);
        if at_or_below == 0 || at_or_below == self.boundaries.len() {
            return None;
        }

        Some(at_or_below - 1)
    }

    pub(super) fn apply(&self, input: Lazy, ctx: &Context) -> Result<Lazy, Error> {
        let docs = input.into_vec()?;

        let mut buckets: Vec<Vec<Value>> = vec![Vec::new(); self.boundaries.len() - 1];
        let mut default_members: Vec<Value> = Vec::new();
        for doc in docs {
            let key = evaluate(&doc, &self.group_by, ctx)?;
            match self.locate(&key) {
                Some(index) => buckets[index].push(doc),
                None if self.default_key.is_some() => default_members.push(doc),
                None => {
                    return Err(Error::data(
                        ErrorOrigin::Stage,
                        format!(
                            "$bucket value {} is out of range and no default is configured",
                            key.kind()
                        ),
                    ));
                }
            }
        }

        // output order follows boundary order; the default bucket is last
        let mut out = Vec::new();
        for (index, members) in buckets.iter().enumerate() {
            if members.is_empty() {
                continue;
            }
            out.push(self.emit(&self.boundaries[index], members, ctx)?);
        }
        if let Some(default_key) = &self.default_key
            && !default_members.is_empty()
        {
            out.push(self.emit(default_key, &default_members, ctx)?);
        }

        obs::emit(MetricsEvent::BucketsEmitted { buckets: out.len() });
        Ok(Lazy::from_vec(out))
    }

    fn emit(&self, id: &Value, members: &[Value], ctx: &Context) -> Result<Value, Error> {
        let scoped = group_scope(ctx, id);
        let mut doc = indexmap::IndexMap::with_capacity(self.outputs.len() + 1);
        doc.insert("_id".to_string(), id.clone());
        for output in &self.outputs {
            let (field, value) = output.apply(members, &scoped)?;
            doc.insert(field, value);
        }

        Ok(Value::Object(doc))
    }
}

///
/// TESTS
///
