//! Pipeline stages: transformations from one document sequence to another.
//!
//! A stage consumes a pull-based [`Lazy`] sequence and an evaluation
//! context and produces a new sequence. Element-wise stages stay lazy;
//! grouping, bucketing, and windowing stages materialize their input first,
//! because boundary/partition computation needs full visibility of the
//! group. Stage configuration is validated at construction — before any
//! document flows — so malformed operator arguments never abort a run
//! half-way.

mod bucket;
mod bucket_auto;
mod fill;
mod group;

pub use bucket::BucketStage;
pub use bucket_auto::{BucketAutoStage, Granularity};
pub use fill::WindowFieldsStage;
pub use group::GroupStage;

use crate::{
    accum::{self, AccumulatorFn, GROUP_ID_VAR},
    error::{Error, ErrorOrigin},
    expr::{Context, Expr},
    obs::{self, MetricsEvent},
    path,
    value::{Value, canonical_cmp, is_equal},
};
use std::cmp::Ordering;

#[cfg(test)]
mod tests;

///
/// Lazy
///
/// Pull-based document sequence. Single-pass unless re-wrapped: deriving a
/// sequence from a materialized list with [`Lazy::from_vec`] makes it
/// replayable.
///

pub struct Lazy {
    iter: Box<dyn Iterator<Item = Result<Value, Error>>>,
}

impl Lazy {
    #[must_use]
    pub fn from_vec(docs: Vec<Value>) -> Self {
        Self {
            iter: Box::new(docs.into_iter().map(Ok)),
        }
    }

    #[must_use]
    pub fn from_fallible(iter: impl Iterator<Item = Result<Value, Error>> + 'static) -> Self {
        Self {
            iter: Box::new(iter),
        }
    }

    /// Lazy element-wise transform.
    #[must_use]
    pub fn map(self, mut transform: impl FnMut(Value) -> Result<Value, Error> + 'static) -> Self {
        Self {
            iter: Box::new(self.iter.map(move |doc| doc.and_then(&mut transform))),
        }
    }

    /// Eager full traversal; the tool for materializing a partition.
    pub fn each(self, mut visit: impl FnMut(&Value)) -> Result<(), Error> {
        for doc in self.iter {
            visit(&doc?);
        }

        Ok(())
    }

    /// Eager count.
    pub fn size(self) -> Result<usize, Error> {
        let mut count = 0;
        for doc in self.iter {
            doc?;
            count += 1;
        }

        Ok(count)
    }

    /// Eager materialization to a concrete ordered list.
    pub fn into_vec(self) -> Result<Vec<Value>, Error> {
        self.iter.collect()
    }
}

///
/// AccumSpec
///
/// One parsed accumulator output field: `field: {"$op": args}`.
///

#[derive(Debug)]
pub(crate) struct AccumSpec {
    field: String,
    op: AccumulatorFn,
    args: Expr,
}

impl AccumSpec {
    fn parse(field: &str, encoded: &Value) -> Result<Self, Error> {
        let spec = encoded.as_object().filter(|fields| fields.len() == 1);
        let Some((name, args)) = spec.and_then(indexmap::IndexMap::first) else {
            return Err(Error::config(
                ErrorOrigin::Stage,
                format!("output field '{field}' must be a single {{\"$accumulator\": args}} document"),
            ));
        };

        let op = accum::lookup(name).ok_or_else(|| {
            Error::config(
                ErrorOrigin::Stage,
                format!("unknown accumulator '{name}' for output field '{field}'"),
            )
        })?;

        Ok(Self {
            field: field.to_string(),
            op,
            args: Expr::parse(args)?,
        })
    }

    /// Parse an `output` document into accumulator specs; `None` falls back
    /// to the conventional `{count: {$sum: 1}}`.
    pub(crate) fn parse_outputs(output: Option<&Value>) -> Result<Vec<Self>, Error> {
        let Some(output) = output else {
            return Ok(vec![Self::parse("count", &value!({"$sum": 1}))?]);
        };

        let Some(fields) = output.as_object() else {
            return Err(Error::config(
                ErrorOrigin::Stage,
                format!("output must be a document, found {}", output.kind()),
            ));
        };

        fields
            .iter()
            .map(|(field, encoded)| Self::parse(field, encoded))
            .collect()
    }

    /// Evaluate this accumulator over one group, filtering absent members
    /// out of array-valued results before emission.
    pub(crate) fn apply(&self, docs: &[Value], ctx: &Context) -> Result<(String, Value), Error> {
        let mut value = (self.op)(docs, &self.args, ctx)?;
        if let Value::Array(items) = &mut value {
            items.retain(|item| !item.is_absent());
        }

        Ok((self.field.clone(), value))
    }
}

/// Scoped evaluation context for one group: binds the group identifier the
/// `n`-parameterized accumulators read.
pub(crate) fn group_scope(ctx: &Context, group_id: &Value) -> Context {
    ctx.with_var(GROUP_ID_VAR, group_id.clone())
}

///
/// Stage
///

#[derive(Debug)]
pub enum Stage {
    Group(GroupStage),
    Bucket(BucketStage),
    BucketAuto(BucketAutoStage),
    WindowFields(WindowFieldsStage),
    Match(MatchStage),
    Sort(SortStage),
    Skip(u64),
    Limit(u64),
}

impl Stage {
    /// Parse one `{"$stage": config}` document.
    pub fn parse(name: &str, config: &Value) -> Result<Self, Error> {
        match name {
            "$group" => Ok(Self::Group(GroupStage::parse(config)?)),
            "$bucket" => Ok(Self::Bucket(BucketStage::parse(config)?)),
            "$bucketAuto" => Ok(Self::BucketAuto(BucketAutoStage::parse(config)?)),
            "$setWindowFields" => Ok(Self::WindowFields(WindowFieldsStage::parse(config)?)),
            "$match" => Ok(Self::Match(MatchStage::parse(config)?)),
            "$sort" => Ok(Self::Sort(SortStage::parse(config)?)),
            "$skip" => Ok(Self::Skip(parse_cardinal(name, config)?)),
            "$limit" => Ok(Self::Limit(parse_cardinal(name, config)?)),
            _ => Err(Error::config(
                ErrorOrigin::Stage,
                format!("unknown pipeline stage '{name}'"),
            )),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Group(_) => "$group",
            Self::Bucket(_) => "$bucket",
            Self::BucketAuto(_) => "$bucketAuto",
            Self::WindowFields(_) => "$setWindowFields",
            Self::Match(_) => "$match",
            Self::Sort(_) => "$sort",
            Self::Skip(_) => "$skip",
            Self::Limit(_) => "$limit",
        }
    }

    /// Apply the stage to a sequence.
    pub fn apply(&self, input: Lazy, ctx: &Context) -> Result<Lazy, Error> {
        match self {
            Self::Group(stage) => stage.apply(input, ctx),
            Self::Bucket(stage) => stage.apply(input, ctx),
            Self::BucketAuto(stage) => stage.apply(input, ctx),
            Self::WindowFields(stage) => stage.apply(input, ctx),
            Self::Match(stage) => Ok(stage.apply(input)),
            Self::Sort(stage) => stage.apply(input),
            Self::Skip(n) => {
                let n = usize::try_from(*n).unwrap_or(usize::MAX);
                Ok(Lazy::from_fallible(input.iter.skip(n)))
            }
            Self::Limit(n) => {
                let n = usize::try_from(*n).unwrap_or(usize::MAX);
                Ok(Lazy::from_fallible(input.iter.take(n)))
            }
        }
    }
}

fn parse_cardinal(name: &str, config: &Value) -> Result<u64, Error> {
    config
        .as_i64()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| {
            Error::config(
                ErrorOrigin::Stage,
                format!("{name} requires a non-negative integer, found {}", config.kind()),
            )
        })
}

///
/// MatchStage
///
/// Equality/comparison predicates over resolved paths. Comparisons use the
/// canonical order, so cross-category predicates are deterministic rather
/// than errors.
///

#[derive(Debug)]
pub struct MatchStage {
    predicates: Vec<(String, MatchOp, Value)>,
}

#[derive(Clone, Copy, Debug)]
enum MatchOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl MatchOp {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "$eq" => Some(Self::Eq),
            "$ne" => Some(Self::Ne),
            "$lt" => Some(Self::Lt),
            "$lte" => Some(Self::Lte),
            "$gt" => Some(Self::Gt),
            "$gte" => Some(Self::Gte),
            _ => None,
        }
    }

    fn matches(self, left: &Value, right: &Value) -> bool {
        match self {
            Self::Eq => is_equal(left, right),
            Self::Ne => !is_equal(left, right),
            Self::Lt => canonical_cmp(left, right) == Ordering::Less,
            Self::Lte => canonical_cmp(left, right) != Ordering::Greater,
            Self::Gt => canonical_cmp(left, right) == Ordering::Greater,
            Self::Gte => canonical_cmp(left, right) != Ordering::Less,
        }
    }
}

impl MatchStage {
    pub fn parse(config: &Value) -> Result<Self, Error> {
        let Some(fields) = config.as_object() else {
            return Err(Error::config(
                ErrorOrigin::Stage,
                format!("$match requires a document, found {}", config.kind()),
            ));
        };

        let mut predicates = Vec::new();
        for (field, condition) in fields {
            if field.starts_with('$') {
                return Err(Error::config(
                    ErrorOrigin::Stage,
                    format!("$match does not support top-level operator '{field}'"),
                ));
            }

            match condition.as_object() {
                Some(ops) if ops.keys().any(|key| key.starts_with('$')) => {
                    for (op_name, operand) in ops {
                        let op = MatchOp::parse(op_name).ok_or_else(|| {
                            Error::config(
                                ErrorOrigin::Stage,
                                format!("unknown $match operator '{op_name}'"),
                            )
                        })?;
                        predicates.push((field.clone(), op, operand.clone()));
                    }
                }
                _ => predicates.push((field.clone(), MatchOp::Eq, condition.clone())),
            }
        }

        Ok(Self { predicates })
    }

    fn apply(&self, input: Lazy) -> Lazy {
        let predicates = self
            .predicates
            .iter()
            .map(|(field, op, operand)| (field.clone(), *op, operand.clone()))
            .collect::<Vec<_>>();

        Lazy::from_fallible(input.iter.filter(move |doc| match doc {
            Ok(doc) => predicates
                .iter()
                .all(|(field, op, operand)| op.matches(&path::resolve(doc, field), operand)),
            Err(_) => true,
        }))
    }
}

///
/// SortStage
///
/// Stable sort under the canonical comparator: incomparable same-category
/// values keep their input order.
///

#[derive(Debug)]
pub struct SortStage {
    keys: Vec<(String, bool)>,
}

impl SortStage {
    pub fn parse(config: &Value) -> Result<Self, Error> {
        let Some(fields) = config.as_object() else {
            return Err(Error::config(
                ErrorOrigin::Stage,
                format!("$sort requires a document, found {}", config.kind()),
            ));
        };
        if fields.is_empty() {
            return Err(Error::config(ErrorOrigin::Stage, "$sort requires at least one key"));
        }

        let mut keys = Vec::with_capacity(fields.len());
        for (field, direction) in fields {
            match direction.as_i64() {
                Some(1) => keys.push((field.clone(), true)),
                Some(-1) => keys.push((field.clone(), false)),
                _ => {
                    return Err(Error::config(
                        ErrorOrigin::Stage,
                        format!("$sort direction for '{field}' must be 1 or -1"),
                    ));
                }
            }
        }

        Ok(Self { keys })
    }

    fn apply(&self, input: Lazy) -> Result<Lazy, Error> {
        let mut docs = input.into_vec()?;
        docs.sort_by(|a, b| self.compare(a, b));
        Ok(Lazy::from_vec(docs))
    }

    fn compare(&self, a: &Value, b: &Value) -> Ordering {
        for (field, ascending) in &self.keys {
            let cmp = canonical_cmp(&path::resolve(a, field), &path::resolve(b, field));
            let cmp = if *ascending { cmp } else { cmp.reverse() };
            if cmp != Ordering::Equal {
                return cmp;
            }
        }

        Ordering::Equal
    }
}

///
/// Pipeline
///

#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Parse a document-encoded pipeline: an array of single-key
    /// `{"$stage": config}` documents.
    pub fn parse(encoded: &Value) -> Result<Self, Error> {
        let Some(items) = encoded.as_array() else {
            return Err(Error::config(
                ErrorOrigin::Stage,
                format!("pipeline must be an array, found {}", encoded.kind()),
            ));
        };

        let mut stages = Vec::with_capacity(items.len());
        for item in items {
            let spec = item.as_object().filter(|fields| fields.len() == 1);
            let Some((name, config)) = spec.and_then(indexmap::IndexMap::first) else {
                return Err(Error::config(
                    ErrorOrigin::Stage,
                    "each pipeline stage must be a single {\"$stage\": config} document",
                ));
            };
            stages.push(Stage::parse(name, config)?);
        }

        Ok(Self { stages })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Fold a sequence through every stage.
    pub fn stream(&self, input: Lazy, ctx: &Context) -> Result<Lazy, Error> {
        let mut current = input;
        for stage in &self.stages {
            current = stage.apply(current, ctx)?;
        }

        Ok(current)
    }
}

///
/// Aggregator
///
/// Facade tying a parsed pipeline to an evaluation context.
///

pub struct Aggregator {
    pipeline: Pipeline,
    ctx: Context,
}

impl Aggregator {
    pub fn new(pipeline_encoded: &Value) -> Result<Self, Error> {
        Ok(Self {
            pipeline: Pipeline::parse(pipeline_encoded)?,
            ctx: Context::new(),
        })
    }

    #[must_use]
    pub fn with_context(mut self, ctx: Context) -> Self {
        self.ctx = ctx;
        self
    }

    /// Run the pipeline over a materialized collection.
    pub fn run(&self, docs: Vec<Value>) -> Result<Vec<Value>, Error> {
        let docs_in = docs.len();
        let out = self
            .pipeline
            .stream(Lazy::from_vec(docs), &self.ctx)?
            .into_vec()?;
        obs::emit(MetricsEvent::StageFinish {
            stage: "pipeline",
            docs_in,
            docs_out: out.len(),
        });

        Ok(out)
    }
}
