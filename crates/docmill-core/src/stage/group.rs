use crate::{
    error::{Error, ErrorOrigin},
    expr::{Context, Expr, evaluate},
    obs::{self, MetricsEvent},
    stage::{AccumSpec, Lazy, group_scope},
    value::{Value, ValueMap},
};

///
/// GroupStage
///
/// Hash-grouping on the evaluated `_id` expression. Groups materialize in
/// first-occurrence order of their key; equal keys collapse through the
/// value-keyed container, so two documents whose keys are structurally
/// equal land in one group whatever their runtime representation.
///

#[derive(Debug)]
pub struct GroupStage {
    id: Expr,
    outputs: Vec<AccumSpec>,
}

impl GroupStage {
    pub fn parse(config: &Value) -> Result<Self, Error> {
        let Some(fields) = config.as_object() else {
            return Err(Error::config(
                ErrorOrigin::Stage,
                format!("$group requires a document, found {}", config.kind()),
            ));
        };
        let Some(id_encoded) = fields.get("_id") else {
            return Err(Error::config(ErrorOrigin::Stage, "$group requires an _id expression"));
        };

        let outputs = fields
            .iter()
            .filter(|(field, _)| field.as_str() != "_id")
            .map(|(field, encoded)| AccumSpec::parse(field, encoded))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            id: Expr::parse(id_encoded)?,
            outputs,
        })
    }

    pub(super) fn apply(&self, input: Lazy, ctx: &Context) -> Result<Lazy, Error> {
        let docs = input.into_vec()?;

        let mut groups: ValueMap<Vec<Value>> = ValueMap::with_hasher(ctx.hasher());
        for doc in docs {
            // a missing group key groups with null
            let key = match evaluate(&doc, &self.id, ctx)? {
                Value::Absent => Value::Null,
                key => key,
            };
            groups.get_or_insert_with(key, Vec::new)?.push(doc);
        }

        obs::emit(MetricsEvent::GroupsMaterialized {
            groups: groups.len(),
        });

        let mut out = Vec::with_capacity(groups.len());
        for (key, members) in groups.into_entries() {
            let scoped = group_scope(ctx, &key);
            let mut doc = indexmap::IndexMap::with_capacity(self.outputs.len() + 1);
            doc.insert("_id".to_string(), key);
            for output in &self.outputs {
                let (field, value) = output.apply(&members, &scoped)?;
                doc.insert(field, value);
            }
            out.push(Value::Object(doc));
        }

        Ok(Lazy::from_vec(out))
    }
}

///
/// TESTS
///
