use crate::{
    expr::Context,
    stage::{Aggregator, Lazy, Pipeline, Stage},
    value::Value,
};

fn docs() -> Vec<Value> {
    vec![
        value!({"name": "ash", "score": 7}),
        value!({"name": "birch", "score": 3}),
        value!({"name": "cedar", "score": 9}),
        value!({"name": "dogwood", "score": 3}),
    ]
}

fn run(pipeline: serde_json::Value, docs: Vec<Value>) -> Vec<Value> {
    Aggregator::new(&Value::from_json(&pipeline))
        .unwrap()
        .run(docs)
        .unwrap()
}

// ---- Lazy --------------------------------------------------------------

#[test]
fn lazy_map_is_element_wise() {
    let out = Lazy::from_vec(vec![value!(1), value!(2)])
        .map(|doc| Ok(value!([{doc}])))
        .into_vec()
        .unwrap();
    assert_eq!(out, vec![value!([1]), value!([2])]);
}

#[test]
fn lazy_size_and_each_are_eager() {
    assert_eq!(Lazy::from_vec(docs()).size().unwrap(), 4);

    let mut seen = 0;
    Lazy::from_vec(docs()).each(|_| seen += 1).unwrap();
    assert_eq!(seen, 4);
}

#[test]
fn lazy_from_vec_is_replayable_source() {
    let materialized = Lazy::from_vec(docs()).into_vec().unwrap();
    // a re-wrapped list yields the same documents again
    let replay = Lazy::from_vec(materialized.clone()).into_vec().unwrap();
    assert_eq!(materialized, replay);
}

// ---- dispatch ----------------------------------------------------------

#[test]
fn unknown_stage_is_a_config_error() {
    let err = Stage::parse("$teleport", &value!({})).unwrap_err();
    assert!(err.is_config());
}

#[test]
fn pipeline_rejects_malformed_stage_documents() {
    let err = Pipeline::parse(&value!([{"$limit": 1, "$skip": 2}])).unwrap_err();
    assert!(err.is_config());

    let err = Pipeline::parse(&value!({"$limit": 1})).unwrap_err();
    assert!(err.is_config());
}

// ---- simple stages -----------------------------------------------------

#[test]
fn match_filters_lazily_over_resolved_paths() {
    let out = run(
        serde_json::json!([{"$match": {"score": {"$gte": 4}}}]),
        docs(),
    );
    assert_eq!(
        out,
        vec![
            value!({"name": "ash", "score": 7}),
            value!({"name": "cedar", "score": 9}),
        ]
    );
}

#[test]
fn match_equality_shorthand() {
    let out = run(serde_json::json!([{"$match": {"score": 3}}]), docs());
    assert_eq!(out.len(), 2);
}

#[test]
fn sort_is_stable_for_equal_keys() {
    let out = run(serde_json::json!([{"$sort": {"score": 1}}]), docs());
    let names = out
        .iter()
        .map(|doc| crate::path::resolve(doc, "name"))
        .collect::<Vec<_>>();
    // birch before dogwood: equal keys keep input order
    assert_eq!(
        names,
        vec![
            value!("birch"),
            value!("dogwood"),
            value!("ash"),
            value!("cedar"),
        ]
    );
}

#[test]
fn sort_descending_with_secondary_key() {
    let out = run(
        serde_json::json!([{"$sort": {"score": -1, "name": -1}}]),
        docs(),
    );
    let names = out
        .iter()
        .map(|doc| crate::path::resolve(doc, "name"))
        .collect::<Vec<_>>();
    assert_eq!(
        names,
        vec![
            value!("cedar"),
            value!("ash"),
            value!("dogwood"),
            value!("birch"),
        ]
    );
}

#[test]
fn skip_and_limit_window_the_sequence() {
    let out = run(
        serde_json::json!([{"$sort": {"score": 1}}, {"$skip": 1}, {"$limit": 2}]),
        docs(),
    );
    assert_eq!(out.len(), 2);
    assert_eq!(crate::path::resolve(&out[0], "name"), value!("dogwood"));
}

#[test]
fn sort_direction_must_be_one_or_minus_one() {
    let err = Stage::parse("$sort", &value!({"score": 2})).unwrap_err();
    assert!(err.is_config());
}

#[test]
fn limit_requires_a_non_negative_integer() {
    let err = Stage::parse("$limit", &value!((-3))).unwrap_err();
    assert!(err.is_config());
    let err = Stage::parse("$limit", &value!("many")).unwrap_err();
    assert!(err.is_config());
}

// ---- composition -------------------------------------------------------

#[test]
fn stages_compose_left_to_right() {
    let out = run(
        serde_json::json!([
            {"$match": {"score": {"$gt": 0}}},
            {"$sort": {"score": 1}},
            {"$group": {"_id": "$score", "names": {"$push": "$name"}}}
        ]),
        docs(),
    );

    assert_eq!(
        out,
        vec![
            value!({"_id": 3, "names": ["birch", "dogwood"]}),
            value!({"_id": 7, "names": ["ash"]}),
            value!({"_id": 9, "names": ["cedar"]}),
        ]
    );
}

#[test]
fn empty_pipeline_is_identity() {
    let out = run(serde_json::json!([]), docs());
    assert_eq!(out, docs());
}

#[test]
fn context_variables_flow_into_stages() {
    let aggregator = Aggregator::new(&Value::from_json(&serde_json::json!([
        {"$group": {"_id": "$$bucketLabel", "n": {"$count": {}}}}
    ])))
    .unwrap()
    .with_context(Context::new().with_var("bucketLabel", value!("all")));

    let out = aggregator.run(docs()).unwrap();
    assert_eq!(out, vec![value!({"_id": "all", "n": 4})]);
}
