//! End-to-end pipeline acceptance tests through the public API.

use docmill::prelude::*;
use docmill::value;

fn pipeline(json: serde_json::Value) -> Aggregator {
    Aggregator::new(&Value::from_json(&json)).expect("pipeline should parse")
}

#[test]
fn bucket_with_default_routes_out_of_range_values() {
    let engine = pipeline(serde_json::json!([
        {"$bucket": {"groupBy": "$v", "boundaries": [0, 10, 20], "default": "Other"}}
    ]));

    let out = engine
        .run(vec![
            value!({"v": 5}),
            value!({"v": 15}),
            value!({"v": 25}),
            value!({"v": (-1)}),
        ])
        .unwrap();

    assert_eq!(
        out,
        vec![
            value!({"_id": 0, "count": 1}),
            value!({"_id": 10, "count": 1}),
            value!({"_id": "Other", "count": 2}),
        ]
    );
}

#[test]
fn bucket_auto_splits_with_shared_boundary() {
    let engine = pipeline(serde_json::json!([
        {"$bucketAuto": {"groupBy": "$v", "buckets": 2}}
    ]));

    let out = engine
        .run((1..=6).map(|v| value!({ "v": { v } })).collect())
        .unwrap();

    assert_eq!(out.len(), 2);
    let count = |doc: &Value| resolve(doc, "count").as_i64().unwrap();
    assert_eq!(count(&out[0]) + count(&out[1]), 6);
    assert_eq!(resolve(&out[0], "_id.max"), resolve(&out[1], "_id.min"));
}

#[test]
fn group_then_sort_produces_deterministic_rollups() {
    let engine = pipeline(serde_json::json!([
        {"$group": {
            "_id": "$sku",
            "sold": {"$sum": "$qty"},
            "buyers": {"$addToSet": "$buyer"},
            "spread": {"$stdDevSamp": "$qty"}
        }},
        {"$sort": {"_id": 1}}
    ]));

    let out = engine
        .run(vec![
            value!({"sku": "b", "qty": 4, "buyer": "ana"}),
            value!({"sku": "a", "qty": 2, "buyer": "bo"}),
            value!({"sku": "b", "qty": 6, "buyer": "ana"}),
            value!({"sku": "a", "qty": 2, "buyer": "cy"}),
        ])
        .unwrap();

    assert_eq!(
        out,
        vec![
            value!({"_id": "a", "sold": 4, "buyers": ["bo", "cy"], "spread": 0.0}),
            value!({"_id": "b", "sold": 10, "buyers": ["ana"], "spread": (2.0f64.sqrt())}),
        ]
    );
}

#[test]
fn std_dev_samp_of_single_element_group_is_null() {
    let engine = pipeline(serde_json::json!([
        {"$group": {"_id": null, "spread": {"$stdDevSamp": "$x"}}}
    ]));

    let out = engine.run(vec![value!({"x": 7})]).unwrap();
    assert_eq!(out, vec![value!({"_id": null, "spread": null})]);
}

#[test]
fn window_fields_fill_linear_and_locf() {
    let engine = pipeline(serde_json::json!([
        {"$setWindowFields": {
            "sortBy": {"t": 1},
            "output": {
                "price": {"$linearFill": "$price"},
                "status": {"$locf": "$status"}
            }
        }}
    ]));

    let out = engine
        .run(vec![
            value!({"t": 1, "price": 10, "status": "open"}),
            value!({"t": 2, "price": null, "status": null}),
            value!({"t": 3, "price": 30, "status": "closed"}),
        ])
        .unwrap();

    assert_eq!(resolve(&out[1], "price"), value!(20.0));
    assert_eq!(resolve(&out[1], "status"), value!("open"));
}

#[test]
fn pipeline_data_errors_surface_with_classification() {
    let engine = pipeline(serde_json::json!([
        {"$bucket": {"groupBy": "$v", "boundaries": [0, 10]}}
    ]));

    let err = engine.run(vec![value!({"v": 50})]).unwrap_err();
    assert!(err.is_data());
    assert_eq!(err.display_with_class().split(':').nth(1), Some("data"));
}

#[test]
fn nested_paths_group_through_array_descent() {
    let engine = pipeline(serde_json::json!([
        {"$group": {"_id": null, "all": {"$push": "$items.qty"}}}
    ]));

    let out = engine
        .run(vec![
            value!({"items": [{"qty": 1}, {"qty": 2}]}),
            value!({"items": [{"qty": 3}]}),
        ])
        .unwrap();

    assert_eq!(
        out,
        vec![value!({"_id": null, "all": [[1, 2], [3]]})]
    );
}

#[test]
fn mutation_helpers_round_trip() {
    let mut doc = value!({});
    set_value(&mut doc, "a.b", &value!(5));
    assert_eq!(doc, value!({"a": {"b": 5}}));

    remove_value(&mut doc, "a.b");
    assert_eq!(doc, value!({"a": {}}));
}

#[test]
fn version_is_exported() {
    assert!(!docmill::VERSION.is_empty());
}
