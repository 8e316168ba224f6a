use proptest::prelude::*;

/// Topics following the dot-separated lowercase convention
pub fn topic_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,11}(\\.[a-z][a-z0-9_]{0,11}){0,2}"
}

/// Small JSON objects used as event payloads
pub fn payload_strategy() -> impl Strategy<Value = serde_json::Value> {
    prop::collection::btree_map("[a-z_]{1,8}", any::<i64>(), 0..6).prop_map(|fields| {
        serde_json::Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, serde_json::Value::from(v)))
                .collect(),
        )
    })
}
