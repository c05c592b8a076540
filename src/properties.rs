//! Property maps attached to services and configurations.

use serde_json::Value;
use std::collections::BTreeMap;

/// Key/value metadata with deterministic key order.
pub type Properties = BTreeMap<String, Value>;

/// Registry-assigned identifier of a registered service.
pub const SERVICE_ID: &str = "service.id";
/// Interfaces a service is registered under.
pub const OBJECT_CLASS: &str = "objectClass";
/// Candidate priority; higher wins.
pub const SERVICE_RANKING: &str = "service.ranking";
/// Identifier of the configuration a property set came from.
pub const SERVICE_PID: &str = "service.pid";

/// Build a property map from `(key, value)` pairs.
///
/// ```
/// use depman::properties::props;
/// let p = props([("testkey", "testvalue")]);
/// assert_eq!(p["testkey"], "testvalue");
/// ```
pub fn props<K, V, I>(pairs: I) -> Properties
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

/// Keys owned by the service directory or the configuration store. They
/// describe where a property set came from and never travel to another
/// service's registration.
pub fn is_private_key(key: &str) -> bool {
    key.starts_with('.')
        || key == SERVICE_ID
        || key == OBJECT_CLASS
        || key == SERVICE_RANKING
        || key == SERVICE_PID
}

/// Ranking of a property set; absent or non-integer rankings count as 0.
pub fn ranking(properties: &Properties) -> i64 {
    properties
        .get(SERVICE_RANKING)
        .and_then(Value::as_i64)
        .unwrap_or(0)
}

/// Case-insensitive key lookup, as filters match attribute names.
pub fn get_ignore_case<'a>(properties: &'a Properties, key: &str) -> Option<&'a Value> {
    properties.get(key).or_else(|| {
        properties
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}
