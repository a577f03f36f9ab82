/// Check output as handed to the scheduler: record kind -> ordered list of
/// field maps.
///
/// Records stay typed until this boundary; optional fields that were never
/// observed are simply absent from the maps.
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub type Item = Map<String, Value>;
pub type State = BTreeMap<String, Vec<Item>>;

/// Serialize `records` and store them under `kind`.
pub fn insert<T: Serialize>(
    state: &mut State,
    kind: &str,
    records: &[T],
) -> Result<(), serde_json::Error> {
    let mut items = Vec::with_capacity(records.len());
    for record in records {
        let item = match serde_json::to_value(record)? {
            Value::Object(map) => map,
            // Non-struct records are wrapped so every item stays a field map.
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        items.push(item);
    }
    state.insert(kind.to_string(), items);
    Ok(())
}
