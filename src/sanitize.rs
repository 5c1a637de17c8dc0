use serde_json::{Map, Value};

use crate::error::HarvestError;

/// Strips falsy values (null, `false`, zero, empty strings and empty
/// containers) from a metadata tree until nothing more can be removed.
///
/// The root itself is never dropped: a falsy root scalar comes back as-is,
/// while a `null` root is rejected because it is not a metadata document.
pub fn sanitize(value: Value) -> Result<Value, HarvestError> {
    if value.is_null() {
        return Err(HarvestError::SanitizeType("null".to_string()));
    }

    let mut current = value;
    loop {
        let (next, changed) = strip_pass(current);
        current = next;
        if !changed {
            return Ok(current);
        }
    }
}

pub fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(flag) => !flag,
        Value::Number(number) => number.as_f64().map(|n| n == 0.0).unwrap_or(false),
        Value::String(text) => text.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
    }
}

/// One bottom-up pass: filters falsy children out of every container, then
/// recurses into the survivors. Containers emptied here are removed by the
/// next pass.
fn strip_pass(value: Value) -> (Value, bool) {
    match value {
        Value::Array(items) => {
            let before = items.len();
            let mut changed = false;
            let kept = items
                .into_iter()
                .filter(|item| !is_falsy(item))
                .map(|item| {
                    let (item, item_changed) = strip_pass(item);
                    changed |= item_changed;
                    item
                })
                .collect::<Vec<_>>();
            changed |= kept.len() != before;
            (Value::Array(kept), changed)
        }
        Value::Object(map) => {
            let before = map.len();
            let mut changed = false;
            let mut kept = Map::new();
            for (key, item) in map {
                if is_falsy(&item) {
                    continue;
                }
                let (item, item_changed) = strip_pass(item);
                changed |= item_changed;
                kept.insert(key, item);
            }
            changed |= kept.len() != before;
            (Value::Object(kept), changed)
        }
        scalar => (scalar, false),
    }
}
