//! The `collections` module: dict and list utilities.

use indexmap::IndexMap;

use crate::{errors::RunResult, interp::Interp, token::Span, value::Value};

use super::{as_dict, as_list, as_str, expect_args, unknown_function, BuiltinModule};

const FUNCTIONS: &[&str] = &[
    "keys",
    "values",
    "has_key",
    "remove_key",
    "merge",
    "entries",
    "unique",
    "zip",
];

pub(crate) fn call(
    interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match function {
        "keys" => {
            let [dict] = expect_args::<1>("collections.keys", args, span)?;
            let entries = as_dict("collections.keys", &dict, span)?;
            let keys: Vec<Value> = entries
                .borrow()
                .keys()
                .map(|k| Value::Str(k.clone()))
                .collect();
            Ok(Value::new_list(keys, &mut interp.runtime.gc))
        }
        "values" => {
            let [dict] = expect_args::<1>("collections.values", args, span)?;
            let entries = as_dict("collections.values", &dict, span)?;
            let values: Vec<Value> = entries.borrow().values().cloned().collect();
            Ok(Value::new_list(values, &mut interp.runtime.gc))
        }
        "has_key" => {
            let [dict, key] = expect_args::<2>("collections.has_key", args, span)?;
            let entries = as_dict("collections.has_key", &dict, span)?;
            let key = as_str("collections.has_key", &key, span)?;
            let present = entries.borrow().contains_key(&key);
            Ok(Value::Bool(present))
        }
        "remove_key" => {
            let [dict, key] = expect_args::<2>("collections.remove_key", args, span)?;
            let entries = as_dict("collections.remove_key", &dict, span)?;
            let key = as_str("collections.remove_key", &key, span)?;
            // shift_remove keeps the remaining insertion order stable.
            let removed = entries.borrow_mut().shift_remove(&key);
            Ok(removed.unwrap_or(Value::Null))
        }
        "merge" => {
            let [left, right] = expect_args::<2>("collections.merge", args, span)?;
            let left = as_dict("collections.merge", &left, span)?;
            let right = as_dict("collections.merge", &right, span)?;
            let mut merged: IndexMap<String, Value> = left.borrow().clone();
            for (key, value) in right.borrow().iter() {
                merged.insert(key.clone(), value.clone());
            }
            Ok(Value::new_dict(merged, &mut interp.runtime.gc))
        }
        "entries" => {
            let [dict] = expect_args::<1>("collections.entries", args, span)?;
            let entries = as_dict("collections.entries", &dict, span)?;
            let snapshot: Vec<(String, Value)> = entries
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            let mut pairs = Vec::with_capacity(snapshot.len());
            for (key, value) in snapshot {
                pairs.push(Value::new_list(
                    vec![Value::Str(key), value],
                    &mut interp.runtime.gc,
                ));
            }
            Ok(Value::new_list(pairs, &mut interp.runtime.gc))
        }
        "unique" => {
            let [list] = expect_args::<1>("collections.unique", args, span)?;
            let items = as_list("collections.unique", &list, span)?;
            let mut seen: Vec<String> = Vec::new();
            let mut unique = Vec::new();
            for item in items.borrow().iter() {
                let key = item.to_display_string();
                if !seen.contains(&key) {
                    seen.push(key);
                    unique.push(item.clone());
                }
            }
            Ok(Value::new_list(unique, &mut interp.runtime.gc))
        }
        "zip" => {
            let [left, right] = expect_args::<2>("collections.zip", args, span)?;
            let left = as_list("collections.zip", &left, span)?;
            let right = as_list("collections.zip", &right, span)?;
            let pairs_src: Vec<(Value, Value)> = left
                .borrow()
                .iter()
                .zip(right.borrow().iter())
                .map(|(a, b)| (a.clone(), b.clone()))
                .collect();
            let mut pairs = Vec::with_capacity(pairs_src.len());
            for (a, b) in pairs_src {
                pairs.push(Value::new_list(vec![a, b], &mut interp.runtime.gc));
            }
            Ok(Value::new_list(pairs, &mut interp.runtime.gc))
        }
        other => Err(unknown_function(
            BuiltinModule::Collections,
            other,
            FUNCTIONS,
            span,
        )),
    }
}
