//! The `array` module.
//!
//! `map_fn`, `filter_fn`, and `reduce_fn` receive host function values and
//! invoke them through the evaluator, one element at a time.

use crate::{
    errors::{RunError, RunResult},
    interp::Interp,
    token::Span,
    value::Value,
};

use super::{as_int, as_list, as_str, expect_args, unknown_function, BuiltinModule};

const FUNCTIONS: &[&str] = &[
    "push",
    "pop",
    "contains",
    "index_of",
    "reverse",
    "sort",
    "slice",
    "join",
    "map_fn",
    "filter_fn",
    "reduce_fn",
];

pub(crate) fn call(
    interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match function {
        "push" => {
            let [list, value] = expect_args::<2>("array.push", args, span)?;
            let items = as_list("array.push", &list, span)?;
            items.borrow_mut().push(value);
            Ok(list)
        }
        "pop" => {
            let [list] = expect_args::<1>("array.pop", args, span)?;
            let items = as_list("array.pop", &list, span)?;
            let popped = items.borrow_mut().pop();
            popped.ok_or_else(|| {
                RunError::runtime("array.pop on an empty list").with_span(span)
            })
        }
        "contains" => {
            let [list, needle] = expect_args::<2>("array.contains", args, span)?;
            let items = as_list("array.contains", &list, span)?;
            let found = items.borrow().iter().any(|item| item.loosely_eq(&needle));
            Ok(Value::Bool(found))
        }
        "index_of" => {
            let [list, needle] = expect_args::<2>("array.index_of", args, span)?;
            let items = as_list("array.index_of", &list, span)?;
            let index = items
                .borrow()
                .iter()
                .position(|item| item.loosely_eq(&needle))
                .map(|i| i as i64)
                .unwrap_or(-1);
            Ok(Value::Int(index))
        }
        "reverse" => {
            let [list] = expect_args::<1>("array.reverse", args, span)?;
            let items = as_list("array.reverse", &list, span)?;
            let mut reversed = items.borrow().clone();
            reversed.reverse();
            Ok(Value::new_list(reversed, &mut interp.runtime.gc))
        }
        "sort" => {
            let [list] = expect_args::<1>("array.sort", args, span)?;
            let items = as_list("array.sort", &list, span)?;
            let mut sorted = items.borrow().clone();
            let all_numeric = sorted
                .iter()
                .all(|v| matches!(v, Value::Int(_) | Value::Float(_)));
            if all_numeric {
                sorted.sort_by(|a, b| {
                    a.to_float()
                        .partial_cmp(&b.to_float())
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
            } else {
                sorted.sort_by_key(Value::to_display_string);
            }
            Ok(Value::new_list(sorted, &mut interp.runtime.gc))
        }
        "slice" => {
            let [list, start, end] = expect_args::<3>("array.slice", args, span)?;
            let items = as_list("array.slice", &list, span)?;
            let items = items.borrow();
            let start = as_int("array.slice", &start, span)?.max(0) as usize;
            let end = (as_int("array.slice", &end, span)?.max(0) as usize).min(items.len());
            let slice: Vec<Value> = items
                .get(start..end.max(start))
                .unwrap_or_default()
                .to_vec();
            drop(items);
            Ok(Value::new_list(slice, &mut interp.runtime.gc))
        }
        "join" => {
            let [list, separator] = expect_args::<2>("array.join", args, span)?;
            let items = as_list("array.join", &list, span)?;
            let separator = as_str("array.join", &separator, span)?;
            let joined = items
                .borrow()
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join(&separator);
            Ok(Value::Str(joined))
        }
        "map_fn" => {
            let [list, mapper] = expect_args::<2>("array.map_fn", args, span)?;
            let items = as_list("array.map_fn", &list, span)?;
            let snapshot: Vec<Value> = items.borrow().clone();
            let mut mapped = Vec::with_capacity(snapshot.len());
            for item in snapshot {
                mapped.push(interp.call_callable(mapper.clone(), vec![item], span)?);
            }
            Ok(Value::new_list(mapped, &mut interp.runtime.gc))
        }
        "filter_fn" => {
            let [list, predicate] = expect_args::<2>("array.filter_fn", args, span)?;
            let items = as_list("array.filter_fn", &list, span)?;
            let snapshot: Vec<Value> = items.borrow().clone();
            let mut kept = Vec::new();
            for item in snapshot {
                let keep = interp
                    .call_callable(predicate.clone(), vec![item.clone()], span)?
                    .to_bool();
                if keep {
                    kept.push(item);
                }
            }
            Ok(Value::new_list(kept, &mut interp.runtime.gc))
        }
        "reduce_fn" => {
            let [list, reducer, init] = expect_args::<3>("array.reduce_fn", args, span)?;
            let items = as_list("array.reduce_fn", &list, span)?;
            let snapshot: Vec<Value> = items.borrow().clone();
            let mut accumulator = init;
            for item in snapshot {
                accumulator =
                    interp.call_callable(reducer.clone(), vec![accumulator, item], span)?;
            }
            Ok(accumulator)
        }
        other => Err(unknown_function(BuiltinModule::Array, other, FUNCTIONS, span)),
    }
}
