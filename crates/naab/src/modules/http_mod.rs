//! The `http` module, a thin `ureq` wrapper. Responses come back as dicts
//! with `status` and `body` entries.

use indexmap::IndexMap;

use crate::{
    errors::{RunError, RunResult},
    interp::Interp,
    token::Span,
    value::Value,
};

use super::{as_str, expect_args, unknown_function, BuiltinModule};

const FUNCTIONS: &[&str] = &["get", "post"];

pub(crate) fn call(
    interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match function {
        "get" => {
            let [url] = expect_args::<1>("http.get", args, span)?;
            let url = as_str("http.get", &url, span)?;
            let response = ureq::get(&url)
                .call()
                .map_err(|err| request_error("http.get", &url, &err, span))?;
            response_value(response, interp, span)
        }
        "post" => {
            let [url, body] = expect_args::<2>("http.post", args, span)?;
            let url = as_str("http.post", &url, span)?;
            let payload = body.to_display_string();
            let response = ureq::post(&url)
                .set("content-type", "application/json")
                .send_string(&payload)
                .map_err(|err| request_error("http.post", &url, &err, span))?;
            response_value(response, interp, span)
        }
        other => Err(unknown_function(BuiltinModule::Http, other, FUNCTIONS, span)),
    }
}

fn response_value(
    response: ureq::Response,
    interp: &mut Interp,
    span: Span,
) -> RunResult<Value> {
    let status = i64::from(response.status());
    let body = response.into_string().map_err(|err| {
        RunError::runtime(format!("failed to read response body: {err}")).with_span(span)
    })?;
    let mut entries = IndexMap::new();
    entries.insert("status".to_owned(), Value::Int(status));
    entries.insert("body".to_owned(), Value::Str(body));
    Ok(Value::new_dict(entries, &mut interp.runtime.gc))
}

fn request_error(context: &str, url: &str, err: &ureq::Error, span: Span) -> Box<RunError> {
    RunError::runtime(format!("{context}('{url}') failed: {err}")).with_span(span)
}
