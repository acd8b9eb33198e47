//! Built-in stdlib modules.
//!
//! Each module exposes a uniform `call(name, args) -> Value` entry point;
//! the evaluator reaches them through the `__stdlib_module__:` /
//! `__stdlib_call__:` marker mechanism. The array module calls back into
//! the evaluator so its higher-order operations can invoke host functions.

use std::{cell::RefCell, rc::Rc};

use indexmap::IndexMap;
use strum::{Display, EnumString};

use crate::{
    errors::{RunError, RunResult},
    interp::Interp,
    token::Span,
    value::Value,
};

pub(crate) mod array_mod;
pub(crate) mod collections_mod;
pub(crate) mod crypto_mod;
pub(crate) mod csv_mod;
pub(crate) mod debug_mod;
pub(crate) mod env_mod;
pub(crate) mod fs_mod;
pub(crate) mod http_mod;
pub(crate) mod io_mod;
pub(crate) mod json_mod;
pub(crate) mod math_mod;
pub(crate) mod regex_mod;
pub(crate) mod string_mod;
pub(crate) mod time_mod;

/// The built-in modules a program can `use`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum BuiltinModule {
    Io,
    String,
    Array,
    Json,
    Time,
    Math,
    Fs,
    Env,
    Http,
    Regex,
    Crypto,
    Collections,
    Csv,
    Debug,
}

impl BuiltinModule {
    pub fn by_name(name: &str) -> Option<Self> {
        name.parse().ok()
    }
}

/// Dispatches `module.function(args)` to the module implementation.
pub(crate) fn call(
    interp: &mut Interp,
    module: BuiltinModule,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match module {
        BuiltinModule::Io => io_mod::call(interp, function, args, span),
        BuiltinModule::String => string_mod::call(interp, function, args, span),
        BuiltinModule::Array => array_mod::call(interp, function, args, span),
        BuiltinModule::Json => json_mod::call(interp, function, args, span),
        BuiltinModule::Time => time_mod::call(interp, function, args, span),
        BuiltinModule::Math => math_mod::call(interp, function, args, span),
        BuiltinModule::Fs => fs_mod::call(interp, function, args, span),
        BuiltinModule::Env => env_mod::call(interp, function, args, span),
        BuiltinModule::Http => http_mod::call(interp, function, args, span),
        BuiltinModule::Regex => regex_mod::call(interp, function, args, span),
        BuiltinModule::Crypto => crypto_mod::call(interp, function, args, span),
        BuiltinModule::Collections => collections_mod::call(interp, function, args, span),
        BuiltinModule::Csv => csv_mod::call(interp, function, args, span),
        BuiltinModule::Debug => debug_mod::call(interp, function, args, span),
    }
}

pub(crate) fn unknown_function(
    module: BuiltinModule,
    function: &str,
    known: &[&str],
    span: Span,
) -> Box<RunError> {
    RunError::reference(format!(
        "module '{module}' has no function '{function}'{}",
        crate::suggest::suggestion_suffix(function, known.iter().copied())
    ))
    .with_span(span)
}

// --- Shared argument extractors -----------------------------------------

pub(crate) fn expect_args<const N: usize>(
    context: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<[Value; N]> {
    let got = args.len();
    args.try_into().map_err(|_| {
        RunError::type_error(format!("{context}() takes {N} argument(s), got {got}"))
            .with_span(span)
    })
}

pub(crate) fn as_str(context: &str, value: &Value, span: Span) -> RunResult<String> {
    match value {
        Value::Str(s) => Ok(s.clone()),
        other => Err(RunError::type_error(format!(
            "{context}() expects a string, got {}",
            other.type_name()
        ))
        .with_span(span)),
    }
}

pub(crate) fn as_int(context: &str, value: &Value, span: Span) -> RunResult<i64> {
    match value {
        Value::Int(v) => Ok(*v),
        other => Err(RunError::type_error(format!(
            "{context}() expects an int, got {}",
            other.type_name()
        ))
        .with_span(span)),
    }
}

pub(crate) fn as_float(context: &str, value: &Value, span: Span) -> RunResult<f64> {
    match value {
        Value::Int(v) => Ok(*v as f64),
        Value::Float(v) => Ok(*v),
        other => Err(RunError::type_error(format!(
            "{context}() expects a number, got {}",
            other.type_name()
        ))
        .with_span(span)),
    }
}

pub(crate) fn as_list(
    context: &str,
    value: &Value,
    span: Span,
) -> RunResult<Rc<RefCell<Vec<Value>>>> {
    match value {
        Value::List(items) => Ok(Rc::clone(items)),
        other => Err(RunError::type_error(format!(
            "{context}() expects a list, got {}",
            other.type_name()
        ))
        .with_span(span)),
    }
}

pub(crate) fn as_dict(
    context: &str,
    value: &Value,
    span: Span,
) -> RunResult<Rc<RefCell<IndexMap<String, Value>>>> {
    match value {
        Value::Dict(entries) => Ok(Rc::clone(entries)),
        other => Err(RunError::type_error(format!(
            "{context}() expects a dict, got {}",
            other.type_name()
        ))
        .with_span(span)),
    }
}
