//! Value serialization across language boundaries.
//!
//! Two jobs live here: the [`WireValue`] intermediate that crosses the
//! executor boundary (it is `Send`, interpreter values are not), and the
//! per-target literal emitters used to inject bound variables into foreign
//! source. Scalars emit their literal form per target; strings are
//! double-quoted with `"`/`\`/newline/tab escaped (backslash-escaped words
//! in shell); lists, dicts, and structs emit JSON-shaped literals
//! recursively, structs keyed by field name.

use std::{collections::HashSet, rc::Rc, sync::Arc};

use indexmap::IndexMap;

use crate::{
    errors::{RunError, RunResult},
    executor::{Executor, Language},
    gc::GcState,
    value::{ForeignObject, Value},
};

/// The `Send` shape values take while crossing the executor boundary.
/// Serializable so executors may persist or forward wire data (compiled
/// blocks cache their inputs on disk).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum WireValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<WireValue>),
    Dict(IndexMap<String, WireValue>),
    /// An opaque handle owned by the executor, with its textual repr.
    Foreign { handle: u64, repr: String },
}

impl WireValue {
    pub fn from_json(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else {
                    Self::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            serde_json::Value::String(s) => Self::Str(s),
            serde_json::Value::Array(items) => {
                Self::List(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(entries) => Self::Dict(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Float(f) => serde_json::Value::from(*f),
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Dict(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
            // Foreign handles cannot round-trip through JSON; the repr is
            // the best readable stand-in.
            Self::Foreign { repr, .. } => serde_json::Value::String(repr.clone()),
        }
    }

    /// Converts wire data back into an interpreter value. Foreign handles
    /// keep a reference to the executor that owns them.
    pub fn into_value(
        self,
        gc: &mut GcState,
        language: Language,
        executor: &Arc<dyn Executor>,
    ) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(b),
            Self::Int(i) => Value::Int(i),
            Self::Float(f) => Value::Float(f),
            Self::Str(s) => Value::Str(s),
            Self::List(items) => {
                let converted = items
                    .into_iter()
                    .map(|item| item.into_value(gc, language, executor))
                    .collect();
                Value::new_list(converted, gc)
            }
            Self::Dict(entries) => {
                let converted = entries
                    .into_iter()
                    .map(|(k, v)| (k, v.into_value(gc, language, executor)))
                    .collect();
                Value::new_dict(converted, gc)
            }
            Self::Foreign { handle, repr } => Value::Foreign(Rc::new(ForeignObject {
                language,
                handle,
                repr,
                path: Vec::new(),
                executor: Arc::clone(executor),
            })),
        }
    }
}

/// Marshals an interpreter value to the wire. Structs flatten to dicts keyed
/// by field name; cyclic graphs are rejected (no wire format can carry
/// them).
pub fn to_wire(value: &Value) -> RunResult<WireValue> {
    let mut seen = HashSet::new();
    to_wire_inner(value, &mut seen)
}

fn to_wire_inner(value: &Value, seen: &mut HashSet<usize>) -> RunResult<WireValue> {
    match value {
        Value::Null => Ok(WireValue::Null),
        Value::Bool(b) => Ok(WireValue::Bool(*b)),
        Value::Int(i) => Ok(WireValue::Int(*i)),
        Value::Float(f) => Ok(WireValue::Float(*f)),
        Value::Str(s) => Ok(WireValue::Str(s.clone())),
        Value::EnumMember(member) => Ok(WireValue::Int(member.value)),
        Value::List(items) => {
            let key = Rc::as_ptr(items) as usize;
            if !seen.insert(key) {
                return Err(RunError::block("cannot marshal a cyclic value"));
            }
            let mut out = Vec::with_capacity(items.borrow().len());
            for item in items.borrow().iter() {
                out.push(to_wire_inner(item, seen)?);
            }
            seen.remove(&key);
            Ok(WireValue::List(out))
        }
        Value::Dict(entries) => {
            let key = Rc::as_ptr(entries) as usize;
            if !seen.insert(key) {
                return Err(RunError::block("cannot marshal a cyclic value"));
            }
            let mut out = IndexMap::with_capacity(entries.borrow().len());
            for (k, v) in entries.borrow().iter() {
                out.insert(k.clone(), to_wire_inner(v, seen)?);
            }
            seen.remove(&key);
            Ok(WireValue::Dict(out))
        }
        Value::Struct(instance) => {
            let key = Rc::as_ptr(instance) as usize;
            if !seen.insert(key) {
                return Err(RunError::block("cannot marshal a cyclic value"));
            }
            let instance = instance.borrow();
            let mut out = IndexMap::with_capacity(instance.fields.len());
            for ((field, _), v) in instance.def.fields.iter().zip(&instance.fields) {
                out.insert(field.clone(), to_wire_inner(v, seen)?);
            }
            seen.remove(&key);
            Ok(WireValue::Dict(out))
        }
        other => Err(RunError::block(format!(
            "a {} value cannot cross a language boundary",
            other.type_name()
        ))),
    }
}

/// Strips the common leading whitespace from all lines but the first, so
/// host-indented blocks yield correctly indented foreign code.
pub fn dedent(code: &str) -> String {
    let mut lines = code.split('\n');
    let Some(first) = lines.next() else {
        return String::new();
    };
    let rest: Vec<&str> = lines.collect();
    let common = rest
        .iter()
        .filter(|line| !line.trim().is_empty())
        .map(|line| line.len() - line.trim_start().len())
        .min()
        .unwrap_or(0);
    let mut out = String::from(first);
    for line in rest {
        out.push('\n');
        if line.trim().is_empty() {
            continue;
        }
        out.push_str(&line[common.min(line.len())..]);
    }
    out
}

/// Emits the declaration that binds `name` to `value` at the top of a
/// foreign block, in the target's own syntax.
pub fn binding_decl(language: Language, name: &str, value: &Value) -> RunResult<String> {
    Ok(match language {
        Language::Python => format!("{name} = {}", python_literal(value)?),
        Language::Ruby => format!("{name} = {}", ruby_literal(value)?),
        Language::JavaScript => format!("const {name} = {};", json_literal(value)?),
        Language::Rust => format!("let {name} = {};", rust_literal(value)?),
        Language::Go => format!("{name} := {}", go_literal(value)?),
        Language::Bash => format!("{name}={}", shell_word(&value.to_display_string())),
        Language::Cpp => cpp_decl(name, value)?,
        Language::CSharp => format!("var {name} = {};", csharp_literal(value)?),
    })
}

fn python_literal(value: &Value) -> RunResult<String> {
    Ok(match value {
        Value::Null => "None".to_owned(),
        Value::Bool(true) => "True".to_owned(),
        Value::Bool(false) => "False".to_owned(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => crate::value::format_float(*f),
        Value::Str(s) => quote_string(s),
        Value::List(items) => {
            let parts: RunResult<Vec<String>> =
                items.borrow().iter().map(python_literal).collect();
            format!("[{}]", parts?.join(", "))
        }
        Value::Dict(entries) => {
            let mut parts = Vec::new();
            for (k, v) in entries.borrow().iter() {
                parts.push(format!("{}: {}", quote_string(k), python_literal(v)?));
            }
            format!("{{{}}}", parts.join(", "))
        }
        Value::Struct(_) => {
            // Structs cross as JSON objects keyed by field name; the JSON
            // shape is valid Python except for its scalar spellings, so go
            // through the wire form and re-emit.
            let wire = to_wire(value)?;
            python_wire_literal(&wire)
        }
        other => {
            return Err(RunError::block(format!(
                "cannot inject a {} into a python block",
                other.type_name()
            )))
        }
    })
}

fn python_wire_literal(wire: &WireValue) -> String {
    match wire {
        WireValue::Null => "None".to_owned(),
        WireValue::Bool(true) => "True".to_owned(),
        WireValue::Bool(false) => "False".to_owned(),
        WireValue::Int(i) => i.to_string(),
        WireValue::Float(f) => crate::value::format_float(*f),
        WireValue::Str(s) | WireValue::Foreign { repr: s, .. } => quote_string(s),
        WireValue::List(items) => {
            let parts: Vec<String> = items.iter().map(python_wire_literal).collect();
            format!("[{}]", parts.join(", "))
        }
        WireValue::Dict(entries) => {
            let parts: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{}: {}", quote_string(k), python_wire_literal(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
    }
}

fn ruby_literal(value: &Value) -> RunResult<String> {
    Ok(match value {
        Value::Null => "nil".to_owned(),
        Value::Bool(b) => b.to_string(),
        other => {
            let wire = to_wire(other)?;
            ruby_wire_literal(&wire)
        }
    })
}

fn ruby_wire_literal(wire: &WireValue) -> String {
    match wire {
        WireValue::Null => "nil".to_owned(),
        WireValue::Bool(b) => b.to_string(),
        WireValue::Int(i) => i.to_string(),
        WireValue::Float(f) => crate::value::format_float(*f),
        WireValue::Str(s) | WireValue::Foreign { repr: s, .. } => quote_string(s),
        WireValue::List(items) => {
            let parts: Vec<String> = items.iter().map(ruby_wire_literal).collect();
            format!("[{}]", parts.join(", "))
        }
        WireValue::Dict(entries) => {
            let parts: Vec<String> = entries
                .iter()
                .map(|(k, v)| format!("{} => {}", quote_string(k), ruby_wire_literal(v)))
                .collect();
            format!("{{{}}}", parts.join(", "))
        }
    }
}

/// JSON literal form, valid as-is in JavaScript.
fn json_literal(value: &Value) -> RunResult<String> {
    Ok(to_wire(value)?.to_json().to_string())
}

fn rust_literal(value: &Value) -> RunResult<String> {
    Ok(match value {
        Value::Null => "()".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => format!("{i}i64"),
        Value::Float(f) => format!("{f}f64"),
        Value::Str(s) => quote_string(s),
        Value::List(items) => {
            let parts: RunResult<Vec<String>> =
                items.borrow().iter().map(rust_literal).collect();
            format!("vec![{}]", parts?.join(", "))
        }
        // Containers without a literal syntax travel as JSON text.
        other => format!("r#\"{}\"#", to_wire(other)?.to_json()),
    })
}

fn go_literal(value: &Value) -> RunResult<String> {
    Ok(match value {
        Value::Null => "nil".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => format!("{f}"),
        Value::Str(s) => quote_string(s),
        other => format!("`{}`", to_wire(other)?.to_json()),
    })
}

fn csharp_literal(value: &Value) -> RunResult<String> {
    Ok(match value {
        Value::Null => "null".to_owned(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => format!("{i}L"),
        Value::Float(f) => format!("{f}d"),
        Value::Str(s) => quote_string(s),
        other => format!("@\"{}\"", to_wire(other)?.to_json().to_string().replace('"', "\"\"")),
    })
}

/// Typed declaration for C++ blocks. Ints and floats use wide scalar types;
/// containers and structs travel as raw JSON strings.
fn cpp_decl(name: &str, value: &Value) -> RunResult<String> {
    Ok(match value {
        Value::Null => format!("void* {name} = nullptr;"),
        Value::Bool(b) => format!("bool {name} = {b};"),
        Value::Int(i) => format!("long long {name} = {i};"),
        Value::Float(f) => format!("double {name} = {f};"),
        Value::Str(s) => format!("std::string {name} = {};", quote_string(s)),
        other => format!(
            "std::string {name} = R\"NAAB({})NAAB\";",
            to_wire(other)?.to_json()
        ),
    })
}

/// Double-quotes a string, escaping `"`, `\`, newline, and tab.
pub fn quote_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Backslash-escapes a shell word; alphanumerics and a few safe characters
/// pass through untouched.
pub fn shell_word(s: &str) -> String {
    if !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':'))
    {
        return s.to_owned();
    }
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | ':') {
            out.push(c);
        } else if c == '\n' {
            out.push_str("$'\\n'");
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

/// Reparses wrap-print output as int, float, or string — the fallback
/// protocol for targets without a structured result channel.
pub fn parse_scalar_output(stdout: &str) -> WireValue {
    let trimmed = stdout.trim_end_matches('\n').trim();
    if let Ok(i) = trimmed.parse::<i64>() {
        return WireValue::Int(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return WireValue::Float(f);
    }
    WireValue::Str(trimmed.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gc() -> GcState {
        GcState::new(usize::MAX)
    }

    #[test]
    fn scalar_wire_round_trip() {
        use crate::executor::ScriptedExecutor;
        let executor: Arc<dyn Executor> =
            Arc::new(ScriptedExecutor::new(Language::Python, vec![]));
        let mut gc = gc();
        for value in [
            Value::Null,
            Value::Int(-3),
            Value::Float(2.5),
            Value::Bool(true),
            Value::Str("hi \"there\"".to_owned()),
        ] {
            let wire = to_wire(&value).unwrap();
            let back = wire.into_value(&mut gc, Language::Python, &executor);
            assert!(value.structural_eq(&back), "{value:?} did not round-trip");
        }
    }

    #[test]
    fn container_wire_round_trip() {
        use crate::executor::ScriptedExecutor;
        let executor: Arc<dyn Executor> =
            Arc::new(ScriptedExecutor::new(Language::Python, vec![]));
        let mut g = gc();
        let list = Value::new_list(vec![Value::Int(1), Value::Str("a".into())], &mut g);
        let mut entries = IndexMap::new();
        entries.insert("k".to_owned(), list.clone());
        let dict = Value::new_dict(entries, &mut g);
        let back = to_wire(&dict)
            .unwrap()
            .into_value(&mut g, Language::Python, &executor);
        assert!(dict.structural_eq(&back));
    }

    #[test]
    fn cyclic_values_refuse_to_marshal() {
        let mut g = gc();
        let list = Value::new_list(vec![], &mut g);
        if let Value::List(cell) = &list {
            cell.borrow_mut().push(list.clone());
        }
        let err = to_wire(&list).unwrap_err();
        assert!(err.message.contains("cyclic"));
    }

    #[test]
    fn dedent_strips_common_indent_only_after_first_line() {
        let code = "x = 1\n    y = 2\n      z = 3\n";
        assert_eq!(dedent(code), "x = 1\ny = 2\n  z = 3\n");
    }

    #[test]
    fn python_binding_spellings() {
        let mut g = gc();
        assert_eq!(
            binding_decl(Language::Python, "a", &Value::Bool(true)).unwrap(),
            "a = True"
        );
        assert_eq!(
            binding_decl(Language::Python, "a", &Value::Null).unwrap(),
            "a = None"
        );
        let list = Value::new_list(vec![Value::Int(1), Value::Int(2)], &mut g);
        assert_eq!(
            binding_decl(Language::Python, "xs", &list).unwrap(),
            "xs = [1, 2]"
        );
    }

    #[test]
    fn js_and_shell_binding_spellings() {
        assert_eq!(
            binding_decl(Language::JavaScript, "s", &Value::Str("a\"b".into())).unwrap(),
            "const s = \"a\\\"b\";"
        );
        assert_eq!(
            binding_decl(Language::Bash, "w", &Value::Str("two words".into())).unwrap(),
            "w=two\\ words"
        );
        assert_eq!(
            binding_decl(Language::Bash, "n", &Value::Int(42)).unwrap(),
            "n=42"
        );
    }

    #[test]
    fn cpp_declarations_are_typed() {
        assert_eq!(
            binding_decl(Language::Cpp, "n", &Value::Int(7)).unwrap(),
            "long long n = 7;"
        );
        assert_eq!(
            binding_decl(Language::Cpp, "s", &Value::Str("x".into())).unwrap(),
            "std::string s = \"x\";"
        );
    }

    #[test]
    fn scalar_output_reparse() {
        assert_eq!(parse_scalar_output("42\n"), WireValue::Int(42));
        assert_eq!(parse_scalar_output("2.5\n"), WireValue::Float(2.5));
        assert_eq!(
            parse_scalar_output("hello\n"),
            WireValue::Str("hello".to_owned())
        );
    }
}
