//! The `fs` module. Operations block the interpreter thread; the design
//! accepts this and makes no latency guarantees.

use std::{fs, io::Write, path::Path};

use crate::{
    errors::{RunError, RunResult},
    interp::Interp,
    token::Span,
    value::Value,
};

use super::{as_str, expect_args, unknown_function, BuiltinModule};

const FUNCTIONS: &[&str] = &[
    "read_file",
    "write_file",
    "append_file",
    "exists",
    "remove",
    "list_dir",
    "is_dir",
    "is_file",
    "mkdir",
];

pub(crate) fn call(
    interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match function {
        "read_file" => {
            let [path] = expect_args::<1>("fs.read_file", args, span)?;
            let path = as_str("fs.read_file", &path, span)?;
            fs::read_to_string(&path)
                .map(Value::Str)
                .map_err(|err| io_error("fs.read_file", &path, err, span))
        }
        "write_file" => {
            let [path, contents] = expect_args::<2>("fs.write_file", args, span)?;
            let path = as_str("fs.write_file", &path, span)?;
            fs::write(&path, contents.to_display_string())
                .map(|()| Value::Null)
                .map_err(|err| io_error("fs.write_file", &path, err, span))
        }
        "append_file" => {
            let [path, contents] = expect_args::<2>("fs.append_file", args, span)?;
            let path = as_str("fs.append_file", &path, span)?;
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .and_then(|mut file| file.write_all(contents.to_display_string().as_bytes()))
                .map(|()| Value::Null)
                .map_err(|err| io_error("fs.append_file", &path, err, span))
        }
        "exists" => {
            let [path] = expect_args::<1>("fs.exists", args, span)?;
            Ok(Value::Bool(Path::new(&as_str("fs.exists", &path, span)?).exists()))
        }
        "remove" => {
            let [path] = expect_args::<1>("fs.remove", args, span)?;
            let path = as_str("fs.remove", &path, span)?;
            let target = Path::new(&path);
            let result = if target.is_dir() {
                fs::remove_dir_all(target)
            } else {
                fs::remove_file(target)
            };
            result
                .map(|()| Value::Null)
                .map_err(|err| io_error("fs.remove", &path, err, span))
        }
        "list_dir" => {
            let [path] = expect_args::<1>("fs.list_dir", args, span)?;
            let path = as_str("fs.list_dir", &path, span)?;
            let entries = fs::read_dir(&path)
                .map_err(|err| io_error("fs.list_dir", &path, err, span))?;
            let mut names = Vec::new();
            for entry in entries {
                let entry = entry.map_err(|err| io_error("fs.list_dir", &path, err, span))?;
                names.push(Value::Str(entry.file_name().to_string_lossy().into_owned()));
            }
            Ok(Value::new_list(names, &mut interp.runtime.gc))
        }
        "is_dir" => {
            let [path] = expect_args::<1>("fs.is_dir", args, span)?;
            Ok(Value::Bool(Path::new(&as_str("fs.is_dir", &path, span)?).is_dir()))
        }
        "is_file" => {
            let [path] = expect_args::<1>("fs.is_file", args, span)?;
            Ok(Value::Bool(Path::new(&as_str("fs.is_file", &path, span)?).is_file()))
        }
        "mkdir" => {
            let [path] = expect_args::<1>("fs.mkdir", args, span)?;
            let path = as_str("fs.mkdir", &path, span)?;
            fs::create_dir_all(&path)
                .map(|()| Value::Null)
                .map_err(|err| io_error("fs.mkdir", &path, err, span))
        }
        other => Err(unknown_function(BuiltinModule::Fs, other, FUNCTIONS, span)),
    }
}

fn io_error(context: &str, path: &str, err: std::io::Error, span: Span) -> Box<RunError> {
    RunError::runtime(format!("{context}('{path}') failed: {err}")).with_span(span)
}
