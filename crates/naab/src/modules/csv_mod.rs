//! The `csv` module: a small RFC-4180-ish reader and writer. Quoted fields
//! may contain separators, doubled quotes, and newlines.

use indexmap::IndexMap;

use crate::{
    errors::{RunError, RunResult},
    interp::Interp,
    token::Span,
    value::Value,
};

use super::{as_list, as_str, expect_args, unknown_function, BuiltinModule};

const FUNCTIONS: &[&str] = &["parse", "parse_with_headers", "stringify"];

pub(crate) fn call(
    interp: &mut Interp,
    function: &str,
    args: Vec<Value>,
    span: Span,
) -> RunResult<Value> {
    match function {
        "parse" => {
            let [text] = expect_args::<1>("csv.parse", args, span)?;
            let rows = parse_rows(&as_str("csv.parse", &text, span)?);
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                let cells = row.into_iter().map(Value::Str).collect();
                out.push(Value::new_list(cells, &mut interp.runtime.gc));
            }
            Ok(Value::new_list(out, &mut interp.runtime.gc))
        }
        "parse_with_headers" => {
            let [text] = expect_args::<1>("csv.parse_with_headers", args, span)?;
            let mut rows = parse_rows(&as_str("csv.parse_with_headers", &text, span)?).into_iter();
            let Some(headers) = rows.next() else {
                return Ok(Value::new_list(Vec::new(), &mut interp.runtime.gc));
            };
            let mut out = Vec::new();
            for row in rows {
                let mut record = IndexMap::new();
                for (header, cell) in headers.iter().zip(row) {
                    record.insert(header.clone(), Value::Str(cell));
                }
                out.push(Value::new_dict(record, &mut interp.runtime.gc));
            }
            Ok(Value::new_list(out, &mut interp.runtime.gc))
        }
        "stringify" => {
            let [rows] = expect_args::<1>("csv.stringify", args, span)?;
            let rows = as_list("csv.stringify", &rows, span)?;
            let mut out = String::new();
            for row in rows.borrow().iter() {
                let Value::List(cells) = row else {
                    return Err(RunError::type_error(
                        "csv.stringify() expects a list of row lists",
                    )
                    .with_span(span));
                };
                let line = cells
                    .borrow()
                    .iter()
                    .map(|cell| quote_cell(&cell.to_display_string()))
                    .collect::<Vec<_>>()
                    .join(",");
                out.push_str(&line);
                out.push('\n');
            }
            Ok(Value::Str(out))
        }
        other => Err(unknown_function(BuiltinModule::Csv, other, FUNCTIONS, span)),
    }
}

fn parse_rows(text: &str) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();
    let mut saw_any = false;

    while let Some(c) = chars.next() {
        saw_any = true;
        if in_quotes {
            match c {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        chars.next();
                        cell.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                other => cell.push(other),
            }
            continue;
        }
        match c {
            '"' => in_quotes = true,
            ',' => {
                row.push(std::mem::take(&mut cell));
            }
            '\r' => {}
            '\n' => {
                row.push(std::mem::take(&mut cell));
                rows.push(std::mem::take(&mut row));
            }
            other => cell.push(other),
        }
    }
    if saw_any && (!cell.is_empty() || !row.is_empty()) {
        row.push(cell);
        rows.push(row);
    }
    rows
}

fn quote_cell(cell: &str) -> String {
    if cell.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", cell.replace('"', "\"\""))
    } else {
        cell.to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_quoted_fields() {
        let rows = parse_rows("a,\"b,c\",d\n\"x\"\"y\",z\n");
        assert_eq!(
            rows,
            vec![
                vec!["a".to_owned(), "b,c".to_owned(), "d".to_owned()],
                vec!["x\"y".to_owned(), "z".to_owned()],
            ]
        );
    }

    #[test]
    fn quoting_round_trips() {
        assert_eq!(quote_cell("plain"), "plain");
        assert_eq!(quote_cell("a,b"), "\"a,b\"");
        assert_eq!(quote_cell("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
