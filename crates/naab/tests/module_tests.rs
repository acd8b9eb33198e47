//! Module loading: both import forms, execute-once semantics, export
//! enforcement, and cycle reporting.

use std::{fs, path::PathBuf};

use naab::{CollectSink, ErrorKind, Interp, InterpOptions, RunError};
use pretty_assertions::assert_eq;

struct TempTree {
    root: PathBuf,
}

impl TempTree {
    fn new(name: &str) -> Self {
        let root = std::env::temp_dir().join(format!(
            "naab-modtest-{name}-{}",
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&root);
        fs::create_dir_all(&root).unwrap();
        Self { root }
    }

    fn write(&self, rel: &str, contents: &str) -> PathBuf {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(&path, contents).unwrap();
        path
    }
}

impl Drop for TempTree {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn run_file(path: &PathBuf) -> (Result<(), Box<RunError>>, String) {
    let sink = CollectSink::new();
    let buffer = sink.buffer();
    let mut interp = Interp::with_sink(InterpOptions::default(), Box::new(sink));
    let result = interp.run_file(path);
    let output = buffer.borrow().clone();
    (result, output)
}

#[test]
fn use_binds_module_under_its_basename() {
    let tree = TempTree::new("use-basename");
    tree.write(
        "lib/mathx.naab",
        "export fn triple(n: int) -> int { return n * 3 }",
    );
    let main = tree.write("app.naab", "use lib.mathx\nmain { print(mathx.triple(14)) }");
    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "42\n");
}

#[test]
fn use_alias() {
    let tree = TempTree::new("use-alias");
    tree.write("helpers.naab", "export fn one() -> int { return 1 }");
    let main = tree.write("app.naab", "use helpers as h\nmain { print(h.one()) }");
    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "1\n");
}

#[test]
fn named_imports_copy_symbols() {
    let tree = TempTree::new("named-imports");
    tree.write(
        "util.naab",
        "export fn double(n: int) -> int { return n * 2 }\nexport fn halve(n: int) -> float { return n / 2 }",
    );
    let main = tree.write(
        "app.naab",
        "import { double, halve as h } from \"util\"\nmain { print(double(21))\nprint(h(8)) }",
    );
    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "42\n4.0\n");
}

#[test]
fn wildcard_import_binds_a_namespace() {
    let tree = TempTree::new("wildcard");
    tree.write("util.naab", "export fn id(x: any) -> any { return x }");
    let main = tree.write(
        "app.naab",
        "import * as util from \"util\"\nmain { print(util.id(\"ok\")) }",
    );
    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "ok\n");
}

#[test]
fn modules_execute_exactly_once() {
    let tree = TempTree::new("exec-once");
    tree.write(
        "loud.naab",
        "print(\"loaded\")\nexport fn ping() -> string { return \"pong\" }",
    );
    // Imported twice through two different forms; side effects run once.
    let main = tree.write(
        "app.naab",
        "use loud\nimport { ping } from \"loud\"\nmain { print(ping()) }",
    );
    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "loaded\npong\n");
}

#[test]
fn import_cycle_is_fatal_and_names_the_chain() {
    let tree = TempTree::new("cycle");
    tree.write("a.naab", "use b\nexport fn fa() -> int { return 1 }");
    tree.write("b.naab", "use a\nexport fn fb() -> int { return 2 }");
    let main = tree.write("app.naab", "use a\nmain { print(fa()) }");
    let (result, _) = run_file(&main);
    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ImportError);
    assert!(err.message.contains("import cycle"), "{}", err.message);
    assert!(err.message.contains("a -> b -> a"), "{}", err.message);
}

#[test]
fn explicit_exports_gate_named_imports() {
    let tree = TempTree::new("export-gate");
    tree.write(
        "secret.naab",
        "export fn public_fn() -> int { return 1 }\nfn private_fn() -> int { return 2 }",
    );
    let main = tree.write(
        "app.naab",
        "import { private_fn } from \"secret\"\nmain { print(private_fn()) }",
    );
    let (result, _) = run_file(&main);
    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ImportError);
    assert!(err.message.contains("does not export"), "{}", err.message);
}

#[test]
fn missing_module_is_an_import_error() {
    let tree = TempTree::new("missing");
    let main = tree.write("app.naab", "use nowhere\nmain { }");
    let (result, _) = run_file(&main);
    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ImportError);
    assert!(err.message.contains("nowhere"), "{}", err.message);
}

#[test]
fn parse_error_in_dependency_reports_import_error() {
    let tree = TempTree::new("dep-parse");
    tree.write("broken.naab", "fn { nope");
    let main = tree.write("app.naab", "use broken\nmain { }");
    let (result, _) = run_file(&main);
    let err = result.unwrap_err();
    assert_eq!(err.kind, ErrorKind::ImportError);
}

#[test]
fn module_functions_see_their_own_module_imports() {
    let tree = TempTree::new("lexical-modules");
    tree.write(
        "shout.naab",
        "use string\nexport fn shout(s: string) -> string { return string.upper(s) }",
    );
    let main = tree.write(
        "app.naab",
        "import { shout } from \"shout\"\nmain { print(shout(\"quiet\")) }",
    );
    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "QUIET\n");
}

#[test]
fn export_default_is_stored() {
    let tree = TempTree::new("default-export");
    tree.write(
        "config.naab",
        "export let retries = 3\nexport default \"primary\"",
    );
    let main = tree.write(
        "app.naab",
        "use config\nmain { print(config.retries) }",
    );
    let (result, output) = run_file(&main);
    result.unwrap();
    assert_eq!(output, "3\n");
}
