//! Polyglot dispatch tests driven by scripted executors — no foreign
//! runtime is spawned.

use std::sync::Arc;

use naab::{
    interp::{BlockProvider, RegistryBlock},
    CollectSink, ErrorKind, Interp, InterpOptions, Language, ScriptedExecutor, WireValue,
};
use pretty_assertions::assert_eq;

fn interp_with(
    executors: Vec<Arc<ScriptedExecutor>>,
    options: InterpOptions,
) -> (Interp, std::rc::Rc<std::cell::RefCell<String>>) {
    let sink = CollectSink::new();
    let buffer = sink.buffer();
    let mut interp = Interp::with_sink(options, Box::new(sink));
    for executor in executors {
        interp
            .runtime
            .dispatcher
            .executors
            .register_shared(executor as Arc<dyn naab::Executor>);
    }
    (interp, buffer)
}

#[test]
fn polyglot_round_trip() {
    let python = Arc::new(ScriptedExecutor::new(
        Language::Python,
        vec![WireValue::Int(42)],
    ));
    let (mut interp, buffer) = interp_with(vec![Arc::clone(&python)], InterpOptions::default());
    interp
        .run_source(
            "main { let x = 21\nlet y = <<python[x] x * 2 >>\nprint(y) }",
            "test.naab",
        )
        .unwrap();
    assert_eq!(buffer.borrow().as_str(), "42\n");
    // The block received an integer binding ahead of its own source.
    let received = python.received();
    assert_eq!(received.len(), 1);
    assert!(received[0].starts_with("x = 21\n"), "{}", received[0]);
    assert!(received[0].contains("x * 2"), "{}", received[0]);
}

#[test]
fn bound_containers_inject_as_literals() {
    let python = Arc::new(ScriptedExecutor::new(
        Language::Python,
        vec![WireValue::Null],
    ));
    let (mut interp, _) = interp_with(vec![Arc::clone(&python)], InterpOptions::default());
    interp
        .run_source(
            "main {\n  let xs = [1, true, \"two\"]\n  let d = { \"k\": null }\n  <<python[xs, d] use_them(xs, d) >>\n}",
            "test.naab",
        )
        .unwrap();
    let received = python.received();
    assert!(
        received[0].contains("xs = [1, True, \"two\"]"),
        "{}",
        received[0]
    );
    assert!(received[0].contains("d = {\"k\": None}"), "{}", received[0]);
}

#[test]
fn captured_output_flushes_before_host_prints_continue() {
    let python = Arc::new(ScriptedExecutor::new(
        Language::Python,
        vec![WireValue::Int(1)],
    ));
    python.push_output("from the block\n");
    let (mut interp, buffer) = interp_with(vec![python], InterpOptions::default());
    interp
        .run_source(
            "main { print(\"before\")\nlet r = <<python 1 >>\nprint(\"after\") }",
            "test.naab",
        )
        .unwrap();
    assert_eq!(buffer.borrow().as_str(), "before\nfrom the block\nafter\n");
}

#[test]
fn executor_failure_surfaces_as_block_error_and_is_catchable() {
    // No executor registered at all: the dispatcher reports BlockError.
    let (mut interp, buffer) = interp_with(vec![], InterpOptions::default());
    let err = interp
        .run_source("main { let r = <<python 1 >> }", "test.naab")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BlockError);

    // And host execution resumes normally when caught.
    let (mut interp, buffer2) = interp_with(vec![], InterpOptions::default());
    interp
        .run_source(
            "main { try { let r = <<python 1 >> } catch(e) { print(\"caught\") }\nprint(\"done\") }",
            "test.naab",
        )
        .unwrap();
    assert_eq!(buffer2.borrow().as_str(), "caught\ndone\n");
    drop(buffer);
}

#[test]
fn registry_blocks_support_member_calls() {
    struct OneBlock;
    impl BlockProvider for OneBlock {
        fn lookup(&self, id: &str) -> Option<RegistryBlock> {
            (id == "fastjson").then(|| RegistryBlock {
                id: "fastjson".to_owned(),
                language: Language::Python,
                code: "import json".to_owned(),
                inputs: vec![],
                outputs: vec![],
                source_hint: None,
            })
        }
    }

    let python = Arc::new(ScriptedExecutor::new(
        Language::Python,
        vec![WireValue::Str("parsed".to_owned())],
    ));
    let (mut interp, buffer) = interp_with(vec![Arc::clone(&python)], InterpOptions::default());
    interp.set_block_provider(Box::new(OneBlock));
    interp
        .run_source(
            "use \"fastjson\" as fj\nmain { print(fj.loads(\"{}\")) }",
            "test.naab",
        )
        .unwrap();
    assert_eq!(buffer.borrow().as_str(), "parsed\n");
    assert_eq!(python.received(), vec!["call loads(\"{}\")".to_owned()]);
}

#[test]
fn unknown_registry_block_is_a_block_error() {
    let (mut interp, _) = interp_with(vec![], InterpOptions::default());
    let err = interp
        .run_source("use \"missing-block\" as mb\nmain { }", "test.naab")
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BlockError);
    assert!(err.message.contains("missing-block"), "{}", err.message);
}

#[test]
fn foreign_objects_support_chained_member_calls() {
    let python = Arc::new(ScriptedExecutor::new(
        Language::Python,
        vec![
            WireValue::Foreign {
                handle: 5,
                repr: "<connection>".to_owned(),
            },
            WireValue::Str("row".to_owned()),
        ],
    ));
    let (mut interp, buffer) = interp_with(vec![Arc::clone(&python)], InterpOptions::default());
    interp
        .run_source(
            "main {\n  let conn = <<python connect() >>\n  print(conn.fetch(1))\n}",
            "test.naab",
        )
        .unwrap();
    assert_eq!(buffer.borrow().as_str(), "row\n");
    let received = python.received();
    // The receiver handle travels as the first argument of the member call.
    assert_eq!(received[1], "call fetch(\"<connection>\", 1)");
}

#[test]
fn parallel_groups_preserve_observable_order() {
    let python = Arc::new(ScriptedExecutor::new(
        Language::Python,
        vec![WireValue::Int(10), WireValue::Int(30)],
    ));
    let js = Arc::new(ScriptedExecutor::new(
        Language::JavaScript,
        vec![WireValue::Int(20)],
    ));
    let options = InterpOptions {
        parallel_blocks: true,
        ..InterpOptions::default()
    };
    let (mut interp, buffer) = interp_with(vec![Arc::clone(&python), Arc::clone(&js)], options);
    // a and b are independent (one parallel group); c reads both and runs
    // in a later group.
    interp
        .run_source(
            "main {\n  let a = <<python 10 >>\n  let b = <<js 20 >>\n  let c = <<python[a, b] a + b >>\n  print(a + b + c)\n}",
            "test.naab",
        )
        .unwrap();
    assert_eq!(buffer.borrow().as_str(), "60\n");
    // The dependent block saw the bound results of the first group.
    let third = &python.received()[1];
    assert!(third.contains("a = 10"), "{third}");
    assert!(third.contains("b = 20"), "{third}");
}

#[test]
fn sequential_fallback_matches_parallel_results() {
    let make_python = || {
        Arc::new(ScriptedExecutor::new(
            Language::Python,
            vec![WireValue::Int(10), WireValue::Int(30)],
        ))
    };
    let make_js = || {
        Arc::new(ScriptedExecutor::new(
            Language::JavaScript,
            vec![WireValue::Int(20)],
        ))
    };
    let source = "main {\n  let a = <<python 10 >>\n  let b = <<js 20 >>\n  let c = <<python[a, b] a + b >>\n  print(a + b + c)\n}";

    let (mut sequential, seq_buffer) = interp_with(
        vec![make_python(), make_js()],
        InterpOptions::default(),
    );
    sequential.run_source(source, "test.naab").unwrap();

    let (mut parallel, par_buffer) = interp_with(
        vec![make_python(), make_js()],
        InterpOptions {
            parallel_blocks: true,
            ..InterpOptions::default()
        },
    );
    parallel.run_source(source, "test.naab").unwrap();

    assert_eq!(seq_buffer.borrow().as_str(), par_buffer.borrow().as_str());
}
