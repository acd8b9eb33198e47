//! End-to-end interpreter tests: whole programs in, observed stdout and
//! error taxonomy out.

use naab::{CollectSink, ErrorKind, Interp, InterpOptions, RunError};
use pretty_assertions::assert_eq;

fn run_with(options: InterpOptions, source: &str) -> (Result<(), Box<RunError>>, String) {
    let sink = CollectSink::new();
    let buffer = sink.buffer();
    let mut interp = Interp::with_sink(options, Box::new(sink));
    let result = interp.run_source(source, "test.naab");
    let output = buffer.borrow().clone();
    (result, output)
}

fn run(source: &str) -> (Result<(), Box<RunError>>, String) {
    run_with(InterpOptions::default(), source)
}

fn run_ok(source: &str) -> String {
    let (result, output) = run(source);
    if let Err(err) = result {
        panic!("program failed: {}\noutput so far: {output}", err.render(None));
    }
    output
}

fn run_err(source: &str) -> Box<RunError> {
    let (result, output) = run(source);
    match result {
        Ok(()) => panic!("program unexpectedly succeeded, output: {output}"),
        Err(err) => err,
    }
}

#[test]
fn hello() {
    assert_eq!(run_ok("main { print(\"Hello, NAAb!\") }"), "Hello, NAAb!\n");
}

#[test]
fn generic_struct_registers_specialization() {
    let sink = CollectSink::new();
    let buffer = sink.buffer();
    let mut interp = Interp::with_sink(InterpOptions::default(), Box::new(sink));
    interp
        .run_source(
            "struct Box<T> { value: T }\nmain { let a = new Box<int> { value: 7 }\nprint(a.value) }",
            "test.naab",
        )
        .unwrap();
    assert_eq!(buffer.borrow().as_str(), "7\n");
    assert!(interp.runtime.structs.contains("Box_int"));
}

#[test]
fn same_specialization_is_shared() {
    let sink = CollectSink::new();
    let mut interp = Interp::with_sink(InterpOptions::default(), Box::new(sink));
    interp
        .run_source(
            "struct Box<T> { value: T }\nmain {\n  let a = new Box<int> { value: 42 }\n  let b = new Box<int> { value: 7 }\n  print(a.value + b.value)\n}",
            "test.naab",
        )
        .unwrap();
    // One base definition plus exactly one `Box_int` specialization.
    let names: Vec<&str> = interp.runtime.structs.names().collect();
    assert_eq!(names.iter().filter(|n| n.starts_with("Box_")).count(), 1);
}

#[test]
fn pipeline() {
    let source = "fn inc(n: int) -> int { return n + 1 }\nfn dbl(n: int) -> int { return n * 2 }\nmain { print(5 |> inc |> dbl) }";
    assert_eq!(run_ok(source), "12\n");
}

#[test]
fn try_catch_finally_ordering() {
    let source =
        "main { try { throw \"a\" } catch(e) { print(\"c:\" + e) } finally { print(\"f\") } }";
    assert_eq!(run_ok(source), "c:a\nf\n");
}

#[test]
fn finally_runs_on_success_too() {
    let source = "main { try { print(\"t\") } catch(e) { print(\"c\") } finally { print(\"f\") } }";
    assert_eq!(run_ok(source), "t\nf\n");
}

#[test]
fn finally_error_supersedes() {
    let err = run_err(
        "main { try { throw \"first\" } catch(e) { throw \"second\" } finally { throw \"third\" } }",
    );
    assert_eq!(err.message, "third");
}

#[test]
fn catch_binds_the_thrown_payload_structurally() {
    let source = "main {\n  try { throw [1, 2, 3] } catch(e) { print(e[1]) }\n}";
    assert_eq!(run_ok(source), "2\n");
}

#[test]
fn gc_collects_exactly_one_dropped_cycle() {
    let source = "use array\nmain {\n  let a = []\n  array.push(a, a)\n  a = 0\n  print(gc_collect())\n}";
    assert_eq!(run_ok(source), "1\n");
}

#[test]
fn gc_keeps_reachable_cycles() {
    let source = "use array\nmain {\n  let a = []\n  array.push(a, a)\n  print(gc_collect())\n}";
    assert_eq!(run_ok(source), "0\n");
}

// --- Boundary behaviors --------------------------------------------------

#[test]
fn let_null_without_annotation_is_an_error() {
    let err = run_err("main { let x = null }");
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert!(err.message.contains("null"));
}

#[test]
fn null_does_not_match_non_nullable() {
    let err = run_err("main { let x: int = null }");
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn null_matches_nullable() {
    assert_eq!(run_ok("main { let x: int? = null\nprint(x) }"), "null\n");
}

#[test]
fn list_index_out_of_bounds() {
    let err = run_err("main { let arr = [1, 2, 3]\nlet v = arr[len(arr)] }");
    assert_eq!(err.kind, ErrorKind::RuntimeError);
    assert!(err.message.contains("out of bounds"), "{}", err.message);
}

#[test]
fn missing_dict_key_is_echoed() {
    let err = run_err("main { let d = { \"a\": 1 }\nlet v = d[\"missing\"] }");
    assert_eq!(err.kind, ErrorKind::RuntimeError);
    assert!(err.message.contains("'missing'"), "{}", err.message);
}

// --- Semantics -----------------------------------------------------------

#[test]
fn equality_is_string_form() {
    assert_eq!(run_ok("main { print(1 == \"1\") }"), "true\n");
    assert_eq!(run_ok("main { print(1 == 1.0) }"), "false\n");
}

#[test]
fn division_is_always_float() {
    assert_eq!(run_ok("main { print(4 / 2) }"), "2.0\n");
}

#[test]
fn arithmetic_widening() {
    assert_eq!(run_ok("main { print(1 + 2) }"), "3\n");
    assert_eq!(run_ok("main { print(1 + 2.5) }"), "3.5\n");
    assert_eq!(run_ok("main { print(\"n=\" + 3) }"), "n=3\n");
}

#[test]
fn list_add_builds_a_fresh_list() {
    let source = "use array\nmain {\n  let a = [1]\n  let b = [2]\n  let c = a + b\n  array.push(a, 99)\n  print(c)\n}";
    assert_eq!(run_ok(source), "[1, 2]\n");
}

#[test]
fn ranges_and_loops() {
    assert_eq!(
        run_ok("main { let total = 0\nfor i in 1..4 { total = total + i }\nprint(total) }"),
        "6\n"
    );
    assert_eq!(
        run_ok("main { let total = 0\nfor i in 1..=4 { total = total + i }\nprint(total) }"),
        "10\n"
    );
}

#[test]
fn break_and_continue() {
    let source = "main {\n  let sum = 0\n  for i in 0..10 {\n    if i == 3 { continue }\n    if i == 6 { break }\n    sum = sum + i\n  }\n  print(sum)\n}";
    // 0+1+2+4+5
    assert_eq!(run_ok(source), "12\n");
}

#[test]
fn control_flow_state_does_not_leak_from_calls() {
    let source = "fn f() -> int { return 1 }\nmain {\n  let total = 0\n  for i in 0..3 {\n    total = total + f()\n  }\n  print(total)\n}";
    assert_eq!(run_ok(source), "3\n");
}

#[test]
fn while_loop() {
    let source = "main { let n = 0\nwhile n < 5 { n = n + 1 }\nprint(n) }";
    assert_eq!(run_ok(source), "5\n");
}

#[test]
fn recursion() {
    let source = "fn fib(n: int) -> int { if n < 2 { return n } return fib(n - 1) + fib(n - 2) }\nmain { print(fib(10)) }";
    assert_eq!(run_ok(source), "55\n");
}

#[test]
fn runaway_recursion_is_a_runtime_error() {
    let err = run_err("fn f() { f() }\nmain { f() }");
    assert_eq!(err.kind, ErrorKind::RuntimeError);
    assert!(err.message.contains("call depth"), "{}", err.message);
}

#[test]
fn closures_capture_their_module_scope() {
    let source = "let base = 10\nfn add_base(n: int) -> int { return n + base }\nmain { print(add_base(5)) }";
    assert_eq!(run_ok(source), "15\n");
}

#[test]
fn value_parameters_are_deep_copied() {
    let source = "use array\nfn grow(xs: list<int>) { array.push(xs, 99) }\nmain {\n  let xs = [1]\n  grow(xs)\n  print(xs)\n}";
    assert_eq!(run_ok(source), "[1]\n");
}

#[test]
fn reference_parameters_alias_the_caller() {
    let source = "use array\nfn grow(ref xs: list<int>) { array.push(xs, 99) }\nmain {\n  let xs = [1]\n  grow(xs)\n  print(xs)\n}";
    assert_eq!(run_ok(source), "[1, 99]\n");
}

#[test]
fn reference_scalars_write_back() {
    let source = "fn bump(ref n: int) { n = n + 1 }\nmain { let n = 41\nbump(n)\nprint(n) }";
    assert_eq!(run_ok(source), "42\n");
}

#[test]
fn defaults_evaluate_in_the_callee() {
    let source = "fn greet(name: string, greeting: string = \"hello\") -> string { return greeting + \" \" + name }\nmain { print(greet(\"naab\")) }";
    assert_eq!(run_ok(source), "hello naab\n");
}

#[test]
fn generic_function_call_is_type_checked_after_unification() {
    let source = "fn first<T>(xs: list<T>) -> T { return xs[0] }\nmain { print(first([7, 8])) }";
    assert_eq!(run_ok(source), "7\n");
}

#[test]
fn argument_type_mismatch() {
    let err = run_err("fn f(n: int) -> int { return n }\nmain { f(\"nope\") }");
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert!(err.message.contains("expected int"), "{}", err.message);
}

#[test]
fn return_type_mismatch() {
    let err = run_err("fn f() -> int { return \"nope\" }\nmain { f() }");
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn union_types_accept_any_alternative() {
    let source = "fn show(v: int | string) -> string { return \"\" + v }\nmain { print(show(1))\nprint(show(\"x\")) }";
    assert_eq!(run_ok(source), "1\nx\n");
}

#[test]
fn enums_resolve_through_member_syntax() {
    let source = "enum Color { Red, Green, Blue }\nmain { let c = Color.Green\nprint(c)\nprint(type(c)) }";
    assert_eq!(run_ok(source), "Color.Green\nColor\n");
}

#[test]
fn unknown_enum_member_suggests() {
    let err = run_err("enum Color { Red, Green }\nmain { let c = Color.Geen }");
    assert_eq!(err.kind, ErrorKind::ReferenceError);
    assert!(err.message.contains("did you mean 'Green'"), "{}", err.message);
}

#[test]
fn struct_field_assignment_is_type_checked() {
    let source = "struct P { x: int }\nmain { let p = new P { x: 1 }\np.x = \"no\" }";
    let err = run_err(source);
    assert_eq!(err.kind, ErrorKind::TypeError);
}

#[test]
fn unknown_struct_field_suggests() {
    let source = "struct P { count: int }\nmain { let p = new P { count: 1 }\nprint(p.cout) }";
    let err = run_err(source);
    assert!(err.message.contains("did you mean 'count'"), "{}", err.message);
}

#[test]
fn static_struct_cycles_are_rejected() {
    let err = run_err("struct A { x: A }\nmain { }");
    assert_eq!(err.kind, ErrorKind::TypeError);
    assert!(err.message.contains("contains itself"), "{}", err.message);
}

#[test]
fn nullable_struct_cycles_are_fine() {
    let source = "struct Node { next: Node? }\nmain { let n = new Node { next: null }\nprint(n.next) }";
    assert_eq!(run_ok(source), "null\n");
}

#[test]
fn undefined_variable_suggests() {
    let err = run_err("main { let counter = 1\nprint(countre) }");
    assert_eq!(err.kind, ErrorKind::ReferenceError);
    assert!(err.message.contains("did you mean 'counter'"), "{}", err.message);
}

#[test]
fn uncaught_throw_carries_a_stack_trace() {
    let source = "fn inner() { throw \"boom\" }\nfn outer() { inner() }\nmain { outer() }";
    let err = run_err(source);
    assert_eq!(err.kind, ErrorKind::Generic);
    let rendered = err.render(None);
    assert!(rendered.starts_with("Error: boom"), "{rendered}");
    assert!(rendered.contains("  at inner (test.naab:"), "{rendered}");
    assert!(rendered.contains("  at outer (test.naab:"), "{rendered}");
}

#[test]
fn dict_member_access_reads_string_keys() {
    let source = "main { let d = { \"host\": \"localhost\", \"port\": 8080 }\nprint(d.host + \":\" + d.port) }";
    assert_eq!(run_ok(source), "localhost:8080\n");
}

#[test]
fn subscript_assignment() {
    let source = "main {\n  let xs = [1, 2, 3]\n  xs[1] = 20\n  let d = { \"a\": 1 }\n  d[\"b\"] = 2\n  print(xs)\n  print(d)\n}";
    assert_eq!(run_ok(source), "[1, 20, 3]\n{\"a\": 1, \"b\": 2}\n");
}

#[test]
fn assert_builtin_raises_assertion_error() {
    let err = run_err("main { assert(1 == 2, \"math is broken\") }");
    assert_eq!(err.kind, ErrorKind::AssertionError);
    assert_eq!(err.message, "math is broken");
}

// --- Stdlib module host --------------------------------------------------

#[test]
fn io_write_is_primary_and_print_coexists() {
    let source = "use io\nmain { io.write(\"a\")\nio.writeln(\"b\")\nprint(\"c\") }";
    assert_eq!(run_ok(source), "ab\nc\n");
}

#[test]
fn string_module() {
    let source = "use string\nmain { print(string.upper(\"naab\"))\nprint(string.split(\"a,b\", \",\")) }";
    assert_eq!(run_ok(source), "NAAB\n[\"a\", \"b\"]\n");
}

#[test]
fn array_higher_order_functions_call_host_functions() {
    let source = "use array\nfn double(n: int) -> int { return n * 2 }\nfn is_even(n: int) -> bool { return n % 2 == 0 }\nfn add(a: int, b: int) -> int { return a + b }\nmain {\n  let xs = [1, 2, 3, 4]\n  print(array.map_fn(xs, double))\n  print(array.filter_fn(xs, is_even))\n  print(array.reduce_fn(xs, add, 0))\n}";
    assert_eq!(run_ok(source), "[2, 4, 6, 8]\n[2, 4]\n10\n");
}

#[test]
fn json_round_trip() {
    let source = "use json\nmain {\n  let v = json.parse(\"{\\\"a\\\": [1, 2]}\")\n  print(v.a)\n  print(json.stringify(v))\n}";
    assert_eq!(run_ok(source), "[1, 2]\n{\"a\":[1,2]}\n");
}

#[test]
fn collections_module() {
    let source = "use collections\nmain {\n  let d = { \"a\": 1, \"b\": 2 }\n  print(collections.keys(d))\n  print(collections.has_key(d, \"a\"))\n}";
    assert_eq!(run_ok(source), "[\"a\", \"b\"]\ntrue\n");
}

#[test]
fn csv_module() {
    let source = "use csv\nmain {\n  let rows = csv.parse(\"a,b\\n1,2\\n\")\n  print(rows[1][0])\n}";
    assert_eq!(run_ok(source), "1\n");
}

#[test]
fn debug_module_reports_gc_stats() {
    let source = "use debug\nmain { let s = debug.gc_stats()\nprint(s.total_collected) }";
    assert_eq!(run_ok(source), "0\n");
}

#[test]
fn env_get_args_exposes_script_arguments() {
    let options = InterpOptions {
        script_args: vec!["alpha".to_owned(), "beta".to_owned()],
        ..InterpOptions::default()
    };
    let (result, output) = run_with(
        options,
        "use env\nmain { print(env.get_args()) }",
    );
    result.unwrap();
    assert_eq!(output, "[\"alpha\", \"beta\"]\n");
}

#[test]
fn unknown_stdlib_function_suggests() {
    let err = run_err("use string\nmain { string.uper(\"x\") }");
    assert_eq!(err.kind, ErrorKind::ReferenceError);
    assert!(err.message.contains("did you mean 'upper'"), "{}", err.message);
}

#[test]
fn automatic_collection_triggers_at_threshold() {
    let options = InterpOptions {
        gc_threshold: 50,
        ..InterpOptions::default()
    };
    // Builds and drops cyclic garbage in a loop; the threshold forces
    // collections along the way without touching live data.
    let source = "use array\nmain {\n  let keep = [1, 2, 3]\n  for i in 0..100 {\n    let junk = []\n    array.push(junk, junk)\n    junk = 0\n  }\n  print(keep)\n}";
    let (result, output) = run_with(options, source);
    result.unwrap();
    assert_eq!(output, "[1, 2, 3]\n");
}
