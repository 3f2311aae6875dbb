//! Engine op semantics over the scripted evaluator.

mod common;

use jank_engine::runtime::testing::assert_equal;
use jank_engine::runtime::value::{
    make_host_fn, make_int, make_keyword, make_map, make_string, make_vector, nil,
};
use jank_nrepl::bencode::{Dict, Value};
use jank_nrepl::{Engine, Message, DEFAULT_MIDDLEWARE_STACK};

use common::scripted_context;

fn engine() -> Engine {
    Engine::new(scripted_context())
}

fn make_message(fields: &[(&str, &str)]) -> Message {
    let mut dict = Dict::new();
    for (key, value) in fields {
        dict.insert(key.to_string(), Value::Str(value.to_string()));
    }
    Message::new(dict)
}

fn statuses(payload: &Dict) -> Vec<String> {
    payload
        .get("status")
        .and_then(Value::as_list)
        .map(|list| {
            list.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn get_str<'a>(payload: &'a Dict, key: &str) -> &'a str {
    payload.get(key).and_then(Value::as_str).unwrap_or("")
}

// ── describe / sessions ──────────────────────────────────────────────────

#[test]
fn test_describe_advertises_ops() {
    let mut eng = engine();
    let responses = eng.handle(&make_message(&[("op", "describe"), ("id", "1")]));
    assert_eq!(responses.len(), 1);
    let ops = responses[0].get("ops").and_then(Value::as_dict).unwrap();
    for op in [
        "clone",
        "describe",
        "ls-sessions",
        "close",
        "eval",
        "load-file",
        "completions",
        "complete",
        "lookup",
        "info",
        "eldoc",
        "forward-system-output",
        "interrupt",
        "ls-middleware",
        "add-middleware",
        "swap-middleware",
        "stdin",
        "caught",
        "analyze-last-stacktrace",
        "test",
    ] {
        assert!(ops.contains_key(op), "missing op {}", op);
    }
    let versions = responses[0].get("versions").and_then(Value::as_dict).unwrap();
    assert!(versions.contains_key("jank"));
}

#[test]
fn test_clone_creates_fresh_session() {
    let mut eng = engine();
    let responses = eng.handle(&make_message(&[("op", "clone")]));
    assert_eq!(responses.len(), 1);
    let payload = &responses[0];
    let session = get_str(payload, "session");
    assert!(!session.is_empty());
    assert_eq!(session, get_str(payload, "new-session"));
    assert!(statuses(payload).contains(&"done".to_string()));
}

#[test]
fn test_clone_inherits_namespace_at_clone_time() {
    let mut eng = engine();
    let parent = get_str(&eng.handle(&make_message(&[("op", "clone")]))[0], "session").to_string();
    eng.handle(&make_message(&[
        ("op", "eval"),
        ("session", &parent),
        ("code", "(in-ns 'demo.core)"),
    ]));

    let child = get_str(
        &eng.handle(&make_message(&[("op", "clone"), ("session", &parent)]))[0],
        "session",
    )
    .to_string();

    // Child starts in the parent's namespace.
    let child_eval = eng.handle(&make_message(&[
        ("op", "eval"),
        ("session", &child),
        ("code", "7"),
    ]));
    assert_eq!(get_str(&child_eval[0], "ns"), "demo.core");

    // Subsequent changes to the child do not leak back.
    eng.handle(&make_message(&[
        ("op", "eval"),
        ("session", &child),
        ("code", "(in-ns 'other.ns)"),
    ]));
    let parent_eval = eng.handle(&make_message(&[
        ("op", "eval"),
        ("session", &parent),
        ("code", "7"),
    ]));
    assert_eq!(get_str(&parent_eval[0], "ns"), "demo.core");
}

#[test]
fn test_ls_sessions_sorted_and_close() {
    let mut eng = engine();
    let a = get_str(&eng.handle(&make_message(&[("op", "clone")]))[0], "session").to_string();
    let b = get_str(&eng.handle(&make_message(&[("op", "clone")]))[0], "session").to_string();

    let responses = eng.handle(&make_message(&[("op", "ls-sessions")]));
    let sessions: Vec<&str> = responses[0]
        .get("sessions")
        .and_then(Value::as_list)
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(sessions.contains(&a.as_str()));
    assert!(sessions.contains(&b.as_str()));
    let mut sorted = sessions.clone();
    sorted.sort();
    assert_eq!(sessions, sorted);

    let closed = eng.handle(&make_message(&[("op", "close"), ("session", &a)]));
    assert_eq!(statuses(&closed[0]), vec!["done"]);

    // Closing again reports the error without resurrecting the session.
    let again = eng.handle(&make_message(&[("op", "close"), ("session", &a)]));
    assert!(statuses(&again[0]).contains(&"error".to_string()));
}

// ── eval ─────────────────────────────────────────────────────────────────

#[test]
fn test_eval_returns_value_and_done() {
    let mut eng = engine();
    let responses = eng.handle(&make_message(&[
        ("op", "eval"),
        ("id", "10"),
        ("code", "(+ 1 2)"),
    ]));
    assert_eq!(responses.len(), 2);

    let value_payload = &responses[0];
    assert_eq!(get_str(value_payload, "value"), "3");
    assert_eq!(get_str(value_payload, "ns"), "user");
    assert_eq!(get_str(value_payload, "id"), "10");
    assert!(!get_str(value_payload, "session").is_empty());

    assert_eq!(statuses(&responses[1]), vec!["done"]);
}

#[test]
fn test_eval_stdout_ordering() {
    let mut eng = engine();
    let responses = eng.handle(&make_message(&[
        ("op", "eval"),
        ("id", "7"),
        ("code", "(do (println \"a\") (println \"b\") 42)"),
    ]));
    assert_eq!(responses.len(), 3);

    // out strictly before value, value before done.
    assert_eq!(get_str(&responses[0], "out"), "a\nb\n");
    assert_eq!(get_str(&responses[1], "value"), "42");
    let final_statuses = statuses(&responses[2]);
    assert!(final_statuses.contains(&"done".to_string()));
    assert!(!final_statuses.contains(&"error".to_string()));

    // All addressed to the same request and session.
    let session = get_str(&responses[0], "session");
    for payload in &responses {
        assert_eq!(get_str(payload, "id"), "7");
        assert_eq!(get_str(payload, "session"), session);
    }
}

#[test]
fn test_eval_def_updates_runtime() {
    let mut eng = engine();
    let responses = eng.handle(&make_message(&[("op", "eval"), ("code", "(def x (+ 1 2))")]));
    assert_eq!(get_str(&responses[0], "value"), "#'user/x");

    let ctx = eng.context().clone();
    assert_eq!(
        ctx.find_var("user", "x").unwrap().deref().as_integer(),
        Some(3)
    );
}

#[test]
fn test_eval_missing_code_unsupported() {
    let mut eng = engine();
    let responses = eng.handle(&make_message(&[("op", "eval")]));
    assert!(statuses(&responses[0]).contains(&"error".to_string()));
}

#[test]
fn test_eval_error_and_caught() {
    let mut eng = engine();
    let session =
        get_str(&eng.handle(&make_message(&[("op", "clone")]))[0], "session").to_string();

    // Before any failure: no-error.
    let clean = eng.handle(&make_message(&[("op", "caught"), ("session", &session)]));
    assert!(statuses(&clean[0]).contains(&"no-error".to_string()));

    let responses = eng.handle(&make_message(&[
        ("op", "eval"),
        ("session", &session),
        ("code", "(fail)"),
    ]));
    assert_eq!(responses.len(), 2);
    assert!(get_str(&responses[0], "err").contains("deliberate failure"));
    let final_statuses = statuses(&responses[1]);
    assert!(final_statuses.contains(&"done".to_string()));
    assert!(final_statuses.contains(&"error".to_string()));

    let caught = eng.handle(&make_message(&[("op", "caught"), ("session", &session)]));
    assert!(get_str(&caught[0], "err").contains("deliberate failure"));
    assert!(!get_str(&caught[0], "exception-type").is_empty());

    let analysis = eng.handle(&make_message(&[
        ("op", "analyze-last-stacktrace"),
        ("session", &session),
    ]));
    assert!(analysis.len() >= 2);
    assert!(get_str(&analysis[0], "message").contains("deliberate failure"));
    assert_eq!(get_str(&analysis[0], "type"), "jank");
    assert!(statuses(analysis.last().unwrap()).contains(&"done".to_string()));
}

#[test]
fn test_eval_thrown_value() {
    let mut eng = engine();
    let responses = eng.handle(&make_message(&[("op", "eval"), ("code", "(throw \"boom\")")]));
    assert_eq!(get_str(&responses[0], "err"), "\"boom\"");
    assert!(statuses(&responses[1]).contains(&"error".to_string()));
}

#[test]
fn test_eval_fatal_error_recovers() {
    let mut eng = engine();
    let responses = eng.handle(&make_message(&[("op", "eval"), ("code", "(fatal)")]));
    assert_eq!(responses.len(), 2);
    assert!(get_str(&responses[0], "err").contains("signal 99"));
    assert!(statuses(&responses[1]).contains(&"error".to_string()));

    // The engine survives and keeps serving.
    let next = eng.handle(&make_message(&[("op", "eval"), ("code", "5")]));
    assert_eq!(get_str(&next[0], "value"), "5");
}

#[test]
fn test_load_file_omits_ns() {
    let mut eng = engine();
    let responses = eng.handle(&make_message(&[("op", "load-file"), ("file", "(+ 4 5)")]));
    assert_eq!(responses.len(), 2);
    assert!(!responses[0].contains_key("ns"));
    assert_eq!(get_str(&responses[0], "value"), "9");
    assert_eq!(statuses(&responses[1]), vec!["done"]);
}

// ── interrupt / stdin / middleware ───────────────────────────────────────

#[test]
fn test_interrupt_idle_session() {
    let mut eng = engine();
    let session =
        get_str(&eng.handle(&make_message(&[("op", "clone")]))[0], "session").to_string();
    let responses = eng.handle(&make_message(&[
        ("op", "interrupt"),
        ("session", &session),
        ("interrupt-id", "req-42"),
    ]));
    let s = statuses(&responses[0]);
    assert!(s.contains(&"session-idle".to_string()));
    assert!(s.contains(&"done".to_string()));
    assert_eq!(get_str(&responses[0], "interrupt-id"), "req-42");
}

#[test]
fn test_interrupt_missing_id_unsupported() {
    let mut eng = engine();
    let responses = eng.handle(&make_message(&[("op", "interrupt")]));
    assert!(statuses(&responses[0]).contains(&"error".to_string()));
}

#[test]
fn test_stdin_accumulates() {
    let mut eng = engine();
    let session =
        get_str(&eng.handle(&make_message(&[("op", "clone")]))[0], "session").to_string();

    let first = eng.handle(&make_message(&[
        ("op", "stdin"),
        ("session", &session),
        ("stdin", "abc"),
    ]));
    assert_eq!(get_str(&first[0], "stdin"), "abc");
    assert_eq!(get_str(&first[0], "unread"), "abc");

    let second = eng.handle(&make_message(&[
        ("op", "stdin"),
        ("session", &session),
        ("stdin", "def"),
    ]));
    assert_eq!(get_str(&second[0], "unread"), "abcdef");
}

#[test]
fn test_middleware_surface() {
    let mut eng = engine();
    let listed = eng.handle(&make_message(&[("op", "ls-middleware")]));
    let stack: Vec<&str> = listed[0]
        .get("middleware")
        .and_then(Value::as_list)
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(stack.len(), DEFAULT_MIDDLEWARE_STACK.len());
    assert_eq!(stack[0], DEFAULT_MIDDLEWARE_STACK[0]);

    // add-middleware appends unknown entries.
    let mut dict = Dict::new();
    dict.insert("op".to_string(), "add-middleware".into());
    dict.insert(
        "middleware".to_string(),
        Value::List(vec!["custom/middleware".into()]),
    );
    let added = eng.handle(&Message::new(dict));
    let stack: Vec<&str> = added[0]
        .get("middleware")
        .and_then(Value::as_list)
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(stack.contains(&"custom/middleware"));

    // swap with a mismatched set is rejected.
    let mut dict = Dict::new();
    dict.insert("op".to_string(), "swap-middleware".into());
    dict.insert(
        "middleware".to_string(),
        Value::List(vec!["only/one".into()]),
    );
    let swapped = eng.handle(&Message::new(dict));
    assert!(statuses(&swapped[0]).contains(&"middleware-mismatch".to_string()));
}

// ── completion / lookup ──────────────────────────────────────────────────

fn define_documented_fn(eng: &Engine, ns: &str, name: &str, doc: &str) {
    let ctx = eng.context();
    let var = ctx.intern_var(ns, name);
    var.bind_root(make_host_fn(name, |_| Ok(nil())));
    var.set_meta(make_map(vec![
        (make_keyword(None, "doc"), make_string(doc)),
        (
            make_keyword(None, "arglists"),
            make_vector(vec![make_string("[x]")]),
        ),
    ]));
}

#[test]
fn test_completions_respect_prefix() {
    let mut eng = engine();
    define_documented_fn(&eng, "user", "sample-fn", "A sample.");
    define_documented_fn(&eng, "user", "sample-other", "Another.");
    define_documented_fn(&eng, "user", "unrelated", "Nope.");

    let responses = eng.handle(&make_message(&[("op", "completions"), ("prefix", "sample")]));
    let completions = responses[0]
        .get("completions")
        .and_then(Value::as_list)
        .unwrap();
    let names: Vec<&str> = completions
        .iter()
        .filter_map(Value::as_dict)
        .filter_map(|entry| entry.get("candidate").and_then(Value::as_str))
        .collect();
    assert_eq!(names, vec!["sample-fn", "sample-other"]);
}

#[test]
fn test_complete_enriched_with_metadata() {
    let mut eng = engine();
    define_documented_fn(&eng, "user", "rich-fn", "Does things.");

    let responses = eng.handle(&make_message(&[("op", "complete"), ("prefix", "rich")]));
    let completions = responses[0]
        .get("completions")
        .and_then(Value::as_list)
        .unwrap();
    let entry = completions[0].as_dict().unwrap();
    assert_eq!(entry.get("candidate").and_then(Value::as_str), Some("rich-fn"));
    assert_eq!(entry.get("type").and_then(Value::as_str), Some("function"));
    assert_eq!(entry.get("ns").and_then(Value::as_str), Some("user"));
    assert_eq!(
        entry.get("doc").and_then(Value::as_str),
        Some("Does things.")
    );
    assert!(entry.contains_key("arglists"));
}

#[test]
fn test_complete_propertized_input_stripped() {
    let mut eng = engine();
    define_documented_fn(&eng, "user", "prop-fn", "Propertized.");

    let responses = eng.handle(&make_message(&[
        ("op", "complete"),
        ("prefix", "#(\"prop\" 0 4 (face font-lock-type-face))"),
    ]));
    let completions = responses[0]
        .get("completions")
        .and_then(Value::as_list)
        .unwrap();
    assert_eq!(completions.len(), 1);
}

#[test]
fn test_lookup_and_info() {
    let mut eng = engine();
    define_documented_fn(&eng, "user", "known-fn", "Known.");

    let looked = eng.handle(&make_message(&[("op", "lookup"), ("sym", "known-fn")]));
    let info = looked[0].get("info").and_then(Value::as_dict).unwrap();
    assert_eq!(info.get("name").and_then(Value::as_str), Some("known-fn"));
    assert_eq!(
        info.get("var").and_then(Value::as_str),
        Some("#'user/known-fn")
    );

    let missing = eng.handle(&make_message(&[("op", "lookup"), ("sym", "absent")]));
    let info = missing[0].get("info").and_then(Value::as_dict).unwrap();
    assert_eq!(info.get("missing").and_then(Value::as_str), Some("true"));

    let infod = eng.handle(&make_message(&[("op", "info"), ("sym", "known-fn")]));
    assert_eq!(get_str(&infod[0], "doc"), "Known.");
    assert_eq!(get_str(&infod[0], "arglists-str"), "[x]");

    let eldoc = eng.handle(&make_message(&[("op", "eldoc"), ("sym", "known-fn")]));
    assert_eq!(get_str(&eldoc[0], "type"), "function");
    assert!(eldoc[0].contains_key("eldoc"));
}

// ── test op ──────────────────────────────────────────────────────────────

fn define_test_var(eng: &Engine, ns: &str, name: &str, expected: i64, actual: i64) {
    let ctx = eng.context();
    let var = ctx.intern_var(ns, name);
    var.set_meta(make_map(vec![(
        make_keyword(None, "test"),
        make_host_fn(name, move |_| {
            assert_equal("", make_int(expected), make_int(actual));
            Ok(nil())
        }),
    )]));
}

#[test]
fn test_test_op_reports_pass_and_fail() {
    let mut eng = engine();
    define_test_var(&eng, "demo.test", "t-pass", 1, 1);
    define_test_var(&eng, "demo.test", "t-fail", 1, 2);

    let responses = eng.handle(&make_message(&[("op", "test"), ("ns", "demo.test")]));
    assert_eq!(responses.len(), 1);
    let payload = &responses[0];
    assert!(statuses(payload).contains(&"done".to_string()));
    assert_eq!(get_str(payload, "testing-ns"), "demo.test");

    let summary = payload.get("summary").and_then(Value::as_dict).unwrap();
    assert_eq!(summary.get("test").and_then(Value::as_int), Some(2));
    assert_eq!(summary.get("pass").and_then(Value::as_int), Some(1));
    assert_eq!(summary.get("fail").and_then(Value::as_int), Some(1));
    assert_eq!(summary.get("error").and_then(Value::as_int), Some(0));
    assert_eq!(summary.get("var").and_then(Value::as_int), Some(2));

    let results = payload.get("results").and_then(Value::as_dict).unwrap();
    let ns_results = results.get("demo.test").and_then(Value::as_dict).unwrap();

    let passing = ns_results.get("t-pass").and_then(Value::as_list).unwrap();
    let pass_record = passing[0].as_dict().unwrap();
    assert_eq!(pass_record.get("type").and_then(Value::as_str), Some("pass"));

    let failing = ns_results.get("t-fail").and_then(Value::as_list).unwrap();
    let fail_record = failing[0].as_dict().unwrap();
    assert_eq!(fail_record.get("type").and_then(Value::as_str), Some("fail"));
    assert_eq!(
        fail_record.get("expected").and_then(Value::as_str),
        Some("1\n")
    );
    assert_eq!(
        fail_record.get("actual").and_then(Value::as_str),
        Some("2\n")
    );

    assert!(payload.contains_key("elapsed-time"));
}

#[test]
fn test_test_op_explicit_list_and_missing_var() {
    let mut eng = engine();
    define_test_var(&eng, "demo.test", "t-pass", 3, 3);

    let mut dict = Dict::new();
    dict.insert("op".to_string(), "test".into());
    dict.insert("ns".to_string(), "demo.test".into());
    dict.insert(
        "tests".to_string(),
        Value::List(vec!["t-pass".into(), "t-ghost".into()]),
    );
    let responses = eng.handle(&Message::new(dict));

    let summary = responses[0].get("summary").and_then(Value::as_dict).unwrap();
    assert_eq!(summary.get("pass").and_then(Value::as_int), Some(1));
    assert_eq!(summary.get("error").and_then(Value::as_int), Some(1));

    let results = responses[0].get("results").and_then(Value::as_dict).unwrap();
    let ns_results = results.get("demo.test").and_then(Value::as_dict).unwrap();
    let ghost = ns_results.get("t-ghost").and_then(Value::as_list).unwrap();
    let record = ghost[0].as_dict().unwrap();
    assert_eq!(record.get("type").and_then(Value::as_str), Some("error"));
}

#[test]
fn test_test_op_fail_fast() {
    let mut eng = engine();
    define_test_var(&eng, "demo.ff", "a-fails", 1, 2);
    define_test_var(&eng, "demo.ff", "b-passes", 1, 1);

    let responses = eng.handle(&make_message(&[
        ("op", "test"),
        ("ns", "demo.ff"),
        ("fail-fast", "true"),
    ]));
    let results = responses[0].get("results").and_then(Value::as_dict).unwrap();
    let ns_results = results.get("demo.ff").and_then(Value::as_dict).unwrap();
    // Vars run in name order; the failure stops the run before b-passes.
    assert!(ns_results.contains_key("a-fails"));
    assert!(!ns_results.contains_key("b-passes"));
}

// ── misc ─────────────────────────────────────────────────────────────────

#[test]
fn test_unknown_op_unsupported() {
    let mut eng = engine();
    let responses = eng.handle(&make_message(&[("op", "frobnicate"), ("id", "3")]));
    let s = statuses(&responses[0]);
    assert!(s.contains(&"error".to_string()));
    assert!(s.contains(&"unknown-op".to_string()));
    assert_eq!(get_str(&responses[0], "id"), "3");
}

#[test]
fn test_forward_system_output_sets_flag() {
    let mut eng = engine();
    let session =
        get_str(&eng.handle(&make_message(&[("op", "clone")]))[0], "session").to_string();
    let responses = eng.handle(&make_message(&[
        ("op", "forward-system-output"),
        ("session", &session),
    ]));
    assert_eq!(statuses(&responses[0]), vec!["done"]);
}
