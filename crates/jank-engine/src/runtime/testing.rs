//! Assertion reporting for the test harness.
//!
//! Test bodies report assertion outcomes through [`report`]; the nREPL
//! `test` op installs a collector around each test var invocation and
//! aggregates what lands here. Equality assertions record the raw expected
//! and actual values (as reader forms), not a difference expression, so
//! editors can render them directly.

use std::cell::RefCell;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::runtime::value::{to_code_string, ObjRef};

/// Assertion outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportKind {
    /// The assertion held.
    Pass,
    /// The assertion failed.
    Fail,
    /// The test threw before the assertion resolved.
    Error,
}

impl ReportKind {
    /// Protocol label.
    pub fn label(&self) -> &'static str {
        match self {
            ReportKind::Pass => "pass",
            ReportKind::Fail => "fail",
            ReportKind::Error => "error",
        }
    }
}

/// One assertion record.
#[derive(Debug, Clone)]
pub struct TestReport {
    /// Outcome.
    pub kind: ReportKind,
    /// Assertion message, empty when none was supplied.
    pub message: String,
    /// Reader form of the expected value, for fail/error records.
    pub expected: Option<String>,
    /// Reader form of the actual value, for fail/error records.
    pub actual: Option<String>,
    /// Source file, when known.
    pub file: Option<String>,
    /// Source line, when known.
    pub line: Option<u32>,
}

type SharedReports = Arc<Mutex<Vec<TestReport>>>;

thread_local! {
    static COLLECTOR: RefCell<Option<SharedReports>> = const { RefCell::new(None) };
}

/// Run `f` with a fresh report collector installed on this thread, returning
/// `f`'s result together with every report made during the call.
pub fn with_collector<T>(f: impl FnOnce() -> T) -> (T, Vec<TestReport>) {
    let reports: SharedReports = Arc::new(Mutex::new(Vec::new()));
    let previous = COLLECTOR.with(|cell| cell.replace(Some(reports.clone())));
    let result = f();
    COLLECTOR.with(|cell| {
        *cell.borrow_mut() = previous;
    });
    let collected = reports.lock().clone();
    (result, collected)
}

/// Record an assertion outcome; a no-op when no collector is installed.
pub fn report(entry: TestReport) {
    COLLECTOR.with(|cell| {
        if let Some(collector) = cell.borrow().as_ref() {
            collector.lock().push(entry);
        }
    });
}

/// Equality assertion that reports raw values.
pub fn assert_equal(message: &str, expected: ObjRef, actual: ObjRef) -> bool {
    let passed = expected.equals(&actual);
    report(TestReport {
        kind: if passed { ReportKind::Pass } else { ReportKind::Fail },
        message: message.to_string(),
        expected: Some(to_code_string(expected)),
        actual: Some(to_code_string(actual)),
        file: None,
        line: None,
    });
    passed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::make_int;

    #[test]
    fn test_collector_captures_reports() {
        let ((), reports) = with_collector(|| {
            assert_equal("", make_int(1), make_int(1));
            assert_equal("", make_int(1), make_int(2));
        });
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].kind, ReportKind::Pass);
        assert_eq!(reports[1].kind, ReportKind::Fail);
        assert_eq!(reports[1].expected.as_deref(), Some("1"));
        assert_eq!(reports[1].actual.as_deref(), Some("2"));
    }

    #[test]
    fn test_report_without_collector_is_noop() {
        // Must not panic or leak into later collectors.
        assert_equal("", make_int(1), make_int(1));
        let ((), reports) = with_collector(|| {});
        assert!(reports.is_empty());
    }

    #[test]
    fn test_collectors_nest() {
        let ((), outer) = with_collector(|| {
            let ((), inner) = with_collector(|| {
                assert_equal("", make_int(3), make_int(3));
            });
            assert_eq!(inner.len(), 1);
        });
        assert!(outer.is_empty());
    }
}
