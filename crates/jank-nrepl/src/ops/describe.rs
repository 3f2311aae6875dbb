//! `describe`: advertise supported ops and versions.

use crate::bencode::{list_of_strings, Dict, Value};
use crate::engine::{Engine, Message};

fn doc_value(doc: &str) -> Value {
    let mut entry = Dict::new();
    entry.insert("doc".to_string(), doc.into());
    Value::Dict(entry)
}

impl Engine {
    pub(crate) fn handle_describe(&mut self, msg: &Message) -> Vec<Dict> {
        let mut payload = Dict::new();
        if !msg.id().is_empty() {
            payload.insert("id".to_string(), msg.id().into());
        }

        let mut versions = Dict::new();
        versions.insert("jank".to_string(), self.version.clone().into());
        payload.insert("versions".to_string(), Value::Dict(versions));

        let mut ops = Dict::new();
        ops.insert("clone".to_string(), doc_value("Create a new session"));
        ops.insert(
            "describe".to_string(),
            doc_value("Describe server capabilities"),
        );
        ops.insert("ls-sessions".to_string(), doc_value("List active sessions"));
        ops.insert("close".to_string(), doc_value("Close the provided session"));
        ops.insert(
            "eval".to_string(),
            doc_value("Evaluate code in the given session"),
        );
        ops.insert("load-file".to_string(), doc_value("Load and evaluate a file"));
        ops.insert(
            "completions".to_string(),
            doc_value("Return completion candidates"),
        );
        ops.insert(
            "complete".to_string(),
            doc_value("Return metadata-rich completion candidates"),
        );
        ops.insert(
            "lookup".to_string(),
            doc_value("Lookup metadata about a symbol"),
        );
        ops.insert("info".to_string(), doc_value("Return symbol info"));
        ops.insert("eldoc".to_string(), doc_value("Return eldoc hints for a symbol"));
        ops.insert(
            "forward-system-output".to_string(),
            doc_value("Enable forwarding of process output"),
        );
        ops.insert(
            "interrupt".to_string(),
            doc_value("Attempt to interrupt a running eval"),
        );
        ops.insert("ls-middleware".to_string(), doc_value("List middleware stack"));
        ops.insert("add-middleware".to_string(), doc_value("Add middleware"));
        ops.insert(
            "swap-middleware".to_string(),
            doc_value("Swap middleware order"),
        );
        ops.insert("stdin".to_string(), doc_value("Provide stdin content"));
        ops.insert(
            "caught".to_string(),
            doc_value("Return details about the last evaluation error"),
        );
        ops.insert(
            "analyze-last-stacktrace".to_string(),
            doc_value("Return stacktrace analysis for the last error"),
        );
        ops.insert(
            "test".to_string(),
            doc_value("Run tests in a namespace and report results"),
        );
        payload.insert("ops".to_string(), Value::Dict(ops));

        payload.insert("status".to_string(), list_of_strings(["done"]));
        vec![payload]
    }
}
