//! Symbol metadata: `lookup`, `info`, `eldoc`.

use jank_engine::runtime::to_code_string;

use crate::bencode::{list_of_strings, Dict, Value};
use crate::engine::{Engine, Message};
use crate::ops::complete::{describe_var, prepare_completion_query, strip_text_properties};

struct SymbolParts {
    ns: String,
    name: String,
}

fn parse_symbol(input: &str) -> SymbolParts {
    let stripped = strip_text_properties(input);
    match stripped.split_once('/') {
        Some((ns, name)) => SymbolParts {
            ns: ns.to_string(),
            name: name.to_string(),
        },
        None => SymbolParts {
            ns: String::new(),
            name: stripped,
        },
    }
}

fn symbol_field(msg: &Message) -> String {
    let sym = msg.get("sym");
    if !sym.is_empty() {
        return sym;
    }
    msg.get("symbol")
}

impl Engine {
    pub(crate) fn handle_lookup(&mut self, msg: &Message) -> Vec<Dict> {
        let sym_input = symbol_field(msg);
        if sym_input.is_empty() {
            return self.handle_unsupported(msg, "missing-symbol");
        }
        let parts = parse_symbol(&sym_input);
        if parts.name.is_empty() {
            return self.handle_unsupported(msg, "missing-symbol");
        }

        let mut ns_request = msg.get("ns");
        if !parts.ns.is_empty() {
            ns_request = parts.ns.clone();
        }

        let (session_id, session_ns) = {
            let session = self.ensure_session(&msg.session());
            (session.id.clone(), session.current_ns.clone())
        };

        let query = prepare_completion_query(&self.ctx, &session_ns, &parts.name, &ns_request);

        let mut info = Dict::new();
        info.insert("name".to_string(), parts.name.clone().into());
        info.insert("ns".to_string(), query.target_ns.name().into());
        match query.target_ns.find_var(&parts.name) {
            Some(var) => {
                info.insert(
                    "var".to_string(),
                    format!("#'{}", var.qualified_name()).into(),
                );
            }
            None => {
                info.insert("missing".to_string(), "true".into());
            }
        }

        let mut payload = Self::base_payload(msg, &session_id);
        payload.insert("info".to_string(), Value::Dict(info));
        payload.insert("status".to_string(), list_of_strings(["done"]));
        vec![payload]
    }

    pub(crate) fn handle_info(&mut self, msg: &Message) -> Vec<Dict> {
        let sym_input = symbol_field(msg);
        if sym_input.is_empty() {
            return self.handle_unsupported(msg, "missing-symbol");
        }
        let parts = parse_symbol(&sym_input);

        let mut ns_request = msg.get("ns");
        if !parts.ns.is_empty() {
            ns_request = parts.ns.clone();
        }

        let (session_id, session_ns) = {
            let session = self.ensure_session(&msg.session());
            (session.id.clone(), session.current_ns.clone())
        };

        let query = prepare_completion_query(&self.ctx, &session_ns, &parts.name, &ns_request);
        let mut payload = Self::base_payload(msg, &session_id);

        match describe_var(&query, &parts.name) {
            Some(doc) => {
                payload.insert("name".to_string(), parts.name.clone().into());
                payload.insert("ns".to_string(), doc.ns_name.clone().into());
                if let Some(text) = &doc.doc {
                    payload.insert("doc".to_string(), text.clone().into());
                }
                if !doc.arglists.is_empty() {
                    payload.insert(
                        "arglists-str".to_string(),
                        doc.arglists.join(" ").into(),
                    );
                }
                if let Some(var) = query.target_ns.find_var(&parts.name) {
                    payload.insert("value".to_string(), to_code_string(var.deref()).into());
                }
                payload.insert("status".to_string(), list_of_strings(["done"]));
            }
            None => {
                payload.insert("status".to_string(), list_of_strings(["done", "no-info"]));
            }
        }
        vec![payload]
    }

    pub(crate) fn handle_eldoc(&mut self, msg: &Message) -> Vec<Dict> {
        let sym_input = symbol_field(msg);
        if sym_input.is_empty() {
            return self.handle_unsupported(msg, "missing-symbol");
        }
        let parts = parse_symbol(&sym_input);

        let mut ns_request = msg.get("ns");
        if !parts.ns.is_empty() {
            ns_request = parts.ns.clone();
        }

        let (session_id, session_ns) = {
            let session = self.ensure_session(&msg.session());
            (session.id.clone(), session.current_ns.clone())
        };

        let query = prepare_completion_query(&self.ctx, &session_ns, &parts.name, &ns_request);
        let mut payload = Self::base_payload(msg, &session_id);

        match describe_var(&query, &parts.name) {
            Some(doc) => {
                payload.insert("name".to_string(), parts.name.clone().into());
                payload.insert("ns".to_string(), doc.ns_name.clone().into());
                payload.insert("type".to_string(), doc.kind.into());
                if let Some(text) = &doc.doc {
                    payload.insert("docstring".to_string(), text.clone().into());
                }
                // eldoc is a list of arglists, each a list of parameters.
                let eldoc: Vec<Value> = doc
                    .arglists
                    .iter()
                    .map(|arglist| {
                        let params: Vec<String> = arglist
                            .trim_start_matches('[')
                            .trim_end_matches(']')
                            .split_whitespace()
                            .map(str::to_string)
                            .collect();
                        list_of_strings(params)
                    })
                    .collect();
                payload.insert("eldoc".to_string(), Value::List(eldoc));
                payload.insert("status".to_string(), list_of_strings(["done"]));
            }
            None => {
                payload.insert("status".to_string(), list_of_strings(["done", "no-eldoc"]));
            }
        }
        vec![payload]
    }
}
