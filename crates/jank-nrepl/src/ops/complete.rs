//! `completions` and `complete`.
//!
//! Candidates come from the target namespace's interned vars. Editors may
//! send symbols wrapped in propertized text (`#("name" 0 4 (face ...))`);
//! those are stripped to the bare string before resolution. `complete`
//! additionally enriches candidates with type/doc/arglists, filtered by the
//! request's `extra-metadata` list.

use std::collections::HashSet;

use jank_engine::runtime::ns::NamespaceRef;
use jank_engine::runtime::value::{map_lookup_keyword, to_code_string, ObjectKind};
use jank_engine::runtime::Context;

use crate::bencode::{list_of_strings, Dict, Value};
use crate::engine::{Engine, Message};

/// Strip editor propertized-text wrapping: `#("name" 0 4 (...))` becomes
/// `name`. Anything else passes through unchanged.
pub fn strip_text_properties(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("#(") {
        return trimmed.to_string();
    }
    let Some(open) = trimmed.find('"') else {
        return trimmed.to_string();
    };
    let rest = &trimmed[open + 1..];
    let mut out = String::new();
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        match c {
            '"' => return out,
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            _ => out.push(c),
        }
    }
    trimmed.to_string()
}

/// A completion query resolved against a namespace.
pub(crate) struct CompletionQuery {
    /// Namespace the candidates come from.
    pub target_ns: NamespaceRef,
    /// Qualifier the user typed (`str` in `str/trim`), if any.
    pub qualifier: Option<String>,
    /// Name prefix to match.
    pub name_prefix: String,
}

/// One candidate.
pub(crate) struct Candidate {
    /// Var name inside the target namespace.
    pub symbol_name: String,
    /// Name as presented to the editor (qualified when the query was).
    pub display_name: String,
}

/// Metadata describing a var for completion/info purposes.
pub(crate) struct VarDocumentation {
    pub ns_name: String,
    pub doc: Option<String>,
    pub arglists: Vec<String>,
    pub kind: &'static str,
}

pub(crate) fn prepare_completion_query(
    ctx: &Context,
    session_ns: &str,
    prefix: &str,
    requested_ns: &str,
) -> CompletionQuery {
    let prefix = strip_text_properties(prefix);
    let home_ns_name = if requested_ns.is_empty() {
        session_ns.to_string()
    } else {
        strip_text_properties(requested_ns)
    };
    let home_ns = ctx.intern_ns(&home_ns_name);

    match prefix.split_once('/') {
        Some((qualifier, name)) => {
            // The qualifier may be an alias in the home namespace or a
            // namespace name.
            let target_name = home_ns
                .resolve_alias(qualifier)
                .unwrap_or_else(|| qualifier.to_string());
            let target_ns = ctx
                .find_ns(&target_name)
                .unwrap_or_else(|| ctx.intern_ns(&target_name));
            CompletionQuery {
                target_ns,
                qualifier: Some(qualifier.to_string()),
                name_prefix: name.to_string(),
            }
        }
        None => CompletionQuery {
            target_ns: home_ns,
            qualifier: None,
            name_prefix: prefix,
        },
    }
}

pub(crate) fn make_completion_candidates(query: &CompletionQuery) -> Vec<Candidate> {
    query
        .target_ns
        .vars_snapshot()
        .into_iter()
        .filter(|(name, _)| name.starts_with(&query.name_prefix))
        .map(|(name, _)| {
            let display_name = match &query.qualifier {
                Some(qualifier) => format!("{}/{}", qualifier, name),
                None => name.clone(),
            };
            Candidate {
                symbol_name: name,
                display_name,
            }
        })
        .collect()
}

pub(crate) fn describe_var(query: &CompletionQuery, symbol_name: &str) -> Option<VarDocumentation> {
    let var = query.target_ns.find_var(symbol_name)?;
    let meta = var.meta();

    let doc = meta
        .and_then(|m| map_lookup_keyword(m, "doc"))
        .and_then(|v| v.as_str().map(str::to_string));

    let arglists = meta
        .and_then(|m| map_lookup_keyword(m, "arglists"))
        .map(|lists| match lists.obj() {
            jank_engine::runtime::Object::Vector(items)
            | jank_engine::runtime::Object::List(items) => {
                items.iter().map(|item| to_code_string(*item)).collect()
            }
            _ => vec![to_code_string(lists)],
        })
        .unwrap_or_default();

    let is_macro = meta
        .and_then(|m| map_lookup_keyword(m, "macro"))
        .map(|v| v.is_truthy())
        .unwrap_or(false);

    let kind = if is_macro {
        "macro"
    } else if var.deref().kind() == ObjectKind::Fn {
        "function"
    } else {
        "var"
    };

    Some(VarDocumentation {
        ns_name: query.target_ns.name().to_string(),
        doc,
        arglists,
        kind,
    })
}

impl Engine {
    pub(crate) fn handle_completions(&mut self, msg: &Message) -> Vec<Dict> {
        let prefix = msg.get("prefix");
        let requested_ns = msg.get("ns");
        let (session_id, session_ns) = {
            let session = self.ensure_session(&msg.session());
            (session.id.clone(), session.current_ns.clone())
        };

        let query = prepare_completion_query(&self.ctx, &session_ns, &prefix, &requested_ns);
        let candidates = make_completion_candidates(&query);

        let mut completions = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let kind = describe_var(&query, &candidate.symbol_name)
                .map(|info| info.kind)
                .unwrap_or("var");
            let mut entry = Dict::new();
            entry.insert("candidate".to_string(), candidate.display_name.clone().into());
            entry.insert("type".to_string(), kind.into());
            completions.push(Value::Dict(entry));
        }

        let mut payload = Self::base_payload(msg, &session_id);
        payload.insert("completions".to_string(), Value::List(completions));
        payload.insert("status".to_string(), list_of_strings(["done"]));
        vec![payload]
    }

    pub(crate) fn handle_complete(&mut self, msg: &Message) -> Vec<Dict> {
        let mut prefix = msg.get("prefix");
        if prefix.is_empty() {
            prefix = msg.get("symbol");
        }
        if prefix.is_empty() {
            return self.handle_unsupported(msg, "missing-prefix");
        }

        let requested_ns = msg.get("ns");
        let (session_id, session_ns) = {
            let session = self.ensure_session(&msg.session());
            (session.id.clone(), session.current_ns.clone())
        };

        // extra-metadata narrows which enrichments to include; absent means
        // everything.
        let (include_doc, include_arglists, include_ns) = match msg.string_list("extra-metadata") {
            Some(extra) => {
                let wanted: HashSet<String> = extra
                    .into_iter()
                    .map(|entry| entry.trim_start_matches(':').to_ascii_lowercase())
                    .collect();
                (
                    wanted.contains("doc"),
                    wanted.contains("arglists"),
                    wanted.contains("ns"),
                )
            }
            None => (true, true, true),
        };

        let query = prepare_completion_query(&self.ctx, &session_ns, &prefix, &requested_ns);
        let candidates = make_completion_candidates(&query);

        let mut completions = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let Some(info) = describe_var(&query, &candidate.symbol_name) else {
                continue;
            };

            let mut entry = Dict::new();
            entry.insert("candidate".to_string(), candidate.display_name.clone().into());
            entry.insert("type".to_string(), info.kind.into());
            if include_ns {
                entry.insert("ns".to_string(), info.ns_name.clone().into());
            }
            if include_doc {
                if let Some(doc) = &info.doc {
                    entry.insert("doc".to_string(), doc.clone().into());
                }
            }
            if include_arglists && !info.arglists.is_empty() {
                entry.insert(
                    "arglists".to_string(),
                    list_of_strings(info.arglists.clone()),
                );
                entry.insert(
                    "arglists-str".to_string(),
                    info.arglists.join(" ").into(),
                );
            }
            completions.push(Value::Dict(entry));
        }

        let mut payload = Self::base_payload(msg, &session_id);
        payload.insert("completions".to_string(), Value::List(completions));
        payload.insert("status".to_string(), list_of_strings(["done"]));
        vec![payload]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_plain_symbol() {
        assert_eq!(strip_text_properties("map"), "map");
        assert_eq!(strip_text_properties("  str/trim "), "str/trim");
    }

    #[test]
    fn test_strip_propertized_text() {
        assert_eq!(
            strip_text_properties("#(\"name\" 0 4 (face font-lock-type-face))"),
            "name"
        );
        assert_eq!(strip_text_properties("#(\"a/b\" 0 3 (x))"), "a/b");
    }

    #[test]
    fn test_strip_handles_escapes() {
        assert_eq!(strip_text_properties("#(\"we\\\"ird\" 0 6)"), "we\"ird");
    }
}
