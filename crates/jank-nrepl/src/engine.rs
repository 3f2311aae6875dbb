//! Dispatch engine.
//!
//! Decoded bencode dictionaries come in, one or more response dictionaries
//! go out. Every response echoes the request `id` when one was given; the
//! terminal response for a request always carries a `status` list
//! containing `done`. Op handlers live in the `ops` module, one file per
//! concern, all as methods on [`Engine`].

use std::collections::BTreeMap;
use std::sync::Arc;

use jank_engine::runtime::Context;

use crate::bencode::{list_of_strings, Dict, Value};
use crate::session::{next_session_id, Session};

/// Middleware stack advertised to clients. The engine's dispatch is not
/// actually middleware-shaped; the surface exists because editors inspect
/// and reorder it.
pub const DEFAULT_MIDDLEWARE_STACK: [&str; 10] = [
    "nrepl.middleware.session/session",
    "nrepl.middleware.caught/wrap-caught",
    "nrepl.middleware.print/wrap-print",
    "nrepl.middleware.interruptible-eval/interruptible-eval",
    "nrepl.middleware.load-file/wrap-load-file",
    "nrepl.middleware.completion/wrap-completion",
    "nrepl.middleware.lookup/wrap-lookup",
    "nrepl.middleware.dynamic-loader/wrap-dynamic-loader",
    "nrepl.middleware.io/wrap-out",
    "nrepl.middleware.session/add-stdin",
];

/// One decoded request.
#[derive(Debug, Clone)]
pub struct Message {
    /// Raw request dictionary.
    pub data: Dict,
}

impl Message {
    /// Wrap a decoded dictionary.
    pub fn new(data: Dict) -> Self {
        Self { data }
    }

    /// String field, empty when absent or non-string.
    pub fn get(&self, key: &str) -> String {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }

    /// String field with a default for absence.
    pub fn get_or(&self, key: &str, default: &str) -> String {
        match self.data.get(key).and_then(Value::as_str) {
            Some(value) => value.to_string(),
            None => default.to_string(),
        }
    }

    /// Raw field access.
    pub fn find(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Request id, empty when absent.
    pub fn id(&self) -> String {
        self.get("id")
    }

    /// Session id, empty when absent.
    pub fn session(&self) -> String {
        self.get("session")
    }

    /// A list-of-strings field; also accepts a single string.
    pub fn string_list(&self, key: &str) -> Option<Vec<String>> {
        match self.data.get(key)? {
            Value::Str(s) => Some(vec![s.clone()]),
            Value::List(items) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            ),
            _ => None,
        }
    }
}

/// The nREPL dispatch engine.
pub struct Engine {
    pub(crate) ctx: Arc<Context>,
    pub(crate) sessions: BTreeMap<String, Session>,
    pub(crate) default_session: Option<String>,
    pub(crate) middleware_stack: Vec<String>,
    pub(crate) version: String,
}

impl Engine {
    /// Engine over a runtime context.
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            sessions: BTreeMap::new(),
            default_session: None,
            middleware_stack: DEFAULT_MIDDLEWARE_STACK
                .iter()
                .map(|s| s.to_string())
                .collect(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// The runtime context this engine drives.
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Dispatch one request to its handler.
    pub fn handle(&mut self, msg: &Message) -> Vec<Dict> {
        match msg.get("op").as_str() {
            "describe" => self.handle_describe(msg),
            "clone" => self.handle_clone(msg),
            "close" => self.handle_close(msg),
            "ls-sessions" => self.handle_ls_sessions(msg),
            "eval" => self.handle_eval(msg),
            "load-file" => self.handle_load_file(msg),
            "completions" => self.handle_completions(msg),
            "complete" => self.handle_complete(msg),
            "lookup" => self.handle_lookup(msg),
            "info" => self.handle_info(msg),
            "eldoc" => self.handle_eldoc(msg),
            "forward-system-output" => self.handle_forward_system_output(msg),
            "interrupt" => self.handle_interrupt(msg),
            "ls-middleware" => self.handle_ls_middleware(msg),
            "add-middleware" => self.handle_add_middleware(msg),
            "swap-middleware" => self.handle_swap_middleware(msg),
            "stdin" => self.handle_stdin(msg),
            "caught" => self.handle_caught(msg),
            "analyze-last-stacktrace" => self.handle_analyze_last_stacktrace(msg),
            "test" => self.handle_test(msg),
            "" => self.handle_unsupported(msg, "missing-op"),
            _ => self.handle_unsupported(msg, "unknown-op"),
        }
    }

    /// Key of the session a request addresses, creating it on demand. An
    /// absent session field addresses the shared default session.
    pub(crate) fn session_key(&mut self, requested: &str) -> String {
        if requested.is_empty() {
            if let Some(existing) = &self.default_session {
                return existing.clone();
            }
            let id = next_session_id();
            self.sessions.insert(id.clone(), Session::new(id.clone()));
            self.default_session = Some(id.clone());
            return id;
        }

        if !self.sessions.contains_key(requested) {
            self.sessions
                .insert(requested.to_string(), Session::new(requested.to_string()));
        }
        requested.to_string()
    }

    /// The session a request addresses.
    pub(crate) fn ensure_session(&mut self, requested: &str) -> &mut Session {
        let key = self.session_key(requested);
        self.sessions.get_mut(&key).expect("session just ensured")
    }

    /// Response skeleton echoing `id` (when present) and `session`.
    pub(crate) fn base_payload(msg: &Message, session_id: &str) -> Dict {
        let mut payload = Dict::new();
        if !msg.id().is_empty() {
            payload.insert("id".to_string(), msg.id().into());
        }
        payload.insert("session".to_string(), session_id.into());
        payload
    }

    /// Terminal response with the given statuses.
    pub(crate) fn make_done_response(
        msg: &Message,
        session_id: &str,
        statuses: &[&str],
    ) -> Dict {
        let mut payload = Self::base_payload(msg, session_id);
        payload.insert("status".to_string(), list_of_strings(statuses.to_vec()));
        payload
    }

    /// Reject a request the engine cannot serve. Echoes the requested
    /// session without creating one, so e.g. closing an unknown session
    /// does not resurrect it.
    pub(crate) fn handle_unsupported(&mut self, msg: &Message, reason: &str) -> Vec<Dict> {
        let requested = msg.session();
        let session_id = if requested.is_empty() {
            self.ensure_session("").id.clone()
        } else {
            requested
        };
        vec![Self::make_done_response(
            msg,
            &session_id,
            &["done", "error", reason],
        )]
    }
}
