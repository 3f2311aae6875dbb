//! `eval` and `load-file`.
//!
//! The detail floor for eval: bind the session's namespace, capture stdout,
//! evaluate, flush captured output as `out` messages before any
//! `value`/`err`, update the session namespace, and convert every failure
//! class into an `err` + `done error` pair while recording the session's
//! last exception.

use std::sync::Arc;

use jank_engine::error::{EvalError, JitError};
use jank_engine::jit::recovery::with_recovery;
use jank_engine::runtime::{to_code_string, NsBindingScope, OutputRedirectScope};
use parking_lot::Mutex;

use crate::bencode::{list_of_strings, Dict};
use crate::engine::{Engine, Message};
use crate::session::ExceptionInfo;

/// Build the cause-chain record for a failure.
pub(crate) fn exception_info(error: &EvalError) -> ExceptionInfo {
    let mut info = ExceptionInfo {
        class: error.type_name(),
        message: error.to_string(),
        phase: Some(error.kind_name().to_string()),
        causes: Vec::new(),
    };
    // Evaluator failures carry their diagnostics as a nested cause so
    // analyze-last-stacktrace can show both layers.
    if let EvalError::Jit(JitError::Eval { diagnostics, .. }) = error {
        if !diagnostics.is_empty() {
            info.causes.push(ExceptionInfo {
                class: "jank.jit-diagnostics".to_string(),
                message: diagnostics.clone(),
                phase: None,
                causes: Vec::new(),
            });
        }
    }
    info
}

impl Engine {
    pub(crate) fn handle_eval(&mut self, msg: &Message) -> Vec<Dict> {
        let code = msg.get("code");
        if code.is_empty() {
            return self.handle_unsupported(msg, "missing-code");
        }
        self.eval_code(msg, &code, true)
    }

    pub(crate) fn handle_load_file(&mut self, msg: &Message) -> Vec<Dict> {
        let file = msg.get("file");
        if file.is_empty() {
            return self.handle_unsupported(msg, "missing-file");
        }
        // Same machinery as eval, but responses omit `ns`.
        self.eval_code(msg, &file, false)
    }

    pub(crate) fn eval_code(&mut self, msg: &Message, code: &str, include_ns: bool) -> Vec<Dict> {
        let session_key = self.session_key(&msg.session());
        let (session_id, session_ns) = {
            let session = self.sessions.get_mut(&session_key).expect("session ensured");
            session.running_eval = true;
            session.active_request_id = msg.id();
            session.last_exception = None;
            (session.id.clone(), session.current_ns.clone())
        };

        let ctx = Arc::clone(&self.ctx);
        let captured = Arc::new(Mutex::new(String::new()));

        let (result, ns_after) = {
            let _ns_scope = NsBindingScope::new(&ctx, &session_ns);
            let sink = Arc::clone(&captured);
            let _redirect = OutputRedirectScope::new(&ctx, move |chunk| {
                sink.lock().push_str(chunk);
            });

            // A recovery point is installed around every eval so evaluator
            // fatal errors surface as compile-class failures instead of
            // terminating the server.
            let result = match with_recovery(|| ctx.eval_string(code)) {
                Ok(eval_result) => eval_result,
                Err(fatal) => Err(EvalError::Compile(fatal.to_string())),
            };
            (result, ctx.current_ns_name())
        };

        {
            let session = self.sessions.get_mut(&session_key).expect("session ensured");
            session.running_eval = false;
            session.active_request_id.clear();
            session.current_ns = ns_after.clone();
        }

        let mut responses = Vec::new();

        // Captured output flushes strictly before value/err.
        let output = captured.lock().clone();
        if !output.is_empty() {
            let mut out_msg = Self::base_payload(msg, &session_id);
            out_msg.insert("out".to_string(), output.into());
            responses.push(out_msg);
        }

        match result {
            Ok(value) => {
                let mut value_msg = Self::base_payload(msg, &session_id);
                if include_ns {
                    value_msg.insert("ns".to_string(), ns_after.into());
                }
                value_msg.insert("value".to_string(), to_code_string(value).into());
                responses.push(value_msg);
                responses.push(Self::make_done_response(msg, &session_id, &["done"]));
            }
            Err(error) => {
                let err_string = match &error {
                    EvalError::Thrown(value) => to_code_string(*value),
                    other => other.to_string(),
                };
                let info = exception_info(&error);
                self.sessions
                    .get_mut(&session_key)
                    .expect("session ensured")
                    .last_exception = Some(info);

                let mut err_msg = Self::base_payload(msg, &session_id);
                err_msg.insert("status".to_string(), list_of_strings(["error"]));
                err_msg.insert("err".to_string(), err_string.into());
                responses.push(err_msg);
                responses.push(Self::make_done_response(
                    msg,
                    &session_id,
                    &["done", "error"],
                ));
            }
        }

        responses
    }
}
