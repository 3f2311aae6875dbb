//! Last-exception reporting: `caught` and `analyze-last-stacktrace`.

use crate::bencode::{list_of_strings, Dict};
use crate::engine::{Engine, Message};
use crate::session::ExceptionInfo;

impl Engine {
    pub(crate) fn handle_caught(&mut self, msg: &Message) -> Vec<Dict> {
        let session = self.ensure_session(&msg.session());
        let session_id = session.id.clone();
        let last = session.last_exception.clone();

        let mut payload = Self::base_payload(msg, &session_id);
        match last {
            Some(info) => {
                payload.insert("err".to_string(), info.message.into());
                payload.insert("exception-type".to_string(), info.class.into());
                payload.insert("status".to_string(), list_of_strings(["done"]));
            }
            None => {
                payload.insert("status".to_string(), list_of_strings(["done", "no-error"]));
            }
        }
        vec![payload]
    }

    pub(crate) fn handle_analyze_last_stacktrace(&mut self, msg: &Message) -> Vec<Dict> {
        let session = self.ensure_session(&msg.session());
        let session_id = session.id.clone();
        let last = session.last_exception.clone();

        let Some(root) = last else {
            let mut payload = Self::base_payload(msg, &session_id);
            payload.insert("status".to_string(), list_of_strings(["done", "no-error"]));
            return vec![payload];
        };

        // One payload per cause, root first, then the terminal done.
        let mut responses = Vec::new();
        let mut pending: Vec<&ExceptionInfo> = vec![&root];
        while let Some(current) = pending.pop() {
            let mut payload = Self::base_payload(msg, &session_id);
            payload.insert("class".to_string(), current.class.clone().into());
            payload.insert("message".to_string(), current.message.clone().into());
            payload.insert("type".to_string(), "jank".into());
            if let Some(phase) = &current.phase {
                payload.insert("phase".to_string(), phase.clone().into());
            }
            responses.push(payload);

            for cause in current.causes.iter().rev() {
                pending.push(cause);
            }
        }

        responses.push(Self::make_done_response(msg, &session_id, &["done"]));
        responses
    }
}
