//! `interrupt`, `forward-system-output`, `stdin`.
//!
//! Interruption is cooperative and deliberately a stub: it reports whether
//! the target request is currently running (`interrupt-unsent`) or not
//! (`session-idle`) without cancelling compute.

use crate::bencode::{list_of_strings, Dict};
use crate::engine::{Engine, Message};

impl Engine {
    pub(crate) fn handle_interrupt(&mut self, msg: &Message) -> Vec<Dict> {
        let target_id = msg.get("interrupt-id");
        if target_id.is_empty() {
            return self.handle_unsupported(msg, "missing-interrupt-id");
        }

        let session = self.ensure_session(&msg.session());
        let session_id = session.id.clone();
        let running = session.active_request_id == target_id;

        let mut payload = Self::base_payload(msg, &session_id);
        payload.insert("interrupt-id".to_string(), target_id.into());
        let statuses: &[&str] = if running {
            &["interrupt-unsent", "done"]
        } else {
            &["session-idle", "done"]
        };
        payload.insert("status".to_string(), list_of_strings(statuses.to_vec()));
        vec![payload]
    }

    pub(crate) fn handle_forward_system_output(&mut self, msg: &Message) -> Vec<Dict> {
        let session = self.ensure_session(&msg.session());
        session.forward_system_output = true;
        let session_id = session.id.clone();
        vec![Self::make_done_response(msg, &session_id, &["done"])]
    }

    pub(crate) fn handle_stdin(&mut self, msg: &Message) -> Vec<Dict> {
        let chunk = msg.get("stdin");
        if chunk.is_empty() {
            return self.handle_unsupported(msg, "missing-stdin");
        }

        let session = self.ensure_session(&msg.session());
        session.stdin_buffer.push_str(&chunk);
        let session_id = session.id.clone();
        let unread = session.stdin_buffer.clone();

        let mut payload = Self::base_payload(msg, &session_id);
        payload.insert("stdin".to_string(), chunk.into());
        payload.insert("unread".to_string(), unread.into());
        payload.insert("status".to_string(), list_of_strings(["done"]));
        vec![payload]
    }
}
