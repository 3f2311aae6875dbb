//! Session lifecycle: `clone`, `close`, `ls-sessions`.

use crate::bencode::{list_of_strings, Dict};
use crate::engine::{Engine, Message};

impl Engine {
    pub(crate) fn handle_clone(&mut self, msg: &Message) -> Vec<Dict> {
        let child = self.ensure_session(&msg.session()).clone_session();
        let child_id = child.id.clone();
        self.sessions.insert(child_id.clone(), child);

        let mut payload = Dict::new();
        if !msg.id().is_empty() {
            payload.insert("id".to_string(), msg.id().into());
        }
        payload.insert("session".to_string(), child_id.clone().into());
        payload.insert("new-session".to_string(), child_id.into());
        payload.insert("status".to_string(), list_of_strings(["done"]));
        vec![payload]
    }

    pub(crate) fn handle_close(&mut self, msg: &Message) -> Vec<Dict> {
        let session_id = msg.session();
        if self.sessions.remove(&session_id).is_none() {
            return self.handle_unsupported(msg, "unknown-session");
        }
        if self.default_session.as_deref() == Some(session_id.as_str()) {
            self.default_session = None;
        }
        vec![Self::make_done_response(msg, &session_id, &["done"])]
    }

    pub(crate) fn handle_ls_sessions(&mut self, msg: &Message) -> Vec<Dict> {
        let mut ids: Vec<String> = self.sessions.keys().cloned().collect();
        ids.sort();

        let mut payload = Dict::new();
        if !msg.id().is_empty() {
            payload.insert("id".to_string(), msg.id().into());
        }
        payload.insert("sessions".to_string(), list_of_strings(ids));
        payload.insert("status".to_string(), list_of_strings(["done"]));
        vec![payload]
    }
}
