//! Middleware surface: `ls-middleware`, `add-middleware`, `swap-middleware`.
//!
//! Cosmetic: editors inspect and reorder the advertised stack, so the
//! engine tracks it faithfully even though dispatch is direct.

use std::collections::BTreeSet;

use crate::bencode::{list_of_strings, Dict};
use crate::engine::{Engine, Message};

impl Engine {
    fn middleware_payload(&mut self, msg: &Message) -> Dict {
        let session_id = self.ensure_session(&msg.session()).id.clone();
        let mut payload = Self::base_payload(msg, &session_id);
        payload.insert(
            "middleware".to_string(),
            list_of_strings(self.middleware_stack.clone()),
        );
        payload.insert("status".to_string(), list_of_strings(["done"]));
        payload
    }

    pub(crate) fn handle_ls_middleware(&mut self, msg: &Message) -> Vec<Dict> {
        vec![self.middleware_payload(msg)]
    }

    pub(crate) fn handle_add_middleware(&mut self, msg: &Message) -> Vec<Dict> {
        let Some(items) = msg.string_list("middleware") else {
            return self.handle_unsupported(msg, "missing-middleware");
        };

        for entry in items {
            if !self.middleware_stack.contains(&entry) {
                self.middleware_stack.push(entry);
            }
        }
        vec![self.middleware_payload(msg)]
    }

    pub(crate) fn handle_swap_middleware(&mut self, msg: &Message) -> Vec<Dict> {
        let Some(items) = msg.string_list("middleware") else {
            return self.handle_unsupported(msg, "missing-middleware");
        };

        // Reordering only: the incoming set must match the current one.
        let existing: BTreeSet<&String> = self.middleware_stack.iter().collect();
        let incoming: BTreeSet<&String> = items.iter().collect();
        if existing != incoming {
            return self.handle_unsupported(msg, "middleware-mismatch");
        }

        self.middleware_stack = items;
        vec![self.middleware_payload(msg)]
    }
}
