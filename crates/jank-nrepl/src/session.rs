//! nREPL sessions.
//!
//! Per-client state held by the engine: current namespace, output-forward
//! flag, stdin buffer, the id of the request currently evaluating, and the
//! last exception (with its cause chain, for `caught` and
//! `analyze-last-stacktrace`).

use std::sync::atomic::{AtomicU64, Ordering};

use jank_engine::runtime::DEFAULT_NS;

/// One exception with its cause chain.
#[derive(Debug, Clone, Default)]
pub struct ExceptionInfo {
    /// Exception class/type name.
    pub class: String,
    /// Message.
    pub message: String,
    /// Compilation/evaluation phase, when known.
    pub phase: Option<String>,
    /// Nested causes, outermost first.
    pub causes: Vec<ExceptionInfo>,
}

/// Per-client session state.
#[derive(Debug, Clone)]
pub struct Session {
    /// Session id, opaque to clients.
    pub id: String,
    /// Namespace evals run in; updated after each eval.
    pub current_ns: String,
    /// Whether process-level output is forwarded to this session.
    pub forward_system_output: bool,
    /// Buffered stdin provided by the client.
    pub stdin_buffer: String,
    /// Whether an eval is currently running.
    pub running_eval: bool,
    /// Request id of the running eval, empty when idle.
    pub active_request_id: String,
    /// Details of the last eval failure.
    pub last_exception: Option<ExceptionInfo>,
}

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Fresh opaque session id.
pub fn next_session_id() -> String {
    let counter = SESSION_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:08x}-{:08x}", std::process::id(), counter)
}

impl Session {
    /// Fresh session with the default namespace.
    pub fn new(id: String) -> Self {
        Self {
            id,
            current_ns: DEFAULT_NS.to_string(),
            forward_system_output: false,
            stdin_buffer: String::new(),
            running_eval: false,
            active_request_id: String::new(),
            last_exception: None,
        }
    }

    /// Clone into a fresh session: inherits the current namespace and the
    /// output-forward flag at the moment of cloning; nothing else.
    pub fn clone_session(&self) -> Self {
        let mut child = Self::new(next_session_id());
        child.current_ns = self.current_ns.clone();
        child.forward_system_output = self.forward_system_output;
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_ids_unique() {
        assert_ne!(next_session_id(), next_session_id());
    }

    #[test]
    fn test_clone_inherits_ns_and_forward_flag() {
        let mut parent = Session::new(next_session_id());
        parent.current_ns = "demo.core".to_string();
        parent.forward_system_output = true;
        parent.stdin_buffer = "pending".to_string();

        let child = parent.clone_session();
        assert_ne!(child.id, parent.id);
        assert_eq!(child.current_ns, "demo.core");
        assert!(child.forward_system_output);
        assert!(child.stdin_buffer.is_empty());
        assert!(child.last_exception.is_none());
    }

    #[test]
    fn test_clone_is_independent_afterwards() {
        let parent = Session::new(next_session_id());
        let mut child = parent.clone_session();
        child.current_ns = "other".to_string();
        assert_eq!(parent.current_ns, DEFAULT_NS);
    }
}
