//! nREPL server for jank.
//!
//! Bencode-framed request dispatch driving the runtime context: eval with
//! output capture, session lifecycle, completion/lookup, a cooperative
//! interrupt stub, and the test harness. The TCP reactor lives in
//! [`server`]; the protocol logic is all in [`engine`] and [`ops`] and is
//! fully testable without a socket.

#![warn(rust_2018_idioms)]

pub mod bencode;
pub mod engine;
pub mod ops;
pub mod server;
pub mod session;

pub use bencode::{Dict, Value};
pub use engine::{Engine, Message, DEFAULT_MIDDLEWARE_STACK};
pub use ops::strip_text_properties;
pub use server::{Server, PORT_FILE};
pub use session::{next_session_id, ExceptionInfo, Session};
