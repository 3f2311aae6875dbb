//! Process-wide remote-compilation state.
//!
//! A host that cannot embed the compiler configures a peer once at startup
//! and the eval pipeline then delegates transparently. The client pointer
//! is guarded by a mutex; the enabled flag is read lock-free on the hot
//! path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use jank_engine::error::EvalError;
use jank_engine::jit::pipeline::{RemoteArtifact, RemoteCompiler};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tracing::info;

use crate::client::Client;
use crate::protocol::{
    CompileResponse, ErrorKind, NativeSourceResponse, RequireResponse, DEFAULT_COMPILE_PORT,
};

struct RemoteState {
    host: String,
    port: u16,
    client: Option<Client>,
}

static ENABLED: AtomicBool = AtomicBool::new(false);

static STATE: Lazy<Mutex<RemoteState>> = Lazy::new(|| {
    Mutex::new(RemoteState {
        host: "127.0.0.1".to_string(),
        port: DEFAULT_COMPILE_PORT,
        client: None,
    })
});

/// Configure the peer address. Call before [`connect`].
pub fn configure(host: &str, port: u16) {
    let mut state = STATE.lock();
    state.host = host.to_string();
    state.port = port;
}

/// Connect to the configured peer; true on success or when already
/// connected.
pub fn connect() -> bool {
    let mut state = STATE.lock();
    if let Some(client) = &state.client {
        if client.is_connected() {
            return true;
        }
    }
    let mut client = Client::new(state.host.clone(), state.port);
    if client.connect() {
        state.client = Some(client);
        ENABLED.store(true, Ordering::Release);
        info!(host = %state.host, port = state.port, "remote compilation enabled");
        true
    } else {
        false
    }
}

/// Disconnect and disable remote compilation.
pub fn disconnect() {
    let mut state = STATE.lock();
    ENABLED.store(false, Ordering::Release);
    if let Some(mut client) = state.client.take() {
        client.disconnect();
    }
}

/// Whether remote compilation is enabled and connected.
pub fn is_enabled() -> bool {
    ENABLED.load(Ordering::Acquire)
}

fn disconnected<T: Default>(make: impl FnOnce(&mut T)) -> T {
    let mut response = T::default();
    make(&mut response);
    response
}

/// Compile `code` remotely.
pub fn remote_compile(code: &str, ns: &str) -> CompileResponse {
    let mut state = STATE.lock();
    match &mut state.client {
        Some(client) => client.compile(code, ns, ""),
        None => disconnected(|response: &mut CompileResponse| {
            response.error = "Remote compile not connected".to_string();
            response.error_type = Some(ErrorKind::Connection);
        }),
    }
}

/// Require a namespace remotely.
pub fn remote_require(
    ns: &str,
    source: &str,
    source_path: &str,
    source_provider: impl FnMut(&str) -> Option<String>,
) -> RequireResponse {
    let mut state = STATE.lock();
    match &mut state.client {
        Some(client) => client.require_ns(ns, source, source_path, source_provider),
        None => disconnected(|response: &mut RequireResponse| {
            response.error = "Remote compile not connected".to_string();
            response.error_type = Some(ErrorKind::Connection);
        }),
    }
}

/// Generate native source remotely.
pub fn remote_native_source(code: &str, ns: &str) -> NativeSourceResponse {
    let mut state = STATE.lock();
    match &mut state.client {
        Some(client) => client.native_source(code, ns),
        None => disconnected(|response: &mut NativeSourceResponse| {
            response.error = "Remote compile not connected".to_string();
        }),
    }
}

/// Bridge installed into the eval pipeline; delegates def compilation to
/// the configured peer.
pub struct RemoteCompileBridge;

impl RemoteCompiler for RemoteCompileBridge {
    fn is_enabled(&self) -> bool {
        is_enabled()
    }

    fn compile(&self, code: &str, ns: &str) -> Result<RemoteArtifact, EvalError> {
        let response = remote_compile(code, ns);
        if !response.success {
            return Err(match response.error_type {
                Some(ErrorKind::Compile) => EvalError::Compile(response.error),
                Some(ErrorKind::Runtime) => EvalError::Runtime(response.error),
                _ => EvalError::Compile(format!("remote compile failed: {}", response.error)),
            });
        }
        Ok(RemoteArtifact {
            entry_symbol: response.entry_symbol,
            object: response.object_data,
        })
    }
}

/// Shareable bridge handle for pipeline assembly.
pub fn bridge() -> Arc<dyn RemoteCompiler> {
    Arc::new(RemoteCompileBridge)
}
