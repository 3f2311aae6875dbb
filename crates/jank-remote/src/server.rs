//! Compile server.
//!
//! Accepts `compile`/`require`/`native-source`/`ping` requests, runs them
//! through one shared [`CompileService`] (the host's own runtime context
//! and JIT, so side effects persist between requests), and streams object
//! bytes back. One accept thread plus a handler thread per connection;
//! service access is serialized because the underlying compiler is not
//! thread-safe.

use std::io::{BufRead, BufReader, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::protocol::{base64_encode, escape_json, json_int, json_str};

/// One compiled artifact.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    /// Entry symbol to execute after loading.
    pub entry_symbol: String,
    /// Relocatable object bytes.
    pub object: Vec<u8>,
}

/// One module of a `require` result.
#[derive(Debug, Clone)]
pub struct ServedModule {
    /// Module name.
    pub name: String,
    /// Entry symbol.
    pub entry_symbol: String,
    /// Object bytes.
    pub object: Vec<u8>,
}

/// Service-level failure classification; mapped onto protocol error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// Analyzer/codegen/toolchain rejection.
    Compile,
    /// Evaluation failure.
    Runtime,
}

/// Failure from the compile service.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    /// Classification.
    pub kind: ServiceErrorKind,
    /// Message returned to the client.
    pub message: String,
}

impl ServiceError {
    /// Compile-class error.
    pub fn compile(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Compile,
            message: message.into(),
        }
    }

    /// Runtime-class error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self {
            kind: ServiceErrorKind::Runtime,
            message: message.into(),
        }
    }

    fn wire_type(&self) -> &'static str {
        match self.kind {
            ServiceErrorKind::Compile => "compile",
            ServiceErrorKind::Runtime => "runtime",
        }
    }
}

/// The compile pipeline behind the server. The implementation is stateful:
/// namespaces loaded and vars interned by one request are visible to the
/// next.
pub trait CompileService: Send {
    /// Compile `code` in `ns` to an object file.
    fn compile(&mut self, code: &str, ns: &str, module: &str)
        -> Result<CompiledUnit, ServiceError>;

    /// Load `ns` from `source`, compiling it and any transitive
    /// dependencies. `need_source` requests a dependency's source from the
    /// client when it is not available locally; `None` means the client
    /// could not supply it.
    fn require(
        &mut self,
        ns: &str,
        source: &str,
        need_source: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<Vec<ServedModule>, ServiceError>;

    /// Generate the native source for `code` without compiling it.
    fn native_source(&mut self, code: &str, ns: &str) -> Result<String, ServiceError>;
}

/// Shared service handle.
pub type SharedService = Arc<Mutex<dyn CompileService>>;

/// TCP compile server.
pub struct CompileServer {
    port: u16,
    running: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl CompileServer {
    /// Bind `port` (0 picks an ephemeral port) and start accepting.
    pub fn start(port: u16, service: SharedService) -> std::io::Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let port = listener.local_addr()?.port();
        let running = Arc::new(AtomicBool::new(true));

        let accept_running = running.clone();
        let accept_thread = std::thread::spawn(move || {
            for stream in listener.incoming() {
                if !accept_running.load(Ordering::Acquire) {
                    break;
                }
                match stream {
                    Ok(stream) => {
                        let service = service.clone();
                        std::thread::spawn(move || {
                            if let Err(e) = handle_connection(stream, service) {
                                debug!(error = %e, "connection ended");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        });

        info!(port, "compile server listening");
        Ok(Self {
            port,
            running,
            accept_thread: Some(accept_thread),
        })
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Whether the server is accepting connections.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop accepting and join the accept thread. Established connections
    /// drain on their own threads.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        // Wake the accept loop with a throwaway connection.
        let _ = TcpStream::connect(("127.0.0.1", self.port));
        if let Some(thread) = self.accept_thread.take() {
            let _ = thread.join();
        }
        info!(port = self.port, "compile server stopped");
    }
}

impl Drop for CompileServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_connection(stream: TcpStream, service: SharedService) -> std::io::Result<()> {
    let peer = stream.peer_addr()?;
    debug!(%peer, "connection accepted");

    let mut writer = stream.try_clone()?;
    let mut reader = BufReader::new(stream);

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let request = line.trim_end_matches(['\r', '\n']);
        if request.is_empty() {
            continue;
        }

        let op = json_str(request, "op");
        let id = json_int(request, "id");

        let response = match op.as_str() {
            "ping" => format!("{{\"op\":\"pong\",\"id\":{}}}\n", id),
            "compile" => handle_compile(request, id, &service),
            "require" => handle_require(request, id, &service, &mut reader, &mut writer)?,
            "native-source" => handle_native_source(request, id, &service),
            other => format!(
                "{{\"op\":\"error\",\"id\":{},\"error\":\"unknown op: {}\",\"type\":\"protocol\"}}\n",
                id,
                escape_json(other)
            ),
        };

        writer.write_all(response.as_bytes())?;
        writer.flush()?;
    }

    debug!(%peer, "connection closed");
    Ok(())
}

fn error_response(id: i64, error: &ServiceError) -> String {
    format!(
        "{{\"op\":\"error\",\"id\":{},\"error\":\"{}\",\"type\":\"{}\"}}\n",
        id,
        escape_json(&error.message),
        error.wire_type()
    )
}

fn handle_compile(request: &str, id: i64, service: &SharedService) -> String {
    let code = json_str(request, "code");
    let ns = json_str(request, "ns");
    let module = json_str(request, "module");

    match service.lock().compile(&code, &ns, &module) {
        Ok(unit) => format!(
            "{{\"op\":\"compiled\",\"id\":{},\"symbol\":\"{}\",\"object\":\"{}\"}}\n",
            id,
            escape_json(&unit.entry_symbol),
            base64_encode(&unit.object)
        ),
        Err(e) => error_response(id, &e),
    }
}

fn handle_require(
    request: &str,
    id: i64,
    service: &SharedService,
    reader: &mut BufReader<TcpStream>,
    writer: &mut TcpStream,
) -> std::io::Result<String> {
    let ns = json_str(request, "ns");
    let source = json_str(request, "source");

    // The need-source callback runs a nested exchange on the same stream:
    // the server asks, the client answers with a `source` message, and
    // compilation resumes.
    let mut need_source = |wanted: &str| -> Option<String> {
        let ask = format!(
            "{{\"op\":\"need-source\",\"ns\":\"{}\"}}\n",
            escape_json(wanted)
        );
        if writer.write_all(ask.as_bytes()).is_err() || writer.flush().is_err() {
            return None;
        }

        let mut reply = String::new();
        if reader.read_line(&mut reply).ok()? == 0 {
            return None;
        }
        let reply = reply.trim_end_matches(['\r', '\n']);
        if json_str(reply, "op") != "source" || json_str(reply, "ns") != wanted {
            return None;
        }
        let source = json_str(reply, "source");
        (!source.is_empty()).then_some(source)
    };

    let result = service.lock().require(&ns, &source, &mut need_source);
    Ok(match result {
        Ok(modules) => {
            let body: Vec<String> = modules
                .iter()
                .map(|module| {
                    format!(
                        "{{\"name\":\"{}\",\"symbol\":\"{}\",\"object\":\"{}\"}}",
                        escape_json(&module.name),
                        escape_json(&module.entry_symbol),
                        base64_encode(&module.object)
                    )
                })
                .collect();
            format!(
                "{{\"op\":\"required\",\"id\":{},\"modules\":[{}]}}\n",
                id,
                body.join(",")
            )
        }
        Err(e) => error_response(id, &e),
    })
}

fn handle_native_source(request: &str, id: i64, service: &SharedService) -> String {
    let code = json_str(request, "code");
    let ns = json_str(request, "ns");

    match service.lock().native_source(&code, &ns) {
        Ok(source) => format!(
            "{{\"op\":\"native-source-result\",\"id\":{},\"source\":\"{}\"}}\n",
            id,
            escape_json(&source)
        ),
        Err(e) => error_response(id, &e),
    }
}
