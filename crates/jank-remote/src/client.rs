//! Compile client.
//!
//! Connects to a compile server and forwards compilation requests on behalf
//! of a host that cannot embed the compiler. One request/response exchange
//! at a time over a single TCP stream; request ids increase monotonically
//! and a response with a mismatched id is a protocol error, never a reorder
//! candidate.

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, warn};

use crate::protocol::{
    base64_decode, escape_json, json_array_body, json_int, json_str, CompileResponse,
    CompiledModule, ErrorKind, NativeSourceResponse, RequireResponse, DEFAULT_COMPILE_PORT,
};

/// Connect timeout; connection establishment is fast or broken.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read timeout after connect. Compiling a namespace's transitive
/// dependencies can take minutes, so this is deliberately generous.
pub const COMPILE_READ_TIMEOUT: Duration = Duration::from_secs(300);

/// Byte transport carrying newline-delimited messages. The seam exists so
/// protocol logic is testable over an in-memory stream.
pub trait Transport: Send {
    /// Send an entire message.
    fn send_all(&mut self, data: &str) -> io::Result<()>;

    /// Receive one line, stripped of the trailing newline and any carriage
    /// return. An empty line means the peer closed the stream.
    fn recv_line(&mut self) -> io::Result<String>;
}

/// TCP transport with the protocol's timeout profile.
pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    /// Connect to `host:port` with the connect timeout, then raise the read
    /// timeout for compilation.
    pub fn connect(host: &str, port: u16) -> io::Result<Self> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host did not resolve"))?;
        let stream = TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT)?;
        stream.set_write_timeout(Some(CONNECT_TIMEOUT))?;
        stream.set_read_timeout(Some(COMPILE_READ_TIMEOUT))?;
        Ok(Self { stream })
    }
}

impl Transport for TcpTransport {
    fn send_all(&mut self, data: &str) -> io::Result<()> {
        self.stream.write_all(data.as_bytes())
    }

    fn recv_line(&mut self) -> io::Result<String> {
        let mut line: Vec<u8> = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let n = self.stream.read(&mut byte)?;
            if n == 0 || byte[0] == b'\n' {
                break;
            }
            if byte[0] != b'\r' {
                line.push(byte[0]);
            }
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }
}

/// Compile-server client. Disconnects on connection failures so the next
/// request reconnects.
pub struct Client {
    host: String,
    port: u16,
    transport: Option<Box<dyn Transport>>,
    next_id: i64,
}

impl Client {
    /// Client for `host:port`; does not connect yet.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            transport: None,
            next_id: 1,
        }
    }

    /// Client for the default local server.
    pub fn local() -> Self {
        Self::new("127.0.0.1", DEFAULT_COMPILE_PORT)
    }

    /// Client over a pre-established transport (tests, tunnels).
    pub fn over(transport: Box<dyn Transport>) -> Self {
        Self {
            host: String::new(),
            port: 0,
            transport: Some(transport),
            next_id: 1,
        }
    }

    /// Ensure a connection; true when connected.
    pub fn connect(&mut self) -> bool {
        if self.transport.is_some() {
            return true;
        }
        match TcpTransport::connect(&self.host, self.port) {
            Ok(transport) => {
                debug!(host = %self.host, port = self.port, "connected to compile server");
                self.transport = Some(Box::new(transport));
                true
            }
            Err(e) => {
                warn!(host = %self.host, port = self.port, error = %e, "compile server connect failed");
                false
            }
        }
    }

    /// Drop the connection.
    pub fn disconnect(&mut self) {
        self.transport = None;
    }

    /// Whether a connection is established.
    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    fn next_id(&mut self) -> i64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn send(&mut self, request: &str) -> Result<(), ()> {
        let transport = self.transport.as_mut().ok_or(())?;
        if transport.send_all(request).is_err() {
            self.disconnect();
            return Err(());
        }
        Ok(())
    }

    fn recv(&mut self) -> Result<String, ()> {
        let transport = self.transport.as_mut().ok_or(())?;
        match transport.recv_line() {
            Ok(line) if !line.is_empty() => Ok(line),
            _ => {
                self.disconnect();
                Err(())
            }
        }
    }

    /// Compile `code` in namespace `ns`; `module` may be empty.
    pub fn compile(&mut self, code: &str, ns: &str, module: &str) -> CompileResponse {
        let mut response = CompileResponse::default();

        if !self.connect() {
            response.error = "Not connected to compile server".to_string();
            response.error_type = Some(ErrorKind::Connection);
            return response;
        }

        let id = self.next_id();
        let request = format!(
            "{{\"op\":\"compile\",\"id\":{},\"code\":\"{}\",\"ns\":\"{}\",\"module\":\"{}\"}}\n",
            id,
            escape_json(code),
            escape_json(ns),
            escape_json(module)
        );

        if self.send(&request).is_err() {
            response.error = "Failed to send compile request".to_string();
            response.error_type = Some(ErrorKind::Connection);
            return response;
        }

        let line = match self.recv() {
            Ok(line) => line,
            Err(()) => {
                response.error = "No response from compile server".to_string();
                response.error_type = Some(ErrorKind::Connection);
                return response;
            }
        };

        let op = json_str(&line, "op");
        let resp_id = json_int(&line, "id");
        if resp_id != id {
            response.error = "Response ID mismatch".to_string();
            response.error_type = Some(ErrorKind::Protocol);
            return response;
        }

        response.id = resp_id;
        match op.as_str() {
            "compiled" => {
                response.success = true;
                response.entry_symbol = json_str(&line, "symbol");
                response.object_data = base64_decode(&json_str(&line, "object"));
                debug!(bytes = response.object_data.len(), "compile succeeded");
            }
            "error" => {
                response.error = json_str(&line, "error");
                response.error_type = Some(ErrorKind::parse(&json_str(&line, "type")));
            }
            other => {
                response.error = format!("Unknown response op: {}", other);
                response.error_type = Some(ErrorKind::Protocol);
            }
        }
        response
    }

    /// Require namespace `ns`, sending its source. `source_provider`
    /// answers the server's `need-source` round trips for transitive
    /// dependencies whose source only the client has.
    pub fn require_ns(
        &mut self,
        ns: &str,
        source: &str,
        source_path: &str,
        mut source_provider: impl FnMut(&str) -> Option<String>,
    ) -> RequireResponse {
        let mut response = RequireResponse::default();

        if !self.connect() {
            response.error = "Not connected to compile server".to_string();
            response.error_type = Some(ErrorKind::Connection);
            return response;
        }

        let id = self.next_id();
        let mut request = format!(
            "{{\"op\":\"require\",\"id\":{},\"ns\":\"{}\",\"source\":\"{}\"",
            id,
            escape_json(ns),
            escape_json(source)
        );
        if !source_path.is_empty() {
            request.push_str(&format!(",\"source_path\":\"{}\"", escape_json(source_path)));
        }
        request.push_str("}\n");

        if self.send(&request).is_err() {
            response.error = "Failed to send require request".to_string();
            response.error_type = Some(ErrorKind::Connection);
            return response;
        }

        // The terminal response may be preceded by need-source exchanges.
        loop {
            let line = match self.recv() {
                Ok(line) => line,
                Err(()) => {
                    response.error = "No response from compile server".to_string();
                    response.error_type = Some(ErrorKind::Connection);
                    return response;
                }
            };

            let op = json_str(&line, "op");
            if op == "need-source" {
                let wanted = json_str(&line, "ns");
                let reply = match source_provider(&wanted) {
                    Some(found) => format!(
                        "{{\"op\":\"source\",\"ns\":\"{}\",\"source\":\"{}\"}}\n",
                        escape_json(&wanted),
                        escape_json(&found)
                    ),
                    None => format!(
                        "{{\"op\":\"source\",\"ns\":\"{}\",\"source\":\"\"}}\n",
                        escape_json(&wanted)
                    ),
                };
                if self.send(&reply).is_err() {
                    response.error = "Failed to answer need-source".to_string();
                    response.error_type = Some(ErrorKind::Connection);
                    return response;
                }
                continue;
            }

            let resp_id = json_int(&line, "id");
            if resp_id != id {
                response.error = "Response ID mismatch".to_string();
                response.error_type = Some(ErrorKind::Protocol);
                return response;
            }

            response.id = resp_id;
            match op.as_str() {
                "required" => {
                    response.success = true;
                    if let Some(body) = json_array_body(&line, "modules") {
                        response.modules = parse_modules(body);
                    }
                    debug!(modules = response.modules.len(), "require succeeded");
                }
                "error" => {
                    response.error = json_str(&line, "error");
                    response.error_type = Some(ErrorKind::parse(&json_str(&line, "type")));
                }
                other => {
                    response.success = false;
                    response.error = format!("Unknown response op: {}", other);
                    response.error_type = Some(ErrorKind::Protocol);
                }
            }
            return response;
        }
    }

    /// Request the generated native source for a form.
    pub fn native_source(&mut self, code: &str, ns: &str) -> NativeSourceResponse {
        let mut response = NativeSourceResponse::default();

        if !self.connect() {
            response.error = "Not connected to compile server".to_string();
            return response;
        }

        let id = self.next_id();
        let request = format!(
            "{{\"op\":\"native-source\",\"id\":{},\"code\":\"{}\",\"ns\":\"{}\"}}\n",
            id,
            escape_json(code),
            escape_json(ns)
        );

        if self.send(&request).is_err() {
            response.error = "Failed to send native-source request".to_string();
            return response;
        }

        let line = match self.recv() {
            Ok(line) => line,
            Err(()) => {
                response.error = "No response from compile server".to_string();
                return response;
            }
        };

        let op = json_str(&line, "op");
        let resp_id = json_int(&line, "id");
        if resp_id != id {
            response.error = "Response ID mismatch".to_string();
            return response;
        }

        response.id = resp_id;
        match op.as_str() {
            "native-source-result" => {
                response.success = true;
                response.source = json_str(&line, "source");
            }
            "error" => {
                response.error = json_str(&line, "error");
            }
            other => {
                response.error = format!("Unknown response op: {}", other);
            }
        }
        response
    }

    /// Liveness probe.
    pub fn ping(&mut self) -> bool {
        if !self.connect() {
            return false;
        }
        let id = self.next_id();
        let request = format!("{{\"op\":\"ping\",\"id\":{}}}\n", id);
        if self.send(&request).is_err() {
            return false;
        }
        match self.recv() {
            Ok(line) => json_str(&line, "op") == "pong",
            Err(()) => false,
        }
    }
}

/// Parse the objects inside a `modules` array body.
fn parse_modules(body: &str) -> Vec<CompiledModule> {
    let mut modules = Vec::new();
    let mut pos = 0;
    while let Some(open) = body[pos..].find('{') {
        let start = pos + open;
        let Some(close) = body[start..].find('}') else {
            break;
        };
        let object_str = &body[start..start + close + 1];

        let module = CompiledModule {
            name: json_str(object_str, "name"),
            entry_symbol: json_str(object_str, "symbol"),
            object_data: base64_decode(&json_str(object_str, "object")),
        };
        if !module.name.is_empty() {
            modules.push(module);
        }
        pos = start + close + 1;
    }
    modules
}
