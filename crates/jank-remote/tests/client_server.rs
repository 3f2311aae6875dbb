//! Client/server integration over loopback TCP.

use std::sync::Arc;

use parking_lot::Mutex;

use jank_remote::{
    Client, CompileServer, CompileService, CompiledUnit, ErrorKind, ServedModule, ServiceError,
};

struct EchoService {
    compiles: Vec<(String, String)>,
}

impl CompileService for EchoService {
    fn compile(
        &mut self,
        code: &str,
        ns: &str,
        _module: &str,
    ) -> Result<CompiledUnit, ServiceError> {
        if code.contains("boom") {
            return Err(ServiceError::compile("analysis failed: boom"));
        }
        self.compiles.push((code.to_string(), ns.to_string()));
        Ok(CompiledUnit {
            entry_symbol: format!("_{}_entry_{}", ns.replace('.', "_"), self.compiles.len()),
            object: format!("object:{}", code).into_bytes(),
        })
    }

    fn require(
        &mut self,
        ns: &str,
        _source: &str,
        need_source: &mut dyn FnMut(&str) -> Option<String>,
    ) -> Result<Vec<ServedModule>, ServiceError> {
        // Pretend ns depends on one module whose source lives on the client.
        let dep_ns = format!("{}.util", ns);
        let dep_source = need_source(&dep_ns)
            .ok_or_else(|| ServiceError::compile(format!("missing source for {}", dep_ns)))?;

        Ok(vec![
            ServedModule {
                name: dep_ns.clone(),
                entry_symbol: format!("_{}_0", dep_ns.replace('.', "_")),
                object: dep_source.into_bytes(),
            },
            ServedModule {
                name: ns.to_string(),
                entry_symbol: format!("_{}_0", ns.replace('.', "_")),
                object: b"main-module".to_vec(),
            },
        ])
    }

    fn native_source(&mut self, code: &str, _ns: &str) -> Result<String, ServiceError> {
        Ok(format!("// native for {}\n", code))
    }
}

fn start_server() -> (CompileServer, Arc<Mutex<EchoService>>) {
    let service = Arc::new(Mutex::new(EchoService {
        compiles: Vec::new(),
    }));
    let shared: Arc<Mutex<dyn CompileService>> = service.clone();
    let server = CompileServer::start(0, shared).unwrap();
    (server, service)
}

#[test]
fn test_ping() {
    let (server, _service) = start_server();
    let mut client = Client::new("127.0.0.1", server.port());
    assert!(client.ping());
}

#[test]
fn test_compile_round_trip() {
    let (server, service) = start_server();
    let mut client = Client::new("127.0.0.1", server.port());

    let response = client.compile("(def x 1)", "user", "");
    assert!(response.success, "error: {}", response.error);
    assert_eq!(response.entry_symbol, "_user_entry_1");
    assert_eq!(response.object_data, b"object:(def x 1)");
    assert_eq!(service.lock().compiles.len(), 1);
}

#[test]
fn test_compile_error_classified() {
    let (server, _service) = start_server();
    let mut client = Client::new("127.0.0.1", server.port());

    let response = client.compile("(boom)", "user", "");
    assert!(!response.success);
    assert_eq!(response.error, "analysis failed: boom");
    assert_eq!(response.error_type, Some(ErrorKind::Compile));
}

#[test]
fn test_state_persists_across_requests() {
    let (server, _service) = start_server();
    let mut client = Client::new("127.0.0.1", server.port());

    let first = client.compile("(def a 1)", "user", "");
    let second = client.compile("(def b 2)", "user", "");
    assert_eq!(first.entry_symbol, "_user_entry_1");
    // The same service instance served both requests.
    assert_eq!(second.entry_symbol, "_user_entry_2");
}

#[test]
fn test_require_with_need_source_round_trip() {
    let (server, _service) = start_server();
    let mut client = Client::new("127.0.0.1", server.port());

    let response = client.require_ns("demo.core", "(ns demo.core)", "", |wanted| {
        assert_eq!(wanted, "demo.core.util");
        Some("(ns demo.core.util)".to_string())
    });
    assert!(response.success, "error: {}", response.error);
    assert_eq!(response.modules.len(), 2);
    assert_eq!(response.modules[0].name, "demo.core.util");
    assert_eq!(response.modules[0].object_data, b"(ns demo.core.util)");
    assert_eq!(response.modules[1].name, "demo.core");
}

#[test]
fn test_require_missing_source_is_error() {
    let (server, _service) = start_server();
    let mut client = Client::new("127.0.0.1", server.port());

    let response = client.require_ns("demo.core", "(ns demo.core)", "", |_| None);
    assert!(!response.success);
    assert!(response.error.contains("missing source"));
}

#[test]
fn test_native_source_round_trip() {
    let (server, _service) = start_server();
    let mut client = Client::new("127.0.0.1", server.port());

    let response = client.native_source("(defn f [] 1)", "user");
    assert!(response.success);
    assert_eq!(response.source, "// native for (defn f [] 1)\n");
}

#[test]
fn test_unknown_op_rejected() {
    use std::io::{BufRead, BufReader, Write};

    let (server, _service) = start_server();
    let mut stream = std::net::TcpStream::connect(("127.0.0.1", server.port())).unwrap();
    stream
        .write_all(b"{\"op\":\"frobnicate\",\"id\":9}\n")
        .unwrap();

    let mut line = String::new();
    BufReader::new(stream.try_clone().unwrap())
        .read_line(&mut line)
        .unwrap();
    assert!(line.contains("\"op\":\"error\""));
    assert!(line.contains("\"id\":9"));
    assert!(line.contains("protocol"));
}

#[test]
fn test_server_stop_is_idempotent() {
    let (mut server, _service) = start_server();
    assert!(server.is_running());
    server.stop();
    assert!(!server.is_running());
    server.stop();
}
