//! TCP server.
//!
//! Connection I/O runs on a reactor: each connection owns a read buffer
//! fed to the streaming bencode decoder and a write queue drained in order,
//! so responses to one request are never interleaved. Engine operations
//! are serialized behind one lock — the runtime underneath is effectively
//! single-threaded for compile and eval — and run on blocking threads so a
//! long eval never stalls the reactor.
//!
//! On start the bound port is written to `.nrepl-port` for editor
//! discovery; the file is removed on stop.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::bencode::{self, ParseState};
use crate::engine::{Engine, Message};

/// Name of the port discovery file.
pub const PORT_FILE: &str = ".nrepl-port";

/// A running nREPL server.
pub struct Server {
    port: u16,
    shutdown: watch::Sender<bool>,
    thread: Option<JoinHandle<()>>,
    port_file: Option<PathBuf>,
}

impl Server {
    /// Bind `bind:port` (port 0 picks an ephemeral port) and serve the
    /// engine. Writes `.nrepl-port` into the working directory.
    pub fn start(engine: Arc<Mutex<Engine>>, bind: &str, port: u16) -> std::io::Result<Self> {
        Self::start_inner(engine, bind, port, true)
    }

    /// Like [`Server::start`] but without the port file (embedded hosts).
    pub fn start_embedded(
        engine: Arc<Mutex<Engine>>,
        bind: &str,
        port: u16,
    ) -> std::io::Result<Self> {
        Self::start_inner(engine, bind, port, false)
    }

    fn start_inner(
        engine: Arc<Mutex<Engine>>,
        bind: &str,
        port: u16,
        write_port_file: bool,
    ) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_io()
            .build()?;

        let listener = {
            let _guard = runtime.enter();
            let std_listener = std::net::TcpListener::bind((bind, port))?;
            std_listener.set_nonblocking(true)?;
            TcpListener::from_std(std_listener)?
        };
        let bound_port = listener.local_addr()?.port();

        let port_file = if write_port_file {
            let path = PathBuf::from(PORT_FILE);
            if let Err(e) = std::fs::write(&path, bound_port.to_string()) {
                warn!(error = %e, "failed to write port file");
                None
            } else {
                Some(path)
            }
        } else {
            None
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let thread = std::thread::spawn(move || {
            runtime.block_on(accept_loop(listener, engine, shutdown_rx));
        });

        info!(port = bound_port, "nREPL server listening");
        Ok(Self {
            port: bound_port,
            shutdown,
            thread: Some(thread),
            port_file,
        })
    }

    /// Bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop accepting, join the reactor thread, and remove the port file.
    pub fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        if let Some(path) = self.port_file.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                warn!(error = %e, "failed to remove port file");
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn accept_loop(
    listener: TcpListener,
    engine: Arc<Mutex<Engine>>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!(%peer, "connection accepted");
                    let engine = engine.clone();
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(socket, engine, shutdown).await {
                            debug!(error = %e, "connection ended");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            },
        }
    }
}

async fn serve_connection(
    socket: TcpStream,
    engine: Arc<Mutex<Engine>>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let (mut reader, mut writer) = socket.into_split();

    // Responses funnel through one queue per connection; the writer task
    // drains it in order so each write completes before the next starts.
    let (response_tx, mut response_rx) = mpsc::unbounded_channel::<Vec<u8>>();
    let writer_task = tokio::spawn(async move {
        while let Some(chunk) = response_rx.recv().await {
            if writer.write_all(&chunk).await.is_err() {
                break;
            }
        }
    });

    let mut buffer: Vec<u8> = Vec::with_capacity(4096);
    let mut read_chunk = [0u8; 4096];

    'outer: loop {
        let n = tokio::select! {
            _ = shutdown.changed() => break 'outer,
            read = reader.read(&mut read_chunk) => read?,
        };
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&read_chunk[..n]);

        loop {
            let decoded = bencode::decode(&buffer);
            match decoded.state {
                ParseState::NeedMore => break,
                ParseState::Error => {
                    warn!(error = %decoded.error, "bencode decode error; closing connection");
                    break 'outer;
                }
                ParseState::Ok => {
                    let consumed = decoded.consumed;
                    let Some(dict) = decoded.value.and_then(|v| v.as_dict().cloned()) else {
                        warn!("invalid nREPL payload; closing connection");
                        break 'outer;
                    };
                    buffer.drain(..consumed);

                    // Engine ops run serially on a blocking thread.
                    let engine = engine.clone();
                    let msg = Message::new(dict);
                    let responses =
                        tokio::task::spawn_blocking(move || engine.lock().handle(&msg))
                            .await
                            .unwrap_or_default();

                    for payload in responses {
                        let encoded = bencode::encode_dict(&payload);
                        if response_tx.send(encoded).is_err() {
                            break 'outer;
                        }
                    }
                }
            }
        }
    }

    drop(response_tx);
    let _ = writer_task.await;
    Ok(())
}
