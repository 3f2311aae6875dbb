//! Remote compilation for jank.
//!
//! When the local device cannot host the compiler, compilation is forwarded
//! to a peer over a newline-delimited JSON protocol: the client sends jank
//! source, the server cross-compiles it with its own runtime context and
//! streams object bytes back.

#![warn(rust_2018_idioms)]

pub mod client;
pub mod config;
pub mod protocol;
pub mod server;

pub use client::{Client, TcpTransport, Transport};
pub use config::{
    bridge, configure, connect, disconnect, is_enabled, remote_compile, remote_native_source,
    remote_require, RemoteCompileBridge,
};
pub use protocol::{
    base64_decode, base64_encode, CompileResponse, CompiledModule, ErrorKind,
    NativeSourceResponse, RequireResponse, DEFAULT_COMPILE_PORT,
};
pub use server::{
    CompileServer, CompileService, CompiledUnit, ServedModule, ServiceError, ServiceErrorKind,
    SharedService,
};
