//! A Redis RESP3 connection engine: transport establishment and reconnection,
//! the RESP3 handshake, request multiplexing over a single connection, and
//! health checking (§1, §2). See `Connection` for the public entry point.

pub mod config;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod health;
pub mod logger;
pub mod multiplexer;
pub mod operation;
pub mod resp3;
pub mod transport;
pub mod usage;

pub use config::{Address, Config, FileConfig, TlsVerifyMode};
pub use connection::{Connection, ExecHandle};
pub use error::{AdapterError, ConfigError, Error, ErrorKind, LifecycleError, ProtocolError, Result, TransportError};
pub use logger::{default_logger, LogLevel, Logger, NullLogger, SharedLogger, TracingLogger};
pub use operation::{CancelKind, Operation};
pub use resp3::{Adapter, DataType, Node, Parser, ReadBuffer, Request, RequestConfig};
pub use usage::Usage;
