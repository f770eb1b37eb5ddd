use std::fmt::{self, Display};
use std::{io, result};

/// All fallible operations in this crate return this.
#[derive(Debug)]
pub struct Error {
    err: Box<ErrorKind>, // boxed to keep Result small
}

pub type Result<T> = result::Result<T, Error>;

#[derive(Debug)]
pub enum ErrorKind {
    Transport(TransportError),
    Protocol(ProtocolError),
    Adapter(AdapterError),
    /// The HELLO/setup pipeline failed; carries the server's error text.
    Resp3Hello(String),
    Lifecycle(LifecycleError),
    Configuration(ConfigError),
    /// Failure loading/parsing an optional YAML config file.
    ConfigFile(String),
}

#[derive(Debug)]
pub enum TransportError {
    Resolve(io::Error),
    Connect(io::Error),
    TlsHandshake(rustls::Error),
    ResolveTimeout,
    ConnectTimeout,
    TlsHandshakeTimeout,
    Io(io::Error),
    Eof,
}

#[derive(Debug)]
pub enum ProtocolError {
    InvalidType(u8),
    MalformedLength,
    EmptyField,
    Unterminated,
    BufferCapExceeded,
    /// The server sent fewer top-level replies than the pipeline expected.
    MissingReply,
}

#[derive(Debug)]
pub enum AdapterError {
    NotANumber,
    NotADouble,
    NotABool,
    UnexpectedBoolValue,
    EmptyField,
    ExpectsSimpleType,
    ExpectsAggregate,
    ExpectsMapLikeAggregate,
    ExpectsSetAggregate,
    NestedAggregateNotSupported,
    Resp3SimpleError(String),
    Resp3BlobError(String),
    IncompatibleSize,
}

#[derive(Debug)]
pub enum LifecycleError {
    NotConnected,
    PongTimeout,
    SyncReceivePushFailed,
    OperationAborted,
}

#[derive(Debug)]
pub enum ConfigError {
    UnixSocketsUnsupported,
    UnixSocketsSslUnsupported,
}

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Error { err: Box::new(kind) }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.err
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.err
    }

    pub fn transport(e: TransportError) -> Self {
        Self::from_kind(ErrorKind::Transport(e))
    }

    pub fn protocol(e: ProtocolError) -> Self {
        Self::from_kind(ErrorKind::Protocol(e))
    }

    pub fn adapter(e: AdapterError) -> Self {
        Self::from_kind(ErrorKind::Adapter(e))
    }

    pub fn resp3_hello(msg: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::Resp3Hello(msg.into()))
    }

    pub fn lifecycle(e: LifecycleError) -> Self {
        Self::from_kind(ErrorKind::Lifecycle(e))
    }

    pub fn configuration(e: ConfigError) -> Self {
        Self::from_kind(ErrorKind::Configuration(e))
    }

    pub fn not_connected() -> Self {
        Self::lifecycle(LifecycleError::NotConnected)
    }

    pub fn pong_timeout() -> Self {
        Self::lifecycle(LifecycleError::PongTimeout)
    }

    pub fn operation_aborted() -> Self {
        Self::lifecycle(LifecycleError::OperationAborted)
    }

    pub fn sync_receive_push_failed() -> Self {
        Self::lifecycle(LifecycleError::SyncReceivePushFailed)
    }

    /// True if this is exactly `operation_aborted`, used by callers that need
    /// to distinguish a user cancel from every other failure mode.
    pub fn is_operation_aborted(&self) -> bool {
        matches!(&*self.err, ErrorKind::Lifecycle(LifecycleError::OperationAborted))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::transport(TransportError::Io(err))
    }
}

impl From<rustls::Error> for Error {
    fn from(err: rustls::Error) -> Self {
        Error::transport(TransportError::TlsHandshake(err))
    }
}

impl From<std::str::Utf8Error> for Error {
    fn from(_err: std::str::Utf8Error) -> Self {
        Error::protocol(ProtocolError::MalformedLength)
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::from_kind(ErrorKind::ConfigFile(err.to_string()))
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        Display::fmt(&self.err, f)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ErrorKind::Transport(e) => Display::fmt(e, f),
            ErrorKind::Protocol(e) => Display::fmt(e, f),
            ErrorKind::Adapter(e) => Display::fmt(e, f),
            ErrorKind::Resp3Hello(msg) => write!(f, "HELLO/setup pipeline failed: {}", msg),
            ErrorKind::Lifecycle(e) => Display::fmt(e, f),
            ErrorKind::Configuration(e) => Display::fmt(e, f),
            ErrorKind::ConfigFile(msg) => write!(f, "config file error: {}", msg),
        }
    }
}

impl Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportError::Resolve(e) => write!(f, "failed to resolve address: {}", e),
            TransportError::Connect(e) => write!(f, "failed to connect: {}", e),
            TransportError::TlsHandshake(e) => write!(f, "TLS handshake failed: {}", e),
            TransportError::ResolveTimeout => f.write_str("resolve timed out"),
            TransportError::ConnectTimeout => f.write_str("connect timed out"),
            TransportError::TlsHandshakeTimeout => f.write_str("TLS handshake timed out"),
            TransportError::Io(e) => write!(f, "stream I/O error: {}", e),
            TransportError::Eof => f.write_str("unexpected end of stream"),
        }
    }
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProtocolError::InvalidType(b) => write!(f, "invalid RESP3 type byte {:#04x}", b),
            ProtocolError::MalformedLength => f.write_str("malformed length prefix"),
            ProtocolError::EmptyField => f.write_str("empty field where a value was expected"),
            ProtocolError::Unterminated => f.write_str("unterminated message"),
            ProtocolError::BufferCapExceeded => f.write_str("exceeds_maximum_read_buffer_size"),
            ProtocolError::MissingReply => f.write_str("server returned fewer replies than the pipeline expected"),
        }
    }
}

impl Display for AdapterError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AdapterError::NotANumber => f.write_str("not_a_number"),
            AdapterError::NotADouble => f.write_str("not_a_double"),
            AdapterError::NotABool => f.write_str("not_a_bool"),
            AdapterError::UnexpectedBoolValue => f.write_str("unexpected_bool_value"),
            AdapterError::EmptyField => f.write_str("empty_field"),
            AdapterError::ExpectsSimpleType => f.write_str("expects_simple_type"),
            AdapterError::ExpectsAggregate => f.write_str("expects_aggregate"),
            AdapterError::ExpectsMapLikeAggregate => f.write_str("expects_map_like_aggregate"),
            AdapterError::ExpectsSetAggregate => f.write_str("expects_set_aggregate"),
            AdapterError::NestedAggregateNotSupported => f.write_str("nested_aggregate_not_supported"),
            AdapterError::Resp3SimpleError(msg) => write!(f, "resp3_simple_error: {}", msg),
            AdapterError::Resp3BlobError(msg) => write!(f, "resp3_blob_error: {}", msg),
            AdapterError::IncompatibleSize => f.write_str("incompatible_size"),
        }
    }
}

impl Display for LifecycleError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LifecycleError::NotConnected => f.write_str("not_connected"),
            LifecycleError::PongTimeout => f.write_str("pong_timeout"),
            LifecycleError::SyncReceivePushFailed => f.write_str("sync_receive_push_failed"),
            LifecycleError::OperationAborted => f.write_str("operation_aborted"),
        }
    }
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::UnixSocketsUnsupported => f.write_str("unix_sockets_unsupported"),
            ConfigError::UnixSocketsSslUnsupported => f.write_str("unix_sockets_ssl_unsupported"),
        }
    }
}
