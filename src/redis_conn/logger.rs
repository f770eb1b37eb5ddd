//! Observability boundary (§6). The engine never picks a logging backend for
//! you; it calls into a `Logger` at the points named in the spec (resolve,
//! connect, TLS, read/write outcomes, hello/setup failures) and falls back to
//! `tracing` when the caller installs none.

use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

/// `(level, message) -> ()`, per spec §6.
pub trait Logger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

impl fmt::Debug for dyn Logger {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("dyn Logger")
    }
}

/// Default logger: forwards to whatever `tracing` subscriber the process has
/// installed (or nothing, if none was installed — the same posture as the
/// teacher's `init_tracing` bootstrap, minus the requirement to own the
/// global subscriber since this is a library, not a server binary).
pub struct TracingLogger {
    prefix: &'static str,
}

impl TracingLogger {
    pub fn new(prefix: &'static str) -> Self {
        TracingLogger { prefix }
    }
}

impl Default for TracingLogger {
    fn default() -> Self {
        TracingLogger::new("redis-conn")
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Trace => tracing::trace!(prefix = self.prefix, "{}", message),
            LogLevel::Debug => tracing::debug!(prefix = self.prefix, "{}", message),
            LogLevel::Info => tracing::info!(prefix = self.prefix, "{}", message),
            LogLevel::Warn => tracing::warn!(prefix = self.prefix, "{}", message),
            LogLevel::Error => tracing::error!(prefix = self.prefix, "{}", message),
        }
    }
}

/// A logger that discards everything; useful in tests that don't care about
/// log output but still need a concrete `Logger` to hand to `run`.
pub struct NullLogger;

impl Logger for NullLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

pub type SharedLogger = Arc<dyn Logger>;

pub fn default_logger() -> SharedLogger {
    Arc::new(TracingLogger::default())
}
