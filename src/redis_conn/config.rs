//! Connection configuration (§3 "Connection config", §6 "Configuration").
//!
//! Field-for-field equivalent of `boost::redis::config`, plus an optional
//! YAML-file loading convenience for embedders that prefer a config file to
//! constructing `Config` in code.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::redis_conn::error::{ConfigError, Error, Result};
use crate::redis_conn::resp3::request::Request;

/// Host/port of a TCP Redis endpoint. Defaults match `boost::redis::address`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Address {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: String,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> String {
    "6379".to_string()
}

impl Default for Address {
    fn default() -> Self {
        Address { host: default_host(), port: default_port() }
    }
}

/// How the transport selector (C8) should validate the server's certificate
/// when `use_ssl` is set. The teacher hardcoded an insecure accept-all
/// verifier (`DangerousCertificateNonverifier`); here it's one selectable
/// mode rather than the only option.
#[derive(Debug, Clone)]
pub enum TlsVerifyMode {
    /// Use the platform/webpki root CA set (default).
    Platform,
    /// Use a caller-supplied set of PEM-encoded CA certificates.
    CustomRoots(Vec<Vec<u8>>),
    /// Accept any certificate. Only for local testing against self-signed
    /// servers; never select this for a production deployment.
    InsecureAcceptAny,
}

impl Default for TlsVerifyMode {
    fn default() -> Self {
        TlsVerifyMode::Platform
    }
}

/// Connection configuration (§3, §6). Mirrors `boost::redis::config`.
#[derive(Debug, Clone)]
pub struct Config {
    pub use_ssl: bool,
    pub addr: Address,
    /// If non-empty, UNIX domain socket path; `addr` is ignored and `use_ssl`
    /// must be false (enforced at `run` start, see `Config::validate`).
    pub unix_socket: String,
    pub username: String,
    pub password: String,
    pub clientname: String,
    pub database_index: Option<i64>,
    pub health_check_id: String,
    pub resolve_timeout: Duration,
    pub connect_timeout: Duration,
    pub ssl_handshake_timeout: Duration,
    /// Zero disables health checks entirely (§4.7).
    pub health_check_interval: Duration,
    /// Zero disables reconnection entirely (§4.9).
    pub reconnect_wait_interval: Duration,
    pub max_read_size: usize,
    /// Optional pipeline run after HELLO/AUTH/SETNAME/SELECT at connect time.
    pub setup: Option<Request>,
    pub tls_verify_mode: TlsVerifyMode,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            use_ssl: false,
            addr: Address::default(),
            unix_socket: String::new(),
            username: "default".to_string(),
            password: String::new(),
            clientname: "redis-conn".to_string(),
            database_index: Some(0),
            health_check_id: "redis-conn".to_string(),
            resolve_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            ssl_handshake_timeout: Duration::from_secs(10),
            health_check_interval: Duration::from_secs(2),
            reconnect_wait_interval: Duration::from_secs(1),
            max_read_size: usize::MAX,
            setup: None,
            tls_verify_mode: TlsVerifyMode::default(),
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    /// TLS and UNIX sockets are mutually exclusive (§3, §4.8); checked once
    /// at `run` start rather than on every field write.
    pub fn validate(&self) -> Result<()> {
        if !self.unix_socket.is_empty() && self.use_ssl {
            return Err(Error::configuration(ConfigError::UnixSocketsSslUnsupported));
        }
        #[cfg(not(unix))]
        if !self.unix_socket.is_empty() {
            return Err(Error::configuration(ConfigError::UnixSocketsUnsupported));
        }
        Ok(())
    }
}

/// On-disk representation for the optional YAML loader. Only the subset of
/// `Config` that's meaningfully static (not `Request`/`TlsVerifyMode`, which
/// callers still set in code) is deserializable.
#[derive(Debug, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub use_ssl: bool,
    #[serde(default)]
    pub addr: Address,
    #[serde(default)]
    pub unix_socket: String,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_clientname")]
    pub clientname: String,
    #[serde(default = "default_database_index")]
    pub database_index: Option<i64>,
    #[serde(default = "default_clientname")]
    pub health_check_id: String,
    #[serde(default = "default_resolve_timeout_secs")]
    pub resolve_timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_ssl_handshake_timeout_secs")]
    pub ssl_handshake_timeout_secs: u64,
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,
    #[serde(default = "default_reconnect_wait_interval_secs")]
    pub reconnect_wait_interval_secs: u64,
    #[serde(default = "default_max_read_size")]
    pub max_read_size: usize,
}

fn default_username() -> String {
    "default".to_string()
}
fn default_clientname() -> String {
    "redis-conn".to_string()
}
fn default_database_index() -> Option<i64> {
    Some(0)
}
const fn default_resolve_timeout_secs() -> u64 {
    10
}
const fn default_connect_timeout_secs() -> u64 {
    10
}
const fn default_ssl_handshake_timeout_secs() -> u64 {
    10
}
const fn default_health_check_interval_secs() -> u64 {
    2
}
const fn default_reconnect_wait_interval_secs() -> u64 {
    1
}
const fn default_max_read_size() -> usize {
    usize::MAX
}

impl From<FileConfig> for Config {
    fn from(f: FileConfig) -> Self {
        Config {
            use_ssl: f.use_ssl,
            addr: f.addr,
            unix_socket: f.unix_socket,
            username: f.username,
            password: f.password,
            clientname: f.clientname,
            database_index: f.database_index,
            health_check_id: f.health_check_id,
            resolve_timeout: Duration::from_secs(f.resolve_timeout_secs),
            connect_timeout: Duration::from_secs(f.connect_timeout_secs),
            ssl_handshake_timeout: Duration::from_secs(f.ssl_handshake_timeout_secs),
            health_check_interval: Duration::from_secs(f.health_check_interval_secs),
            reconnect_wait_interval: Duration::from_secs(f.reconnect_wait_interval_secs),
            max_read_size: f.max_read_size,
            setup: None,
            tls_verify_mode: TlsVerifyMode::default(),
        }
    }
}

/// Load a `Config` from a YAML file. Ambient convenience, not used unless the
/// embedder calls it.
pub fn load_config_file(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    debug!(path = %path.to_string_lossy(), "loading redis-conn config file");
    let file = std::fs::File::open(path)?;
    let file_config: FileConfig = serde_yaml::from_reader(file)?;
    Ok(file_config.into())
}

/// Searches the current directory and its ancestors for `file_name`, then
/// `~/.config/redis-conn/`, `~/.<name>`, `/etc/redis-conn/`.
pub fn find_config_file(file_name: &str) -> Option<PathBuf> {
    if let Ok(start) = std::env::current_dir() {
        let mut dir = start.as_path();
        loop {
            let candidate = dir.join(file_name);
            if candidate.exists() {
                return Some(candidate);
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| "~/".to_string());

    let in_config_dir = Path::new(&home).join(".config/redis-conn").join(file_name);
    if in_config_dir.exists() {
        return Some(in_config_dir);
    }

    let dotfile = Path::new(&home).join(format!(".{}", file_name));
    if dotfile.exists() {
        return Some(dotfile);
    }

    let etc = Path::new("/etc/redis-conn").join(file_name);
    if etc.exists() {
        return Some(etc);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_boost_redis_defaults() {
        let c = Config::default();
        assert_eq!(c.addr.host, "127.0.0.1");
        assert_eq!(c.addr.port, "6379");
        assert_eq!(c.username, "default");
        assert_eq!(c.database_index, Some(0));
        assert_eq!(c.health_check_interval, Duration::from_secs(2));
        assert_eq!(c.reconnect_wait_interval, Duration::from_secs(1));
        assert_eq!(c.max_read_size, usize::MAX);
    }

    #[test]
    fn unix_socket_and_tls_are_mutually_exclusive() {
        let mut c = Config::default();
        c.unix_socket = "/tmp/redis.sock".to_string();
        c.use_ssl = true;
        assert!(c.validate().is_err());
    }
}
