//! Request object (C4, §4.4, §3 "Request"). A builder producing RESP3 wire
//! bytes, plus the per-request config flags that govern cancellation and
//! connection-loss behavior (§4.5, §7).

use bytes::Bytes;

/// Per-request configuration (§6 "Per-request configuration"). Defaults
/// match `boost::redis`'s request defaults.
#[derive(Debug, Clone, Copy)]
pub struct RequestConfig {
    pub cancel_on_connection_lost: bool,
    pub cancel_if_unresponded: bool,
    pub cancel_if_not_connected: bool,
    pub hello_with_priority: bool,
}

impl Default for RequestConfig {
    fn default() -> Self {
        RequestConfig {
            cancel_on_connection_lost: true,
            cancel_if_unresponded: true,
            cancel_if_not_connected: false,
            hello_with_priority: true,
        }
    }
}

/// Serializes a value as one RESP3 bulk string argument. Kept intentionally
/// small — the many container/user-type adapters are out of scope (§1).
pub trait ToBulk {
    fn to_bulk(&self) -> Vec<u8>;
}

impl ToBulk for &str {
    fn to_bulk(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToBulk for String {
    fn to_bulk(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }
}

impl ToBulk for i64 {
    fn to_bulk(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl ToBulk for u64 {
    fn to_bulk(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl ToBulk for [u8] {
    fn to_bulk(&self) -> Vec<u8> {
        self.to_vec()
    }
}

impl ToBulk for Vec<u8> {
    fn to_bulk(&self) -> Vec<u8> {
        self.clone()
    }
}

impl ToBulk for Bytes {
    fn to_bulk(&self) -> Vec<u8> {
        self.to_vec()
    }
}

/// A built RESP3 pipeline. Immutable once submitted: `exec` takes it by
/// value, so ownership transfer is what enforces the invariant (§3).
#[derive(Debug, Clone, Default)]
pub struct Request {
    payload: Vec<u8>,
    /// Number of commands appended via `push`/`push_range` that expect a
    /// reply; commands appended via `push_no_reply` (e.g. `SUBSCRIBE`,
    /// whose reply is a push) don't count (§3).
    expected_replies: usize,
    pub config: RequestConfig,
}

impl Request {
    pub fn new() -> Self {
        Request::default()
    }

    pub fn with_config(config: RequestConfig) -> Self {
        Request { config, ..Default::default() }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn expected_replies(&self) -> usize {
        self.expected_replies
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    fn write_header(&mut self, n: usize) {
        self.payload.extend_from_slice(format!("*{}\r\n", n).as_bytes());
    }

    fn write_bulk(&mut self, bytes: &[u8]) {
        self.payload.extend_from_slice(format!("${}\r\n", bytes.len()).as_bytes());
        self.payload.extend_from_slice(bytes);
        self.payload.extend_from_slice(b"\r\n");
    }

    fn write_command(&mut self, parts: &[&dyn ToBulk]) {
        self.write_header(parts.len());
        for part in parts {
            self.write_bulk(&part.to_bulk());
        }
    }

    /// Appends one command that is expected to produce a reply.
    pub fn push(&mut self, parts: &[&dyn ToBulk]) -> &mut Self {
        self.write_command(parts);
        self.expected_replies += 1;
        self
    }

    /// Appends one command whose reply is a server push (e.g. `SUBSCRIBE`)
    /// and is therefore not counted against `expected_replies` (§3, §4.5c).
    pub fn push_no_reply(&mut self, parts: &[&dyn ToBulk]) -> &mut Self {
        self.write_command(parts);
        self
    }

    /// Appends one command built from a fixed verb, a key, and an iterable
    /// tail of arguments, e.g. `push_range("DEL", "prefix", keys)`.
    pub fn push_range<T: ToBulk>(&mut self, verb: &str, key: &dyn ToBulk, items: impl IntoIterator<Item = T>) -> &mut Self {
        let key_bytes = key.to_bulk();
        let item_bytes: Vec<Vec<u8>> = items.into_iter().map(|i| i.to_bulk()).collect();
        self.write_header(2 + item_bytes.len());
        self.write_bulk(verb.as_bytes());
        self.write_bulk(&key_bytes);
        for item in &item_bytes {
            self.write_bulk(item);
        }
        self.expected_replies += 1;
        self
    }

    /// Appends another request's already-framed wire bytes in front of this
    /// one's remaining commands, used to splice a caller-supplied setup
    /// pipeline onto the HELLO/AUTH/SELECT sequence.
    pub fn append(&mut self, other: &Request) -> &mut Self {
        self.payload.extend_from_slice(&other.payload);
        self.expected_replies += other.expected_replies;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_command_framing() {
        let mut r = Request::new();
        r.push(&[&"PING", &"hello"]);
        assert_eq!(r.payload(), b"*2\r\n$4\r\nPING\r\n$5\r\nhello\r\n");
        assert_eq!(r.expected_replies(), 1);
    }

    #[test]
    fn pipeline_counts_each_command() {
        let mut r = Request::new();
        r.push(&[&"SET", &"k", &"42"]);
        r.push(&[&"GET", &"k"]);
        assert_eq!(r.expected_replies(), 2);
    }

    #[test]
    fn push_no_reply_does_not_count() {
        let mut r = Request::new();
        r.push_no_reply(&[&"SUBSCRIBE", &"ch"]);
        assert_eq!(r.expected_replies(), 0);
        assert!(!r.is_empty());
    }

    #[test]
    fn push_range_builds_variadic_command() {
        let mut r = Request::new();
        r.push_range("DEL", &"k0", vec!["k1", "k2"]);
        assert_eq!(r.payload(), b"*4\r\n$3\r\nDEL\r\n$2\r\nk0\r\n$2\r\nk1\r\n$2\r\nk2\r\n".to_vec().as_slice());
    }
}
