//! Shared fixture for integration tests: a minimal fake RESP3 server that
//! binds an ephemeral loopback port and talks just enough of the wire format
//! to drive the engine end-to-end.
//!
//! The fake server understands just enough of RESP3 client framing to drive
//! the engine end-to-end: it reads pipelines of bulk-string arrays and lets
//! the test script canned replies against them. It is not a RESP3 parser
//! test double for the engine's own parser (that's `resp3::parser`'s job) —
//! it only needs to recognize command boundaries well enough to respond.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// One RESP3 client command: the verb and its arguments, with framing
/// already stripped.
pub type Command = Vec<String>;

/// Binds an OS-assigned loopback port. Returns the listener and the
/// `host:port` string a `redis_conn::Config` can point `addr` at.
pub async fn bind_loopback() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind loopback test listener");
    let port = listener.local_addr().expect("local_addr").port();
    (listener, format!("127.0.0.1:{}", port))
}

fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\r\n")
}

fn parse_one(buf: &[u8]) -> Option<(Command, usize)> {
    if buf.is_empty() || buf[0] != b'*' {
        return None;
    }
    let nl = find_crlf(&buf[1..])?;
    let count: usize = std::str::from_utf8(&buf[1..1 + nl]).ok()?.parse().ok()?;
    let mut pos = 1 + nl + 2;
    let mut parts = Vec::with_capacity(count);
    for _ in 0..count {
        if pos >= buf.len() || buf[pos] != b'$' {
            return None;
        }
        let nl = find_crlf(&buf[pos + 1..])?;
        let len: usize = std::str::from_utf8(&buf[pos + 1..pos + 1 + nl]).ok()?.parse().ok()?;
        pos = pos + 1 + nl + 2;
        if buf.len() < pos + len + 2 {
            return None;
        }
        parts.push(String::from_utf8_lossy(&buf[pos..pos + len]).into_owned());
        pos += len + 2;
    }
    Some((parts, pos))
}

/// Reads bytes off `stream` until at least one full RESP3 command pipeline is
/// buffered, then returns every command it could fully parse. Blocks until
/// the client writes *something* parseable; a stalled client (or one that
/// hangs up first) ends the test with a panic, which is what we want.
pub async fn read_commands(stream: &mut TcpStream) -> Vec<Command> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.expect("read from client under test");
        assert!(n > 0, "client closed the connection before sending a full command");
        buf.extend_from_slice(&chunk[..n]);

        let mut pos = 0;
        let mut commands = Vec::new();
        loop {
            if pos >= buf.len() {
                return commands;
            }
            match parse_one(&buf[pos..]) {
                Some((cmd, consumed)) => {
                    commands.push(cmd);
                    pos += consumed;
                }
                None => break, // incomplete; read more and retry from scratch
            }
        }
    }
}

pub async fn write_all(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).await.expect("write to client under test");
}

/// A RESP3 simple string reply, e.g. `simple("OK")` -> `+OK\r\n`.
pub fn simple(s: &str) -> Vec<u8> {
    format!("+{}\r\n", s).into_bytes()
}

/// A RESP3 simple-error reply, e.g. for a failed HELLO/AUTH.
pub fn error(msg: &str) -> Vec<u8> {
    format!("-{}\r\n", msg).into_bytes()
}

/// A RESP3 blob-string reply.
pub fn bulk(s: &str) -> Vec<u8> {
    format!("${}\r\n{}\r\n", s.len(), s).into_bytes()
}

/// A RESP3 number reply.
pub fn number(n: i64) -> Vec<u8> {
    format!(":{}\r\n", n).into_bytes()
}

/// A RESP3 push reply carrying bulk-string elements, e.g. a pub/sub message.
pub fn push(parts: &[&str]) -> Vec<u8> {
    let mut out = format!(">{}\r\n", parts.len()).into_bytes();
    for p in parts {
        out.extend_from_slice(&bulk(p));
    }
    out
}
