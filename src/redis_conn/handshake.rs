//! Handshake (C6, §4.6): the RESP3 setup pipeline sent once per new
//! connection, before any user request is allowed onto the wire — `HELLO 3`,
//! optional `AUTH`/`SETNAME`, optional `SELECT`, then the caller's optional
//! `setup` pipeline. Distinct from the TLS handshake in `transport.rs`.
//!
//! Grounded in `boost::redis::connection_base::async_run`'s connect sequence
//! (`include/boost/redis/connection_base.hpp`) and `aedis`'s `resolve` ->
//! `hello` chain; driven here as a direct read/write loop over `Transport`
//! rather than through the multiplexer, since nothing else is queued yet.

use crate::redis_conn::config::Config;
use crate::redis_conn::error::{Error, Result};
use crate::redis_conn::resp3::node::{DataType, Node};
use crate::redis_conn::resp3::parser::Parser;
use crate::redis_conn::resp3::read_buffer::ReadBuffer;
use crate::redis_conn::resp3::request::{Request, RequestConfig, ToBulk};
use crate::redis_conn::transport::Transport;

const HELLO_PROTOVER: &str = "3";

/// Builds the HELLO/AUTH/SETNAME/SELECT/setup pipeline for `config` (§4.6).
pub fn build_request(config: &Config) -> Request {
    let mut req = Request::with_config(RequestConfig { hello_with_priority: true, ..Default::default() });

    let mut hello_parts: Vec<String> = vec!["HELLO".to_string(), HELLO_PROTOVER.to_string()];
    if !config.username.is_empty() || !config.password.is_empty() {
        hello_parts.push("AUTH".to_string());
        hello_parts.push(config.username.clone());
        hello_parts.push(config.password.clone());
    }
    if !config.clientname.is_empty() {
        hello_parts.push("SETNAME".to_string());
        hello_parts.push(config.clientname.clone());
    }
    let refs: Vec<&dyn ToBulk> = hello_parts.iter().map(|s| s as &dyn ToBulk).collect();
    req.push(&refs);

    if let Some(db) = config.database_index {
        req.push(&[&"SELECT", &db]);
    }

    if let Some(setup) = &config.setup {
        req.append(setup);
    }

    req
}

fn check_reply_for_error(nodes: &[Node]) -> Result<()> {
    if let Some(node) = nodes.iter().find(|n| matches!(n.data_type, DataType::SimpleError | DataType::BlobError)) {
        return Err(Error::resp3_hello(String::from_utf8_lossy(&node.value).into_owned()));
    }
    Ok(())
}

async fn write_all(transport: &mut Transport, mut buf: &[u8]) -> Result<()> {
    while !buf.is_empty() {
        transport.writable().await?;
        let n = transport.try_write(buf)?;
        if n > 0 {
            buf = &buf[n..];
        }
    }
    Ok(())
}

/// Runs the handshake to completion on a freshly opened `Transport`. Surfaces
/// the first server-reported error (from any sub-reply) as `resp3_hello`,
/// per §7's "HELLO/setup failures tear the connection down before it is ever
/// handed to the multiplexer".
pub async fn perform(transport: &mut Transport, config: &Config) -> Result<()> {
    let request = build_request(config);
    if request.expected_replies() == 0 {
        return Ok(());
    }

    write_all(transport, request.payload()).await?;

    let mut read_buf = ReadBuffer::new(config.max_read_size);
    let mut parser = Parser::new();
    let mut remaining = request.expected_replies();

    while remaining > 0 {
        transport.readable().await?;
        let hint = parser.suggested_buffer_growth(4096);
        let span = read_buf.prepare_append(hint)?;
        let n = transport.try_read(span)?;
        if n == 0 {
            continue;
        }
        read_buf.commit_append(n);

        loop {
            let adv = parser.advance(read_buf.committed_view())?;
            read_buf.consume(adv.consumed);
            if !adv.complete {
                break;
            }
            let nodes = parser.take_nodes();
            check_reply_for_error(&nodes)?;
            remaining -= 1;
            if remaining == 0 {
                break;
            }
        }
    }

    Ok(())
}
