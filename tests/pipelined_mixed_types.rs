//! End-to-end scenario 2 (§8): a two-command pipeline (`SET` then `GET`)
//! whose replies are routed to a heterogeneous tuple adapter in command
//! order, matching ordering guarantees in §5.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use redis_conn::resp3::adapter::{IgnoreAdapter, TupleAdapter2};
use redis_conn::resp3::{Adapter, Node};
use redis_conn::{Config, Connection, NullLogger, Operation, Request, Result};

/// Parses a `Number` leaf into a shared cell, standing in for `IntAdapter`
/// so the test can read the value back out after the adapter has moved into
/// the `exec` call's trait object.
#[derive(Clone, Default)]
struct CapturingInt(Arc<Mutex<i64>>);

impl Adapter for CapturingInt {
    fn supported_response_size(&self) -> usize {
        1
    }

    fn on_node(&mut self, node: &Node) -> Result<()> {
        let s = std::str::from_utf8(&node.value).unwrap();
        *self.0.lock().unwrap() = s.parse().unwrap();
        Ok(())
    }
}

#[tokio::test]
async fn set_then_get_in_one_pipeline() {
    let (listener, addr) = common::bind_loopback().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");

        let cmds = common::read_commands(&mut stream).await;
        assert_eq!(cmds[0][0], "HELLO");
        common::write_all(&mut stream, &common::simple("OK")).await;

        // SET k 42 / GET k, coalesced into one pipelined write (§4.5).
        let cmds = common::read_commands(&mut stream).await;
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0], vec!["SET", "k", "42"]);
        assert_eq!(cmds[1], vec!["GET", "k"]);

        let mut reply = common::simple("OK");
        reply.extend_from_slice(&common::number(42));
        common::write_all(&mut stream, &reply).await;

        stream
    });

    let mut config = Config::default();
    config.addr.host = "127.0.0.1".to_string();
    config.addr.port = addr.rsplit(':').next().unwrap().to_string();
    config.username.clear();
    config.password.clear();
    config.clientname.clear();
    config.database_index = None;
    config.health_check_interval = Duration::ZERO;
    config.reconnect_wait_interval = Duration::ZERO;

    let conn = Connection::new();
    let run_conn = conn.clone();
    let run_task = tokio::spawn(async move { run_conn.run(config, std::sync::Arc::new(NullLogger)).await });

    let mut req = Request::new();
    req.push(&[&"SET", &"k", &"42"]);
    req.push(&[&"GET", &"k"]);

    let captured = CapturingInt::default();
    let adapter = TupleAdapter2::new(IgnoreAdapter, captured.clone());
    conn.exec(req, Box::new(adapter)).await.expect("pipeline should succeed");

    assert_eq!(*captured.0.lock().unwrap(), 42);

    conn.cancel(Operation::All);
    let _ = tokio::time::timeout(Duration::from_secs(1), run_task).await;
    let _ = server.await;
}
