//! End-to-end scenario 1 (§8): a single-command request completes with the
//! server's echoed string, and the connection stays up afterwards.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use redis_conn::resp3::{Adapter, Node};
use redis_conn::{Config, Connection, NullLogger, Operation, Request, Result};

/// Captures the single bulk/simple-string value of a one-reply command into
/// a shared cell, so the test can assert on it after the adapter has been
/// moved into the `exec` call as a trait object.
#[derive(Clone, Default)]
struct CapturingAdapter(Arc<Mutex<Option<Vec<u8>>>>);

impl Adapter for CapturingAdapter {
    fn supported_response_size(&self) -> usize {
        1
    }

    fn on_node(&mut self, node: &Node) -> Result<()> {
        *self.0.lock().unwrap() = Some(node.value.to_vec());
        Ok(())
    }
}

#[tokio::test]
async fn ping_round_trip() {
    let (listener, addr) = common::bind_loopback().await;

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");

        // HELLO 3 (no AUTH/SETNAME/SELECT — the test config below clears them).
        let cmds = common::read_commands(&mut stream).await;
        assert_eq!(cmds[0][0], "HELLO");
        common::write_all(&mut stream, &common::simple("OK")).await;

        // PING hello
        let cmds = common::read_commands(&mut stream).await;
        assert_eq!(cmds[0], vec!["PING", "hello"]);
        common::write_all(&mut stream, &common::bulk("hello")).await;

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
    req.push(&[&"PING", &"hello"]);
    let captured = CapturingAdapter::default();
    let handle = conn.exec(req, Box::new(captured.clone()));

    let n = handle.await.expect("exec should succeed");
    assert!(n >= 5);
    assert_eq!(captured.0.lock().unwrap().as_deref(), Some(b"hello".as_slice()));
    assert_eq!(conn.usage().responses_received, 1);

    conn.cancel(Operation::All);
    let _ = tokio::time::timeout(Duration::from_secs(1), run_task).await;
    let _ = server.await;
}
