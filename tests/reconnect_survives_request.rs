//! Universal invariant (§8): a request with `cancel_on_connection_lost =
//! false` survives a connection drop and is re-written, in its original
//! queue position, once the run loop reconnects.

mod common;

use std::time::Duration;

use redis_conn::resp3::{Adapter, Node, RequestConfig};
use redis_conn::{Config, Connection, NullLogger, Operation, Request, Result};

#[derive(Clone, Default)]
struct CapturingAdapter(std::sync::Arc<std::sync::Mutex<Option<Vec<u8>>>>);

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
async fn survivable_request_is_rewritten_after_reconnect() {
    let (listener, addr) = common::bind_loopback().await;

    let server = tokio::spawn(async move {
        // First connection: complete the handshake, see the request arrive,
        // then drop the socket without ever answering it.
        let (mut stream, _) = listener.accept().await.expect("accept 1");
        let cmds = common::read_commands(&mut stream).await;
        assert_eq!(cmds[0][0], "HELLO");
        common::write_all(&mut stream, &common::simple("OK")).await;

        let cmds = common::read_commands(&mut stream).await;
        assert_eq!(cmds[0], vec!["GET", "durable-key"]);
        drop(stream);

        // Second connection: the same request must show up again, since it
        // opted out of being cancelled on connection loss.
        let (mut stream, _) = listener.accept().await.expect("accept 2");
        let cmds = common::read_commands(&mut stream).await;
        assert_eq!(cmds[0][0], "HELLO");
        common::write_all(&mut stream, &common::simple("OK")).await;

        let cmds = common::read_commands(&mut stream).await;
        assert_eq!(cmds[0], vec!["GET", "durable-key"]);
        common::write_all(&mut stream, &common::bulk("survived")).await;

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
    config.reconnect_wait_interval = Duration::from_millis(10);

    let conn = Connection::new();
    let run_conn = conn.clone();
    let run_task = tokio::spawn(async move { run_conn.run(config, std::sync::Arc::new(NullLogger)).await });

    let mut req = Request::with_config(RequestConfig { cancel_on_connection_lost: false, ..Default::default() });
    req.push(&[&"GET", &"durable-key"]);

    let captured = CapturingAdapter::default();
    let n = tokio::time::timeout(Duration::from_secs(5), conn.exec(req, Box::new(captured.clone())))
        .await
        .expect("exec should complete once the reconnect delivers its reply")
        .expect("exec should succeed on the second connection");
    assert!(n > 0);
    assert_eq!(captured.0.lock().unwrap().as_deref(), Some(b"survived".as_slice()));

    conn.cancel(Operation::All);
    let _ = tokio::time::timeout(Duration::from_secs(1), run_task).await;
    let _ = server.await;
}
