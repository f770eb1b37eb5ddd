//! End-to-end scenario 5 (§8): terminally cancelling an exec whose pipeline
//! has already been written tears the connection down, since the parser
//! cannot skip a reply mid-stream for a slot that no longer exists (§4.10).

mod common;

use std::time::Duration;

use redis_conn::resp3::adapter::StatusAdapter;
use redis_conn::{CancelKind, Config, Connection, ErrorKind, NullLogger, Request};

#[tokio::test]
async fn terminal_cancel_of_a_written_exec_tears_down_the_connection() {
    let (listener, addr) = common::bind_loopback().await;
    let (seen_tx, seen_rx) = tokio::sync::oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");

        let cmds = common::read_commands(&mut stream).await;
        assert_eq!(cmds[0][0], "HELLO");
        common::write_all(&mut stream, &common::simple("OK")).await;

        // Once this returns, the engine has already committed the write and
        // marked the slot `written` — it never sends a reply, so the only
        // way the exec resolves is via cancellation.
        let cmds = common::read_commands(&mut stream).await;
        assert_eq!(cmds[0], vec!["GET", "slow-key"]);
        let _ = seen_tx.send(());

        // Hold the socket open long enough for the cancel/reconnect to run;
        // the client side tears the transport down on its own.
        tokio::time::sleep(Duration::from_secs(2)).await;
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
    req.push(&[&"GET", &"slow-key"]);
    let handle = conn.exec(req, Box::new(StatusAdapter::default()));

    tokio::time::timeout(Duration::from_secs(2), seen_rx).await.expect("server should see the write in time").unwrap();

    handle.cancel(CancelKind::Terminal);

    let exec_result = tokio::time::timeout(Duration::from_secs(1), handle).await.expect("exec should resolve promptly");
    assert!(exec_result.is_err(), "a terminally-cancelled written exec must fail, not hang or succeed");

    let run_result = tokio::time::timeout(Duration::from_secs(1), run_task)
        .await
        .expect("run should exit promptly")
        .expect("run task should not panic");
    let err = run_result.expect_err("run should end with a transport/aborted error once the connection is torn down");
    assert!(
        matches!(err.kind(), ErrorKind::Lifecycle(_) | ErrorKind::Transport(_)),
        "unexpected error kind: {:?}",
        err.kind()
    );

    let _ = server.await;
}
