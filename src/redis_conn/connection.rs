//! Run supervisor and public handle (C9, §4.9, §6 "External interface").
//!
//! `Connection` is the cheap, cloneable handle an embedder holds; `run` is the
//! single long-lived task that owns the transport, the multiplexer, and the
//! health checker, and drives them all from one `tokio::select!` loop. The
//! two communicate over the channels `Connection::new` wires up: an unbounded
//! queue for submitted execs, an unbounded queue for control messages
//! (cancellation, push-adapter installs), a capacity-one channel for pushes,
//! and a `watch` cell publishing `Usage` snapshots.
//!
//! Grounded in `boost::redis::connection_base::async_run`'s state machine
//! (resolve -> connect -> (tls) -> run -> wait -> resolve ...) and
//! `aedis::connection`'s split between a handle type and its `async_run`
//! task; the reader/writer interleaving follows the same source's
//! `async_read_some`/`async_write_some` pair.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot, watch, Mutex as AsyncMutex};

use crate::redis_conn::config::Config;
use crate::redis_conn::error::{Error, Result};
use crate::redis_conn::handshake;
use crate::redis_conn::health::{HealthChecker, HealthEvent};
use crate::redis_conn::logger::{LogLevel, SharedLogger};
use crate::redis_conn::multiplexer::{CancelExecOutcome, CommitReadOutcome, Multiplexer, Slot};
use crate::redis_conn::operation::{CancelKind, Operation};
use crate::redis_conn::resp3::adapter::{Adapter, IgnoreAdapter};
use crate::redis_conn::resp3::request::Request;
use crate::redis_conn::transport::{self, Transport};
use crate::redis_conn::usage::Usage;

/// One submitted pipeline, on its way from `Connection::exec` to the run
/// loop's multiplexer.
struct ExecMsg {
    id: u64,
    request: Request,
    adapter: Box<dyn Adapter>,
    completion: oneshot::Sender<Result<usize>>,
}

/// Out-of-band instructions the run loop services alongside submitted execs.
enum ControlMsg {
    Cancel(Operation),
    CancelExec(u64, CancelKind),
    SetPushAdapter(Box<dyn Adapter>),
}

/// The receiving ends `run` owns for the lifetime of the connection. Held
/// separately from `Inner` so `run` can take them out from behind the mutex
/// once and never touch it again.
struct RunReceivers {
    submit_rx: mpsc::UnboundedReceiver<ExecMsg>,
    control_rx: mpsc::UnboundedReceiver<ControlMsg>,
    push_tx: mpsc::Sender<Result<usize>>,
    usage_tx: watch::Sender<Usage>,
}

struct Inner {
    submit_tx: mpsc::UnboundedSender<ExecMsg>,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
    push_rx: AsyncMutex<mpsc::Receiver<Result<usize>>>,
    usage_rx: watch::Receiver<Usage>,
    will_reconnect: AtomicBool,
    next_id: AtomicU64,
    receivers: AsyncMutex<Option<RunReceivers>>,
}

/// A cheap, cloneable handle to a Redis connection (§3 "Connection handle").
/// Construct one with `Connection::new`, hand it to `run` (typically spawned
/// onto its own task), and use the handle's methods from anywhere else.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        let (submit_tx, submit_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (push_tx, push_rx) = mpsc::channel(1);
        let (usage_tx, usage_rx) = watch::channel(Usage::new());

        Connection {
            inner: Arc::new(Inner {
                submit_tx,
                control_tx,
                push_rx: AsyncMutex::new(push_rx),
                usage_rx,
                will_reconnect: AtomicBool::new(true),
                next_id: AtomicU64::new(1),
                receivers: AsyncMutex::new(Some(RunReceivers { submit_rx, control_rx, push_tx, usage_tx })),
            }),
        }
    }

    /// Submits a pipeline. The returned `ExecHandle` resolves to the total
    /// reply byte count once every command in the pipeline has a reply (§4.4,
    /// §7 "exec returns (ec, n)"); it can also be cancelled before then via
    /// `ExecHandle::cancel` (§4.10).
    ///
    /// Rejects the pipeline up front, without ever touching the run loop, if
    /// `adapter`'s `supported_response_size` doesn't match the number of
    /// replies `request` actually expects (§4.3's "used to assert
    /// request/response alignment before submission").
    pub fn exec(&self, request: Request, adapter: Box<dyn Adapter>) -> ExecHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        if adapter.supported_response_size() != request.expected_replies() {
            let _ = tx.send(Err(Error::adapter(crate::redis_conn::error::AdapterError::IncompatibleSize)));
            return ExecHandle { id, completion: rx, control_tx: self.inner.control_tx.clone() };
        }

        let msg = ExecMsg { id, request, adapter, completion: tx };
        // The run task only ever drops its receiving end when `run` returns;
        // a send failing here means the connection was never run (or already
        // finished) and the handle simply resolves to `not_connected` below.
        let _ = self.inner.submit_tx.send(msg);
        ExecHandle { id, completion: rx, control_tx: self.inner.control_tx.clone() }
    }

    /// Installs (or replaces) the adapter that unsolicited server pushes are
    /// routed through before `receive`/`try_receive` see them (§4.5, §6).
    pub fn set_receive_response(&self, adapter: Box<dyn Adapter>) {
        let _ = self.inner.control_tx.send(ControlMsg::SetPushAdapter(adapter));
    }

    /// Awaits the next push. Only one caller can usefully hold this at a
    /// time — the channel behind it has capacity one, so a second concurrent
    /// caller simply waits its turn (§5's deliberate backpressure point).
    pub async fn receive(&self) -> Result<usize> {
        let mut rx = self.inner.push_rx.lock().await;
        rx.recv().await.unwrap_or_else(|| Err(Error::not_connected()))
    }

    /// Non-blocking variant of `receive`: fails with `sync_receive_push_failed`
    /// if nothing is queued right now, or if another caller currently holds
    /// the receive lock (§6).
    pub fn try_receive(&self) -> Result<usize> {
        let mut rx = match self.inner.push_rx.try_lock() {
            Ok(rx) => rx,
            Err(_) => return Err(Error::sync_receive_push_failed()),
        };
        match rx.try_recv() {
            Ok(r) => r,
            Err(_) => Err(Error::sync_receive_push_failed()),
        }
    }

    /// Cancels every exec matching `op` (or, for `Operation::All`, tears the
    /// whole run loop down) (§4.10).
    pub fn cancel(&self, op: Operation) {
        let _ = self.inner.control_tx.send(ControlMsg::Cancel(op));
    }

    /// A snapshot of the counters `run` has accumulated so far. Lock-free:
    /// reads the latest value `run` published over a `watch` channel rather
    /// than sharing the multiplexer's own counters across tasks (§6).
    pub fn usage(&self) -> Usage {
        *self.inner.usage_rx.borrow()
    }

    /// Whether the run loop will attempt to reconnect the next time the
    /// connection drops. False once `reconnect_wait_interval` is zero or
    /// `cancel(Operation::Reconnection)` has been called (§4.9).
    pub fn will_reconnect(&self) -> bool {
        self.inner.will_reconnect.load(Ordering::Relaxed)
    }

    /// Drives the connection until it is cancelled or a non-reconnectable
    /// error occurs (§4.9's state machine). Spawn this onto its own task;
    /// the handle's other methods work from anywhere as long as one copy of
    /// `run` is alive somewhere. Calling this more than once per `Connection`
    /// (including clones) panics — there is exactly one run loop per
    /// underlying connection.
    pub async fn run(&self, config: Config, logger: SharedLogger) -> Result<()> {
        let receivers = {
            let mut guard = self.inner.receivers.lock().await;
            guard.take().expect("Connection::run must be called at most once")
        };
        run_loop(&self.inner.will_reconnect, config, logger, receivers).await
    }
}

/// A submitted pipeline in flight. Implements `Future<Output = Result<usize>>`
/// so `conn.exec(req, adapter).await` works directly; hang onto it instead if
/// you need `cancel` (§4.4, §4.10).
pub struct ExecHandle {
    id: u64,
    completion: oneshot::Receiver<Result<usize>>,
    control_tx: mpsc::UnboundedSender<ControlMsg>,
}

impl ExecHandle {
    /// Requests cancellation of this specific exec. A no-op if it has
    /// already completed, or (for `CancelKind::Total`) if its pipeline has
    /// already been written to the wire (§4.10).
    pub fn cancel(&self, kind: CancelKind) {
        let _ = self.control_tx.send(ControlMsg::CancelExec(self.id, kind));
    }
}

impl Future for ExecHandle {
    type Output = Result<usize>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.completion).poll(cx).map(|r| r.unwrap_or_else(|_| Err(Error::not_connected())))
    }
}

enum LoopExit {
    ConnLost(Error),
    CancelledRun,
    CancelledAll,
}

/// Outcome of one `connect` attempt when it doesn't simply succeed.
/// `CancelledRun` is retried subject to `will_reconnect`, the same as an
/// ordinary connect error; `CancelledAll` always aborts immediately,
/// matching `LoopExit::CancelledAll`'s handling once established.
enum ConnectFailure {
    Error(Error),
    CancelledRun,
    CancelledAll,
}

/// Applies one control message against the live connection state. Returns
/// `Some(exit)` if the message ends the current `run_established` pass.
fn apply_control_msg(
    msg: ControlMsg,
    mux: &mut Multiplexer,
    health: &mut HealthChecker,
    push_tx: &mpsc::Sender<Result<usize>>,
    will_reconnect: &AtomicBool,
) -> Option<LoopExit> {
    match msg {
        ControlMsg::Cancel(Operation::Exec) => {
            mux.cancel_waiting();
            None
        }
        ControlMsg::Cancel(Operation::Receive) => {
            let _ = push_tx.try_send(Err(Error::operation_aborted()));
            None
        }
        ControlMsg::Cancel(Operation::HealthCheck) => {
            health.disable();
            None
        }
        ControlMsg::Cancel(Operation::Reconnection) => {
            will_reconnect.store(false, Ordering::Relaxed);
            None
        }
        ControlMsg::Cancel(Operation::Resolve) => None, // only meaningful while connecting
        ControlMsg::Cancel(Operation::Run) => Some(LoopExit::CancelledRun),
        ControlMsg::Cancel(Operation::All) => {
            let _ = push_tx.try_send(Err(Error::operation_aborted()));
            Some(LoopExit::CancelledAll)
        }
        ControlMsg::CancelExec(id, kind) => {
            match mux.cancel_by_id(id, kind.forces_reconnect_when_written()) {
                CancelExecOutcome::RemovedWrittenNeedsReconnect => Some(LoopExit::ConnLost(Error::operation_aborted())),
                CancelExecOutcome::NotFound | CancelExecOutcome::Removed | CancelExecOutcome::Kept => None,
            }
        }
        ControlMsg::SetPushAdapter(adapter) => {
            mux.set_push_adapter(adapter);
            None
        }
    }
}

/// Writes every staged byte for one `prepare_write` batch, retrying on
/// partial writes until the socket is no longer ready.
async fn write_staged(transport: &mut Transport, mux: &Multiplexer) -> Result<()> {
    let mut buf = mux.staged_bytes();
    while !buf.is_empty() {
        transport.writable().await?;
        let n = transport.try_write(buf)?;
        if n > 0 {
            buf = &buf[n..];
        }
    }
    Ok(())
}

/// Reads until one top-level reply completes (a user reply or a push),
/// draining whatever the parser can already make of buffered bytes before
/// waiting on socket readiness again (§4.9's reader subroutine).
async fn read_one(transport: &mut Transport, mux: &mut Multiplexer) -> Result<CommitReadOutcome> {
    loop {
        match mux.commit_read()? {
            CommitReadOutcome::NeedMoreData => {}
            outcome => return Ok(outcome),
        }
        transport.readable().await?;
        let hint = mux.parser().suggested_buffer_growth(4096);
        let span = mux.read_buf_mut().prepare_append(hint)?;
        let n = transport.try_read(span)?;
        if n > 0 {
            mux.read_buf_mut().commit_append(n);
        }
    }
}

/// The `running` state (§4.9): one `tokio::select!` loop servicing the
/// writer, the reader, newly submitted execs, control messages, and the two
/// health-checker timers. Returns once the connection is lost, or the run
/// loop itself is cancelled.
async fn run_established(
    transport: &mut Transport,
    mux: &mut Multiplexer,
    health: &mut HealthChecker,
    receivers: &mut RunReceivers,
    will_reconnect: &AtomicBool,
    logger: &SharedLogger,
) -> LoopExit {
    let mut write_pending = true;

    loop {
        if write_pending {
            write_pending = false;
            loop {
                if mux.prepare_write() == 0 {
                    break;
                }
                if let Err(e) = write_staged(transport, mux).await {
                    return LoopExit::ConnLost(e);
                }
                mux.commit_write();
            }
        } else if transport.wants_write() {
            // Nothing new staged, but a prior partial TLS write left
            // ciphertext buffered; give it another chance to drain.
            if let Err(e) = transport.flush() {
                return LoopExit::ConnLost(e);
            }
        }

        let _ = receivers.usage_tx.send(mux.usage());

        tokio::select! {
            biased;

            result = read_one(transport, mux) => {
                match result {
                    Ok(CommitReadOutcome::Reply { .. }) => health.reset_deadline(),
                    Ok(CommitReadOutcome::Push { bytes }) => {
                        health.reset_deadline();
                        if receivers.push_tx.send(Ok(bytes)).await.is_err() {
                            logger.log(LogLevel::Trace, "push delivered with no receiver listening");
                        }
                    }
                    Ok(CommitReadOutcome::NeedMoreData) => {}
                    Err(e) => return LoopExit::ConnLost(e),
                }
            }

            Some(msg) = receivers.submit_rx.recv() => {
                if mux.add(Slot::new(msg.id, msg.request, msg.adapter, msg.completion)) {
                    write_pending = true;
                }
            }

            Some(msg) = receivers.control_rx.recv() => {
                if let Some(exit) = apply_control_msg(msg, mux, health, &receivers.push_tx, will_reconnect) {
                    return exit;
                }
                write_pending = true;
            }

            event = health.wait(), if health.enabled() => {
                match event {
                    HealthEvent::SendDue => {
                        let ping = health.build_ping();
                        let (tx, _rx) = oneshot::channel();
                        mux.add(Slot::new(0, ping, Box::new(IgnoreAdapter), tx));
                        health.mark_sent();
                        write_pending = true;
                    }
                    HealthEvent::PongTimedOut => return LoopExit::ConnLost(Error::pong_timeout()),
                }
            }
        }
    }
}

/// The `resolving`/`connecting`/`tls_handshaking` states (§4.9), collapsed
/// into one cancellable attempt since all three are cheap to retry together.
/// Submitted execs arriving during this window are either rejected
/// immediately (`cancel_if_not_connected`) or held until the attempt settles,
/// at which point they're handed to the multiplexer so `cancel_on_conn_lost`
/// decides their fate the same way it would for a drop mid-connection.
async fn connect(
    config: &Config,
    mux: &mut Multiplexer,
    health: &mut HealthChecker,
    receivers: &mut RunReceivers,
    will_reconnect: &AtomicBool,
) -> std::result::Result<Transport, ConnectFailure> {
    let hostname = config.addr.host.clone();
    let mut deferred: Vec<ExecMsg> = Vec::new();

    let attempt = async {
        let mut t = transport::open(config, &hostname).await?;
        handshake::perform(&mut t, config).await?;
        Ok(t)
    };
    tokio::pin!(attempt);

    let result = loop {
        tokio::select! {
            biased;

            res = &mut attempt => break res.map_err(ConnectFailure::Error),

            Some(msg) = receivers.control_rx.recv() => {
                match msg {
                    // Cancelling just the resolve/run attempt abandons this
                    // try but still respects `will_reconnect`, same as any
                    // other connect failure.
                    ControlMsg::Cancel(Operation::Resolve | Operation::Run) => {
                        break Err(ConnectFailure::CancelledRun);
                    }
                    ControlMsg::Cancel(Operation::All) => {
                        let _ = receivers.push_tx.try_send(Err(Error::operation_aborted()));
                        break Err(ConnectFailure::CancelledAll);
                    }
                    other => {
                        apply_control_msg(other, mux, health, &receivers.push_tx, will_reconnect);
                    }
                }
            }

            Some(msg) = receivers.submit_rx.recv() => {
                if msg.request.config.cancel_if_not_connected {
                    let _ = msg.completion.send(Err(Error::not_connected()));
                } else {
                    deferred.push(msg);
                }
            }
        }
    };

    for msg in deferred {
        mux.add(Slot::new(msg.id, msg.request, msg.adapter, msg.completion));
    }

    result
}

/// The full `resolving -> ... -> waiting_reconnect -> resolving ...` cycle
/// (§4.9). Returns once a non-reconnectable error is hit or the connection
/// (or the whole run) is cancelled by the user.
async fn run_loop(will_reconnect_flag: &AtomicBool, config: Config, logger: SharedLogger, mut receivers: RunReceivers) -> Result<()> {
    let mut mux = Multiplexer::new(config.max_read_size);
    let mut health = HealthChecker::new(config.health_check_interval, config.health_check_id.clone());

    will_reconnect_flag.store(!config.reconnect_wait_interval.is_zero(), Ordering::Relaxed);

    loop {
        logger.log(LogLevel::Debug, "connecting");

        let mut transport = match connect(&config, &mut mux, &mut health, &mut receivers, will_reconnect_flag).await {
            Ok(t) => t,
            Err(ConnectFailure::CancelledAll) => {
                mux.cancel_waiting();
                return Err(Error::operation_aborted());
            }
            Err(ConnectFailure::CancelledRun) => {
                if !will_reconnect_flag.load(Ordering::Relaxed) {
                    mux.cancel_waiting();
                    return Err(Error::operation_aborted());
                }
                tokio::time::sleep(config.reconnect_wait_interval).await;
                continue;
            }
            Err(ConnectFailure::Error(e)) => {
                logger.log(LogLevel::Warn, &format!("failed to connect: {}", e));
                mux.cancel_on_conn_lost();
                if !will_reconnect_flag.load(Ordering::Relaxed) {
                    mux.cancel_waiting();
                    return Err(e);
                }
                tokio::time::sleep(config.reconnect_wait_interval).await;
                continue;
            }
        };

        logger.log(LogLevel::Info, "connection established");
        health.on_connection_lost(); // arms fresh timers for the new connection

        let exit = run_established(&mut transport, &mut mux, &mut health, &mut receivers, will_reconnect_flag, &logger).await;
        mux.cancel_on_conn_lost();

        let will_reconnect = will_reconnect_flag.load(Ordering::Relaxed);
        match exit {
            LoopExit::ConnLost(e) => {
                logger.log(LogLevel::Warn, &format!("connection lost: {}", e));
                if !will_reconnect {
                    mux.cancel_waiting();
                    return Err(e);
                }
                tokio::time::sleep(config.reconnect_wait_interval).await;
            }
            LoopExit::CancelledRun => {
                if !will_reconnect {
                    mux.cancel_waiting();
                    return Err(Error::operation_aborted());
                }
                tokio::time::sleep(config.reconnect_wait_interval).await;
            }
            LoopExit::CancelledAll => {
                mux.cancel_waiting();
                return Err(Error::operation_aborted());
            }
        }
    }
}
