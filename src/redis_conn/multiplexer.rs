//! Multiplexer (C5, §4.5). Owns the FIFO of request slots, the write-staging
//! buffer, the read buffer (C1), and the parser (C2); decides, for every
//! completed top-level reply, whether it belongs to the front-of-queue
//! request or is a server push.
//!
//! Grounded in `aedis::connection_base`/`boost::redis::connection_base`'s
//! `reqs_` deque and `add_request_info`/`on_write`/`on_read` trio, adapted to
//! a single-owner model: no backlog `Mutex` around this queue, since nothing
//! else touches it concurrently — the run loop is its sole caller.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::redis_conn::error::{Error, ProtocolError, Result};
use crate::redis_conn::resp3::adapter::Adapter;
use crate::redis_conn::resp3::node::DataType;
use crate::redis_conn::resp3::parser::Parser;
use crate::redis_conn::resp3::read_buffer::ReadBuffer;
use crate::redis_conn::resp3::request::{Request, RequestConfig};
use crate::redis_conn::usage::Usage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    WaitingWrite,
    Staged,
    Written,
}

/// What `exec` completes with: whether the pipeline's replies all arrived
/// cleanly, and how many bytes they occupied (§7 "exec returns (ec, n)").
pub type ExecResult = Result<usize>;

/// The multiplexer's per-request tracking record (§3 "Request slot").
pub struct Slot {
    /// Assigned by the caller (the connection handle's own counter); used
    /// only to let an individual `exec` be cancelled by id, the multiplexer
    /// itself never generates or compares these beyond equality.
    id: u64,
    request: Request,
    adapter: Box<dyn Adapter>,
    pending_replies: usize,
    state: SlotState,
    bytes_read: usize,
    completion: Option<oneshot::Sender<ExecResult>>,
}

impl Slot {
    pub fn new(id: u64, request: Request, adapter: Box<dyn Adapter>, completion: oneshot::Sender<ExecResult>) -> Self {
        let pending_replies = request.expected_replies();
        Slot { id, request, adapter, pending_replies, state: SlotState::WaitingWrite, bytes_read: 0, completion }
    }

    pub fn config(&self) -> RequestConfig {
        self.request.config
    }

    fn fail(mut self, err: Error) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(Err(err));
        }
    }

    fn succeed(mut self) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(Ok(self.bytes_read));
        }
    }
}

/// Outcome of a per-exec cancel lookup (§4.10).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelExecOutcome {
    /// No slot with that id is outstanding (already completed, or never existed).
    NotFound,
    /// Removed cleanly; nothing else to do.
    Removed,
    /// A `terminal`/`partial` cancel on a `total` cancel request was ignored:
    /// the slot is `staged`/`written` and the cancel wasn't strong enough to
    /// remove it. It completes normally when its reply arrives.
    Kept,
    /// Removed a `staged`/`written` slot; the connection must be torn down
    /// and reconnected, since the server still owes bytes for this slot and
    /// the parser can't skip them mid-stream.
    RemovedWrittenNeedsReconnect,
}

/// Outcome of one `commit_read` call: either nothing new completed, a user
/// reply was routed and possibly finished its slot, or a push was routed (the
/// caller must then hand control to the push sink, per §4.5).
pub enum CommitReadOutcome {
    NeedMoreData,
    /// A reply byte-range was routed to a pending slot. `bytes` is that
    /// top-level reply's size, for usage accounting.
    Reply { bytes: usize },
    /// A reply was routed to the push sink. `bytes` is its size.
    Push { bytes: usize },
}

/// Queue of pending/in-flight requests, write-staging buffer, read buffer,
/// parser, and the optional push-sink adapter (C5, §4.5).
pub struct Multiplexer {
    queue: VecDeque<Slot>,
    write_buf: Vec<u8>,
    read_buf: ReadBuffer,
    parser: Parser,
    push_adapter: Option<Box<dyn Adapter>>,
    push_adapter_started: bool,
    usage: Usage,
}

impl Multiplexer {
    pub fn new(max_read_size: usize) -> Self {
        Multiplexer {
            queue: VecDeque::new(),
            write_buf: Vec::new(),
            read_buf: ReadBuffer::new(max_read_size),
            parser: Parser::new(),
            push_adapter: None,
            push_adapter_started: false,
            usage: Usage::new(),
        }
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn set_push_adapter(&mut self, adapter: Box<dyn Adapter>) {
        self.push_adapter = Some(adapter);
        self.push_adapter_started = false;
    }

    pub fn read_buf_mut(&mut self) -> &mut ReadBuffer {
        &mut self.read_buf
    }

    pub fn parser(&self) -> &Parser {
        &self.parser
    }

    pub fn has_pending_write(&self) -> bool {
        self.queue.iter().any(|s| s.state == SlotState::WaitingWrite)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Appends a slot at the tail, or — if `hello_with_priority` — rotates it
    /// to the head of the `waiting_write` partition (§4.5 tie-break rule a).
    /// Returns whether a write should be triggered: true iff no slot was
    /// already waiting to be written before this call, i.e. the writer isn't
    /// already due to wake up and pick this one up along with others.
    pub fn add(&mut self, slot: Slot) -> bool {
        let had_waiting = self.queue.iter().any(|s| s.state == SlotState::WaitingWrite);
        if slot.config().hello_with_priority {
            // Priority only reorders within the waiting-write partition: find
            // the first waiting_write slot (the head of that partition, or
            // the tail of the queue if there is none) and insert just before
            // it, so this request is written next. Among several priority
            // requests the most recently added sits frontmost.
            let insert_at = self.queue.iter().position(|s| s.state == SlotState::WaitingWrite).unwrap_or(self.queue.len());
            self.queue.insert(insert_at, slot);
        } else {
            self.queue.push_back(slot);
        }
        !had_waiting
    }

    /// Coalesces every `waiting_write` slot's payload into the staging
    /// buffer, marking them `staged`. Returns the byte count (0 = nothing to
    /// write).
    pub fn prepare_write(&mut self) -> usize {
        self.write_buf.clear();
        let mut commands = 0u64;
        for slot in self.queue.iter_mut() {
            if slot.state == SlotState::WaitingWrite {
                self.write_buf.extend_from_slice(slot.request.payload());
                commands += slot.request.expected_replies().max(1) as u64;
                slot.state = SlotState::Staged;
            }
        }
        if !self.write_buf.is_empty() {
            self.usage.record_write(commands, self.write_buf.len() as u64);
        }
        self.write_buf.len()
    }

    pub fn staged_bytes(&self) -> &[u8] {
        &self.write_buf
    }

    /// Promotes every `staged` slot to `written`, clearing the staging
    /// buffer. Zero-reply (`push_no_reply`) requests are popped immediately:
    /// their "response" is a push, so they have nothing left to wait for
    /// (§4.5 tie-break rule c).
    pub fn commit_write(&mut self) {
        self.write_buf.clear();
        let mut i = 0;
        while i < self.queue.len() {
            let is_staged = self.queue[i].state == SlotState::Staged;
            if is_staged {
                if self.queue[i].pending_replies == 0 {
                    let slot = self.queue.remove(i).unwrap();
                    slot.succeed();
                    continue;
                }
                self.queue[i].state = SlotState::Written;
            }
            i += 1;
        }
    }

    /// Feeds newly-read bytes (already committed into `read_buf`) to the
    /// parser and routes at most one completed top-level reply (§4.5).
    pub fn commit_read(&mut self) -> Result<CommitReadOutcome> {
        let view = self.read_buf.committed_view();
        let adv = self.parser.advance(view)?;
        self.read_buf.consume(adv.consumed);
        self.usage.record_rotate(adv.consumed as u64);

        if !adv.complete {
            return Ok(CommitReadOutcome::NeedMoreData);
        }

        let nodes = self.parser.take_nodes();
        let bytes = nodes.iter().map(|n| n.value.len()).sum::<usize>().max(adv.consumed);
        let is_push_type = nodes.first().map(|n| n.data_type == DataType::Push).unwrap_or(false);

        // A reply is a push if its wire type says so, or if there is no slot
        // awaiting a reply to attribute it to (front-of-queue has zero
        // pending replies, or the queue is empty) — both rules merged, since
        // either alone misses cases the other catches.
        let front_has_no_pending = self.queue.front().map(|s| s.pending_replies == 0).unwrap_or(true);
        let is_push = is_push_type || front_has_no_pending;

        if is_push {
            self.usage.record_push(bytes as u64);
            self.drive_push_adapter(&nodes)?;
            return Ok(CommitReadOutcome::Push { bytes });
        }

        self.usage.record_response(bytes as u64);
        self.drive_front_slot(nodes)?;
        Ok(CommitReadOutcome::Reply { bytes })
    }

    fn drive_push_adapter(&mut self, nodes: &[crate::redis_conn::resp3::node::Node]) -> Result<()> {
        let adapter = match &mut self.push_adapter {
            Some(a) => a,
            None => return Ok(()), // no sink installed yet; drop the push
        };
        adapter.on_init();
        let mut first_err = None;
        for node in nodes {
            if let Err(e) = adapter.on_node(node) {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        adapter.on_done();
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn drive_front_slot(&mut self, nodes: Vec<crate::redis_conn::resp3::node::Node>) -> Result<()> {
        let bytes: usize = nodes.iter().map(|n| n.value.len()).sum();
        let front = match self.queue.front_mut() {
            Some(s) => s,
            None => return Err(Error::protocol(ProtocolError::MissingReply)),
        };

        front.adapter.on_init();
        let mut first_err = None;
        for node in &nodes {
            if let Err(e) = front.adapter.on_node(node) {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        front.adapter.on_done();
        front.bytes_read += bytes.max(1);
        front.pending_replies = front.pending_replies.saturating_sub(1);

        if let Some(e) = first_err {
            let slot = self.queue.pop_front().unwrap();
            slot.fail(e);
            return Ok(());
        }

        if front.pending_replies == 0 {
            let slot = self.queue.pop_front().unwrap();
            slot.succeed();
        }
        Ok(())
    }

    /// Removes and fails every `waiting_write` slot with `operation_aborted`
    /// (§4.5, C10 `cancel(exec)`).
    pub fn cancel_waiting(&mut self) {
        let mut i = 0;
        while i < self.queue.len() {
            if self.queue[i].state == SlotState::WaitingWrite {
                let slot = self.queue.remove(i).unwrap();
                slot.fail(Error::operation_aborted());
            } else {
                i += 1;
            }
        }
    }

    /// On connection loss, decides the fate of every outstanding slot
    /// (§4.5): kept slots are reset to `waiting_write` so they're re-sent
    /// after reconnect, in their original relative order.
    pub fn cancel_on_conn_lost(&mut self) {
        let mut i = 0;
        while i < self.queue.len() {
            let (written, cancel_on_lost, cancel_if_unresponded) = {
                let s = &self.queue[i];
                (s.state == SlotState::Written, s.config().cancel_on_connection_lost, s.config().cancel_if_unresponded)
            };
            let keep = if written && !cancel_if_unresponded {
                true
            } else {
                !cancel_on_lost
            };
            if keep {
                self.queue[i].state = SlotState::WaitingWrite;
                i += 1;
            } else {
                let slot = self.queue.remove(i).unwrap();
                slot.fail(Error::operation_aborted());
            }
        }
    }

    /// Per-operation cancel of an individual exec (§4.10), looked up by the
    /// id the caller attached to it at submission time. `waiting_write`
    /// slots are always removed and failed immediately, with no further
    /// consequence. `staged`/`written` slots are only removed if `terminal`
    /// (a `partial`/`terminal` cancel) — and removing one of those forces the
    /// connection down: the parser can't skip a reply mid-stream, so the byte
    /// range the server still owes this slot would otherwise be misrouted to
    /// whatever request ends up at the front of the queue next. The caller
    /// must tear the connection down whenever this returns
    /// `RemovedWrittenNeedsReconnect`.
    pub fn cancel_by_id(&mut self, id: u64, terminal: bool) -> CancelExecOutcome {
        let index = match self.queue.iter().position(|s| s.id == id) {
            Some(i) => i,
            None => return CancelExecOutcome::NotFound,
        };
        match self.queue[index].state {
            SlotState::WaitingWrite => {
                let slot = self.queue.remove(index).unwrap();
                slot.fail(Error::operation_aborted());
                CancelExecOutcome::Removed
            }
            SlotState::Staged | SlotState::Written => {
                if terminal {
                    let slot = self.queue.remove(index).unwrap();
                    slot.fail(Error::operation_aborted());
                    CancelExecOutcome::RemovedWrittenNeedsReconnect
                } else {
                    CancelExecOutcome::Kept
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis_conn::resp3::adapter::IgnoreAdapter;
    use crate::redis_conn::resp3::request::Request;

    fn slot_with(mut req: Request) -> (Slot, oneshot::Receiver<ExecResult>) {
        req.push(&[&"PING"]);
        let (tx, rx) = oneshot::channel();
        (Slot::new(0, req, Box::new(IgnoreAdapter), tx), rx)
    }

    #[test]
    fn add_triggers_write_only_when_nothing_in_flight() {
        let mut m = Multiplexer::new(usize::MAX);
        let (s1, _r1) = slot_with(Request::new());
        assert!(m.add(s1));
        let (s2, _r2) = slot_with(Request::new());
        assert!(!m.add(s2));
    }

    #[test]
    fn hello_priority_rotates_within_waiting_partition_only() {
        let mut m = Multiplexer::new(usize::MAX);
        let mut non_priority = Request::new();
        non_priority.config.hello_with_priority = false;
        let (mut x, _rx) = slot_with(non_priority);
        x.state = SlotState::WaitingWrite;
        m.add(x);

        let (y, _ry) = slot_with(Request::new()); // default hello_with_priority = true
        m.add(y);

        assert_eq!(m.queue[0].config().hello_with_priority, true);
        assert_eq!(m.queue[1].config().hello_with_priority, false);
    }

    #[test]
    fn cancel_waiting_fails_pending_slots() {
        let mut m = Multiplexer::new(usize::MAX);
        let (s, rx) = slot_with(Request::new());
        m.add(s);
        m.cancel_waiting();
        let result = rx.try_recv();
        assert!(matches!(result, Ok(Err(_))));
    }

    #[test]
    fn commit_write_pops_zero_reply_requests() {
        let mut m = Multiplexer::new(usize::MAX);
        let mut req = Request::new();
        req.push_no_reply(&[&"SUBSCRIBE", &"ch"]);
        let (tx, rx) = oneshot::channel();
        let slot = Slot::new(0, req, Box::new(IgnoreAdapter), tx);
        m.add(slot);
        m.prepare_write();
        m.commit_write();
        assert!(m.is_empty());
        assert!(matches!(rx.try_recv(), Ok(Ok(_))));
    }
}
