//! Usage counters (C14, §6 "Observability", §1.2). Owned by the multiplexer,
//! never reset except by constructing a new connection.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub commands_sent: u64,
    pub bytes_sent: u64,
    pub responses_received: u64,
    pub response_bytes_received: u64,
    pub pushes_received: u64,
    pub push_bytes_received: u64,
    /// Bytes shifted by `ReadBuffer::consume` (called "bytes rotated" in §6).
    pub bytes_rotated: u64,
}

impl Usage {
    pub fn new() -> Self {
        Usage::default()
    }

    pub(crate) fn record_write(&mut self, commands: u64, bytes: u64) {
        self.commands_sent += commands;
        self.bytes_sent += bytes;
    }

    pub(crate) fn record_response(&mut self, bytes: u64) {
        self.responses_received += 1;
        self.response_bytes_received += bytes;
    }

    pub(crate) fn record_push(&mut self, bytes: u64) {
        self.pushes_received += 1;
        self.push_bytes_received += bytes;
    }

    pub(crate) fn record_rotate(&mut self, bytes: u64) {
        self.bytes_rotated += bytes;
    }
}
