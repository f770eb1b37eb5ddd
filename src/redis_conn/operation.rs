//! Cancellation router (C10, §4.10).

/// An external cancel targets one of these operations, or `All` of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Resolve,
    Exec,
    Receive,
    HealthCheck,
    Reconnection,
    Run,
    All,
}

/// Per-`exec` cancellation strength (§4.10's "cancel type"). `Total` is a
/// no-op once a slot is `written`; `Partial` and `Terminal` both tear the
/// connection down because the parser cannot skip a reply mid-stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelKind {
    Total,
    Partial,
    Terminal,
}

impl CancelKind {
    pub(crate) fn forces_reconnect_when_written(self) -> bool {
        matches!(self, CancelKind::Partial | CancelKind::Terminal)
    }
}
