//! Adapter interface (C3, §4.3). The core treats adapters as opaque: it only
//! calls the three-event entry point and reads `supported_response_size` to
//! assert request/response alignment before submission.
//!
//! Out of scope per §1: "the many value-to/from-RESP3 adapters over
//! containers and user types". What follows is the minimal set needed to
//! exercise and test the engine, not a general serialization layer.

use bytes::Bytes;

use crate::redis_conn::error::{AdapterError, Error, Result};
use crate::redis_conn::resp3::node::{DataType, Node};

/// One of the three events driving an adapter for a single top-level reply.
/// The connection core never inspects adapter internals beyond this trait.
pub trait Adapter: Send {
    /// Number of top-level replies this adapter consumes across its
    /// lifetime; used to assert a pipeline's expected-reply count against
    /// the response object before the request is submitted.
    fn supported_response_size(&self) -> usize;

    /// Start of a top-level reply.
    fn on_init(&mut self) {}

    /// One node of the current reply. Adapters track which of the
    /// `supported_response_size` replies they're building internally (e.g.
    /// incrementing a counter in `on_done`) rather than being told directly.
    fn on_node(&mut self, node: &Node) -> Result<()>;

    /// End of a top-level reply.
    fn on_done(&mut self) {}
}

fn simple_error_text(node: &Node) -> String {
    String::from_utf8_lossy(&node.value).into_owned()
}

/// Checks whether a node is a server-reported error and, if so, turns it
/// into the matching `AdapterError` (§4.3, §7 "server errors on a user
/// pipeline are delivered via the response adapter").
fn check_server_error(node: &Node) -> Option<AdapterError> {
    match node.data_type {
        DataType::SimpleError => Some(AdapterError::Resp3SimpleError(simple_error_text(node))),
        DataType::BlobError => Some(AdapterError::Resp3BlobError(simple_error_text(node))),
        _ => None,
    }
}

/// Matches a request built entirely from `push_no_reply` (e.g. `SUBSCRIBE`):
/// its "reply" is a push, so the multiplexer pops and completes the slot at
/// write time without ever driving an adapter (§4.5 tie-break rule c). This
/// exists only so `exec` has something whose `supported_response_size` is 0
/// to assert against such a request's `expected_replies()` (§4.3); `on_node`
/// is never actually called for it.
#[derive(Debug, Default)]
pub struct NoReplyAdapter;

impl Adapter for NoReplyAdapter {
    fn supported_response_size(&self) -> usize {
        0
    }

    fn on_node(&mut self, _node: &Node) -> Result<()> {
        unreachable!("NoReplyAdapter is never driven: its request expects zero replies")
    }
}

/// Discards everything; used for commands whose reply nobody cares about
/// (e.g. `SET` in a pipeline where only the final `GET` matters).
#[derive(Debug, Default)]
pub struct IgnoreAdapter;

impl Adapter for IgnoreAdapter {
    fn supported_response_size(&self) -> usize {
        1
    }

    fn on_node(&mut self, node: &Node) -> Result<()> {
        if let Some(e) = check_server_error(node) {
            return Err(Error::adapter(e));
        }
        Ok(())
    }
}

/// Expects one leaf node of a simple/numeric/boolean/blob type and stores
/// its raw bytes, e.g. for `PING`'s echoed string or `SET`'s `+OK`.
#[derive(Debug, Default)]
pub struct StatusAdapter {
    pub value: Option<Bytes>,
}

impl Adapter for StatusAdapter {
    fn supported_response_size(&self) -> usize {
        1
    }

    fn on_node(&mut self, node: &Node) -> Result<()> {
        if let Some(e) = check_server_error(node) {
            return Err(Error::adapter(e));
        }
        match node.data_type {
            DataType::SimpleString | DataType::BlobString | DataType::VerbatimString => {
                self.value = Some(node.value.clone());
                Ok(())
            }
            DataType::Null => {
                self.value = None;
                Ok(())
            }
            _ if node.data_type.is_aggregate() => Err(Error::adapter(AdapterError::ExpectsSimpleType)),
            _ => Err(Error::adapter(AdapterError::ExpectsSimpleType)),
        }
    }
}

/// Expects one `Number` leaf.
#[derive(Debug, Default)]
pub struct IntAdapter {
    pub value: i64,
}

impl Adapter for IntAdapter {
    fn supported_response_size(&self) -> usize {
        1
    }

    fn on_node(&mut self, node: &Node) -> Result<()> {
        if let Some(e) = check_server_error(node) {
            return Err(Error::adapter(e));
        }
        match node.data_type {
            DataType::Number => {
                let s = std::str::from_utf8(&node.value).map_err(|_| Error::adapter(AdapterError::NotANumber))?;
                self.value = s.parse().map_err(|_| Error::adapter(AdapterError::NotANumber))?;
                Ok(())
            }
            DataType::BigNumber => {
                let s = std::str::from_utf8(&node.value).map_err(|_| Error::adapter(AdapterError::NotANumber))?;
                self.value = s.parse().map_err(|_| Error::adapter(AdapterError::NotANumber))?;
                Ok(())
            }
            _ => Err(Error::adapter(AdapterError::NotANumber)),
        }
    }
}

/// Expects one `Double` leaf.
#[derive(Debug, Default)]
pub struct DoubleAdapter {
    pub value: f64,
}

impl Adapter for DoubleAdapter {
    fn supported_response_size(&self) -> usize {
        1
    }

    fn on_node(&mut self, node: &Node) -> Result<()> {
        if let Some(e) = check_server_error(node) {
            return Err(Error::adapter(e));
        }
        if node.data_type != DataType::Double {
            return Err(Error::adapter(AdapterError::NotADouble));
        }
        let s = std::str::from_utf8(&node.value).map_err(|_| Error::adapter(AdapterError::NotADouble))?;
        self.value = match s {
            "inf" => f64::INFINITY,
            "-inf" => f64::NEG_INFINITY,
            _ => s.parse().map_err(|_| Error::adapter(AdapterError::NotADouble))?,
        };
        Ok(())
    }
}

/// Expects one `Boolean` leaf (`#t` / `#f`).
#[derive(Debug, Default)]
pub struct BoolAdapter {
    pub value: bool,
}

impl Adapter for BoolAdapter {
    fn supported_response_size(&self) -> usize {
        1
    }

    fn on_node(&mut self, node: &Node) -> Result<()> {
        if let Some(e) = check_server_error(node) {
            return Err(Error::adapter(e));
        }
        if node.data_type != DataType::Boolean {
            return Err(Error::adapter(AdapterError::NotABool));
        }
        self.value = match &node.value[..] {
            b"t" => true,
            b"f" => false,
            _ => return Err(Error::adapter(AdapterError::UnexpectedBoolValue)),
        };
        Ok(())
    }
}

/// Expects one blob-like leaf and stores its bytes; used for `GET` and
/// similar byte-string replies.
#[derive(Debug, Default)]
pub struct BytesAdapter {
    pub value: Option<Bytes>,
}

impl Adapter for BytesAdapter {
    fn supported_response_size(&self) -> usize {
        1
    }

    fn on_node(&mut self, node: &Node) -> Result<()> {
        if let Some(e) = check_server_error(node) {
            return Err(Error::adapter(e));
        }
        match node.data_type {
            DataType::BlobString | DataType::VerbatimString | DataType::SimpleString => {
                self.value = Some(node.value.clone());
                Ok(())
            }
            DataType::Null => {
                self.value = None;
                Ok(())
            }
            _ => Err(Error::adapter(AdapterError::ExpectsSimpleType)),
        }
    }
}

/// Drives a heterogeneous pair of adapters across a two-command pipeline,
/// e.g. `(IgnoreAdapter, IntAdapter)` for `SET k v` / `GET k` (§8 scenario 2).
pub struct TupleAdapter2<A, B> {
    pub first: A,
    pub second: B,
    next: usize,
}

impl<A, B> TupleAdapter2<A, B> {
    pub fn new(first: A, second: B) -> Self {
        TupleAdapter2 { first, second, next: 0 }
    }
}

impl<A: Adapter, B: Adapter> Adapter for TupleAdapter2<A, B> {
    fn supported_response_size(&self) -> usize {
        self.first.supported_response_size() + self.second.supported_response_size()
    }

    fn on_init(&mut self) {
        if self.next == 0 {
            self.first.on_init();
        } else {
            self.second.on_init();
        }
    }

    fn on_node(&mut self, node: &Node) -> Result<()> {
        if self.next == 0 {
            self.first.on_node(node)
        } else {
            self.second.on_node(node)
        }
    }

    fn on_done(&mut self) {
        if self.next == 0 {
            self.first.on_done();
        } else {
            self.second.on_done();
        }
        self.next += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis_conn::resp3::node::Node;

    #[test]
    fn int_adapter_parses_number() {
        let mut a = IntAdapter::default();
        a.on_init();
        a.on_node(&Node::leaf(DataType::Number, 0, Bytes::from_static(b"42"))).unwrap();
        a.on_done();
        assert_eq!(a.value, 42);
    }

    #[test]
    fn status_adapter_rejects_aggregate() {
        let mut a = StatusAdapter::default();
        let err = a.on_node(&Node::aggregate(DataType::Array, 0, 2)).unwrap_err();
        assert!(matches!(err.kind(), crate::redis_conn::error::ErrorKind::Adapter(AdapterError::ExpectsSimpleType)));
    }

    #[test]
    fn simple_error_is_surfaced_as_adapter_error() {
        let mut a = StatusAdapter::default();
        let err = a.on_node(&Node::leaf(DataType::SimpleError, 0, Bytes::from_static(b"WRONGTYPE bad"))).unwrap_err();
        assert!(matches!(err.kind(), crate::redis_conn::error::ErrorKind::Adapter(AdapterError::Resp3SimpleError(_))));
    }

    #[test]
    fn tuple_adapter_dispatches_in_order() {
        let mut t = TupleAdapter2::new(IgnoreAdapter, IntAdapter::default());
        t.on_init();
        t.on_node(&Node::leaf(DataType::SimpleString, 0, Bytes::from_static(b"OK"))).unwrap();
        t.on_done();
        t.on_init();
        t.on_node(&Node::leaf(DataType::Number, 0, Bytes::from_static(b"42"))).unwrap();
        t.on_done();
        assert_eq!(t.second.value, 42);
    }
}
