//! RESP3 parser (C2, §4.2). Turns bytes into top-level messages, each a tree
//! of `Node`s. Grounded in `aedis::resp::parser`'s approach: a stack of small
//! pending-children counters rather than a recursive descent, so a short
//! read just leaves the stack as-is and the next `advance` call resumes.

use bytes::Bytes;
use memchr::memchr;

use crate::redis_conn::error::{Error, ProtocolError, Result};
use crate::redis_conn::resp3::node::{DataType, Node};

#[derive(Debug, Clone, Copy)]
enum Frame {
    /// Pending child count for an open aggregate (or 1 for "waiting on the
    /// single top-level item").
    Counted(usize),
    /// Open streamed string (`$?`): closes explicitly on a zero-length chunk,
    /// not by counting down.
    Streaming,
}

#[derive(Debug, Clone, Copy)]
struct PendingBulk {
    data_type: DataType,
    length: usize,
    /// True if this bulk is a streamed-string chunk (doesn't occupy a parent
    /// slot, and a zero length closes the stream instead of emitting a node).
    streamed_chunk: bool,
}

/// Incremental RESP3 parser. One instance per connection; `advance` is
/// called repeatedly as bytes arrive.
pub struct Parser {
    stack: Vec<Frame>,
    pending_bulk: Option<PendingBulk>,
    pending_nodes: Vec<Node>,
}

/// Result of one `advance` call.
pub struct Advance {
    /// Bytes consumed from the input this call.
    pub consumed: usize,
    /// True if a full top-level reply was completed during this call. When
    /// true, `take_nodes()` returns that reply's nodes.
    pub complete: bool,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Parser { stack: vec![Frame::Counted(1)], pending_bulk: None, pending_nodes: Vec::new() }
    }

    /// True between messages (nothing buffered, not mid-bulk). Mirrors
    /// `aedis::resp::parser::done`.
    pub fn done(&self) -> bool {
        self.pending_bulk.is_none() && self.stack.len() == 1 && matches!(self.stack[0], Frame::Counted(1))
    }

    /// Suggested size for the next socket read, informed by any in-progress
    /// bulk length (§4.2).
    pub fn suggested_buffer_growth(&self, hint: usize) -> usize {
        match self.pending_bulk {
            Some(p) => (p.length + 2).max(hint),
            None => hint,
        }
    }

    /// Takes ownership of the nodes accumulated for the reply that just
    /// completed. Call only after `advance` returns `complete = true`.
    pub fn take_nodes(&mut self) -> Vec<Node> {
        std::mem::take(&mut self.pending_nodes)
    }

    fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// Consumes as much of `buf` as it can, appending nodes to
    /// `self.pending_nodes`. Stops either because `buf` is exhausted (needs
    /// more bytes) or because a top-level reply just completed.
    pub fn advance(&mut self, buf: &[u8]) -> Result<Advance> {
        let mut pos = 0usize;

        loop {
            if let Some(pending) = self.pending_bulk {
                let need = pending.length + 2;
                if buf.len() - pos < need {
                    break;
                }
                let body = &buf[pos..pos + pending.length];
                let terminator = &buf[pos + pending.length..pos + need];
                if terminator != b"\r\n" {
                    return Err(Error::protocol(ProtocolError::Unterminated));
                }
                pos += need;
                self.pending_bulk = None;

                if pending.streamed_chunk {
                    if pending.length == 0 {
                        // ";0\r\n" closes the streamed string.
                        self.pop_streaming_frame();
                    } else {
                        self.pending_nodes.push(Node::leaf(
                            DataType::StreamedStringPart,
                            self.depth(),
                            Bytes::copy_from_slice(body),
                        ));
                    }
                } else {
                    self.decrement_top();
                    self.pending_nodes.push(Node::leaf(pending.data_type, self.depth(), Bytes::copy_from_slice(body)));
                }

                if self.close_finished_aggregates() {
                    return Ok(Advance { consumed: pos, complete: true });
                }
                continue;
            }

            if pos >= buf.len() {
                break;
            }

            let streaming = matches!(self.stack.last(), Some(Frame::Streaming));
            let type_byte = buf[pos];

            if streaming {
                if type_byte != b';' {
                    return Err(Error::protocol(ProtocolError::InvalidType(type_byte)));
                }
                let (line, line_len) = match find_line(&buf[pos..]) {
                    Some(v) => v,
                    None => break,
                };
                let length = parse_length(&line[1..])?;
                pos += line_len;
                // Hand off to the pending_bulk branch at the top of the loop,
                // whether or not the body bytes are fully available yet.
                self.pending_bulk = Some(PendingBulk { data_type: DataType::StreamedStringPart, length, streamed_chunk: true });
                continue;
            }

            match type_byte {
                b'*' | b'>' | b'~' | b'%' | b'|' => {
                    let (line, line_len) = match find_line(&buf[pos..]) {
                        Some(v) => v,
                        None => break,
                    };
                    let count = parse_length(&line[1..])?;
                    let data_type = match type_byte {
                        b'*' => DataType::Array,
                        b'>' => DataType::Push,
                        b'~' => DataType::Set,
                        b'%' => DataType::Map,
                        b'|' => DataType::Attribute,
                        _ => unreachable!(),
                    };
                    let mult = if matches!(data_type, DataType::Map | DataType::Attribute) { 2 } else { 1 };
                    pos += line_len;

                    self.pending_nodes.push(Node::aggregate(data_type, self.depth(), count));
                    if count > 0 {
                        // The parent slot this aggregate occupies is only
                        // consumed once its own children are exhausted (see
                        // `close_finished_aggregates`), mirroring
                        // `aedis::resp::parser::on_array_impl`.
                        self.stack.push(Frame::Counted(count * mult));
                    } else {
                        self.decrement_top();
                    }
                    if self.close_finished_aggregates() {
                        return Ok(Advance { consumed: pos, complete: true });
                    }
                }
                b'_' => {
                    let (_, line_len) = match find_line(&buf[pos..]) {
                        Some(v) => v,
                        None => break,
                    };
                    pos += line_len;
                    self.decrement_top();
                    self.pending_nodes.push(Node::leaf(DataType::Null, self.depth(), Bytes::new()));
                    if self.close_finished_aggregates() {
                        return Ok(Advance { consumed: pos, complete: true });
                    }
                }
                b'+' | b'-' | b':' | b',' | b'#' | b'(' => {
                    let (line, line_len) = match find_line(&buf[pos..]) {
                        Some(v) => v,
                        None => break,
                    };
                    let data_type = match type_byte {
                        b'+' => DataType::SimpleString,
                        b'-' => DataType::SimpleError,
                        b':' => DataType::Number,
                        b',' => DataType::Double,
                        b'#' => DataType::Boolean,
                        b'(' => DataType::BigNumber,
                        _ => unreachable!(),
                    };
                    let value = &line[1..];
                    pos += line_len;
                    self.decrement_top();
                    self.pending_nodes.push(Node::leaf(data_type, self.depth(), Bytes::copy_from_slice(value)));
                    if self.close_finished_aggregates() {
                        return Ok(Advance { consumed: pos, complete: true });
                    }
                }
                b'$' | b'=' | b'!' => {
                    let (line, line_len) = match find_line(&buf[pos..]) {
                        Some(v) => v,
                        None => break,
                    };
                    if type_byte == b'$' && line.len() >= 2 && line[1] == b'?' {
                        // Streamed blob string: open a synthetic container.
                        // Its parent slot is consumed when the stream closes
                        // (see `pop_streaming_frame`), not here.
                        pos += line_len;
                        self.pending_nodes.push(Node::aggregate(DataType::BlobString, self.depth(), 0));
                        self.stack.push(Frame::Streaming);
                        continue;
                    }

                    let length = parse_length(&line[1..])?;
                    let data_type = match type_byte {
                        b'$' => DataType::BlobString,
                        b'=' => DataType::VerbatimString,
                        b'!' => DataType::BlobError,
                        _ => unreachable!(),
                    };
                    pos += line_len;
                    self.pending_bulk = Some(PendingBulk { data_type, length, streamed_chunk: false });
                }
                other => return Err(Error::protocol(ProtocolError::InvalidType(other))),
            }
        }

        Ok(Advance { consumed: pos, complete: false })
    }

    fn decrement_top(&mut self) {
        if let Some(Frame::Counted(n)) = self.stack.last_mut() {
            *n -= 1;
        }
    }

    fn pop_streaming_frame(&mut self) {
        debug_assert!(matches!(self.stack.last(), Some(Frame::Streaming)));
        self.stack.pop();
        self.decrement_top();
    }

    /// Pops every exhausted `Counted(0)` frame from the top of the stack. If
    /// the stack becomes empty (the top-level item itself completed), resets
    /// it to await the next message and returns true.
    fn close_finished_aggregates(&mut self) -> bool {
        loop {
            match self.stack.last() {
                Some(Frame::Counted(0)) => {
                    self.stack.pop();
                    self.decrement_top();
                }
                _ => break,
            }
        }
        if self.stack.is_empty() {
            self.stack.push(Frame::Counted(1));
            true
        } else {
            false
        }
    }
}

/// Finds a `\r\n`-terminated line at the start of `buf`, returning
/// `(line_without_crlf, total_len_including_crlf)`. `None` if incomplete.
fn find_line(buf: &[u8]) -> Option<(&[u8], usize)> {
    let nl = memchr(b'\n', buf)?;
    if nl == 0 || buf[nl - 1] != b'\r' {
        return None;
    }
    Some((&buf[..nl - 1], nl + 1))
}

fn parse_length(digits: &[u8]) -> Result<usize> {
    if digits.is_empty() {
        return Err(Error::protocol(ProtocolError::EmptyField));
    }
    let s = std::str::from_utf8(digits).map_err(|_| Error::protocol(ProtocolError::MalformedLength))?;
    s.parse::<usize>().map_err(|_| Error::protocol(ProtocolError::MalformedLength))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &[u8]) -> Vec<Node> {
        let mut parser = Parser::new();
        let mut out = Vec::new();
        let mut buf = input;
        while !buf.is_empty() {
            let adv = parser.advance(buf).unwrap();
            buf = &buf[adv.consumed..];
            if adv.complete {
                out.extend(parser.take_nodes());
            }
            if adv.consumed == 0 {
                break;
            }
        }
        out
    }

    #[test]
    fn simple_string() {
        let nodes = parse_all(b"+OK\r\n");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].data_type, DataType::SimpleString);
        assert_eq!(&nodes[0].value[..], b"OK");
    }

    #[test]
    fn nested_array() {
        let nodes = parse_all(b"*2\r\n+hello\r\n+world\r\n");
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].data_type, DataType::Array);
        assert_eq!(nodes[0].aggregate_size, 2);
        assert_eq!(&nodes[1].value[..], b"hello");
        assert_eq!(&nodes[2].value[..], b"world");
    }

    #[test]
    fn short_reads_match_whole_payload() {
        let input = b"*2\r\n+hello\r\n+world\r\n";
        let whole = parse_all(input);

        let mut parser = Parser::new();
        let mut out = Vec::new();
        for i in 0..input.len() {
            let adv = parser.advance(&input[i..i + 1]).unwrap();
            if adv.complete {
                out.extend(parser.take_nodes());
            }
        }
        assert_eq!(whole.len(), out.len());
        for (a, b) in whole.iter().zip(out.iter()) {
            assert_eq!(a.data_type, b.data_type);
            assert_eq!(&a.value[..], &b.value[..]);
        }
    }

    #[test]
    fn empty_array() {
        let nodes = parse_all(b"*0\r\n");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].aggregate_size, 0);
    }

    #[test]
    fn null_leaf() {
        let nodes = parse_all(b"_\r\n");
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].data_type, DataType::Null);
    }

    #[test]
    fn blob_string_with_embedded_crlf() {
        let nodes = parse_all(b"$6\r\nhe\r\nlo\r\n");
        assert_eq!(nodes.len(), 1);
        assert_eq!(&nodes[0].value[..], b"he\r\nlo");
    }

    #[test]
    fn streamed_string() {
        let nodes = parse_all(b"$?\r\n;4\r\nHell\r\n;1\r\no\r\n;0\r\n");
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].data_type, DataType::BlobString);
        assert_eq!(nodes[1].data_type, DataType::StreamedStringPart);
        assert_eq!(&nodes[1].value[..], b"Hell");
        assert_eq!(&nodes[2].value[..], b"o");
    }

    #[test]
    fn push_type() {
        let nodes = parse_all(b">3\r\n+message\r\n+ch\r\n+payload\r\n");
        assert_eq!(nodes[0].data_type, DataType::Push);
    }

    #[test]
    fn map_doubles_count() {
        let nodes = parse_all(b"%1\r\n+k\r\n:1\r\n");
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0].data_type, DataType::Map);
    }
}
