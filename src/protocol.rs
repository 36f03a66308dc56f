/*!
 * RESP Protocol Implementation
 *
 * This module implements the client side of the Redis Serialization Protocol
 * (RESP): encoding commands as arrays of bulk strings, decoding the replies a
 * server sends back, and the matching reply encoders used by test servers.
 * Every decoder here is incremental: it reports an incomplete buffer instead
 * of failing, so callers can keep reading from the socket and retry.
 */

use crate::error::ProtocolError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::borrow::Cow;
use std::fmt;

type Result<T> = std::result::Result<T, ProtocolError>;

/// Largest bulk string the decoders will accept (512 MiB, the Redis default)
pub const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Longest status or error line accepted in a reply (64 KiB)
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Deepest array nesting accepted in a reply
pub const MAX_DEPTH: usize = 32;

/// Commands the client knows how to build and interpret
///
/// Each variant carries its arguments as raw bytes so binary keys and values
/// pass through untouched. `Raw` carries anything else verbatim, operation
/// name included.
#[derive(Debug, Clone, PartialEq)]
pub enum Cmd {
    /// PING [message] - test server connectivity
    Ping(Option<Bytes>),
    /// ECHO message - server returns the message as a bulk string
    Echo(Bytes),
    /// SET key value - set a key-value pair
    Set(Bytes, Bytes),
    /// GET key - retrieve value for a key
    Get(Bytes),
    /// DEL key [key ...] - delete keys
    Del(Vec<Bytes>),
    /// EXISTS key [key ...] - count existing keys
    Exists(Vec<Bytes>),
    /// EXPIRE key seconds - set a time to live
    Expire(Bytes, i64),
    /// TTL key - remaining time to live in seconds
    Ttl(Bytes),
    /// INFO - server statistics as a bulk string
    Info,
    /// Any other command, sent as given
    Raw(Vec<Bytes>),
}

impl Cmd {
    /// Build a command from its wire arguments
    ///
    /// Known operation names are matched case-insensitively. Anything that
    /// does not match a known name with the expected arity stays `Raw`, so the
    /// server gets to report the problem.
    pub fn from_args(items: Vec<Bytes>) -> Cmd {
        if items.is_empty() {
            return Cmd::Raw(items);
        }
        let name = &items[0];

        if name.eq_ignore_ascii_case(b"PING") && items.len() <= 2 {
            Cmd::Ping(items.get(1).cloned())
        } else if name.eq_ignore_ascii_case(b"ECHO") && items.len() == 2 {
            Cmd::Echo(items[1].clone())
        } else if name.eq_ignore_ascii_case(b"SET") && items.len() == 3 {
            Cmd::Set(items[1].clone(), items[2].clone())
        } else if name.eq_ignore_ascii_case(b"GET") && items.len() == 2 {
            Cmd::Get(items[1].clone())
        } else if name.eq_ignore_ascii_case(b"DEL") && items.len() >= 2 {
            Cmd::Del(items[1..].to_vec())
        } else if name.eq_ignore_ascii_case(b"EXISTS") && items.len() >= 2 {
            Cmd::Exists(items[1..].to_vec())
        } else if name.eq_ignore_ascii_case(b"EXPIRE") && items.len() == 3 {
            match std::str::from_utf8(&items[2]).ok().and_then(|s| s.parse::<i64>().ok()) {
                Some(secs) => Cmd::Expire(items[1].clone(), secs),
                None => Cmd::Raw(items),
            }
        } else if name.eq_ignore_ascii_case(b"TTL") && items.len() == 2 {
            Cmd::Ttl(items[1].clone())
        } else if name.eq_ignore_ascii_case(b"INFO") && items.len() == 1 {
            Cmd::Info
        } else {
            Cmd::Raw(items)
        }
    }

    /// Operation name as sent on the wire
    pub fn name(&self) -> Cow<'_, str> {
        match self {
            Cmd::Ping(_) => "PING".into(),
            Cmd::Echo(_) => "ECHO".into(),
            Cmd::Set(..) => "SET".into(),
            Cmd::Get(_) => "GET".into(),
            Cmd::Del(_) => "DEL".into(),
            Cmd::Exists(_) => "EXISTS".into(),
            Cmd::Expire(..) => "EXPIRE".into(),
            Cmd::Ttl(_) => "TTL".into(),
            Cmd::Info => "INFO".into(),
            Cmd::Raw(items) => match items.first() {
                Some(name) => String::from_utf8_lossy(name),
                None => "".into(),
            },
        }
    }

    /// Full argument list, operation name first
    pub fn args(&self) -> Vec<Bytes> {
        let mut out = Vec::with_capacity(3);
        if !matches!(self, Cmd::Raw(_)) {
            out.push(Bytes::copy_from_slice(self.name().as_bytes()));
        }
        match self {
            Cmd::Ping(msg) => out.extend(msg.iter().cloned()),
            Cmd::Echo(msg) => out.push(msg.clone()),
            Cmd::Set(k, v) => {
                out.push(k.clone());
                out.push(v.clone());
            }
            Cmd::Get(k) | Cmd::Ttl(k) => out.push(k.clone()),
            Cmd::Del(keys) | Cmd::Exists(keys) => out.extend(keys.iter().cloned()),
            Cmd::Expire(k, secs) => {
                out.push(k.clone());
                out.push(Bytes::from(secs.to_string()));
            }
            Cmd::Info => {}
            Cmd::Raw(items) => out.extend(items.iter().cloned()),
        }
        out
    }

    /// Append the encoded command to `out`
    pub fn write_to(&self, out: &mut BytesMut) {
        write_command(&self.args(), out);
    }

    /// Encode the command into a standalone buffer
    pub fn encode(&self) -> Vec<u8> {
        encode_command(&self.args())
    }
}

/// A decoded server reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+<text>` status reply, e.g. PONG or OK
    Simple(String),
    /// `-<message>` error reply
    Error(String),
    /// `:<n>` integer reply
    Integer(i64),
    /// `$<len>` bulk string; `None` for the null bulk `$-1`
    Bulk(Option<Bytes>),
    /// `*<n>` array of replies; `None` for the null array `*-1`
    Array(Option<Vec<Reply>>),
}

impl Reply {
    /// Bulk reply holding a copy of `b`
    pub fn bulk(b: impl AsRef<[u8]>) -> Reply {
        Reply::Bulk(Some(Bytes::copy_from_slice(b.as_ref())))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Reply::Error(_))
    }

    /// Append the wire form of this reply to `out`
    pub fn write_to(&self, out: &mut BytesMut) {
        match self {
            Reply::Simple(s) => write_simple(s, out),
            Reply::Error(e) => write_line(b'-', e.as_bytes(), out),
            Reply::Integer(i) => write_integer(*i, out),
            Reply::Bulk(Some(b)) => write_bulk(b, out),
            Reply::Bulk(None) => write_null(out),
            Reply::Array(None) => out.put_slice(b"*-1\r\n"),
            Reply::Array(Some(items)) => {
                write_array_len(items.len(), out);
                for item in items {
                    item.write_to(out);
                }
            }
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = BytesMut::new();
        self.write_to(&mut out);
        out.to_vec()
    }
}

/// Formats replies the way redis-cli prints them
impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Simple(s) => f.write_str(s),
            Reply::Error(e) => write!(f, "(error) {}", e),
            Reply::Integer(i) => write!(f, "(integer) {}", i),
            Reply::Bulk(Some(b)) => write!(f, "\"{}\"", b.escape_ascii()),
            Reply::Bulk(None) | Reply::Array(None) => f.write_str("(nil)"),
            Reply::Array(Some(items)) if items.is_empty() => f.write_str("(empty array)"),
            Reply::Array(Some(items)) => {
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str("\n")?;
                    }
                    write!(f, "{}) {}", i + 1, item)?;
                }
                Ok(())
            }
        }
    }
}

//
// Request encoding
//

/// Append one command, framed as an array of bulk strings, to `out`
///
/// Output is `*<count>\r\n` followed by `$<len>\r\n<bytes>\r\n` for each
/// argument. Arguments are not inspected: empty lists, empty strings, CR/LF
/// and zero bytes are all framed as given.
pub fn write_command<A: AsRef<[u8]>>(args: &[A], out: &mut BytesMut) {
    out.reserve(command_len(args));
    write_array_len(args.len(), out);
    for arg in args {
        write_bulk(arg.as_ref(), out);
    }
}

/// Encode one command into a new buffer
///
/// `encode_command(&["PING"])` yields `*1\r\n$4\r\nPING\r\n`.
pub fn encode_command<A: AsRef<[u8]>>(args: &[A]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(command_len(args));
    write_command(args, &mut out);
    out.to_vec()
}

/// Exact encoded size of a command
fn command_len<A: AsRef<[u8]>>(args: &[A]) -> usize {
    let header = 1 + decimal_len(args.len()) + 2;
    args.iter().fold(header, |acc, a| {
        let len = a.as_ref().len();
        acc + 1 + decimal_len(len) + 2 + len + 2
    })
}

#[inline]
fn decimal_len(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 10 {
        n /= 10;
        digits += 1;
    }
    digits
}

//
// Request decoding
//

/// Parse a single command from byte data
///
/// Expects the format written by [`write_command`]:
/// `*<count>\r\n$<len>\r\n<data>\r\n...`
///
/// # Returns
/// * `Ok(Some((consumed_bytes, args)))` - Successfully parsed command
/// * `Ok(None)` - Incomplete data, need more bytes
/// * `Err(...)` - Protocol error
pub fn parse_request(data: &[u8]) -> Result<Option<(usize, Vec<Bytes>)>> {
    // Check if we have any data to parse
    if data.is_empty() {
        return Ok(None);
    }

    // Requests must be arrays
    if data[0] != b'*' {
        return Err(ProtocolError::ExpectedArray(data[0]));
    }

    // Read the number of arguments
    let (i, n) = match read_decimal_line(&data[1..])? {
        Some(x) => x,
        None => return Ok(None),
    };
    if n < 0 {
        return Err(ProtocolError::InvalidLength(n));
    }
    let mut cursor = 1 + i;

    // Cap the up-front allocation; the count is untrusted until the bytes arrive
    let mut items: Vec<Bytes> = Vec::with_capacity((n as usize).min(1024));

    for _ in 0..n {
        // Need more data
        if cursor >= data.len() {
            return Ok(None);
        }

        // Every argument is a bulk string
        if data[cursor] != b'$' {
            return Err(ProtocolError::ExpectedBulk(data[cursor]));
        }

        let (i2, len) = match read_decimal_line(&data[cursor + 1..])? {
            Some(x) => x,
            None => return Ok(None),
        };
        cursor += 1 + i2;

        // Extract the payload once it and its CRLF are buffered
        let len = check_bulk_len(len)?;
        match take_payload(&data[cursor..], len)? {
            Some(payload) => items.push(Bytes::copy_from_slice(payload)),
            None => return Ok(None),
        }
        cursor += len + 2;
    }

    Ok(Some((cursor, items)))
}

/// Parse every complete command in `buf`, consuming the bytes they used
///
/// A trailing partial command is left in the buffer.
pub fn parse_requests(buf: &mut BytesMut, out: &mut Vec<Vec<Bytes>>) -> Result<()> {
    loop {
        let (consumed, args) = match parse_request(&buf[..])? {
            Some(x) => x,
            None => break,
        };
        buf.advance(consumed);
        out.push(args);
    }
    Ok(())
}

//
// Reply decoding
//

/// Parse a single reply from byte data
///
/// Dispatches on the type byte (`+`, `-`, `:`, `$`, `*`). Arrays are parsed
/// recursively up to [`MAX_DEPTH`] levels.
///
/// # Returns
/// * `Ok(Some((consumed_bytes, reply)))` - A complete reply was framed
/// * `Ok(None)` - The buffer ends before the reply does
/// * `Err(...)` - The bytes cannot be a valid reply
pub fn parse_reply(data: &[u8]) -> Result<Option<(usize, Reply)>> {
    parse_reply_at(data, 0)
}

/// Parse every complete reply in `buf`, consuming the bytes they used
pub fn parse_replies(buf: &mut BytesMut, out: &mut Vec<Reply>) -> Result<()> {
    loop {
        let (consumed, reply) = match parse_reply(&buf[..])? {
            Some(x) => x,
            None => break,
        };
        buf.advance(consumed);
        out.push(reply);
    }
    Ok(())
}

fn parse_reply_at(data: &[u8], depth: usize) -> Result<Option<(usize, Reply)>> {
    // Need at least the type byte
    let tag = match data.first() {
        Some(&t) => t,
        None => return Ok(None),
    };

    match tag {
        // Status and error replies are a single CRLF-terminated line
        b'+' | b'-' => {
            let end = match find_line_end(&data[1..], 0)? {
                Some(end) => end,
                None => return Ok(None),
            };
            let line = String::from_utf8_lossy(&data[1..1 + end]).into_owned();
            let reply = if tag == b'+' {
                Reply::Simple(line)
            } else {
                Reply::Error(line)
            };
            Ok(Some((1 + end + 2, reply)))
        }

        // Integer replies reuse the length-line reader
        b':' => Ok(read_decimal_line(&data[1..])?.map(|(i, n)| (1 + i, Reply::Integer(n)))),

        b'$' => {
            // Read the declared payload length
            let (i, len) = match read_decimal_line(&data[1..])? {
                Some(x) => x,
                None => return Ok(None),
            };
            let cursor = 1 + i;

            // $-1 is the null bulk string
            if len == -1 {
                return Ok(Some((cursor, Reply::Bulk(None))));
            }
            let len = check_bulk_len(len)?;

            // Payload plus its trailing CRLF must be fully buffered
            match take_payload(&data[cursor..], len)? {
                Some(payload) => Ok(Some((
                    cursor + len + 2,
                    Reply::Bulk(Some(Bytes::copy_from_slice(payload))),
                ))),
                None => Ok(None),
            }
        }

        b'*' => {
            if depth >= MAX_DEPTH {
                return Err(ProtocolError::TooDeep(MAX_DEPTH));
            }

            // Read the number of array elements
            let (i, n) = match read_decimal_line(&data[1..])? {
                Some(x) => x,
                None => return Ok(None),
            };
            let mut cursor = 1 + i;

            // *-1 is the null array
            if n == -1 {
                return Ok(Some((cursor, Reply::Array(None))));
            }
            if n < 0 {
                return Err(ProtocolError::InvalidLength(n));
            }

            // Each element is a full reply of its own
            let mut items = Vec::with_capacity((n as usize).min(1024));
            for _ in 0..n {
                match parse_reply_at(&data[cursor..], depth + 1)? {
                    Some((used, item)) => {
                        cursor += used;
                        items.push(item);
                    }
                    None => return Ok(None),
                }
            }
            Ok(Some((cursor, Reply::Array(Some(items)))))
        }

        other => Err(ProtocolError::UnknownType(other)),
    }
}

/// Incremental reply framing for a socket read loop
///
/// `parse_reply` starts over from the first byte on every call, which is
/// fine for a complete buffer but quadratic when a large reply arrives one
/// read at a time. The framer remembers how far it got: elements already
/// framed are never looked at again, and an unfinished status line is only
/// searched from where the previous search stopped. Once [`advance`]
/// reports a length, that prefix holds exactly one reply and a single
/// `parse_reply` call decodes it.
///
/// The framer applies the same limits as `parse_reply`, so any buffer it
/// accepts also parses.
///
/// [`advance`]: ReplyFramer::advance
#[derive(Debug, Default, Clone)]
pub struct ReplyFramer {
    /// End of the last fully framed element
    pos: usize,
    /// Elements still owed by each open array, innermost last
    open: Vec<i64>,
    /// Where to resume the CRLF search inside an unfinished line
    line_scan: usize,
}

impl ReplyFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget any progress, e.g. after the framed reply was consumed
    pub fn reset(&mut self) {
        self.pos = 0;
        self.open.clear();
        self.line_scan = 0;
    }

    /// Continue framing the reply at the start of `data`
    ///
    /// `data` must be the same buffer as on the previous call, possibly with
    /// more bytes appended. Returns `Some(len)` once `data[..len]` holds one
    /// complete reply, and resets itself for the next one.
    pub fn advance(&mut self, data: &[u8]) -> Result<Option<usize>> {
        loop {
            let rest = &data[self.pos..];
            let tag = match rest.first() {
                Some(&t) => t,
                None => return Ok(None),
            };

            let used = match tag {
                b'+' | b'-' => {
                    // Resume the line search where the last one gave up
                    match find_line_end(&rest[1..], self.line_scan)? {
                        Some(end) => 1 + end + 2,
                        None => {
                            // Keep a trailing '\r' in range for the next search
                            self.line_scan = (rest.len() - 1).saturating_sub(1);
                            return Ok(None);
                        }
                    }
                }
                b':' => match read_decimal_line(&rest[1..])? {
                    Some((i, _)) => 1 + i,
                    None => return Ok(None),
                },
                b'$' => {
                    let (i, len) = match read_decimal_line(&rest[1..])? {
                        Some(x) => x,
                        None => return Ok(None),
                    };
                    if len == -1 {
                        1 + i
                    } else {
                        // Wait for the whole payload; the header is cheap to re-read
                        let len = check_bulk_len(len)?;
                        match take_payload(&rest[1 + i..], len)? {
                            Some(_) => 1 + i + len + 2,
                            None => return Ok(None),
                        }
                    }
                }
                b'*' => {
                    if self.open.len() >= MAX_DEPTH {
                        return Err(ProtocolError::TooDeep(MAX_DEPTH));
                    }
                    let (i, n) = match read_decimal_line(&rest[1..])? {
                        Some(x) => x,
                        None => return Ok(None),
                    };
                    if n < -1 {
                        return Err(ProtocolError::InvalidLength(n));
                    }
                    if n > 0 {
                        // Open the array; its elements follow the header
                        self.pos += 1 + i;
                        self.open.push(n);
                        continue;
                    }
                    // Null and empty arrays are complete elements
                    1 + i
                }
                other => return Err(ProtocolError::UnknownType(other)),
            };

            self.pos += used;
            self.line_scan = 0;

            // Close every array this element completed
            while let Some(left) = self.open.last_mut() {
                *left -= 1;
                if *left > 0 {
                    break;
                }
                self.open.pop();
            }

            if self.open.is_empty() {
                let len = self.pos;
                self.reset();
                return Ok(Some(len));
            }
        }
    }
}

/// Validate a declared bulk length
fn check_bulk_len(len: i64) -> Result<usize> {
    if len < 0 {
        return Err(ProtocolError::InvalidLength(len));
    }
    if len > MAX_BULK_LEN {
        return Err(ProtocolError::BulkTooLarge(len));
    }
    Ok(len as usize)
}

/// Take `len` payload bytes followed by CRLF, or `None` if not all here yet
fn take_payload(data: &[u8], len: usize) -> Result<Option<&[u8]>> {
    if data.len() < len + 2 {
        return Ok(None);
    }
    if &data[len..len + 2] != b"\r\n" {
        return Err(ProtocolError::ExpectedCrlf);
    }
    Ok(Some(&data[..len]))
}

#[inline]
fn find_crlf(s: &[u8]) -> Option<usize> {
    s.windows(2).position(|w| w == b"\r\n")
}

/// Find the CRLF ending a status or error line, searching from `from`
///
/// Lines longer than [`MAX_LINE_LEN`] are rejected as soon as enough bytes
/// have arrived to know the CRLF cannot come in time.
fn find_line_end(body: &[u8], from: usize) -> Result<Option<usize>> {
    let from = from.min(body.len());
    match find_crlf(&body[from..]) {
        Some(i) if from + i > MAX_LINE_LEN => Err(ProtocolError::LineTooLong(MAX_LINE_LEN)),
        Some(i) => Ok(Some(from + i)),
        None if body.len() >= MAX_LINE_LEN + 2 => Err(ProtocolError::LineTooLong(MAX_LINE_LEN)),
        None => Ok(None),
    }
}

/// Read a decimal number followed by \r\n
///
/// Used for array counts, bulk lengths and integer replies.
///
/// # Returns
/// * `Some((bytes_consumed, parsed_number))`, or `None` if the line is not
///   complete yet
fn read_decimal_line(s: &[u8]) -> Result<Option<(usize, i64)>> {
    let mut i = 0;
    let negative = s.first() == Some(&b'-');
    if negative {
        i += 1;
    }
    let start = i;

    let mut num: i64 = 0;
    while i < s.len() && s[i].is_ascii_digit() {
        let d = (s[i] - b'0') as i64;
        // Accumulate negatives downwards so i64::MIN stays representable
        num = num
            .checked_mul(10)
            .and_then(|n| if negative { n.checked_sub(d) } else { n.checked_add(d) })
            .ok_or(ProtocolError::InvalidNumber)?;
        i += 1;
    }

    if i >= s.len() {
        return Ok(None);
    }
    if s[i] != b'\r' {
        return Err(ProtocolError::InvalidNumber);
    }
    if i + 1 >= s.len() {
        return Ok(None);
    }
    if s[i + 1] != b'\n' {
        return Err(ProtocolError::ExpectedCrlf);
    }
    if i == start {
        return Err(ProtocolError::InvalidNumber);
    }
    Ok(Some((i + 2, num)))
}

//
// Reply encoders
//
// These build server-side replies. The client never sends them, but fake
// servers in tests and benchmarks do.
//

#[inline]
fn write_line(tag: u8, body: &[u8], out: &mut BytesMut) {
    out.reserve(1 + body.len() + 2);
    out.put_u8(tag);
    out.put_slice(body);
    out.put_slice(b"\r\n");
}

/// Write a simple string reply (+OK\r\n)
pub fn write_simple(s: &str, out: &mut BytesMut) {
    write_line(b'+', s.as_bytes(), out);
}

/// Write an error reply (-ERR <msg>\r\n)
pub fn write_error(msg: &str, out: &mut BytesMut) {
    out.reserve(5 + msg.len() + 2);
    out.put_slice(b"-ERR ");
    out.put_slice(msg.as_bytes());
    out.put_slice(b"\r\n");
}

/// Write an integer reply (:<number>\r\n)
pub fn write_integer(i: i64, out: &mut BytesMut) {
    write_line(b':', i.to_string().as_bytes(), out);
}

/// Write a bulk string ($<len>\r\n<data>\r\n)
pub fn write_bulk(b: &[u8], out: &mut BytesMut) {
    write_line(b'$', b.len().to_string().as_bytes(), out);
    out.reserve(b.len() + 2);
    out.put_slice(b);
    out.put_slice(b"\r\n");
}

/// Write a null bulk string ($-1\r\n)
pub fn write_null(out: &mut BytesMut) {
    out.put_slice(b"$-1\r\n");
}

/// Write an array header (*<count>\r\n)
pub fn write_array_len(n: usize, out: &mut BytesMut) {
    write_line(b'*', n.to_string().as_bytes(), out);
}

pub fn resp_simple(s: &str) -> Vec<u8> {
    let mut out = BytesMut::new();
    write_simple(s, &mut out);
    out.to_vec()
}

pub fn resp_error(msg: &str) -> Vec<u8> {
    let mut out = BytesMut::new();
    write_error(msg, &mut out);
    out.to_vec()
}

pub fn resp_integer(i: i64) -> Vec<u8> {
    let mut out = BytesMut::new();
    write_integer(i, &mut out);
    out.to_vec()
}

pub fn resp_bulk(b: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::new();
    write_bulk(b, &mut out);
    out.to_vec()
}

pub fn resp_null() -> Vec<u8> {
    b"$-1\r\n".to_vec()
}

/// Encode an array reply from already-encoded items
pub fn resp_array(items: Vec<Vec<u8>>) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(16 + items.iter().map(|i| i.len()).sum::<usize>());
    write_array_len(items.len(), &mut out);
    for it in items {
        out.put_slice(&it);
    }
    out.to_vec()
}
