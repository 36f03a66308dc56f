/*!
 * Error Types
 *
 * `ProtocolError` covers bytes that cannot be framed as RESP. `ClientError`
 * covers everything a round trip to the server can run into.
 */

use thiserror::Error;

/// Result type alias using ClientError
pub type Result<T> = std::result::Result<T, ClientError>;

/// Framing errors raised by the decoders in [`crate::protocol`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("protocol error: unknown reply type byte 0x{0:02x}")]
    UnknownType(u8),

    #[error("protocol error: expected array, found byte 0x{0:02x}")]
    ExpectedArray(u8),

    #[error("protocol error: expected bulk, found byte 0x{0:02x}")]
    ExpectedBulk(u8),

    #[error("protocol error: invalid number")]
    InvalidNumber,

    #[error("protocol error: invalid length {0}")]
    InvalidLength(i64),

    #[error("protocol error: bulk length {0} exceeds limit")]
    BulkTooLarge(i64),

    #[error("protocol error: line longer than {0} bytes")]
    LineTooLong(usize),

    #[error("protocol error: reply ended before it was complete")]
    Incomplete,

    #[error("protocol error: expected CRLF")]
    ExpectedCrlf,

    #[error("protocol error: reply nested deeper than {0} levels")]
    TooDeep(usize),
}

/// Errors returned by [`crate::client::Client`]
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The server answered with an error reply
    #[error("server error: {0}")]
    Server(String),

    /// The server answered with a reply of the wrong shape for the command
    #[error("unexpected reply to {cmd}: {reply}")]
    UnexpectedReply { cmd: String, reply: String },

    #[error("connection closed by server")]
    ConnectionClosed,

    #[error("could not resolve address {0}")]
    Resolve(String),
}
