// SPDX-License-Identifier: BSD-3-Clause

use std::fmt;

/// Errors that can arise while driving a [`Session`](crate::session::Session).
///
/// These mirror the taxonomy of the original client: transport failures and
/// protocol violations are fatal to the session, GSSAPI negotiation failures
/// are reported separately from generic transport errors, and caller
/// validation mistakes never touch session state.
#[derive(Debug)]
pub enum Error {
    /// The caller invoked `command`, `output`, or `noop` on a session that is
    /// not `Ready` or `AwaitingResponses`.
    NotOpened,

    /// A clean EOF, connect failure, timeout, or I/O error on the socket.
    Transport(std::io::Error),

    /// GSSAPI context establishment failed, or the peer did not negotiate a
    /// required security flag (mutual auth, integrity, confidentiality).
    Negotiation(String),

    /// A framing or message invariant was violated: bad length, unknown
    /// message type, protocol version downgrade, or a v1-only peer.
    Protocol(String),

    /// The caller passed an invalid argument: an empty command, a negative
    /// timeout, or a credential with the wrong GSSAPI usage.
    Validation(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotOpened => write!(f, "session is not open"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::Negotiation(msg) => write!(f, "negotiation error: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Validation(msg) => write!(f, "invalid argument: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e)
    }
}

/// Raised by the [simple façade](crate::client::remctl) for every failure
/// mode: a server-reported `ERROR` message, or any lower-level [`Error`]
/// wrapped with its cause preserved.
#[derive(Debug)]
pub struct ProtocolError {
    /// The server-reported error code, if this was a `MESSAGE_ERROR` reply.
    pub code: Option<u32>,

    /// A human-readable description of the failure.
    pub message: String,

    /// The lower-level error this was wrapped from, if any.
    pub cause: Option<Box<Error>>,
}

impl ProtocolError {
    pub(crate) fn server(code: u32, message: Vec<u8>) -> Self {
        Self {
            code: Some(code),
            message: String::from_utf8_lossy(&message).into_owned(),
            cause: None,
        }
    }

    pub(crate) fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
            cause: None,
        }
    }
}

impl From<Error> for ProtocolError {
    fn from(e: Error) -> Self {
        Self {
            code: None,
            message: e.to_string(),
            cause: Some(Box::new(e)),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "remctl error {code}: {}", self.message),
            None => write!(f, "remctl protocol error: {}", self.message),
        }
    }
}

impl std::error::Error for ProtocolError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}
