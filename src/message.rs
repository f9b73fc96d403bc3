// SPDX-License-Identifier: BSD-3-Clause

//! The inner remctl message living inside the (unwrapped) payload of a
//! `DATA`-flagged packet: a version byte, a type byte, and a type-specific
//! body.

use crate::error::Error;

const MSG_COMMAND: u8 = 1;
const MSG_QUIT: u8 = 2;
const MSG_OUTPUT: u8 = 3;
const MSG_STATUS: u8 = 4;
const MSG_ERROR: u8 = 5;
const MSG_VERSION: u8 = 6;
const MSG_NOOP: u8 = 7;

/// `STREAM_STDOUT`
pub const STREAM_STDOUT: u8 = 1;
/// `STREAM_STDERR`
pub const STREAM_STDERR: u8 = 2;

/// A decoded remctl message. `Command` is only ever produced by this client
/// (the server never echoes one back), but it is still a legal value to
/// *decode* the type byte for, so that a server sending one back fails
/// cleanly with `Error::Protocol` rather than being silently absent from the
/// match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// A single COMMAND segment body, already framed per §4.3.
    Command(Vec<u8>),
    Quit,
    Output { stream: u8, chunk: Vec<u8> },
    Status { code: u8 },
    Error { code: u32, message: Vec<u8> },
    Version(Vec<u8>),
    Noop,
}

impl Message {
    /// The protocol version byte sent with this message: `3` for `Noop`,
    /// `2` for everything else.
    fn protocol_version(&self) -> u8 {
        match self {
            Self::Noop => 3,
            _ => 2,
        }
    }

    fn msg_type(&self) -> u8 {
        match self {
            Self::Command(_) => MSG_COMMAND,
            Self::Quit => MSG_QUIT,
            Self::Output { .. } => MSG_OUTPUT,
            Self::Status { .. } => MSG_STATUS,
            Self::Error { .. } => MSG_ERROR,
            Self::Version(_) => MSG_VERSION,
            Self::Noop => MSG_NOOP,
        }
    }

    /// Encode this message's body. Callers needing the COMMAND body alone
    /// (without the version/type prefix) should use
    /// [`crate::segment::segment_command`] directly; this wraps whatever
    /// body it is given with the two-byte version/type header.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![self.protocol_version(), self.msg_type()];
        match self {
            Self::Command(body) => buf.extend_from_slice(body),
            Self::Quit | Self::Noop => {}
            Self::Output { stream, chunk } => {
                buf.push(*stream);
                buf.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
                buf.extend_from_slice(chunk);
            }
            Self::Status { code } => buf.push(*code),
            Self::Error { code, message } => {
                buf.extend_from_slice(&code.to_be_bytes());
                buf.extend_from_slice(&(message.len() as u32).to_be_bytes());
                buf.extend_from_slice(message);
            }
            Self::Version(body) => buf.extend_from_slice(body),
        }
        buf
    }

    /// Decode a message from an unwrapped payload.
    pub fn decode(buf: &[u8]) -> Result<Self, Error> {
        if buf.len() < 2 {
            return Err(Error::Protocol("message shorter than version/type header".into()));
        }

        let protocol_version = buf[0];
        let msg_type = buf[1];
        let body = &buf[2..];

        if protocol_version < 2 {
            return Err(Error::Protocol(format!(
                "server sent protocol version {protocol_version} < 2"
            )));
        }

        match msg_type {
            MSG_COMMAND => Ok(Self::Command(body.to_vec())),
            MSG_QUIT => Ok(Self::Quit),
            MSG_OUTPUT => decode_output(body),
            MSG_STATUS => decode_status(body),
            MSG_ERROR => decode_error(body),
            MSG_VERSION => Ok(Self::Version(body.to_vec())),
            MSG_NOOP => Ok(Self::Noop),
            other => Err(Error::Protocol(format!("unknown message type {other}"))),
        }
    }

    /// Whether this message was decoded with exactly `protocol_version ==
    /// 3`, the requirement the client places specifically on NOOP replies
    /// (see DESIGN.md's Open Question disposition).
    pub fn is_noop_reply(buf: &[u8]) -> bool {
        buf.len() >= 2 && buf[0] == 3 && buf[1] == MSG_NOOP
    }
}

fn decode_output(body: &[u8]) -> Result<Message, Error> {
    if body.len() < 5 {
        return Err(Error::Protocol("OUTPUT body shorter than header".into()));
    }
    let stream = body[0];
    let length = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    let chunk = &body[5..];
    if chunk.len() != length {
        return Err(Error::Protocol(format!(
            "OUTPUT declared length {length} but body has {} remaining bytes",
            chunk.len()
        )));
    }
    Ok(Message::Output {
        stream,
        chunk: chunk.to_vec(),
    })
}

fn decode_status(body: &[u8]) -> Result<Message, Error> {
    if body.len() != 1 {
        return Err(Error::Protocol(format!(
            "STATUS body must be exactly 1 byte, got {}",
            body.len()
        )));
    }
    Ok(Message::Status { code: body[0] })
}

fn decode_error(body: &[u8]) -> Result<Message, Error> {
    if body.len() < 8 {
        return Err(Error::Protocol("ERROR body shorter than header".into()));
    }
    let code = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    let length = u32::from_be_bytes([body[4], body[5], body[6], body[7]]) as usize;
    let message = &body[8..];
    if message.len() != length {
        return Err(Error::Protocol(format!(
            "ERROR declared length {length} but body has {} remaining bytes",
            message.len()
        )));
    }
    Ok(Message::Error {
        code,
        message: message.to_vec(),
    })
}
