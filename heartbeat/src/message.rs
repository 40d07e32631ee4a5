//! Wire-format definitions for protocol messages.
//!
//! Every line exchanged between peers is a [`Message`].  This module is
//! responsible for:
//! - Defining the on-wire text grammar of the three message kinds.
//! - Formatting a [`Message`] into the exact line text (without the newline).
//! - Tokenizing a received line back into a [`Message`], returning errors
//!   for anything that does not match one of the grammars exactly.
//!
//! No I/O happens here.
//!
//! # Wire format
//!
//! One UTF-8 message per `\n`-terminated line:
//!
//! ```text
//!  Request    [<requestId>] PING                             client → server
//!  Response   [<responseId>:<requestId>] PONG (<clientId>)   server → client
//!  Keepalive  [<responseId>] keepalive                       server → client
//! ```
//!
//! Ids are non-negative decimal integers with no leading zeros (`0` itself is
//! allowed) that fit in a `u64`.

use std::fmt;

use thiserror::Error;

const PING: &str = " PING";
const KEEPALIVE: &str = " keepalive";
const PONG_PREFIX: &str = " PONG (";

/// A single protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    /// Liveness probe sent by a client.
    Ping { request_id: u64 },
    /// Server reply correlated to `request_id`.
    Pong {
        response_id: u64,
        request_id: u64,
        client_id: u64,
    },
    /// Unsolicited server message, never correlated to a request.
    Keepalive { response_id: u64 },
}

/// Errors that can arise when tokenizing a received line.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessageError {
    /// The line does not open with `[`.
    #[error("missing opening bracket")]
    MissingOpenBracket,
    /// No `]` closes the id block.
    #[error("missing closing bracket")]
    MissingCloseBracket,
    /// An id field is empty, non-decimal, has a leading zero, or overflows.
    #[error("invalid id field {0:?}")]
    InvalidId(String),
    /// The text after the id block matches none of the grammars.
    #[error("unrecognized message body {0:?}")]
    UnknownBody(String),
}

impl Message {
    /// Tokenize one line (without its terminating newline).
    ///
    /// The match is exact: surrounding whitespace, extra tokens, or a body
    /// that belongs to a different id layout are all rejected.
    pub fn parse(line: &str) -> Result<Self, MessageError> {
        let rest = line
            .strip_prefix('[')
            .ok_or(MessageError::MissingOpenBracket)?;
        let (ids, body) = rest
            .split_once(']')
            .ok_or(MessageError::MissingCloseBracket)?;

        match ids.split_once(':') {
            Some((response_id, request_id)) => {
                let client_id = body
                    .strip_prefix(PONG_PREFIX)
                    .and_then(|b| b.strip_suffix(')'))
                    .ok_or_else(|| MessageError::UnknownBody(body.to_string()))?;
                Ok(Message::Pong {
                    response_id: parse_id(response_id)?,
                    request_id: parse_id(request_id)?,
                    client_id: parse_id(client_id)?,
                })
            }
            None => {
                let id = parse_id(ids)?;
                match body {
                    PING => Ok(Message::Ping { request_id: id }),
                    KEEPALIVE => Ok(Message::Keepalive { response_id: id }),
                    _ => Err(MessageError::UnknownBody(body.to_string())),
                }
            }
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Ping { request_id } => write!(f, "[{request_id}]{PING}"),
            Message::Pong {
                response_id,
                request_id,
                client_id,
            } => write!(f, "[{response_id}:{request_id}]{PONG_PREFIX}{client_id})"),
            Message::Keepalive { response_id } => write!(f, "[{response_id}]{KEEPALIVE}"),
        }
    }
}

/// Parse a decimal id, rejecting signs, whitespace and leading zeros.
fn parse_id(s: &str) -> Result<u64, MessageError> {
    let invalid = || MessageError::InvalidId(s.to_string());
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    if s.len() > 1 && s.starts_with('0') {
        return Err(invalid());
    }
    s.parse().map_err(|_| invalid())
}
