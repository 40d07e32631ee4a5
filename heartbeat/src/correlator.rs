//! Client-side request/response correlation.
//!
//! [`Correlator`] owns the FIFO of outstanding requests and resolves them as
//! responses arrive.  Loss is never signalled explicitly: a gap is discovered
//! retroactively when a later request's response arrives first.
//!
//! # Protocol contract
//!
//! - Requests are enqueued in strictly increasing id order, **before** they
//!   are written to the connection, so a response can never outrun its entry.
//! - A response for id `K` pops the queue head repeatedly.  Every popped
//!   request with an id below `K` was superseded and resolves
//!   [`RequestState::TimedOut`]; the request with id `K` resolves
//!   [`RequestState::Matched`] and popping stops.
//! - A head id above `K` means the server answered something that was never
//!   outstanding (or already resolved): a [`CorrelationError::ProtocolViolation`].
//!
//! ```text
//!  head                         tail
//!   │                             │
//!   ▼                             ▼
//!  [1]  [2]  [3]  [4]  [5]      response for 3 arrives
//!   └──┬──┘    │
//!   TimedOut  Matched            queue is now [4] [5]
//! ```
//!
//! This module only manages state; all socket I/O is the caller's responsibility.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::message::Message;
use crate::record::LogRecord;

/// `result_text` of a request whose response never arrived.
pub const TIMEOUT_MARKER: &str = "timeout";

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Lifecycle of a single request.  Both resolved states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Sent, awaiting a response.
    Open,
    /// Its own response arrived.
    Matched,
    /// A later request's response arrived first.
    TimedOut,
}

/// A liveness probe issued by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub id: u64,
    pub sent_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub state: RequestState,
    /// Full response line, or [`TIMEOUT_MARKER`].
    pub result_text: Option<String>,
}

impl Request {
    /// A new request stamped with the current time.
    pub fn open(id: u64) -> Self {
        Self::open_at(id, Utc::now())
    }

    pub fn open_at(id: u64, sent_at: DateTime<Utc>) -> Self {
        Self {
            id,
            sent_at,
            closed_at: None,
            state: RequestState::Open,
            result_text: None,
        }
    }

    /// Wire text of this request.
    pub fn request_text(&self) -> String {
        Message::Ping {
            request_id: self.id,
        }
        .to_string()
    }

    /// The log record of a resolved request, `None` while it is still open.
    pub fn log_record(&self) -> Option<LogRecord> {
        let closed_at = self.closed_at?;
        let text = self.result_text.as_deref()?;
        Some(LogRecord::new(
            self.sent_at,
            self.request_text(),
            closed_at,
            text,
        ))
    }

    fn close(mut self, state: RequestState, text: String) -> Self {
        debug_assert_eq!(self.state, RequestState::Open, "request resolved twice");
        self.closed_at = Some(Utc::now());
        self.state = state;
        self.result_text = Some(text);
        self
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while tracking or resolving requests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CorrelationError {
    /// Enqueue would break the strictly increasing id order.
    #[error("request {id} enqueued after request {last}")]
    OutOfOrder { id: u64, last: u64 },
    /// A response names a request that is not outstanding.  Nothing was popped.
    #[error("response for request {request_id} matches no outstanding request")]
    UnknownRequest { request_id: u64 },
    /// The queue head is newer than the response: ids went backwards.
    #[error("response for request {request_id} arrived while request {head} heads the queue")]
    ProtocolViolation { request_id: u64, head: u64 },
}

// ---------------------------------------------------------------------------
// Correlator
// ---------------------------------------------------------------------------

/// Running totals of resolved requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CorrelatorStats {
    pub matched: u64,
    pub timed_out: u64,
}

/// Outstanding-request queue plus the resolution logic over it.
#[derive(Debug, Default)]
pub struct Correlator {
    /// Open requests ordered by id (front = oldest).
    outstanding: VecDeque<Request>,
    /// Highest id ever enqueued.
    last_id: Option<u64>,
    stats: CorrelatorStats,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `request` to the tail of the queue.
    pub fn enqueue(&mut self, request: Request) -> Result<(), CorrelationError> {
        if let Some(last) = self.last_id {
            if request.id <= last {
                return Err(CorrelationError::OutOfOrder {
                    id: request.id,
                    last,
                });
            }
        }
        self.last_id = Some(request.id);
        self.outstanding.push_back(request);
        Ok(())
    }

    /// Resolve the response for `request_id`, carrying `response_text`.
    ///
    /// Returns every request resolved by this call in ascending id order:
    /// zero or more `TimedOut` entries followed by exactly one `Matched`.
    /// On error the queue is left untouched.
    pub fn resolve(
        &mut self,
        request_id: u64,
        response_text: &str,
    ) -> Result<Vec<Request>, CorrelationError> {
        let head = match self.outstanding.front() {
            Some(head) => head.id,
            None => return Err(CorrelationError::UnknownRequest { request_id }),
        };
        if head > request_id {
            return Err(CorrelationError::ProtocolViolation { request_id, head });
        }
        let position = self
            .outstanding
            .iter()
            .position(|r| r.id == request_id)
            .ok_or(CorrelationError::UnknownRequest { request_id })?;

        let mut resolved = Vec::with_capacity(position + 1);
        for request in self.outstanding.drain(..=position) {
            if request.id < request_id {
                self.stats.timed_out += 1;
                resolved.push(request.close(RequestState::TimedOut, TIMEOUT_MARKER.to_string()));
            } else {
                self.stats.matched += 1;
                resolved.push(request.close(RequestState::Matched, response_text.to_string()));
            }
        }
        Ok(resolved)
    }

    /// Ids still awaiting a response, oldest first.
    pub fn outstanding_ids(&self) -> Vec<u64> {
        self.outstanding.iter().map(|r| r.id).collect()
    }

    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn stats(&self) -> CorrelatorStats {
        self.stats
    }
}
