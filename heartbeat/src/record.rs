//! Log records for request/response pairs.
//!
//! One record is written per resolved client request and per handled server
//! request:
//!
//! ```text
//! <requestTimestamp>;<requestText>;<responseTimestamp>;<responseText>
//! ```
//!
//! Timestamps are UTC, `YYYY-MM-DD HH:MM:SS.ffffff`.  The date and time are
//! joined with a space so `;` only ever appears as the field separator and a
//! record always splits into exactly four fields.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Target used for record lines, so the logger can print them bare.
pub const RECORD_TARGET: &str = "heartbeat::record";

/// `strftime` pattern of both timestamp fields.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Placeholder for the response fields of a request the server dropped.
pub const IGNORED_MARKER: &str = "(ignored)";

const SEPARATOR: char = ';';

/// One line of the request/response log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub request_at: DateTime<Utc>,
    pub request_text: String,
    /// `None` when the request was dropped and never answered.
    pub response_at: Option<DateTime<Utc>>,
    pub response_text: String,
}

impl LogRecord {
    pub fn new(
        request_at: DateTime<Utc>,
        request_text: impl Into<String>,
        response_at: DateTime<Utc>,
        response_text: impl Into<String>,
    ) -> Self {
        Self {
            request_at,
            request_text: request_text.into(),
            response_at: Some(response_at),
            response_text: response_text.into(),
        }
    }

    /// Record for a request that was throttled by the server.
    pub fn ignored(request_at: DateTime<Utc>, request_text: impl Into<String>) -> Self {
        Self {
            request_at,
            request_text: request_text.into(),
            response_at: None,
            response_text: IGNORED_MARKER.to_string(),
        }
    }

    /// Emit the record on [`RECORD_TARGET`].
    pub fn log(&self) {
        log::info!(target: RECORD_TARGET, "{self}");
    }

    /// Split a rendered record back into its fields.
    ///
    /// Returns `None` unless the line has exactly four fields and both
    /// timestamps (or the ignored marker) parse.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split(SEPARATOR);
        let request_at = parse_timestamp(fields.next()?)?;
        let request_text = fields.next()?.to_string();
        let response_at = match fields.next()? {
            IGNORED_MARKER => None,
            ts => Some(parse_timestamp(ts)?),
        };
        let response_text = fields.next()?.to_string();
        if fields.next().is_some() {
            return None;
        }
        Some(Self {
            request_at,
            request_text,
            response_at,
            response_text,
        })
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{SEPARATOR}{}{SEPARATOR}",
            self.request_at.format(TIMESTAMP_FORMAT),
            self.request_text
        )?;
        match self.response_at {
            Some(at) => write!(f, "{}", at.format(TIMESTAMP_FORMAT))?,
            None => f.write_str(IGNORED_MARKER)?,
        }
        write!(f, "{SEPARATOR}{}", self.response_text)
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
