//! Line-oriented TCP transport.
//!
//! A connection is split into a [`LineReader`] owned by exactly one loop and a
//! cloneable [`LineWriter`] shared by every loop that writes.  All protocol
//! logic lives elsewhere; this module owns only byte I/O.
//!
//! Reads are bounded: a line longer than [`MAX_LINE_LEN`] bytes, or one that
//! is not valid UTF-8, is dropped with a warning and reading carries on with
//! the next line.
//!
//! Writes are line-atomic: a whole `text + "\n"` buffer is written while the
//! writer lock is held, so a keepalive can never land in the middle of a
//! response on the same connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Longest accepted line, excluding the newline.
pub const MAX_LINE_LEN: usize = 4096;

/// Split `stream` into its reading and writing halves.
pub fn split(stream: TcpStream) -> io::Result<(LineReader, LineWriter)> {
    let peer = stream.peer_addr()?;
    let (read, write) = stream.into_split();
    Ok((
        LineReader {
            peer,
            inner: BufReader::new(read),
            buf: Vec::new(),
            discarding: false,
        },
        LineWriter {
            peer,
            inner: Arc::new(Mutex::new(write)),
        },
    ))
}

// ---------------------------------------------------------------------------
// Reader
// ---------------------------------------------------------------------------

/// Newline-delimited reader over the receiving half of a connection.
#[derive(Debug)]
pub struct LineReader {
    peer: SocketAddr,
    inner: BufReader<OwnedReadHalf>,
    /// Bytes of the line being assembled; survives a cancelled read.
    buf: Vec<u8>,
    /// Skipping the rest of an over-long line.
    discarding: bool,
}

impl LineReader {
    /// Next line with surrounding whitespace trimmed, `None` on EOF.
    ///
    /// Unreadable lines (over-long or not UTF-8) are skipped, never returned
    /// as errors. Cancel-safe: a read interrupted by cancellation loses no
    /// buffered data.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if self.buf.last() == Some(&b'\n') {
                let raw = std::mem::take(&mut self.buf);
                if std::mem::take(&mut self.discarding) {
                    continue;
                }
                match String::from_utf8(raw) {
                    Ok(line) => return Ok(Some(line.trim().to_string())),
                    Err(e) => {
                        log::warn!(
                            "[transport] dropped non UTF-8 line from {}: {:?}",
                            self.peer,
                            String::from_utf8_lossy(e.as_bytes()).trim()
                        );
                        continue;
                    }
                }
            }

            if self.buf.len() > MAX_LINE_LEN {
                if !self.discarding {
                    log::warn!(
                        "[transport] dropped line over {MAX_LINE_LEN} bytes from {}",
                        self.peer
                    );
                }
                self.discarding = true;
                self.buf.clear();
            }

            let limit = (MAX_LINE_LEN + 1 - self.buf.len()) as u64;
            let read = (&mut self.inner)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await?;
            if read == 0 {
                if self.buf.is_empty() || self.discarding {
                    self.buf.clear();
                    self.discarding = false;
                    return Ok(None);
                }
                // Unterminated last line before EOF.
                self.buf.push(b'\n');
            }
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

// ---------------------------------------------------------------------------
// Writer
// ---------------------------------------------------------------------------

/// Shared, line-atomic writer over the sending half of a connection.
#[derive(Debug, Clone)]
pub struct LineWriter {
    peer: SocketAddr,
    inner: Arc<Mutex<OwnedWriteHalf>>,
}

impl LineWriter {
    /// Write `text` followed by a newline as one uninterrupted unit.
    pub async fn send_line(&self, text: &str) -> io::Result<()> {
        let mut buf = Vec::with_capacity(text.len() + 1);
        buf.extend_from_slice(text.as_bytes());
        buf.push(b'\n');

        let mut half = self.inner.lock().await;
        half.write_all(&buf).await?;
        half.flush().await
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}
