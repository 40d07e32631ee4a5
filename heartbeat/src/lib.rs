//! `heartbeat`: a liveness protocol over TCP with a simulated unreliable link.
//!
//! # Architecture
//!
//! ```text
//!  ┌──────────── client ────────────┐          ┌──────────── server ─────────────┐
//!  │ emitter ─▶ Correlator          │  [n] PING │ accept ─▶ ServerSession (per   │
//!  │   │         ▲ resolve          │──────────▶│           connection)          │
//!  │   │         │                  │           │   inbound: drop / delay / PONG │
//!  │   │     dispatcher ◀───────────│◀──────────│   keepalive: every interval    │
//!  └───┼────────────────────────────┘ PONG, ka  │            │                   │
//!      │                                        │   ServerContext (ids, registry)│
//!      ▼                                        └─────────────────────────────────┘
//!  log records
//! ```
//!
//! Each module has a single responsibility:
//! - [`message`]    : wire grammar (format / tokenize the three line messages)
//! - [`correlator`] : outstanding-request queue and loss inference
//! - [`client`]     : request emitter and incoming-message dispatcher
//! - [`session`]    : per-connection inbound and keepalive loops
//! - [`server`]     : listener, shared context and session registry
//! - [`ids`]        : shared response/client id counters
//! - [`simulator`]  : throttle and latency fault model
//! - [`lifecycle`]  : alive-time window and abrupt cancellation
//! - [`transport`]  : line reader and line-atomic shared writer
//! - [`record`]     : request/response log records
//! - [`config`]     : actor settings and defaults
//! - [`logging`]    : per-actor `env_logger` setup

pub mod client;
pub mod config;
pub mod correlator;
pub mod error;
pub mod ids;
pub mod lifecycle;
pub mod logging;
pub mod message;
pub mod record;
pub mod server;
pub mod session;
pub mod simulator;
pub mod transport;

pub use error::{Error, Result};
