//! Fault model for the simulated unreliable link.
//!
//! The transport itself is a reliable TCP stream, so unreliability is
//! injected on the server side, once per valid request:
//!
//! | Fault      | Description                                           |
//! |------------|-------------------------------------------------------|
//! | Throttle   | Drop the request silently with probability `drop_rate`. |
//! | Latency    | Otherwise answer after a delay drawn from `response_delay`. |
//!
//! Every session owns its own [`Simulator`] so decisions never contend on a
//! shared RNG.  With a seed configured the sequence of verdicts is
//! reproducible, which the integration tests rely on.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::DelayRange;

/// Configuration for the fault-injection model.
///
/// `drop_rate` is clamped to `[0.0, 1.0]` when sampled.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability that a valid request is silently dropped.
    pub drop_rate: f64,
    /// Simulated processing latency before a response is written.
    pub response_delay: DelayRange,
    /// Base seed; each session mixes in its client id.  `None` = OS entropy.
    pub seed: Option<u64>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            drop_rate: 0.1,
            response_delay: DelayRange::from_millis(100, 1000),
            seed: None,
        }
    }
}

impl SimulatorConfig {
    /// A fault-free link that answers immediately.
    pub fn transparent() -> Self {
        Self {
            drop_rate: 0.0,
            response_delay: DelayRange::fixed(Duration::ZERO),
            seed: None,
        }
    }
}

/// What to do with one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Throttled: no response is ever sent.
    Drop,
    /// Answer after the given delay.
    Respond(Duration),
}

/// Per-session fault injector.
#[derive(Debug)]
pub struct Simulator {
    config: SimulatorConfig,
    rng: StdRng,
}

impl Simulator {
    /// Build the injector for the session with `client_id`.
    pub fn new(config: SimulatorConfig, client_id: u64) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed ^ client_id),
            None => StdRng::from_os_rng(),
        };
        Self { config, rng }
    }

    /// Decide the fate of the next request.
    pub fn verdict(&mut self) -> Verdict {
        // NaN slips through `clamp` and would make `random_bool` panic.
        let drop_rate = if self.config.drop_rate.is_nan() {
            0.0
        } else {
            self.config.drop_rate.clamp(0.0, 1.0)
        };
        if self.rng.random_bool(drop_rate) {
            return Verdict::Drop;
        }
        Verdict::Respond(self.config.response_delay.sample(&mut self.rng))
    }
}
