//! Actor configuration.
//!
//! Plain structs with sensible defaults; `main.rs` fills them from CLI flags
//! and tests build them directly.  Timing defaults reproduce the simulated
//! link: clients probe every 0.3–3 s, the server keeps each connection alive
//! every 5 s, and every actor lives for five minutes.

use std::time::Duration;

use rand::Rng;

use crate::simulator::SimulatorConfig;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 32465;
pub const DEFAULT_ALIVE_TIME: Duration = Duration::from_secs(300);
pub const DEFAULT_CLIENTS: usize = 2;

/// Inclusive range a random wait is drawn from, at millisecond granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub const fn from_millis(min: u64, max: u64) -> Self {
        Self {
            min: Duration::from_millis(min),
            max: Duration::from_millis(max),
        }
    }

    /// A range that always yields `delay`.
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            min: delay,
            max: delay,
        }
    }

    /// Draw a uniformly distributed delay.  A reversed range yields `min`.
    pub fn sample<R: Rng>(&self, rng: &mut R) -> Duration {
        let min = self.min.as_millis() as u64;
        let max = self.max.as_millis() as u64;
        if max <= min {
            return self.min;
        }
        Duration::from_millis(rng.random_range(min..=max))
    }
}

/// Server actor settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on (`host:port`).
    pub addr: String,
    /// How long the server runs before cancelling every session.
    pub alive_time: Duration,
    /// Interval between keepalives on each connection.
    pub keepalive_interval: Duration,
    /// Throttle and latency model applied to every request.
    pub simulator: SimulatorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: format!("{DEFAULT_HOST}:{DEFAULT_PORT}"),
            alive_time: DEFAULT_ALIVE_TIME,
            keepalive_interval: Duration::from_secs(5),
            simulator: SimulatorConfig::default(),
        }
    }
}

/// Client actor settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address (`host:port`).
    pub addr: String,
    /// Actor name, used in logs and as the log file stem.
    pub name: String,
    /// How long the client runs before cancelling its loops.
    pub alive_time: Duration,
    /// Pause between two consecutive requests.
    pub request_interval: DelayRange,
    /// Extra connect attempts while the server is not yet listening.
    pub connect_retries: u32,
    /// Pause between connect attempts.
    pub connect_backoff: Duration,
    /// Seed for the request-interval RNG (`None` = OS entropy).
    pub seed: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addr: format!("{DEFAULT_HOST}:{DEFAULT_PORT}"),
            name: "client".to_string(),
            alive_time: DEFAULT_ALIVE_TIME,
            request_interval: DelayRange::from_millis(300, 3000),
            connect_retries: 10,
            connect_backoff: Duration::from_millis(200),
            seed: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn sample_stays_within_bounds() {
        let range = DelayRange::from_millis(300, 3000);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..1_000 {
            let d = range.sample(&mut rng);
            assert!(d >= range.min && d <= range.max, "{d:?} out of range");
        }
    }

    #[test]
    fn fixed_range_is_constant() {
        let range = DelayRange::fixed(Duration::from_millis(25));
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(range.sample(&mut rng), Duration::from_millis(25));
    }

    #[test]
    fn defaults_match_simulated_link() {
        let client = ClientConfig::default();
        assert_eq!(client.request_interval, DelayRange::from_millis(300, 3000));
        assert_eq!(client.addr, "localhost:32465");

        let server = ServerConfig::default();
        assert_eq!(server.keepalive_interval, Duration::from_secs(5));
        assert_eq!(server.alive_time, Duration::from_secs(300));
    }
}
