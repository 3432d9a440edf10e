//! Reconnect delay schedule.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Delays tried before the ceiling takes over, in milliseconds
pub const DEFAULT_STEPS_MS: [u64; 5] = [0, 2_000, 5_000, 10_000, 20_000];

/// Delay for every attempt past the configured steps
pub const DEFAULT_CEILING_MS: u64 = 30_000;

/// Configuration for auto-reconnect behavior.
///
/// A pure function from attempt number to delay: the first attempts walk
/// `steps_ms`, every later attempt waits `ceiling_ms`. The schedule is made
/// non-decreasing on construction so a misordered step list cannot shorten a
/// later wait.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    steps_ms: Vec<u64>,
    ceiling_ms: u64,
    /// Maximum number of reconnect attempts (`None` = unlimited)
    max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_STEPS_MS.to_vec(), DEFAULT_CEILING_MS)
    }
}

impl ReconnectPolicy {
    pub fn new(steps_ms: Vec<u64>, ceiling_ms: u64) -> Self {
        let mut floor = 0;
        let steps_ms = steps_ms
            .into_iter()
            .map(|step| {
                floor = step.clamp(floor, ceiling_ms.max(floor));
                floor
            })
            .collect::<Vec<_>>();
        let ceiling_ms = ceiling_ms.max(steps_ms.last().copied().unwrap_or(0));

        Self {
            steps_ms,
            ceiling_ms,
            max_attempts: None,
        }
    }

    /// Give up after `max_attempts` consecutive failed reconnects
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    /// Calculate delay in milliseconds for a zero-based attempt number
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        self.steps_ms
            .get(attempt as usize)
            .copied()
            .unwrap_or(self.ceiling_ms)
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.delay_ms(attempt))
    }

    /// Whether another attempt is allowed after `attempts` failures
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts < max)
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    pub fn ceiling_ms(&self) -> u64 {
        self.ceiling_ms
    }
}
