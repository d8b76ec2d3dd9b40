// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub enum RetryStrategy {
    /// Wait `interval` seconds between every attempt.
    Linear { interval: u32 },
    /// Wait `base^attempt` seconds, attempt starting at 1.
    Exponential { base: u32 },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize)]
pub struct RetryPolicy {
    pub strategy: RetryStrategy,
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl RetryPolicy {
    /// Forward-driver default: retry every 2 minutes, give up after an hour's
    /// worth of attempts and let the message age into `.envelope.bad` only
    /// through explicit operator action (`unfail_all` is the only way back).
    pub fn forward_default() -> Self {
        RetryPolicy {
            strategy: RetryStrategy::Linear { interval: 120 },
            max_retries: Some(30),
        }
    }

    pub fn exhausted(&self, attempt: u32) -> bool {
        matches!(self.max_retries, Some(max) if attempt >= max)
    }

    pub fn wait_time(&self, attempt: u32) -> Duration {
        match self.strategy {
            RetryStrategy::Linear { interval } => Duration::from_secs(interval as u64),
            RetryStrategy::Exponential { base } => {
                let seconds = (base as u64).saturating_pow(attempt.max(1));
                Duration::from_secs(seconds)
            }
        }
    }
}
