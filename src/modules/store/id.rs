// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

const PREFIX: &str = "emailrelay";

/// A printable, filesystem-safe identifier of the form
/// `emailrelay.<pid>.<unix-seconds>.<seq>`. `seq` is a monotonic, non-zero
/// counter scoped to the process that minted the id; two ids minted by the
/// same process are ordered by `seq` alone, which is what lets `new_id()`
/// promise strictly increasing values within a process lifetime even if the
/// wall clock doesn't move between two calls.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId {
    pub pid: u32,
    pub unix_secs: u64,
    pub seq: u64,
}

impl MessageId {
    /// Parses the `emailrelay.<pid>.<unix-seconds>.<seq>` syntax. Validity
    /// is purely syntactic: the literal prefix, and all four parts present
    /// and parsing as their expected integer types.
    pub fn parse(s: &str) -> Option<MessageId> {
        let mut parts = s.split('.');
        if parts.next()? != PREFIX {
            return None;
        }
        let pid = parts.next()?.parse().ok()?;
        let unix_secs = parts.next()?.parse().ok()?;
        let seq = parts.next()?.parse().ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(MessageId {
            pid,
            unix_secs,
            seq,
        })
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}.{}.{}.{}", self.pid, self.unix_secs, self.seq)
    }
}

impl PartialOrd for MessageId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MessageId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.seq.cmp(&other.seq)
    }
}

/// Issues strictly-increasing [`MessageId`] values for one process lifetime.
pub struct MessageIdGenerator {
    pid: u32,
    counter: AtomicU64,
}

impl MessageIdGenerator {
    pub fn new() -> Self {
        Self {
            pid: std::process::id(),
            counter: AtomicU64::new(0),
        }
    }

    pub fn next(&self) -> MessageId {
        let seq = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let unix_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        MessageId {
            pid: self.pid,
            unix_secs,
            seq,
        }
    }
}

impl Default for MessageIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_and_parses_round_trip() {
        let id = MessageId {
            pid: 1234,
            unix_secs: 1_700_000_000,
            seq: 7,
        };
        let text = id.to_string();
        assert_eq!(text, "emailrelay.1234.1700000000.7");
        assert_eq!(MessageId::parse(&text), Some(id));
    }

    #[test]
    fn rejects_wrong_prefix_and_missing_parts() {
        assert_eq!(MessageId::parse("notemailrelay.1.2.3"), None);
        assert_eq!(MessageId::parse("emailrelay.1.2"), None);
        assert_eq!(MessageId::parse("emailrelay.1.2.3.4"), None);
        assert_eq!(MessageId::parse("emailrelay.a.2.3"), None);
    }

    #[test]
    fn generator_yields_strictly_increasing_ids() {
        let gen = MessageIdGenerator::new();
        let mut prev = gen.next();
        for _ in 0..100 {
            let next = gen.next();
            assert!(next > prev);
            prev = next;
        }
    }
}
