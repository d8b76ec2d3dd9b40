// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

//! The filter chain: an ordered sequence of pluggable transformations run
//! against a message between receipt and commit, or before forwarding.
//! See the design's §4.3 for the full per-variant contract.

pub mod copy;
pub mod executable;
pub mod msgid;
pub mod mx;
pub mod network;

use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use crate::modules::envelope::Envelope;
use crate::modules::error::RelayResult;
use crate::modules::metrics::RELAY_FILTER_OUTCOME_TOTAL;
use crate::modules::store::MessageId;

/// What a single filter (or the chain as a whole) decided to do with a
/// message. `Ok`'s `rescan` flag folds in both the spec's standalone
/// `Rescan` result and the executable filter's `Special`-rescan bit: both
/// mean "the spool changed in a way the next enumeration pass should pick
/// up", and a single boolean captures that without inventing a third
/// result variant (see DESIGN.md for this resolved ambiguity).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Ok,
    Abandon,
    Fail {
        response: String,
        code: Option<String>,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    pub disposition: Disposition,
    pub rescan: bool,
}

impl FilterOutcome {
    pub fn ok() -> Self {
        Self {
            disposition: Disposition::Ok,
            rescan: false,
        }
    }

    pub fn ok_rescan() -> Self {
        Self {
            disposition: Disposition::Ok,
            rescan: true,
        }
    }

    pub fn abandon() -> Self {
        Self {
            disposition: Disposition::Abandon,
            rescan: false,
        }
    }

    pub fn abandon_rescan() -> Self {
        Self {
            disposition: Disposition::Abandon,
            rescan: true,
        }
    }

    pub fn fail(response: impl Into<String>, code: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            disposition: Disposition::Fail {
                response: response.into(),
                code,
                reason: reason.into(),
            },
            rescan: false,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self.disposition, Disposition::Ok)
    }

    fn label(&self) -> &'static str {
        match self.disposition {
            Disposition::Ok if self.rescan => "ok_rescan",
            Disposition::Ok => "ok",
            Disposition::Abandon => "abandon",
            Disposition::Fail { .. } => "fail",
        }
    }
}

/// What a filter needs to see and mutate. Implemented by both
/// `store::NewMessage` (the server-side, pre-commit chain) and
/// `store::StoredMessage` (the client-side, pre-forward chain) so the same
/// `FilterChain` runs in either position.
pub trait FilterTarget {
    fn id(&self) -> &MessageId;
    fn content_path(&self) -> PathBuf;
    fn envelope(&self) -> &Envelope;
    fn envelope_mut(&mut self) -> &mut Envelope;
    fn spool_dir(&self) -> PathBuf;
}

/// A single configured filter. The variant set is closed and known, so this
/// is a plain enum dispatching to a shared `run`, not a trait-object
/// hierarchy (matching the teacher's own preference for enums over trait
/// objects in closed domains).
pub enum Filter {
    Executable(executable::ExecutableFilter),
    Network(network::NetworkFilter),
    Copy(copy::CopyFilter),
    MessageId(msgid::MessageIdFilter),
    Mx(mx::MxFilter),
}

impl Filter {
    pub fn id(&self) -> String {
        match self {
            Filter::Executable(f) => f.id(),
            Filter::Network(f) => f.id(),
            Filter::Copy(f) => f.id(),
            Filter::MessageId(f) => f.id(),
            Filter::Mx(f) => f.id(),
        }
    }

    pub async fn run(&self, target: &mut dyn FilterTarget, timeout: Duration) -> RelayResult<FilterOutcome> {
        match self {
            Filter::Executable(f) => f.run(target, timeout).await,
            Filter::Network(f) => f.run(target, timeout).await,
            Filter::Copy(f) => f.run(target).await,
            Filter::MessageId(f) => f.run(target).await,
            Filter::Mx(f) => f.run(target, timeout).await,
        }
    }
}

/// An ordered, immutable sequence of filters. Evaluation is strictly
/// sequential, left-to-right; the first non-`Ok` disposition stops the
/// chain.
pub struct FilterChain {
    filters: Vec<Filter>,
    timeout: Duration,
}

impl FilterChain {
    pub fn new(filters: Vec<Filter>, timeout: Duration) -> Self {
        Self { filters, timeout }
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub async fn run(&self, target: &mut dyn FilterTarget) -> RelayResult<FilterOutcome> {
        let mut rescan = false;
        for filter in &self.filters {
            let filter_id = filter.id();
            let outcome = filter.run(target, self.timeout).await?;
            RELAY_FILTER_OUTCOME_TOTAL
                .with_label_values(&[&filter_id, outcome.label()])
                .inc();
            rescan |= outcome.rescan;
            match outcome.disposition {
                Disposition::Ok => {
                    info!(message_id = %target.id(), filter = %filter_id, "filter ok");
                    continue;
                }
                Disposition::Abandon => {
                    info!(message_id = %target.id(), filter = %filter_id, "filter abandoned message");
                    return Ok(FilterOutcome {
                        disposition: Disposition::Abandon,
                        rescan,
                    });
                }
                Disposition::Fail { response, code, reason } => {
                    warn!(message_id = %target.id(), filter = %filter_id, %reason, "filter rejected message");
                    return Ok(FilterOutcome {
                        disposition: Disposition::Fail { response, code, reason },
                        rescan,
                    });
                }
            }
        }
        Ok(FilterOutcome {
            disposition: Disposition::Ok,
            rescan,
        })
    }
}
