// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

//! The forward client driver: drains committed messages to an upstream
//! SMTP server. See the design's §4.4.

pub mod pool;
pub mod session;

use std::sync::Arc;
use std::time::{Duration, Instant};

use bb8::Pool;
use dashmap::DashMap;
use tracing::{info, warn};

use crate::modules::context::Context;
use crate::modules::error::code::ErrorCode;
use crate::modules::error::RelayResult;
use crate::modules::filter::FilterChain;
use crate::modules::forward::pool::SmtpClientManager;
use crate::modules::forward::session::{FailureKind, SendOutcome};
use crate::modules::metrics::{RELAY_FORWARD_SESSION_DURATION_SECONDS, RELAY_MESSAGES_FORWARDED_TOTAL};
use crate::modules::scheduler::retry::RetryPolicy;
use crate::modules::store::MessageId;
use crate::raise_error;

pub struct ForwardDriver {
    context: Arc<Context>,
    filters: FilterChain,
    default_host: Option<String>,
    default_port: u16,
    retry_policy: RetryPolicy,
    /// Per-process retry counters, reset on daemon restart (§4.4 "Retry
    /// scheduling" — not persisted into the envelope).
    attempts: DashMap<MessageId, u32>,
    pools: DashMap<(String, u16), Pool<SmtpClientManager>>,
}

impl ForwardDriver {
    pub fn new(
        context: Arc<Context>,
        filters: FilterChain,
        default_host: Option<String>,
        default_port: u16,
    ) -> Self {
        Self {
            context,
            filters,
            default_host,
            default_port,
            retry_policy: RetryPolicy::forward_default(),
            attempts: DashMap::new(),
            pools: DashMap::new(),
        }
    }

    async fn pool_for(&self, host: &str, port: u16) -> RelayResult<Pool<SmtpClientManager>> {
        let key = (host.to_string(), port);
        if let Some(pool) = self.pools.get(&key) {
            return Ok(pool.clone());
        }
        let manager = SmtpClientManager {
            host: host.to_string(),
            port,
            implicit_tls: false,
        };
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .await
            .map_err(|e| raise_error!(format!("failed to build smtp pool for {host}:{port}: {e}"), ErrorCode::ForwardTransientError))?;
        self.pools.insert(key, pool.clone());
        Ok(pool)
    }

    /// One driver tick: enumerates `store.ids()` and attempts a forward for
    /// each. Lock contention on an individual message is not an error for
    /// the tick as a whole.
    pub async fn tick(&self) -> RelayResult<()> {
        for id in self.context.store.ids() {
            if let Err(e) = self.forward_one(&id).await {
                warn!(message_id = %id, "forward attempt errored: {e}");
            }
        }
        Ok(())
    }

    async fn forward_one(&self, id: &MessageId) -> RelayResult<()> {
        let mut message = match self.context.store.get(id) {
            Ok(m) => m,
            Err(_) => return Ok(()), // already locked elsewhere, or vanished
        };

        if !self.filters.is_empty() {
            let outcome = self.filters.run(&mut message).await?;
            match outcome.disposition {
                crate::modules::filter::Disposition::Ok => {}
                crate::modules::filter::Disposition::Abandon => {
                    message.abandon()?;
                    return Ok(());
                }
                crate::modules::filter::Disposition::Fail { reason, code, .. } => {
                    message.fail(reason, code.unwrap_or_default())?;
                    return Ok(());
                }
            }
        }

        let (host, port) = match self.resolve_target(message.envelope()) {
            Some(target) => target,
            None => {
                message.fail("no upstream configured", "550")?;
                return Ok(());
            }
        };

        let pool = self.pool_for(&host, port).await?;
        let mut conn = match pool.get().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!(message_id = %id, "failed to acquire smtp connection: {e}");
                message.unlock()?;
                return Ok(());
            }
        };

        let content = std::fs::read(message.content_path())?;
        let started = Instant::now();
        let outcome = conn.send(message.envelope(), &content).await;
        let elapsed = started.elapsed();

        match outcome {
            SendOutcome::Delivered => {
                RELAY_MESSAGES_FORWARDED_TOTAL.with_label_values(&["delivered"]).inc();
                RELAY_FORWARD_SESSION_DURATION_SECONDS
                    .with_label_values(&["delivered"])
                    .observe(elapsed.as_secs_f64());
                self.attempts.remove(id);
                message.commit_delete()?;
            }
            SendOutcome::Partial { rejected } => {
                RELAY_MESSAGES_FORWARDED_TOTAL.with_label_values(&["partial"]).inc();
                RELAY_FORWARD_SESSION_DURATION_SECONDS
                    .with_label_values(&["partial"])
                    .observe(elapsed.as_secs_f64());
                let failed: Vec<String> = rejected.iter().map(|r| r.address.clone()).collect();
                let reason = failed.join(", ");
                let reason_code = rejected
                    .iter()
                    .find_map(|r| r.code)
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "450".to_string());
                info!(message_id = %id, recipients = %reason, "partial forward, retrying rejected recipients");
                message.envelope_mut().retain_recipients(&failed);
                message.envelope_mut().set_failure(format!("rejected: {reason}"), reason_code);
                self.attempts.remove(id);
                message.rewrite()?;
                message.unlock()?;
            }
            SendOutcome::Failed { kind, reason } => {
                RELAY_MESSAGES_FORWARDED_TOTAL.with_label_values(&["failed"]).inc();
                RELAY_FORWARD_SESSION_DURATION_SECONDS
                    .with_label_values(&["failed"])
                    .observe(elapsed.as_secs_f64());
                match kind {
                    FailureKind::Permanent => {
                        self.attempts.remove(id);
                        message.fail(reason, "550")?;
                    }
                    FailureKind::Transient => {
                        let attempt = {
                            let mut entry = self.attempts.entry(id.clone()).or_insert(0);
                            *entry += 1;
                            *entry
                        };
                        if self.retry_policy.exhausted(attempt) {
                            self.attempts.remove(id);
                            message.fail(reason, "450")?;
                        } else {
                            warn!(message_id = %id, attempt, "transient forward failure: {reason}");
                            message.unlock()?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    fn resolve_target(&self, envelope: &crate::modules::envelope::Envelope) -> Option<(String, u16)> {
        if let Some(address) = &envelope.forward_to_address {
            if let Some((host, port)) = address.rsplit_once(':') {
                if let Ok(port) = port.parse() {
                    return Some((host.to_string(), port));
                }
            }
        }
        if let Some(host) = &envelope.forward_to {
            return Some((host.clone(), self.default_port));
        }
        self.default_host.clone().map(|host| (host, self.default_port))
    }

    /// The retry tick interval this driver expects its `PeriodicTask` to
    /// be started with.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.context.settings.relay_forward_tick_interval_secs)
    }
}
