//! Outbox drain loop: scan, filter, send, transition.
//!
//! One scan completes before the next sleep begins; there are never two
//! overlapping scans. Rate-limit denials defer a file untouched for a
//! future tick; parse and send failures are terminal (`.failed`). A
//! scan-level error is logged and the loop carries on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::gateway::GatewaySession;
use crate::limiter::{RateLimiter, OUTBOUND_GLOBAL_KEY};
use crate::redact::redact_address;
use crate::store::{clamp_body, FileQueueStore};

/// Fixed delay between outbox scans.
pub const DRAIN_INTERVAL: Duration = Duration::from_secs(2);

/// Periodically drains pending outbox records onto the chat session.
pub struct OutboundDrainer {
    store: Arc<FileQueueStore>,
    limiter: Arc<RateLimiter>,
    session: Arc<dyn GatewaySession>,
    gateway_domain: String,
    max_sms_len: usize,
    running: Arc<AtomicBool>,
}

impl OutboundDrainer {
    /// Assemble a drainer bound to one connected session.
    pub fn new(
        store: Arc<FileQueueStore>,
        limiter: Arc<RateLimiter>,
        session: Arc<dyn GatewaySession>,
        gateway_domain: String,
        max_sms_len: usize,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            store,
            limiter,
            session,
            gateway_domain,
            max_sms_len,
            running,
        }
    }

    /// Drain until the stop flag clears.
    ///
    /// The flag is checked before sleeping and again before the next scan,
    /// so shutdown latency is bounded by [`DRAIN_INTERVAL`].
    pub async fn run(self) {
        while self.running.load(Ordering::Relaxed) {
            if let Err(e) = self.scan_once().await {
                warn!(error = %e, "outbox scan failed");
            }
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(DRAIN_INTERVAL).await;
        }
        debug!("outbox drain loop stopped");
    }

    /// One pass over the pending outbox files, in sorted order.
    ///
    /// # Errors
    ///
    /// Returns [`crate::store::StoreError`] only for scan-level failures
    /// (directory listing); per-file failures are handled in place.
    pub async fn scan_once(&self) -> Result<(), crate::store::StoreError> {
        for file in self.store.list_pending()? {
            if !self.running.load(Ordering::Relaxed) {
                break;
            }

            let record = match self.store.read_pending(&file) {
                Ok(record) => record,
                Err(e) => {
                    // Malformed records are terminal, never retried.
                    warn!(error = %e, "failed to parse outbound record");
                    if let Err(e) = self.store.mark_failed(&file) {
                        warn!(error = %e, file = %file.display(), "failed to mark record failed");
                    }
                    continue;
                }
            };

            let body = clamp_body(&record.body, self.max_sms_len);

            if !self.limiter.allow_outbound(OUTBOUND_GLOBAL_KEY) {
                // Deferred: the file stays pending and a future scan retries.
                debug!(file = %file.display(), "outbound rate limit reached, deferring");
                continue;
            }

            let to = format!("{}@{}", record.to, self.gateway_domain);
            match self.session.send_message(&to, &body).await {
                Ok(()) => {
                    info!(to = %redact_address(&record.to), "sms sent");
                    if let Err(e) = self.store.mark_sent(&file) {
                        warn!(error = %e, file = %file.display(), "failed to remove sent record");
                    }
                }
                Err(e) => {
                    warn!(
                        to = %redact_address(&record.to),
                        error = %e,
                        "send failed, marking record failed"
                    );
                    if let Err(e) = self.store.mark_failed(&file) {
                        warn!(error = %e, file = %file.display(), "failed to mark record failed");
                    }
                }
            }
        }
        Ok(())
    }
}
