//! Inbound message pipeline: filter, persist, notify.
//!
//! Every protocol message runs the same gauntlet, any step of which may
//! drop it: empty body, non-SMS origin, sender policy, rate limit, required
//! prefix. Survivors are clamped to the maximum length, persisted to the
//! inbox, and announced to the webhook as a detached task whose outcome the
//! pipeline never observes. Addresses in drop logs are redacted.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::hook::WebhookNotifier;
use crate::limiter::RateLimiter;
use crate::policy::SenderPolicy;
use crate::redact::redact_address;
use crate::store::{clamp_body, FileQueueStore, InboundRecord};

/// Consumes protocol-layer message events and feeds the inbox.
pub struct InboundPipeline {
    policy: SenderPolicy,
    limiter: Arc<RateLimiter>,
    store: Arc<FileQueueStore>,
    notifier: Arc<WebhookNotifier>,
    server_domain: String,
    gateway_domain: String,
    max_sms_len: usize,
}

impl InboundPipeline {
    /// Assemble the pipeline from its collaborators.
    pub fn new(
        policy: SenderPolicy,
        limiter: Arc<RateLimiter>,
        store: Arc<FileQueueStore>,
        notifier: Arc<WebhookNotifier>,
        server_domain: String,
        gateway_domain: String,
        max_sms_len: usize,
    ) -> Self {
        Self {
            policy,
            limiter,
            store,
            notifier,
            server_domain,
            gateway_domain,
            max_sms_len,
        }
    }

    /// Run one inbound message through the pipeline.
    ///
    /// Never fails: every error path is logged locally and the message is
    /// dropped, invisible to the sender.
    pub async fn handle_message(&self, from: &str, body: &str) {
        if body.is_empty() {
            return;
        }

        // Strip the session resource to get the bare origin address.
        let origin = from.split('/').next().unwrap_or(from);

        if origin == self.server_domain {
            // Server welcome traffic, not SMS.
            return;
        }
        if origin == self.gateway_domain {
            info!(body = %clamp_body(body, 100), "admin message from gateway");
            return;
        }

        let sender = self.normalize_sender(origin);

        if !self.policy.is_allowed(&sender) {
            info!(from = %redact_address(&sender), "dropping message from disallowed sender");
            return;
        }
        if !self.limiter.allow_inbound(&sender) {
            warn!(from = %redact_address(&sender), "dropping message from rate-limited sender");
            return;
        }
        if !self.policy.has_required_prefix(body) {
            debug!(from = %redact_address(&sender), "dropping message without required prefix");
            return;
        }

        let record = InboundRecord {
            from: sender.clone(),
            body: clamp_body(body, self.max_sms_len),
            timestamp: Utc::now().timestamp(),
            jid: origin.to_owned(),
        };

        match self.store.write_inbound(&record) {
            Ok(path) => {
                info!(
                    from = %redact_address(&sender),
                    file = %path.display(),
                    "sms received"
                );
            }
            Err(e) => {
                warn!(
                    from = %redact_address(&sender),
                    error = %e,
                    "failed to persist inbound message"
                );
                return;
            }
        }

        // Fire-and-forget: webhook failure never affects the pipeline.
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            notifier
                .notify(&record.from, &record.body, record.timestamp)
                .await;
        });
    }

    /// Reduce a bare origin address to the phone-like sender identifier.
    fn normalize_sender(&self, origin: &str) -> String {
        let suffix = format!("@{}", self.gateway_domain);
        origin
            .strip_suffix(suffix.as_str())
            .unwrap_or(origin)
            .to_owned()
    }
}
