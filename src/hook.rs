//! Fire-and-forget webhook notification for accepted inbound messages.
//!
//! Delivery is purely observational: the response status is logged, errors
//! are logged, and nothing is ever retried. Callers spawn [`WebhookNotifier::notify`]
//! as a detached task so the inbound pipeline never blocks on it.

use serde::Serialize;
use tracing::{debug, info, warn};

/// HTTP timeout for a single webhook delivery.
const HOOK_TIMEOUT_SECS: u64 = 10;

/// JSON body posted to the hook endpoint.
#[derive(Debug, Serialize)]
struct HookPayload<'a> {
    from: &'a str,
    body: &'a str,
    timestamp: i64,
}

/// HTTP POST notifier for inbound message metadata.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: Option<String>,
    token: Option<String>,
}

impl WebhookNotifier {
    /// Build a notifier; `url = None` puts the bridge in file-only mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(url: Option<String>, token: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HOOK_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            url: url.filter(|u| !u.is_empty()),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// Whether a hook URL is configured.
    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// POST `{from, body, timestamp}` to the configured endpoint.
    ///
    /// Success and failure both terminate in a log line; the caller never
    /// observes the outcome.
    pub async fn notify(&self, from: &str, body: &str, timestamp: i64) {
        let Some(url) = &self.url else {
            debug!("no hook URL configured, skipping notification");
            return;
        };

        let payload = HookPayload {
            from,
            body,
            timestamp,
        };
        let mut request = self.client.post(url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                info!(
                    from = %crate::redact::redact_address(from),
                    status = %response.status(),
                    "hook fired"
                );
            }
            Err(e) => {
                warn!(error = %e, "hook delivery failed");
            }
        }
    }
}
