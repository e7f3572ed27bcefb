//! Sender trust policy: allow-list membership and command-prefix gating.

use std::collections::HashSet;

/// Stateless predicate over inbound senders and message bodies.
///
/// An empty allow-list admits every sender; an unset prefix admits every
/// body. Both tests are exact, case-sensitive string matches.
#[derive(Debug, Clone, Default)]
pub struct SenderPolicy {
    allowed: HashSet<String>,
    required_prefix: Option<String>,
}

impl SenderPolicy {
    /// Build a policy from the configured allow-list and prefix.
    pub fn new(allowed: impl IntoIterator<Item = String>, required_prefix: Option<String>) -> Self {
        Self {
            allowed: allowed.into_iter().collect(),
            required_prefix: required_prefix.filter(|p| !p.is_empty()),
        }
    }

    /// Whether `sender` may deliver messages to the bridge.
    pub fn is_allowed(&self, sender: &str) -> bool {
        self.allowed.is_empty() || self.allowed.contains(sender)
    }

    /// Whether `body` carries the required command prefix.
    pub fn has_required_prefix(&self, body: &str) -> bool {
        match &self.required_prefix {
            Some(prefix) => body.starts_with(prefix.as_str()),
            None => true,
        }
    }

    /// Whether a command prefix is configured at all.
    pub fn requires_prefix(&self) -> bool {
        self.required_prefix.is_some()
    }
}
