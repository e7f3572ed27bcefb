//! Configuration loading and validation.
//!
//! Precedence: env vars > `config.toml` > defaults. The config file path is
//! `$JMP_CONFIG_PATH` or `./config.toml`; a missing file just yields
//! defaults. A `.env` file is honored by the binary before loading.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// Bridge configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Gateway account address (`user@server`).
    pub jid: String,
    /// Gateway account credential. Empty is a fatal startup error.
    pub password: String,
    /// Directory accepted inbound messages are written to.
    pub inbox_dir: PathBuf,
    /// Directory polled for outbound messages.
    pub outbox_dir: PathBuf,
    /// Directory for rotated log files.
    pub logs_dir: PathBuf,
    /// Webhook endpoint for inbound notifications; unset means file-only mode.
    pub hook_url: Option<String>,
    /// Bearer token sent with webhook requests.
    pub hook_token: Option<String>,
    /// Senders allowed to deliver SMS; empty admits everyone.
    pub allowed_senders: Vec<String>,
    /// Command prefix inbound bodies must carry; unset disables the check.
    pub required_prefix: Option<String>,
    /// Maximum message body length, in characters.
    pub max_sms_len: usize,
    /// Per-sender inbound messages allowed per minute.
    pub inbound_per_minute: usize,
    /// Outbound sends allowed per minute.
    pub outbound_per_minute: usize,
    /// Outbound sends allowed per day.
    pub outbound_per_day: usize,
    /// SMS gateway domain; destination addresses become `{to}@{domain}`.
    pub gateway_domain: String,
    /// Own chat server domain, whose welcome traffic is ignored.
    pub server_domain: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jid: String::new(),
            password: String::new(),
            inbox_dir: bridge_home().join("inbox"),
            outbox_dir: bridge_home().join("outbox"),
            logs_dir: bridge_home().join("logs"),
            hook_url: None,
            hook_token: None,
            allowed_senders: Vec::new(),
            required_prefix: None,
            max_sms_len: 1600,
            inbound_per_minute: 30,
            outbound_per_minute: 10,
            outbound_per_day: 500,
            gateway_domain: "cheogram.com".to_owned(),
            server_domain: "jabber.fr".to_owned(),
        }
    }
}

impl Config {
    /// Load configuration with precedence: env vars > TOML file > defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or
    /// parsed.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file()?;
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load from the TOML file only, no env overrides.
    fn load_from_file() -> Result<Self> {
        let path = Self::config_path();
        match std::fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents)
                .with_context(|| format!("failed to parse config at {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(anyhow::anyhow!(
                "failed to read config at {}: {e}",
                path.display()
            )),
        }
    }

    fn config_path() -> PathBuf {
        std::env::var("JMP_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"))
    }

    /// Apply environment variable overrides.
    ///
    /// Takes a resolver function for testability. Invalid numeric values are
    /// logged and ignored.
    pub fn apply_overrides(&mut self, env: impl Fn(&str) -> Option<String>) {
        if let Some(v) = env("JMP_JID") {
            self.jid = v;
        }
        if let Some(v) = env("JMP_PASSWORD") {
            self.password = v;
        }
        if let Some(v) = env("JMP_INBOX") {
            self.inbox_dir = PathBuf::from(v);
        }
        if let Some(v) = env("JMP_OUTBOX") {
            self.outbox_dir = PathBuf::from(v);
        }
        if let Some(v) = env("JMP_LOGS") {
            self.logs_dir = PathBuf::from(v);
        }
        if let Some(v) = env("JMP_HOOK_URL") {
            self.hook_url = Some(v).filter(|u| !u.is_empty());
        }
        if let Some(v) = env("JMP_HOOK_TOKEN") {
            self.hook_token = Some(v).filter(|t| !t.is_empty());
        }
        if let Some(v) = env("JMP_ALLOWED_SENDERS") {
            self.allowed_senders = parse_allow_list(&v);
        }
        if let Some(v) = env("JMP_REQUIRED_PREFIX") {
            self.required_prefix = Some(v).filter(|p| !p.is_empty());
        }
        if let Some(v) = env("JMP_GATEWAY_DOMAIN") {
            self.gateway_domain = v;
        }
        if let Some(v) = env("JMP_SERVER_DOMAIN") {
            self.server_domain = v;
        }

        apply_numeric(&mut self.max_sms_len, "JMP_MAX_SMS_LEN", &env);
        apply_numeric(&mut self.inbound_per_minute, "JMP_INBOUND_PER_MINUTE", &env);
        apply_numeric(
            &mut self.outbound_per_minute,
            "JMP_OUTBOUND_PER_MINUTE",
            &env,
        );
        apply_numeric(&mut self.outbound_per_day, "JMP_OUTBOUND_PER_DAY", &env);
    }
}

/// Parse a comma-separated allow-list, dropping empty entries.
pub fn parse_allow_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_owned)
        .collect()
}

fn apply_numeric(slot: &mut usize, key: &str, env: &impl Fn(&str) -> Option<String>) {
    if let Some(v) = env(key) {
        match v.parse() {
            Ok(n) => *slot = n,
            Err(_) => warn!(var = key, value = %v, "ignoring invalid env override"),
        }
    }
}

/// Default bridge home directory (`~/.jmp-bridge`).
fn bridge_home() -> PathBuf {
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(".jmp-bridge"))
        .unwrap_or_else(|| PathBuf::from(".jmp-bridge"))
}
