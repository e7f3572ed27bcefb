#![allow(missing_docs)]

//! JMP bridge daemon entry point.
//!
//! Loads configuration, wires the routing core to the XMPP session, and
//! runs the event loop until a termination signal arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;

use jmp_bridge::config::Config;
use jmp_bridge::gateway::xmpp::XmppSession;
use jmp_bridge::gateway::{GatewaySession, SessionEvent};
use jmp_bridge::hook::WebhookNotifier;
use jmp_bridge::inbound::InboundPipeline;
use jmp_bridge::limiter::RateLimiter;
use jmp_bridge::logging;
use jmp_bridge::policy::SenderPolicy;
use jmp_bridge::store::FileQueueStore;
use jmp_bridge::supervisor::ConnectionSupervisor;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::load().context("failed to load configuration")?;
    if config.password.is_empty() {
        anyhow::bail!("JMP_PASSWORD is not set");
    }

    let _logging = logging::init(&config.logs_dir).context("failed to initialise logging")?;
    info!(version = env!("CARGO_PKG_VERSION"), "starting JMP bridge");

    let store = Arc::new(FileQueueStore::new(
        config.inbox_dir.clone(),
        config.outbox_dir.clone(),
    ));
    store
        .ensure_dirs()
        .context("failed to create queue directories")?;

    let limiter = Arc::new(RateLimiter::new(
        config.inbound_per_minute,
        config.outbound_per_minute,
        config.outbound_per_day,
    ));
    let policy = SenderPolicy::new(
        config.allowed_senders.clone(),
        config.required_prefix.clone(),
    );

    let notifier = Arc::new(
        WebhookNotifier::new(config.hook_url.clone(), config.hook_token.clone())
            .context("failed to build webhook client")?,
    );
    if notifier.is_configured() {
        info!("hook configured");
    } else {
        info!("no hook URL configured (file-only mode)");
    }

    let (session, events) = XmppSession::new(config.jid.clone(), config.password.clone());
    let session: Arc<dyn GatewaySession> = Arc::new(session);

    let inbound = InboundPipeline::new(
        policy,
        Arc::clone(&limiter),
        Arc::clone(&store),
        notifier,
        config.server_domain.clone(),
        config.gateway_domain.clone(),
        config.max_sms_len,
    );

    let supervisor = ConnectionSupervisor::new(
        Arc::clone(&session),
        inbound,
        store,
        limiter,
        config.gateway_domain.clone(),
        config.max_sms_len,
    );

    run_bridge(&supervisor, events).await?;
    info!("JMP bridge stopped");
    Ok(())
}

/// Event loop: dispatch session events until shutdown.
async fn run_bridge(
    supervisor: &ConnectionSupervisor,
    mut events: mpsc::Receiver<SessionEvent>,
) -> Result<()> {
    supervisor.start().await?;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            maybe_event = events.recv() => match maybe_event {
                Some(event) => {
                    let disconnected = matches!(event, SessionEvent::Disconnected);
                    supervisor.handle_event(event).await;
                    if disconnected && !supervisor.is_running() {
                        break;
                    }
                }
                None => {
                    info!("session event channel closed");
                    break;
                }
            },
            () = &mut shutdown => {
                info!("received shutdown signal, stopping bridge");
                supervisor.stop().await;
                break;
            }
        }
    }

    if supervisor.is_running() {
        supervisor.stop().await;
    }
    Ok(())
}

/// Resolve on SIGINT or, on Unix, SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
