//! Session lifecycle supervision: connect, reconnect, drain, stop.
//!
//! The supervisor owns the `running` flag. It is cleared exactly once, on
//! stop, and never set again; after that no reconnect is scheduled even if
//! a disconnect event is still in flight.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::gateway::{GatewaySession, SessionEvent};
use crate::inbound::InboundPipeline;
use crate::limiter::RateLimiter;
use crate::outbound::OutboundDrainer;
use crate::store::FileQueueStore;

/// Fixed delay before reconnecting after a disconnect.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// How long `stop` waits for the drain loop to wind down cooperatively.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Owns the protocol session lifecycle and dispatches its events.
pub struct ConnectionSupervisor {
    session: Arc<dyn GatewaySession>,
    inbound: InboundPipeline,
    store: Arc<FileQueueStore>,
    limiter: Arc<RateLimiter>,
    gateway_domain: String,
    max_sms_len: usize,
    running: Arc<AtomicBool>,
    drain_task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    /// Assemble the supervisor. The bridge starts in the running state.
    pub fn new(
        session: Arc<dyn GatewaySession>,
        inbound: InboundPipeline,
        store: Arc<FileQueueStore>,
        limiter: Arc<RateLimiter>,
        gateway_domain: String,
        max_sms_len: usize,
    ) -> Self {
        Self {
            session,
            inbound,
            store,
            limiter,
            gateway_domain,
            max_sms_len,
            running: Arc::new(AtomicBool::new(true)),
            drain_task: Mutex::new(None),
        }
    }

    /// Whether the bridge is still meant to be up.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Issue the initial connect.
    ///
    /// # Errors
    ///
    /// Returns [`crate::gateway::SessionError`] if the account address is
    /// unusable; transport failures surface later as disconnect events.
    pub async fn start(&self) -> Result<(), crate::gateway::SessionError> {
        info!("connecting to chat server");
        self.session.connect().await
    }

    /// Dispatch one protocol-layer event.
    pub async fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::SessionStart => self.on_session_start().await,
            SessionEvent::Message { from, body } => {
                self.inbound.handle_message(&from, &body).await;
            }
            SessionEvent::SubscriptionRequest { from } => {
                info!(from = %from, "accepting presence subscription");
                if let Err(e) = self.session.accept_subscription(&from).await {
                    warn!(error = %e, "failed to accept subscription");
                }
            }
            SessionEvent::Disconnected => self.on_disconnected(),
        }
    }

    /// Stop the bridge: clear the flag, drop the session, wind down the
    /// drain loop. No reconnect is scheduled once this returns.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.session.disconnect().await;

        let handle = self
            .drain_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle)
                .await
                .is_err()
            {
                warn!("drain loop did not stop in time, aborting it");
                handle.abort();
            }
        }
        info!("bridge stopped");
    }

    async fn on_session_start(&self) {
        if let Err(e) = self.session.announce(&self.gateway_domain).await {
            warn!(error = %e, "post-connect announcement failed");
        }
        self.spawn_drainer();
    }

    /// Start a fresh drain loop for this session, replacing any prior one.
    ///
    /// A reconnect (or a duplicate session-start from the transport) must
    /// not accumulate concurrent drain loops.
    fn spawn_drainer(&self) {
        let drainer = OutboundDrainer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.limiter),
            Arc::clone(&self.session),
            self.gateway_domain.clone(),
            self.max_sms_len,
            Arc::clone(&self.running),
        );

        let mut guard = self
            .drain_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = guard.take() {
            debug!("replacing previous drain loop");
            previous.abort();
        }
        *guard = Some(tokio::spawn(drainer.run()));
    }

    fn on_disconnected(&self) {
        if !self.is_running() {
            info!("disconnected while stopping, no reconnect");
            return;
        }

        info!(delay_secs = RECONNECT_DELAY.as_secs(), "disconnected, scheduling reconnect");
        let session = Arc::clone(&self.session);
        let running = Arc::clone(&self.running);
        tokio::spawn(async move {
            tokio::time::sleep(RECONNECT_DELAY).await;
            if !running.load(Ordering::Relaxed) {
                return;
            }
            if let Err(e) = session.connect().await {
                warn!(error = %e, "reconnect attempt failed");
            }
        });
    }

    /// Whether a drain loop is currently alive. Test hook.
    pub fn drainer_active(&self) -> bool {
        self.drain_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}
