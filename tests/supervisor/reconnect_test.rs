//! Reconnect discipline and drain-loop lifecycle.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use jmp_bridge::gateway::{GatewaySession, SessionError, SessionEvent};
use jmp_bridge::hook::WebhookNotifier;
use jmp_bridge::inbound::InboundPipeline;
use jmp_bridge::limiter::RateLimiter;
use jmp_bridge::policy::SenderPolicy;
use jmp_bridge::store::FileQueueStore;
use jmp_bridge::supervisor::ConnectionSupervisor;

// ---------------------------------------------------------------------------
// Mock session
// ---------------------------------------------------------------------------

/// Counts lifecycle calls.
#[derive(Default)]
struct MockSession {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    announces: AtomicUsize,
    accepted: AtomicUsize,
}

#[async_trait]
impl GatewaySession for MockSession {
    async fn connect(&self) -> Result<(), SessionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    async fn send_message(&self, _to: &str, _body: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn announce(&self, _gateway_domain: &str) -> Result<(), SessionError> {
        self.announces.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn accept_subscription(&self, _peer: &str) -> Result<(), SessionError> {
        self.accepted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct SupervisorFixture {
    _dir: tempfile::TempDir,
    session: Arc<MockSession>,
    supervisor: ConnectionSupervisor,
}

impl SupervisorFixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FileQueueStore::new(
            dir.path().join("inbox"),
            dir.path().join("outbox"),
        ));
        store.ensure_dirs().expect("queue dirs should be creatable");

        let session = Arc::new(MockSession::default());
        let limiter = Arc::new(RateLimiter::new(100, 100, 1000));
        let notifier = Arc::new(WebhookNotifier::new(None, None).expect("notifier should build"));
        let inbound = InboundPipeline::new(
            SenderPolicy::new([], None),
            Arc::clone(&limiter),
            Arc::clone(&store),
            notifier,
            "jabber.fr".to_owned(),
            "cheogram.com".to_owned(),
            160,
        );

        let supervisor = ConnectionSupervisor::new(
            Arc::clone(&session) as Arc<dyn GatewaySession>,
            inbound,
            store,
            limiter,
            "cheogram.com".to_owned(),
            160,
        );
        Self {
            _dir: dir,
            session,
            supervisor,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn disconnect_while_running_reconnects_after_the_delay() {
    let fixture = SupervisorFixture::new();
    fixture
        .supervisor
        .handle_event(SessionEvent::Disconnected)
        .await;

    // Nothing happens before the fixed delay elapses.
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(fixture.session.connects.load(Ordering::SeqCst), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(fixture.session.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn disconnect_after_stop_never_reconnects() {
    let fixture = SupervisorFixture::new();
    fixture.supervisor.stop().await;
    assert!(!fixture.supervisor.is_running());

    fixture
        .supervisor
        .handle_event(SessionEvent::Disconnected)
        .await;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(fixture.session.connects.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_clears_running_and_disconnects_once() {
    let fixture = SupervisorFixture::new();
    assert!(fixture.supervisor.is_running());

    fixture.supervisor.stop().await;
    assert!(!fixture.supervisor.is_running());
    assert_eq!(fixture.session.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn session_start_announces_and_runs_a_single_drainer() {
    let fixture = SupervisorFixture::new();
    fixture
        .supervisor
        .handle_event(SessionEvent::SessionStart)
        .await;
    assert_eq!(fixture.session.announces.load(Ordering::SeqCst), 1);
    assert!(fixture.supervisor.drainer_active());

    // A second session start (reconnect) replaces the loop instead of
    // stacking another one.
    fixture
        .supervisor
        .handle_event(SessionEvent::SessionStart)
        .await;
    assert_eq!(fixture.session.announces.load(Ordering::SeqCst), 2);
    assert!(fixture.supervisor.drainer_active());

    fixture.supervisor.stop().await;
    assert!(!fixture.supervisor.drainer_active());
}

#[tokio::test(start_paused = true)]
async fn subscription_requests_are_auto_accepted() {
    let fixture = SupervisorFixture::new();
    fixture
        .supervisor
        .handle_event(SessionEvent::SubscriptionRequest {
            from: "+15551234567@cheogram.com".to_owned(),
        })
        .await;
    assert_eq!(fixture.session.accepted.load(Ordering::SeqCst), 1);
}
