//! Outbox drain behavior: send, transition, defer.

use std::fs;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use jmp_bridge::gateway::{GatewaySession, SessionError};
use jmp_bridge::limiter::RateLimiter;
use jmp_bridge::outbound::OutboundDrainer;
use jmp_bridge::store::FileQueueStore;

// ---------------------------------------------------------------------------
// Mock session
// ---------------------------------------------------------------------------

/// Records sends; optionally fails every send.
#[derive(Default)]
struct MockSession {
    sends: Mutex<Vec<(String, String)>>,
    fail_sends: bool,
}

impl MockSession {
    fn failing() -> Self {
        Self {
            sends: Mutex::new(Vec::new()),
            fail_sends: true,
        }
    }

    fn sends(&self) -> Vec<(String, String)> {
        self.sends.lock().expect("mock lock").clone()
    }
}

#[async_trait]
impl GatewaySession for MockSession {
    async fn connect(&self) -> Result<(), SessionError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    async fn send_message(&self, to: &str, body: &str) -> Result<(), SessionError> {
        if self.fail_sends {
            return Err(SessionError::Transport("mock send failure".to_owned()));
        }
        self.sends
            .lock()
            .expect("mock lock")
            .push((to.to_owned(), body.to_owned()));
        Ok(())
    }

    async fn announce(&self, _gateway_domain: &str) -> Result<(), SessionError> {
        Ok(())
    }

    async fn accept_subscription(&self, _peer: &str) -> Result<(), SessionError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixture
// ---------------------------------------------------------------------------

struct DrainFixture {
    dir: tempfile::TempDir,
    session: Arc<MockSession>,
    drainer: OutboundDrainer,
}

impl DrainFixture {
    fn new(session: MockSession, limiter: RateLimiter, max_sms_len: usize) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(FileQueueStore::new(
            dir.path().join("inbox"),
            dir.path().join("outbox"),
        ));
        store.ensure_dirs().expect("queue dirs should be creatable");

        let session = Arc::new(session);
        let drainer = OutboundDrainer::new(
            store,
            Arc::new(limiter),
            Arc::clone(&session) as Arc<dyn GatewaySession>,
            "cheogram.com".to_owned(),
            max_sms_len,
            Arc::new(AtomicBool::new(true)),
        );
        Self {
            dir,
            session,
            drainer,
        }
    }

    fn drop_file(&self, name: &str, contents: &str) -> std::path::PathBuf {
        let path = self.dir.path().join("outbox").join(name);
        fs::write(&path, contents).expect("outbox file should be writable");
        path
    }

    fn outbox_names(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(self.dir.path().join("outbox"))
            .expect("outbox should be listable")
            .filter_map(Result::ok)
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        names.sort();
        names
    }
}

fn roomy_limiter() -> RateLimiter {
    RateLimiter::new(100, 100, 1000)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn pending_record_round_trips_to_one_send_and_is_deleted() {
    let fixture = DrainFixture::new(MockSession::default(), roomy_limiter(), 160);
    fixture.drop_file("msg.json", r#"{"to":"+15551234567","body":"hi"}"#);

    fixture.drainer.scan_once().await.expect("scan should pass");

    assert_eq!(
        fixture.session.sends(),
        vec![("+15551234567@cheogram.com".to_owned(), "hi".to_owned())]
    );
    assert!(fixture.outbox_names().is_empty());
}

#[tokio::test]
async fn files_are_processed_in_sorted_order() {
    let fixture = DrainFixture::new(MockSession::default(), roomy_limiter(), 160);
    fixture.drop_file("20-second.json", r#"{"to":"+2","body":"second"}"#);
    fixture.drop_file("10-first.json", r#"{"to":"+1","body":"first"}"#);

    fixture.drainer.scan_once().await.expect("scan should pass");

    let bodies: Vec<String> = fixture.session.sends().into_iter().map(|(_, b)| b).collect();
    assert_eq!(bodies, vec!["first", "second"]);
}

#[tokio::test]
async fn body_is_truncated_before_sending() {
    let fixture = DrainFixture::new(MockSession::default(), roomy_limiter(), 5);
    fixture.drop_file("msg.json", r#"{"to":"+1555","body":"hello world"}"#);

    fixture.drainer.scan_once().await.expect("scan should pass");

    let bodies: Vec<String> = fixture.session.sends().into_iter().map(|(_, b)| b).collect();
    assert_eq!(bodies, vec!["hello"]);
}

#[tokio::test]
async fn malformed_record_is_failed_terminally() {
    let fixture = DrainFixture::new(MockSession::default(), roomy_limiter(), 160);
    fixture.drop_file("bad.json", "{ not json");

    fixture.drainer.scan_once().await.expect("scan should pass");
    assert_eq!(fixture.outbox_names(), vec!["bad.failed"]);
    assert!(fixture.session.sends().is_empty());

    // Subsequent scans never pick the failed file up again.
    fixture.drainer.scan_once().await.expect("scan should pass");
    assert_eq!(fixture.outbox_names(), vec!["bad.failed"]);
    assert!(fixture.session.sends().is_empty());
}

#[tokio::test]
async fn send_failure_is_failed_without_retry() {
    let fixture = DrainFixture::new(MockSession::failing(), roomy_limiter(), 160);
    fixture.drop_file("msg.json", r#"{"to":"+1555","body":"hi"}"#);

    fixture.drainer.scan_once().await.expect("scan should pass");
    assert_eq!(fixture.outbox_names(), vec!["msg.failed"]);

    fixture.drainer.scan_once().await.expect("scan should pass");
    assert_eq!(fixture.outbox_names(), vec!["msg.failed"]);
}

#[tokio::test]
async fn rate_limited_record_is_deferred_untouched() {
    // Zero outbound capacity: every send attempt is deferred.
    let fixture = DrainFixture::new(MockSession::default(), RateLimiter::new(100, 0, 0), 160);
    fixture.drop_file("msg.json", r#"{"to":"+1555","body":"hi"}"#);

    fixture.drainer.scan_once().await.expect("scan should pass");

    assert!(fixture.session.sends().is_empty());
    assert_eq!(fixture.outbox_names(), vec!["msg.json"]);
}

#[tokio::test]
async fn deferred_record_stays_pending_across_scans() {
    // One send per minute: the first file drains, the second defers, and a
    // later scan (within the same minute) still defers it.
    let fixture = DrainFixture::new(MockSession::default(), RateLimiter::new(100, 1, 1000), 160);
    fixture.drop_file("a.json", r#"{"to":"+1","body":"a"}"#);
    fixture.drop_file("b.json", r#"{"to":"+2","body":"b"}"#);

    fixture.drainer.scan_once().await.expect("scan should pass");
    assert_eq!(fixture.session.sends().len(), 1);
    assert_eq!(fixture.outbox_names(), vec!["b.json"]);

    fixture.drainer.scan_once().await.expect("scan should pass");
    assert_eq!(fixture.session.sends().len(), 1);
    assert_eq!(fixture.outbox_names(), vec!["b.json"]);
}
