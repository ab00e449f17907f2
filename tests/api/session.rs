// Copyright 2026 Martin Pool.

//! Login, logoff, expiry, and cloned sessions.

use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use tracing_test::traced_test;

use super::*;

fn login(channel: &LoopbackChannel, credential: &str) -> Result<Session> {
    Session::login_with(
        Box::new(channel.clone()),
        IDENTITY,
        credential,
        SessionConfig::default(),
        TransferCaches::new(),
    )
}

#[test]
fn login_issues_token() {
    let fixture = Fixture::new();
    let session = &fixture.session;
    assert!(session.is_open());
    assert_eq!(session.identity(), Some(IDENTITY));
    let token = session.token().unwrap();
    assert_eq!(token.token().len(), 64);
    assert!(!format!("{token:?}").contains(token.token()));
    assert_eq!(fixture.channel.dispatcher().live_tokens(), 1);
}

#[test]
fn wrong_credential_is_invalid_login() {
    let served = TempDir::new().unwrap();
    let channel = LoopbackChannel::new(dispatcher(&served, Duration::ZERO));
    let err = login(&channel, "wrong").unwrap_err();
    assert_matches!(&err, Error::InvalidLogin { identity } if identity == IDENTITY);
    assert!(err.is_authentication());
}

#[test]
fn empty_identity_fails_before_sending() {
    let served = TempDir::new().unwrap();
    let channel = LoopbackChannel::new(dispatcher(&served, Duration::ZERO));
    let err = Session::login_with(
        Box::new(channel.clone()),
        "",
        CREDENTIAL,
        SessionConfig::default(),
        TransferCaches::new(),
    )
    .unwrap_err();
    assert_matches!(err, Error::InvalidArgument(_));
    assert!(channel.calls().is_empty());
}

#[test]
fn repeated_failures_delay_the_next_login() {
    let served = TempDir::new().unwrap();
    let delay = Duration::from_millis(300);
    let channel = LoopbackChannel::new(dispatcher(&served, delay));
    for _ in 0..3 {
        let start = Instant::now();
        login(&channel, "wrong").unwrap_err();
        assert!(start.elapsed() < delay);
    }
    let start = Instant::now();
    let session = login(&channel, CREDENTIAL).unwrap();
    assert!(start.elapsed() >= delay);
    assert!(session.is_open());
    // Success resets the count.
    let start = Instant::now();
    login(&channel, "wrong").unwrap_err();
    assert!(start.elapsed() < delay);
}

#[test]
#[traced_test]
fn logoff_closes_without_network() {
    let mut fixture = Fixture::new();
    fixture.session.logoff();
    assert!(!fixture.session.is_open());
    assert_eq!(fixture.channel.dispatcher().live_tokens(), 0);
    let calls = fixture.channel.take_calls();
    assert_eq!(calls, [Call::new(Verb::Logoff, "")]);

    assert_matches!(fixture.session.exists("/a"), Err(Error::SessionClosed));
    assert_matches!(fixture.session.list("/", None), Err(Error::SessionClosed));
    assert_matches!(
        fixture.session.open_read("/a", fixture.buffer.path()).err(),
        Some(Error::SessionClosed)
    );
    assert_matches!(
        fixture.session.open_write("/a", fixture.buffer.path(), None).err(),
        Some(Error::SessionClosed)
    );
    assert!(fixture.channel.calls().is_empty());

    // Again is harmless.
    fixture.session.logoff();
    assert!(fixture.channel.calls().is_empty());
    assert!(logs_contain("Logged off"));
}

#[test]
fn revoked_token_is_session_expired() {
    let mut fixture = Fixture::new();
    let mut clone = fixture.session.clone();
    assert_eq!(clone.identity(), Some(IDENTITY));
    fixture.session.logoff();
    let err = clone.exists("/anything").unwrap_err();
    assert_matches!(err, Error::SessionExpired);
    assert!(err.is_authentication());
}

#[test]
fn clones_share_token_and_counters() {
    let mut fixture = Fixture::new();
    let mut clone = fixture.session.clone();
    assert_eq!(clone.token(), fixture.session.token());
    assert!(Arc::ptr_eq(clone.counters(), fixture.session.counters()));
    assert!(Arc::ptr_eq(clone.caches(), fixture.session.caches()));
    clone.exists("/").unwrap();
    fixture.session.exists("/").unwrap();
    assert_eq!(fixture.session.counters().get(Counter::MetadataCalls), 2);
}

#[test]
fn clones_work_in_parallel() {
    let fixture = Fixture::with_chunk_size(16);
    std::thread::scope(|scope| {
        for i in 0..4 {
            let mut session = fixture.session.clone();
            let buffer = fixture.buffer.path().join(format!("b{i}"));
            scope.spawn(move || {
                let path = format!("/file{i}");
                let data = content(100 + i);
                session.write_all(&path, &buffer, &data).unwrap();
                assert_eq!(session.read_all(&path, &buffer).unwrap(), data);
            });
        }
    });
    assert!(fixture.session.caches().uploads.is_empty());
    assert!(fixture.session.caches().downloads.is_empty());
}

#[test]
fn forget_transfers_drops_this_identity_only() {
    let fixture = Fixture::new();
    let caches = fixture.session.caches();
    let buffer = fixture.buffer.path();
    caches
        .uploads
        .confirm(&TransferKey::new(IDENTITY, buffer, "/a"), 1);
    caches
        .downloads
        .confirm(&TransferKey::new(IDENTITY, buffer, "/b"), 2);
    caches
        .downloads
        .confirm(&TransferKey::new("bob", buffer, "/b"), 1);
    assert_eq!(fixture.session.forget_transfers(), 2);
    assert_eq!(caches.downloads.len(), 1);
    assert!(caches.uploads.is_empty());
}
