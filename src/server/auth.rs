// Copyright 2026 Martin Pool.

//! Login, tokens, and throttling of repeated login failures.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use blake2_rfc::blake2b::Blake2b;
use tracing::{debug, info, warn};

use super::LOGIN_FAILURE_THRESHOLD;
use crate::envelope::{success_body, INVALID_LOGIN, LOGIN_OK};

/// Decides whether a credential is valid for an identity.
pub trait CredentialCheck: Send + Sync {
    fn check(&self, identity: &str, credential: &str) -> bool;
}

impl<F> CredentialCheck for F
where
    F: Fn(&str, &str) -> bool + Send + Sync,
{
    fn check(&self, identity: &str, credential: &str) -> bool {
        self(identity, credential)
    }
}

/// A fixed table of identities and their credentials.
impl CredentialCheck for HashMap<String, String> {
    fn check(&self, identity: &str, credential: &str) -> bool {
        self.get(identity).is_some_and(|c| c == credential)
    }
}

/// Failed logins are forgotten this long after the last one.
const FAILURE_MEMORY: Duration = Duration::from_secs(15 * 60);

/// Most identities whose failures are remembered at once; the stalest are
/// dropped first.
const MAX_TRACKED_IDENTITIES: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Failures {
    count: u32,
    last: Instant,
}

pub(super) struct LoginTable {
    credentials: Box<dyn CredentialCheck>,
    delay: Duration,
    /// Token to identity.
    tokens: Mutex<HashMap<String, String>>,
    /// Recent consecutive failures per identity.
    failures: Mutex<HashMap<String, Failures>>,
    failure_memory: Duration,
    max_tracked: usize,
}

impl LoginTable {
    pub fn new(credentials: Box<dyn CredentialCheck>, delay: Duration) -> LoginTable {
        LoginTable {
            credentials,
            delay,
            tokens: Mutex::default(),
            failures: Mutex::default(),
            failure_memory: FAILURE_MEMORY,
            max_tracked: MAX_TRACKED_IDENTITIES,
        }
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    /// Check a login attempt and frame the response.
    pub fn login(&self, identity: &str, credential: &str) -> Vec<u8> {
        let failures = self
            .failures
            .lock()
            .expect("login failures lock poisoned")
            .get(identity)
            .filter(|f| f.last.elapsed() < self.failure_memory)
            .map_or(0, |f| f.count);
        if failures >= LOGIN_FAILURE_THRESHOLD {
            warn!(identity, failures, delay = ?self.delay, "Delaying login after repeated failures");
            sleep(self.delay);
        }
        if identity.is_empty() || !self.credentials.check(identity, credential) {
            self.record_failure(identity);
            debug!(identity, "Login failed");
            return success_body([INVALID_LOGIN]);
        }
        self.failures
            .lock()
            .expect("login failures lock poisoned")
            .remove(identity);
        let token = new_token(identity);
        self.tokens
            .lock()
            .expect("token table lock poisoned")
            .insert(token.clone(), identity.to_owned());
        info!(identity, "Issued token");
        success_body([format!("{LOGIN_OK} {token}")])
    }

    fn record_failure(&self, identity: &str) {
        let mut failures = self.failures.lock().expect("login failures lock poisoned");
        let now = Instant::now();
        failures.retain(|_, f| now.duration_since(f.last) < self.failure_memory);
        if failures.len() >= self.max_tracked && !failures.contains_key(identity) {
            let stalest = failures
                .iter()
                .min_by_key(|(_, f)| f.last)
                .map(|(id, _)| id.clone());
            if let Some(stalest) = stalest {
                failures.remove(&stalest);
            }
        }
        let entry = failures.entry(identity.to_owned()).or_insert(Failures {
            count: 0,
            last: now,
        });
        entry.count += 1;
        entry.last = now;
    }

    /// True if the token was issued to this identity and not revoked.
    pub fn verify(&self, identity: &str, token: &str) -> bool {
        self.tokens
            .lock()
            .expect("token table lock poisoned")
            .get(token)
            .is_some_and(|owner| owner == identity)
    }

    pub fn revoke(&self, token: &str) {
        if let Some(identity) = self
            .tokens
            .lock()
            .expect("token table lock poisoned")
            .remove(token)
        {
            debug!(identity, "Revoked token");
        }
    }

    pub fn live_tokens(&self) -> usize {
        self.tokens.lock().expect("token table lock poisoned").len()
    }
}

fn new_token(identity: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let mut hasher = Blake2b::new(32);
    hasher.update(identity.as_bytes());
    hasher.update(&nanos.to_le_bytes());
    hasher.update(&std::process::id().to_le_bytes());
    hasher.update(&COUNTER.fetch_add(1, Ordering::Relaxed).to_le_bytes());
    hex::encode(hasher.finalize().as_bytes())
}
