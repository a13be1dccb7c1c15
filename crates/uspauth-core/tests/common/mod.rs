//! Scripted adapters shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::Semaphore;

use uspauth_core::{
    AuthError, AuthInput, AuthSession, Clock, Credential, CredentialStore, InMemoryCredentialStore,
    ManualClock, NetworkAdapter, RefreshPolicy, SessionId, StoreError, TokenStatus, UserProfile,
};

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 5, 22, 12, 0, 0).unwrap()
}

/// Network adapter with scripted results and optional gates that hold a call
/// in flight until the test releases it.
pub struct MockNetwork {
    clock: Arc<ManualClock>,
    refresh_results: Mutex<VecDeque<Result<Credential, AuthError>>>,
    auth_results: Mutex<VecDeque<Result<Credential, AuthError>>>,
    refresh_calls: AtomicUsize,
    auth_calls: AtomicUsize,
    gate_refresh: AtomicBool,
    gate_auth: AtomicBool,
    refresh_gate: Semaphore,
    auth_gate: Semaphore,
    revoked: Mutex<Vec<String>>,
    fail_revoke: AtomicBool,
    inactive: Mutex<HashSet<String>>,
    check_calls: AtomicUsize,
}

impl MockNetwork {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            refresh_results: Mutex::new(VecDeque::new()),
            auth_results: Mutex::new(VecDeque::new()),
            refresh_calls: AtomicUsize::new(0),
            auth_calls: AtomicUsize::new(0),
            gate_refresh: AtomicBool::new(false),
            gate_auth: AtomicBool::new(false),
            refresh_gate: Semaphore::new(0),
            auth_gate: Semaphore::new(0),
            revoked: Mutex::new(Vec::new()),
            fail_revoke: AtomicBool::new(false),
            inactive: Mutex::new(HashSet::new()),
            check_calls: AtomicUsize::new(0),
        }
    }

    /// Credential issued now by the mock authority.
    pub fn issue(&self, token: &str, lifetime: Duration) -> Credential {
        Credential::issued(
            token,
            Some(format!("{}-refresh", token)),
            self.clock.now(),
            lifetime,
        )
    }

    pub fn push_refresh(&self, result: Result<Credential, AuthError>) {
        self.refresh_results.lock().unwrap().push_back(result);
    }

    pub fn push_auth(&self, result: Result<Credential, AuthError>) {
        self.auth_results.lock().unwrap().push_back(result);
    }

    pub fn hold_refreshes(&self) {
        self.gate_refresh.store(true, Ordering::SeqCst);
    }

    pub fn release_refreshes(&self, count: usize) {
        self.refresh_gate.add_permits(count);
    }

    pub fn hold_logins(&self) {
        self.gate_auth.store(true, Ordering::SeqCst);
    }

    pub fn release_logins(&self, count: usize) {
        self.auth_gate.add_permits(count);
    }

    pub fn fail_revocations(&self) {
        self.fail_revoke.store(true, Ordering::SeqCst);
    }

    /// Report `access_token` as no longer honored by the server.
    pub fn deactivate(&self, access_token: &str) {
        self.inactive.lock().unwrap().insert(access_token.to_string());
    }

    pub fn check_calls(&self) -> usize {
        self.check_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn auth_calls(&self) -> usize {
        self.auth_calls.load(Ordering::SeqCst)
    }

    pub fn revoked_tokens(&self) -> Vec<String> {
        self.revoked.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkAdapter for MockNetwork {
    async fn authenticate(&self, input: AuthInput) -> Result<Credential, AuthError> {
        self.auth_calls.fetch_add(1, Ordering::SeqCst);
        if self.gate_auth.load(Ordering::SeqCst) {
            self.auth_gate.acquire().await.unwrap().forget();
        }
        if let Some(result) = self.auth_results.lock().unwrap().pop_front() {
            return result;
        }
        match input {
            AuthInput::Issued(credential) => Ok(credential),
            AuthInput::Password { username, .. } => Ok(self
                .issue(&username, Duration::hours(1))
                .with_user(profile(&username))),
            AuthInput::AuthorizationCode { code, .. } => Ok(self.issue(&code, Duration::hours(1))),
        }
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credential, AuthError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.gate_refresh.load(Ordering::SeqCst) {
            self.refresh_gate.acquire().await.unwrap().forget();
        }
        if let Some(result) = self.refresh_results.lock().unwrap().pop_front() {
            return result;
        }
        assert!(refresh_token.ends_with("-refresh"), "unexpected refresh token");
        Ok(self.issue(&format!("refreshed-{}", n), Duration::seconds(3600)))
    }

    async fn revoke(&self, token: &str) -> Result<(), AuthError> {
        self.revoked.lock().unwrap().push(token.to_string());
        if self.fail_revoke.load(Ordering::SeqCst) {
            return Err(AuthError::transient("revocation endpoint unreachable"));
        }
        Ok(())
    }

    async fn check(&self, access_token: &str) -> Result<TokenStatus, AuthError> {
        self.check_calls.fetch_add(1, Ordering::SeqCst);
        if self.inactive.lock().unwrap().contains(access_token) {
            Ok(TokenStatus::Inactive)
        } else {
            Ok(TokenStatus::Active)
        }
    }
}

/// Profile the mock authority returns for a password login.
pub fn profile(login: &str) -> UserProfile {
    UserProfile {
        login: login.to_string(),
        name: format!("User {}", login),
        primary_email: format!("{}@example.com", login),
        user_type: "I".to_string(),
        ..UserProfile::default()
    }
}

/// In-memory store whose writes can be switched to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryCredentialStore,
    fail_writes: AtomicBool,
}

impl FlakyStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            Err(StoreError::Backend("disk unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CredentialStore for FlakyStore {
    async fn load(&self, session_id: &SessionId) -> Result<Option<Credential>, StoreError> {
        self.inner.load(session_id).await
    }

    async fn save(&self, session_id: &SessionId, credential: &Credential) -> Result<(), StoreError> {
        self.check()?;
        self.inner.save(session_id, credential).await
    }

    async fn delete(&self, session_id: &SessionId) -> Result<(), StoreError> {
        self.check()?;
        self.inner.delete(session_id).await
    }
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub network: Arc<MockNetwork>,
    pub store: Arc<FlakyStore>,
    pub session: AuthSession,
}

impl Harness {
    pub fn new(policy: RefreshPolicy) -> Self {
        let clock = Arc::new(ManualClock::new(t0()));
        let network = Arc::new(MockNetwork::new(clock.clone()));
        let store = Arc::new(FlakyStore::default());
        let session = AuthSession::builder(store.clone(), network.clone())
            .session_id("alice")
            .clock(clock.clone())
            .refresh_policy(policy)
            .build();
        Self {
            clock,
            network,
            store,
            session,
        }
    }

    /// Log in with a credential valid for `lifetime` from now.
    pub async fn login(&self, lifetime: Duration) -> Credential {
        let credential = self.network.issue("initial", lifetime);
        self.session
            .authenticate(AuthInput::Issued(credential))
            .await
            .expect("login should succeed")
    }

    pub fn session_id(&self) -> SessionId {
        SessionId::new("alice")
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(StdDuration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
