//! Session state machine scenarios against in-process wallet and gateway
//! doubles.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{Mutex, Semaphore};

use sandbox_session::error::{ExtensionError, GatewayError, SessionError};
use sandbox_session::gateway::{
    AuthGateway, AuthResponse, ChallengeRequest, ChallengeResponse, RateLimits,
    RefreshTokenRequest, RefreshTokenResponse, RegenerateKeyResponse, RequestLogPage,
    RequestLogQuery, RequestStats, SandboxUser, Tier, UsageSnapshot, VerifyRequest,
};
use sandbox_session::session::{
    AuthTokens, MemoryTokenStore, SessionManager, TokenStore, WalletState, WalletStatus,
};
use sandbox_session::wallet::{
    ExtensionRegistry, WalletAccount, WalletExtension, WalletOption, WalletProvider,
};

const ALICE: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";
const BOB: &str = "5FHneW46xGXgs5mUiveU4sbTyGBzmstUspZC92UhjJM694ty";
const WAIT: Duration = Duration::from_secs(5);

// --- Doubles ---

struct FakeExtension {
    accounts: Vec<WalletAccount>,
    reject_sign: AtomicBool,
    sign_gate: Option<Arc<Semaphore>>,
    sign_calls: AtomicUsize,
    list_gate: Option<Arc<Semaphore>>,
    list_calls: AtomicUsize,
}

impl FakeExtension {
    fn with_accounts(addresses: &[&str]) -> Self {
        Self {
            accounts: addresses
                .iter()
                .enumerate()
                .map(|(i, a)| {
                    WalletAccount::new(*a, Some(&format!("account-{i}")), WalletProvider::PolkadotJs)
                })
                .collect(),
            reject_sign: AtomicBool::new(false),
            sign_gate: None,
            sign_calls: AtomicUsize::new(0),
            list_gate: None,
            list_calls: AtomicUsize::new(0),
        }
    }

    fn gated_listing(mut self, gate: Arc<Semaphore>) -> Self {
        self.list_gate = Some(gate);
        self
    }

    fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.sign_gate = Some(gate);
        self
    }
}

#[async_trait]
impl WalletExtension for FakeExtension {
    async fn list_accounts(&self, _app_name: &str) -> Result<Vec<WalletAccount>, ExtensionError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.list_gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| ExtensionError::Unavailable("gate closed".to_string()))?;
        }
        if self.accounts.is_empty() {
            return Err(ExtensionError::NoAccounts);
        }
        Ok(self.accounts.clone())
    }

    async fn sign_raw(
        &self,
        account: &WalletAccount,
        payload: &str,
    ) -> Result<String, ExtensionError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.sign_gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| ExtensionError::Unavailable("gate closed".to_string()))?;
        }
        if self.reject_sign.load(Ordering::SeqCst) {
            return Err(ExtensionError::Rejected("Cancelled by user".to_string()));
        }
        Ok(format!("sig:{}:{}", account.address, payload))
    }
}

#[derive(Default)]
struct FakeGateway {
    challenge_error: Mutex<Option<GatewayError>>,
    verify_error: Mutex<Option<GatewayError>>,
    refresh_error: Mutex<Option<GatewayError>>,
    profile_error: Mutex<Option<GatewayError>>,
    challenge_calls: AtomicUsize,
    verify_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    profile_calls: AtomicUsize,
    stats_gate: Mutex<Option<Arc<Semaphore>>>,
    stats_calls: AtomicUsize,
    revoked_access_token: Mutex<Option<String>>,
}

fn sandbox_user(address: &str) -> SandboxUser {
    SandboxUser {
        id: Some(format!("user-{}", &address[..6])),
        polkadot_address: address.to_string(),
        contact_email: None,
        tier: Tier::Free,
        rate_limits: RateLimits {
            requests_per_hour: 100,
            requests_per_day: 1_000,
            requests_per_month: 10_000,
        },
        usage: UsageSnapshot {
            requests_this_hour: 3,
            requests_today: 12,
            requests_this_month: 140,
        },
        is_active: true,
        created_at: None,
    }
}

#[async_trait]
impl AuthGateway for FakeGateway {
    async fn challenge(&self, req: &ChallengeRequest) -> Result<ChallengeResponse, GatewayError> {
        let n = self.challenge_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.challenge_error.lock().await.clone() {
            return Err(err);
        }
        Ok(ChallengeResponse {
            challenge: format!("sandbox-login:{}:{n}", req.polkadot_address),
            nonce: Some(format!("nonce-{n}")),
            expires_at: None,
        })
    }

    async fn verify(&self, req: &VerifyRequest) -> Result<AuthResponse, GatewayError> {
        let n = self.verify_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.verify_error.lock().await.clone() {
            return Err(err);
        }
        if req.signature != format!("sig:{}:{}", req.polkadot_address, req.challenge) {
            return Err(GatewayError::Unauthorized);
        }
        Ok(AuthResponse {
            access_token: format!("access-{n}"),
            refresh_token: format!("refresh-{n}"),
            user: sandbox_user(&req.polkadot_address),
            expires_in: Some(900),
        })
    }

    async fn refresh(
        &self,
        req: &RefreshTokenRequest,
    ) -> Result<RefreshTokenResponse, GatewayError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.refresh_error.lock().await.clone() {
            return Err(err);
        }
        Ok(RefreshTokenResponse {
            access_token: format!("access-from-{}", req.refresh_token),
            refresh_token: Some("refresh-rotated".to_string()),
        })
    }

    async fn regenerate_key(
        &self,
        _access_token: &SecretString,
    ) -> Result<RegenerateKeyResponse, GatewayError> {
        Ok(RegenerateKeyResponse {
            api_key: "sk_sandbox_new".to_string(),
            created_at: None,
        })
    }

    async fn profile(&self, access_token: &SecretString) -> Result<SandboxUser, GatewayError> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.profile_error.lock().await.take() {
            return Err(err);
        }
        if access_token.expose_secret().is_empty() {
            return Err(GatewayError::Unauthorized);
        }
        Ok(sandbox_user(ALICE))
    }

    async fn request_logs(
        &self,
        _access_token: &SecretString,
        _query: &RequestLogQuery,
    ) -> Result<RequestLogPage, GatewayError> {
        Ok(RequestLogPage {
            logs: Vec::new(),
            total: 0,
        })
    }

    async fn request_stats(
        &self,
        access_token: &SecretString,
    ) -> Result<RequestStats, GatewayError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.stats_gate.lock().await.clone();
        if let Some(gate) = gate {
            let _permit = gate
                .acquire()
                .await
                .map_err(|_| GatewayError::Network("gate closed".to_string()))?;
        }
        if self.revoked_access_token.lock().await.as_deref() == Some(access_token.expose_secret()) {
            return Err(GatewayError::Unauthorized);
        }
        Ok(RequestStats {
            total_requests: 10,
            successful_requests: 9,
            failed_requests: 1,
            average_response_time: 42.5,
            requests_by_endpoint: BTreeMap::new(),
            requests_by_status: BTreeMap::new(),
            period_start: None,
            period_end: None,
        })
    }
}

struct Harness {
    manager: Arc<SessionManager>,
    extension: Arc<FakeExtension>,
    gateway: Arc<FakeGateway>,
    store: Arc<MemoryTokenStore>,
}

fn harness(extension: FakeExtension) -> Harness {
    harness_with_store(extension, MemoryTokenStore::new())
}

fn harness_with_store(extension: FakeExtension, store: MemoryTokenStore) -> Harness {
    let extension = Arc::new(extension);
    let gateway = Arc::new(FakeGateway::default());
    let store = Arc::new(store);
    let registry = ExtensionRegistry::new().with(WalletProvider::PolkadotJs, extension.clone());
    let manager = SessionManager::new(registry, gateway.clone(), store.clone());
    Harness {
        manager: Arc::new(manager),
        extension,
        gateway,
        store,
    }
}

fn polkadot_js() -> WalletOption {
    WalletOption::from(WalletProvider::PolkadotJs)
}

async fn login(h: &Harness, address: &str) -> AuthResponse {
    h.manager.select_wallet(&polkadot_js()).await.unwrap();
    h.manager.select_account(address).await.unwrap();
    h.manager.authenticate().await.unwrap()
}

async fn wait_for_status(manager: &SessionManager, status: WalletStatus) {
    let mut rx = manager.subscribe();
    tokio::time::timeout(WAIT, rx.wait_for(|s| s.status == status))
        .await
        .expect("timed out waiting for status")
        .expect("state channel closed");
}

fn assert_logged_out(state: &WalletState) {
    assert_eq!(state.status, WalletStatus::Idle);
    assert!(state.accounts.is_empty());
    assert!(state.selected_account.is_none());
    assert!(state.user.is_none());
    assert!(!state.is_authenticated);
    assert!(!state.is_connected);
}

// --- Scenarios ---

#[tokio::test]
async fn wallet_not_installed_stays_idle() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));

    let talisman = WalletOption::from(WalletProvider::Talisman);
    let err = h.manager.select_wallet(&talisman).await.unwrap_err();
    assert_eq!(
        err,
        SessionError::ExtensionNotFound {
            wallet: "talisman".to_string()
        }
    );

    let state = h.manager.snapshot();
    assert_eq!(state.status, WalletStatus::Idle);
    assert_eq!(
        state.error.as_ref().map(|e| e.code.as_str()),
        Some("extension_not_found")
    );
    state.check_invariants().unwrap();
}

#[tokio::test]
async fn detect_wallets_marks_registered_extensions() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));
    let wallets = h.manager.detect_wallets();
    let installed: Vec<&str> = wallets
        .iter()
        .filter(|w| w.installed == Some(true))
        .map(|w| w.id.as_str())
        .collect();
    assert_eq!(installed, vec!["polkadot-js"]);
    assert!(wallets.iter().all(|w| w.installed.is_some()));
}

#[tokio::test]
async fn successful_flow_with_two_accounts() {
    let h = harness(FakeExtension::with_accounts(&[ALICE, BOB]));

    let state = h.manager.select_wallet(&polkadot_js()).await.unwrap();
    assert_eq!(state.status, WalletStatus::Connected);
    assert!(state.is_connected);
    assert_eq!(state.accounts.len(), 2);
    assert!(state.selected_account.is_none(), "no auto-selection with 2 accounts");
    assert_eq!(state.connected_wallet_source, Some(WalletProvider::PolkadotJs));

    assert_eq!(
        h.manager.authenticate().await.unwrap_err(),
        SessionError::NoAccountSelected
    );

    let second = state.accounts[1].clone();
    h.manager.select_account(&second.address).await.unwrap();
    let auth = h.manager.authenticate().await.unwrap();
    assert_eq!(auth.user.polkadot_address, second.address);

    let state = h.manager.snapshot();
    assert_eq!(state.status, WalletStatus::Success);
    assert!(state.is_authenticated);
    assert_eq!(
        state.user.as_ref().map(|u| u.polkadot_address.as_str()),
        Some(BOB)
    );
    state.check_invariants().unwrap();

    let stored = h.store.load().await.unwrap().expect("tokens persisted");
    assert_eq!(stored.access_token.expose_secret(), auth.access_token);
    assert_eq!(stored.refresh_token.expose_secret(), auth.refresh_token);
}

#[tokio::test]
async fn single_account_is_selected_automatically() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));
    let state = h.manager.select_wallet(&polkadot_js()).await.unwrap();
    assert_eq!(
        state.selected_account.as_ref().map(|a| a.address.as_str()),
        Some(ALICE)
    );
    h.manager.authenticate().await.unwrap();
    assert_eq!(h.manager.snapshot().status, WalletStatus::Success);
}

#[tokio::test]
async fn empty_wallet_moves_to_error() {
    let h = harness(FakeExtension::with_accounts(&[]));
    let err = h.manager.select_wallet(&polkadot_js()).await.unwrap_err();
    assert_eq!(err.code(), "network");

    let state = h.manager.snapshot();
    assert_eq!(state.status, WalletStatus::Error);
    assert!(!state.is_connected);
    assert!(state.error.is_some());
    state.check_invariants().unwrap();
}

#[tokio::test]
async fn select_unknown_account_changes_nothing() {
    let h = harness(FakeExtension::with_accounts(&[ALICE, BOB]));
    h.manager.select_wallet(&polkadot_js()).await.unwrap();
    h.manager.select_account(ALICE).await.unwrap();
    let before = h.manager.snapshot();

    let err = h.manager.select_account("not-an-account").await.unwrap_err();
    assert!(matches!(err, SessionError::AccountNotFound { .. }));
    assert_eq!(h.manager.snapshot(), before);
}

#[tokio::test]
async fn authenticate_requires_connected_state() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));
    let err = h.manager.authenticate().await.unwrap_err();
    assert_eq!(
        err,
        SessionError::InvalidTransition {
            operation: "authenticate",
            status: "idle"
        }
    );
}

#[tokio::test]
async fn concurrent_authenticate_is_rejected_and_first_completes() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(FakeExtension::with_accounts(&[ALICE]).gated(gate.clone()));
    h.manager.select_wallet(&polkadot_js()).await.unwrap();

    let manager = h.manager.clone();
    let first = tokio::spawn(async move { manager.authenticate().await });
    wait_for_status(&h.manager, WalletStatus::Signing).await;

    let err = h.manager.authenticate().await.unwrap_err();
    assert_eq!(
        err,
        SessionError::OperationInProgress {
            operation: "authenticate"
        }
    );
    let err = h.manager.select_wallet(&polkadot_js()).await.unwrap_err();
    assert_eq!(err.code(), "operation_in_progress");

    gate.add_permits(1);
    let auth = tokio::time::timeout(WAIT, first)
        .await
        .expect("first authenticate hung")
        .unwrap()
        .unwrap();
    assert_eq!(auth.user.polkadot_address, ALICE);
    assert_eq!(h.manager.snapshot().status, WalletStatus::Success);
    assert_eq!(h.gateway.challenge_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn pending_select_wallet_blocks_other_operations() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(FakeExtension::with_accounts(&[ALICE, BOB]).gated_listing(gate.clone()));

    let manager = h.manager.clone();
    let first = tokio::spawn(async move { manager.select_wallet(&polkadot_js()).await });
    wait_for_status(&h.manager, WalletStatus::Connecting).await;

    let expected = SessionError::OperationInProgress {
        operation: "select_wallet",
    };
    assert_eq!(
        h.manager.select_wallet(&polkadot_js()).await.unwrap_err(),
        expected
    );
    assert_eq!(h.manager.authenticate().await.unwrap_err(), expected);
    assert_eq!(h.manager.snapshot().status, WalletStatus::Connecting);

    gate.add_permits(1);
    let state = tokio::time::timeout(WAIT, first)
        .await
        .expect("first select_wallet hung")
        .unwrap()
        .unwrap();
    assert_eq!(state.status, WalletStatus::Connected);
    assert_eq!(state.accounts.len(), 2);
    assert_eq!(h.extension.list_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn logout_cancels_pending_select_wallet() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(FakeExtension::with_accounts(&[ALICE, BOB]).gated_listing(gate.clone()));

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.select_wallet(&polkadot_js()).await });
    wait_for_status(&h.manager, WalletStatus::Connecting).await;

    h.manager.logout().await;
    let result = tokio::time::timeout(WAIT, pending)
        .await
        .expect("cancelled select_wallet hung")
        .unwrap();
    assert_eq!(result.unwrap_err(), SessionError::Cancelled);

    // Late account list never lands.
    gate.add_permits(1);
    tokio::task::yield_now().await;
    assert_logged_out(&h.manager.snapshot());
    assert!(h.manager.snapshot().connected_wallet_source.is_none());

    gate.add_permits(1);
    let state = h.manager.select_wallet(&polkadot_js()).await.unwrap();
    assert_eq!(state.status, WalletStatus::Connected);
}

#[tokio::test]
async fn logout_cancels_pending_authenticate() {
    let gate = Arc::new(Semaphore::new(0));
    let h = harness(FakeExtension::with_accounts(&[ALICE]).gated(gate.clone()));
    h.manager.select_wallet(&polkadot_js()).await.unwrap();

    let manager = h.manager.clone();
    let pending = tokio::spawn(async move { manager.authenticate().await });
    wait_for_status(&h.manager, WalletStatus::Signing).await;

    h.manager.logout().await;
    let result = tokio::time::timeout(WAIT, pending)
        .await
        .expect("cancelled authenticate hung")
        .unwrap();
    assert_eq!(result.unwrap_err(), SessionError::Cancelled);

    // Late signature never lands.
    gate.add_permits(1);
    tokio::task::yield_now().await;
    assert_logged_out(&h.manager.snapshot());
    assert!(!h.manager.has_tokens().await);
    assert!(h.store.load().await.unwrap().is_none());
    assert_eq!(h.gateway.verify_calls.load(Ordering::SeqCst), 0);

    // The slot is free again.
    h.manager.select_wallet(&polkadot_js()).await.unwrap();
    h.manager.authenticate().await.unwrap();
}

#[tokio::test]
async fn signature_rejection_allows_retry() {
    let h = harness(FakeExtension::with_accounts(&[ALICE, BOB]));
    h.extension.reject_sign.store(true, Ordering::SeqCst);
    h.manager.select_wallet(&polkadot_js()).await.unwrap();
    h.manager.select_account(ALICE).await.unwrap();

    let err = h.manager.authenticate().await.unwrap_err();
    assert_eq!(err.code(), "signature_rejected");
    let state = h.manager.snapshot();
    assert_eq!(state.status, WalletStatus::Error);
    assert!(!state.is_authenticated);
    assert!(state.user.is_none());
    assert_eq!(state.accounts.len(), 2, "accounts survive a failed sign-in");
    state.check_invariants().unwrap();

    h.extension.reject_sign.store(false, Ordering::SeqCst);
    let state = h.manager.select_account(BOB).await.unwrap();
    assert_eq!(state.status, WalletStatus::Connected);
    assert!(state.error.is_none());
    let auth = h.manager.authenticate().await.unwrap();
    assert_eq!(auth.user.polkadot_address, BOB);
}

#[tokio::test]
async fn gateway_refusing_signature_is_signature_rejected() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));
    *h.gateway.verify_error.lock().await = Some(GatewayError::Rejected {
        status: 400,
        message: "invalid signature".to_string(),
    });
    h.manager.select_wallet(&polkadot_js()).await.unwrap();

    let err = h.manager.authenticate().await.unwrap_err();
    assert_eq!(
        err,
        SessionError::SignatureRejected {
            reason: "invalid signature".to_string()
        }
    );
}

#[tokio::test]
async fn challenge_network_failure_is_network_error() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));
    *h.gateway.challenge_error.lock().await =
        Some(GatewayError::Network("connection refused".to_string()));
    h.manager.select_wallet(&polkadot_js()).await.unwrap();

    let err = h.manager.authenticate().await.unwrap_err();
    assert_eq!(err.code(), "network");
    assert_eq!(h.manager.snapshot().status, WalletStatus::Error);
    assert_eq!(h.extension.sign_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn expired_refresh_forces_idle_and_clears_tokens() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));
    login(&h, ALICE).await;
    *h.gateway.refresh_error.lock().await = Some(GatewayError::Unauthorized);

    let err = h.manager.refresh_session().await.unwrap_err();
    assert_eq!(err, SessionError::SessionExpired);
    assert_logged_out(&h.manager.snapshot());
    assert!(!h.manager.has_tokens().await);
    assert!(h.store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn refresh_network_error_is_attempted_once() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));
    login(&h, ALICE).await;
    *h.gateway.refresh_error.lock().await =
        Some(GatewayError::Network("timed out".to_string()));

    let err = h.manager.refresh_session().await.unwrap_err();
    assert_eq!(err.code(), "network");
    assert_eq!(h.gateway.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.manager.snapshot().status, WalletStatus::Success);
    assert!(h.manager.has_tokens().await);
}

#[tokio::test]
async fn refresh_replaces_tokens() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));
    let auth = login(&h, ALICE).await;

    h.manager.refresh_session().await.unwrap();
    let stored = h.store.load().await.unwrap().unwrap();
    assert_eq!(
        stored.access_token.expose_secret(),
        format!("access-from-{}", auth.refresh_token)
    );
    assert_eq!(stored.refresh_token.expose_secret(), "refresh-rotated");
    assert_eq!(
        h.manager.access_token().await.unwrap().expose_secret(),
        stored.access_token.expose_secret()
    );
}

#[tokio::test]
async fn refresh_without_tokens_is_session_expired() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));
    h.manager.select_wallet(&polkadot_js()).await.unwrap();

    let err = h.manager.refresh_session().await.unwrap_err();
    assert_eq!(err, SessionError::SessionExpired);
    assert_logged_out(&h.manager.snapshot());
    assert_eq!(h.gateway.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn restore_session_from_store() {
    let store = MemoryTokenStore::new();
    store
        .save(&AuthTokens::new("stored-access", "stored-refresh"))
        .await
        .unwrap();
    let h = harness_with_store(FakeExtension::with_accounts(&[ALICE]), store);

    assert!(h.manager.restore_session().await.unwrap());
    let state = h.manager.snapshot();
    assert_eq!(state.status, WalletStatus::Success);
    assert!(state.is_authenticated);
    assert!(!state.is_connected);
    state.check_invariants().unwrap();
    assert_eq!(h.gateway.refresh_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn restore_refreshes_lapsed_access_token_once() {
    let store = MemoryTokenStore::new();
    store
        .save(&AuthTokens::new("stale-access", "stored-refresh"))
        .await
        .unwrap();
    let h = harness_with_store(FakeExtension::with_accounts(&[ALICE]), store);
    *h.gateway.profile_error.lock().await = Some(GatewayError::Unauthorized);

    assert!(h.manager.restore_session().await.unwrap());
    assert_eq!(h.gateway.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.gateway.profile_calls.load(Ordering::SeqCst), 2);
    let stored = h.store.load().await.unwrap().unwrap();
    assert_eq!(
        stored.access_token.expose_secret(),
        "access-from-stored-refresh"
    );
}

#[tokio::test]
async fn restore_with_rejected_refresh_clears_store() {
    let store = MemoryTokenStore::new();
    store.save(&AuthTokens::new("stale", "dead")).await.unwrap();
    let h = harness_with_store(FakeExtension::with_accounts(&[ALICE]), store);
    *h.gateway.profile_error.lock().await = Some(GatewayError::Unauthorized);
    *h.gateway.refresh_error.lock().await = Some(GatewayError::Unauthorized);

    let err = h.manager.restore_session().await.unwrap_err();
    assert_eq!(err, SessionError::SessionExpired);
    assert_logged_out(&h.manager.snapshot());
    assert!(h.store.load().await.unwrap().is_none());
}

#[tokio::test]
async fn restore_with_empty_store_is_noop() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));
    assert!(!h.manager.restore_session().await.unwrap());
    assert_eq!(h.manager.snapshot(), WalletState::default());
}

#[tokio::test]
async fn rejected_access_token_on_read_forces_logout() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));
    login(&h, ALICE).await;

    let user = h.manager.refresh_profile().await.unwrap();
    assert_eq!(user.usage.requests_today, 12);

    *h.gateway.profile_error.lock().await = Some(GatewayError::Unauthorized);
    let err = h.manager.refresh_profile().await.unwrap_err();
    assert_eq!(err, SessionError::SessionExpired);
    assert_logged_out(&h.manager.snapshot());
}

#[tokio::test]
async fn read_rejected_after_refresh_keeps_rotated_session() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));
    let auth = login(&h, ALICE).await;

    let gate = Arc::new(Semaphore::new(0));
    *h.gateway.stats_gate.lock().await = Some(gate.clone());
    *h.gateway.revoked_access_token.lock().await = Some(auth.access_token.clone());

    let manager = h.manager.clone();
    let read = tokio::spawn(async move { manager.request_stats().await });
    tokio::time::timeout(WAIT, async {
        while h.gateway.stats_calls.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("stats request never started");

    h.manager.refresh_session().await.unwrap();
    gate.add_permits(1);
    let result = tokio::time::timeout(WAIT, read)
        .await
        .expect("stats read hung")
        .unwrap();
    assert_eq!(result.unwrap_err(), SessionError::SessionExpired);

    let state = h.manager.snapshot();
    assert_eq!(state.status, WalletStatus::Success);
    assert!(state.is_authenticated);
    assert!(h.manager.has_tokens().await);
    let stored = h.store.load().await.unwrap().unwrap();
    assert_eq!(
        stored.access_token.expose_secret(),
        format!("access-from-{}", auth.refresh_token)
    );

    // The rotated token keeps working.
    gate.add_permits(1);
    assert_eq!(h.manager.request_stats().await.unwrap().total_requests, 10);
}

#[tokio::test]
async fn dashboard_reads_require_authentication() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));
    assert_eq!(
        h.manager.request_stats().await.unwrap_err(),
        SessionError::NotAuthenticated
    );

    login(&h, ALICE).await;
    let stats = h.manager.request_stats().await.unwrap();
    assert_eq!(stats.total_requests, 10);
    let page = h
        .manager
        .request_logs(&RequestLogQuery {
            limit: Some(5),
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(page.logs.is_empty());
    let key = h.manager.regenerate_api_key().await.unwrap();
    assert_eq!(key.api_key, "sk_sandbox_new");
}

#[tokio::test]
async fn logout_from_every_state_is_idempotent() {
    let h = harness(FakeExtension::with_accounts(&[ALICE, BOB]));

    h.manager.logout().await;
    assert_logged_out(&h.manager.snapshot());

    h.manager.select_wallet(&polkadot_js()).await.unwrap();
    h.manager.logout().await;
    assert_logged_out(&h.manager.snapshot());

    login(&h, BOB).await;
    let success = h.manager.snapshot();
    h.manager.logout().await;
    h.manager.logout().await;
    assert_logged_out(&h.manager.snapshot());
    assert_eq!(success.status, WalletStatus::Success, "old snapshots are unaffected");
}

#[tokio::test]
async fn select_wallet_refused_while_authenticated() {
    let h = harness(FakeExtension::with_accounts(&[ALICE]));
    login(&h, ALICE).await;
    let err = h.manager.select_wallet(&polkadot_js()).await.unwrap_err();
    assert_eq!(err.code(), "invalid_transition");
    assert_eq!(h.manager.snapshot().status, WalletStatus::Success);
}

// --- Randomized operation sequences ---

async fn run_random_sequence(seed: u64, steps: usize) {
    let h = harness(FakeExtension::with_accounts(&[ALICE, BOB]));
    let mut rng = StdRng::seed_from_u64(seed);

    for step in 0..steps {
        h.extension
            .reject_sign
            .store(rng.gen_bool(0.2), Ordering::SeqCst);
        *h.gateway.refresh_error.lock().await = match rng.gen_range(0..4) {
            0 => Some(GatewayError::Unauthorized),
            1 => Some(GatewayError::Network("flaky".to_string())),
            _ => None,
        };

        let _ = match rng.gen_range(0..7) {
            0 => h.manager.select_wallet(&polkadot_js()).await.map(|_| ()),
            1 => h
                .manager
                .select_wallet(&WalletOption::from(WalletProvider::Nova))
                .await
                .map(|_| ()),
            2 => {
                let target = match rng.gen_range(0..3) {
                    0 => ALICE,
                    1 => BOB,
                    _ => "bogus",
                };
                h.manager.select_account(target).await.map(|_| ())
            }
            3 => h.manager.authenticate().await.map(|_| ()),
            4 => h.manager.refresh_session().await,
            5 => h.manager.restore_session().await.map(|_| ()),
            _ => {
                h.manager.logout().await;
                Ok(())
            }
        };

        let state = h.manager.snapshot();
        if let Err(violation) = state.check_invariants() {
            panic!("seed {seed} step {step}: {violation}: {state:?}");
        }
        let has_tokens = h.manager.has_tokens().await;
        if state.is_authenticated {
            assert!(has_tokens, "seed {seed} step {step}: authenticated without tokens");
        }
        if state.status == WalletStatus::Idle {
            assert!(!has_tokens, "seed {seed} step {step}: idle with tokens");
        }
    }
}

#[tokio::test]
async fn random_sequences_preserve_invariants() {
    for seed in [1, 7, 42, 1337, 9001] {
        run_random_sequence(seed, 300).await;
    }
}
