//! Wallet session state machine.
//!
//! Lifecycle: `idle -> connecting -> connected -> signing -> success | error`,
//! with `logout` returning to `idle` from anywhere.
//!
//! The [`SessionManager`] exclusively owns the one [`WalletState`]. Every
//! committed change is published on a `watch` channel, so consumers only
//! ever see immutable snapshots. Operations that suspend on an extension or
//! the auth gateway register as the single in-flight operation; a second one
//! is refused with [`SessionError::OperationInProgress`] rather than queued.
//! `logout` cancels whatever is in flight, and a result that arrives for an
//! operation id that is no longer current is dropped without touching state.

pub mod tokens;

use std::future::Future;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, oneshot, watch};

use crate::error::{ExtensionError, GatewayError, SessionError};
use crate::gateway::{
    AuthGateway, AuthResponse, ChallengeRequest, RefreshTokenRequest, RegenerateKeyResponse,
    RequestLogPage, RequestLogQuery, RequestStats, SandboxUser, VerifyRequest,
};
use crate::wallet::{
    ExtensionRegistry, WalletAccount, WalletOption, WalletProvider, common_wallets,
};

pub use self::tokens::{AuthTokens, FileTokenStore, MemoryTokenStore, TokenStore};

/// Session lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Signing,
    Success,
    Error,
}

impl WalletStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Signing => "signing",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error attached to a snapshot for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateError {
    pub code: String,
    pub message: String,
}

impl From<&SessionError> for StateError {
    fn from(err: &SessionError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Snapshot of the wallet session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WalletState {
    pub status: WalletStatus,
    pub is_connected: bool,
    pub is_authenticated: bool,
    pub accounts: Vec<WalletAccount>,
    pub selected_account: Option<WalletAccount>,
    pub user: Option<SandboxUser>,
    pub connected_wallet_source: Option<WalletProvider>,
    pub error: Option<StateError>,
}

impl WalletState {
    /// Check the consistency rules every published snapshot satisfies.
    pub fn check_invariants(&self) -> Result<(), String> {
        let success_with_user = self.status == WalletStatus::Success && self.user.is_some();
        if self.is_authenticated != success_with_user {
            return Err(format!(
                "is_authenticated={} but status={} user_present={}",
                self.is_authenticated,
                self.status,
                self.user.is_some()
            ));
        }
        if let Some(selected) = &self.selected_account
            && !self.accounts.contains(selected)
        {
            return Err(format!(
                "selected account {} is not in accounts",
                selected.address
            ));
        }
        if self.is_connected && self.accounts.is_empty() {
            return Err("is_connected with no accounts".to_string());
        }
        match self.status {
            WalletStatus::Idle => {
                if self.is_connected || !self.accounts.is_empty() || self.user.is_some() {
                    return Err("idle state holds session data".to_string());
                }
            }
            WalletStatus::Connecting => {
                if self.is_connected || self.connected_wallet_source.is_none() {
                    return Err("connecting without a wallet source".to_string());
                }
            }
            WalletStatus::Connected | WalletStatus::Signing => {
                if !self.is_connected {
                    return Err(format!("{} but not connected", self.status));
                }
            }
            WalletStatus::Success | WalletStatus::Error => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperationKind {
    SelectWallet,
    Authenticate,
    Refresh,
    Restore,
    RegenerateKey,
}

impl OperationKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::SelectWallet => "select_wallet",
            Self::Authenticate => "authenticate",
            Self::Refresh => "refresh_session",
            Self::Restore => "restore_session",
            Self::RegenerateKey => "regenerate_key",
        }
    }
}

struct InFlight {
    id: u64,
    kind: OperationKind,
    cancel: Option<oneshot::Sender<()>>,
}

struct Inner {
    state: WalletState,
    tokens: Option<AuthTokens>,
    in_flight: Option<InFlight>,
    next_op_id: u64,
    /// Bumped on every reset; authorized reads issued under an older epoch
    /// never mutate state.
    epoch: u64,
    /// Bumped whenever a token pair is installed; a bearer read that was
    /// issued with an older pair never resets the session.
    token_generation: u64,
}

impl Inner {
    fn install_tokens(&mut self, tokens: AuthTokens) {
        self.tokens = Some(tokens);
        self.token_generation += 1;
    }

    fn begin(&mut self, kind: OperationKind) -> Result<(u64, oneshot::Receiver<()>), SessionError> {
        if let Some(op) = &self.in_flight {
            return Err(SessionError::OperationInProgress {
                operation: op.kind.as_str(),
            });
        }
        self.next_op_id += 1;
        let (tx, rx) = oneshot::channel();
        self.in_flight = Some(InFlight {
            id: self.next_op_id,
            kind,
            cancel: Some(tx),
        });
        Ok((self.next_op_id, rx))
    }

    /// Release the in-flight slot if `op_id` still owns it.
    fn finish(&mut self, op_id: u64) -> bool {
        match &self.in_flight {
            Some(op) if op.id == op_id => {
                self.in_flight = None;
                true
            }
            _ => false,
        }
    }

    fn ensure_idle_slot(&self) -> Result<(), SessionError> {
        match &self.in_flight {
            Some(op) => Err(SessionError::OperationInProgress {
                operation: op.kind.as_str(),
            }),
            None => Ok(()),
        }
    }
}

async fn cancellable<T>(
    fut: impl Future<Output = Result<T, SessionError>>,
    cancel: oneshot::Receiver<()>,
) -> Result<T, SessionError> {
    tokio::select! {
        biased;
        _ = cancel => Err(SessionError::Cancelled),
        result = fut => result,
    }
}

/// Owner of the wallet session. Cheap to share behind an `Arc`.
pub struct SessionManager {
    registry: ExtensionRegistry,
    gateway: Arc<dyn AuthGateway>,
    store: Arc<dyn TokenStore>,
    app_name: String,
    inner: Mutex<Inner>,
    state_tx: watch::Sender<WalletState>,
}

impl SessionManager {
    pub fn new(
        registry: ExtensionRegistry,
        gateway: Arc<dyn AuthGateway>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        let (state_tx, _) = watch::channel(WalletState::default());
        Self {
            registry,
            gateway,
            store,
            app_name: "Sandbox Dashboard".to_string(),
            inner: Mutex::new(Inner {
                state: WalletState::default(),
                tokens: None,
                in_flight: None,
                next_op_id: 0,
                epoch: 0,
                token_generation: 0,
            }),
            state_tx,
        }
    }

    /// Name the dapp presents to extensions when requesting access.
    pub fn with_app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = app_name.into();
        self
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> WalletState {
        self.state_tx.borrow().clone()
    }

    /// Receive every committed state change.
    pub fn subscribe(&self) -> watch::Receiver<WalletState> {
        self.state_tx.subscribe()
    }

    /// The wallet catalog with `installed` filled in.
    pub fn detect_wallets(&self) -> Vec<WalletOption> {
        self.registry.detect(&common_wallets())
    }

    /// Whether an access/refresh token pair is currently held.
    pub async fn has_tokens(&self) -> bool {
        self.inner.lock().await.tokens.is_some()
    }

    /// Current access token, when authenticated.
    pub async fn access_token(&self) -> Option<SecretString> {
        let inner = self.inner.lock().await;
        if inner.state.status != WalletStatus::Success {
            return None;
        }
        inner.tokens.as_ref().map(|t| t.access_token.clone())
    }

    fn commit(&self, inner: &mut Inner, next: WalletState, op_id: Option<u64>) {
        if inner.state.status != next.status {
            tracing::info!(
                op_id,
                from = inner.state.status.as_str(),
                to = next.status.as_str(),
                "Wallet session transition"
            );
        }
        debug_assert!(next.check_invariants().is_ok(), "{:?}", next.check_invariants());
        inner.state = next;
        self.state_tx.send_replace(inner.state.clone());
    }

    /// Drop all session data and return to `idle`, cancelling anything in flight.
    async fn reset(&self, inner: &mut Inner, reason: &str) {
        if let Some(mut op) = inner.in_flight.take() {
            tracing::info!(
                op_id = op.id,
                operation = op.kind.as_str(),
                "Cancelling in-flight operation"
            );
            if let Some(cancel) = op.cancel.take() {
                let _ = cancel.send(());
            }
        }
        inner.epoch += 1;
        inner.tokens = None;
        self.commit(inner, WalletState::default(), None);
        tracing::info!(reason, "Wallet session reset");

        if let Err(e) = self.store.clear().await {
            tracing::warn!("Failed to clear persisted auth tokens: {}", e);
        }
    }

    async fn persist(&self, tokens: &AuthTokens) {
        if let Err(e) = self.store.save(tokens).await {
            tracing::warn!("Failed to persist auth tokens: {}", e);
        }
    }

    /// `idle|error|connected -> connecting -> connected|error`.
    pub async fn select_wallet(&self, option: &WalletOption) -> Result<WalletState, SessionError> {
        let (op_id, cancel, provider, extension) = {
            let mut inner = self.inner.lock().await;
            inner.ensure_idle_slot()?;
            match inner.state.status {
                WalletStatus::Idle | WalletStatus::Error | WalletStatus::Connected => {}
                status => {
                    return Err(SessionError::InvalidTransition {
                        operation: OperationKind::SelectWallet.as_str(),
                        status: status.as_str(),
                    });
                }
            }

            let found = option
                .provider()
                .and_then(|p| self.registry.get(p).map(|ext| (p, ext)));
            let Some((provider, extension)) = found else {
                let err = SessionError::ExtensionNotFound {
                    wallet: option.id.clone(),
                };
                tracing::warn!(wallet = %option.id, "Wallet extension not installed");
                let mut next = inner.state.clone();
                next.error = Some(StateError::from(&err));
                self.commit(&mut inner, next, None);
                return Err(err);
            };

            let (op_id, cancel) = inner.begin(OperationKind::SelectWallet)?;
            let next = WalletState {
                status: WalletStatus::Connecting,
                connected_wallet_source: Some(provider),
                ..WalletState::default()
            };
            self.commit(&mut inner, next, Some(op_id));
            (op_id, cancel, provider, extension)
        };

        let app_name = self.app_name.clone();
        let result = cancellable(
            async move {
                extension
                    .list_accounts(&app_name)
                    .await
                    .map_err(SessionError::from_extension)
            },
            cancel,
        )
        .await;

        let mut inner = self.inner.lock().await;
        if !inner.finish(op_id) {
            tracing::debug!(op_id, "Discarding stale select_wallet result");
            return Err(SessionError::Cancelled);
        }

        let accounts = match result {
            Ok(accounts) if !accounts.is_empty() => accounts,
            Ok(_) => {
                let err = SessionError::from_extension(ExtensionError::NoAccounts);
                return Err(self.fail_connect(&mut inner, provider, op_id, err));
            }
            Err(err) => return Err(self.fail_connect(&mut inner, provider, op_id, err)),
        };

        tracing::info!(wallet = %provider, accounts = accounts.len(), "Wallet connected");
        // Only a lone account is picked automatically.
        let selected_account = if accounts.len() == 1 {
            accounts.first().cloned()
        } else {
            None
        };
        let next = WalletState {
            status: WalletStatus::Connected,
            is_connected: true,
            accounts,
            selected_account,
            connected_wallet_source: Some(provider),
            ..WalletState::default()
        };
        self.commit(&mut inner, next, Some(op_id));
        Ok(inner.state.clone())
    }

    fn fail_connect(
        &self,
        inner: &mut Inner,
        provider: WalletProvider,
        op_id: u64,
        err: SessionError,
    ) -> SessionError {
        tracing::warn!(wallet = %provider, error = %err, "Wallet connection failed");
        let next = WalletState {
            status: WalletStatus::Error,
            connected_wallet_source: Some(provider),
            error: Some(StateError::from(&err)),
            ..WalletState::default()
        };
        self.commit(inner, next, Some(op_id));
        err
    }

    /// Narrow `selected_account` to one of the connected accounts.
    pub async fn select_account(&self, address: &str) -> Result<WalletState, SessionError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_idle_slot()?;

        let status = inner.state.status;
        let retryable_error = status == WalletStatus::Error && inner.state.is_connected;
        if status != WalletStatus::Connected && !retryable_error {
            return Err(SessionError::InvalidTransition {
                operation: "select_account",
                status: status.as_str(),
            });
        }

        let address = address.trim();
        let account = inner
            .state
            .accounts
            .iter()
            .find(|a| a.address == address)
            .cloned()
            .ok_or_else(|| SessionError::AccountNotFound {
                address: address.to_string(),
            })?;

        let next = WalletState {
            status: WalletStatus::Connected,
            selected_account: Some(account),
            error: None,
            ..inner.state.clone()
        };
        self.commit(&mut inner, next, None);
        Ok(inner.state.clone())
    }

    /// Challenge-response sign-in: `connected -> signing -> success|error`.
    pub async fn authenticate(&self) -> Result<AuthResponse, SessionError> {
        let (op_id, cancel, account, extension) = {
            let mut inner = self.inner.lock().await;
            inner.ensure_idle_slot()?;
            if inner.state.status != WalletStatus::Connected {
                return Err(SessionError::InvalidTransition {
                    operation: OperationKind::Authenticate.as_str(),
                    status: inner.state.status.as_str(),
                });
            }
            let account = inner
                .state
                .selected_account
                .clone()
                .ok_or(SessionError::NoAccountSelected)?;
            let extension = inner
                .state
                .connected_wallet_source
                .and_then(|p| self.registry.get(p))
                .ok_or_else(|| SessionError::ExtensionNotFound {
                    wallet: inner
                        .state
                        .connected_wallet_source
                        .map(|p| p.id().to_string())
                        .unwrap_or_default(),
                })?;

            let (op_id, cancel) = inner.begin(OperationKind::Authenticate)?;
            let next = WalletState {
                status: WalletStatus::Signing,
                error: None,
                ..inner.state.clone()
            };
            self.commit(&mut inner, next, Some(op_id));
            (op_id, cancel, account, extension)
        };

        let gateway = Arc::clone(&self.gateway);
        let signer = account.clone();
        let flow = async move {
            let challenge = gateway
                .challenge(&ChallengeRequest {
                    polkadot_address: signer.address.clone(),
                })
                .await
                .map_err(|e| SessionError::from_gateway(e, true))?;

            tracing::debug!(address = %signer.address, "Requesting signature from extension");
            let signature = extension
                .sign_raw(&signer, &challenge.challenge)
                .await
                .map_err(SessionError::from_extension)?;

            let auth = gateway
                .verify(&VerifyRequest {
                    polkadot_address: signer.address.clone(),
                    challenge: challenge.challenge,
                    signature,
                    nonce: challenge.nonce,
                })
                .await
                .map_err(|e| SessionError::from_gateway(e, true))?;

            if auth.user.polkadot_address.trim() != signer.address {
                return Err(SessionError::InvalidResponse {
                    reason: "authenticated user does not match signing account".to_string(),
                });
            }
            Ok(auth)
        };
        let result = cancellable(flow, cancel).await;

        let mut inner = self.inner.lock().await;
        if !inner.finish(op_id) {
            tracing::debug!(op_id, "Discarding stale authenticate result");
            return Err(SessionError::Cancelled);
        }

        match result {
            Ok(auth) => {
                let tokens = AuthTokens::new(auth.access_token.clone(), auth.refresh_token.clone());
                self.persist(&tokens).await;
                inner.install_tokens(tokens);
                let next = WalletState {
                    status: WalletStatus::Success,
                    is_authenticated: true,
                    user: Some(auth.user.clone()),
                    error: None,
                    ..inner.state.clone()
                };
                self.commit(&mut inner, next, Some(op_id));
                tracing::info!(address = %account.address, tier = %auth.user.tier, "Authenticated");
                Ok(auth)
            }
            Err(err) => {
                tracing::warn!(address = %account.address, error = %err, "Authentication failed");
                let next = WalletState {
                    status: WalletStatus::Error,
                    is_authenticated: false,
                    user: None,
                    error: Some(StateError::from(&err)),
                    ..inner.state.clone()
                };
                self.commit(&mut inner, next, Some(op_id));
                Err(err)
            }
        }
    }

    /// Exchange the refresh token for a new access token. One attempt only.
    pub async fn refresh_session(&self) -> Result<(), SessionError> {
        let (op_id, cancel, refresh_token) = {
            let mut inner = self.inner.lock().await;
            inner.ensure_idle_slot()?;
            let Some(tokens) = inner.tokens.clone() else {
                self.reset(&mut inner, "refresh without stored tokens").await;
                return Err(SessionError::SessionExpired);
            };
            let (op_id, cancel) = inner.begin(OperationKind::Refresh)?;
            (op_id, cancel, tokens.refresh_token)
        };

        let gateway = Arc::clone(&self.gateway);
        let result = cancellable(
            async move { request_refresh(gateway.as_ref(), &refresh_token).await },
            cancel,
        )
        .await;

        let mut inner = self.inner.lock().await;
        if !inner.finish(op_id) {
            tracing::debug!(op_id, "Discarding stale refresh result");
            return Err(SessionError::Cancelled);
        }

        match result {
            Ok(tokens) => {
                self.persist(&tokens).await;
                inner.install_tokens(tokens);
                tracing::info!(op_id, "Access token refreshed");
                Ok(())
            }
            Err(SessionError::SessionExpired) => {
                self.reset(&mut inner, "refresh token rejected").await;
                Err(SessionError::SessionExpired)
            }
            Err(err) => {
                tracing::warn!(op_id, error = %err, "Token refresh failed");
                Err(err)
            }
        }
    }

    /// Resume a persisted session: `idle -> success` when the stored tokens
    /// are still accepted. Returns `false` when nothing was stored.
    pub async fn restore_session(&self) -> Result<bool, SessionError> {
        let (op_id, cancel, tokens) = {
            let mut inner = self.inner.lock().await;
            inner.ensure_idle_slot()?;
            if inner.state.status != WalletStatus::Idle {
                return Err(SessionError::InvalidTransition {
                    operation: OperationKind::Restore.as_str(),
                    status: inner.state.status.as_str(),
                });
            }
            let tokens = match inner.tokens.clone() {
                Some(tokens) => Some(tokens),
                None => self.store.load().await?,
            };
            let Some(tokens) = tokens else {
                return Ok(false);
            };
            let (op_id, cancel) = inner.begin(OperationKind::Restore)?;
            (op_id, cancel, tokens)
        };

        let gateway = Arc::clone(&self.gateway);
        let flow = async move {
            let profile = gateway.profile(&tokens.access_token).await;
            match profile {
                Ok(user) => Ok((user, tokens, false)),
                Err(GatewayError::Unauthorized) => {
                    // Access token lapsed; one refresh then one profile fetch.
                    let refreshed = request_refresh(gateway.as_ref(), &tokens.refresh_token).await?;
                    let user = gateway
                        .profile(&refreshed.access_token)
                        .await
                        .map_err(|e| SessionError::from_gateway(e, false))?;
                    Ok((user, refreshed, true))
                }
                Err(e) => Err(SessionError::from_gateway(e, false)),
            }
        };
        let result = cancellable(flow, cancel).await;

        let mut inner = self.inner.lock().await;
        if !inner.finish(op_id) {
            tracing::debug!(op_id, "Discarding stale restore result");
            return Err(SessionError::Cancelled);
        }

        match result {
            Ok((user, tokens, refreshed)) => {
                if refreshed {
                    self.persist(&tokens).await;
                }
                inner.install_tokens(tokens);
                let next = WalletState {
                    status: WalletStatus::Success,
                    is_authenticated: true,
                    user: Some(user),
                    ..WalletState::default()
                };
                self.commit(&mut inner, next, Some(op_id));
                Ok(true)
            }
            Err(SessionError::SessionExpired) => {
                self.reset(&mut inner, "stored session expired").await;
                Err(SessionError::SessionExpired)
            }
            Err(err) => {
                tracing::warn!(op_id, error = %err, "Session restore failed");
                Err(err)
            }
        }
    }

    /// Explicit logout. Always lands in `idle`; safe to call repeatedly.
    pub async fn logout(&self) {
        let mut inner = self.inner.lock().await;
        self.reset(&mut inner, "logout").await;
    }

    /// Issue a new API key for the authenticated account.
    pub async fn regenerate_api_key(&self) -> Result<RegenerateKeyResponse, SessionError> {
        let (op_id, cancel, access_token) = {
            let mut inner = self.inner.lock().await;
            inner.ensure_idle_slot()?;
            let access_token = authorized_token(&inner)?;
            let (op_id, cancel) = inner.begin(OperationKind::RegenerateKey)?;
            (op_id, cancel, access_token)
        };

        let gateway = Arc::clone(&self.gateway);
        let result = cancellable(
            async move {
                gateway
                    .regenerate_key(&access_token)
                    .await
                    .map_err(|e| SessionError::from_gateway(e, false))
            },
            cancel,
        )
        .await;

        let mut inner = self.inner.lock().await;
        if !inner.finish(op_id) {
            return Err(SessionError::Cancelled);
        }
        if matches!(result, Err(SessionError::SessionExpired)) {
            self.reset(&mut inner, "access token rejected").await;
        } else if result.is_ok() {
            tracing::info!(op_id, "API key regenerated");
        }
        result
    }

    /// Re-fetch the account profile; rate limits and usage are taken as-is.
    pub async fn refresh_profile(&self) -> Result<SandboxUser, SessionError> {
        let gateway = Arc::clone(&self.gateway);
        let (user, epoch) = self
            .authorized(move |token| async move { gateway.profile(&token).await })
            .await?;

        let mut inner = self.inner.lock().await;
        if inner.epoch == epoch && inner.state.status == WalletStatus::Success {
            let next = WalletState {
                user: Some(user.clone()),
                ..inner.state.clone()
            };
            self.commit(&mut inner, next, None);
        }
        Ok(user)
    }

    /// Read the account's request log.
    pub async fn request_logs(&self, query: &RequestLogQuery) -> Result<RequestLogPage, SessionError> {
        let gateway = Arc::clone(&self.gateway);
        let query = query.clone();
        self.authorized(move |token| async move { gateway.request_logs(&token, &query).await })
            .await
            .map(|(page, _)| page)
    }

    /// Read aggregate request statistics.
    pub async fn request_stats(&self) -> Result<RequestStats, SessionError> {
        let gateway = Arc::clone(&self.gateway);
        self.authorized(move |token| async move { gateway.request_stats(&token).await })
            .await
            .map(|(stats, _)| stats)
    }

    /// Run a bearer-authenticated read. A rejected token forces logout unless
    /// the session has already moved on or the tokens were rotated since.
    async fn authorized<T, F, Fut>(&self, call: F) -> Result<(T, u64), SessionError>
    where
        F: FnOnce(SecretString) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let (token, epoch, generation) = {
            let inner = self.inner.lock().await;
            (authorized_token(&inner)?, inner.epoch, inner.token_generation)
        };

        match call(token).await {
            Ok(value) => Ok((value, epoch)),
            Err(e) => {
                let err = SessionError::from_gateway(e, false);
                if err == SessionError::SessionExpired {
                    let mut inner = self.inner.lock().await;
                    if inner.epoch == epoch && inner.token_generation == generation {
                        self.reset(&mut inner, "access token rejected").await;
                    } else {
                        tracing::debug!("Ignoring rejection of a superseded access token");
                    }
                }
                Err(err)
            }
        }
    }
}

fn authorized_token(inner: &Inner) -> Result<SecretString, SessionError> {
    if inner.state.status != WalletStatus::Success {
        return Err(SessionError::NotAuthenticated);
    }
    inner
        .tokens
        .as_ref()
        .map(|t| t.access_token.clone())
        .ok_or(SessionError::NotAuthenticated)
}

/// One refresh round-trip. A refused refresh token (401/400/403) is a
/// `SessionExpired`; anything else keeps its own classification.
async fn request_refresh(
    gateway: &dyn AuthGateway,
    refresh_token: &SecretString,
) -> Result<AuthTokens, SessionError> {
    let response = gateway
        .refresh(&RefreshTokenRequest {
            refresh_token: refresh_token.expose_secret().to_string(),
        })
        .await
        .map_err(|e| match e {
            GatewayError::Rejected {
                status: 400 | 403, ..
            } => SessionError::SessionExpired,
            other => SessionError::from_gateway(other, false),
        })?;

    let rotated = response
        .refresh_token
        .filter(|t| !t.trim().is_empty())
        .unwrap_or_else(|| refresh_token.expose_secret().to_string());
    Ok(AuthTokens::new(response.access_token, rotated))
}
