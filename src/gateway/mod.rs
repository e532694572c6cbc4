//! Auth gateway client interface.
//!
//! The gateway issues sign-in challenges, exchanges signed challenges for
//! bearer tokens, refreshes access tokens, and serves the read-only
//! dashboard data for the authenticated account.

pub mod http;
pub mod types;

use async_trait::async_trait;
use secrecy::SecretString;

use crate::error::GatewayError;

pub use self::http::HttpAuthGateway;
pub use self::types::{
    AuthResponse, ChallengeRequest, ChallengeResponse, RateLimits, RefreshTokenRequest,
    RefreshTokenResponse, RegenerateKeyResponse, RequestLog, RequestLogPage, RequestLogQuery,
    RequestStats, SandboxUser, Tier, UsageSnapshot, VerifyRequest,
};

/// Remote auth gateway. `Unauthorized` from any bearer-authenticated call
/// means the access (or refresh) token is no longer valid.
#[async_trait]
pub trait AuthGateway: Send + Sync {
    /// `POST /challenge`
    async fn challenge(&self, req: &ChallengeRequest) -> Result<ChallengeResponse, GatewayError>;

    /// `POST /verify`
    async fn verify(&self, req: &VerifyRequest) -> Result<AuthResponse, GatewayError>;

    /// `POST /refresh`
    async fn refresh(&self, req: &RefreshTokenRequest)
    -> Result<RefreshTokenResponse, GatewayError>;

    /// `POST /regenerate-key`
    async fn regenerate_key(
        &self,
        access_token: &SecretString,
    ) -> Result<RegenerateKeyResponse, GatewayError>;

    /// `GET /me`
    async fn profile(&self, access_token: &SecretString) -> Result<SandboxUser, GatewayError>;

    /// `GET /logs`
    async fn request_logs(
        &self,
        access_token: &SecretString,
        query: &RequestLogQuery,
    ) -> Result<RequestLogPage, GatewayError>;

    /// `GET /stats`
    async fn request_stats(&self, access_token: &SecretString)
    -> Result<RequestStats, GatewayError>;
}
