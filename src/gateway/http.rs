//! HTTP implementation of [`AuthGateway`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{GatewayError, redact_sensitive_detail};
use crate::gateway::AuthGateway;
use crate::gateway::types::{
    AuthResponse, ChallengeRequest, ChallengeResponse, RefreshTokenRequest, RefreshTokenResponse,
    RegenerateKeyResponse, RequestLogPage, RequestLogQuery, RequestStats, SandboxUser,
    VerifyRequest,
};

/// reqwest-backed gateway client rooted at a base URL such as
/// `https://api.example.com/api/sandbox`.
#[derive(Debug, Clone)]
pub struct HttpAuthGateway {
    base_url: String,
    client: Client,
}

impl HttpAuthGateway {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Network(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn request_json<B, T>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        bearer: Option<&SecretString>,
    ) -> Result<T, GatewayError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.url(path);
        let mut request = self.client.request(method.clone(), &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        if let Some(token) = bearer {
            request = request.bearer_auth(token.expose_secret());
        }

        let started = std::time::Instant::now();
        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Network(format!("{} {} failed: {}", method, path, e)))?;
        let status = response.status();
        tracing::debug!(
            method = %method,
            path,
            status = status.as_u16(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Auth gateway response"
        );

        let bytes = response
            .bytes()
            .await
            .map_err(|e| GatewayError::Network(format!("response read failed: {e}")))?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(GatewayError::Unauthorized);
        }
        if !status.is_success() {
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                message: error_detail(&bytes),
            });
        }

        serde_json::from_slice::<T>(&bytes).map_err(|e| {
            GatewayError::InvalidResponse(format!("{} {}: {}", method, path, e))
        })
    }
}

/// Pull a readable message out of an error body (`{"error": ...}` or
/// `{"message": ...}`, else the raw text).
fn error_detail(body: &[u8]) -> String {
    let parsed = serde_json::from_slice::<Value>(body).ok();
    let detail = parsed
        .as_ref()
        .and_then(|v| v.get("error").or_else(|| v.get("message")))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| String::from_utf8_lossy(body).trim().to_string());
    if detail.is_empty() {
        return "Unknown gateway error".to_string();
    }
    redact_sensitive_detail(&detail)
}

#[async_trait]
impl AuthGateway for HttpAuthGateway {
    async fn challenge(&self, req: &ChallengeRequest) -> Result<ChallengeResponse, GatewayError> {
        self.request_json(Method::POST, "/challenge", Some(req), None)
            .await
    }

    async fn verify(&self, req: &VerifyRequest) -> Result<AuthResponse, GatewayError> {
        self.request_json(Method::POST, "/verify", Some(req), None)
            .await
    }

    async fn refresh(
        &self,
        req: &RefreshTokenRequest,
    ) -> Result<RefreshTokenResponse, GatewayError> {
        self.request_json(Method::POST, "/refresh", Some(req), None)
            .await
    }

    async fn regenerate_key(
        &self,
        access_token: &SecretString,
    ) -> Result<RegenerateKeyResponse, GatewayError> {
        self.request_json(
            Method::POST,
            "/regenerate-key",
            Some(&serde_json::json!({})),
            Some(access_token),
        )
        .await
    }

    async fn profile(&self, access_token: &SecretString) -> Result<SandboxUser, GatewayError> {
        self.request_json::<(), _>(Method::GET, "/me", None, Some(access_token))
            .await
    }

    async fn request_logs(
        &self,
        access_token: &SecretString,
        query: &RequestLogQuery,
    ) -> Result<RequestLogPage, GatewayError> {
        let qs = query.to_query_string();
        let path = if qs.is_empty() {
            "/logs".to_string()
        } else {
            format!("/logs?{qs}")
        };
        self.request_json::<(), _>(Method::GET, &path, None, Some(access_token))
            .await
    }

    async fn request_stats(
        &self,
        access_token: &SecretString,
    ) -> Result<RequestStats, GatewayError> {
        self.request_json::<(), _>(Method::GET, "/stats", None, Some(access_token))
            .await
    }
}
