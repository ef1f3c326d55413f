//! secrets::github
//!
//! GitHub Actions repository secrets as a [`SecretSink`].
//!
//! # Protocol
//!
//! 1. `GET /repos/{owner}/{repo}/actions/secrets/public-key` returns the
//!    repository's sealing key (`key_id`, base64 `key`)
//! 2. The value is sealed to that key (libsodium sealed box) and base64
//!    encoded
//! 3. `PUT /repos/{owner}/{repo}/actions/secrets/{name}` with
//!    `{encrypted_value, key_id}` answers `201` (created) or `204` (updated)
//!
//! Public keys are cached per repository. If GitHub rejects a write made
//! with a cached key (`422`, typically after key rotation), the key is
//! fetched again and the write repeated once.
//!
//! # Security
//!
//! The plaintext value leaves this module only inside the sealed box. The
//! bearer token is marked sensitive in request headers and is redacted
//! from `Debug`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use crypto_box::aead::OsRng;
use crypto_box::PublicKey;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};

use super::traits::{SecretSink, UpsertOutcome};
use crate::auth::TokenProvider;
use crate::core::config::DEFAULT_API_BASE;
use crate::core::error::ApiError;
use crate::core::secret::SecretValue;
use crate::core::types::{Namespace, SecretName};

/// User-Agent header value for API requests.
const USER_AGENT_VALUE: &str = concat!("keyrelay/", env!("CARGO_PKG_VERSION"));

/// REST API version pinned in every request.
const API_VERSION: &str = "2022-11-28";

/// A repository's sealing key.
#[derive(Debug, Clone)]
struct RepoPublicKey {
    key_id: String,
    key: PublicKey,
}

#[derive(Deserialize)]
struct PublicKeyResponse {
    key_id: String,
    key: String,
}

#[derive(Serialize)]
struct PutSecretRequest<'a> {
    encrypted_value: String,
    key_id: &'a str,
}

#[derive(Deserialize)]
struct GitHubErrorResponse {
    message: String,
}

/// GitHub Actions secrets adapter.
pub struct GitHubSecretSink {
    /// HTTP client for making requests
    client: Client,
    /// Token provider, asked on every request
    token_provider: Arc<dyn TokenProvider>,
    /// API base URL (configurable for GitHub Enterprise)
    api_base: String,
    /// Sealing keys by repository
    key_cache: Mutex<HashMap<Namespace, RepoPublicKey>>,
}

// Custom Debug to avoid exposing token material
impl std::fmt::Debug for GitHubSecretSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubSecretSink")
            .field("token_source", &self.token_provider.source())
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl GitHubSecretSink {
    /// Create a sink against `api.github.com`.
    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self::with_api_base(provider, DEFAULT_API_BASE)
    }

    /// Create a sink against a custom API base URL (GitHub Enterprise, tests).
    pub fn with_api_base(provider: Arc<dyn TokenProvider>, api_base: impl Into<String>) -> Self {
        let api_base: String = api_base.into();
        Self {
            client: Client::new(),
            token_provider: provider,
            api_base: api_base.trim_end_matches('/').to_string(),
            key_cache: Mutex::new(HashMap::new()),
        }
    }

    /// Build common headers for API requests.
    async fn headers(&self) -> Result<HeaderMap, ApiError> {
        let token = self
            .token_provider
            .bearer_token()
            .await
            .map_err(|e| ApiError::PermissionDenied(e.to_string()))?;
        let mut authorization = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
            .map_err(|_| {
                ApiError::PermissionDenied("token contains invalid header characters".into())
            })?;
        authorization.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, authorization);
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static(API_VERSION));
        Ok(headers)
    }

    /// Build URL for a repository secrets endpoint.
    fn secrets_url(&self, namespace: &Namespace, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/actions/secrets/{}",
            self.api_base,
            namespace.owner(),
            namespace.repo(),
            path
        )
    }

    fn cached_key(&self, namespace: &Namespace) -> Option<RepoPublicKey> {
        self.key_cache
            .lock()
            .ok()
            .and_then(|cache| cache.get(namespace).cloned())
    }

    fn invalidate_key(&self, namespace: &Namespace) {
        if let Ok(mut cache) = self.key_cache.lock() {
            cache.remove(namespace);
        }
    }

    /// Fetch the repository's sealing key.
    async fn fetch_public_key(&self, namespace: &Namespace) -> Result<RepoPublicKey, ApiError> {
        tracing::debug!(namespace = %namespace, "fetching secrets public key");
        let response = self
            .client
            .get(self.secrets_url(namespace, "public-key"))
            .headers(self.headers().await?)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(error_from_response(response, "public key").await);
        }

        let body: PublicKeyResponse = response.json().await.map_err(|e| {
            ApiError::Malformed(format!("cannot parse public key response: {}", e))
        })?;
        let key = decode_public_key(&body.key)?;
        let fetched = RepoPublicKey {
            key_id: body.key_id,
            key,
        };

        if let Ok(mut cache) = self.key_cache.lock() {
            cache.insert(namespace.clone(), fetched.clone());
        }
        Ok(fetched)
    }

    async fn put_secret(
        &self,
        namespace: &Namespace,
        name: &SecretName,
        value: &SecretValue,
        key: &RepoPublicKey,
    ) -> Result<Response, ApiError> {
        let request = PutSecretRequest {
            encrypted_value: seal(&key.key, value)?,
            key_id: &key.key_id,
        };
        self.client
            .put(self.secrets_url(namespace, name.as_str()))
            .headers(self.headers().await?)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)
    }
}

/// Decode a base64 Curve25519 public key.
fn decode_public_key(encoded: &str) -> Result<PublicKey, ApiError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| ApiError::Malformed(format!("public key is not base64: {}", e)))?;
    let bytes: [u8; crypto_box::KEY_SIZE] = bytes.as_slice().try_into().map_err(|_| {
        ApiError::Malformed(format!(
            "public key has {} bytes, expected {}",
            bytes.len(),
            crypto_box::KEY_SIZE
        ))
    })?;
    Ok(PublicKey::from(bytes))
}

/// Seal `value` to `key` and base64 encode the result.
fn seal(key: &PublicKey, value: &SecretValue) -> Result<String, ApiError> {
    let sealed = key
        .seal(&mut OsRng, value.expose().as_bytes())
        .map_err(|_| ApiError::Malformed("cannot seal secret value".into()))?;
    Ok(BASE64.encode(sealed))
}

/// Classify a transport-level failure.
fn classify_transport(err: reqwest::Error) -> ApiError {
    if err.is_decode() || err.is_builder() {
        ApiError::Malformed(format!("GitHub request failed: {}", err))
    } else {
        ApiError::Transient(format!("GitHub request failed: {}", err))
    }
}

/// Map an HTTP error status to the taxonomy.
pub fn classify_status(status: StatusCode, rate_limited: bool, message: String) -> ApiError {
    match status {
        StatusCode::FORBIDDEN if rate_limited => {
            ApiError::Transient(format!("rate limited: {}", message))
        }
        StatusCode::UNAUTHORIZED => ApiError::PermissionDenied(format!("invalid token: {}", message)),
        StatusCode::FORBIDDEN => ApiError::PermissionDenied(message),
        StatusCode::NOT_FOUND => ApiError::NotFound(message),
        StatusCode::CONFLICT => ApiError::Conflict(message),
        StatusCode::TOO_MANY_REQUESTS => ApiError::Transient(format!("rate limited: {}", message)),
        _ if status.is_server_error() => {
            ApiError::Transient(format!("GitHub server error {}: {}", status.as_u16(), message))
        }
        _ => ApiError::Malformed(format!("unexpected status {}: {}", status.as_u16(), message)),
    }
}

/// Consume an error response into an [`ApiError`].
async fn error_from_response(response: Response, what: &str) -> ApiError {
    let status = response.status();
    let rate_limited = response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        == Some("0");
    let message = match response.json::<GitHubErrorResponse>().await {
        Ok(err) => format!("{}: {}", what, err.message),
        Err(_) => format!("{}: no error message", what),
    };
    classify_status(status, rate_limited, message)
}

#[async_trait]
impl SecretSink for GitHubSecretSink {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn upsert(
        &self,
        namespace: &Namespace,
        name: &SecretName,
        value: &SecretValue,
    ) -> Result<UpsertOutcome, ApiError> {
        tracing::debug!(namespace = %namespace, secret = %name, "upserting secret");

        let (mut key, mut from_cache) = match self.cached_key(namespace) {
            Some(key) => (key, true),
            None => (self.fetch_public_key(namespace).await?, false),
        };

        loop {
            let response = self.put_secret(namespace, name, value, &key).await?;
            match response.status() {
                StatusCode::CREATED => return Ok(UpsertOutcome::Created),
                StatusCode::NO_CONTENT => return Ok(UpsertOutcome::Updated),
                status if status.is_success() => return Ok(UpsertOutcome::Updated),
                StatusCode::UNPROCESSABLE_ENTITY if from_cache => {
                    tracing::debug!(namespace = %namespace, "sealing key rejected, refetching");
                    self.invalidate_key(namespace);
                    key = self.fetch_public_key(namespace).await?;
                    from_cache = false;
                }
                _ => return Err(error_from_response(response, name.as_str()).await),
            }
        }
    }
}
