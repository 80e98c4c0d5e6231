use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{DecodingKey, Validation, decode};
use reqwest::Url;
use thiserror::Error;

use duet_db::MessageStore;
use duet_gateway::{AuthorizationGateway, RoutingEngine};
use duet_types::api::{Claims, Envelope, VerifiedUserData};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub store: Arc<dyn MessageStore>,
    pub authz: AuthorizationGateway,
    pub verifier: Arc<dyn TokenVerifier>,
    pub engine: RoutingEngine,
}

/// The identity a bearer token resolved to, plus the token itself so it can be
/// forwarded to upstream services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub username: String,
    pub token: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("no token provided")]
    Missing,

    #[error("invalid token: {0}")]
    Invalid(String),

    #[error("auth service unavailable: {0}")]
    Unavailable(String),
}

/// Resolves bearer tokens to identities.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError>;
}

/// Verifies HS256 tokens locally with the secret shared with the auth service.
pub struct JwtTokenVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtTokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
        }
    }
}

#[async_trait]
impl TokenVerifier for JwtTokenVerifier {
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        let data = decode::<Claims>(token, &self.key, &self.validation)
            .map_err(|e| AuthError::Invalid(e.to_string()))?;

        Ok(AuthenticatedUser {
            username: data.claims.username,
            token: token.to_string(),
        })
    }
}

/// Delegates verification to the auth service: `GET {base}/auth/verify`.
pub struct HttpTokenVerifier {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpTokenVerifier {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, AuthError> {
        // Keep any path prefix on the base when joining
        let base = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let endpoint = Url::parse(&base)
            .and_then(|base| base.join("auth/verify"))
            .map_err(|e| AuthError::Unavailable(format!("bad auth service url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;
        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl TokenVerifier for HttpTokenVerifier {
    async fn verify(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        if token.is_empty() {
            return Err(AuthError::Missing);
        }

        let response = self
            .client
            .get(self.endpoint.clone())
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AuthError::Invalid(format!("auth service answered {}", response.status())));
        }

        let body: Envelope<VerifiedUserData> = response
            .json()
            .await
            .map_err(|e| AuthError::Invalid(e.to_string()))?;

        match (body.success, body.data) {
            (true, Some(data)) if !data.user.username.is_empty() => Ok(AuthenticatedUser {
                username: data.user.username,
                token: token.to_string(),
            }),
            _ => Err(AuthError::Invalid(
                body.message.unwrap_or_else(|| "verification refused".into()),
            )),
        }
    }
}
