use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use thiserror::Error;

use duet_types::api::{Envelope, FriendshipData};

use crate::authz::FriendshipOracle;

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("invalid base url: {0}")]
    InvalidUrl(String),
}

/// Friendship oracle backed by the user service:
/// `GET {base}/users/verify-friendship/{other}` with the caller's bearer token.
#[derive(Clone)]
pub struct HttpFriendshipOracle {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpFriendshipOracle {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, OracleError> {
        let base_url = Url::parse(base_url).map_err(|e| OracleError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(OracleError::InvalidUrl(base_url.to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    fn endpoint(&self, other: &str) -> Result<Url, OracleError> {
        let mut url = self.base_url.clone();
        {
            // Pushing a segment percent-encodes it, so usernames cannot alter the path
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| OracleError::InvalidUrl(self.base_url.to_string()))?;
            segments
                .pop_if_empty()
                .extend(["users", "verify-friendship", other]);
        }
        Ok(url)
    }
}

#[async_trait]
impl FriendshipOracle for HttpFriendshipOracle {
    async fn is_friend(&self, other: &str, token: &str) -> Result<bool, OracleError> {
        let response = self
            .client
            .get(self.endpoint(other)?)
            .bearer_auth(token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }

        let body: Envelope<FriendshipData> = response.json().await?;
        match (body.success, body.data) {
            (true, Some(data)) => Ok(data.is_friend),
            (_, _) => Err(OracleError::Rejected(
                body.message.unwrap_or_else(|| "unsuccessful response".into()),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::Path,
        http::{HeaderMap, StatusCode, header},
        routing::get,
    };
    use serde_json::{Value, json};

    /// User-service stand-in: "alice-token" is friends with bob and "carol smith".
    async fn verify(Path(other): Path<String>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        match (auth, other.as_str()) {
            ("Bearer alice-token", "bob" | "carol smith") => {
                (StatusCode::OK, Json(json!({"success": true, "data": {"isFriend": true}})))
            }
            ("Bearer alice-token", "broken") => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"success": false, "message": "Internal server error"})),
            ),
            ("Bearer alice-token", "odd") => {
                (StatusCode::OK, Json(json!({"success": false, "message": "nope"})))
            }
            ("Bearer alice-token", _) => {
                (StatusCode::OK, Json(json!({"success": true, "data": {"isFriend": false}})))
            }
            _ => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"success": false, "message": "Invalid token."})),
            ),
        }
    }

    async fn spawn_user_service() -> String {
        let app = Router::new().route("/users/verify-friendship/{username}", get(verify));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn reads_is_friend_flag() {
        let base = spawn_user_service().await;
        let oracle = HttpFriendshipOracle::new(&base, Duration::from_secs(2)).unwrap();

        assert!(oracle.is_friend("bob", "alice-token").await.unwrap());
        assert!(!oracle.is_friend("mallory", "alice-token").await.unwrap());
    }

    #[tokio::test]
    async fn encodes_username_as_one_segment() {
        let base = spawn_user_service().await;
        let oracle =
            HttpFriendshipOracle::new(&format!("{base}/"), Duration::from_secs(2)).unwrap();

        assert!(oracle.is_friend("carol smith", "alice-token").await.unwrap());
        assert!(
            oracle
                .endpoint("a/b")
                .unwrap()
                .path()
                .ends_with("/users/verify-friendship/a%2Fb")
        );
    }

    #[tokio::test]
    async fn non_success_is_an_error() {
        let base = spawn_user_service().await;
        let oracle = HttpFriendshipOracle::new(&base, Duration::from_secs(2)).unwrap();

        assert!(matches!(
            oracle.is_friend("broken", "alice-token").await,
            Err(OracleError::Status(500))
        ));
        assert!(matches!(
            oracle.is_friend("bob", "stolen").await,
            Err(OracleError::Status(401))
        ));
        assert!(matches!(
            oracle.is_friend("odd", "alice-token").await,
            Err(OracleError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_service_is_an_error() {
        // Bind then drop to get a port with nothing listening
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let oracle =
            HttpFriendshipOracle::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        assert!(matches!(
            oracle.is_friend("bob", "alice-token").await,
            Err(OracleError::Transport(_))
        ));
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(HttpFriendshipOracle::new("not a url", Duration::from_secs(1)).is_err());
        let mailto = HttpFriendshipOracle::new("mailto:ops@example.com", Duration::from_secs(1));
        assert!(mailto.is_err());
    }
}
