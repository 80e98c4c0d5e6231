use serde::{Deserialize, Serialize};

use crate::models::Message;

// -- JWT Claims --

/// Claims issued by the auth service. Shared by the REST middleware and the
/// WebSocket upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub exp: usize,
}

// -- Upstream services --

/// Envelope used by the auth and user services: `{success, data, message}`.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendshipData {
    pub is_friend: bool,
}

#[derive(Debug, Deserialize)]
pub struct VerifiedUserData {
    pub user: VerifiedUser,
}

#[derive(Debug, Deserialize)]
pub struct VerifiedUser {
    pub username: String,
}

// -- REST responses --

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct HistoryData {
    pub messages: Vec<Message>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCountData {
    pub unread_count: u64,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> SuccessResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub success: bool,
    pub message: String,
    pub count: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub success: bool,
    pub message: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub online_users: usize,
}
