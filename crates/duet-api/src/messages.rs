use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use tracing::debug;

use duet_gateway::FriendshipVerdict;
use duet_types::api::{HistoryData, MarkReadResponse, Pagination, SuccessResponse, UnreadCountData};

use crate::auth::{AppState, AuthenticatedUser};
use crate::error::ApiError;

const DEFAULT_PAGE: u32 = 1;
const DEFAULT_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

/// GET /chat/history/{friend_username}
pub async fn get_history(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(friend): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<SuccessResponse<HistoryData>>, ApiError> {
    match state.authz.check(&user.username, &friend, &user.token).await {
        FriendshipVerdict::Friends => {}
        FriendshipVerdict::NotFriends => {
            return Err(ApiError::Forbidden(
                "You can only view chat history with friends".into(),
            ));
        }
        FriendshipVerdict::Unavailable => {
            return Err(ApiError::Upstream("Failed to verify friendship".into()));
        }
    }

    let page = query.page.unwrap_or(DEFAULT_PAGE).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LIMIT)
        .clamp(1, duet_db::store::MAX_PAGE_SIZE);

    let messages = state
        .store
        .query_conversation(&user.username, &friend, page, limit)
        .await?;
    debug!(
        "{} fetched {} messages with {} (page {})",
        user.username,
        messages.len(),
        friend,
        page
    );

    let total = messages.len();
    Ok(Json(SuccessResponse::new(HistoryData {
        messages,
        pagination: Pagination { page, limit, total },
    })))
}

/// PUT /chat/mark-read/{friend_username}
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
    Path(friend): Path<String>,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let count = state.store.mark_read(&friend, &user.username).await?;
    Ok(Json(MarkReadResponse {
        success: true,
        message: "Messages marked as read".into(),
        count,
    }))
}

/// GET /chat/unread-count
pub async fn unread_count(
    State(state): State<AppState>,
    Extension(user): Extension<AuthenticatedUser>,
) -> Result<Json<SuccessResponse<UnreadCountData>>, ApiError> {
    let unread_count = state.store.count_unread(&user.username).await?;
    Ok(Json(SuccessResponse::new(UnreadCountData { unread_count })))
}
