use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use crate::{
    AppState,
    api::models::{
        notifications::{ListNotificationsQuery, MarkAllReadResponse, NotificationListResponse, NotificationResponse},
        users::CurrentUser,
    },
    db::{handlers::Notifications, models::notifications::NotificationFilter},
    errors::{Error, Result},
    types::{NotificationId, abbrev_uuid},
};

fn not_found(id: NotificationId) -> Error {
    Error::NotFound {
        resource: "Notification".to_string(),
        id: id.to_string(),
    }
}

/// List the caller's notifications, newest first
#[utoipa::path(
    get,
    path = "/notifications",
    tag = "notifications",
    params(ListNotificationsQuery),
    responses((status = 200, body = NotificationListResponse), (status = 401, description = "Not authenticated"))
)]
#[tracing::instrument(skip_all)]
pub async fn list_notifications(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<NotificationListResponse>> {
    let (offset, limit) = query.pagination.params();
    let filter = NotificationFilter {
        user_id: current_user.id,
        unread_only: query.unread_only.unwrap_or(false),
        limit,
        offset,
    };

    let mut conn = state.db.acquire().await?;
    let mut repo = Notifications::new(&mut conn);
    let notifications = repo.list(&filter).await?;
    let total_count = repo.count(&filter).await?;
    let unread_count = repo.unread_count(current_user.id).await?;

    Ok(Json(NotificationListResponse {
        notifications: notifications.into_iter().map(NotificationResponse::from).collect(),
        total_count,
        unread_count,
        offset,
        limit,
    }))
}

#[utoipa::path(
    patch,
    path = "/notifications/{id}",
    tag = "notifications",
    params(("id" = String, Path, description = "Notification ID")),
    responses((status = 204, description = "Marked read"), (status = 404, description = "Not found"))
)]
#[tracing::instrument(skip_all, fields(notification_id = %abbrev_uuid(&id)))]
pub async fn mark_notification_read(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<NotificationId>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await?;
    if Notifications::new(&mut conn).mark_read(id, current_user.id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(id))
    }
}

#[utoipa::path(
    post,
    path = "/notifications/read-all",
    tag = "notifications",
    responses((status = 200, body = MarkAllReadResponse))
)]
#[tracing::instrument(skip_all)]
pub async fn mark_all_notifications_read(State(state): State<AppState>, current_user: CurrentUser) -> Result<Json<MarkAllReadResponse>> {
    let mut conn = state.db.acquire().await?;
    let updated = Notifications::new(&mut conn).mark_all_read(current_user.id).await?;
    Ok(Json(MarkAllReadResponse { updated }))
}

#[utoipa::path(
    delete,
    path = "/notifications/{id}",
    tag = "notifications",
    params(("id" = String, Path, description = "Notification ID")),
    responses((status = 204, description = "Deleted"), (status = 404, description = "Not found"))
)]
#[tracing::instrument(skip_all, fields(notification_id = %abbrev_uuid(&id)))]
pub async fn delete_notification(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<NotificationId>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await?;
    if Notifications::new(&mut conn).delete(id, current_user.id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(id))
    }
}
