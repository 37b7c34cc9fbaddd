//! REST endpoints: user creation (which publishes the onboarding event),
//! profile and content upserts, and read-back of onboarding effects.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::error::{ConsumerError, DatabaseError};
use crate::notifications::NotificationKind;
use crate::store::Database;

use super::consumer::{EventPublisher, UserCreatedEvent};
use super::model::{ContentItem, PrivateProfile, UserEntity, Visibility};

/// Shared state for the onboarding routes.
#[derive(Clone)]
pub struct OnboardingRouteState {
    pub db: Arc<dyn Database>,
    pub publisher: EventPublisher,
    pub clock: Arc<dyn Clock>,
}

/// Build the onboarding REST routes.
pub fn onboarding_routes(state: OnboardingRouteState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/users", post(create_user))
        .route("/api/private-users/{id}", put(put_private_user))
        .route("/api/contracts/{id}", put(put_contract))
        .route("/api/users/{id}/onboarding", get(list_runs))
        .route("/api/users/{id}/notifications", get(list_notifications))
        .route("/api/users/{id}/feed", get(list_feed))
        .with_state(state)
}

fn json_error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "error": message.into() }))).into_response()
}

fn db_error(e: DatabaseError) -> Response {
    error!(error = %e, "Database error in request");
    json_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "onboarding-orchestrator"
    }))
}

// ── Writes ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CreateUserRequest {
    id: String,
    name: String,
    username: String,
    #[serde(default)]
    interests: Vec<String>,
    avatar_url: Option<String>,
    created_at: Option<DateTime<Utc>>,
}

/// POST /api/users
///
/// Stores the user and publishes a user-created event. Onboarding runs
/// asynchronously; the response carries the event id.
async fn create_user(
    State(state): State<OnboardingRouteState>,
    Json(body): Json<CreateUserRequest>,
) -> Response {
    if body.id.trim().is_empty() {
        return json_error(StatusCode::BAD_REQUEST, "User id must not be empty");
    }

    let user = UserEntity {
        id: body.id,
        name: body.name,
        username: body.username,
        created_at: body.created_at.unwrap_or_else(|| state.clock.now()),
        interests: body.interests,
        avatar_url: body.avatar_url,
    };
    if let Err(e) = state.db.upsert_user(&user).await {
        return db_error(e);
    }

    match state.publisher.publish(UserCreatedEvent::new(user.clone())) {
        Ok(event_id) => {
            info!(user_id = %user.id, event_id = %event_id, "User created, onboarding queued");
            (
                StatusCode::ACCEPTED,
                Json(serde_json::json!({ "event_id": event_id })),
            )
                .into_response()
        }
        Err(e @ ConsumerError::QueueFull { .. }) => {
            warn!(user_id = %user.id, error = %e, "Onboarding queue full");
            json_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e) => {
            error!(user_id = %user.id, error = %e, "Could not publish onboarding event");
            json_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
    }
}

#[derive(Deserialize)]
struct PrivateUserRequest {
    email: Option<String>,
    #[serde(default)]
    unsubscribed_all: bool,
    #[serde(default)]
    opted_out: Vec<NotificationKind>,
}

/// PUT /api/private-users/{id}
async fn put_private_user(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    Json(body): Json<PrivateUserRequest>,
) -> Response {
    let profile = PrivateProfile {
        id,
        email: body.email,
        unsubscribed_all: body.unsubscribed_all,
        opted_out: body.opted_out,
    };
    match state.db.upsert_private_profile(&profile).await {
        Ok(()) => (StatusCode::OK, Json(profile)).into_response(),
        Err(e) => db_error(e),
    }
}

#[derive(Deserialize)]
struct ContractRequest {
    slug: String,
    question: String,
    creator_username: String,
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    popularity_score: f64,
    close_time: Option<DateTime<Utc>>,
    #[serde(default)]
    resolved: bool,
    #[serde(default)]
    visibility: Visibility,
}

/// PUT /api/contracts/{id}
async fn put_contract(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
    Json(body): Json<ContractRequest>,
) -> Response {
    let contract = ContentItem {
        id,
        slug: body.slug,
        question: body.question,
        creator_username: body.creator_username,
        topics: body.topics,
        popularity_score: body.popularity_score,
        close_time: body.close_time,
        resolved: body.resolved,
        visibility: body.visibility,
    };
    match state.db.upsert_contract(&contract).await {
        Ok(()) => (StatusCode::OK, Json(contract)).into_response(),
        Err(e) => db_error(e),
    }
}

// ── Reads ───────────────────────────────────────────────────────────────

async fn list_runs(State(state): State<OnboardingRouteState>, Path(id): Path<String>) -> Response {
    match state.db.list_onboarding_runs(&id).await {
        Ok(runs) => Json(runs).into_response(),
        Err(e) => db_error(e),
    }
}

async fn list_notifications(
    State(state): State<OnboardingRouteState>,
    Path(id): Path<String>,
) -> Response {
    match state.db.list_notifications_for_user(&id).await {
        Ok(notifications) => Json(notifications).into_response(),
        Err(e) => db_error(e),
    }
}

async fn list_feed(State(state): State<OnboardingRouteState>, Path(id): Path<String>) -> Response {
    match state.db.list_feed(&id).await {
        Ok(feed) => Json(feed).into_response(),
        Err(e) => db_error(e),
    }
}
