//! HTTP route handlers.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};

use crate::directory::{DirectoryError, IdentityTag, User};
use crate::error::{Classify, ErrorClass};
use crate::health::Health;
use crate::id::{RequestId, SupplyId, UserId};
use crate::priority::PriorityClass;
use crate::queue::AdmissionError;
use crate::ratings::{HygieneRating, RatingError};
use crate::request::Request;
use crate::service::{BathroomState, HealthSnapshot, HouseService};
use crate::supplies::{Supply, SupplyError};
use crate::version::VersionInfo;

#[derive(Debug, Serialize)]
pub struct HealthCheckResponse {
    pub status: Health,
    pub occupied: bool,
    pub pending: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_up: Option<RequestId>,
    pub version: VersionInfo,
}

impl From<HealthSnapshot> for HealthCheckResponse {
    fn from(snapshot: HealthSnapshot) -> Self {
        Self {
            status: snapshot.status(),
            occupied: snapshot.occupied,
            pending: snapshot.pending,
            next_up: snapshot.next_up,
            version: snapshot.version,
        }
    }
}

/// A rejected call, rendered as `{"error": ..., "kind": ...}`.
#[derive(Debug)]
pub struct ApiError {
    class: ErrorClass,
    message: String,
}

impl ApiError {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            class: ErrorClass::Validation,
            message: message.into(),
        }
    }

    fn status(&self) -> StatusCode {
        match self.class {
            ErrorClass::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorClass::NotFound => StatusCode::NOT_FOUND,
            ErrorClass::Conflict => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(serde_json::json!({
                "error": self.message,
                "kind": self.class.as_str(),
            })),
        )
            .into_response()
    }
}

macro_rules! impl_api_error_from {
    ($($err:ty),* $(,)?) => {
        $(
            impl From<$err> for ApiError {
                fn from(err: $err) -> Self {
                    Self {
                        class: err.class(),
                        message: err.to_string(),
                    }
                }
            }
        )*
    };
}

impl_api_error_from!(AdmissionError, DirectoryError, RatingError, SupplyError);

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::invalid(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::invalid(rejection.body_text())
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse_id<T: FromStr>(raw: &str, what: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::invalid(format!("Invalid {what} id: {raw}")))
}

fn message(text: &str) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "message": text }))
}

#[derive(Debug, Deserialize)]
pub struct CreateUserBody {
    pub name: String,
    pub color: IdentityTag,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueBody {
    pub user_id: UserId,
    pub priority: PriorityClass,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RateBody {
    pub rated_by_user_id: UserId,
    pub rating: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecordSupplyBody {
    pub name: String,
    pub last_bought_by_user_id: UserId,
    #[serde(default)]
    pub next_buyer_user_id: Option<UserId>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateBuyerQuery {
    pub next_buyer_user_id: String,
}

async fn health_check(State(service): State<Arc<HouseService>>) -> Json<HealthCheckResponse> {
    Json(service.health().into())
}

async fn shutdown(State(service): State<Arc<HouseService>>) -> impl IntoResponse {
    tracing::info!("Shutdown requested via HTTP");
    service.trigger_shutdown();
    (StatusCode::OK, Json(serde_json::json!({})))
}

async fn root() -> Json<serde_json::Value> {
    message("Throne Queue API is running")
}

// Users

async fn create_user(
    State(service): State<Arc<HouseService>>,
    body: Result<Json<CreateUserBody>, JsonRejection>,
) -> ApiResult<User> {
    let Json(body) = body?;
    let user = service.directory().create_user(&body.name, body.color)?;
    Ok(Json(user))
}

async fn list_users(State(service): State<Arc<HouseService>>) -> Json<Vec<User>> {
    Json(service.directory().list_users())
}

async fn delete_user(
    State(service): State<Arc<HouseService>>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let id: UserId = parse_id(&id, "user")?;
    service.directory().delete_user(id)?;
    Ok(message("User deleted successfully"))
}

// Queue

async fn enqueue(
    State(service): State<Arc<HouseService>>,
    body: Result<Json<EnqueueBody>, JsonRejection>,
) -> ApiResult<Request> {
    let Json(body) = body?;
    let request = service
        .queue()
        .enqueue(body.user_id, body.priority, body.reason)
        .await?;
    Ok(Json(request))
}

async fn list_pending(State(service): State<Arc<HouseService>>) -> Json<Vec<Request>> {
    Json(service.queue().list_pending())
}

async fn current_occupant(State(service): State<Arc<HouseService>>) -> Json<Option<Request>> {
    Json(service.queue().current_occupant())
}

async fn history(State(service): State<Arc<HouseService>>) -> Json<Vec<Request>> {
    let queue = service.queue();
    Json(queue.history(queue.config().history_cap))
}

async fn begin_occupancy(
    State(service): State<Arc<HouseService>>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let id: RequestId = parse_id(&id, "queue item")?;
    service.queue().begin_occupancy(id)?;
    Ok(message("Bathroom usage started"))
}

async fn end_occupancy(
    State(service): State<Arc<HouseService>>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let id: RequestId = parse_id(&id, "queue item")?;
    service.queue().end_occupancy(id)?;
    Ok(message("Bathroom usage completed"))
}

async fn cancel(
    State(service): State<Arc<HouseService>>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    let id: RequestId = parse_id(&id, "queue item")?;
    service.queue().cancel(id)?;
    Ok(message("Removed from queue"))
}

// Hygiene ratings

async fn rate(
    State(service): State<Arc<HouseService>>,
    body: Result<Json<RateBody>, JsonRejection>,
) -> ApiResult<HygieneRating> {
    let Json(body) = body?;
    let rating = service
        .ratings()
        .rate(body.rated_by_user_id, body.rating, body.comment)
        .await?;
    Ok(Json(rating))
}

async fn list_ratings(State(service): State<Arc<HouseService>>) -> Json<Vec<HygieneRating>> {
    Json(service.ratings().list())
}

async fn latest_rating(State(service): State<Arc<HouseService>>) -> Json<Option<HygieneRating>> {
    Json(service.ratings().latest())
}

// Utilities

async fn record_supply(
    State(service): State<Arc<HouseService>>,
    body: Result<Json<RecordSupplyBody>, JsonRejection>,
) -> ApiResult<Supply> {
    let Json(body) = body?;
    let supply = service
        .supplies()
        .record(
            &body.name,
            body.last_bought_by_user_id,
            body.next_buyer_user_id,
        )
        .await?;
    Ok(Json(supply))
}

async fn list_supplies(State(service): State<Arc<HouseService>>) -> Json<Vec<Supply>> {
    Json(service.supplies().list())
}

async fn update_next_buyer(
    State(service): State<Arc<HouseService>>,
    Path(id): Path<String>,
    query: Result<Query<UpdateBuyerQuery>, QueryRejection>,
) -> ApiResult<serde_json::Value> {
    let supply_id: SupplyId = parse_id(&id, "utility item")?;
    let Query(query) = query?;
    let user_id: UserId = parse_id(&query.next_buyer_user_id, "user")?;
    service
        .supplies()
        .assign_next_buyer(supply_id, user_id)
        .await?;
    Ok(message("Next buyer updated successfully"))
}

async fn bathroom_state(State(service): State<Arc<HouseService>>) -> Json<BathroomState> {
    Json(service.bathroom_state())
}

pub fn routes(service: Arc<HouseService>) -> Router {
    Router::new()
        .route("/health-check", get(health_check))
        .route("/shutdown", post(shutdown))
        .route("/api/", get(root))
        .route("/api/users", post(create_user).get(list_users))
        .route("/api/users/{id}", axum::routing::delete(delete_user))
        .route("/api/queue", post(enqueue).get(list_pending))
        .route("/api/queue/current", get(current_occupant))
        .route("/api/queue/completed", get(history))
        .route("/api/queue/{id}", axum::routing::delete(cancel))
        .route("/api/queue/{id}/start", post(begin_occupancy))
        .route("/api/queue/{id}/complete", post(end_occupancy))
        .route("/api/hygiene-rating", post(rate).get(list_ratings))
        .route("/api/hygiene-rating/latest", get(latest_rating))
        .route("/api/utilities", post(record_supply).get(list_supplies))
        .route("/api/utilities/{id}/update-buyer", put(update_next_buyer))
        .route("/api/bathroom-state", get(bathroom_state))
        .with_state(service)
}
