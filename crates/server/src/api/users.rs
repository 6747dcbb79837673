//! Demo user endpoints.

use crate::AppResources;
use crate::api::allow_only;
use crate::api::cors::MethodNotAllowed;
use crate::error::ErrorResponse;
use crate::users::DemoUser;
use axum::{
    Json,
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use utoipa_axum::{router::OpenApiRouter, routes};

pub const DEMO_TAG: &str = "Demo";

pub(crate) fn router(resources: AppResources) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(allow_only(routes!(list_users, create_user), &["GET", "POST"]))
        .with_state(resources)
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct UserQuery {
    /// Return only the user with this id
    pub id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserList {
    pub users: Vec<DemoUser>,
    pub count: usize,
}

/// `GET /api/users` body: the whole list, or one user when `id` is given.
#[derive(Debug, Serialize, ToSchema)]
#[serde(untagged)]
pub enum UserLookup {
    List(UserList),
    Single(DemoUser),
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct CreateUser {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct UserCreated {
    pub message: String,
    pub user: DemoUser,
}

/// List demo users, or fetch one by id.
#[utoipa::path(
    get,
    path = "/api/users",
    tag = DEMO_TAG,
    params(UserQuery),
    responses(
        (status = 200, description = "All users, or the single user matching `id`", body = UserLookup),
        (status = 404, description = "No user with that id", body = ErrorResponse),
        (status = 405, description = "Only GET and POST are supported", body = MethodNotAllowed)
    )
)]
#[tracing::instrument(skip_all, fields(id = ?query.id))]
pub async fn list_users(
    State(resources): State<AppResources>,
    Query(query): Query<UserQuery>,
) -> Response {
    if let Some(id) = query.id.as_deref().filter(|id| !id.is_empty()) {
        return match resources.users.get(id).await {
            Some(user) => Json(UserLookup::Single(user)).into_response(),
            None => ErrorResponse::new("User not found").with_status(StatusCode::NOT_FOUND),
        };
    }

    let users = resources.users.list().await;
    Json(UserLookup::List(UserList {
        count: users.len(),
        users,
    }))
    .into_response()
}

/// Create a demo user.
#[utoipa::path(
    post,
    path = "/api/users",
    tag = DEMO_TAG,
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = UserCreated),
        (status = 400, description = "Name or email missing", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_user(State(resources): State<AppResources>, body: Bytes) -> Response {
    let input: CreateUser = serde_json::from_slice(&body).unwrap_or_default();
    let name = input.name.filter(|n| !n.is_empty());
    let email = input.email.filter(|e| !e.is_empty());
    let (Some(name), Some(email)) = (name, email) else {
        return ErrorResponse::new("Name and email are required")
            .with_status(StatusCode::BAD_REQUEST);
    };

    let user = resources.users.insert(name, email).await;
    tracing::info!(id = %user.id, "created demo user");
    (
        StatusCode::CREATED,
        Json(UserCreated {
            message: "User created successfully".to_string(),
            user,
        }),
    )
        .into_response()
}
