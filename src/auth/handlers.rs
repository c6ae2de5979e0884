use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{
            ApiRootResponse, AuthResponse, Endpoints, LoginRequest, MessageResponse,
            ProfileResponse, PublicUser, RegisterRequest,
        },
        extractors::{ApiJson, AuthUser},
        services::{authenticate, register_user},
    },
    error::AppResult,
    state::AppState,
};

pub const API_PREFIX: &str = "/api/auth";
pub const API_VERSION: &str = "1.0";

fn path(suffix: &str) -> String {
    format!("{API_PREFIX}{suffix}")
}

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route(API_PREFIX, get(api_root))
        .route(&path("/"), get(api_root))
        .route(&path("/register/"), post(register))
        .route(&path("/login/"), post(login))
}

pub fn session_routes() -> Router<AppState> {
    Router::new()
        .route(&path("/logout/"), post(logout))
        .route(&path("/profile/"), get(profile))
}

pub async fn api_root() -> Json<ApiRootResponse> {
    Json(ApiRootResponse {
        message: "Freelancing Platform API",
        version: API_VERSION,
        endpoints: Endpoints {
            register: path("/register/"),
            login: path("/login/"),
            profile: path("/profile/"),
            logout: path("/logout/"),
        },
    })
}

#[instrument(skip(state, payload))]
pub async fn register(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<RegisterRequest>,
) -> AppResult<(StatusCode, Json<AuthResponse>)> {
    let (user, token) = register_user(state.store.as_ref(), payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully",
            user: PublicUser::from(&user),
            token: token.key,
        }),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let (user, token) = authenticate(state.store.as_ref(), payload).await?;
    Ok(Json(AuthResponse {
        message: "Login successful",
        user: PublicUser::from(&user),
        token: token.key,
    }))
}

#[instrument(skip(state, auth))]
pub async fn logout(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<Json<MessageResponse>> {
    state.store.delete_token(&auth.token).await?;
    info!(user_id = auth.user.id, "user logged out");
    Ok(Json(MessageResponse {
        message: "Logout successful",
    }))
}

#[instrument(skip(auth), fields(user_id = auth.user.id))]
pub async fn profile(auth: AuthUser) -> Json<ProfileResponse> {
    Json(ProfileResponse::from(auth.user))
}
