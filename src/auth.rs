use argon2::password_hash::PasswordHash;
use argon2::{Argon2, PasswordVerifier};
use axum::{
    extract::Extension,
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::error;

use crate::config;
use crate::error::{AppError, AppResult};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
struct Claims {
    sub: i32,
    role: String,
    exp: usize,
}

#[derive(Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
}

pub fn hash_password(password: &str) -> AppResult<String> {
    use argon2::password_hash::SaltString;
    use argon2::PasswordHasher;
    use rand_core::OsRng;

    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Message(format!("Hashing failed: {}", e)))
}

pub fn routes() -> Router {
    Router::new()
        .route("/api/auth/login", post(login_user))
        .route("/api/auth/logout", post(logout_user))
}

pub fn issue_token(user_id: i32, is_superuser: bool) -> AppResult<String> {
    let exp = Utc::now()
        .checked_add_signed(Duration::hours(*config::ACCESS_TOKEN_EXPIRE_HOURS))
        .expect("valid timestamp")
        .timestamp() as usize;
    let role = if is_superuser { "admin" } else { "user" };
    let claims = Claims { sub: user_id, role: role.into(), exp };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(config::JWT_SECRET.as_bytes()),
    )
    .map_err(|e| {
        error!(?e, "Token encoding error");
        AppError::Message("Token error".into())
    })
}

pub async fn login_user(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<TokenResponse>)> {
    let rec = sqlx::query(
        "SELECT id, password_hash, is_active, is_superuser FROM users WHERE email = $1",
    )
    .bind(&payload.email)
    .fetch_optional(&pool)
    .await
    .map_err(|e| {
        error!(?e, "DB error while fetching user");
        AppError::Db(e)
    })?;
    let rec = rec.ok_or(AppError::Unauthorized)?;
    let id: i32 = rec.get("id");
    let pass_hash: String = rec.get("password_hash");
    let is_active: bool = rec.get("is_active");
    let is_superuser: bool = rec.get("is_superuser");
    let parsed = PasswordHash::new(&pass_hash).map_err(|e| {
        error!(?e, "Hash parse error");
        AppError::Message(format!("Hash error: {}", e))
    })?;
    if Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed)
        .is_err()
    {
        return Err(AppError::Unauthorized);
    }
    if !is_active {
        return Err(AppError::BadRequest("Inactive user".into()));
    }
    let token = issue_token(id, is_superuser)?;
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        format!("auth_token={token}; HttpOnly; Secure; SameSite=Strict; Path=/")
            .parse()
            .expect("valid header value"),
    );
    Ok((
        headers,
        Json(TokenResponse { access_token: token, token_type: "bearer" }),
    ))
}

pub async fn logout_user() -> (HeaderMap, &'static str) {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        "auth_token=deleted; HttpOnly; Path=/; Max-Age=0"
            .parse()
            .expect("valid header value"),
    );
    (headers, "Logged out")
}
