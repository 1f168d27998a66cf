use axum::{
    extract::{Extension, Path, Query},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use sqlx::PgPool;

use crate::auth::hash_password;
use crate::db;
use crate::db::users::{NewUser, UserPatch, UserRecord, UserWithStats};
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

pub fn routes() -> Router {
    Router::new()
        .route("/api/users", get(list_users).post(create_user))
        .route("/api/users/with-stats", get(list_users_with_stats))
        .route("/api/users/me", get(read_user_me).put(update_user_me))
        .route("/api/users/me/dashboard", get(read_my_dashboard))
        .route(
            "/api/users/:user_id",
            get(read_user_by_id).put(update_user).delete(delete_user),
        )
        .route("/api/users/:user_id/dashboard", get(read_user_dashboard))
        .route("/api/users/:user_id/activate", post(activate_user))
        .route("/api/users/:user_id/deactivate", post(deactivate_user))
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn list_users(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Query(params): Query<PageQuery>,
) -> AppResult<Json<Vec<UserRecord>>> {
    user.require_admin()?;
    let users = db::users::list(
        &pool,
        params.skip.unwrap_or(0),
        params.limit.unwrap_or(100),
    )
    .await?;
    Ok(Json(users))
}

#[derive(Deserialize)]
pub struct UserStatsQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub is_active: Option<bool>,
}

pub async fn list_users_with_stats(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Query(params): Query<UserStatsQuery>,
) -> AppResult<Json<Vec<UserWithStats>>> {
    user.require_admin()?;
    let users = db::users::list_with_stats(
        &pool,
        params.search.as_deref(),
        params.is_active,
        params.skip.unwrap_or(0),
        params.limit.unwrap_or(100),
        Utc::now(),
    )
    .await?;
    Ok(Json(users))
}

#[derive(Deserialize)]
pub struct UserCreate {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

pub async fn create_user(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Json(payload): Json<UserCreate>,
) -> AppResult<Json<UserRecord>> {
    user.require_admin()?;
    if db::users::get_by_email(&pool, &payload.email).await?.is_some() {
        return Err(AppError::BadRequest(
            "The user with this email already exists in the system.".into(),
        ));
    }
    let password_hash = hash_password(&payload.password)?;
    let created = db::users::insert(
        &pool,
        NewUser {
            email: &payload.email,
            password_hash: &password_hash,
            full_name: payload.full_name.as_deref(),
            is_active: payload.is_active.unwrap_or(true),
            is_superuser: payload.is_superuser.unwrap_or(false),
        },
    )
    .await?;
    Ok(Json(created))
}

pub async fn read_user_me(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<UserRecord>> {
    let user = db::users::get(&pool, user_id)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    Ok(Json(user))
}

#[derive(Deserialize)]
pub struct UserUpdateMe {
    pub email: Option<String>,
    pub password: Option<String>,
    pub full_name: Option<String>,
}

pub async fn update_user_me(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
    Json(payload): Json<UserUpdateMe>,
) -> AppResult<Json<UserRecord>> {
    let password_hash = match payload.password.as_deref() {
        Some(password) => Some(hash_password(password)?),
        None => None,
    };
    let updated = db::users::update(
        &pool,
        user_id,
        UserPatch {
            email: payload.email,
            password_hash,
            full_name: payload.full_name,
            ..Default::default()
        },
    )
    .await?
    .ok_or(AppError::NotFound("User"))?;
    Ok(Json(updated))
}

pub async fn read_my_dashboard(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id, .. }: AuthUser,
) -> AppResult<Json<db::users::UserDashboardStats>> {
    let stats = db::users::dashboard_stats(&pool, user_id, Utc::now())
        .await?
        .ok_or(AppError::NotFound("User"))?;
    Ok(Json(stats))
}

pub async fn read_user_by_id(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<UserRecord>> {
    if user.user_id != user_id {
        user.require_admin()?;
    }
    let record = db::users::get(&pool, user_id)
        .await?
        .ok_or(AppError::NotFound("User"))?;
    Ok(Json(record))
}

pub async fn read_user_dashboard(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<db::users::UserDashboardStats>> {
    user.require_admin()?;
    let stats = db::users::dashboard_stats(&pool, user_id, Utc::now())
        .await?
        .ok_or(AppError::NotFound("User"))?;
    Ok(Json(stats))
}

#[derive(Deserialize)]
pub struct UserUpdate {
    pub email: Option<String>,
    pub password: Option<String>,
    pub full_name: Option<String>,
    pub is_active: Option<bool>,
    pub is_superuser: Option<bool>,
}

pub async fn update_user(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(user_id): Path<i32>,
    Json(payload): Json<UserUpdate>,
) -> AppResult<Json<UserRecord>> {
    user.require_admin()?;
    if db::users::get(&pool, user_id).await?.is_none() {
        return Err(AppError::NotFound("User"));
    }
    let password_hash = match payload.password.as_deref() {
        Some(password) => Some(hash_password(password)?),
        None => None,
    };
    let updated = db::users::update(
        &pool,
        user_id,
        UserPatch {
            email: payload.email,
            password_hash,
            full_name: payload.full_name,
            is_active: payload.is_active,
            is_superuser: payload.is_superuser,
        },
    )
    .await?
    .ok_or(AppError::NotFound("User"))?;
    Ok(Json(updated))
}

pub async fn delete_user(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Value>> {
    user.require_admin()?;
    if db::users::get(&pool, user_id).await?.is_none() {
        return Err(AppError::NotFound("User"));
    }
    if user.user_id == user_id {
        return Err(AppError::BadRequest("Users cannot delete themselves".into()));
    }
    db::users::delete(&pool, user_id).await?;
    Ok(Json(json!({ "message": "User deleted successfully" })))
}

pub async fn activate_user(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Value>> {
    user.require_admin()?;
    let updated = db::users::update(
        &pool,
        user_id,
        UserPatch { is_active: Some(true), ..Default::default() },
    )
    .await?
    .ok_or(AppError::NotFound("User"))?;
    Ok(Json(json!({
        "message": "User activated successfully",
        "user": updated,
    })))
}

pub async fn deactivate_user(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(user_id): Path<i32>,
) -> AppResult<Json<Value>> {
    user.require_admin()?;
    if db::users::get(&pool, user_id).await?.is_none() {
        return Err(AppError::NotFound("User"));
    }
    if user.user_id == user_id {
        return Err(AppError::BadRequest(
            "Users cannot deactivate themselves".into(),
        ));
    }
    let updated = db::users::update(
        &pool,
        user_id,
        UserPatch { is_active: Some(false), ..Default::default() },
    )
    .await?
    .ok_or(AppError::NotFound("User"))?;
    Ok(Json(json!({
        "message": "User deactivated successfully",
        "user": updated,
    })))
}
