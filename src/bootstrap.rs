use sqlx::PgPool;

use crate::auth::hash_password;
use crate::config;
use crate::db;
use crate::db::users::NewUser;

/// Seeds the first superuser so the admin API is reachable on a fresh
/// database. No-op when the account already exists.
pub async fn ensure_superuser(pool: &PgPool) -> anyhow::Result<()> {
    let email = config::FIRST_SUPERUSER_EMAIL.as_str();
    if db::users::get_by_email(pool, email).await?.is_some() {
        tracing::debug!(email, "Superuser already exists");
        return Ok(());
    }
    let password_hash = hash_password(config::FIRST_SUPERUSER_PASSWORD.as_str())?;
    db::users::insert(
        pool,
        NewUser {
            email,
            password_hash: &password_hash,
            full_name: Some("System Administrator"),
            is_active: true,
            is_superuser: true,
        },
    )
    .await?;
    tracing::info!(email, "Created superuser");
    Ok(())
}
