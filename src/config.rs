use once_cell::sync::Lazy;

/// Secret used for JWT signing. Must be set via the `JWT_SECRET` env variable.
pub static JWT_SECRET: Lazy<String> =
    Lazy::new(|| std::env::var("JWT_SECRET").expect("JWT_SECRET must be set"));

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// Lifetime of issued access tokens, in hours. Defaults to 24.
pub static ACCESS_TOKEN_EXPIRE_HOURS: Lazy<i64> = Lazy::new(|| {
    std::env::var("ACCESS_TOKEN_EXPIRE_HOURS")
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(24)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .ok()
        .map(|value| {
            let normalized = value.trim().to_ascii_lowercase();
            matches!(normalized.as_str(), "1" | "true" | "yes")
        })
        .unwrap_or(false)
});

/// Email of the superuser seeded at startup when missing.
pub static FIRST_SUPERUSER_EMAIL: Lazy<String> = Lazy::new(|| {
    std::env::var("FIRST_SUPERUSER_EMAIL").unwrap_or_else(|_| "admin@avs.com".to_string())
});

/// Initial password for the seeded superuser. Change it in production.
pub static FIRST_SUPERUSER_PASSWORD: Lazy<String> = Lazy::new(|| {
    std::env::var("FIRST_SUPERUSER_PASSWORD").unwrap_or_else(|_| "admin123".to_string())
});
