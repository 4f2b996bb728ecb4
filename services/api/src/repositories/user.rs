//! Read-only access to the user directory mirror

use async_trait::async_trait;
use booking::{BookingResult, models::UserProfile, store::UserDirectory};
use sqlx::{PgPool, Row};

use super::store_error;

/// User repository for database operations
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserDirectory for UserRepository {
    async fn lookup(&self, rut: &str) -> BookingResult<Option<UserProfile>> {
        let row = sqlx::query(
            r#"
            SELECT rut, full_name, program
            FROM user_directory
            WHERE rut = $1
            "#,
        )
        .bind(rut)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_error("Failed to look up user", e))?;

        Ok(row.map(|row| UserProfile {
            rut: row.get("rut"),
            full_name: row.get("full_name"),
            program: row.get("program"),
        }))
    }
}
