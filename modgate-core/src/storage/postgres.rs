use async_trait::async_trait;
use modgate_common::error::Result;
use modgate_common::traits::TokenStorage;
use sqlx::PgPool;

const DEFAULT_TOKEN_TABLE: &str = "moderation_tokens";

/// Postgres-backed token store.
///
/// One row per normalized token; the primary key makes duplicate inserts
/// idempotent via `ON CONFLICT DO NOTHING`.
pub struct PostgresTokenStore {
    pool: PgPool,
    table: String,
}

impl PostgresTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self::with_table(pool, DEFAULT_TOKEN_TABLE)
    }

    pub fn with_table(pool: PgPool, table: impl Into<String>) -> Self {
        let table = table.into();
        let table = if table.trim().is_empty() {
            DEFAULT_TOKEN_TABLE.to_string()
        } else {
            table
        };
        Self { pool, table }
    }

    /// Creates the token table when missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {} (token TEXT PRIMARY KEY)",
            self.table
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStorage for PostgresTokenStore {
    async fn add_token(&self, token: &str) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO {} (token) VALUES ($1) ON CONFLICT (token) DO NOTHING",
            self.table
        ))
        .bind(token)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn remove_token(&self, token: &str) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {} WHERE token = $1", self.table))
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_tokens(&self) -> Result<Vec<String>> {
        let tokens = sqlx::query_scalar::<_, String>(&format!("SELECT token FROM {}", self.table))
            .fetch_all(&self.pool)
            .await?;
        Ok(tokens)
    }

    async fn token_exists(&self, token: &str) -> Result<bool> {
        let row = sqlx::query_scalar::<_, i32>(&format!(
            "SELECT 1 FROM {} WHERE token = $1 LIMIT 1",
            self.table
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}
