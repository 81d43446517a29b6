use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Error as SqlxError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{error, info};

use crate::ws::session::SessionRecord;

// Global database instance
static DB: OnceCell<Arc<DbSession>> = OnceCell::const_new();

/// Initialize the global database connection
///
/// # Arguments
/// * `database_url` - PostgreSQL connection string
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error
pub async fn init_db(database_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let db = DbSession::new(database_url).await?;
    db.ensure_schema().await?;
    let cleared = db.clear_sessions().await?;
    if cleared > 0 {
        info!("Cleared {} session rows left by a previous run", cleared);
    }
    DB.set(Arc::new(db))
        .map_err(|_| "Database already initialized")?;
    Ok(())
}

/// Get the global database instance
///
/// # Returns
/// * `Option<Arc<DbSession>>` - Database instance if initialized
pub fn get_db() -> Option<Arc<DbSession>> {
    DB.get().cloned()
}

/// Database connection pool
pub struct DbSession {
    pool: PgPool,
}

impl DbSession {
    /// Create a new database connection pool
    pub async fn new(database_url: &str) -> Result<Self, SqlxError> {
        info!("Connecting to database...");

        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600)) // Close idle connections after 10 minutes
            .max_lifetime(Duration::from_secs(1800)) // Recycle connections after 30 minutes
            .connect(database_url)
            .await?;

        info!("Database connection pool created successfully");

        Ok(Self { pool })
    }

    /// Create the session table if it is missing
    pub async fn ensure_schema(&self) -> Result<(), SqlxError> {
        let ddl = r#"
            CREATE TABLE IF NOT EXISTS session (
                scope       TEXT        NOT NULL,
                user_id     TEXT        NOT NULL,
                socket_id   UUID        NOT NULL,
                joined_at   TIMESTAMPTZ NOT NULL,
                last_active TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (scope, socket_id)
            )
        "#;
        sqlx::query(ddl).execute(&self.pool).await?;
        Ok(())
    }

    /// Remove every row. In-memory state is authoritative, rows from a
    /// previous process describe sockets that no longer exist.
    pub async fn clear_sessions(&self) -> Result<u64, SqlxError> {
        let result = sqlx::query("DELETE FROM session").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Insert or refresh the row for (scope, socket)
    pub async fn upsert_session(&self, record: &SessionRecord) -> Result<(), SqlxError> {
        let socket_id = match uuid::Uuid::parse_str(&record.connection_id) {
            Ok(id) => id,
            Err(e) => {
                error!("Invalid connection id '{}': {}", record.connection_id, e);
                return Err(SqlxError::Decode(Box::new(e)));
            }
        };

        let query_sql = r#"
            INSERT INTO session (scope, user_id, socket_id, joined_at, last_active)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (scope, socket_id)
            DO UPDATE SET last_active = EXCLUDED.last_active
        "#;

        sqlx::query(query_sql)
            .bind(record.scope.as_str())
            .bind(&record.user_id)
            .bind(socket_id)
            .bind(record.joined_at)
            .bind(record.last_active)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Refresh `last_active` on every row of a socket
    pub async fn touch_connection(
        &self,
        socket_id: uuid::Uuid,
        at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), SqlxError> {
        sqlx::query("UPDATE session SET last_active = $1 WHERE socket_id = $2")
            .bind(at)
            .bind(socket_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete one (scope, socket) row
    pub async fn delete_session(&self, socket_id: uuid::Uuid, scope: &str) -> Result<(), SqlxError> {
        sqlx::query("DELETE FROM session WHERE socket_id = $1 AND scope = $2")
            .bind(socket_id)
            .bind(scope)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Delete every row of a socket
    pub async fn delete_connection(&self, socket_id: uuid::Uuid) -> Result<(), SqlxError> {
        sqlx::query("DELETE FROM session WHERE socket_id = $1")
            .bind(socket_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Check the pool can serve a query
    pub async fn ping(&self) -> Result<(), SqlxError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
