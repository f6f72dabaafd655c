//! PostgreSQL schema backend.

use async_trait::async_trait;
use sqlx::{Connection, PgConnection};
use tracing::debug;

use super::{Direction, Migration, SchemaBackend};
use crate::error::MigrationError;

/// Advisory lock key shared by every migrator of this schema.
const MIGRATION_LOCK_KEY: i64 = 0x626b_785f_6d69_6772;

const CREATE_VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS schema_revisions (\
     version_num VARCHAR(64) NOT NULL PRIMARY KEY)";

/// Runs migrations over a dedicated connection that holds the migration
/// advisory lock until [`PgSchemaBackend::close`] (or drop).
pub struct PgSchemaBackend {
    conn: PgConnection,
}

impl PgSchemaBackend {
    /// Connect, take the advisory lock and ensure the version table exists.
    pub async fn connect(database_url: &str) -> Result<Self, MigrationError> {
        let mut conn = PgConnection::connect(database_url).await?;

        debug!("Waiting for migration lock");
        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut conn)
            .await?;

        sqlx::query(CREATE_VERSION_TABLE).execute(&mut conn).await?;

        Ok(Self { conn })
    }

    /// Release the lock and close the connection.
    pub async fn close(mut self) -> Result<(), MigrationError> {
        sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(MIGRATION_LOCK_KEY)
            .execute(&mut self.conn)
            .await?;
        self.conn.close().await?;
        Ok(())
    }
}

#[async_trait]
impl SchemaBackend for PgSchemaBackend {
    async fn current_revision(&mut self) -> Result<Option<String>, MigrationError> {
        let revision: Option<String> =
            sqlx::query_scalar("SELECT version_num FROM schema_revisions LIMIT 1")
                .fetch_optional(&mut self.conn)
                .await?;
        Ok(revision)
    }

    async fn apply(
        &mut self,
        migration: &Migration,
        direction: Direction,
        resulting_revision: Option<&str>,
    ) -> Result<(), MigrationError> {
        let sql = match direction {
            Direction::Upgrade => migration.up,
            Direction::Downgrade => migration.down,
        };

        let mut tx = self.conn.begin().await?;
        sqlx::Executor::execute(&mut *tx, sqlx::raw_sql(sql)).await?;
        sqlx::query("DELETE FROM schema_revisions")
            .execute(&mut *tx)
            .await?;
        if let Some(revision) = resulting_revision {
            sqlx::query("INSERT INTO schema_revisions (version_num) VALUES ($1)")
                .bind(revision)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(())
    }
}
