//! In-memory schema backend for tests and the `memory://` store.

use async_trait::async_trait;

use super::{Direction, Migration, SchemaBackend};
use crate::error::MigrationError;

/// Failure injection for [`MemorySchemaBackend`].
#[derive(Debug, Clone, Default)]
pub struct MemorySchemaConfig {
    /// Fail when asked to apply or revert this revision.
    pub fail_at: Option<String>,
}

/// Records the revision and every executed step; runs no SQL.
#[derive(Debug, Default)]
pub struct MemorySchemaBackend {
    config: MemorySchemaConfig,
    revision: Option<String>,
    log: Vec<(String, Direction)>,
}

impl MemorySchemaBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: MemorySchemaConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Backend whose schema is already at `revision`.
    pub fn at_revision(revision: impl Into<String>) -> Self {
        Self {
            revision: Some(revision.into()),
            ..Self::default()
        }
    }

    /// Steps executed so far, in order.
    pub fn log(&self) -> &[(String, Direction)] {
        &self.log
    }
}

#[async_trait]
impl SchemaBackend for MemorySchemaBackend {
    async fn current_revision(&mut self) -> Result<Option<String>, MigrationError> {
        Ok(self.revision.clone())
    }

    async fn apply(
        &mut self,
        migration: &Migration,
        direction: Direction,
        resulting_revision: Option<&str>,
    ) -> Result<(), MigrationError> {
        if self.config.fail_at.as_deref() == Some(migration.revision) {
            return Err(MigrationError::Backend(format!(
                "injected failure at {}",
                migration.revision
            )));
        }
        self.log.push((migration.revision.to_string(), direction));
        self.revision = resulting_revision.map(str::to_string);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate::{MigrationHistory, Migrator, Target};

    #[tokio::test]
    async fn logs_steps_in_execution_order() {
        let history = MigrationHistory::embedded().unwrap();
        let mut migrator = Migrator::new(history, MemorySchemaBackend::new());
        migrator.upgrade(&Target::Head).await.unwrap();
        migrator.downgrade(&Target::Base).await.unwrap();

        let log: Vec<_> = migrator
            .backend()
            .log()
            .iter()
            .map(|(rev, dir)| format!("{dir}:{rev}"))
            .collect();
        assert_eq!(
            log,
            vec![
                "upgrade:001_initial",
                "upgrade:002_add_name",
                "downgrade:002_add_name",
                "downgrade:001_initial",
            ]
        );
    }

    #[test]
    fn preset_revision_is_reported() {
        let mut backend = MemorySchemaBackend::at_revision("001_initial");
        let current = tokio_test::block_on(backend.current_revision()).unwrap();
        assert_eq!(current.as_deref(), Some("001_initial"));
    }
}
