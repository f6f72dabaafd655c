//! Versioned, linear schema migrations.
//!
//! A [`MigrationHistory`] is a validated chain of revisions from a single
//! base to a single head. A [`Migrator`] walks that chain against a
//! [`SchemaBackend`], committing each step (its SQL plus the recorded
//! revision) on its own, so a failure leaves the schema at the last step
//! that succeeded.

mod embedded;
pub mod memory;
pub mod postgres;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{info, instrument};

use crate::error::MigrationError;
use crate::metrics;

pub use embedded::embedded_migrations;
pub use memory::{MemorySchemaBackend, MemorySchemaConfig};
pub use postgres::PgSchemaBackend;

static REVISION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9]{3}_[a-z0-9_]+$").expect("static regex"));

/// One revision of the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Migration {
    /// Revision id, e.g. `002_add_name`.
    pub revision: &'static str,
    /// Parent revision; `None` for the base revision.
    pub down_revision: Option<&'static str>,
    /// Human readable summary.
    pub description: &'static str,
    /// SQL applied on upgrade.
    pub up: &'static str,
    /// SQL applied on downgrade.
    pub down: &'static str,
}

/// Direction of a migration step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upgrade,
    Downgrade,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Upgrade => "upgrade",
            Direction::Downgrade => "downgrade",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where to migrate to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Newest revision.
    Head,
    /// Before the first revision (empty schema).
    Base,
    /// A specific revision id.
    Revision(String),
}

impl FromStr for Target {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "head" | "heads" => Ok(Target::Head),
            "base" => Ok(Target::Base),
            rev if REVISION_RE.is_match(rev) => Ok(Target::Revision(rev.to_string())),
            other => Err(MigrationError::InvalidRevision(other.to_string())),
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Head => f.write_str("head"),
            Target::Base => f.write_str("base"),
            Target::Revision(rev) => f.write_str(rev),
        }
    }
}

/// Validated chain of revisions, stored base first.
#[derive(Debug, Clone)]
pub struct MigrationHistory {
    revisions: Vec<Migration>,
}

impl MigrationHistory {
    /// Validate `migrations` and order them from base to head.
    ///
    /// Rejects an empty list, malformed or duplicate ids, zero or several
    /// bases, unknown parents, branches and anything unreachable from the
    /// base (which covers cycles).
    pub fn new(migrations: Vec<Migration>) -> Result<Self, MigrationError> {
        if migrations.is_empty() {
            return Err(MigrationError::EmptyHistory);
        }

        let mut seen = HashSet::new();
        for m in &migrations {
            if !REVISION_RE.is_match(m.revision) {
                return Err(MigrationError::InvalidRevision(m.revision.to_string()));
            }
            if !seen.insert(m.revision) {
                return Err(MigrationError::DuplicateRevision(m.revision.to_string()));
            }
        }

        let bases: Vec<&Migration> = migrations
            .iter()
            .filter(|m| m.down_revision.is_none())
            .collect();
        let base = match bases.as_slice() {
            [] => return Err(MigrationError::NoBase),
            [base] => **base,
            many => {
                return Err(MigrationError::MultipleBases(
                    many.iter().map(|m| m.revision.to_string()).collect(),
                ))
            }
        };

        let mut children: HashMap<&str, Vec<&Migration>> = HashMap::new();
        for m in &migrations {
            if let Some(parent) = m.down_revision {
                if !seen.contains(parent) {
                    return Err(MigrationError::UnknownParent {
                        revision: m.revision.to_string(),
                        parent: parent.to_string(),
                    });
                }
                children.entry(parent).or_default().push(m);
            }
        }
        if let Some((parent, kids)) = children.iter().find(|(_, kids)| kids.len() > 1) {
            let mut names: Vec<String> = kids.iter().map(|m| m.revision.to_string()).collect();
            names.sort();
            return Err(MigrationError::Branch {
                parent: parent.to_string(),
                children: names,
            });
        }

        let mut ordered = vec![base];
        let mut cursor = base.revision;
        while let Some(next) = children.get(cursor).and_then(|kids| kids.first()) {
            ordered.push(**next);
            cursor = next.revision;
        }

        if ordered.len() != migrations.len() {
            let reached: HashSet<&str> = ordered.iter().map(|m| m.revision).collect();
            let mut orphans: Vec<String> = migrations
                .iter()
                .filter(|m| !reached.contains(m.revision))
                .map(|m| m.revision.to_string())
                .collect();
            orphans.sort();
            return Err(MigrationError::Disconnected(orphans));
        }

        Ok(Self { revisions: ordered })
    }

    /// History compiled into this binary.
    pub fn embedded() -> Result<Self, MigrationError> {
        Self::new(embedded_migrations())
    }

    /// Newest revision.
    pub fn head(&self) -> &Migration {
        // `new` guarantees at least one revision.
        &self.revisions[self.revisions.len() - 1]
    }

    /// Oldest revision.
    pub fn base(&self) -> &Migration {
        &self.revisions[0]
    }

    /// All revisions, base first.
    pub fn revisions(&self) -> &[Migration] {
        &self.revisions
    }

    pub fn get(&self, revision: &str) -> Option<&Migration> {
        self.revisions.iter().find(|m| m.revision == revision)
    }

    /// Number of revisions applied when the schema is at `revision`.
    fn level_of(&self, revision: Option<&str>) -> Result<usize, MigrationError> {
        match revision {
            None => Ok(0),
            Some(rev) => self
                .revisions
                .iter()
                .position(|m| m.revision == rev)
                .map(|idx| idx + 1)
                .ok_or_else(|| MigrationError::UnknownRevision(rev.to_string())),
        }
    }

    fn target_level(&self, target: &Target) -> Result<usize, MigrationError> {
        match target {
            Target::Head => Ok(self.revisions.len()),
            Target::Base => Ok(0),
            Target::Revision(rev) => self.level_of(Some(rev)),
        }
    }

    /// Revisions to apply, oldest first, to move from `current` to `target`.
    pub fn upgrade_path(
        &self,
        current: Option<&str>,
        target: &Target,
    ) -> Result<Vec<&Migration>, MigrationError> {
        let from = self.level_of(current)?;
        let to = self.target_level(target)?;
        if to < from {
            return Err(MigrationError::WrongDirection {
                direction: Direction::Upgrade.as_str(),
                current: current.unwrap_or("base").to_string(),
                target: target.to_string(),
            });
        }
        Ok(self.revisions[from..to].iter().collect())
    }

    /// Revisions to revert, newest first, to move from `current` to `target`.
    pub fn downgrade_path(
        &self,
        current: Option<&str>,
        target: &Target,
    ) -> Result<Vec<&Migration>, MigrationError> {
        let from = self.level_of(current)?;
        let to = self.target_level(target)?;
        if to > from {
            return Err(MigrationError::WrongDirection {
                direction: Direction::Downgrade.as_str(),
                current: current.unwrap_or("base").to_string(),
                target: target.to_string(),
            });
        }
        Ok(self.revisions[to..from].iter().rev().collect())
    }
}

/// Storage of the schema and its recorded revision.
#[async_trait]
pub trait SchemaBackend: Send {
    /// Revision recorded in the database, `None` when nothing is applied.
    async fn current_revision(&mut self) -> Result<Option<String>, MigrationError>;

    /// Run one step and record `resulting_revision`, atomically.
    async fn apply(
        &mut self,
        migration: &Migration,
        direction: Direction,
        resulting_revision: Option<&str>,
    ) -> Result<(), MigrationError>;
}

/// Outcome of an upgrade or downgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub direction: Direction,
    pub from: Option<String>,
    pub to: Option<String>,
    pub applied: Vec<String>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

/// One line of `migrate history`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionStatus {
    pub revision: &'static str,
    pub down_revision: Option<&'static str>,
    pub description: &'static str,
    pub applied: bool,
    pub current: bool,
}

/// Drives a [`MigrationHistory`] against a [`SchemaBackend`].
pub struct Migrator<B> {
    history: MigrationHistory,
    backend: B,
}

impl<B: SchemaBackend> Migrator<B> {
    pub fn new(history: MigrationHistory, backend: B) -> Self {
        Self { history, backend }
    }

    pub fn history(&self) -> &MigrationHistory {
        &self.history
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Recorded revision, checked against the known history.
    pub async fn current(&mut self) -> Result<Option<String>, MigrationError> {
        let current = self.backend.current_revision().await?;
        if let Some(rev) = &current {
            if self.history.get(rev).is_none() {
                return Err(MigrationError::RecordedRevisionUnknown(rev.clone()));
            }
        }
        Ok(current)
    }

    /// Whether the recorded revision is the newest one.
    pub async fn is_at_head(&mut self) -> Result<bool, MigrationError> {
        let head = self.history.head().revision;
        Ok(self.current().await?.as_deref() == Some(head))
    }

    /// Apply pending revisions up to `target`.
    #[instrument(skip(self, target), fields(target = %target))]
    pub async fn upgrade(&mut self, target: &Target) -> Result<MigrationReport, MigrationError> {
        let from = self.current().await?;
        let steps: Vec<Migration> = self
            .history
            .upgrade_path(from.as_deref(), target)?
            .into_iter()
            .copied()
            .collect();
        self.run(Direction::Upgrade, from, steps).await
    }

    /// Revert revisions down to `target`.
    #[instrument(skip(self, target), fields(target = %target))]
    pub async fn downgrade(&mut self, target: &Target) -> Result<MigrationReport, MigrationError> {
        let from = self.current().await?;
        let steps: Vec<Migration> = self
            .history
            .downgrade_path(from.as_deref(), target)?
            .into_iter()
            .copied()
            .collect();
        self.run(Direction::Downgrade, from, steps).await
    }

    /// Every revision with its applied / current markers.
    pub async fn history_status(&mut self) -> Result<Vec<RevisionStatus>, MigrationError> {
        let current = self.current().await?;
        let level = self.history.level_of(current.as_deref())?;
        Ok(self
            .history
            .revisions()
            .iter()
            .enumerate()
            .map(|(idx, m)| RevisionStatus {
                revision: m.revision,
                down_revision: m.down_revision,
                description: m.description,
                applied: idx < level,
                current: idx + 1 == level,
            })
            .collect())
    }

    async fn run(
        &mut self,
        direction: Direction,
        from: Option<String>,
        steps: Vec<Migration>,
    ) -> Result<MigrationReport, MigrationError> {
        let mut applied = Vec::with_capacity(steps.len());
        let mut at = from.clone();

        for migration in &steps {
            let resulting = match direction {
                Direction::Upgrade => Some(migration.revision),
                Direction::Downgrade => migration.down_revision,
            };
            info!(
                "{} {} -> {}: {}",
                direction,
                at.as_deref().unwrap_or("base"),
                resulting.unwrap_or("base"),
                migration.description
            );

            self.backend
                .apply(migration, direction, resulting)
                .await
                .map_err(|e| MigrationError::Step {
                    revision: migration.revision.to_string(),
                    source: Box::new(e),
                })?;

            metrics::inc_migrations_applied(direction.as_str());
            applied.push(migration.revision.to_string());
            at = resulting.map(str::to_string);
        }

        Ok(MigrationReport {
            direction,
            from,
            to: at,
            applied,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn m(revision: &'static str, down_revision: Option<&'static str>) -> Migration {
        Migration {
            revision,
            down_revision,
            description: "test",
            up: "",
            down: "",
        }
    }

    fn chain() -> MigrationHistory {
        MigrationHistory::new(vec![
            m("003_c", Some("002_b")),
            m("001_a", None),
            m("002_b", Some("001_a")),
        ])
        .unwrap()
    }

    #[test]
    fn orders_base_to_head() {
        let history = chain();
        let order: Vec<_> = history.revisions().iter().map(|m| m.revision).collect();
        assert_eq!(order, vec!["001_a", "002_b", "003_c"]);
        assert_eq!(history.head().revision, "003_c");
        assert_eq!(history.base().revision, "001_a");
    }

    #[test]
    fn rejects_broken_chains() {
        assert!(matches!(
            MigrationHistory::new(vec![]),
            Err(MigrationError::EmptyHistory)
        ));
        assert!(matches!(
            MigrationHistory::new(vec![m("1_bad", None)]),
            Err(MigrationError::InvalidRevision(_))
        ));
        assert!(matches!(
            MigrationHistory::new(vec![m("001_a", None), m("001_a", None)]),
            Err(MigrationError::DuplicateRevision(_))
        ));
        assert!(matches!(
            MigrationHistory::new(vec![m("001_a", None), m("002_b", None)]),
            Err(MigrationError::MultipleBases(_))
        ));
        assert!(matches!(
            MigrationHistory::new(vec![m("001_a", None), m("002_b", Some("009_x"))]),
            Err(MigrationError::UnknownParent { .. })
        ));
        assert!(matches!(
            MigrationHistory::new(vec![
                m("001_a", None),
                m("002_b", Some("001_a")),
                m("003_c", Some("001_a")),
            ]),
            Err(MigrationError::Branch { .. })
        ));
    }

    #[test]
    fn rejects_cycle_detached_from_base() {
        let err = MigrationHistory::new(vec![
            m("001_a", None),
            m("002_b", Some("003_c")),
            m("003_c", Some("002_b")),
        ])
        .unwrap_err();
        match err {
            MigrationError::Disconnected(orphans) => assert_eq!(orphans, vec!["002_b", "003_c"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn upgrade_path_from_empty_to_head() {
        let history = chain();
        let path: Vec<_> = history
            .upgrade_path(None, &Target::Head)
            .unwrap()
            .iter()
            .map(|m| m.revision)
            .collect();
        assert_eq!(path, vec!["001_a", "002_b", "003_c"]);
        assert!(history
            .upgrade_path(Some("003_c"), &Target::Head)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn downgrade_path_is_newest_first() {
        let history = chain();
        let path: Vec<_> = history
            .downgrade_path(Some("003_c"), &Target::Revision("001_a".to_string()))
            .unwrap()
            .iter()
            .map(|m| m.revision)
            .collect();
        assert_eq!(path, vec!["003_c", "002_b"]);
    }

    #[test]
    fn paths_reject_wrong_direction_and_unknown_targets() {
        let history = chain();
        assert!(matches!(
            history.upgrade_path(Some("003_c"), &Target::Base),
            Err(MigrationError::WrongDirection { .. })
        ));
        assert!(matches!(
            history.downgrade_path(None, &Target::Head),
            Err(MigrationError::WrongDirection { .. })
        ));
        assert!(matches!(
            history.upgrade_path(None, &Target::Revision("009_nope".to_string())),
            Err(MigrationError::UnknownRevision(_))
        ));
    }

    #[test]
    fn parses_targets() {
        assert_eq!("head".parse::<Target>().unwrap(), Target::Head);
        assert_eq!("base".parse::<Target>().unwrap(), Target::Base);
        assert_eq!(
            "002_add_name".parse::<Target>().unwrap(),
            Target::Revision("002_add_name".to_string())
        );
        assert!("latest".parse::<Target>().is_err());
    }

    #[test]
    fn embedded_history_is_valid() {
        let history = MigrationHistory::embedded().unwrap();
        assert_eq!(history.base().revision, "001_initial");
        assert_eq!(history.head().revision, "002_add_name");
    }

    #[tokio::test]
    async fn upgrade_to_head_is_idempotent() {
        let mut migrator = Migrator::new(chain(), MemorySchemaBackend::new());

        let report = migrator.upgrade(&Target::Head).await.unwrap();
        assert_eq!(report.from, None);
        assert_eq!(report.to.as_deref(), Some("003_c"));
        assert_eq!(report.applied, vec!["001_a", "002_b", "003_c"]);
        assert!(migrator.is_at_head().await.unwrap());

        let again = migrator.upgrade(&Target::Head).await.unwrap();
        assert!(again.is_noop());
        assert_eq!(migrator.current().await.unwrap().as_deref(), Some("003_c"));
    }

    #[tokio::test]
    async fn downgrade_to_base_then_upgrade_round_trips() {
        let mut migrator = Migrator::new(chain(), MemorySchemaBackend::new());
        migrator.upgrade(&Target::Head).await.unwrap();

        let down = migrator.downgrade(&Target::Base).await.unwrap();
        assert_eq!(down.applied, vec!["003_c", "002_b", "001_a"]);
        assert_eq!(migrator.current().await.unwrap(), None);

        let up = migrator.upgrade(&Target::Head).await.unwrap();
        assert_eq!(up.applied.len(), 3);
    }

    #[tokio::test]
    async fn failed_step_keeps_last_good_revision() {
        let backend = MemorySchemaBackend::with_config(MemorySchemaConfig {
            fail_at: Some("002_b".to_string()),
        });
        let mut migrator = Migrator::new(chain(), backend);

        let err = migrator.upgrade(&Target::Head).await.unwrap_err();
        assert!(matches!(err, MigrationError::Step { ref revision, .. } if revision == "002_b"));
        assert_eq!(migrator.current().await.unwrap().as_deref(), Some("001_a"));
    }

    #[tokio::test]
    async fn history_status_marks_current() {
        let mut migrator = Migrator::new(chain(), MemorySchemaBackend::new());
        migrator
            .upgrade(&Target::Revision("002_b".to_string()))
            .await
            .unwrap();

        let status = migrator.history_status().await.unwrap();
        let flags: Vec<_> = status.iter().map(|s| (s.applied, s.current)).collect();
        assert_eq!(flags, vec![(true, false), (true, true), (false, false)]);
    }

    #[tokio::test]
    async fn unknown_recorded_revision_is_an_error() {
        let backend = MemorySchemaBackend::at_revision("099_future");
        let mut migrator = Migrator::new(chain(), backend);
        assert!(matches!(
            migrator.upgrade(&Target::Head).await,
            Err(MigrationError::RecordedRevisionUnknown(_))
        ));
    }
}
