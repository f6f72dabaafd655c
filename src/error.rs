//! Unified error types for the backend.

use thiserror::Error;

/// Unified error type for the backend.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration loading or validation error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Persistence error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(#[from] MigrationError),

    /// Document extraction error.
    #[error("extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    /// Document storage error.
    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment could not be deserialized.
    #[error("failed to read environment: {0}")]
    Env(#[from] envy::Error),

    /// A value was present but unusable.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// Offending variable.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Persistence errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database driver error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be mapped onto the domain model.
    #[error("corrupt {entity} row: {reason}")]
    Corrupt {
        /// Table or entity name.
        entity: &'static str,
        /// What was wrong with the row.
        reason: String,
    },

    /// The backend refused to serve requests.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Whether the error means the store is (temporarily) unreachable.
    pub fn is_unavailable(&self) -> bool {
        match self {
            StoreError::Unavailable(_) => true,
            StoreError::Database(e) => matches!(
                e,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            StoreError::Corrupt { .. } => false,
        }
    }
}

/// Migration history and execution errors.
#[derive(Error, Debug)]
pub enum MigrationError {
    /// No revisions were supplied.
    #[error("migration history is empty")]
    EmptyHistory,

    /// Revision id does not follow the `NNN_name` convention.
    #[error("invalid revision id {0:?}")]
    InvalidRevision(String),

    /// The same revision id appears twice.
    #[error("duplicate revision {0}")]
    DuplicateRevision(String),

    /// More than one revision has no parent.
    #[error("multiple base revisions: {0:?}")]
    MultipleBases(Vec<String>),

    /// Every revision has a parent.
    #[error("no base revision")]
    NoBase,

    /// A revision points at a parent that does not exist.
    #[error("revision {revision} revises unknown revision {parent}")]
    UnknownParent {
        /// Child revision.
        revision: String,
        /// Missing parent.
        parent: String,
    },

    /// Two revisions share a parent.
    #[error("revision {parent} has multiple children: {children:?}")]
    Branch {
        /// Shared parent.
        parent: String,
        /// Competing children.
        children: Vec<String>,
    },

    /// Some revisions are not reachable from the base.
    #[error("revisions not reachable from base: {0:?}")]
    Disconnected(Vec<String>),

    /// Requested target revision is not in the history.
    #[error("unknown revision {0}")]
    UnknownRevision(String),

    /// The database records a revision this binary does not know.
    #[error("database is at revision {0}, which is not in this build's history")]
    RecordedRevisionUnknown(String),

    /// Target lies in the opposite direction of the requested operation.
    #[error("cannot {direction} from {current} to {target}")]
    WrongDirection {
        /// "upgrade" or "downgrade".
        direction: &'static str,
        /// Current revision (or "base").
        current: String,
        /// Requested target.
        target: String,
    },

    /// A single step failed; earlier steps stay applied.
    #[error("revision {revision} failed: {source}")]
    Step {
        /// Revision being applied or reverted.
        revision: String,
        /// Underlying failure.
        #[source]
        source: Box<MigrationError>,
    },

    /// Database driver error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Backend-specific failure.
    #[error("{0}")]
    Backend(String),
}

/// Document extraction errors.
#[derive(Error, Debug)]
pub enum ExtractionError {
    /// No API key configured.
    #[error("extraction provider not configured")]
    NotConfigured,

    /// HTTP request failed.
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Provider answered with a non-success status.
    #[error("provider returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body (truncated).
        body: String,
    },

    /// Provider answered without content.
    #[error("provider returned no content")]
    EmptyResponse,

    /// Provider refused to answer.
    #[error("provider refused: {0}")]
    Refused(String),

    /// Content was not a valid extraction.
    #[error("failed to parse extraction: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Document storage errors.
#[derive(Error, Debug)]
pub enum DocumentError {
    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Key escapes the storage root or is otherwise malformed.
    #[error("invalid document key {0:?}")]
    InvalidKey(String),
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_error_mentions_revision_and_cause() {
        let err = MigrationError::Step {
            revision: "002_add_name".to_string(),
            source: Box::new(MigrationError::Backend("boom".to_string())),
        };
        assert_eq!(err.to_string(), "revision 002_add_name failed: boom");
    }

    #[test]
    fn pool_timeout_is_unavailable() {
        assert!(StoreError::Database(sqlx::Error::PoolTimedOut).is_unavailable());
        assert!(!StoreError::Corrupt {
            entity: "investor_profiles",
            reason: "bad stage".to_string()
        }
        .is_unavailable());
    }
}
