//! Error types for change-request read models and the guards built on them.

use crate::payload::SegmentId;
use thiserror::Error;

/// Result type alias for read-model operations.
pub type Result<T> = std::result::Result<T, ReadModelError>;

/// Errors raised while answering a read-model query.
///
/// Store and permission failures are never retried here; they travel to the
/// caller unchanged so the surrounding request can decide what to show.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadModelError {
    /// The backing store failed (connection, query, decoding).
    #[error("Database error: {0}")]
    Database(String),

    /// A change request carries a state outside the known lifecycle.
    #[error("Unrecognized change request state: {0}")]
    UnrecognizedState(String),

    /// The permission collaborator failed to answer.
    #[error("Permission check failed: {0}")]
    Permission(String),

    /// Stored JSON could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for ReadModelError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Domain errors produced by the caller-side guards.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GuardError {
    /// Change requests are enabled and the user may not skip them.
    #[error("You need the SKIP_CHANGE_REQUEST permission to change {project} directly")]
    SkipChangeRequest {
        /// Project the mutation targeted
        project: String,
        /// Environment the mutation targeted, if any
        environment: Option<String>,
    },

    /// The segment is still referenced and cannot be removed.
    #[error(
        "Segment {segment_id} is in use by features [{}] and change requests [{}]",
        .features.join(", "),
        .change_request_ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    )]
    SegmentInUse {
        /// The segment that was about to be deleted
        segment_id: SegmentId,
        /// Features whose strategies (persisted or proposed) reference it
        features: Vec<String>,
        /// Active change requests proposing strategies that reference it
        change_request_ids: Vec<i64>,
    },

    /// A segment cannot be moved into a project while other projects use it.
    #[error(
        "Invalid project. Segment is being used by strategies in other projects: {}",
        .projects.join(", ")
    )]
    InvalidSegmentProject {
        /// Projects currently using the segment
        projects: Vec<String>,
    },

    /// The underlying read model failed.
    #[error(transparent)]
    ReadModel(#[from] ReadModelError),
}

impl GuardError {
    /// Short machine-readable reason, used as a metrics label.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::SkipChangeRequest { .. } => "skip_change_request",
            Self::SegmentInUse { .. } => "segment_in_use",
            Self::InvalidSegmentProject { .. } => "invalid_segment_project",
            Self::ReadModel(_) => "read_model",
        }
    }
}
