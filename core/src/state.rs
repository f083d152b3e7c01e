//! Change-request lifecycle states.
//!
//! A change request moves monotonically from one of the active states towards
//! exactly one terminal state. Everything that needs to know whether a change
//! request can still block a mutation goes through [`ChangeRequestState`]; query
//! sites bind [`ChangeRequestState::terminal_names`] instead of spelling the
//! states out.

use crate::error::{ReadModelError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// State of a change request, as stored in `change_requests.state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeRequestState {
    /// Being authored
    Draft,
    /// Waiting for approvals
    #[serde(rename = "In review", alias = "In Review")]
    InReview,
    /// Approved and scheduled for a later application
    Scheduled,
    /// Approved, not yet applied
    Approved,
    /// Changes have been applied
    Applied,
    /// Rejected by a reviewer
    Rejected,
    /// Withdrawn by its author
    Cancelled,
}

/// Whether a state can still block conflicting mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifecycle {
    /// Not final yet; referenced entities must be protected.
    Active,
    /// Final; the change request can be ignored.
    Terminal,
}

impl ChangeRequestState {
    /// Every known state.
    pub const ALL: [Self; 7] = [
        Self::Draft,
        Self::InReview,
        Self::Scheduled,
        Self::Approved,
        Self::Applied,
        Self::Rejected,
        Self::Cancelled,
    ];

    /// States that still block.
    pub const ACTIVE: [Self; 4] = [Self::Draft, Self::InReview, Self::Scheduled, Self::Approved];

    /// States that no longer block.
    pub const TERMINAL: [Self; 3] = [Self::Applied, Self::Rejected, Self::Cancelled];

    /// Convert state to its database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "Draft",
            Self::InReview => "In review",
            Self::Scheduled => "Scheduled",
            Self::Approved => "Approved",
            Self::Applied => "Applied",
            Self::Rejected => "Rejected",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Parse state from its database string.
    ///
    /// `In Review` is accepted as a spelling of `In review`.
    ///
    /// # Errors
    ///
    /// Returns [`ReadModelError::UnrecognizedState`] if the string doesn't
    /// match a known state. Callers must not guess a default: treating an
    /// unknown state as terminal could let a referenced segment be deleted.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "Draft" => Ok(Self::Draft),
            "In review" | "In Review" => Ok(Self::InReview),
            "Scheduled" => Ok(Self::Scheduled),
            "Approved" => Ok(Self::Approved),
            "Applied" => Ok(Self::Applied),
            "Rejected" => Ok(Self::Rejected),
            "Cancelled" => Ok(Self::Cancelled),
            other => Err(ReadModelError::UnrecognizedState(other.to_string())),
        }
    }

    /// Which side of the active/terminal partition this state is on.
    #[must_use]
    pub const fn lifecycle(self) -> Lifecycle {
        match self {
            Self::Draft | Self::InReview | Self::Scheduled | Self::Approved => Lifecycle::Active,
            Self::Applied | Self::Rejected | Self::Cancelled => Lifecycle::Terminal,
        }
    }

    /// Returns `true` if the change request can still block a mutation.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self.lifecycle(), Lifecycle::Active)
    }

    /// Database names of the terminal states, for `state <> ALL($1)` filters.
    #[must_use]
    pub fn terminal_names() -> Vec<&'static str> {
        Self::TERMINAL.iter().map(Self::as_str).collect()
    }
}

impl fmt::Display for ChangeRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeRequestState {
    type Err = ReadModelError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Classify a raw state string.
///
/// # Errors
///
/// Returns [`ReadModelError::UnrecognizedState`] for unknown states.
pub fn classify(state: &str) -> Result<Lifecycle> {
    ChangeRequestState::parse(state).map(ChangeRequestState::lifecycle)
}

/// Classification used on query paths: unknown states count as active.
///
/// An unknown state is reported at `error` level and counted, so bad data is
/// visible to operators while deletes stay blocked.
#[must_use]
pub fn blocks_mutations(change_request_id: i64, state: &str) -> bool {
    match classify(state) {
        Ok(lifecycle) => lifecycle == Lifecycle::Active,
        Err(err) => {
            tracing::error!(
                change_request_id,
                state,
                error = %err,
                "Change request has an unrecognized state, treating it as active"
            );
            metrics::counter!("change_requests.unrecognized_state").increment(1);
            true
        }
    }
}
