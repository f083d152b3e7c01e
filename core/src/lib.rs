//! # Unleash Change Request Core
//!
//! Read-model logic answering one question for the rest of the platform: is
//! this segment or project entangled in a change request that has not been
//! applied, rejected or cancelled yet?
//!
//! ## Components
//!
//! - [`state`]: lifecycle states and the active/terminal partition
//! - [`payload`]: interpretation of `change_request_events.payload`
//! - [`usage`]: aggregation of pending strategy events by segment
//! - [`access`]: users, permissions and the bypass rule
//! - [`read_model`]: the traits services depend on
//! - [`guard`]: caller-side composition of the read models
//!
//! ## Example
//!
//! ```ignore
//! use unleash_cr_core::guard::{GuardConfig, SegmentGuard};
//!
//! let guard = SegmentGuard::new(strategies, usage, GuardConfig::default());
//! guard.ensure_segment_not_in_use(segment_id).await?;
//! segment_store.delete(segment_id).await?;
//! ```

pub mod access;
pub mod error;
pub mod guard;
pub mod model;
pub mod payload;
pub mod read_model;
pub mod state;
pub mod usage;

// Re-export main types for convenience
pub use access::{User, UserPermission, SKIP_CHANGE_REQUEST};
pub use error::{GuardError, ReadModelError, Result};
pub use guard::{GuardConfig, SegmentGuard, StrategiesUsingSegment};
pub use model::{
    ChangeRequest, ChangeRequestEnvironment, ChangeRequestEvent, ChangeRequestRef,
    ChangeRequestStrategy, DependentFeature, PendingStrategyEvent, PersistedSegmentUsage,
    SegmentStrategy, SegmentUsage,
};
pub use payload::{SegmentId, StrategyChange};
pub use read_model::{
    ChangeRequestAccessReadModel, ChangeRequestSegmentUsageReadModel, DependentFeaturesStore,
    PermissionChecker, ReadModelFuture, SegmentStrategyReader,
};
pub use state::{ChangeRequestState, Lifecycle};
