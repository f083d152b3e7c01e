//! # Unleash Change Request Testing
//!
//! In-memory read models and fixtures for fast, deterministic tests.
//!
//! - [`InMemoryChangeRequestStore`]: implements every read-model trait over
//!   plain collections
//! - [`StaticPermissionChecker`]: a fixed permission table
//! - [`fixtures`]: payload builders
//! - [`init_test_tracing`]: log output for failing tests
//!
//! ## Example
//!
//! ```
//! use unleash_cr_core::{ChangeRequest, ChangeRequestEvent, ChangeRequestState};
//! use unleash_cr_core::ChangeRequestSegmentUsageReadModel;
//! use unleash_cr_testing::{InMemoryChangeRequestStore, fixtures};
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryChangeRequestStore::new();
//! store.insert_change_request(ChangeRequest::new(1, "default", "production", ChangeRequestState::Draft));
//! store.add_event(ChangeRequestEvent::new(1, "checkout", "addStrategy", fixtures::add_strategy("flexibleRollout", &[3])));
//!
//! assert!(store.is_segment_used_in_active_change_requests(3).await.unwrap());
//! # });
//! ```

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Locks only panic if a test already panicked

pub mod fixtures;
mod permissions;
mod store;

pub use permissions::StaticPermissionChecker;
pub use store::InMemoryChangeRequestStore;

use tracing_subscriber::EnvFilter;

/// Install a test-friendly `tracing` subscriber.
///
/// Honors `RUST_LOG` and defaults to `debug` for this workspace. Safe to call
/// from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("unleash_cr_core=debug,unleash_cr_postgres=debug"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
