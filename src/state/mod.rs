//! Local State Tracking
//!
//! Bookkeeping that outlives individual synchronization jobs.

mod tracker;

pub use tracker::{FailureTracker, TrackerSummary};
