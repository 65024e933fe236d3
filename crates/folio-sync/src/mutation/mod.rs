//! Optimistic mutations
//!
//! [`MutationCoordinator`] owns the optimistic state machine;
//! [`MutationRunner`] drives a mutation end to end against the API.

pub mod coordinator;
pub mod runner;

pub use coordinator::{
    IgnoreReason, MutationAction, MutationCoordinator, MutationHandle, MutationOp, MutationStatus,
    PendingMutation, Settlement,
};
pub use runner::{MutationRunner, MutationTicket};
