//! Reconciliation and subscription workflows for Tenure.
//!
//! [`reconcile`] diffs a materialized [`SubscriptionView`] against a target
//! [`Specification`] and issues the minimal create/update/delete calls
//! through a store [`Transaction`]. [`SubscriptionService`] wraps it in the
//! create/edit/cancel/continue/delete operations, gated by the subscription
//! state machine and serialized per customer.
//!
//! [`SubscriptionView`]: tenure_core::view::SubscriptionView
//! [`Specification`]: tenure_core::spec::Specification
//! [`Transaction`]: tenure_core::store::Transaction

pub mod error;
pub mod lock;
pub mod reconcile;
pub mod target;
pub mod workflow;

#[cfg(test)]
mod memory;

pub use error::{Error, Result};
pub use reconcile::{Applied, Operation, SyncReport, reconcile, reconcile_one};
pub use workflow::SubscriptionService;
