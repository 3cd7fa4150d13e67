//! Core types and trait definitions for the Tenure subscription engine.
//!
//! This crate is deliberately free of database dependencies. It holds the
//! specification model, the period/cadence primitives every offset is
//! expressed in, the temporal relation rules, the subscription state machine
//! and the storage contracts the other crates build on.

pub mod cadence;
pub mod error;
pub mod period;
pub mod plan;
pub mod relation;
pub mod spec;
pub mod state;
pub mod store;
pub mod view;

pub use error::{Error, ErrorKind, Result};
