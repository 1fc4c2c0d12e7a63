//! Placement Module
//!
//! Request validation, the datacenter-spreading selector, and the summaries
//! used to explain a selection.

pub mod request;
pub mod selector;
pub mod stats;

pub use request::*;
pub use selector::*;
pub use stats::*;
