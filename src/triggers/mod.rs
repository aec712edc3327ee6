//! Trigger engine: declarative condition/effect rules and cascade evaluation.
//!
//! Per top-level write the engine moves through
//! `Committed -> Evaluating -> (Cascading -> Evaluating)* -> Settled`, or
//! aborts with `CascadeLimitExceeded`. Rules are evaluated in registration
//! order against the (before, after) pair of each write; a matching rule's
//! effect writes through the same `CascadeTxn`, which re-enters evaluation for
//! the written collection one level deeper.

/// Cascade transaction and working set.
pub mod cascade;
/// Rule registry.
pub mod registry;
/// Rule and change types.
pub mod rule;

pub use cascade::CascadeTxn;
pub use registry::RuleSet;
pub use rule::{Change, Effect, Predicate, TriggerRule};
