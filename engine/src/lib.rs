//! Request-routing and chaos-injection engine.
//!
//! Leaves first: [`pattern`] compiles wildcard patterns, [`conflict`] classifies
//! overlapping patterns at write time, [`rules`] keeps per-collection rule-set
//! snapshots, [`dispatcher`] picks the governing rule for a request and
//! [`injector`] turns a rule's chaos parameters into a delay and a verdict.

pub mod conflict;
pub mod dispatcher;
pub mod errors;
pub mod injector;
pub mod keys;
pub mod metrics_defs;
pub mod model;
pub mod pattern;
pub mod random;
pub mod rules;
pub mod usage;
