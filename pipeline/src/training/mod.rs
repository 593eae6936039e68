//! Chill/fear classifier training pipeline.
//!
//! Stages run strictly forward: session loading and splitting ([`data`]),
//! class balancing ([`balance`]), model training ([`trainer`]), evaluation
//! ([`metrics`]) and the end-to-end runs that persist artifacts
//! ([`pipeline`]).

pub mod balance;
pub mod data;
pub mod metrics;
pub mod pipeline;
pub mod trainer;
