//! Per-level autoregressive priors
//!
//! The orchestrator treats priors as opaque collaborators behind the `Prior`
//! trait. `mock` provides deterministic stand-ins used by the tests and the
//! CLI's dry runs.

pub mod mock;
mod model;
mod residency;

pub use model::{Device, Labeller, Prior, PriorInfo, SampleRequest};
pub use residency::{AcceleratorSlot, ResidencyLease};
