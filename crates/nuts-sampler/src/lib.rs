//! No-U-Turn Hamiltonian Monte Carlo over an unconstrained parameter vector.
//!
//! Models implement [`LogDensity`]; [`sample`] runs independent chains in
//! parallel with step-size and diagonal-metric adaptation during warm-up.

pub mod adaptation;
pub mod density;
pub mod diagnostics;
pub mod error;
mod hamiltonian;
mod nuts;
pub mod sampler;

pub use density::LogDensity;
pub use error::{SamplerError, SamplerResult};
pub use nuts::MAX_ENERGY_ERROR;
pub use sampler::{
    run_chain, sample, CancelFlag, Chain, DrawStats, SampleOutput, SamplerConfig, SamplerWarning,
};
