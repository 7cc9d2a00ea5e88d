//! Bayesian S/V regression: explicit log-joint density, posterior trace
//! persistence, posterior predictive and convergence summaries.

pub mod distributions;
pub mod error;
pub mod fit;
pub mod model;
pub mod predictive;
pub mod summary;
pub mod trace;

pub use error::{ModelError, ModelResult};
pub use fit::fit;
pub use model::{ModelParameters, Priors, RegressionModel};
pub use predictive::{posterior_predictive, PredictiveDraws, ResidualSummary};
pub use summary::{ChainSummary, ParameterSummary, TraceSummary};
pub use trace::{ChainDraws, ObservedData, PosteriorTrace, TRACE_FORMAT};
