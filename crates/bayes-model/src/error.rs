use nuts_sampler::SamplerError;
use sv_core::SvError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Data(#[from] SvError),

    #[error("Sampling failed: {0}")]
    Sampler(#[from] SamplerError),
}

pub type ModelResult<T> = Result<T, ModelError>;
