use thiserror::Error;

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("Invalid sampler configuration: {0}")]
    InvalidConfig(String),

    #[error("Chain {chain} could not find a finite starting point after {attempts} attempts")]
    InitializationFailed { chain: usize, attempts: usize },

    #[error("Sampling cancelled during chain {0}")]
    Cancelled(usize),
}

pub type SamplerResult<T> = Result<T, SamplerError>;
