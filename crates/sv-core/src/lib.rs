pub mod artifact;
pub mod error;
pub mod inference;
pub mod schema;
pub mod types;

pub use artifact::*;
pub use error::*;
pub use inference::Predictor;
pub use types::*;
