//! Source table loading and the training-time feature contract: cleaning,
//! untreated-film filtering, standardization and target normalization.

pub mod loader;
pub mod preprocess;

pub use loader::{load_table, read_table};
pub use preprocess::{FeatureMatrix, FeaturePreprocessor, PreparedFeatures};
