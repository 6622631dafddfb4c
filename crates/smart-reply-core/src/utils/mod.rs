pub mod error;
pub mod failover;
pub mod json;
pub mod logger;
pub mod similarity;
pub mod token_estimator;

pub use error::{ApiError, CoreError};
pub use failover::FailoverChain;
pub use similarity::{l2_distance, relevance_from_distance};
