pub mod error;
pub mod logger;
pub mod similarity;
pub mod text;
pub mod token_estimator;

pub use error::{ApiError, CoreError, CoreResult};
pub use similarity::cosine_similarity;
