pub mod context;
pub mod deal;
pub mod engine;
pub mod error;
pub mod modules;
pub mod root_finding;
pub mod series;
pub mod time_value;
pub mod timeline;
pub mod types;

pub use context::DealContext;
pub use deal::DealInput;
pub use engine::{Engine, EngineConfig, EngineResult};
pub use error::{UnderwritingError, ValidationIssue};
pub use series::Series;
pub use timeline::Timeline;
pub use types::*;

/// Standard result type for all underwriting operations
pub type UnderwritingResult<T> = Result<T, UnderwritingError>;
