pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod generator;
pub mod server;
pub mod style_cache;

// Re-export commonly used types
pub use config::EngineConfig;
pub use coordinator::{GenerationCoordinator, StyleRequest, StyleResult, StyleSource};
pub use engine::{CacheStatus, SiteStatus, StyleEngine};
pub use error::EngineError;
pub use generator::{GenerationRequest, GeneratorError, StyleGenerator};
pub use style_cache::StyleStore;

pub type AppState = std::sync::Arc<StyleEngine>;
