pub mod batch;
pub mod config;
pub mod reference;
pub mod scan;
pub mod sink;

// Re-export vision types for convenience
pub use findpics_vision::{Detection, Embedding, Pipeline};
