pub mod backend;
pub mod client;
pub mod error;
pub mod types;

pub use backend::{BoxFuture, CompletionBackend, HttpBackend};
pub use client::{
    DEFAULT_BASE_URL, DEFAULT_MAX_ATTEMPTS, DEFAULT_MODEL, DEFAULT_REQUEST_TIMEOUT,
    GenerationClient, GenerationConfig,
};
pub use error::{GenerationError, GenerationResult};
pub use types::{ChatMessage, CompletionRequest, Role};
