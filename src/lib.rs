pub mod agent;
pub mod builtin_tools;
pub mod collaborators;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod image_generation;
pub mod mcp;
pub mod message;
pub mod providers;
pub mod quota;
pub mod tool_registry;
pub mod tools;

pub use config::AppConfig;
pub use dispatcher::StreamDispatcher;
pub use error::{AppError, AppResult};
pub use message::{ChatResponse, Message, Role, StreamChunk};
pub use providers::ProviderRegistry;
