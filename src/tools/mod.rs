//! Concrete tool implementations reused as backing engines for the advanced-tool set's
//! external-facing operations: [`http_client::HttpClient`] for `fetchWebpage`, [`memory::Memory`]
//! for `memorySave`/`memoryRetrieve`.

pub mod http_client;
pub mod memory;

pub use http_client::{HttpClient, HttpClientError, HttpResponse};
pub use memory::{Memory, MemoryMetadata};
