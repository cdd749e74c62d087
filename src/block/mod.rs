//! Block I/O core: the provider/consumer device graph, request/handler
//! completion, and the physical-sector LRU cache (component K).

pub mod cache;
pub mod provider;
pub mod request;
