// src/lib.rs
//! PySpeed: an HTTP/1.1 acceleration layer.
//!
//! Three pieces run on every request: a non-blocking connection engine
//! (acceptor thread + fixed epoll worker pool), a memory-mapped LRU
//! static-file cache with revalidation/ranges/gzip, and a hand-rolled JSON
//! parser/serializer that doubles as a standalone API.

pub mod cache;
pub mod config;
pub mod conn;
pub mod error;
pub mod handler;
pub mod http;
pub mod json;
pub mod logging;
pub mod metrics;
pub mod mime;
pub mod parser;
pub mod router;
pub mod server;
pub mod slab;
pub mod syscalls;
pub mod worker;

// Re-exports for users
pub use cache::{BodyBytes, CacheStats, ServeOutcome, ServedFile, StaticFileCache};
pub use config::{JsonParserConfig, JsonSerializerConfig, ServerConfig, StaticCacheConfig};
pub use error::{PySpeedError, PySpeedResult};
pub use handler::AppHandler;
pub use http::{CookieOptions, HeaderMap, Method, ResponseData};
pub use json::{JsonObject, JsonParser, JsonSerializer, JsonValue};
pub use logging::init_logging;
pub use parser::{ParsedRequest, RequestParser};
pub use router::RouteTable;
pub use server::Server;
