// src/config.rs
use std::path::PathBuf;
use std::time::Duration;

/// Engine-level configuration, captured once at server construction.
/// Changing any of these requires a restart.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub port: u16,
    /// Worker threads. Defaults to the number of logical cores.
    pub threads: usize,
    /// Hard cap on the request body size.
    pub max_request_size: usize,
    /// Cap on the header block, before the body starts.
    pub max_header_size: usize,
    /// Idle timer per connection; fires without a response.
    pub keep_alive_timeout: Duration,
    /// Read chunk size for the per-connection socket reads.
    pub io_buffer_size: usize,
    /// Keep-alive connections are recycled after this many requests.
    pub max_requests_per_connection: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".to_string(),
            port: 8080,
            threads: num_cpus::get(),
            max_request_size: 10 * 1024 * 1024,
            max_header_size: 64 * 1024,
            keep_alive_timeout: Duration::from_secs(30),
            io_buffer_size: 64 * 1024,
            max_requests_per_connection: 10_000,
        }
    }
}

/// Static-file cache configuration.
#[derive(Debug, Clone)]
pub struct StaticCacheConfig {
    /// Fallback root for request paths no registered route prefixes.
    pub root_directory: PathBuf,
    pub max_cache_size_mb: u64,
    /// Files larger than this are served from a one-shot mapping and never cached.
    pub max_file_size_mb: u64,
    pub cache_ttl: Duration,
    pub enable_compression: bool,
    pub enable_range_requests: bool,
    pub enable_etags: bool,
    /// Only files at least this large are gzip candidates.
    pub compression_threshold: u64,
    /// Content-type prefixes eligible for gzip.
    pub compression_types: Vec<String>,
    pub forbidden_extensions: Vec<String>,
    pub hidden_prefixes: Vec<String>,
}

impl Default for StaticCacheConfig {
    fn default() -> Self {
        Self {
            root_directory: PathBuf::from("./static"),
            max_cache_size_mb: 512,
            max_file_size_mb: 100,
            cache_ttl: Duration::from_secs(60 * 60),
            enable_compression: true,
            enable_range_requests: true,
            enable_etags: true,
            compression_threshold: 1024,
            compression_types: vec![
                "text/html".to_string(),
                "text/css".to_string(),
                "text/javascript".to_string(),
                "application/javascript".to_string(),
                "application/json".to_string(),
                "text/xml".to_string(),
            ],
            forbidden_extensions: vec![".tmp".to_string(), ".bak".to_string(), ".log".to_string()],
            hidden_prefixes: vec![".".to_string(), "_".to_string()],
        }
    }
}

impl StaticCacheConfig {
    pub fn max_cache_bytes(&self) -> u64 {
        self.max_cache_size_mb * 1024 * 1024
    }

    pub fn max_file_bytes(&self) -> u64 {
        self.max_file_size_mb * 1024 * 1024
    }
}

/// JSON parser knobs; everything defaults to RFC 8259 strictness.
#[derive(Debug, Clone)]
pub struct JsonParserConfig {
    /// Accept `//` and `/* */` comments wherever whitespace is allowed.
    pub allow_comments: bool,
    /// Accept a single trailing comma before `}` or `]`.
    pub allow_trailing_commas: bool,
    /// When set, trailing non-whitespace after the root value is an error.
    pub strict_mode: bool,
    pub max_depth: usize,
    pub max_string_length: usize,
}

impl Default for JsonParserConfig {
    fn default() -> Self {
        Self {
            allow_comments: false,
            allow_trailing_commas: false,
            strict_mode: true,
            max_depth: 100,
            max_string_length: 1024 * 1024,
        }
    }
}

/// JSON serializer knobs.
#[derive(Debug, Clone)]
pub struct JsonSerializerConfig {
    pub pretty_print: bool,
    pub indent_size: usize,
    /// Escape every non-ASCII scalar as `\uXXXX`. Alias of `ensure_ascii`.
    pub escape_unicode: bool,
    /// Emit object keys in ascending codepoint order.
    pub sort_keys: bool,
    pub ensure_ascii: bool,
}

impl Default for JsonSerializerConfig {
    fn default() -> Self {
        Self {
            pretty_print: false,
            indent_size: 2,
            escape_unicode: false,
            sort_keys: false,
            ensure_ascii: false,
        }
    }
}
