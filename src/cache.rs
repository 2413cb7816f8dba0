// src/cache.rs
use crate::config::StaticCacheConfig;
use crate::http::HeaderMap;
use crate::mime;
use crate::syscalls::Mapping;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// One cached file. Shared ownership keeps the mapping alive for any session
/// still writing from it after the index has moved on.
#[derive(Debug)]
pub struct CacheEntry {
    pub file_path: PathBuf,
    pub content_type: &'static str,
    pub etag: String,
    pub last_modified: SystemTime,
    pub file_size: u64,
    map: Mapping,
    /// Milliseconds since the cache epoch; drives LRU ordering.
    last_accessed: AtomicU64,
    access_count: AtomicU64,
    /// Gzip form, produced at most once and reused until eviction.
    compressed: OnceLock<Arc<Vec<u8>>>,
}

impl CacheEntry {
    pub fn bytes(&self) -> &[u8] {
        self.map.as_slice()
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    fn touch(&self, epoch: Instant) {
        self.last_accessed
            .store(epoch.elapsed().as_millis() as u64, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
    }
}

/// Response body bytes for the static path. Holding this keeps whatever
/// backs it (mapping or compressed buffer) alive across partial writes.
#[derive(Debug, Clone)]
pub enum BodyBytes {
    Empty,
    Owned(Vec<u8>),
    Shared(Arc<Vec<u8>>),
    Mapped {
        entry: Arc<CacheEntry>,
        offset: usize,
        len: usize,
    },
}

impl BodyBytes {
    pub fn len(&self) -> usize {
        match self {
            BodyBytes::Empty => 0,
            BodyBytes::Owned(v) => v.len(),
            BodyBytes::Shared(v) => v.len(),
            BodyBytes::Mapped { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_slice(&self) -> &[u8] {
        match self {
            BodyBytes::Empty => &[],
            BodyBytes::Owned(v) => v,
            BodyBytes::Shared(v) => v,
            BodyBytes::Mapped { entry, offset, len } => &entry.bytes()[*offset..*offset + *len],
        }
    }
}

#[derive(Debug)]
pub struct ServedFile {
    pub content_type: &'static str,
    pub etag: String,
    pub last_modified: SystemTime,
    pub content_length: u64,
    pub body: BodyBytes,
    /// `Some("gzip")` when the compressed variant is being served.
    pub encoding: Option<&'static str>,
    pub is_partial_content: bool,
    pub range_start: u64,
    pub range_end: u64,
    pub total_size: u64,
}

#[derive(Debug)]
pub enum ServeOutcome {
    Success(ServedFile),
    NotFound,
    Forbidden,
    NotModified {
        etag: String,
        last_modified: SystemTime,
    },
    RangeNotSatisfiable,
    InternalError,
}

#[derive(Debug, Default)]
pub struct CacheStats {
    pub files_served: AtomicU64,
    pub bytes_served: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub files_compressed: AtomicU64,
    pub range_requests: AtomicU64,
    pub not_modified_responses: AtomicU64,
    pub total_serve_time_us: AtomicU64,
}

impl CacheStats {
    pub fn cache_hit_ratio(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let total = hits + self.cache_misses.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        hits as f64 / total as f64
    }

    pub fn average_serve_time_us(&self) -> f64 {
        let served = self.files_served.load(Ordering::Relaxed);
        if served == 0 {
            return 0.0;
        }
        self.total_serve_time_us.load(Ordering::Relaxed) as f64 / served as f64
    }

    pub fn throughput_mb_per_sec(&self) -> f64 {
        let total_time_s = self.total_serve_time_us.load(Ordering::Relaxed) as f64 / 1e6;
        if total_time_s == 0.0 {
            return 0.0;
        }
        let total_mb = self.bytes_served.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0);
        total_mb / total_time_s
    }
}

struct CacheIndex {
    map: HashMap<PathBuf, Arc<CacheEntry>>,
    current_size: u64,
}

/// Memory-mapped, size-bounded static-file cache with LRU eviction,
/// ETag/Last-Modified revalidation, Range support, and lazy gzip.
///
/// The index lock is only ever held around lookups and mutations; mapping,
/// compression, and socket writes all happen outside it.
pub struct StaticFileCache {
    config: StaticCacheConfig,
    routes: RwLock<Vec<(String, PathBuf)>>,
    index: RwLock<CacheIndex>,
    stats: CacheStats,
    epoch: Instant,
}

impl StaticFileCache {
    pub fn new(config: StaticCacheConfig) -> Self {
        Self {
            config,
            routes: RwLock::new(Vec::new()),
            index: RwLock::new(CacheIndex {
                map: HashMap::new(),
                current_size: 0,
            }),
            stats: CacheStats::default(),
            epoch: Instant::now(),
        }
    }

    pub fn config(&self) -> &StaticCacheConfig {
        &self.config
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn add_route(&self, url_path: &str, local_root: impl Into<PathBuf>) {
        self.routes
            .write()
            .unwrap()
            .push((url_path.to_string(), local_root.into()));
    }

    pub fn remove_route(&self, url_path: &str) {
        self.routes.write().unwrap().retain(|(p, _)| p != url_path);
    }

    pub fn list_routes(&self) -> Vec<String> {
        self.routes
            .read()
            .unwrap()
            .iter()
            .map(|(url, root)| format!("{} -> {}", url, root.display()))
            .collect()
    }

    /// Does any registered URL prefix cover this path? The engine uses this
    /// to pick the static pipeline over the application bridge.
    pub fn matches_route(&self, request_path: &str) -> bool {
        self.routes
            .read()
            .unwrap()
            .iter()
            .any(|(prefix, _)| request_path.starts_with(prefix.as_str()))
    }

    pub fn current_cache_size(&self) -> u64 {
        self.index.read().unwrap().current_size
    }

    pub fn cached_entry_count(&self) -> usize {
        self.index.read().unwrap().map.len()
    }

    pub fn clear_cache(&self) {
        let mut idx = self.index.write().unwrap();
        idx.map.clear();
        idx.current_size = 0;
    }

    pub fn invalidate_file(&self, file_path: &Path) {
        let mut idx = self.index.write().unwrap();
        if let Some(entry) = idx.map.remove(file_path) {
            idx.current_size -= entry.file_size;
        }
    }

    pub fn serve(&self, request_path: &str, headers: &HeaderMap) -> ServeOutcome {
        let start = Instant::now();

        let file_path = match self.resolve_file_path(request_path) {
            Resolved::Path(p) => p,
            Resolved::Traversal => return ServeOutcome::Forbidden,
        };

        if self.is_file_forbidden(&file_path) {
            return ServeOutcome::Forbidden;
        }

        let meta = match std::fs::metadata(&file_path) {
            Ok(m) if m.is_file() => m,
            _ => return ServeOutcome::NotFound,
        };

        let last_modified = truncate_to_seconds(meta.modified().unwrap_or(UNIX_EPOCH));
        let file_size = meta.len();
        let etag = if self.config.enable_etags {
            generate_etag(&file_path, last_modified)
        } else {
            String::new()
        };

        // Conditional revalidation happens before the cache body is touched.
        if self.config.enable_etags && !etag.is_empty() {
            if let Some(if_none_match) = headers.get("if-none-match") {
                if if_none_match.trim() == etag {
                    return self.not_modified(&file_path, etag, last_modified);
                }
            }
        }
        if let Some(if_modified_since) = headers.get("if-modified-since") {
            if let Some(client_time) = mime::parse_http_date(if_modified_since) {
                if last_modified <= client_time {
                    return self.not_modified(&file_path, etag, last_modified);
                }
            }
        }

        let entry = match self.lookup(&file_path, last_modified) {
            Some(entry) => {
                self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
                entry
            }
            None => {
                self.stats.cache_misses.fetch_add(1, Ordering::Relaxed);
                match self.load_entry(&file_path, etag.clone(), last_modified) {
                    Ok(entry) => entry,
                    Err(e) => {
                        warn!(path = %file_path.display(), error = %e, "failed to map static file");
                        return ServeOutcome::InternalError;
                    }
                }
            }
        };

        // The mapped size is authoritative; the earlier stat may have raced
        // with a writer.
        let file_size = entry.file_size;

        let mut served = ServedFile {
            content_type: entry.content_type,
            etag,
            last_modified,
            content_length: file_size,
            body: BodyBytes::Mapped {
                entry: entry.clone(),
                offset: 0,
                len: file_size as usize,
            },
            encoding: None,
            is_partial_content: false,
            range_start: 0,
            range_end: 0,
            total_size: file_size,
        };

        if let Some(range_header) = headers.get("range") {
            if self.config.enable_range_requests {
                match parse_range_header(range_header, file_size) {
                    Some((range_start, range_end)) => {
                        self.stats.range_requests.fetch_add(1, Ordering::Relaxed);
                        served.is_partial_content = true;
                        served.range_start = range_start;
                        served.range_end = range_end;
                        served.content_length = range_end - range_start + 1;
                        served.body = BodyBytes::Mapped {
                            entry: entry.clone(),
                            offset: range_start as usize,
                            len: (range_end - range_start + 1) as usize,
                        };
                    }
                    None => return ServeOutcome::RangeNotSatisfiable,
                }
            }
        }

        if !served.is_partial_content
            && self.should_compress(entry.content_type, file_size)
            && accepts_gzip(headers)
        {
            let compressed = match entry.compressed.get() {
                Some(existing) => existing.clone(),
                None => {
                    let fresh = Arc::new(gzip_compress(entry.bytes()));
                    match entry.compressed.set(fresh.clone()) {
                        Ok(()) => {
                            self.stats.files_compressed.fetch_add(1, Ordering::Relaxed);
                            fresh
                        }
                        // Another session won the race; reuse its buffer.
                        Err(_) => entry.compressed.get().cloned().unwrap_or(fresh),
                    }
                }
            };
            served.content_length = compressed.len() as u64;
            served.body = BodyBytes::Shared(compressed);
            served.encoding = Some("gzip");
        }

        entry.touch(self.epoch);

        self.stats.files_served.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_served
            .fetch_add(served.content_length, Ordering::Relaxed);
        self.stats
            .total_serve_time_us
            .fetch_add(start.elapsed().as_micros() as u64, Ordering::Relaxed);

        ServeOutcome::Success(served)
    }

    fn not_modified(
        &self,
        file_path: &Path,
        etag: String,
        last_modified: SystemTime,
    ) -> ServeOutcome {
        self.stats
            .not_modified_responses
            .fetch_add(1, Ordering::Relaxed);
        // A revalidation that lands on a cached entry still counts as a hit.
        if self.index.read().unwrap().map.contains_key(file_path) {
            self.stats.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        ServeOutcome::NotModified {
            etag,
            last_modified,
        }
    }

    fn resolve_file_path(&self, request_path: &str) -> Resolved {
        let routes = self.routes.read().unwrap();
        let best = routes
            .iter()
            .filter(|(prefix, _)| request_path.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len());

        let (prefix_len, local_root) = match best {
            Some((prefix, root)) => (prefix.len(), root.clone()),
            None => (0, self.config.root_directory.clone()),
        };
        drop(routes);

        let mut relative = &request_path[prefix_len..];
        if relative.is_empty() || relative == "/" {
            relative = "/index.html";
        }

        // Collapse the relative part on its own first: a `..` that survives
        // would otherwise eat into the root's components after joining.
        let normalized_rel = mime::normalize_path(relative);
        if !mime::is_safe_path(&normalized_rel) {
            return Resolved::Traversal;
        }

        let joined = format!("{}{}", local_root.display(), normalized_rel);
        let normalized = mime::normalize_path(&joined);
        if !mime::is_safe_path(&normalized) {
            return Resolved::Traversal;
        }

        Resolved::Path(PathBuf::from(normalized))
    }

    fn is_file_forbidden(&self, file_path: &Path) -> bool {
        let path_str = file_path.to_string_lossy();
        for ext in &self.config.forbidden_extensions {
            if path_str.ends_with(ext.as_str()) {
                return true;
            }
        }

        let filename = file_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        for prefix in &self.config.hidden_prefixes {
            if filename.starts_with(prefix.as_str()) {
                return true;
            }
        }

        false
    }

    fn should_compress(&self, content_type: &str, file_size: u64) -> bool {
        if !self.config.enable_compression || file_size < self.config.compression_threshold {
            return false;
        }
        self.config
            .compression_types
            .iter()
            .any(|t| content_type.contains(t.as_str()))
    }

    /// Shared-read lookup. A stored mtime that no longer matches the file on
    /// disk demotes the hit to a miss and drops the stale entry.
    fn lookup(&self, file_path: &Path, current_mtime: SystemTime) -> Option<Arc<CacheEntry>> {
        {
            let idx = self.index.read().unwrap();
            match idx.map.get(file_path) {
                Some(entry) if entry.last_modified == current_mtime => {
                    return Some(entry.clone());
                }
                Some(_) => {}
                None => return None,
            }
        }

        let mut idx = self.index.write().unwrap();
        if let Some(entry) = idx.map.get(file_path) {
            if entry.last_modified != current_mtime {
                debug!(path = %file_path.display(), "dropping stale cache entry");
                let size = entry.file_size;
                idx.map.remove(file_path);
                idx.current_size -= size;
            }
        }
        None
    }

    /// Map the file and, when it fits, insert it under the size bound.
    /// Oversized files get a one-shot entry that never enters the index.
    fn load_entry(
        &self,
        file_path: &Path,
        etag: String,
        last_modified: SystemTime,
    ) -> crate::error::PySpeedResult<Arc<CacheEntry>> {
        let map = Mapping::open(file_path)?;
        let file_size = map.len() as u64;

        let entry = Arc::new(CacheEntry {
            file_path: file_path.to_path_buf(),
            content_type: mime::content_type_for(&file_path.to_string_lossy()),
            etag,
            last_modified,
            file_size,
            map,
            last_accessed: AtomicU64::new(self.epoch.elapsed().as_millis() as u64),
            access_count: AtomicU64::new(0),
            compressed: OnceLock::new(),
        });

        let max_cache = self.config.max_cache_bytes();
        if file_size <= self.config.max_file_bytes() && file_size <= max_cache {
            let mut idx = self.index.write().unwrap();
            if idx.current_size + file_size > max_cache {
                evict_lru(&mut idx, file_size, max_cache);
            }
            if let Some(old) = idx.map.insert(file_path.to_path_buf(), entry.clone()) {
                idx.current_size -= old.file_size;
            }
            idx.current_size += file_size;
        }

        Ok(entry)
    }
}

enum Resolved {
    Path(PathBuf),
    Traversal,
}

/// Evict in ascending last-accessed order until the incoming entry fits.
fn evict_lru(idx: &mut CacheIndex, incoming_size: u64, max_cache_bytes: u64) {
    let mut candidates: Vec<(u64, PathBuf)> = idx
        .map
        .values()
        .map(|e| (e.last_accessed.load(Ordering::Relaxed), e.file_path.clone()))
        .collect();
    candidates.sort();

    for (_, path) in candidates {
        if idx.current_size + incoming_size <= max_cache_bytes {
            break;
        }
        if let Some(entry) = idx.map.remove(&path) {
            idx.current_size -= entry.file_size;
        }
    }
}

fn generate_etag(file_path: &Path, last_modified: SystemTime) -> String {
    let mtime_secs = last_modified
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let mut hasher = DefaultHasher::new();
    file_path.to_string_lossy().hash(&mut hasher);
    format!("\"{:x}-{}\"", hasher.finish(), mtime_secs)
}

fn truncate_to_seconds(time: SystemTime) -> SystemTime {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    UNIX_EPOCH + std::time::Duration::from_secs(secs)
}

/// `bytes=<start>-<end>` | `bytes=<start>-` | `bytes=-<suffix>`, resolved to
/// absolute inclusive bounds within the file.
fn parse_range_header(header: &str, file_size: u64) -> Option<(u64, u64)> {
    if file_size == 0 {
        return None;
    }
    let spec = header.strip_prefix("bytes=")?;
    let dash = spec.find('-')?;
    let start_str = &spec[..dash];
    let end_str = &spec[dash + 1..];

    let (start, end) = if start_str.is_empty() && end_str.is_empty() {
        return None;
    } else if start_str.is_empty() {
        let suffix: u64 = end_str.trim().parse().ok()?;
        let start = file_size.saturating_sub(suffix);
        (start, file_size - 1)
    } else if end_str.is_empty() {
        let start: u64 = start_str.trim().parse().ok()?;
        (start, file_size - 1)
    } else {
        let start: u64 = start_str.trim().parse().ok()?;
        let end: u64 = end_str.trim().parse().ok()?;
        (start, end)
    };

    if start < file_size && end < file_size && start <= end {
        Some((start, end))
    } else {
        None
    }
}

fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get("accept-encoding")
        .map(|v| v.contains("gzip"))
        .unwrap_or(false)
}

fn gzip_compress(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    if encoder.write_all(data).is_err() {
        return Vec::new();
    }
    encoder.finish().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_forms() {
        assert_eq!(parse_range_header("bytes=10-19", 1000), Some((10, 19)));
        assert_eq!(parse_range_header("bytes=990-", 1000), Some((990, 999)));
        assert_eq!(parse_range_header("bytes=-100", 1000), Some((900, 999)));
        assert_eq!(parse_range_header("bytes=-5000", 1000), Some((0, 999)));
    }

    #[test]
    fn test_parse_range_rejects_invalid() {
        assert_eq!(parse_range_header("bytes=10-5", 1000), None);
        assert_eq!(parse_range_header("bytes=1000-1001", 1000), None);
        assert_eq!(parse_range_header("bytes=-", 1000), None);
        assert_eq!(parse_range_header("items=0-5", 1000), None);
        assert_eq!(parse_range_header("bytes=abc-def", 1000), None);
        assert_eq!(parse_range_header("bytes=0-0", 0), None);
    }

    #[test]
    fn test_etag_shape_and_stability() {
        let t = UNIX_EPOCH + std::time::Duration::from_secs(1_700_000_000);
        let a = generate_etag(Path::new("static/a.txt"), t);
        let b = generate_etag(Path::new("static/a.txt"), t);
        let c = generate_etag(Path::new("static/b.txt"), t);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with('"') && a.ends_with("-1700000000\""));
    }

    #[test]
    fn test_forbidden_rules() {
        let cache = StaticFileCache::new(StaticCacheConfig::default());
        assert!(cache.is_file_forbidden(Path::new("static/dump.log")));
        assert!(cache.is_file_forbidden(Path::new("static/old.bak")));
        assert!(cache.is_file_forbidden(Path::new("static/.htaccess")));
        assert!(cache.is_file_forbidden(Path::new("static/_private.html")));
        assert!(!cache.is_file_forbidden(Path::new("static/index.html")));
    }

    #[test]
    fn test_resolve_prefix_stripping() {
        let cache = StaticFileCache::new(StaticCacheConfig::default());
        cache.add_route("/assets", "public");
        match cache.resolve_file_path("/assets/css/site.css") {
            Resolved::Path(p) => assert_eq!(p, PathBuf::from("public/css/site.css")),
            Resolved::Traversal => panic!("unexpected traversal"),
        }
    }

    #[test]
    fn test_resolve_longest_prefix_wins() {
        let cache = StaticFileCache::new(StaticCacheConfig::default());
        cache.add_route("/a", "short");
        cache.add_route("/a/b", "long");
        match cache.resolve_file_path("/a/b/x.txt") {
            Resolved::Path(p) => assert_eq!(p, PathBuf::from("long/x.txt")),
            Resolved::Traversal => panic!("unexpected traversal"),
        }
    }

    #[test]
    fn test_resolve_defaults_to_index_html() {
        let cache = StaticFileCache::new(StaticCacheConfig::default());
        cache.add_route("/site", "www");
        match cache.resolve_file_path("/site") {
            Resolved::Path(p) => assert_eq!(p, PathBuf::from("www/index.html")),
            Resolved::Traversal => panic!("unexpected traversal"),
        }
        match cache.resolve_file_path("/site/") {
            Resolved::Path(p) => assert_eq!(p, PathBuf::from("www/index.html")),
            Resolved::Traversal => panic!("unexpected traversal"),
        }
    }

    #[test]
    fn test_resolve_rejects_traversal() {
        let cache = StaticFileCache::new(StaticCacheConfig::default());
        cache.add_route("/static", "./static");
        assert!(matches!(
            cache.resolve_file_path("/static/../../etc/passwd"),
            Resolved::Traversal
        ));
    }

    #[test]
    fn test_resolve_traversal_cannot_eat_absolute_root() {
        let cache = StaticFileCache::new(StaticCacheConfig::default());
        cache.add_route("/static", "/srv/www");
        // One `..` would land exactly on a root component after joining;
        // the relative part must be rejected before that can happen.
        assert!(matches!(
            cache.resolve_file_path("/static/../etc/passwd"),
            Resolved::Traversal
        ));
        // An in-tree `..` still collapses and resolves normally.
        match cache.resolve_file_path("/static/sub/../a.txt") {
            Resolved::Path(p) => assert_eq!(p, PathBuf::from("/srv/www/a.txt")),
            Resolved::Traversal => panic!("unexpected traversal"),
        }
    }

    #[test]
    fn test_should_compress_rules() {
        let cache = StaticFileCache::new(StaticCacheConfig::default());
        assert!(cache.should_compress("text/html", 4096));
        assert!(!cache.should_compress("text/html", 100));
        assert!(!cache.should_compress("image/png", 4096));
    }

    #[test]
    fn test_accepts_gzip() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_gzip(&headers));
        headers.insert("Accept-Encoding", "gzip, deflate, br".to_string());
        assert!(accepts_gzip(&headers));
    }

    #[test]
    fn test_gzip_round_trips() {
        let data = b"hello hello hello hello hello".repeat(50);
        let compressed = gzip_compress(&data);
        assert!(!compressed.is_empty());
        assert!(compressed.len() < data.len());

        use std::io::Read;
        let mut decoder = flate2::read::GzDecoder::new(compressed.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}
