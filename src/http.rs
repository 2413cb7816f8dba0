// src/http.rs
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Head,
    Options,
    Trace,
    Connect,
    Unknown,
}

impl Method {
    pub fn from_bytes(b: &[u8]) -> Self {
        match b {
            b"GET" => Method::Get,
            b"POST" => Method::Post,
            b"PUT" => Method::Put,
            b"DELETE" => Method::Delete,
            b"PATCH" => Method::Patch,
            b"HEAD" => Method::Head,
            b"OPTIONS" => Method::Options,
            b"TRACE" => Method::Trace,
            b"CONNECT" => Method::Connect,
            _ => Method::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Patch => "PATCH",
            Method::Head => "HEAD",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
            Method::Connect => "CONNECT",
            Method::Unknown => "UNKNOWN",
        }
    }

    /// The engine only dispatches these; everything else is a 400 before routing.
    pub fn is_dispatchable(&self) -> bool {
        matches!(
            self,
            Method::Get
                | Method::Head
                | Method::Post
                | Method::Put
                | Method::Delete
                | Method::Options
        )
    }
}

pub fn status_message(code: u16) -> &'static str {
    match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Header container that lowercases names on insert so lookups are
/// case-insensitive without sprinkling `to_lowercase` at call sites.
/// Last write wins on duplicate names.
#[derive(Debug, Clone, Default)]
pub struct HeaderMap {
    inner: HashMap<String, String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: &str, value: String) {
        self.inner.insert(name.to_ascii_lowercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        if name.bytes().any(|b| b.is_ascii_uppercase()) {
            self.inner.get(&name.to_ascii_lowercase()).map(String::as_str)
        } else {
            self.inner.get(name).map(String::as_str)
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Cookie attributes for [`ResponseData::add_cookie`].
#[derive(Debug, Clone)]
pub struct CookieOptions {
    pub path: String,
    pub domain: String,
    /// Negative means no Max-Age attribute.
    pub max_age: i64,
    pub secure: bool,
    pub http_only: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            domain: String::new(),
            max_age: -1,
            secure: false,
            http_only: true,
        }
    }
}

/// Structured response as produced by the application handler or the static
/// path, before wire serialization.
#[derive(Debug, Clone)]
pub struct ResponseData {
    pub status_code: u16,
    /// Overrides the built-in phrase table when non-empty.
    pub status_message: String,
    /// Emitted verbatim, case preserved, in insertion order.
    pub headers: Vec<(String, String)>,
    /// Each element is a complete `Set-Cookie` value, emitted in order.
    pub cookies: Vec<String>,
    pub body: Vec<u8>,
    pub enable_compression: bool,
    pub enable_cache: bool,
    pub cache_max_age: Duration,
}

impl ResponseData {
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code,
            status_message: String::new(),
            headers: Vec::new(),
            cookies: Vec::new(),
            body: Vec::new(),
            enable_compression: false,
            enable_cache: false,
            cache_max_age: Duration::from_secs(0),
        }
    }

    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        let mut resp = Self::new(200);
        resp.body = body.into();
        resp
    }

    pub fn json(body: impl Into<Vec<u8>>) -> Self {
        let mut resp = Self::new(200);
        resp.headers
            .push(("Content-Type".to_string(), "application/json".to_string()));
        resp.body = body.into();
        resp
    }

    pub fn html(body: impl Into<Vec<u8>>) -> Self {
        let mut resp = Self::new(200);
        resp.headers.push((
            "Content-Type".to_string(),
            "text/html; charset=utf-8".to_string(),
        ));
        resp.body = body.into();
        resp
    }

    pub fn error(status_code: u16, message: &str) -> Self {
        let body = format!(
            "<!DOCTYPE html>\n\
             <html><head><title>Error {code}</title></head>\n\
             <body><h1>Error {code}</h1>\n\
             <p>{msg}</p>\n\
             <hr><p>PySpeed Web Container</p></body></html>",
            code = status_code,
            msg = message
        );
        let mut resp = Self::html(body.into_bytes());
        resp.status_code = status_code;
        resp
    }

    pub fn redirect(location: &str, status_code: u16) -> Self {
        let body = format!(
            "<!DOCTYPE html><html><head><title>Redirect</title></head>\
             <body><p>Redirecting to <a href=\"{loc}\">{loc}</a></p></body></html>",
            loc = location
        );
        let mut resp = Self::new(status_code);
        resp.headers
            .push(("Location".to_string(), location.to_string()));
        resp.headers
            .push(("Content-Type".to_string(), "text/html".to_string()));
        resp.body = body.into_bytes();
        resp
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn add_cookie(&mut self, name: &str, value: &str, opts: &CookieOptions) {
        let mut cookie = format!("{}={}", name, value);
        if !opts.path.is_empty() {
            cookie.push_str("; Path=");
            cookie.push_str(&opts.path);
        }
        if !opts.domain.is_empty() {
            cookie.push_str("; Domain=");
            cookie.push_str(&opts.domain);
        }
        if opts.max_age >= 0 {
            cookie.push_str("; Max-Age=");
            cookie.push_str(&opts.max_age.to_string());
        }
        if opts.secure {
            cookie.push_str("; Secure");
        }
        if opts.http_only {
            cookie.push_str("; HttpOnly");
        }
        self.cookies.push(cookie);
    }

    /// True when a caller-provided header asks the engine to drop keep-alive.
    pub fn forces_close(&self) -> bool {
        self.headers.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case("connection") && value.eq_ignore_ascii_case("close")
        })
    }

    /// Serialize the status line and headers. `body_len` is passed separately
    /// because the static path sends mapped or pre-compressed bytes that never
    /// move through `self.body`; the caller-provided Content-Length is always
    /// overridden.
    pub fn serialize_head(&self, body_len: usize, keep_alive: bool) -> Vec<u8> {
        let phrase: &str = if self.status_message.is_empty() {
            status_message(self.status_code)
        } else {
            &self.status_message
        };

        let mut head = Vec::with_capacity(256 + self.headers.len() * 48);
        head.extend_from_slice(b"HTTP/1.1 ");
        head.extend_from_slice(self.status_code.to_string().as_bytes());
        head.push(b' ');
        head.extend_from_slice(phrase.as_bytes());
        head.extend_from_slice(b"\r\n");

        head.extend_from_slice(b"Server: PySpeed/1.0\r\n");
        head.extend_from_slice(b"Content-Length: ");
        head.extend_from_slice(body_len.to_string().as_bytes());
        head.extend_from_slice(b"\r\n");

        if keep_alive {
            head.extend_from_slice(b"Connection: keep-alive\r\n");
        } else {
            head.extend_from_slice(b"Connection: close\r\n");
        }

        for (name, value) in &self.headers {
            if name.eq_ignore_ascii_case("content-length")
                || name.eq_ignore_ascii_case("connection")
            {
                continue;
            }
            head.extend_from_slice(name.as_bytes());
            head.extend_from_slice(b": ");
            head.extend_from_slice(value.as_bytes());
            head.extend_from_slice(b"\r\n");
        }

        for cookie in &self.cookies {
            head.extend_from_slice(b"Set-Cookie: ");
            head.extend_from_slice(cookie.as_bytes());
            head.extend_from_slice(b"\r\n");
        }

        head.extend_from_slice(b"\r\n");
        head
    }

    /// Full wire form, body included.
    pub fn to_bytes(&self, keep_alive: bool) -> Vec<u8> {
        let mut out = self.serialize_head(self.body.len(), keep_alive);
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_map_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("Content-Type", "text/html".to_string());
        assert_eq!(headers.get("content-type"), Some("text/html"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("text/html"));
        assert_eq!(headers.get("CoNtEnT-tYpE"), Some("text/html"));
        assert_eq!(headers.get("accept"), None);
    }

    #[test]
    fn test_header_map_last_write_wins() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Test", "one".to_string());
        headers.insert("x-test", "two".to_string());
        assert_eq!(headers.get("X-Test"), Some("two"));
        assert_eq!(headers.len(), 1);
    }

    #[test]
    fn test_serialize_overrides_content_length() {
        let resp = ResponseData::ok("hello").header("Content-Length", "9999");
        let bytes = resp.to_bytes(true);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Server: PySpeed/1.0\r\n"));
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(!text.contains("9999"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn test_cookies_emitted_in_order() {
        let mut resp = ResponseData::ok("");
        resp.add_cookie("session", "abc", &CookieOptions::default());
        resp.add_cookie(
            "theme",
            "dark",
            &CookieOptions {
                max_age: 3600,
                secure: true,
                ..CookieOptions::default()
            },
        );
        let text = String::from_utf8(resp.to_bytes(false)).unwrap();
        let first = text.find("Set-Cookie: session=abc; Path=/; HttpOnly").unwrap();
        let second = text
            .find("Set-Cookie: theme=dark; Path=/; Max-Age=3600; Secure; HttpOnly")
            .unwrap();
        assert!(first < second);
    }

    #[test]
    fn test_unknown_status_phrase() {
        let resp = ResponseData::new(799);
        let text = String::from_utf8(resp.to_bytes(false)).unwrap();
        assert!(text.starts_with("HTTP/1.1 799 Unknown\r\n"));
    }

    #[test]
    fn test_error_body_shape() {
        let resp = ResponseData::error(404, "missing");
        let text = String::from_utf8(resp.body.clone()).unwrap();
        assert!(text.contains("<h1>Error 404</h1>"));
        assert!(text.contains("missing"));
        assert_eq!(resp.status_code, 404);
    }
}
