// src/parser.rs
use crate::http::{HeaderMap, Method};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Not enough bytes yet; read more and retry.
    Incomplete,
    InvalidFormat,
    TooLarge,
}

/// Byte offset one past the header-terminating CRLFCRLF, if present.
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4)
}

/// Scan a complete header block for Content-Length without building the full
/// request, so the engine knows how much body to wait for.
pub fn content_length_of(head: &[u8]) -> Result<usize, ParseError> {
    for line in head.split(|&b| b == b'\n') {
        let line = trim_cr(line);
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        if line[..colon].eq_ignore_ascii_case(b"content-length") {
            let value = std::str::from_utf8(&line[colon + 1..])
                .map_err(|_| ParseError::InvalidFormat)?
                .trim();
            return value.parse().map_err(|_| ParseError::InvalidFormat);
        }
    }
    Ok(0)
}

fn trim_cr(line: &[u8]) -> &[u8] {
    match line.last() {
        Some(b'\r') => &line[..line.len() - 1],
        _ => line,
    }
}

/// Fully parsed request, owned for the lifetime of one dispatch.
#[derive(Debug, Clone)]
pub struct ParsedRequest {
    pub method: Method,
    /// URL-decoded path with the query stripped.
    pub path: String,
    /// Raw query string, exactly as received.
    pub query_string: String,
    pub protocol_version: String,
    pub headers: HeaderMap,
    /// Duplicate keys keep every value, in arrival order.
    pub query_params: HashMap<String, Vec<String>>,
    pub cookies: HashMap<String, String>,
    pub body: Vec<u8>,
    pub content_type: String,
    pub content_length: usize,
    /// Populated only for `application/x-www-form-urlencoded` bodies.
    pub form_data: HashMap<String, String>,
    /// Route parameters, filled by the engine after route matching.
    pub params: HashMap<String, String>,
    /// Matched route handler id, when a registered route matched.
    pub handler_id: Option<String>,
    /// Cheap structural check: body starts with `{`/`[` and ends with the
    /// matching closer. Full validation is the JSON parser's job.
    pub is_valid_json: bool,
    pub parse_duration: Duration,
}

#[derive(Debug, Default)]
pub struct RequestParserStats {
    pub requests_parsed: AtomicU64,
    pub total_parse_time_us: AtomicU64,
    pub json_requests: AtomicU64,
    pub form_requests: AtomicU64,
    pub multipart_requests: AtomicU64,
}

impl RequestParserStats {
    pub fn average_parse_time_us(&self) -> f64 {
        let parsed = self.requests_parsed.load(Ordering::Relaxed);
        if parsed == 0 {
            return 0.0;
        }
        self.total_parse_time_us.load(Ordering::Relaxed) as f64 / parsed as f64
    }

    pub fn requests_per_second(&self) -> f64 {
        let total_time_s = self.total_parse_time_us.load(Ordering::Relaxed) as f64 / 1e6;
        if total_time_s == 0.0 {
            return 0.0;
        }
        self.requests_parsed.load(Ordering::Relaxed) as f64 / total_time_s
    }
}

/// Raw HTTP message -> [`ParsedRequest`]. Shared by every worker; only the
/// counters are mutable, so `&self` is enough.
#[derive(Debug, Default)]
pub struct RequestParser {
    stats: RequestParserStats,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &RequestParserStats {
        &self.stats
    }

    /// `head` is the complete header block (request line through CRLFCRLF),
    /// `body` exactly Content-Length bytes. Structural problems in the
    /// request line or a header are fatal; cookie/query/form oddities are
    /// swallowed and leave that field partial.
    pub fn parse(&self, head: &[u8], body: &[u8]) -> Result<ParsedRequest, ParseError> {
        let start = Instant::now();

        let mut lines = head.split(|&b| b == b'\n');
        let request_line = trim_cr(lines.next().ok_or(ParseError::InvalidFormat)?);

        let mut parts = request_line
            .split(|&b| b == b' ')
            .filter(|p| !p.is_empty());
        let method_bytes = parts.next().ok_or(ParseError::InvalidFormat)?;
        let target_bytes = parts.next().ok_or(ParseError::InvalidFormat)?;
        let version_bytes = parts.next().ok_or(ParseError::InvalidFormat)?;
        if parts.next().is_some() {
            return Err(ParseError::InvalidFormat);
        }

        let method = Method::from_bytes(method_bytes);
        let target = std::str::from_utf8(target_bytes).map_err(|_| ParseError::InvalidFormat)?;
        let protocol_version = std::str::from_utf8(version_bytes)
            .map_err(|_| ParseError::InvalidFormat)?
            .to_string();

        let (raw_path, query_string) = match target.find('?') {
            Some(idx) => (&target[..idx], target[idx + 1..].to_string()),
            None => (target, String::new()),
        };
        let path = url_decode(raw_path);

        let mut headers = HeaderMap::new();
        for line in lines {
            let line = trim_cr(line);
            if line.is_empty() {
                break;
            }
            let colon = line
                .iter()
                .position(|&b| b == b':')
                .ok_or(ParseError::InvalidFormat)?;
            let name =
                std::str::from_utf8(&line[..colon]).map_err(|_| ParseError::InvalidFormat)?;
            let value = std::str::from_utf8(&line[colon + 1..])
                .map_err(|_| ParseError::InvalidFormat)?
                .trim();
            headers.insert(name, value.to_string());
        }

        let query_params = parse_query_string(&query_string);

        let cookies = match headers.get("cookie") {
            Some(header) => parse_cookies(header),
            None => HashMap::new(),
        };

        let content_type = headers.get("content-type").unwrap_or("").to_string();

        let mut form_data = HashMap::new();
        if content_type.starts_with("application/x-www-form-urlencoded") {
            if let Ok(text) = std::str::from_utf8(body) {
                form_data = parse_form_data(text);
            }
            self.stats.form_requests.fetch_add(1, Ordering::Relaxed);
        } else if content_type.starts_with("multipart/form-data") {
            // Detected and counted; parsing the parts is out of scope.
            self.stats.multipart_requests.fetch_add(1, Ordering::Relaxed);
        }

        let is_valid_json = looks_like_json(body);
        if is_valid_json {
            self.stats.json_requests.fetch_add(1, Ordering::Relaxed);
        }

        let parse_duration = start.elapsed();
        self.stats.requests_parsed.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_parse_time_us
            .fetch_add(parse_duration.as_micros() as u64, Ordering::Relaxed);

        Ok(ParsedRequest {
            method,
            path,
            query_string,
            protocol_version,
            headers,
            query_params,
            cookies,
            body: body.to_vec(),
            content_type,
            content_length: body.len(),
            form_data,
            params: HashMap::new(),
            handler_id: None,
            is_valid_json,
            parse_duration,
        })
    }
}

/// `a=1&a=2` keeps both values, in order. A piece without `=` is skipped.
pub fn parse_query_string(query: &str) -> HashMap<String, Vec<String>> {
    let mut result: HashMap<String, Vec<String>> = HashMap::new();
    if query.is_empty() {
        return result;
    }

    for piece in query.split('&') {
        let Some(eq) = piece.find('=') else {
            continue;
        };
        let key = url_decode(&piece[..eq]);
        let value = url_decode(&piece[eq + 1..]);
        result.entry(key).or_default().push(value);
    }

    result
}

pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    let mut cookies = HashMap::new();

    for pair in header.split(';') {
        let pair = pair.trim();
        let Some(eq) = pair.find('=') else {
            continue;
        };
        let name = pair[..eq].to_string();
        let value = url_decode(&pair[eq + 1..]);
        cookies.insert(name, value);
    }

    cookies
}

/// Same scheme as the query string, but duplicates collapse (last wins).
pub fn parse_form_data(body: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();

    for piece in body.split('&') {
        let Some(eq) = piece.find('=') else {
            continue;
        };
        let key = url_decode(&piece[..eq]);
        let value = url_decode(&piece[eq + 1..]);
        result.insert(key, value);
    }

    result
}

fn looks_like_json(body: &[u8]) -> bool {
    let trimmed: &[u8] = {
        let mut s = body;
        while let Some((first, rest)) = s.split_first() {
            if matches!(first, b' ' | b'\t' | b'\n' | b'\r') {
                s = rest;
            } else {
                break;
            }
        }
        while let Some((last, rest)) = s.split_last() {
            if matches!(last, b' ' | b'\t' | b'\n' | b'\r') {
                s = rest;
            } else {
                break;
            }
        }
        s
    };

    match (trimmed.first(), trimmed.last()) {
        (Some(b'{'), Some(b'}')) => true,
        (Some(b'['), Some(b']')) => true,
        _ => false,
    }
}

/// Percent-decode raw bytes; `+` becomes space. A malformed `%` sequence is
/// copied through untouched.
pub fn url_decode_bytes(encoded: &[u8]) -> Vec<u8> {
    let mut decoded = Vec::with_capacity(encoded.len());
    let mut i = 0;

    while i < encoded.len() {
        match encoded[i] {
            b'%' if i + 2 < encoded.len() => {
                let hi = hex_val(encoded[i + 1]);
                let lo = hex_val(encoded[i + 2]);
                match (hi, lo) {
                    (Some(h), Some(l)) => {
                        decoded.push((h << 4) | l);
                        i += 3;
                        continue;
                    }
                    _ => decoded.push(b'%'),
                }
            }
            b'+' => decoded.push(b' '),
            other => decoded.push(other),
        }
        i += 1;
    }

    decoded
}

pub fn url_decode(encoded: &str) -> String {
    String::from_utf8_lossy(&url_decode_bytes(encoded.as_bytes())).into_owned()
}

/// Inverse of [`url_decode_bytes`]: unreserved characters pass through,
/// space becomes `+`, everything else percent-encodes.
pub fn url_encode_bytes(raw: &[u8]) -> String {
    let mut encoded = String::with_capacity(raw.len());

    for &b in raw {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(b as char)
            }
            b' ' => encoded.push('+'),
            other => encoded.push_str(&format!("%{:02X}", other)),
        }
    }

    encoded
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_full(raw: &[u8]) -> ParsedRequest {
        let header_end = find_header_end(raw).unwrap();
        let parser = RequestParser::new();
        parser
            .parse(&raw[..header_end], &raw[header_end..])
            .unwrap()
    }

    #[test]
    fn test_parse_basic_request() {
        let req = parse_full(
            b"GET /some/path?foo=bar HTTP/1.1\r\nHost: localhost\r\nAccept: */*\r\n\r\n",
        );
        assert_eq!(req.method, Method::Get);
        assert_eq!(req.path, "/some/path");
        assert_eq!(req.query_string, "foo=bar");
        assert_eq!(req.protocol_version, "HTTP/1.1");
        assert_eq!(req.headers.get("host"), Some("localhost"));
        assert_eq!(req.query_params["foo"], vec!["bar"]);
        assert!(req.body.is_empty());
        assert_eq!(req.content_length, 0);
    }

    #[test]
    fn test_header_names_lowercased_last_wins() {
        let req = parse_full(b"GET / HTTP/1.1\r\nX-Tag: one\r\nx-tag: two\r\n\r\n");
        assert_eq!(req.headers.get("X-TAG"), Some("two"));
    }

    #[test]
    fn test_query_repetition_order() {
        let req = parse_full(b"GET /?a=1&a=2&a=3&b=x HTTP/1.1\r\n\r\n");
        assert_eq!(req.query_params["a"], vec!["1", "2", "3"]);
        assert_eq!(req.query_params["b"], vec!["x"]);
    }

    #[test]
    fn test_query_piece_without_equals_skipped() {
        let req = parse_full(b"GET /?a=1&junk&b=2 HTTP/1.1\r\n\r\n");
        assert_eq!(req.query_params.len(), 2);
        assert!(!req.query_params.contains_key("junk"));
    }

    #[test]
    fn test_path_is_url_decoded() {
        let req = parse_full(b"GET /files/hello%20world.txt HTTP/1.1\r\n\r\n");
        assert_eq!(req.path, "/files/hello world.txt");
    }

    #[test]
    fn test_cookie_parsing() {
        let req = parse_full(
            b"GET / HTTP/1.1\r\nCookie: session=abc123; theme=dark%20mode ; broken\r\n\r\n",
        );
        assert_eq!(req.cookies["session"], "abc123");
        assert_eq!(req.cookies["theme"], "dark mode");
        assert_eq!(req.cookies.len(), 2);
    }

    #[test]
    fn test_form_body_last_wins() {
        let raw = b"POST /submit HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\nContent-Length: 17\r\n\r\na=1&b=two+words&a=3";
        let header_end = find_header_end(raw).unwrap();
        let parser = RequestParser::new();
        let req = parser.parse(&raw[..header_end], b"a=1&b=two+words&a=3").unwrap();
        assert_eq!(req.form_data["a"], "3");
        assert_eq!(req.form_data["b"], "two words");
        assert_eq!(
            parser.stats().form_requests.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_multipart_counted_not_parsed() {
        let parser = RequestParser::new();
        let head = b"POST /u HTTP/1.1\r\nContent-Type: multipart/form-data; boundary=x\r\n\r\n";
        let req = parser.parse(head, b"--x--").unwrap();
        assert!(req.form_data.is_empty());
        assert_eq!(
            parser.stats().multipart_requests.load(Ordering::Relaxed),
            1
        );
    }

    #[test]
    fn test_json_heuristic() {
        let parser = RequestParser::new();
        let head = b"POST /api HTTP/1.1\r\nContent-Type: application/json\r\n\r\n";
        assert!(parser.parse(head, b"  {\"a\": 1} \n").unwrap().is_valid_json);
        assert!(parser.parse(head, b"[1, 2]").unwrap().is_valid_json);
        assert!(!parser.parse(head, b"{\"a\": 1]").unwrap().is_valid_json);
        assert!(!parser.parse(head, b"plain text").unwrap().is_valid_json);
        assert!(!parser.parse(head, b"").unwrap().is_valid_json);
    }

    #[test]
    fn test_malformed_request_line() {
        let parser = RequestParser::new();
        assert!(parser.parse(b"GET\r\n\r\n", b"").is_err());
        assert!(parser.parse(b"GET / HTTP/1.1 extra\r\n\r\n", b"").is_err());
    }

    #[test]
    fn test_content_length_scan() {
        let head = b"POST / HTTP/1.1\r\nHost: x\r\nContent-Length: 42\r\n\r\n";
        assert_eq!(content_length_of(head), Ok(42));
        let no_len = b"GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_eq!(content_length_of(no_len), Ok(0));
        let bad = b"POST / HTTP/1.1\r\nContent-Length: nope\r\n\r\n";
        assert!(content_length_of(bad).is_err());
    }

    #[test]
    fn test_url_decode_round_trip() {
        let cases: Vec<&[u8]> = vec![
            b"plain",
            b"with space & symbols!",
            b"\x00\x01\xff\xfe binary",
            b"a+b=c%20d",
            b"",
        ];
        for case in cases {
            let encoded = url_encode_bytes(case);
            assert_eq!(url_decode_bytes(encoded.as_bytes()), case.to_vec());
        }
    }

    #[test]
    fn test_url_decode_malformed_sequences() {
        assert_eq!(url_decode("100%"), "100%");
        assert_eq!(url_decode("%zz"), "%zz");
        assert_eq!(url_decode("a%2"), "a%2");
    }
}
