// src/json/parser.rs
use crate::config::JsonParserConfig;
use crate::json::value::{JsonObject, JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Parse failure with the byte offset it occurred at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JsonError {
    pub message: String,
    pub offset: usize,
}

impl JsonError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset,
        }
    }
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} at offset {}", self.message, self.offset)
    }
}

impl std::error::Error for JsonError {}

#[derive(Debug, Default)]
pub struct JsonParserStats {
    pub documents_parsed: AtomicU64,
    pub total_parse_time_ns: AtomicU64,
    pub bytes_parsed: AtomicU64,
    pub parse_errors: AtomicU64,
}

impl JsonParserStats {
    pub fn average_parse_time_ms(&self) -> f64 {
        let parsed = self.documents_parsed.load(Ordering::Relaxed);
        if parsed == 0 {
            return 0.0;
        }
        self.total_parse_time_ns.load(Ordering::Relaxed) as f64 / (parsed as f64 * 1e6)
    }

    pub fn parse_speed_mb_per_sec(&self) -> f64 {
        let total_time_s = self.total_parse_time_ns.load(Ordering::Relaxed) as f64 / 1e9;
        if total_time_s == 0.0 {
            return 0.0;
        }
        let total_mb = self.bytes_parsed.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0);
        total_mb / total_time_s
    }
}

/// Recursive-descent JSON parser over raw bytes with an explicit cursor.
pub struct JsonParser {
    config: JsonParserConfig,
    stats: JsonParserStats,
}

impl Default for JsonParser {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonParser {
    pub fn new() -> Self {
        Self::with_config(JsonParserConfig::default())
    }

    pub fn with_config(config: JsonParserConfig) -> Self {
        Self {
            config,
            stats: JsonParserStats::default(),
        }
    }

    pub fn config(&self) -> &JsonParserConfig {
        &self.config
    }

    pub fn stats(&self) -> &JsonParserStats {
        &self.stats
    }

    pub fn parse(&self, input: &str) -> Result<JsonValue, JsonError> {
        self.parse_bytes(input.as_bytes())
    }

    pub fn parse_bytes(&self, data: &[u8]) -> Result<JsonValue, JsonError> {
        let start = Instant::now();
        let result = self.parse_inner(data);

        match &result {
            Ok(_) => {
                self.stats.documents_parsed.fetch_add(1, Ordering::Relaxed);
                self.stats
                    .total_parse_time_ns
                    .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
                self.stats
                    .bytes_parsed
                    .fetch_add(data.len() as u64, Ordering::Relaxed);
            }
            Err(_) => {
                self.stats.parse_errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        result
    }

    fn parse_inner(&self, data: &[u8]) -> Result<JsonValue, JsonError> {
        let mut cursor = Cursor {
            data,
            pos: 0,
            config: &self.config,
        };

        cursor.skip_whitespace();
        if cursor.at_end() {
            return Err(JsonError::new("Empty JSON document", 0));
        }

        let value = cursor.parse_value(0)?;

        cursor.skip_whitespace();
        if !cursor.at_end() && self.config.strict_mode {
            return Err(JsonError::new(
                "Unexpected content after JSON document",
                cursor.pos,
            ));
        }

        Ok(value)
    }

    /// Push-parser over the same grammar: buffer chunks, parse on `finish`.
    pub fn stream_parser(&self) -> StreamParser<'_> {
        StreamParser {
            parser: self,
            buffer: Vec::new(),
        }
    }
}

pub struct StreamParser<'a> {
    parser: &'a JsonParser,
    buffer: Vec<u8>,
}

impl StreamParser<'_> {
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn finish(&mut self) -> Result<JsonValue, JsonError> {
        let result = self.parser.parse_bytes(&self.buffer);
        self.buffer.clear();
        result
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
    config: &'a JsonParserConfig,
}

impl Cursor<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        loop {
            while let Some(b) = self.peek() {
                if b == b' ' || b == b'\t' || b == b'\n' || b == b'\r' {
                    self.pos += 1;
                } else {
                    break;
                }
            }
            if self.config.allow_comments && self.peek() == Some(b'/') {
                if !self.skip_comment() {
                    return;
                }
            } else {
                return;
            }
        }
    }

    /// Returns false when the `/` did not start a comment.
    fn skip_comment(&mut self) -> bool {
        match self.data.get(self.pos + 1) {
            Some(b'/') => {
                self.pos += 2;
                while let Some(b) = self.peek() {
                    self.pos += 1;
                    if b == b'\n' {
                        break;
                    }
                }
                true
            }
            Some(b'*') => {
                self.pos += 2;
                while self.pos + 1 < self.data.len() {
                    if self.data[self.pos] == b'*' && self.data[self.pos + 1] == b'/' {
                        self.pos += 2;
                        return true;
                    }
                    self.pos += 1;
                }
                // Unterminated block comment: consume to the end; the caller
                // will report the missing value or closer.
                self.pos = self.data.len();
                true
            }
            _ => false,
        }
    }

    fn parse_value(&mut self, depth: usize) -> Result<JsonValue, JsonError> {
        if depth > self.config.max_depth {
            return Err(JsonError::new("Maximum nesting depth exceeded", self.pos));
        }

        self.skip_whitespace();
        let b = self
            .peek()
            .ok_or_else(|| JsonError::new("Unexpected end of input", self.pos))?;

        match b {
            b'{' => self.parse_object(depth),
            b'[' => self.parse_array(depth),
            b'"' => self.parse_string().map(JsonValue::String),
            b't' | b'f' | b'n' => self.parse_literal(),
            b'-' | b'0'..=b'9' => self.parse_number(),
            other => Err(JsonError::new(
                format!("Unexpected character '{}'", other as char),
                self.pos,
            )),
        }
    }

    fn parse_object(&mut self, depth: usize) -> Result<JsonValue, JsonError> {
        self.pos += 1; // '{'
        self.skip_whitespace();

        let mut obj = JsonObject::new();

        if self.peek() == Some(b'}') {
            self.pos += 1;
            return Ok(JsonValue::Object(obj));
        }

        loop {
            self.skip_whitespace();
            if self.peek() != Some(b'"') {
                return Err(JsonError::new("Expected string key", self.pos));
            }
            let key = self.parse_string()?;

            self.skip_whitespace();
            if self.peek() != Some(b':') {
                return Err(JsonError::new("Expected ':'", self.pos));
            }
            self.pos += 1;

            let value = self.parse_value(depth + 1)?;
            obj.insert(key, value);

            self.skip_whitespace();
            match self.peek() {
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(JsonValue::Object(obj));
                }
                Some(b',') => {
                    self.pos += 1;
                    if self.config.allow_trailing_commas {
                        self.skip_whitespace();
                        if self.peek() == Some(b'}') {
                            self.pos += 1;
                            return Ok(JsonValue::Object(obj));
                        }
                    }
                }
                _ => return Err(JsonError::new("Expected ',' or '}'", self.pos)),
            }
        }
    }

    fn parse_array(&mut self, depth: usize) -> Result<JsonValue, JsonError> {
        self.pos += 1; // '['
        self.skip_whitespace();

        let mut arr = Vec::new();

        if self.peek() == Some(b']') {
            self.pos += 1;
            return Ok(JsonValue::Array(arr));
        }

        loop {
            let value = self.parse_value(depth + 1)?;
            arr.push(value);

            self.skip_whitespace();
            match self.peek() {
                Some(b']') => {
                    self.pos += 1;
                    return Ok(JsonValue::Array(arr));
                }
                Some(b',') => {
                    self.pos += 1;
                    if self.config.allow_trailing_commas {
                        self.skip_whitespace();
                        if self.peek() == Some(b']') {
                            self.pos += 1;
                            return Ok(JsonValue::Array(arr));
                        }
                    }
                }
                _ => return Err(JsonError::new("Expected ',' or ']'", self.pos)),
            }
        }
    }

    fn parse_string(&mut self) -> Result<String, JsonError> {
        let start_offset = self.pos;
        self.pos += 1; // opening quote
        let content_start = self.pos;

        // Locate the closing quote first so the raw span length can be
        // checked before any decoding work.
        let mut scan = self.pos;
        while scan < self.data.len() && self.data[scan] != b'"' {
            if self.data[scan] == b'\\' {
                scan += 1;
                if scan >= self.data.len() {
                    return Err(JsonError::new("Unterminated string escape", scan));
                }
            }
            scan += 1;
        }
        if scan >= self.data.len() {
            return Err(JsonError::new("Unterminated string", start_offset));
        }

        let raw = &self.data[content_start..scan];
        if raw.len() > self.config.max_string_length {
            return Err(JsonError::new("String exceeds maximum length", start_offset));
        }

        let decoded = decode_string(raw, content_start)?;
        self.pos = scan + 1; // past closing quote
        Ok(decoded)
    }

    fn parse_number(&mut self) -> Result<JsonValue, JsonError> {
        let start = self.pos;

        if self.peek() == Some(b'-') {
            self.pos += 1;
        }

        match self.peek() {
            Some(b'0') => self.pos += 1,
            Some(b'1'..=b'9') => {
                while matches!(self.peek(), Some(b'0'..=b'9')) {
                    self.pos += 1;
                }
            }
            _ => return Err(JsonError::new("Invalid number", start)),
        }

        if self.peek() == Some(b'.') {
            self.pos += 1;
            if !matches!(self.peek(), Some(b'0'..=b'9')) {
                return Err(JsonError::new("Invalid decimal number", self.pos));
            }
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }

        if matches!(self.peek(), Some(b'e') | Some(b'E')) {
            self.pos += 1;
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.pos += 1;
            }
            if !matches!(self.peek(), Some(b'0'..=b'9')) {
                return Err(JsonError::new("Invalid number exponent", self.pos));
            }
            while matches!(self.peek(), Some(b'0'..=b'9')) {
                self.pos += 1;
            }
        }

        // The span is validated ASCII digits/signs, safe to parse as str.
        let span = std::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| JsonError::new("Invalid number", start))?;
        let value: f64 = span
            .parse()
            .map_err(|_| JsonError::new("Invalid number", start))?;

        Ok(JsonValue::Number(value))
    }

    fn parse_literal(&mut self) -> Result<JsonValue, JsonError> {
        let rest = &self.data[self.pos..];
        if rest.starts_with(b"true") {
            self.pos += 4;
            Ok(JsonValue::Bool(true))
        } else if rest.starts_with(b"false") {
            self.pos += 5;
            Ok(JsonValue::Bool(false))
        } else if rest.starts_with(b"null") {
            self.pos += 4;
            Ok(JsonValue::Null)
        } else {
            Err(JsonError::new("Invalid literal", self.pos))
        }
    }
}

/// Decode the raw content of a string token (between the quotes), resolving
/// the escape set and `\uXXXX`, assembling UTF-16 surrogate pairs into UTF-8.
fn decode_string(raw: &[u8], base_offset: usize) -> Result<String, JsonError> {
    let mut out = String::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        let b = raw[i];
        if b != b'\\' {
            // Copy the longest run of plain bytes in one go, validating UTF-8.
            let run_start = i;
            while i < raw.len() && raw[i] != b'\\' {
                i += 1;
            }
            let run = std::str::from_utf8(&raw[run_start..i])
                .map_err(|_| JsonError::new("Invalid UTF-8 in string", base_offset + run_start))?;
            out.push_str(run);
            continue;
        }

        i += 1;
        let esc = raw
            .get(i)
            .copied()
            .ok_or_else(|| JsonError::new("Unterminated escape sequence", base_offset + i))?;
        i += 1;

        match esc {
            b'"' => out.push('"'),
            b'\\' => out.push('\\'),
            b'/' => out.push('/'),
            b'b' => out.push('\u{0008}'),
            b'f' => out.push('\u{000C}'),
            b'n' => out.push('\n'),
            b'r' => out.push('\r'),
            b't' => out.push('\t'),
            b'u' => {
                let unit = read_hex4(raw, i, base_offset)?;
                i += 4;

                if (0xD800..0xDC00).contains(&unit) {
                    // High surrogate: a \uXXXX low surrogate must follow.
                    if raw.get(i) != Some(&b'\\') || raw.get(i + 1) != Some(&b'u') {
                        return Err(JsonError::new(
                            "Unpaired UTF-16 high surrogate",
                            base_offset + i,
                        ));
                    }
                    let low = read_hex4(raw, i + 2, base_offset)?;
                    if !(0xDC00..0xE000).contains(&low) {
                        return Err(JsonError::new(
                            "Invalid UTF-16 low surrogate",
                            base_offset + i + 2,
                        ));
                    }
                    i += 6;
                    let code = 0x10000 + ((unit - 0xD800) << 10) + (low - 0xDC00);
                    let ch = char::from_u32(code).ok_or_else(|| {
                        JsonError::new("Invalid unicode escape", base_offset + i)
                    })?;
                    out.push(ch);
                } else if (0xDC00..0xE000).contains(&unit) {
                    return Err(JsonError::new(
                        "Unpaired UTF-16 low surrogate",
                        base_offset + i,
                    ));
                } else {
                    let ch = char::from_u32(unit).ok_or_else(|| {
                        JsonError::new("Invalid unicode escape", base_offset + i)
                    })?;
                    out.push(ch);
                }
            }
            _ => {
                return Err(JsonError::new(
                    "Invalid escape character",
                    base_offset + i - 1,
                ))
            }
        }
    }

    Ok(out)
}

fn read_hex4(raw: &[u8], at: usize, base_offset: usize) -> Result<u32, JsonError> {
    if at + 4 > raw.len() {
        return Err(JsonError::new("Invalid unicode escape", base_offset + at));
    }
    let mut value = 0u32;
    for &b in &raw[at..at + 4] {
        let digit = match b {
            b'0'..=b'9' => (b - b'0') as u32,
            b'a'..=b'f' => (b - b'a' + 10) as u32,
            b'A'..=b'F' => (b - b'A' + 10) as u32,
            _ => return Err(JsonError::new("Invalid unicode escape", base_offset + at)),
        };
        value = value * 16 + digit;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json::value::JsonValue;

    #[test]
    fn test_parse_scalars() {
        let p = JsonParser::new();
        assert_eq!(p.parse("null").unwrap(), JsonValue::Null);
        assert_eq!(p.parse("true").unwrap(), JsonValue::Bool(true));
        assert_eq!(p.parse("false").unwrap(), JsonValue::Bool(false));
        assert_eq!(p.parse("42").unwrap(), JsonValue::Number(42.0));
        assert_eq!(p.parse("-2.5e2").unwrap(), JsonValue::Number(-250.0));
        assert_eq!(
            p.parse("\"hi\"").unwrap(),
            JsonValue::String("hi".to_string())
        );
    }

    #[test]
    fn test_parse_nested_document() {
        let p = JsonParser::new();
        let v = p.parse(r#"{"a": 1, "b": [true, null, "x"]}"#).unwrap();
        assert_eq!(v.key("a"), Some(&JsonValue::Number(1.0)));
        let b = v.key("b").unwrap();
        assert_eq!(b.index(0), Some(&JsonValue::Bool(true)));
        assert_eq!(b.index(1), Some(&JsonValue::Null));
        assert_eq!(b.index(2), Some(&JsonValue::String("x".to_string())));
    }

    #[test]
    fn test_object_key_order_preserved() {
        let p = JsonParser::new();
        let v = p.parse(r#"{"z": 1, "a": 2, "m": 3}"#).unwrap();
        let keys: Vec<&str> = v.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_escape_decoding() {
        let p = JsonParser::new();
        let v = p.parse(r#""a\"b\\c\/d\n\tA""#).unwrap();
        assert_eq!(v.as_str(), Some("a\"b\\c/d\n\tA"));
    }

    #[test]
    fn test_surrogate_pair_assembly() {
        let p = JsonParser::new();
        let v = p.parse(r#""😀""#).unwrap();
        assert_eq!(v.as_str(), Some("\u{1F600}"));
    }

    #[test]
    fn test_lone_surrogate_rejected() {
        let p = JsonParser::new();
        assert!(p.parse(r#""\ud83d""#).is_err());
        assert!(p.parse(r#""\udc00""#).is_err());
    }

    #[test]
    fn test_strict_mode_trailing_content() {
        let strict = JsonParser::new();
        assert!(strict.parse("{} garbage").is_err());

        let lax = JsonParser::with_config(JsonParserConfig {
            strict_mode: false,
            ..JsonParserConfig::default()
        });
        assert!(lax.parse("{} garbage").is_ok());
    }

    #[test]
    fn test_comments_knob() {
        let off = JsonParser::new();
        assert!(off.parse("// c\n1").is_err());

        let on = JsonParser::with_config(JsonParserConfig {
            allow_comments: true,
            ..JsonParserConfig::default()
        });
        assert_eq!(on.parse("// c\n1").unwrap(), JsonValue::Number(1.0));
        assert_eq!(
            on.parse("[1, /* mid */ 2]").unwrap().len(),
            2
        );
    }

    #[test]
    fn test_trailing_comma_knob() {
        let off = JsonParser::new();
        assert!(off.parse("[1, 2,]").is_err());

        let on = JsonParser::with_config(JsonParserConfig {
            allow_trailing_commas: true,
            ..JsonParserConfig::default()
        });
        assert_eq!(on.parse("[1, 2,]").unwrap().len(), 2);
        assert_eq!(on.parse(r#"{"a": 1,}"#).unwrap().len(), 1);
    }

    #[test]
    fn test_max_depth_enforced() {
        let p = JsonParser::with_config(JsonParserConfig {
            max_depth: 3,
            ..JsonParserConfig::default()
        });
        assert!(p.parse("[[[1]]]").is_ok());
        assert!(p.parse("[[[[1]]]]").is_err());
    }

    #[test]
    fn test_malformed_documents() {
        let p = JsonParser::new();
        assert!(p.parse("").is_err());
        assert!(p.parse("   ").is_err());
        assert!(p.parse("{").is_err());
        assert!(p.parse(r#"{"a" 1}"#).is_err());
        assert!(p.parse("[1 2]").is_err());
        assert!(p.parse("01").is_err());
        assert!(p.parse("\"unterminated").is_err());
        assert!(p.parse("tru").is_err());
    }

    #[test]
    fn test_stats_counting() {
        let p = JsonParser::new();
        let _ = p.parse("[1]");
        let _ = p.parse("nope");
        assert_eq!(p.stats().documents_parsed.load(Ordering::Relaxed), 1);
        assert_eq!(p.stats().parse_errors.load(Ordering::Relaxed), 1);
        assert_eq!(p.stats().bytes_parsed.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_stream_parser_chunked_feed() {
        let p = JsonParser::new();
        let mut sp = p.stream_parser();
        sp.feed(b"{\"a\": [1, ");
        sp.feed(b"2, 3]}");
        let v = sp.finish().unwrap();
        assert_eq!(v.key("a").unwrap().len(), 3);
        assert_eq!(sp.buffered(), 0);
    }
}
