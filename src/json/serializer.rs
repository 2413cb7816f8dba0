// src/json/serializer.rs
use crate::config::JsonSerializerConfig;
use crate::json::value::{JsonObject, JsonValue};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

#[derive(Debug, Default)]
pub struct JsonSerializerStats {
    pub documents_serialized: AtomicU64,
    pub total_serialize_time_ns: AtomicU64,
    pub bytes_serialized: AtomicU64,
    pub serialize_errors: AtomicU64,
}

impl JsonSerializerStats {
    pub fn average_serialize_time_ms(&self) -> f64 {
        let serialized = self.documents_serialized.load(Ordering::Relaxed);
        if serialized == 0 {
            return 0.0;
        }
        self.total_serialize_time_ns.load(Ordering::Relaxed) as f64 / (serialized as f64 * 1e6)
    }

    pub fn serialize_speed_mb_per_sec(&self) -> f64 {
        let total_time_s = self.total_serialize_time_ns.load(Ordering::Relaxed) as f64 / 1e9;
        if total_time_s == 0.0 {
            return 0.0;
        }
        let total_mb = self.bytes_serialized.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0);
        total_mb / total_time_s
    }
}

/// Value-tree -> byte-stream serializer, compact by default.
pub struct JsonSerializer {
    config: JsonSerializerConfig,
    stats: JsonSerializerStats,
}

impl Default for JsonSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonSerializer {
    pub fn new() -> Self {
        Self::with_config(JsonSerializerConfig::default())
    }

    pub fn with_config(config: JsonSerializerConfig) -> Self {
        Self {
            config,
            stats: JsonSerializerStats::default(),
        }
    }

    pub fn config(&self) -> &JsonSerializerConfig {
        &self.config
    }

    pub fn stats(&self) -> &JsonSerializerStats {
        &self.stats
    }

    pub fn serialize(&self, value: &JsonValue) -> String {
        let start = Instant::now();

        let mut out = String::with_capacity(1024);
        self.serialize_value(value, &mut out, 0);

        self.stats
            .documents_serialized
            .fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_serialize_time_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.stats
            .bytes_serialized
            .fetch_add(out.len() as u64, Ordering::Relaxed);

        out
    }

    pub fn serialize_into(&self, value: &JsonValue, out: &mut String) {
        self.serialize_value(value, out, 0);
    }

    fn serialize_value(&self, value: &JsonValue, out: &mut String, depth: usize) {
        match value {
            JsonValue::Null => out.push_str("null"),
            JsonValue::Bool(true) => out.push_str("true"),
            JsonValue::Bool(false) => out.push_str("false"),
            JsonValue::Number(n) => self.serialize_number(*n, out),
            JsonValue::String(s) => self.serialize_string(s, out),
            JsonValue::Array(a) => self.serialize_array(a, out, depth),
            JsonValue::Object(o) => self.serialize_object(o, out, depth),
        }
    }

    fn serialize_object(&self, obj: &JsonObject, out: &mut String, depth: usize) {
        out.push('{');
        if self.config.pretty_print && !obj.is_empty() {
            out.push('\n');
        }

        let mut entries: Vec<(&str, &JsonValue)> = obj.iter().collect();
        if self.config.sort_keys {
            entries.sort_by(|a, b| a.0.cmp(b.0));
        }

        for (i, (key, value)) in entries.iter().enumerate() {
            if i > 0 {
                out.push(',');
                if self.config.pretty_print {
                    out.push('\n');
                }
            }
            if self.config.pretty_print {
                self.add_indent(out, depth + 1);
            }
            self.serialize_string(key, out);
            out.push(':');
            if self.config.pretty_print {
                out.push(' ');
            }
            self.serialize_value(value, out, depth + 1);
        }

        if self.config.pretty_print && !obj.is_empty() {
            out.push('\n');
            self.add_indent(out, depth);
        }
        out.push('}');
    }

    fn serialize_array(&self, arr: &[JsonValue], out: &mut String, depth: usize) {
        out.push('[');
        if self.config.pretty_print && !arr.is_empty() {
            out.push('\n');
        }

        for (i, value) in arr.iter().enumerate() {
            if i > 0 {
                out.push(',');
                if self.config.pretty_print {
                    out.push('\n');
                }
            }
            if self.config.pretty_print {
                self.add_indent(out, depth + 1);
            }
            self.serialize_value(value, out, depth + 1);
        }

        if self.config.pretty_print && !arr.is_empty() {
            out.push('\n');
            self.add_indent(out, depth);
        }
        out.push(']');
    }

    fn serialize_number(&self, num: f64, out: &mut String) {
        // Integral doubles print as integers; everything else uses 15
        // significant decimal digits.
        if num.is_finite() && num == num.trunc() && num.abs() < 9.2e18 {
            out.push_str(&(num as i64).to_string());
        } else if num.is_finite() {
            let formatted = format_sig15(num);
            // 15 significant digits cannot name every double; when the value
            // would not survive a reparse, emit the shortest exact form
            // instead so parse(serialize(v)) stays the identity.
            if formatted.parse::<f64>().map(|v| v == num).unwrap_or(false) {
                out.push_str(&formatted);
            } else {
                out.push_str(&num.to_string());
            }
        } else {
            // JSON has no NaN/Infinity.
            out.push_str("null");
            self.stats.serialize_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn serialize_string(&self, s: &str, out: &mut String) {
        let escape_non_ascii = self.config.ensure_ascii || self.config.escape_unicode;

        out.push('"');
        for ch in s.chars() {
            match ch {
                '"' => out.push_str("\\\""),
                '\\' => out.push_str("\\\\"),
                '\u{0008}' => out.push_str("\\b"),
                '\u{000C}' => out.push_str("\\f"),
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if (c as u32) < 0x20 => {
                    out.push_str(&format!("\\u{:04x}", c as u32));
                }
                c if escape_non_ascii && !c.is_ascii() => {
                    let code = c as u32;
                    if code > 0xFFFF {
                        // Astral plane: UTF-16 surrogate pair.
                        let v = code - 0x10000;
                        let high = 0xD800 + (v >> 10);
                        let low = 0xDC00 + (v & 0x3FF);
                        out.push_str(&format!("\\u{:04x}\\u{:04x}", high, low));
                    } else {
                        out.push_str(&format!("\\u{:04x}", code));
                    }
                }
                c => out.push(c),
            }
        }
        out.push('"');
    }

    fn add_indent(&self, out: &mut String, depth: usize) {
        for _ in 0..depth * self.config.indent_size {
            out.push(' ');
        }
    }

    /// Incremental writer for building large documents without a value tree.
    pub fn stream_serializer(&self) -> StreamSerializer<'_> {
        StreamSerializer {
            serializer: self,
            buffer: String::new(),
            in_object_stack: Vec::new(),
            needs_separator: false,
        }
    }
}

/// `%.15g`: 15 significant digits, fixed or scientific notation picked by
/// the decimal exponent, trailing zeros stripped.
fn format_sig15(num: f64) -> String {
    let sci = format!("{:.14e}", num);
    let exp = sci
        .split_once('e')
        .and_then(|(_, e)| e.parse::<i32>().ok())
        .unwrap_or(0);

    if (-4..15).contains(&exp) {
        let precision = (14 - exp) as usize;
        let fixed = format!("{:.*}", precision, num);
        if fixed.contains('.') {
            fixed
                .trim_end_matches('0')
                .trim_end_matches('.')
                .to_string()
        } else {
            fixed
        }
    } else {
        let mantissa = sci.split_once('e').map(|(m, _)| m).unwrap_or(&sci);
        let mantissa = if mantissa.contains('.') {
            mantissa.trim_end_matches('0').trim_end_matches('.')
        } else {
            mantissa
        };
        format!(
            "{}e{}{:02}",
            mantissa,
            if exp < 0 { '-' } else { '+' },
            exp.abs()
        )
    }
}

pub struct StreamSerializer<'a> {
    serializer: &'a JsonSerializer,
    buffer: String,
    in_object_stack: Vec<bool>,
    needs_separator: bool,
}

impl StreamSerializer<'_> {
    fn write_separator(&mut self) {
        if self.needs_separator {
            self.buffer.push(',');
        }
    }

    pub fn begin_object(&mut self) {
        self.write_separator();
        self.buffer.push('{');
        self.in_object_stack.push(true);
        self.needs_separator = false;
    }

    pub fn end_object(&mut self) {
        self.buffer.push('}');
        self.in_object_stack.pop();
        self.needs_separator = true;
    }

    pub fn begin_array(&mut self) {
        self.write_separator();
        self.buffer.push('[');
        self.in_object_stack.push(false);
        self.needs_separator = false;
    }

    pub fn end_array(&mut self) {
        self.buffer.push(']');
        self.in_object_stack.pop();
        self.needs_separator = true;
    }

    pub fn write_key(&mut self, key: &str) {
        self.write_separator();
        self.serializer.serialize_string(key, &mut self.buffer);
        self.buffer.push(':');
        self.needs_separator = false;
    }

    pub fn write_value(&mut self, value: &JsonValue) {
        if !self.in_object_stack.last().copied().unwrap_or(false) {
            self.write_separator();
        }
        self.serializer.serialize_value(value, &mut self.buffer, 0);
        self.needs_separator = true;
    }

    pub fn finish(&mut self) -> String {
        let out = std::mem::take(&mut self.buffer);
        self.reset();
        out
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
        self.in_object_stack.clear();
        self.needs_separator = false;
    }
}
