// src/json/mod.rs
pub mod parser;
pub mod serializer;
pub mod value;

pub use parser::{JsonError, JsonParser, JsonParserStats, StreamParser};
pub use serializer::{JsonSerializer, JsonSerializerStats, StreamSerializer};
pub use value::{JsonObject, JsonValue};

/// Parse with default (strict) settings.
pub fn parse(input: &str) -> Result<JsonValue, JsonError> {
    JsonParser::new().parse(input)
}

/// Serialize compactly, or pretty with two-space indentation.
pub fn dumps(value: &JsonValue, pretty: bool) -> String {
    let serializer = JsonSerializer::with_config(crate::config::JsonSerializerConfig {
        pretty_print: pretty,
        ..crate::config::JsonSerializerConfig::default()
    });
    serializer.serialize(value)
}

pub fn is_valid_json(input: &str) -> bool {
    parse(input).is_ok()
}

/// `None` when valid, otherwise the parse error message.
pub fn validate_json(input: &str) -> Option<String> {
    parse(input).err().map(|e| e.to_string())
}
