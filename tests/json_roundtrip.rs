use pyspeed::config::{JsonParserConfig, JsonSerializerConfig};
use pyspeed::json::{self, JsonObject, JsonParser, JsonSerializer, JsonValue};

fn round_trip(input: &str) -> JsonValue {
    let parser = JsonParser::new();
    let serializer = JsonSerializer::new();
    let value = parser.parse(input).unwrap();
    let reparsed = parser.parse(&serializer.serialize(&value)).unwrap();
    assert_eq!(value, reparsed, "round-trip mismatch for {}", input);
    value
}

#[test]
fn round_trip_structural_equality() {
    let documents = [
        "null",
        "true",
        "[]",
        "{}",
        "[null,false,0]",
        r#""plain string""#,
        "-12345.678",
        "1e-3",
        r#"{"a": 1, "b": [true, null, "x"]}"#,
        r#"{"nested": {"deep": {"deeper": [1, [2, [3]]]}}}"#,
        r#"["mixed", 1, {"k": null}, [], {}]"#,
        r#"{"esc": "line\nbreak \"quoted\" back\\slash A"}"#,
        r#"{"unicode": "héllo wörld 😀"}"#,
    ];
    for doc in documents {
        round_trip(doc);
    }
}

#[test]
fn compact_serialization_is_canonical() {
    // serialize(parse(serialize(parse(s)))) == serialize(parse(s))
    let inputs = [
        r#"  { "a" : 1 , "b" : [ 1 , 2 ] }  "#,
        r#"{"x":1.5,"y":"z","w":[null,true]}"#,
        "[[[[]]]]",
    ];
    let parser = JsonParser::new();
    let serializer = JsonSerializer::new();
    for input in inputs {
        let once = serializer.serialize(&parser.parse(input).unwrap());
        let twice = serializer.serialize(&parser.parse(&once).unwrap());
        assert_eq!(once, twice);
    }
}

#[test]
fn scenario_compact_output() {
    let value = json::parse(r#"{"a": 1, "b": [true, null, "x"]}"#).unwrap();
    assert_eq!(json::dumps(&value, false), r#"{"a":1,"b":[true,null,"x"]}"#);
}

#[test]
fn numbers_compare_under_ieee_equality() {
    let parser = JsonParser::new();
    let serializer = JsonSerializer::new();
    for literal in ["0.1", "1e300", "-2.5e-10", "9007199254740993", "3.141592653589793"] {
        let v = parser.parse(literal).unwrap();
        let n = v.as_f64().unwrap();
        let back = parser
            .parse(&serializer.serialize(&v))
            .unwrap()
            .as_f64()
            .unwrap();
        assert!(
            n == back || (n.is_nan() && back.is_nan()),
            "{} reserialized to {}",
            n,
            back
        );
    }
}

#[test]
fn insertion_order_survives_round_trip() {
    let input = r#"{"zebra":1,"apple":2,"mango":3}"#;
    let value = json::parse(input).unwrap();
    assert_eq!(json::dumps(&value, false), input);
}

#[test]
fn sorted_keys_are_codepoint_ordered() {
    let serializer = JsonSerializer::with_config(JsonSerializerConfig {
        sort_keys: true,
        ..JsonSerializerConfig::default()
    });
    let mut obj = JsonObject::new();
    obj.insert("b", JsonValue::from(2i64));
    obj.insert("A", JsonValue::from(1i64));
    obj.insert("a", JsonValue::from(3i64));
    assert_eq!(
        serializer.serialize(&JsonValue::Object(obj)),
        r#"{"A":1,"a":3,"b":2}"#
    );
}

#[test]
fn lenient_knobs_compose() {
    let parser = JsonParser::with_config(JsonParserConfig {
        allow_comments: true,
        allow_trailing_commas: true,
        strict_mode: false,
        ..JsonParserConfig::default()
    });
    let doc = r#"
        // leading comment
        {
            "a": 1, /* inline */
            "b": [1, 2,],
        }
        trailing garbage is fine in lax mode
    "#;
    let v = parser.parse(doc).unwrap();
    assert_eq!(v.key("a"), Some(&JsonValue::Number(1.0)));
    assert_eq!(v.key("b").unwrap().len(), 2);
}

#[test]
fn surrogate_escapes_round_trip_through_ascii_mode() {
    let parser = JsonParser::new();
    let serializer = JsonSerializer::with_config(JsonSerializerConfig {
        ensure_ascii: true,
        ..JsonSerializerConfig::default()
    });

    let original = parser.parse(r#""smile: 😀""#).unwrap();
    let escaped = serializer.serialize(&original);
    assert!(escaped.is_ascii());
    assert!(escaped.contains("\\ud83d\\ude00"));

    // Parsing the escaped form reassembles the astral codepoint.
    let reparsed = parser.parse(&escaped).unwrap();
    assert_eq!(original, reparsed);
}

#[test]
fn streaming_parser_matches_whole_parse() {
    let parser = JsonParser::new();
    let doc = r#"{"chunks": [1, 2, 3], "tail": "end"}"#;

    let whole = parser.parse(doc).unwrap();

    let mut stream = parser.stream_parser();
    for chunk in doc.as_bytes().chunks(7) {
        stream.feed(chunk);
    }
    assert_eq!(stream.finish().unwrap(), whole);
}

#[test]
fn stats_accumulate_across_documents() {
    use std::sync::atomic::Ordering;
    let parser = JsonParser::new();
    let serializer = JsonSerializer::new();

    for _ in 0..3 {
        let v = parser.parse("[1,2,3]").unwrap();
        serializer.serialize(&v);
    }
    let _ = parser.parse("broken");

    assert_eq!(parser.stats().documents_parsed.load(Ordering::Relaxed), 3);
    assert_eq!(parser.stats().parse_errors.load(Ordering::Relaxed), 1);
    assert_eq!(
        serializer
            .stats()
            .documents_serialized
            .load(Ordering::Relaxed),
        3
    );
    assert_eq!(
        serializer.stats().bytes_serialized.load(Ordering::Relaxed),
        21
    );
}
