use pyspeed::http::{HeaderMap, Method, ResponseData};
use pyspeed::parser::{
    find_header_end, url_decode_bytes, url_encode_bytes, RequestParser,
};
use pyspeed::router::RouteTable;

fn parse(raw: &[u8]) -> pyspeed::parser::ParsedRequest {
    let end = find_header_end(raw).expect("complete header block");
    RequestParser::new().parse(&raw[..end], &raw[end..]).unwrap()
}

#[test]
fn full_request_parse_end_to_end() {
    let raw = b"POST /api/items?tag=a&tag=b&q=hello%20world HTTP/1.1\r\n\
Host: example.com\r\n\
Content-Type: application/json\r\n\
Cookie: session=s%3A1; theme=dark\r\n\
Content-Length: 15\r\n\
\r\n\
{\"name\":\"test\"}";

    let req = parse(raw);
    assert_eq!(req.method, Method::Post);
    assert_eq!(req.path, "/api/items");
    assert_eq!(req.query_string, "tag=a&tag=b&q=hello%20world");
    assert_eq!(req.query_params["tag"], vec!["a", "b"]);
    assert_eq!(req.query_params["q"], vec!["hello world"]);
    assert_eq!(req.cookies["session"], "s:1");
    assert_eq!(req.cookies["theme"], "dark");
    assert_eq!(req.content_type, "application/json");
    assert_eq!(req.content_length, 15);
    assert!(req.is_valid_json);
    assert_eq!(req.headers.get("HOST"), Some("example.com"));
}

#[test]
fn url_decode_round_trip_property() {
    // decode(encode(B)) == B for arbitrary byte strings.
    let mut samples: Vec<Vec<u8>> = vec![
        b"".to_vec(),
        b"plain-text_~.ok".to_vec(),
        b"two words".to_vec(),
        b"a+b&c=d%20e".to_vec(),
        "unicode: héllo — 😀".as_bytes().to_vec(),
        (0u8..=255).collect(),
    ];
    // A few deterministic pseudo-random blobs.
    let mut x: u32 = 0x1234_5678;
    for _ in 0..8 {
        let mut blob = Vec::with_capacity(64);
        for _ in 0..64 {
            x = x.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            blob.push((x >> 24) as u8);
        }
        samples.push(blob);
    }

    for sample in samples {
        let encoded = url_encode_bytes(&sample);
        assert_eq!(url_decode_bytes(encoded.as_bytes()), sample);
    }
}

#[test]
fn query_repetition_order_preserved() {
    let req = parse(b"GET /?a=1&a=2&a=3 HTTP/1.1\r\n\r\n");
    assert_eq!(req.query_params["a"], vec!["1", "2", "3"]);
}

#[test]
fn header_lookup_any_casing() {
    let req = parse(b"GET / HTTP/1.1\r\nX-Custom-Header: value-1\r\n\r\n");
    for name in [
        "x-custom-header",
        "X-Custom-Header",
        "X-CUSTOM-HEADER",
        "x-CuStOm-hEaDeR",
    ] {
        assert_eq!(req.headers.get(name), Some("value-1"), "casing: {}", name);
    }
}

#[test]
fn first_match_routing_property() {
    let mut table = RouteTable::new();
    table.add_route("/r/{x}", "r1");
    table.add_route("/r/{y}", "r2");
    let result = table.match_route("/r/anything");
    assert!(result.matched);
    assert_eq!(result.handler_id, "r1");
}

#[test]
fn response_wire_format() {
    let mut resp = ResponseData::json("{\"ok\":true}");
    resp.headers
        .push(("X-Request-Id".to_string(), "abc".to_string()));
    resp.add_cookie("sid", "42", &pyspeed::http::CookieOptions::default());

    let wire = String::from_utf8(resp.to_bytes(true)).unwrap();
    let (head, body) = wire.split_once("\r\n\r\n").unwrap();
    let lines: Vec<&str> = head.split("\r\n").collect();

    assert_eq!(lines[0], "HTTP/1.1 200 OK");
    assert!(lines.contains(&"Server: PySpeed/1.0"));
    assert!(lines.contains(&"Content-Length: 11"));
    assert!(lines.contains(&"Connection: keep-alive"));
    assert!(lines.contains(&"Content-Type: application/json"));
    assert!(lines.contains(&"X-Request-Id: abc"));
    assert!(lines.contains(&"Set-Cookie: sid=42; Path=/; HttpOnly"));
    assert_eq!(body, "{\"ok\":true}");
}

#[test]
fn redirect_response_shape() {
    let resp = ResponseData::redirect("/login", 302);
    let wire = String::from_utf8(resp.to_bytes(false)).unwrap();
    assert!(wire.starts_with("HTTP/1.1 302 Found\r\n"));
    assert!(wire.contains("Location: /login\r\n"));
    assert!(wire.contains("Connection: close\r\n"));
    assert!(wire.contains("Redirecting to"));
}

#[test]
fn keep_alive_signalling() {
    let close_req = parse(b"GET / HTTP/1.1\r\nConnection: close\r\n\r\n");
    assert_eq!(close_req.headers.get("connection"), Some("close"));

    let resp = ResponseData::ok("x").header("Connection", "close");
    assert!(resp.forces_close());
    let plain = ResponseData::ok("x");
    assert!(!plain.forces_close());
}

#[test]
fn empty_body_when_no_content_length() {
    let raw = b"GET /page HTTP/1.1\r\nHost: h\r\n\r\n";
    assert_eq!(
        pyspeed::parser::content_length_of(&raw[..find_header_end(raw).unwrap()]),
        Ok(0)
    );
}

#[test]
fn header_map_is_case_insensitive_container() {
    let mut headers = HeaderMap::new();
    headers.insert("Accept-Encoding", "gzip".to_string());
    headers.insert("ACCEPT-ENCODING", "br".to_string());
    assert_eq!(headers.len(), 1);
    assert_eq!(headers.get("accept-encoding"), Some("br"));
}
