use nova_h2::header_block::{request_block, response_block};
use nova_h2::hpack::{Decoder, Encoder};
use nova_h2::{Headers, HeaderBlock, Method, RequestHead, ResponseHead};

fn names(block: &HeaderBlock) -> Vec<String> {
    block
        .iter()
        .map(|(n, _)| String::from_utf8_lossy(n).into_owned())
        .collect()
}

#[test]
fn request_round_trip_keeps_duplicates_and_case() {
    let headers: Headers = [
        ("Apns-Topic", "com.example.app"),
        ("X-Trace", "first"),
        ("content-type", "application/json"),
        ("x-trace", "second"),
    ]
    .into_iter()
    .collect();

    let block = request_block(
        &Method::Post,
        "/3/device/abcd",
        "https",
        "api.push.apple.com",
        &headers,
    );
    assert_eq!(
        &names(&block)[..4],
        [":method", ":path", ":scheme", ":authority"]
    );

    let head = RequestHead::from_header_block(&block).unwrap();
    assert_eq!(head.method, Method::Post);
    assert_eq!(head.path, "/3/device/abcd");
    assert_eq!(head.authority.as_deref(), Some("api.push.apple.com"));

    // caller headers in order, then the synthesized host
    let visible: Vec<(&str, &str)> = head.headers.iter().collect();
    assert_eq!(
        visible,
        [
            ("Apns-Topic", "com.example.app"),
            ("X-Trace", "first"),
            ("content-type", "application/json"),
            ("x-trace", "second"),
            ("host", "api.push.apple.com"),
        ]
    );
}

#[test]
fn response_round_trip_strips_status() {
    let headers: Headers = [("apns-id", "A1"), ("Set-Cookie", "a"), ("set-cookie", "b")]
        .into_iter()
        .collect();
    let block = response_block(410, &headers);
    assert_eq!(names(&block)[0], ":status");

    let head = ResponseHead::from_header_block(&block).unwrap();
    assert_eq!(head.status, 410);
    assert_eq!(head.headers, headers);
}

#[test]
fn unknown_method_survives_translation() {
    let block = request_block(
        &Method::from_wire("PURGEALL"),
        "/",
        "http",
        "localhost",
        &Headers::new(),
    );
    let head = RequestHead::from_header_block(&block).unwrap();
    assert_eq!(head.method, Method::Raw("PURGEALL".to_string()));
}

#[test]
fn duplicate_method_is_a_protocol_violation() {
    let mut block = HeaderBlock::default();
    block.write_header(b":method", b"GET");
    block.write_header(b":method", b"POST");
    block.write_header(b":path", b"/");
    assert!(RequestHead::from_header_block(&block).is_err());
}

#[test]
fn missing_path_is_a_protocol_violation() {
    let mut block = HeaderBlock::default();
    block.write_header(b":method", b"GET");
    assert!(RequestHead::from_header_block(&block).is_err());
}

#[test]
fn wire_round_trip_through_hpack_lowercases_names() {
    let headers: Headers = [("Apns-Priority", "10"), ("Authorization", "bearer x")]
        .into_iter()
        .collect();
    let block = request_block(&Method::Post, "/3/device/t", "https", "h", &headers);

    let mut wire = Vec::new();
    Encoder::new().encode(&block, &mut wire);
    let decoded = Decoder::default().decode(&wire).unwrap();
    let head = RequestHead::from_header_block(&decoded).unwrap();

    assert_eq!(head.headers.first("apns-priority"), Some("10"));
    let names: Vec<&str> = head.headers.iter().map(|(n, _)| n).collect();
    assert_eq!(names, ["apns-priority", "authorization", "host"]);
}
