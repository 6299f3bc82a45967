//! Integration tests for the HTTP front end
#![cfg(feature = "server")]

use std::io::{Read, Write};
use std::net::TcpStream;

use badgeserver::server::{Server, ServerHandle};
use badgeserver::BadgeService;

fn start_server() -> (String, ServerHandle) {
    let service = BadgeService::with_defaults().unwrap().into_shared();
    let server = Server::bind(service, "127.0.0.1:0", 2).expect("bind");
    let addr = server.server_addr();
    (addr, server.spawn().expect("spawn"))
}

struct HttpResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl HttpResponse {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn get(addr: &str, path: &str) -> HttpResponse {
    let mut stream = TcpStream::connect(addr).expect("connect");
    write!(
        stream,
        "GET {} HTTP/1.0\r\nHost: {}\r\nConnection: close\r\n\r\n",
        path, addr
    )
    .unwrap();
    let mut raw = Vec::new();
    stream.read_to_end(&mut raw).unwrap();

    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("header terminator");
    let head = String::from_utf8_lossy(&raw[..split]).to_string();
    let body = raw[split + 4..].to_vec();
    let mut lines = head.lines();
    let status = lines
        .next()
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|s| s.parse().ok())
        .expect("status line");
    let headers = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    HttpResponse {
        status,
        headers,
        body,
    }
}

#[test]
fn serves_index_and_images() {
    let (addr, handle) = start_server();

    let index = get(&addr, "/");
    assert_eq!(index.status, 200);
    assert!(index.header("Content-Type").unwrap().starts_with("text/html"));
    assert!(String::from_utf8_lossy(&index.body).contains("Status shield generator"));

    let svg = get(&addr, "/image.svg?vendor=build&status=passing&color=green");
    assert_eq!(svg.status, 200);
    assert_eq!(svg.header("Content-Type"), Some("image/svg+xml"));
    assert!(svg.header("ETag").is_some());
    let text = String::from_utf8(svg.body).unwrap();
    assert!(text.contains(">passing</text>"));
    assert!(text.contains("url(#green)"));

    let png = get(&addr, "/image.png?vendor=build&status=passing&color=green");
    assert_eq!(png.status, 200);
    assert_eq!(png.header("Content-Type"), Some("image/png"));
    assert_eq!(&png.body[0..8], b"\x89PNG\r\n\x1a\n");

    handle.shutdown();
}

#[test]
fn maps_errors_to_status_codes() {
    let (addr, handle) = start_server();

    assert_eq!(get(&addr, "/missing").status, 404);
    assert_eq!(get(&addr, "/image.jpg").status, 404);
    assert_eq!(get(&addr, "/image.svg/extra").status, 404);
    assert_eq!(get(&addr, "/image.png?vendor_width=200000000").status, 400);
    assert_eq!(get(&addr, "/image.svg?color=lightgray%22%3E").status, 400);
    assert_eq!(get(&addr, "/image.svg?vendor_width=wide").status, 400);

    let unknown = get(&addr, "/image.svg?color=magenta");
    assert_eq!(unknown.status, 200);

    handle.shutdown();
}

#[test]
fn identical_requests_share_etag() {
    let (addr, handle) = start_server();
    let a = get(&addr, "/image.svg?vendor=x&status=y");
    let b = get(&addr, "/image.svg?vendor=x&status=y");
    let c = get(&addr, "/image.svg?vendor=x&status=z");
    assert_eq!(a.header("ETag"), b.header("ETag"));
    assert_ne!(a.header("ETag"), c.header("ETag"));
    handle.shutdown();
}
