//! HTTP front end
//!
//! Routes:
//! - `/` serves a configurator page for trying badge parameters
//! - `/image.svg` and `/image.png` render a badge from query parameters
//!   (`vendor`, `status`, `color`, `vendor_width`, `status_width`, `converter`)
//!
//! Routing is a pure function (`route`) over the request URL so it can be
//! tested without sockets; `Server` only moves bytes between `tiny_http` and
//! that function.

use std::io::Cursor;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::{BadgeRequest, BadgeService, Error, OutputFormat, RasterBackend, Result};

/// A transport-neutral response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    pub etag: Option<String>,
}

impl Reply {
    fn html(body: String) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=UTF-8".to_string(),
            body: body.into_bytes(),
            etag: None,
        }
    }

    fn text(status: u16, message: &str) -> Self {
        Self {
            status,
            content_type: "text/plain; charset=UTF-8".to_string(),
            body: message.as_bytes().to_vec(),
            etag: None,
        }
    }

    fn error(err: &Error) -> Self {
        let status = if err.is_client_error() { 400 } else { 500 };
        if status == 500 {
            log::error!("badge request failed: {}", err);
        } else {
            log::debug!("rejected badge request: {}", err);
        }
        Self::text(status, &err.to_string())
    }
}

/// Parsed query string of an image request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageQuery {
    pub request: BadgeRequest,
    pub backend: RasterBackend,
}

fn parse_width(name: &str, raw: Option<&str>) -> Result<Option<i64>> {
    match raw {
        None => Ok(None),
        Some(v) => v
            .trim()
            .parse::<i64>()
            .map(Some)
            .map_err(|_| Error::InvalidRequest(format!("{} must be an integer, got {:?}", name, v))),
    }
}

/// Parse image query parameters. The first occurrence of a key wins.
pub fn parse_query(query: &str) -> Result<ImageQuery> {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect();
    let get = |key: &str| {
        pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    };

    let defaults = BadgeRequest::default();
    let request = BadgeRequest {
        vendor: get("vendor").map(str::to_string).unwrap_or(defaults.vendor),
        status: get("status").map(str::to_string).unwrap_or(defaults.status),
        color: get("color").map(str::to_string).unwrap_or(defaults.color),
        vendor_width: parse_width("vendor_width", get("vendor_width"))?,
        status_width: parse_width("status_width", get("status_width"))?,
    };
    let backend = get("converter").unwrap_or("").parse()?;
    Ok(ImageQuery { request, backend })
}

fn render_image(service: &BadgeService, format: OutputFormat, query: &str) -> Result<Reply> {
    let ImageQuery { request, backend } = parse_query(query)?;
    let badge = service.render(&request, format, backend)?;
    Ok(Reply {
        status: 200,
        content_type: badge.content_type.to_string(),
        etag: Some(badge.etag()),
        body: badge.bytes,
    })
}

/// Map a request URL (path plus optional query) to a reply.
pub fn route(service: &BadgeService, url: &str) -> Reply {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let format = match path {
        "/" => return Reply::html(index_page(service)),
        "/image.svg" => OutputFormat::Svg,
        "/image.png" => OutputFormat::Png,
        _ => return Reply::text(404, "Not found"),
    };
    render_image(service, format, query).unwrap_or_else(|e| Reply::error(&e))
}

fn html_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

const INDEX_HEAD: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>Status shield generator</title>
    <style type="text/css">
      body { padding: 2em; }
      label { display: inline-block; text-align: right; width: 6em; margin-right: 1ex; }
      p { margin: 1ex; }
      form { margin-bottom: 2em; }
      input[type="number"] { width: 4em; }
    </style>
    <script type="text/javascript">
      function update() {
        var q = ["vendor", "status", "color", "vendor_width", "status_width", "converter"].map(function (k) {
          return k + "=" + encodeURIComponent(document.getElementById(k).value);
        }).join("&");
        var format = document.getElementById("format").value;
        document.getElementById("result").src = "/image." + format + "?" + q;
      }
    </script>
  </head>
  <body onload="update()">
    <form>
      <p>
        <label for="vendor">Vendor</label>
        <input id="vendor" type="text" value="vendor" onchange="update()" onkeyup="update()">
        <input id="vendor_width" type="number" value="-1" onchange="update()">px (-1 = auto)
      </p>
      <p>
        <label for="status">Status</label>
        <input id="status" type="text" value="status" onchange="update()" onkeyup="update()">
        <input id="status_width" type="number" value="-1" onchange="update()">px (-1 = auto)
      </p>
"#;

const INDEX_TAIL: &str = r#"      <p>
        <input type="submit" value="Update" onclick="update(); return false">
      </p>
    </form>
    <p><img id="result" src="/image.png?vendor=vendor&amp;status=status&amp;color=lightgray"></p>
  </body>
</html>
"#;

fn select(id: &str, label: &str, options: &[(String, String)]) -> String {
    let mut out = format!(
        "      <p>\n        <label for=\"{id}\">{label}</label>\n        <select id=\"{id}\" onchange=\"update()\">\n"
    );
    for (value, text) in options {
        out.push_str(&format!(
            "          <option value=\"{}\">{}</option>\n",
            html_escape(value),
            html_escape(text)
        ));
    }
    out.push_str("        </select>\n      </p>\n");
    out
}

/// The configurator page
pub fn index_page(service: &BadgeService) -> String {
    let colors: Vec<(String, String)> = service
        .templates()
        .selectable_colors()
        .into_iter()
        .map(|c| (c.to_string(), c.to_string()))
        .collect();
    let formats = vec![
        ("png".to_string(), "PNG".to_string()),
        ("svg".to_string(), "SVG".to_string()),
    ];
    let converters: Vec<(String, String)> = RasterBackend::ALL
        .iter()
        .map(|b| (b.name().to_string(), b.label().to_string()))
        .collect();

    let mut page = String::from(INDEX_HEAD);
    page.push_str(&select("color", "Color", &colors));
    page.push_str(&select("format", "Format", &formats));
    page.push_str(&select("converter", "SVG converter", &converters));
    page.push_str(INDEX_TAIL);
    page
}

fn to_response(reply: Reply) -> tiny_http::Response<Cursor<Vec<u8>>> {
    let mut response = tiny_http::Response::from_data(reply.body).with_status_code(reply.status);
    if let Ok(h) = tiny_http::Header::from_bytes(&b"Content-Type"[..], reply.content_type.as_bytes()) {
        response.add_header(h);
    }
    if let Some(etag) = reply.etag {
        if let Ok(h) = tiny_http::Header::from_bytes(&b"ETag"[..], etag.as_bytes()) {
            response.add_header(h);
        }
    }
    response
}

/// A bound HTTP server that has not started serving yet
pub struct Server {
    http: Arc<tiny_http::Server>,
    service: Arc<BadgeService>,
    workers: usize,
}

/// Handle to a running server
pub struct ServerHandle {
    http: Arc<tiny_http::Server>,
    threads: Vec<JoinHandle<()>>,
}

impl Server {
    /// Bind to `addr` (e.g. `"localhost:8000"`, or port 0 for any port).
    pub fn bind(service: Arc<BadgeService>, addr: &str, workers: usize) -> Result<Self> {
        let http = tiny_http::Server::http(addr)
            .map_err(|e| Error::ConfigError(format!("cannot listen on {}: {}", addr, e)))?;
        Ok(Self {
            http: Arc::new(http),
            service,
            workers: workers.max(1),
        })
    }

    /// The bound address, for display and for tests that bind port 0
    pub fn server_addr(&self) -> String {
        match self.http.server_addr().to_ip() {
            Some(addr) => addr.to_string(),
            None => "unix socket".to_string(),
        }
    }

    /// Start the worker threads.
    pub fn spawn(self) -> Result<ServerHandle> {
        log::info!("Listening on http://{}/", self.server_addr());
        let mut threads = Vec::with_capacity(self.workers);
        for i in 0..self.workers {
            let http = Arc::clone(&self.http);
            let service = Arc::clone(&self.service);
            let handle = std::thread::Builder::new()
                .name(format!("badge-http-{}", i))
                .spawn(move || serve_loop(&http, &service))
                .map_err(|e| Error::Other(format!("Worker spawn failed: {}", e)))?;
            threads.push(handle);
        }
        Ok(ServerHandle {
            http: self.http,
            threads,
        })
    }

    /// Serve until the process exits.
    pub fn run(self) -> Result<()> {
        self.spawn()?.join();
        Ok(())
    }
}

fn serve_loop(http: &tiny_http::Server, service: &BadgeService) {
    while let Ok(request) = http.recv() {
        let url = request.url().to_string();
        let reply = route(service, &url);
        log::debug!("{} {} -> {}", request.method(), url, reply.status);
        if let Err(e) = request.respond(to_response(reply)) {
            log::warn!("failed to send response for {}: {}", url, e);
        }
    }
}

impl ServerHandle {
    /// Wait for all workers to finish.
    pub fn join(self) {
        for t in self.threads {
            let _ = t.join();
        }
    }

    /// Stop accepting requests and wait for the workers.
    pub fn shutdown(self) {
        for _ in 0..self.threads.len() {
            self.http.unblock();
        }
        self.join();
        log::info!("server stopped");
    }
}
