//! HTTP convenience surface
//!
//! Read-only view for browsers and `curl`. One request per connection:
//! ```text
//! GET /            -> text/plain greeting and container list
//! GET /<container> -> JSON, or an HTML table when Accept has text/html
//! anything else    -> 405
//! ```

use std::io::BufRead;
use std::sync::Arc;

use serde::Serialize;

use crate::container::{records, Container, Record};
use crate::engine::Engine;
use crate::error::{Result, TesseraError};
use crate::network::Session;
use crate::protocol::Data;

const METHODS: [&str; 7] = ["GET", "HEAD", "POST", "PUT", "DELETE", "OPTIONS", "PATCH"];

/// Maximum number of header lines read before giving up
const MAX_HEADERS: usize = 100;

/// True for a line that looks like the start of an HTTP/1.x request
pub fn is_request_line(line: &str) -> bool {
    let mut parts = line.split(' ');
    let verb = parts.next().unwrap_or_default();
    METHODS.contains(&verb) && parts.last().map_or(false, |v| v.starts_with("HTTP/1."))
}

#[derive(Debug, Serialize)]
struct RecordView {
    key: serde_json::Value,
    value: serde_json::Value,
    metadata: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ContainerView<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    container_type: &'a str,
    count: usize,
    records: Vec<RecordView>,
}

fn json_value(data: &Data) -> serde_json::Value {
    match data {
        Data::None => serde_json::Value::Null,
        Data::String(s) => serde_json::Value::String(String::from_utf8_lossy(s).into_owned()),
        Data::Int(v) => serde_json::Value::from(*v),
        Data::Double(v) => serde_json::Value::from(*v),
    }
}

struct Response {
    status: u16,
    reason: &'static str,
    content_type: &'static str,
    body: String,
}

impl Response {
    fn new(status: u16, reason: &'static str, content_type: &'static str, body: String) -> Self {
        Self {
            status,
            reason,
            content_type,
            body,
        }
    }

    fn text(status: u16, reason: &'static str, body: impl Into<String>) -> Self {
        Self::new(status, reason, "text/plain; charset=utf-8", body.into())
    }

    fn into_bytes(self) -> Vec<u8> {
        let mut out = format!(
            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            self.status,
            self.reason,
            self.content_type,
            self.body.len()
        )
        .into_bytes();
        out.extend_from_slice(self.body.as_bytes());
        out
    }
}

/// Answer one request, then close the session
pub fn serve<R: BufRead>(engine: &Engine, session: &Arc<Session>, reader: &mut R, request_line: &str) -> Result<()> {
    let mut accept = String::new();
    for _ in 0..MAX_HEADERS {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("accept") {
                accept = value.trim().to_string();
            }
        }
    }

    let mut parts = request_line.split(' ');
    let method = parts.next().unwrap_or_default();
    let path = parts.next().unwrap_or("/");

    let response = if method != "GET" {
        Response::text(405, "Method Not Allowed", "only GET is supported\n")
    } else {
        match route(engine, session, path, accept.contains("text/html")) {
            Ok(response) => response,
            Err(TesseraError::NoSuchObject(msg)) => Response::text(404, "Not Found", msg + "\n"),
            Err(TesseraError::AccessDenied(msg)) => Response::text(403, "Forbidden", msg + "\n"),
            Err(e) => Response::text(500, "Internal Server Error", e.description() + "\n"),
        }
    };

    tracing::debug!("Session {}: {} {} -> {}", session.id(), method, path, response.status);
    session.send_bytes(response.into_bytes())
}

fn route(engine: &Engine, session: &Session, path: &str, html: bool) -> Result<Response> {
    let name = percent_decode(path.trim_start_matches('/'));
    if name.is_empty() {
        let mut body = format!("tessera {}\n\ncontainers:\n", crate::VERSION);
        let mut names = engine.containers().names();
        names.sort();
        for name in names {
            body.push_str(&name);
            body.push('\n');
        }
        return Ok(Response::text(200, "OK", body));
    }

    let container = engine.containers().open(None, &name)?;
    engine.check_access(session, container.container_type(), &name, "get")?;
    let all: Vec<Record> = records(container.query(0, 0, &Data::None)?).collect();

    if html {
        return Ok(Response::new(200, "OK", "text/html; charset=utf-8", render_html(container.as_ref(), &all)));
    }

    let view = ContainerView {
        name: container.name(),
        container_type: container.container_type(),
        count: all.len(),
        records: all
            .iter()
            .map(|r| RecordView {
                key: json_value(&r.key),
                value: json_value(&r.value),
                metadata: json_value(&r.metadata),
            })
            .collect(),
    };
    let body = serde_json::to_string_pretty(&view)
        .map_err(|e| TesseraError::Protocol(format!("cannot render {}: {}", name, e)))?;
    Ok(Response::new(200, "OK", "application/json", body))
}

fn render_html(container: &dyn Container, all: &[Record]) -> String {
    let mut html = format!(
        "<html><head><title>{0}</title></head><body><h1>{0}</h1><p>{1}, {2} record(s)</p>\n<table border=\"1\">\n<tr><th>key</th><th>value</th><th>metadata</th></tr>\n",
        escape_html(container.name()),
        escape_html(container.container_type()),
        all.len()
    );
    for record in all {
        html.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            escape_html(&record.key.to_text()),
            escape_html(&record.value.to_text()),
            escape_html(&record.metadata.to_text())
        ));
    }
    html.push_str("</table></body></html>\n");
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

fn percent_decode(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let escaped = (bytes[i] == b'%')
            .then(|| path.get(i + 1..i + 3))
            .flatten()
            .and_then(|hex| u8::from_str_radix(hex, 16).ok());
        match escaped {
            Some(byte) => {
                out.push(byte);
                i += 3;
            }
            None => {
                out.push(bytes[i]);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}
