// lidlink Engine — Minimal HTTP/1.1 plumbing for the local listeners
//
// The webhook and query listeners are raw `tokio::net::TcpListener` loops.
// This module reads one request per connection (honouring Content-Length)
// and writes JSON responses with `Connection: close`.

use crate::atoms::error::{EngineError, EngineResult};
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest request body accepted from a local peer.
pub const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    /// Path without the query string, percent-decoded.
    pub path: String,
    pub query: HashMap<String, String>,
    pub body: Vec<u8>,
}

/// Read one request. Ok(None) when the peer closed without sending anything.
pub async fn read_request<S: AsyncRead + Unpin>(stream: &mut S) -> EngineResult<Option<HttpRequest>> {
    let mut buf = Vec::with_capacity(8192);
    let mut chunk = [0u8; 8192];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(EngineError::transport("http", "connection closed mid-header"));
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(idx) = find_header_end(&buf) {
            break idx;
        }
        if buf.len() > 64 * 1024 {
            return Err(EngineError::transport("http", "header too large"));
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let first_line = lines.next().unwrap_or("");
    let mut parts = first_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(EngineError::transport("http", format!("malformed request line: {}", first_line)));
    };

    let content_length = lines
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse::<usize>().ok())
        .unwrap_or(0);
    if content_length > MAX_BODY_BYTES {
        return Err(EngineError::transport("http", format!("body of {} bytes refused", content_length)));
    }

    let mut body = buf[header_end + 4..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    let (path, query) = split_target(target);
    Ok(Some(HttpRequest { method: method.to_uppercase(), path, query, body }))
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Split "/a/b?x=1&y=2" into a decoded path and query map.
pub fn split_target(target: &str) -> (String, HashMap<String, String>) {
    let (path, qs) = target.split_once('?').unwrap_or((target, ""));
    let query = qs
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_query(k), decode_query(v))
        })
        .collect();
    (decode(path), query)
}

/// Percent-decode; undecodable input is kept as-is.
fn decode(s: &str) -> String {
    urlencoding::decode(s).map(|c| c.into_owned()).unwrap_or_else(|_| s.to_string())
}

/// Query components also use '+' for space. In a path it stays literal.
fn decode_query(s: &str) -> String {
    decode(&s.replace('+', " "))
}

pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

pub async fn send_json<S: AsyncWrite + Unpin>(
    stream: &mut S,
    status: u16,
    body: &serde_json::Value,
) -> EngineResult<()> {
    let json = body.to_string();
    let resp = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_text(status),
        json.len(),
        json
    );
    stream.write_all(resp.as_bytes()).await?;
    stream.flush().await?;
    Ok(())
}
