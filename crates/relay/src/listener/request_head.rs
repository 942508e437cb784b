//! Host and path extraction from a plaintext HTTP/1.x request head

use crate::error::{RelayError, Result};

/// Largest request head the plain listener buffers
pub const MAX_REQUEST_HEAD: usize = 16 * 1024;

const MAX_HEADERS: usize = 64;

/// The parts of a request the plain dispatcher routes on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Host header value without its port
    pub host: String,
    /// Request target in origin form, including any query
    pub path: String,
}

/// Parse the head at the start of `data`.
///
/// Returns `Ok(None)` until the blank line ending the head has arrived.
pub fn parse_request_head(data: &[u8]) -> Result<Option<RequestHead>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(data) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) if data.len() < MAX_REQUEST_HEAD => return Ok(None),
        Ok(httparse::Status::Partial) => {
            return Err(RelayError::InvalidRequest("Request head too large".into()));
        }
        Err(e) => {
            return Err(RelayError::InvalidRequest(format!(
                "Invalid HTTP request: {e}"
            )));
        }
    }

    let target = req
        .path
        .ok_or_else(|| RelayError::InvalidRequest("Missing request target".into()))?;
    let (target_host, path) = split_target(target)?;

    let host_header = req
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("host"))
        .map(|h| {
            std::str::from_utf8(h.value)
                .map_err(|_| RelayError::InvalidRequest("Host header is not UTF-8".into()))
        })
        .transpose()?;

    let host = host_header
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .or(target_host.as_deref())
        .ok_or_else(|| RelayError::InvalidRequest("Missing Host header".into()))?;

    Ok(Some(RequestHead {
        host: strip_port(host).to_string(),
        path,
    }))
}

/// Split an origin-form or absolute-form target into (authority, path)
fn split_target(target: &str) -> Result<(Option<String>, String)> {
    if target.starts_with('/') {
        return Ok((None, target.to_string()));
    }

    let uri: http::Uri = target
        .parse()
        .map_err(|e| RelayError::InvalidRequest(format!("Invalid request target: {e}")))?;
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| "/".to_string());
    Ok((uri.authority().map(|a| a.as_str().to_string()), path))
}

/// Drop a trailing `:port`, keeping bracketed IPv6 literals intact
fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }
    match host.rsplit_once(':') {
        Some((name, port)) if port.bytes().all(|b| b.is_ascii_digit()) => name,
        _ => host,
    }
}
