//! Defines a unique id per request that is output with all logging.

use std::sync::atomic::{AtomicU64, Ordering};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hyper::header::HeaderMap;
use log::trace;
use rand::Rng;

/// The header checked for an externally-supplied id and used to echo the
/// effective id back to the client.
pub const X_REQUEST_ID: &str = "x-request-id";

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Resolves the id for the current request.
///
/// 1. If `X-Request-Id` is provided its value is used as is;
/// 2. otherwise a `hostname/base64(random 10 bytes)-<counter>` value is
///    generated.
pub(crate) fn resolve(headers: &HeaderMap) -> String {
    if let Some(external) = headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
    {
        trace!("[{}] request id set from X-Request-Id header", external);
        return external.to_string();
    }

    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());

    let mut raw = [0u8; 10];
    rand::thread_rng().fill(&mut raw[..]);

    let id = format!(
        "{}/{}-{}",
        host,
        URL_SAFE_NO_PAD.encode(raw),
        SEQUENCE.fetch_add(1, Ordering::Relaxed)
    );
    trace!("[{}] request id generated internally", id);
    id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uses_an_external_request_id() {
        let mut headers = HeaderMap::new();
        headers.insert(X_REQUEST_ID, "1-2-3-4".parse().unwrap());
        assert_eq!(resolve(&headers), "1-2-3-4");
    }

    #[test]
    fn generates_host_scoped_ids() {
        let headers = HeaderMap::new();
        let first = resolve(&headers);
        let second = resolve(&headers);
        assert_ne!(first, second);
        assert!(first.contains('/'));
        assert!(first.rsplit('-').next().unwrap().parse::<u64>().is_ok());
    }
}
