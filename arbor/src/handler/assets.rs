//! A handler for serving filesystem assets.

use std::path::PathBuf;
use std::time::SystemTime;

use async_trait::async_trait;
use hyper::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, IF_MODIFIED_SINCE};
use hyper::{Method, StatusCode};
use tokio::fs;

use crate::context::Context;
use crate::handler::{Handler, HandlerError, HandlerResult};

/// Options observed by [`StaticHandler`].
pub struct StaticOptions {
    /// File served when the resolved path is a directory. `None` turns
    /// directory requests into 404s.
    pub index_file: Option<String>,
    /// Emitted as `Cache-Control: max-age=<seconds>` when set.
    pub max_age: Option<u32>,
    /// Suffixes appended (in order) when the path itself does not resolve,
    /// e.g. `[".html"]` lets `/about` serve `about.html`.
    pub try_suffixes: Vec<String>,
    /// Serve a sibling `<file>.gz` with `Content-Encoding: gzip` when the
    /// client accepts it.
    pub prefer_gzip: bool,
}

impl Default for StaticOptions {
    fn default() -> StaticOptions {
        StaticOptions {
            index_file: Some("index.html".to_string()),
            max_age: None,
            try_suffixes: Vec::new(),
            prefer_gzip: false,
        }
    }
}

/// Serves files beneath a root directory. Registered by
/// [`crate::router::group::Group::static_dir`] under a wildcard route whose
/// tail parameter is the relative file path.
pub struct StaticHandler {
    root: PathBuf,
    options: StaticOptions,
}

impl StaticHandler {
    pub(crate) fn new(root: PathBuf, options: StaticOptions) -> StaticHandler {
        StaticHandler { root, options }
    }

    fn not_found(&self, ctx: &mut Context) -> HandlerResult {
        ctx.string(StatusCode::NOT_FOUND, "404 Not Found")
    }
}

#[async_trait]
impl Handler for StaticHandler {
    async fn handle(&self, ctx: &mut Context) -> HandlerResult {
        let relative = ctx.param("filepath").unwrap_or("").to_string();

        // Reject traversal outside the root.
        if relative.split('/').any(|token| token == "..") {
            return self.not_found(ctx);
        }

        let mut path = self.root.clone();
        for token in relative.split('/').filter(|t| !t.is_empty() && *t != ".") {
            path.push(token);
        }

        let mut metadata = fs::metadata(&path).await.ok();

        if metadata.as_ref().map(|m| m.is_dir()).unwrap_or(false) {
            metadata = match &self.options.index_file {
                Some(index) => {
                    path.push(index);
                    fs::metadata(&path).await.ok()
                }
                None => None,
            };
        }

        if metadata.is_none() {
            for suffix in &self.options.try_suffixes {
                let candidate = PathBuf::from(format!("{}{}", path.display(), suffix));
                if let Ok(m) = fs::metadata(&candidate).await {
                    if m.is_file() {
                        path = candidate;
                        metadata = Some(m);
                        break;
                    }
                }
            }
        }

        let metadata = match metadata {
            Some(m) if m.is_file() => m,
            _ => return self.not_found(ctx),
        };

        let mime = mime_guess::from_path(&path).first_or_octet_stream();

        let mut serve_path = path.clone();
        let mut serve_meta = metadata;
        let mut gzipped = false;
        if self.options.prefer_gzip && accepts_gzip(ctx.headers()) {
            let candidate = PathBuf::from(format!("{}.gz", path.display()));
            if let Ok(m) = fs::metadata(&candidate).await {
                if m.is_file() {
                    serve_path = candidate;
                    serve_meta = m;
                    gzipped = true;
                }
            }
        }

        let modified = serve_meta.modified().ok();
        if let Some(modified) = modified {
            if not_modified_since(modified, ctx) {
                ctx.set_status(StatusCode::NOT_MODIFIED);
                ctx.writer_mut().write_header_now();
                return Ok(());
            }
            let stamp = httpdate::fmt_http_date(modified);
            ctx.set_header("last-modified", &stamp)?;
        }
        if let Some(max_age) = self.options.max_age {
            ctx.set_header("cache-control", &format!("max-age={}", max_age))?;
        }
        if gzipped {
            ctx.set_header("content-encoding", "gzip")?;
        }

        if ctx.method() == &Method::HEAD {
            ctx.writer_mut().insert_header(
                hyper::header::CONTENT_TYPE,
                HeaderValue::from_str(mime.as_ref())?,
            );
            ctx.writer_mut().write_header_now();
            return Ok(());
        }

        let body = fs::read(&serve_path)
            .await
            .map_err(|e| HandlerError::new(StatusCode::INTERNAL_SERVER_ERROR, e))?;
        ctx.data(StatusCode::OK, mime, &body)
    }
}

fn not_modified_since(modified: SystemTime, ctx: &Context) -> bool {
    let since = match ctx
        .header(IF_MODIFIED_SINCE.as_str())
        .and_then(|v| httpdate::parse_http_date(&v).ok())
    {
        Some(t) => t,
        None => return false,
    };
    // The header has whole-second resolution; truncate before comparing.
    let truncated = httpdate::parse_http_date(&httpdate::fmt_http_date(modified));
    truncated.map(|m| m <= since).unwrap_or(false)
}

/// True when any `Accept-Encoding` entry admits gzip with a non-zero
/// quality.
fn accepts_gzip(headers: &HeaderMap) -> bool {
    headers
        .get_all(ACCEPT_ENCODING)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|entry| {
            let mut parts = entry.split(';');
            let name = parts.next().map(str::trim).unwrap_or("");
            let quality = parts
                .next()
                .and_then(|q| q.replace("q=", "").trim().parse::<f32>().ok())
                .unwrap_or(1.0);
            (name == "gzip" || name == "*") && quality > 0.0
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_encoding_variants() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, "gzip".parse().unwrap());
        assert!(accepts_gzip(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, "br;q=0.8, *;q=0.5".parse().unwrap());
        assert!(accepts_gzip(&headers));

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, "gzip;q=0".parse().unwrap());
        assert!(!accepts_gzip(&headers));

        assert!(!accepts_gzip(&HeaderMap::new()));
    }
}
