//! A reverse-proxy handler forwarding matched requests to an upstream.

use std::sync::Arc;

use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use hyper::client::HttpConnector;
use hyper::header::{HeaderName, HeaderValue, HOST};
use hyper::{Body, Client, Request, Response, StatusCode, Uri};
use log::debug;
use regex::Regex;

use crate::context::Context;
use crate::handler::{Handler, HandlerError, HandlerResult};

/// A hook invoked on the outbound request just before it is sent.
pub type RequestHook = Arc<dyn Fn(&mut Request<Body>) + Send + Sync>;
/// A hook invoked on the upstream response before it is copied back.
pub type ResponseHook = Arc<dyn Fn(&mut Response<Body>) + Send + Sync>;

/// Options observed by [`ProxyHandler`].
#[derive(Default)]
pub struct ProxyOptions {
    /// Ordered `(pattern, replacement)` pairs; the first pattern matching
    /// the request path rewrites it before forwarding.
    pub rewrites: Vec<(String, String)>,
    /// Runs on the outbound request.
    pub on_request: Option<RequestHook>,
    /// Runs on the upstream response.
    pub on_response: Option<ResponseHook>,
}

// Headers that terminate at each hop and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Forwards everything under a guarded prefix to a single upstream target.
pub struct ProxyHandler {
    guard: String,
    scheme: String,
    authority: String,
    rewrites: Vec<(Regex, String)>,
    on_request: Option<RequestHook>,
    on_response: Option<ResponseHook>,
    client: Client<HttpConnector>,
}

impl ProxyHandler {
    pub(crate) fn new(guard: &str, target: &str, options: ProxyOptions) -> anyhow::Result<ProxyHandler> {
        let uri: Uri = target.parse().context("invalid proxy target")?;
        let scheme = uri.scheme_str().unwrap_or("http").to_string();
        if scheme != "http" {
            return Err(anyhow!("proxy target scheme `{}` is not supported", scheme));
        }
        let authority = uri
            .authority()
            .ok_or_else(|| anyhow!("proxy target must carry an authority"))?
            .to_string();

        let mut rewrites = Vec::with_capacity(options.rewrites.len());
        for (pattern, replacement) in options.rewrites {
            let regex = Regex::new(&pattern)
                .with_context(|| format!("invalid proxy rewrite `{}`", pattern))?;
            rewrites.push((regex, replacement));
        }

        Ok(ProxyHandler {
            guard: guard.to_string(),
            scheme,
            authority,
            rewrites,
            on_request: options.on_request,
            on_response: options.on_response,
            client: Client::new(),
        })
    }

    fn rewrite(&self, path: &str) -> String {
        for (regex, replacement) in &self.rewrites {
            if regex.is_match(path) {
                return regex.replace(path, replacement.as_str()).into_owned();
            }
        }
        path.to_string()
    }
}

#[async_trait]
impl Handler for ProxyHandler {
    async fn handle(&self, ctx: &mut Context) -> HandlerResult {
        let path = ctx.path();
        if !path.starts_with(&self.guard) {
            return ctx.string(StatusCode::NOT_FOUND, "404 Not Found");
        }

        let rewritten = self.rewrite(&path);
        let path_and_query = match ctx.uri().query() {
            Some(query) => format!("{}?{}", rewritten, query),
            None => rewritten,
        };
        let uri = Uri::builder()
            .scheme(self.scheme.as_str())
            .authority(self.authority.as_str())
            .path_and_query(path_and_query.as_str())
            .build()
            .map_err(|e| HandlerError::new(StatusCode::BAD_GATEWAY, e))?;

        debug!("[{}] proxying to {}", ctx.request_id(), uri);

        let body = ctx.body().await?;
        let mut outbound = Request::builder()
            .method(ctx.method().clone())
            .uri(uri)
            .body(Body::from(body))
            .map_err(|e| HandlerError::new(StatusCode::BAD_GATEWAY, e))?;

        for (name, value) in ctx.headers().iter() {
            if HOP_BY_HOP.contains(&name.as_str()) || name == HOST {
                continue;
            }
            outbound.headers_mut().insert(name.clone(), value.clone());
        }
        outbound
            .headers_mut()
            .insert(HOST, HeaderValue::from_str(&self.authority)?);
        if let Some(addr) = ctx.client_addr() {
            outbound.headers_mut().insert(
                HeaderName::from_static("x-forwarded-for"),
                HeaderValue::from_str(&addr.ip().to_string())?,
            );
        }

        if let Some(hook) = &self.on_request {
            hook(&mut outbound);
        }

        let mut upstream = self
            .client
            .request(outbound)
            .await
            .map_err(|e| HandlerError::new(StatusCode::BAD_GATEWAY, e))?;

        if let Some(hook) = &self.on_response {
            hook(&mut upstream);
        }

        let status = upstream.status();
        let headers = upstream.headers().clone();
        let body = hyper::body::to_bytes(upstream.into_body())
            .await
            .map_err(|e| HandlerError::new(StatusCode::BAD_GATEWAY, e))?;

        ctx.set_status(status);
        for (name, value) in headers.iter() {
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            ctx.writer_mut().insert_header(name.clone(), value.clone());
        }
        ctx.writer_mut().write(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_targets() {
        assert!(ProxyHandler::new("/api", "https://upstream:9000", ProxyOptions::default()).is_err());
        assert!(ProxyHandler::new("/api", "http://upstream:9000", ProxyOptions::default()).is_ok());
    }

    #[test]
    fn first_matching_rewrite_wins() {
        let handler = ProxyHandler::new(
            "/api",
            "http://upstream:9000",
            ProxyOptions {
                rewrites: vec![
                    ("^/api/v2/(.*)$".to_string(), "/v2/$1".to_string()),
                    ("^/api/(.*)$".to_string(), "/$1".to_string()),
                ],
                ..ProxyOptions::default()
            },
        )
        .unwrap();

        assert_eq!(handler.rewrite("/api/v2/users"), "/v2/users");
        assert_eq!(handler.rewrite("/api/users"), "/users");
        assert_eq!(handler.rewrite("/other"), "/other");
    }
}
