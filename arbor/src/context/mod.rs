//! The per-request context handed to every handler in the chain.
//!
//! A `Context` is created per request and never shared across requests; it
//! lives on a single task for its whole life. It carries the decomposed
//! request, the response writer, the assembled handler chain with its
//! cursor, matched route data and a per-request [`State`] typemap.

mod bind;
mod respond;

pub use self::bind::{BindError, FormFile};
pub use self::respond::{SseEvent, SseSender};

pub(crate) use self::respond::wants_json;

use std::any::{type_name, TypeId};
use std::net::SocketAddr;

use anyhow::anyhow;
use bytes::{Bytes, BytesMut};
use cookie::Cookie;
use hyper::body::HttpBody;
use hyper::header::HeaderMap;
use hyper::http::Extensions;
use hyper::upgrade::OnUpgrade;
use hyper::{Body, Method, Request, StatusCode, Uri, Version};

use crate::app::App;
use crate::handler::{HandlerError, HandlerResult};
use crate::http::response_writer::ResponseWriter;
use crate::middleware::Middleware;
use crate::router::Params;
use crate::state::{State, StateData};

/// The request context. See the module documentation.
pub struct Context {
    app: App,
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    extensions: Extensions,
    body: Option<Body>,
    body_bytes: Option<Bytes>,
    params: Params,
    matched_pattern: Option<String>,
    writer: ResponseWriter,
    chain: Vec<Middleware>,
    cursor: isize,
    advanced: Vec<bool>,
    state: State,
    client_addr: Option<SocketAddr>,
    request_id: String,
}

impl Context {
    // The service resolves the request id before the panic boundary so it
    // can tag responses on every path; the context just carries it.
    pub(crate) fn new(
        app: App,
        req: Request<Body>,
        client_addr: Option<SocketAddr>,
        request_id: String,
    ) -> Context {
        let (parts, body) = req.into_parts();
        Context {
            app,
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            extensions: parts.extensions,
            body: Some(body),
            body_bytes: None,
            params: Params::default(),
            matched_pattern: None,
            writer: ResponseWriter::new(),
            chain: Vec::new(),
            cursor: -1,
            advanced: Vec::new(),
            state: State::new(),
            client_addr,
            request_id,
        }
    }

    /// The request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The request path.
    pub fn path(&self) -> String {
        self.uri.path().to_string()
    }

    /// The full request URI.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// The HTTP version the request arrived over.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A single request header rendered as a string.
    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string())
    }

    /// The id identifying this request in logs, from `X-Request-Id` or
    /// generated.
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Peer address, when the transport has one.
    pub fn client_addr(&self) -> Option<SocketAddr> {
        self.client_addr
    }

    /// The application this request is being served by.
    pub fn app(&self) -> App {
        self.app.clone()
    }

    /// Parameters captured by the matched route pattern.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// A single captured parameter.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// The canonical pattern of the matched route, when one matched.
    pub fn matched_pattern(&self) -> Option<&str> {
        self.matched_pattern.as_deref()
    }

    /// Per-request storage shared along the chain.
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Mutable per-request storage.
    pub fn state_mut(&mut self) -> &mut State {
        &mut self.state
    }

    /// The response writer.
    pub fn writer(&self) -> &ResponseWriter {
        &self.writer
    }

    /// The response writer, mutably.
    pub fn writer_mut(&mut self) -> &mut ResponseWriter {
        &mut self.writer
    }

    /// All query pairs, in order of appearance.
    pub fn queries(&self) -> Vec<(String, String)> {
        self.uri
            .query()
            .and_then(|q| serde_urlencoded::from_str::<Vec<(String, String)>>(q).ok())
            .unwrap_or_default()
    }

    /// The first query value under `name`.
    pub fn query(&self, name: &str) -> Option<String> {
        self.queries()
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    /// Request cookies.
    pub fn cookies(&self) -> Vec<Cookie<'static>> {
        self.header(hyper::header::COOKIE.as_str())
            .map(|raw| {
                raw.split(';')
                    .filter_map(|s| Cookie::parse(s.trim().to_string()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// A single request cookie.
    pub fn cookie(&self, name: &str) -> Option<Cookie<'static>> {
        self.cookies().into_iter().find(|c| c.name() == name)
    }

    /// The buffered request body. The first call drains the transport
    /// (bounded by the configured body limit); later calls return the same
    /// bytes.
    pub async fn body(&mut self) -> Result<Bytes, HandlerError> {
        if let Some(bytes) = &self.body_bytes {
            return Ok(bytes.clone());
        }

        let limit = self.app.config().body_limit;
        let mut body = self.body.take().ok_or_else(|| {
            HandlerError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                anyhow!("request body already consumed"),
            )
        })?;

        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.data().await {
            let chunk =
                chunk.map_err(|e| HandlerError::new(StatusCode::BAD_REQUEST, anyhow!(e)))?;
            if buffer.len() + chunk.len() > limit {
                return Err(BindError::BodyTooLarge { limit }.into_handler_error());
            }
            buffer.extend_from_slice(&chunk);
        }

        let bytes = buffer.freeze();
        self.body_bytes = Some(bytes.clone());
        Ok(bytes)
    }

    /// Resolves a lazily-provided component, materializing it on first
    /// access for this request. Fails when nothing was registered for `T`
    /// via [`App::provide`].
    pub fn component<T>(&mut self) -> Result<&T, HandlerError>
    where
        T: StateData,
    {
        if !self.state.has::<T>() {
            let factory = self.app.component_factory(TypeId::of::<T>()).ok_or_else(|| {
                HandlerError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    anyhow!("no component provided for `{}`", type_name::<T>()),
                )
            })?;
            let app = self.app.clone();
            let boxed = factory(&app);
            match boxed.downcast::<T>() {
                Ok(value) => self.state.put(*value),
                Err(_) => {
                    return Err(HandlerError::new(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        anyhow!("component factory produced a foreign type"),
                    ))
                }
            }
        }
        Ok(self.state.borrow::<T>())
    }

    /// Takes the transport-upgrade handle out of the request, if hyper
    /// provided one.
    pub(crate) fn take_upgrade(&mut self) -> Option<OnUpgrade> {
        self.extensions.remove::<OnUpgrade>()
    }

    pub(crate) fn set_route(&mut self, pattern: String, params: Params) {
        self.matched_pattern = Some(pattern);
        self.params = params;
    }

    pub(crate) fn set_chain(&mut self, chain: Vec<Middleware>) {
        self.advanced = vec![false; chain.len()];
        self.chain = chain;
        self.cursor = -1;
    }

    /// Replaces everything after the currently-executing handler with
    /// `rest`. Used by interceptors (the WebSocket upgrade) that divert the
    /// remainder of the pipeline.
    pub(crate) fn rewrite_remaining(&mut self, rest: Vec<Middleware>) {
        let keep = (self.cursor + 1) as usize;
        self.chain.truncate(keep);
        self.chain.extend(rest);
        self.advanced.resize(self.chain.len(), false);
    }

    /// Advances the chain cursor and invokes the next handler, returning
    /// once it (and everything it chose to run) finished. A handler that
    /// does not call `next` short-circuits the rest of the chain.
    ///
    /// # Panics
    ///
    /// Calling `next` twice from the same chain position is a programmer
    /// error and panics; the pipeline's recovery boundary turns that into a
    /// 500.
    pub async fn next(&mut self) -> HandlerResult {
        let caller = self.cursor;
        if caller >= 0 {
            let position = caller as usize;
            if self.advanced[position] {
                panic!("next() called twice from the same handler");
            }
            self.advanced[position] = true;
        }

        let position = caller + 1;
        if position as usize >= self.chain.len() {
            return Ok(());
        }

        let handler = self.chain[position as usize].clone();
        self.cursor = position;
        let result = handler.handle(self).await;
        self.cursor = caller;
        result
    }

    /// Consumes the context, producing the final response.
    pub(crate) fn into_response(self) -> hyper::Response<Body> {
        self.writer.into_response()
    }
}
