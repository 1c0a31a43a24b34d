//! WebSocket upgrade integrated into the HTTP pipeline.
//!
//! [`crate::router::group::Group::web_socket`] installs a group middleware
//! built from this module. Requests that satisfy the upgrade preconditions
//! are diverted to the handshake; everything else falls through to normal
//! routing, so a plain route may coexist on the same path.

pub(crate) mod session;

pub use self::session::{MessageKind, Session};

use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures_util::future::BoxFuture;
use hyper::header::{CONNECTION, UPGRADE};
use hyper::{Method, StatusCode};
use log::{debug, error};
use sha1::{Digest, Sha1};
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;

use crate::context::Context;
use crate::handler::{Handler, HandlerResult};
use crate::middleware::Middleware;

const PROTO_WEBSOCKET: &str = "websocket";
const SEC_WEBSOCKET_KEY: &str = "sec-websocket-key";
const SEC_WEBSOCKET_ACCEPT: &str = "sec-websocket-accept";

/// Callback invoked once the connection is established.
pub type ConnectHook = Arc<dyn Fn(Arc<Session>) -> BoxFuture<'static, ()> + Send + Sync>;
/// Callback for inbound text frames.
pub type TextHook = Arc<dyn Fn(Arc<Session>, String) -> BoxFuture<'static, ()> + Send + Sync>;
/// Callback for inbound binary frames.
pub type BinaryHook = Arc<dyn Fn(Arc<Session>, Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;
/// Callback for every inbound data frame, with its kind.
pub type MessageHook =
    Arc<dyn Fn(Arc<Session>, MessageKind, Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;
/// Callback for errors raised while running other callbacks.
pub type ErrorHook = Arc<dyn Fn(Arc<Session>, anyhow::Error) -> BoxFuture<'static, ()> + Send + Sync>;
/// Callback invoked exactly once after the read loop exits.
pub type DisconnectHook = Arc<dyn Fn(Arc<Session>) -> BoxFuture<'static, ()> + Send + Sync>;
/// Callback replacing the default ping/pong behavior.
pub type ControlHook = Arc<dyn Fn(Arc<Session>, Vec<u8>) -> BoxFuture<'static, ()> + Send + Sync>;

pub(crate) struct Callbacks {
    pub(crate) on_connect: Option<ConnectHook>,
    pub(crate) on_text: Option<TextHook>,
    pub(crate) on_binary: Option<BinaryHook>,
    pub(crate) on_message: Option<MessageHook>,
    pub(crate) on_error: Option<ErrorHook>,
    pub(crate) on_disconnect: Option<DisconnectHook>,
    pub(crate) on_ping: Option<ControlHook>,
    pub(crate) on_pong: Option<ControlHook>,
}

/// The connection-oriented lifecycle for one WebSocket endpoint. By
/// default pings are answered with pongs and pongs are ignored; every hook
/// here overrides or extends that behavior.
pub struct WebSocketOptions {
    middlewares: Vec<Middleware>,
    callbacks: Callbacks,
}

impl Default for WebSocketOptions {
    fn default() -> WebSocketOptions {
        WebSocketOptions::new()
    }
}

macro_rules! hook {
    ($(#[$doc:meta])* $name:ident, $field:ident, ($($arg:ident: $ty:ty),*)) => {
        $(#[$doc])*
        pub fn $name<F, Fut>(mut self, f: F) -> Self
        where
            F: Fn(Arc<Session>, $($ty),*) -> Fut + Send + Sync + 'static,
            Fut: std::future::Future<Output = ()> + Send + 'static,
        {
            self.callbacks.$field = Some(Arc::new(move |session, $($arg),*| {
                Box::pin(f(session, $($arg),*))
            }));
            self
        }
    };
}

impl WebSocketOptions {
    /// Empty options: the endpoint accepts connections, answers pings and
    /// discards data frames.
    pub fn new() -> WebSocketOptions {
        WebSocketOptions {
            middlewares: Vec::new(),
            callbacks: Callbacks {
                on_connect: None,
                on_text: None,
                on_binary: None,
                on_message: None,
                on_error: None,
                on_disconnect: None,
                on_ping: None,
                on_pong: None,
            },
        }
    }

    /// Appends middleware run after the upgrade preconditions pass and
    /// before the handshake.
    pub fn middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    /// Sets the connect callback, run on its own task.
    pub fn on_connect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.callbacks.on_connect = Some(Arc::new(move |session| Box::pin(f(session))));
        self
    }

    /// Sets the disconnect callback, run exactly once after the read loop
    /// exits.
    pub fn on_disconnect<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.callbacks.on_disconnect = Some(Arc::new(move |session| Box::pin(f(session))));
        self
    }

    hook!(
        /// Sets the text-frame callback.
        on_text_message,
        on_text,
        (text: String)
    );
    hook!(
        /// Sets the binary-frame callback.
        on_binary_message,
        on_binary,
        (data: Vec<u8>)
    );
    hook!(
        /// Sets the error callback; receives failures and panics from other
        /// callbacks.
        on_error,
        on_error,
        (error: anyhow::Error)
    );
    hook!(
        /// Overrides the default reply-with-pong ping handler.
        on_ping,
        on_ping,
        (payload: Vec<u8>)
    );
    hook!(
        /// Overrides the default no-op pong handler.
        on_pong,
        on_pong,
        (payload: Vec<u8>)
    );

    /// Sets the kind-tagged data-frame callback.
    pub fn on_message<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Arc<Session>, MessageKind, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        self.callbacks.on_message = Some(Arc::new(move |session, kind, data| {
            Box::pin(f(session, kind, data))
        }));
        self
    }
}

/// The group middleware performing upgrade detection and, when the
/// preconditions hold, diverting the remaining chain to the handshake.
pub(crate) struct WebSocketUpgrade {
    path: String,
    middlewares: Vec<Middleware>,
    callbacks: Arc<Callbacks>,
}

impl WebSocketUpgrade {
    pub(crate) fn new(path: String, options: WebSocketOptions) -> WebSocketUpgrade {
        WebSocketUpgrade {
            path,
            middlewares: options.middlewares,
            callbacks: Arc::new(options.callbacks),
        }
    }

    // Any failed precondition short-circuits back to plain HTTP.
    fn requested(&self, ctx: &Context) -> bool {
        ctx.method() == &Method::GET
            && ctx.path() == self.path
            && header_has_token(ctx, CONNECTION.as_str(), "upgrade")
            && ctx
                .header(UPGRADE.as_str())
                .map(|v| v.eq_ignore_ascii_case(PROTO_WEBSOCKET))
                .unwrap_or(false)
    }
}

fn header_has_token(ctx: &Context, name: &str, token: &str) -> bool {
    ctx.header(name)
        .map(|v| v.split(',').any(|part| part.trim().eq_ignore_ascii_case(token)))
        .unwrap_or(false)
}

#[async_trait]
impl Handler for WebSocketUpgrade {
    async fn handle(&self, ctx: &mut Context) -> HandlerResult {
        if !self.requested(ctx) {
            return ctx.next().await;
        }

        debug!("[{}] websocket upgrade requested", ctx.request_id());
        let mut rest = self.middlewares.clone();
        rest.push(Arc::new(Handshake {
            callbacks: self.callbacks.clone(),
        }) as Middleware);
        ctx.rewrite_remaining(rest);
        ctx.next().await
    }
}

struct Handshake {
    callbacks: Arc<Callbacks>,
}

#[async_trait]
impl Handler for Handshake {
    async fn handle(&self, ctx: &mut Context) -> HandlerResult {
        let key = match ctx.header(SEC_WEBSOCKET_KEY) {
            Some(key) => key,
            None => return ctx.error(StatusCode::BAD_REQUEST, "missing Sec-WebSocket-Key"),
        };
        let on_upgrade = match ctx.take_upgrade() {
            Some(on_upgrade) => on_upgrade,
            None => return ctx.error(StatusCode::BAD_REQUEST, "connection is not upgradable"),
        };

        ctx.set_header(UPGRADE.as_str(), PROTO_WEBSOCKET)?;
        ctx.set_header(CONNECTION.as_str(), "Upgrade")?;
        ctx.set_header(SEC_WEBSOCKET_ACCEPT, &accept_key(key.as_bytes()))?;
        ctx.set_status(StatusCode::SWITCHING_PROTOCOLS);
        ctx.writer_mut().hijack();

        let callbacks = self.callbacks.clone();
        let request_id = ctx.request_id().to_string();
        tokio::spawn(async move {
            match on_upgrade.await {
                Ok(upgraded) => {
                    let stream =
                        WebSocketStream::from_raw_socket(upgraded, Role::Server, None).await;
                    session::run(stream, callbacks, request_id).await;
                }
                Err(e) => error!("[{}] websocket upgrade failed: {}", request_id, e),
            }
        });

        Ok(())
    }
}

/// RFC 6455 `Sec-WebSocket-Accept` derivation.
pub(crate) fn accept_key(key: &[u8]) -> String {
    const WS_GUID: &[u8] = b"258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
    let mut sha1 = Sha1::new();
    sha1.update(key);
    sha1.update(WS_GUID);
    STANDARD.encode(sha1.finalize())
}
