//! Arbor &ndash; a programmable HTTP application framework.
//!
//! An application routes requests through an ordered pipeline of middleware
//! and a single terminal handler. Routes carry static, `:named`, `{braced}`
//! and `*wildcard` segments; groups compose prefixes and middleware; the
//! context drives the chain cooperatively via [`Context::next`] and shapes
//! the response through its writer.
//!
//! ```no_run
//! use arbor::{App, Context, HandlerResult};
//! use hyper::StatusCode;
//!
//! async fn ping(ctx: &mut Context) -> HandlerResult {
//!     ctx.string(StatusCode::OK, "pong")
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let app = App::new();
//!     app.get("/ping", ping)?;
//!     arbor::start(":8080", app)
//! }
//! ```
#![warn(missing_docs)]

pub mod app;
pub mod config;
pub mod context;
pub mod handler;
pub mod http;
pub mod middleware;
pub mod router;
pub(crate) mod service;
pub mod state;
#[cfg(feature = "rustls")]
pub mod tls;
pub mod ws;

pub use crate::app::App;
pub use crate::config::{ListenAddr, Mode, ServerConfig, TlsOptions};
pub use crate::context::{BindError, Context, SseEvent, SseSender};
pub use crate::handler::{handler_fn, Handler, HandlerError, HandlerResult};
pub use crate::middleware::Middleware;
pub use crate::router::group::Group;
pub use crate::router::{Params, RouteError};
pub use crate::ws::WebSocketOptions;

use hyper::server::conn::Http;
use log::{debug, info, warn};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::runtime::Runtime;

use crate::service::ArborService;

/// Starts the application with the default number of worker threads.
pub fn start(addr: &str, app: App) -> anyhow::Result<()> {
    start_with_threads(addr, app, num_cpus::get())
}

/// Starts the application with a designated number of worker threads.
pub fn start_with_threads(addr: &str, app: App, threads: usize) -> anyhow::Result<()> {
    let runtime = new_runtime(threads)?;
    runtime.block_on(init_server(addr, app))
}

/// Returns a future serving the application, for callers that already run
/// their own runtime or need shutdown wiring.
pub async fn init_server(addr: &str, app: App) -> anyhow::Result<()> {
    match config::parse_addr(addr)? {
        config::ListenAddr::Tcp { host, port, scheme } => {
            let listener = TcpListener::bind((host.as_str(), port)).await?;
            info!(
                target: "arbor::start",
                " Arbor listening on {}://{}",
                scheme,
                listener.local_addr()?
            );
            bind_server(listener, app).await
        }
        #[cfg(unix)]
        config::ListenAddr::Unix(path) => {
            let _ = tokio::fs::remove_file(&path).await;
            let listener = UnixListener::bind(&path)?;
            info!(
                target: "arbor::start",
                " Arbor listening on unix://{}",
                path.display()
            );
            bind_server_unix(listener, app).await
        }
        #[cfg(not(unix))]
        config::ListenAddr::Unix(_) => {
            Err(anyhow::anyhow!("unix listeners are not supported here"))
        }
    }
}

/// Starts the application over TLS. Build the configuration with
/// [`tls::server_config`].
#[cfg(feature = "rustls")]
pub fn start_with_tls(
    addr: &str,
    app: App,
    tls_config: tokio_rustls::rustls::ServerConfig,
) -> anyhow::Result<()> {
    let runtime = new_runtime(num_cpus::get())?;
    runtime.block_on(init_server_tls(addr, app, tls_config))
}

/// The TLS analogue of [`init_server`]; TCP addresses only.
#[cfg(feature = "rustls")]
pub async fn init_server_tls(
    addr: &str,
    app: App,
    tls_config: tokio_rustls::rustls::ServerConfig,
) -> anyhow::Result<()> {
    use std::sync::Arc;
    use tokio_rustls::TlsAcceptor;

    let (host, port, scheme) = match config::parse_addr(addr)? {
        config::ListenAddr::Tcp { host, port, .. } => (host, port, "https"),
        config::ListenAddr::Unix(_) => {
            return Err(anyhow::anyhow!("TLS serving requires a TCP address"))
        }
    };

    let listener = TcpListener::bind((host.as_str(), port)).await?;
    info!(
        target: "arbor::start",
        " Arbor listening on {}://{}",
        scheme,
        listener.local_addr()?
    );

    let service = ArborService::new(app);
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));
    let protocol = Http::new();

    loop {
        let (socket, client_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept error: {}", e);
                continue;
            }
        };

        let connected = service.connect(Some(client_addr));
        let acceptor = acceptor.clone();
        let protocol = protocol.clone();
        tokio::spawn(async move {
            match acceptor.accept(socket).await {
                Ok(stream) => {
                    let conn = protocol.serve_connection(stream, connected).with_upgrades();
                    if let Err(e) = conn.await {
                        debug!("connection error: {}", e);
                    }
                }
                Err(e) => debug!("TLS handshake error: {}", e),
            }
        });
    }
}

/// Serves connections from an already-bound listener. Useful for tests and
/// for callers that manage their own sockets.
pub async fn bind_server(listener: TcpListener, app: App) -> anyhow::Result<()> {
    let service = ArborService::new(app);
    let protocol = Http::new();

    loop {
        let (socket, client_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept error: {}", e);
                continue;
            }
        };

        let connected = service.connect(Some(client_addr));
        let conn = protocol.serve_connection(socket, connected).with_upgrades();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("connection error: {}", e);
            }
        });
    }
}

#[cfg(unix)]
async fn bind_server_unix(listener: UnixListener, app: App) -> anyhow::Result<()> {
    let service = ArborService::new(app);
    let protocol = Http::new();

    loop {
        let (socket, _) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("accept error: {}", e);
                continue;
            }
        };

        let connected = service.connect(None);
        let conn = protocol.serve_connection(socket, connected).with_upgrades();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("connection error: {}", e);
            }
        });
    }
}

fn new_runtime(threads: usize) -> anyhow::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads)
        .thread_name("arbor-worker")
        .enable_all()
        .build()
        .map_err(Into::into)
}
