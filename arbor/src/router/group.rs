//! Router groups: prefix composition and middleware accumulation.
//!
//! Groups form a tree rooted at the application's root group. The
//! application owns every group through a flat registry; a `Group` value is
//! only a handle (id plus a non-owning application reference), so handles
//! may be cloned and dropped freely without touching the registry.

use std::path::PathBuf;
use std::sync::{Arc, Weak};

use hyper::Method;

use crate::app::{App, AppInner};
use crate::handler::assets::{StaticHandler, StaticOptions};
use crate::handler::proxy::{ProxyHandler, ProxyOptions};
use crate::handler::rpc::{RpcHandler, RpcRegistry};
use crate::handler::{handler_fn, AsyncHandler, Handler};
use crate::middleware::Middleware;
use crate::router::pattern::{join_paths, tokenize, RouteError, Segment};
use crate::ws::{WebSocketOptions, WebSocketUpgrade};

/// Registry record for one group. The registry index is the group id, and
/// parent links are ids, keeping the tree free of ownership cycles.
pub(crate) struct GroupData {
    pub(crate) prefix: String,
    pub(crate) segments: Vec<Segment>,
    pub(crate) parent: Option<usize>,
    pub(crate) middlewares: Vec<Middleware>,
}

/// A handle to a registered router group.
#[derive(Clone)]
pub struct Group {
    pub(crate) id: usize,
    pub(crate) app: Weak<AppInner>,
}

macro_rules! verb {
    ($(#[$doc:meta])* $name:ident, $method:expr) => {
        $(#[$doc])*
        pub fn $name<F>(&self, path: &str, handler: F) -> Result<(), RouteError>
        where
            F: for<'a> AsyncHandler<'a> + 'static,
        {
            self.handle($method, path, handler_fn(handler))
        }
    };
}

impl Group {
    fn app(&self) -> App {
        App::from_inner(
            self.app
                .upgrade()
                .expect("application was dropped while a Group handle was in use"),
        )
    }

    /// The group's absolute prefix.
    pub fn prefix(&self) -> String {
        let app = self.app();
        let groups = app.inner().groups.read().unwrap();
        groups[self.id].prefix.clone()
    }

    /// Creates (and registers) a child group. The child prefix is
    /// `join(self.prefix, prefix)`.
    pub fn group(&self, prefix: &str) -> Group {
        let app = self.app();
        let joined = join_paths(&self.prefix(), prefix);
        app.register_group(joined, Some(self.id))
    }

    /// Creates a child group and synchronously invokes `configure` with it.
    pub fn group_with<F>(&self, prefix: &str, configure: F) -> Group
    where
        F: FnOnce(&Group),
    {
        let group = self.group(prefix);
        configure(&group);
        group
    }

    /// Appends middleware to this group. Every route registered under this
    /// group (and its descendants) runs it, after the ancestors'
    /// middleware.
    pub fn use_middleware(&self, middleware: Middleware) {
        let app = self.app();
        {
            let mut groups = app.inner().groups.write().unwrap();
            groups[self.id].middlewares.push(middleware);
        }
        app.inner().chains.invalidate();
    }

    /// Registers a handler for `(method, join(prefix, path))`.
    pub fn handle<H>(&self, method: Method, path: &str, handler: H) -> Result<(), RouteError>
    where
        H: Handler,
    {
        self.handle_chain(method, path, vec![Arc::new(handler)])
    }

    /// Registers an explicit handler list (route-level middleware followed
    /// by the terminal handler) for `(method, join(prefix, path))`. The
    /// list runs in order after the effective group chain.
    pub fn handle_chain(
        &self,
        method: Method,
        path: &str,
        handlers: Vec<Middleware>,
    ) -> Result<(), RouteError> {
        let app = self.app();
        let full = join_paths(&self.prefix(), path);
        let result = app
            .inner()
            .router
            .write()
            .unwrap()
            .register(method, &full, handlers);
        result
    }

    verb!(
        /// Registers a GET route.
        get,
        Method::GET
    );
    verb!(
        /// Registers a POST route.
        post,
        Method::POST
    );
    verb!(
        /// Registers a PUT route.
        put,
        Method::PUT
    );
    verb!(
        /// Registers a PATCH route.
        patch,
        Method::PATCH
    );
    verb!(
        /// Registers a DELETE route.
        delete,
        Method::DELETE
    );
    verb!(
        /// Registers a HEAD route.
        head,
        Method::HEAD
    );
    verb!(
        /// Registers an OPTIONS route.
        options,
        Method::OPTIONS
    );
    verb!(
        /// Registers a CONNECT route.
        connect,
        Method::CONNECT
    );

    /// Registers the handler for every supported method.
    pub fn any<F>(&self, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: for<'a> AsyncHandler<'a> + 'static,
    {
        let shared: Middleware = Arc::new(handler_fn(handler));
        for method in any_methods() {
            self.handle_chain(method, path, vec![shared.clone()])?;
        }
        Ok(())
    }

    /// Installs a filesystem file server under `join(prefix, path)`. Files
    /// resolve against `root`; see [`StaticOptions`] for index-file,
    /// max-age, suffix and gzip behavior.
    pub fn static_dir<P>(&self, path: &str, root: P, options: StaticOptions) -> Result<(), RouteError>
    where
        P: Into<PathBuf>,
    {
        let handler: Middleware = Arc::new(StaticHandler::new(root.into(), options));
        let pattern = join_paths(path, "*filepath");
        self.handle_chain(Method::GET, &pattern, vec![handler.clone()])?;
        self.handle_chain(Method::HEAD, &pattern, vec![handler])
    }

    /// Installs a reverse proxy for everything under `join(self.prefix,
    /// prefix)`, forwarding to `target`.
    pub fn proxy(&self, prefix: &str, target: &str, options: ProxyOptions) -> anyhow::Result<()> {
        let guard = join_paths(&self.prefix(), prefix);
        let handler: Middleware = Arc::new(ProxyHandler::new(&guard, target, options)?);
        for method in any_methods() {
            self.handle_chain(method.clone(), prefix, vec![handler.clone()])?;
            self.handle_chain(method, &join_paths(prefix, "*proxy_path"), vec![handler.clone()])?;
        }
        Ok(())
    }

    /// Installs a WebSocket endpoint at `join(prefix, path)`.
    ///
    /// This attaches a group middleware rather than a route: requests that
    /// satisfy the upgrade preconditions are diverted to the handshake,
    /// anything else falls through to normal routing, so a plain route may
    /// coexist on the same path.
    pub fn web_socket(&self, path: &str, options: WebSocketOptions) {
        let full = join_paths(&self.prefix(), path);
        self.use_middleware(Arc::new(WebSocketUpgrade::new(full, options)));
    }

    /// Delegates `POST join(prefix, path)` to an external JSON-RPC
    /// registry.
    pub fn json_rpc(&self, path: &str, registry: Arc<dyn RpcRegistry>) -> Result<(), RouteError> {
        self.handle(Method::POST, path, RpcHandler::new(registry))
    }
}

pub(crate) fn any_methods() -> Vec<Method> {
    vec![
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::HEAD,
        Method::OPTIONS,
        Method::CONNECT,
    ]
}

pub(crate) fn new_group_data(prefix: String, parent: Option<usize>) -> GroupData {
    let segments = tokenize(&prefix);
    GroupData {
        prefix,
        segments,
        parent,
        middlewares: Vec::new(),
    }
}
