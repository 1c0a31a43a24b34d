//! The application value: owns the route index, the group registry, the
//! middleware-chain cache and the lazy component registry.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use hyper::{Body, Method, Request, Response, StatusCode};
use log::error;

use crate::config::ServerConfig;
use crate::context::Context;
use crate::handler::assets::StaticOptions;
use crate::handler::proxy::ProxyOptions;
use crate::handler::rpc::RpcRegistry;
use crate::handler::{handler_fn, AsyncHandler, Handler, HandlerResult};
use crate::middleware::Middleware;
use crate::router::chain::{push_unique, ChainCache};
use crate::router::group::{new_group_data, Group, GroupData};
use crate::router::{RouteError, Router};
use crate::state::StateData;
use crate::ws::WebSocketOptions;

pub(crate) type ComponentFactory = Arc<dyn Fn(&App) -> Box<dyn Any + Send> + Send + Sync>;

pub(crate) struct AppInner {
    pub(crate) router: RwLock<Router>,
    pub(crate) groups: RwLock<Vec<GroupData>>,
    pub(crate) chains: ChainCache,
    pub(crate) not_found: RwLock<Middleware>,
    pub(crate) components: RwLock<HashMap<TypeId, ComponentFactory>>,
    pub(crate) config: RwLock<ServerConfig>,
}

/// An Arbor application. Cheap to clone; all clones share the same
/// registries. Routes and middleware are registered up front, after which
/// the application serves requests read-mostly.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

async fn default_not_found(ctx: &mut Context) -> HandlerResult {
    ctx.string(StatusCode::NOT_FOUND, "404 Not Found")
}

macro_rules! delegate_verb {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub fn $name<F>(&self, path: &str, handler: F) -> Result<(), RouteError>
        where
            F: for<'a> AsyncHandler<'a> + 'static,
        {
            self.root().$name(path, handler)
        }
    };
}

impl App {
    /// Creates an application with an empty root group at `/` and
    /// configuration drawn from the environment.
    pub fn new() -> App {
        App::with_config(ServerConfig::from_env())
    }

    /// Creates an application with explicit configuration.
    pub fn with_config(config: ServerConfig) -> App {
        let app = App {
            inner: Arc::new(AppInner {
                router: RwLock::new(Router::new()),
                groups: RwLock::new(Vec::new()),
                chains: ChainCache::new(),
                not_found: RwLock::new(Arc::new(handler_fn(default_not_found))),
                components: RwLock::new(HashMap::new()),
                config: RwLock::new(config),
            }),
        };
        app.register_group("/".to_string(), None);
        app
    }

    pub(crate) fn from_inner(inner: Arc<AppInner>) -> App {
        App { inner }
    }

    pub(crate) fn inner(&self) -> &AppInner {
        &self.inner
    }

    /// A copy of the active configuration.
    pub fn config(&self) -> ServerConfig {
        self.inner.config.read().unwrap().clone()
    }

    pub(crate) fn register_group(&self, prefix: String, parent: Option<usize>) -> Group {
        let id = {
            let mut groups = self.inner.groups.write().unwrap();
            groups.push(new_group_data(prefix, parent));
            groups.len() - 1
        };
        self.inner.chains.invalidate();
        Group {
            id,
            app: Arc::downgrade(&self.inner),
        }
    }

    /// The root group (`/`).
    pub fn root(&self) -> Group {
        Group {
            id: 0,
            app: Arc::downgrade(&self.inner),
        }
    }

    /// Creates a child of the root group.
    pub fn group(&self, prefix: &str) -> Group {
        self.root().group(prefix)
    }

    /// Creates a child of the root group and synchronously configures it.
    pub fn group_with<F>(&self, prefix: &str, configure: F) -> Group
    where
        F: FnOnce(&Group),
    {
        self.root().group_with(prefix, configure)
    }

    /// Appends middleware to the root group.
    pub fn use_middleware(&self, middleware: Middleware) {
        self.root().use_middleware(middleware)
    }

    /// Replaces the handler run when no route matches.
    pub fn not_found<F>(&self, handler: F)
    where
        F: for<'a> AsyncHandler<'a> + 'static,
    {
        *self.inner.not_found.write().unwrap() = Arc::new(handler_fn(handler));
    }

    /// Registers a lazily-materialized component. The factory runs at most
    /// once per request, on first access through
    /// [`Context::component`](crate::context::Context::component).
    pub fn provide<T, F>(&self, factory: F)
    where
        T: StateData,
        F: Fn(&App) -> T + Send + Sync + 'static,
    {
        let wrapped: ComponentFactory = Arc::new(move |app| Box::new(factory(app)));
        self.inner
            .components
            .write()
            .unwrap()
            .insert(TypeId::of::<T>(), wrapped);
    }

    pub(crate) fn component_factory(&self, id: TypeId) -> Option<ComponentFactory> {
        self.inner.components.read().unwrap().get(&id).cloned()
    }

    delegate_verb!(
        /// Registers a GET route on the root group.
        get
    );
    delegate_verb!(
        /// Registers a POST route on the root group.
        post
    );
    delegate_verb!(
        /// Registers a PUT route on the root group.
        put
    );
    delegate_verb!(
        /// Registers a PATCH route on the root group.
        patch
    );
    delegate_verb!(
        /// Registers a DELETE route on the root group.
        delete
    );
    delegate_verb!(
        /// Registers a HEAD route on the root group.
        head
    );
    delegate_verb!(
        /// Registers an OPTIONS route on the root group.
        options
    );
    delegate_verb!(
        /// Registers a CONNECT route on the root group.
        connect
    );

    /// Registers the handler for every supported method on the root group.
    pub fn any<F>(&self, path: &str, handler: F) -> Result<(), RouteError>
    where
        F: for<'a> AsyncHandler<'a> + 'static,
    {
        self.root().any(path, handler)
    }

    /// Registers a handler on the root group.
    pub fn handle<H>(&self, method: Method, path: &str, handler: H) -> Result<(), RouteError>
    where
        H: Handler,
    {
        self.root().handle(method, path, handler)
    }

    /// Registers an explicit handler list on the root group.
    pub fn handle_chain(
        &self,
        method: Method,
        path: &str,
        handlers: Vec<Middleware>,
    ) -> Result<(), RouteError> {
        self.root().handle_chain(method, path, handlers)
    }

    /// Serves static files from the root group.
    pub fn static_dir<P>(&self, path: &str, root: P, options: StaticOptions) -> Result<(), RouteError>
    where
        P: Into<PathBuf>,
    {
        self.root().static_dir(path, root, options)
    }

    /// Installs a reverse proxy on the root group.
    pub fn proxy(&self, prefix: &str, target: &str, options: ProxyOptions) -> anyhow::Result<()> {
        self.root().proxy(prefix, target, options)
    }

    /// Installs a WebSocket endpoint on the root group.
    pub fn web_socket(&self, path: &str, options: WebSocketOptions) {
        self.root().web_socket(path, options)
    }

    /// Delegates a POST endpoint on the root group to a JSON-RPC registry.
    pub fn json_rpc(&self, path: &str, registry: Arc<dyn RpcRegistry>) -> Result<(), RouteError> {
        self.root().json_rpc(path, registry)
    }

    /// Runs one request through the full pipeline and returns the response.
    /// This is the seam the hyper service uses, and the natural entry point
    /// for tests.
    pub async fn handle_request(&self, req: Request<Body>) -> Response<Body> {
        crate::service::call_handler(self.clone(), None, req).await
    }

    /// Serves the application, parsing `addr` per the listener-address
    /// grammar (`:port`, `host:port`, `http://host:port`, `unix://path`).
    pub fn run(&self, addr: &str) -> anyhow::Result<()> {
        crate::start(addr, self.clone())
    }

    /// Assembles the chain for the request in `ctx` and drives it to
    /// completion, flushing the writer afterwards.
    pub(crate) async fn dispatch(&self, ctx: &mut Context) {
        let matched = {
            let router = self.inner.router.read().unwrap();
            router.lookup(ctx.method(), &ctx.path())
        };

        let mut chain = {
            let groups = self.inner.groups.read().unwrap();
            self.inner.chains.collect(&groups, &ctx.path())
        };

        match matched {
            Some(route) => {
                ctx.set_route(route.pattern, route.params);
                for handler in route.handlers.iter() {
                    push_unique(&mut chain, handler.clone());
                }
            }
            None => {
                let not_found = self.inner.not_found.read().unwrap().clone();
                push_unique(&mut chain, not_found);
            }
        }

        ctx.set_chain(chain);
        if let Err(err) = ctx.next().await {
            error!(
                "[{}] handler error: {} ({})",
                ctx.request_id(),
                err.status(),
                err.cause()
            );
            ctx.render_error(err);
        }

        if !ctx.writer().written() {
            ctx.writer_mut().write_header_now();
        }
    }
}

impl Default for App {
    fn default() -> App {
        App::new()
    }
}
