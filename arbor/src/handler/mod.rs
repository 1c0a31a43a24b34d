//! Defines types for Arbor handlers.
//!
//! Handlers and middleware share one shape: an async function over a
//! mutable [`Context`]. A middleware keeps the request moving by calling
//! [`Context::next`]; the terminal handler simply writes a response. Plain
//! `async fn`s are adapted with [`handler_fn`], while built-in handlers
//! (static files, proxy, WebSocket upgrade) implement [`Handler`] directly.

use std::future::Future;

use async_trait::async_trait;

use crate::context::Context;

pub mod assets;
mod error;
pub mod proxy;
pub mod rpc;

pub use self::error::HandlerError;

/// The result of a single handler invocation. An `Err` that reaches the
/// pipeline edge without a written response is rendered through the
/// Accept-aware error page.
pub type HandlerResult = Result<(), HandlerError>;

/// A `Handler` receives the request context for some subset of requests to
/// the application. Middleware and terminal handlers both implement it; the
/// position in the assembled chain is the only difference between them.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Handles the request. Middleware implementations call
    /// `ctx.next().await` to keep the chain moving; not calling it
    /// short-circuits every handler after this one.
    async fn handle(&self, ctx: &mut Context) -> HandlerResult;
}

/// A family of async callables over `&mut Context`, parameterized by the
/// borrow lifetime. `async fn(&mut Context) -> HandlerResult` items satisfy
/// `for<'a> AsyncHandler<'a>`, which is what [`handler_fn`] requires.
pub trait AsyncHandler<'a>: Send + Sync {
    /// The future returned for a borrow of lifetime `'a`.
    type Fut: Future<Output = HandlerResult> + Send + 'a;

    /// Invokes the callable.
    fn call(&self, ctx: &'a mut Context) -> Self::Fut;
}

impl<'a, F, Fut> AsyncHandler<'a> for F
where
    F: Fn(&'a mut Context) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'a,
{
    type Fut = Fut;

    fn call(&self, ctx: &'a mut Context) -> Fut {
        self(ctx)
    }
}

/// Adapts a plain async function into a [`Handler`]. See [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> AsyncHandler<'a> + 'static,
{
    async fn handle(&self, ctx: &mut Context) -> HandlerResult {
        self.f.call(ctx).await
    }
}

/// Wraps an `async fn(&mut Context) -> HandlerResult` as a [`Handler`].
///
/// ```ignore
/// async fn ping(ctx: &mut Context) -> HandlerResult {
///     ctx.string("pong")
/// }
///
/// app.get("/ping", ping)?;
/// ```
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: for<'a> AsyncHandler<'a> + 'static,
{
    FnHandler { f }
}
