//! Defines `Middleware`, a reusable unit of logic that applies to a group
//! of requests by being attached to a router group.
//!
//! Middleware and terminal handlers share the [`Handler`] trait; middleware
//! simply occupies an earlier position in the assembled chain and calls
//! [`crate::context::Context::next`] to keep the request moving.

pub mod logger;
pub mod recovery;

use std::sync::Arc;

use crate::handler::{handler_fn, AsyncHandler, Handler};

/// A shared handler occupying a position in a request chain. De-duplication
/// across nested groups is by `Arc` identity, so registering the same value
/// on a parent and a child runs it once.
pub type Middleware = Arc<dyn Handler>;

/// Wraps an `async fn(&mut Context) -> HandlerResult` as [`Middleware`].
pub fn from_fn<F>(f: F) -> Middleware
where
    F: for<'a> AsyncHandler<'a> + 'static,
{
    Arc::new(handler_fn(f))
}
