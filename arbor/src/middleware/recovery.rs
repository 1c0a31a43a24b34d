//! Middleware that traps panics from deeper in the chain.
//!
//! The service installs an outermost trap of its own, so nothing escapes
//! either way; installing this at the root group is the conventional way to
//! get request-scoped logging and a well-shaped error page for panics.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use futures_util::FutureExt;
use hyper::StatusCode;
use log::error;

use crate::context::Context;
use crate::handler::{Handler, HandlerError, HandlerResult};
use crate::middleware::Middleware;
use crate::service::describe_panic;

/// See [`recovery`].
pub struct Recovery;

#[async_trait]
impl Handler for Recovery {
    async fn handle(&self, ctx: &mut Context) -> HandlerResult {
        match AssertUnwindSafe(ctx.next()).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => {
                let message = describe_panic(payload.as_ref());
                error!("[{}] recovered from panic: {}", ctx.request_id(), message);
                Err(HandlerError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    anyhow!("handler panicked: {}", message),
                ))
            }
        }
    }
}

/// Builds the recovery middleware: panics below it become a logged
/// [`HandlerError`] with status 500, and the pipeline continues normally.
pub fn recovery() -> Middleware {
    Arc::new(Recovery)
}
