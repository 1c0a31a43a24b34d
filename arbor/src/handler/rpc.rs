//! The seam through which a JSON-RPC registry plugs into the router.
//!
//! The registry itself (method table, envelope validation) is an external
//! collaborator; the framework only owns the POST endpoint that feeds it.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use hyper::StatusCode;

use crate::context::Context;
use crate::handler::{Handler, HandlerError, HandlerResult};

/// Implemented by an external JSON-RPC registry. Receives the raw request
/// payload and returns the raw response payload.
#[async_trait]
pub trait RpcRegistry: Send + Sync + 'static {
    /// Processes one RPC payload.
    async fn handle(&self, payload: Bytes) -> anyhow::Result<Bytes>;
}

/// The POST handler installed by
/// [`crate::router::group::Group::json_rpc`].
pub struct RpcHandler {
    registry: Arc<dyn RpcRegistry>,
}

impl RpcHandler {
    pub(crate) fn new(registry: Arc<dyn RpcRegistry>) -> RpcHandler {
        RpcHandler { registry }
    }
}

#[async_trait]
impl Handler for RpcHandler {
    async fn handle(&self, ctx: &mut Context) -> HandlerResult {
        let payload = ctx.body().await?;
        let reply = self
            .registry
            .handle(payload)
            .await
            .map_err(|e| HandlerError::new(StatusCode::INTERNAL_SERVER_ERROR, e))?;
        ctx.data(StatusCode::OK, mime::APPLICATION_JSON, &reply)
    }
}
