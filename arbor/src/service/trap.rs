//! Processes a request through the pipeline, trapping panics so they
//! surface as `500 Internal Server Error` responses instead of tearing down
//! the connection task.

use std::any::Any;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;

use futures_util::FutureExt;
use hyper::header::{HeaderValue, ACCEPT, CONTENT_TYPE};
use hyper::{Body, Request, Response, StatusCode};
use log::error;

use crate::app::App;
use crate::context::wants_json;
use crate::context::Context;
use crate::state::request_id::{self, X_REQUEST_ID};

/// Builds a context for the request, runs the dispatcher and finalizes the
/// response. A panic anywhere inside is trapped and rendered as a 500 in
/// the shape selected by the request's `Accept` header. The request id is
/// resolved out here, ahead of the boundary, so that the panic path still
/// logs and echoes it.
pub(crate) async fn call_handler(
    app: App,
    client_addr: Option<SocketAddr>,
    req: Request<Body>,
) -> Response<Body> {
    let accept = req
        .headers()
        .get(ACCEPT)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());
    let request_id = request_id::resolve(req.headers());
    let echo = HeaderValue::from_str(&request_id).ok();

    let run = {
        let request_id = request_id.clone();
        AssertUnwindSafe(async move {
            let mut ctx = Context::new(app.clone(), req, client_addr, request_id);
            app.dispatch(&mut ctx).await;
            ctx.into_response()
        })
        .catch_unwind()
    };

    let mut response = match run.await {
        Ok(response) => response,
        Err(payload) => {
            error!(
                "[{}] panic while serving the request: {}",
                request_id,
                describe_panic(payload.as_ref())
            );
            error_response(
                accept.as_deref(),
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Server Error",
            )
        }
    };

    if let Some(value) = echo {
        response.headers_mut().entry(X_REQUEST_ID).or_insert(value);
    }
    response
}

/// Renders the message a panic payload carries, when it carries one.
pub(crate) fn describe_panic(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic payload of unknown type".to_string()
    }
}

/// An error response built without a context, for failures outside the
/// pipeline. Shape follows the request's `Accept` header.
pub(crate) fn error_response(
    accept: Option<&str>,
    status: StatusCode,
    message: &str,
) -> Response<Body> {
    let (content_type, body) = if wants_json(accept) {
        (
            mime::APPLICATION_JSON.as_ref(),
            serde_json::json!({ "code": status.as_u16(), "message": message }).to_string(),
        )
    } else {
        (mime::TEXT_PLAIN_UTF_8.as_ref(), message.to_string())
    };

    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        CONTENT_TYPE,
        HeaderValue::from_str(content_type).unwrap_or_else(|_| HeaderValue::from_static("text/plain")),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_response_respects_accept() {
        let response = error_response(Some("application/json"), StatusCode::BAD_GATEWAY, "upstream");
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            mime::APPLICATION_JSON.as_ref()
        );

        let response = error_response(Some("text/plain"), StatusCode::BAD_GATEWAY, "upstream");
        assert_eq!(
            response.headers().get(CONTENT_TYPE).unwrap(),
            mime::TEXT_PLAIN_UTF_8.as_ref()
        );
    }

    #[test]
    fn panic_payloads_are_described() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(describe_panic(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new("boom".to_string());
        assert_eq!(describe_panic(payload.as_ref()), "boom");
    }
}
