//! Defines the service type which wraps an application and interfaces with
//! hyper.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context as TaskContext, Poll};

use hyper::service::Service;
use hyper::{Body, Request, Response};

use crate::app::App;

mod trap;

pub(crate) use self::trap::{call_handler, describe_panic};

/// Wraps an [`App`] for serving. Bound per connection to a
/// [`ConnectedArborService`] carrying the peer address (hyper does not
/// expose it otherwise).
pub(crate) struct ArborService {
    app: App,
}

impl ArborService {
    pub(crate) fn new(app: App) -> ArborService {
        ArborService { app }
    }

    pub(crate) fn connect(&self, client_addr: Option<SocketAddr>) -> ConnectedArborService {
        ConnectedArborService {
            app: self.app.clone(),
            client_addr,
        }
    }
}

/// An [`ArborService`] bound to one client connection.
pub(crate) struct ConnectedArborService {
    app: App,
    client_addr: Option<SocketAddr>,
}

impl Service<Request<Body>> for ConnectedArborService {
    type Response = Response<Body>;
    type Error = anyhow::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let app = self.app.clone();
        let client_addr = self.client_addr;
        Box::pin(async move { Ok(call_handler(app, client_addr, req).await) })
    }
}
