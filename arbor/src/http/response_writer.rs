//! The response-side bookkeeping for a single request.
//!
//! The writer buffers status, headers and body until the pipeline returns,
//! tracking the commit point the way a streaming transport would: the
//! status is free to change until the first body write, and frozen (with a
//! warning) afterwards.

use bytes::BytesMut;
use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use hyper::{Body, Response, StatusCode};
use log::warn;

enum BodyState {
    /// Body bytes accumulate in memory and flush when the chain returns.
    Buffer(BytesMut),
    /// The body was switched to a channel (server-sent events); the
    /// receiving half is stored here until finalization.
    Channel(Body),
    /// The underlying connection was surrendered (WebSocket upgrade); the
    /// response carries only the already-committed head.
    Hijacked,
}

/// Wraps response production for one request.
///
/// Invariants:
/// - the status may be set any number of times before the first write or
///   [`ResponseWriter::write_header_now`]; later changes are logged and
///   ignored;
/// - [`ResponseWriter::written`] is true iff at least a zero-length body
///   commit happened (`size >= 0`);
/// - [`ResponseWriter::hijack`] forces `size = 0` and commits the header.
pub struct ResponseWriter {
    status: StatusCode,
    headers: HeaderMap,
    size: i64,
    committed: bool,
    body: BodyState,
}

impl ResponseWriter {
    pub(crate) fn new() -> ResponseWriter {
        ResponseWriter {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            size: -1,
            committed: false,
            body: BodyState::Buffer(BytesMut::new()),
        }
    }

    /// The effective status: the default 200, or the first value frozen by
    /// the commit point, or the latest value set before it.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Sets the response status. Ignored with a warning once the header has
    /// been committed by a write, [`ResponseWriter::write_header_now`] or a
    /// hijack.
    pub fn set_status(&mut self, status: StatusCode) {
        if self.committed {
            warn!(
                "headers already written; ignoring status change {} -> {}",
                self.status, status
            );
            return;
        }
        self.status = status;
    }

    /// True once the header can no longer change.
    pub fn header_written(&self) -> bool {
        self.committed
    }

    /// True iff a body commit happened (`size >= 0`).
    pub fn written(&self) -> bool {
        self.size >= 0
    }

    /// Number of body bytes written so far; `-1` before the first commit.
    pub fn size(&self) -> i64 {
        self.size
    }

    /// Response headers, mutable until finalization.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    /// Commits the header without writing a body byte.
    pub fn write_header_now(&mut self) {
        self.committed = true;
        if self.size < 0 {
            self.size = 0;
        }
    }

    /// Appends body bytes, committing the header on the first call.
    pub fn write(&mut self, data: &[u8]) {
        match &mut self.body {
            BodyState::Buffer(buffer) => {
                self.committed = true;
                if self.size < 0 {
                    self.size = 0;
                }
                self.size += data.len() as i64;
                buffer.extend_from_slice(data);
            }
            BodyState::Channel(_) => {
                warn!("response body is streaming; ignoring buffered write");
            }
            BodyState::Hijacked => {
                warn!("connection was hijacked; ignoring write");
            }
        }
    }

    /// Surrenders the underlying connection. The header counts as
    /// committed and the body as written (empty), so the pipeline will not
    /// flush anything further.
    pub fn hijack(&mut self) {
        self.committed = true;
        self.size = 0;
        self.body = BodyState::Hijacked;
    }

    /// True once [`ResponseWriter::hijack`] was called.
    pub fn hijacked(&self) -> bool {
        matches!(self.body, BodyState::Hijacked)
    }

    /// Switches the body to a channel and hands back the sending half.
    /// Returns `None` if a body was already produced some other way.
    pub(crate) fn stream(&mut self) -> Option<hyper::body::Sender> {
        match &self.body {
            BodyState::Buffer(buffer) if buffer.is_empty() => {
                let (sender, body) = Body::channel();
                self.committed = true;
                if self.size < 0 {
                    self.size = 0;
                }
                self.body = BodyState::Channel(body);
                Some(sender)
            }
            _ => None,
        }
    }

    /// Builds the final `hyper` response.
    pub(crate) fn into_response(self) -> Response<Body> {
        let body = match self.body {
            BodyState::Buffer(buffer) => Body::from(buffer.freeze()),
            BodyState::Channel(body) => body,
            BodyState::Hijacked => Body::empty(),
        };

        let mut response = Response::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_defaults_to_ok_and_floats_until_commit() {
        let mut w = ResponseWriter::new();
        assert_eq!(w.status(), StatusCode::OK);
        w.set_status(StatusCode::NOT_FOUND);
        w.set_status(StatusCode::ACCEPTED);
        assert_eq!(w.status(), StatusCode::ACCEPTED);
        assert!(!w.written());
    }

    #[test]
    fn first_write_freezes_the_status() {
        let mut w = ResponseWriter::new();
        w.write(b"hello");
        w.set_status(StatusCode::NOT_FOUND);
        assert_eq!(w.status(), StatusCode::OK);
        assert_eq!(w.size(), 5);
        assert!(w.written());
    }

    #[test]
    fn write_header_now_commits_with_empty_body() {
        let mut w = ResponseWriter::new();
        w.set_status(StatusCode::NO_CONTENT);
        w.write_header_now();
        assert!(w.written());
        assert_eq!(w.size(), 0);
        w.set_status(StatusCode::OK);
        assert_eq!(w.status(), StatusCode::NO_CONTENT);
    }

    #[test]
    fn hijack_commits_and_zeroes_size() {
        let mut w = ResponseWriter::new();
        w.hijack();
        assert!(w.written());
        assert!(w.hijacked());
        assert_eq!(w.size(), 0);
        w.write(b"ignored");
        assert_eq!(w.size(), 0);
    }

    #[test]
    fn finalizes_buffered_body() {
        let mut w = ResponseWriter::new();
        w.set_status(StatusCode::CREATED);
        w.write(b"abc");
        w.write(b"def");
        assert_eq!(w.size(), 6);
        let response = w.into_response();
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    #[test]
    fn streaming_precludes_buffered_writes() {
        let mut w = ResponseWriter::new();
        let sender = w.stream();
        assert!(sender.is_some());
        w.write(b"ignored");
        assert_eq!(w.size(), 0);
        assert!(w.stream().is_none());
    }
}
