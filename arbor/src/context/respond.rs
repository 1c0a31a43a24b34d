//! Response helpers exposed on the context.

use anyhow::anyhow;
use bytes::Bytes;
use cookie::Cookie;
use hyper::header::{
    HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE, LOCATION,
    SET_COOKIE,
};
use hyper::StatusCode;
use mime::Mime;
use serde::Serialize;

use super::Context;
use crate::handler::{HandlerError, HandlerResult};

/// The default body shape for [`Context::success`] and [`Context::fail`].
#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    code: i64,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a T>,
}

impl Context {
    /// Sets the response status. Ignored with a warning after the header
    /// has been committed.
    pub fn set_status(&mut self, status: StatusCode) {
        self.writer.set_status(status);
    }

    /// Sets a response header.
    pub fn set_header(&mut self, name: &str, value: &str) -> HandlerResult {
        let name = HeaderName::from_bytes(name.as_bytes())?;
        let value = HeaderValue::from_str(value)?;
        self.writer.headers_mut().insert(name, value);
        Ok(())
    }

    /// Appends a `Set-Cookie` header.
    pub fn set_cookie(&mut self, cookie: &Cookie<'_>) -> HandlerResult {
        let value = HeaderValue::from_str(&cookie.to_string())?;
        self.writer.headers_mut().append(SET_COOKIE, value);
        Ok(())
    }

    fn write_body(&mut self, status: StatusCode, mime: &Mime, body: &[u8]) -> HandlerResult {
        self.writer.set_status(status);
        if !self.writer.headers().contains_key(CONTENT_TYPE) {
            self.writer
                .insert_header(CONTENT_TYPE, HeaderValue::from_str(mime.as_ref())?);
        }
        self.writer.write(body);
        Ok(())
    }

    /// Writes a plain-text body.
    pub fn string<S>(&mut self, status: StatusCode, body: S) -> HandlerResult
    where
        S: AsRef<str>,
    {
        self.write_body(status, &mime::TEXT_PLAIN_UTF_8, body.as_ref().as_bytes())
    }

    /// Serializes `payload` as the JSON body.
    pub fn json<T>(&mut self, status: StatusCode, payload: &T) -> HandlerResult
    where
        T: Serialize,
    {
        let body = serde_json::to_vec(payload)?;
        self.write_body(status, &mime::APPLICATION_JSON, &body)
    }

    /// Writes an HTML body.
    pub fn html<S>(&mut self, status: StatusCode, body: S) -> HandlerResult
    where
        S: AsRef<str>,
    {
        self.write_body(status, &mime::TEXT_HTML_UTF_8, body.as_ref().as_bytes())
    }

    /// Writes a body rendered by an external template engine. The engine is
    /// a collaborator; the pipeline only ships its output.
    pub fn template(&mut self, status: StatusCode, rendered: String) -> HandlerResult {
        self.html(status, rendered)
    }

    /// Writes raw bytes under an explicit content type.
    pub fn data(&mut self, status: StatusCode, content_type: Mime, body: &[u8]) -> HandlerResult {
        self.write_body(status, &content_type, body)
    }

    /// Writes bytes as an attachment download.
    pub fn download(&mut self, file_name: &str, body: &[u8]) -> HandlerResult {
        let mime = mime_guess::from_path(file_name).first_or_octet_stream();
        let disposition = format!("attachment; filename=\"{}\"", file_name);
        self.writer
            .headers_mut()
            .insert(CONTENT_DISPOSITION, HeaderValue::from_str(&disposition)?);
        self.write_body(StatusCode::OK, &mime, body)
    }

    /// Redirects with `302 Found`.
    pub fn redirect(&mut self, location: &str) -> HandlerResult {
        self.redirect_with(StatusCode::FOUND, location)
    }

    /// Redirects with an explicit status.
    pub fn redirect_with(&mut self, status: StatusCode, location: &str) -> HandlerResult {
        self.writer
            .headers_mut()
            .insert(LOCATION, HeaderValue::from_str(location)?);
        self.writer.set_status(status);
        self.writer.write_header_now();
        Ok(())
    }

    /// Writes the standard success envelope:
    /// `{"code":200,"message":"success","result":…}`.
    pub fn success<T>(&mut self, result: &T) -> HandlerResult
    where
        T: Serialize,
    {
        self.json(
            StatusCode::OK,
            &Envelope {
                code: 200,
                message: "success",
                result: Some(result),
            },
        )
    }

    /// Writes the standard failure envelope `{"code":…,"message":…}` at
    /// HTTP 400.
    pub fn fail(&mut self, code: i64, message: &str) -> HandlerResult {
        self.fail_with_status(StatusCode::BAD_REQUEST, code, message)
    }

    /// Writes the failure envelope at an explicit HTTP status.
    pub fn fail_with_status(
        &mut self,
        status: StatusCode,
        code: i64,
        message: &str,
    ) -> HandlerResult {
        self.json(
            status,
            &Envelope::<()> {
                code,
                message,
                result: None,
            },
        )
    }

    /// Switches the response to a server-sent-event stream and returns the
    /// sending half. The header commits immediately; events flow on the
    /// returned sender, typically from a spawned task.
    pub fn sse(&mut self) -> Result<SseSender, HandlerError> {
        self.writer
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
        self.writer
            .headers_mut()
            .insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        let sender = self.writer.stream().ok_or_else(|| {
            HandlerError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                anyhow!("response body was already produced"),
            )
        })?;
        Ok(SseSender { sender })
    }

    /// Writes an error page, honoring the request's `Accept` header:
    /// `application/json` or `*/*` produce the failure envelope, anything
    /// else plain text.
    pub fn error(&mut self, status: StatusCode, message: &str) -> HandlerResult {
        let accept = self.header(ACCEPT.as_str());
        if wants_json(accept.as_deref()) {
            self.fail_with_status(status, i64::from(status.as_u16()), message)
        } else {
            self.string(status, message)
        }
    }

    // The pipeline edge: renders a handler error that reached the service
    // without a written response.
    pub(crate) fn render_error(&mut self, err: HandlerError) {
        if self.writer.written() {
            return;
        }
        let status = err.status();
        let message = if status.is_server_error() {
            status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string()
        } else {
            err.cause().to_string()
        };
        let _ = self.error(status, &message);
    }
}

/// Whether an `Accept` header value selects the JSON error shape.
pub(crate) fn wants_json(accept: Option<&str>) -> bool {
    match accept {
        Some(value) => value.contains("application/json") || value.contains("*/*"),
        None => false,
    }
}

/// A single server-sent event.
pub struct SseEvent {
    event: Option<String>,
    id: Option<String>,
    data: String,
}

impl SseEvent {
    /// An event carrying only data.
    pub fn new<S: Into<String>>(data: S) -> SseEvent {
        SseEvent {
            event: None,
            id: None,
            data: data.into(),
        }
    }

    /// Names the event type.
    pub fn with_event<S: Into<String>>(mut self, event: S) -> SseEvent {
        self.event = Some(event.into());
        self
    }

    /// Attaches an event id.
    pub fn with_id<S: Into<String>>(mut self, id: S) -> SseEvent {
        self.id = Some(id.into());
        self
    }

    fn render(&self) -> String {
        let mut out = String::new();
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        for line in self.data.lines() {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// The sending half of a server-sent-event stream.
pub struct SseSender {
    sender: hyper::body::Sender,
}

impl SseSender {
    /// Sends one event. Fails once the client goes away.
    pub async fn send(&mut self, event: SseEvent) -> HandlerResult {
        self.sender
            .send_data(Bytes::from(event.render()))
            .await
            .map_err(|e| HandlerError::new(StatusCode::INTERNAL_SERVER_ERROR, anyhow!(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_selects_json_shape() {
        assert!(wants_json(Some("application/json")));
        assert!(wants_json(Some("text/html, */*;q=0.8")));
        assert!(!wants_json(Some("text/plain")));
        assert!(!wants_json(None));
    }

    #[test]
    fn sse_events_render_per_line() {
        let event = SseEvent::new("a\nb").with_event("tick").with_id("7");
        assert_eq!(event.render(), "event: tick\nid: 7\ndata: a\ndata: b\n\n");
    }
}
