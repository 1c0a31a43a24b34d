//! Defines the error type produced by failing handlers.

use std::fmt;

use hyper::StatusCode;

/// Describes an error which occurred while a handler was processing a
/// request. Carries the HTTP status the pipeline edge should render and an
/// opaque cause for logging.
///
/// Any error convertible into `anyhow::Error` converts into a
/// `HandlerError` with a `500 Internal Server Error` status; use
/// [`HandlerError::with_status`] to refine it.
pub struct HandlerError {
    status: StatusCode,
    cause: anyhow::Error,
}

impl<E> From<E> for HandlerError
where
    E: Into<anyhow::Error>,
{
    fn from(cause: E) -> HandlerError {
        HandlerError {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            cause: cause.into(),
        }
    }
}

impl HandlerError {
    /// Constructs a `HandlerError` with an explicit status.
    pub fn new<E>(status: StatusCode, cause: E) -> HandlerError
    where
        E: Into<anyhow::Error>,
    {
        HandlerError {
            status,
            cause: cause.into(),
        }
    }

    /// Returns `self` with the given status.
    pub fn with_status(self, status: StatusCode) -> HandlerError {
        HandlerError { status, ..self }
    }

    /// The status the pipeline edge will render for this error.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The underlying cause.
    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.status, self.cause)
    }
}

impl fmt::Debug for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerError")
            .field("status", &self.status)
            .field("cause", &self.cause)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn defaults_to_internal_server_error() {
        let err: HandlerError = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn with_status_overrides() {
        let err: HandlerError = io::Error::new(io::ErrorKind::Other, "boom").into();
        let err = err.with_status(StatusCode::IM_A_TEAPOT);
        assert_eq!(err.status(), StatusCode::IM_A_TEAPOT);
        assert_eq!(format!("{}", err), "418 I'm a teapot: boom");
    }
}
