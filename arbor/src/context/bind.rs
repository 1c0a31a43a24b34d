//! Typed extraction from request payloads.

use std::io::{Cursor, Read};

use hyper::header::CONTENT_TYPE;
use hyper::StatusCode;
use mime::Mime;
use multipart::server::Multipart;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::Context;
use crate::handler::HandlerError;

/// Errors produced by the binder helpers. Handlers decide how to surface
/// them; unhandled ones render as their [`BindError::status`] at the
/// pipeline edge.
#[derive(Debug, Error)]
pub enum BindError {
    /// The buffered body would exceed the configured limit.
    #[error("request body exceeds the limit of {limit} bytes")]
    BodyTooLarge {
        /// The configured limit in bytes.
        limit: usize,
    },

    /// The request carried a Content-Type other than the one the binder
    /// expects.
    #[error("unexpected Content-Type `{actual}`, expected {expected}")]
    ContentType {
        /// What the binder expected.
        expected: &'static str,
        /// What the request declared.
        actual: String,
    },

    /// The payload failed to decode into the target type.
    #[error("failed to decode request payload")]
    Decode(#[source] anyhow::Error),
}

impl BindError {
    /// The status a handler would typically convert this error to.
    pub fn status(&self) -> StatusCode {
        match self {
            BindError::BodyTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            BindError::ContentType { .. } => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            BindError::Decode(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub(crate) fn into_handler_error(self) -> HandlerError {
        let status = self.status();
        HandlerError::new(status, self)
    }
}

/// One file decoded from a `multipart/form-data` body.
pub struct FormFile {
    /// The form field name.
    pub name: String,
    /// The client-supplied file name, if any.
    pub file_name: Option<String>,
    /// The part's declared content type, if any.
    pub content_type: Option<Mime>,
    /// The file payload.
    pub data: Vec<u8>,
}

impl Context {
    fn content_type(&self) -> Option<Mime> {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<Mime>().ok())
    }

    // Absent Content-Type is accepted; a present-but-different one is a
    // mismatch.
    fn expect_content_type<F>(&self, expected: &'static str, matches: F) -> Result<(), BindError>
    where
        F: Fn(&Mime) -> bool,
    {
        match self.content_type() {
            None => Ok(()),
            Some(mime) if matches(&mime) => Ok(()),
            Some(mime) => Err(BindError::ContentType {
                expected,
                actual: mime.to_string(),
            }),
        }
    }

    /// Decodes a JSON body into `T`.
    pub async fn bind_json<T>(&mut self) -> Result<T, HandlerError>
    where
        T: DeserializeOwned,
    {
        self.expect_content_type("application/json", |m| {
            m.subtype() == mime::JSON || m.suffix() == Some(mime::JSON)
        })
        .map_err(BindError::into_handler_error)?;

        let body = self.body().await?;
        serde_json::from_slice(&body)
            .map_err(|e| BindError::Decode(e.into()).into_handler_error())
    }

    /// Decodes a YAML body into `T`.
    pub async fn bind_yaml<T>(&mut self) -> Result<T, HandlerError>
    where
        T: DeserializeOwned,
    {
        self.expect_content_type("application/yaml", |m| {
            m.subtype() == "yaml" || m.subtype() == "x-yaml"
        })
        .map_err(BindError::into_handler_error)?;

        let body = self.body().await?;
        serde_yaml::from_slice(&body)
            .map_err(|e| BindError::Decode(e.into()).into_handler_error())
    }

    /// Decodes the query string into `T`.
    pub fn bind_query<T>(&self) -> Result<T, HandlerError>
    where
        T: DeserializeOwned,
    {
        serde_urlencoded::from_str(self.uri.query().unwrap_or(""))
            .map_err(|e| BindError::Decode(e.into()).into_handler_error())
    }

    /// Decodes a `application/x-www-form-urlencoded` body into `T`.
    pub async fn bind_form<T>(&mut self) -> Result<T, HandlerError>
    where
        T: DeserializeOwned,
    {
        self.expect_content_type("application/x-www-form-urlencoded", |m| {
            m.type_() == mime::APPLICATION && m.subtype() == mime::WWW_FORM_URLENCODED
        })
        .map_err(BindError::into_handler_error)?;

        let body = self.body().await?;
        serde_urlencoded::from_bytes(&body)
            .map_err(|e| BindError::Decode(e.into()).into_handler_error())
    }

    /// Decodes request headers into `T` (header names are lowercased keys).
    pub fn bind_header<T>(&self) -> Result<T, HandlerError>
    where
        T: DeserializeOwned,
    {
        let mut map = serde_json::Map::new();
        for (name, value) in self.headers.iter() {
            if let Ok(value) = value.to_str() {
                map.insert(name.as_str().to_string(), value.into());
            }
        }
        serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| BindError::Decode(e.into()).into_handler_error())
    }

    /// Decodes captured route parameters into `T`.
    pub fn bind_params<T>(&self) -> Result<T, HandlerError>
    where
        T: DeserializeOwned,
    {
        let mut map = serde_json::Map::new();
        for (name, value) in self.params.iter() {
            map.insert(name.to_string(), value.into());
        }
        serde_json::from_value(serde_json::Value::Object(map))
            .map_err(|e| BindError::Decode(e.into()).into_handler_error())
    }

    /// Decodes the body into `T`, dispatching on the declared Content-Type
    /// (JSON when none is declared).
    pub async fn bind_body<T>(&mut self) -> Result<T, HandlerError>
    where
        T: DeserializeOwned,
    {
        match self.content_type() {
            Some(mime)
                if mime.type_() == mime::APPLICATION
                    && mime.subtype() == mime::WWW_FORM_URLENCODED =>
            {
                self.bind_form().await
            }
            Some(mime) if mime.subtype() == "yaml" || mime.subtype() == "x-yaml" => {
                self.bind_yaml().await
            }
            _ => self.bind_json().await,
        }
    }

    /// All form pairs from an urlencoded body.
    pub async fn forms(&mut self) -> Result<Vec<(String, String)>, HandlerError> {
        let body = self.body().await?;
        serde_urlencoded::from_bytes(&body)
            .map_err(|e| BindError::Decode(e.into()).into_handler_error())
    }

    /// The first form value under `name`.
    pub async fn form(&mut self, name: &str) -> Result<Option<String>, HandlerError> {
        Ok(self
            .forms()
            .await?
            .into_iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value))
    }

    /// Files decoded from a `multipart/form-data` body. Non-file fields are
    /// skipped.
    pub async fn files(&mut self) -> Result<Vec<FormFile>, HandlerError> {
        let boundary = match self.content_type() {
            Some(mime)
                if mime.type_() == mime::MULTIPART && mime.subtype() == mime::FORM_DATA =>
            {
                mime.get_param(mime::BOUNDARY)
                    .map(|b| b.as_str().to_string())
                    .ok_or_else(|| {
                        BindError::Decode(anyhow::anyhow!("multipart body without boundary"))
                            .into_handler_error()
                    })?
            }
            other => {
                return Err(BindError::ContentType {
                    expected: "multipart/form-data",
                    actual: other.map(|m| m.to_string()).unwrap_or_default(),
                }
                .into_handler_error())
            }
        };

        let body = self.body().await?;
        let mut parts = Multipart::with_body(Cursor::new(body.as_ref()), boundary);
        let mut files = Vec::new();

        parts
            .foreach_entry(|mut entry| {
                if entry.headers.filename.is_none() {
                    return;
                }
                let mut data = Vec::new();
                if entry.data.read_to_end(&mut data).is_ok() {
                    files.push(FormFile {
                        name: entry.headers.name.to_string(),
                        file_name: entry.headers.filename.clone(),
                        content_type: entry.headers.content_type.clone(),
                        data,
                    });
                }
            })
            .map_err(|e| BindError::Decode(e.into()).into_handler_error())?;

        Ok(files)
    }
}
