//! Per-connection WebSocket session state and the frame loop.
//!
//! The read loop owns the inbound half of the connection; user callbacks
//! each run on their own task, so they may interleave. Writes from any task
//! serialize through the session's writer mutex.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::{FutureExt, SinkExt};
use hyper::upgrade::Upgraded;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use uuid::Uuid;

use super::Callbacks;
use crate::service::describe_panic;

type Writer = SplitSink<WebSocketStream<Upgraded>, Message>;

/// The kind of a data frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageKind {
    /// A UTF-8 text frame.
    Text,
    /// A binary frame.
    Binary,
}

/// One established WebSocket connection.
pub struct Session {
    id: Uuid,
    alive: AtomicBool,
    closed: Mutex<Option<(u16, String)>>,
    writer: tokio::sync::Mutex<Writer>,
}

impl Session {
    fn new(writer: Writer) -> Session {
        Session {
            id: Uuid::new_v4(),
            alive: AtomicBool::new(true),
            closed: Mutex::new(None),
            writer: tokio::sync::Mutex::new(writer),
        }
    }

    /// The connection id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// False once the peer closed or the read loop exited.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// The close code the peer sent, when it closed cleanly.
    pub fn closed_code(&self) -> Option<u16> {
        self.closed.lock().unwrap().as_ref().map(|(code, _)| *code)
    }

    /// The close reason the peer sent, when it closed cleanly.
    pub fn closed_reason(&self) -> Option<String> {
        self.closed
            .lock()
            .unwrap()
            .as_ref()
            .map(|(_, reason)| reason.clone())
    }

    fn record_close(&self, code: u16, reason: String) {
        *self.closed.lock().unwrap() = Some((code, reason));
        self.alive.store(false, Ordering::Release);
    }

    fn mark_dead(&self) {
        self.alive.store(false, Ordering::Release);
    }

    // A single writer at a time per connection.
    async fn send(&self, message: Message) -> anyhow::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send(message).await.map_err(|e| anyhow!(e))
    }

    /// Writes one frame of the given kind.
    pub async fn write(&self, kind: MessageKind, data: Vec<u8>) -> anyhow::Result<()> {
        let message = match kind {
            MessageKind::Text => Message::Text(String::from_utf8(data)?),
            MessageKind::Binary => Message::Binary(data),
        };
        self.send(message).await
    }

    /// Writes a text frame.
    pub async fn write_text<S: Into<String>>(&self, text: S) -> anyhow::Result<()> {
        self.send(Message::Text(text.into())).await
    }

    /// Writes a binary frame.
    pub async fn write_binary(&self, data: Vec<u8>) -> anyhow::Result<()> {
        self.send(Message::Binary(data)).await
    }

    /// Serializes `payload` to JSON and writes it as a text frame.
    pub async fn write_json<T: Serialize>(&self, payload: &T) -> anyhow::Result<()> {
        self.send(Message::Text(serde_json::to_string(payload)?))
            .await
    }

    /// Replies with a pong. Idempotent towards a peer that already went
    /// away.
    pub async fn pong(&self, payload: Vec<u8>) -> anyhow::Result<()> {
        match self.send(Message::Pong(payload)).await {
            Ok(()) => Ok(()),
            Err(e) if is_benign_send_error(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Sends a close frame. Tolerates an already-closed peer.
    pub async fn close(&self, code: u16, reason: String) -> anyhow::Result<()> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.into(),
        };
        match self.send(Message::Close(Some(frame))).await {
            Ok(()) => Ok(()),
            Err(e) if is_benign_send_error(&e) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn is_benign_send_error(error: &anyhow::Error) -> bool {
    matches!(
        error.downcast_ref::<WsError>(),
        Some(WsError::ConnectionClosed) | Some(WsError::AlreadyClosed)
    )
}

fn is_benign_read_error(error: &WsError) -> bool {
    matches!(error, WsError::ConnectionClosed | WsError::AlreadyClosed)
}

// Going-away and abnormal-closure (plus a clean close) stay quiet.
fn is_benign_close_code(code: u16) -> bool {
    matches!(code, 1000 | 1001 | 1006)
}

fn dispatch(
    session: Arc<Session>,
    callbacks: Arc<Callbacks>,
    request_id: String,
    fut: futures_util::future::BoxFuture<'static, ()>,
) {
    tokio::spawn(async move {
        if let Err(payload) = AssertUnwindSafe(fut).catch_unwind().await {
            let message = describe_panic(payload.as_ref());
            error!("[{}] websocket callback panicked: {}", request_id, message);
            if let Some(on_error) = &callbacks.on_error {
                let report = on_error(session.clone(), anyhow!("callback panicked: {}", message));
                let _ = AssertUnwindSafe(report).catch_unwind().await;
            }
        }
    });
}

/// Drives one established connection: reads frames sequentially, fanning
/// each out to the configured callbacks, until the peer goes away.
/// `on_disconnect` runs exactly once after the loop exits.
pub(crate) async fn run(
    stream: WebSocketStream<Upgraded>,
    callbacks: Arc<Callbacks>,
    request_id: String,
) {
    let (writer, mut reader) = stream.split();
    let session = Arc::new(Session::new(writer));
    info!("[{}] websocket connected ({})", request_id, session.id());

    if let Some(on_connect) = &callbacks.on_connect {
        dispatch(
            session.clone(),
            callbacks.clone(),
            request_id.clone(),
            on_connect(session.clone()),
        );
    }

    while let Some(frame) = reader.next().await {
        match frame {
            Ok(Message::Ping(payload)) => match &callbacks.on_ping {
                Some(on_ping) => dispatch(
                    session.clone(),
                    callbacks.clone(),
                    request_id.clone(),
                    on_ping(session.clone(), payload),
                ),
                None => {
                    if let Err(e) = session.pong(payload).await {
                        debug!("[{}] pong failed: {}", request_id, e);
                    }
                }
            },
            Ok(Message::Pong(payload)) => {
                if let Some(on_pong) = &callbacks.on_pong {
                    dispatch(
                        session.clone(),
                        callbacks.clone(),
                        request_id.clone(),
                        on_pong(session.clone(), payload),
                    );
                }
            }
            Ok(Message::Text(text)) => {
                if let Some(on_text) = &callbacks.on_text {
                    dispatch(
                        session.clone(),
                        callbacks.clone(),
                        request_id.clone(),
                        on_text(session.clone(), text.clone()),
                    );
                }
                if let Some(on_message) = &callbacks.on_message {
                    dispatch(
                        session.clone(),
                        callbacks.clone(),
                        request_id.clone(),
                        on_message(session.clone(), MessageKind::Text, text.into_bytes()),
                    );
                }
            }
            Ok(Message::Binary(data)) => {
                if let Some(on_binary) = &callbacks.on_binary {
                    dispatch(
                        session.clone(),
                        callbacks.clone(),
                        request_id.clone(),
                        on_binary(session.clone(), data.clone()),
                    );
                }
                if let Some(on_message) = &callbacks.on_message {
                    dispatch(
                        session.clone(),
                        callbacks.clone(),
                        request_id.clone(),
                        on_message(session.clone(), MessageKind::Binary, data),
                    );
                }
            }
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (u16::from(f.code), f.reason.into_owned()))
                    .unwrap_or((1005, String::new()));
                if !is_benign_close_code(code) {
                    warn!(
                        "[{}] websocket closed with code {}: {}",
                        request_id, code, reason
                    );
                }
                session.record_close(code, reason);
            }
            Ok(_) => {}
            Err(e) => {
                if !is_benign_read_error(&e) {
                    error!("[{}] websocket read error: {}", request_id, e);
                }
                break;
            }
        }
    }

    session.mark_dead();

    if let Some(on_disconnect) = &callbacks.on_disconnect {
        let report = on_disconnect(session.clone());
        if let Err(payload) = AssertUnwindSafe(report).catch_unwind().await {
            error!(
                "[{}] websocket disconnect callback panicked: {}",
                request_id,
                describe_panic(payload.as_ref())
            );
        }
    }
    info!("[{}] websocket disconnected ({})", request_id, session.id());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_codes_classify() {
        assert!(is_benign_close_code(1000));
        assert!(is_benign_close_code(1001));
        assert!(is_benign_close_code(1006));
        assert!(!is_benign_close_code(1011));
    }
}
