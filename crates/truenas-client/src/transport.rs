//! WebSocket transport: a single connection carrying JSON text frames.
//!
//! The transport knows nothing about request semantics. It dials, splits
//! into a write half and a read half, and moves opaque JSON strings.
//! Connection errors are tagged with the operation that failed
//! ([`ConnOp::Dial`], [`ConnOp::Read`], [`ConnOp::Write`]).

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, Connector, MaybeTlsStream, WebSocketStream};

use crate::error::{ClientError, ConnOp, Result};
use crate::tls;

/// The underlying socket type for both `ws://` and `wss://` endpoints.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Write half of a connected transport.
pub type FrameSink = SplitSink<WsStream, Message>;

/// Read half of a connected transport.
pub type FrameStream = SplitStream<WsStream>;

/// A connected WebSocket transport.
pub struct Transport {
    stream: WsStream,
}

impl Transport {
    /// Dials the endpoint, completing the WebSocket handshake (and TLS
    /// handshake for `wss://`) within `timeout`.
    pub async fn connect(url: &str, insecure_tls: bool, timeout: Duration) -> Result<Self> {
        let connector = if url.starts_with("wss://") {
            Some(Connector::Rustls(Arc::new(tls::client_config(insecure_tls))))
        } else {
            None
        };

        let dial = connect_async_tls_with_config(url, None, false, connector);
        let (stream, _response) = tokio::time::timeout(timeout, dial)
            .await
            .map_err(|_| {
                ClientError::conn(
                    ConnOp::Dial,
                    WsError::Io(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connect timed out after {:?}", timeout),
                    )),
                )
            })?
            .map_err(|e| ClientError::conn(ConnOp::Dial, e))?;

        Ok(Self { stream })
    }

    /// Splits the transport into its write and read halves.
    pub fn split(self) -> (FrameSink, FrameStream) {
        self.stream.split()
    }
}

/// Sends one JSON text frame.
pub async fn send_frame(sink: &mut FrameSink, frame: String) -> Result<()> {
    sink.send(Message::text(frame))
        .await
        .map_err(|e| ClientError::conn(ConnOp::Write, e))
}

/// Receives the next JSON text frame.
///
/// Control frames (ping/pong) are handled by the WebSocket layer and
/// skipped here. Returns `Ok(None)` on orderly close; read failures come
/// back as [`ConnOp::Read`] connection errors, which also unblocks any
/// caller waiting on a closed connection.
pub async fn recv_frame(stream: &mut FrameStream) -> Result<Option<String>> {
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Some(text.to_string())),
            Some(Ok(Message::Binary(data))) => {
                let text = String::from_utf8(data.to_vec()).map_err(|_| {
                    ClientError::conn(
                        ConnOp::Read,
                        WsError::Utf8,
                    )
                })?;
                return Ok(Some(text));
            }
            Some(Ok(Message::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ClientError::conn(ConnOp::Read, e)),
        }
    }
}
