//! Socket transport behind the connection manager.
//!
//! The manager only sees text frames. [`Connector`] is the seam between the
//! state machine and the wire, so the production `tokio-tungstenite` socket
//! and in-memory test transports are interchangeable.

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::{future, stream, Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

/// Low-level socket failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<tokio_tungstenite::tungstenite::Error> for TransportError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self(err.to_string())
    }
}

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// An open socket split into its two halves.
///
/// The inbound stream ends when the connection closes. An `Err` item is a
/// transport fault; the stream may end right after it.
pub struct Transport {
    pub outbound: FrameSink,
    pub inbound: FrameStream,
}

/// Opens sockets for the connection manager.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn open(&self, url: &Url) -> Result<Transport, TransportError>;
}

/// Production connector using tokio-tungstenite. TLS is handled by the
/// library (`native-tls`).
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, url: &Url) -> Result<Transport, TransportError> {
        let (ws_stream, _response) = connect_async(url.as_str()).await?;
        let (write, read) = ws_stream.split();

        let outbound = write
            .sink_map_err(TransportError::from)
            .with(|text: String| future::ready(Ok::<_, TransportError>(Message::Text(text.into()))));

        let inbound = stream::unfold(Some(read), |read| async move {
            let mut read = read?;
            loop {
                match read.next().await? {
                    Ok(Message::Text(text)) => return Some((Ok(text.to_string()), Some(read))),
                    Ok(Message::Close(frame)) => {
                        crate::log_info!("server closed the socket: {:?}", frame);
                        return None;
                    }
                    Ok(Message::Binary(data)) => {
                        crate::log_debug!("ignoring {} byte binary frame", data.len());
                    }
                    Ok(_) => {
                        // Ping/pong is answered by tungstenite
                    }
                    Err(e) => return Some((Err(TransportError::from(e)), None)),
                }
            }
        });

        Ok(Transport {
            outbound: Box::pin(outbound),
            inbound: Box::pin(inbound),
        })
    }
}
