//! WebSocket hub transport: JSON text frames, bearer-token handshake.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message;

use super::{ControlError, HubConnection, HubEndpoint, HubTransport};

fn map_ws_error(err: impl std::fmt::Display) -> ControlError {
    ControlError::Connect(err.to_string())
}

/// [`HubTransport`] over `ws://` / `wss://`.
///
/// Each connection gets a pump task that moves frames between the socket
/// and the [`HubConnection`] queues. The task ends, and `inbound` closes,
/// when the socket closes or errors or when `outbound` is dropped.
#[derive(Debug, Default, Clone)]
pub struct WsHubTransport;

impl WsHubTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HubTransport for WsHubTransport {
    async fn connect(&self, endpoint: &HubEndpoint) -> Result<HubConnection, ControlError> {
        let mut request = endpoint
            .url
            .as_str()
            .into_client_request()
            .map_err(map_ws_error)?;
        if let Some(token) = &endpoint.access_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(map_ws_error)?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, _response) = connect_async(request).await.map_err(map_ws_error)?;
        let (mut sink, mut source) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();
        let url = endpoint.url.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    outgoing = out_rx.recv() => match outgoing {
                        Some(text) => {
                            if let Err(e) = sink.send(Message::Text(text)).await {
                                tracing::warn!("hub send failed on {url}: {e}");
                                break;
                            }
                        }
                        None => {
                            let _ = sink.close().await;
                            break;
                        }
                    },
                    incoming = source.next() => match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if in_tx.send(text).is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                            Ok(text) => {
                                if in_tx.send(text).is_err() {
                                    break;
                                }
                            }
                            Err(_) => tracing::warn!("hub sent non-utf8 binary frame, ignored"),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            tracing::info!("hub closed connection: {frame:?}");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("hub read failed on {url}: {e}");
                            break;
                        }
                        None => break,
                    },
                }
            }
            tracing::debug!("hub pump for {url} ended");
        });

        Ok(HubConnection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}
