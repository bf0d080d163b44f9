//! Pumps proxy messages between a WebSocket and a [`Proxy`].
//!
//! Inbound text frames are handed to [`Proxy::receive`]; the proxy's
//! outbound channel is written back as text frames. When the socket closes
//! the proxy is destroyed, which removes every forwarder it installed on
//! the shared emitters.

use futures::{SinkExt, StreamExt};
use ngevents::Proxy;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, trace};

/// Traffic of one bridged connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeSummary {
    /// Text frames handed to the proxy
    pub received: usize,
    /// Text frames written to the socket
    pub sent: usize,
}

/// Runs until either side closes, then destroys `proxy`.
pub async fn run_bridge<S>(
    ws_stream: WebSocketStream<S>,
    proxy: Proxy,
    mut outbound: UnboundedReceiver<String>,
    peer: String,
) -> BridgeSummary
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut summary = BridgeSummary::default();

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    summary.received += 1;
                    trace!(peer = %peer, "⬇️ {}", text.as_str());
                    proxy.receive(text.as_str());
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws_sender.send(Message::Pong(data)).await {
                        debug!(peer = %peer, "Failed to answer ping: {}", e);
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(peer = %peer, "🔌 Peer closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(peer = %peer, "WebSocket error: {}", e);
                    break;
                }
            },
            outgoing = outbound.recv() => match outgoing {
                Some(text) => {
                    trace!(peer = %peer, "⬆️ {}", text);
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        error!(peer = %peer, "Failed to send message: {}", e);
                        break;
                    }
                    summary.sent += 1;
                }
                None => break,
            },
        }
    }

    proxy.destroy();
    let _ = ws_sender.close().await;
    summary
}
