//! WebSocket client transport

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

use super::{Transport, TransportError, TransportEvent, TransportLink, TransportSink};

/// Opens one WebSocket connection per `open` call, each driven by its own task.
///
/// Must be used from within a Tokio runtime.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Transport for WebSocketTransport {
    fn open(&self, url: &str, sink: TransportSink) -> Box<dyn TransportLink> {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (close_tx, close_rx) = oneshot::channel();

        tokio::spawn(run_connection(
            url.to_string(),
            self.connect_timeout,
            sink,
            outbound_rx,
            close_rx,
        ));

        Box::new(WebSocketLink {
            outbound: outbound_tx,
            close: Some(close_tx),
        })
    }
}

struct WebSocketLink {
    outbound: mpsc::UnboundedSender<String>,
    close: Option<oneshot::Sender<()>>,
}

impl TransportLink for WebSocketLink {
    fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.close.is_none() {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(text)
            .map_err(|_| TransportError::Closed)
    }

    fn close(&mut self) {
        if let Some(close) = self.close.take() {
            let _ = close.send(());
        }
    }
}

/// Drive one connection until it ends or the link closes it.
///
/// Dropping the link drops the close sender, which ends the task the same
/// way an explicit close does.
async fn run_connection(
    url: String,
    connect_timeout: Duration,
    sink: TransportSink,
    mut outbound: mpsc::UnboundedReceiver<String>,
    mut close: oneshot::Receiver<()>,
) {
    let connect = tokio::time::timeout(connect_timeout, connect_async(url.as_str()));

    let stream = tokio::select! {
        _ = &mut close => {
            tracing::debug!(url = %url, "Connection closed before it was established");
            return;
        }
        result = connect => match result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                sink.emit(TransportEvent::Error(e.to_string()));
                sink.emit(TransportEvent::Closed { reason: None });
                return;
            }
            Err(_) => {
                sink.emit(TransportEvent::Error(format!(
                    "connect timed out after {}ms",
                    connect_timeout.as_millis()
                )));
                sink.emit(TransportEvent::Closed { reason: None });
                return;
            }
        }
    };

    sink.emit(TransportEvent::Opened);

    let (mut ws_sender, mut ws_receiver) = stream.split();

    let reason = loop {
        tokio::select! {
            _ = &mut close => {
                let _ = ws_sender.send(Message::Close(None)).await;
                let _ = ws_sender.close().await;
                tracing::debug!(url = %url, "Connection closed locally");
                return;
            }
            Some(text) = outbound.recv() => {
                if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                    sink.emit(TransportEvent::Error(e.to_string()));
                    break None;
                }
            }
            frame = ws_receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    sink.emit(TransportEvent::Message(text.to_string()));
                }
                Some(Ok(Message::Binary(data))) => {
                    sink.emit(TransportEvent::Message(
                        String::from_utf8_lossy(&data).into_owned(),
                    ));
                }
                Some(Ok(Message::Close(frame))) => {
                    break frame.map(|f| f.reason.to_string());
                }
                // Ping/pong is answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    sink.emit(TransportEvent::Error(e.to_string()));
                    break None;
                }
                None => break None,
            }
        }
    };

    sink.emit(TransportEvent::Closed { reason });
}
