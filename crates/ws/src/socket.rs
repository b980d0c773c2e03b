use bytes::Bytes;
use chatwire_protocol::{Connection, ConnectionDriver, Outgoing, Transport};
use futures_util::{SinkExt, StreamExt};
use tokio::select;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::Instrument;

/// A [`Transport`] over WebSocket.
///
/// Each connection is driven by its own task. Outbound payloads are sent
/// as text frames; inbound text and binary frames are delivered as-is.
#[derive(Clone, Copy, Debug, Default)]
pub struct WsTransport;

impl WsTransport {
    /// Creates a new transport.
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Transport for WsTransport {
    fn open(&self, endpoint: &str) -> Connection {
        let (connection, driver) = Connection::pair();
        let endpoint = endpoint.to_owned();
        let span = trace_span!("socket", conn = %driver.id());
        tokio::spawn(run_socket(endpoint, driver).instrument(span));
        connection
    }
}

async fn run_socket(endpoint: String, mut driver: ConnectionDriver) {
    let connect = connect_async(endpoint.as_str());
    let ws = select! {
        res = connect => match res {
            Ok((ws, _)) => ws,
            Err(err) => {
                warn!("failed to connect to {endpoint}: {err}");
                driver.closed();
                return;
            }
        },
        // Only a close request (or every handle gone) can arrive before
        // the handshake completes.
        _ = driver.next_outgoing() => {
            debug!("closed while connecting");
            driver.closed();
            return;
        }
    };
    debug!("connected to {endpoint}");
    driver.opened();

    let (mut sink, mut stream) = ws.split();
    loop {
        select! {
            outgoing = driver.next_outgoing() => {
                let payload = match outgoing {
                    Some(Outgoing::Frame(payload)) => payload,
                    Some(Outgoing::Close) | None => {
                        debug!("closing");
                        sink.close().await.ok();
                        break;
                    }
                };
                if let Err(err) = sink.send(frame_for(payload)).await {
                    warn!("failed to send frame: {err}");
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let payload = Bytes::copy_from_slice(text.as_bytes());
                    driver.deliver(payload);
                }
                Some(Ok(Message::Binary(data))) => {
                    driver.deliver(data);
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("server closed the connection: {frame:?}");
                    break;
                }
                // Pings are answered by tungstenite.
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!("connection failed: {err}");
                    break;
                }
                None => break,
            }
        }
    }
    driver.closed();
}

fn frame_for(payload: Bytes) -> Message {
    match String::from_utf8(payload.to_vec()) {
        Ok(text) => Message::text(text),
        Err(_) => Message::Binary(payload),
    }
}
