use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use {
    anyhow::{Context, Result, bail},
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    tokio::sync::{mpsc, oneshot},
    tokio_tungstenite::{connect_async, tungstenite::Message},
    tracing::{debug, warn},
};

use {
    courier_common::SessionKey,
    courier_connector::{
        ClientEvent, ClientFactory, EventSender, InboundMessage, ProtocolClient, SessionInfo,
    },
};

use crate::wire::{BridgeCommand, BridgeEvent};

/// Default bridge WebSocket endpoint.
pub const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:8787";

const CONNECT_ATTEMPTS: u32 = 5;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(500);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

type PendingMap = Arc<StdMutex<HashMap<String, oneshot::Sender<BridgeEvent>>>>;

/// Builds [`BridgeClient`]s against one bridge endpoint.
pub struct BridgeClientFactory {
    url: String,
}

impl BridgeClientFactory {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl ClientFactory for BridgeClientFactory {
    fn build(
        &self,
        session_key: &SessionKey,
        artifact_dir: &Path,
        events: EventSender,
    ) -> Arc<dyn ProtocolClient> {
        Arc::new(BridgeClient {
            url: self.url.clone(),
            session_key: session_key.clone(),
            artifact_dir: artifact_dir.to_path_buf(),
            events,
            writer: StdMutex::new(None),
            pending: Arc::new(StdMutex::new(HashMap::new())),
        })
    }
}

/// One WebSocket session against the bridge process.
pub struct BridgeClient {
    url: String,
    session_key: SessionKey,
    artifact_dir: PathBuf,
    events: EventSender,
    writer: StdMutex<Option<mpsc::UnboundedSender<Message>>>,
    pending: PendingMap,
}

impl BridgeClient {
    fn queue(&self, command: &BridgeCommand) -> Result<()> {
        let json = serde_json::to_string(command)?;
        let writer = self
            .writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let Some(writer) = writer else {
            bail!("bridge connection not started");
        };
        writer
            .send(Message::Text(json.into()))
            .map_err(|_| anyhow::anyhow!("bridge connection closed"))?;
        Ok(())
    }

    /// Send a request command and await its correlated response event.
    async fn request(&self, request_id: String, command: BridgeCommand) -> Result<BridgeEvent> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request_id.clone(), tx);

        if let Err(e) = self.queue(&command) {
            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&request_id);
            return Err(e);
        }

        match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(event)) => Ok(event),
            Ok(Err(_)) => bail!("bridge connection dropped mid-request"),
            Err(_) => {
                self.pending
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .remove(&request_id);
                bail!("bridge request timed out")
            },
        }
    }
}

#[async_trait]
impl ProtocolClient for BridgeClient {
    async fn start(&self) -> Result<()> {
        let stream = connect_with_retry(&self.url).await?;
        let (mut sink, mut source) = stream.split();

        // Writer task: serialize all outgoing frames through one queue.
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<Message>();
        tokio::spawn(async move {
            while let Some(frame) = write_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    warn!(error = %e, "bridge write failed");
                    break;
                }
            }
        });

        // Reader task: fan events out to the connector and settle pending
        // requests.
        let events = self.events.clone();
        let pending = Arc::clone(&self.pending);
        let session_key = self.session_key.to_string();
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                match serde_json::from_str::<BridgeEvent>(text.as_str()) {
                    Ok(event) => dispatch(event, &session_key, &events, &pending),
                    Err(e) => warn!(error = %e, "unparseable bridge event"),
                }
            }
            debug!(session_key, "bridge connection closed");
            let _ = events.send(ClientEvent::Disconnected("bridge connection closed".into()));
        });

        *self.writer.lock().unwrap_or_else(|e| e.into_inner()) = Some(write_tx);

        self.queue(&BridgeCommand::Login {
            session_key: self.session_key.to_string(),
            artifact_dir: self.artifact_dir.display().to_string(),
        })
    }

    async fn teardown(&self) -> Result<()> {
        let _ = self.queue(&BridgeCommand::Logout {
            session_key: self.session_key.to_string(),
        });
        // Dropping the writer closes the socket and ends both tasks.
        *self.writer.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    async fn session_info(&self) -> Result<Option<SessionInfo>> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let response = self
            .request(
                request_id.clone(),
                BridgeCommand::Status {
                    session_key: self.session_key.to_string(),
                    request_id,
                },
            )
            .await?;

        match response {
            BridgeEvent::SessionInfo {
                paired: false, ..
            } => Ok(None),
            BridgeEvent::SessionInfo {
                phone_number,
                platform,
                display_name,
                ..
            } => Ok(Some(SessionInfo {
                phone_number,
                platform,
                display_name,
            })),
            other => bail!("unexpected bridge response: {other:?}"),
        }
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<String> {
        let request_id = uuid::Uuid::new_v4().to_string();
        let response = self
            .request(
                request_id.clone(),
                BridgeCommand::Send {
                    session_key: self.session_key.to_string(),
                    request_id,
                    to: to.to_string(),
                    body: body.to_string(),
                },
            )
            .await?;

        match response {
            BridgeEvent::SendResult {
                error: Some(error), ..
            } => bail!("bridge send failed: {error}"),
            BridgeEvent::SendResult { message_id, .. } => {
                message_id.context("bridge send result missing message id")
            },
            other => bail!("unexpected bridge response: {other:?}"),
        }
    }
}

/// Route one bridge event: request responses settle their waiter, lifecycle
/// events for our session become connector events.
fn dispatch(event: BridgeEvent, session_key: &str, events: &EventSender, pending: &PendingMap) {
    if let Some(request_id) = event.request_id() {
        let waiter = pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(request_id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(event);
            },
            None => debug!(request_id, "bridge response with no waiter"),
        }
        return;
    }

    let client_event = match event {
        BridgeEvent::Qr {
            session_key: key,
            payload,
        } if key == session_key => ClientEvent::Qr(payload),
        BridgeEvent::Authenticated { session_key: key } if key == session_key => {
            ClientEvent::Authenticated
        },
        BridgeEvent::Ready { session_key: key } if key == session_key => ClientEvent::Ready,
        BridgeEvent::AuthFailure {
            session_key: key,
            reason,
        } if key == session_key => ClientEvent::AuthFailure(reason),
        BridgeEvent::Disconnected {
            session_key: key,
            reason,
        } if key == session_key => ClientEvent::Disconnected(reason),
        BridgeEvent::Message {
            session_key: key,
            id,
            chat_address,
            sender_address,
            sender_name,
            body,
            has_media,
            self_sent,
            timestamp,
        } if key == session_key => ClientEvent::Message(InboundMessage {
            id,
            chat_address,
            sender_address,
            sender_name,
            body,
            has_media,
            self_sent,
            timestamp,
        }),
        other => {
            debug!(?other, "ignoring bridge event for another session");
            return;
        },
    };
    let _ = events.send(client_event);
}

/// Connect to the bridge, retrying while it starts up.
async fn connect_with_retry(
    url: &str,
) -> Result<tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>>
{
    let mut last_error = None;
    for attempt in 1..=CONNECT_ATTEMPTS {
        match connect_async(url).await {
            Ok((stream, _)) => return Ok(stream),
            Err(e) => {
                debug!(attempt, error = %e, "bridge connect failed, retrying");
                last_error = Some(e);
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
            },
        }
    }
    Err(anyhow::anyhow!(
        "failed to connect to bridge at {url}: {}",
        last_error.map(|e| e.to_string()).unwrap_or_default()
    ))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {tokio::net::TcpListener, tokio::task::JoinHandle};

    use super::*;

    /// Minimal in-process bridge: answers login with ready, echoes send and
    /// status requests.
    async fn spawn_bridge_server() -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            while let Some(Ok(frame)) = ws.next().await {
                let Message::Text(text) = frame else { continue };
                let command: BridgeCommand = serde_json::from_str(text.as_str()).unwrap();
                let reply = match command {
                    BridgeCommand::Login { session_key, .. } => {
                        Some(BridgeEvent::Ready { session_key })
                    },
                    BridgeCommand::Send {
                        request_id, to, ..
                    } => Some(BridgeEvent::SendResult {
                        request_id,
                        message_id: Some(format!("sent-to-{to}")),
                        error: None,
                    }),
                    BridgeCommand::Status { request_id, .. } => Some(BridgeEvent::SessionInfo {
                        request_id,
                        paired: true,
                        phone_number: Some("+15550009999".into()),
                        platform: Some("android".into()),
                        display_name: None,
                    }),
                    BridgeCommand::Logout { .. } => break,
                };
                if let Some(reply) = reply {
                    let json = serde_json::to_string(&reply).unwrap();
                    ws.send(Message::Text(json.into())).await.unwrap();
                }
            }
        });

        (format!("ws://{addr}"), handle)
    }

    fn build_client(url: &str) -> (Arc<dyn ProtocolClient>, mpsc::UnboundedReceiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let factory = BridgeClientFactory::new(url);
        let client = factory.build(
            &SessionKey::new("t1", "a1"),
            Path::new("/tmp/courier-test-artifacts/t1_a1"),
            events_tx,
        );
        (client, events_rx)
    }

    #[tokio::test]
    async fn login_forwards_ready_event() {
        let (url, _server) = spawn_bridge_server().await;
        let (client, mut events) = build_client(&url);

        client.start().await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, ClientEvent::Ready));
    }

    #[tokio::test]
    async fn send_text_returns_provider_message_id() {
        let (url, _server) = spawn_bridge_server().await;
        let (client, _events) = build_client(&url);
        client.start().await.unwrap();

        let id = client.send_text("15550001111@c.us", "hi").await.unwrap();
        assert_eq!(id, "sent-to-15550001111@c.us");
    }

    #[tokio::test]
    async fn session_info_probe_reports_identity() {
        let (url, _events_server) = spawn_bridge_server().await;
        let (client, _events) = build_client(&url);
        client.start().await.unwrap();

        let info = client.session_info().await.unwrap().unwrap();
        assert_eq!(info.phone_number.as_deref(), Some("+15550009999"));
        assert_eq!(info.platform.as_deref(), Some("android"));
    }

    #[tokio::test]
    async fn requests_before_start_fail() {
        let (client, _events) = build_client("ws://127.0.0.1:1");
        assert!(client.send_text("x@c.us", "hi").await.is_err());
    }
}
