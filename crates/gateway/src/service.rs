use std::sync::Arc;

use {
    anyhow::Result,
    tracing::{info, warn},
};

use {
    courier_common::{ActivityEvent, ActivityLog, SessionKey},
    courier_connector::{Connector, ConnectorRegistry, QrResult},
    courier_relay::{MessageRelay, StatusReconciler, StatusReport},
    courier_store::{Conversation, ConversationStore},
};

/// Conversations returned per `list_messages` page.
pub const MESSAGES_PAGE_SIZE: u32 = 20;

/// Status of one session as reported to operators.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub report: StatusReport,
    /// A live connector exists for this key in this process.
    pub is_active: bool,
    pub qr_image: Option<String>,
}

/// Acknowledgement of a disconnect request.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DisconnectResponse {
    pub was_connected: bool,
    pub message: String,
}

/// One page of a session's conversations.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MessagesPage {
    pub conversations: Vec<Conversation>,
    pub page: u32,
    pub page_size: u32,
}

/// Operator-facing channel operations.
pub struct ChannelService {
    registry: Arc<ConnectorRegistry>,
    relay: Arc<MessageRelay>,
    reconciler: StatusReconciler,
    conversations: Arc<dyn ConversationStore>,
    activity: Arc<dyn ActivityLog>,
}

impl ChannelService {
    #[must_use]
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        relay: Arc<MessageRelay>,
        reconciler: StatusReconciler,
        conversations: Arc<dyn ConversationStore>,
        activity: Arc<dyn ActivityLog>,
    ) -> Self {
        Self {
            registry,
            relay,
            reconciler,
            conversations,
            activity,
        }
    }

    /// Connect a session: acquire (or force-replace) its connector, wire the
    /// lifecycle hooks and produce a QR code — or report that cached
    /// credentials already restored the pairing.
    pub async fn connect(&self, session_key: &SessionKey, force_new: bool) -> Result<QrResult> {
        let connector = self.registry.acquire(session_key, force_new).await?;
        self.wire(&connector);
        connector.initialize(force_new).await?;
        Ok(connector.generate_qr().await?)
    }

    /// Reconciled status for a session key.
    ///
    /// A live connector is probed; without one the persisted record is
    /// consulted, and a stale "connected" record is reported disconnected.
    pub async fn status(&self, session_key: &SessionKey) -> Result<StatusResponse> {
        match self.registry.get(session_key) {
            Some(connector) => {
                let status = connector.connection_status().await;
                Ok(StatusResponse {
                    report: StatusReconciler::from_live(&status),
                    is_active: status.is_active,
                    qr_image: status.qr_image,
                })
            },
            None => {
                let report = self.reconciler.reconcile_absent(session_key).await?;
                Ok(StatusResponse {
                    report,
                    is_active: false,
                    qr_image: None,
                })
            },
        }
    }

    /// Disconnect a session and force-end its ongoing conversations.
    ///
    /// Idempotent: with nothing live this acknowledges "not initialized"
    /// instead of failing.
    pub async fn disconnect(&self, session_key: &SessionKey) -> Result<DisconnectResponse> {
        let was_connected = self.registry.disconnect(session_key).await;

        match self.conversations.end_all_ongoing(session_key).await {
            Ok(ended) if ended > 0 => {
                info!(session_key = %session_key, ended, "force-ended ongoing conversations");
            },
            Ok(_) => {},
            Err(e) => {
                warn!(session_key = %session_key, error = %e, "failed to end ongoing conversations");
            },
        }

        self.activity
            .record(ActivityEvent::ChannelDisconnected {
                session_key: session_key.clone(),
                reason: "operator disconnect".into(),
            })
            .await;

        Ok(DisconnectResponse {
            was_connected,
            message: if was_connected {
                "disconnected".into()
            } else {
                "not initialized".into()
            },
        })
    }

    /// Send a text message through a session's live connector.
    pub async fn send(&self, session_key: &SessionKey, to: &str, body: &str) -> Result<String> {
        let connector = self
            .registry
            .get(session_key)
            .ok_or(courier_connector::Error::NotConnected)?;
        Ok(connector.send_message(to, body).await?)
    }

    /// Page through a session's conversations, newest first.
    pub async fn list_messages(&self, session_key: &SessionKey, page: u32) -> Result<MessagesPage> {
        let conversations = self
            .conversations
            .list_page(session_key, page, MESSAGES_PAGE_SIZE)
            .await?;
        Ok(MessagesPage {
            conversations,
            page,
            page_size: MESSAGES_PAGE_SIZE,
        })
    }

    /// Wire lifecycle hooks into a connector.
    ///
    /// Callback registration replaces any previous registration, so wiring
    /// an already-wired connector is harmless. The relay handler itself is
    /// (re)attached on every readiness transition.
    fn wire(&self, connector: &Arc<Connector>) {
        let session_key = connector.session_key().clone();

        // Ready: (re)attach the relay handler and record connectivity.
        {
            let weak = Arc::downgrade(connector);
            let relay = Arc::clone(&self.relay);
            let activity = Arc::clone(&self.activity);
            let session_key = session_key.clone();
            connector.on_ready(Arc::new(move |identity| {
                let Some(connector) = weak.upgrade() else {
                    return;
                };
                attach_relay_handler(&connector, &relay);

                let activity = Arc::clone(&activity);
                let session_key = session_key.clone();
                tokio::spawn(async move {
                    activity
                        .record(ActivityEvent::ChannelConnected {
                            session_key,
                            phone_number: identity.phone_number,
                        })
                        .await;
                });
            }));
        }

        // QR issued: activity trail for the pairing flow.
        {
            let activity = Arc::clone(&self.activity);
            let session_key = session_key.clone();
            connector.on_qr(Arc::new(move |_payload| {
                let activity = Arc::clone(&activity);
                let session_key = session_key.clone();
                tokio::spawn(async move {
                    activity.record(ActivityEvent::QrIssued { session_key }).await;
                });
            }));
        }

        // Disconnected: force-end the session's ongoing conversations.
        {
            let conversations = Arc::clone(&self.conversations);
            let activity = Arc::clone(&self.activity);
            connector.on_disconnect(Arc::new(move |reason| {
                let conversations = Arc::clone(&conversations);
                let activity = Arc::clone(&activity);
                let session_key = session_key.clone();
                tokio::spawn(async move {
                    match conversations.end_all_ongoing(&session_key).await {
                        Ok(ended) if ended > 0 => {
                            info!(session_key = %session_key, ended, "ended conversations after disconnect");
                        },
                        Ok(_) => {},
                        Err(e) => {
                            warn!(session_key = %session_key, error = %e, "failed to end conversations");
                        },
                    }
                    activity
                        .record(ActivityEvent::ChannelDisconnected {
                            session_key,
                            reason,
                        })
                        .await;
                });
            }));
        }
    }
}

/// Attach the relay as the connector's single message handler.
fn attach_relay_handler(connector: &Arc<Connector>, relay: &Arc<MessageRelay>) {
    let weak = Arc::downgrade(connector);
    let relay = Arc::clone(relay);
    connector.on_message(Arc::new(move |message| {
        let Some(connector) = weak.upgrade() else {
            return;
        };
        let relay = Arc::clone(&relay);
        tokio::spawn(async move {
            let session_key = connector.session_key().clone();
            relay.handle(&session_key, &message, &*connector).await;
        });
    }));
}
