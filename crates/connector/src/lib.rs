//! Channel connector: the state machine owning one QR-paired messaging
//! session, plus the process-wide registry of live connectors.
//!
//! One connector exists per session key. It wraps a protocol client behind
//! the [`client::ProtocolClient`] seam, pumps the client's events in
//! delivery order, races ready/auth-failure/timeout through a take-once
//! settle gate, deduplicates inbound messages against the shared cache, and
//! keeps the persisted connection record in step with its lifecycle.

pub mod address;
pub mod client;
pub mod connector;
pub mod error;
pub mod outbound;
pub mod qr;
pub mod registry;
pub mod session_store;
pub mod types;

pub use {
    client::{ClientFactory, EventSender, ProtocolClient},
    connector::{Connector, DEDUP_TTL, INIT_TIMEOUT, MessageHandler, QR_TIMEOUT},
    error::{Error, Result},
    outbound::ChannelOutbound,
    registry::{ConnectorDeps, ConnectorRegistry},
    session_store::DurableSessionStore,
    types::{ClientEvent, ConnectionStatus, ConnectorState, InboundMessage, QrResult, SessionInfo},
};

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_support {
    use std::{
        path::{Path, PathBuf},
        sync::{
            Arc, Mutex as StdMutex,
            atomic::{AtomicBool, Ordering},
        },
    };

    use {anyhow::Result, async_trait::async_trait};

    use courier_common::SessionKey;

    use crate::{
        client::{ClientFactory, EventSender, ProtocolClient},
        types::{ClientEvent, InboundMessage, SessionInfo},
    };

    /// Scripted protocol client: emits a fixed event sequence on `start` and
    /// records teardown/send calls.
    pub struct MockClient {
        pub events: EventSender,
        pub script: Vec<ClientEvent>,
        pub identity: StdMutex<Option<SessionInfo>>,
        pub probe_fails: AtomicBool,
        pub torn_down: AtomicBool,
        pub sent: StdMutex<Vec<(String, String)>>,
    }

    impl MockClient {
        pub fn emit(&self, event: ClientEvent) {
            let _ = self.events.send(event);
        }
    }

    #[async_trait]
    impl ProtocolClient for MockClient {
        async fn start(&self) -> Result<()> {
            for event in self.script.clone() {
                let _ = self.events.send(event);
            }
            Ok(())
        }

        async fn teardown(&self) -> Result<()> {
            self.torn_down.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn session_info(&self) -> Result<Option<SessionInfo>> {
            if self.probe_fails.load(Ordering::SeqCst) {
                anyhow::bail!("probe failed");
            }
            Ok(self.identity.lock().unwrap().clone())
        }

        async fn send_text(&self, to: &str, body: &str) -> Result<String> {
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), body.to_string()));
            Ok(format!("msg-{}", self.sent.lock().unwrap().len()))
        }
    }

    /// Factory producing [`MockClient`]s. Each build writes a fake
    /// credential file into the artifact directory (like a real client
    /// persisting a pairing) and records whether leftovers were present.
    #[derive(Default)]
    pub struct MockFactory {
        pub script: StdMutex<Vec<ClientEvent>>,
        pub identity: StdMutex<Option<SessionInfo>>,
        pub built: StdMutex<Vec<Arc<MockClient>>>,
        pub leftovers_seen: StdMutex<Vec<Vec<PathBuf>>>,
    }

    impl MockFactory {
        pub fn with_script(script: Vec<ClientEvent>) -> Arc<Self> {
            let factory = Self::default();
            *factory.script.lock().unwrap() = script;
            Arc::new(factory)
        }

        pub fn set_script(&self, script: Vec<ClientEvent>) {
            *self.script.lock().unwrap() = script;
        }

        pub fn last_client(&self) -> Arc<MockClient> {
            self.built.lock().unwrap().last().cloned().expect("no client built")
        }

        pub fn build_count(&self) -> usize {
            self.built.lock().unwrap().len()
        }
    }

    impl ClientFactory for MockFactory {
        fn build(
            &self,
            _session_key: &SessionKey,
            artifact_dir: &Path,
            events: EventSender,
        ) -> Arc<dyn ProtocolClient> {
            let leftovers: Vec<PathBuf> = std::fs::read_dir(artifact_dir)
                .map(|entries| entries.flatten().map(|e| e.path()).collect())
                .unwrap_or_default();
            self.leftovers_seen.lock().unwrap().push(leftovers);

            let _ = std::fs::create_dir_all(artifact_dir);
            let _ = std::fs::write(artifact_dir.join("creds.json"), b"{}");

            let client = Arc::new(MockClient {
                events,
                script: self.script.lock().unwrap().clone(),
                identity: StdMutex::new(self.identity.lock().unwrap().clone()),
                probe_fails: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
                sent: StdMutex::new(Vec::new()),
            });
            self.built.lock().unwrap().push(Arc::clone(&client));
            client
        }
    }

    /// In-memory connection record store for connector tests.
    #[derive(Default)]
    pub struct MockConnectionStore {
        pub records: StdMutex<std::collections::HashMap<String, courier_store::ConnectionRecord>>,
    }

    #[async_trait]
    impl courier_store::ConnectionStore for MockConnectionStore {
        async fn get(
            &self,
            session_key: &SessionKey,
        ) -> Result<Option<courier_store::ConnectionRecord>> {
            Ok(self.records.lock().unwrap().get(&session_key.to_string()).cloned())
        }

        async fn upsert(&self, record: courier_store::ConnectionRecord) -> Result<()> {
            self.records
                .lock()
                .unwrap()
                .insert(record.session_key.to_string(), record);
            Ok(())
        }

        async fn delete(&self, session_key: &SessionKey) -> Result<()> {
            self.records.lock().unwrap().remove(&session_key.to_string());
            Ok(())
        }
    }

    pub fn inbound(id: &str, body: &str) -> InboundMessage {
        InboundMessage {
            id: id.to_string(),
            chat_address: "15550001111@c.us".into(),
            sender_address: "15550001111@c.us".into(),
            sender_name: Some("Ada".into()),
            body: body.to_string(),
            has_media: false,
            self_sent: false,
            timestamp: 1_700_000_000,
        }
    }
}
