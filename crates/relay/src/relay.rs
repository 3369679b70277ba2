use std::{sync::Arc, time::Duration};

use tracing::{debug, error, info, warn};

use {
    courier_backend::{AgentBackend, ConversationContext},
    courier_cache::{Cache, CreationLock},
    courier_common::{ActivityEvent, ActivityLog, SessionKey},
    courier_connector::{ChannelOutbound, InboundMessage, address},
    courier_store::{Conversation, ConversationStore},
};

use crate::error::Result;

/// Channel type reported to the backend as conversation context.
pub const CHANNEL_TYPE: &str = "chat-web";

/// How long to wait before re-checking when the creation lock is held by a
/// concurrent request.
pub const LOCK_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Placeholder forwarded when a message carries an attachment but no text.
const ATTACHMENT_PLACEHOLDER: &str = "[attachment]";

/// Generic reply sent to the contact when the relay fails mid-flight.
pub const APOLOGY_MESSAGE: &str =
    "Sorry, something went wrong while handling your message. Please try again in a moment.";

/// Sentinel turn content with which the backend ends a conversation.
const CONVERSATION_ENDED: &str = "conversation_ended";

/// What the relay did with one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Nothing to relay (no text, no attachment).
    Skipped,
    /// Forwarded to the backend; `replied` says whether an agent reply went
    /// back out through the channel.
    Relayed {
        conversation_id: String,
        replied: bool,
    },
    /// The relay failed; an apology was attempted.
    Failed { apology_sent: bool },
}

/// Relays deduplicated inbound messages to the remote agent backend.
pub struct MessageRelay {
    backend: Arc<dyn AgentBackend>,
    conversations: Arc<dyn ConversationStore>,
    cache: Arc<dyn Cache>,
    activity: Arc<dyn ActivityLog>,
}

impl MessageRelay {
    #[must_use]
    pub fn new(
        backend: Arc<dyn AgentBackend>,
        conversations: Arc<dyn ConversationStore>,
        cache: Arc<dyn Cache>,
        activity: Arc<dyn ActivityLog>,
    ) -> Self {
        Self {
            backend,
            conversations,
            cache,
            activity,
        }
    }

    /// Handle one inbound message end to end.
    ///
    /// Never propagates an error: any mid-relay failure is logged, answered
    /// with a single apology message (best-effort) and reported in the
    /// returned outcome.
    pub async fn handle(
        &self,
        session_key: &SessionKey,
        message: &InboundMessage,
        outbound: &dyn ChannelOutbound,
    ) -> RelayOutcome {
        if message.body.trim().is_empty() && !message.has_media {
            debug!(session_key = %session_key, message_id = %message.id, "skipping empty message");
            return RelayOutcome::Skipped;
        }

        let contact = address::contact_from_wire(&message.sender_address);

        match self.relay(session_key, &contact, message, outbound).await {
            Ok(outcome) => {
                if let RelayOutcome::Relayed {
                    conversation_id, ..
                } = &outcome
                {
                    self.activity
                        .record(ActivityEvent::MessageRelayed {
                            session_key: session_key.clone(),
                            contact: contact.clone(),
                            conversation_id: conversation_id.clone(),
                        })
                        .await;
                }
                outcome
            },
            Err(e) => {
                error!(session_key = %session_key, contact = %contact, error = %e, "relay failed");
                self.activity
                    .record(ActivityEvent::RelayFailed {
                        session_key: session_key.clone(),
                        contact: contact.clone(),
                        error: e.to_string(),
                    })
                    .await;

                let apology_sent = match outbound
                    .send_text(&message.chat_address, APOLOGY_MESSAGE)
                    .await
                {
                    Ok(_) => true,
                    Err(send_err) => {
                        warn!(
                            session_key = %session_key,
                            error = %send_err,
                            "failed to deliver apology message"
                        );
                        false
                    },
                };
                RelayOutcome::Failed { apology_sent }
            },
        }
    }

    async fn relay(
        &self,
        session_key: &SessionKey,
        contact: &str,
        message: &InboundMessage,
        outbound: &dyn ChannelOutbound,
    ) -> Result<RelayOutcome> {
        let conversation = self
            .resolve_or_create(session_key, contact, message.sender_name.as_deref())
            .await?;

        let text = if message.body.trim().is_empty() {
            ATTACHMENT_PLACEHOLDER
        } else {
            message.body.as_str()
        };

        let response = self
            .backend
            .send_turn(&conversation.conversation_id, text)
            .await?;
        self.conversations
            .update_transcript(&conversation.id, &response.turns)
            .await?;

        // The backend ends a conversation with a sentinel system turn.
        let ended = response
            .turns
            .iter()
            .any(|t| t.role == "system" && t.content == CONVERSATION_ENDED);
        if ended {
            info!(session_key = %session_key, contact, "backend ended conversation");
            self.conversations.end(&conversation.id).await?;
            return Ok(RelayOutcome::Relayed {
                conversation_id: conversation.conversation_id,
                replied: false,
            });
        }

        let reply = response
            .latest_reply()
            .map(|t| t.content.trim().to_string())
            .filter(|content| !content.is_empty());

        let replied = match reply {
            Some(content) => {
                outbound.send_text(&message.chat_address, &content).await?;
                true
            },
            None => {
                debug!(session_key = %session_key, contact, "backend produced no reply");
                false
            },
        };

        Ok(RelayOutcome::Relayed {
            conversation_id: conversation.conversation_id,
            replied,
        })
    }

    /// Resolve the ongoing conversation for a contact, creating it at most
    /// once under the creation lock.
    ///
    /// Two near-simultaneous first messages race here: the loser of the
    /// lock waits briefly and re-checks before creating, so both resolve to
    /// the same conversation. If the lock never frees we proceed anyway —
    /// duplicate-conversation risk is accepted over availability loss.
    async fn resolve_or_create(
        &self,
        session_key: &SessionKey,
        contact: &str,
        contact_name: Option<&str>,
    ) -> Result<Conversation> {
        if let Some(existing) = self
            .conversations
            .find_ongoing(session_key, contact)
            .await?
        {
            return Ok(existing);
        }

        let lock = CreationLock::new(
            Arc::clone(&self.cache),
            format!("conv-lock:{session_key}:{contact}"),
        );

        let mut held = lock.try_acquire().await;
        if !held {
            tokio::time::sleep(LOCK_RETRY_DELAY).await;
            if let Some(existing) = self
                .conversations
                .find_ongoing(session_key, contact)
                .await?
            {
                return Ok(existing);
            }
            held = lock.try_acquire().await;
            if !held {
                warn!(
                    session_key = %session_key,
                    contact,
                    "creation lock still held, proceeding without it"
                );
            }
        }

        // Release on every path below, success or failure.
        let created = self
            .create_conversation(session_key, contact, contact_name)
            .await;
        if held {
            lock.release().await;
        }
        created
    }

    async fn create_conversation(
        &self,
        session_key: &SessionKey,
        contact: &str,
        contact_name: Option<&str>,
    ) -> Result<Conversation> {
        // Double-check under the lock: the racing request may have won.
        if let Some(existing) = self
            .conversations
            .find_ongoing(session_key, contact)
            .await?
        {
            return Ok(existing);
        }

        let context = ConversationContext {
            contact_address: contact.to_string(),
            contact_name: contact_name.map(str::to_string),
            channel: CHANNEL_TYPE.to_string(),
        };
        let conversation_id = self
            .backend
            .create_conversation(session_key.agent_id(), &context)
            .await?;

        let conversation = Conversation::ongoing(
            session_key.clone(),
            contact,
            contact_name.map(str::to_string),
            conversation_id,
        );
        self.conversations.insert(conversation.clone()).await?;

        info!(
            session_key = %session_key,
            contact,
            conversation_id = %conversation.conversation_id,
            "created conversation"
        );
        Ok(conversation)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex as StdMutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use {
        async_trait::async_trait,
        courier_backend::{Turn, TurnResponse},
        courier_cache::MemoryCache,
        courier_common::NullActivityLog,
        courier_store::ConversationStatus,
    };

    use super::*;

    // ── Mocks ────────────────────────────────────────────────────────────

    struct MockBackend {
        create_calls: AtomicUsize,
        create_delay: Duration,
        fail_turns: AtomicBool,
        turns: StdMutex<Vec<Turn>>,
    }

    impl Default for MockBackend {
        fn default() -> Self {
            Self {
                create_calls: AtomicUsize::new(0),
                create_delay: Duration::ZERO,
                fail_turns: AtomicBool::new(false),
                turns: StdMutex::new(vec![
                    Turn::new("user", "hi"),
                    Turn::new("assistant", "hello there"),
                ]),
            }
        }
    }

    #[async_trait]
    impl AgentBackend for MockBackend {
        async fn create_conversation(
            &self,
            _agent_id: &str,
            _context: &ConversationContext,
        ) -> courier_backend::Result<String> {
            tokio::time::sleep(self.create_delay).await;
            let n = self.create_calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("conv-{n}"))
        }

        async fn send_turn(
            &self,
            _conversation_id: &str,
            _text: &str,
        ) -> courier_backend::Result<TurnResponse> {
            if self.fail_turns.load(Ordering::SeqCst) {
                return Err(courier_backend::Error::unavailable("backend down"));
            }
            Ok(TurnResponse {
                turns: self.turns.lock().unwrap().clone(),
            })
        }
    }

    /// In-memory conversation store; a `Mutex<Vec<_>>` is enough to model
    /// the lookup/insert race.
    #[derive(Default)]
    struct MockConversationStore {
        conversations: StdMutex<Vec<Conversation>>,
    }

    #[async_trait]
    impl ConversationStore for MockConversationStore {
        async fn find_ongoing(
            &self,
            session_key: &SessionKey,
            contact_address: &str,
        ) -> anyhow::Result<Option<Conversation>> {
            Ok(self
                .conversations
                .lock()
                .unwrap()
                .iter()
                .find(|c| {
                    c.session_key == *session_key
                        && c.contact_address == contact_address
                        && c.status == ConversationStatus::Ongoing
                })
                .cloned())
        }

        async fn insert(&self, conversation: Conversation) -> anyhow::Result<()> {
            self.conversations.lock().unwrap().push(conversation);
            Ok(())
        }

        async fn update_transcript(
            &self,
            id: &str,
            transcript: &[Turn],
        ) -> anyhow::Result<()> {
            let mut conversations = self.conversations.lock().unwrap();
            if let Some(c) = conversations.iter_mut().find(|c| c.id == id) {
                c.transcript = transcript.to_vec();
            }
            Ok(())
        }

        async fn end(&self, id: &str) -> anyhow::Result<()> {
            let mut conversations = self.conversations.lock().unwrap();
            if let Some(c) = conversations.iter_mut().find(|c| c.id == id) {
                c.status = ConversationStatus::Ended;
            }
            Ok(())
        }

        async fn end_all_ongoing(&self, session_key: &SessionKey) -> anyhow::Result<u64> {
            let mut conversations = self.conversations.lock().unwrap();
            let mut ended = 0;
            for c in conversations
                .iter_mut()
                .filter(|c| c.session_key == *session_key)
            {
                if c.status == ConversationStatus::Ongoing {
                    c.status = ConversationStatus::Ended;
                    ended += 1;
                }
            }
            Ok(ended)
        }

        async fn list_page(
            &self,
            session_key: &SessionKey,
            _page: u32,
            _page_size: u32,
        ) -> anyhow::Result<Vec<Conversation>> {
            Ok(self
                .conversations
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.session_key == *session_key)
                .cloned()
                .collect())
        }
    }

    #[derive(Default)]
    struct MockOutbound {
        sent: StdMutex<Vec<(String, String)>>,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ChannelOutbound for MockOutbound {
        async fn send_text(&self, to: &str, body: &str) -> courier_connector::Result<String> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(courier_connector::Error::NotConnected);
            }
            let mut sent = self.sent.lock().unwrap();
            sent.push((to.to_string(), body.to_string()));
            Ok(format!("out-{}", sent.len()))
        }
    }

    struct Fixture {
        relay: MessageRelay,
        backend: Arc<MockBackend>,
        conversations: Arc<MockConversationStore>,
        outbound: MockOutbound,
    }

    fn fixture() -> Fixture {
        fixture_with_backend(MockBackend::default())
    }

    fn fixture_with_backend(backend: MockBackend) -> Fixture {
        let backend = Arc::new(backend);
        let conversations = Arc::new(MockConversationStore::default());
        let relay = MessageRelay::new(
            Arc::clone(&backend) as Arc<dyn AgentBackend>,
            Arc::clone(&conversations) as Arc<dyn ConversationStore>,
            Arc::new(MemoryCache::new()),
            Arc::new(NullActivityLog),
        );
        Fixture {
            relay,
            backend,
            conversations,
            outbound: MockOutbound::default(),
        }
    }

    fn key() -> SessionKey {
        SessionKey::new("t1", "a1")
    }

    fn inbound(id: &str, body: &str) -> InboundMessage {
        InboundMessage {
            id: id.to_string(),
            chat_address: "15550001111@c.us".into(),
            sender_address: "15550001111@c.us".into(),
            sender_name: Some("Ada".into()),
            body: body.into(),
            has_media: false,
            self_sent: false,
            timestamp: 1_700_000_000,
        }
    }

    // ── Tests ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn relays_message_and_sends_reply() {
        let fx = fixture();
        let outcome = fx.relay.handle(&key(), &inbound("m1", "hi"), &fx.outbound).await;

        assert_eq!(
            outcome,
            RelayOutcome::Relayed {
                conversation_id: "conv-0".into(),
                replied: true,
            }
        );
        let sent = fx.outbound.sent.lock().unwrap().clone();
        assert_eq!(
            sent,
            vec![("15550001111@c.us".to_string(), "hello there".to_string())]
        );

        // Transcript persisted against the created conversation.
        let conversations = fx.conversations.conversations.lock().unwrap();
        assert_eq!(conversations.len(), 1);
        assert_eq!(conversations[0].transcript.len(), 2);
        assert_eq!(conversations[0].contact_address, "+15550001111");
    }

    #[tokio::test]
    async fn skips_message_with_no_text_and_no_attachment() {
        let fx = fixture();
        let outcome = fx.relay.handle(&key(), &inbound("m1", "   "), &fx.outbound).await;
        assert_eq!(outcome, RelayOutcome::Skipped);
        assert_eq!(fx.backend.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn forwards_placeholder_for_attachment_only_message() {
        let fx = fixture();
        let mut message = inbound("m1", "");
        message.has_media = true;

        let outcome = fx.relay.handle(&key(), &message, &fx.outbound).await;
        assert!(matches!(outcome, RelayOutcome::Relayed { .. }));
    }

    #[tokio::test]
    async fn reuses_existing_ongoing_conversation() {
        let fx = fixture();
        fx.relay.handle(&key(), &inbound("m1", "hi"), &fx.outbound).await;
        fx.relay.handle(&key(), &inbound("m2", "again"), &fx.outbound).await;

        assert_eq!(fx.backend.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.conversations.conversations.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_messages_create_one_conversation() {
        let mut backend = MockBackend::default();
        // Widen the race: creation takes a while.
        backend.create_delay = Duration::from_millis(100);
        let fx = Arc::new(fixture_with_backend(backend));

        let a = {
            let fx = Arc::clone(&fx);
            tokio::spawn(async move {
                fx.relay.handle(&key(), &inbound("m1", "hi"), &fx.outbound).await
            })
        };
        let b = {
            let fx = Arc::clone(&fx);
            tokio::spawn(async move {
                fx.relay.handle(&key(), &inbound("m2", "hello"), &fx.outbound).await
            })
        };

        let (a, b) = (a.await.unwrap(), b.await.unwrap());
        let conversation_id = |outcome: &RelayOutcome| match outcome {
            RelayOutcome::Relayed {
                conversation_id, ..
            } => conversation_id.clone(),
            other => panic!("unexpected outcome: {other:?}"),
        };

        // Both messages resolved to the same conversation.
        assert_eq!(conversation_id(&a), conversation_id(&b));
        assert_eq!(fx.backend.create_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.conversations.conversations.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn backend_failure_sends_exactly_one_apology() {
        let fx = fixture();
        fx.backend.fail_turns.store(true, Ordering::SeqCst);

        let outcome = fx.relay.handle(&key(), &inbound("m1", "hi"), &fx.outbound).await;
        assert_eq!(outcome, RelayOutcome::Failed { apology_sent: true });

        let sent = fx.outbound.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, APOLOGY_MESSAGE);
    }

    #[tokio::test]
    async fn apology_failure_is_swallowed() {
        let fx = fixture();
        fx.backend.fail_turns.store(true, Ordering::SeqCst);
        fx.outbound.fail.store(true, Ordering::SeqCst);

        let outcome = fx.relay.handle(&key(), &inbound("m1", "hi"), &fx.outbound).await;
        assert_eq!(outcome, RelayOutcome::Failed { apology_sent: false });
    }

    #[tokio::test]
    async fn empty_reply_is_not_sent() {
        let fx = fixture();
        *fx.backend.turns.lock().unwrap() = vec![Turn::new("user", "hi"), Turn::new("assistant", "  ")];

        let outcome = fx.relay.handle(&key(), &inbound("m1", "hi"), &fx.outbound).await;
        assert_eq!(
            outcome,
            RelayOutcome::Relayed {
                conversation_id: "conv-0".into(),
                replied: false,
            }
        );
        assert!(fx.outbound.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn reply_falls_back_to_last_turn_without_assistant_role() {
        let fx = fixture();
        *fx.backend.turns.lock().unwrap() =
            vec![Turn::new("user", "hi"), Turn::new("agent", "fallback reply")];

        fx.relay.handle(&key(), &inbound("m1", "hi"), &fx.outbound).await;
        let sent = fx.outbound.sent.lock().unwrap().clone();
        assert_eq!(sent[0].1, "fallback reply");
    }

    #[tokio::test]
    async fn backend_ending_turn_closes_conversation() {
        let fx = fixture();
        *fx.backend.turns.lock().unwrap() = vec![
            Turn::new("user", "bye"),
            Turn::new("system", "conversation_ended"),
        ];

        let outcome = fx.relay.handle(&key(), &inbound("m1", "bye"), &fx.outbound).await;
        assert_eq!(
            outcome,
            RelayOutcome::Relayed {
                conversation_id: "conv-0".into(),
                replied: false,
            }
        );
        assert!(fx.outbound.sent.lock().unwrap().is_empty());

        let conversations = fx.conversations.conversations.lock().unwrap();
        assert_eq!(conversations[0].status, ConversationStatus::Ended);
    }
}
