use crate::api::LLMApiProvider;
use crate::error::{ChatError, Result};
use crate::models::{Message, Session};
use crate::repository::SessionRepository;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Text that replaces the reply when generation fails.
pub const APOLOGY: &str =
    "Entschuldigung, ein Fehler ist aufgetreten. Bitte versuchen Sie es erneut.";

const EVENT_CAPACITY: usize = 256;

/// Where a send operation currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SendPhase {
    Idle,
    Sending,
    Streaming,
    Committed,
    Failed,
}

/// What the user submitted: text and an optional image data URL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub text: String,
    pub image: Option<String>,
}

impl OutgoingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            image: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.image.is_none()
    }
}

/// Result of a finished send. `phase` is either `Committed` or `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub struct SendOutcome {
    pub session: Session,
    pub reply_id: String,
    pub phase: SendPhase,
    pub error: Option<String>,
}

/// Notifications for observers that re-render on every commit.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChatEvent {
    #[serde(rename_all = "camelCase")]
    PhaseChanged { session_id: String, phase: SendPhase },
    #[serde(rename_all = "camelCase")]
    Fragment {
        session_id: String,
        message_id: String,
        delta: String,
    },
    #[serde(rename_all = "camelCase")]
    Finished {
        session_id: String,
        message_id: String,
        phase: SendPhase,
    },
}

/// Removes the in-flight marker of a session however the send ends.
struct InFlightGuard<'a> {
    in_flight: &'a DashMap<String, SendPhase>,
    session_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.session_id);
    }
}

/// Runs sends: user message, streamed reply, apology on failure.
pub struct ConversationController {
    repository: Arc<Mutex<SessionRepository>>,
    provider: Arc<dyn LLMApiProvider>,
    in_flight: DashMap<String, SendPhase>,
    events: broadcast::Sender<ChatEvent>,
}

impl ConversationController {
    pub fn new(repository: Arc<Mutex<SessionRepository>>, provider: Arc<dyn LLMApiProvider>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            repository,
            provider,
            in_flight: DashMap::new(),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }

    pub fn phase(&self, session_id: &str) -> SendPhase {
        self.in_flight
            .get(session_id)
            .map(|phase| *phase)
            .unwrap_or(SendPhase::Idle)
    }

    /// True while a send for the session is in `Sending` or `Streaming`.
    pub fn is_busy(&self, session_id: &str) -> bool {
        matches!(
            self.phase(session_id),
            SendPhase::Sending | SendPhase::Streaming
        )
    }

    /// Some session that currently has a send in `Sending` or `Streaming`.
    pub fn busy_session(&self) -> Option<String> {
        self.in_flight
            .iter()
            .find(|entry| matches!(*entry.value(), SendPhase::Sending | SendPhase::Streaming))
            .map(|entry| entry.key().clone())
    }

    /// Sends `outgoing` in the given session and streams the reply into it.
    ///
    /// Generation failures are not errors here: the reply becomes [`APOLOGY`]
    /// and the outcome reports `Failed`. Errors are returned for empty input,
    /// unknown sessions, a send already in flight, and storage failures.
    pub async fn send(&self, session_id: &str, outgoing: OutgoingMessage) -> Result<SendOutcome> {
        if outgoing.is_empty() {
            log::debug!("Ignoring empty submit for session {}", session_id);
            return Err(ChatError::Validation("message is empty".to_string()));
        }

        let _guard = self.begin(session_id)?;
        self.set_phase(session_id, SendPhase::Sending);

        // --- Sending: append and persist the user message ---
        let (history, profile, reply_id) = {
            let mut repository = self.repository.lock().await;
            let mut session = repository
                .select(session_id)
                .cloned()
                .ok_or_else(|| ChatError::NotFound(session_id.to_string()))?;
            let history = session.messages.clone();
            let profile = session.profile;

            session
                .messages
                .push(Message::user(outgoing.text.clone(), outgoing.image.clone()));
            let reply = Message::placeholder();
            let reply_id = reply.id.clone();
            repository.update(session.clone()).await?;
            log::info!("User message saved in session {}", session_id);

            // --- Streaming: the empty reply is visible before the first fragment ---
            self.set_phase(session_id, SendPhase::Streaming);
            session.messages.push(reply);
            repository.update(session).await?;
            (history, profile, reply_id)
        };

        log::info!(
            "Starting stream for session {} ({} prior messages, {} profile)",
            session_id,
            history.len(),
            profile
        );
        let mut reply_text = String::new();
        let failure = match self
            .provider
            .stream_reply(&history, &outgoing.text, outgoing.image.as_deref(), profile)
            .await
        {
            Err(e) => Some(e),
            Ok(mut stream) => {
                let mut failure = None;
                while let Some(delta_result) = stream.next().await {
                    match delta_result {
                        Ok(delta) => {
                            log::debug!("[{}] Received fragment ({} bytes)", reply_id, delta.len());
                            reply_text.push_str(&delta);
                            self.commit_reply(session_id, &reply_id, &reply_text).await?;
                            let _ = self.events.send(ChatEvent::Fragment {
                                session_id: session_id.to_string(),
                                message_id: reply_id.clone(),
                                delta,
                            });
                        }
                        Err(e) => {
                            failure = Some(e);
                            break;
                        }
                    }
                }
                failure
            }
        };

        let (phase, error, session) = match failure {
            None => {
                let session = self.commit_reply(session_id, &reply_id, &reply_text).await?;
                log::info!("[{}] Reply committed ({} chars)", reply_id, reply_text.len());
                (SendPhase::Committed, None, session)
            }
            Some(e) => {
                log::error!("[{}] Generation failed for session {}: {}", reply_id, session_id, e);
                let session = self.commit_reply(session_id, &reply_id, APOLOGY).await?;
                (SendPhase::Failed, Some(e.to_string()), session)
            }
        };

        self.set_phase(session_id, phase);
        let _ = self.events.send(ChatEvent::Finished {
            session_id: session_id.to_string(),
            message_id: reply_id.clone(),
            phase,
        });

        Ok(SendOutcome {
            session,
            reply_id,
            phase,
            error,
        })
    }

    fn begin(&self, session_id: &str) -> Result<InFlightGuard<'_>> {
        match self.in_flight.entry(session_id.to_string()) {
            Entry::Occupied(_) => {
                log::warn!("Rejected send for session {}: reply still in flight", session_id);
                Err(ChatError::SendInProgress(session_id.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert(SendPhase::Sending);
                Ok(InFlightGuard {
                    in_flight: &self.in_flight,
                    session_id: session_id.to_string(),
                })
            }
        }
    }

    fn set_phase(&self, session_id: &str, phase: SendPhase) {
        if let Some(mut current) = self.in_flight.get_mut(session_id) {
            *current = phase;
        }
        let _ = self.events.send(ChatEvent::PhaseChanged {
            session_id: session_id.to_string(),
            phase,
        });
    }

    /// Writes the reply text into the stored session, leaving every other field
    /// as it currently is.
    async fn commit_reply(&self, session_id: &str, reply_id: &str, text: &str) -> Result<Session> {
        let mut repository = self.repository.lock().await;
        let mut session = repository
            .select(session_id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound(session_id.to_string()))?;
        if let Some(reply) = session.messages.iter_mut().find(|m| m.id == reply_id) {
            reply.text = text.to_string();
        } else {
            log::warn!("[{}] Reply vanished from session {}", reply_id, session_id);
        }
        repository.update(session).await
    }
}
