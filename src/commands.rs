// Operations the presentation layer calls

use crate::controller::{OutgoingMessage, SendOutcome};
use crate::error::{ChatError, Result};
use crate::models::{Profile, Session};
use crate::state::AppState;

pub async fn list_sessions(state: &AppState) -> Vec<Session> {
    log::debug!("Listing sessions");
    let repository = state.repository.lock().await;
    repository.list().into_iter().cloned().collect()
}

pub async fn create_session(state: &AppState) -> Result<Session> {
    log::info!("Requested new session");
    let mut repository = state.repository.lock().await;
    repository.create().await
}

pub async fn select_session(state: &AppState, session_id: &str) -> Result<Session> {
    log::info!("Requested to select session {}", session_id);
    let mut repository = state.repository.lock().await;
    repository.activate(session_id)?;
    repository
        .select(session_id)
        .cloned()
        .ok_or_else(|| ChatError::NotFound(session_id.to_string()))
}

pub async fn get_active_session(state: &AppState) -> Option<Session> {
    let repository = state.repository.lock().await;
    repository.active().cloned()
}

/// Deletes a session and returns the session that is active afterwards.
pub async fn delete_session(state: &AppState, session_id: &str) -> Result<Option<Session>> {
    log::warn!("Requested to delete session {}", session_id);
    let mut repository = state.repository.lock().await;
    // A send that starts after this check waits for the lock and then finds
    // the session gone.
    if state.controller.is_busy(session_id) {
        return Err(ChatError::SendInProgress(session_id.to_string()));
    }
    repository.delete(session_id).await?;
    Ok(repository.active().cloned())
}

pub async fn clear_all_sessions(state: &AppState) -> Result<()> {
    log::warn!("Requested to clear all sessions");
    let mut repository = state.repository.lock().await;
    if let Some(busy) = state.controller.busy_session() {
        return Err(ChatError::SendInProgress(busy));
    }
    repository.clear_all().await
}

pub async fn set_session_profile(state: &AppState, session_id: &str, profile: Profile) -> Result<Session> {
    log::info!("Requested {} profile for session {}", profile, session_id);
    let mut repository = state.repository.lock().await;
    repository.set_profile(session_id, profile).await
}

/// Sends a message in the active session and waits for the reply to finish.
pub async fn send_message(state: &AppState, outgoing: OutgoingMessage) -> Result<SendOutcome> {
    let session_id = {
        let repository = state.repository.lock().await;
        repository.active_id().map(str::to_string)
    };
    let Some(session_id) = session_id else {
        return Err(ChatError::Validation("no session selected".to_string()));
    };
    log::info!("Requested to send message to session {}", session_id);
    state.controller.send(&session_id, outgoing).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::controller::{ChatEvent, SendPhase, APOLOGY};
    use crate::mock::{MockProvider, MockResponse};
    use crate::storage::MemoryStore;
    use std::sync::Arc;
    use tokio::sync::oneshot;

    async fn state(responses: Vec<MockResponse>) -> AppState {
        AppState::new(
            AppConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(MockProvider::new(responses)),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn send_requires_an_active_session() {
        let state = state(vec![]).await;
        let result = send_message(&state, OutgoingMessage::text("Hallo")).await;
        assert!(matches!(result, Err(ChatError::Validation(_))));
    }

    #[tokio::test]
    async fn conversation_flow_through_commands() {
        let state = state(vec![
            MockResponse::text(&["Servus", "!"]),
            MockResponse::FailToOpen(ChatError::Transport("offline".into())),
        ])
        .await;

        let first = create_session(&state).await.unwrap();
        let second = create_session(&state).await.unwrap();
        assert_eq!(get_active_session(&state).await.unwrap().id, second.id);

        select_session(&state, &first.id).await.unwrap();
        set_session_profile(&state, &first.id, Profile::Fast).await.unwrap();
        let outcome = send_message(&state, OutgoingMessage::text("Hallo Xantium"))
            .await
            .unwrap();
        assert_eq!(outcome.session.id, first.id);
        assert_eq!(outcome.session.profile, Profile::Fast);
        assert_eq!(outcome.session.messages[1].text, "Servus!");

        let failed = send_message(&state, OutgoingMessage::text("Noch da?"))
            .await
            .unwrap();
        assert_eq!(failed.phase, SendPhase::Failed);
        assert_eq!(failed.session.messages.len(), 4);
        assert_eq!(failed.session.messages[3].text, APOLOGY);

        let listed = list_sessions(&state).await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].title, "Hallo Xantium...");

        let now_active = delete_session(&state, &first.id).await.unwrap();
        assert_eq!(now_active.map(|s| s.id), Some(second.id));

        clear_all_sessions(&state).await.unwrap();
        assert!(list_sessions(&state).await.is_empty());
        assert!(get_active_session(&state).await.is_none());
    }

    #[tokio::test]
    async fn selecting_unknown_session_fails() {
        let state = state(vec![]).await;
        assert!(matches!(
            select_session(&state, "no-such-session").await,
            Err(ChatError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn delete_and_clear_are_rejected_while_a_reply_streams() {
        let (open, gate) = oneshot::channel();
        let state = state(vec![MockResponse::Gated(gate, vec!["fertig".into()])]).await;
        let session = create_session(&state).await.unwrap();
        let mut events = state.controller.subscribe();

        let sending = state.clone();
        let running = tokio::spawn(async move {
            send_message(&sending, OutgoingMessage::text("Bitte warten")).await
        });
        while !matches!(
            events.recv().await.unwrap(),
            ChatEvent::PhaseChanged {
                phase: SendPhase::Streaming,
                ..
            }
        ) {}

        assert!(matches!(
            delete_session(&state, &session.id).await,
            Err(ChatError::SendInProgress(id)) if id == session.id
        ));
        assert!(matches!(
            clear_all_sessions(&state).await,
            Err(ChatError::SendInProgress(id)) if id == session.id
        ));
        assert_eq!(list_sessions(&state).await.len(), 1);

        open.send(()).unwrap();
        let outcome = running.await.unwrap().unwrap();
        assert_eq!(outcome.phase, SendPhase::Committed);
        assert_eq!(outcome.session.messages[1].text, "fertig");

        clear_all_sessions(&state).await.unwrap();
        assert!(list_sessions(&state).await.is_empty());
    }
}
