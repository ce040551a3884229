use crate::error::{ChatError, Result};
use crate::models::{Profile, Session};
use crate::storage::{self, PersistentStore};
use std::sync::Arc;

/// Owns every session and the active selection.
///
/// Each mutation builds the new session list, writes it to the store and only
/// then swaps it in, so a failed write leaves memory and disk in agreement.
pub struct SessionRepository {
    store: Arc<dyn PersistentStore>,
    key: String,
    // Newest first.
    sessions: Vec<Session>,
    active: Option<String>,
}

impl SessionRepository {
    /// Reads the stored sessions and selects the newest one.
    pub async fn load(store: Arc<dyn PersistentStore>, key: &str) -> Result<Self> {
        let mut sessions = storage::load_sessions(store.as_ref(), key).await?;
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let active = sessions.first().map(|s| s.id.clone());
        Ok(Self {
            store,
            key: key.to_string(),
            sessions,
            active,
        })
    }

    /// Sessions ordered by creation time, newest first.
    pub fn list(&self) -> Vec<&Session> {
        let mut sessions: Vec<&Session> = self.sessions.iter().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn select(&self, id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_deref().and_then(|id| self.select(id))
    }

    /// Makes `id` the active session.
    pub fn activate(&mut self, id: &str) -> Result<()> {
        if self.select(id).is_none() {
            return Err(ChatError::NotFound(id.to_string()));
        }
        self.active = Some(id.to_string());
        Ok(())
    }

    /// Creates an empty session, stores it as the newest and activates it.
    pub async fn create(&mut self) -> Result<Session> {
        let session = Session::new();
        let mut next = Vec::with_capacity(self.sessions.len() + 1);
        next.push(session.clone());
        next.extend(self.sessions.iter().cloned());

        self.commit(next).await?;
        self.active = Some(session.id.clone());
        log::info!("Created session {}", session.id);
        Ok(session)
    }

    /// Replaces the stored session with the same id, deriving its title first.
    /// Returns the session as stored.
    pub async fn update(&mut self, mut session: Session) -> Result<Session> {
        let index = self.position(&session.id)?;
        session.derive_title();

        let mut next = self.sessions.clone();
        next[index] = session.clone();
        self.commit(next).await?;
        Ok(session)
    }

    /// Removes a session. If it was active, the newest remaining one takes over.
    pub async fn delete(&mut self, id: &str) -> Result<()> {
        let index = self.position(id)?;
        let mut next = self.sessions.clone();
        next.remove(index);
        self.commit(next).await?;

        if self.active.as_deref() == Some(id) {
            self.active = self.list().first().map(|s| s.id.clone());
        }
        log::warn!("Deleted session {}", id);
        Ok(())
    }

    pub async fn clear_all(&mut self) -> Result<()> {
        self.commit(Vec::new()).await?;
        self.active = None;
        log::warn!("Cleared all sessions");
        Ok(())
    }

    /// Changes only the profile; the message history is untouched.
    pub async fn set_profile(&mut self, id: &str, profile: Profile) -> Result<Session> {
        let index = self.position(id)?;
        let mut next = self.sessions.clone();
        next[index].profile = profile;
        let updated = next[index].clone();
        self.commit(next).await?;
        log::info!("Session {} now uses the {} profile", id, profile);
        Ok(updated)
    }

    fn position(&self, id: &str) -> Result<usize> {
        self.sessions
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| ChatError::NotFound(id.to_string()))
    }

    async fn commit(&mut self, next: Vec<Session>) -> Result<()> {
        if let Err(e) = storage::save_sessions(self.store.as_ref(), &self.key, &next).await {
            log::error!("Failed to persist {} sessions: {}", next.len(), e);
            return Err(e);
        }
        self.sessions = next;
        Ok(())
    }
}
