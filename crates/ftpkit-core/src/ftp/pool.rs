//! Connection manager: every open session keyed by id, plus the one the
//! user is currently working with.

use crate::ftp::client::FtpSession;
use crate::ftp::error::{FtpError, FtpResult};
use std::collections::HashMap;

/// Open sessions and the current one.
#[derive(Default)]
pub struct FtpPool {
    sessions: HashMap<String, FtpSession>,
    /// Insertion order, for listing.
    order: Vec<String>,
    current: Option<String>,
}

impl FtpPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Add a session; the first one becomes current.
    pub fn insert(&mut self, session: FtpSession) -> String {
        let id = session.id.clone();
        if self.sessions.insert(id.clone(), session).is_none() {
            self.order.push(id.clone());
        }
        if self.current.is_none() {
            self.current = Some(id.clone());
        }
        id
    }

    pub fn get(&self, id: &str) -> FtpResult<&FtpSession> {
        self.sessions
            .get(id)
            .ok_or_else(|| FtpError::session_not_found(id))
    }

    pub fn get_mut(&mut self, id: &str) -> FtpResult<&mut FtpSession> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| FtpError::session_not_found(id))
    }

    /// Make `id` the current session.
    pub fn use_session(&mut self, id: &str) -> FtpResult<()> {
        if !self.sessions.contains_key(id) {
            return Err(FtpError::session_not_found(id));
        }
        log::debug!("switching to session {}", id);
        self.current = Some(id.to_string());
        Ok(())
    }

    pub fn current_id(&self) -> Option<&str> {
        self.current.as_deref()
    }

    pub fn current_mut(&mut self) -> FtpResult<&mut FtpSession> {
        let id = self
            .current
            .clone()
            .ok_or_else(|| FtpError::session_not_found("(current)"))?;
        self.get_mut(&id)
    }

    /// Borrow two distinct sessions at once (FxP needs both ends).
    pub fn pair_mut(
        &mut self,
        a: &str,
        b: &str,
    ) -> FtpResult<(&mut FtpSession, &mut FtpSession)> {
        if a == b {
            return Err(FtpError::invalid_config("FxP between same hosts"));
        }
        if !self.sessions.contains_key(b) {
            return Err(FtpError::session_not_found(b));
        }
        let mut first = None;
        let mut second = None;
        for (id, s) in self.sessions.iter_mut() {
            if id == a {
                first = Some(s);
            } else if id == b {
                second = Some(s);
            }
        }
        match (first, second) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(FtpError::session_not_found(a)),
        }
    }

    /// Remove a session. When it was current, the next one in insertion
    /// order takes over.
    pub fn remove(&mut self, id: &str) -> Option<FtpSession> {
        let session = self.sessions.remove(id)?;
        self.order.retain(|o| o != id);
        if self.current.as_deref() == Some(id) {
            self.current = self.order.first().cloned();
        }
        Some(session)
    }

    /// Quit and remove a session.
    pub async fn close(&mut self, id: &str) -> FtpResult<()> {
        let mut session = self
            .remove(id)
            .ok_or_else(|| FtpError::session_not_found(id))?;
        session.quit().await
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.order.clone()
    }

    /// Say goodbye to every server and empty the pool.
    pub async fn quit_all(&mut self) {
        for id in std::mem::take(&mut self.order) {
            if let Some(mut session) = self.sessions.remove(&id) {
                if let Err(e) = session.quit().await {
                    log::debug!("quit {}: {}", id, e);
                }
            }
        }
        self.current = None;
    }
}
