use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Opaque identifier of one call for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    OutboundInitiator,
    InboundRecipient,
}

/// Lifecycle of a call session.
///
/// `Requesting -> Dialing -> Connected <-> Held`, ending in `Disconnected`.
/// `Requesting` and `Dialing` may also go straight to `Disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Requesting,
    Dialing,
    Connected,
    Held,
    Disconnected,
}

impl CallState {
    pub fn is_pre_connect(&self) -> bool {
        matches!(self, CallState::Requesting | CallState::Dialing)
    }

    pub fn can_hold(&self) -> bool {
        matches!(self, CallState::Connected | CallState::Held)
    }

    pub fn can_mute(&self) -> bool {
        matches!(self, CallState::Connected | CallState::Held | CallState::Dialing)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSession {
    pub id: SessionId,
    pub role: CallRole,
    pub state: CallState,
    pub on_hold: bool,
    pub muted: bool,
    pub has_video: bool,
    pub remote_handle: String,
    pub created_at: DateTime<Utc>,
}

impl CallSession {
    pub fn new(id: SessionId, role: CallRole, remote_handle: String, has_video: bool) -> Self {
        Self {
            id,
            role,
            state: CallState::Requesting,
            on_hold: false,
            muted: false,
            has_video,
            remote_handle,
            created_at: Utc::now(),
        }
    }
}

/// Every call session the process currently knows about.
///
/// At most one session carries the active marker; the others are held or
/// still pending.
#[derive(Debug, Clone, Default)]
pub struct CallRegistry {
    sessions: HashMap<SessionId, CallSession>,
    active: Option<SessionId>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, session: CallSession) {
        self.sessions.insert(session.id, session);
    }

    /// Remove a session, clearing the active marker if it pointed at it.
    pub fn remove(&mut self, id: &SessionId) -> Option<CallSession> {
        let removed = self.sessions.remove(id);
        if removed.is_some() && self.active.as_ref() == Some(id) {
            self.active = None;
        }
        removed
    }

    pub fn get(&self, id: &SessionId) -> Option<&CallSession> {
        self.sessions.get(id)
    }

    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut CallSession> {
        self.sessions.get_mut(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Mark `id` as the foreground session. Unknown ids are ignored.
    pub fn set_active(&mut self, id: SessionId) -> bool {
        if self.sessions.contains_key(&id) {
            self.active = Some(id);
            true
        } else {
            false
        }
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    /// The marked session, or the only remaining one when nothing is marked
    /// (a call left on hold after the foreground call ended).
    pub fn active(&self) -> Option<&CallSession> {
        match self.active {
            Some(id) => self.sessions.get(&id),
            None if self.sessions.len() == 1 => self.sessions.values().next(),
            None => None,
        }
    }

    pub fn active_marker(&self) -> Option<SessionId> {
        self.active
    }

    pub fn sessions(&self) -> Vec<CallSession> {
        let mut all: Vec<_> = self.sessions.values().cloned().collect();
        all.sort_by_key(|s| s.created_at);
        all
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(handle: &str) -> CallSession {
        CallSession::new(SessionId::new(), CallRole::OutboundInitiator, handle.to_string(), false)
    }

    #[test]
    fn new_session_starts_requesting() {
        let s = session("user-1");
        assert_eq!(s.state, CallState::Requesting);
        assert!(!s.on_hold);
        assert!(!s.muted);
    }

    #[test]
    fn removing_active_session_clears_marker() {
        let mut reg = CallRegistry::new();
        let s = session("user-1");
        let id = s.id;
        reg.insert(s);
        assert!(reg.set_active(id));
        assert_eq!(reg.active_marker(), Some(id));

        reg.remove(&id);
        assert_eq!(reg.active_marker(), None);
        assert!(reg.is_empty());
    }

    #[test]
    fn removing_other_session_keeps_marker() {
        let mut reg = CallRegistry::new();
        let a = session("a");
        let b = session("b");
        let (a_id, b_id) = (a.id, b.id);
        reg.insert(a);
        reg.insert(b);
        reg.set_active(a_id);

        reg.remove(&b_id);
        assert_eq!(reg.active_marker(), Some(a_id));
    }

    #[test]
    fn set_active_ignores_unknown_ids() {
        let mut reg = CallRegistry::new();
        assert!(!reg.set_active(SessionId::new()));
        assert!(reg.active_marker().is_none());
    }

    #[test]
    fn lone_session_is_reported_active_without_marker() {
        let mut reg = CallRegistry::new();
        let s = session("held-one");
        let id = s.id;
        reg.insert(s);
        assert_eq!(reg.active().map(|s| s.id), Some(id));

        reg.insert(session("another"));
        assert!(reg.active().is_none());
    }

    #[test]
    fn state_capabilities() {
        assert!(CallState::Connected.can_hold());
        assert!(CallState::Held.can_hold());
        assert!(!CallState::Dialing.can_hold());
        assert!(CallState::Dialing.can_mute());
        assert!(!CallState::Requesting.can_mute());
        assert!(CallState::Requesting.is_pre_connect());
        assert!(!CallState::Disconnected.can_mute());
    }

    #[test]
    fn session_id_round_trips_through_display() {
        let id = SessionId::new();
        assert_eq!(SessionId::parse(&id.to_string()), Some(id));
        assert_eq!(SessionId::parse("not-a-uuid"), None);
    }
}
