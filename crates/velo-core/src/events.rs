use std::sync::{Arc, RwLock};

use crate::session::{CallState, SessionId};

/// Events emitted by the core to native UI listeners.
#[derive(Debug, Clone)]
pub enum VeloEvent {
    CallStateChanged { session_id: SessionId, state: CallState },
    ActiveCallChanged(Option<SessionId>),
    CallHoldChanged { session_id: SessionId, on_hold: bool },
    CallMuteChanged { session_id: SessionId, muted: bool },
    CallRemoved(SessionId),
    IncomingCall(CallInvite),
    InviteCancelled(SessionId),
    TransactionFailed { session_id: SessionId, message: String },
    ChannelJoined { channel: String, uid: u32 },
    ChannelLeft,
    UserJoined(u32),
    UserOffline(u32),
    StatusLabel(String),
    TicketsSynced { inserted: usize },
    SyncFailed(String),
}

/// A pending inbound invitation, waiting for answer or reject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallInvite {
    pub session_id: SessionId,
    pub from: String,
    pub has_video: bool,
}

/// Trait for receiving events from the core.
/// Implementations must be Send + Sync (called from tokio tasks).
pub trait VeloEventListener: Send + Sync {
    fn on_event(&self, event: VeloEvent);
}

/// Internal event emitter that dispatches to registered listeners.
#[derive(Clone, Default)]
pub struct EventEmitter {
    listeners: Arc<RwLock<Vec<Arc<dyn VeloEventListener>>>>,
}

impl EventEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn VeloEventListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }

    pub fn emit(&self, event: VeloEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for listener in listeners.iter() {
            listener.on_event(event.clone());
        }
    }
}

/// Listener that keeps every event it sees. Handy for tests and for hosts
/// that poll instead of subscribing.
#[derive(Default)]
pub struct EventLog {
    events: std::sync::Mutex<Vec<VeloEvent>>,
}

impl EventLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<VeloEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

impl VeloEventListener for EventLog {
    fn on_event(&self, event: VeloEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
    }
}
