use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::errors::VeloError;
use crate::events::{CallInvite, EventEmitter, VeloEvent, VeloEventListener};
use crate::session::{CallRegistry, CallRole, CallSession, CallState, SessionId};
use crate::telephony::{CallAction, TelephonyEvent, TelephonyProvider};

/// Sender half handed to the vendor glue so it can report call progress.
pub type TelephonyEventSender = mpsc::UnboundedSender<TelephonyEvent>;

/// Single authority over call sessions.
///
/// Turns user intents into vendor transactions and applies vendor
/// notifications to the registry. The registry lock is never held across a
/// vendor await, so notifications can land while a request is in flight.
pub struct CallCoordinator {
    provider: Arc<dyn TelephonyProvider>,
    shared: Arc<Shared>,
    access_token: Option<String>,
}

struct Shared {
    registry: Mutex<CallRegistry>,
    invites: Mutex<HashMap<SessionId, CallInvite>>,
    emitter: EventEmitter,
}

impl CallCoordinator {
    pub fn new(provider: Arc<dyn TelephonyProvider>, emitter: EventEmitter) -> Self {
        Self {
            provider,
            shared: Arc::new(Shared {
                registry: Mutex::new(CallRegistry::new()),
                invites: Mutex::new(HashMap::new()),
                emitter,
            }),
            access_token: None,
        }
    }

    /// Attach an access token to every outbound start request.
    pub fn with_access_token(mut self, token: Option<String>) -> Self {
        self.access_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn add_listener(&self, listener: Arc<dyn VeloEventListener>) {
        self.shared.emitter.add_listener(listener);
    }

    /// Create the vendor event channel and spawn the task that drains it.
    ///
    /// Events are applied one at a time in arrival order.
    pub fn spawn_event_loop(&self) -> (TelephonyEventSender, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = self.shared.clone();
        let handle = tokio::spawn(async move {
            Shared::event_loop(shared, rx).await;
        });
        (tx, handle)
    }

    /// Apply one vendor notification directly, bypassing the channel.
    pub async fn handle_event(&self, event: TelephonyEvent) {
        self.shared.apply(event).await;
    }

    // ── Intents ──────────────────────────────────────────────────────

    /// Start an outbound call to `destination`.
    ///
    /// The session is registered in `Requesting` before the vendor sees the
    /// request and moves to `Dialing` once the vendor accepts it. A rejected
    /// request leaves the session as it is and returns
    /// [`VeloError::Transaction`] carrying its id.
    pub async fn start_call(&self, destination: &str, with_video: bool) -> Result<SessionId, VeloError> {
        let destination = destination.trim();
        if destination.is_empty() {
            return Err(VeloError::InvalidHandle(destination.to_string()));
        }

        let session = CallSession::new(
            SessionId::new(),
            CallRole::OutboundInitiator,
            destination.to_string(),
            with_video,
        );
        let session_id = session.id;
        self.shared.registry.lock().await.insert(session);
        tracing::info!(%session_id, destination, with_video, "call requested");
        self.shared.emitter.emit(VeloEvent::CallStateChanged {
            session_id,
            state: CallState::Requesting,
        });

        self.submit(CallAction::Start {
            session_id,
            handle: destination.to_string(),
            has_video: with_video,
            access_token: self.access_token.clone(),
        })
        .await?;

        self.shared.advance_to_dialing(session_id).await;
        Ok(session_id)
    }

    /// Answer a pending inbound invitation.
    pub async fn answer_call(&self, session_id: SessionId) -> Result<(), VeloError> {
        let invite = self
            .shared
            .invites
            .lock()
            .await
            .remove(&session_id)
            .ok_or(VeloError::UnknownSession(session_id))?;

        let session = CallSession::new(
            session_id,
            CallRole::InboundRecipient,
            invite.from.clone(),
            invite.has_video,
        );
        self.shared.registry.lock().await.insert(session);
        tracing::info!(%session_id, from = %invite.from, "answering call");
        self.shared.emitter.emit(VeloEvent::CallStateChanged {
            session_id,
            state: CallState::Requesting,
        });

        self.submit(CallAction::Answer { session_id }).await?;
        self.shared.advance_to_dialing(session_id).await;
        Ok(())
    }

    /// Decline a pending inbound invitation.
    pub async fn reject_call(&self, session_id: SessionId) -> Result<(), VeloError> {
        if !self.shared.invites.lock().await.contains_key(&session_id) {
            return Err(VeloError::UnknownSession(session_id));
        }

        self.submit(CallAction::End { session_id }).await?;

        if self.shared.invites.lock().await.remove(&session_id).is_some() {
            tracing::info!(%session_id, "invite rejected");
            self.shared.emitter.emit(VeloEvent::InviteCancelled(session_id));
        }
        Ok(())
    }

    /// Ask the vendor to end a call.
    ///
    /// A connected call stays registered until the vendor's disconnect
    /// notification. A call that never connected is cancelled: once the
    /// vendor accepts the request it goes straight to `Disconnected`.
    pub async fn end_call(&self, session_id: SessionId) -> Result<(), VeloError> {
        self.known_state(session_id).await?;

        self.submit(CallAction::End { session_id }).await?;

        let still_pending = self
            .shared
            .registry
            .lock()
            .await
            .get(&session_id)
            .is_some_and(|s| s.state.is_pre_connect());
        if still_pending {
            tracing::info!(%session_id, "call cancelled before connecting");
            self.shared.terminate(session_id, None).await;
        } else {
            tracing::debug!(%session_id, "end accepted, waiting for disconnect");
        }
        Ok(())
    }

    /// Put a connected call on hold or resume it.
    pub async fn set_hold(&self, session_id: SessionId, on_hold: bool) -> Result<(), VeloError> {
        let state = self.known_state(session_id).await?;
        if !state.can_hold() {
            tracing::warn!(%session_id, ?state, "hold rejected");
            return Err(VeloError::InvalidState { session_id, state, op: "hold" });
        }

        self.submit(CallAction::SetHeld { session_id, on_hold }).await?;

        let mut events = Vec::new();
        {
            let mut registry = self.shared.registry.lock().await;
            let Some(session) = registry.get_mut(&session_id) else {
                tracing::debug!(%session_id, "session ended while hold was in flight");
                return Ok(());
            };
            if !session.state.can_hold() {
                return Ok(());
            }
            session.on_hold = on_hold;
            session.state = if on_hold { CallState::Held } else { CallState::Connected };
            events.push(VeloEvent::CallHoldChanged { session_id, on_hold });
            events.push(VeloEvent::CallStateChanged { session_id, state: session.state });

            let before = registry.active_marker();
            if on_hold {
                if before == Some(session_id) {
                    registry.clear_active();
                }
            } else {
                registry.set_active(session_id);
            }
            let after = registry.active_marker();
            if before != after {
                events.push(VeloEvent::ActiveCallChanged(after));
            }
        }

        tracing::info!(%session_id, on_hold, "hold updated");
        for event in events {
            self.shared.emitter.emit(event);
        }
        Ok(())
    }

    /// Mute or unmute a call. Always forwarded: the vendor owns mute state.
    pub async fn set_mute(&self, session_id: SessionId, muted: bool) -> Result<(), VeloError> {
        let state = self.known_state(session_id).await?;
        if !state.can_mute() {
            tracing::warn!(%session_id, ?state, "mute rejected");
            return Err(VeloError::InvalidState { session_id, state, op: "mute" });
        }

        self.submit(CallAction::SetMuted { session_id, muted }).await?;

        let updated = match self.shared.registry.lock().await.get_mut(&session_id) {
            Some(session) => {
                session.muted = muted;
                true
            }
            None => false,
        };
        if updated {
            tracing::info!(%session_id, muted, "mute updated");
            self.shared.emitter.emit(VeloEvent::CallMuteChanged { session_id, muted });
        }
        Ok(())
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub async fn session(&self, session_id: SessionId) -> Option<CallSession> {
        self.shared.registry.lock().await.get(&session_id).cloned()
    }

    pub async fn sessions(&self) -> Vec<CallSession> {
        self.shared.registry.lock().await.sessions()
    }

    pub async fn active_session(&self) -> Option<CallSession> {
        self.shared.registry.lock().await.active().cloned()
    }

    pub async fn pending_invites(&self) -> Vec<CallInvite> {
        self.shared.invites.lock().await.values().cloned().collect()
    }

    // ── Internals ────────────────────────────────────────────────────

    async fn known_state(&self, session_id: SessionId) -> Result<CallState, VeloError> {
        match self.shared.registry.lock().await.get(&session_id) {
            Some(session) => Ok(session.state),
            None => {
                tracing::warn!(%session_id, "operation on unknown session");
                Err(VeloError::UnknownSession(session_id))
            }
        }
    }

    async fn submit(&self, action: CallAction) -> Result<(), VeloError> {
        let session_id = action.session_id();
        let name = action.name();
        match self.provider.submit_transaction(action).await {
            Ok(()) => {
                tracing::debug!(%session_id, action = name, "transaction accepted");
                Ok(())
            }
            Err(e) => {
                tracing::error!(%session_id, action = name, "transaction rejected: {e}");
                self.shared.emitter.emit(VeloEvent::TransactionFailed {
                    session_id,
                    message: e.0.clone(),
                });
                Err(VeloError::Transaction { session_id, message: e.0 })
            }
        }
    }
}

impl Shared {
    async fn event_loop(shared: Arc<Shared>, mut events: mpsc::UnboundedReceiver<TelephonyEvent>) {
        while let Some(event) = events.recv().await {
            shared.apply(event).await;
        }
        tracing::info!("telephony event loop ended");
    }

    async fn apply(&self, event: TelephonyEvent) {
        match event {
            TelephonyEvent::Connected(session_id) => self.connected(session_id).await,

            TelephonyEvent::FailedToConnect { session_id, reason } => {
                tracing::warn!(%session_id, "call failed to connect: {reason}");
                self.terminate(session_id, Some(reason)).await;
            }

            TelephonyEvent::Disconnected { session_id, error } => {
                if let Some(e) = &error {
                    tracing::warn!(%session_id, "call disconnected with error: {e}");
                }
                self.terminate(session_id, error).await;
            }

            TelephonyEvent::IncomingInvite { session_id, from, has_video } => {
                if self.registry.lock().await.contains(&session_id) {
                    tracing::debug!(%session_id, "invite for a known session ignored");
                    return;
                }
                let invite = CallInvite { session_id, from, has_video };
                let fresh = self
                    .invites
                    .lock()
                    .await
                    .insert(session_id, invite.clone())
                    .is_none();
                if fresh {
                    tracing::info!(%session_id, from = %invite.from, "incoming call");
                    self.emitter.emit(VeloEvent::IncomingCall(invite));
                }
            }

            TelephonyEvent::InviteCancelled(session_id) => {
                if self.invites.lock().await.remove(&session_id).is_some() {
                    tracing::info!(%session_id, "invite cancelled by caller");
                    self.emitter.emit(VeloEvent::InviteCancelled(session_id));
                }
            }
        }
    }

    async fn advance_to_dialing(&self, session_id: SessionId) {
        let advanced = match self.registry.lock().await.get_mut(&session_id) {
            Some(session) if session.state == CallState::Requesting => {
                session.state = CallState::Dialing;
                true
            }
            _ => false,
        };
        if advanced {
            self.emitter.emit(VeloEvent::CallStateChanged {
                session_id,
                state: CallState::Dialing,
            });
        }
    }

    async fn connected(&self, session_id: SessionId) {
        let active_changed = {
            let mut registry = self.registry.lock().await;
            let Some(session) = registry.get_mut(&session_id) else {
                tracing::debug!(%session_id, "stale connect ignored");
                return;
            };
            if !session.state.is_pre_connect() {
                tracing::debug!(%session_id, state = ?session.state, "duplicate connect ignored");
                return;
            }
            session.state = CallState::Connected;
            let before = registry.active_marker();
            registry.set_active(session_id);
            before != Some(session_id)
        };

        tracing::info!(%session_id, "call connected");
        self.emitter.emit(VeloEvent::CallStateChanged {
            session_id,
            state: CallState::Connected,
        });
        if active_changed {
            self.emitter.emit(VeloEvent::ActiveCallChanged(Some(session_id)));
        }
    }

    /// Move a session to `Disconnected` and drop it. Unknown ids are a no-op.
    async fn terminate(&self, session_id: SessionId, error: Option<String>) {
        let was_active = {
            let mut registry = self.registry.lock().await;
            let was_active = registry.active_marker() == Some(session_id);
            if registry.remove(&session_id).is_none() {
                tracing::debug!(%session_id, "termination for unknown session ignored");
                return;
            }
            was_active
        };

        tracing::info!(%session_id, error = error.as_deref().unwrap_or("none"), "call ended");
        self.emitter.emit(VeloEvent::CallStateChanged {
            session_id,
            state: CallState::Disconnected,
        });
        self.emitter.emit(VeloEvent::CallRemoved(session_id));
        if was_active {
            self.emitter.emit(VeloEvent::ActiveCallChanged(None));
        }
    }
}
