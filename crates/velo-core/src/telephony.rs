use async_trait::async_trait;

use crate::session::SessionId;

/// A call-control request submitted to the telephony vendor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallAction {
    Start {
        session_id: SessionId,
        handle: String,
        has_video: bool,
        access_token: Option<String>,
    },
    Answer { session_id: SessionId },
    End { session_id: SessionId },
    SetHeld { session_id: SessionId, on_hold: bool },
    SetMuted { session_id: SessionId, muted: bool },
}

impl CallAction {
    pub fn session_id(&self) -> SessionId {
        match self {
            CallAction::Start { session_id, .. }
            | CallAction::Answer { session_id }
            | CallAction::End { session_id }
            | CallAction::SetHeld { session_id, .. }
            | CallAction::SetMuted { session_id, .. } => *session_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CallAction::Start { .. } => "start",
            CallAction::Answer { .. } => "answer",
            CallAction::End { .. } => "end",
            CallAction::SetHeld { .. } => "set_held",
            CallAction::SetMuted { .. } => "set_muted",
        }
    }
}

/// The vendor refused or failed to accept a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionError(pub String);

impl std::fmt::Display for TransactionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Call-control side of the telephony SDK.
///
/// `submit_transaction` resolves once the vendor accepted or rejected the
/// request. Connection progress arrives later as [`TelephonyEvent`]s.
#[async_trait]
pub trait TelephonyProvider: Send + Sync {
    async fn submit_transaction(&self, action: CallAction) -> Result<(), TransactionError>;
}

/// Asynchronous notifications from the telephony SDK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TelephonyEvent {
    Connected(SessionId),
    FailedToConnect { session_id: SessionId, reason: String },
    Disconnected { session_id: SessionId, error: Option<String> },
    IncomingInvite { session_id: SessionId, from: String, has_video: bool },
    InviteCancelled(SessionId),
}

impl TelephonyEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            TelephonyEvent::Connected(id) | TelephonyEvent::InviteCancelled(id) => *id,
            TelephonyEvent::FailedToConnect { session_id, .. }
            | TelephonyEvent::Disconnected { session_id, .. }
            | TelephonyEvent::IncomingInvite { session_id, .. } => *session_id,
        }
    }
}
