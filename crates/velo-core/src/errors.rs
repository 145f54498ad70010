use thiserror::Error;

use crate::session::{CallState, SessionId};

#[derive(Debug, Error)]
pub enum VeloError {
    #[error("invalid destination handle: {0:?}")]
    InvalidHandle(String),
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
    #[error("cannot {op} session {session_id} in state {state:?}")]
    InvalidState {
        session_id: SessionId,
        state: CallState,
        op: &'static str,
    },
    #[error("transaction for session {session_id} rejected: {message}")]
    Transaction { session_id: SessionId, message: String },
    #[error("invalid channel name: {0:?}")]
    InvalidChannel(String),
    #[error("engine error: {0}")]
    Engine(String),
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<velo_video::VideoError> for VeloError {
    fn from(e: velo_video::VideoError) -> Self {
        VeloError::Engine(e.to_string())
    }
}
