use thiserror::Error;

use crate::engine::StatusCode;

#[derive(Debug, Error)]
pub enum VideoError {
    #[error("engine {op} failed with status {code}")]
    Engine { op: &'static str, code: StatusCode },
    #[error("no surface bound for handle {0}")]
    UnknownSurface(u64),
}

/// Map a vendor status code to a `Result`.
pub fn check(op: &'static str, code: StatusCode) -> Result<(), VideoError> {
    if code < 0 {
        Err(VideoError::Engine { op, code })
    } else {
        Ok(())
    }
}
