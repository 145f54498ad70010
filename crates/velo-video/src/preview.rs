use std::sync::{Arc, Mutex, MutexGuard};

use crate::engine::RtcEngine;
use crate::errors::{check, VideoError};

/// The engine's camera preview, shared by every surface showing the local
/// participant.
///
/// The preview starts with the first holder and stops when the last one
/// releases it.
pub struct LocalPreview {
    engine: Arc<dyn RtcEngine>,
    holders: Mutex<usize>,
}

impl LocalPreview {
    pub fn new(engine: Arc<dyn RtcEngine>) -> Self {
        Self {
            engine,
            holders: Mutex::new(0),
        }
    }

    /// Take a hold on the preview, starting it if nobody holds it yet.
    /// A failed start leaves the count untouched.
    pub fn acquire(&self) -> Result<(), VideoError> {
        let mut holders = self.lock();
        if *holders == 0 {
            check("start_preview", self.engine.start_preview())?;
            tracing::debug!("local preview started");
        }
        *holders += 1;
        Ok(())
    }

    /// Drop one hold, stopping the preview when it was the last.
    pub fn release(&self) {
        let mut holders = self.lock();
        match *holders {
            0 => {
                tracing::warn!("local preview released without a holder");
                return;
            }
            1 => {
                let code = self.engine.stop_preview();
                if code < 0 {
                    tracing::warn!(code, "stop_preview failed");
                } else {
                    tracing::debug!("local preview stopped");
                }
            }
            _ => {}
        }
        *holders -= 1;
    }

    pub fn holders(&self) -> usize {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.holders.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
