//! Velo mobile core logic.
//!
//! Call session coordination over a telephony SDK, RTC channel membership,
//! and the one-way ticket sync. Vendor SDKs sit behind traits; native UI
//! shells consume this crate through the UniFFI bindings in `velo-ffi`.

pub mod calls;
pub mod channel;
pub mod errors;
pub mod events;
pub mod session;
pub mod settings;
pub mod sync;
pub mod telephony;

pub use calls::{CallCoordinator, TelephonyEventSender};
pub use channel::{ChannelManager, EngineEvent, EngineEventSender, OfflineReason};
pub use errors::VeloError;
pub use events::{CallInvite, EventEmitter, EventLog, VeloEvent, VeloEventListener};
pub use session::{CallRegistry, CallRole, CallSession, CallState, SessionId};
pub use settings::{Product, Settings, SettingsStore};
pub use sync::{
    JsonTicketStore, MemoryTicketStore, RemoteBackend, SupabaseBackend, TicketRecord, TicketStore, TicketSync,
};
pub use telephony::{CallAction, TelephonyEvent, TelephonyProvider, TransactionError};
