//! UniFFI bindings for velo-core.
//!
//! Provides a VeloClient object that wraps CallCoordinator, ChannelManager,
//! the video surfaces and ticket sync into a single FFI-safe interface. The
//! host implements the vendor SDK bridges as callback interfaces.

use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use async_trait::async_trait;
use velo_core::{
    CallCoordinator, ChannelManager, EngineEvent, EngineEventSender, EventEmitter, JsonTicketStore, SessionId,
    SettingsStore, SupabaseBackend, TelephonyEvent, TelephonyEventSender, TelephonyProvider, TicketStore, TicketSync,
    TransactionError,
};
use velo_core::{CallState as CoreCallState, OfflineReason as CoreOfflineReason, Product as CoreProduct};
use velo_video::{
    AudienceLatency as CoreAudienceLatency, ChannelProfile as CoreChannelProfile, ClientRole as CoreClientRole,
    MediaSourceType as CoreMediaSourceType, MirrorMode as CoreMirrorMode, RenderMode as CoreRenderMode, RtcEngine,
    SetupMode as CoreSetupMode, StatusCode, SurfaceHandle, VideoSurfaces,
};

uniffi::include_scaffolding!("velo");

// ── Namespace functions ──────────────────────────────────────────────

/// Initialize tracing/logging. Call once from the host before using VeloClient.
/// On Android, stderr goes to logcat for debuggable builds.
fn init_logging() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("velo_core=debug,velo_ffi=debug,velo_video=info"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_ansi(false).try_init();
    });
}

// ── FFI-safe type conversions ──────────────────────────────────────────

/// Declares an FFI copy of a fieldless core enum with conversions both ways.
macro_rules! mirror_enum {
    ($name:ident, $core:ident { $($variant:ident),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl From<$core> for $name {
            fn from(v: $core) -> Self {
                match v {
                    $($core::$variant => Self::$variant),+
                }
            }
        }

        impl From<$name> for $core {
            fn from(v: $name) -> Self {
                match v {
                    $($name::$variant => $core::$variant),+
                }
            }
        }
    };
}

mirror_enum!(CallState, CoreCallState { Requesting, Dialing, Connected, Held, Disconnected });
mirror_enum!(ClientRole, CoreClientRole { Audience, Broadcaster });
mirror_enum!(ChannelProfile, CoreChannelProfile { Communication, LiveBroadcasting });
mirror_enum!(AudienceLatency, CoreAudienceLatency { Low, UltraLow });
mirror_enum!(OfflineReason, CoreOfflineReason { Quit, Dropped, BecameAudience });
mirror_enum!(RenderMode, CoreRenderMode { Hidden, Fit, Adaptive });
mirror_enum!(SetupMode, CoreSetupMode { Replace, Add, Remove });
mirror_enum!(MirrorMode, CoreMirrorMode { Auto, Enabled, Disabled });
mirror_enum!(
    MediaSourceType,
    CoreMediaSourceType {
        PrimaryCamera,
        SecondaryCamera,
        PrimaryScreen,
        SecondaryScreen,
        CustomVideo,
        MediaPlayer,
        TranscodedVideo,
    }
);
mirror_enum!(Product, CoreProduct { VideoCall, VoiceCall, Broadcast });

#[derive(Debug, Clone)]
pub struct CallSessionInfo {
    pub session_id: String,
    pub is_outbound: bool,
    pub state: CallState,
    pub on_hold: bool,
    pub muted: bool,
    pub has_video: bool,
    pub remote_handle: String,
    pub created_at_ms: i64,
}

impl From<velo_core::CallSession> for CallSessionInfo {
    fn from(s: velo_core::CallSession) -> Self {
        Self {
            session_id: s.id.to_string(),
            is_outbound: s.role == velo_core::CallRole::OutboundInitiator,
            state: s.state.into(),
            on_hold: s.on_hold,
            muted: s.muted,
            has_video: s.has_video,
            remote_handle: s.remote_handle,
            created_at_ms: s.created_at.timestamp_millis(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallInvite {
    pub session_id: String,
    pub caller: String,
    pub has_video: bool,
}

impl From<velo_core::CallInvite> for CallInvite {
    fn from(i: velo_core::CallInvite) -> Self {
        Self {
            session_id: i.session_id.to_string(),
            caller: i.from,
            has_video: i.has_video,
        }
    }
}

#[derive(Debug, Clone)]
pub enum CallAction {
    Start {
        session_id: String,
        handle: String,
        has_video: bool,
        access_token: Option<String>,
    },
    Answer { session_id: String },
    End { session_id: String },
    SetHeld { session_id: String, on_hold: bool },
    SetMuted { session_id: String, muted: bool },
}

impl From<velo_core::CallAction> for CallAction {
    fn from(a: velo_core::CallAction) -> Self {
        use velo_core::CallAction as Core;
        match a {
            Core::Start {
                session_id,
                handle,
                has_video,
                access_token,
            } => Self::Start {
                session_id: session_id.to_string(),
                handle,
                has_video,
                access_token,
            },
            Core::Answer { session_id } => Self::Answer {
                session_id: session_id.to_string(),
            },
            Core::End { session_id } => Self::End {
                session_id: session_id.to_string(),
            },
            Core::SetHeld { session_id, on_hold } => Self::SetHeld {
                session_id: session_id.to_string(),
                on_hold,
            },
            Core::SetMuted { session_id, muted } => Self::SetMuted {
                session_id: session_id.to_string(),
                muted,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelMediaOptions {
    pub profile: ChannelProfile,
    pub client_role: Option<ClientRole>,
    pub audience_latency: Option<AudienceLatency>,
}

impl From<&velo_video::ChannelMediaOptions> for ChannelMediaOptions {
    fn from(o: &velo_video::ChannelMediaOptions) -> Self {
        Self {
            profile: o.profile.into(),
            client_role: o.client_role.map(Into::into),
            audience_latency: o.audience_latency.map(Into::into),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl From<velo_video::CropRect> for CropRect {
    fn from(r: velo_video::CropRect) -> Self {
        Self {
            x: r.x,
            y: r.y,
            width: r.width,
            height: r.height,
        }
    }
}

impl From<CropRect> for velo_video::CropRect {
    fn from(r: CropRect) -> Self {
        Self {
            x: r.x,
            y: r.y,
            width: r.width,
            height: r.height,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CanvasProperties {
    pub render_mode: RenderMode,
    pub crop_area: CropRect,
    pub setup_mode: SetupMode,
    pub mirror_mode: MirrorMode,
    pub enable_alpha_mask: bool,
}

impl From<velo_video::CanvasProperties> for CanvasProperties {
    fn from(p: velo_video::CanvasProperties) -> Self {
        Self {
            render_mode: p.render_mode.into(),
            crop_area: p.crop_area.into(),
            setup_mode: p.setup_mode.into(),
            mirror_mode: p.mirror_mode.into(),
            enable_alpha_mask: p.enable_alpha_mask,
        }
    }
}

impl From<CanvasProperties> for velo_video::CanvasProperties {
    fn from(p: CanvasProperties) -> Self {
        Self {
            render_mode: p.render_mode.into(),
            crop_area: p.crop_area.into(),
            setup_mode: p.setup_mode.into(),
            mirror_mode: p.mirror_mode.into(),
            enable_alpha_mask: p.enable_alpha_mask,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RtcConnection {
    pub channel_id: String,
    pub local_uid: u32,
}

impl From<velo_video::RtcConnection> for RtcConnection {
    fn from(c: velo_video::RtcConnection) -> Self {
        Self {
            channel_id: c.channel_id,
            local_uid: c.local_uid,
        }
    }
}

impl From<RtcConnection> for velo_video::RtcConnection {
    fn from(c: RtcConnection) -> Self {
        Self {
            channel_id: c.channel_id,
            local_uid: c.local_uid,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VideoCanvas {
    pub surface: u64,
    pub uid: u32,
    pub source_type: Option<MediaSourceType>,
    pub media_player_id: Option<i32>,
    pub properties: CanvasProperties,
}

impl From<&velo_video::VideoCanvas> for VideoCanvas {
    fn from(c: &velo_video::VideoCanvas) -> Self {
        Self {
            surface: c.surface.0,
            uid: c.uid,
            source_type: c.source_type.map(Into::into),
            media_player_id: c.media_player_id,
            properties: c.properties.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum VideoSource {
    Local,
    Remote { uid: u32 },
    RemoteWithConnection { uid: u32, connection: RtcConnection },
    Media {
        source_type: MediaSourceType,
        media_player_id: Option<i32>,
    },
}

impl From<VideoSource> for velo_video::SourceDescriptor {
    fn from(s: VideoSource) -> Self {
        match s {
            VideoSource::Local => Self::LocalParticipant,
            VideoSource::Remote { uid } => Self::RemoteParticipant(uid),
            VideoSource::RemoteWithConnection { uid, connection } => Self::RemoteParticipantEx(uid, connection.into()),
            VideoSource::Media {
                source_type,
                media_player_id,
            } => Self::MediaSource {
                source_type: source_type.into(),
                media_player_id,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub enum CanvasUpdate {
    SetRenderMode { mode: RenderMode },
    SetCropArea { area: CropRect },
    SetSetupMode { mode: SetupMode },
    SetMirrorMode { mode: MirrorMode },
    SetAlphaMask { enabled: bool },
}

impl From<&velo_video::CanvasChange> for CanvasUpdate {
    fn from(c: &velo_video::CanvasChange) -> Self {
        use velo_video::CanvasChange as Core;
        match *c {
            Core::RenderMode(mode) => Self::SetRenderMode { mode: mode.into() },
            Core::CropArea(area) => Self::SetCropArea { area: area.into() },
            Core::SetupMode(mode) => Self::SetSetupMode { mode: mode.into() },
            Core::MirrorMode(mode) => Self::SetMirrorMode { mode: mode.into() },
            Core::AlphaMask(enabled) => Self::SetAlphaMask { enabled },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub rtc_app_id: String,
    pub product: Product,
    pub rtc_token: Option<String>,
    pub uid: u32,
    pub token_url: Option<String>,
    pub voice_access_token: Option<String>,
    pub backend_url: Option<String>,
    pub backend_anon_key: Option<String>,
}

impl From<velo_core::Settings> for Settings {
    fn from(s: velo_core::Settings) -> Self {
        Self {
            rtc_app_id: s.rtc_app_id,
            product: s.product.into(),
            rtc_token: s.rtc_token,
            uid: s.uid,
            token_url: s.token_url,
            voice_access_token: s.voice_access_token,
            backend_url: s.backend_url,
            backend_anon_key: s.backend_anon_key,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ticket {
    pub id: i64,
    pub summary: String,
}

impl From<velo_core::TicketRecord> for Ticket {
    fn from(t: velo_core::TicketRecord) -> Self {
        Self {
            id: t.id,
            summary: t.summary,
        }
    }
}

#[derive(Debug, Clone)]
pub enum VeloEvent {
    CallStateChanged { session_id: String, state: CallState },
    ActiveCallChanged { session_id: Option<String> },
    CallHoldChanged { session_id: String, on_hold: bool },
    CallMuteChanged { session_id: String, muted: bool },
    CallRemoved { session_id: String },
    IncomingCall { invite: CallInvite },
    InviteCancelled { session_id: String },
    TransactionFailed { session_id: String, message: String },
    ChannelJoined { channel: String, uid: u32 },
    ChannelLeft,
    UserJoined { uid: u32 },
    UserOffline { uid: u32 },
    StatusLabel { message: String },
    TicketsSynced { inserted: u32 },
    SyncFailed { message: String },
}

impl From<velo_core::VeloEvent> for VeloEvent {
    fn from(e: velo_core::VeloEvent) -> Self {
        use velo_core::VeloEvent as Core;
        match e {
            Core::CallStateChanged { session_id, state } => Self::CallStateChanged {
                session_id: session_id.to_string(),
                state: state.into(),
            },
            Core::ActiveCallChanged(id) => Self::ActiveCallChanged {
                session_id: id.map(|id| id.to_string()),
            },
            Core::CallHoldChanged { session_id, on_hold } => Self::CallHoldChanged {
                session_id: session_id.to_string(),
                on_hold,
            },
            Core::CallMuteChanged { session_id, muted } => Self::CallMuteChanged {
                session_id: session_id.to_string(),
                muted,
            },
            Core::CallRemoved(id) => Self::CallRemoved {
                session_id: id.to_string(),
            },
            Core::IncomingCall(invite) => Self::IncomingCall { invite: invite.into() },
            Core::InviteCancelled(id) => Self::InviteCancelled {
                session_id: id.to_string(),
            },
            Core::TransactionFailed { session_id, message } => Self::TransactionFailed {
                session_id: session_id.to_string(),
                message,
            },
            Core::ChannelJoined { channel, uid } => Self::ChannelJoined { channel, uid },
            Core::ChannelLeft => Self::ChannelLeft,
            Core::UserJoined(uid) => Self::UserJoined { uid },
            Core::UserOffline(uid) => Self::UserOffline { uid },
            Core::StatusLabel(message) => Self::StatusLabel { message },
            Core::TicketsSynced { inserted } => Self::TicketsSynced {
                inserted: u32::try_from(inserted).unwrap_or(u32::MAX),
            },
            Core::SyncFailed(message) => Self::SyncFailed { message },
        }
    }
}

// ── Error conversion ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum VeloError {
    #[error("Invalid handle: {msg}")]
    InvalidHandle { msg: String },
    #[error("Unknown session: {msg}")]
    UnknownSession { msg: String },
    #[error("Invalid state: {msg}")]
    InvalidState { msg: String },
    #[error("Transaction error: {msg}")]
    Transaction { msg: String },
    #[error("Invalid channel: {msg}")]
    InvalidChannel { msg: String },
    #[error("Engine error: {msg}")]
    Engine { msg: String },
    #[error("HTTP error: {msg}")]
    Http { msg: String },
    #[error("Decode error: {msg}")]
    Decode { msg: String },
    #[error("Store error: {msg}")]
    Store { msg: String },
    #[error("Config error: {msg}")]
    Config { msg: String },
    #[error("Runtime error: {msg}")]
    Runtime { msg: String },
}

impl From<velo_core::VeloError> for VeloError {
    fn from(e: velo_core::VeloError) -> Self {
        use velo_core::VeloError as Core;
        tracing::error!("VeloError: {e}");
        let msg = e.to_string();
        match e {
            Core::InvalidHandle(_) => Self::InvalidHandle { msg },
            Core::UnknownSession(_) => Self::UnknownSession { msg },
            Core::InvalidState { .. } => Self::InvalidState { msg },
            Core::Transaction { .. } => Self::Transaction { msg },
            Core::InvalidChannel(_) => Self::InvalidChannel { msg },
            Core::Engine(_) => Self::Engine { msg },
            Core::Http(_) => Self::Http { msg },
            Core::Decode(_) => Self::Decode { msg },
            Core::Store(_) => Self::Store { msg },
            Core::Config(_) => Self::Config { msg },
        }
    }
}

impl From<velo_video::VideoError> for VeloError {
    fn from(e: velo_video::VideoError) -> Self {
        velo_core::VeloError::from(e).into()
    }
}

fn parse_session_id(raw: &str) -> Result<SessionId, VeloError> {
    SessionId::parse(raw).ok_or_else(|| VeloError::UnknownSession {
        msg: format!("malformed session id: {raw}"),
    })
}

// ── Callback interfaces ───────────────────────────────────────────────

/// Host listener for client events.
///
/// Events arrive in order on a dedicated `velo-events` thread, never on the
/// client's runtime, so a listener may call back into `VeloClient`.
pub trait VeloEventListener: Send + Sync {
    fn on_event(&self, event: VeloEvent);
}

/// Host side of the telephony SDK's call-control API.
pub trait TelephonyBridge: Send + Sync {
    fn submit_transaction(&self, action: CallAction) -> Option<String>;
}

/// Host side of the RTC SDK engine.
pub trait RtcEngineBridge: Send + Sync {
    fn enable_video(&self) -> i32;
    fn enable_audio(&self) -> i32;
    fn set_client_role(&self, role: ClientRole) -> i32;
    fn join_channel(&self, token: Option<String>, channel: String, uid: u32, options: Option<ChannelMediaOptions>)
    -> i32;
    fn leave_channel(&self) -> i32;
    fn start_preview(&self) -> i32;
    fn stop_preview(&self) -> i32;
    fn setup_local_video(&self, canvas: VideoCanvas) -> i32;
    fn setup_remote_video(&self, canvas: VideoCanvas) -> i32;
    fn setup_remote_video_ex(&self, canvas: VideoCanvas, connection: RtcConnection) -> i32;
    fn update_canvas(&self, surface: u64, update: CanvasUpdate) -> i32;
    fn release_surface(&self, surface: u64) -> i32;
}

// ── Bridges: FFI callbacks → core traits ──────────────────────────────

type HostListeners = Arc<StdMutex<Vec<Arc<dyn VeloEventListener>>>>;

/// Forwards core events to the host listeners from the dispatch thread.
struct BridgeListener {
    tx: std::sync::mpsc::Sender<velo_core::VeloEvent>,
}

impl BridgeListener {
    fn spawn(listeners: HostListeners) -> Result<Self, VeloError> {
        let (tx, rx) = std::sync::mpsc::channel::<velo_core::VeloEvent>();
        std::thread::Builder::new()
            .name("velo-events".into())
            .spawn(move || {
                while let Ok(event) = rx.recv() {
                    let targets = listeners.lock().unwrap_or_else(|p| p.into_inner()).clone();
                    for listener in targets {
                        listener.on_event(event.clone().into());
                    }
                }
                tracing::debug!("event dispatch thread ended");
            })
            .map_err(|e| VeloError::Runtime { msg: format!("event thread: {e}") })?;
        Ok(Self { tx })
    }
}

impl velo_core::VeloEventListener for BridgeListener {
    fn on_event(&self, event: velo_core::VeloEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("event dispatch thread gone, event dropped");
        }
    }
}

struct TelephonyAdapter {
    bridge: Arc<dyn TelephonyBridge>,
}

#[async_trait]
impl TelephonyProvider for TelephonyAdapter {
    async fn submit_transaction(&self, action: velo_core::CallAction) -> Result<(), TransactionError> {
        let bridge = self.bridge.clone();
        let action = CallAction::from(action);
        // The host call may block on the vendor SDK.
        match tokio::task::spawn_blocking(move || bridge.submit_transaction(action)).await {
            Ok(None) => Ok(()),
            Ok(Some(reason)) => Err(TransactionError(reason)),
            Err(e) => Err(TransactionError(format!("telephony bridge failed: {e}"))),
        }
    }
}

struct EngineAdapter {
    bridge: Box<dyn RtcEngineBridge>,
}

impl RtcEngine for EngineAdapter {
    fn enable_video(&self) -> StatusCode {
        self.bridge.enable_video()
    }

    fn enable_audio(&self) -> StatusCode {
        self.bridge.enable_audio()
    }

    fn set_client_role(&self, role: velo_video::ClientRole) -> StatusCode {
        self.bridge.set_client_role(role.into())
    }

    fn join_channel(
        &self,
        token: Option<&str>,
        channel: &str,
        uid: u32,
        options: Option<&velo_video::ChannelMediaOptions>,
    ) -> StatusCode {
        self.bridge.join_channel(
            token.map(str::to_string),
            channel.to_string(),
            uid,
            options.map(ChannelMediaOptions::from),
        )
    }

    fn leave_channel(&self) -> StatusCode {
        self.bridge.leave_channel()
    }

    fn start_preview(&self) -> StatusCode {
        self.bridge.start_preview()
    }

    fn stop_preview(&self) -> StatusCode {
        self.bridge.stop_preview()
    }

    fn setup_local_video(&self, canvas: &velo_video::VideoCanvas) -> StatusCode {
        self.bridge.setup_local_video(canvas.into())
    }

    fn setup_remote_video(&self, canvas: &velo_video::VideoCanvas) -> StatusCode {
        self.bridge.setup_remote_video(canvas.into())
    }

    fn setup_remote_video_ex(
        &self,
        canvas: &velo_video::VideoCanvas,
        connection: &velo_video::RtcConnection,
    ) -> StatusCode {
        self.bridge
            .setup_remote_video_ex(canvas.into(), connection.clone().into())
    }

    fn update_canvas(&self, surface: SurfaceHandle, change: &velo_video::CanvasChange) -> StatusCode {
        self.bridge.update_canvas(surface.0, change.into())
    }

    fn release_surface(&self, surface: SurfaceHandle) -> StatusCode {
        self.bridge.release_surface(surface.0)
    }
}

// ── VeloClient: main FFI object ──────────────────────────────────────

pub struct VeloClient {
    calls: CallCoordinator,
    call_events: TelephonyEventSender,
    channel: ChannelManager,
    engine_events: EngineEventSender,
    surfaces: StdMutex<VideoSurfaces>,
    tickets: JsonTicketStore,
    settings: SettingsStore,
    emitter: EventEmitter,
    listeners: HostListeners,
    rt: tokio::runtime::Runtime,
}

impl VeloClient {
    /// Settings are read once here: product, RTC token, uid and voice access
    /// token changes apply to the next client.
    pub fn new(
        data_dir: String,
        telephony: Box<dyn TelephonyBridge>,
        engine: Box<dyn RtcEngineBridge>,
    ) -> Result<Self, VeloError> {
        tracing::info!("VeloClient::new() called");
        let rt = tokio::runtime::Runtime::new().map_err(|e| VeloError::Runtime { msg: e.to_string() })?;
        let settings = SettingsStore::new(&data_dir);
        let current = settings.get();
        let tickets = JsonTicketStore::new(&data_dir)?;
        let emitter = EventEmitter::new();
        let listeners: HostListeners = Arc::default();
        emitter.add_listener(Arc::new(BridgeListener::spawn(listeners.clone())?));

        let provider = Arc::new(TelephonyAdapter {
            bridge: Arc::from(telephony),
        });
        let calls =
            CallCoordinator::new(provider, emitter.clone()).with_access_token(current.voice_access_token.clone());

        let engine: Arc<dyn RtcEngine> = Arc::new(EngineAdapter { bridge: engine });
        let channel = ChannelManager::from_settings(engine.clone(), &current, emitter.clone());

        let (call_events, engine_events) = {
            let _guard = rt.enter();
            let (call_events, _) = calls.spawn_event_loop();
            let (engine_events, _) = channel.spawn_event_loop();
            (call_events, engine_events)
        };

        tracing::info!(product = ?current.product, "VeloClient::new() completed");
        Ok(Self {
            calls,
            call_events,
            channel,
            engine_events,
            surfaces: StdMutex::new(VideoSurfaces::new(engine)),
            tickets,
            settings,
            emitter,
            listeners,
            rt,
        })
    }

    pub fn add_listener(&self, listener: Box<dyn VeloEventListener>) {
        self.listeners
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(Arc::from(listener));
    }

    // ── Calls ────────────────────────────────────────────────────────

    pub fn start_call(&self, destination: String, with_video: bool) -> Result<String, VeloError> {
        let id = self.rt.block_on(self.calls.start_call(&destination, with_video))?;
        Ok(id.to_string())
    }

    pub fn answer_call(&self, session_id: String) -> Result<(), VeloError> {
        let id = parse_session_id(&session_id)?;
        Ok(self.rt.block_on(self.calls.answer_call(id))?)
    }

    pub fn reject_call(&self, session_id: String) -> Result<(), VeloError> {
        let id = parse_session_id(&session_id)?;
        Ok(self.rt.block_on(self.calls.reject_call(id))?)
    }

    pub fn end_call(&self, session_id: String) -> Result<(), VeloError> {
        let id = parse_session_id(&session_id)?;
        Ok(self.rt.block_on(self.calls.end_call(id))?)
    }

    pub fn set_hold(&self, session_id: String, on_hold: bool) -> Result<(), VeloError> {
        let id = parse_session_id(&session_id)?;
        Ok(self.rt.block_on(self.calls.set_hold(id, on_hold))?)
    }

    pub fn set_mute(&self, session_id: String, muted: bool) -> Result<(), VeloError> {
        let id = parse_session_id(&session_id)?;
        Ok(self.rt.block_on(self.calls.set_mute(id, muted))?)
    }

    pub fn sessions(&self) -> Vec<CallSessionInfo> {
        self.rt
            .block_on(self.calls.sessions())
            .into_iter()
            .map(CallSessionInfo::from)
            .collect()
    }

    pub fn active_session(&self) -> Option<CallSessionInfo> {
        self.rt.block_on(self.calls.active_session()).map(CallSessionInfo::from)
    }

    pub fn pending_invites(&self) -> Vec<CallInvite> {
        self.rt
            .block_on(self.calls.pending_invites())
            .into_iter()
            .map(CallInvite::from)
            .collect()
    }

    // ── Telephony vendor callbacks ───────────────────────────────────

    pub fn report_call_connected(&self, session_id: String) {
        if let Some(id) = self.callback_session(&session_id) {
            self.send_call_event(TelephonyEvent::Connected(id));
        }
    }

    pub fn report_call_failed(&self, session_id: String, reason: String) {
        if let Some(id) = self.callback_session(&session_id) {
            self.send_call_event(TelephonyEvent::FailedToConnect { session_id: id, reason });
        }
    }

    pub fn report_call_disconnected(&self, session_id: String, error: Option<String>) {
        if let Some(id) = self.callback_session(&session_id) {
            self.send_call_event(TelephonyEvent::Disconnected { session_id: id, error });
        }
    }

    pub fn report_incoming_call(&self, session_id: String, caller: String, has_video: bool) {
        if let Some(id) = self.callback_session(&session_id) {
            self.send_call_event(TelephonyEvent::IncomingInvite {
                session_id: id,
                from: caller,
                has_video,
            });
        }
    }

    pub fn report_invite_cancelled(&self, session_id: String) {
        if let Some(id) = self.callback_session(&session_id) {
            self.send_call_event(TelephonyEvent::InviteCancelled(id));
        }
    }

    fn callback_session(&self, raw: &str) -> Option<SessionId> {
        let id = SessionId::parse(raw);
        if id.is_none() {
            tracing::warn!("dropping vendor callback with malformed session id {raw:?}");
        }
        id
    }

    fn send_call_event(&self, event: TelephonyEvent) {
        if let Err(e) = self.call_events.send(event) {
            tracing::warn!("call event loop closed, dropping {:?}", e.0);
        }
    }

    // ── Channel ──────────────────────────────────────────────────────

    pub fn set_client_role(&self, role: ClientRole) -> Result<(), VeloError> {
        Ok(self.rt.block_on(self.channel.set_role(role.into()))?)
    }

    pub fn join_channel(&self, channel: String) -> Result<(), VeloError> {
        Ok(self.rt.block_on(self.channel.join_with_settings(&channel))?)
    }

    pub fn join_broadcast_stream(&self, channel: String, is_broadcaster: bool) -> Result<(), VeloError> {
        let settings = self.settings.get();
        Ok(self.rt.block_on(self.channel.join_broadcast_stream(
            &channel,
            settings.rtc_token.as_deref().filter(|t| !t.is_empty()),
            settings.uid,
            is_broadcaster,
        ))?)
    }

    pub fn leave_channel(&self) -> Result<(), VeloError> {
        self.lock_surfaces().detach_all();
        Ok(self.rt.block_on(self.channel.leave_channel())?)
    }

    pub fn current_channel(&self) -> Option<String> {
        self.rt.block_on(self.channel.channel())
    }

    pub fn channel_users(&self) -> Vec<u32> {
        self.rt.block_on(self.channel.users())
    }

    // ── RTC engine callbacks ─────────────────────────────────────────

    pub fn report_joined_channel(&self, channel: String, uid: u32) {
        self.send_engine_event(EngineEvent::JoinedChannel { channel, uid });
    }

    pub fn report_user_joined(&self, uid: u32) {
        self.send_engine_event(EngineEvent::UserJoined(uid));
    }

    pub fn report_user_offline(&self, uid: u32, reason: OfflineReason) {
        self.send_engine_event(EngineEvent::UserOffline {
            uid,
            reason: reason.into(),
        });
    }

    fn send_engine_event(&self, event: EngineEvent) {
        if let Err(e) = self.engine_events.send(event) {
            tracing::warn!("engine event loop closed, dropping {:?}", e.0);
        }
    }

    // ── Video surfaces ───────────────────────────────────────────────

    pub fn attach_surface(
        &self,
        surface: u64,
        source: VideoSource,
        properties: CanvasProperties,
    ) -> Result<(), VeloError> {
        Ok(self
            .lock_surfaces()
            .attach(SurfaceHandle(surface), source.into(), properties.into())?)
    }

    /// Returns how many display properties were pushed to the engine.
    pub fn update_surface(&self, surface: u64, properties: CanvasProperties) -> Result<u32, VeloError> {
        let applied = self
            .lock_surfaces()
            .update(SurfaceHandle(surface), &properties.into())?;
        Ok(u32::try_from(applied).unwrap_or(u32::MAX))
    }

    pub fn detach_surface(&self, surface: u64) -> Result<(), VeloError> {
        Ok(self.lock_surfaces().detach(SurfaceHandle(surface))?)
    }

    fn lock_surfaces(&self) -> MutexGuard<'_, VideoSurfaces> {
        self.surfaces.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ── Ticket sync ──────────────────────────────────────────────────

    pub fn sync_tickets(&self) -> Result<u32, VeloError> {
        let backend = SupabaseBackend::from_settings(&self.settings.get())?;
        let sync = TicketSync::new(Arc::new(backend), self.emitter.clone());
        let inserted = self.rt.block_on(sync.sync(&self.tickets))?;
        Ok(u32::try_from(inserted).unwrap_or(u32::MAX))
    }

    pub fn tickets(&self) -> Vec<Ticket> {
        self.tickets.tickets().into_iter().map(Ticket::from).collect()
    }

    // ── Settings ─────────────────────────────────────────────────────

    pub fn get_settings(&self) -> Settings {
        self.settings.get().into()
    }

    pub fn set_rtc_app_id(&self, app_id: String) {
        self.settings.set_rtc_app_id(app_id);
    }

    pub fn set_product(&self, product: Product) {
        self.settings.set_product(product.into());
    }

    pub fn set_rtc_token(&self, token: Option<String>) {
        self.settings.set_rtc_token(token);
    }

    pub fn set_uid(&self, uid: u32) {
        self.settings.set_uid(uid);
    }

    pub fn set_token_url(&self, url: Option<String>) {
        self.settings.set_token_url(url);
    }

    pub fn set_voice_access_token(&self, token: Option<String>) {
        self.settings.set_voice_access_token(token);
    }

    pub fn set_backend(&self, url: Option<String>, anon_key: Option<String>) {
        self.settings.set_backend(url, anon_key);
    }
}

impl Drop for VeloClient {
    fn drop(&mut self) {
        self.lock_surfaces().detach_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct AcceptingTelephony {
        actions: StdMutex<Vec<String>>,
    }

    impl TelephonyBridge for Arc<AcceptingTelephony> {
        fn submit_transaction(&self, action: CallAction) -> Option<String> {
            self.actions.lock().unwrap().push(format!("{action:?}"));
            None
        }
    }

    #[derive(Default)]
    struct CountingEngine {
        calls: StdMutex<Vec<&'static str>>,
    }

    impl CountingEngine {
        fn record(&self, name: &'static str) -> i32 {
            self.calls.lock().unwrap().push(name);
            0
        }
    }

    impl RtcEngineBridge for Arc<CountingEngine> {
        fn enable_video(&self) -> i32 {
            self.record("enable_video")
        }
        fn enable_audio(&self) -> i32 {
            self.record("enable_audio")
        }
        fn set_client_role(&self, _role: ClientRole) -> i32 {
            self.record("set_client_role")
        }
        fn join_channel(&self, _: Option<String>, _: String, _: u32, _: Option<ChannelMediaOptions>) -> i32 {
            self.record("join_channel")
        }
        fn leave_channel(&self) -> i32 {
            self.record("leave_channel")
        }
        fn start_preview(&self) -> i32 {
            self.record("start_preview")
        }
        fn stop_preview(&self) -> i32 {
            self.record("stop_preview")
        }
        fn setup_local_video(&self, _: VideoCanvas) -> i32 {
            self.record("setup_local_video")
        }
        fn setup_remote_video(&self, _: VideoCanvas) -> i32 {
            self.record("setup_remote_video")
        }
        fn setup_remote_video_ex(&self, _: VideoCanvas, _: RtcConnection) -> i32 {
            self.record("setup_remote_video_ex")
        }
        fn update_canvas(&self, _: u64, _: CanvasUpdate) -> i32 {
            self.record("update_canvas")
        }
        fn release_surface(&self, _: u64) -> i32 {
            self.record("release_surface")
        }
    }

    fn client(dir: &tempfile::TempDir) -> (VeloClient, Arc<AcceptingTelephony>, Arc<CountingEngine>) {
        let telephony = Arc::new(AcceptingTelephony::default());
        let engine = Arc::new(CountingEngine::default());
        let client = VeloClient::new(
            dir.path().to_str().unwrap().to_string(),
            Box::new(telephony.clone()),
            Box::new(engine.clone()),
        )
        .unwrap();
        (client, telephony, engine)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("condition not reached");
    }

    #[test]
    fn call_lifecycle_through_ffi() {
        let dir = tempfile::tempdir().unwrap();
        let (client, telephony, _engine) = client(&dir);

        let id = client.start_call("user-42".into(), true).unwrap();
        assert_eq!(client.sessions().len(), 1);

        client.report_call_connected(id.clone());
        wait_until(|| {
            client
                .active_session()
                .is_some_and(|s| s.session_id == id && s.state == CallState::Connected)
        });

        client.set_hold(id.clone(), true).unwrap();
        assert_eq!(client.sessions()[0].state, CallState::Held);

        client.end_call(id.clone()).unwrap();
        client.report_call_disconnected(id, None);
        wait_until(|| client.sessions().is_empty());

        assert_eq!(telephony.actions.lock().unwrap().len(), 3);
    }

    #[test]
    fn malformed_session_id_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (client, telephony, _engine) = client(&dir);

        let err = client.end_call("nope".into()).unwrap_err();
        assert!(matches!(err, VeloError::UnknownSession { .. }));
        assert!(telephony.actions.lock().unwrap().is_empty());
    }

    #[test]
    fn local_surface_starts_preview() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _telephony, engine) = client(&dir);
        let props = CanvasProperties::from(velo_video::CanvasProperties::default());

        client.attach_surface(1, VideoSource::Local, props).unwrap();
        let calls = engine.calls.lock().unwrap().clone();
        assert!(calls.contains(&"start_preview"));
        assert!(calls.contains(&"setup_local_video"));

        let err = client.detach_surface(2).unwrap_err();
        assert!(matches!(err, VeloError::Engine { .. }));
    }

    /// Records where each event was delivered from.
    #[derive(Default)]
    struct ThreadRecorder {
        deliveries: StdMutex<Vec<(Option<String>, bool)>>,
    }

    impl VeloEventListener for Arc<ThreadRecorder> {
        fn on_event(&self, _event: VeloEvent) {
            let thread = std::thread::current().name().map(str::to_string);
            let in_runtime = tokio::runtime::Handle::try_current().is_ok();
            self.deliveries.lock().unwrap().push((thread, in_runtime));
        }
    }

    #[test]
    fn listeners_run_outside_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _telephony, _engine) = client(&dir);
        let recorder = Arc::new(ThreadRecorder::default());
        client.add_listener(Box::new(recorder.clone()));

        // Emitted from the runtime's event loop task.
        client.report_incoming_call(SessionId::new().to_string(), "alice".into(), false);
        wait_until(|| !recorder.deliveries.lock().unwrap().is_empty());

        for (thread, in_runtime) in recorder.deliveries.lock().unwrap().iter() {
            assert_eq!(thread.as_deref(), Some("velo-events"));
            assert!(!in_runtime);
        }
    }

    #[test]
    fn sync_without_backend_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let (client, _telephony, _engine) = client(&dir);
        client.set_backend(None, None);

        // Skip when the environment supplies a backend.
        if client.get_settings().backend_url.is_some() {
            return;
        }
        let err = client.sync_tickets().unwrap_err();
        assert!(matches!(err, VeloError::Config { .. }));
        assert!(client.tickets().is_empty());
    }
}
