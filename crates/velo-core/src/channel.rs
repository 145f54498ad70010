use std::collections::BTreeSet;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use velo_video::{ChannelMediaOptions, ClientRole, RtcEngine, StatusCode};

use crate::errors::VeloError;
use crate::events::{EventEmitter, VeloEvent};
use crate::settings::{Product, Settings};

/// Why a remote user left the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfflineReason {
    Quit,
    Dropped,
    BecameAudience,
}

/// Notifications from the RTC engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    JoinedChannel { channel: String, uid: u32 },
    UserJoined(u32),
    UserOffline { uid: u32, reason: OfflineReason },
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;

#[derive(Debug, Default)]
struct ChannelState {
    role: ClientRole,
    channel: Option<String>,
    local_uid: u32,
    users: BTreeSet<u32>,
    label: Option<String>,
}

/// Owns the RTC engine's channel membership.
///
/// Tracks the local uid and every user currently in the channel from engine
/// events. Construct one per engine; it is not a global.
pub struct ChannelManager {
    engine: Arc<dyn RtcEngine>,
    state: Arc<Mutex<ChannelState>>,
    emitter: EventEmitter,
    default_token: Option<String>,
    default_uid: u32,
    token_url: Option<String>,
}

fn channel_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9 !#$%&()+\-:;<=.>?@\[\]^_{|}~,]{1,64}$").expect("channel name pattern is valid")
    })
}

/// Channel names are 1-64 bytes from the engine's allowed character set.
pub fn validate_channel_name(name: &str) -> Result<(), VeloError> {
    if channel_name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(VeloError::InvalidChannel(name.to_string()))
    }
}

fn status(op: &str, code: StatusCode) -> Result<(), VeloError> {
    if code < 0 {
        tracing::error!("{op} failed with status {code}");
        Err(VeloError::Engine(format!("{op} failed with status {code}")))
    } else {
        Ok(())
    }
}

impl ChannelManager {
    /// Configure `engine` for `product` and wrap it.
    pub fn new(engine: Arc<dyn RtcEngine>, product: Product, role: ClientRole, emitter: EventEmitter) -> Self {
        let code = match product {
            Product::VoiceCall => engine.enable_audio(),
            Product::VideoCall | Product::Broadcast => engine.enable_video(),
        };
        if code < 0 {
            tracing::warn!(?product, code, "engine media setup failed");
        }
        let code = engine.set_client_role(role);
        if code < 0 {
            tracing::warn!(?role, code, "engine role setup failed");
        }

        Self {
            engine,
            state: Arc::new(Mutex::new(ChannelState {
                role,
                ..Default::default()
            })),
            emitter,
            default_token: None,
            default_uid: 0,
            token_url: None,
        }
    }

    /// Build from persisted settings: product, token, uid and token URL.
    pub fn from_settings(engine: Arc<dyn RtcEngine>, settings: &Settings, emitter: EventEmitter) -> Self {
        let role = match settings.product {
            Product::Broadcast => ClientRole::Broadcaster,
            _ => ClientRole::Audience,
        };
        let mut manager = Self::new(engine, settings.product, role, emitter);
        manager.default_token = settings.rtc_token.clone().filter(|t| !t.is_empty());
        manager.default_uid = settings.uid;
        manager.token_url = settings.token_url.clone().filter(|u| !u.is_empty());
        manager
    }

    pub async fn role(&self) -> ClientRole {
        self.state.lock().await.role
    }

    pub async fn set_role(&self, role: ClientRole) -> Result<(), VeloError> {
        status("set_client_role", self.engine.set_client_role(role))?;
        self.state.lock().await.role = role;
        tracing::info!(?role, "client role updated");
        Ok(())
    }

    /// Join `channel`. A `uid` of 0 lets the engine assign one.
    pub async fn join_channel(
        &self,
        channel: &str,
        token: Option<&str>,
        uid: u32,
        options: Option<&ChannelMediaOptions>,
    ) -> Result<(), VeloError> {
        validate_channel_name(channel)?;
        tracing::info!(channel, uid, has_token = token.is_some(), "joining channel");
        status("join_channel", self.engine.join_channel(token, channel, uid, options))?;
        let mut state = self.state.lock().await;
        state.channel = Some(channel.to_string());
        if let Some(role) = options.and_then(|o| o.client_role) {
            state.role = role;
        }
        Ok(())
    }

    pub async fn join_video_call(&self, channel: &str, token: Option<&str>, uid: u32) -> Result<(), VeloError> {
        self.join_channel(channel, token, uid, Some(&ChannelMediaOptions::communication()))
            .await
    }

    pub async fn join_voice_call(&self, channel: &str, token: Option<&str>, uid: u32) -> Result<(), VeloError> {
        self.join_channel(channel, token, uid, Some(&ChannelMediaOptions::communication()))
            .await
    }

    pub async fn join_broadcast_stream(
        &self,
        channel: &str,
        token: Option<&str>,
        uid: u32,
        is_broadcaster: bool,
    ) -> Result<(), VeloError> {
        let options = ChannelMediaOptions::broadcast(is_broadcaster);
        self.join_channel(channel, token, uid, Some(&options)).await
    }

    /// Join with the configured token and uid.
    pub async fn join_with_settings(&self, channel: &str) -> Result<(), VeloError> {
        if let Some(url) = &self.token_url {
            // Token fetching is not wired up; the configured token is used as is.
            tracing::warn!(token_url = %url, "token URL configured but not used");
            self.set_label(format!("token server not used: {url}")).await;
        }
        self.join_channel(channel, self.default_token.as_deref(), self.default_uid, None)
            .await
    }

    /// Leave the channel and forget every user.
    ///
    /// The camera preview belongs to the video surfaces showing it and is
    /// stopped when the last of them detaches.
    pub async fn leave_channel(&self) -> Result<(), VeloError> {
        let code = self.engine.leave_channel();
        {
            let mut state = self.state.lock().await;
            state.users.clear();
            state.channel = None;
        }
        self.emitter.emit(VeloEvent::ChannelLeft);
        status("leave_channel", code)
    }

    pub async fn channel(&self) -> Option<String> {
        self.state.lock().await.channel.clone()
    }

    pub async fn local_uid(&self) -> u32 {
        self.state.lock().await.local_uid
    }

    /// Users currently in the channel, sorted by uid.
    pub async fn users(&self) -> Vec<u32> {
        self.state.lock().await.users.iter().copied().collect()
    }

    pub async fn label(&self) -> Option<String> {
        self.state.lock().await.label.clone()
    }

    async fn set_label(&self, message: String) {
        self.state.lock().await.label = Some(message.clone());
        self.emitter.emit(VeloEvent::StatusLabel(message));
    }

    /// Create the engine event channel and spawn the task that drains it.
    pub fn spawn_event_loop(&self) -> (EngineEventSender, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let state = self.state.clone();
        let emitter = self.emitter.clone();
        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                Self::apply(&state, &emitter, event).await;
            }
            tracing::info!("engine event loop ended");
        });
        (tx, handle)
    }

    /// Apply one engine notification directly, bypassing the channel.
    pub async fn handle_event(&self, event: EngineEvent) {
        Self::apply(&self.state, &self.emitter, event).await;
    }

    async fn apply(state: &Mutex<ChannelState>, emitter: &EventEmitter, event: EngineEvent) {
        match event {
            EngineEvent::JoinedChannel { channel, uid } => {
                {
                    let mut state = state.lock().await;
                    state.local_uid = uid;
                    state.channel = Some(channel.clone());
                    if state.role == ClientRole::Broadcaster {
                        state.users.insert(uid);
                    }
                }
                tracing::info!(channel = %channel, uid, "joined channel");
                emitter.emit(VeloEvent::ChannelJoined { channel, uid });
            }

            EngineEvent::UserJoined(uid) => {
                if state.lock().await.users.insert(uid) {
                    tracing::info!(uid, "user joined");
                    emitter.emit(VeloEvent::UserJoined(uid));
                }
            }

            EngineEvent::UserOffline { uid, reason } => {
                if state.lock().await.users.remove(&uid) {
                    tracing::info!(uid, ?reason, "user offline");
                    emitter.emit(VeloEvent::UserOffline(uid));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLog;
    use std::sync::Mutex as StdMutex;
    use velo_video::{CanvasChange, RtcConnection, SurfaceHandle, VideoCanvas};

    #[derive(Default)]
    struct FakeEngine {
        calls: StdMutex<Vec<String>>,
        joins: StdMutex<Vec<(Option<String>, String, u32, Option<ChannelMediaOptions>)>>,
        join_status: StdMutex<StatusCode>,
    }

    impl FakeEngine {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, name: &str) -> StatusCode {
            self.calls.lock().unwrap().push(name.to_string());
            0
        }
    }

    impl RtcEngine for FakeEngine {
        fn enable_video(&self) -> StatusCode {
            self.record("enable_video")
        }
        fn enable_audio(&self) -> StatusCode {
            self.record("enable_audio")
        }
        fn set_client_role(&self, role: ClientRole) -> StatusCode {
            self.record(&format!("set_client_role:{role:?}"))
        }
        fn join_channel(
            &self,
            token: Option<&str>,
            channel: &str,
            uid: u32,
            options: Option<&ChannelMediaOptions>,
        ) -> StatusCode {
            self.record("join_channel");
            self.joins.lock().unwrap().push((
                token.map(str::to_string),
                channel.to_string(),
                uid,
                options.cloned(),
            ));
            *self.join_status.lock().unwrap()
        }
        fn leave_channel(&self) -> StatusCode {
            self.record("leave_channel")
        }
        fn start_preview(&self) -> StatusCode {
            self.record("start_preview")
        }
        fn stop_preview(&self) -> StatusCode {
            self.record("stop_preview")
        }
        fn setup_local_video(&self, _canvas: &VideoCanvas) -> StatusCode {
            self.record("setup_local_video")
        }
        fn setup_remote_video(&self, _canvas: &VideoCanvas) -> StatusCode {
            self.record("setup_remote_video")
        }
        fn setup_remote_video_ex(&self, _canvas: &VideoCanvas, _connection: &RtcConnection) -> StatusCode {
            self.record("setup_remote_video_ex")
        }
        fn update_canvas(&self, _surface: SurfaceHandle, _change: &CanvasChange) -> StatusCode {
            self.record("update_canvas")
        }
        fn release_surface(&self, _surface: SurfaceHandle) -> StatusCode {
            self.record("release_surface")
        }
    }

    fn manager(product: Product, role: ClientRole) -> (ChannelManager, Arc<FakeEngine>, Arc<EventLog>) {
        let engine = Arc::new(FakeEngine::default());
        let log = EventLog::new();
        let emitter = EventEmitter::new();
        emitter.add_listener(log.clone());
        (ChannelManager::new(engine.clone(), product, role, emitter), engine, log)
    }

    #[test]
    fn channel_name_validation() {
        assert!(validate_channel_name("Testing").is_ok());
        assert!(validate_channel_name("ops room #4").is_ok());
        assert!(validate_channel_name("").is_err());
        assert!(validate_channel_name(&"x".repeat(65)).is_err());
        assert!(validate_channel_name("caf\u{e9}").is_err());
        assert!(validate_channel_name("a/b").is_err());
    }

    #[test]
    fn construction_configures_engine_for_product() {
        let (_, engine, _) = manager(Product::VoiceCall, ClientRole::Audience);
        assert_eq!(engine.calls(), vec!["enable_audio", "set_client_role:Audience"]);

        let (_, engine, _) = manager(Product::VideoCall, ClientRole::Broadcaster);
        assert_eq!(engine.calls(), vec!["enable_video", "set_client_role:Broadcaster"]);
    }

    #[tokio::test]
    async fn join_forwards_options_and_records_channel() {
        let (mgr, engine, _) = manager(Product::VideoCall, ClientRole::Audience);
        mgr.join_video_call("Testing", Some("tok"), 0).await.unwrap();

        let joins = engine.joins.lock().unwrap().clone();
        assert_eq!(joins.len(), 1);
        assert_eq!(joins[0].0.as_deref(), Some("tok"));
        assert_eq!(joins[0].1, "Testing");
        assert_eq!(joins[0].3, Some(ChannelMediaOptions::communication()));
        assert_eq!(mgr.channel().await.as_deref(), Some("Testing"));
    }

    #[tokio::test]
    async fn invalid_channel_is_rejected_before_engine() {
        let (mgr, engine, _) = manager(Product::VideoCall, ClientRole::Audience);
        let err = mgr.join_channel("", None, 0, None).await.unwrap_err();
        assert!(matches!(err, VeloError::InvalidChannel(_)));
        assert!(engine.joins.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn negative_join_status_is_an_error() {
        let (mgr, engine, _) = manager(Product::VideoCall, ClientRole::Audience);
        *engine.join_status.lock().unwrap() = -17;
        let err = mgr.join_channel("Testing", None, 0, None).await.unwrap_err();
        assert!(matches!(err, VeloError::Engine(msg) if msg.contains("-17")));
        assert!(mgr.channel().await.is_none());
    }

    #[tokio::test]
    async fn broadcast_join_sets_role_and_latency() {
        let (mgr, engine, _) = manager(Product::Broadcast, ClientRole::Audience);
        mgr.join_broadcast_stream("live", None, 0, true).await.unwrap();

        let options = engine.joins.lock().unwrap()[0].3.clone().unwrap();
        assert_eq!(options, ChannelMediaOptions::broadcast(true));
        assert_eq!(mgr.role().await, ClientRole::Broadcaster);
    }

    #[tokio::test]
    async fn failed_broadcast_join_keeps_previous_role() {
        let (mgr, engine, _) = manager(Product::Broadcast, ClientRole::Audience);
        *engine.join_status.lock().unwrap() = -2;
        assert!(mgr.join_broadcast_stream("live", None, 0, true).await.is_err());
        assert!(mgr.join_broadcast_stream("", None, 0, true).await.is_err());
        assert_eq!(mgr.role().await, ClientRole::Audience);

        mgr.handle_event(EngineEvent::JoinedChannel { channel: "live".into(), uid: 4 })
            .await;
        assert!(mgr.users().await.is_empty());
    }

    #[tokio::test]
    async fn broadcaster_counts_itself_on_join() {
        let (mgr, _, log) = manager(Product::Broadcast, ClientRole::Broadcaster);
        mgr.handle_event(EngineEvent::JoinedChannel { channel: "live".into(), uid: 11 })
            .await;

        assert_eq!(mgr.local_uid().await, 11);
        assert_eq!(mgr.users().await, vec![11]);
        assert!(log
            .events()
            .iter()
            .any(|e| matches!(e, VeloEvent::ChannelJoined { uid: 11, .. })));
    }

    #[tokio::test]
    async fn audience_does_not_count_itself() {
        let (mgr, _, _) = manager(Product::VideoCall, ClientRole::Audience);
        mgr.handle_event(EngineEvent::JoinedChannel { channel: "c".into(), uid: 5 })
            .await;
        assert_eq!(mgr.local_uid().await, 5);
        assert!(mgr.users().await.is_empty());
    }

    #[tokio::test]
    async fn remote_users_are_tracked_through_event_loop() {
        let (mgr, _, _) = manager(Product::VideoCall, ClientRole::Audience);
        let (tx, handle) = mgr.spawn_event_loop();

        tx.send(EngineEvent::UserJoined(3)).unwrap();
        tx.send(EngineEvent::UserJoined(1)).unwrap();
        tx.send(EngineEvent::UserJoined(3)).unwrap();
        tx.send(EngineEvent::UserOffline { uid: 3, reason: OfflineReason::Quit }).unwrap();
        drop(tx);
        handle.await.unwrap();

        assert_eq!(mgr.users().await, vec![1]);
    }

    #[tokio::test]
    async fn leave_clears_users_and_leaves_preview_alone() {
        let (mgr, engine, log) = manager(Product::VideoCall, ClientRole::Audience);
        mgr.handle_event(EngineEvent::UserJoined(2)).await;

        mgr.leave_channel().await.unwrap();
        let calls = engine.calls();
        assert_eq!(calls.last().map(String::as_str), Some("leave_channel"));
        assert!(!calls.iter().any(|c| c == "stop_preview"));
        assert!(mgr.users().await.is_empty());
        assert!(log.events().iter().any(|e| matches!(e, VeloEvent::ChannelLeft)));
    }

    #[tokio::test]
    async fn join_with_settings_uses_configured_token_and_uid() {
        let engine = Arc::new(FakeEngine::default());
        let settings = Settings {
            rtc_token: Some("cfg-token".into()),
            uid: 77,
            token_url: Some("https://tokens.example.com".into()),
            ..Default::default()
        };
        let mgr = ChannelManager::from_settings(engine.clone(), &settings, EventEmitter::new());

        mgr.join_with_settings("Testing").await.unwrap();
        let joins = engine.joins.lock().unwrap().clone();
        assert_eq!(joins[0].0.as_deref(), Some("cfg-token"));
        assert_eq!(joins[0].2, 77);
        assert!(mgr.label().await.unwrap().contains("tokens.example.com"));
    }
}
