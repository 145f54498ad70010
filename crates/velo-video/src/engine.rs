use crate::canvas::{CanvasChange, RtcConnection, VideoCanvas};

/// Vendor status code: 0 means success, negative values are failures.
pub type StatusCode = i32;

/// Opaque platform rendering surface (UIView / NSView / SurfaceView pointer
/// handed over by the native shell). Ownership is never transferred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientRole {
    #[default]
    Audience,
    Broadcaster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelProfile {
    Communication,
    LiveBroadcasting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudienceLatency {
    Low,
    UltraLow,
}

/// Options passed along with a channel join.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMediaOptions {
    pub profile: ChannelProfile,
    pub client_role: Option<ClientRole>,
    pub audience_latency: Option<AudienceLatency>,
}

impl ChannelMediaOptions {
    pub fn communication() -> Self {
        Self {
            profile: ChannelProfile::Communication,
            client_role: None,
            audience_latency: None,
        }
    }

    pub fn broadcast(is_broadcaster: bool) -> Self {
        Self {
            profile: ChannelProfile::LiveBroadcasting,
            client_role: Some(if is_broadcaster {
                ClientRole::Broadcaster
            } else {
                ClientRole::Audience
            }),
            audience_latency: Some(if is_broadcaster {
                AudienceLatency::UltraLow
            } else {
                AudienceLatency::Low
            }),
        }
    }
}

/// The slice of the vendor RTC engine this client drives.
///
/// Every call is synchronous and returns the vendor status code. The native
/// shell implements this over the real SDK; tests use recording fakes.
pub trait RtcEngine: Send + Sync {
    fn enable_video(&self) -> StatusCode;
    fn enable_audio(&self) -> StatusCode;
    fn set_client_role(&self, role: ClientRole) -> StatusCode;

    fn join_channel(
        &self,
        token: Option<&str>,
        channel: &str,
        uid: u32,
        options: Option<&ChannelMediaOptions>,
    ) -> StatusCode;
    fn leave_channel(&self) -> StatusCode;

    fn start_preview(&self) -> StatusCode;
    fn stop_preview(&self) -> StatusCode;

    fn setup_local_video(&self, canvas: &VideoCanvas) -> StatusCode;
    fn setup_remote_video(&self, canvas: &VideoCanvas) -> StatusCode;
    fn setup_remote_video_ex(&self, canvas: &VideoCanvas, connection: &RtcConnection) -> StatusCode;

    /// Push a single changed display property for an already bound surface.
    fn update_canvas(&self, surface: SurfaceHandle, change: &CanvasChange) -> StatusCode;

    /// Detach the surface from whatever stream it renders.
    fn release_surface(&self, surface: SurfaceHandle) -> StatusCode;
}
