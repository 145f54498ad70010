use crate::engine::SurfaceHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Fill the surface, cropping overflow.
    #[default]
    Hidden,
    /// Letterbox to keep the whole frame visible.
    Fit,
    Adaptive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetupMode {
    #[default]
    Replace,
    Add,
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MirrorMode {
    Auto,
    Enabled,
    #[default]
    Disabled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSourceType {
    PrimaryCamera,
    SecondaryCamera,
    PrimaryScreen,
    SecondaryScreen,
    CustomVideo,
    MediaPlayer,
    TranscodedVideo,
}

/// Crop region in surface coordinates. All zeros means "no crop".
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CropRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Identifies a connection when the engine runs more than one channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RtcConnection {
    pub channel_id: String,
    pub local_uid: u32,
}

/// What a surface renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceDescriptor {
    LocalParticipant,
    RemoteParticipant(u32),
    RemoteParticipantEx(u32, RtcConnection),
    MediaSource {
        source_type: MediaSourceType,
        media_player_id: Option<i32>,
    },
}

impl SourceDescriptor {
    pub fn is_local(&self) -> bool {
        matches!(self, SourceDescriptor::LocalParticipant)
    }
}

/// Display configuration of a bound surface.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct CanvasProperties {
    pub render_mode: RenderMode,
    pub crop_area: CropRect,
    pub setup_mode: SetupMode,
    pub mirror_mode: MirrorMode,
    pub enable_alpha_mask: bool,
}

/// One display property that differs from what the engine last received.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CanvasChange {
    RenderMode(RenderMode),
    CropArea(CropRect),
    SetupMode(SetupMode),
    MirrorMode(MirrorMode),
    AlphaMask(bool),
}

impl CanvasChange {
    pub fn apply_to(&self, props: &mut CanvasProperties) {
        match *self {
            CanvasChange::RenderMode(v) => props.render_mode = v,
            CanvasChange::CropArea(v) => props.crop_area = v,
            CanvasChange::SetupMode(v) => props.setup_mode = v,
            CanvasChange::MirrorMode(v) => props.mirror_mode = v,
            CanvasChange::AlphaMask(v) => props.enable_alpha_mask = v,
        }
    }
}

impl CanvasProperties {
    /// Fields of `next` that differ from `self`, in a fixed order.
    pub fn diff(&self, next: &CanvasProperties) -> Vec<CanvasChange> {
        let mut changes = Vec::new();
        if self.render_mode != next.render_mode {
            changes.push(CanvasChange::RenderMode(next.render_mode));
        }
        if self.crop_area != next.crop_area {
            changes.push(CanvasChange::CropArea(next.crop_area));
        }
        if self.setup_mode != next.setup_mode {
            changes.push(CanvasChange::SetupMode(next.setup_mode));
        }
        if self.mirror_mode != next.mirror_mode {
            changes.push(CanvasChange::MirrorMode(next.mirror_mode));
        }
        if self.enable_alpha_mask != next.enable_alpha_mask {
            changes.push(CanvasChange::AlphaMask(next.enable_alpha_mask));
        }
        changes
    }
}

/// Full canvas description handed to the engine on bind.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoCanvas {
    pub surface: SurfaceHandle,
    pub uid: u32,
    pub source_type: Option<MediaSourceType>,
    pub media_player_id: Option<i32>,
    pub properties: CanvasProperties,
}

impl VideoCanvas {
    pub fn new(surface: SurfaceHandle, source: &SourceDescriptor, properties: CanvasProperties) -> Self {
        let mut canvas = Self {
            surface,
            uid: 0,
            source_type: None,
            media_player_id: None,
            properties,
        };
        match source {
            SourceDescriptor::LocalParticipant => {}
            SourceDescriptor::RemoteParticipant(uid) | SourceDescriptor::RemoteParticipantEx(uid, _) => {
                canvas.uid = *uid;
            }
            SourceDescriptor::MediaSource { source_type, media_player_id } => {
                canvas.source_type = Some(*source_type);
                canvas.media_player_id = *media_player_id;
            }
        }
        canvas
    }
}
