//! Recording engine used by this crate's unit tests.

use std::sync::Mutex;

use crate::canvas::{CanvasChange, RtcConnection, VideoCanvas};
use crate::engine::{ChannelMediaOptions, ClientRole, RtcEngine, StatusCode, SurfaceHandle};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Call {
    StartPreview,
    StopPreview,
    SetupLocal(VideoCanvas),
    SetupRemote(VideoCanvas),
    SetupRemoteEx(VideoCanvas, RtcConnection),
    Update(SurfaceHandle, CanvasChange),
    Release(SurfaceHandle),
    Other(&'static str),
}

#[derive(Default)]
pub(crate) struct RecordingEngine {
    pub calls: Mutex<Vec<Call>>,
    pub fail_updates: Mutex<bool>,
    pub fail_preview: Mutex<bool>,
    /// Number of upcoming `setup_*` calls to reject.
    pub failing_setups: Mutex<u32>,
}

impl RecordingEngine {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: Call) -> StatusCode {
        self.calls.lock().unwrap().push(call);
        0
    }

    fn record_setup(&self, call: Call) -> StatusCode {
        let mut failing = self.failing_setups.lock().unwrap();
        if *failing > 0 {
            *failing -= 1;
            return -1;
        }
        drop(failing);
        self.record(call)
    }
}

impl RtcEngine for RecordingEngine {
    fn enable_video(&self) -> StatusCode {
        self.record(Call::Other("enable_video"))
    }

    fn enable_audio(&self) -> StatusCode {
        self.record(Call::Other("enable_audio"))
    }

    fn set_client_role(&self, _role: ClientRole) -> StatusCode {
        self.record(Call::Other("set_client_role"))
    }

    fn join_channel(
        &self,
        _token: Option<&str>,
        _channel: &str,
        _uid: u32,
        _options: Option<&ChannelMediaOptions>,
    ) -> StatusCode {
        self.record(Call::Other("join_channel"))
    }

    fn leave_channel(&self) -> StatusCode {
        self.record(Call::Other("leave_channel"))
    }

    fn start_preview(&self) -> StatusCode {
        if *self.fail_preview.lock().unwrap() {
            return -1;
        }
        self.record(Call::StartPreview)
    }

    fn stop_preview(&self) -> StatusCode {
        self.record(Call::StopPreview)
    }

    fn setup_local_video(&self, canvas: &VideoCanvas) -> StatusCode {
        self.record_setup(Call::SetupLocal(canvas.clone()))
    }

    fn setup_remote_video(&self, canvas: &VideoCanvas) -> StatusCode {
        self.record_setup(Call::SetupRemote(canvas.clone()))
    }

    fn setup_remote_video_ex(&self, canvas: &VideoCanvas, connection: &RtcConnection) -> StatusCode {
        self.record_setup(Call::SetupRemoteEx(canvas.clone(), connection.clone()))
    }

    fn update_canvas(&self, surface: SurfaceHandle, change: &CanvasChange) -> StatusCode {
        if *self.fail_updates.lock().unwrap() {
            return -1;
        }
        self.record(Call::Update(surface, *change))
    }

    fn release_surface(&self, surface: SurfaceHandle) -> StatusCode {
        self.record(Call::Release(surface))
    }
}
