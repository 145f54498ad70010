//! Video surface binding for the RTC engine.
//!
//! Maps platform rendering surfaces onto local or remote media streams and
//! keeps their display configuration in sync with what the UI asks for.

use std::collections::HashMap;
use std::sync::Arc;

pub mod canvas;
pub mod engine;
pub mod errors;
pub mod preview;
pub mod surface;

#[cfg(test)]
pub(crate) mod testing;

pub use canvas::{
    CanvasChange, CanvasProperties, CropRect, MediaSourceType, MirrorMode, RenderMode, RtcConnection,
    SetupMode, SourceDescriptor, VideoCanvas,
};
pub use engine::{
    AudienceLatency, ChannelMediaOptions, ChannelProfile, ClientRole, RtcEngine, StatusCode, SurfaceHandle,
};
pub use errors::VideoError;
pub use preview::LocalPreview;
pub use surface::VideoSurfaceAdapter;

/// All surfaces currently bound to one engine, keyed by surface handle.
///
/// Owned by whoever owns the engine; there is no process-wide registry.
/// Every surface showing the local participant shares one camera preview.
pub struct VideoSurfaces {
    engine: Arc<dyn RtcEngine>,
    preview: Arc<LocalPreview>,
    surfaces: HashMap<SurfaceHandle, VideoSurfaceAdapter>,
}

impl VideoSurfaces {
    pub fn new(engine: Arc<dyn RtcEngine>) -> Self {
        Self {
            preview: Arc::new(LocalPreview::new(engine.clone())),
            engine,
            surfaces: HashMap::new(),
        }
    }

    /// Attach `surface` to `source`.
    ///
    /// An already attached surface is re-pointed: a different source goes
    /// through one full bind with `properties`, the same source only
    /// reconciles them.
    pub fn attach(
        &mut self,
        surface: SurfaceHandle,
        source: SourceDescriptor,
        properties: CanvasProperties,
    ) -> Result<(), VideoError> {
        if let Some(adapter) = self.surfaces.get_mut(&surface) {
            return adapter.rebind(source, properties);
        }

        let adapter =
            VideoSurfaceAdapter::bind_with_preview(self.engine.clone(), self.preview.clone(), surface, source, properties)?;
        self.surfaces.insert(surface, adapter);
        Ok(())
    }

    /// Reconcile the display properties of an attached surface.
    pub fn update(&mut self, surface: SurfaceHandle, properties: &CanvasProperties) -> Result<usize, VideoError> {
        self.surfaces
            .get_mut(&surface)
            .ok_or(VideoError::UnknownSurface(surface.0))?
            .reconcile(properties)
    }

    pub fn detach(&mut self, surface: SurfaceHandle) -> Result<(), VideoError> {
        self.surfaces
            .remove(&surface)
            .ok_or(VideoError::UnknownSurface(surface.0))?
            .detach()
    }

    /// Detach every surface, logging failures instead of stopping early.
    pub fn detach_all(&mut self) {
        for (handle, adapter) in self.surfaces.drain() {
            if let Err(e) = adapter.detach() {
                tracing::warn!(surface = handle.0, "detach failed: {e}");
            }
        }
    }

    pub fn source(&self, surface: SurfaceHandle) -> Option<&SourceDescriptor> {
        self.surfaces.get(&surface).map(VideoSurfaceAdapter::source)
    }

    /// Surfaces currently holding the local preview.
    pub fn preview_holders(&self) -> usize {
        self.preview.holders()
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Call, RecordingEngine};

    #[test]
    fn attach_twice_with_same_source_only_reconciles() {
        let eng = Arc::new(RecordingEngine::default());
        let mut surfaces = VideoSurfaces::new(eng.clone());
        let props = CanvasProperties::default();

        surfaces.attach(SurfaceHandle(1), SourceDescriptor::RemoteParticipant(3), props).unwrap();
        eng.reset();
        surfaces.attach(SurfaceHandle(1), SourceDescriptor::RemoteParticipant(3), props).unwrap();

        assert!(eng.calls().is_empty());
        assert_eq!(surfaces.len(), 1);
    }

    #[test]
    fn update_unknown_surface_is_rejected() {
        let eng = Arc::new(RecordingEngine::default());
        let mut surfaces = VideoSurfaces::new(eng.clone());
        let err = surfaces.update(SurfaceHandle(9), &CanvasProperties::default()).unwrap_err();
        assert!(matches!(err, VideoError::UnknownSurface(9)));
        assert!(eng.calls().is_empty());
    }

    #[test]
    fn detach_all_releases_every_surface() {
        let eng = Arc::new(RecordingEngine::default());
        let mut surfaces = VideoSurfaces::new(eng.clone());
        surfaces
            .attach(SurfaceHandle(1), SourceDescriptor::RemoteParticipant(1), CanvasProperties::default())
            .unwrap();
        surfaces
            .attach(SurfaceHandle(2), SourceDescriptor::RemoteParticipant(2), CanvasProperties::default())
            .unwrap();
        eng.reset();

        surfaces.detach_all();
        assert!(surfaces.is_empty());
        let releases = eng.calls().into_iter().filter(|c| matches!(c, Call::Release(_))).count();
        assert_eq!(releases, 2);
    }

    #[test]
    fn preview_survives_until_last_local_surface_detaches() {
        let eng = Arc::new(RecordingEngine::default());
        let mut surfaces = VideoSurfaces::new(eng.clone());
        let props = CanvasProperties::default();

        surfaces.attach(SurfaceHandle(1), SourceDescriptor::LocalParticipant, props).unwrap();
        surfaces.attach(SurfaceHandle(2), SourceDescriptor::LocalParticipant, props).unwrap();
        assert_eq!(eng.calls().iter().filter(|c| **c == Call::StartPreview).count(), 1);
        assert_eq!(surfaces.preview_holders(), 2);
        eng.reset();

        surfaces.detach(SurfaceHandle(1)).unwrap();
        assert_eq!(eng.calls(), vec![Call::Release(SurfaceHandle(1))]);
        eng.reset();

        surfaces.detach(SurfaceHandle(2)).unwrap();
        assert_eq!(eng.calls(), vec![Call::StopPreview, Call::Release(SurfaceHandle(2))]);
        assert_eq!(surfaces.preview_holders(), 0);
    }

    #[test]
    fn repointing_a_surface_binds_once_with_new_properties() {
        let eng = Arc::new(RecordingEngine::default());
        let mut surfaces = VideoSurfaces::new(eng.clone());
        surfaces
            .attach(SurfaceHandle(1), SourceDescriptor::RemoteParticipant(1), CanvasProperties::default())
            .unwrap();
        eng.reset();

        let next = CanvasProperties { render_mode: RenderMode::Adaptive, enable_alpha_mask: true, ..Default::default() };
        surfaces.attach(SurfaceHandle(1), SourceDescriptor::RemoteParticipant(2), next).unwrap();

        let calls = eng.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(&calls[0], Call::SetupRemote(c) if c.uid == 2 && c.properties == next));
    }

    #[test]
    fn local_surface_switched_to_remote_gives_up_its_preview_hold() {
        let eng = Arc::new(RecordingEngine::default());
        let mut surfaces = VideoSurfaces::new(eng.clone());
        let props = CanvasProperties::default();
        surfaces.attach(SurfaceHandle(1), SourceDescriptor::LocalParticipant, props).unwrap();
        surfaces.attach(SurfaceHandle(2), SourceDescriptor::LocalParticipant, props).unwrap();
        eng.reset();

        surfaces.attach(SurfaceHandle(1), SourceDescriptor::RemoteParticipant(7), props).unwrap();
        assert!(!eng.calls().contains(&Call::StopPreview));
        assert_eq!(surfaces.preview_holders(), 1);
    }
}
