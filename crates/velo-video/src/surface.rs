use std::sync::Arc;

use crate::canvas::{CanvasProperties, SourceDescriptor, VideoCanvas};
use crate::engine::{RtcEngine, SurfaceHandle};
use crate::errors::{check, VideoError};
use crate::preview::LocalPreview;

/// Binds one platform surface to a media source and keeps the engine's view
/// of its display properties in sync.
///
/// Property updates go through [`reconcile`](Self::reconcile), which only
/// pushes fields that differ from what the engine last accepted. Changing the
/// source goes through the full bind path again and only takes effect once
/// the engine accepts it.
pub struct VideoSurfaceAdapter {
    engine: Arc<dyn RtcEngine>,
    preview: Arc<LocalPreview>,
    surface: SurfaceHandle,
    source: SourceDescriptor,
    applied: CanvasProperties,
    holds_preview: bool,
}

impl VideoSurfaceAdapter {
    /// Bind `surface` to `source` with the given display properties, using a
    /// preview owned by this surface alone.
    pub fn bind(
        engine: Arc<dyn RtcEngine>,
        surface: SurfaceHandle,
        source: SourceDescriptor,
        properties: CanvasProperties,
    ) -> Result<Self, VideoError> {
        let preview = Arc::new(LocalPreview::new(engine.clone()));
        Self::bind_with_preview(engine, preview, surface, source, properties)
    }

    /// Bind with a preview shared among several surfaces.
    pub fn bind_with_preview(
        engine: Arc<dyn RtcEngine>,
        preview: Arc<LocalPreview>,
        surface: SurfaceHandle,
        source: SourceDescriptor,
        properties: CanvasProperties,
    ) -> Result<Self, VideoError> {
        let mut adapter = Self {
            engine,
            preview,
            surface,
            source,
            applied: properties,
            holds_preview: false,
        };
        adapter.holds_preview = adapter.bind_source(&adapter.source, &properties)?;
        Ok(adapter)
    }

    pub fn surface(&self) -> SurfaceHandle {
        self.surface
    }

    pub fn source(&self) -> &SourceDescriptor {
        &self.source
    }

    /// Properties as last accepted by the engine.
    pub fn properties(&self) -> &CanvasProperties {
        &self.applied
    }

    /// Push the fields of `next` that differ from the applied ones.
    ///
    /// Returns the number of engine calls made. A field whose update the
    /// engine rejects keeps its old applied value, so the next reconcile
    /// retries it.
    pub fn reconcile(&mut self, next: &CanvasProperties) -> Result<usize, VideoError> {
        let changes = self.applied.diff(next);
        if changes.is_empty() {
            return Ok(0);
        }

        let mut pushed = 0;
        for change in changes {
            check("update_canvas", self.engine.update_canvas(self.surface, &change))?;
            change.apply_to(&mut self.applied);
            pushed += 1;
        }
        tracing::debug!(surface = self.surface.0, pushed, "canvas reconciled");
        Ok(pushed)
    }

    /// Point the surface at a different source. Same source is a no-op.
    pub fn set_source(&mut self, source: SourceDescriptor) -> Result<(), VideoError> {
        let properties = self.applied;
        self.rebind(source, properties)
    }

    /// Point the surface at `source` with `properties` in one bind.
    ///
    /// With an unchanged source this only reconciles. On failure the adapter
    /// keeps its previous source and properties.
    pub fn rebind(&mut self, source: SourceDescriptor, properties: CanvasProperties) -> Result<(), VideoError> {
        if source == self.source {
            return self.reconcile(&properties).map(|_| ());
        }

        let holds = self.bind_source(&source, &properties)?;
        if self.holds_preview {
            self.preview.release();
        }
        self.holds_preview = holds;
        self.source = source;
        self.applied = properties;
        Ok(())
    }

    /// Release the surface from the engine.
    pub fn detach(self) -> Result<(), VideoError> {
        if self.holds_preview {
            self.preview.release();
        }
        tracing::info!(surface = self.surface.0, "surface detached");
        check("release_surface", self.engine.release_surface(self.surface))
    }

    /// Issue the engine setup for `source`. Returns whether a new preview
    /// hold was taken; a failed setup gives that hold back.
    fn bind_source(&self, source: &SourceDescriptor, properties: &CanvasProperties) -> Result<bool, VideoError> {
        let canvas = VideoCanvas::new(self.surface, source, *properties);
        let result = match source {
            SourceDescriptor::LocalParticipant => {
                self.preview.acquire()?;
                let code = self.engine.setup_local_video(&canvas);
                if code < 0 {
                    self.preview.release();
                }
                check("setup_local_video", code).map(|()| true)
            }
            SourceDescriptor::RemoteParticipant(_) => {
                check("setup_remote_video", self.engine.setup_remote_video(&canvas)).map(|()| false)
            }
            SourceDescriptor::RemoteParticipantEx(_, connection) => check(
                "setup_remote_video_ex",
                self.engine.setup_remote_video_ex(&canvas, connection),
            )
            .map(|()| false),
            SourceDescriptor::MediaSource { .. } => {
                check("setup_local_video", self.engine.setup_local_video(&canvas)).map(|()| false)
            }
        };
        match &result {
            Ok(_) => tracing::info!(surface = self.surface.0, source = ?source, "surface bound"),
            Err(e) => tracing::warn!(surface = self.surface.0, source = ?source, "bind failed: {e}"),
        }
        result
    }
}
