use std::fmt;
use std::sync::Arc;

use image::RgbaImage;
use uuid::Uuid;

use crate::canvas::LayeredCanvas;
use crate::components::history::HistoryStack;
use crate::components::tools::{BrushSettings, DrawingEngine, PointerEvent, PointerKind, StrokeMode, StrokeSummary};
use crate::error::CanvasError;
use crate::io::{FetchRemote, ImageBlob, ImageSource, load_image};
use crate::ops::export;
use crate::settings::EngineSettings;
use crate::upload::{UploadBridge, UploadCategory};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unloaded,
    Loaded,
    Editing,
    Exported,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unloaded => "unloaded",
            SessionState::Loaded => "loaded",
            SessionState::Editing => "editing",
            SessionState::Exported => "exported",
        };
        f.write_str(name)
    }
}

struct OpenEdit {
    canvas: LayeredCanvas,
    /// Full-resolution decode, `None` for placeholder canvases.
    original: Option<Arc<RgbaImage>>,
    history: HistoryStack,
}

/// One post / avatar / banner edit: owns both layers, the history and the
/// drawing engine. Nothing is persisted; dropping the session discards it.
pub struct EditSession {
    id: Uuid,
    state: SessionState,
    edit: Option<OpenEdit>,
    engine: DrawingEngine,
    brush: BrushSettings,
    settings: EngineSettings,
    fetcher: Option<Box<dyn FetchRemote>>,
}

impl Default for EditSession {
    fn default() -> Self {
        Self::new(EngineSettings::default())
    }
}

impl EditSession {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: SessionState::Unloaded,
            edit: None,
            engine: DrawingEngine::new(),
            brush: BrushSettings::brush(settings.default_brush_color, settings.default_brush_width),
            settings,
            fetcher: None,
        }
    }

    /// Resolve `http(s)` sources through `fetcher`.
    pub fn with_fetcher(mut self, fetcher: Box<dyn FetchRemote>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn canvas(&self) -> Option<&LayeredCanvas> {
        self.edit.as_ref().map(|e| &e.canvas)
    }

    pub fn history(&self) -> Option<&HistoryStack> {
        self.edit.as_ref().map(|e| &e.history)
    }

    pub fn original(&self) -> Option<&RgbaImage> {
        self.edit.as_ref().and_then(|e| e.original.as_deref())
    }

    pub fn engine(&self) -> &DrawingEngine {
        &self.engine
    }

    /// Editing surface size.
    pub fn edit_size(&self) -> Option<(u32, u32)> {
        self.canvas().map(|c| (c.width(), c.height()))
    }

    /// Current brush used by [`begin_stroke`](Self::begin_stroke).
    pub fn brush(&self) -> BrushSettings {
        self.brush
    }

    pub fn set_brush(&mut self, brush: BrushSettings) {
        self.brush = brush;
    }

    pub fn set_mode(&mut self, mode: StrokeMode) {
        self.brush.mode = mode;
    }

    /// Size the surface is shown at, for pointer scaling.
    pub fn set_display_size(&mut self, width: f32, height: f32) {
        self.engine.set_display_size(width, height);
    }

    fn require_editable(&self, op: &'static str) -> Result<(), CanvasError> {
        match self.state {
            SessionState::Loaded | SessionState::Editing => Ok(()),
            state => Err(CanvasError::InvalidState { op, state }),
        }
    }

    // ---- Image Loader -------------------------------------------------------

    /// Decode `source` and start a fresh edit. Valid in any state; on failure
    /// the previous edit (if any) is left untouched.
    pub fn load(&mut self, source: ImageSource) -> Result<(), CanvasError> {
        let loaded = load_image(
            &source,
            self.settings.max_edit_dim,
            self.settings.resample,
            self.fetcher.as_deref(),
        )
        .inspect_err(|e| log::warn!("load of {} failed: {}", source.describe(), e))?;

        let history = HistoryStack::new(
            loaded.canvas.annotation().pixels.clone(),
            self.settings.max_history_entries,
        );
        log::info!(
            "loaded {}: editing surface {}x{}{}",
            source.describe(),
            loaded.canvas.width(),
            loaded.canvas.height(),
            match &loaded.original {
                Some(o) => format!(", original {}x{}", o.width(), o.height()),
                None => String::new(),
            }
        );

        self.id = Uuid::new_v4();
        self.engine = DrawingEngine::new();
        self.edit = Some(OpenEdit {
            canvas: loaded.canvas,
            original: loaded.original,
            history,
        });
        self.state = SessionState::Loaded;
        Ok(())
    }

    // ---- Drawing Engine -----------------------------------------------------

    /// Pointer down with the current brush.
    pub fn begin_stroke(&mut self, event: PointerEvent) -> Result<bool, CanvasError> {
        let brush = self.brush;
        self.begin_stroke_with(event, brush)
    }

    pub fn begin_stroke_with(&mut self, event: PointerEvent, brush: BrushSettings) -> Result<bool, CanvasError> {
        self.require_editable("draw")?;
        let Some(edit) = self.edit.as_mut() else {
            return Err(CanvasError::InvalidState { op: "draw", state: self.state });
        };
        let started = self.engine.begin_stroke(edit.canvas.annotation_pixels_mut(), event, brush);
        if started {
            self.state = SessionState::Editing;
        }
        Ok(started)
    }

    /// Pointer move. A no-op (returns `false`) when no stroke is active.
    pub fn continue_stroke(&mut self, event: PointerEvent) -> bool {
        let Some(edit) = self.edit.as_mut() else { return false };
        self.engine.continue_stroke(edit.canvas.annotation_pixels_mut(), event)
    }

    /// Pointer up. Snapshots the annotation layer into history. `true` if an
    /// entry was pushed.
    pub fn end_stroke(&mut self) -> bool {
        let summary = self.engine.end_stroke();
        self.commit(summary)
    }

    /// Pointer left the surface or touch was cancelled; treated like pointer up.
    pub fn pointer_leave(&mut self, kind: PointerKind) -> bool {
        let summary = self.engine.pointer_leave(kind);
        self.commit(summary)
    }

    fn commit(&mut self, summary: Option<StrokeSummary>) -> bool {
        let Some(summary) = summary else { return false };
        let Some(edit) = self.edit.as_mut() else { return false };
        if summary.bounds.is_none() {
            log::debug!("stroke touched no pixels, history unchanged");
            return false;
        }
        edit.history.push(edit.canvas.annotation().pixels.clone());
        log::debug!(
            "history: {} entries, index {}, {} KiB",
            edit.history.len(),
            edit.history.index(),
            edit.history.memory_usage() / 1024
        );
        true
    }

    /// Whether the host should suppress default touch scrolling / zooming.
    pub fn suppresses_default_gestures(&self) -> bool {
        self.engine.suppresses_default_gestures()
    }

    // ---- History ------------------------------------------------------------

    /// Step back one stroke. Ignored while drawing or outside `Loaded`/`Editing`.
    pub fn undo(&mut self) -> bool {
        if self.engine.is_drawing() || self.require_editable("undo").is_err() {
            return false;
        }
        let Some(edit) = self.edit.as_mut() else { return false };
        match edit.history.undo() {
            Some(snapshot) => edit.canvas.restore_annotation(snapshot),
            None => false,
        }
    }

    /// Step forward one stroke. Same guards as [`undo`](Self::undo).
    pub fn redo(&mut self) -> bool {
        if self.engine.is_drawing() || self.require_editable("redo").is_err() {
            return false;
        }
        let Some(edit) = self.edit.as_mut() else { return false };
        match edit.history.redo() {
            Some(snapshot) => edit.canvas.restore_annotation(snapshot),
            None => false,
        }
    }

    pub fn can_undo(&self) -> bool {
        !self.engine.is_drawing() && self.history().is_some_and(|h| h.can_undo())
    }

    pub fn can_redo(&self) -> bool {
        !self.engine.is_drawing() && self.history().is_some_and(|h| h.can_redo())
    }

    // ---- Compositor / Exporter ----------------------------------------------

    pub fn composite(&self) -> Result<RgbaImage, CanvasError> {
        match &self.edit {
            Some(edit) => Ok(edit.canvas.composite()),
            None => Err(CanvasError::InvalidState { op: "composite", state: self.state }),
        }
    }

    pub fn export_preview(&self) -> Result<ImageBlob, CanvasError> {
        self.require_editable("export a preview")?;
        let edit = self.open_edit("export a preview")?;
        Ok(export::export_preview(&edit.canvas, self.settings.preview_quality)?)
    }

    /// Final high-quality blob. Moves the session to `Exported` on success;
    /// on failure the session is left as it was.
    pub fn export_for_upload(&mut self) -> Result<ImageBlob, CanvasError> {
        let blob = self.render_upload_blob()?;
        self.state = SessionState::Exported;
        Ok(blob)
    }

    /// Export and hand the blob to `bridge`, returning the public URL.
    /// The session only becomes `Exported` once the bridge accepts the blob,
    /// so a failed upload can be retried.
    pub fn submit(&mut self, bridge: &dyn UploadBridge, category: UploadCategory) -> Result<String, CanvasError> {
        let blob = self.render_upload_blob()?;
        let url = bridge
            .upload(&blob, category)
            .inspect_err(|e| log::warn!("upload of {} failed: {}", blob.filename, e))?;
        self.state = SessionState::Exported;
        log::info!("uploaded {} as {}", blob.filename, url);
        Ok(url)
    }

    fn render_upload_blob(&self) -> Result<ImageBlob, CanvasError> {
        self.require_editable("export for upload")?;
        let edit = self.open_edit("export for upload")?;
        Ok(export::export_for_upload(
            &edit.canvas,
            edit.original.as_deref(),
            self.settings.upload_max_dim,
            self.settings.upload_quality,
            self.settings.resample,
        )?)
    }

    fn open_edit(&self, op: &'static str) -> Result<&OpenEdit, CanvasError> {
        self.edit
            .as_ref()
            .ok_or(CanvasError::InvalidState { op, state: self.state })
    }

    /// Drop everything and return to `Unloaded`.
    pub fn discard(&mut self) {
        if self.edit.is_some() {
            log::info!("session {} discarded", self.id);
        }
        self.edit = None;
        self.engine = DrawingEngine::new();
        self.state = SessionState::Unloaded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DecodeError, UploadError};
    use image::Rgba;
    use std::cell::Cell;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn demo_session() -> EditSession {
        let mut session = EditSession::default();
        session.load(ImageSource::Placeholder { width: 600, height: 600 }).unwrap();
        session
    }

    fn stroke(session: &mut EditSession, from: (f32, f32), to: (f32, f32)) {
        session.begin_stroke_with(PointerEvent::mouse(from.0, from.1), BrushSettings::brush(RED, 10.0)).unwrap();
        session.continue_stroke(PointerEvent::mouse(to.0, to.1));
        assert!(session.end_stroke());
    }

    #[test]
    fn lifecycle_moves_through_states() {
        let mut session = EditSession::default();
        assert_eq!(session.state(), SessionState::Unloaded);
        assert!(matches!(
            session.begin_stroke(PointerEvent::mouse(1.0, 1.0)),
            Err(CanvasError::InvalidState { state: SessionState::Unloaded, .. })
        ));

        session.load(ImageSource::Placeholder { width: 600, height: 600 }).unwrap();
        assert_eq!(session.state(), SessionState::Loaded);
        assert_eq!(session.edit_size(), Some((480, 480)));

        stroke(&mut session, (10.0, 10.0), (50.0, 50.0));
        assert_eq!(session.state(), SessionState::Editing);

        session.export_for_upload().unwrap();
        assert_eq!(session.state(), SessionState::Exported);
        assert!(!session.undo());
        assert!(session.begin_stroke(PointerEvent::mouse(1.0, 1.0)).is_err());

        session.discard();
        assert_eq!(session.state(), SessionState::Unloaded);
        assert!(session.canvas().is_none());
    }

    #[test]
    fn undo_is_ignored_mid_stroke() {
        let mut session = demo_session();
        stroke(&mut session, (10.0, 10.0), (50.0, 10.0));
        session.begin_stroke(PointerEvent::mouse(100.0, 100.0)).unwrap();
        assert!(!session.undo());
        assert!(!session.can_undo());
        assert!(session.end_stroke());
        assert_eq!(session.history().unwrap().index(), 2);
        assert!(session.undo());
    }

    #[test]
    fn undo_law_over_several_strokes() {
        let mut session = demo_session();
        for i in 0..4 {
            let y = 40.0 + i as f32 * 60.0;
            stroke(&mut session, (20.0, y), (400.0, y));
        }
        let after = session.composite().unwrap();
        for _ in 0..4 {
            assert!(session.undo());
        }
        assert!(!session.undo());
        for _ in 0..4 {
            assert!(session.redo());
        }
        assert!(!session.redo());
        assert_eq!(session.composite().unwrap(), after);
    }

    #[test]
    fn failed_load_keeps_current_edit() {
        let mut session = demo_session();
        stroke(&mut session, (10.0, 10.0), (50.0, 10.0));
        let before = session.composite().unwrap();

        let err = session.load(ImageSource::Bytes { data: vec![1, 2, 3], name: None }).unwrap_err();
        assert!(matches!(err, CanvasError::Decode(DecodeError::Image(_))));
        assert_eq!(session.state(), SessionState::Editing);
        assert_eq!(session.composite().unwrap(), before);
    }

    #[test]
    fn pointer_leave_commits_the_stroke() {
        let mut session = demo_session();
        session.begin_stroke(PointerEvent::touch(3, 30.0, 30.0)).unwrap();
        assert!(session.suppresses_default_gestures());
        session.continue_stroke(PointerEvent::touch(3, 90.0, 30.0));
        assert!(session.pointer_leave(PointerKind::Touch { id: 3 }));
        assert_eq!(session.history().unwrap().len(), 2);
        assert!(!session.suppresses_default_gestures());
    }

    #[test]
    fn eraser_leaves_background_untouched() {
        let mut session = demo_session();
        stroke(&mut session, (100.0, 100.0), (300.0, 100.0));
        let background = session.canvas().unwrap().background().pixels.to_rgba_image();

        session.begin_stroke_with(PointerEvent::mouse(90.0, 100.0), BrushSettings::eraser(30.0)).unwrap();
        session.continue_stroke(PointerEvent::mouse(310.0, 100.0));
        session.end_stroke();

        let canvas = session.canvas().unwrap();
        for x in (100..300).step_by(7) {
            assert_eq!(canvas.annotation().pixels.get_pixel(x, 100)[3], 0);
        }
        assert_eq!(canvas.background().pixels.to_rgba_image(), background);
        assert_eq!(*session.composite().unwrap().get_pixel(200, 100), Rgba([255, 255, 255, 255]));
    }

    struct FlakyBridge {
        failures_left: Cell<u32>,
    }

    impl UploadBridge for FlakyBridge {
        fn upload(&self, blob: &ImageBlob, _category: UploadCategory) -> Result<String, UploadError> {
            if self.failures_left.get() > 0 {
                self.failures_left.set(self.failures_left.get() - 1);
                return Err(UploadError::Rejected("network down".to_string()));
            }
            Ok(format!("https://cdn.example.com/uploads/{}", blob.filename))
        }
    }

    #[test]
    fn failed_upload_can_be_retried() {
        let mut session = demo_session();
        stroke(&mut session, (10.0, 10.0), (50.0, 10.0));
        let bridge = FlakyBridge { failures_left: Cell::new(1) };

        let err = session.submit(&bridge, UploadCategory::Posts).unwrap_err();
        assert!(matches!(err, CanvasError::Upload(UploadError::Rejected(_))));
        assert_eq!(session.state(), SessionState::Editing);
        assert!(session.can_undo());

        let url = session.submit(&bridge, UploadCategory::Posts).unwrap();
        assert!(url.ends_with(".jpg"));
        assert_eq!(session.state(), SessionState::Exported);
        assert!(session.submit(&bridge, UploadCategory::Posts).is_err());
    }
}
