//! Layered canvas engine for annotating photos before they are posted.
//!
//! An [`EditSession`] owns one image edit: the loader normalises the source to
//! a bounded editing surface, the drawing engine paints brush and eraser
//! strokes onto a transparent annotation layer, the history stack snapshots
//! that layer after every stroke, and the exporter flattens everything into a
//! JPEG blob for the upload bridge. Cropping avatars and banners is a separate
//! one-shot operation in [`ops::crop`].

#![allow(clippy::too_many_arguments)]

pub mod canvas;
pub mod cli;
pub mod components;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod session;
pub mod settings;
pub mod upload;

pub use canvas::{DirtyRect, Layer, LayeredCanvas, TiledImage};
pub use components::history::HistoryStack;
pub use components::tools::{BrushSettings, DrawingEngine, PointerEvent, PointerKind, StrokeMode};
pub use error::{CanvasError, DecodeError, EncodeError, InvalidRegionError, UploadError};
pub use io::{BlobFormat, ImageBlob, ImageSource, Quality};
pub use ops::crop::CropRegion;
pub use session::{EditSession, SessionState};
pub use settings::EngineSettings;
pub use upload::{DirectoryBridge, UploadBridge, UploadCategory};
