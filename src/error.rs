use crate::session::SessionState;

/// The source could not be turned into a raster.
#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("unsupported or corrupt image: {0}")]
    Image(#[from] image::ImageError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("image has zero width or height")]
    Empty,
    #[error("image of {width}x{height} exceeds the 256 megapixel limit")]
    TooLarge { width: u32, height: u32 },
    #[error("malformed data url: {0}")]
    DataUrl(String),
    #[error("no fetcher configured for remote url {0}")]
    RemoteUnavailable(String),
    #[error("fetching {url} failed: {reason}")]
    Fetch { url: String, reason: String },
}

/// A crop rectangle that cannot be applied to the displayed image.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum InvalidRegionError {
    #[error("crop region must have a positive size, got {width}x{height}")]
    Degenerate { width: f32, height: f32 },
    #[error("displayed image size must be positive, got {width}x{height}")]
    DisplaySize { width: f32, height: f32 },
    #[error(
        "crop region ({x}, {y}, {width}x{height}) lies outside the {display_width}x{display_height} image"
    )]
    OutOfBounds {
        x: f32,
        y: f32,
        width: f32,
        height: f32,
        display_width: f32,
        display_height: f32,
    },
    #[error("cannot crop a {width}x{height} source image")]
    EmptySource { width: u32, height: u32 },
    #[error("crop region {width}x{height} does not match aspect ratio {aspect}")]
    AspectMismatch { width: f32, height: f32, aspect: f32 },
}

#[derive(thiserror::Error, Debug)]
pub enum EncodeError {
    #[error("encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("nothing to encode: raster is {width}x{height}")]
    EmptyRaster { width: u32, height: u32 },
}

/// Failure reported by the upload bridge. Never retried by the engine.
#[derive(thiserror::Error, Debug)]
pub enum UploadError {
    #[error("invalid file type {0:?}: only .jpg, .jpeg and .png are accepted")]
    InvalidFileType(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("could not serialize upload request: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("upload rejected: {0}")]
    Rejected(String),
}

#[derive(thiserror::Error, Debug)]
pub enum CanvasError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    InvalidRegion(#[from] InvalidRegionError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error("cannot {op} while the session is {state}")]
    InvalidState { op: &'static str, state: SessionState },
}
