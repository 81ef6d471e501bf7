// ============================================================================
// IMAGE LOADER & ENCODERS
// ============================================================================

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ColorType, ImageEncoder, Rgba, RgbaImage};

use crate::canvas::{LayeredCanvas, MAX_PIXELS};
use crate::error::{DecodeError, EncodeError};
use crate::ops::transform::{Interpolation, fit_within, flatten_image, resize_rgba};

/// Token the client uses for "no photo yet" posts.
pub const PLACEHOLDER_TOKEN: &str = "placeholder.svg";
pub const PLACEHOLDER_DEFAULT_SIZE: u32 = 600;

const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

// ============================================================================
// SOURCES
// ============================================================================

/// Where an edit starts from.
#[derive(Clone, Debug)]
pub enum ImageSource {
    /// An uploaded file's bytes.
    Bytes { data: Vec<u8>, name: Option<String> },
    File(PathBuf),
    /// `data:`, `file://`, `http(s)://` or a placeholder token.
    Url(String),
    /// Quick-start white canvas, no photo behind it.
    Placeholder { width: u32, height: u32 },
}

impl ImageSource {
    /// Interpret a command-line argument: an existing path wins, anything else is a URL.
    pub fn from_arg(arg: &str) -> Self {
        let path = Path::new(arg);
        if path.exists() {
            ImageSource::File(path.to_path_buf())
        } else {
            ImageSource::Url(arg.to_string())
        }
    }

    /// Short human-readable label for logs.
    pub fn describe(&self) -> String {
        match self {
            ImageSource::Bytes { data, name } => {
                format!("{} ({} bytes)", name.as_deref().unwrap_or("upload"), data.len())
            }
            ImageSource::File(path) => path.display().to_string(),
            ImageSource::Url(url) if url.starts_with("data:") => "data url".to_string(),
            ImageSource::Url(url) => url.clone(),
            ImageSource::Placeholder { width, height } => format!("placeholder {}x{}", width, height),
        }
    }
}

/// Resolves `http(s)` URLs. The engine ships without a network stack; callers plug one in.
pub trait FetchRemote: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>, String>;
}

/// Decoded but not yet normalised source.
pub enum DecodedSource {
    Raster(RgbaImage),
    Placeholder { width: u32, height: u32 },
}

/// Parse `…placeholder.svg?height=H&width=W`. Missing sizes default to 600.
pub fn parse_placeholder_token(token: &str) -> Option<(u32, u32)> {
    if !token.contains(PLACEHOLDER_TOKEN) {
        return None;
    }
    let mut width = PLACEHOLDER_DEFAULT_SIZE;
    let mut height = PLACEHOLDER_DEFAULT_SIZE;
    if let Some((_, query)) = token.split_once('?') {
        for pair in query.split('&') {
            let Some((key, value)) = pair.split_once('=') else { continue };
            let Ok(value) = value.trim().parse::<u32>() else { continue };
            match key.trim() {
                "width" if value > 0 => width = value,
                "height" if value > 0 => height = value,
                _ => {}
            }
        }
    }
    Some((width, height))
}

/// Payload of a base64 `data:` URL.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, DecodeError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| DecodeError::DataUrl("missing data: prefix".into()))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| DecodeError::DataUrl("missing ',' separator".into()))?;
    if !header.split(';').any(|part| part == "base64") {
        return Err(DecodeError::DataUrl(format!("unsupported encoding in '{}'", header)));
    }
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| DecodeError::DataUrl(e.to_string()))
}

/// Decode an encoded raster (PNG, JPEG, WebP) to RGBA.
pub fn decode_bytes(data: &[u8]) -> Result<RgbaImage, DecodeError> {
    if data.is_empty() {
        return Err(DecodeError::Empty);
    }
    let (width, height) = image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()?
        .into_dimensions()?;
    check_dimensions(width, height)?;

    let img = image::io::Reader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?
        .to_rgba8();
    Ok(img)
}

fn check_dimensions(width: u32, height: u32) -> Result<(), DecodeError> {
    if width == 0 || height == 0 {
        return Err(DecodeError::Empty);
    }
    if (width as u64) * (height as u64) > MAX_PIXELS {
        return Err(DecodeError::TooLarge { width, height });
    }
    Ok(())
}

/// Turn any [`ImageSource`] into pixels (or the placeholder marker).
pub fn read_source(
    source: &ImageSource,
    fetcher: Option<&dyn FetchRemote>,
) -> Result<DecodedSource, DecodeError> {
    match source {
        ImageSource::Bytes { data, .. } => decode_bytes(data).map(DecodedSource::Raster),
        ImageSource::File(path) => {
            let data = std::fs::read(path)?;
            decode_bytes(&data).map(DecodedSource::Raster)
        }
        ImageSource::Placeholder { width, height } => {
            check_dimensions(*width, *height)?;
            Ok(DecodedSource::Placeholder { width: *width, height: *height })
        }
        ImageSource::Url(url) => {
            if let Some((width, height)) = parse_placeholder_token(url) {
                return Ok(DecodedSource::Placeholder { width, height });
            }
            if url.starts_with("data:") {
                return decode_bytes(&decode_data_url(url)?).map(DecodedSource::Raster);
            }
            if let Some(path) = url.strip_prefix("file://") {
                let data = std::fs::read(path)?;
                return decode_bytes(&data).map(DecodedSource::Raster);
            }
            let fetcher = fetcher.ok_or_else(|| DecodeError::RemoteUnavailable(url.clone()))?;
            let data = fetcher.fetch(url).map_err(|reason| DecodeError::Fetch {
                url: url.clone(),
                reason,
            })?;
            decode_bytes(&data).map(DecodedSource::Raster)
        }
    }
}

// ============================================================================
// LOAD: normalise to the editing surface
// ============================================================================

/// Editing surface plus the full-resolution original kept for upload export.
pub struct LoadedImage {
    pub canvas: LayeredCanvas,
    pub original: Option<Arc<RgbaImage>>,
}

/// Decode `source` and fit it inside `max_edit_dim` (never upscaling).
pub fn load_image(
    source: &ImageSource,
    max_edit_dim: u32,
    interp: Interpolation,
    fetcher: Option<&dyn FetchRemote>,
) -> Result<LoadedImage, DecodeError> {
    match read_source(source, fetcher)? {
        DecodedSource::Placeholder { width, height } => {
            let (w, h) = fit_within(width, height, max_edit_dim);
            Ok(LoadedImage {
                canvas: LayeredCanvas::filled(w, h, WHITE),
                original: None,
            })
        }
        DecodedSource::Raster(img) => {
            let (w, h) = fit_within(img.width(), img.height(), max_edit_dim);
            let surface = resize_rgba(&img, w, h, interp);
            Ok(LoadedImage {
                canvas: LayeredCanvas::from_background(&surface),
                original: Some(Arc::new(img)),
            })
        }
    }
}

// ============================================================================
// ENCODED BLOBS
// ============================================================================

/// Lossy encoding quality (1-100). Clamped on construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u8);

impl Quality {
    pub fn new(value: u8) -> Self {
        Self(value.clamp(1, 100))
    }

    /// From a canvas-style `0.0..=1.0` fraction.
    pub fn from_fraction(fraction: f32) -> Self {
        Self::new((fraction.clamp(0.0, 1.0) * 100.0).round() as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(92)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobFormat {
    Jpeg,
    Png,
}

impl BlobFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            BlobFormat::Jpeg => "jpg",
            BlobFormat::Png => "png",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            BlobFormat::Jpeg => "image/jpeg",
            BlobFormat::Png => "image/png",
        }
    }
}

/// An encoded image ready to hand to the upload bridge. Immutable once built.
#[derive(Clone, Debug)]
pub struct ImageBlob {
    pub data: Vec<u8>,
    pub format: BlobFormat,
    pub width: u32,
    pub height: u32,
    pub filename: String,
}

impl ImageBlob {
    pub fn content_type(&self) -> &'static str {
        self.format.content_type()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the blob back to pixels.
    pub fn decode(&self) -> Result<RgbaImage, DecodeError> {
        decode_bytes(&self.data)
    }

    pub fn write_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &self.data)
    }
}

/// Milliseconds since the Unix epoch, for generated filenames.
pub fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}

/// `<context>-<timestamp>.<ext>`
pub fn blob_filename(context: &str, format: BlobFormat) -> String {
    format!("{}-{}.{}", context, timestamp_millis(), format.extension())
}

fn ensure_not_empty(image: &RgbaImage) -> Result<(), EncodeError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(EncodeError::EmptyRaster { width: image.width(), height: image.height() });
    }
    Ok(())
}

/// JPEG has no alpha channel, so the image is flattened over white first.
pub fn encode_jpeg(image: &RgbaImage, quality: Quality) -> Result<Vec<u8>, EncodeError> {
    ensure_not_empty(image)?;
    let flat = flatten_image(image, WHITE);
    let rgb = image::DynamicImage::ImageRgba8(flat).to_rgb8();

    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.value());
    encoder.encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)?;
    Ok(buf)
}

pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, EncodeError> {
    ensure_not_empty(image)?;
    let mut buf = Vec::new();
    PngEncoder::new(&mut buf).write_image(
        image.as_raw(),
        image.width(),
        image.height(),
        ColorType::Rgba8,
    )?;
    Ok(buf)
}

/// Encode and wrap into a named [`ImageBlob`].
pub fn encode_blob(
    image: &RgbaImage,
    format: BlobFormat,
    quality: Quality,
    context: &str,
) -> Result<ImageBlob, EncodeError> {
    let data = match format {
        BlobFormat::Jpeg => encode_jpeg(image, quality)?,
        BlobFormat::Png => encode_png(image)?,
    };
    Ok(ImageBlob {
        data,
        format,
        width: image.width(),
        height: image.height(),
        filename: blob_filename(context, format),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_bytes(width: u32, height: u32, color: Rgba<u8>) -> Vec<u8> {
        encode_png(&RgbaImage::from_pixel(width, height, color)).unwrap()
    }

    #[test]
    fn placeholder_token_reads_query_sizes() {
        assert_eq!(parse_placeholder_token("/placeholder.svg?height=600&width=600"), Some((600, 600)));
        assert_eq!(parse_placeholder_token("/placeholder.svg?width=800&height=200"), Some((800, 200)));
        assert_eq!(parse_placeholder_token("/placeholder.svg"), Some((600, 600)));
        assert_eq!(parse_placeholder_token("https://cdn.example.com/a.jpg"), None);
    }

    #[test]
    fn load_scales_large_images_down() {
        let source = ImageSource::Bytes { data: png_bytes(2000, 1000, WHITE), name: None };
        let loaded = load_image(&source, 480, Interpolation::Lanczos3, None).unwrap();
        assert_eq!((loaded.canvas.width(), loaded.canvas.height()), (480, 240));
        assert_eq!(loaded.original.as_ref().map(|o| o.dimensions()), Some((2000, 1000)));
    }

    #[test]
    fn load_never_upscales() {
        let source = ImageSource::Bytes { data: png_bytes(300, 200, WHITE), name: None };
        let loaded = load_image(&source, 480, Interpolation::Lanczos3, None).unwrap();
        assert_eq!((loaded.canvas.width(), loaded.canvas.height()), (300, 200));
    }

    #[test]
    fn placeholder_url_gives_white_surface_without_original() {
        let source = ImageSource::Url("/placeholder.svg?height=600&width=600".into());
        let loaded = load_image(&source, 480, Interpolation::Lanczos3, None).unwrap();
        assert_eq!((loaded.canvas.width(), loaded.canvas.height()), (480, 480));
        assert!(loaded.original.is_none());
        assert_eq!(*loaded.canvas.composite().get_pixel(240, 240), WHITE);
    }

    #[test]
    fn data_url_roundtrips_through_loader() {
        let payload = base64::engine::general_purpose::STANDARD.encode(png_bytes(10, 20, WHITE));
        let url = format!("data:image/png;base64,{}", payload);
        let loaded = load_image(&ImageSource::Url(url), 480, Interpolation::Lanczos3, None).unwrap();
        assert_eq!((loaded.canvas.width(), loaded.canvas.height()), (10, 20));
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let source = ImageSource::Bytes { data: b"definitely not a png".to_vec(), name: None };
        assert!(load_image(&source, 480, Interpolation::Lanczos3, None).is_err());
        let empty = ImageSource::Bytes { data: Vec::new(), name: None };
        assert!(matches!(
            load_image(&empty, 480, Interpolation::Lanczos3, None),
            Err(DecodeError::Empty)
        ));
    }

    #[test]
    fn remote_url_needs_a_fetcher() {
        let source = ImageSource::Url("https://cdn.example.com/wall.jpg".into());
        assert!(matches!(
            read_source(&source, None),
            Err(DecodeError::RemoteUnavailable(_))
        ));

        struct Fixed(Vec<u8>);
        impl FetchRemote for Fixed {
            fn fetch(&self, _url: &str) -> Result<Vec<u8>, String> {
                Ok(self.0.clone())
            }
        }
        let fetcher = Fixed(png_bytes(40, 30, WHITE));
        let loaded = load_image(&source, 480, Interpolation::Bilinear, Some(&fetcher)).unwrap();
        assert_eq!(loaded.canvas.width(), 40);
    }

    #[test]
    fn jpeg_blob_flattens_transparency_to_white() {
        let img = RgbaImage::new(8, 8);
        let blob = encode_blob(&img, BlobFormat::Jpeg, Quality::new(90), "preview").unwrap();
        assert_eq!(blob.content_type(), "image/jpeg");
        assert!(blob.filename.starts_with("preview-") && blob.filename.ends_with(".jpg"));
        let decoded = blob.decode().unwrap();
        assert!(decoded.pixels().all(|p| p[0] > 245 && p[1] > 245 && p[2] > 245));
    }

    #[test]
    fn quality_is_clamped() {
        assert_eq!(Quality::new(0).value(), 1);
        assert_eq!(Quality::new(150).value(), 100);
        assert_eq!(Quality::from_fraction(0.92).value(), 92);
    }
}
