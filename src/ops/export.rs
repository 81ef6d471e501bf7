// ============================================================================
// COMPOSITOR / EXPORTER: preview and upload tiers
// ============================================================================

use image::RgbaImage;

use crate::canvas::LayeredCanvas;
use crate::error::EncodeError;
use crate::io::{BlobFormat, ImageBlob, Quality, encode_blob};
use crate::ops::transform::{Interpolation, fit_within, overlay_in_place, resize_premultiplied, resize_rgba};

/// Two explicit sizes drive the upload tier: the editing surface the
/// annotation was drawn on, and the final output derived from the original.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct UploadPlan {
    pub edit_size: (u32, u32),
    pub final_size: (u32, u32),
    /// `final_width / edit_width`, applied to the annotation layer.
    pub drawing_scale: f32,
    pub from_original: bool,
}

impl UploadPlan {
    pub fn new(canvas: &LayeredCanvas, original: Option<&RgbaImage>, max_dim: u32) -> Self {
        let edit_size = (canvas.width(), canvas.height());
        let (final_size, from_original) = match original {
            Some(img) => (fit_within(img.width(), img.height(), max_dim), true),
            None => (edit_size, false),
        };
        Self {
            edit_size,
            final_size,
            drawing_scale: final_size.0 as f32 / edit_size.0 as f32,
            from_original,
        }
    }
}

/// Fast "what will be posted" preview at editing resolution.
pub fn export_preview(canvas: &LayeredCanvas, quality: Quality) -> Result<ImageBlob, EncodeError> {
    let composite = canvas.composite();
    let blob = encode_blob(&composite, BlobFormat::Jpeg, quality, "preview")?;
    log::info!("export preview: {}x{}, {} bytes", blob.width, blob.height, blob.len());
    Ok(blob)
}

/// Flattened raster for upload, before encoding.
///
/// With the original available the background is re-derived from it (capped
/// at `max_dim`) and the annotation is scaled up by the drawing scale on top.
/// Without it, the editing-resolution composite is used as is.
pub fn render_for_upload(
    canvas: &LayeredCanvas,
    original: Option<&RgbaImage>,
    max_dim: u32,
    interp: Interpolation,
) -> (RgbaImage, UploadPlan) {
    let plan = UploadPlan::new(canvas, original, max_dim);
    let Some(original) = original else {
        log::debug!("upload render: no original, compositing at {}x{}", plan.edit_size.0, plan.edit_size.1);
        return (canvas.composite(), plan);
    };

    let (fw, fh) = plan.final_size;
    let mut base = resize_rgba(original, fw, fh, interp);

    let annotation = &canvas.annotation().pixels;
    if annotation.chunk_count() > 0 {
        let scaled = resize_premultiplied(&annotation.to_rgba_image(), fw, fh, interp);
        overlay_in_place(&mut base, &scaled);
    }
    log::debug!(
        "upload render: original {}x{} -> {}x{}, drawing scale {:.3}",
        original.width(), original.height(), fw, fh, plan.drawing_scale
    );
    (base, plan)
}

/// High-quality upload blob.
pub fn export_for_upload(
    canvas: &LayeredCanvas,
    original: Option<&RgbaImage>,
    max_dim: u32,
    quality: Quality,
    interp: Interpolation,
) -> Result<ImageBlob, EncodeError> {
    let (raster, plan) = render_for_upload(canvas, original, max_dim, interp);
    let blob = encode_blob(&raster, BlobFormat::Jpeg, quality, "image")?;
    log::info!(
        "export upload: {}x{} ({}), {} bytes",
        blob.width,
        blob.height,
        if plan.from_original { "from original" } else { "edit resolution" },
        blob.len()
    );
    Ok(blob)
}
