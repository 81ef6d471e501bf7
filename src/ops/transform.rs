// ============================================================================
// TRANSFORM OPERATIONS: bounded-fit math, resampling, flattening
// ============================================================================

use image::{Rgba, RgbaImage, imageops};
use rayon::prelude::*;

use crate::canvas::blend_normal;

/// Interpolation method for resize operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Interpolation {
    Nearest,
    Bilinear,
    Bicubic,
    #[default]
    Lanczos3,
}

impl Interpolation {
    pub fn name(&self) -> &'static str {
        match self {
            Interpolation::Nearest  => "nearest",
            Interpolation::Bilinear => "bilinear",
            Interpolation::Bicubic  => "bicubic",
            Interpolation::Lanczos3 => "lanczos3",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "nearest"  => Some(Interpolation::Nearest),
            "bilinear" | "triangle" => Some(Interpolation::Bilinear),
            "bicubic"  | "catmullrom" => Some(Interpolation::Bicubic),
            "lanczos3" | "lanczos" | "high" => Some(Interpolation::Lanczos3),
            _ => None,
        }
    }

    pub fn all() -> &'static [Interpolation] {
        &[
            Interpolation::Nearest,
            Interpolation::Bilinear,
            Interpolation::Bicubic,
            Interpolation::Lanczos3,
        ]
    }

    pub fn to_filter(&self) -> imageops::FilterType {
        match self {
            Interpolation::Nearest  => imageops::FilterType::Nearest,
            Interpolation::Bilinear => imageops::FilterType::Triangle,
            Interpolation::Bicubic  => imageops::FilterType::CatmullRom,
            Interpolation::Lanczos3 => imageops::FilterType::Lanczos3,
        }
    }
}

// ---------------------------------------------------------------------------
//  Size math
// ---------------------------------------------------------------------------

/// Scale factor that fits `width × height` inside a `max_dim` square without upscaling.
pub fn fit_scale(width: u32, height: u32, max_dim: u32) -> f64 {
    if width == 0 || height == 0 {
        return 1.0;
    }
    let sx = max_dim as f64 / width as f64;
    let sy = max_dim as f64 / height as f64;
    sx.min(sy).min(1.0)
}

/// Rounded dimensions after [`fit_scale`]. Never returns a zero side.
pub fn fit_within(width: u32, height: u32, max_dim: u32) -> (u32, u32) {
    let scale = fit_scale(width, height, max_dim);
    let w = ((width as f64 * scale).round() as u32).max(1);
    let h = ((height as f64 * scale).round() as u32).max(1);
    (w, h)
}

// ---------------------------------------------------------------------------
//  Resampling
// ---------------------------------------------------------------------------

/// Resize with the given filter. Same-size requests return a copy untouched.
pub fn resize_rgba(src: &RgbaImage, new_w: u32, new_h: u32, interp: Interpolation) -> RgbaImage {
    if src.dimensions() == (new_w, new_h) {
        return src.clone();
    }
    imageops::resize(src, new_w, new_h, interp.to_filter())
}

/// Resize in premultiplied space so transparent pixels do not bleed their
/// (usually black) color into the edges of opaque strokes.
pub fn resize_premultiplied(src: &RgbaImage, new_w: u32, new_h: u32, interp: Interpolation) -> RgbaImage {
    if src.dimensions() == (new_w, new_h) {
        return src.clone();
    }

    let mut premul = src.clone();
    premul.par_chunks_mut(4).for_each(|px| {
        let a = px[3] as u32;
        for c in &mut px[..3] {
            *c = ((*c as u32 * a + 127) / 255) as u8;
        }
    });

    let mut out = imageops::resize(&premul, new_w, new_h, interp.to_filter());
    out.par_chunks_mut(4).for_each(|px| {
        let a = px[3] as u32;
        if a == 0 {
            px[0] = 0;
            px[1] = 0;
            px[2] = 0;
            return;
        }
        for c in &mut px[..3] {
            // Lanczos ringing can push a channel above its alpha
            let v = (*c as u32).min(a);
            *c = ((v * 255 + a / 2) / a) as u8;
        }
    });
    out
}

// ---------------------------------------------------------------------------
//  Compositing helpers
// ---------------------------------------------------------------------------

/// Blend `top` over `base` in place. Both must be the same size.
pub fn overlay_in_place(base: &mut RgbaImage, top: &RgbaImage) {
    debug_assert_eq!(base.dimensions(), top.dimensions());
    base.par_chunks_mut(4)
        .zip(top.par_chunks(4))
        .for_each(|(b, t)| {
            let out = blend_normal(Rgba([b[0], b[1], b[2], b[3]]), Rgba([t[0], t[1], t[2], t[3]]), 1.0);
            b.copy_from_slice(&out.0);
        });
}

/// Composite the image over an opaque matte. The result has alpha 255 everywhere.
pub fn flatten_image(src: &RgbaImage, matte: Rgba<u8>) -> RgbaImage {
    let matte = Rgba([matte[0], matte[1], matte[2], 255]);
    let mut out = RgbaImage::from_pixel(src.width(), src.height(), matte);
    overlay_in_place(&mut out, src);
    out
}
