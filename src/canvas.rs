use std::collections::HashSet;
use std::sync::Arc;

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

/// Largest surface the engine will allocate (~256 megapixels).
pub const MAX_PIXELS: u64 = 256_000_000;

// ============================================================================
// DIRTY RECT – inclusive pixel bounds touched by a stroke
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirtyRect {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl DirtyRect {
    pub fn point(x: u32, y: u32) -> Self {
        Self { min_x: x, min_y: y, max_x: x, max_y: y }
    }

    pub fn union(self, other: DirtyRect) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }
}

// ============================================================================
// TILED IMAGE – sparse 64×64 chunk storage (Vec-indexed for speed)
// ============================================================================

pub const CHUNK_SIZE: u32 = 64;

/// A pixel with zero alpha, returned by reference for missing chunks.
static TRANSPARENT_PIXEL: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Sparse tiled raster backed by a flat `Vec<Option<Arc<RgbaImage>>>`.
///
/// Chunks are wrapped in `Arc`, so `clone()` only bumps reference counts and
/// `put_pixel` COW-clones just the touched chunk. History
/// snapshots are plain clones and share every chunk a stroke did not touch.
#[derive(Clone)]
pub struct TiledImage {
    width: u32,
    height: u32,
    chunks_per_row: u32,
    chunks: Vec<Option<Arc<RgbaImage>>>,
}

impl std::fmt::Debug for TiledImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiledImage")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("chunks", &self.chunk_count())
            .finish()
    }
}

impl TiledImage {
    // ---- construction -------------------------------------------------------

    /// Create an empty (fully transparent) tiled image.
    pub fn new(width: u32, height: u32) -> Self {
        let (width, height) = {
            let total = (width as u64) * (height as u64);
            if total > MAX_PIXELS || width == 0 || height == 0 {
                log::warn!("TiledImage::new: {}x{} is out of range, clamped to 1x1", width, height);
                (1, 1)
            } else {
                (width, height)
            }
        };

        let chunks_per_row = width.div_ceil(CHUNK_SIZE);
        let chunks_per_col = height.div_ceil(CHUNK_SIZE);
        let total = (chunks_per_row * chunks_per_col) as usize;

        Self {
            width,
            height,
            chunks_per_row,
            chunks: vec![None; total],
        }
    }

    /// Fill the entire image with `color`. A transparent fill costs nothing.
    pub fn new_filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        let mut img = Self::new(width, height);
        if color[3] > 0 {
            img.fill(color);
        }
        img
    }

    /// Import from a flat `RgbaImage`. Only chunks with visible pixels are stored.
    /// Chunk conversion is parallelised with rayon.
    pub fn from_rgba_image(src: &RgbaImage) -> Self {
        let width = src.width();
        let height = src.height();
        let mut img = Self::new(width, height);
        if img.width != width || img.height != height {
            return img;
        }

        let chunks_x = img.chunks_per_row as usize;
        let total_chunks = img.chunks.len();
        let src_raw = src.as_raw();

        let chunk_results: Vec<(usize, Option<Arc<RgbaImage>>)> = (0..total_chunks)
            .into_par_iter()
            .map(|flat| {
                let base_x = (flat % chunks_x) as u32 * CHUNK_SIZE;
                let base_y = (flat / chunks_x) as u32 * CHUNK_SIZE;
                let cw = CHUNK_SIZE.min(width - base_x) as usize;
                let ch = CHUNK_SIZE.min(height - base_y);
                let chunk_stride = CHUNK_SIZE as usize * 4;
                let mut chunk_data = vec![0u8; chunk_stride * CHUNK_SIZE as usize];
                let mut has_content = false;

                for ly in 0..ch {
                    let src_start = ((base_y + ly) * width + base_x) as usize * 4;
                    let dst_start = ly as usize * chunk_stride;
                    let row = &src_raw[src_start..src_start + cw * 4];
                    chunk_data[dst_start..dst_start + cw * 4].copy_from_slice(row);
                    if !has_content {
                        has_content = row.chunks_exact(4).any(|px| px[3] != 0);
                    }
                }

                let chunk = if has_content {
                    RgbaImage::from_raw(CHUNK_SIZE, CHUNK_SIZE, chunk_data).map(Arc::new)
                } else {
                    None
                };
                (flat, chunk)
            })
            .collect();

        for (idx, chunk) in chunk_results {
            img.chunks[idx] = chunk;
        }
        img
    }

    /// Flatten back to a contiguous `RgbaImage`.
    pub fn to_rgba_image(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width, self.height);
        let out_stride = self.width as usize * 4;
        let out_raw: &mut [u8] = &mut out;

        for (cx, cy) in self.chunk_keys() {
            if let Some(chunk) = self.get_chunk(cx, cy) {
                let base_x = cx * CHUNK_SIZE;
                let base_y = cy * CHUNK_SIZE;
                let cw = CHUNK_SIZE.min(self.width - base_x) as usize;
                let ch = CHUNK_SIZE.min(self.height - base_y) as usize;
                let chunk_raw = chunk.as_raw();
                let chunk_stride = CHUNK_SIZE as usize * 4;

                for ly in 0..ch {
                    let src_start = ly * chunk_stride;
                    let dst_start = (base_y as usize + ly) * out_stride + base_x as usize * 4;
                    out_raw[dst_start..dst_start + cw * 4]
                        .copy_from_slice(&chunk_raw[src_start..src_start + cw * 4]);
                }
            }
        }
        out
    }

    // ---- indexing helpers ----------------------------------------------------

    #[inline(always)]
    fn flat_index(&self, cx: u32, cy: u32) -> usize {
        (cy * self.chunks_per_row + cx) as usize
    }

    #[inline(always)]
    fn chunk_coord(x: u32, y: u32) -> (u32, u32) { (x / CHUNK_SIZE, y / CHUNK_SIZE) }

    #[inline(always)]
    fn local(x: u32, y: u32) -> (u32, u32) { (x % CHUNK_SIZE, y % CHUNK_SIZE) }

    // ---- pixel access -------------------------------------------------------

    /// Read a pixel (returns `&TRANSPARENT_PIXEL` for missing chunks and out-of-range coords).
    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> &Rgba<u8> {
        if x >= self.width || y >= self.height { return &TRANSPARENT_PIXEL; }
        let (cx, cy) = Self::chunk_coord(x, y);
        let (lx, ly) = Self::local(x, y);
        let idx = self.flat_index(cx, cy);
        self.chunks[idx].as_ref()
            .map(|c| c.get_pixel(lx, ly))
            .unwrap_or(&TRANSPARENT_PIXEL)
    }

    /// Write a pixel (creates the chunk on demand, COW-clones if shared).
    /// Writing transparency into a missing chunk is skipped.
    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: Rgba<u8>) {
        if x >= self.width || y >= self.height { return; }
        let (cx, cy) = Self::chunk_coord(x, y);
        let (lx, ly) = Self::local(x, y);
        let idx = self.flat_index(cx, cy);
        if pixel[3] == 0 && self.chunks[idx].is_none() {
            return;
        }
        let arc = self.chunks[idx]
            .get_or_insert_with(|| Arc::new(RgbaImage::new(CHUNK_SIZE, CHUNK_SIZE)));
        Arc::make_mut(arc).put_pixel(lx, ly, pixel);
    }

    /// Read-only access to a chunk (if it exists).
    pub fn get_chunk(&self, cx: u32, cy: u32) -> Option<&RgbaImage> {
        let idx = self.flat_index(cx, cy);
        self.chunks.get(idx).and_then(|c| c.as_deref())
    }

    /// Iterator over populated chunk coordinates.
    pub fn chunk_keys(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        let cpr = self.chunks_per_row;
        self.chunks.iter().enumerate().filter_map(move |(i, slot)| {
            slot.as_ref().map(|_| ((i as u32) % cpr, (i as u32) / cpr))
        })
    }

    /// Number of populated chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunks.iter().filter(|c| c.is_some()).count()
    }

    /// Grid size in chunks (columns, rows).
    pub fn chunk_grid(&self) -> (u32, u32) {
        (self.chunks_per_row, self.height.div_ceil(CHUNK_SIZE))
    }

    // ---- bulk operations ----------------------------------------------------

    /// Fill every pixel with `color`.
    pub fn fill(&mut self, color: Rgba<u8>) {
        let template = Arc::new(RgbaImage::from_pixel(CHUNK_SIZE, CHUNK_SIZE, color));
        for slot in &mut self.chunks {
            *slot = Some(Arc::clone(&template));
        }
    }

    pub fn width(&self) -> u32 { self.width }

    pub fn height(&self) -> u32 { self.height }

    /// Pixel-exact comparison. Chunks shared between the two images are
    /// skipped without reading them.
    pub fn pixels_eq(&self, other: &TiledImage) -> bool {
        if self.width != other.width || self.height != other.height {
            return false;
        }
        let (cols, rows) = self.chunk_grid();
        for cy in 0..rows {
            for cx in 0..cols {
                let idx = self.flat_index(cx, cy);
                if let (Some(a), Some(b)) = (&self.chunks[idx], &other.chunks[idx])
                    && Arc::ptr_eq(a, b)
                {
                    continue;
                }
                let base_x = cx * CHUNK_SIZE;
                let base_y = cy * CHUNK_SIZE;
                let cw = CHUNK_SIZE.min(self.width - base_x);
                let ch = CHUNK_SIZE.min(self.height - base_y);
                for ly in 0..ch {
                    for lx in 0..cw {
                        let (x, y) = (base_x + lx, base_y + ly);
                        if self.get_pixel(x, y) != other.get_pixel(x, y) {
                            return false;
                        }
                    }
                }
            }
        }
        true
    }

    /// Bytes held by chunks, counting each distinct chunk allocation once
    /// across every image passed in. Used to report history memory.
    pub fn shared_memory_bytes<'a>(images: impl IntoIterator<Item = &'a TiledImage>) -> usize {
        let chunk_byte_size = (CHUNK_SIZE * CHUNK_SIZE * 4) as usize;
        let mut seen: HashSet<*const RgbaImage> = HashSet::new();
        for img in images {
            for arc in img.chunks.iter().flatten() {
                seen.insert(Arc::as_ptr(arc));
            }
        }
        seen.len() * chunk_byte_size
    }
}

// ============================================================================
// BLENDING
// ============================================================================

/// Source-over blend of `top` onto `base` with straight (non-premultiplied) alpha.
pub fn blend_normal(base: Rgba<u8>, top: Rgba<u8>, opacity: f32) -> Rgba<u8> {
    // Fast path: fully transparent top pixel, nothing to blend
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }
    // Fast path: full opacity, fully opaque top pixel, just overwrite
    if opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);
    let base_a = base[3] as f32 / 255.0;
    let top_a = (top[3] as f32 / 255.0) * opacity;

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a == 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let channel = |i: usize| {
        let b = base[i] as f32 / 255.0;
        let t = top[i] as f32 / 255.0;
        let c = (t * top_a + b * base_a * (1.0 - top_a)) / out_a;
        (c * 255.0).round().clamp(0.0, 255.0) as u8
    };

    Rgba([
        channel(0),
        channel(1),
        channel(2),
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

// ============================================================================
// LAYERS
// ============================================================================

pub struct Layer {
    pub name: String,
    pub visible: bool,
    pub opacity: f32,
    pub pixels: TiledImage,
}

impl Layer {
    pub fn new(name: &str, width: u32, height: u32, fill_color: Rgba<u8>) -> Self {
        Self::from_pixels(name, TiledImage::new_filled(width, height, fill_color))
    }

    pub fn from_pixels(name: &str, pixels: TiledImage) -> Self {
        Self {
            name: name.to_string(),
            visible: true,
            opacity: 1.0,
            pixels,
        }
    }
}

/// Background + annotation pair of one edit. Both layers always share the
/// same dimensions; only a fresh load may change them.
pub struct LayeredCanvas {
    width: u32,
    height: u32,
    background: Layer,
    annotation: Layer,
}

impl LayeredCanvas {
    /// Build from an already-scaled background raster.
    pub fn from_background(background: &RgbaImage) -> Self {
        let pixels = TiledImage::from_rgba_image(background);
        Self::with_background_pixels(pixels)
    }

    /// A solid-color background, used by the placeholder path.
    pub fn filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        Self::with_background_pixels(TiledImage::new_filled(width, height, color))
    }

    fn with_background_pixels(pixels: TiledImage) -> Self {
        let (width, height) = (pixels.width(), pixels.height());
        Self {
            width,
            height,
            background: Layer::from_pixels("Background", pixels),
            annotation: Layer::new("Annotation", width, height, Rgba([0, 0, 0, 0])),
        }
    }

    pub fn width(&self) -> u32 { self.width }

    pub fn height(&self) -> u32 { self.height }

    pub fn background(&self) -> &Layer {
        &self.background
    }

    pub fn annotation(&self) -> &Layer {
        &self.annotation
    }

    pub fn annotation_pixels_mut(&mut self) -> &mut TiledImage {
        &mut self.annotation.pixels
    }

    /// Swap in a snapshot of the annotation layer. Mismatched sizes are refused.
    pub fn restore_annotation(&mut self, pixels: &TiledImage) -> bool {
        if pixels.width() != self.width || pixels.height() != self.height {
            log::warn!(
                "restore_annotation: snapshot {}x{} does not match canvas {}x{}",
                pixels.width(), pixels.height(), self.width, self.height
            );
            return false;
        }
        self.annotation.pixels = pixels.clone();
        true
    }

    /// Background then annotation, alpha-blended. Chunks are processed in parallel.
    pub fn composite(&self) -> RgbaImage {
        let mut result = RgbaImage::new(self.width, self.height);
        let layers = [&self.background, &self.annotation];

        let mut active_chunks: Vec<(u32, u32)> = layers
            .iter()
            .copied()
            .filter(|l| l.visible)
            .flat_map(|l| l.pixels.chunk_keys())
            .collect();
        active_chunks.sort_unstable();
        active_chunks.dedup();

        let (img_w, img_h) = (self.width, self.height);

        let chunk_results: Vec<_> = active_chunks
            .par_iter()
            .map(|&(cx, cy)| {
                let base_x = cx * CHUNK_SIZE;
                let base_y = cy * CHUNK_SIZE;
                let cw = CHUNK_SIZE.min(img_w - base_x);
                let ch = CHUNK_SIZE.min(img_h - base_y);
                let mut pixels = vec![Rgba([0u8, 0, 0, 0]); (cw * ch) as usize];

                for layer in layers.iter().filter(|l| l.visible) {
                    let Some(chunk) = layer.pixels.get_chunk(cx, cy) else { continue };
                    for ly in 0..ch {
                        for lx in 0..cw {
                            let idx = (ly * cw + lx) as usize;
                            pixels[idx] = blend_normal(pixels[idx], *chunk.get_pixel(lx, ly), layer.opacity);
                        }
                    }
                }
                (base_x, base_y, cw, ch, pixels)
            })
            .collect();

        for (base_x, base_y, cw, ch, pixels) in chunk_results {
            for ly in 0..ch {
                for lx in 0..cw {
                    result.put_pixel(base_x + lx, base_y + ly, pixels[(ly * cw + lx) as usize]);
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiled_image_keeps_only_visible_chunks() {
        let mut src = RgbaImage::new(130, 70);
        src.put_pixel(100, 65, Rgba([1, 2, 3, 255]));
        let tiled = TiledImage::from_rgba_image(&src);
        assert_eq!(tiled.chunk_count(), 1);
        assert_eq!(*tiled.get_pixel(100, 65), Rgba([1, 2, 3, 255]));
        assert_eq!(tiled.to_rgba_image(), src);
    }

    #[test]
    fn clones_share_chunks_until_written() {
        let mut a = TiledImage::new_filled(128, 64, Rgba([9, 9, 9, 255]));
        let b = a.clone();
        assert_eq!(TiledImage::shared_memory_bytes([&a, &b]), 64 * 64 * 4);

        a.put_pixel(0, 0, Rgba([0, 0, 0, 255]));
        assert_eq!(*b.get_pixel(0, 0), Rgba([9, 9, 9, 255]));
        assert!(!a.pixels_eq(&b));
        assert_eq!(TiledImage::shared_memory_bytes([&a, &b]), 2 * 64 * 64 * 4);
    }

    #[test]
    fn transparent_writes_do_not_allocate() {
        let mut img = TiledImage::new(200, 200);
        img.put_pixel(10, 10, Rgba([255, 0, 0, 0]));
        assert_eq!(img.chunk_count(), 0);
        assert!(img.pixels_eq(&TiledImage::new(200, 200)));
    }

    #[test]
    fn blend_normal_matches_source_over() {
        let white = Rgba([255, 255, 255, 255]);
        assert_eq!(blend_normal(white, Rgba([255, 0, 0, 255]), 1.0), Rgba([255, 0, 0, 255]));
        assert_eq!(blend_normal(white, Rgba([255, 0, 0, 0]), 1.0), white);

        let half = blend_normal(white, Rgba([0, 0, 0, 128]), 1.0);
        assert_eq!(half[3], 255);
        assert!((126..=128).contains(&half[0]));
    }

    #[test]
    fn composite_draws_annotation_over_background() {
        let mut canvas = LayeredCanvas::filled(100, 80, Rgba([255, 255, 255, 255]));
        canvas.annotation_pixels_mut().put_pixel(70, 5, Rgba([255, 0, 0, 255]));

        let out = canvas.composite();
        assert_eq!(out.dimensions(), (100, 80));
        assert_eq!(*out.get_pixel(70, 5), Rgba([255, 0, 0, 255]));
        assert_eq!(*out.get_pixel(0, 79), Rgba([255, 255, 255, 255]));
        assert_eq!(*canvas.background().pixels.get_pixel(70, 5), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn restore_rejects_mismatched_snapshot() {
        let mut canvas = LayeredCanvas::filled(64, 64, Rgba([255, 255, 255, 255]));
        assert!(!canvas.restore_annotation(&TiledImage::new(32, 32)));
        assert!(canvas.restore_annotation(&TiledImage::new(64, 64)));
    }
}
