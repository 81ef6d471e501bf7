use image::Rgba;
use serde::{Deserialize, Serialize};

use crate::canvas::{DirtyRect, TiledImage, blend_normal};

// ============================================================================
// BRUSH SETTINGS
// ============================================================================

pub const MIN_BRUSH_WIDTH: f32 = 1.0;
pub const MAX_BRUSH_WIDTH: f32 = 50.0;

/// Touch-friendly width presets shown next to the slider.
pub const BRUSH_PRESETS: [f32; 5] = [2.0, 5.0, 10.0, 20.0, 30.0];

pub const PALETTE: [&str; 10] = [
    "#ff3b30", "#ff9500", "#ffcc00", "#34c759", "#5ac8fa",
    "#007aff", "#5856d6", "#af52de", "#000000", "#ffffff",
];

pub const DEFAULT_BRUSH_COLOR: Rgba<u8> = Rgba([0xff, 0x3b, 0x30, 0xff]);
pub const DEFAULT_BRUSH_WIDTH: f32 = 5.0;

/// Parse `#rrggbb` or `#rrggbbaa` (leading `#` optional).
pub fn parse_hex_color(text: &str) -> Option<Rgba<u8>> {
    let hex = text.trim().trim_start_matches('#');
    if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
        return None;
    }
    let byte = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    let alpha = if hex.len() == 8 { byte(6)? } else { 255 };
    Some(Rgba([byte(0)?, byte(2)?, byte(4)?, alpha]))
}

pub fn to_hex_color(color: Rgba<u8>) -> String {
    if color[3] == 255 {
        format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2])
    } else {
        format!("#{:02x}{:02x}{:02x}{:02x}", color[0], color[1], color[2], color[3])
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrokeMode {
    #[default]
    Brush,
    /// Clears annotation pixels back to transparency.
    Eraser,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrushSettings {
    pub mode: StrokeMode,
    /// Ignored by the eraser.
    pub color: Rgba<u8>,
    width: f32,
}

impl BrushSettings {
    pub fn new(mode: StrokeMode, color: Rgba<u8>, width: f32) -> Self {
        Self { mode, color, width: clamp_width(width) }
    }

    pub fn brush(color: Rgba<u8>, width: f32) -> Self {
        Self::new(StrokeMode::Brush, color, width)
    }

    pub fn eraser(width: f32) -> Self {
        Self::new(StrokeMode::Eraser, Rgba([0, 0, 0, 0]), width)
    }

    /// Stroke thickness in editing-surface pixels, always within `[1, 50]`.
    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn set_width(&mut self, width: f32) {
        self.width = clamp_width(width);
    }
}

impl Default for BrushSettings {
    fn default() -> Self {
        Self::brush(DEFAULT_BRUSH_COLOR, DEFAULT_BRUSH_WIDTH)
    }
}

fn clamp_width(width: f32) -> f32 {
    if width.is_nan() {
        return DEFAULT_BRUSH_WIDTH;
    }
    width.clamp(MIN_BRUSH_WIDTH, MAX_BRUSH_WIDTH)
}

// ============================================================================
// POINTER INPUT
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerKind {
    Mouse,
    Touch { id: u64 },
}

/// Pointer position in the coordinate space the input device reports
/// (the displayed canvas element, which may be scaled).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PointerEvent {
    pub x: f32,
    pub y: f32,
    pub kind: PointerKind,
}

impl PointerEvent {
    pub fn mouse(x: f32, y: f32) -> Self {
        Self { x, y, kind: PointerKind::Mouse }
    }

    pub fn touch(id: u64, x: f32, y: f32) -> Self {
        Self { x, y, kind: PointerKind::Touch { id } }
    }
}

// ============================================================================
// DRAWING ENGINE
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolPhase {
    Idle,
    Drawing,
}

/// Result of a finished stroke, handed back so the caller can snapshot history.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StrokeSummary {
    pub mode: StrokeMode,
    /// `None` when every dab fell outside the surface.
    pub bounds: Option<DirtyRect>,
    pub dabs: usize,
}

struct ActiveStroke {
    settings: BrushSettings,
    pointer: PointerKind,
    /// Layer as it was at pointer-down; every dab is recomputed from it.
    start: TiledImage,
    /// Per-pixel max coverage of this stroke (0..=255), so overlapping dabs never stack.
    coverage: Vec<u8>,
    last: (f32, f32),
    bounds: Option<DirtyRect>,
    dabs: usize,
}

/// Turns pointer input into brush / eraser strokes on the annotation layer.
///
/// `Idle -> Drawing -> Idle`. Painting happens on every move so the layer
/// always shows the stroke so far; history is the caller's job once
/// [`end_stroke`](Self::end_stroke) reports a finished stroke.
#[derive(Default)]
pub struct DrawingEngine {
    display_size: Option<(f32, f32)>,
    active: Option<ActiveStroke>,
}

impl DrawingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Size at which the surface is currently displayed. `None` means 1:1.
    pub fn set_display_size(&mut self, width: f32, height: f32) {
        self.display_size = if width > 0.0 && height > 0.0 && width.is_finite() && height.is_finite() {
            Some((width, height))
        } else {
            None
        };
    }

    pub fn display_size(&self) -> Option<(f32, f32)> {
        self.display_size
    }

    /// Map a device position onto surface pixels (`surface / displayed` per axis).
    pub fn to_surface(&self, x: f32, y: f32, surface_w: u32, surface_h: u32) -> (f32, f32) {
        match self.display_size {
            Some((dw, dh)) => (x * surface_w as f32 / dw, y * surface_h as f32 / dh),
            None => (x, y),
        }
    }

    pub fn phase(&self) -> ToolPhase {
        if self.active.is_some() { ToolPhase::Drawing } else { ToolPhase::Idle }
    }

    pub fn is_drawing(&self) -> bool {
        self.active.is_some()
    }

    /// Settings of the stroke in progress.
    pub fn active_settings(&self) -> Option<BrushSettings> {
        self.active.as_ref().map(|s| s.settings)
    }

    /// Whether the host must swallow default touch gestures (scroll, pinch zoom).
    pub fn suppresses_default_gestures(&self) -> bool {
        matches!(
            self.active.as_ref().map(|s| s.pointer),
            Some(PointerKind::Touch { .. })
        )
    }

    /// Pointer down. Paints the first dab so a tap leaves a dot.
    /// Ignored (returns `false`) if a stroke is already in progress.
    pub fn begin_stroke(&mut self, layer: &mut TiledImage, event: PointerEvent, settings: BrushSettings) -> bool {
        if self.active.is_some() {
            return false;
        }
        let pos = self.to_surface(event.x, event.y, layer.width(), layer.height());
        if !(pos.0.is_finite() && pos.1.is_finite()) {
            log::warn!("stroke begin ignored: non-finite position ({}, {})", event.x, event.y);
            return false;
        }
        let mut stroke = ActiveStroke {
            settings,
            pointer: event.kind,
            start: layer.clone(),
            coverage: vec![0; layer.width() as usize * layer.height() as usize],
            last: pos,
            bounds: None,
            dabs: 0,
        };
        stamp(&mut stroke, layer, pos);
        log::debug!(
            "stroke begin: {:?} width {} at ({:.1}, {:.1})",
            settings.mode, settings.width(), pos.0, pos.1
        );
        self.active = Some(stroke);
        true
    }

    /// Pointer move. Paints the segment from the previous position with ≤1px dab spacing.
    /// Returns `false` when idle, when the event belongs to another pointer or
    /// when the position is not finite.
    pub fn continue_stroke(&mut self, layer: &mut TiledImage, event: PointerEvent) -> bool {
        let pos = self.to_surface(event.x, event.y, layer.width(), layer.height());
        let Some(stroke) = self.active.as_mut() else { return false };
        if stroke.pointer != event.kind {
            return false;
        }
        if !(pos.0.is_finite() && pos.1.is_finite()) {
            log::warn!("stroke move ignored: non-finite position ({}, {})", event.x, event.y);
            return false;
        }

        let last = stroke.last;
        let (dx, dy) = (pos.0 - last.0, pos.1 - last.1);
        if (dx * dx + dy * dy).sqrt() < 0.1 {
            return true;
        }
        stroke.last = pos;

        // Only the part of the segment a dab could still reach is stepped
        let reach = (stroke.settings.width() / 2.0 + 2.0) as f64;
        let bounds = (
            (-reach, -reach),
            (layer.width() as f64 + reach, layer.height() as f64 + reach),
        );
        let Some((from, to, starts_inside)) = clip_segment(last, pos, bounds) else {
            return true;
        };

        let (sx, sy) = (to.0 - from.0, to.1 - from.1);
        let steps = (sx * sx + sy * sy).sqrt().ceil().max(1.0) as usize;
        let first = if starts_inside { 1 } else { 0 };
        for i in first..=steps {
            let t = i as f32 / steps as f32;
            stamp(stroke, layer, (from.0 + sx * t, from.1 + sy * t));
        }
        true
    }

    /// Pointer up. `None` when no stroke was active.
    pub fn end_stroke(&mut self) -> Option<StrokeSummary> {
        let stroke = self.active.take()?;
        log::debug!("stroke end: {} dabs, bounds {:?}", stroke.dabs, stroke.bounds);
        Some(StrokeSummary {
            mode: stroke.settings.mode,
            bounds: stroke.bounds,
            dabs: stroke.dabs,
        })
    }

    /// Pointer left the surface or the touch was cancelled. Ends the stroke
    /// only if `kind` is the pointer that started it.
    pub fn pointer_leave(&mut self, kind: PointerKind) -> Option<StrokeSummary> {
        match self.active.as_ref() {
            Some(stroke) if stroke.pointer == kind => self.end_stroke(),
            _ => None,
        }
    }
}

// ============================================================================
// DAB RASTERISATION
// ============================================================================

/// Liang-Barsky clip of `a -> b` against the `(min, max)` box. Returns the
/// visible part and whether it still starts at `a`. Done in f64 so far-away
/// endpoints do not lose the on-surface precision.
fn clip_segment(
    a: (f32, f32),
    b: (f32, f32),
    (min, max): ((f64, f64), (f64, f64)),
) -> Option<((f32, f32), (f32, f32), bool)> {
    let (ax, ay) = (a.0 as f64, a.1 as f64);
    let (dx, dy) = (b.0 as f64 - ax, b.1 as f64 - ay);
    let mut t0 = 0.0f64;
    let mut t1 = 1.0f64;

    for (p, q) in [(-dx, ax - min.0), (dx, max.0 - ax), (-dy, ay - min.1), (dy, max.1 - ay)] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
            continue;
        }
        let r = q / p;
        if p < 0.0 {
            if r > t1 {
                return None;
            }
            t0 = t0.max(r);
        } else {
            if r < t0 {
                return None;
            }
            t1 = t1.min(r);
        }
    }

    let at = |t: f64| ((ax + dx * t) as f32, (ay + dy * t) as f32);
    Some((at(t0), at(t1), t0 == 0.0))
}

/// Round-tip coverage at `dist` from the dab centre: solid core, smoothstep rim.
fn brush_coverage(dist: f32, radius: f32) -> f32 {
    const HARDNESS: f32 = 0.99;

    // Tiny tips get at least 1.5px of anti-aliasing beyond their radius
    let (effective_radius, fade_width) = if radius < 3.0 {
        let aa_extend = 1.5;
        (radius + aa_extend, aa_extend + radius * (1.0 - HARDNESS))
    } else {
        (radius, (radius * (1.0 - HARDNESS)).max(1.0))
    };
    let solid_radius = effective_radius - fade_width;

    if dist <= solid_radius {
        return 1.0;
    }
    if dist >= effective_radius {
        return 0.0;
    }
    let x = 1.0 - ((dist - solid_radius) / fade_width).clamp(0.0, 1.0);
    x * x * (3.0 - 2.0 * x)
}

fn stamp(stroke: &mut ActiveStroke, layer: &mut TiledImage, center: (f32, f32)) {
    let (width, height) = (layer.width(), layer.height());
    let radius = stroke.settings.width() / 2.0;
    let reach = radius + 2.0;
    let (cx, cy) = center;

    let min_x = (cx - reach).floor().max(0.0);
    let min_y = (cy - reach).floor().max(0.0);
    let max_x = (cx + reach).ceil().min(width as f32 - 1.0);
    let max_y = (cy + reach).ceil().min(height as f32 - 1.0);
    if min_x > max_x || min_y > max_y {
        return;
    }
    let (min_x, min_y, max_x, max_y) = (min_x as u32, min_y as u32, max_x as u32, max_y as u32);
    stroke.dabs += 1;

    for py in min_y..=max_y {
        for px in min_x..=max_x {
            let ddx = px as f32 + 0.5 - cx;
            let ddy = py as f32 + 0.5 - cy;
            let alpha = brush_coverage((ddx * ddx + ddy * ddy).sqrt(), radius);
            if alpha <= 0.0 {
                continue;
            }
            let cov = (alpha * 255.0).round() as u8;
            let idx = py as usize * width as usize + px as usize;
            if cov <= stroke.coverage[idx] {
                continue;
            }
            stroke.coverage[idx] = cov;

            let before = *stroke.start.get_pixel(px, py);
            let after = match stroke.settings.mode {
                StrokeMode::Brush => {
                    let c = stroke.settings.color;
                    let a = (c[3] as u32 * cov as u32 + 127) / 255;
                    blend_normal(before, Rgba([c[0], c[1], c[2], a as u8]), 1.0)
                }
                StrokeMode::Eraser => {
                    let a = (before[3] as u32 * (255 - cov as u32) + 127) / 255;
                    if a == 0 {
                        Rgba([0, 0, 0, 0])
                    } else {
                        Rgba([before[0], before[1], before[2], a as u8])
                    }
                }
            };
            layer.put_pixel(px, py, after);

            let touched = DirtyRect::point(px, py);
            stroke.bounds = Some(match stroke.bounds {
                Some(existing) => existing.union(touched),
                None => touched,
            });
        }
    }
}
