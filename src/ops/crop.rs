// ============================================================================
// CROPPER: one-shot avatar / banner crops at source resolution
// ============================================================================

use image::{RgbaImage, imageops};

use crate::error::{CanvasError, InvalidRegionError};
use crate::io::{BlobFormat, ImageBlob, Quality, encode_blob};
use crate::ops::transform::{Interpolation, resize_rgba};

/// Square, circular-masked profile pictures.
pub const AVATAR_ASPECT: f32 = 1.0;
/// Wall banners.
pub const BACKGROUND_ASPECT: f32 = 3.0;

/// Slack for regions dragged right up to the image edge, in displayed and in source pixels.
const BOUNDS_TOLERANCE: f32 = 0.5;
/// Allowed `|width - height * aspect|`, in displayed pixels.
const ASPECT_TOLERANCE: f32 = 1.0;

/// Crop rectangle in the displayed image's pixel space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropRegion {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Width / height the region must keep.
    pub aspect: Option<f32>,
    /// Mask the output to the inscribed ellipse (PNG output).
    pub circular: bool,
}

impl CropRegion {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height, aspect: None, circular: false }
    }

    pub fn with_aspect(mut self, aspect: f32) -> Self {
        self.aspect = Some(aspect);
        self
    }

    pub fn with_circle(mut self, circular: bool) -> Self {
        self.circular = circular;
        self
    }

    /// Largest region of the given aspect centred on the displayed image.
    /// Without an aspect the whole image is selected.
    pub fn centered(display_w: f32, display_h: f32, aspect: Option<f32>) -> Self {
        let (width, height) = match aspect {
            Some(a) if a > 0.0 => {
                if display_w / display_h > a {
                    (display_h * a, display_h)
                } else {
                    (display_w, display_w / a)
                }
            }
            _ => (display_w, display_h),
        };
        Self {
            x: (display_w - width) / 2.0,
            y: (display_h - height) / 2.0,
            width,
            height,
            aspect: aspect.filter(|a| *a > 0.0),
            circular: false,
        }
    }

    pub fn avatar(display_w: f32, display_h: f32) -> Self {
        Self::centered(display_w, display_h, Some(AVATAR_ASPECT)).with_circle(true)
    }

    pub fn banner(display_w: f32, display_h: f32) -> Self {
        Self::centered(display_w, display_h, Some(BACKGROUND_ASPECT))
    }

    /// Reject degenerate, out-of-bounds or off-aspect regions.
    pub fn validate(&self, display_w: f32, display_h: f32) -> Result<(), InvalidRegionError> {
        if !(display_w > 0.0 && display_h > 0.0) {
            return Err(InvalidRegionError::DisplaySize { width: display_w, height: display_h });
        }
        if !(self.width > 0.0 && self.height > 0.0) {
            return Err(InvalidRegionError::Degenerate { width: self.width, height: self.height });
        }
        let inside = self.x >= -BOUNDS_TOLERANCE
            && self.y >= -BOUNDS_TOLERANCE
            && self.x + self.width <= display_w + BOUNDS_TOLERANCE
            && self.y + self.height <= display_h + BOUNDS_TOLERANCE;
        if !inside {
            return Err(self.out_of_bounds((display_w, display_h)));
        }
        if let Some(aspect) = self.aspect
            && (self.width - self.height * aspect).abs() > ASPECT_TOLERANCE
        {
            return Err(InvalidRegionError::AspectMismatch {
                width: self.width,
                height: self.height,
                aspect,
            });
        }
        Ok(())
    }

    fn out_of_bounds(&self, display: (f32, f32)) -> InvalidRegionError {
        InvalidRegionError::OutOfBounds {
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            display_width: display.0,
            display_height: display.1,
        }
    }

    /// The region in source pixels: `(x, y, w, h)` scaled by `natural / displayed` per axis.
    pub fn to_natural(&self, display: (f32, f32), natural: (u32, u32)) -> (f32, f32, f32, f32) {
        let sx = natural.0 as f32 / display.0;
        let sy = natural.1 as f32 / display.1;
        (self.x * sx, self.y * sy, self.width * sx, self.height * sy)
    }

    /// Output raster size, which tracks the source resolution rather than the preview.
    pub fn output_size(&self, display: (f32, f32), natural: (u32, u32)) -> (u32, u32) {
        let (_, _, w, h) = self.to_natural(display, natural);
        ((w.round() as u32).max(1), (h.round() as u32).max(1))
    }
}

/// Cut `region` (displayed-image coordinates) out of the full-resolution `image`.
pub fn crop_raster(
    image: &RgbaImage,
    display: (f32, f32),
    region: &CropRegion,
    interp: Interpolation,
) -> Result<RgbaImage, InvalidRegionError> {
    let (img_w, img_h) = image.dimensions();
    if img_w == 0 || img_h == 0 {
        return Err(InvalidRegionError::EmptySource { width: img_w, height: img_h });
    }
    region.validate(display.0, display.1)?;

    // Edge slack is half a *source* pixel, however small the display is
    let (nx, ny, nw, nh) = region.to_natural(display, (img_w, img_h));
    let inside = nx >= -BOUNDS_TOLERANCE
        && ny >= -BOUNDS_TOLERANCE
        && nx + nw <= img_w as f32 + BOUNDS_TOLERANCE
        && ny + nh <= img_h as f32 + BOUNDS_TOLERANCE;
    if !inside {
        return Err(region.out_of_bounds(display));
    }

    let x0 = (nx.round().max(0.0) as u32).min(img_w - 1);
    let y0 = (ny.round().max(0.0) as u32).min(img_h - 1);
    let x1 = ((nx + nw).round() as u32).clamp(x0 + 1, img_w);
    let y1 = ((ny + nh).round() as u32).clamp(y0 + 1, img_h);

    let (out_w, out_h) = region.output_size(display, (img_w, img_h));
    let (out_w, out_h) = (out_w.min(x1 - x0), out_h.min(y1 - y0));

    let window = imageops::crop_imm(image, x0, y0, x1 - x0, y1 - y0).to_image();
    let mut out = resize_rgba(&window, out_w, out_h, interp);
    if region.circular {
        apply_circular_mask(&mut out);
    }
    log::debug!(
        "crop: display region {:.1},{:.1} {:.1}x{:.1} -> source {}..{} x {}..{} -> {}x{}",
        region.x, region.y, region.width, region.height, x0, x1, y0, y1, out_w, out_h
    );
    Ok(out)
}

/// Crop and encode. Rectangular crops become JPEG, circular crops PNG
/// (they need the transparent corners).
pub fn crop(
    image: &RgbaImage,
    display: (f32, f32),
    region: &CropRegion,
    quality: Quality,
    interp: Interpolation,
    context: &str,
) -> Result<ImageBlob, CanvasError> {
    let out = crop_raster(image, display, region, interp)?;
    let format = if region.circular { BlobFormat::Png } else { BlobFormat::Jpeg };
    let blob = encode_blob(&out, format, quality, context)?;
    log::info!("crop: {} ({}x{}, {} bytes)", blob.filename, blob.width, blob.height, blob.len());
    Ok(blob)
}

/// Zero alpha outside the inscribed ellipse, with a one-pixel soft edge.
pub fn apply_circular_mask(image: &mut RgbaImage) {
    let (w, h) = (image.width() as f32, image.height() as f32);
    let (rx, ry) = (w / 2.0, h / 2.0);
    let edge = rx.min(ry);

    for (x, y, px) in image.enumerate_pixels_mut() {
        let dx = (x as f32 + 0.5 - rx) / rx;
        let dy = (y as f32 + 0.5 - ry) / ry;
        let d = (dx * dx + dy * dy).sqrt();
        let keep = ((1.0 - d) * edge + 0.5).clamp(0.0, 1.0);
        px[3] = (px[3] as f32 * keep).round() as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, y| Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]))
    }

    #[test]
    fn output_tracks_source_resolution() {
        let img = gradient(1920, 1080);
        let region = CropRegion::new(0.0, 0.0, 240.0, 135.0);
        let out = crop_raster(&img, (480.0, 270.0), &region, Interpolation::Lanczos3).unwrap();
        assert_eq!(out.dimensions(), (960, 540));
    }

    #[test]
    fn crop_samples_the_selected_area() {
        let img = gradient(400, 400);
        let region = CropRegion::new(50.0, 50.0, 50.0, 50.0);
        let out = crop_raster(&img, (200.0, 200.0), &region, Interpolation::Nearest).unwrap();
        assert_eq!(out.dimensions(), (100, 100));
        assert_eq!(*out.get_pixel(0, 0), *img.get_pixel(100, 100));
        assert_eq!(*out.get_pixel(99, 99), *img.get_pixel(199, 199));
    }

    #[test]
    fn degenerate_and_outside_regions_are_rejected() {
        let img = gradient(100, 100);
        let zero = CropRegion::new(10.0, 10.0, 0.0, 20.0);
        assert!(matches!(
            crop_raster(&img, (100.0, 100.0), &zero, Interpolation::Bilinear),
            Err(InvalidRegionError::Degenerate { .. })
        ));
        let outside = CropRegion::new(80.0, 80.0, 40.0, 40.0);
        assert!(matches!(
            crop_raster(&img, (100.0, 100.0), &outside, Interpolation::Bilinear),
            Err(InvalidRegionError::OutOfBounds { .. })
        ));
        let no_display = CropRegion::new(0.0, 0.0, 10.0, 10.0);
        assert!(no_display.validate(0.0, 100.0).is_err());
    }

    #[test]
    fn aspect_is_checked_inside_the_cropper() {
        let banner = CropRegion::new(0.0, 0.0, 300.0, 90.0).with_aspect(BACKGROUND_ASPECT);
        assert!(matches!(
            banner.validate(400.0, 300.0),
            Err(InvalidRegionError::AspectMismatch { .. })
        ));
        let ok = CropRegion::new(0.0, 0.0, 300.0, 100.3).with_aspect(BACKGROUND_ASPECT);
        assert!(ok.validate(400.0, 300.0).is_ok());
    }

    #[test]
    fn centered_regions_fit_and_keep_aspect() {
        let banner = CropRegion::banner(480.0, 320.0);
        assert_eq!((banner.width, banner.height), (480.0, 160.0));
        assert_eq!(banner.y, 80.0);
        assert!(banner.validate(480.0, 320.0).is_ok());

        let avatar = CropRegion::avatar(480.0, 320.0);
        assert_eq!((avatar.x, avatar.width, avatar.height), (80.0, 320.0, 320.0));
        assert!(avatar.circular);
    }

    #[test]
    fn circular_crop_is_transparent_in_the_corners() {
        let img = gradient(900, 600);
        let region = CropRegion::avatar(450.0, 300.0);
        let blob = crop(&img, (450.0, 300.0), &region, Quality::new(95), Interpolation::Lanczos3, "avatar").unwrap();
        assert_eq!(blob.format, BlobFormat::Png);
        assert_eq!((blob.width, blob.height), (600, 600));
        assert!(blob.filename.starts_with("avatar-"));

        let decoded = blob.decode().unwrap();
        assert_eq!(decoded.get_pixel(0, 0)[3], 0);
        assert_eq!(decoded.get_pixel(300, 300)[3], 255);
    }

    #[test]
    fn rectangular_crop_encodes_jpeg() {
        let img = gradient(1200, 400);
        let region = CropRegion::banner(600.0, 200.0);
        let blob = crop(&img, (600.0, 200.0), &region, Quality::new(95), Interpolation::Lanczos3, "background").unwrap();
        assert_eq!(blob.content_type(), "image/jpeg");
        assert_eq!(blob.decode().unwrap().dimensions(), (1200, 400));
    }

    #[test]
    fn edge_slack_does_not_grow_with_the_source() {
        let img = gradient(400, 400);
        let past_edge = CropRegion::new(0.0, 0.0, 4.5, 4.5);
        assert!(matches!(
            crop_raster(&img, (4.0, 4.0), &past_edge, Interpolation::Bilinear),
            Err(InvalidRegionError::OutOfBounds { .. })
        ));

        let flush = CropRegion::new(0.0, 0.0, 4.0, 4.0);
        let out = crop_raster(&img, (4.0, 4.0), &flush, Interpolation::Bilinear).unwrap();
        assert_eq!(out.dimensions(), (400, 400));

        // a hair past both edges is still fine and never exceeds the source
        let hair = CropRegion::new(-0.1, -0.1, 100.2, 100.2);
        let out = crop_raster(&img, (100.0, 100.0), &hair, Interpolation::Bilinear).unwrap();
        assert_eq!(out.dimensions(), (400, 400));
    }

    #[test]
    fn empty_source_is_an_error() {
        let img = RgbaImage::new(0, 0);
        let region = CropRegion::new(0.0, 0.0, 10.0, 10.0);
        assert!(matches!(
            crop_raster(&img, (10.0, 10.0), &region, Interpolation::Bilinear),
            Err(InvalidRegionError::EmptySource { .. })
        ));
        assert!(crop(&img, (10.0, 10.0), &region, Quality::new(95), Interpolation::Bilinear, "avatar").is_err());
    }
}
