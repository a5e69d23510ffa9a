//! Supersampled rasterization and PNG export.
//!
//! DESIGN
//! ======
//! The export canvas is always `scene × supersample` pixels. The viewport is
//! not an input here: whatever the on-screen zoom, the output is
//! the same. Placements are drawn in store order, each centered on its `(x, y)`
//! and sized `decoded × scale × supersample`. Only the visible part of a
//! placement is cropped from its source and resized, so a photo far larger
//! than the canvas costs no more than one that fits. A placement whose source
//! has not decoded (still pending, or failed), or whose size or position is
//! empty or not finite, is left out and listed in [`ExportArtifact::omitted`].

#[cfg(test)]
#[path = "export_test.rs"]
mod export_test;

use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{ImageFormat, Pixel, RgbaImage};
use serde::Serialize;
use tracing::{debug, warn};

use crate::consts::{DEFAULT_SUPERSAMPLE, EXPORT_FILE_NAME};
use crate::decode::{Decoded, ImageCache};
use crate::store::{ImagePlacement, PlacementId, PlacementStore};
use crate::viewport::SceneSize;

/// Resized crops larger than this multiple of the output side are sampled
/// directly instead.
const MAX_RESIZE_FACTOR: f64 = 4.0;

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("export size {width}x{height} x{supersample} does not fit")]
    Dimensions { width: u32, height: u32, supersample: u32 },

    #[error("png encode failed: {0}")]
    Encode(#[from] image::ImageError),
}

impl ExportError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Dimensions { .. } => "E_EXPORT_DIMENSIONS",
            Self::Encode(_) => "E_EXPORT_ENCODE",
        }
    }
}

/// The downloadable result of an export.
#[derive(Debug, Clone)]
pub struct ExportArtifact {
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    /// PNG-encoded pixels.
    pub bytes: Vec<u8>,
    /// Placements left out because their source was not decoded.
    pub omitted: Vec<PlacementId>,
}

/// A composed raster before encoding.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub image: RgbaImage,
    pub omitted: Vec<PlacementId>,
}

/// Rasterizes the scene at a fixed supersample factor.
#[derive(Debug, Clone)]
pub struct Exporter {
    supersample: u32,
    file_name: String,
}

impl Default for Exporter {
    fn default() -> Self {
        Self::new(DEFAULT_SUPERSAMPLE, EXPORT_FILE_NAME)
    }
}

impl Exporter {
    #[must_use]
    pub fn new(supersample: u32, file_name: impl Into<String>) -> Self {
        Self { supersample: supersample.max(1), file_name: file_name.into() }
    }

    #[must_use]
    pub fn supersample(&self) -> u32 {
        self.supersample
    }

    /// Output raster size for a scene.
    ///
    /// # Errors
    ///
    /// [`ExportError::Dimensions`] if the multiplied size overflows `u32`.
    pub fn output_size(&self, scene: SceneSize) -> Result<(u32, u32), ExportError> {
        let overflow = || ExportError::Dimensions {
            width: scene.width,
            height: scene.height,
            supersample: self.supersample,
        };
        let width = scene.width.checked_mul(self.supersample).ok_or_else(overflow)?;
        let height = scene.height.checked_mul(self.supersample).ok_or_else(overflow)?;
        Ok((width, height))
    }

    /// Compose the current placements into an RGBA raster.
    ///
    /// # Errors
    ///
    /// [`ExportError::Dimensions`] if the output size overflows.
    pub fn render(
        &self,
        scene: SceneSize,
        store: &PlacementStore,
        images: &ImageCache,
    ) -> Result<Rendered, ExportError> {
        let (width, height) = self.output_size(scene)?;
        let mut canvas = RgbaImage::new(width, height);
        let mut omitted = Vec::new();

        for placement in store.iter() {
            let Some(source) = images.ready(&placement.id) else {
                debug!(id = %placement.id, "source not decoded; omitted from export");
                omitted.push(placement.id);
                continue;
            };
            match self.draw(&mut canvas, source, placement) {
                Drawn::Visible | Drawn::Offscreen => {}
                Drawn::Unusable => {
                    warn!(
                        id = %placement.id,
                        scale_x = placement.scale_x,
                        scale_y = placement.scale_y,
                        "unusable geometry; omitted from export"
                    );
                    omitted.push(placement.id);
                }
            }
        }

        Ok(Rendered { image: canvas, omitted })
    }

    /// Render and encode the scene as a PNG artifact.
    ///
    /// # Errors
    ///
    /// [`ExportError`] on size overflow or encode failure.
    pub fn export(
        &self,
        scene: SceneSize,
        store: &PlacementStore,
        images: &ImageCache,
    ) -> Result<ExportArtifact, ExportError> {
        let Rendered { image, omitted } = self.render(scene, store, images)?;
        let bytes = encode_png(&image)?;
        Ok(ExportArtifact {
            file_name: self.file_name.clone(),
            width: image.width(),
            height: image.height(),
            bytes,
            omitted,
        })
    }

    /// Draw one placement. Only the part of the source that lands on the
    /// canvas is cropped and resized, so work is bounded by the output size.
    fn draw(
        &self,
        canvas: &mut RgbaImage,
        source: &RgbaImage,
        placement: &ImagePlacement,
    ) -> Drawn {
        let ss = f64::from(self.supersample);
        let width = f64::from(source.width()) * placement.scale_x.abs() * ss;
        let height = f64::from(source.height()) * placement.scale_y.abs() * ss;
        let dest = Dest {
            left: placement.x * ss - width * 0.5,
            top: placement.y * ss - height * 0.5,
            width,
            height,
            flip_x: placement.scale_x < 0.0,
            flip_y: placement.scale_y < 0.0,
        };
        if !dest.is_usable() || source.width() == 0 || source.height() == 0 {
            return Drawn::Unusable;
        }

        let (cw, ch) = canvas.dimensions();
        let columns = Span::clip(source.width(), dest.left, dest.width, cw, dest.flip_x);
        let rows = Span::clip(source.height(), dest.top, dest.height, ch, dest.flip_y);
        let (Some(columns), Some(rows)) = (columns, rows) else {
            return Drawn::Offscreen;
        };

        let target_w = columns.dest_len.round().max(1.0);
        let target_h = rows.dest_len.round().max(1.0);
        let limit = f64::from(cw.max(ch)) * MAX_RESIZE_FACTOR;
        if target_w > limit || target_h > limit {
            // A few source pixels blown up past the canvas; sample them directly.
            sample_nearest(canvas, source, &dest);
            return Drawn::Visible;
        }

        let crop = imageops::crop_imm(
            source,
            columns.src_start,
            rows.src_start,
            columns.src_len(),
            rows.src_len(),
        )
        .to_image();
        let (target_w, target_h) = (round_u32(target_w), round_u32(target_h));
        let mut drawn = if (target_w, target_h) == crop.dimensions() {
            crop
        } else {
            imageops::resize(&crop, target_w, target_h, FilterType::Triangle)
        };
        if dest.flip_x {
            imageops::flip_horizontal_in_place(&mut drawn);
        }
        if dest.flip_y {
            imageops::flip_vertical_in_place(&mut drawn);
        }
        let (x, y) = (round_i64(columns.dest_start), round_i64(rows.dest_start));
        imageops::overlay(canvas, &drawn, x, y);
        Drawn::Visible
    }
}

/// Result of drawing one placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drawn {
    Visible,
    /// Valid geometry entirely outside the canvas.
    Offscreen,
    /// Empty or non-finite size or position.
    Unusable,
}

/// Destination rectangle of a placement in output pixels.
#[derive(Debug, Clone, Copy)]
struct Dest {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    flip_x: bool,
    flip_y: bool,
}

impl Dest {
    fn is_usable(self) -> bool {
        [self.left, self.top, self.width, self.height].iter().all(|v| v.is_finite())
            && self.width >= 1.0
            && self.height >= 1.0
    }
}

/// One axis of a clipped draw: the source pixel range that covers the
/// visible part, and where that range lands in the output.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Span {
    src_start: u32,
    src_end: u32,
    dest_start: f64,
    dest_len: f64,
}

impl Span {
    /// Clip `[start, start + len)` to `[0, canvas)`. `None` when nothing is visible.
    fn clip(src: u32, start: f64, len: f64, canvas: u32, flipped: bool) -> Option<Self> {
        let visible_start = start.max(0.0);
        let visible_end = (start + len).min(f64::from(canvas));
        if visible_end <= visible_start {
            return None;
        }

        let src_len = f64::from(src);
        let per_pixel = len / src_len;
        let mut from = (visible_start - start) / per_pixel;
        let mut to = (visible_end - start) / per_pixel;
        if flipped {
            (from, to) = (src_len - to, src_len - from);
        }

        let src_start = round_u32(from.floor().clamp(0.0, src_len - 1.0));
        let src_end = round_u32(to.ceil().clamp(f64::from(src_start) + 1.0, src_len));
        let offset = if flipped { src_len - f64::from(src_end) } else { f64::from(src_start) };
        Some(Self {
            src_start,
            src_end,
            dest_start: start + offset * per_pixel,
            dest_len: f64::from(src_end - src_start) * per_pixel,
        })
    }

    fn src_len(self) -> u32 {
        self.src_end - self.src_start
    }
}

/// Nearest-neighbour draw of `source` into the visible part of `dest`.
fn sample_nearest(canvas: &mut RgbaImage, source: &RgbaImage, dest: &Dest) {
    let (cw, ch) = canvas.dimensions();
    let (sw, sh) = (f64::from(source.width()), f64::from(source.height()));
    let x0 = round_u32(dest.left.max(0.0).floor());
    let x1 = round_u32((dest.left + dest.width).min(f64::from(cw)).ceil());
    let y0 = round_u32(dest.top.max(0.0).floor());
    let y1 = round_u32((dest.top + dest.height).min(f64::from(ch)).ceil());

    for py in y0..y1 {
        let Some(v) = source_index(f64::from(py), dest.top, dest.height, sh, dest.flip_y) else {
            continue;
        };
        for px in x0..x1 {
            let Some(u) = source_index(f64::from(px), dest.left, dest.width, sw, dest.flip_x) else {
                continue;
            };
            canvas.get_pixel_mut(px, py).blend(source.get_pixel(u, v));
        }
    }
}

/// Source pixel under the center of output pixel `p`, if any.
fn source_index(p: f64, start: f64, len: f64, src_len: f64, flipped: bool) -> Option<u32> {
    let i = ((p + 0.5 - start) / len * src_len).floor();
    if !(0.0..src_len).contains(&i) {
        return None;
    }
    Some(round_u32(if flipped { src_len - 1.0 - i } else { i }))
}

/// Encode an RGBA raster as PNG.
///
/// # Errors
///
/// [`ExportError::Encode`] if the encoder fails.
pub fn encode_png(image: &RgbaImage) -> Result<Vec<u8>, ExportError> {
    let mut out = Cursor::new(Vec::new());
    image.write_to(&mut out, ImageFormat::Png)?;
    Ok(out.into_inner())
}

#[allow(clippy::cast_possible_truncation)]
fn round_i64(v: f64) -> i64 {
    v.round() as i64
}

// Callers pass whole numbers already clamped to a pixel range.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_u32(v: f64) -> u32 {
    v as u32
}

// =============================================================================
// MANIFEST
// =============================================================================

/// Serializable summary of the scene, without image bytes.
#[derive(Debug, Clone, Serialize)]
pub struct SceneManifest {
    pub scene: SceneSize,
    pub supersample: u32,
    pub placements: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ManifestEntry {
    pub id: PlacementId,
    pub x: f64,
    pub y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub source: String,
    pub decoded: &'static str,
}

impl SceneManifest {
    #[must_use]
    pub fn new(
        scene: SceneSize,
        supersample: u32,
        store: &PlacementStore,
        images: &ImageCache,
    ) -> Self {
        let placements = store
            .iter()
            .map(|p| ManifestEntry {
                id: p.id,
                x: p.x,
                y: p.y,
                scale_x: p.scale_x,
                scale_y: p.scale_y,
                source: p.source.describe(),
                decoded: match images.get(&p.id) {
                    Some(Decoded::Ready(_)) => "ready",
                    Some(Decoded::Failed(_)) => "failed",
                    Some(Decoded::Pending) | None => "pending",
                },
            })
            .collect();
        Self { scene, supersample, placements }
    }
}
