use std::sync::Arc;

use image::Rgba;
use uuid::Uuid;

use super::*;
use crate::decode::DecodeError;
use crate::store::{ImageSource, TransformUpdate, new_placement_id};
use crate::viewport::Point;

// =============================================================
// Helpers
// =============================================================

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
const CLEAR: Rgba<u8> = Rgba([0, 0, 0, 0]);

fn solid(w: u32, h: u32, color: Rgba<u8>) -> Arc<RgbaImage> {
    Arc::new(RgbaImage::from_pixel(w, h, color))
}

/// Place a decoded image at `(x, y)` and mark it ready in the cache.
fn place(
    store: PlacementStore,
    cache: &mut ImageCache,
    x: f64,
    y: f64,
    image: Arc<RgbaImage>,
) -> (PlacementStore, PlacementId) {
    let source = ImageSource::Url("file:///unused.png".into());
    let p = ImagePlacement::new(new_placement_id(), Point::new(x, y), source);
    let id = p.id;
    cache.mark_pending(id);
    cache.resolve(id, Ok(image));
    (store.appended(p), id)
}

fn is_red(p: &Rgba<u8>) -> bool {
    p[0] > 200 && p[2] < 50 && p[3] > 200
}

fn small_scene() -> SceneSize {
    SceneSize::new(100, 100)
}

// =============================================================
// Output size
// =============================================================

#[test]
fn empty_export_is_blank_at_supersampled_size() {
    let exporter = Exporter::default();
    let rendered = exporter
        .render(SceneSize::new(1000, 1000), &PlacementStore::new(), &ImageCache::new())
        .unwrap();
    assert_eq!(rendered.image.dimensions(), (3000, 3000));
    assert!(rendered.image.pixels().all(|p| *p == CLEAR));
    assert!(rendered.omitted.is_empty());
}

#[test]
fn empty_export_artifact_is_png_named_canvas_image() {
    let artifact = Exporter::default()
        .export(small_scene(), &PlacementStore::new(), &ImageCache::new())
        .unwrap();
    assert_eq!(artifact.file_name, "canvas-image.png");
    assert_eq!((artifact.width, artifact.height), (300, 300));
    assert_eq!(&artifact.bytes[..8], b"\x89PNG\r\n\x1a\n");

    let decoded = image::load_from_memory(&artifact.bytes).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (300, 300));
}

#[test]
fn output_size_uses_supersample() {
    let exporter = Exporter::new(2, "out.png");
    assert_eq!(exporter.output_size(SceneSize::new(640, 480)).unwrap(), (1280, 960));
}

#[test]
fn output_size_overflow_is_error() {
    let exporter = Exporter::new(8, "out.png");
    let err = exporter.output_size(SceneSize::new(u32::MAX, 10)).unwrap_err();
    assert!(matches!(err, ExportError::Dimensions { supersample: 8, .. }));
    assert_eq!(err.error_code(), "E_EXPORT_DIMENSIONS");
}

#[test]
fn zero_supersample_is_clamped_to_one() {
    assert_eq!(Exporter::new(0, "x.png").supersample(), 1);
}

// =============================================================
// Placement drawing
// =============================================================

#[test]
fn placement_is_centered_on_its_point() {
    let mut cache = ImageCache::new();
    let (store, _) = place(PlacementStore::new(), &mut cache, 50.0, 50.0, solid(10, 10, RED));

    let img = Exporter::new(3, "x.png").render(small_scene(), &store, &cache).unwrap().image;

    // 10x10 at 3x = 30x30 centered on (150, 150): covers 135..165.
    assert_eq!(*img.get_pixel(150, 150), RED);
    assert_eq!(*img.get_pixel(135, 135), RED);
    assert_eq!(*img.get_pixel(164, 164), RED);
    assert_eq!(*img.get_pixel(134, 150), CLEAR);
    assert_eq!(*img.get_pixel(165, 150), CLEAR);
}

#[test]
fn later_placements_draw_on_top() {
    let mut cache = ImageCache::new();
    let (store, _) = place(PlacementStore::new(), &mut cache, 50.0, 50.0, solid(20, 20, RED));
    let (store, _) = place(store, &mut cache, 50.0, 50.0, solid(4, 4, BLUE));

    let img = Exporter::new(1, "x.png").render(small_scene(), &store, &cache).unwrap().image;
    assert_eq!(*img.get_pixel(50, 50), BLUE);
    assert_eq!(*img.get_pixel(42, 42), RED);
}

#[test]
fn placement_partly_off_scene_is_clipped() {
    let mut cache = ImageCache::new();
    let (store, _) = place(PlacementStore::new(), &mut cache, 0.0, 0.0, solid(10, 10, RED));

    let img = Exporter::new(1, "x.png").render(small_scene(), &store, &cache).unwrap().image;
    assert_eq!(*img.get_pixel(0, 0), RED);
    assert_eq!(*img.get_pixel(4, 4), RED);
    assert_eq!(*img.get_pixel(5, 5), CLEAR);
}

#[test]
fn scale_from_transform_is_honored() {
    let mut cache = ImageCache::new();
    let (mut store, id) = place(PlacementStore::new(), &mut cache, 50.0, 50.0, solid(10, 10, RED));
    let update = TransformUpdate { id, scale_x: Some(2.0), ..Default::default() };
    store.get_mut(&id).unwrap().apply(&update);

    let img = Exporter::new(1, "x.png").render(small_scene(), &store, &cache).unwrap().image;
    // 20 wide, 10 tall, centered on (50, 50).
    assert!(is_red(img.get_pixel(41, 50)));
    assert!(is_red(img.get_pixel(58, 50)));
    assert_eq!(*img.get_pixel(50, 44), CLEAR);
}

#[test]
fn negative_scale_flips() {
    let mut source = RgbaImage::from_pixel(2, 1, RED);
    source.put_pixel(1, 0, BLUE);
    let mut cache = ImageCache::new();
    let (mut store, id) = place(PlacementStore::new(), &mut cache, 50.0, 50.0, Arc::new(source));
    store.get_mut(&id).unwrap().scale_x = -1.0;

    let img = Exporter::new(1, "x.png").render(small_scene(), &store, &cache).unwrap().image;
    // 2x1 centered on (50, 50): x 49..=50, top 49.5 rounds to row 50.
    assert_eq!(*img.get_pixel(49, 50), BLUE);
    assert_eq!(*img.get_pixel(50, 50), RED);
}

#[test]
fn zero_scale_is_omitted() {
    let mut cache = ImageCache::new();
    let (mut store, id) =
        place(PlacementStore::new(), &mut cache, 50.0, 50.0, solid(10, 10, RED));
    store.get_mut(&id).unwrap().scale_y = 0.0;

    let rendered = Exporter::new(1, "x.png").render(small_scene(), &store, &cache).unwrap();
    assert!(rendered.image.pixels().all(|p| *p == CLEAR));
    assert_eq!(rendered.omitted, vec![id]);
}

#[test]
fn non_finite_position_is_omitted() {
    let mut cache = ImageCache::new();
    let (store, drawn) = place(PlacementStore::new(), &mut cache, 50.0, 50.0, solid(2, 2, RED));
    let (mut store, broken) = place(store, &mut cache, 10.0, 10.0, solid(2, 2, BLUE));
    store.get_mut(&broken).unwrap().x = f64::NAN;

    let rendered = Exporter::new(1, "x.png").render(small_scene(), &store, &cache).unwrap();
    assert_eq!(rendered.omitted, vec![broken]);
    assert_eq!(*rendered.image.get_pixel(50, 50), RED);
    assert!(!rendered.omitted.contains(&drawn));
}

#[test]
fn placement_entirely_off_scene_is_not_omitted() {
    let mut cache = ImageCache::new();
    let (store, _) = place(PlacementStore::new(), &mut cache, 500.0, 500.0, solid(4, 4, RED));

    let rendered = Exporter::new(1, "x.png").render(small_scene(), &store, &cache).unwrap();
    assert!(rendered.omitted.is_empty());
    assert!(rendered.image.pixels().all(|p| *p == CLEAR));
}

// =============================================================
// Oversized sources
// =============================================================

#[test]
fn photo_larger_than_output_is_cropped_and_drawn() {
    // 500x450 is more than four times the 100px output side.
    let mut cache = ImageCache::new();
    let (store, _) = place(PlacementStore::new(), &mut cache, 50.0, 50.0, solid(500, 450, RED));

    let rendered = Exporter::new(1, "x.png").render(small_scene(), &store, &cache).unwrap();
    assert!(rendered.omitted.is_empty());
    assert_eq!(*rendered.image.get_pixel(0, 0), RED);
    assert_eq!(*rendered.image.get_pixel(50, 50), RED);
    assert_eq!(*rendered.image.get_pixel(99, 99), RED);
}

#[test]
fn phone_photo_fills_supersampled_output() {
    let mut cache = ImageCache::new();
    let scene = SceneSize::new(1000, 1000);
    let photo = solid(4032, 3024, BLUE);
    let (store, _) = place(PlacementStore::new(), &mut cache, 500.0, 500.0, photo);

    let rendered = Exporter::new(1, "x.png").render(scene, &store, &cache).unwrap();
    assert!(rendered.omitted.is_empty());
    assert_eq!(*rendered.image.get_pixel(500, 500), BLUE);
    assert_eq!(*rendered.image.get_pixel(0, 999), BLUE);
}

#[test]
fn flipped_placement_clipped_at_edge_shows_mirrored_half() {
    // Left half red, right half blue; mirrored, the red half ends up on the right.
    let mut source = RgbaImage::from_pixel(20, 1, RED);
    for x in 10..20 {
        source.put_pixel(x, 0, BLUE);
    }
    let mut cache = ImageCache::new();
    let (mut store, id) = place(PlacementStore::new(), &mut cache, 0.0, 50.0, Arc::new(source));
    store.get_mut(&id).unwrap().scale_x = -1.0;

    let img = Exporter::new(1, "x.png").render(small_scene(), &store, &cache).unwrap().image;
    // Visible columns 0..10 are the mirrored right half of the placement.
    assert_eq!(*img.get_pixel(0, 50), RED);
    assert_eq!(*img.get_pixel(9, 50), RED);
    assert_eq!(*img.get_pixel(10, 50), CLEAR);
}

#[test]
fn extreme_upscale_samples_nearest_pixel() {
    let mut source = RgbaImage::from_pixel(2, 2, RED);
    source.put_pixel(1, 0, BLUE);
    source.put_pixel(1, 1, BLUE);
    let mut cache = ImageCache::new();
    let (mut store, id) = place(PlacementStore::new(), &mut cache, 50.0, 50.0, Arc::new(source));
    let p = store.get_mut(&id).unwrap();
    p.scale_x = 1000.0;
    p.scale_y = 1000.0;

    let rendered = Exporter::new(1, "x.png").render(small_scene(), &store, &cache).unwrap();
    assert!(rendered.omitted.is_empty());
    assert_eq!(*rendered.image.get_pixel(0, 0), RED);
    assert_eq!(*rendered.image.get_pixel(49, 50), RED);
    assert_eq!(*rendered.image.get_pixel(50, 50), BLUE);
    assert_eq!(*rendered.image.get_pixel(99, 99), BLUE);
}

// =============================================================
// Live state and unresolved sources
// =============================================================

#[test]
fn export_reads_current_positions() {
    let mut cache = ImageCache::new();
    let (mut store, id) = place(PlacementStore::new(), &mut cache, 20.0, 20.0, solid(4, 4, RED));
    let exporter = Exporter::new(1, "x.png");

    let before = exporter.render(small_scene(), &store, &cache).unwrap().image;
    assert_eq!(*before.get_pixel(20, 20), RED);

    let p = store.get_mut(&id).unwrap();
    p.x = 80.0;
    p.y = 70.0;

    let after = exporter.render(small_scene(), &store, &cache).unwrap().image;
    assert_eq!(*after.get_pixel(20, 20), CLEAR);
    assert_eq!(*after.get_pixel(80, 70), RED);
}

#[test]
fn pending_source_is_omitted() {
    let mut cache = ImageCache::new();
    let source = ImageSource::Url("a.png".into());
    let p = ImagePlacement::new(new_placement_id(), Point::new(50.0, 50.0), source);
    let id = p.id;
    cache.mark_pending(id);
    let store = PlacementStore::new().appended(p);

    let rendered = Exporter::new(1, "x.png").render(small_scene(), &store, &cache).unwrap();
    assert_eq!(rendered.omitted, vec![id]);
    assert!(rendered.image.pixels().all(|px| *px == CLEAR));
}

#[test]
fn failed_source_is_omitted() {
    let mut cache = ImageCache::new();
    let (store, _) = place(PlacementStore::new(), &mut cache, 50.0, 50.0, solid(2, 2, RED));
    let source = ImageSource::Url("https://x.test/a.png".into());
    let p = ImagePlacement::new(new_placement_id(), Point::new(10.0, 10.0), source);
    let failed = p.id;
    cache.mark_pending(failed);
    cache.resolve(failed, Err(DecodeError::UnsupportedUrl("https://x.test/a.png".into())));
    let store = store.appended(p);

    let rendered = Exporter::new(1, "x.png").render(small_scene(), &store, &cache).unwrap();
    assert_eq!(rendered.omitted, vec![failed]);
    assert_eq!(*rendered.image.get_pixel(50, 50), RED);
}

// =============================================================
// Manifest
// =============================================================

#[test]
fn manifest_lists_placements_without_bytes() {
    let mut cache = ImageCache::new();
    let (store, id) = place(PlacementStore::new(), &mut cache, 10.0, 20.0, solid(1, 1, RED));
    let source = ImageSource::embedded("image/png", vec![0u8; 5]);
    let pending = ImagePlacement::new(Uuid::now_v7(), Point::new(1.0, 2.0), source);
    let store = store.appended(pending);

    let manifest = SceneManifest::new(small_scene(), 3, &store, &cache);
    let json = serde_json::to_value(&manifest).unwrap();

    assert_eq!(json["scene"]["width"], 100);
    assert_eq!(json["supersample"], 3);
    assert_eq!(json["placements"][0]["id"], id.to_string());
    assert_eq!(json["placements"][0]["decoded"], "ready");
    assert_eq!(json["placements"][1]["source"], "embedded image/png (5 bytes)");
    assert_eq!(json["placements"][1]["decoded"], "pending");
}
