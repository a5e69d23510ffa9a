//! Conversion between viewport pixels and scene units.
//!
//! Pointer positions arrive in the host's pointer coordinate space. They are
//! first made canvas-local by subtracting the canvas origin, then divided by the
//! viewport scale. When no position can be resolved the mapper returns
//! [`FALLBACK`] instead of failing, so callers always get a scene point.

#[cfg(test)]
#[path = "pointer_test.rs"]
mod pointer_test;

use crate::viewport::{Point, SceneSize, ViewportState};

/// Scene point used when a pointer position cannot be resolved.
pub const FALLBACK: Point = Point::new(0.0, 0.0);

/// Map a pointer position to scene coordinates.
///
/// Returns `None` when the point is not finite or falls outside the rendered
/// canvas.
#[must_use]
pub fn try_viewport_to_scene(viewport: &ViewportState, pointer: Point) -> Option<Point> {
    if !pointer.is_finite() {
        return None;
    }
    let local = Point::new(pointer.x - viewport.origin.x, pointer.y - viewport.origin.y);
    if !viewport.contains_local(local) {
        return None;
    }
    Some(Point::new(local.x / viewport.scale, local.y / viewport.scale))
}

/// Map a pointer position captured at drop time to scene coordinates.
///
/// Falls back to [`FALLBACK`] when the canvas is not measured yet, the event
/// carried no position, or the position is outside the canvas.
#[must_use]
pub fn viewport_to_scene(viewport: Option<&ViewportState>, pointer: Option<Point>) -> Point {
    match (viewport, pointer) {
        (Some(vp), Some(p)) => try_viewport_to_scene(vp, p).unwrap_or(FALLBACK),
        _ => FALLBACK,
    }
}

/// Map a scene point back to the pointer coordinate space.
#[must_use]
pub fn scene_to_viewport(viewport: &ViewportState, scene: Point) -> Point {
    Point::new(
        scene.x * viewport.scale + viewport.origin.x,
        scene.y * viewport.scale + viewport.origin.y,
    )
}

/// Scene point under the center of the viewport.
///
/// Before the first measurement this is the scene center, which is where the
/// measured viewport center maps to at any scale.
#[must_use]
pub fn viewport_center_in_scene(scene: SceneSize, viewport: Option<&ViewportState>) -> Point {
    let Some(vp) = viewport else {
        return scene.center();
    };
    let center = Point::new(vp.origin.x + vp.width * 0.5, vp.origin.y + vp.height * 0.5);
    try_viewport_to_scene(vp, center).unwrap_or_else(|| scene.center())
}
