//! Scene size, container measurement and the viewport scale factor.
//!
//! The scene is a fixed virtual coordinate space. The viewport is the on-screen
//! canvas whose width follows its container; the scale factor links the two.
//! `ViewportState` is derived data: it is rebuilt by [`measure`] on mount and on
//! every resize and never carries state of its own.

#[cfg(test)]
#[path = "viewport_test.rs"]
mod viewport_test;

use serde::{Deserialize, Serialize};

use crate::consts::{SCENE_HEIGHT, SCENE_WIDTH};

/// A point in either viewport-pixel or scene space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Both coordinates are finite.
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Fixed dimensions of the virtual scene, in scene units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SceneSize {
    pub width: u32,
    pub height: u32,
}

impl SceneSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Geometric center of the scene.
    #[must_use]
    pub fn center(self) -> Point {
        Point::new(f64::from(self.width) * 0.5, f64::from(self.height) * 0.5)
    }
}

impl Default for SceneSize {
    fn default() -> Self {
        Self::new(SCENE_WIDTH, SCENE_HEIGHT)
    }
}

/// Raw container measurement reported by the host on mount or resize.
///
/// `width` is `None` while the container element is not attached yet.
/// `origin` is where the canvas's top-left corner sits in the coordinate
/// space pointer events are reported in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContainerMeasurement {
    pub width: Option<f64>,
    pub origin: Point,
}

impl ContainerMeasurement {
    /// A measured container whose canvas sits at the pointer-space origin.
    #[must_use]
    pub fn width(width: f64) -> Self {
        Self { width: Some(width), origin: Point::new(0.0, 0.0) }
    }

    /// The container is not measurable yet.
    #[must_use]
    pub fn unmeasured() -> Self {
        Self { width: None, origin: Point::new(0.0, 0.0) }
    }

    #[must_use]
    pub fn with_origin(mut self, origin: Point) -> Self {
        self.origin = origin;
        self
    }
}

/// Derived viewport geometry.
///
/// `width` / `height` are CSS pixels of the rendered canvas.
/// `scale` is viewport pixels per scene unit; always finite and positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewportState {
    pub width: f64,
    pub height: f64,
    pub scale: f64,
    pub origin: Point,
}

impl ViewportState {
    /// Whether a canvas-local point lies on the rendered canvas (edges inclusive).
    #[must_use]
    pub fn contains_local(&self, local: Point) -> bool {
        local.x >= 0.0 && local.y >= 0.0 && local.x <= self.width && local.y <= self.height
    }
}

/// Viewport computation was attempted before the container could be measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ViewportError {
    #[error("container is not measurable yet")]
    ContainerUnready,
}

impl ViewportError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ContainerUnready => "E_CONTAINER_UNREADY",
        }
    }
}

/// Compute the viewport for a container measurement.
///
/// `scale = width / scene.width` and `height = scene.height * scale`.
///
/// # Errors
///
/// Returns [`ViewportError::ContainerUnready`] when the width is absent, not
/// finite, or not positive. Callers keep their previous state in that case.
pub fn measure(
    scene: SceneSize,
    measurement: ContainerMeasurement,
) -> Result<ViewportState, ViewportError> {
    let Some(width) = measurement.width else {
        return Err(ViewportError::ContainerUnready);
    };
    if !width.is_finite() || width <= 0.0 || scene.width == 0 {
        return Err(ViewportError::ContainerUnready);
    }

    let scale = width / f64::from(scene.width);
    Ok(ViewportState {
        width,
        height: f64::from(scene.height) * scale,
        scale,
        origin: measurement.origin,
    })
}
