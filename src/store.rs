//! Placements and the append-only placement store.
//!
//! The store is the single source of truth for what is on the scene and where.
//! Ingestion grows it only through [`PlacementStore::appended`], which consumes
//! the old store and returns the new one. The transform widget is modelled as a
//! direct write into a placement obtained from [`PlacementStore::get_mut`].

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::viewport::Point;

/// Unique identifier for a placement. Time-ordered (UUIDv7).
pub type PlacementId = Uuid;

/// Allocate a fresh placement id.
#[must_use]
pub fn new_placement_id() -> PlacementId {
    Uuid::now_v7()
}

/// Self-contained reference to the pixels of a placement.
#[derive(Clone, PartialEq, Eq)]
pub enum ImageSource {
    /// File contents read at ingestion time. Outlives the original file handle.
    Embedded { mime: String, bytes: Arc<[u8]> },
    /// A dragged URL, used as-is.
    Url(String),
}

impl ImageSource {
    #[must_use]
    pub fn embedded(mime: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::Embedded { mime: mime.into(), bytes: bytes.into() }
    }

    /// Short human-readable description, without the payload bytes.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Embedded { mime, bytes } => format!("embedded {mime} ({} bytes)", bytes.len()),
            Self::Url(url) => url.clone(),
        }
    }
}

impl fmt::Debug for ImageSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Embedded { mime, bytes } => {
                f.debug_struct("Embedded").field("mime", mime).field("len", &bytes.len()).finish()
            }
            Self::Url(url) => f.debug_tuple("Url").field(url).finish(),
        }
    }
}

/// One positioned image on the scene.
///
/// `x` / `y` are scene units and locate the image's center, not its top-left
/// corner. `scale_x` / `scale_y` are written by the transform widget on resize.
#[derive(Debug, Clone, PartialEq)]
pub struct ImagePlacement {
    pub id: PlacementId,
    pub x: f64,
    pub y: f64,
    pub scale_x: f64,
    pub scale_y: f64,
    pub source: ImageSource,
}

impl ImagePlacement {
    /// New unscaled placement centered at `at`.
    #[must_use]
    pub fn new(id: PlacementId, at: Point, source: ImageSource) -> Self {
        Self { id, x: at.x, y: at.y, scale_x: 1.0, scale_y: 1.0, source }
    }

    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Apply a transform widget update in place.
    pub fn apply(&mut self, update: &TransformUpdate) {
        if let Some(x) = update.x {
            self.x = x;
        }
        if let Some(y) = update.y {
            self.y = y;
        }
        if let Some(sx) = update.scale_x {
            self.scale_x = sx;
        }
        if let Some(sy) = update.scale_y {
            self.scale_y = sy;
        }
    }
}

/// Sparse update written by the transform widget. Only present fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformUpdate {
    pub id: PlacementId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_x: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale_y: Option<f64>,
}

impl TransformUpdate {
    /// A pure move to `(x, y)`.
    #[must_use]
    pub fn moved(id: PlacementId, x: f64, y: f64) -> Self {
        Self { id, x: Some(x), y: Some(y), ..Default::default() }
    }
}

/// Ordered collection of placements, in append order.
#[derive(Debug, Clone, Default)]
pub struct PlacementStore {
    placements: Vec<ImagePlacement>,
}

impl PlacementStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the store with `placement` appended at the end.
    ///
    /// No duplicate-id check is made; ids are unique by construction.
    #[must_use]
    pub fn appended(mut self, placement: ImagePlacement) -> Self {
        self.placements.push(placement);
        self
    }

    #[must_use]
    pub fn get(&self, id: &PlacementId) -> Option<&ImagePlacement> {
        self.placements.iter().find(|p| p.id == *id)
    }

    /// Direct access for the transform widget.
    pub fn get_mut(&mut self, id: &PlacementId) -> Option<&mut ImagePlacement> {
        self.placements.iter_mut().find(|p| p.id == *id)
    }

    /// Placements in draw order (first appended is drawn first).
    pub fn iter(&self) -> impl Iterator<Item = &ImagePlacement> {
        self.placements.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ImagePlacement] {
        &self.placements
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }
}
