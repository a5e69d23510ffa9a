//! Shared constants for the canvas core.

// ── Scene ───────────────────────────────────────────────────────

/// Width of the virtual scene in scene units.
pub const SCENE_WIDTH: u32 = 1000;

/// Height of the virtual scene in scene units.
pub const SCENE_HEIGHT: u32 = 1000;

/// Largest accepted scene side.
pub const MAX_SCENE_SIDE: u32 = 8192;

// ── Export ──────────────────────────────────────────────────────

/// Pixels per scene unit in the exported raster.
pub const DEFAULT_SUPERSAMPLE: u32 = 3;

/// Upper bound for the supersample factor.
pub const MAX_SUPERSAMPLE: u32 = 8;

/// File name of the downloadable export.
pub const EXPORT_FILE_NAME: &str = "canvas-image.png";

// ── Ingestion ───────────────────────────────────────────────────

/// Mime prefix every accepted payload must carry.
pub const IMAGE_MIME_PREFIX: &str = "image/";
