//! Drop and selection ingestion.
//!
//! DESIGN
//! ======
//! A drop or selection is validated synchronously: the payload must carry a
//! file or a URL, and its type must be an image. Files then need an
//! asynchronous byte read; the [`Ingestor`] hands out a [`ReadTicket`] for it
//! carrying the session generation, a sequence number, and the insertion point
//! captured at drop time. When the read completes the ticket comes back through
//! [`Ingestor::complete`]:
//!
//! - a ticket from an older generation (the view was torn down) is rejected
//!   as stale and nothing is appended;
//! - in [`PlacementOrder::Completion`] mode the placement is released at once,
//!   so concurrent drops land in read-completion order;
//! - in [`PlacementOrder::Drop`] mode completions wait in a reorder buffer and
//!   are released in sequence order. Failed reads free their slot so later
//!   drops are not held back.
//!
//! URL drops resolve synchronously but still take a sequence slot, so they keep
//! their place relative to pending file reads in drop-order mode.

#[cfg(test)]
#[path = "ingest_test.rs"]
mod ingest_test;

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use image::ImageFormat;
use serde::{Deserialize, Serialize};

use crate::consts::IMAGE_MIME_PREFIX;
use crate::pointer;
use crate::store::{ImagePlacement, ImageSource, new_placement_id};
use crate::viewport::{Point, SceneSize, ViewportState};

// =============================================================================
// ERRORS
// =============================================================================

/// Reasons a drop or selection produced no placement. None of them are fatal.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The payload's type is not `image/*`.
    #[error("not an image: {mime:?}")]
    NotAnImage { mime: String },

    /// The event carried neither a file nor a URL.
    #[error("event carried no file or URL")]
    NoPayload,

    /// Reading the file bytes failed.
    #[error("reading file failed: {0}")]
    Read(#[from] io::Error),

    /// The completion belongs to a torn-down view.
    #[error("stale completion from generation {generation}")]
    Stale { generation: u64 },
}

impl IngestError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotAnImage { .. } => "E_NOT_AN_IMAGE",
            Self::NoPayload => "E_NO_PAYLOAD",
            Self::Read(_) => "E_READ",
            Self::Stale { .. } => "E_STALE",
        }
    }
}

// =============================================================================
// BYTE SOURCES
// =============================================================================

/// A file handed over by the host, readable asynchronously.
#[async_trait]
pub trait ByteSource: Send + Sync + fmt::Debug {
    /// Display name, for logs.
    fn name(&self) -> &str;

    /// Declared media type. `None` when the host could not tell.
    fn mime(&self) -> Option<&str>;

    /// Read the full contents.
    async fn read_bytes(&self) -> io::Result<Vec<u8>>;
}

/// A file on the local filesystem. The media type is inferred from the extension.
#[derive(Debug, Clone)]
pub struct LocalFile {
    path: PathBuf,
    name: String,
    mime: Option<String>,
}

impl LocalFile {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path.file_name().map_or_else(String::new, |n| n.to_string_lossy().into_owned());
        let mime = mime_from_path(&path);
        Self { path, name, mime }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ByteSource for LocalFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    async fn read_bytes(&self) -> io::Result<Vec<u8>> {
        tokio::fs::read(&self.path).await
    }
}

/// A file whose bytes are already in memory (clipboard, tests, embedding hosts).
#[derive(Debug, Clone)]
pub struct InMemoryFile {
    name: String,
    mime: Option<String>,
    bytes: Arc<[u8]>,
}

impl InMemoryFile {
    #[must_use]
    pub fn new(name: impl Into<String>, mime: Option<&str>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self { name: name.into(), mime: mime.map(str::to_owned), bytes: bytes.into() }
    }
}

#[async_trait]
impl ByteSource for InMemoryFile {
    fn name(&self) -> &str {
        &self.name
    }

    fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    async fn read_bytes(&self) -> io::Result<Vec<u8>> {
        Ok(self.bytes.to_vec())
    }
}

/// Media type for a path, from its extension.
#[must_use]
pub fn mime_from_path(path: &Path) -> Option<String> {
    match ImageFormat::from_path(path) {
        Ok(format) => Some(format.to_mime_type().to_owned()),
        Err(_) => None,
    }
}

/// Check that a declared type is an image type.
///
/// # Errors
///
/// [`IngestError::NotAnImage`] for any type not starting with `image/`,
/// including a missing type.
pub fn validate_mime(mime: Option<&str>) -> Result<&str, IngestError> {
    match mime {
        Some(m) if m.starts_with(IMAGE_MIME_PREFIX) => Ok(m),
        other => Err(IngestError::NotAnImage { mime: other.unwrap_or_default().to_owned() }),
    }
}

/// Validate a dragged URL.
///
/// Only `data:` URLs carry a checkable type; everything else is trusted here
/// and checked when the source is decoded.
///
/// # Errors
///
/// [`IngestError::NoPayload`] for a blank URL, [`IngestError::NotAnImage`] for
/// a `data:` URL with a non-image type.
pub fn validate_url(url: &str) -> Result<&str, IngestError> {
    let url = url.trim();
    if url.is_empty() {
        return Err(IngestError::NoPayload);
    }
    if let Some(rest) = url.strip_prefix("data:") {
        let end = rest.find([';', ',']).unwrap_or(rest.len());
        validate_mime(Some(&rest[..end]))?;
    }
    Ok(url)
}

// =============================================================================
// EVENTS
// =============================================================================

/// A native drop on the canvas. Only the first file, or else the URL, is used.
#[derive(Debug, Clone, Default)]
pub struct DropEvent {
    pub files: Vec<Arc<dyn ByteSource>>,
    pub url: Option<String>,
    /// Pointer position at drop time, in pointer space. `None` if unknown.
    pub pointer: Option<Point>,
}

impl DropEvent {
    #[must_use]
    pub fn file(file: Arc<dyn ByteSource>, pointer: Option<Point>) -> Self {
        Self { files: vec![file], url: None, pointer }
    }

    #[must_use]
    pub fn url(url: impl Into<String>, pointer: Option<Point>) -> Self {
        Self { files: Vec::new(), url: Some(url.into()), pointer }
    }
}

/// A file picked through the file-selection control.
#[derive(Debug, Clone, Default)]
pub struct SelectEvent {
    pub files: Vec<Arc<dyn ByteSource>>,
}

impl SelectEvent {
    #[must_use]
    pub fn file(file: Arc<dyn ByteSource>) -> Self {
        Self { files: vec![file] }
    }
}

// =============================================================================
// TICKETS
// =============================================================================

/// Order in which resolved drops are appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementOrder {
    /// Append as reads complete.
    #[default]
    Completion,
    /// Append in the order the drops happened.
    Drop,
}

/// Issued at ingestion start and returned with the read completion.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadTicket {
    pub generation: u64,
    pub sequence: u64,
    /// Scene-space insertion point captured at ingestion time.
    pub at: Point,
    pub mime: String,
}

/// A file read the host runtime must perform.
#[derive(Debug, Clone)]
pub struct ReadRequest {
    pub ticket: ReadTicket,
    pub file: Arc<dyn ByteSource>,
}

/// Outcome of validating a drop or selection.
#[derive(Debug)]
pub enum Ingestion {
    /// A file read was started; its completion goes to [`Ingestor::complete`].
    Read(ReadRequest),
    /// Resolved synchronously (URL); these placements are ready to append.
    Ready(Vec<ImagePlacement>),
}

// =============================================================================
// INGESTOR
// =============================================================================

/// Issues tickets and turns completions into placements in the configured order.
#[derive(Debug, Default)]
pub struct Ingestor {
    order: PlacementOrder,
    generation: u64,
    next_sequence: u64,
    next_release: u64,
    /// Completed slots waiting for earlier ones (drop order only). `None` = failed read.
    parked: BTreeMap<u64, Option<ImagePlacement>>,
    outstanding: usize,
}

impl Ingestor {
    #[must_use]
    pub fn new(order: PlacementOrder) -> Self {
        Self { order, ..Default::default() }
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn order(&self) -> PlacementOrder {
        self.order
    }

    /// Reads issued and not yet completed.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    /// Ingest a drop. The insertion point comes from the pointer at drop time.
    ///
    /// # Errors
    ///
    /// [`IngestError::NoPayload`] or [`IngestError::NotAnImage`]; no ticket is
    /// issued in either case.
    pub fn ingest_drop(
        &mut self,
        event: DropEvent,
        viewport: Option<&ViewportState>,
    ) -> Result<Ingestion, IngestError> {
        let at = pointer::viewport_to_scene(viewport, event.pointer);

        if let Some(file) = event.files.into_iter().next() {
            return self.start_read(file, at);
        }

        let Some(url) = event.url else {
            return Err(IngestError::NoPayload);
        };
        let url = validate_url(&url)?.to_owned();
        let sequence = self.reserve();
        let placement = ImagePlacement::new(new_placement_id(), at, ImageSource::Url(url));
        Ok(Ingestion::Ready(self.release(sequence, Some(placement))))
    }

    /// Ingest a selected file. It is inserted at the viewport center.
    ///
    /// # Errors
    ///
    /// [`IngestError::NoPayload`] or [`IngestError::NotAnImage`].
    pub fn ingest_selection(
        &mut self,
        event: SelectEvent,
        scene: SceneSize,
        viewport: Option<&ViewportState>,
    ) -> Result<Ingestion, IngestError> {
        let Some(file) = event.files.into_iter().next() else {
            return Err(IngestError::NoPayload);
        };
        self.start_read(file, pointer::viewport_center_in_scene(scene, viewport))
    }

    /// Resolve a finished read.
    ///
    /// Returns the placements that are now ready to append, in order. May be
    /// empty (drop order, earlier reads still pending).
    ///
    /// # Errors
    ///
    /// [`IngestError::Stale`] when the ticket predates the current generation;
    /// a read error is passed through after its slot is released.
    pub fn complete(
        &mut self,
        ticket: ReadTicket,
        outcome: io::Result<Vec<u8>>,
    ) -> Result<Vec<ImagePlacement>, IngestError> {
        if ticket.generation != self.generation {
            return Err(IngestError::Stale { generation: ticket.generation });
        }
        self.outstanding = self.outstanding.saturating_sub(1);

        match outcome {
            Ok(bytes) => {
                let source = ImageSource::embedded(ticket.mime, bytes);
                let placement = ImagePlacement::new(new_placement_id(), ticket.at, source);
                Ok(self.release(ticket.sequence, Some(placement)))
            }
            Err(e) => {
                let unblocked = self.release(ticket.sequence, None);
                if unblocked.is_empty() {
                    Err(IngestError::Read(e))
                } else {
                    // A failed slot can free placements parked behind it.
                    tracing::warn!(error = %e, sequence = ticket.sequence, "file read failed");
                    Ok(unblocked)
                }
            }
        }
    }

    /// Invalidate every outstanding ticket. Called when the view is torn down.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.parked.clear();
        self.outstanding = 0;
        self.next_release = self.next_sequence;
    }

    fn start_read(
        &mut self,
        file: Arc<dyn ByteSource>,
        at: Point,
    ) -> Result<Ingestion, IngestError> {
        let mime = validate_mime(file.mime())?.to_owned();
        let sequence = self.reserve();
        self.outstanding += 1;
        let ticket = ReadTicket { generation: self.generation, sequence, at, mime };
        Ok(Ingestion::Read(ReadRequest { ticket, file }))
    }

    fn reserve(&mut self) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        sequence
    }

    fn release(&mut self, sequence: u64, slot: Option<ImagePlacement>) -> Vec<ImagePlacement> {
        match self.order {
            PlacementOrder::Completion => slot.into_iter().collect(),
            PlacementOrder::Drop => {
                self.parked.insert(sequence, slot);
                let mut ready = Vec::new();
                while let Some(slot) = self.parked.remove(&self.next_release) {
                    ready.extend(slot);
                    self.next_release += 1;
                }
                ready
            }
        }
    }
}
