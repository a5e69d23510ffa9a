//! Event dispatcher for one mounted canvas.
//!
//! DESIGN
//! ======
//! `Session` owns the whole core state: the current viewport, the placement
//! store, the decoded-image cache and the ingestor. Hosts feed it [`Event`]s
//! and act on the returned [`Action`]s; it never does I/O itself. File reads
//! and source decodes come back out as `ReadRequested` / `DecodeRequested` for
//! the runtime to perform, and their results come back in as events.
//!
//! State transitions replace values rather than patching shared handles:
//! a resize swaps in the `ViewportState` computed by [`viewport::measure`], and
//! an append swaps in the store returned by [`PlacementStore::appended`].
//! Events that cannot be applied (non-image drop, unmeasurable container,
//! completion after teardown) leave every field untouched and come back as
//! [`Action::Ignored`].

#[cfg(test)]
#[path = "session_test.rs"]
mod session_test;

use std::io;
use std::mem;
use std::sync::Arc;

use image::RgbaImage;
use tracing::{debug, info, warn};

use crate::config::{CanvasConfig, ConfigError};
use crate::decode::{DecodeError, ImageCache};
use crate::export::{ExportArtifact, ExportError, Exporter, SceneManifest};
use crate::ingest::{
    DropEvent, IngestError, Ingestion, Ingestor, ReadRequest, ReadTicket, SelectEvent,
};
use crate::store::{ImagePlacement, ImageSource, PlacementId, PlacementStore, TransformUpdate};
use crate::viewport::{self, ContainerMeasurement, ViewportError, ViewportState};

/// Inputs to the session.
#[derive(Debug)]
pub enum Event {
    /// The container was mounted or resized.
    Resize(ContainerMeasurement),
    /// Something was dropped on the canvas.
    Drop(DropEvent),
    /// A file was picked with the file-selection control.
    Select(SelectEvent),
    /// A file read issued through [`Action::ReadRequested`] finished.
    ReadCompleted { ticket: ReadTicket, outcome: io::Result<Vec<u8>> },
    /// A decode issued through [`Action::DecodeRequested`] finished.
    Decoded { id: PlacementId, result: Result<Arc<RgbaImage>, DecodeError> },
    /// The transform widget moved or resized a placement.
    Transform(TransformUpdate),
    /// The view is being destroyed. Outstanding completions become no-ops.
    Teardown,
}

/// Outputs for the host to process.
#[derive(Debug)]
pub enum Action {
    ViewportChanged(ViewportState),
    /// Read this file and send back [`Event::ReadCompleted`].
    ReadRequested(ReadRequest),
    /// Decode this source and send back [`Event::Decoded`].
    DecodeRequested { id: PlacementId, source: ImageSource },
    PlacementAppended(PlacementId),
    /// The event had no effect.
    Ignored(Ignored),
    RenderNeeded,
}

/// Why an event had no effect.
#[derive(Debug)]
pub enum Ignored {
    Ingest(IngestError),
    Viewport(ViewportError),
    /// The session was torn down.
    Unmounted,
    /// A transform or decode referred to a placement that does not exist.
    UnknownPlacement(PlacementId),
}

impl Ignored {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Ingest(e) => e.error_code(),
            Self::Viewport(e) => e.error_code(),
            Self::Unmounted => "E_UNMOUNTED",
            Self::UnknownPlacement(_) => "E_UNKNOWN_PLACEMENT",
        }
    }
}

/// Core state of one canvas view.
pub struct Session {
    config: CanvasConfig,
    viewport: Option<ViewportState>,
    store: PlacementStore,
    images: ImageCache,
    ingestor: Ingestor,
    exporter: Exporter,
    mounted: bool,
}

impl Session {
    /// Create a mounted session with an empty scene.
    ///
    /// # Errors
    ///
    /// Returns the [`ConfigError`] from validating `config`.
    pub fn new(config: CanvasConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            viewport: None,
            store: PlacementStore::new(),
            images: ImageCache::new(),
            ingestor: Ingestor::new(config.order),
            exporter: Exporter::new(config.supersample, config.export_file_name.clone()),
            mounted: true,
            config,
        })
    }

    /// Apply one event.
    pub fn handle(&mut self, event: Event) -> Vec<Action> {
        if !self.mounted {
            return match event {
                // Let the ingestor classify it so the stale generation is reported.
                Event::ReadCompleted { ticket, outcome } => self.on_read_completed(ticket, outcome),
                _ => ignored(Ignored::Unmounted),
            };
        }

        match event {
            Event::Resize(measurement) => self.on_resize(measurement),
            Event::Drop(drop) => {
                let result = self.ingestor.ingest_drop(drop, self.viewport.as_ref());
                self.on_ingestion(result)
            }
            Event::Select(select) => {
                let result = self.ingestor.ingest_selection(
                    select,
                    self.config.scene,
                    self.viewport.as_ref(),
                );
                self.on_ingestion(result)
            }
            Event::ReadCompleted { ticket, outcome } => self.on_read_completed(ticket, outcome),
            Event::Decoded { id, result } => self.on_decoded(id, result),
            Event::Transform(update) => self.on_transform(&update),
            Event::Teardown => self.on_teardown(),
        }
    }

    // --- Handlers ---

    fn on_resize(&mut self, measurement: ContainerMeasurement) -> Vec<Action> {
        match viewport::measure(self.config.scene, measurement) {
            Ok(vp) => {
                debug!(width = vp.width, scale = vp.scale, "viewport resized");
                self.viewport = Some(vp);
                vec![Action::ViewportChanged(vp), Action::RenderNeeded]
            }
            Err(e) => {
                debug!(code = e.error_code(), "resize deferred; keeping previous viewport");
                ignored(Ignored::Viewport(e))
            }
        }
    }

    fn on_ingestion(&mut self, result: Result<Ingestion, IngestError>) -> Vec<Action> {
        match result {
            Ok(Ingestion::Read(request)) => {
                debug!(
                    file = request.file.name(),
                    sequence = request.ticket.sequence,
                    x = request.ticket.at.x,
                    y = request.ticket.at.y,
                    "file read started"
                );
                vec![Action::ReadRequested(request)]
            }
            Ok(Ingestion::Ready(placements)) => self.append_all(placements),
            Err(e) => {
                info!(code = e.error_code(), error = %e, "drop ignored");
                ignored(Ignored::Ingest(e))
            }
        }
    }

    fn on_read_completed(
        &mut self,
        ticket: ReadTicket,
        outcome: io::Result<Vec<u8>>,
    ) -> Vec<Action> {
        let sequence = ticket.sequence;
        match self.ingestor.complete(ticket, outcome) {
            Ok(placements) => self.append_all(placements),
            Err(e) => {
                warn!(code = e.error_code(), error = %e, sequence, "read completion discarded");
                ignored(Ignored::Ingest(e))
            }
        }
    }

    fn on_decoded(
        &mut self,
        id: PlacementId,
        result: Result<Arc<RgbaImage>, DecodeError>,
    ) -> Vec<Action> {
        if let Err(e) = &result {
            warn!(%id, code = e.error_code(), error = %e, "source could not be decoded");
        }
        if self.images.resolve(id, result) {
            vec![Action::RenderNeeded]
        } else {
            ignored(Ignored::UnknownPlacement(id))
        }
    }

    fn on_transform(&mut self, update: &TransformUpdate) -> Vec<Action> {
        let Some(placement) = self.store.get_mut(&update.id) else {
            return ignored(Ignored::UnknownPlacement(update.id));
        };
        placement.apply(update);
        vec![Action::RenderNeeded]
    }

    fn on_teardown(&mut self) -> Vec<Action> {
        info!(
            generation = self.ingestor.generation(),
            outstanding = self.ingestor.outstanding(),
            "session torn down"
        );
        self.ingestor.invalidate();
        self.mounted = false;
        Vec::new()
    }

    fn append_all(&mut self, placements: Vec<ImagePlacement>) -> Vec<Action> {
        if placements.is_empty() {
            return Vec::new();
        }

        let mut actions = Vec::with_capacity(placements.len() * 2 + 1);
        for placement in placements {
            let id = placement.id;
            info!(
                %id,
                x = placement.x,
                y = placement.y,
                source = %placement.source.describe(),
                "placement appended"
            );
            actions.push(Action::DecodeRequested { id, source: placement.source.clone() });
            actions.push(Action::PlacementAppended(id));
            self.images.mark_pending(id);
            self.store = mem::take(&mut self.store).appended(placement);
        }
        actions.push(Action::RenderNeeded);
        actions
    }

    // --- Export ---

    /// Rasterize the current scene. Reads live placement state.
    ///
    /// # Errors
    ///
    /// Returns [`ExportError`] if rendering or encoding fails.
    pub fn export(&self) -> Result<ExportArtifact, ExportError> {
        let artifact = self.exporter.export(self.config.scene, &self.store, &self.images)?;
        info!(
            width = artifact.width,
            height = artifact.height,
            placements = self.store.len(),
            omitted = artifact.omitted.len(),
            "scene exported"
        );
        Ok(artifact)
    }

    /// Serializable summary of the current scene.
    #[must_use]
    pub fn manifest(&self) -> SceneManifest {
        let supersample = self.exporter.supersample();
        SceneManifest::new(self.config.scene, supersample, &self.store, &self.images)
    }

    // --- Queries ---

    #[must_use]
    pub fn config(&self) -> &CanvasConfig {
        &self.config
    }

    /// The current viewport, `None` until the container was measured once.
    #[must_use]
    pub fn viewport(&self) -> Option<ViewportState> {
        self.viewport
    }

    #[must_use]
    pub fn store(&self) -> &PlacementStore {
        &self.store
    }

    #[must_use]
    pub fn images(&self) -> &ImageCache {
        &self.images
    }

    #[must_use]
    pub fn placement(&self, id: &PlacementId) -> Option<&ImagePlacement> {
        self.store.get(id)
    }

    /// Direct placement access for the transform widget.
    pub fn placement_mut(&mut self, id: &PlacementId) -> Option<&mut ImagePlacement> {
        self.store.get_mut(id)
    }

    #[must_use]
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// File reads issued and not yet completed.
    #[must_use]
    pub fn pending_reads(&self) -> usize {
        self.ingestor.outstanding()
    }
}

fn ignored(reason: Ignored) -> Vec<Action> {
    vec![Action::Ignored(reason)]
}
