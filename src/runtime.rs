//! Single-threaded event loop around a [`Session`].
//!
//! DESIGN
//! ======
//! One task owns the session and applies events strictly one at a time.
//! Hosts talk to it through a cloneable [`SessionHandle`]; every handle call
//! becomes a [`Command`] on an unbounded channel. File reads and decodes that
//! the session asks for are spawned as separate tasks, and their results are
//! fed back through a second channel the loop owns, so completions are
//! serialized with user events and land in completion order.
//!
//! The loop stops on teardown, or once every handle is gone and no spawned
//! work is outstanding. Results that arrive after that are dropped with a
//! debug log; they can never touch the session.

#[cfg(test)]
#[path = "runtime_test.rs"]
mod runtime_test;

use std::io;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, trace};

use crate::decode::{self, DecodeError};
use crate::export::{ExportArtifact, ExportError, SceneManifest};
use crate::ingest::{DropEvent, ReadRequest, SelectEvent};
use crate::session::{Action, Event, Session};
use crate::store::{ImagePlacement, ImageSource, PlacementId, TransformUpdate};
use crate::viewport::ContainerMeasurement;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("canvas event loop has stopped")]
    Closed,

    #[error(transparent)]
    Export(#[from] ExportError),
}

impl RuntimeError {
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Closed => "E_LOOP_CLOSED",
            Self::Export(_) => "E_EXPORT",
        }
    }
}

// =============================================================================
// COMMANDS
// =============================================================================

/// Requests from handles to the loop.
#[derive(Debug)]
pub enum Command {
    Event(Event),
    Export(oneshot::Sender<Result<ExportArtifact, ExportError>>),
    Manifest(oneshot::Sender<SceneManifest>),
    Placements(oneshot::Sender<Vec<ImagePlacement>>),
    /// Reply once no reads or decodes are outstanding.
    Settled(oneshot::Sender<()>),
}

// =============================================================================
// HANDLE
// =============================================================================

/// Cloneable sender side of a running [`EventLoop`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<Command>,
    renders: watch::Receiver<u64>,
}

impl SessionHandle {
    fn send(&self, command: Command) -> Result<(), RuntimeError> {
        self.tx.send(command).map_err(|_| RuntimeError::Closed)
    }

    /// Report a container measurement.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Closed`] once the loop has stopped.
    pub fn resize(&self, measurement: ContainerMeasurement) -> Result<(), RuntimeError> {
        self.send(Command::Event(Event::Resize(measurement)))
    }

    /// Deliver a drop.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Closed`] once the loop has stopped.
    pub fn drop_payload(&self, event: DropEvent) -> Result<(), RuntimeError> {
        self.send(Command::Event(Event::Drop(event)))
    }

    /// Deliver a file picked with the selection control.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Closed`] once the loop has stopped.
    pub fn select(&self, event: SelectEvent) -> Result<(), RuntimeError> {
        self.send(Command::Event(Event::Select(event)))
    }

    /// Move or resize a placement.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Closed`] once the loop has stopped.
    pub fn transform(&self, update: TransformUpdate) -> Result<(), RuntimeError> {
        self.send(Command::Event(Event::Transform(update)))
    }

    /// Destroy the view. The loop exits after applying it.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Closed`] if the loop already stopped.
    pub fn teardown(&self) -> Result<(), RuntimeError> {
        self.send(Command::Event(Event::Teardown))
    }

    /// Export the scene as it is when the loop gets to this request.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Closed`] or [`RuntimeError::Export`].
    pub async fn export(&self) -> Result<ExportArtifact, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Export(tx))?;
        Ok(rx.await.map_err(|_| RuntimeError::Closed)??)
    }

    /// # Errors
    ///
    /// [`RuntimeError::Closed`] once the loop has stopped.
    pub async fn manifest(&self) -> Result<SceneManifest, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Manifest(tx))?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    /// Snapshot of the placements in render order.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Closed`] once the loop has stopped.
    pub async fn placements(&self) -> Result<Vec<ImagePlacement>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Placements(tx))?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    /// Wait until every read and decode issued so far has been applied.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::Closed`] if the loop stops first.
    pub async fn settled(&self) -> Result<(), RuntimeError> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::Settled(tx))?;
        rx.await.map_err(|_| RuntimeError::Closed)
    }

    /// Render revision, bumped whenever the scene or viewport changed.
    #[must_use]
    pub fn renders(&self) -> watch::Receiver<u64> {
        self.renders.clone()
    }
}

// =============================================================================
// EVENT LOOP
// =============================================================================

pub struct EventLoop {
    session: Session,
    commands: mpsc::UnboundedReceiver<Command>,
    completions_tx: mpsc::UnboundedSender<Event>,
    completions: mpsc::UnboundedReceiver<Event>,
    renders: watch::Sender<u64>,
    in_flight: usize,
    settle_waiters: Vec<oneshot::Sender<()>>,
}

/// Build a loop and its handle without starting it.
#[must_use]
pub fn channel(session: Session) -> (SessionHandle, EventLoop) {
    let (tx, commands) = mpsc::unbounded_channel();
    let (completions_tx, completions) = mpsc::unbounded_channel();
    let (renders, renders_rx) = watch::channel(0);
    let handle = SessionHandle { tx, renders: renders_rx };
    let event_loop = EventLoop {
        session,
        commands,
        completions_tx,
        completions,
        renders,
        in_flight: 0,
        settle_waiters: Vec::new(),
    };
    (handle, event_loop)
}

/// Spawn the loop on the current runtime. The join handle yields the final
/// session state.
pub fn spawn(session: Session) -> (SessionHandle, JoinHandle<Session>) {
    let (handle, event_loop) = channel(session);
    (handle, tokio::spawn(event_loop.run()))
}

impl EventLoop {
    /// Run until teardown, or until all handles are dropped and no work is
    /// outstanding.
    pub async fn run(mut self) -> Session {
        let mut commands_open = true;
        loop {
            if !commands_open && self.in_flight == 0 {
                break;
            }

            tokio::select! {
                biased;
                Some(event) = self.completions.recv() => {
                    self.in_flight = self.in_flight.saturating_sub(1);
                    self.dispatch(event);
                }
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => {
                        if !self.on_command(command) {
                            break;
                        }
                    }
                    None => {
                        debug!(in_flight = self.in_flight, "all handles dropped");
                        commands_open = false;
                    }
                },
            }

            self.notify_settled();
        }

        debug!(
            in_flight = self.in_flight,
            placements = self.session.store().len(),
            "canvas event loop stopped"
        );
        self.session
    }

    /// Returns `false` when the loop should stop.
    fn on_command(&mut self, command: Command) -> bool {
        match command {
            Command::Event(Event::Teardown) => {
                self.dispatch(Event::Teardown);
                return false;
            }
            Command::Event(event) => self.dispatch(event),
            Command::Export(reply) => {
                if reply.send(self.session.export()).is_err() {
                    debug!("export requester went away");
                }
            }
            Command::Manifest(reply) => {
                if reply.send(self.session.manifest()).is_err() {
                    debug!("manifest requester went away");
                }
            }
            Command::Placements(reply) => {
                if reply.send(self.session.store().as_slice().to_vec()).is_err() {
                    debug!("placements requester went away");
                }
            }
            Command::Settled(reply) => self.settle_waiters.push(reply),
        }
        true
    }

    fn dispatch(&mut self, event: Event) {
        for action in self.session.handle(event) {
            self.perform(action);
        }
    }

    fn perform(&mut self, action: Action) {
        match action {
            Action::ReadRequested(request) => self.spawn_read(request),
            Action::DecodeRequested { id, source } => self.spawn_decode(id, source),
            Action::ViewportChanged(vp) => {
                trace!(width = vp.width, height = vp.height, "viewport applied");
            }
            Action::PlacementAppended(id) => trace!(%id, "placement applied"),
            Action::Ignored(reason) => trace!(code = reason.error_code(), "event ignored"),
            Action::RenderNeeded => self.renders.send_modify(|revision| *revision += 1),
        }
    }

    fn spawn_read(&mut self, request: ReadRequest) {
        let ReadRequest { ticket, file } = request;
        self.spawn_guarded(async move { file.read_bytes().await }, move |joined| {
            let outcome = joined
                .unwrap_or_else(|e| Err(io::Error::other(format!("read task failed: {e}"))));
            Event::ReadCompleted { ticket, outcome }
        });
    }

    fn spawn_decode(&mut self, id: PlacementId, source: ImageSource) {
        self.spawn_guarded(decode::load_source(source), move |joined| {
            let result = joined.unwrap_or_else(|e| Err(DecodeError::Aborted(e.to_string())));
            Event::Decoded { id, result }
        });
    }

    /// Run `work` on its own task and feed `finish(outcome)` back to the loop.
    /// A panic in `work` still produces a completion, so `in_flight` always
    /// drains.
    fn spawn_guarded<T, W, F>(&mut self, work: W, finish: F)
    where
        T: Send + 'static,
        W: Future<Output = T> + Send + 'static,
        F: FnOnce(Result<T, JoinError>) -> Event + Send + 'static,
    {
        self.in_flight += 1;
        let tx = self.completions_tx.clone();
        tokio::spawn(async move {
            let event = finish(tokio::spawn(work).await);
            if tx.send(event).is_err() {
                debug!("event loop gone; completion dropped");
            }
        });
    }

    fn notify_settled(&mut self) {
        if self.in_flight > 0 || self.settle_waiters.is_empty() {
            return;
        }
        for waiter in self.settle_waiters.drain(..) {
            if waiter.send(()).is_err() {
                debug!("settled waiter went away");
            }
        }
    }
}
