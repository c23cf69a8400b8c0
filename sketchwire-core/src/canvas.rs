//! Canvas: ordered history of committed operations plus the active one.
//!
//! The canvas owns the live operation that currently captures input and
//! registers itself as that operation's listener. On `Completed` it stores a
//! snapshot under the next sequence number and tells its own
//! [`CanvasListener`]s. Operations arriving from the network enter through
//! [`Canvas::commit_remote_operation`], which appends to history without
//! notifying listeners so remote edits are never re-broadcast.
//!
//! All state sits behind one mutex. The network thread may commit remote
//! operations while the input thread is drawing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;

use crate::operation::{
    CommittedOperation, EditOperation, InputEvent, OperationError, OperationEvent,
    OperationKind, OperationListener, Phase,
};
use crate::surface::Surface;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanvasError {
    #[error("Unable to set a new operation while another has not yet completed")]
    OperationInProgress,
    #[error("No active operation to receive input")]
    NoActiveOperation,
    #[error(transparent)]
    Operation(#[from] OperationError),
}

/// Observer of canvas commits.
///
/// Receives the live operation that just completed, not the stored snapshot.
/// Called while that operation is locked, so implementations must not call
/// back into [`Canvas::render`] or [`Canvas::handle_input`].
pub trait CanvasListener: Send + Sync {
    fn operation_committed(&self, seq: u64, operation: &EditOperation);
}

/// The live operation slot, shared between the canvas and its renderer.
pub type SharedOperation = Arc<Mutex<EditOperation>>;

#[derive(Default)]
struct CanvasState {
    history: BTreeMap<u64, Arc<CommittedOperation>>,
    active: Option<SharedOperation>,
    listeners: Vec<Arc<dyn CanvasListener>>,
    /// Bumped on every repaint request.
    revision: u64,
}

impl CanvasState {
    fn append(&mut self, operation: Arc<CommittedOperation>) -> u64 {
        let seq = self.history.len() as u64;
        self.history.insert(seq, operation);
        self.revision += 1;
        seq
    }
}

/// Local drawing surface model.
pub struct Canvas {
    state: Mutex<CanvasState>,
    this: Weak<Canvas>,
}

impl Canvas {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            state: Mutex::new(CanvasState::default()),
            this: this.clone(),
        })
    }

    /// Make `operation` the input target.
    ///
    /// Fails if the current operation is still in progress; the canvas is
    /// left untouched in that case.
    pub fn set_active_operation(&self, mut operation: EditOperation) -> Result<(), CanvasError> {
        let previous = self.state().active.clone();
        if let Some(previous) = previous {
            let mut previous = lock(&previous);
            if previous.is_active() {
                return Err(CanvasError::OperationInProgress);
            }
            if let Some(me) = self.as_listener() {
                previous.remove_listener(&me);
            }
        }

        if let Some(me) = self.as_listener() {
            operation.add_listener(me);
        }
        log::debug!("Active operation set to {}", operation.kind());
        self.state().active = Some(Arc::new(Mutex::new(operation)));
        Ok(())
    }

    /// Route an input event to the active operation.
    ///
    /// A press on an already completed operation re-arms it first, so one
    /// selected tool serves any number of gestures.
    pub fn handle_input(&self, event: InputEvent) -> Result<(), CanvasError> {
        let active = self
            .state()
            .active
            .clone()
            .ok_or(CanvasError::NoActiveOperation)?;

        let mut operation = lock(&active);
        if operation.is_completed() && matches!(event, InputEvent::Press(_)) {
            *operation = operation.rearm();
        }
        operation.handle_input(event)?;
        Ok(())
    }

    /// Insert an operation that was completed elsewhere.
    ///
    /// Bypasses the state machine and does not notify canvas listeners.
    pub fn commit_remote_operation(&self, operation: CommittedOperation) -> u64 {
        let seq = self.state().append(Arc::new(operation));
        log::debug!("Committed remote operation #{seq}");
        seq
    }

    pub fn add_listener(&self, listener: Arc<dyn CanvasListener>) {
        self.state().listeners.push(listener);
    }

    pub fn remove_listener(&self, listener: &Arc<dyn CanvasListener>) -> bool {
        let mut state = self.state();
        let before = state.listeners.len();
        state
            .listeners
            .retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
        state.listeners.len() != before
    }

    /// Committed operations in sequence order.
    pub fn history(&self) -> Vec<(u64, Arc<CommittedOperation>)> {
        self.state()
            .history
            .iter()
            .map(|(seq, op)| (*seq, op.clone()))
            .collect()
    }

    pub fn get(&self, seq: u64) -> Option<Arc<CommittedOperation>> {
        self.state().history.get(&seq).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state().history.is_empty()
    }

    /// Monotonic counter of repaint requests; redraw when it changes.
    pub fn revision(&self) -> u64 {
        self.state().revision
    }

    pub fn active_kind(&self) -> Option<OperationKind> {
        let active = self.state().active.clone()?;
        let kind = lock(&active).kind();
        Some(kind)
    }

    pub fn active_phase(&self) -> Option<Phase> {
        let active = self.state().active.clone()?;
        let phase = lock(&active).phase();
        Some(phase)
    }

    /// Draw history in sequence order, then the active operation on top.
    ///
    /// Paints a whole frame: an active line shows its current segment only,
    /// without the rubber-band erase used for incremental repaints.
    pub fn render(&self, surface: &mut dyn Surface) {
        let (committed, active) = {
            let state = self.state();
            let committed: Vec<_> = state.history.values().cloned().collect();
            (committed, state.active.clone())
        };

        for operation in &committed {
            operation.render(surface);
        }
        if let Some(active) = active {
            let in_progress = {
                let operation = lock(&active);
                operation.is_active().then(|| operation.snapshot())
            };
            if let Some(frame) = in_progress {
                frame.render(surface);
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, CanvasState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn as_listener(&self) -> Option<Arc<dyn OperationListener>> {
        self.this
            .upgrade()
            .map(|canvas| canvas as Arc<dyn OperationListener>)
    }
}

impl OperationListener for Canvas {
    fn operation_event(&self, event: OperationEvent, operation: &EditOperation) {
        match event {
            OperationEvent::Started => {}
            OperationEvent::Progressed => self.state().revision += 1,
            OperationEvent::Completed => {
                let committed = Arc::new(operation.snapshot());
                let (seq, listeners) = {
                    let mut state = self.state();
                    let seq = state.append(committed);
                    (seq, state.listeners.clone())
                };
                log::debug!("Committed local {} operation #{seq}", operation.kind());
                for listener in &listeners {
                    listener.operation_committed(seq, operation);
                }
            }
        }
    }
}

fn lock(operation: &SharedOperation) -> MutexGuard<'_, EditOperation> {
    operation.lock().unwrap_or_else(PoisonError::into_inner)
}
