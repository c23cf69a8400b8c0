//! Edit operations: one user-authored drawing action each.
//!
//! An [`EditOperation`] is the live, input-capturing builder. It moves through
//! `Idle → Active → Completed` as press/drag/release events arrive and reports
//! every transition to its [`OperationListener`]s. When it completes, the
//! owner captures a [`CommittedOperation`] via [`EditOperation::snapshot`]:
//! an independent value holding only the kind tag, final geometry and stroke
//! colour. Committed values are what the canvas stores and what goes over the
//! wire; listener lists never leave the live instance.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::{Color, Point};
use crate::surface::Surface;

/// The kinds of drawing action on offer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Point-to-point straight line.
    Line,
    /// Freehand stroke.
    Pen,
}

impl OperationKind {
    pub const ALL: [OperationKind; 2] = [OperationKind::Line, OperationKind::Pen];

    /// Display name, also used to deduplicate tools.
    pub fn name(self) -> &'static str {
        match self {
            Self::Line => "Line",
            Self::Pen => "Pen",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OperationKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown operation kind: {0}")]
pub struct UnknownKind(pub String);

/// Lifecycle phase of an [`EditOperation`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Active,
    Completed,
}

/// Requested state-machine transition, reported in errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Begin,
    Progress,
    Complete,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OperationError {
    #[error("Invalid transition: cannot {attempted:?} an operation that is {phase:?}")]
    InvalidTransition { phase: Phase, attempted: Transition },
}

/// Lifecycle notifications delivered to [`OperationListener`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationEvent {
    Started,
    Progressed,
    Completed,
}

/// Discrete input delivered to the operation capturing a gesture.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    Press(Point),
    Drag(Point),
    Release(Point),
}

/// Observer of an operation's lifecycle.
///
/// Called synchronously on the thread driving the operation, in registration
/// order, after the transition has been applied.
pub trait OperationListener: Send + Sync {
    fn operation_event(&self, event: OperationEvent, operation: &EditOperation);
}

/// Final geometry of a committed operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shape {
    Line { start: Point, end: Point },
    Pen { points: Vec<Point> },
}

/// Immutable committed copy of an operation. The only form that is stored
/// in history or transmitted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedOperation {
    pub shape: Shape,
    pub color: Color,
}

impl CommittedOperation {
    pub fn line(start: Point, end: Point, color: Color) -> Self {
        Self {
            shape: Shape::Line { start, end },
            color,
        }
    }

    pub fn pen(points: Vec<Point>, color: Color) -> Self {
        Self {
            shape: Shape::Pen { points },
            color,
        }
    }

    pub fn kind(&self) -> OperationKind {
        match self.shape {
            Shape::Line { .. } => OperationKind::Line,
            Shape::Pen { .. } => OperationKind::Pen,
        }
    }

    /// Draw the final geometry once.
    pub fn render(&self, surface: &mut dyn Surface) {
        let previous = surface.color();
        surface.set_color(self.color);
        match &self.shape {
            Shape::Line { start, end } => surface.draw_line(*start, *end),
            Shape::Pen { points } => surface.draw_polyline(points),
        }
        surface.set_color(previous);
    }
}

#[derive(Clone, Debug)]
enum Geometry {
    Line {
        start: Point,
        end: Point,
        // End point before the latest drag, erased on the next render.
        former_end: Point,
    },
    Pen {
        points: Vec<Point>,
    },
}

impl Geometry {
    fn empty(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Line => Self::Line {
                start: Point::default(),
                end: Point::default(),
                former_end: Point::default(),
            },
            OperationKind::Pen => Self::Pen { points: Vec::new() },
        }
    }
}

/// A live drawing action driven by input events.
pub struct EditOperation {
    kind: OperationKind,
    phase: Phase,
    geometry: Geometry,
    color: Color,
    listeners: Vec<Arc<dyn OperationListener>>,
}

impl EditOperation {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            phase: Phase::Idle,
            geometry: Geometry::empty(kind),
            color: Color::default(),
            listeners: Vec::new(),
        }
    }

    pub fn with_color(mut self, color: Color) -> Self {
        self.color = color;
        self
    }

    /// A fresh `Idle` operation with the same kind, colour and listeners.
    pub fn rearm(&self) -> Self {
        Self {
            kind: self.kind,
            phase: Phase::Idle,
            geometry: Geometry::empty(self.kind),
            color: self.color,
            listeners: self.listeners.clone(),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }

    pub fn add_listener(&mut self, listener: Arc<dyn OperationListener>) {
        self.listeners.push(listener);
    }

    /// Remove a previously added listener. Returns whether it was registered.
    pub fn remove_listener(&mut self, listener: &Arc<dyn OperationListener>) -> bool {
        let before = self.listeners.len();
        self.listeners
            .retain(|l| !std::ptr::addr_eq(Arc::as_ptr(l), Arc::as_ptr(listener)));
        self.listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Start the gesture at `p`.
    pub fn begin(&mut self, p: Point) -> Result<(), OperationError> {
        self.expect_phase(Phase::Idle, Transition::Begin)?;
        self.geometry = match self.kind {
            OperationKind::Line => Geometry::Line {
                start: p,
                end: p,
                former_end: p,
            },
            OperationKind::Pen => Geometry::Pen { points: vec![p] },
        };
        self.phase = Phase::Active;
        self.notify(OperationEvent::Started);
        Ok(())
    }

    /// Extend the gesture to `p`.
    pub fn progress(&mut self, p: Point) -> Result<(), OperationError> {
        self.expect_phase(Phase::Active, Transition::Progress)?;
        match &mut self.geometry {
            Geometry::Line {
                end, former_end, ..
            } => {
                *former_end = *end;
                *end = p;
            }
            Geometry::Pen { points } => points.push(p),
        }
        self.notify(OperationEvent::Progressed);
        Ok(())
    }

    /// Finish the gesture at `p`. Geometry is frozen afterwards.
    pub fn complete(&mut self, p: Point) -> Result<(), OperationError> {
        self.expect_phase(Phase::Active, Transition::Complete)?;
        match &mut self.geometry {
            Geometry::Line {
                end, former_end, ..
            } => {
                *former_end = *end;
                *end = p;
            }
            Geometry::Pen { points } => points.push(p),
        }
        self.phase = Phase::Completed;
        self.notify(OperationEvent::Completed);
        Ok(())
    }

    /// Map `press → begin`, `drag → progress`, `release → complete`.
    pub fn handle_input(&mut self, event: InputEvent) -> Result<(), OperationError> {
        match event {
            InputEvent::Press(p) => self.begin(p),
            InputEvent::Drag(p) => self.progress(p),
            InputEvent::Release(p) => self.complete(p),
        }
    }

    /// Deep copy of the current geometry. Legal in any phase.
    pub fn snapshot(&self) -> CommittedOperation {
        let shape = match &self.geometry {
            Geometry::Line { start, end, .. } => Shape::Line {
                start: *start,
                end: *end,
            },
            Geometry::Pen { points } => Shape::Pen {
                points: points.clone(),
            },
        };
        CommittedOperation {
            shape,
            color: self.color,
        }
    }

    /// Draw progress while active, the final geometry once completed, and
    /// nothing while idle.
    pub fn render(&self, surface: &mut dyn Surface) {
        match self.phase {
            Phase::Idle => {}
            Phase::Completed => self.snapshot().render(surface),
            Phase::Active => {
                let previous = surface.color();
                match &self.geometry {
                    Geometry::Line {
                        start,
                        end,
                        former_end,
                    } => {
                        // Only the rubber band changes between frames.
                        surface.set_color(surface.background());
                        surface.draw_line(*start, *former_end);
                        surface.set_color(self.color);
                        surface.draw_line(*start, *end);
                    }
                    Geometry::Pen { points } => {
                        surface.set_color(self.color);
                        surface.draw_polyline(points);
                    }
                }
                surface.set_color(previous);
            }
        }
    }

    fn expect_phase(&self, expected: Phase, attempted: Transition) -> Result<(), OperationError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(OperationError::InvalidTransition {
                phase: self.phase,
                attempted,
            })
        }
    }

    fn notify(&self, event: OperationEvent) {
        log::trace!("{} operation: {event:?}", self.kind);
        for listener in &self.listeners {
            listener.operation_event(event, self);
        }
    }
}

impl fmt::Debug for EditOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditOperation")
            .field("kind", &self.kind)
            .field("phase", &self.phase)
            .field("geometry", &self.geometry)
            .field("color", &self.color)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Raster;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<(OperationEvent, Phase)>>,
    }

    impl Recorder {
        fn events(&self) -> Vec<OperationEvent> {
            self.events.lock().unwrap().iter().map(|(e, _)| *e).collect()
        }
    }

    impl OperationListener for Recorder {
        fn operation_event(&self, event: OperationEvent, operation: &EditOperation) {
            self.events.lock().unwrap().push((event, operation.phase()));
        }
    }

    fn p(x: i32, y: i32) -> Point {
        Point::new(x, y)
    }

    #[test]
    fn test_full_gesture_emits_one_completed() {
        let recorder = Arc::new(Recorder::default());
        let mut op = EditOperation::new(OperationKind::Pen);
        op.add_listener(recorder.clone());

        op.begin(p(0, 0)).unwrap();
        op.progress(p(1, 1)).unwrap();
        op.progress(p(2, 2)).unwrap();
        op.complete(p(3, 3)).unwrap();

        assert_eq!(
            recorder.events(),
            vec![
                OperationEvent::Started,
                OperationEvent::Progressed,
                OperationEvent::Progressed,
                OperationEvent::Completed,
            ]
        );

        // Nothing after completion.
        assert!(op.progress(p(4, 4)).is_err());
        assert!(op.complete(p(4, 4)).is_err());
        assert!(op.begin(p(4, 4)).is_err());
        assert_eq!(recorder.events().len(), 4);
    }

    #[test]
    fn test_listeners_observe_post_transition_phase() {
        let recorder = Arc::new(Recorder::default());
        let mut op = EditOperation::new(OperationKind::Line);
        op.add_listener(recorder.clone());
        op.begin(p(0, 0)).unwrap();
        op.complete(p(5, 5)).unwrap();

        let seen = recorder.events.lock().unwrap().clone();
        assert_eq!(seen[0], (OperationEvent::Started, Phase::Active));
        assert_eq!(seen[1], (OperationEvent::Completed, Phase::Completed));
    }

    #[test]
    fn test_double_begin_is_invalid() {
        let mut op = EditOperation::new(OperationKind::Line);
        op.begin(p(1, 1)).unwrap();
        let err = op.begin(p(2, 2)).unwrap_err();
        assert_eq!(
            err,
            OperationError::InvalidTransition {
                phase: Phase::Active,
                attempted: Transition::Begin,
            }
        );
        // State unchanged.
        assert!(op.is_active());
        assert_eq!(op.snapshot(), CommittedOperation::line(p(1, 1), p(1, 1), Color::BLACK));
    }

    #[test]
    fn test_progress_and_complete_require_active() {
        let mut op = EditOperation::new(OperationKind::Pen);
        assert!(matches!(
            op.progress(p(0, 0)),
            Err(OperationError::InvalidTransition { phase: Phase::Idle, attempted: Transition::Progress })
        ));
        assert!(matches!(
            op.complete(p(0, 0)),
            Err(OperationError::InvalidTransition { phase: Phase::Idle, attempted: Transition::Complete })
        ));
        assert_eq!(op.phase(), Phase::Idle);
    }

    #[test]
    fn test_line_geometry() {
        let mut op = EditOperation::new(OperationKind::Line);
        op.handle_input(InputEvent::Press(p(10, 10))).unwrap();
        op.handle_input(InputEvent::Drag(p(30, 30))).unwrap();
        op.handle_input(InputEvent::Release(p(50, 50))).unwrap();

        let committed = op.snapshot();
        assert_eq!(committed.kind(), OperationKind::Line);
        assert_eq!(committed.shape, Shape::Line { start: p(10, 10), end: p(50, 50) });
    }

    #[test]
    fn test_pen_captures_every_point() {
        let mut op = EditOperation::new(OperationKind::Pen);
        op.begin(p(0, 0)).unwrap();
        for i in 1..100 {
            op.progress(p(i, i * 2)).unwrap();
        }
        op.complete(p(100, 200)).unwrap();

        match op.snapshot().shape {
            Shape::Pen { points } => {
                assert_eq!(points.len(), 101);
                assert_eq!(points[0], p(0, 0));
                assert_eq!(points[100], p(100, 200));
            }
            other => panic!("Expected pen shape, got {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_is_independent_of_live_operation() {
        let mut op = EditOperation::new(OperationKind::Pen);
        op.begin(p(0, 0)).unwrap();
        let early = op.snapshot();
        op.progress(p(5, 5)).unwrap();
        assert_eq!(early, CommittedOperation::pen(vec![p(0, 0)], Color::BLACK));
        assert_ne!(early, op.snapshot());
    }

    #[test]
    fn test_snapshot_of_idle_operation() {
        let op = EditOperation::new(OperationKind::Pen);
        assert_eq!(op.snapshot(), CommittedOperation::pen(Vec::new(), Color::BLACK));
    }

    #[test]
    fn test_remove_listener() {
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let a_dyn: Arc<dyn OperationListener> = a.clone();

        let mut op = EditOperation::new(OperationKind::Line);
        op.add_listener(a_dyn.clone());
        op.add_listener(b.clone());
        assert!(op.remove_listener(&a_dyn));
        assert!(!op.remove_listener(&a_dyn));
        assert_eq!(op.listener_count(), 1);

        op.begin(p(0, 0)).unwrap();
        assert!(a.events().is_empty());
        assert_eq!(b.events(), vec![OperationEvent::Started]);
    }

    #[test]
    fn test_rearm_keeps_kind_color_and_listeners() {
        let recorder = Arc::new(Recorder::default());
        let red = Color::rgb(200, 0, 0);
        let mut op = EditOperation::new(OperationKind::Line).with_color(red);
        op.add_listener(recorder.clone());
        op.begin(p(0, 0)).unwrap();
        op.complete(p(1, 0)).unwrap();

        let mut next = op.rearm();
        assert_eq!(next.phase(), Phase::Idle);
        assert_eq!(next.kind(), OperationKind::Line);
        assert_eq!(next.color(), red);
        assert_eq!(next.listener_count(), 1);

        next.begin(p(3, 3)).unwrap();
        assert_eq!(recorder.events().len(), 3);
    }

    #[test]
    fn test_line_rubber_band_erases_previous_segment() {
        let mut surface = Raster::new(64, 64);
        let mut op = EditOperation::new(OperationKind::Line);
        op.begin(p(0, 0)).unwrap();
        op.progress(p(0, 40)).unwrap();
        op.render(&mut surface);
        assert_eq!(surface.pixel(0, 40), Some(Color::BLACK));

        op.progress(p(40, 0)).unwrap();
        op.render(&mut surface);
        // Old vertical segment erased except the shared start pixel.
        assert_eq!(surface.pixel(0, 40), Some(Color::WHITE));
        assert_eq!(surface.pixel(40, 0), Some(Color::BLACK));
        assert_eq!(surface.count(Color::BLACK), 41);
    }

    #[test]
    fn test_render_restores_surface_color() {
        let mut surface = Raster::new(16, 16);
        let blue = Color::rgb(0, 0, 255);
        let mut op = EditOperation::new(OperationKind::Pen).with_color(blue);
        op.begin(p(1, 1)).unwrap();
        op.progress(p(5, 1)).unwrap();
        op.render(&mut surface);
        assert_eq!(surface.color(), Color::BLACK);
        assert_eq!(surface.count(blue), 5);
    }

    #[test]
    fn test_idle_operation_renders_nothing() {
        let mut surface = Raster::new(8, 8);
        EditOperation::new(OperationKind::Line).render(&mut surface);
        assert_eq!(surface.count(Color::WHITE), 64);
    }

    #[test]
    fn test_committed_render_matches_completed_render() {
        let mut op = EditOperation::new(OperationKind::Pen);
        op.begin(p(2, 2)).unwrap();
        op.progress(p(10, 12)).unwrap();
        op.complete(p(20, 4)).unwrap();

        let mut live = Raster::new(32, 32);
        let mut committed = Raster::new(32, 32);
        op.render(&mut live);
        op.snapshot().render(&mut committed);
        assert_eq!(live, committed);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!("line".parse::<OperationKind>().unwrap(), OperationKind::Line);
        assert_eq!(" PEN ".parse::<OperationKind>().unwrap(), OperationKind::Pen);
        assert_eq!(
            "spray".parse::<OperationKind>().unwrap_err(),
            UnknownKind("spray".to_string())
        );
        assert_eq!(OperationKind::Line.to_string(), "Line");
    }
}
