//! # sketchwire-core: drawing model for sketchwire
//!
//! Turns press/drag/release input into edit operations and keeps the ordered
//! history a surface renders from.
//!
//! ```text
//!  InputEvent ──► EditOperation ──(Started/Progressed/Completed)──► Canvas
//!                 (Idle→Active→Completed)                            │
//!                                                       snapshot ──► history[seq]
//!                                                                    │
//!                                                                    ▼
//!                                                            CanvasListener
//!                                                          (e.g. replication)
//! ```
//!
//! ## Modules
//!
//! - [`geometry`]: points and colours
//! - [`operation`]: the edit-operation state machine and committed values
//! - [`canvas`]: ordered history, active operation, commit notifications
//! - [`surface`]: rendering trait and a software raster
//! - [`toolbox`]: operation kinds offered to the user

pub mod geometry;
pub mod operation;
pub mod canvas;
pub mod surface;
pub mod toolbox;

pub use geometry::{Color, Point};
pub use operation::{
    CommittedOperation, EditOperation, InputEvent, OperationError, OperationEvent,
    OperationKind, OperationListener, Phase, Shape, Transition, UnknownKind,
};
pub use canvas::{Canvas, CanvasError, CanvasListener, SharedOperation};
pub use surface::{Raster, Surface};
pub use toolbox::{Toolbox, ToolboxConfig, ToolboxError};
