//! Session state: the local canvas, the toolbox and the user's selections.
//!
//! Input arrives as text commands, one per line:
//!
//! ```text
//! tools                 list offered operation kinds
//! tool <kind>           select a kind (e.g. `tool line`)
//! color <r> <g> <b>     stroke colour for the selected tool
//! press|drag|release <x> <y>
//! history               list committed operations
//! save <file.ppm>       render the canvas to a PPM image
//! quit
//! ```

use std::fmt::Write as _;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use sketchwire_core::{
    Canvas, CanvasError, Color, InputEvent, OperationKind, Phase, Point, Raster, Shape, Toolbox,
};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Tools,
    Tool(String),
    Color(Color),
    Input(InputEvent),
    History,
    Save(PathBuf),
    Help,
    Quit,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command: {0} (try `help`)")]
    Unknown(String),
    #[error("Usage: {0}")]
    Usage(&'static str),
}

impl FromStr for Command {
    type Err = CommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let name = words.next().ok_or(CommandError::Empty)?;
        let args: Vec<&str> = words.collect();

        let point = |usage| match args.as_slice() {
            [x, y] => match (x.parse(), y.parse()) {
                (Ok(x), Ok(y)) => Ok(Point::new(x, y)),
                _ => Err(CommandError::Usage(usage)),
            },
            _ => Err(CommandError::Usage(usage)),
        };

        match name.to_ascii_lowercase().as_str() {
            "tools" => Ok(Self::Tools),
            "tool" => match args.as_slice() {
                [kind] => Ok(Self::Tool(kind.to_string())),
                _ => Err(CommandError::Usage("tool <kind>")),
            },
            "color" | "colour" => match args.as_slice() {
                [r, g, b] => match (r.parse(), g.parse(), b.parse()) {
                    (Ok(r), Ok(g), Ok(b)) => Ok(Self::Color(Color::rgb(r, g, b))),
                    _ => Err(CommandError::Usage("color <r> <g> <b> (0-255)")),
                },
                _ => Err(CommandError::Usage("color <r> <g> <b> (0-255)")),
            },
            "press" => Ok(Self::Input(InputEvent::Press(point("press <x> <y>")?))),
            "drag" => Ok(Self::Input(InputEvent::Drag(point("drag <x> <y>")?))),
            "release" => Ok(Self::Input(InputEvent::Release(point("release <x> <y>")?))),
            "history" => Ok(Self::History),
            "save" => match args.as_slice() {
                [path] => Ok(Self::Save(PathBuf::from(path))),
                _ => Err(CommandError::Usage("save <file.ppm>")),
            },
            "help" | "?" => Ok(Self::Help),
            "quit" | "exit" => Ok(Self::Quit),
            other => Err(CommandError::Unknown(other.to_string())),
        }
    }
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0} is not offered by the toolbox")]
    NotOffered(String),
    #[error(transparent)]
    Canvas(#[from] CanvasError),
    #[error("Failed to save {path}: {source}")]
    Save {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What the caller should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Continue(Option<String>),
    Quit,
}

pub struct Session {
    canvas: Arc<Canvas>,
    toolbox: Toolbox,
    color: Color,
    width: u32,
    height: u32,
}

impl Session {
    /// A session over `canvas`, with the first offered kind selected.
    pub fn new(canvas: Arc<Canvas>, toolbox: Toolbox, width: u32, height: u32) -> Self {
        let session = Self {
            canvas,
            toolbox,
            color: Color::BLACK,
            width,
            height,
        };
        if let Some(&kind) = session.toolbox.kinds().first() {
            if let Err(e) = session.select(kind) {
                log::warn!("Unable to select {kind}: {e}");
            }
        }
        session
    }

    pub fn execute(&mut self, command: Command) -> Result<Outcome, SessionError> {
        let reply = match command {
            Command::Tools => {
                let names: Vec<_> = self.toolbox.kinds().iter().map(|k| k.name()).collect();
                Some(names.join(", "))
            }
            Command::Tool(name) => {
                let kind = self
                    .toolbox
                    .find(&name)
                    .ok_or_else(|| SessionError::NotOffered(name.clone()))?;
                self.select(kind)?;
                Some(format!("{kind} selected"))
            }
            Command::Color(color) => {
                self.color = color;
                // Re-arm the current tool in the new colour unless mid-gesture.
                if let Some(kind) = self.canvas.active_kind() {
                    if self.canvas.active_phase() != Some(Phase::Active) {
                        self.select(kind)?;
                    }
                }
                None
            }
            Command::Input(event) => {
                self.canvas.handle_input(event)?;
                None
            }
            Command::History => Some(self.describe_history()),
            Command::Save(path) => {
                let mut raster = Raster::new(self.width, self.height);
                self.canvas.render(&mut raster);
                raster
                    .save_ppm(&path)
                    .map_err(|source| SessionError::Save {
                        path: path.clone(),
                        source,
                    })?;
                Some(format!("Saved {}", path.display()))
            }
            Command::Help => Some(
                "tools | tool <kind> | color <r> <g> <b> | press|drag|release <x> <y> | history | save <file.ppm> | quit"
                    .to_string(),
            ),
            Command::Quit => return Ok(Outcome::Quit),
        };
        Ok(Outcome::Continue(reply))
    }

    pub fn canvas(&self) -> &Arc<Canvas> {
        &self.canvas
    }

    fn select(&self, kind: OperationKind) -> Result<(), SessionError> {
        let operation = self
            .toolbox
            .create(kind, self.color)
            .ok_or_else(|| SessionError::NotOffered(kind.to_string()))?;
        self.canvas.set_active_operation(operation)?;
        Ok(())
    }

    fn describe_history(&self) -> String {
        let history = self.canvas.history();
        if history.is_empty() {
            return "(empty)".to_string();
        }
        let mut out = String::new();
        for (seq, op) in history {
            let c = op.color;
            let _ = match &op.shape {
                Shape::Line { start, end } => writeln!(
                    out,
                    "#{seq} Line ({}, {}) -> ({}, {}) rgb({}, {}, {})",
                    start.x, start.y, end.x, end.y, c.r, c.g, c.b
                ),
                Shape::Pen { points } => writeln!(
                    out,
                    "#{seq} Pen {} points rgb({}, {}, {})",
                    points.len(),
                    c.r,
                    c.g,
                    c.b
                ),
            };
        }
        out.truncate(out.trim_end().len());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sketchwire_core::{CommittedOperation, ToolboxConfig};

    fn session_with_line() -> Session {
        let toolbox = Toolbox::from_config(&ToolboxConfig {
            operation_kinds: vec!["line".into()],
        });
        Session::new(Canvas::new(), toolbox, 64, 64)
    }

    fn run(session: &mut Session, line: &str) -> Outcome {
        session.execute(line.parse().unwrap()).unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!("tools".parse::<Command>().unwrap(), Command::Tools);
        assert_eq!("TOOL line".parse::<Command>().unwrap(), Command::Tool("line".into()));
        assert_eq!(
            "press 3 -4".parse::<Command>().unwrap(),
            Command::Input(InputEvent::Press(Point::new(3, -4)))
        );
        assert_eq!(
            "color 255 0 10".parse::<Command>().unwrap(),
            Command::Color(Color::rgb(255, 0, 10))
        );
        assert_eq!("save out.ppm".parse::<Command>().unwrap(), Command::Save("out.ppm".into()));
        assert_eq!("quit".parse::<Command>().unwrap(), Command::Quit);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!("   ".parse::<Command>(), Err(CommandError::Empty));
        assert_eq!("spray".parse::<Command>(), Err(CommandError::Unknown("spray".into())));
        assert!(matches!("press 1".parse::<Command>(), Err(CommandError::Usage(_))));
        assert!(matches!("color 300 0 0".parse::<Command>(), Err(CommandError::Usage(_))));
    }

    #[test]
    fn test_pen_selected_by_default() {
        let session = Session::new(Canvas::new(), Toolbox::default(), 8, 8);
        assert_eq!(session.canvas().active_kind(), Some(OperationKind::Pen));
    }

    #[test]
    fn test_draw_line_through_commands() {
        let mut session = session_with_line();
        run(&mut session, "tool line");
        run(&mut session, "press 10 10");
        run(&mut session, "drag 30 30");
        run(&mut session, "release 50 50");

        let canvas = session.canvas();
        assert_eq!(canvas.len(), 1);
        assert_eq!(
            *canvas.get(0).unwrap(),
            CommittedOperation::line(Point::new(10, 10), Point::new(50, 50), Color::BLACK)
        );
        assert_eq!(
            run(&mut session, "history"),
            Outcome::Continue(Some("#0 Line (10, 10) -> (50, 50) rgb(0, 0, 0)".into()))
        );
    }

    #[test]
    fn test_tool_not_offered() {
        let mut session = Session::new(Canvas::new(), Toolbox::default(), 8, 8);
        let err = session.execute(Command::Tool("line".into())).unwrap_err();
        assert!(matches!(err, SessionError::NotOffered(_)));
    }

    #[test]
    fn test_switching_tool_mid_gesture_fails() {
        let mut session = session_with_line();
        run(&mut session, "press 0 0");
        let err = session.execute(Command::Tool("line".into())).unwrap_err();
        assert!(matches!(err, SessionError::Canvas(CanvasError::OperationInProgress)));
        assert_eq!(session.canvas().active_kind(), Some(OperationKind::Pen));
    }

    #[test]
    fn test_color_applies_to_next_gesture() {
        let mut session = session_with_line();
        let red = Color::rgb(255, 0, 0);
        run(&mut session, "color 255 0 0");
        assert_eq!(session.color, red);
        run(&mut session, "press 1 1");
        run(&mut session, "release 4 4");
        assert_eq!(session.canvas().get(0).unwrap().color, red);
    }

    #[test]
    fn test_repeated_gestures_with_one_tool() {
        let mut session = session_with_line();
        for _ in 0..3 {
            run(&mut session, "press 0 0");
            run(&mut session, "drag 1 1");
            run(&mut session, "release 2 2");
        }
        assert_eq!(session.canvas().len(), 3);
    }

    #[test]
    fn test_save_renders_canvas() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canvas.ppm");
        let mut session = session_with_line();
        run(&mut session, "tool line");
        run(&mut session, "press 0 0");
        run(&mut session, "release 10 0");

        let outcome = session.execute(Command::Save(path.clone())).unwrap();
        assert!(matches!(outcome, Outcome::Continue(Some(_))));
        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"P6\n64 64\n255\n"));
    }

    #[test]
    fn test_quit() {
        let mut session = session_with_line();
        assert_eq!(run(&mut session, "quit"), Outcome::Quit);
    }
}
