//! Toolbox: the operation kinds offered to the user.
//!
//! Pen is always available. An optional JSON config names additional kinds:
//!
//! ```json
//! { "operation_kinds": ["line"] }
//! ```
//!
//! Names are matched case-insensitively; unknown names are logged and
//! skipped, duplicates are ignored.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::Color;
use crate::operation::{EditOperation, OperationKind};

#[derive(Error, Debug)]
pub enum ToolboxError {
    #[error("Failed to read toolbox config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid toolbox config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolboxConfig {
    #[serde(default)]
    pub operation_kinds: Vec<String>,
}

impl ToolboxConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ToolboxError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ToolboxError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ToolboxError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Ordered, duplicate-free set of offered operation kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolbox {
    kinds: Vec<OperationKind>,
}

impl Default for Toolbox {
    fn default() -> Self {
        Self {
            kinds: vec![OperationKind::Pen],
        }
    }
}

impl Toolbox {
    pub fn from_config(config: &ToolboxConfig) -> Self {
        let mut toolbox = Self::default();
        for name in &config.operation_kinds {
            match name.parse::<OperationKind>() {
                Ok(kind) => {
                    if !toolbox.add(kind) {
                        log::debug!("Operation kind {kind} already offered");
                    }
                }
                Err(e) => log::warn!("{e}; skipping"),
            }
        }
        toolbox
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ToolboxError> {
        Ok(Self::from_config(&ToolboxConfig::load(path)?))
    }

    /// Offer `kind`. Returns false if a kind with the same name is present.
    pub fn add(&mut self, kind: OperationKind) -> bool {
        if self.kinds.iter().any(|k| k.name() == kind.name()) {
            return false;
        }
        self.kinds.push(kind);
        true
    }

    pub fn kinds(&self) -> &[OperationKind] {
        &self.kinds
    }

    pub fn offers(&self, kind: OperationKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Look up an offered kind by name.
    pub fn find(&self, name: &str) -> Option<OperationKind> {
        let kind = name.parse::<OperationKind>().ok()?;
        self.offers(kind).then_some(kind)
    }

    /// A fresh operation of an offered kind.
    pub fn create(&self, kind: OperationKind, color: Color) -> Option<EditOperation> {
        self.offers(kind)
            .then(|| EditOperation::new(kind).with_color(color))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_offers_pen_only() {
        let toolbox = Toolbox::default();
        assert_eq!(toolbox.kinds(), &[OperationKind::Pen]);
        assert!(toolbox.find("line").is_none());
        assert!(toolbox.create(OperationKind::Line, Color::BLACK).is_none());
    }

    #[test]
    fn test_config_adds_kinds_and_skips_unknown() {
        let config = ToolboxConfig {
            operation_kinds: vec!["Line".into(), "spray".into(), "LINE".into(), "pen".into()],
        };
        let toolbox = Toolbox::from_config(&config);
        assert_eq!(toolbox.kinds(), &[OperationKind::Pen, OperationKind::Line]);
        assert_eq!(toolbox.find("line"), Some(OperationKind::Line));
    }

    #[test]
    fn test_create_uses_color() {
        let toolbox = Toolbox::default();
        let red = Color::rgb(255, 0, 0);
        let op = toolbox.create(OperationKind::Pen, red).unwrap();
        assert_eq!(op.kind(), OperationKind::Pen);
        assert_eq!(op.color(), red);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "operation_kinds": ["line"] }}"#).unwrap();
        let toolbox = Toolbox::load(file.path()).unwrap();
        assert!(toolbox.offers(OperationKind::Line));
        assert!(toolbox.offers(OperationKind::Pen));
    }

    #[test]
    fn test_missing_field_defaults_empty() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();
        assert_eq!(Toolbox::load(file.path()).unwrap(), Toolbox::default());
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.json");
        assert!(matches!(Toolbox::load(&missing), Err(ToolboxError::Io { .. })));

        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "operation_kinds = line").unwrap();
        assert!(matches!(Toolbox::load(&bad), Err(ToolboxError::Parse { .. })));
    }
}
