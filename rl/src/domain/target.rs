//! Target domain type
//!
//! A target name resolves through the layout templates into the four paths a
//! run works with. Paths are stored relative to the repository root.

use std::path::{Component, Path, PathBuf};

use handlebars::Handlebars;
use serde::Serialize;
use tracing::debug;

use crate::config::{ConfigError, LayoutConfig};

/// The unit of work a run repairs toward
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    /// Target name (e.g. "icici")
    pub name: String,

    /// Repository root every other path is relative to
    pub root: PathBuf,

    /// Source input data
    pub input: PathBuf,

    /// Expected output reference
    pub expected: PathBuf,

    /// Generated module
    pub module: PathBuf,

    /// Generated test
    pub test: PathBuf,
}

impl Target {
    /// Resolve a target name against the layout conventions
    pub fn resolve(name: &str, root: impl Into<PathBuf>, layout: &LayoutConfig) -> Result<Self, ConfigError> {
        debug!(%name, "Target::resolve: called");
        if !is_valid_name(name) {
            debug!(%name, "Target::resolve: invalid name");
            return Err(ConfigError::InvalidTargetName(name.to_string()));
        }

        let mut hbs = Handlebars::new();
        hbs.set_strict_mode(true);
        hbs.register_escape_fn(handlebars::no_escape);
        let data = serde_json::json!({ "target": name });

        let render = |template: &str| -> Result<PathBuf, ConfigError> {
            let rendered = hbs
                .render_template(template, &data)
                .map_err(|e| ConfigError::Layout {
                    template: template.to_string(),
                    message: e.to_string(),
                })?;
            let layout_err = |message: &str| ConfigError::Layout {
                template: template.to_string(),
                message: message.to_string(),
            };

            // Same shape the oracle's paths are normalized to, so keys compare equal
            let mut path = PathBuf::new();
            for component in Path::new(&rendered).components() {
                match component {
                    Component::Normal(part) => path.push(part),
                    Component::CurDir => {}
                    Component::ParentDir => {
                        return Err(layout_err("layout paths must stay inside the repository root"));
                    }
                    Component::RootDir | Component::Prefix(_) => {
                        return Err(layout_err("layout paths must be relative to the repository root"));
                    }
                }
            }
            if path.as_os_str().is_empty() {
                return Err(layout_err("layout paths must not be empty"));
            }
            Ok(path)
        };

        let target = Self {
            name: name.to_string(),
            root: root.into(),
            input: render(&layout.input)?,
            expected: render(&layout.expected)?,
            module: render(&layout.module)?,
            test: render(&layout.test)?,
        };

        if target.module == target.test {
            return Err(ConfigError::Layout {
                template: layout.test.clone(),
                message: "module and test must resolve to different paths".to_string(),
            });
        }

        debug!(?target, "Target::resolve: resolved");
        Ok(target)
    }

    /// Absolute location of a root-relative path
    pub fn abs(&self, rel: &Path) -> PathBuf {
        self.root.join(rel)
    }

    /// The two files every proposed patch must contain, module first
    pub fn artifacts(&self) -> [&Path; 2] {
        [&self.module, &self.test]
    }
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
