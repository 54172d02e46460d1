use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::geo::Rect;
use crate::interpreter::InterpreterOptions;

/// Settings for a document pass, read from a JSON file.
///
/// ```json
/// {
///   "interpreter": { "malformed_policy": "abort", "descend_forms": false },
///   "compress": true,
///   "max_font_size": 20.0,
///   "regions": [{ "x0": 0, "y0": 0, "x1": 300, "y1": 400 }]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub interpreter: InterpreterOptions,
    /// Flate-compress rewritten content streams.
    pub compress: bool,
    /// Threshold used by `strip-large-text` when no flag is given.
    pub max_font_size: f32,
    /// Regions used by `split` when no flag is given.
    pub regions: Vec<Rect>,
}

impl Default for EditorConfig {
    fn default() -> Self {
        EditorConfig {
            interpreter: InterpreterOptions::default(),
            compress: true,
            max_font_size: 20.0,
            regions: Vec::new(),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn load_config(path: impl AsRef<Path>) -> Result<EditorConfig, ConfigError> {
    let path = path.as_ref();
    let display = path.display().to_string();
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: display.clone(),
        source,
    })?;
    let config = parse_config(&text).map_err(|source| ConfigError::Parse {
        path: display,
        source,
    })?;
    debug!(?config, "loaded config");
    Ok(config)
}

pub fn parse_config(text: &str) -> Result<EditorConfig, serde_json::Error> {
    serde_json::from_str(text)
}
