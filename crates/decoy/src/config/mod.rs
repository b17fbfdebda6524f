//! Server configuration: command line options and the optional imposters file.

mod cli;

pub use cli::Args;

use crate::admin_api::ImpostersEnvelope;
use crate::imposter::ImposterConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file '{path}': {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Load the imposters declared in a JSON or YAML file shaped like
/// `{"imposters": [...]}`.
pub fn load_imposters<P: AsRef<Path>>(path: P) -> Result<Vec<ImposterConfig>, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_imposters(&contents, path)
}

fn parse_imposters(contents: &str, path: &Path) -> Result<Vec<ImposterConfig>, ConfigError> {
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let envelope: ImpostersEnvelope = if is_json {
        serde_json::from_str(contents).map_err(|e| e.to_string())
    } else {
        serde_yaml::from_str(contents).map_err(|e| e.to_string())
    }
    .map_err(|message| ConfigError::Parse {
        path: path.to_path_buf(),
        message,
    })?;
    Ok(envelope.imposters)
}
