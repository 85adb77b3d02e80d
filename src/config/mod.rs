//! Configuration loading and validation.
//!
//! A config file is optional: [`load_file`] parses one (format picked by
//! extension) and returns it with a SHA-256 content hash. Command-line
//! flags are applied on top by [`crate::cli::RunArgs::apply`], and only the
//! merged result goes through [`validation::validate`]. Submodules provide
//! the data model and validation logic.

pub mod model;
pub mod validation;

use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::TeeError;
use model::Config;

/// Parse a config string based on file extension.
pub fn parse_config_str(ext: &str, content: &str, path_display: &str) -> Result<Config, TeeError> {
    match ext {
        #[cfg(feature = "yaml")]
        "yaml" | "yml" => serde_yml::from_str(content).map_err(|e| TeeError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        #[cfg(feature = "json")]
        "json" => serde_json::from_str(content).map_err(|e| TeeError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        #[cfg(feature = "toml")]
        "toml" => toml::from_str(content).map_err(|e| TeeError::ConfigParse {
            path: path_display.to_string(),
            source: Box::new(e),
        }),

        other => Err(TeeError::UnsupportedFormat(other.to_string())),
    }
}

/// Compute a lowercase hex-encoded SHA-256 digest.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Read and parse a config file, returning it with its content hash.
///
/// Not validated here: flags may still complete or correct it.
pub async fn load_file(path: &Path) -> Result<(Config, String), TeeError> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            TeeError::ConfigFileNotFound {
                path: path.to_path_buf(),
            }
        } else {
            TeeError::Io(e)
        }
    })?;

    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let config = parse_config_str(ext, &content, &path.display().to_string())?;
    Ok((config, sha256_hex(content.as_bytes())))
}

/// Version of a fully resolved config (file plus flags), for the health report.
#[must_use]
pub fn fingerprint(config: &Config) -> String {
    sha256_hex(&serde_json::to_vec(config).unwrap_or_default())
}
