//! Configuration file handling
//!
//! The file is plain TOML mirroring `ServerConfig`:
//!
//! ```toml
//! bind = "0.0.0.0"
//! port = 4196
//! heartbeat_timeout_secs = 300
//!
//! [tcp]
//! keepalive_secs = 60
//! ```

use anyhow::{Context, Result};
use ghoma_server::ServerConfig;
use std::path::{Path, PathBuf};

/// Load the server configuration.
///
/// An explicit path must exist. Without one, the default location is used
/// when present and built-in defaults otherwise.
pub fn load(explicit: Option<&Path>) -> Result<ServerConfig> {
    match explicit {
        Some(path) => load_file(path),
        None => match default_config_file() {
            Some(path) if path.exists() => load_file(&path),
            _ => Ok(ServerConfig::default()),
        },
    }
}

pub fn load_file(path: &Path) -> Result<ServerConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// `<config dir>/ghoma/config.toml`
pub fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("ghoma").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 5000\nheartbeat_timeout_secs = 30\n\n[tcp]\nnodelay = false").unwrap();

        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.heartbeat_timeout_secs, 30);
        assert!(!config.tcp.nodelay);
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.handshake_timeout_secs, 60);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number\"").unwrap();
        let err = load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
