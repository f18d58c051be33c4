//! Policy file loading.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use custodia_protocol::config::CustodiaConfig;

/// Read and validate a TOML policy file. `None` yields the defaults.
pub fn load(path: Option<&Path>) -> Result<CustodiaConfig> {
    let Some(path) = path else {
        return Ok(CustodiaConfig::default());
    };
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config: CustodiaConfig = toml::from_str(&text)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    tracing::debug!(path = %path.display(), "config loaded");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_path_uses_defaults() {
        assert_eq!(load(None).unwrap(), CustodiaConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file = write("[recovery]\nmax_attempts = 3\n\n[offline]\nrequired_confidence = 90.0\n");
        let config = load(Some(file.path())).unwrap();
        assert_eq!(config.recovery.max_attempts, 3);
        assert_eq!(config.offline.required_confidence, 90.0);
        assert_eq!(config.bundle, CustodiaConfig::default().bundle);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let file = write("[offline]\nemergency_threshold = 140.0\n");
        let err = load(Some(file.path())).unwrap_err();
        assert!(format!("{err:#}").contains("emergency_threshold"));
    }

    #[test]
    fn unreadable_path_names_the_file() {
        let err = load(Some(Path::new("/nonexistent/custodia.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/custodia.toml"));
    }
}
