use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::warn;

const DEFAULT_REGION: &str = "us-east-1";
const CONTAINER_PREFIX: &str = "dspace-asset-";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BitStoreConfig {
    /// Provider identifier: `s3`, `aws-s3`, `b2`, `minio`, `transient` or
    /// `directory`.
    #[serde(default)]
    pub backend: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub container: Option<String>,
    #[serde(default)]
    pub subfolder: Option<String>,
    /// Site hostname used to derive a default container name.
    #[serde(default)]
    pub site_hostname: Option<String>,
    #[serde(default)]
    pub staging_dir: Option<PathBuf>,
    /// Base directory for the `directory` backend.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl BitStoreConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        let mut config: BitStoreConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Fill blank credentials from `BITSTORE_ACCESS_KEY` / `BITSTORE_SECRET_KEY`.
    pub fn apply_env(&mut self) {
        if self.access_key.trim().is_empty() {
            self.access_key = std::env::var("BITSTORE_ACCESS_KEY").unwrap_or_default();
        }
        if self.secret_key.trim().is_empty() {
            self.secret_key = std::env::var("BITSTORE_SECRET_KEY").unwrap_or_default();
        }
    }

    /// Structural problems are errors. Missing credentials are not, so that
    /// anonymous or public stores stay usable; `init` warns about them.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend == "directory" && self.directory.is_none() {
            anyhow::bail!("directory backend requires a `directory` path");
        }
        if let Some(dir) = &self.staging_dir {
            if !dir.is_absolute() {
                anyhow::bail!("staging_dir must be absolute: {}", dir.display());
            }
        }
        if let Some(ep) = &self.endpoint {
            if !(ep.starts_with("http://") || ep.starts_with("https://")) {
                anyhow::bail!("endpoint must be an http(s) URL: {}", ep);
            }
        }
        Ok(())
    }

    pub fn region(&self) -> &str {
        self.region.as_deref().unwrap_or(DEFAULT_REGION)
    }

    pub fn has_credentials(&self) -> bool {
        !self.access_key.trim().is_empty() && !self.secret_key.trim().is_empty()
    }

    /// The configured container, or `dspace-asset-{site hostname}`.
    pub fn resolve_container(&self) -> String {
        if let Some(name) = self.container.as_deref().filter(|c| !c.trim().is_empty()) {
            return name.to_string();
        }
        let host = self
            .site_hostname
            .clone()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(machine_hostname);
        let name = default_container_name(&host);
        warn!(container = %name, "Container is not configured, using default");
        name
    }
}

/// S3 bucket names are lowercase; hostnames usually already are.
pub fn default_container_name(hostname: &str) -> String {
    format!("{}{}", CONTAINER_PREFIX, hostname.trim().to_lowercase())
}

fn machine_hostname() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_config() {
        let toml_str = r#"
backend = "s3"
endpoint = "http://localhost:9000"
access_key = "minioadmin"
secret_key = "minioadmin"
container = "repository"
subfolder = "assets"
"#;
        let config: BitStoreConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert_eq!(config.backend, "s3");
        assert_eq!(config.region(), "us-east-1");
        assert_eq!(config.resolve_container(), "repository");
        assert_eq!(config.subfolder.as_deref(), Some("assets"));
        assert!(config.has_credentials());
    }

    #[test]
    fn test_blank_credentials_are_not_fatal() {
        let toml_str = r#"
backend = "s3"
container = "public-assets"
"#;
        let config: BitStoreConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_default_container_from_site_hostname() {
        let config = BitStoreConfig {
            backend: "transient".to_string(),
            site_hostname: Some("Repo.Example.org".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_container(), "dspace-asset-repo.example.org");
    }

    #[test]
    fn test_blank_container_uses_default() {
        let config = BitStoreConfig {
            container: Some("  ".to_string()),
            site_hostname: Some("repo".to_string()),
            ..Default::default()
        };
        assert_eq!(config.resolve_container(), "dspace-asset-repo");
    }

    #[test]
    fn test_directory_backend_requires_path() {
        let config: BitStoreConfig = toml::from_str(r#"backend = "directory""#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relative_staging_dir_rejected() {
        let toml_str = r#"
backend = "transient"
staging_dir = "relative/tmp"
"#;
        let config: BitStoreConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_must_be_url() {
        let toml_str = r#"
backend = "s3"
endpoint = "localhost:9000"
"#;
        let config: BitStoreConfig = toml::from_str(toml_str).unwrap();
        assert!(config.validate().is_err());
    }
}
