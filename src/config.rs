//! Configuration Management
//!
//! Handles persistent configuration storage for rconnect.

use crate::session::Session;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable consulted when no root URL is configured
pub const ROOT_URL_ENV: &str = "RCONNECT_ROOT_URL";

/// Environment variable consulted when no tenant is configured
pub const TENANT_ENV: &str = "RCONNECT_TENANT";

/// User configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Config {
    /// Session root URL for tenant resources
    #[serde(default)]
    pub root_url: Option<String>,
    #[serde(default)]
    pub tenant: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    /// Permissions granted to the session
    #[serde(default)]
    pub permissions: Vec<String>,
    /// Last manifest used
    #[serde(default)]
    pub last_manifest: Option<PathBuf>,
}

impl Config {
    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("rconnect").join("config.json"))
    }

    /// Load configuration from disk
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file is missing or unreadable
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|err| {
                tracing::warn!("Ignoring malformed config {:?}: {}", path, err);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let Some(path) = Self::config_path() else {
            return Ok(());
        };
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        // Create parent directory
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))?;

        Ok(())
    }

    /// Get effective root URL (CLI > config > environment)
    pub fn effective_root_url(&self, cli: Option<&str>) -> Option<String> {
        cli.map(str::to_string)
            .or_else(|| self.root_url.clone())
            .or_else(|| std::env::var(ROOT_URL_ENV).ok())
            .filter(|url| !url.is_empty())
    }

    /// Get effective tenant (CLI > config > environment)
    pub fn effective_tenant(&self, cli: Option<&str>) -> Option<String> {
        cli.map(str::to_string)
            .or_else(|| self.tenant.clone())
            .or_else(|| std::env::var(TENANT_ENV).ok())
            .filter(|tenant| !tenant.is_empty())
    }

    /// Session for tenant resources, when both root URL and tenant are known
    pub fn session(
        &self,
        root_url: Option<&str>,
        tenant: Option<&str>,
        token: Option<&str>,
    ) -> Option<Session> {
        let url = self.effective_root_url(root_url)?;
        let tenant = self.effective_tenant(tenant)?;

        let mut session =
            Session::new(&url, &tenant).with_permissions(self.permissions.iter().cloned());
        if let Some(token) = token.map(str::to_string).or_else(|| self.token.clone()) {
            session = session.with_token(&token);
        }
        Some(session)
    }

    /// Remember the manifest and save
    pub fn set_last_manifest(&mut self, path: &Path) -> Result<()> {
        self.last_manifest = Some(path.to_path_buf());
        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_config() {
        let config = Config {
            root_url: Some("http://config".to_string()),
            tenant: Some("acme".to_string()),
            ..Default::default()
        };
        assert_eq!(config.effective_root_url(Some("http://cli")).as_deref(), Some("http://cli"));
        assert_eq!(config.effective_root_url(None).as_deref(), Some("http://config"));
        assert_eq!(config.effective_tenant(None).as_deref(), Some("acme"));
    }

    #[test]
    fn test_session_carries_token_and_permissions() {
        let config = Config {
            root_url: Some("http://h".to_string()),
            tenant: Some("acme".to_string()),
            token: Some("secret".to_string()),
            permissions: vec!["users:read".to_string()],
            ..Default::default()
        };
        let session = config.session(None, None, None).unwrap();
        assert_eq!(session.url, "http://h");
        assert_eq!(session.token.as_deref(), Some("secret"));
        assert!(session.permissions.contains("users:read"));

        let session = config.session(None, None, Some("other")).unwrap();
        assert_eq!(session.token.as_deref(), Some("other"));
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let path = std::env::temp_dir()
            .join(format!("rconnect-test-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let config = Config {
            tenant: Some("acme".to_string()),
            last_manifest: Some(PathBuf::from("demos/users.yaml")),
            ..Default::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(Config::load_from(&path), config);

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(Config::load_from(&path), Config::default());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
