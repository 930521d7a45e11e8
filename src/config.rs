use crate::error::{ClientError, Result};
use crate::realtime::poller::PollSchedule;
use crate::utils::normalize_url;
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Which resource a poll loop keeps fresh. Each concern has its own interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concern {
    Messages,
    Threads,
    Notifications,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub base_url: String,
    pub ws_base_url: Option<String>,
    pub user_id: Option<String>,
    pub messages_poll_secs: u64,
    pub threads_poll_secs: u64,
    pub notifications_poll_secs: u64,
    pub poll_jitter: f64,
    pub max_poll_backoff_secs: u64,
    pub search_debounce_ms: u64,
    pub request_timeout_secs: Option<u64>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            ws_base_url: None,
            user_id: None,
            messages_poll_secs: 5,
            threads_poll_secs: 10,
            notifications_poll_secs: 30,
            poll_jitter: 0.1,
            max_poll_backoff_secs: 120,
            search_debounce_ms: 400,
            request_timeout_secs: None,
        }
    }
}

impl AppConfig {
    // TOML is the primary format. An older JSON file is read once and rewritten as TOML.
    fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("estate-client.toml"))
    }

    fn legacy_json_path() -> Option<PathBuf> {
        let proj = ProjectDirs::from("com", "example", "EstateClient")?;
        Some(proj.config_dir().join("state.json"))
    }

    pub fn load() -> Self {
        if let Some(path) = Self::toml_path() {
            match Self::load_from(&path) {
                Ok(Some(cfg)) => return cfg,
                Ok(None) => {}
                Err(e) => log::warn!("Ignoring unreadable config {}: {}", path.display(), e),
            }
        }

        if let Some(legacy) = Self::legacy_json_path() {
            if let Ok(bytes) = fs::read(&legacy) {
                if let Ok(cfg) = serde_json::from_slice::<AppConfig>(&bytes) {
                    if let Err(e) = cfg.save() {
                        log::warn!("Could not migrate legacy config: {}", e);
                    }
                    return cfg;
                }
            }
        }

        Self::default()
    }

    /// Returns `Ok(None)` when the file does not exist.
    pub fn load_from(path: &Path) -> Result<Option<Self>> {
        let text = match fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(toml::from_str::<AppConfig>(&text)?))
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::toml_path().ok_or_else(|| ClientError::Config("no config dir".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty()
    }

    pub fn api_base(&self) -> Result<Url> {
        if !self.is_configured() {
            return Err(ClientError::Config("base_url is not set".into()));
        }
        let mut url = Url::parse(&normalize_url(&self.base_url))?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Ok(url)
    }

    /// WebSocket base. Derived from `base_url` by swapping the scheme when not set explicitly.
    pub fn ws_base(&self) -> Result<Url> {
        if let Some(ws) = self.ws_base_url.as_deref().filter(|s| !s.trim().is_empty()) {
            return Ok(Url::parse(ws.trim())?);
        }
        let mut api = self.api_base()?;
        // Sockets live at the host root, not under the REST prefix.
        api.set_path("/");
        api.set_query(None);
        let scheme = if api.scheme() == "http" { "ws" } else { "wss" };
        let rest = &api.as_str()[api.scheme().len()..];
        Ok(Url::parse(&format!("{}{}", scheme, rest))?)
    }

    pub fn poll_schedule(&self, concern: Concern) -> PollSchedule {
        let secs = match concern {
            Concern::Messages => self.messages_poll_secs,
            Concern::Threads => self.threads_poll_secs,
            Concern::Notifications => self.notifications_poll_secs,
        };
        PollSchedule::new(Duration::from_secs(secs.max(1)))
            .with_jitter(self.poll_jitter)
            .with_max_backoff(Duration::from_secs(self.max_poll_backoff_secs))
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = AppConfig::load_from(&dir.path().join("nope.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg/estate-client.toml");
        let cfg = AppConfig {
            base_url: "api.example.com".into(),
            user_id: Some("42".into()),
            messages_poll_secs: 2,
            ..AppConfig::default()
        };
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.base_url, "api.example.com");
        assert_eq!(loaded.user_id.as_deref(), Some("42"));
        assert_eq!(loaded.messages_poll_secs, 2);
        assert_eq!(loaded.notifications_poll_secs, 30);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: AppConfig = toml::from_str("base_url = \"http://localhost:8000\"\n").unwrap();
        assert_eq!(cfg.threads_poll_secs, 10);
        assert_eq!(cfg.search_debounce(), Duration::from_millis(400));
    }

    #[test]
    fn test_ws_base_derived_from_scheme() {
        let cfg = AppConfig { base_url: "http://localhost:8000".into(), ..Default::default() };
        assert_eq!(cfg.ws_base().unwrap().as_str(), "ws://localhost:8000/");

        let cfg = AppConfig { base_url: "api.example.com".into(), ..Default::default() };
        assert_eq!(cfg.api_base().unwrap().as_str(), "https://api.example.com/");
        assert_eq!(cfg.ws_base().unwrap().as_str(), "wss://api.example.com/");

        let cfg = AppConfig { base_url: "https://example.com/api".into(), ..Default::default() };
        assert_eq!(cfg.ws_base().unwrap().as_str(), "wss://example.com/");
    }

    #[test]
    fn test_explicit_ws_base_wins() {
        let cfg = AppConfig {
            base_url: "https://api.example.com".into(),
            ws_base_url: Some("wss://push.example.com/".into()),
            ..Default::default()
        };
        assert_eq!(cfg.ws_base().unwrap().host_str(), Some("push.example.com"));
    }

    #[test]
    fn test_nan_jitter_polls_on_interval() {
        let cfg = AppConfig { poll_jitter: f64::NAN, ..Default::default() };
        let schedule = cfg.poll_schedule(Concern::Messages);
        assert_eq!(schedule.next_delay(0), Duration::from_secs(5));
    }

    #[test]
    fn test_unconfigured_base_is_error() {
        let cfg = AppConfig::default();
        assert!(matches!(cfg.api_base(), Err(ClientError::Config(_))));
    }
}
