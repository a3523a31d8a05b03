// src/config.rs
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::notify::discord::{retry_backoff, DiscordSettings, MAX_RETRIES};
use crate::reconcile::ReconcilerOptions;

pub const ENV_CONFIG_PATH: &str = "FAB_TRACKER_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

const ENV_WEBHOOK_URL: &str = "FAB_WEBHOOK_URL";
const ENV_STATE_PATH: &str = "FAB_STATE_PATH";
const ENV_INTERVAL_SECS: &str = "FAB_INTERVAL_SECS";
const ENV_HTTP_TIMEOUT_SECS: &str = "FAB_HTTP_TIMEOUT_SECS";
const ENV_METRICS_ADDR: &str = "FAB_METRICS_ADDR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Discord webhook the announcements are posted through.
    pub webhook_url: String,
    pub state_path: PathBuf,
    /// Seconds between passes; 0 runs a single pass and exits.
    pub interval_secs: u64,
    /// Bound for every marketplace and webhook call.
    pub http_timeout_secs: u64,
    pub source_url: String,
    pub section_prefix: String,
    pub send_delay_ms: u64,
    pub verify_before_delete: bool,
    pub retract_vanished: bool,
    pub metrics_addr: Option<String>,
    pub discord: DiscordSettings,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            webhook_url: String::new(),
            state_path: PathBuf::from("cache.json"),
            interval_secs: 3600,
            http_timeout_secs: 30,
            source_url: "https://www.fab.com/".into(),
            section_prefix: "Limited-Time Free".into(),
            send_delay_ms: 1000,
            verify_before_delete: true,
            retract_vanished: true,
            metrics_addr: None,
            discord: DiscordSettings::default(),
        }
    }
}

impl TrackerConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: TrackerConfig = toml::from_str(s).context("parsing tracker config")?;
        Ok(cfg)
    }

    /// Load from an explicit path, then apply env overrides and validate.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut cfg = Self::from_toml_str(&content)?;
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Resolve the config file:
    /// 1) $FAB_TRACKER_CONFIG (must exist)
    /// 2) ./config.toml
    /// 3) defaults, if the webhook comes from $FAB_WEBHOOK_URL
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                bail!("{ENV_CONFIG_PATH} points to non-existent path {}", pb.display());
            }
            return Self::load_from(&pb);
        }

        let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load_from(&default_path);
        }

        if std::env::var(ENV_WEBHOOK_URL).is_err() {
            bail!("{DEFAULT_CONFIG_PATH} not found and {ENV_WEBHOOK_URL} not set");
        }
        let mut cfg = Self::default();
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var(ENV_WEBHOOK_URL) {
            self.webhook_url = v;
        }
        if let Ok(v) = std::env::var(ENV_STATE_PATH) {
            self.state_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var(ENV_INTERVAL_SECS) {
            self.interval_secs = v
                .trim()
                .parse()
                .map_err(|_| anyhow!("{ENV_INTERVAL_SECS} must be a whole number, got {v:?}"))?;
        }
        if let Ok(v) = std::env::var(ENV_HTTP_TIMEOUT_SECS) {
            self.http_timeout_secs = v
                .trim()
                .parse()
                .map_err(|_| anyhow!("{ENV_HTTP_TIMEOUT_SECS} must be a whole number, got {v:?}"))?;
        }
        if let Ok(v) = std::env::var(ENV_METRICS_ADDR) {
            self.metrics_addr = Some(v).filter(|s| !s.trim().is_empty());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.webhook_url.trim().is_empty() {
            bail!("webhook_url is required");
        }
        if self.http_timeout_secs == 0 {
            bail!("http_timeout_secs must be greater than 0");
        }
        if self.section_prefix.trim().is_empty() {
            bail!("section_prefix must not be empty");
        }
        if self.discord.retries > MAX_RETRIES {
            bail!("discord.retries must be at most {MAX_RETRIES}");
        }
        if self.discord_attempt_timeout().is_zero() {
            bail!(
                "http_timeout_secs={} leaves no time per attempt with discord.retries={}",
                self.http_timeout_secs,
                self.discord.retries
            );
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Per-request timeout for the Discord client. Sized so that every attempt
    /// plus the backoff between them fits in `call_timeout`, which bounds the
    /// whole channel call from the reconciler's side.
    pub fn discord_attempt_timeout(&self) -> Duration {
        let attempts = self.discord.retries.clamp(1, MAX_RETRIES);
        let backoff: Duration = (1..attempts).map(retry_backoff).sum();
        self.call_timeout().saturating_sub(backoff) / u32::from(attempts)
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }

    pub fn reconciler_options(&self) -> ReconcilerOptions {
        ReconcilerOptions {
            call_timeout: self.call_timeout(),
            send_delay: Duration::from_millis(self.send_delay_ms),
            verify_before_delete: self.verify_before_delete,
            retract_vanished: self.retract_vanished,
        }
    }
}
