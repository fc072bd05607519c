//! Controller settings: defaults, then `rewrite.toml`, then `APP__*` environment overrides.

use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;

pub const DEFAULT_SETTINGS_FILE: &str = "rewrite.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerSettings {
    pub service_url: String,
    pub draft_debounce: Duration,
    pub request_timeout: Duration,
    pub min_completion_fraction: f64,
    pub event_capacity: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            service_url: "http://127.0.0.1:8080".into(),
            draft_debounce: Duration::from_millis(1500),
            request_timeout: Duration::from_secs(30),
            min_completion_fraction: 0.25,
            event_capacity: 256,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    service_url: Option<String>,
    draft_debounce_ms: Option<u64>,
    request_timeout_ms: Option<u64>,
    min_completion_fraction: Option<f64>,
    event_capacity: Option<usize>,
}

impl ControllerSettings {
    /// Load settings from `rewrite.toml` in the working directory, if present, and the environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(Path::new(DEFAULT_SETTINGS_FILE), |key| std::env::var(key).ok())
    }

    pub fn load_from(
        path: &Path,
        env: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<Self> {
        let mut settings = Self::default();

        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
            settings
                .apply_toml(&raw)
                .with_context(|| format!("invalid settings file '{}'", path.display()))?;
        }

        settings.apply_env(env)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn apply_toml(&mut self, raw: &str) -> anyhow::Result<()> {
        let file_cfg: FileSettings = toml::from_str(raw)?;
        if let Some(v) = file_cfg.service_url {
            self.service_url = v;
        }
        if let Some(v) = file_cfg.draft_debounce_ms {
            self.draft_debounce = Duration::from_millis(v);
        }
        if let Some(v) = file_cfg.request_timeout_ms {
            self.request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file_cfg.min_completion_fraction {
            self.min_completion_fraction = v;
        }
        if let Some(v) = file_cfg.event_capacity {
            self.event_capacity = v;
        }
        Ok(())
    }

    fn apply_env(&mut self, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        if let Some(v) = env("APP__SERVICE_URL") {
            self.service_url = v;
        }
        if let Some(v) = env("APP__DRAFT_DEBOUNCE_MS") {
            let ms = v
                .parse::<u64>()
                .with_context(|| format!("APP__DRAFT_DEBOUNCE_MS is not a number: '{v}'"))?;
            self.draft_debounce = Duration::from_millis(ms);
        }
        if let Some(v) = env("APP__REQUEST_TIMEOUT_MS") {
            let ms = v
                .parse::<u64>()
                .with_context(|| format!("APP__REQUEST_TIMEOUT_MS is not a number: '{v}'"))?;
            self.request_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = env("APP__MIN_COMPLETION_FRACTION") {
            self.min_completion_fraction = v.parse::<f64>().with_context(|| {
                format!("APP__MIN_COMPLETION_FRACTION is not a number: '{v}'")
            })?;
        }
        if let Some(v) = env("APP__EVENT_CAPACITY") {
            self.event_capacity = v
                .parse::<usize>()
                .with_context(|| format!("APP__EVENT_CAPACITY is not a number: '{v}'"))?;
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.min_completion_fraction) {
            anyhow::bail!(
                "min_completion_fraction must be within [0, 1], got {}",
                self.min_completion_fraction
            );
        }
        if self.request_timeout.is_zero() {
            anyhow::bail!("request_timeout must be > 0");
        }
        if self.event_capacity == 0 {
            anyhow::bail!("event_capacity must be > 0");
        }
        url::Url::parse(&self.service_url)
            .with_context(|| format!("service_url is not a valid URL: '{}'", self.service_url))?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
