use crate::error::{Result, TelemetryError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_export_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_active_user_window() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_cpu_sample_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_push_timeout() -> Duration {
    Duration::from_secs(5)
}

/// Configuration surface of the telemetry pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Collector endpoint receiving the metric pushes.
    pub url: String,
    /// Bearer token sent with every push.
    pub api_key: String,
    /// Value of the `source` attribute identifying this deployment.
    pub source: String,
    #[serde(with = "humantime_serde", default = "default_export_interval")]
    pub export_interval: Duration,
    #[serde(with = "humantime_serde", default = "default_active_user_window")]
    pub active_user_window: Duration,
    #[serde(with = "humantime_serde", default = "default_cpu_sample_interval")]
    pub cpu_sample_interval: Duration,
    /// Upper bound on a single push, so a slow collector cannot starve
    /// subsequent ticks.
    #[serde(with = "humantime_serde", default = "default_push_timeout")]
    pub push_timeout: Duration,
}

impl TelemetryConfig {
    pub fn new(
        url: impl Into<String>,
        api_key: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            source: source.into(),
            export_interval: default_export_interval(),
            active_user_window: default_active_user_window(),
            cpu_sample_interval: default_cpu_sample_interval(),
            push_timeout: default_push_timeout(),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| TelemetryError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(TelemetryError::InvalidConfig(
                "collector url cannot be empty".to_string(),
            ));
        }
        if self.source.is_empty() {
            return Err(TelemetryError::InvalidConfig(
                "source attribute cannot be empty".to_string(),
            ));
        }
        if self.export_interval.is_zero() {
            return Err(TelemetryError::InvalidConfig(
                "export interval must be > 0".to_string(),
            ));
        }
        if self.active_user_window.is_zero() {
            return Err(TelemetryError::InvalidConfig(
                "active user window must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
