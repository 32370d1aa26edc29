use std::time::Duration;

use cadence_core::models::{NotificationChannel, PipelineConfig, RetryPolicy};
use chrono::Duration as ChronoDuration;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

pub const CONFIG_FILE: &str = "cadence.toml";

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Config {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub reminders: ReminderConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// When reminders fire relative to a task's due date, and where they go
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct ReminderConfig {
    #[serde(default = "default_offsets")]
    pub offsets_minutes: Vec<i64>,
    #[serde(default = "default_channel")]
    pub channel: NotificationChannel,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            offsets_minutes: default_offsets(),
            channel: default_channel(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct NotificationConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct TimeoutConfig {
    /// Upper bound on every store, bus, scheduler and channel call
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_timeout_secs: default_call_timeout_secs(),
        }
    }
}

fn default_database_path() -> String {
    "cadence.db".to_string()
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_offsets() -> Vec<i64> {
    vec![60, 15]
}

fn default_channel() -> NotificationChannel {
    NotificationChannel::InApp
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_secs() -> u64 {
    5
}

fn default_call_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            log_level: default_log_level(),
            reminders: ReminderConfig::default(),
            notifications: NotificationConfig::default(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Result<Self, figment::Error> {
        Self::from_figment(Figment::new().merge(Toml::file(CONFIG_FILE)))
    }

    fn from_figment(base: Figment) -> Result<Self, figment::Error> {
        base.merge(Env::prefixed("CADENCE_").split("__")).extract()
    }

    /// Validates the loaded values and turns them into the pipeline's own configuration.
    pub fn into_pipeline_config(self) -> Result<PipelineConfig, String> {
        if self.timeouts.call_timeout_secs == 0 {
            return Err("timeouts.call_timeout_secs must be greater than zero".to_string());
        }
        if self.notifications.max_attempts == 0 {
            return Err("notifications.max_attempts must be at least 1".to_string());
        }
        if let Some(negative) = self.reminders.offsets_minutes.iter().find(|m| **m < 0) {
            return Err(format!("reminder offset {} is negative", negative));
        }

        Ok(PipelineConfig {
            call_timeout: Duration::from_secs(self.timeouts.call_timeout_secs),
            reminder_offsets: self
                .reminders
                .offsets_minutes
                .iter()
                .map(|m| ChronoDuration::minutes(*m))
                .collect(),
            default_channel: self.reminders.channel,
            retry: RetryPolicy {
                max_attempts: self.notifications.max_attempts,
                base_delay: Duration::from_secs(self.notifications.base_delay_secs),
            },
        })
    }
}
