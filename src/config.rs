use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::disk::device::RetryPolicy;
use crate::disk::label::LabelKind;

pub const CONFIG_FILE: &str = ".partkit.toml";

/// How the disk commands answer warnings and errors raised while they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Ask on the terminal
    #[default]
    Prompt,
    /// Carry on past the problem
    Ignore,
    /// Abort the command
    Cancel,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiskConfig {
    /// Label written by `mklabel` when none is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<LabelKind>,
    /// Partition alignment, bytes or with K/M/G suffix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub align: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub retry_delay: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_error: Option<ErrorPolicy>,
}

impl DiskConfig {
    pub fn with_defaults() -> Self {
        let retry = RetryPolicy::default();
        Self {
            label: Some(LabelKind::Gpt),
            align: Some("1M".to_string()),
            retry_attempts: Some(retry.attempts),
            retry_delay: Some(retry.delay),
            on_error: Some(ErrorPolicy::Prompt),
        }
    }

    /// Device retry policy, with unset fields taken from the default.
    pub fn retry_policy(&self) -> RetryPolicy {
        let default = RetryPolicy::default();
        RetryPolicy {
            attempts: self.retry_attempts.unwrap_or(default.attempts),
            delay: self.retry_delay.unwrap_or(default.delay),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk: Option<DiskConfig>,
}

impl AppConfig {
    pub fn load_from_file(path: &str) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn generate_config_file(force: bool) -> anyhow::Result<()> {
        if std::path::Path::new(CONFIG_FILE).exists() && !force {
            anyhow::bail!(
                "Configuration file {} already exists. Use --force to overwrite.",
                CONFIG_FILE
            );
        }

        fs::write(CONFIG_FILE, Self::generate_full_config()?)?;

        info!("Configuration file generated: {}", CONFIG_FILE);
        info!("Please edit this file to customize configuration");
        Ok(())
    }

    pub fn generate_full_config() -> anyhow::Result<String> {
        let config = AppConfig {
            disk: Some(DiskConfig::with_defaults()),
        };
        let toml_content = toml::to_string_pretty(&config)?;
        Ok(format!(
            "# partkit configuration file\n# All fields are optional, command line arguments override config file values\n\n{}",
            toml_content
        ))
    }
}
