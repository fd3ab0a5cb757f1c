// Demo configuration (config.toml)
//
// Window size, requested device extensions and capabilities, present mode
// preference and debug switches. Every section falls back to defaults when
// missing; an unreadable file falls back to defaults entirely.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::Path;

use crate::backend::Capability;

/// Contents of config.toml
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub device: DeviceConfig,
    pub swapchain: SwapchainConfig,
    pub debug: DebugConfig,
}

/// Demo window
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "GPU Negotiator".to_string(),
            width: 1280,
            height: 720,
        }
    }
}

/// Device negotiation settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device extensions to enable when supported
    pub requested_extensions: Vec<String>,
    /// Capabilities to request queues for
    pub capabilities: Vec<Capability>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            requested_extensions: vec!["VK_KHR_swapchain".to_string()],
            capabilities: vec![
                Capability::Graphics,
                Capability::Transfer,
                Capability::Compute,
                Capability::Presentation,
            ],
        }
    }
}

/// Swapchain preferences
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SwapchainConfig {
    pub present_mode: String,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
        }
    }
}

/// Validation and logging
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// `config.toml` in the working directory, or defaults when it is
    /// missing or malformed.
    pub fn load() -> Self {
        Self::load_from_path("config.toml").unwrap_or_else(|e| {
            log::warn!("ignoring config.toml ({:#}), using defaults", e);
            Config::default()
        })
    }

    /// A missing file is not an error; unreadable or malformed ones are.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::info!("no config at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config =
            Self::parse(&content).with_context(|| format!("parsing {}", path.display()))?;

        log::info!("config loaded from {}", path.display());
        log::debug!("{:#?}", config);
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Preferred present mode; unknown names fall back to MAILBOX.
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        match self.swapchain.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.swapchain.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    /// Log level filter, `Info` when unrecognized
    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.device.requested_extensions, vec!["VK_KHR_swapchain"]);
        assert_eq!(config.device.capabilities.len(), 4);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn sections_override_defaults() {
        let config = Config::parse(
            r#"
            [window]
            title = "headless compute"

            [device]
            requested_extensions = ["VK_KHR_swapchain", "VK_EXT_memory_budget"]
            capabilities = ["compute", "transfer"]

            [swapchain]
            present_mode = "FIFO_RELAXED"

            [debug]
            validation_layers = false
            log_level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "headless compute");
        assert_eq!(config.window.height, 720);
        assert_eq!(
            config.device.capabilities,
            vec![Capability::Compute, Capability::Transfer]
        );
        assert_eq!(config.device.requested_extensions.len(), 2);
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO_RELAXED);
        assert!(!config.debug.validation_layers);
        assert_eq!(config.log_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_mailbox() {
        let config = Config::parse("[swapchain]\npresent_mode = \"vsync\"").unwrap();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn unknown_capability_is_a_parse_error() {
        assert!(Config::parse("[device]\ncapabilities = [\"raytracing\"]").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let config = Config::load_from_path("/nonexistent/gpu-negotiator.toml").unwrap();
        assert_eq!(config.swapchain.present_mode, "mailbox");
    }
}
