//! WolfStream Configuration
//!
//! This module provides configuration structures for the log buffer
//! factory and the processes that host it.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::logbuffer::frame::FRAME_ALIGNMENT;
use crate::logbuffer::layout::check_term_length;

/// Main WolfStream configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WolfStreamConfig {
    /// Driver-wide configuration
    #[serde(default)]
    pub driver: DriverConfig,

    /// Log buffer sizing and allocation
    #[serde(default)]
    pub buffers: LogBufferConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Driver-wide configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    /// Directory holding the publications and images subdirectories
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Maximum transmission unit stamped into new logs
    #[serde(default = "default_mtu_length")]
    pub mtu_length: usize,

    /// A publication counts as connected while status messages arrive within this window
    #[serde(default = "default_publication_connection_timeout_ms")]
    pub publication_connection_timeout_ms: u64,
}

/// Log buffer sizing and allocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBufferConfig {
    /// Term length for network publications
    #[serde(default = "default_publication_term_buffer_length")]
    pub publication_term_buffer_length: usize,

    /// Largest term length accepted for a rebuilt network image
    #[serde(default = "default_images_term_buffer_max_length")]
    pub images_term_buffer_max_length: usize,

    /// Term length for same-host (IPC) publications
    #[serde(default = "default_ipc_publication_term_buffer_length")]
    pub ipc_publication_term_buffer_length: usize,

    /// Allocate storage sparsely instead of reserving it up front
    #[serde(default = "default_true")]
    pub use_sparse_files: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (full, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    PathBuf::from("/var/lib/wolfstream")
}

fn default_mtu_length() -> usize {
    4096
}

fn default_publication_connection_timeout_ms() -> u64 {
    5000
}

fn default_publication_term_buffer_length() -> usize {
    16 * 1024 * 1024
}

fn default_images_term_buffer_max_length() -> usize {
    16 * 1024 * 1024
}

fn default_ipc_publication_term_buffer_length() -> usize {
    64 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "full".to_string()
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            mtu_length: default_mtu_length(),
            publication_connection_timeout_ms: default_publication_connection_timeout_ms(),
        }
    }
}

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self {
            publication_term_buffer_length: default_publication_term_buffer_length(),
            images_term_buffer_max_length: default_images_term_buffer_max_length(),
            ipc_publication_term_buffer_length: default_ipc_publication_term_buffer_length(),
            use_sparse_files: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LogBufferConfig {
    /// Validate every configured term length
    pub fn validate(&self) -> crate::Result<()> {
        check_term_length(self.publication_term_buffer_length)?;
        check_term_length(self.images_term_buffer_max_length)?;
        check_term_length(self.ipc_publication_term_buffer_length)?;
        Ok(())
    }

    /// Smallest term length any log from this configuration can have
    pub fn min_term_length(&self) -> usize {
        self.publication_term_buffer_length
            .min(self.ipc_publication_term_buffer_length)
    }
}

impl LoggingConfig {
    /// Whether log lines use the compact single-line format
    pub fn is_compact(&self) -> bool {
        self.format.eq_ignore_ascii_case("compact")
    }
}

impl WolfStreamConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfStreamConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        self.buffers.validate()?;

        let mtu = self.driver.mtu_length;
        if mtu == 0 || mtu % FRAME_ALIGNMENT != 0 {
            return Err(crate::Error::Config(format!(
                "driver.mtu_length must be a non-zero multiple of {}, got {}",
                FRAME_ALIGNMENT, mtu
            )));
        }
        match self.logging.format.to_ascii_lowercase().as_str() {
            "full" | "compact" => {}
            other => {
                return Err(crate::Error::Config(format!(
                    "logging.format must be full or compact, got {}",
                    other
                )))
            }
        }

        if mtu > self.buffers.min_term_length() {
            return Err(crate::Error::Config(format!(
                "driver.mtu_length {} exceeds the smallest term length {}",
                mtu,
                self.buffers.min_term_length()
            )));
        }

        Ok(())
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &PathBuf {
        &self.driver.data_dir
    }

    /// Get the publication connection timeout as Duration
    pub fn publication_connection_timeout(&self) -> Duration {
        Duration::from_millis(self.driver.publication_connection_timeout_ms)
    }
}
