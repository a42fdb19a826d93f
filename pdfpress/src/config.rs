//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable overrides. The configuration
//! file path defaults to `config.yaml` but can be specified via `-f` flag or `PDFPRESS_CONFIG`
//! environment variable. A missing file is fine: every field has a default.
//!
//! ## Loading Priority
//!
//! Configuration sources are merged in the following order (later sources override earlier ones):
//!
//! 1. **YAML config file** - Base configuration (default: `config.yaml`)
//! 2. **PORT** - The conventional platform variable, if set
//! 3. **Environment variables** - Variables prefixed with `PDFPRESS_` override everything else
//!
//! For nested config values, use double underscores in environment variables. For example,
//! `PDFPRESS_GHOSTSCRIPT__TIMEOUT=2m` sets the `ghostscript.timeout` field.
//!
//! ## Environment Variable Examples
//!
//! ```bash
//! # Override server port
//! PDFPRESS_PORT=8080
//!
//! # Keep files for a day instead of an hour
//! PDFPRESS_CLEANUP__RETENTION=24h
//!
//! # Use a specific Ghostscript binary
//! PDFPRESS_GHOSTSCRIPT__EXECUTABLE=/opt/gs/bin/gs
//! ```

use clap::Parser;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};

use crate::compression::CompressionLevel;

/// Simple CLI args - just for specifying config file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "PDFPRESS_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to (e.g., "0.0.0.0" for all interfaces)
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// Verbose logging. `RUST_LOG` still wins if set.
    pub debug: bool,
    /// Where uploads are written before compression
    pub upload_dir: PathBuf,
    /// Where compressed files wait to be downloaded
    pub compressed_dir: PathBuf,
    /// Lowercase file extensions accepted for upload
    pub allowed_extensions: Vec<String>,
    /// Maximum request body size for uploads, in bytes
    pub max_upload_size: u64,
    /// Level used when the form does not specify one
    pub default_compression_level: CompressionLevel,
    pub cleanup: CleanupConfig,
    pub ghostscript: GhostscriptConfig,
    pub limits: LimitsConfig,
    /// Enable Prometheus metrics endpoint at `/internal/metrics`
    pub enable_metrics: bool,
    /// Enable OpenTelemetry OTLP export for distributed tracing
    pub enable_otel_export: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            debug: false,
            upload_dir: PathBuf::from("uploads/original"),
            compressed_dir: PathBuf::from("uploads/compressed"),
            allowed_extensions: vec!["pdf".to_string()],
            max_upload_size: 100 * 1024 * 1024,
            default_compression_level: CompressionLevel::Medium,
            cleanup: CleanupConfig::default(),
            ghostscript: GhostscriptConfig::default(),
            limits: LimitsConfig::default(),
            enable_metrics: false,
            enable_otel_export: false,
        }
    }
}

/// Stale file removal.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct CleanupConfig {
    /// Sweep both storage directories before the server starts
    pub on_startup: bool,
    /// Files older than this are considered abandoned
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
    /// Also sweep periodically while running. Disabled when unset.
    #[serde(with = "humantime_serde")]
    pub interval: Option<Duration>,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            on_startup: true,
            retention: Duration::from_secs(3600),
            interval: None,
        }
    }
}

/// How Ghostscript is found and run.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct GhostscriptConfig {
    /// Executable name or path. When unset, `gs`, `gswin64c` and `gswin32c` are looked up on PATH.
    pub executable: Option<PathBuf>,
    /// Value passed as `-dCompatibilityLevel`
    pub compatibility_level: String,
    /// Kill the process if it runs longer than this
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for GhostscriptConfig {
    fn default() -> Self {
        Self {
            executable: None,
            compatibility_level: "1.4".to_string(),
            timeout: Duration::from_secs(300),
        }
    }
}

/// Limits on concurrent compression work.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Maximum Ghostscript processes running at once (0 = unlimited)
    pub max_concurrent_compressions: usize,
    /// Maximum requests queued for a compression slot (0 = unlimited)
    pub max_waiting_compressions: usize,
    /// How long a request waits for a slot before getting a 429
    #[serde(with = "humantime_serde")]
    pub max_wait: Duration,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_compressions: 0,
            max_waiting_compressions: 0,
            max_wait: Duration::from_secs(30),
        }
    }
}

impl Config {
    #[allow(clippy::result_large_err)]
    pub fn load(args: &Args) -> Result<Self, figment::Error> {
        let mut config: Self = Self::figment(args).extract()?;

        for ext in &mut config.allowed_extensions {
            *ext = ext.trim_start_matches('.').to_ascii_lowercase();
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration for consistency
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<(), figment::Error> {
        if self.allowed_extensions.iter().all(|ext| ext.is_empty()) {
            return Err(figment::Error::from(
                "Config validation: allowed_extensions must contain at least one extension".to_string(),
            ));
        }

        if self.max_upload_size == 0 {
            return Err(figment::Error::from(
                "Config validation: max_upload_size must be greater than zero".to_string(),
            ));
        }

        if self.upload_dir == self.compressed_dir {
            return Err(figment::Error::from(format!(
                "Config validation: upload_dir and compressed_dir must differ (both are {})",
                self.upload_dir.display()
            )));
        }

        if self.ghostscript.timeout.is_zero() {
            return Err(figment::Error::from(
                "Config validation: ghostscript.timeout must be greater than zero".to_string(),
            ));
        }

        if self.cleanup.interval.is_some_and(|interval| interval.is_zero()) {
            return Err(figment::Error::from(
                "Config validation: cleanup.interval must be greater than zero when set".to_string(),
            ));
        }

        Ok(())
    }

    pub fn figment(args: &Args) -> Figment {
        Figment::new()
            // Load base config file
            .merge(Yaml::file(&args.config))
            // Platforms commonly hand us the port this way
            .merge(Env::raw().only(&["PORT"]))
            // PDFPRESS_CONFIG names the file; it is not a config key
            .merge(Env::prefixed("PDFPRESS_").ignore(&["CONFIG"]).split("__"))
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Human readable form of `max_upload_size`, for messages.
    pub fn max_upload_size_display(&self) -> String {
        const KB: u64 = 1024;
        const MB: u64 = 1024 * KB;

        let size = self.max_upload_size;
        if size >= MB && size % MB == 0 {
            format!("{} MB", size / MB)
        } else if size >= MB {
            format!("{:.1} MB", size as f64 / MB as f64)
        } else if size >= KB {
            format!("{} KB", size / KB)
        } else {
            format!("{size} bytes")
        }
    }
}
