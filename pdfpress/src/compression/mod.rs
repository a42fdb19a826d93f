//! Compression backend abstraction.
//!
//! The [`CompressionBackend`] trait is the seam between the HTTP handlers and whatever actually
//! shrinks the PDF. Production uses [`ghostscript::Ghostscript`]; tests substitute fakes.

use std::fmt;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;

pub mod ghostscript;

/// Create the compression backend from configuration.
pub fn create_backend(config: &Config) -> Arc<dyn CompressionBackend> {
    Arc::new(ghostscript::Ghostscript::new(&config.ghostscript))
}

/// How hard to squeeze the document.
///
/// | level    | preset     |                                          |
/// |----------|------------|------------------------------------------|
/// | `low`    | `/printer` | least compression, highest fidelity      |
/// | `medium` | `/ebook`   | balanced                                 |
/// | `high`   | `/screen`  | most compression, smallest output        |
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl CompressionLevel {
    pub const ALL: [CompressionLevel; 3] = [CompressionLevel::Low, CompressionLevel::Medium, CompressionLevel::High];

    /// Parse a user-supplied level; anything unrecognised means `medium`.
    pub fn parse_lenient(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" => Self::High,
            _ => Self::Medium,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    /// The Ghostscript `-dPDFSETTINGS` preset for this level.
    pub fn preset(self) -> &'static str {
        match self {
            Self::Low => "/printer",
            Self::Medium => "/ebook",
            Self::High => "/screen",
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while running a compression backend.
#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("{tool} executable not found")]
    ToolNotFound { tool: String },

    #[error("{tool} failed ({status}): {stderr}")]
    Failed { tool: String, status: String, stderr: String },

    #[error("{tool} did not finish within {after:?}")]
    Timeout { tool: String, after: Duration },

    #[error("Failed to run {tool}")]
    Io {
        tool: String,
        #[source]
        source: io::Error,
    },
}

/// Something that can turn the PDF at `input` into a smaller PDF at `output`.
///
/// On error, whatever is at `output` must not be treated as a valid document.
#[async_trait]
pub trait CompressionBackend: Send + Sync {
    /// Human readable name, used in logs.
    fn name(&self) -> &str;

    /// Check the backend is usable. Called once at startup; failures are only logged.
    async fn check(&self) -> Result<(), CompressionError> {
        Ok(())
    }

    async fn compress(&self, input: &Path, output: &Path, level: CompressionLevel) -> Result<(), CompressionError>;
}
