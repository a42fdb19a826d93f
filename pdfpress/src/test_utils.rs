//! Test utilities for integration testing.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum_test::TestServer;

use crate::compression::{CompressionBackend, CompressionError, CompressionLevel};
use crate::config::{CleanupConfig, Config};

pub async fn create_test_app(config: Config, backend: Arc<dyn CompressionBackend>) -> (TestServer, crate::BackgroundServices) {
    let app = crate::Application::new_with_backend(config, backend)
        .await
        .expect("Failed to create application");

    app.into_test_server()
}

/// Default configuration with both storage directories under `root` and no startup sweep.
pub fn create_test_config(root: &Path) -> Config {
    Config {
        upload_dir: root.join("original"),
        compressed_dir: root.join("compressed"),
        cleanup: CleanupConfig {
            on_startup: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

type Call = (PathBuf, PathBuf, CompressionLevel);

/// Writes the first half of the input to the output, and records every call.
#[derive(Clone, Default)]
pub struct CopyBackend {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CopyBackend {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

fn io_error(source: std::io::Error) -> CompressionError {
    CompressionError::Io {
        tool: "copy".to_string(),
        source,
    }
}

#[async_trait]
impl CompressionBackend for CopyBackend {
    fn name(&self) -> &str {
        "copy"
    }

    async fn compress(&self, input: &Path, output: &Path, level: CompressionLevel) -> Result<(), CompressionError> {
        self.calls
            .lock()
            .unwrap()
            .push((input.to_path_buf(), output.to_path_buf(), level));

        let data = tokio::fs::read(input).await.map_err(io_error)?;
        tokio::fs::write(output, &data[..data.len() / 2]).await.map_err(io_error)?;
        Ok(())
    }
}

/// Leaves a partial output behind and then fails, the way a crashing tool would.
#[derive(Clone, Default)]
pub struct FailingBackend {
    /// Report the tool as missing instead of failing at runtime
    pub missing_tool: bool,
}

#[async_trait]
impl CompressionBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing"
    }

    async fn check(&self) -> Result<(), CompressionError> {
        if self.missing_tool {
            return Err(CompressionError::ToolNotFound {
                tool: "Ghostscript".to_string(),
            });
        }
        Ok(())
    }

    async fn compress(&self, _input: &Path, output: &Path, _level: CompressionLevel) -> Result<(), CompressionError> {
        if self.missing_tool {
            return Err(CompressionError::ToolNotFound {
                tool: "Ghostscript".to_string(),
            });
        }

        tokio::fs::write(output, b"%PDF-1.4 partial").await.map_err(io_error)?;
        Err(CompressionError::Failed {
            tool: "failing".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "Unrecoverable error, exit code 1".to_string(),
        })
    }
}

/// Compresses like [`CopyBackend`], then leaves a directory where the input file was so the
/// input cannot be deleted afterwards.
#[derive(Clone, Default)]
pub struct UndeletableInputBackend;

#[async_trait]
impl CompressionBackend for UndeletableInputBackend {
    fn name(&self) -> &str {
        "undeletable-input"
    }

    async fn compress(&self, input: &Path, output: &Path, _level: CompressionLevel) -> Result<(), CompressionError> {
        let data = tokio::fs::read(input).await.map_err(io_error)?;
        tokio::fs::write(output, &data[..data.len() / 2]).await.map_err(io_error)?;

        tokio::fs::remove_file(input).await.map_err(io_error)?;
        tokio::fs::create_dir(input).await.map_err(io_error)?;
        tokio::fs::write(input.join("keep"), b"x").await.map_err(io_error)?;
        Ok(())
    }
}
