//! Ghostscript-backed compression.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, instrument};

use super::{CompressionBackend, CompressionError, CompressionLevel};
use crate::config::GhostscriptConfig;

const TOOL: &str = "Ghostscript";

/// Executable names tried on `PATH` when none is configured.
const EXECUTABLES: [&str; 3] = ["gs", "gswin64c", "gswin32c"];

pub struct Ghostscript {
    executable: Option<PathBuf>,
    compatibility_level: String,
    timeout: Duration,
}

impl Ghostscript {
    pub fn new(config: &GhostscriptConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            compatibility_level: config.compatibility_level.clone(),
            timeout: config.timeout,
        }
    }

    /// Find the executable to run.
    ///
    /// A configured executable may be a bare name (looked up on `PATH`) or a path. Without one,
    /// the usual Ghostscript binary names are tried in order.
    pub fn locate(&self) -> Result<PathBuf, CompressionError> {
        if let Some(configured) = &self.executable {
            return which::which(configured).map_err(|e| {
                debug!(executable = %configured.display(), error = %e, "Configured Ghostscript executable not usable");
                not_found()
            });
        }

        for exe in EXECUTABLES {
            if let Ok(path) = which::which(exe) {
                return Ok(path);
            }
        }
        Err(not_found())
    }

    fn arguments(&self, input: &Path, output: &Path, level: CompressionLevel) -> Vec<OsString> {
        let mut output_arg = OsString::from("-sOutputFile=");
        output_arg.push(output);

        vec![
            "-sDEVICE=pdfwrite".into(),
            format!("-dCompatibilityLevel={}", self.compatibility_level).into(),
            format!("-dPDFSETTINGS={}", level.preset()).into(),
            "-dNOPAUSE".into(),
            "-dQUIET".into(),
            "-dBATCH".into(),
            output_arg,
            input.into(),
        ]
    }
}

fn not_found() -> CompressionError {
    CompressionError::ToolNotFound { tool: TOOL.to_string() }
}

fn io_error(source: io::Error) -> CompressionError {
    CompressionError::Io {
        tool: TOOL.to_string(),
        source,
    }
}

#[async_trait]
impl CompressionBackend for Ghostscript {
    fn name(&self) -> &str {
        TOOL
    }

    async fn check(&self) -> Result<(), CompressionError> {
        let path = self.locate()?;
        info!(executable = %path.display(), "Using Ghostscript");
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn compress(&self, input: &Path, output: &Path, level: CompressionLevel) -> Result<(), CompressionError> {
        let executable = self.locate()?;

        let child = Command::new(&executable)
            .args(self.arguments(input, output, level))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            // Dropping the wait future on timeout kills the process
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| if e.kind() == io::ErrorKind::NotFound { not_found() } else { io_error(e) })?;

        let finished = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(io_error)?,
            Err(_) => {
                return Err(CompressionError::Timeout {
                    tool: TOOL.to_string(),
                    after: self.timeout,
                });
            }
        };

        if !finished.status.success() {
            return Err(CompressionError::Failed {
                tool: TOOL.to_string(),
                status: finished.status.to_string(),
                stderr: String::from_utf8_lossy(&finished.stderr).trim().to_string(),
            });
        }

        debug!(executable = %executable.display(), "Ghostscript finished");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config(executable: Option<PathBuf>, timeout: Duration) -> GhostscriptConfig {
        GhostscriptConfig {
            executable,
            timeout,
            ..Default::default()
        }
    }

    #[test]
    fn test_arguments() {
        let gs = Ghostscript::new(&config(None, Duration::from_secs(1)));
        let args = gs.arguments(Path::new("/in/a.pdf"), Path::new("/out/a_compressed.pdf"), CompressionLevel::High);

        let args: Vec<String> = args.into_iter().map(|a| a.into_string().unwrap()).collect();
        assert_eq!(
            args,
            vec![
                "-sDEVICE=pdfwrite",
                "-dCompatibilityLevel=1.4",
                "-dPDFSETTINGS=/screen",
                "-dNOPAUSE",
                "-dQUIET",
                "-dBATCH",
                "-sOutputFile=/out/a_compressed.pdf",
                "/in/a.pdf",
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_configured_executable() {
        let dir = TempDir::new().unwrap();
        let gs = Ghostscript::new(&config(Some(dir.path().join("no-such-gs")), Duration::from_secs(1)));

        let input = dir.path().join("in.pdf");
        let output = dir.path().join("out.pdf");
        let err = gs.compress(&input, &output, CompressionLevel::Medium).await.unwrap_err();

        assert!(matches!(err, CompressionError::ToolNotFound { .. }), "unexpected error: {err:?}");
        assert!(gs.check().await.is_err());
    }

    #[cfg(unix)]
    mod with_fake_executable {
        use super::*;
        use std::os::unix::fs::PermissionsExt;

        /// Write an executable shell script standing in for Ghostscript.
        fn fake_gs(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("fake-gs");
            std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        const COPY_SCRIPT: &str = r#"
for arg in "$@"; do
  case "$arg" in
    -sOutputFile=*) out="${arg#-sOutputFile=}" ;;
  esac
  last="$arg"
done
cp "$last" "$out"
"#;

        #[tokio::test]
        async fn test_success_writes_output() {
            let dir = TempDir::new().unwrap();
            let gs = Ghostscript::new(&config(Some(fake_gs(dir.path(), COPY_SCRIPT)), Duration::from_secs(10)));

            let input = dir.path().join("in.pdf");
            let output = dir.path().join("out.pdf");
            std::fs::write(&input, b"%PDF-1.4 test").unwrap();

            gs.compress(&input, &output, CompressionLevel::Low).await.unwrap();

            assert_eq!(std::fs::read(&output).unwrap(), b"%PDF-1.4 test");
        }

        #[tokio::test]
        async fn test_non_zero_exit_is_failure() {
            let dir = TempDir::new().unwrap();
            let gs = Ghostscript::new(&config(
                Some(fake_gs(dir.path(), "echo 'Unrecoverable error' >&2\nexit 3")),
                Duration::from_secs(10),
            ));

            let err = gs
                .compress(&dir.path().join("in.pdf"), &dir.path().join("out.pdf"), CompressionLevel::Medium)
                .await
                .unwrap_err();

            match err {
                CompressionError::Failed { stderr, status, .. } => {
                    assert_eq!(stderr, "Unrecoverable error");
                    assert!(status.contains('3'), "status was {status}");
                }
                other => panic!("expected Failed, got {other:?}"),
            }
        }

        #[tokio::test]
        async fn test_slow_process_times_out() {
            let dir = TempDir::new().unwrap();
            let gs = Ghostscript::new(&config(Some(fake_gs(dir.path(), "sleep 5")), Duration::from_millis(100)));

            let start = std::time::Instant::now();
            let err = gs
                .compress(&dir.path().join("in.pdf"), &dir.path().join("out.pdf"), CompressionLevel::Medium)
                .await
                .unwrap_err();

            assert!(matches!(err, CompressionError::Timeout { .. }), "unexpected error: {err:?}");
            assert!(start.elapsed() < Duration::from_secs(4));
        }
    }
}
