//! Upload, compress, and report on a single PDF.
//!
//! The upload is streamed to `upload_dir` under a unique storage name, handed to the compression
//! backend, and deleted again whatever the outcome. The compressed output stays in
//! `compressed_dir` until it is downloaded (or swept as stale).

use std::path::PathBuf;

use axum::{
    extract::{
        Multipart, State,
        multipart::{Field, MultipartError, MultipartRejection},
    },
    http::StatusCode,
    response::Html,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info, instrument};

use crate::AppState;
use crate::api::models::compression::CompressionResult;
use crate::compression::CompressionLevel;
use crate::config::Config;
use crate::errors::{Error, Result};
use crate::{storage, views};

/// Multipart field carrying the file.
const FILE_FIELD: &str = "file";
/// Field name older forms used. Only consulted when no `file` part is present.
const LEGACY_FILE_FIELD: &str = "pdf_file";

struct Upload {
    /// Sanitized client filename
    display_name: String,
    storage_name: String,
    path: PathBuf,
}

#[derive(Default)]
struct UploadForm {
    upload: Option<Upload>,
    /// A `file` part has been seen; legacy parts are ignored from then on
    saw_primary: bool,
    /// Why the legacy part was rejected, reported only if no `file` part follows
    legacy_rejection: Option<Error>,
    level: Option<String>,
}

impl UploadForm {
    async fn discard(self) {
        if let Some(upload) = self.upload {
            storage::remove_best_effort(&upload.path, "abandoned upload").await;
        }
    }
}

fn multipart_error(err: MultipartError, config: &Config) -> Error {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge {
            message: format!(
                "The file exceeds the maximum upload size of {}.",
                config.max_upload_size_display()
            ),
        }
    } else {
        Error::BadRequest {
            message: format!("The upload could not be read: {}", err.body_text()),
        }
    }
}

/// `POST /compress`
#[instrument(skip_all)]
pub async fn compress(
    State(state): State<AppState>,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<Html<String>> {
    let multipart = multipart.map_err(|rejection| {
        debug!(error = %rejection, "Compress called without a multipart body");
        Error::NoFileProvided
    })?;

    let UploadForm { upload, level, .. } = read_form(&state.config, multipart).await?;
    let upload = upload.ok_or(Error::NoFileProvided)?;
    let level = level
        .as_deref()
        .map(CompressionLevel::parse_lenient)
        .unwrap_or(state.config.default_compression_level);

    let result = compress_upload(&state, &upload, level).await;
    storage::remove_best_effort(&upload.path, "original upload").await;
    let result = result?;

    info!(
        original = %result.original_file,
        compressed = %result.compressed_file,
        original_kb = result.original_size,
        compressed_kb = result.compressed_size,
        reduction = result.reduction,
        level = %level,
        "Compression finished"
    );

    Ok(views::render("result.html", &result)?)
}

/// Walk the multipart fields, saving the file part and remembering the level.
///
/// A `file` part always wins over a `pdf_file` part, whatever their order. Parts without a
/// filename are plain form values, not files, and are ignored. If anything fails after a file was
/// saved, the saved file is removed before returning.
async fn read_form(config: &Config, mut multipart: Multipart) -> Result<UploadForm> {
    let mut form = UploadForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                form.discard().await;
                return Err(multipart_error(e, config));
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        let is_file_part = field.file_name().is_some();

        if name == FILE_FIELD && is_file_part && !form.saw_primary {
            form.saw_primary = true;
            form.legacy_rejection = None;
            if let Some(legacy) = form.upload.take() {
                storage::remove_best_effort(&legacy.path, "superseded legacy upload").await;
            }

            match save_upload(config, field).await {
                Ok(upload) => form.upload = Some(upload),
                Err(e) => {
                    form.discard().await;
                    return Err(e);
                }
            }
        } else if name == LEGACY_FILE_FIELD && is_file_part && !form.saw_primary && form.upload.is_none() {
            match save_upload(config, field).await {
                Ok(upload) => form.upload = Some(upload),
                Err(e @ (Error::EmptyFilename | Error::DisallowedExtension { .. })) => form.legacy_rejection = Some(e),
                Err(e) => {
                    form.discard().await;
                    return Err(e);
                }
            }
        } else if name == "compression_level" {
            match field.text().await {
                Ok(text) => form.level = Some(text),
                Err(e) => {
                    form.discard().await;
                    return Err(multipart_error(e, config));
                }
            }
        }
        // Anything else, including a second file part, is skipped
    }

    if form.upload.is_none()
        && let Some(rejection) = form.legacy_rejection.take()
    {
        return Err(rejection);
    }
    Ok(form)
}

/// Validate the file part's name and stream its contents to the upload directory.
async fn save_upload(config: &Config, mut field: Field<'_>) -> Result<Upload> {
    let filename = field.file_name().unwrap_or_default().to_string();
    if filename.is_empty() {
        return Err(Error::EmptyFilename);
    }

    if !storage::is_allowed_extension(&filename, &config.allowed_extensions) {
        return Err(Error::DisallowedExtension {
            filename,
            allowed: config.allowed_extensions.clone(),
        });
    }

    // Sanitizing can eat the whole name (or just its extension) for non-ASCII names
    let display_name = storage::sanitize_filename(&filename)
        .filter(|name| storage::is_allowed_extension(name, &config.allowed_extensions))
        .unwrap_or_else(|| format!("document.{}", storage::extension(&filename).unwrap_or_default()));
    let storage_name = storage::unique_storage_name(&display_name);
    let path = config.upload_dir.join(&storage_name);

    let storage_error = |source| Error::StorageWrite {
        path: path.clone(),
        source,
    };

    fs::create_dir_all(&config.upload_dir).await.map_err(storage_error)?;
    let mut file = File::create(&path).await.map_err(storage_error)?;

    let written = write_field(&mut field, &mut file, config, &path).await;
    drop(file);

    match written {
        Ok(bytes) => {
            info!(storage_name = %storage_name, bytes, "Saved upload");
            Ok(Upload {
                display_name,
                storage_name,
                path,
            })
        }
        Err(e) => {
            storage::remove_best_effort(&path, "partial upload").await;
            Err(e)
        }
    }
}

async fn write_field(field: &mut Field<'_>, file: &mut File, config: &Config, path: &std::path::Path) -> Result<u64> {
    let storage_error = |source| Error::StorageWrite {
        path: path.to_path_buf(),
        source,
    };

    let mut total = 0u64;
    while let Some(chunk) = field.chunk().await.map_err(|e| multipart_error(e, config))? {
        total += chunk.len() as u64;
        file.write_all(&chunk).await.map_err(storage_error)?;
    }
    file.flush().await.map_err(storage_error)?;

    Ok(total)
}

/// Run the backend on a saved upload and measure the result.
///
/// Does not delete the input; the caller owns it.
async fn compress_upload(state: &AppState, upload: &Upload, level: CompressionLevel) -> Result<CompressionResult> {
    let config = &state.config;

    let output_path = storage::output_path_for(&upload.storage_name, &config.compressed_dir)
        .await
        .map_err(|source| Error::StorageWrite {
            path: config.compressed_dir.clone(),
            source,
        })?;

    let original_size = storage::size_of(&upload.path).await;

    let permit = state.limiters.acquire_compression().await?;
    let outcome = state.backend.compress(&upload.path, &output_path, level).await;
    drop(permit);

    let outcome = match outcome {
        Ok(()) => match fs::metadata(&output_path).await {
            Ok(_) => Ok(()),
            Err(e) => Err(Error::Other(anyhow::anyhow!(
                "{} reported success but wrote no output: {e}",
                state.backend.name()
            ))),
        },
        Err(e) => Err(Error::Compression(e)),
    };

    if let Err(e) = outcome {
        metrics::counter!("pdfpress_compressions_total", "level" => level.as_str(), "outcome" => "failure").increment(1);
        storage::remove_best_effort(&output_path, "partial compressed output").await;
        return Err(e);
    }

    let compressed_size = storage::size_of(&output_path).await;
    metrics::counter!("pdfpress_compressions_total", "level" => level.as_str(), "outcome" => "success").increment(1);

    Ok(CompressionResult {
        original_file: upload.display_name.clone(),
        compressed_file: output_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        original_size,
        compressed_size,
        reduction: storage::reduction_percent(original_size, compressed_size),
        level,
    })
}
