//! One-shot download of a compressed file.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::header,
    response::Response,
};
use futures::Stream;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, instrument, warn};

use crate::AppState;
use crate::errors::{Error, Result};
use crate::storage;

/// `GET /download/{filename}`
///
/// Streams the file as an attachment. Once every byte has been handed to the connection and the
/// body is dropped, the file is deleted. A transfer abandoned part way leaves the file for the
/// cleanup sweep.
#[instrument(skip(state))]
pub async fn download(State(state): State<AppState>, Path(filename): Path<String>) -> Result<Response> {
    let not_found = || Error::OutputNotFound {
        filename: filename.clone(),
    };

    let path = storage::resolve_download(&state.config.compressed_dir, &filename).ok_or_else(not_found)?;

    let file = match File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(not_found()),
        Err(source) => return Err(Error::StreamFailure { path, source }),
    };
    let metadata = match file.metadata().await {
        Ok(metadata) if metadata.is_file() => metadata,
        Ok(_) => return Err(not_found()),
        Err(source) => return Err(Error::StreamFailure { path, source }),
    };

    let length = metadata.len();
    info!(path = %path.display(), bytes = length, "Starting download");

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    let attachment_name: String = filename
        .chars()
        .map(|c| if c.is_ascii_graphic() && c != '"' && c != '\\' { c } else { '_' })
        .collect();

    let body = Body::from_stream(RemoveWhenSent {
        inner: ReaderStream::new(file),
        path,
        remaining: length,
    });

    Response::builder()
        .header(header::CONTENT_TYPE, mime.to_string())
        .header(header::CONTENT_LENGTH, length)
        .header(header::CONTENT_DISPOSITION, format!("attachment; filename=\"{attachment_name}\""))
        .body(body)
        .map_err(|e| Error::Other(e.into()))
}

/// The file's byte stream, deleting the file on drop once all of its bytes went out.
struct RemoveWhenSent {
    inner: ReaderStream<File>,
    path: PathBuf,
    remaining: u64,
}

impl Stream for RemoveWhenSent {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let polled = Pin::new(&mut self.inner).poll_next(cx);
        if let Poll::Ready(Some(Ok(bytes))) = &polled {
            self.remaining = self.remaining.saturating_sub(bytes.len() as u64);
        }
        polled
    }
}

impl Drop for RemoveWhenSent {
    fn drop(&mut self) {
        if self.remaining > 0 {
            debug!(path = %self.path.display(), remaining = self.remaining, "Download incomplete, keeping file");
            return;
        }

        let path = std::mem::take(&mut self.path);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    storage::remove_best_effort(&path, "downloaded file").await;
                });
            }
            Err(_) => {
                if let Err(e) = std::fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "Failed to delete downloaded file");
                }
            }
        }
    }
}
