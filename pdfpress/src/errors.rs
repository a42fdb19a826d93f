use crate::compression::CompressionError;
use crate::flash::Flash;
use crate::views;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::path::PathBuf;
use thiserror::Error as ThisError;

#[derive(ThisError, Debug)]
pub enum Error {
    /// The form had no `file` (or `pdf_file`) part
    #[error("No file uploaded")]
    NoFileProvided,

    /// A file part was present but had no filename
    #[error("No file selected")]
    EmptyFilename,

    /// The filename's extension is not in the allowed set
    #[error("File type not allowed: {filename}")]
    DisallowedExtension { filename: String, allowed: Vec<String> },

    /// Writing the upload (or preparing its output location) failed
    #[error("Failed to store upload at {}", path.display())]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Compression(#[from] CompressionError),

    /// Requested download does not exist
    #[error("Compressed file {filename} not found")]
    OutputNotFound { filename: String },

    /// The download exists but could not be opened for streaming
    #[error("Failed to stream {}", path.display())]
    StreamFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed multipart body
    #[error("{message}")]
    BadRequest { message: String },

    #[error("{message}")]
    PayloadTooLarge { message: String },

    #[error("{message}")]
    TooManyRequests { message: String },

    #[error(transparent)]
    Template(#[from] minijinja::Error),

    /// Unexpected error with full context chain
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// What the client sees for an error.
#[derive(Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Back to the upload form with a message
    Redirect(Flash),
    /// The error page
    Page {
        status: StatusCode,
        title: &'static str,
        message: String,
    },
}

const COMPRESSION_FAILED: &str = "Compression Failed";

impl Error {
    /// The single mapping from error kind to response.
    ///
    /// Messages never include server paths or tool output; those only go to the logs.
    pub fn disposition(&self) -> Disposition {
        match self {
            Error::NoFileProvided => Disposition::Redirect(Flash::danger("No file uploaded. Please choose a PDF file.")),
            Error::EmptyFilename => Disposition::Redirect(Flash::danger("No file selected. Please choose a PDF file.")),
            Error::DisallowedExtension { allowed, .. } => {
                let names = allowed.iter().map(|ext| ext.to_uppercase()).collect::<Vec<_>>().join(", ");
                Disposition::Redirect(Flash::danger(format!("Only {names} files are allowed.")))
            }
            Error::OutputNotFound { .. } => Disposition::Redirect(Flash::danger("File not found.")),
            Error::StreamFailure { .. } => Disposition::Redirect(Flash::danger("Download failed.")),
            Error::BadRequest { message } => Disposition::Page {
                status: StatusCode::BAD_REQUEST,
                title: "Invalid Upload",
                message: message.clone(),
            },
            Error::PayloadTooLarge { message } => Disposition::Page {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                title: "File Too Large",
                message: message.clone(),
            },
            Error::TooManyRequests { message } => Disposition::Page {
                status: StatusCode::TOO_MANY_REQUESTS,
                title: "Server Busy",
                message: message.clone(),
            },
            Error::StorageWrite { .. } => Disposition::Page {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                title: COMPRESSION_FAILED,
                message: "The upload could not be saved. Please try again.".to_string(),
            },
            Error::Compression(err) => Disposition::Page {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                title: COMPRESSION_FAILED,
                message: match err {
                    CompressionError::ToolNotFound { tool } => {
                        format!("{tool} is not installed on this server, so PDFs cannot be compressed right now.")
                    }
                    CompressionError::Timeout { .. } => "Compression took too long and was stopped.".to_string(),
                    CompressionError::Failed { .. } | CompressionError::Io { .. } => {
                        "The PDF could not be compressed. It may be damaged or password protected.".to_string()
                    }
                },
            },
            Error::Template(_) | Error::Other(_) => Disposition::Page {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                title: "500 - Server Error",
                message: "Internal server error. Please try again later.".to_string(),
            },
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        // Log full error details for debugging - different log levels based on severity
        match &self {
            Error::StorageWrite { .. } | Error::Compression(_) | Error::StreamFailure { .. } | Error::Template(_) | Error::Other(_) => {
                tracing::error!("Internal service error: {}", self.chain_report());
            }
            Error::TooManyRequests { .. } | Error::PayloadTooLarge { .. } => {
                tracing::warn!("Request rejected: {}", self);
            }
            Error::NoFileProvided
            | Error::EmptyFilename
            | Error::DisallowedExtension { .. }
            | Error::OutputNotFound { .. }
            | Error::BadRequest { .. } => {
                tracing::info!("Client error: {}", self);
            }
        }

        match self.disposition() {
            Disposition::Redirect(flash) => flash.redirect("/"),
            Disposition::Page { status, title, message } => views::error_page(status, title, &message),
        }
    }
}

impl Error {
    /// Full source chain as one line, for logging.
    fn chain_report(&self) -> String {
        let mut report = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            report.push_str(": ");
            report.push_str(&err.to_string());
            source = err.source();
        }
        report
    }
}

/// Type alias for handler results
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    fn redirect_message(err: Error) -> String {
        match err.disposition() {
            Disposition::Redirect(flash) => flash.message,
            other => panic!("expected redirect, got {other:?}"),
        }
    }

    #[test]
    fn test_validation_errors_redirect() {
        assert!(redirect_message(Error::NoFileProvided).contains("No file uploaded"));
        assert!(redirect_message(Error::EmptyFilename).contains("No file selected"));
        assert_eq!(
            redirect_message(Error::DisallowedExtension {
                filename: "notes.txt".to_string(),
                allowed: vec!["pdf".to_string()],
            }),
            "Only PDF files are allowed."
        );
        assert_eq!(
            redirect_message(Error::OutputNotFound {
                filename: "x.pdf".to_string()
            }),
            "File not found."
        );
        assert_eq!(
            redirect_message(Error::StreamFailure {
                path: "/srv/compressed/x.pdf".into(),
                source: std::io::Error::other("read failed"),
            }),
            "Download failed."
        );
    }

    #[test]
    fn test_tool_failures_are_server_errors_without_details() {
        let err = Error::Compression(CompressionError::Failed {
            tool: "Ghostscript".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "Error reading /srv/uploads/original/secret.pdf".to_string(),
        });

        match err.disposition() {
            Disposition::Page { status, message, .. } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert!(!message.contains("/srv"));
            }
            other => panic!("expected page, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_tool_message_is_distinct() {
        let missing = Error::Compression(CompressionError::ToolNotFound {
            tool: "Ghostscript".to_string(),
        });
        let failed = Error::Compression(CompressionError::Failed {
            tool: "Ghostscript".to_string(),
            status: "exit status: 1".to_string(),
            stderr: String::new(),
        });

        assert_ne!(missing.disposition(), failed.disposition());
        match missing.disposition() {
            Disposition::Page { message, .. } => assert!(message.contains("not installed")),
            other => panic!("expected page, got {other:?}"),
        }
    }

    #[test]
    fn test_storage_failure_hides_path() {
        let err = Error::StorageWrite {
            path: PathBuf::from("/srv/uploads/original/abc_report.pdf"),
            source: std::io::Error::other("disk full"),
        };

        assert!(err.chain_report().contains("disk full"));
        match err.disposition() {
            Disposition::Page { status, message, .. } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert!(!message.contains("/srv"));
            }
            other => panic!("expected page, got {other:?}"),
        }
    }

    #[test]
    fn test_limits_map_to_statuses() {
        let too_large = Error::PayloadTooLarge {
            message: "too big".to_string(),
        };
        let busy = Error::TooManyRequests {
            message: "busy".to_string(),
        };

        assert!(matches!(
            too_large.disposition(),
            Disposition::Page {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                ..
            }
        ));
        assert!(matches!(
            busy.disposition(),
            Disposition::Page {
                status: StatusCode::TOO_MANY_REQUESTS,
                ..
            }
        ));
    }
}
