use serde::Serialize;

use crate::compression::CompressionLevel;

/// Outcome of a successful compression, as shown on the result page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompressionResult {
    /// Sanitized name of the uploaded file
    pub original_file: String,
    /// Storage name of the compressed file, used for the download link
    pub compressed_file: String,
    /// KB, two decimals
    pub original_size: f64,
    /// KB, two decimals
    pub compressed_size: f64,
    /// Percentage saved, two decimals. Negative if the output grew.
    pub reduction: f64,
    pub level: CompressionLevel,
}
