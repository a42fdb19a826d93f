//! HTTP handlers for static asset serving.

use axum::{
    extract::Path,
    http::header,
    response::{IntoResponse, Response},
};
use tracing::instrument;

use crate::api::handlers::pages;
use crate::static_assets;

/// `GET /static/{*path}`: serve a file embedded from `static/`.
#[instrument]
pub async fn serve_embedded_asset(Path(path): Path<String>) -> Response {
    let Some(content) = static_assets::Assets::get(&path) else {
        return pages::not_found().await;
    };

    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    (
        [
            (header::CONTENT_TYPE, mime.to_string()),
            (header::CACHE_CONTROL, "public, max-age=3600".to_string()),
        ],
        content.data.into_owned(),
    )
        .into_response()
}
