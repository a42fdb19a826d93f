//! The upload form and the not-found page.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use minijinja::context;

use crate::AppState;
use crate::compression::CompressionLevel;
use crate::errors::Result;
use crate::flash::Flash;
use crate::views;

/// `GET /`: the upload form, showing (and consuming) any pending flash message.
pub async fn index(State(state): State<AppState>, headers: HeaderMap) -> Result<Response> {
    let config = &state.config;
    let flash = Flash::from_headers(&headers);
    let had_flash = flash.is_some();

    let accept = config
        .allowed_extensions
        .iter()
        .map(|ext| format!(".{ext}"))
        .collect::<Vec<_>>()
        .join(",");

    let page = views::render(
        "index.html",
        context! {
            flash => flash,
            levels => CompressionLevel::ALL,
            default_level => config.default_compression_level,
            max_upload => config.max_upload_size_display(),
            accept => accept,
        },
    )?;

    let mut response = page.into_response();
    if had_flash {
        response.headers_mut().append(header::SET_COOKIE, Flash::clear_cookie());
    }
    Ok(response)
}

/// Fallback for unknown routes.
pub async fn not_found() -> Response {
    views::error_page(
        StatusCode::NOT_FOUND,
        "404 - Page Not Found",
        "The page you are looking for does not exist.",
    )
}
