//! HTML page rendering.
//!
//! Templates are embedded at build time (see [`crate::static_assets::Templates`]) and compiled
//! lazily on first use.

use std::sync::LazyLock;

use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::static_assets::Templates;

static ENVIRONMENT: LazyLock<Environment<'static>> = LazyLock::new(|| {
    let mut env = Environment::new();
    env.set_loader(|name| Ok(Templates::get(name).map(|file| String::from_utf8_lossy(&file.data).into_owned())));
    env
});

/// Render the embedded template `name` with `context`.
pub fn render<S: Serialize>(name: &str, context: S) -> Result<Html<String>, minijinja::Error> {
    ENVIRONMENT.get_template(name)?.render(context).map(Html)
}

/// The error page, falling back to plain text if the template itself is broken.
pub fn error_page(status: StatusCode, title: &str, message: &str) -> Response {
    match render("error.html", context! { error_title => title, error_message => message }) {
        Ok(page) => (status, page).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to render error page");
            (status, format!("{title}: {message}")).into_response()
        }
    }
}
