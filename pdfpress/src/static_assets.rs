//! Embedded static assets and page templates.

use rust_embed::RustEmbed;

#[derive(RustEmbed)]
#[folder = "static/"]
pub struct Assets;

#[derive(RustEmbed)]
#[folder = "templates/"]
pub struct Templates;
