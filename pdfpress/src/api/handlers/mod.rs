//! Axum route handlers.

pub mod compress;
pub mod download;
pub mod pages;
pub mod static_assets;
