//! HTTP layer.
//!
//! - **[`handlers`]**: Axum route handlers
//! - **[`models`]**: Data rendered by the handlers
//!
//! # Routes
//!
//! - `GET /`: the upload form
//! - `POST /compress`: upload, compress and show the result
//! - `GET /download/{filename}`: stream a compressed file once, then delete it
//! - `GET /static/*`: embedded assets

pub mod handlers;
pub mod models;
