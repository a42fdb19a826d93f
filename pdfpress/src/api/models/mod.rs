//! Data passed from handlers to the HTML views.

pub mod compression;
