//! HTTP surface: webhook ingest plus the admin JSON API.

pub mod handlers;
pub mod models;
