//! Dropkeep: a password-gated drop box for short-lived files and snippets.
//!
//! Uploads land in a blob directory with their metadata in SQLite. Anyone
//! holding a drop id can download it until it expires or runs out of
//! downloads; a background janitor reclaims what is left.

pub mod api;
pub mod blob_store;
pub mod config;
pub mod context;
pub mod db;
pub mod drop_store;
pub mod error;
pub mod gate;
pub mod janitor;
pub mod metrics;
pub mod server;
