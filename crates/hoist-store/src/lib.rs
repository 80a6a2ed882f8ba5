//! # hoist-store
//!
//! SQLite-backed metadata store for the upload server: user accounts with
//! their quota counters, and one record per stored file.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for both tables.
//! File bytes never pass through here; they live on the filesystem and only
//! their metadata is recorded.

pub mod database;
pub mod files;
pub mod migrations;
pub mod models;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
