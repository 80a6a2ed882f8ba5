//! # hoist-client
//!
//! Client library for the hoist upload service: a pinning connection, a
//! FIFO upload queue drained by a single background worker, and the
//! completion notice the embedding application shows, clipboard glue
//! included.
//!
//! The GUI, capture hotkeys, and settings persistence belong to the
//! embedding application. This crate wants a [`ClientConfig`] and a tokio
//! runtime, and hands back progress events plus one [`BatchReport`] per
//! drained batch.

pub mod config;
pub mod connection;
pub mod error;
pub mod notice;
pub mod queue;
pub mod worker;

pub use config::ClientConfig;
pub use connection::ClientSession;
pub use error::{ClientError, Result};
pub use notice::{apply_clipboard, completion_notice, BatchAbort, BatchReport, Notice};
pub use queue::{UploadItem, UploadQueue};
pub use worker::{Progress, UploadService};
