//! # hoist-server
//!
//! Daemon side of the hoist file drop. Clients connect over TCP, receive
//! the server's public key, wrap a fresh session key with it, and then
//! speak the sealed-frame protocol from `hoist-core`: log in, reserve
//! quota for an upload, stream the file in packets, and get a download
//! link back.
//!
//! The crate is a library so integration tests can boot a real server on
//! an ephemeral port; the binary in `main.rs` is a thin wrapper around
//! [`session::serve`].

pub mod config;
pub mod context;
pub mod error;
pub mod files;
pub mod handlers;
pub mod session;
pub mod users;

pub use config::ServerConfig;
pub use context::ServerContext;
pub use error::{Result, ServerError};
