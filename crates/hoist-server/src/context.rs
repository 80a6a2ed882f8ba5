//! Shared server state handed to every connection task.

use hoist_core::keys::ServerKeys;

use crate::config::ServerConfig;
use crate::files::FileManager;
use crate::users::UserManager;

/// Everything a connection needs to serve requests. Built once at startup
/// and shared behind an `Arc`; no piece of it is reachable any other way.
pub struct ServerContext {
    pub config: ServerConfig,
    pub keys: ServerKeys,
    pub users: UserManager,
    pub files: FileManager,
}
