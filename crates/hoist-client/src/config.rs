//! Client configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Settings for one upload service instance.
///
/// The embedding application owns settings persistence and the account
/// dialog; this struct is the plain data handed over once those exist.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server the worker uploads to.
    pub server_addr: SocketAddr,
    /// Account name sent with the login request.
    pub user_id: String,
    /// Account password sent with the login request.
    pub password: String,
    /// JSON file holding the pinned server fingerprints.
    pub trust_store_path: PathBuf,
    /// Where temporary artifacts (screenshots, clipboard captures) are
    /// moved after their upload is resolved. `None` deletes them instead.
    pub archive_dir: Option<PathBuf>,
}
