//! Server configuration loaded from environment variables.
//!
//! All settings have defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use hoist_core::constants::{DEFAULT_PORT, RSA_KEY_BITS};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address the upload listener binds to.
    /// Env: `HOIST_LISTEN_ADDR`
    /// Default: `0.0.0.0:1819`
    pub listen_addr: SocketAddr,

    /// Directory holding the server keypair and the metadata database.
    /// Env: `HOIST_DATA_DIR`
    /// Default: `./data`
    pub data_dir: PathBuf,

    /// Directory where completed uploads are stored, one file per id.
    /// Env: `HOIST_STORAGE_DIR`
    /// Default: `./data/files`
    pub storage_dir: PathBuf,

    /// Directory for in-flight transfers before they are promoted.
    /// Env: `HOIST_STAGING_DIR`
    /// Default: `./data/transfers`
    pub staging_dir: PathBuf,

    /// Download link template; `{id}` is replaced with the file id.
    /// Env: `HOIST_LINK_TEMPLATE`
    /// Default: `http://localhost:1819/d/{id}`
    pub link_template: String,

    /// RSA key size in bits for a freshly generated keypair.
    /// Env: `HOIST_RSA_BITS`
    /// Default: `2048`
    pub rsa_bits: usize,

    /// Quota in bytes granted to users created at bootstrap.
    /// Env: `HOIST_DEFAULT_QUOTA`
    /// Default: `1073741824` (1 GiB)
    pub default_quota: u64,

    /// How long a single socket read or write may take before the
    /// connection is dropped.
    /// Env: `HOIST_IO_TIMEOUT_SECS`
    /// Default: `60`
    pub io_timeout: Duration,

    /// Optional `user:password` pair provisioned at startup. An existing
    /// user gets their password reset; a new user is created with the
    /// default quota.
    /// Env: `HOIST_BOOTSTRAP_USER`
    /// Default: none.
    pub bootstrap_user: Option<(String, String)>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: ([0, 0, 0, 0], DEFAULT_PORT).into(),
            data_dir: PathBuf::from("./data"),
            storage_dir: PathBuf::from("./data/files"),
            staging_dir: PathBuf::from("./data/transfers"),
            link_template: format!("http://localhost:{}/d/{{id}}", DEFAULT_PORT),
            rsa_bits: RSA_KEY_BITS,
            default_quota: 1024 * 1024 * 1024, // 1 GiB
            io_timeout: Duration::from_secs(60),
            bootstrap_user: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HOIST_LISTEN_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.listen_addr = parsed;
            } else {
                tracing::warn!(
                    value = %addr,
                    "Invalid HOIST_LISTEN_ADDR, using default"
                );
            }
        }

        if let Ok(dir) = std::env::var("HOIST_DATA_DIR") {
            config.data_dir = PathBuf::from(&dir);
            // The storage and staging defaults follow the data directory
            // unless they are overridden themselves.
            config.storage_dir = config.data_dir.join("files");
            config.staging_dir = config.data_dir.join("transfers");
        }

        if let Ok(dir) = std::env::var("HOIST_STORAGE_DIR") {
            config.storage_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("HOIST_STAGING_DIR") {
            config.staging_dir = PathBuf::from(dir);
        }

        if let Ok(template) = std::env::var("HOIST_LINK_TEMPLATE") {
            if template.contains("{id}") {
                config.link_template = template;
            } else {
                tracing::warn!(
                    value = %template,
                    "HOIST_LINK_TEMPLATE has no {{id}} placeholder, using default"
                );
            }
        }

        if let Ok(val) = std::env::var("HOIST_RSA_BITS") {
            if let Ok(bits) = val.parse::<usize>() {
                config.rsa_bits = bits;
            } else {
                tracing::warn!(value = %val, "Invalid HOIST_RSA_BITS, using default");
            }
        }

        if let Ok(val) = std::env::var("HOIST_DEFAULT_QUOTA") {
            if let Ok(quota) = val.parse::<u64>() {
                config.default_quota = quota;
            } else {
                tracing::warn!(value = %val, "Invalid HOIST_DEFAULT_QUOTA, using default");
            }
        }

        if let Ok(val) = std::env::var("HOIST_IO_TIMEOUT_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                config.io_timeout = Duration::from_secs(secs);
            } else {
                tracing::warn!(value = %val, "Invalid HOIST_IO_TIMEOUT_SECS, using default");
            }
        }

        if let Ok(val) = std::env::var("HOIST_BOOTSTRAP_USER") {
            match parse_bootstrap_user(&val) {
                Some(pair) => config.bootstrap_user = Some(pair),
                None => {
                    tracing::warn!("HOIST_BOOTSTRAP_USER is not of the form user:password");
                }
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    /// Path of the SQLite database inside the data directory.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("hoist.db")
    }
}

/// Split a `user:password` pair. The password may itself contain colons;
/// only the first one separates the fields.
fn parse_bootstrap_user(raw: &str) -> Option<(String, String)> {
    let (user, password) = raw.split_once(':')?;
    if user.is_empty() || password.is_empty() {
        return None;
    }
    Some((user.to_string(), password.to_string()))
}
