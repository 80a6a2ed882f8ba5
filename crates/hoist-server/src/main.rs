//! # hoist-server binary
//!
//! Boots the upload daemon:
//! - loads configuration from `HOIST_*` environment variables
//! - loads or generates the RSA keypair clients pin
//! - opens the SQLite metadata store and sweeps abandoned transfers
//! - accepts upload sessions until Ctrl+C

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hoist_core::keys::{fingerprint, ServerKeys};
use hoist_store::Database;

use hoist_server::config::ServerConfig;
use hoist_server::context::ServerContext;
use hoist_server::files::FileManager;
use hoist_server::handlers::build_handler_map;
use hoist_server::session;
use hoist_server::users::UserManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,hoist_server=debug")),
        )
        .init();

    info!("Starting hoist server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        listen = %config.listen_addr,
        data_dir = %config.data_dir.display(),
        storage_dir = %config.storage_dir.display(),
        staging_dir = %config.staging_dir.display(),
        "Loaded configuration"
    );

    std::fs::create_dir_all(&config.data_dir)?;
    std::fs::create_dir_all(&config.storage_dir)?;
    std::fs::create_dir_all(&config.staging_dir)?;

    // -----------------------------------------------------------------------
    // 3. Server keypair
    // -----------------------------------------------------------------------
    let (keys, generated) = ServerKeys::load_or_generate(&config.data_dir, config.rsa_bits)?;
    if generated {
        info!(bits = config.rsa_bits, "Generated a new server keypair");
    } else if keys.bit_size() != config.rsa_bits {
        anyhow::bail!(
            "existing keypair has {} bits but HOIST_RSA_BITS asks for {}; \
             move the old key files away to regenerate",
            keys.bit_size(),
            config.rsa_bits
        );
    }
    // Clients pin this; operators compare it out of band.
    info!(
        fingerprint = %fingerprint(&keys.public_key_der()?),
        "Server key fingerprint"
    );

    // -----------------------------------------------------------------------
    // 4. Metadata store and managers
    // -----------------------------------------------------------------------
    let db = Arc::new(Mutex::new(Database::open_at(&config.database_path())?));
    let users = UserManager::new(db.clone());
    let files = FileManager::new(db, &config);

    if let Some((user_id, password)) = config.bootstrap_user.clone() {
        if users.user_exists(&user_id).await? {
            users.set_password(&user_id, &password).await?;
            info!(user = %user_id, "Bootstrap user password reset");
        } else {
            users
                .add_user(&user_id, &password, config.default_quota)
                .await?;
            info!(
                user = %user_id,
                quota = config.default_quota,
                "Bootstrap user created"
            );
        }
    }

    // Transfers staged by a previous process can have no owner anymore.
    files.sweep_staging().await?;

    // -----------------------------------------------------------------------
    // 5. Accept upload sessions until shutdown
    // -----------------------------------------------------------------------
    let listener = TcpListener::bind(config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for uploads");

    let ctx = Arc::new(ServerContext {
        config,
        keys,
        users,
        files,
    });
    let handlers = Arc::new(build_handler_map());

    tokio::select! {
        result = session::serve(listener, ctx, handlers) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "Accept loop failed");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
