//! Connection lifecycle: accept loop, handshake, sealed-frame dispatch,
//! and teardown.
//!
//! A connection starts with the server's public key going out in the
//! clear. The client answers with a session key wrapped to that key, and
//! every frame after that is sealed. The server then reads one request at
//! a time, looks its opcode up in the handler table, and writes back
//! whatever the handler returned. Protocol violations drop the peer
//! without a reply; whatever upload was in flight is rolled back on the
//! way out.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use hoist_core::crypto::SessionKey;
use hoist_core::protocol::Opcode;
use hoist_core::wire::{self, FieldReader};
use hoist_core::WireError;

use crate::context::ServerContext;
use crate::error::{Result, ServerError};
use crate::handlers::HandlerMap;

/// An upload in flight on one connection. The transfer key doubles as
/// the staging file name.
pub struct UploadUnit {
    pub transfer_key: String,
    pub file_name: String,
    pub declared_size: u64,
    pub received: u64,
    pub file: tokio::fs::File,
}

/// Per-connection protocol state. One connection serves one user and at
/// most one upload at a time.
pub struct Connection {
    pub peer: SocketAddr,
    pub user_id: Option<String>,
    pub upload: Option<UploadUnit>,
    pub disconnect: bool,
}

impl Connection {
    pub fn new(peer: SocketAddr) -> Self {
        Self {
            peer,
            user_id: None,
            upload: None,
            disconnect: false,
        }
    }

    /// Roll back whatever upload is in flight: the staging file is
    /// removed and the reservation returned. Runs on every connection
    /// exit; without an upload in flight it does nothing.
    pub async fn abort_upload(&mut self, ctx: &ServerContext) {
        let Some(unit) = self.upload.take() else {
            return;
        };
        drop(unit.file);
        if let Err(e) = ctx.files.discard_stage(&unit.transfer_key).await {
            warn!(peer = %self.peer, error = %e, "Could not remove a staging file");
        }
        if let Some(user_id) = self.user_id.as_deref() {
            ctx.users.release(user_id, unit.declared_size).await;
            info!(
                peer = %self.peer,
                user = %user_id,
                file = %unit.file_name,
                "Upload aborted"
            );
        }
    }
}

/// Accept connections forever, one task per peer.
pub async fn serve(
    listener: TcpListener,
    ctx: Arc<ServerContext>,
    handlers: Arc<HandlerMap>,
) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(peer = %peer, "Connection accepted");
        let ctx = ctx.clone();
        let handlers = handlers.clone();
        tokio::spawn(async move {
            match serve_connection(stream, peer, &ctx, &handlers).await {
                Ok(()) => debug!(peer = %peer, "Connection closed"),
                Err(e) => warn!(peer = %peer, error = %e, "Connection failed"),
            }
        });
    }
}

/// Drive one connection to completion, then tear down whatever it left
/// in flight. Generic over the stream so tests can run it over an
/// in-memory pipe.
pub async fn serve_connection<S>(
    mut stream: S,
    peer: SocketAddr,
    ctx: &ServerContext,
    handlers: &HandlerMap,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut conn = Connection::new(peer);
    let result = drive(&mut stream, &mut conn, ctx, handlers).await;
    conn.abort_upload(ctx).await;
    result
}

async fn drive<S>(
    stream: &mut S,
    conn: &mut Connection,
    ctx: &ServerContext,
    handlers: &HandlerMap,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let limit = ctx.config.io_timeout;

    // Handshake: public key out, wrapped session key back.
    let der = ctx.keys.public_key_der()?;
    timed(limit, wire::write_frame(stream, &der)).await?;
    let wrapped = timed(limit, wire::read_frame(stream)).await?;
    let session_key: SessionKey = ctx.keys.unwrap_session_key(&wrapped)?;
    debug!(peer = %conn.peer, "Session key established");

    loop {
        let payload = match timed(limit, wire::read_sealed_frame(stream, &session_key)).await {
            Err(e) if is_clean_close(&e) => {
                debug!(peer = %conn.peer, "Peer closed the connection");
                return Ok(());
            }
            other => other?,
        };

        let mut reader = FieldReader::new(payload);
        let opcode_byte = reader.get_u8()?;
        let opcode =
            Opcode::from_byte(opcode_byte).ok_or(WireError::UnknownOpcode(opcode_byte))?;
        let handler = handlers
            .get(&opcode)
            .ok_or(WireError::UnknownOpcode(opcode_byte))?;

        let reply = handler.handle(ctx, conn, reader).await?;
        if let Some(payload) = reply {
            timed(
                limit,
                wire::write_sealed_frame(stream, &session_key, &payload),
            )
            .await?;
        }
        if conn.disconnect {
            debug!(peer = %conn.peer, "Closing the connection");
            return Ok(());
        }
    }
}

/// Apply the configured socket timeout to one read or write.
async fn timed<T, E, F>(limit: Duration, op: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    ServerError: From<E>,
{
    match tokio::time::timeout(limit, op).await {
        Ok(result) => result.map_err(ServerError::from),
        Err(_) => Err(ServerError::Timeout),
    }
}

/// A peer that hangs up between frames shows up as an unexpected EOF on
/// the next length read.
fn is_clean_close(err: &ServerError) -> bool {
    matches!(
        err,
        ServerError::Wire(WireError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof
    )
}
