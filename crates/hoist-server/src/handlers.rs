//! Request handlers, one per opcode.
//!
//! The dispatch table is built once at startup with [`build_handler_map`];
//! the connection loop looks the opcode up there and hands the decoded
//! frame over. Handlers never touch the socket. They return the response
//! payload to seal, or `None` for the cases where the protocol drops the
//! peer without a word, and flag the connection for disconnect where the
//! exchange must not continue.

use std::collections::HashMap;

use chrono::Utc;
use subtle::ConstantTimeEq;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use uuid::Uuid;

use hoist_core::constants::{CHUNK_SIZE, MAX_FILE_NAME_BYTES};
use hoist_core::protocol::{
    FinishUploadRequest, FinishUploadResponse, InitiateUploadRequest, InitiateUploadResponse,
    LoginRequest, LoginResponse, Opcode, UploadPacketRequest, UploadPacketResponse,
};
use hoist_core::wire::FieldReader;
use hoist_store::FileRecord;

use crate::context::ServerContext;
use crate::error::Result;
use crate::session::{Connection, UploadUnit};

#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one decoded request. `Ok(Some(bytes))` is sealed and sent
    /// back; `Ok(None)` sends nothing. Errors tear the connection down.
    async fn handle(
        &self,
        ctx: &ServerContext,
        conn: &mut Connection,
        reader: FieldReader,
    ) -> Result<Option<Vec<u8>>>;
}

pub type HandlerMap = HashMap<Opcode, Box<dyn MessageHandler>>;

/// The full opcode table. Built in one place so a new opcode cannot be
/// wired up without showing here.
pub fn build_handler_map() -> HandlerMap {
    let mut map: HandlerMap = HashMap::new();
    map.insert(Opcode::Login, Box::new(LoginHandler));
    map.insert(Opcode::InitiateUpload, Box::new(InitiateUploadHandler));
    map.insert(Opcode::UploadPacket, Box::new(UploadPacketHandler));
    map.insert(Opcode::FinishUpload, Box::new(FinishUploadHandler));
    map
}

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

struct LoginHandler;

#[async_trait::async_trait]
impl MessageHandler for LoginHandler {
    async fn handle(
        &self,
        ctx: &ServerContext,
        conn: &mut Connection,
        reader: FieldReader,
    ) -> Result<Option<Vec<u8>>> {
        if conn.user_id.is_some() {
            warn!(peer = %conn.peer, "Login on an already authenticated connection");
            conn.disconnect = true;
            return Ok(None);
        }

        let req = LoginRequest::decode(reader)?;
        if ctx.users.authenticate(&req.user_id, &req.password).await? {
            info!(peer = %conn.peer, user = %req.user_id, "User logged in");
            conn.user_id = Some(req.user_id);
            Ok(Some(LoginResponse { accepted: true }.encode()))
        } else {
            // The refusal is acknowledged before the connection closes so
            // the client can tell bad credentials from a dead server.
            warn!(peer = %conn.peer, user = %req.user_id, "Login rejected");
            conn.disconnect = true;
            Ok(Some(LoginResponse { accepted: false }.encode()))
        }
    }
}

// ---------------------------------------------------------------------------
// InitiateUpload
// ---------------------------------------------------------------------------

struct InitiateUploadHandler;

#[async_trait::async_trait]
impl MessageHandler for InitiateUploadHandler {
    async fn handle(
        &self,
        ctx: &ServerContext,
        conn: &mut Connection,
        reader: FieldReader,
    ) -> Result<Option<Vec<u8>>> {
        let Some(user_id) = conn.user_id.clone() else {
            warn!(peer = %conn.peer, "Upload initiated before login");
            conn.disconnect = true;
            return Ok(None);
        };
        if conn.upload.is_some() {
            warn!(peer = %conn.peer, "Upload initiated while another is in flight");
            conn.disconnect = true;
            return Ok(None);
        }

        let req = InitiateUploadRequest::decode(reader)?;

        // Refusals keep the session alive; the client may try the next
        // file in its batch.
        if let Err(reason) = validate_file_name(&req.file_name) {
            warn!(peer = %conn.peer, user = %user_id, reason, "Upload refused");
            return Ok(Some(InitiateUploadResponse::rejected().encode()?));
        }
        if req.size == 0 {
            warn!(peer = %conn.peer, user = %user_id, "Upload refused: empty file");
            return Ok(Some(InitiateUploadResponse::rejected().encode()?));
        }
        if !ctx.users.reserve(&user_id, req.size).await? {
            warn!(
                peer = %conn.peer,
                user = %user_id,
                size = req.size,
                "Upload refused: quota exhausted"
            );
            return Ok(Some(InitiateUploadResponse::rejected().encode()?));
        }

        let transfer_key = Uuid::new_v4().simple().to_string();
        let temp_path = ctx.files.stage_path(&transfer_key);
        let file = match tokio::fs::OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(&temp_path)
            .await
        {
            Ok(file) => file,
            Err(e) => {
                ctx.users.release(&user_id, req.size).await;
                return Err(e.into());
            }
        };

        info!(
            peer = %conn.peer,
            user = %user_id,
            file = %req.file_name,
            size = req.size,
            "Upload started"
        );
        conn.upload = Some(UploadUnit {
            transfer_key: transfer_key.clone(),
            file_name: req.file_name,
            declared_size: req.size,
            received: 0,
            file,
        });
        Ok(Some(InitiateUploadResponse { transfer_key }.encode()?))
    }
}

fn validate_file_name(name: &str) -> std::result::Result<(), &'static str> {
    if name.is_empty() {
        return Err("empty file name");
    }
    if name.len() > MAX_FILE_NAME_BYTES {
        return Err("file name too long");
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err("file name contains a path");
    }
    if name.contains('\0') {
        return Err("file name contains a NUL byte");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// UploadPacket
// ---------------------------------------------------------------------------

struct UploadPacketHandler;

#[async_trait::async_trait]
impl MessageHandler for UploadPacketHandler {
    async fn handle(
        &self,
        _ctx: &ServerContext,
        conn: &mut Connection,
        reader: FieldReader,
    ) -> Result<Option<Vec<u8>>> {
        if conn.user_id.is_none() {
            warn!(peer = %conn.peer, "Packet before login");
            conn.disconnect = true;
            return Ok(None);
        }
        let Some(unit) = conn.upload.as_mut() else {
            warn!(peer = %conn.peer, "Packet without an upload in flight");
            conn.disconnect = true;
            return Ok(None);
        };

        let req = UploadPacketRequest::decode(reader)?;

        let key_matches: bool = req
            .transfer_key
            .as_bytes()
            .ct_eq(unit.transfer_key.as_bytes())
            .into();
        if !key_matches {
            warn!(peer = %conn.peer, "Packet carries the wrong transfer key");
            conn.disconnect = true;
            return Ok(None);
        }
        if req.data.is_empty() || req.data.len() > CHUNK_SIZE {
            warn!(peer = %conn.peer, len = req.data.len(), "Packet size out of range");
            conn.disconnect = true;
            return Ok(None);
        }
        let received = match unit.received.checked_add(req.data.len() as u64) {
            Some(n) if n <= unit.declared_size => n,
            _ => {
                warn!(
                    peer = %conn.peer,
                    declared = unit.declared_size,
                    "Packet runs past the declared file size"
                );
                conn.disconnect = true;
                return Ok(None);
            }
        };

        unit.file.write_all(&req.data).await?;
        unit.received = received;
        Ok(Some(UploadPacketResponse.encode()))
    }
}

// ---------------------------------------------------------------------------
// FinishUpload
// ---------------------------------------------------------------------------

struct FinishUploadHandler;

#[async_trait::async_trait]
impl MessageHandler for FinishUploadHandler {
    async fn handle(
        &self,
        ctx: &ServerContext,
        conn: &mut Connection,
        reader: FieldReader,
    ) -> Result<Option<Vec<u8>>> {
        let Some(user_id) = conn.user_id.clone() else {
            warn!(peer = %conn.peer, "Finish before login");
            conn.disconnect = true;
            return Ok(None);
        };
        FinishUploadRequest::decode(reader)?;
        let Some(unit) = conn.upload.take() else {
            warn!(peer = %conn.peer, "Finish without an upload in flight");
            conn.disconnect = true;
            return Ok(None);
        };

        if unit.received != unit.declared_size {
            warn!(
                peer = %conn.peer,
                user = %user_id,
                received = unit.received,
                declared = unit.declared_size,
                "Finish before the declared bytes arrived"
            );
            // Hand the unit back so the connection teardown removes the
            // staging file and the reservation.
            conn.upload = Some(unit);
            conn.disconnect = true;
            return Ok(None);
        }

        let link = finalize_upload(ctx, &user_id, unit).await?;
        info!(peer = %conn.peer, user = %user_id, link = %link, "Upload completed");
        Ok(Some(FinishUploadResponse { link }.encode()?))
    }
}

/// Promote a fully received transfer: flush and close the handle, move
/// the bytes into storage under a fresh id, record them, and charge the
/// quota. The record only becomes downloadable as the last step, and
/// every failure unwinds what was done so far, so a failed finish leaves
/// neither a record nor reachable bytes behind.
async fn finalize_upload(ctx: &ServerContext, user_id: &str, unit: UploadUnit) -> Result<String> {
    let UploadUnit {
        transfer_key,
        file_name,
        declared_size,
        file,
        ..
    } = unit;

    if let Err(e) = file.sync_all().await {
        abort_stage(ctx, user_id, &transfer_key, declared_size).await;
        return Err(e.into());
    }
    drop(file);

    let file_id = match ctx.files.new_file_id().await {
        Ok(id) => id,
        Err(e) => {
            abort_stage(ctx, user_id, &transfer_key, declared_size).await;
            return Err(e);
        }
    };

    if let Err(e) = ctx.files.promote(&transfer_key, &file_id).await {
        abort_stage(ctx, user_id, &transfer_key, declared_size).await;
        return Err(e);
    }

    // The bytes live in storage from here on; unwinding removes them there.
    let record = FileRecord {
        file_id: file_id.clone(),
        owner: user_id.to_string(),
        file_name,
        size: i64::try_from(declared_size).unwrap_or(i64::MAX),
        downloadable: false,
        created_at: Utc::now(),
    };
    if let Err(e) = ctx.files.add_record(&record).await {
        remove_stored_logged(ctx, &file_id).await;
        ctx.users.release(user_id, declared_size).await;
        return Err(e);
    }

    if let Err(e) = ctx.users.commit(user_id, declared_size).await {
        remove_record_logged(ctx, &file_id).await;
        remove_stored_logged(ctx, &file_id).await;
        ctx.users.release(user_id, declared_size).await;
        return Err(e);
    }

    if let Err(e) = ctx.files.set_downloadable(&file_id).await {
        if let Err(refund_err) = ctx.users.refund(user_id, declared_size).await {
            warn!(user = %user_id, error = %refund_err, "Refund after a failed publish failed too");
        }
        remove_record_logged(ctx, &file_id).await;
        remove_stored_logged(ctx, &file_id).await;
        return Err(e);
    }

    Ok(ctx.files.link_for(&file_id))
}

/// Unwind helper for failures while the bytes are still in staging.
async fn abort_stage(ctx: &ServerContext, user_id: &str, transfer_key: &str, size: u64) {
    if let Err(e) = ctx.files.discard_stage(transfer_key).await {
        warn!(error = %e, "Could not remove a staging file during unwind");
    }
    ctx.users.release(user_id, size).await;
}

async fn remove_stored_logged(ctx: &ServerContext, file_id: &str) {
    if let Err(e) = ctx.files.remove_stored(file_id).await {
        warn!(file_id = %file_id, error = %e, "Could not remove a stored file during unwind");
    }
}

async fn remove_record_logged(ctx: &ServerContext, file_id: &str) {
    if let Err(e) = ctx.files.delete_record(file_id).await {
        warn!(file_id = %file_id, error = %e, "Could not remove a file record during unwind");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tokio::sync::Mutex;

    use hoist_core::keys::ServerKeys;
    use hoist_store::Database;

    use crate::config::ServerConfig;
    use crate::files::FileManager;
    use crate::users::UserManager;

    const QUOTA: u64 = 1 << 20;

    async fn test_ctx() -> (Arc<ServerContext>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            data_dir: dir.path().to_path_buf(),
            storage_dir: dir.path().join("files"),
            staging_dir: dir.path().join("transfers"),
            link_template: "https://dl.example/{id}".to_string(),
            ..ServerConfig::default()
        };
        std::fs::create_dir_all(&config.storage_dir).unwrap();
        std::fs::create_dir_all(&config.staging_dir).unwrap();

        let db = Arc::new(Mutex::new(
            Database::open_at(&config.database_path()).unwrap(),
        ));
        let users = UserManager::new(db.clone());
        users.add_user("alice", "s3cret", QUOTA).await.unwrap();
        let files = FileManager::new(db, &config);
        let keys = ServerKeys::generate(1024).unwrap();

        let ctx = ServerContext {
            config,
            keys,
            users,
            files,
        };
        (Arc::new(ctx), dir)
    }

    fn test_conn() -> Connection {
        Connection::new(([127, 0, 0, 1], 9999).into())
    }

    /// Position a reader past the opcode byte, the way the connection
    /// loop hands payloads to handlers.
    fn request_reader(payload: Vec<u8>) -> FieldReader {
        let mut reader = FieldReader::new(payload);
        reader.get_u8().unwrap();
        reader
    }

    async fn login(ctx: &ServerContext, conn: &mut Connection) {
        let req = LoginRequest {
            user_id: "alice".to_string(),
            password: "s3cret".to_string(),
        };
        let reply = LoginHandler
            .handle(ctx, conn, request_reader(req.encode().unwrap()))
            .await
            .unwrap()
            .unwrap();
        assert!(LoginResponse::decode(reply).unwrap().accepted);
    }

    async fn initiate(ctx: &ServerContext, conn: &mut Connection, name: &str, size: u64) -> String {
        let req = InitiateUploadRequest {
            file_name: name.to_string(),
            size,
        };
        let reply = InitiateUploadHandler
            .handle(ctx, conn, request_reader(req.encode().unwrap()))
            .await
            .unwrap()
            .unwrap();
        let resp = InitiateUploadResponse::decode(reply).unwrap();
        resp.granted().expect("upload should be granted").to_string()
    }

    async fn send_packet(
        ctx: &ServerContext,
        conn: &mut Connection,
        key: &str,
        data: &[u8],
    ) -> Option<Vec<u8>> {
        let req = UploadPacketRequest {
            transfer_key: key.to_string(),
            data: data.to_vec(),
        };
        UploadPacketHandler
            .handle(ctx, conn, request_reader(req.encode().unwrap()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn login_accepts_good_credentials() {
        let (ctx, _dir) = test_ctx().await;
        let mut conn = test_conn();

        login(&ctx, &mut conn).await;
        assert_eq!(conn.user_id.as_deref(), Some("alice"));
        assert!(!conn.disconnect);
    }

    #[tokio::test]
    async fn login_rejection_replies_then_disconnects() {
        let (ctx, _dir) = test_ctx().await;
        let mut conn = test_conn();

        let req = LoginRequest {
            user_id: "alice".to_string(),
            password: "wrong".to_string(),
        };
        let reply = LoginHandler
            .handle(&ctx, &mut conn, request_reader(req.encode().unwrap()))
            .await
            .unwrap()
            .unwrap();

        assert!(!LoginResponse::decode(reply).unwrap().accepted);
        assert!(conn.disconnect);
        assert!(conn.user_id.is_none());
    }

    #[tokio::test]
    async fn second_login_drops_without_reply() {
        let (ctx, _dir) = test_ctx().await;
        let mut conn = test_conn();
        login(&ctx, &mut conn).await;

        let req = LoginRequest {
            user_id: "alice".to_string(),
            password: "s3cret".to_string(),
        };
        let reply = LoginHandler
            .handle(&ctx, &mut conn, request_reader(req.encode().unwrap()))
            .await
            .unwrap();

        assert!(reply.is_none());
        assert!(conn.disconnect);
    }

    #[tokio::test]
    async fn initiate_requires_login() {
        let (ctx, _dir) = test_ctx().await;
        let mut conn = test_conn();

        let req = InitiateUploadRequest {
            file_name: "notes.txt".to_string(),
            size: 5,
        };
        let reply = InitiateUploadHandler
            .handle(&ctx, &mut conn, request_reader(req.encode().unwrap()))
            .await
            .unwrap();

        assert!(reply.is_none());
        assert!(conn.disconnect);
    }

    #[tokio::test]
    async fn initiate_grants_key_and_reserves_quota() {
        let (ctx, _dir) = test_ctx().await;
        let mut conn = test_conn();
        login(&ctx, &mut conn).await;

        let key = initiate(&ctx, &mut conn, "notes.txt", 5).await;

        assert!(conn.upload.is_some());
        assert!(!conn.disconnect);
        assert!(ctx.files.stage_path(&key).exists());
        assert_eq!(ctx.users.reserved_bytes("alice").await, 5);
    }

    #[tokio::test]
    async fn initiate_refuses_bad_requests_but_keeps_session() {
        let (ctx, _dir) = test_ctx().await;
        let mut conn = test_conn();
        login(&ctx, &mut conn).await;

        for (name, size) in [
            ("", 5u64),
            ("notes.txt", 0),
            ("../escape", 5),
            ("a/b.txt", 5),
        ] {
            let req = InitiateUploadRequest {
                file_name: name.to_string(),
                size,
            };
            let reply = InitiateUploadHandler
                .handle(&ctx, &mut conn, request_reader(req.encode().unwrap()))
                .await
                .unwrap()
                .unwrap();
            let resp = InitiateUploadResponse::decode(reply).unwrap();

            assert!(resp.granted().is_none());
            assert!(!conn.disconnect);
            assert!(conn.upload.is_none());
        }
        assert_eq!(ctx.users.reserved_bytes("alice").await, 0);
    }

    #[tokio::test]
    async fn initiate_refuses_when_quota_exhausted() {
        let (ctx, _dir) = test_ctx().await;
        let mut conn = test_conn();
        login(&ctx, &mut conn).await;

        let req = InitiateUploadRequest {
            file_name: "big.bin".to_string(),
            size: QUOTA + 1,
        };
        let reply = InitiateUploadHandler
            .handle(&ctx, &mut conn, request_reader(req.encode().unwrap()))
            .await
            .unwrap()
            .unwrap();
        let resp = InitiateUploadResponse::decode(reply).unwrap();

        assert!(resp.granted().is_none());
        assert!(!conn.disconnect);
        assert_eq!(ctx.users.reserved_bytes("alice").await, 0);
    }

    #[tokio::test]
    async fn packet_with_wrong_key_disconnects() {
        let (ctx, _dir) = test_ctx().await;
        let mut conn = test_conn();
        login(&ctx, &mut conn).await;
        initiate(&ctx, &mut conn, "notes.txt", 5).await;

        let reply = send_packet(&ctx, &mut conn, "someone-elses-key", b"hello").await;
        assert!(reply.is_none());
        assert!(conn.disconnect);
    }

    #[tokio::test]
    async fn oversized_packet_disconnects() {
        let (ctx, _dir) = test_ctx().await;
        let mut conn = test_conn();
        login(&ctx, &mut conn).await;
        let key = initiate(&ctx, &mut conn, "big.bin", (CHUNK_SIZE as u64) * 2).await;

        let reply = send_packet(&ctx, &mut conn, &key, &vec![0u8; CHUNK_SIZE + 1]).await;
        assert!(reply.is_none());
        assert!(conn.disconnect);
    }

    #[tokio::test]
    async fn packet_past_declared_size_disconnects() {
        let (ctx, _dir) = test_ctx().await;
        let mut conn = test_conn();
        login(&ctx, &mut conn).await;
        let key = initiate(&ctx, &mut conn, "notes.txt", 5).await;

        assert!(send_packet(&ctx, &mut conn, &key, b"hello").await.is_some());
        let reply = send_packet(&ctx, &mut conn, &key, b"!").await;
        assert!(reply.is_none());
        assert!(conn.disconnect);
    }

    #[tokio::test]
    async fn finish_publishes_file_and_charges_quota() {
        let (ctx, _dir) = test_ctx().await;
        let mut conn = test_conn();
        login(&ctx, &mut conn).await;
        let key = initiate(&ctx, &mut conn, "notes.txt", 5).await;
        send_packet(&ctx, &mut conn, &key, b"hello").await.unwrap();

        let reply = FinishUploadHandler
            .handle(
                &ctx,
                &mut conn,
                request_reader(FinishUploadRequest.encode()),
            )
            .await
            .unwrap()
            .unwrap();
        let link = FinishUploadResponse::decode(reply).unwrap().link;
        let file_id = link.rsplit('/').next().unwrap().to_string();

        assert!(conn.upload.is_none());
        assert!(!conn.disconnect);

        let stored = tokio::fs::read(ctx.files.storage_path(&file_id))
            .await
            .unwrap();
        assert_eq!(stored, b"hello");
        assert!(!ctx.files.stage_path(&key).exists());

        assert_eq!(ctx.users.usage("alice").await.unwrap(), (5, QUOTA));
        assert_eq!(ctx.users.reserved_bytes("alice").await, 0);
    }

    #[tokio::test]
    async fn finish_with_missing_bytes_disconnects() {
        let (ctx, _dir) = test_ctx().await;
        let mut conn = test_conn();
        login(&ctx, &mut conn).await;
        let key = initiate(&ctx, &mut conn, "notes.txt", 10).await;
        send_packet(&ctx, &mut conn, &key, b"hello").await.unwrap();

        let reply = FinishUploadHandler
            .handle(
                &ctx,
                &mut conn,
                request_reader(FinishUploadRequest.encode()),
            )
            .await
            .unwrap();

        assert!(reply.is_none());
        assert!(conn.disconnect);
        // The unit stays on the connection for the teardown path.
        assert!(conn.upload.is_some());
    }

    #[test]
    fn file_name_validation() {
        assert!(validate_file_name("notes.txt").is_ok());
        assert!(validate_file_name("späti plan.pdf").is_ok());
        assert!(validate_file_name("").is_err());
        assert!(validate_file_name(".").is_err());
        assert!(validate_file_name("..").is_err());
        assert!(validate_file_name("a/b").is_err());
        assert!(validate_file_name("a\\b").is_err());
        assert!(validate_file_name("nul\0byte").is_err());
        assert!(validate_file_name(&"x".repeat(MAX_FILE_NAME_BYTES + 1)).is_err());
    }
}
