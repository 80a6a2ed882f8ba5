//! One authenticated connection to an upload server.
//!
//! The handshake mirrors the server side: read the server's public key,
//! check it against the pin store, wrap a fresh session key to it, and
//! from then on exchange sealed frames. The protocol is strictly
//! half-duplex, so every request method writes one frame and reads one.

use std::net::SocketAddr;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use hoist_core::crypto::{self, SessionKey};
use hoist_core::keys::{fingerprint, wrap_session_key};
use hoist_core::protocol::{
    FinishUploadRequest, FinishUploadResponse, InitiateUploadRequest, InitiateUploadResponse,
    LoginRequest, LoginResponse, UploadPacketRequest, UploadPacketResponse,
};
use hoist_core::trust::{TrustDecision, TrustStore};
use hoist_core::wire;

use crate::error::{ClientError, Result};

/// Client half of the sealed-frame protocol.
pub struct ClientSession {
    stream: TcpStream,
    session_key: SessionKey,
}

impl ClientSession {
    /// Connect to `addr` and establish a session key.
    ///
    /// The server's key is checked against the trust store before anything
    /// is sent; a pinned fingerprint that does not match the presented key
    /// aborts here, with no credentials or key material on the wire.
    pub async fn connect(addr: SocketAddr, trust: &mut TrustStore) -> Result<Self> {
        let mut stream = TcpStream::connect(addr).await?;
        let der = wire::read_frame(&mut stream).await?;

        let fp = fingerprint(&der);
        match trust.evaluate(&addr.to_string(), &fp)? {
            TrustDecision::FirstUse => {
                info!(server = %addr, fingerprint = %fp, "Pinned new server key")
            }
            TrustDecision::Known => {
                debug!(server = %addr, "Server key matches the pinned fingerprint")
            }
        }

        let session_key = crypto::generate_session_key();
        let wrapped = wrap_session_key(&der, &session_key)?;
        wire::write_frame(&mut stream, &wrapped).await?;

        Ok(Self {
            stream,
            session_key,
        })
    }

    async fn round_trip(&mut self, request: Vec<u8>) -> Result<Vec<u8>> {
        wire::write_sealed_frame(&mut self.stream, &self.session_key, &request).await?;
        Ok(wire::read_sealed_frame(&mut self.stream, &self.session_key).await?)
    }

    /// Authenticate the session. A rejection by the server is
    /// [`ClientError::LoginFailed`]; the server closes the connection after
    /// rejecting, so the session is spent either way.
    pub async fn login(&mut self, user_id: &str, password: &str) -> Result<()> {
        let request = LoginRequest {
            user_id: user_id.to_string(),
            password: password.to_string(),
        };
        let reply = self.round_trip(request.encode()?).await?;
        if LoginResponse::decode(reply)?.accepted {
            Ok(())
        } else {
            Err(ClientError::LoginFailed)
        }
    }

    /// Announce a file and ask for a transfer slot. `Ok(None)` means the
    /// server refused (quota, name policy); the session stays usable for
    /// the next file.
    pub async fn initiate_upload(&mut self, file_name: &str, size: u64) -> Result<Option<String>> {
        let request = InitiateUploadRequest {
            file_name: file_name.to_string(),
            size,
        };
        let reply = self.round_trip(request.encode()?).await?;
        let response = InitiateUploadResponse::decode(reply)?;
        Ok(response.granted().map(str::to_string))
    }

    /// Send one chunk of the active transfer and wait for its ack.
    pub async fn upload_packet(&mut self, transfer_key: &str, data: Vec<u8>) -> Result<()> {
        let request = UploadPacketRequest {
            transfer_key: transfer_key.to_string(),
            data,
        };
        let reply = self.round_trip(request.encode()?).await?;
        UploadPacketResponse::decode(reply)?;
        Ok(())
    }

    /// Complete the active transfer; the server answers with the download
    /// link once the file is published.
    pub async fn finish_upload(&mut self) -> Result<String> {
        let reply = self.round_trip(FinishUploadRequest.encode()).await?;
        Ok(FinishUploadResponse::decode(reply)?.link)
    }

    /// Shut the write half down so the server sees a clean end of stream.
    pub async fn close(mut self) -> Result<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use tokio::net::TcpListener;

    use hoist_core::keys::ServerKeys;
    use hoist_core::TrustError;

    // Small enough to keep key generation fast; OAEP-SHA256 needs more
    // than 512 bits to wrap a 32-byte key.
    const TEST_BITS: usize = 1024;

    /// Accept one connection and run the handshake plus a scripted login
    /// reply. Returns whether the client ever sent its wrapped key.
    async fn one_shot_server(
        listener: TcpListener,
        keys: Arc<ServerKeys>,
        accept_login: bool,
    ) -> bool {
        let (mut stream, _) = listener.accept().await.unwrap();
        let der = keys.public_key_der().unwrap();
        wire::write_frame(&mut stream, &der).await.unwrap();

        let wrapped = match wire::read_frame(&mut stream).await {
            Ok(frame) => frame,
            Err(_) => return false,
        };
        let key = keys.unwrap_session_key(&wrapped).unwrap();

        // Expect a login request and answer it.
        let payload = wire::read_sealed_frame(&mut stream, &key).await.unwrap();
        let mut reader = wire::FieldReader::new(payload);
        assert_eq!(reader.get_u8().unwrap(), 0x01);
        let request = LoginRequest::decode(reader).unwrap();
        assert_eq!(request.user_id, "alice");

        let reply = LoginResponse {
            accepted: accept_login,
        }
        .encode();
        wire::write_sealed_frame(&mut stream, &key, &reply)
            .await
            .unwrap();
        true
    }

    async fn test_fixture() -> (TcpListener, SocketAddr, Arc<ServerKeys>, TrustStore, tempfile::TempDir) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let keys = Arc::new(ServerKeys::generate(TEST_BITS).unwrap());
        let dir = tempfile::tempdir().unwrap();
        let trust = TrustStore::open(dir.path().join("pins.json")).unwrap();
        (listener, addr, keys, trust, dir)
    }

    #[tokio::test]
    async fn test_first_use_pins_and_logs_in() {
        let (listener, addr, keys, mut trust, _dir) = test_fixture().await;
        let server = tokio::spawn(one_shot_server(listener, keys.clone(), true));

        let mut session = ClientSession::connect(addr, &mut trust).await.unwrap();
        session.login("alice", "hunter2").await.unwrap();
        session.close().await.unwrap();

        assert!(server.await.unwrap());
        let expected = fingerprint(&keys.public_key_der().unwrap());
        assert_eq!(trust.pinned(&addr.to_string()), Some(expected.as_str()));
    }

    #[tokio::test]
    async fn test_rejected_login_is_an_error() {
        let (listener, addr, keys, mut trust, _dir) = test_fixture().await;
        tokio::spawn(one_shot_server(listener, keys, false));

        let mut session = ClientSession::connect(addr, &mut trust).await.unwrap();
        let err = session.login("alice", "wrong").await.unwrap_err();
        assert!(matches!(err, ClientError::LoginFailed));
    }

    #[tokio::test]
    async fn test_pin_mismatch_aborts_before_sending() {
        let (listener, addr, keys, mut trust, _dir) = test_fixture().await;

        // Pin a different fingerprint for this address up front.
        trust
            .evaluate(&addr.to_string(), "0000000000000000")
            .unwrap();

        let server = tokio::spawn(one_shot_server(listener, keys, true));
        let err = ClientSession::connect(addr, &mut trust).await.unwrap_err();

        match err {
            ClientError::Untrusted(TrustError::Mismatch { pinned, .. }) => {
                assert_eq!(pinned, "0000000000000000");
            }
            other => panic!("unexpected error: {other}"),
        }

        // The server must never have received a wrapped session key.
        assert!(!server.await.unwrap());
        // And the stale pin must still be in place.
        assert_eq!(trust.pinned(&addr.to_string()), Some("0000000000000000"));
    }
}
