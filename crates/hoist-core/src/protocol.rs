//! Request/response messages exchanged between client and server.
//!
//! The protocol is strictly half-duplex: the client writes one request frame
//! and then reads exactly one response frame, except where a protocol
//! violation makes the server drop the connection without replying.
//!
//! A request payload starts with its [`Opcode`] byte; a response payload
//! carries fields only, since the client knows which request it sent.

use crate::error::WireError;
use crate::wire::{FieldReader, FieldWriter};

/// Operation selector, the first byte of every request payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Login = 0x01,
    InitiateUpload = 0x02,
    UploadPacket = 0x03,
    FinishUpload = 0x04,
}

impl Opcode {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Login),
            0x02 => Some(Self::InitiateUpload),
            0x03 => Some(Self::UploadPacket),
            0x04 => Some(Self::FinishUpload),
            _ => None,
        }
    }
}

/// Authenticate the connection. Must be the first request on a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub user_id: String,
    pub password: String,
}

impl LoginRequest {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut w = FieldWriter::new();
        w.put_u8(Opcode::Login as u8);
        w.put_str(&self.user_id)?;
        w.put_str(&self.password)?;
        Ok(w.finish())
    }

    /// Decode the fields following the opcode byte.
    pub fn decode(mut r: FieldReader) -> Result<Self, WireError> {
        let user_id = r.get_str()?;
        let password = r.get_str()?;
        r.finish()?;
        Ok(Self { user_id, password })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginResponse {
    pub accepted: bool,
}

impl LoginResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        w.put_bool(self.accepted);
        w.finish()
    }

    pub fn decode(payload: Vec<u8>) -> Result<Self, WireError> {
        let mut r = FieldReader::new(payload);
        let accepted = r.get_bool()?;
        r.finish()?;
        Ok(Self { accepted })
    }
}

/// Announce a file of `size` bytes and ask for a transfer slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateUploadRequest {
    pub file_name: String,
    pub size: u64,
}

impl InitiateUploadRequest {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut w = FieldWriter::new();
        w.put_u8(Opcode::InitiateUpload as u8);
        w.put_str(&self.file_name)?;
        w.put_u64(self.size);
        Ok(w.finish())
    }

    pub fn decode(mut r: FieldReader) -> Result<Self, WireError> {
        let file_name = r.get_str()?;
        let size = r.get_u64()?;
        r.finish()?;
        Ok(Self { file_name, size })
    }
}

/// An empty transfer key means the upload was refused; the connection stays
/// authenticated and usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitiateUploadResponse {
    pub transfer_key: String,
}

impl InitiateUploadResponse {
    pub fn rejected() -> Self {
        Self {
            transfer_key: String::new(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut w = FieldWriter::new();
        w.put_str(&self.transfer_key)?;
        Ok(w.finish())
    }

    pub fn decode(payload: Vec<u8>) -> Result<Self, WireError> {
        let mut r = FieldReader::new(payload);
        let transfer_key = r.get_str()?;
        r.finish()?;
        Ok(Self { transfer_key })
    }

    /// The granted transfer key, or `None` when the upload was refused.
    pub fn granted(&self) -> Option<&str> {
        if self.transfer_key.is_empty() {
            None
        } else {
            Some(&self.transfer_key)
        }
    }
}

/// One chunk of file data for the active transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPacketRequest {
    pub transfer_key: String,
    pub data: Vec<u8>,
}

impl UploadPacketRequest {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut w = FieldWriter::new();
        w.put_u8(Opcode::UploadPacket as u8);
        w.put_str(&self.transfer_key)?;
        w.put_bytes(&self.data)?;
        Ok(w.finish())
    }

    pub fn decode(mut r: FieldReader) -> Result<Self, WireError> {
        let transfer_key = r.get_str()?;
        let data = r.get_bytes()?;
        r.finish()?;
        Ok(Self { transfer_key, data })
    }
}

/// Acknowledgement for one chunk. Carries no fields; receiving it paces the
/// sender to one chunk in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadPacketResponse;

impl UploadPacketResponse {
    pub fn encode(&self) -> Vec<u8> {
        Vec::new()
    }

    pub fn decode(payload: Vec<u8>) -> Result<Self, WireError> {
        FieldReader::new(payload).finish()?;
        Ok(Self)
    }
}

/// Complete the active transfer and ask for the download link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinishUploadRequest;

impl FinishUploadRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FieldWriter::new();
        w.put_u8(Opcode::FinishUpload as u8);
        w.finish()
    }

    pub fn decode(r: FieldReader) -> Result<Self, WireError> {
        r.finish()?;
        Ok(Self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishUploadResponse {
    pub link: String,
}

impl FinishUploadResponse {
    pub fn encode(&self) -> Result<Vec<u8>, WireError> {
        let mut w = FieldWriter::new();
        w.put_str(&self.link)?;
        Ok(w.finish())
    }

    pub fn decode(payload: Vec<u8>) -> Result<Self, WireError> {
        let mut r = FieldReader::new(payload);
        let link = r.get_str()?;
        r.finish()?;
        Ok(Self { link })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request_reader(payload: Vec<u8>, expected: Opcode) -> FieldReader {
        let mut r = FieldReader::new(payload);
        let op = r.get_u8().unwrap();
        assert_eq!(Opcode::from_byte(op), Some(expected));
        r
    }

    #[test]
    fn test_login_roundtrip() {
        let req = LoginRequest {
            user_id: "alice".into(),
            password: "hunter2".into(),
        };
        let r = request_reader(req.encode().unwrap(), Opcode::Login);
        assert_eq!(LoginRequest::decode(r).unwrap(), req);

        let resp = LoginResponse { accepted: true };
        assert_eq!(LoginResponse::decode(resp.encode()).unwrap(), resp);
    }

    #[test]
    fn test_initiate_roundtrip() {
        let req = InitiateUploadRequest {
            file_name: "report.pdf".into(),
            size: 1_048_576,
        };
        let r = request_reader(req.encode().unwrap(), Opcode::InitiateUpload);
        assert_eq!(InitiateUploadRequest::decode(r).unwrap(), req);
    }

    #[test]
    fn test_rejected_initiate_has_no_key() {
        let resp = InitiateUploadResponse::rejected();
        let decoded = InitiateUploadResponse::decode(resp.encode().unwrap()).unwrap();
        assert_eq!(decoded.granted(), None);

        let granted = InitiateUploadResponse {
            transfer_key: "abc".into(),
        };
        assert_eq!(granted.granted(), Some("abc"));
    }

    #[test]
    fn test_packet_roundtrip() {
        let req = UploadPacketRequest {
            transfer_key: "key-123".into(),
            data: vec![7u8; 4096],
        };
        let r = request_reader(req.encode().unwrap(), Opcode::UploadPacket);
        assert_eq!(UploadPacketRequest::decode(r).unwrap(), req);

        UploadPacketResponse::decode(UploadPacketResponse.encode()).unwrap();
    }

    #[test]
    fn test_finish_roundtrip() {
        let r = request_reader(FinishUploadRequest.encode(), Opcode::FinishUpload);
        FinishUploadRequest::decode(r).unwrap();

        let resp = FinishUploadResponse {
            link: "http://example.org/d/abc123".into(),
        };
        assert_eq!(
            FinishUploadResponse::decode(resp.encode().unwrap()).unwrap(),
            resp
        );
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(Opcode::from_byte(0x00), None);
        assert_eq!(Opcode::from_byte(0x05), None);
        assert_eq!(Opcode::from_byte(0xFF), None);
    }

    #[test]
    fn test_trailing_garbage_rejected() {
        let mut payload = LoginRequest {
            user_id: "a".into(),
            password: "b".into(),
        }
        .encode()
        .unwrap();
        payload.push(0x00);

        let mut r = FieldReader::new(payload);
        r.get_u8().unwrap();
        assert!(LoginRequest::decode(r).is_err());
    }
}
