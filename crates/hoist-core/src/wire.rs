//! Length-prefixed framing and the typed field codec.
//!
//! Every frame on the wire is a big-endian `u32` length followed by that many
//! payload bytes. After the handshake, payloads are XChaCha20-Poly1305
//! sealed; [`write_sealed_frame`] and [`read_sealed_frame`] handle the
//! seal/open step around the raw framing.
//!
//! Inside a payload, messages are flat sequences of typed fields:
//!
//! - `u8` / `bool`: one byte
//! - `u64`: eight bytes, big-endian
//! - string: `u16` big-endian length, then UTF-8 bytes
//! - blob: `u32` big-endian length, then raw bytes

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::MAX_FRAME_BYTES;
use crate::crypto::{self, SessionKey};
use crate::error::WireError;

/// Write one length-prefixed frame.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_BYTES,
        });
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame. The length is validated against
/// [`MAX_FRAME_BYTES`] before the payload buffer is allocated.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge {
            len,
            max: MAX_FRAME_BYTES,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Seal `plaintext` with the session key and write it as one frame.
pub async fn write_sealed_frame<W>(
    writer: &mut W,
    key: &SessionKey,
    plaintext: &[u8],
) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let sealed = crypto::encrypt(key, plaintext)?;
    write_frame(writer, &sealed).await
}

/// Read one frame and open it with the session key.
pub async fn read_sealed_frame<R>(reader: &mut R, key: &SessionKey) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin,
{
    let sealed = read_frame(reader).await?;
    Ok(crypto::decrypt(key, &sealed)?)
}

/// Sequentially encodes the typed fields of a message payload.
#[derive(Debug, Default)]
pub struct FieldWriter {
    buf: BytesMut,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.put_u64(v);
    }

    pub fn put_str(&mut self, s: &str) -> Result<(), WireError> {
        let bytes = s.as_bytes();
        if bytes.len() > u16::MAX as usize {
            return Err(WireError::FieldTooLong {
                len: bytes.len(),
                max: u16::MAX as usize,
            });
        }
        self.buf.put_u16(bytes.len() as u16);
        self.buf.put_slice(bytes);
        Ok(())
    }

    pub fn put_bytes(&mut self, data: &[u8]) -> Result<(), WireError> {
        if data.len() > u32::MAX as usize {
            return Err(WireError::FieldTooLong {
                len: data.len(),
                max: u32::MAX as usize,
            });
        }
        self.buf.put_u32(data.len() as u32);
        self.buf.put_slice(data);
        Ok(())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

/// Sequentially decodes the typed fields of a message payload.
///
/// Call [`FieldReader::finish`] after the last field; a well-formed message
/// has no bytes left over.
#[derive(Debug)]
pub struct FieldReader {
    buf: Bytes,
}

impl FieldReader {
    pub fn new(payload: Vec<u8>) -> Self {
        Self {
            buf: Bytes::from(payload),
        }
    }

    pub fn get_u8(&mut self) -> Result<u8, WireError> {
        if self.buf.remaining() < 1 {
            return Err(WireError::Truncated);
        }
        Ok(self.buf.get_u8())
    }

    pub fn get_bool(&mut self) -> Result<bool, WireError> {
        Ok(self.get_u8()? != 0)
    }

    pub fn get_u64(&mut self) -> Result<u64, WireError> {
        if self.buf.remaining() < 8 {
            return Err(WireError::Truncated);
        }
        Ok(self.buf.get_u64())
    }

    pub fn get_str(&mut self) -> Result<String, WireError> {
        if self.buf.remaining() < 2 {
            return Err(WireError::Truncated);
        }
        let len = self.buf.get_u16() as usize;
        if self.buf.remaining() < len {
            return Err(WireError::Truncated);
        }
        let bytes = self.buf.split_to(len);
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidUtf8)
    }

    pub fn get_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        if self.buf.remaining() < 4 {
            return Err(WireError::Truncated);
        }
        let len = self.buf.get_u32() as usize;
        if self.buf.remaining() < len {
            return Err(WireError::Truncated);
        }
        Ok(self.buf.split_to(len).to_vec())
    }

    pub fn finish(self) -> Result<(), WireError> {
        if self.buf.has_remaining() {
            Err(WireError::TrailingBytes(self.buf.remaining()))
        } else {
            Ok(())
        }
    }
}
