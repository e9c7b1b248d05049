//! Length-prefixed `(tag, type, payload)` frames (spec.md §4.1).
//!
//! Wire layout: `tag: i32 BE, type: i16 BE, length: i32 BE, payload: [u8; length]`.

use crate::error::{KvError, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Guards against a hostile or corrupt length prefix; well above any
/// payload this protocol's request/response shapes legitimately produce.
pub const MAX_FRAME_LEN: i32 = 64 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub tag: i32,
    pub ty: i16,
    pub payload: Vec<u8>,
}

/// Reads the next frame, or `Ok(None)` on a clean (possibly mid-frame)
/// end of stream — spec.md §4.1: "truncated read → end-of-stream".
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin,
{
    let tag = match reader.read_i32().await {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let ty = match reader.read_i16().await {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let length = match reader.read_i32().await {
        Ok(v) => v,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    if length < 0 || length > MAX_FRAME_LEN {
        return Err(KvError::Protocol(format!(
            "oversized frame length: {length}"
        )));
    }

    let mut payload = vec![0u8; length as usize];
    match reader.read_exact(&mut payload).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    Ok(Some(Frame { tag, ty, payload }))
}

/// Writes one frame in a single `write_all` call so that concurrent
/// senders sharing a mutex (see `demux`) never interleave payload bytes.
pub async fn write_frame<W>(writer: &mut W, tag: i32, ty: i16, payload: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(4 + 2 + 4 + payload.len());
    buf.extend_from_slice(&tag.to_be_bytes());
    buf.extend_from_slice(&ty.to_be_bytes());
    buf.extend_from_slice(&(payload.len() as i32).to_be_bytes());
    buf.extend_from_slice(payload);
    writer.write_all(&buf).await?;
    Ok(())
}
