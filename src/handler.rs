//! Per-connection request loop (spec.md §4.5): read one frame, decode by
//! type, execute against the store, reply on the same tag.

use crate::admission::Admission;
use crate::error::Result;
use crate::proto::wire::{PayloadReader, PayloadWriter};
use crate::proto::{read_frame, types, Demux, Frame};
use crate::store::{GetWhenOutcome, Store};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Owns one accepted socket end to end: reads frames until disconnect,
/// EOF, or a fatal protocol error, then tears down and releases its
/// admission slot.
pub async fn handle_connection(socket: TcpStream, store: Arc<Store>, admission: Arc<Admission>) {
    let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    let peer = socket.peer_addr().ok();
    tracing::info!(session_id, ?peer, "client connected");

    let (mut read_half, write_half) = socket.into_split();
    let demux = Demux::new(write_half);
    let cancelled = Arc::new(AtomicBool::new(false));

    loop {
        let frame = match read_frame(&mut read_half).await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                tracing::info!(session_id, "client disconnected (eof)");
                break;
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "fatal frame error, closing connection");
                break;
            }
        };

        match dispatch(&frame, &store, &demux, &cancelled, session_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::info!(session_id, "client disconnected (explicit)");
                break;
            }
            Err(e) => {
                tracing::error!(session_id, error = %e, "fatal protocol error, closing connection");
                break;
            }
        }
    }

    // Bound get-when waiters must observe teardown and abandon without
    // sending (spec.md §3, §5).
    cancelled.store(true, Ordering::Relaxed);
    demux.close();
    admission.release();
}

/// `Ok(true)` to keep looping, `Ok(false)` on an explicit disconnect.
async fn dispatch(
    frame: &Frame,
    store: &Arc<Store>,
    demux: &Demux,
    cancelled: &Arc<AtomicBool>,
    session_id: u64,
) -> Result<bool> {
    let tag = frame.tag;
    let mut reader = PayloadReader::new(&frame.payload);

    match frame.ty {
        types::AUTH => {
            let user = reader.read_utf()?;
            let password = reader.read_utf()?;
            let ok = store.auth(&user, &password);
            tracing::debug!(session_id, tag, user, ok, "auth");
            // Empty payload on failure — no boolean `false` (spec.md §4.3, §7).
            let payload: Vec<u8> = if ok { vec![1] } else { Vec::new() };
            demux.send(tag, frame.ty, &payload).await?;
        }
        types::REGISTER => {
            let user = reader.read_utf()?;
            let password = reader.read_utf()?;
            let ok = store.register(&user, &password);
            tracing::debug!(session_id, tag, user, ok, "register");
            demux.send(tag, frame.ty, &[ok as u8]).await?;
        }
        types::PUT => {
            let key = reader.read_utf()?;
            let value = reader.read_bytes32()?;
            tracing::debug!(session_id, tag, key, len = value.len(), "put");
            store.put(&key, value);
            demux.send(tag, frame.ty, &[]).await?;
        }
        types::GET => {
            let key = reader.read_utf()?;
            let found = store.get(&key);
            tracing::debug!(session_id, tag, key, hit = found.is_some(), "get");
            let mut payload = Vec::new();
            match found {
                Some(bytes) => payload.write_bytes32(&bytes),
                None => payload.write_i32(0),
            }
            demux.send(tag, frame.ty, &payload).await?;
        }
        types::MULTI_PUT => {
            // Each item is at least a 2-byte `utf` key length prefix plus
            // a 4-byte `bytes32` value length prefix.
            let n = reader.read_count(6)?;
            let mut pairs = Vec::with_capacity(n);
            for _ in 0..n {
                let key = reader.read_utf()?;
                let value = reader.read_bytes32()?;
                pairs.push((key, value));
            }
            tracing::debug!(session_id, tag, count = n, "multi_put");
            store.multi_put(pairs);
            demux.send(tag, frame.ty, &[]).await?;
        }
        types::MULTI_GET => {
            // Each item is at least a 2-byte `utf` key length prefix.
            let n = reader.read_count(2)?;
            let mut keys = Vec::with_capacity(n);
            for _ in 0..n {
                keys.push(reader.read_utf()?);
            }
            tracing::debug!(session_id, tag, count = n, "multi_get");
            let values = store.multi_get(keys.clone());
            let mut payload = Vec::new();
            payload.write_i32(keys.len() as i32);
            for key in &keys {
                payload.write_utf(key);
                match values.get(key).and_then(|v| v.as_ref()) {
                    Some(bytes) => payload.write_bytes32(bytes),
                    None => payload.write_i32(0),
                }
            }
            demux.send(tag, frame.ty, &payload).await?;
        }
        types::GET_WHEN => {
            let key_target = reader.read_utf()?;
            let key_cond = reader.read_utf()?;
            let value_cond = reader.read_bytes32()?;
            tracing::debug!(session_id, tag, key_target, key_cond, "get_when");
            let outcome = store.get_when(
                &key_target,
                &key_cond,
                &value_cond,
                tag,
                demux.clone(),
                cancelled.clone(),
            );
            if let GetWhenOutcome::Immediate {
                tag: reply_tag,
                value,
            } = outcome
            {
                let mut payload = Vec::new();
                match value {
                    Some(bytes) => payload.write_bytes32(&bytes),
                    None => payload.write_i32(0),
                }
                demux.send(reply_tag, frame.ty, &payload).await?;
            }
            // Deferred: the background waiter replies later, or never.
        }
        types::DISCONNECT => {
            tracing::debug!(session_id, tag, "disconnect");
            demux.send(tag, frame.ty, &[]).await?;
            return Ok(false);
        }
        other => {
            tracing::error!(session_id, ty = other, "unknown request type, ignoring");
        }
    }

    Ok(true)
}
