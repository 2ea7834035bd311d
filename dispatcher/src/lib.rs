//! Worker-facing TCP listener: leases tiles out and accepts completed ones.
//!
//! Wire protocol (little-endian, no message framing beyond what each step
//! dictates):
//!
//! ```text
//! Worker -> Server:  purpose:u8
//!   0x00 Request
//!     Server -> Worker: code:u8
//!       0x10 Available:    level:u32 maxDepth:u32 iReal:u32 iImag:u32
//!       0x11 NotAvailable
//!   0x01 Response
//!     Worker -> Server: level:u32 maxDepth:u32 iReal:u32 iImag:u32
//!     Server -> Worker: code:u8
//!       0x20 Accept:  Worker -> Server: payload:u8[TILE_SIDE^2]
//!       0x21 Reject
//!   anything else -> log and close
//! ```
//!
//! Each accepted connection carries exactly one purpose, then closes.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tilecoord_core::{monotonic_millis, Coord, TilePayload, TILE_PAYLOAD_LEN};
use tilecoord_leaseboard::Leaseboard;
use tilecoord_storage_worker::StorageHandle;

const PURPOSE_REQUEST: u8 = 0x00;
const PURPOSE_RESPONSE: u8 = 0x01;

const CODE_AVAILABLE: u8 = 0x10;
const CODE_NOT_AVAILABLE: u8 = 0x11;
const CODE_ACCEPT: u8 = 0x20;
const CODE_REJECT: u8 = 0x21;

#[derive(Debug, Error)]
enum ConnError {
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error("transient socket error: {0}")]
    Transient(io::Error),
    #[error(transparent)]
    Fatal(#[from] io::Error),
}

/// Run the Dispatcher accept loop forever. Each accepted connection is
/// handled on its own task; the accept loop itself never blocks on a
/// per-connection timeout.
pub async fn serve(
    listener: TcpListener,
    leaseboard: Arc<Leaseboard>,
    storage: StorageHandle,
    read_timeout: Option<Duration>,
) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let leaseboard = Arc::clone(&leaseboard);
        let storage = storage.clone();
        tokio::spawn(async move {
            match handle_connection(stream, &leaseboard, &storage, read_timeout).await {
                Ok(()) => {}
                Err(ConnError::Protocol(msg)) => {
                    tracing::warn!(%peer, reason = %msg, "dispatcher connection closed: protocol violation");
                }
                Err(ConnError::Transient(e)) => {
                    tracing::warn!(%peer, error = %e, "dispatcher connection closed: transient socket error");
                }
                Err(ConnError::Fatal(e)) => {
                    tracing::error!(%peer, error = %e, "dispatcher connection failed");
                }
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    leaseboard: &Leaseboard,
    storage: &StorageHandle,
    read_timeout: Option<Duration>,
) -> Result<(), ConnError> {
    let purpose = read_u8(&mut stream, read_timeout).await?;
    match purpose {
        PURPOSE_REQUEST => handle_request(&mut stream, leaseboard).await,
        PURPOSE_RESPONSE => handle_response(&mut stream, leaseboard, storage, read_timeout).await,
        other => Err(ConnError::Protocol(format!("unknown purpose byte {other:#04x}"))),
    }
}

async fn handle_request(stream: &mut TcpStream, leaseboard: &Leaseboard) -> Result<(), ConnError> {
    let now = monotonic_millis();
    // Finding the next-needed coord and granting its lease happen under one
    // `Leaseboard` lock acquisition (see `Leaseboard::lease_next`), so two
    // connections racing this handler can never both be handed the same
    // coord (spec.md §1, §5).
    let Some((coord, max_depth)) = leaseboard.lease_next(now) else {
        write_u8(stream, CODE_NOT_AVAILABLE).await?;
        return Ok(());
    };

    let mut out = Vec::with_capacity(17);
    out.push(CODE_AVAILABLE);
    out.extend_from_slice(&coord.level.to_le_bytes());
    out.extend_from_slice(&max_depth.unwrap_or(0).to_le_bytes());
    out.extend_from_slice(&coord.i_real.to_le_bytes());
    out.extend_from_slice(&coord.i_imag.to_le_bytes());
    stream.write_all(&out).await.map_err(ConnError::Fatal)?;
    Ok(())
}

async fn handle_response(
    stream: &mut TcpStream,
    leaseboard: &Leaseboard,
    storage: &StorageHandle,
    read_timeout: Option<Duration>,
) -> Result<(), ConnError> {
    let level = read_u32(stream, read_timeout).await?;
    let max_depth = read_u32(stream, read_timeout).await?;
    let i_real = read_u32(stream, read_timeout).await?;
    let i_imag = read_u32(stream, read_timeout).await?;
    let coord = Coord::new(level, i_real, i_imag);

    let now = monotonic_millis();
    if !leaseboard.accept(coord, Some(max_depth), now) {
        write_u8(stream, CODE_REJECT).await?;
        return Ok(());
    }

    write_u8(stream, CODE_ACCEPT).await?;

    let mut bytes = vec![0u8; TILE_PAYLOAD_LEN];
    read_exact_timed(stream, &mut bytes, read_timeout).await?;
    let payload = TilePayload::new(bytes);

    // Fire-and-forget: the coord is already Completed, persistence is
    // best-effort relative to the worker (spec.md §9, "Open question —
    // Save errors").
    let storage = storage.clone();
    let save = storage.save_detached(coord, payload);
    tokio::spawn(async move {
        match save.await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => tracing::error!(?coord, error = %e, "save failed after accepted response"),
            Err(_) => tracing::error!(?coord, "storage worker dropped the save job"),
        }
    });

    Ok(())
}

async fn read_u8(stream: &mut TcpStream, timeout: Option<Duration>) -> Result<u8, ConnError> {
    let mut buf = [0u8; 1];
    read_exact_timed(stream, &mut buf, timeout).await?;
    Ok(buf[0])
}

async fn write_u8(stream: &mut TcpStream, value: u8) -> Result<(), ConnError> {
    stream.write_all(&[value]).await.map_err(ConnError::Fatal)
}

async fn read_u32(stream: &mut TcpStream, timeout: Option<Duration>) -> Result<u32, ConnError> {
    let mut buf = [0u8; 4];
    read_exact_timed(stream, &mut buf, timeout).await?;
    Ok(u32::from_le_bytes(buf))
}

async fn read_exact_timed(
    stream: &mut TcpStream,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Result<(), ConnError> {
    let read = stream.read_exact(buf);
    let result = match timeout {
        Some(d) => match tokio::time::timeout(d, read).await {
            Ok(r) => r,
            Err(_) => return Err(ConnError::Transient(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))),
        },
        None => read.await,
    };
    result.map_err(classify_read_error)
}

fn classify_read_error(e: io::Error) -> ConnError {
    match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted => {
            ConnError::Transient(e)
        }
        io::ErrorKind::UnexpectedEof => ConnError::Protocol("truncated read".into()),
        _ => ConnError::Fatal(e),
    }
}
