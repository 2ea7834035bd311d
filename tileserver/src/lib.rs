//! Client-facing TCP listener: answers tile queries against storage.
//!
//! Wire protocol (little-endian):
//!
//! ```text
//! Client -> Server:  level:u32 iReal:u32 iImag:u32
//! Server -> Client:   code:u8
//!   0x00 Accepted:  length:u32  bytes[length]   (the encoded tile)
//!   0x01 Rejected                               (iReal >= level or iImag >= level)
//!   0x02 NotAvailable                           (not in index, or file read failed)
//! ```
//!
//! Each accepted connection answers exactly one query, then closes.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use tilecoord_core::Coord;
use tilecoord_storage_worker::StorageHandle;

const CODE_ACCEPTED: u8 = 0x00;
const CODE_REJECTED: u8 = 0x01;
const CODE_NOT_AVAILABLE: u8 = 0x02;

#[derive(Debug, Error)]
enum ConnError {
    #[error("transient socket error: {0}")]
    Transient(io::Error),
    #[error(transparent)]
    Fatal(#[from] io::Error),
}

/// Run the TileServer accept loop forever, one task per connection.
pub async fn serve(
    listener: TcpListener,
    storage: StorageHandle,
    read_timeout: Option<Duration>,
) -> io::Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let storage = storage.clone();
        tokio::spawn(async move {
            match handle_connection(stream, &storage, read_timeout).await {
                Ok(()) => {}
                Err(ConnError::Transient(e)) => {
                    tracing::warn!(%peer, error = %e, "tileserver connection closed: transient socket error");
                }
                Err(ConnError::Fatal(e)) => {
                    tracing::error!(%peer, error = %e, "tileserver connection failed");
                }
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    storage: &StorageHandle,
    read_timeout: Option<Duration>,
) -> Result<(), ConnError> {
    let level = read_u32(&mut stream, read_timeout).await?;
    let i_real = read_u32(&mut stream, read_timeout).await?;
    let i_imag = read_u32(&mut stream, read_timeout).await?;
    let coord = Coord::new(level, i_real, i_imag);

    if !coord.in_bounds() {
        return write_u8(&mut stream, CODE_REJECTED).await;
    }

    let entries = storage
        .lookup(vec![coord])
        .await
        .map_err(|e| ConnError::Fatal(io::Error::new(io::ErrorKind::Other, e.to_string())))?;
    let Some(entry) = entries.into_iter().next().flatten() else {
        return write_u8(&mut stream, CODE_NOT_AVAILABLE).await;
    };

    let payload = match storage.load_payload(entry).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(?coord, error = %e, "tile load failed, answering NotAvailable");
            return write_u8(&mut stream, CODE_NOT_AVAILABLE).await;
        }
    };

    let encoded = tilecoord_codec::encode(&payload);
    let mut out = Vec::with_capacity(5 + encoded.len());
    out.push(CODE_ACCEPTED);
    out.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
    out.extend_from_slice(&encoded);
    stream.write_all(&out).await.map_err(ConnError::Fatal)?;
    Ok(())
}

async fn write_u8(stream: &mut TcpStream, value: u8) -> Result<(), ConnError> {
    stream.write_all(&[value]).await.map_err(ConnError::Fatal)
}

async fn read_u32(stream: &mut TcpStream, timeout: Option<Duration>) -> Result<u32, ConnError> {
    let mut buf = [0u8; 4];
    let read = stream.read_exact(&mut buf);
    let result = match timeout {
        Some(d) => match tokio::time::timeout(d, read).await {
            Ok(r) => r,
            Err(_) => return Err(ConnError::Transient(io::Error::new(io::ErrorKind::TimedOut, "read timed out"))),
        },
        None => read.await,
    };
    result.map_err(|e| match e.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::ConnectionReset | io::ErrorKind::Interrupted => {
            ConnError::Transient(e)
        }
        _ => ConnError::Fatal(e),
    })?;
    Ok(u32::from_le_bytes(buf))
}
