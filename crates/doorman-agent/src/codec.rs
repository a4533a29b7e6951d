//! Length-prefixed datagram framing.
//!
//! The client wire protocol delimits datagrams with a 2-byte little-endian
//! length prefix. That caps any single datagram at 65,535 bytes, which is
//! also the MD routing limit, so nothing framable here can be unroutable
//! downstream.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one length-prefixed datagram.
///
/// Returns `Ok(None)` on a clean EOF at a datagram boundary. An EOF in the
/// middle of a datagram is an error: the peer died mid-frame.
pub async fn read_datagram<R>(reader: &mut R) -> io::Result<Option<Bytes>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {},
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }

    let len = usize::from(u16::from_le_bytes(len_buf));
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(Bytes::from(buf)))
}

/// Write one length-prefixed datagram.
///
/// # Errors
///
/// - `InvalidInput` if the payload exceeds the u16 length prefix.
pub async fn write_datagram<W>(writer: &mut W, payload: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u16::try_from(payload.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("datagram of {} bytes exceeds framing limit", payload.len()),
        )
    })?;

    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await
}
