//! RPC message framing as specified in RFC 5531 section 11 (Record Marking Standard).
//!
//! TCP is a byte stream, so every RPC message travels as a record made of one
//! or more fragments. Each fragment is prefixed by a 4-byte header:
//!
//! - the lower 31 bits contain the fragment length
//! - the highest bit is set on the last fragment of the record
//!
//! The functions here are generic over tokio's `AsyncRead`/`AsyncWrite` so the
//! same framing runs over a TCP socket or any other byte stream.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::MAX_RPC_RECORD_LENGTH;

/// Maximum fragment size is 2^31 - 1 bytes
const MAX_FRAGMENT_SIZE: usize = (1 << 31) - 1;

const LAST_FRAGMENT: u32 = 1 << 31;

/// Reads a single record-marked fragment and appends it to `append_to`.
///
/// Returns true if this was the last fragment in the RPC record.
pub async fn read_fragment<R>(socket: &mut R, append_to: &mut Vec<u8>) -> io::Result<bool>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header_buf = [0_u8; 4];
    socket.read_exact(&mut header_buf).await?;
    let fragment_header = u32::from_be_bytes(header_buf);
    let is_last = (fragment_header & LAST_FRAGMENT) > 0;
    let length = (fragment_header & (LAST_FRAGMENT - 1)) as usize;
    trace!("Reading fragment length:{}, last:{}", length, is_last);
    if append_to.len().saturating_add(length) > MAX_RPC_RECORD_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("RPC record length {} exceeds max {}", length, MAX_RPC_RECORD_LENGTH),
        ));
    }
    let start_offset = append_to.len();
    append_to.resize(start_offset + length, 0);
    socket.read_exact(&mut append_to[start_offset..]).await?;
    Ok(is_last)
}

/// Reads fragments until the last one and returns the reassembled record.
pub async fn read_record<R>(socket: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut record = Vec::new();
    while !read_fragment(socket, &mut record).await? {}
    Ok(record)
}

/// Writes `buf` as one record, split into as many fragments as needed.
///
/// An empty buffer is still sent as a single empty last fragment.
pub async fn write_fragment<W>(socket: &mut W, buf: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let mut offset = 0;
    loop {
        let fragment_size = std::cmp::min(buf.len() - offset, MAX_FRAGMENT_SIZE);
        let is_last = offset + fragment_size >= buf.len();
        let fragment_header =
            if is_last { fragment_size as u32 | LAST_FRAGMENT } else { fragment_size as u32 };

        socket.write_all(&fragment_header.to_be_bytes()).await?;
        trace!("Writing fragment length:{}, last:{}", fragment_size, is_last);
        socket.write_all(&buf[offset..offset + fragment_size]).await?;

        offset += fragment_size;
        if is_last {
            break;
        }
    }
    socket.flush().await
}
