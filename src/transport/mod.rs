//! Wire framing for the worker ↔ peer connection.
//!
//! Reads are exact-length and chunked: each underlying read asks for at most
//! [`RECV_CHUNK_SIZE`] bytes, so a peer delivering a body in arbitrarily small
//! pieces is reassembled before anything downstream sees it. Writes loop until
//! every byte of the frame is on the wire.

pub mod protocol;

pub use protocol::{
    Command, COMMAND_TAG_LEN, DEFAULT_MAX_MESSAGE_SIZE, LENGTH_HEADER_LEN, RECV_CHUNK_SIZE,
};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Faults raised while reading or writing frames.
///
/// Every variant is terminal for the session: once the framer fails, the
/// stream position is unknown and no further frame can be trusted.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer closed the stream before a mandatory read completed.
    #[error("connection closed after {received} of {expected} bytes")]
    ConnectionClosed { expected: usize, received: usize },

    /// The underlying stream failed.
    #[error("connection I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A length header did not hold a non-negative decimal integer.
    #[error("malformed length header: {raw:?}")]
    MalformedLength { raw: String },

    /// A length header declared more bytes than the configured limit.
    #[error("message exceeds max size: {size} > {max}")]
    MessageTooLarge { size: usize, max: usize },

    /// A command tag matched neither `STOP` nor `DATA`.
    #[error("unknown command tag: {}", String::from_utf8_lossy(tag))]
    UnknownCommand { tag: [u8; COMMAND_TAG_LEN] },
}

impl TransportError {
    /// The stream ended or errored underneath us.
    pub const fn is_connection_fault(&self) -> bool {
        matches!(self, Self::ConnectionClosed { .. } | Self::Io(_))
    }

    /// The peer sent bytes that violate the framing rules.
    pub const fn is_framing_fault(&self) -> bool {
        !self.is_connection_fault()
    }
}

/// Read exactly `len` bytes, issuing as many bounded reads as it takes.
pub async fn read_exact_chunked<R: AsyncRead + Unpin>(
    reader: &mut R,
    len: usize,
) -> Result<Vec<u8>, TransportError> {
    let mut buf = Vec::with_capacity(len.min(RECV_CHUNK_SIZE));
    let mut chunk = [0u8; RECV_CHUNK_SIZE];

    while buf.len() < len {
        let want = RECV_CHUNK_SIZE.min(len - buf.len());
        let n = reader.read(&mut chunk[..want]).await?;
        if n == 0 {
            return Err(TransportError::ConnectionClosed {
                expected: len,
                received: buf.len(),
            });
        }
        buf.extend_from_slice(&chunk[..n]);
        debug!(current = buf.len(), total = len, "Update content");
    }

    Ok(buf)
}

/// Read the next 4-byte command tag.
pub async fn read_command<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Command, TransportError> {
    let raw = read_exact_chunked(reader, COMMAND_TAG_LEN).await?;
    let mut tag = [0u8; COMMAND_TAG_LEN];
    tag.copy_from_slice(&raw);
    Command::from_tag(&tag).ok_or(TransportError::UnknownCommand { tag })
}

/// Read the fixed-width request length header and enforce `max_size`.
pub async fn read_length_header<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<usize, TransportError> {
    let raw = read_exact_chunked(reader, LENGTH_HEADER_LEN).await?;
    let size = parse_length_header(&raw)?;
    if size > max_size {
        return Err(TransportError::MessageTooLarge { size, max: max_size });
    }
    Ok(size)
}

/// Read a length header followed by exactly that many body bytes.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Vec<u8>, TransportError> {
    let size = read_length_header(reader, max_size).await?;
    debug!(size, "Got message size");
    read_exact_chunked(reader, size).await
}

/// Write `"<len>\n"` followed by `payload`, then flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), TransportError> {
    let header = format!("{}\n", payload.len());
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Decode a length header: ASCII digits, optionally padded with ASCII whitespace.
fn parse_length_header(raw: &[u8]) -> Result<usize, TransportError> {
    let malformed = || TransportError::MalformedLength {
        raw: String::from_utf8_lossy(raw).into_owned(),
    };

    let text = std::str::from_utf8(raw).map_err(|_| malformed())?;
    let digits = text.trim_matches(|c: char| c.is_ascii_whitespace());
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    digits.parse().map_err(|_| malformed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn frame_header_is_unpadded_decimal() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"hello world").await.unwrap();
        assert_eq!(buf, b"11\nhello world");
    }

    #[tokio::test]
    async fn empty_payload_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"").await.unwrap();
        assert_eq!(buf, b"0\n");
    }

    #[tokio::test]
    async fn reassembles_single_byte_chunks() {
        let mut builder = Builder::new();
        builder.read(b"0000000000000005");
        for byte in b"hello" {
            builder.read(std::slice::from_ref(byte));
        }
        let mut mock = builder.build();

        let body = read_message(&mut mock, DEFAULT_MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(body, b"hello");
    }

    #[tokio::test]
    async fn command_tag_split_across_reads() {
        let mut mock = Builder::new().read(b"DA").read(b"TA").build();
        assert_eq!(read_command(&mut mock).await.unwrap(), Command::Data);
    }

    #[tokio::test]
    async fn body_larger_than_chunk_size() {
        let body = vec![b'x'; RECV_CHUNK_SIZE * 3 + 17];
        let mut cursor = std::io::Cursor::new(protocol::encode_request(&body));

        assert_eq!(read_command(&mut cursor).await.unwrap(), Command::Data);
        let got = read_message(&mut cursor, DEFAULT_MAX_MESSAGE_SIZE).await.unwrap();
        assert_eq!(got.len(), body.len());
    }

    #[tokio::test]
    async fn truncated_body_is_connection_fault() {
        let mut cursor = std::io::Cursor::new(b"0000000000000010short".to_vec());
        let err = read_message(&mut cursor, DEFAULT_MAX_MESSAGE_SIZE)
            .await
            .unwrap_err();

        assert!(err.is_connection_fault());
        assert!(matches!(
            err,
            TransportError::ConnectionClosed {
                expected: 10,
                received: 5
            }
        ));
    }

    #[tokio::test]
    async fn unknown_command_is_framing_fault() {
        let mut cursor = std::io::Cursor::new(b"PING".to_vec());
        let err = read_command(&mut cursor).await.unwrap_err();

        assert!(err.is_framing_fault());
        assert_eq!(err.to_string(), "unknown command tag: PING");
    }

    #[tokio::test]
    async fn oversized_message_rejected_before_body() {
        let mut cursor = std::io::Cursor::new(b"0000000000001000".to_vec());
        let err = read_length_header(&mut cursor, 999).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::MessageTooLarge {
                size: 1000,
                max: 999
            }
        ));
    }

    #[test]
    fn length_header_accepts_padding() {
        assert_eq!(parse_length_header(b"0000000000000005").unwrap(), 5);
        assert_eq!(parse_length_header(b"              42").unwrap(), 42);
        assert_eq!(parse_length_header(b"7               ").unwrap(), 7);
        assert_eq!(parse_length_header(b"0000000000000000").unwrap(), 0);
    }

    #[test]
    fn length_header_rejects_garbage() {
        for raw in [
            &b"                "[..],
            b"-000000000000005",
            b"+000000000000005",
            b"00000000000000x5",
            b"0000000 00000005",
            b"99999999999999999999",
        ] {
            let err = parse_length_header(raw).unwrap_err();
            assert!(
                matches!(err, TransportError::MalformedLength { .. }),
                "{raw:?} should be malformed"
            );
        }
    }
}
