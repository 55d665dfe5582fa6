//! # RESP2 Encoding and Parsing
//!
//! Purpose: Encode client commands and parse server replies over an async
//! buffered reader, keeping allocations under control.
//!
//! ## Design Principles
//! 1. **State-Free Parsing**: Replies are parsed top-down with minimal state.
//! 2. **Buffer Reuse**: Caller provides buffers to avoid per-call allocations.
//! 3. **Binary-Safe**: Bulk strings are treated as raw bytes.
//! 4. **Fail Fast**: Invalid framing returns protocol errors immediately.

use futures::future::{BoxFuture, FutureExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use kvpool_core::ConnectionError;

/// Largest bulk string accepted, matching the server's own limit.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;
/// Largest element count accepted for one array reply.
const MAX_ARRAY_LEN: i64 = 1 << 24;
/// Elements reserved up front; larger arrays grow as items arrive.
const ARRAY_PREALLOC: usize = 1024;
/// Deepest array nesting accepted.
const MAX_DEPTH: usize = 64;

/// RESP reply value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespValue {
    /// +OK or +PONG style replies.
    Simple(Vec<u8>),
    /// -ERR ... replies.
    Error(Vec<u8>),
    /// :123 replies.
    Integer(i64),
    /// $... bulk strings, with None for null.
    Bulk(Option<Vec<u8>>),
    /// *... arrays.
    Array(Vec<RespValue>),
}

impl RespValue {
    /// Error replies become `ConnectionError::Server`; everything else passes.
    pub fn into_result(self) -> Result<RespValue, ConnectionError> {
        match self {
            RespValue::Error(message) => Err(ConnectionError::Server(
                String::from_utf8_lossy(&message).into_owned(),
            )),
            other => Ok(other),
        }
    }
}

/// Encodes a RESP2 array command into the provided buffer.
pub fn encode_command(args: &[&[u8]], out: &mut Vec<u8>) {
    out.push(b'*');
    push_usize(out, args.len());
    out.extend_from_slice(b"\r\n");
    for arg in args {
        out.push(b'$');
        push_usize(out, arg.len());
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
}

/// Reads one RESP value from the buffered reader.
///
/// Lengths and nesting beyond the parser limits fail with `Protocol`.
pub async fn read_response<R>(
    reader: &mut R,
    line_buf: &mut Vec<u8>,
) -> Result<RespValue, ConnectionError>
where
    R: AsyncBufRead + Unpin + Send,
{
    read_value(reader, line_buf, 0).await
}

// Boxed because array replies recurse.
fn read_value<'a, R>(
    reader: &'a mut R,
    line_buf: &'a mut Vec<u8>,
    depth: usize,
) -> BoxFuture<'a, Result<RespValue, ConnectionError>>
where
    R: AsyncBufRead + Unpin + Send,
{
    async move {
        read_line(reader, line_buf).await?;
        if line_buf.is_empty() {
            return Err(ConnectionError::Protocol("empty reply line"));
        }

        match line_buf[0] {
            b'+' => Ok(RespValue::Simple(line_buf[1..].to_vec())),
            b'-' => Ok(RespValue::Error(line_buf[1..].to_vec())),
            b':' => Ok(RespValue::Integer(parse_i64(&line_buf[1..])?)),
            b'$' => {
                let len = parse_i64(&line_buf[1..])?;
                read_bulk(reader, len, line_buf).await
            }
            b'*' => {
                let len = parse_i64(&line_buf[1..])?;
                read_array(reader, len, line_buf, depth).await
            }
            _ => Err(ConnectionError::Protocol("unknown reply type")),
        }
    }
    .boxed()
}

async fn read_bulk<R>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
) -> Result<RespValue, ConnectionError>
where
    R: AsyncBufRead + Unpin + Send,
{
    if len < 0 {
        return Ok(RespValue::Bulk(None));
    }
    if len > MAX_BULK_LEN {
        return Err(ConnectionError::Protocol("bulk length exceeds limit"));
    }
    let len = usize::try_from(len).map_err(|_| ConnectionError::Protocol("bulk length"))?;
    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;

    let mut crlf = [0u8; 2];
    reader.read_exact(&mut crlf).await?;
    if crlf != [b'\r', b'\n'] {
        return Err(ConnectionError::Protocol("bulk string missing CRLF"));
    }

    line_buf.clear();
    Ok(RespValue::Bulk(Some(data)))
}

async fn read_array<R>(
    reader: &mut R,
    len: i64,
    line_buf: &mut Vec<u8>,
    depth: usize,
) -> Result<RespValue, ConnectionError>
where
    R: AsyncBufRead + Unpin + Send,
{
    if len <= 0 {
        return Ok(RespValue::Array(Vec::new()));
    }
    if len > MAX_ARRAY_LEN {
        return Err(ConnectionError::Protocol("array length exceeds limit"));
    }
    if depth >= MAX_DEPTH {
        return Err(ConnectionError::Protocol("array nesting exceeds limit"));
    }

    let len = len as usize;
    let mut items = Vec::with_capacity(len.min(ARRAY_PREALLOC));
    for _ in 0..len {
        items.push(read_value(reader, line_buf, depth + 1).await?);
    }
    Ok(RespValue::Array(items))
}

async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> Result<(), ConnectionError>
where
    R: AsyncBufRead + Unpin + Send,
{
    buf.clear();
    let bytes = reader.read_until(b'\n', buf).await?;
    if bytes == 0 {
        return Err(ConnectionError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        )));
    }
    if buf.len() < 2 || buf[buf.len() - 2] != b'\r' {
        return Err(ConnectionError::Protocol("line missing CRLF"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_i64(data: &[u8]) -> Result<i64, ConnectionError> {
    if data.is_empty() {
        return Err(ConnectionError::Protocol("empty integer"));
    }
    let (negative, digits) = match data[0] {
        b'-' => (true, &data[1..]),
        _ => (false, data),
    };

    let mut value: i64 = 0;
    for &b in digits {
        if !b.is_ascii_digit() {
            return Err(ConnectionError::Protocol("invalid integer"));
        }
        value = value.saturating_mul(10).saturating_add((b - b'0') as i64);
    }

    Ok(if negative { -value } else { value })
}

fn push_usize(out: &mut Vec<u8>, mut value: usize) {
    // Write digits into a small stack buffer to avoid heap allocations.
    let mut buf = [0u8; 20];
    let mut len = 0;
    if value == 0 {
        buf[0] = b'0';
        len = 1;
    } else {
        while value > 0 {
            buf[len] = b'0' + (value % 10) as u8;
            value /= 10;
            len += 1;
        }
    }
    for idx in (0..len).rev() {
        out.push(buf[idx]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(input: &[u8]) -> Result<RespValue, ConnectionError> {
        let mut reader = input;
        let mut line = Vec::new();
        read_response(&mut reader, &mut line).await
    }

    #[test]
    fn encodes_command() {
        let mut buf = Vec::new();
        encode_command(&[b"GET", b"key"], &mut buf);
        assert_eq!(&buf, b"*2\r\n$3\r\nGET\r\n$3\r\nkey\r\n");
    }

    #[test]
    fn encodes_empty_argument() {
        let mut buf = Vec::new();
        encode_command(&[b"SET", b"k", b""], &mut buf);
        assert_eq!(&buf, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$0\r\n\r\n");
    }

    #[tokio::test]
    async fn parses_simple_string() {
        assert_eq!(parse(b"+OK\r\n").await.unwrap(), RespValue::Simple(b"OK".to_vec()));
    }

    #[tokio::test]
    async fn parses_bulk_and_null_bulk() {
        assert_eq!(
            parse(b"$5\r\nhello\r\n").await.unwrap(),
            RespValue::Bulk(Some(b"hello".to_vec()))
        );
        assert_eq!(parse(b"$-1\r\n").await.unwrap(), RespValue::Bulk(None));
    }

    #[tokio::test]
    async fn parses_negative_integer() {
        assert_eq!(parse(b":-2\r\n").await.unwrap(), RespValue::Integer(-2));
    }

    #[tokio::test]
    async fn parses_nested_array() {
        let value = parse(b"*2\r\n:1\r\n*1\r\n+x\r\n").await.unwrap();
        assert_eq!(
            value,
            RespValue::Array(vec![
                RespValue::Integer(1),
                RespValue::Array(vec![RespValue::Simple(b"x".to_vec())]),
            ])
        );
    }

    #[tokio::test]
    async fn error_reply_maps_to_server_error() {
        let value = parse(b"-ERR bad\r\n").await.unwrap();
        assert_eq!(value, RespValue::Error(b"ERR bad".to_vec()));
        assert!(matches!(
            value.into_result(),
            Err(ConnectionError::Server(message)) if message == "ERR bad"
        ));
    }

    #[tokio::test]
    async fn rejects_bad_framing() {
        assert!(matches!(
            parse(b"?what\r\n").await,
            Err(ConnectionError::Protocol(_))
        ));
        assert!(matches!(
            parse(b"+OK\n").await,
            Err(ConnectionError::Protocol(_))
        ));
        assert!(matches!(parse(b"").await, Err(ConnectionError::Io(_))));
    }

    #[tokio::test]
    async fn rejects_oversized_lengths() {
        assert!(matches!(
            parse(b"$9223372036854775807\r\n").await,
            Err(ConnectionError::Protocol("bulk length exceeds limit"))
        ));
        assert!(matches!(
            parse(b"*9223372036854775807\r\n").await,
            Err(ConnectionError::Protocol("array length exceeds limit"))
        ));
    }

    #[tokio::test]
    async fn large_array_header_with_short_body_fails_cleanly() {
        // Within the count limit, but the stream ends after one element.
        assert!(matches!(
            parse(b"*1000000\r\n:1\r\n").await,
            Err(ConnectionError::Io(_))
        ));
    }

    #[tokio::test]
    async fn rejects_runaway_nesting() {
        let input = b"*1\r\n".repeat(MAX_DEPTH + 1);
        assert!(matches!(
            parse(&input).await,
            Err(ConnectionError::Protocol("array nesting exceeds limit"))
        ));
    }
}
