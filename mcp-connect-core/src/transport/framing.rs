//! Newline-delimited JSON framing for backend stdio.
//!
//! Outbound: one compact JSON value per line. Inbound: lines are read with a
//! hard size cap so a misbehaving backend cannot make the gateway buffer
//! unbounded output, and a line holding a JSON array is split into its
//! elements so every JSON-RPC unit is surfaced individually.

use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

/// Maximum size of a single inbound line (10 MiB).
pub const MAX_LINE_BYTES: usize = 10 * 1024 * 1024;

/// Errors while reading or decoding one NDJSON line.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// A single line exceeds the configured maximum size.
    ///
    /// The remainder of the line has been drained; the reader is positioned
    /// at the start of the next line.
    #[error("Message exceeds maximum size of {max_bytes} bytes")]
    MessageTooLarge { max_bytes: usize },

    /// The line is not valid JSON.
    #[error("Malformed JSON: {reason}")]
    MalformedJson { reason: String },

    /// An underlying IO error occurred while reading.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Serialize `message` as one NDJSON line (compact JSON plus `\n`).
///
/// # Errors
///
/// Returns the serializer error; `Value` serialization only fails for
/// non-string map keys, which cannot occur here.
pub fn encode_line(message: &Value) -> Result<Vec<u8>, serde_json::Error> {
    let mut bytes = serde_json::to_vec(message)?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode one inbound line into the JSON values it carries.
///
/// Blank lines yield nothing. A top-level array yields its elements in order.
///
/// # Errors
///
/// Returns `MalformedJson` if the line is not valid JSON.
pub fn decode_line(line: &[u8]) -> Result<Vec<Value>, FramingError> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let value: Value =
        serde_json::from_slice(trimmed).map_err(|e| FramingError::MalformedJson {
            reason: e.to_string(),
        })?;

    Ok(match value {
        Value::Array(items) => items,
        other => vec![other],
    })
}

/// Read a single line with a hard size limit.
///
/// Returns the number of bytes appended to `buf` (including the newline), or
/// `Ok(0)` at EOF. A final line without a trailing newline is returned as-is.
///
/// # Errors
///
/// `MessageTooLarge` if the line exceeded `max_bytes` (the rest of the line
/// is drained first), `Io` for read failures.
pub async fn bounded_read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_bytes: usize,
) -> Result<usize, FramingError> {
    let mut total = 0usize;
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            return Ok(total);
        }

        match available.iter().position(|&b| b == b'\n') {
            Some(pos) => {
                let to_consume = pos + 1;
                if total + to_consume > max_bytes {
                    reader.consume(to_consume);
                    return Err(FramingError::MessageTooLarge { max_bytes });
                }
                buf.extend_from_slice(&available[..to_consume]);
                total += to_consume;
                reader.consume(to_consume);
                return Ok(total);
            }
            None => {
                let len = available.len();
                if total + len > max_bytes {
                    reader.consume(len);
                    drain_until_newline(reader).await?;
                    return Err(FramingError::MessageTooLarge { max_bytes });
                }
                buf.extend_from_slice(available);
                total += len;
                reader.consume(len);
            }
        }
    }
}

async fn drain_until_newline<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<()> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(());
        }
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            reader.consume(pos + 1);
            return Ok(());
        }
        let len = buf.len();
        reader.consume(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::BufReader;

    #[test]
    fn test_encode_line_is_compact_and_terminated() {
        let line = encode_line(&json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        assert_eq!(line.iter().filter(|&&b| b == b'\n').count(), 1);
    }

    #[test]
    fn test_decode_line_splits_arrays() {
        let values = decode_line(br#"[{"a":1},{"b":2}]"#).unwrap();
        assert_eq!(values, vec![json!({"a": 1}), json!({"b": 2})]);
    }

    #[test]
    fn test_decode_line_blank_and_malformed() {
        assert!(decode_line(b"   \r\n").unwrap().is_empty());
        assert!(matches!(
            decode_line(b"Server listening on stdio"),
            Err(FramingError::MalformedJson { .. })
        ));
    }

    #[tokio::test]
    async fn test_bounded_read_line_reads_lines_in_order() {
        let data: &[u8] = b"{\"a\":1}\n{\"b\":2}\nlast";
        let mut reader = BufReader::new(data);
        let mut buf = Vec::new();

        assert_eq!(bounded_read_line(&mut reader, &mut buf, 64).await.unwrap(), 8);
        assert_eq!(buf, b"{\"a\":1}\n");
        buf.clear();
        bounded_read_line(&mut reader, &mut buf, 64).await.unwrap();
        assert_eq!(buf, b"{\"b\":2}\n");
        buf.clear();
        assert_eq!(bounded_read_line(&mut reader, &mut buf, 64).await.unwrap(), 4);
        buf.clear();
        assert_eq!(bounded_read_line(&mut reader, &mut buf, 64).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bounded_read_line_skips_oversized_line() {
        let mut data = vec![b'x'; 100];
        data.extend_from_slice(b"\n{\"ok\":true}\n");
        let mut reader = BufReader::with_capacity(16, data.as_slice());
        let mut buf = Vec::new();

        assert!(matches!(
            bounded_read_line(&mut reader, &mut buf, 32).await,
            Err(FramingError::MessageTooLarge { max_bytes: 32 })
        ));
        buf.clear();
        bounded_read_line(&mut reader, &mut buf, 32).await.unwrap();
        assert_eq!(buf, b"{\"ok\":true}\n");
    }
}
