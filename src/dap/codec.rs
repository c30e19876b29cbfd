//! DAP wire protocol codec
//!
//! The DAP protocol uses HTTP-style headers followed by JSON body:
//! ```text
//! Content-Length: <byte-length>\r\n
//! \r\n
//! <JSON body>
//! ```

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::Error;

/// Sanity limit - 100MB should be plenty for any DAP message
const MAX_CONTENT_LENGTH: usize = 100 * 1024 * 1024;

/// Read a DAP message from the stream
///
/// Returns `Ok(None)` when the stream closes cleanly before a header, and an
/// error when it closes mid-message or the header block is malformed.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<String>, Error>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;
    let mut saw_header = false;

    loop {
        let mut line = String::new();
        let bytes_read = reader.read_line(&mut line).await?;

        if bytes_read == 0 {
            if saw_header {
                return Err(Error::DapProtocol(
                    "Stream closed inside message headers".to_string(),
                ));
            }
            return Ok(None);
        }

        // Empty line (just \r\n) signals end of headers
        if line == "\r\n" || line == "\n" {
            if saw_header {
                break;
            }
            // Stray separator between messages
            continue;
        }
        saw_header = true;

        let Some((name, value)) = line.trim().split_once(':') else {
            continue;
        };
        if name.trim().eq_ignore_ascii_case("content-length") {
            content_length = Some(value.trim().parse().map_err(|_| {
                Error::DapProtocol(format!("Invalid Content-Length: {}", value.trim()))
            })?);
        }
        // Ignore other headers (like Content-Type)
    }

    let len = content_length
        .ok_or_else(|| Error::DapProtocol("Missing Content-Length header".to_string()))?;

    if len > MAX_CONTENT_LENGTH {
        return Err(Error::DapProtocol(format!(
            "Content-Length too large: {} bytes",
            len
        )));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::DapProtocol(format!("Stream closed before {} body bytes arrived", len))
        } else {
            Error::Io(e)
        }
    })?;

    String::from_utf8(body)
        .map(Some)
        .map_err(|e| Error::DapProtocol(format!("Invalid UTF-8: {}", e)))
}

/// Write a DAP message to the stream
///
/// Adds the Content-Length header and flushes so the peer sees the message
/// immediately
pub async fn write_message<W>(writer: &mut W, json: &str) -> Result<(), Error>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("Content-Length: {}\r\n\r\n", json.len());

    writer.write_all(header.as_bytes()).await?;
    writer.write_all(json.as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tokio::io::BufReader;

    fn reader(data: &[u8]) -> BufReader<Cursor<Vec<u8>>> {
        BufReader::new(Cursor::new(data.to_vec()))
    }

    #[tokio::test]
    async fn test_read_message() {
        let mut reader = reader(b"Content-Length: 13\r\n\r\n{\"test\":true}");

        let result = read_message(&mut reader).await.unwrap();
        assert_eq!(result.as_deref(), Some("{\"test\":true}"));
    }

    #[tokio::test]
    async fn test_read_message_with_extra_headers() {
        let mut reader = reader(
            b"Content-Length: 13\r\nContent-Type: application/json\r\n\r\n{\"test\":true}",
        );

        let result = read_message(&mut reader).await.unwrap();
        assert_eq!(result.as_deref(), Some("{\"test\":true}"));
    }

    #[tokio::test]
    async fn test_header_name_is_case_insensitive() {
        let mut reader = reader(b"content-length: 2\r\n\r\n{}");
        assert_eq!(read_message(&mut reader).await.unwrap().as_deref(), Some("{}"));
    }

    #[tokio::test]
    async fn test_consecutive_messages() {
        let mut reader = reader(b"Content-Length: 2\r\n\r\n{}Content-Length: 4\r\n\r\n[1,2]");
        // Second declared length is 4 but the body is 5 bytes; only 4 are read
        assert_eq!(read_message(&mut reader).await.unwrap().as_deref(), Some("{}"));
        assert_eq!(read_message(&mut reader).await.unwrap().as_deref(), Some("[1,2"));
    }

    #[tokio::test]
    async fn test_clean_eof_is_none() {
        let mut reader = reader(b"");
        assert!(read_message(&mut reader).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_content_length_is_error() {
        let mut reader = reader(b"Content-Type: application/json\r\n\r\n{}");
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::DapProtocol(msg) if msg.contains("Missing")));
    }

    #[tokio::test]
    async fn test_truncated_body_is_error() {
        let mut reader = reader(b"Content-Length: 20\r\n\r\n{\"short\":1}");
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::DapProtocol(msg) if msg.contains("body")));
    }

    #[tokio::test]
    async fn test_eof_inside_headers_is_error() {
        let mut reader = reader(b"Content-Length: 20\r\n");
        assert!(read_message(&mut reader).await.is_err());
    }

    #[tokio::test]
    async fn test_unparsable_content_length_is_error() {
        let mut reader = reader(b"Content-Length: abc\r\n\r\n{}");
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::DapProtocol(msg) if msg == "Invalid Content-Length: abc"));
    }

    #[tokio::test]
    async fn test_oversize_content_length_is_error() {
        let mut reader = reader(b"Content-Length: 999999999999\r\n\r\n{}");
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::DapProtocol(msg) if msg.contains("too large")));
    }

    #[tokio::test]
    async fn test_invalid_utf8_body_is_error() {
        let mut reader = reader(b"Content-Length: 2\r\n\r\n\xff\xfe");
        let err = read_message(&mut reader).await.unwrap_err();
        assert!(matches!(err, Error::DapProtocol(msg) if msg.starts_with("Invalid UTF-8")));
    }

    #[tokio::test]
    async fn test_write_message() {
        let mut output = Vec::new();
        write_message(&mut output, "{\"test\":true}").await.unwrap();

        let expected = "Content-Length: 13\r\n\r\n{\"test\":true}";
        assert_eq!(String::from_utf8(output).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_content_length_counts_utf8_bytes() {
        let body = "{\"output\":\"Übergabe ✓\"}";
        let mut output = Vec::new();
        write_message(&mut output, body).await.unwrap();

        let header = format!("Content-Length: {}\r\n\r\n", body.as_bytes().len());
        assert!(String::from_utf8(output.clone()).unwrap().starts_with(&header));

        let mut reader = reader(&output);
        assert_eq!(read_message(&mut reader).await.unwrap().as_deref(), Some(body));
    }
}
