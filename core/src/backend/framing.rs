//! Stdio framing.
//!
//! Outbound frames are always length-prefixed:
//!
//! ```text
//! Content-Length: <n>\r\n
//! \r\n
//! <n bytes of JSON>
//! ```
//!
//! Inbound frames are auto-detected per message, because MCP servers in the
//! wild emit either style: a first non-empty line starting with `{` or `[` is
//! a whole newline-delimited message, anything else starts a header block
//! terminated by a blank line whose `Content-Length` gives the body size.

use std::io;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest body accepted from a backend
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Header line preceding a body of `len` bytes
pub fn frame_header(len: usize) -> String {
    format!("Content-Length: {len}\r\n\r\n")
}

/// Write one length-prefixed frame and flush.
pub async fn write_frame<W>(writer: &mut W, body: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut frame = frame_header(body.len()).into_bytes();
    frame.extend_from_slice(body);
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// Read one frame body in either framing style.
///
/// Lines are handled as raw bytes: a newline-delimited payload that is not
/// valid UTF-8 is still returned whole and left for the JSON decoder to
/// reject. End of stream, including a clean close between frames, is
/// reported as `UnexpectedEof`; a header block without a usable
/// `Content-Length`, or any frame over `MAX_FRAME_BYTES`, is `InvalidData`.
/// Both leave the stream unusable.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    read_frame_capped(reader, MAX_FRAME_BYTES).await
}

async fn read_frame_capped<R>(reader: &mut R, max: usize) -> io::Result<Vec<u8>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::new();

    // Blank lines between frames carry nothing
    loop {
        if read_line_capped(reader, &mut line, max).await? == 0 {
            return Err(eof());
        }
        if !trim_line_end(&line).is_empty() {
            break;
        }
    }

    let first = trim_line_end(&line);
    if first.starts_with(b"{") || first.starts_with(b"[") {
        return Ok(first.to_vec());
    }

    let mut content_length = header_content_length(first);
    loop {
        if read_line_capped(reader, &mut line, max).await? == 0 {
            return Err(eof());
        }
        let header = trim_line_end(&line);
        if header.is_empty() {
            break;
        }
        if let Some(len) = header_content_length(header) {
            content_length = Some(len);
        }
    }

    let len = content_length.filter(|len| *len > 0).ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidData, "missing Content-Length header")
    })?;
    if len > max {
        return Err(too_large(len, max));
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Read up to and including the next `\n` into `line` (cleared first).
/// A line still unterminated after `max` bytes is `InvalidData`.
async fn read_line_capped<R>(reader: &mut R, line: &mut Vec<u8>, max: usize) -> io::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let limit = u64::try_from(max).unwrap_or(u64::MAX).saturating_add(1);
    let read = (&mut *reader).take(limit).read_until(b'\n', line).await?;
    if read > max && line.last() != Some(&b'\n') {
        return Err(too_large(read, max));
    }
    Ok(read)
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let end = line
        .iter()
        .rposition(|b| !matches!(b, b'\r' | b'\n'))
        .map_or(0, |last| last + 1);
    &line[..end]
}

/// Header lines that are not UTF-8 never name a length
fn header_content_length(header: &[u8]) -> Option<usize> {
    std::str::from_utf8(header).ok().and_then(parse_content_length)
}

/// `Content-Length: n` (name case-insensitive) -> `n`
fn parse_content_length(header: &str) -> Option<usize> {
    let (name, value) = header.split_once(':')?;
    if name.trim().eq_ignore_ascii_case("content-length") {
        value.trim().parse().ok()
    } else {
        None
    }
}

fn too_large(len: usize, max: usize) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("frame of {len} bytes exceeds {max}"),
    )
}

fn eof() -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, "stream closed")
}
