use std::io;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Sent by the server before it reads the username line.
pub const USERNAME_PROMPT: &str = "USERNAME";
/// First line a peer receives once it has been admitted.
pub const CONNECTED: &str = "Connected to the server!";
/// Best-effort reply to a quit request.
pub const GOODBYE: &str = "Goodbye!";

pub fn joined_notice(username: &str) -> String {
    format!("🔵 {username} joined the chat.")
}

pub fn left_notice(username: &str) -> String {
    format!("🔴 {username} left the chat.")
}

pub fn chat_line(username: &str, text: &str) -> String {
    format!("{username}: {text}")
}

/// `quit` and `/quit` in any ASCII letter case request departure.
pub fn is_quit(text: &str) -> bool {
    let text = text.trim();
    text.eq_ignore_ascii_case("quit") || text.eq_ignore_ascii_case("/quit")
}

/// Longest line accepted from a peer, excluding the line ending.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Reads one newline-terminated line, without its line ending.
///
/// Returns `Ok(None)` once the peer has closed its side of the stream. A line
/// that is not valid UTF-8 or runs past [`MAX_LINE_BYTES`] surfaces as an
/// `InvalidData` error.
pub async fn read_line<R>(reader: &mut R) -> io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    // Room for the longest line plus "\r\n".
    let limit = MAX_LINE_BYTES + 2;
    let mut buf = Vec::new();
    let bytes = reader
        .take(limit as u64)
        .read_until(b'\n', &mut buf)
        .await?;
    if bytes == 0 {
        return Ok(None);
    }
    if bytes == limit && buf.last() != Some(&b'\n') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line longer than {MAX_LINE_BYTES} bytes"),
        ));
    }

    let mut line =
        String::from_utf8(buf).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
    let trimmed = line.trim_end_matches(LINE_ENDINGS).len();
    line.truncate(trimmed);
    if line.len() > MAX_LINE_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line longer than {MAX_LINE_BYTES} bytes"),
        ));
    }
    Ok(Some(line))
}

pub async fn write_line<W>(writer: &mut W, line: &str) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    // One write per line so a single message never straddles two frames.
    let mut encoded = Vec::with_capacity(line.len() + 1);
    encoded.extend_from_slice(line.as_bytes());
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await
}
