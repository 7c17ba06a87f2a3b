//! The line-based SASL exchange that precedes binary traffic. Only the
//! EXTERNAL mechanism is spoken.

use crate::error::{Error, Result};

use log::{debug, info};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const MAX_LINE_LEN: usize = 16 * 1024;
const GUID_LEN: usize = 32;

/// Runs the handshake on `stream` and returns the server GUID. On success the
/// next byte on the stream is the first byte of a message.
pub async fn authenticate<S>(stream: &mut S, uid: u32) -> Result<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = format!("\0AUTH EXTERNAL {}\r\n", hex::encode(uid.to_string()));
    stream.write_all(request.as_bytes()).await?;
    stream.flush().await?;

    let line = read_line(stream).await?;
    debug!("auth reply: {:?}", line);
    let guid = parse_ok(&line)?;

    stream.write_all(b"BEGIN\r\n").await?;
    stream.flush().await?;
    info!("authenticated, server guid {}", guid);
    Ok(guid)
}

/// Reads one line, byte by byte so nothing past the line is consumed.
async fn read_line<S: AsyncRead + Unpin>(stream: &mut S) -> Result<String> {
    let mut line = Vec::new();
    while !line.ends_with(b"\r\n") {
        if line.len() >= MAX_LINE_LEN {
            return Err(Error::Auth("reply line is too long".to_owned()));
        }
        match stream.read_u8().await {
            Ok(b) => line.push(b),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(Error::Auth(
                    "connection closed during authentication".to_owned(),
                ))
            }
            Err(e) => return Err(e.into()),
        }
    }
    line.truncate(line.len() - 2);
    String::from_utf8(line).map_err(|_| Error::Auth("reply is not valid UTF-8".to_owned()))
}

/// Accepts exactly `OK <32 lowercase hex digits>`.
pub(crate) fn parse_ok(line: &str) -> Result<String> {
    let rejected = || Error::Auth(format!("server replied {:?}", line));
    let guid = line.strip_prefix("OK ").ok_or_else(rejected)?;
    let well_formed = guid.len() == GUID_LEN
        && guid
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !well_formed {
        return Err(rejected());
    }
    Ok(guid.to_owned())
}
