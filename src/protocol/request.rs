//! Request Head Reader
//!
//! Reads the request line and headers of an incoming proxy request. Bytes are
//! consumed one at a time so nothing past the blank line is taken off the
//! socket; whatever follows belongs to the tunnel.

use anyhow::{anyhow, bail, Context};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::constants::{HEAD_TERMINATOR, MAX_REQUEST_HEAD_SIZE};
use super::types::RequestHead;
use crate::Result;

/// Read a request head from the client
pub async fn read_request_head<R>(reader: &mut R) -> Result<RequestHead>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = BytesMut::with_capacity(512);

    loop {
        let byte = reader
            .read_u8()
            .await
            .context("Connection closed before request head was complete")?;
        buf.extend_from_slice(&[byte]);

        if buf.ends_with(HEAD_TERMINATOR) {
            break;
        }
        if buf.len() >= MAX_REQUEST_HEAD_SIZE {
            bail!("Request head exceeds {} bytes", MAX_REQUEST_HEAD_SIZE);
        }
    }

    let head = std::str::from_utf8(&buf[..buf.len() - HEAD_TERMINATOR.len()])
        .map_err(|e| anyhow!("Request head is not valid UTF-8: {}", e))?;
    parse_request_head(head)
}

/// Parse a request head without its terminating blank line
pub fn parse_request_head(head: &str) -> Result<RequestHead> {
    let mut lines = head.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let (method, target, version) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(target), Some(version), None) => (method, target, version),
        _ => bail!("Malformed request line: {:?}", request_line),
    };

    if !version.starts_with("HTTP/") {
        bail!("Unsupported protocol version: {}", version);
    }

    let mut headers = Vec::new();
    for line in lines {
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| anyhow!("Malformed header line: {:?}", line))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version: version.to_string(),
        headers,
    })
}
