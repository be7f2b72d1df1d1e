//! Reply Writer
//!
//! Serializes a status line (and, for failures, a short plain-text body) back
//! to the client. The success reply has no body: every byte after its blank
//! line belongs to the tunnel.

use std::fmt::Display;

use anyhow::Context;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::constants::{CRLF, HTTP_VERSION};
use super::types::StatusCode;
use crate::Result;

/// Build the raw bytes of a reply
pub fn format_reply(status: StatusCode, message: &str, error: Option<&(dyn Display + Sync)>) -> String {
    if status.is_success() {
        let reason = if message.is_empty() { status.reason() } else { message };
        return format!("{} {} {}{}{}", HTTP_VERSION, status.as_u16(), reason, CRLF, CRLF);
    }

    let body = match (message.is_empty(), error) {
        (false, _) => message.to_string(),
        (true, Some(err)) => err.to_string(),
        (true, None) => status.reason().to_string(),
    };

    format!(
        "{version} {status}{crlf}\
         Content-Type: text/plain; charset=utf-8{crlf}\
         Content-Length: {len}{crlf}\
         Connection: close{crlf}\
         {crlf}\
         {body}",
        version = HTTP_VERSION,
        status = status,
        crlf = CRLF,
        len = body.len(),
        body = body,
    )
}

/// Write a reply to the client and flush it
pub async fn send_reply<W>(
    writer: &mut W,
    status: StatusCode,
    message: &str,
    error: Option<&(dyn Display + Sync)>,
) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let reply = format_reply(status, message, error);
    writer
        .write_all(reply.as_bytes())
        .await
        .with_context(|| format!("Failed to send {} reply", status))?;
    writer.flush().await.context("Failed to flush reply")?;
    Ok(())
}
