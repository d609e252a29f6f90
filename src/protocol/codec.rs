//! Line codec
//!
//! Stream helpers for the line-delimited JSON protocol. One JSON object
//! per `\n`-terminated line, for both the client and replication planes.

use std::io::{BufRead, Read, Write};

use serde::Serialize;

use crate::error::{MeridianError, Result};

/// Maximum accepted line length (4 MiB; the protocol floor is 1 MiB)
pub const MAX_LINE_BYTES: usize = 4 * 1024 * 1024;

/// Read one line, excluding the terminator.
///
/// Returns `Ok(None)` on a clean EOF. A line longer than
/// [`MAX_LINE_BYTES`] is a protocol error; the connection should be
/// closed since framing is lost.
pub fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut buf = Vec::new();
    let n = reader
        .by_ref()
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_until(b'\n', &mut buf)?;

    if n == 0 {
        return Ok(None);
    }
    if buf.len() > MAX_LINE_BYTES {
        return Err(MeridianError::Protocol(format!(
            "line exceeds {} bytes",
            MAX_LINE_BYTES
        )));
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    if buf.last() == Some(&b'\r') {
        buf.pop();
    }

    String::from_utf8(buf)
        .map(Some)
        .map_err(|_| MeridianError::Protocol("line is not valid UTF-8".to_string()))
}

/// Serialize a message as one JSON line and flush it.
pub fn write_line<W: Write, T: Serialize>(writer: &mut W, message: &T) -> Result<()> {
    let mut line = serde_json::to_vec(message)
        .map_err(|e| MeridianError::Serialization(e.to_string()))?;
    line.push(b'\n');
    writer.write_all(&line)?;
    writer.flush()?;
    Ok(())
}
