//! The streaming copy engines for the two directions of a proxied pair.
//!
//! `copy_filtered` is the heart of the proxy: it moves bytes from the server
//! to the client, segmenting the stream into runs of complete CRLF-terminated
//! response lines inside a fixed 64 KiB working buffer, rewriting each run
//! through the [`FilterRuleSet`] before forwarding. Everything that cannot be
//! framed (a stream with no line terminators at all) is eventually forwarded
//! unfiltered rather than buffered without bound.
//!
//! `copy_plain` is the unfiltered client→server loop.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::error::Result;
use crate::filter::FilterRuleSet;

/// Working buffer capacity. A tunable, not a protocol requirement; one IMAP
/// response line fits comfortably.
const BUF_SIZE: usize = 64 * 1024;

/// A terminator-free run longer than this triggers the one-time warning.
const NO_TERMINATOR_WARN_BYTES: usize = 256;

const CRLF: &[u8] = b"\r\n";

/// Byte totals for one finished direction: (bytes read, bytes written).
pub type CopyTotals = (u64, u64);

/// Copy server→client, rewriting complete response lines through `rules`.
///
/// Every successful read sends an activity pulse carrying the running count
/// of bytes forwarded so far. Pulses are fire-and-forget: a full channel
/// means the watchdog already has plenty of proof of liveness, so `try_send`
/// losses are deliberate and harmless.
///
/// Returns the byte totals on clean EOF. A write error (including a short
/// write, which `write_all` surfaces as an error) terminates the direction.
/// On a read error the buffered remainder is flushed best-effort before the
/// error is returned.
pub async fn copy_filtered<R, W>(
    mut src: R,
    mut dst: W,
    rules: Arc<FilterRuleSet>,
    pulses: mpsc::Sender<u64>,
    conn: u64,
    hex_dump: bool,
) -> Result<CopyTotals>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUF_SIZE];
    // Bytes buffered at the front of `buf` that have not been forwarded yet.
    let mut wpos = 0usize;
    let mut warned = false;
    let mut from_server: u64 = 0;
    let mut to_client: u64 = 0;

    loop {
        let n = match src.read(&mut buf[wpos..]).await {
            Ok(0) => {
                // End of stream: a trailing partial line must still reach
                // the client, unfiltered.
                if wpos > 0 {
                    write_chunk(&mut dst, &buf[..wpos], conn, hex_dump).await?;
                    to_client += wpos as u64;
                }
                tracing::debug!(conn, from_server, to_client, "server stream ended");
                return Ok((from_server, to_client));
            }
            Ok(n) => n,
            Err(e) => {
                if wpos > 0 {
                    let _ = write_chunk(&mut dst, &buf[..wpos], conn, hex_dump).await;
                }
                return Err(e.into());
            }
        };

        if hex_dump {
            dump(conn, "read", &buf[wpos..wpos + n]);
        }
        from_server += n as u64;
        wpos += n;
        let _ = pulses.try_send(to_client);

        match rfind_crlf(&buf[..wpos]) {
            Some(idx) => {
                // [0, idx+2) is a maximal run of complete lines.
                let end = idx + CRLF.len();
                let filtered = rules.apply(&buf[..end]);
                write_chunk(&mut dst, &filtered, conn, hex_dump).await?;
                to_client += filtered.len() as u64;

                // Move any trailing partial line to the front.
                buf.copy_within(end..wpos, 0);
                wpos -= end;
            }
            None => {
                if !warned && wpos > NO_TERMINATOR_WARN_BYTES {
                    tracing::warn!(
                        conn,
                        buffered = wpos,
                        "response stream contains no line terminators; this \
                         usually means compression was negotiated behind our \
                         back or the client started TLS inside the session"
                    );
                    warned = true;
                }

                if wpos < BUF_SIZE - CRLF.len() {
                    // Room remains for the rest of the line.
                    continue;
                }

                // Buffer full with no terminator: forward unfiltered rather
                // than stall or grow without bound.
                write_chunk(&mut dst, &buf[..wpos], conn, hex_dump).await?;
                to_client += wpos as u64;
                wpos = 0;
            }
        }
    }
}

/// Copy client→server unmodified.
pub async fn copy_plain<R, W>(
    mut src: R,
    mut dst: W,
    conn: u64,
    hex_dump: bool,
) -> Result<CopyTotals>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; BUF_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            tracing::debug!(conn, total, "client stream ended");
            return Ok((total, total));
        }
        if hex_dump {
            dump(conn, "read", &buf[..n]);
        }
        write_chunk(&mut dst, &buf[..n], conn, hex_dump).await?;
        total += n as u64;
    }
}

/// Write a full chunk downstream. `write_all` turns short writes into
/// errors, which is exactly the fatal-for-this-direction semantics we want.
async fn write_chunk<W>(dst: &mut W, chunk: &[u8], conn: u64, hex_dump: bool) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if chunk.is_empty() {
        return Ok(());
    }
    if hex_dump {
        dump(conn, "write", chunk);
    }
    dst.write_all(chunk).await?;
    Ok(())
}

/// Index of the start of the last CRLF in `haystack`, scanning backward.
fn rfind_crlf(haystack: &[u8]) -> Option<usize> {
    haystack.windows(CRLF.len()).rposition(|w| w == CRLF)
}

/// Log a classic 16-bytes-per-row hex dump at debug level.
fn dump(conn: u64, dir: &str, data: &[u8]) {
    for (row, chunk) in data.chunks(16).enumerate() {
        let hex: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..0x7f).contains(&b) { b as char } else { '.' })
            .collect();
        tracing::debug!(
            conn,
            "{} {:08x}  {:<47}  |{}|",
            dir,
            row * 16,
            hex.join(" "),
            ascii
        );
    }
}
