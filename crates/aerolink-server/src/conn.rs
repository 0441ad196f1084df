//! Per-connection I/O task.
//!
//! One task per accepted connection: reads raw bytes, enforces the
//! plain-ASCII rule and the input byte caps, decodes complete frames and
//! forwards them to the router task; writes whatever the router commands.
//! Any protocol malformation, I/O error or router `Close` command tears
//! the connection down, reported through a final `Closed` event.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use aerolink_models::FrameDecoder;

use crate::router::{ConnCommand, ConnId, RouterEvent};

/// Input byte cap once a callsign is bound.
pub const MAX_BUF_SZ: usize = 8192;
/// Input byte cap before logon.
pub const MAX_BUF_SZ_NO_LOGON: usize = 128;

const READ_BUF_SZ: usize = 4096;

/// Wiring of one connection task.
pub struct ConnParams {
    /// Connection id, minted by the acceptor.
    pub id: ConnId,
    /// Event channel into the router task.
    pub events: mpsc::UnboundedSender<RouterEvent>,
    /// Command channel from the router task.
    pub commands: mpsc::UnboundedReceiver<ConnCommand>,
}

/// Drive one connection until it dies.
///
/// Generic over the stream so tests can substitute in-memory duplex pipes
/// for TLS sockets.
pub async fn run_connection<S>(stream: S, params: ConnParams)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ConnParams {
        id,
        events,
        mut commands,
    } = params;
    let (mut reader, mut writer) = tokio::io::split(stream);
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_BUF_SZ];
    // Tracks whether a logon naming a FROM callsign went through, which
    // selects the input byte cap. Kept task-local so the cap applies to
    // the read chunk that carried the logon itself.
    let mut logged_on = false;

    'conn: loop {
        tokio::select! {
            read = reader.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        debug!(conn = id, "peer closed connection");
                        break 'conn;
                    }
                    Ok(n) => {
                        if let Err(e) = decoder.push(&buf[..n]) {
                            warn!(conn = id, error = %e, "invalid input, closing");
                            break 'conn;
                        }
                        let cap = if logged_on { MAX_BUF_SZ } else { MAX_BUF_SZ_NO_LOGON };
                        if decoder.buffered_len() > cap {
                            warn!(
                                conn = id,
                                buffered = decoder.buffered_len(),
                                cap,
                                "input buffer overflow, closing"
                            );
                            break 'conn;
                        }
                        loop {
                            match decoder.next_message() {
                                Ok(Some(msg)) => {
                                    if msg.is_logon() {
                                        logged_on = msg.from.is_some();
                                    }
                                    let _ = events.send(RouterEvent::Inbound { id, msg });
                                }
                                Ok(None) => break,
                                Err(e) => {
                                    warn!(conn = id, error = %e, "undecodable frame, closing");
                                    break 'conn;
                                }
                            }
                        }
                    }
                    Err(e) => {
                        debug!(conn = id, error = %e, "read error");
                        break 'conn;
                    }
                }
            }
            cmd = commands.recv() => {
                match cmd {
                    Some(ConnCommand::Send(bytes)) => {
                        let result = async {
                            writer.write_all(&bytes).await?;
                            writer.flush().await
                        }
                        .await;
                        if let Err(e) = result {
                            debug!(conn = id, error = %e, "write error");
                            break 'conn;
                        }
                    }
                    Some(ConnCommand::Close) | None => {
                        debug!(conn = id, "closed by router");
                        break 'conn;
                    }
                }
            }
        }
    }

    let _ = writer.shutdown().await;
    let _ = events.send(RouterEvent::Closed { id });
}
