//! Daemon assembly.
//!
//! Binds the configured listeners, wraps accepted sockets in TLS, spawns
//! one [`run_connection`] task per connection, and runs the single router
//! task that owns all [`RouterState`]. Every routing decision funnels
//! through that one task, which keeps fan-out atomic and queue accounting
//! centralized. A 1 s tick drains the message queue and polls the
//! blocklist; connections that became blocked close on the next tick.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;
use tracing::{info, warn};

use crate::blocklist::Blocklist;
use crate::config::DaemonConfig;
use crate::conn::{run_connection, ConnParams};
use crate::router::{RouterEvent, RouterState};
use crate::tls;

const TICK_INTERVAL: Duration = Duration::from_secs(1);

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Resolve one `host` / `host:port` listen directive.
///
/// A trailing `:port` is honoured when the host part carries no further
/// colons (bare IPv6 literals take the default port). Every resolved
/// address gets its own listener, mirroring `getaddrinfo` behaviour.
async fn resolve_listen(directive: &str, default_port: u16) -> Result<Vec<SocketAddr>> {
    let (host, port) = match directive.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.contains(':') => {
            let port: u16 = port.parse().with_context(|| {
                format!(
                    "invalid listen directive \"{directive}\": \
                     expected valid port number after ':' character"
                )
            })?;
            (host.to_string(), port)
        }
        _ => (directive.to_string(), default_port),
    };

    let addrs: Vec<SocketAddr> = tokio::net::lookup_host((host.as_str(), port))
        .await
        .with_context(|| format!("invalid listen directive \"{directive}\""))?
        .collect();
    if addrs.is_empty() {
        bail!("invalid listen directive \"{directive}\": no addresses");
    }
    Ok(addrs)
}

/// Run the daemon until the shutdown future resolves.
pub async fn run(config: DaemonConfig, shutdown: impl Future<Output = ()>) -> Result<()> {
    let acceptor = tls::make_acceptor(&config.certfile, &config.keyfile)?;
    if let Some(cafile) = &config.cafile {
        // Stations are identified by their logon callsign, not by client
        // certificates.
        info!(cafile = %cafile.display(), "cafile configured but client certificates are not verified");
    }

    let mut listeners = Vec::new();
    for directive in &config.listen {
        for addr in resolve_listen(directive, config.default_port).await? {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("invalid listen directive \"{directive}\": cannot bind {addr}"))?;
            info!(%addr, "listening");
            listeners.push(listener);
        }
    }

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let blocklist = Arc::new(Mutex::new(Blocklist::new(config.blocklist.clone())));
    let next_conn_id = Arc::new(AtomicU64::new(1));

    let mut accept_tasks = Vec::new();
    for listener in listeners {
        accept_tasks.push(tokio::spawn(accept_loop(
            listener,
            acceptor.clone(),
            event_tx.clone(),
            blocklist.clone(),
            next_conn_id.clone(),
        )));
    }
    drop(event_tx);

    let mut state = RouterState::new(config.atc_callsigns.clone());
    let mut tick = tokio::time::interval(TICK_INTERVAL);
    let mut shutdown = pin!(shutdown);

    info!("aerolinkd running");
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            event = event_rx.recv() => {
                match event {
                    Some(event) => state.handle_event(event, unix_now()),
                    None => break,
                }
            }
            _ = tick.tick() => {
                state.flush_queue(unix_now());
                let mut blocklist = blocklist.lock().unwrap();
                if blocklist.refresh() {
                    state.enforce_blocklist(&blocklist);
                }
            }
        }
    }

    for task in accept_tasks {
        task.abort();
    }
    Ok(())
}

/// Accept connections on one listener forever.
async fn accept_loop(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    events: mpsc::UnboundedSender<RouterEvent>,
    blocklist: Arc<Mutex<Blocklist>>,
    next_conn_id: Arc<AtomicU64>,
) {
    loop {
        let (tcp, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "error accepting connection");
                continue;
            }
        };
        if !blocklist.lock().unwrap().check(peer.ip()) {
            info!(%peer, "incoming connection blocked, address on blocklist");
            continue;
        }

        let id = next_conn_id.fetch_add(1, Ordering::SeqCst);
        let acceptor = acceptor.clone();
        let events = events.clone();
        tokio::spawn(handshake_and_run(tcp, peer, id, acceptor, events));
    }
}

async fn handshake_and_run(
    tcp: TcpStream,
    peer: SocketAddr,
    id: u64,
    acceptor: TlsAcceptor,
    events: mpsc::UnboundedSender<RouterEvent>,
) {
    let stream = match acceptor.accept(tcp).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(conn = id, %peer, error = %e, "TLS handshake failed");
            return;
        }
    };

    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    // Registration travels on the same channel as later traffic from this
    // task, so the router always sees Accepted first.
    let _ = events.send(RouterEvent::Accepted {
        id,
        peer_ip: peer.ip(),
        outbound: cmd_tx,
    });
    run_connection(
        stream,
        ConnParams {
            id,
            events,
            commands: cmd_rx,
        },
    )
    .await;
}
