//! TLS link client.
//!
//! [`LinkClient`] owns the TLS connection to the routing daemon: it
//! performs the structural logon (a logon frame naming our callsign and
//! the intended peer), pumps encoded frames both ways, and tracks the fate
//! of every send so the message-list engine can poll it through the
//! [`ClientTransport`] interface.
//!
//! Incoming messages land in an internal queue; a registered receive
//! callback is fired after each delivery so the owner can drain the queue
//! with [`recv`](LinkClient::recv) — typically straight into
//! [`MsgList::receive`](crate::msglist::MsgList::receive).

use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_rustls::TlsConnector;
use tracing::{debug, warn};

use aerolink_models::{encode, Callsign, FrameDecoder, Message};

use crate::error::SdkError;
use crate::transport::{ClientTransport, LogonStatus, SendStatus, SendToken};

const READ_BUF_SZ: usize = 4096;

// ---------------------------------------------------------------------------
// LinkConfig
// ---------------------------------------------------------------------------

/// Configuration for [`LinkClient::connect`].
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Daemon host name (also used for TLS server-name verification).
    pub host: String,
    /// Daemon TCP port.
    pub port: u16,
    /// PEM file with the certificate chain the daemon's certificate must
    /// verify against.
    pub cafile: PathBuf,
    /// Our own callsign, sent in the logon `FROM=` header.
    pub callsign: Callsign,
    /// The intended peer, sent in the logon `TO=` header.
    pub peer: Option<Callsign>,
    /// Opaque logon payload.
    pub logon_data: String,
}

// ---------------------------------------------------------------------------
// LinkClient
// ---------------------------------------------------------------------------

struct Shared {
    next_token: AtomicU64,
    statuses: Mutex<HashMap<SendToken, SendStatus>>,
    logon: Mutex<LogonStatus>,
    logon_token: Mutex<Option<SendToken>>,
    recv_queue: Mutex<VecDeque<Message>>,
    recv_cb: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl Shared {
    fn set_status(&self, token: SendToken, status: SendStatus) {
        self.statuses.lock().unwrap().insert(token, status);
    }

    fn fail_link(&self) {
        *self.logon.lock().unwrap() = LogonStatus::Disconnected;
    }
}

/// A live TLS link to the routing daemon.
pub struct LinkClient {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<(SendToken, String)>,
}

impl LinkClient {
    /// Establish the TLS link and transmit the structural logon frame.
    ///
    /// Spawns a reader and a writer task on the current tokio runtime; the
    /// returned client is cheap to share and implements
    /// [`ClientTransport`].
    pub async fn connect(config: LinkConfig) -> Result<Arc<Self>, SdkError> {
        let mut roots = rustls::RootCertStore::empty();
        let mut reader = BufReader::new(File::open(&config.cafile)?);
        for cert in rustls_pemfile::certs(&mut reader) {
            roots.add(cert?)?;
        }
        if roots.is_empty() {
            return Err(SdkError::Config(format!(
                "no certificates found in {}",
                config.cafile.display()
            )));
        }
        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(tls_config));

        let server_name = ServerName::try_from(config.host.clone())
            .map_err(|_| SdkError::Config(format!("invalid server name \"{}\"", config.host)))?;
        let tcp = TcpStream::connect((config.host.as_str(), config.port)).await?;
        let stream = connector.connect(server_name, tcp).await?;
        debug!(host = %config.host, port = config.port, "TLS link established");

        let (read_half, write_half) = tokio::io::split(stream);
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            next_token: AtomicU64::new(0),
            statuses: Mutex::new(HashMap::new()),
            logon: Mutex::new(LogonStatus::InProgress),
            logon_token: Mutex::new(None),
            recv_queue: Mutex::new(VecDeque::new()),
            recv_cb: Mutex::new(None),
        });
        tokio::spawn(writer_task(write_half, out_rx, shared.clone()));
        tokio::spawn(reader_task(read_half, shared.clone()));

        let client = Arc::new(Self {
            shared,
            outgoing: out_tx,
        });

        let logon_msg = Message::logon(config.logon_data, config.callsign, config.peer);
        let token = client.mint_token();
        *client.shared.logon_token.lock().unwrap() = Some(token);
        client.transmit(token, &logon_msg);

        Ok(client)
    }

    /// Pop the next received message, if any.
    pub fn recv(&self) -> Option<Message> {
        self.shared.recv_queue.lock().unwrap().pop_front()
    }

    /// Register a callback fired (from the reader task) whenever new
    /// messages become available through [`recv`](Self::recv).
    pub fn set_recv_cb(&self, cb: impl Fn() + Send + Sync + 'static) {
        *self.shared.recv_cb.lock().unwrap() = Some(Arc::new(cb));
    }

    fn mint_token(&self) -> SendToken {
        SendToken::new(self.shared.next_token.fetch_add(1, Ordering::SeqCst))
    }

    fn transmit(&self, token: SendToken, msg: &Message) {
        match encode(msg) {
            Ok(frame) => {
                self.shared.set_status(token, SendStatus::Sending);
                if self.outgoing.send((token, frame)).is_err() {
                    // Writer task is gone, the link is down.
                    self.shared.set_status(token, SendStatus::SendFailed);
                }
            }
            Err(e) => {
                warn!(error = %e, "refusing to send invalid message");
                self.shared.set_status(token, SendStatus::SendFailed);
            }
        }
    }
}

impl ClientTransport for LinkClient {
    fn send(&self, msg: &Message) -> SendToken {
        let token = self.mint_token();
        self.transmit(token, msg);
        token
    }

    fn send_status(&self, token: SendToken) -> SendStatus {
        self.shared
            .statuses
            .lock()
            .unwrap()
            .get(&token)
            .copied()
            .unwrap_or(SendStatus::SendFailed)
    }

    fn logon_status(&self) -> LogonStatus {
        *self.shared.logon.lock().unwrap()
    }
}

// ---------------------------------------------------------------------------
// Link tasks
// ---------------------------------------------------------------------------

async fn writer_task<W>(
    mut writer: W,
    mut rx: mpsc::UnboundedReceiver<(SendToken, String)>,
    shared: Arc<Shared>,
) where
    W: AsyncWriteExt + Unpin,
{
    while let Some((token, frame)) = rx.recv().await {
        let result = async {
            writer.write_all(frame.as_bytes()).await?;
            writer.flush().await
        }
        .await;

        match result {
            Ok(()) => {
                shared.set_status(token, SendStatus::Sent);
                if *shared.logon_token.lock().unwrap() == Some(token) {
                    *shared.logon.lock().unwrap() = LogonStatus::Complete;
                }
            }
            Err(e) => {
                warn!(error = %e, "link write failed");
                shared.set_status(token, SendStatus::SendFailed);
                while let Ok((queued, _)) = rx.try_recv() {
                    shared.set_status(queued, SendStatus::SendFailed);
                }
                shared.fail_link();
                return;
            }
        }
    }
}

async fn reader_task<R>(mut reader: R, shared: Arc<Shared>)
where
    R: AsyncReadExt + Unpin,
{
    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_BUF_SZ];
    'link: loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                debug!("link closed by server");
                break 'link;
            }
            Ok(n) => {
                if let Err(e) = decoder.push(&buf[..n]) {
                    warn!(error = %e, "invalid bytes from server");
                    break 'link;
                }
                let mut delivered = false;
                loop {
                    match decoder.next_message() {
                        Ok(Some(msg)) => {
                            shared.recv_queue.lock().unwrap().push_back(msg);
                            delivered = true;
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "undecodable frame from server");
                            break 'link;
                        }
                    }
                }
                if delivered {
                    let cb = shared.recv_cb.lock().unwrap().clone();
                    if let Some(cb) = cb {
                        cb();
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "link read failed");
                break 'link;
            }
        }
    }
    shared.fail_link();
}
