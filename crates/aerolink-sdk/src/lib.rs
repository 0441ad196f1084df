//! # Aerolink SDK
//!
//! Client-side building blocks for the aerolink CPDLC network:
//!
//! - [`link::LinkClient`] — TLS connection to the routing daemon with
//!   structural logon and per-send status tracking.
//! - [`msglist::MsgList`] — the message-list engine: threads, MIN/MRN
//!   numbering, reply correlation and the per-thread status state machine.
//! - [`transport`] — the [`ClientTransport`](transport::ClientTransport)
//!   and [`Clock`](transport::Clock) seams between the two, which tests
//!   replace with scripted doubles.
//!
//! ## Wiring a station
//!
//! ```no_run
//! use std::sync::Arc;
//! use aerolink_sdk::link::{LinkClient, LinkConfig};
//! use aerolink_sdk::msglist::MsgList;
//!
//! # async fn run() -> Result<(), aerolink_sdk::SdkError> {
//! let client = LinkClient::connect(LinkConfig {
//!     host: "cpdlc.example.net".into(),
//!     port: 17622,
//!     cafile: "ca.pem".into(),
//!     callsign: "AFR1234".parse().unwrap(),
//!     peer: Some("LFPG".parse().unwrap()),
//!     logon_data: String::new(),
//! })
//! .await?;
//!
//! let list = Arc::new(MsgList::new(client.clone()));
//! let pump_client = client.clone();
//! let pump_list = list.clone();
//! client.set_recv_cb(move || {
//!     while let Some(msg) = pump_client.recv() {
//!         pump_list.receive(msg);
//!     }
//! });
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod link;
pub mod msglist;
pub mod transport;

pub use error::SdkError;
pub use link::{LinkClient, LinkConfig};
pub use msglist::{MsgList, ThreadId, ThreadMessage, ThreadStatus};
pub use transport::{ClientTransport, Clock, LogonStatus, SendStatus, SendToken, SystemClock};
