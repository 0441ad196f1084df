//! Routing state: callsign index, message queue, forwarding.
//!
//! [`RouterState`] owns every routing decision. It runs inside the single
//! router task of the daemon, which serializes all connection events; that
//! keeps fan-out to multiple connections of one callsign atomic and the
//! queue byte accounting in one place.
//!
//! The state machine mirrors the wire protocol rules:
//!
//! - the first message on a connection must be a logon with a non-empty
//!   `FROM=`; the logon binds the connection into the callsign index and
//!   the logon message is then routed onward to its addressee;
//! - later messages route by `TO=` (falling back to the peer declared at
//!   logon), fanning out to every live connection of that callsign or
//!   queueing when none exists;
//! - protocol-policy failures are answered with a synthesized CPDLC error
//!   message on the offending connection, which stays open.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use aerolink_models::{encode, Callsign, Message};

use crate::blocklist::Blocklist;

/// Queued-message byte budget (128 MiB).
pub const QUEUED_MSG_MAX_BYTES: u64 = 128 << 20;
/// Queued messages older than this many seconds are dropped.
pub const QUEUED_MSG_TIMEOUT_SECS: u64 = 3600;
/// Fixed per-entry accounting overhead, in addition to the frame bytes.
const QUEUE_ENTRY_OVERHEAD: u64 = 64;

/// Identifier of one live connection.
pub type ConnId = u64;

/// Commands the router sends to a connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnCommand {
    /// Append these bytes to the connection's outbound stream.
    Send(Vec<u8>),
    /// Tear the connection down.
    Close,
}

/// Events connection tasks send to the router.
#[derive(Debug)]
pub enum RouterEvent {
    /// A connection completed its TLS handshake and is ready for traffic.
    Accepted {
        /// Connection id, minted by the acceptor.
        id: ConnId,
        /// Peer IP address, for blocklist sweeps.
        peer_ip: IpAddr,
        /// Command channel into the connection task.
        outbound: mpsc::UnboundedSender<ConnCommand>,
    },
    /// A complete message arrived on a connection.
    Inbound {
        /// Source connection.
        id: ConnId,
        /// The decoded message.
        msg: Message,
    },
    /// The connection is gone (peer close, I/O error, protocol violation).
    Closed {
        /// The defunct connection.
        id: ConnId,
    },
}

struct Conn {
    peer_ip: IpAddr,
    outbound: mpsc::UnboundedSender<ConnCommand>,
    /// Bound callsign; `Some` iff the logon completed.
    from: Option<Callsign>,
    /// Peer declared at logon, the fallback destination.
    to: Option<Callsign>,
}

// ---------------------------------------------------------------------------
// MsgQueue
// ---------------------------------------------------------------------------

struct QueuedMsg {
    frame: String,
    to: Callsign,
    created: u64,
}

impl QueuedMsg {
    fn cost(&self) -> u64 {
        QUEUE_ENTRY_OVERHEAD + self.frame.len() as u64
    }
}

/// FIFO of encoded frames awaiting a recipient, with central byte
/// accounting against a fixed budget.
struct MsgQueue {
    entries: VecDeque<QueuedMsg>,
    bytes: u64,
    max_bytes: u64,
}

impl MsgQueue {
    fn new(max_bytes: u64) -> Self {
        Self {
            entries: VecDeque::new(),
            bytes: 0,
            max_bytes,
        }
    }

    /// Append a frame; `false` when the byte budget is exhausted.
    fn store(&mut self, frame: String, to: Callsign, now: u64) -> bool {
        let entry = QueuedMsg {
            frame,
            to,
            created: now,
        };
        if self.bytes + entry.cost() > self.max_bytes {
            warn!(
                max_bytes = self.max_bytes,
                "message queue out of space, rejecting"
            );
            return false;
        }
        self.bytes += entry.cost();
        self.entries.push_back(entry);
        true
    }
}

// ---------------------------------------------------------------------------
// RouterState
// ---------------------------------------------------------------------------

/// All routing state of the daemon.
pub struct RouterState {
    conns: HashMap<ConnId, Conn>,
    by_from: HashMap<Callsign, Vec<ConnId>>,
    queue: MsgQueue,
    atc_callsigns: std::collections::HashSet<Callsign>,
}

impl RouterState {
    /// Create an empty router with the default queue budget.
    pub fn new(atc_callsigns: std::collections::HashSet<Callsign>) -> Self {
        Self::with_queue_budget(atc_callsigns, QUEUED_MSG_MAX_BYTES)
    }

    /// Create an empty router with an explicit queue byte budget.
    pub fn with_queue_budget(
        atc_callsigns: std::collections::HashSet<Callsign>,
        max_bytes: u64,
    ) -> Self {
        Self {
            conns: HashMap::new(),
            by_from: HashMap::new(),
            queue: MsgQueue::new(max_bytes),
            atc_callsigns,
        }
    }

    /// Bytes currently accounted to the queue.
    pub fn queued_bytes(&self) -> u64 {
        self.queue.bytes
    }

    /// Number of queued messages.
    pub fn queued_count(&self) -> usize {
        self.queue.entries.len()
    }

    /// Number of live connections.
    pub fn conn_count(&self) -> usize {
        self.conns.len()
    }

    /// Live connection ids currently bound to `callsign`.
    pub fn conns_for(&self, callsign: &Callsign) -> &[ConnId] {
        self.by_from.get(callsign).map(Vec::as_slice).unwrap_or(&[])
    }

    /// `true` when the connection completed its logon.
    pub fn is_logged_on(&self, id: ConnId) -> bool {
        self.conns.get(&id).is_some_and(|c| c.from.is_some())
    }

    /// Dispatch one event from a connection task.
    pub fn handle_event(&mut self, event: RouterEvent, now: u64) {
        match event {
            RouterEvent::Accepted {
                id,
                peer_ip,
                outbound,
            } => self.register_conn(id, peer_ip, outbound),
            RouterEvent::Inbound { id, msg } => self.process_msg(id, msg, now),
            RouterEvent::Closed { id } => self.drop_conn(id),
        }
    }

    /// Track a freshly accepted connection (pre-logon).
    pub fn register_conn(
        &mut self,
        id: ConnId,
        peer_ip: IpAddr,
        outbound: mpsc::UnboundedSender<ConnCommand>,
    ) {
        debug!(conn = id, peer = %peer_ip, "connection registered");
        self.conns.insert(
            id,
            Conn {
                peer_ip,
                outbound,
                from: None,
                to: None,
            },
        );
    }

    /// Forget a defunct connection.
    pub fn drop_conn(&mut self, id: ConnId) {
        self.unbind(id);
        if self.conns.remove(&id).is_some() {
            debug!(conn = id, "connection dropped");
        }
    }

    /// Actively close a connection and forget it.
    pub fn close_conn(&mut self, id: ConnId) {
        if let Some(conn) = self.conns.get(&id) {
            let _ = conn.outbound.send(ConnCommand::Close);
        }
        self.drop_conn(id);
    }

    // ------------------------------------------------------------------
    // Message processing
    // ------------------------------------------------------------------

    /// Route one decoded message arriving on connection `id`.
    pub fn process_msg(&mut self, id: ConnId, mut msg: Message, now: u64) {
        let Some(conn) = self.conns.get(&id) else {
            return;
        };

        if conn.from.is_none() && !msg.is_logon() {
            self.send_error(id, Some(&msg), "LOGON REQUIRED");
            return;
        }
        if msg.is_logon() && !self.process_logon(id, &msg) {
            return;
        }

        let conn = &self.conns[&id];
        let Some(to) = msg.to.clone().or_else(|| conn.to.clone()) else {
            self.send_error(id, Some(&msg), "MESSAGE MISSING TO= HEADER");
            return;
        };

        // The daemon is authoritative about the sender.
        msg.from = conn.from.clone();

        let frame = match encode(&msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(conn = id, error = %e, "dropping unencodable message");
                return;
            }
        };

        let targets = self.conns_for(&to).to_vec();
        if targets.is_empty() {
            if !self.queue.store(frame, to, now) {
                self.send_error(id, Some(&msg), "TOO MANY QUEUED MESSAGES");
            }
        } else {
            for target in targets {
                self.push_frame(target, frame.as_bytes());
            }
        }
    }

    /// Bind (or re-bind) a connection to the callsign in a logon message.
    ///
    /// A repeated logon silently drops the old binding first; a logon
    /// without `FROM=` fails and leaves the connection unbound, but open.
    fn process_logon(&mut self, id: ConnId, msg: &Message) -> bool {
        self.unbind(id);

        let Some(from) = msg.from.clone() else {
            self.send_error(id, Some(msg), "LOGON REQUIRES FROM= HEADER");
            return false;
        };

        let is_atc = self.atc_callsigns.contains(&from);
        let conn = self.conns.get_mut(&id).expect("caller checked the conn");
        conn.from = Some(from.clone());
        conn.to = msg.to.clone();
        self.by_from.entry(from.clone()).or_default().push(id);

        info!(conn = id, callsign = %from, is_atc, "station logged on");
        true
    }

    fn unbind(&mut self, id: ConnId) {
        let Some(conn) = self.conns.get_mut(&id) else {
            return;
        };
        let Some(from) = conn.from.take() else {
            return;
        };
        conn.to = None;
        if let Some(ids) = self.by_from.get_mut(&from) {
            ids.retain(|&c| c != id);
            if ids.is_empty() {
                self.by_from.remove(&from);
            }
        }
    }

    fn push_frame(&self, id: ConnId, bytes: &[u8]) {
        if let Some(conn) = self.conns.get(&id) {
            let _ = conn.outbound.send(ConnCommand::Send(bytes.to_vec()));
        }
    }

    /// Synthesize a CPDLC error message back to the offending connection.
    fn send_error(&self, id: ConnId, offender: Option<&Message>, text: &str) {
        debug!(conn = id, error = text, "protocol error");
        let reply = Message::error_reply(offender, text);
        match encode(&reply) {
            Ok(frame) => self.push_frame(id, frame.as_bytes()),
            Err(e) => warn!(conn = id, error = %e, "can't encode error reply"),
        }
    }

    // ------------------------------------------------------------------
    // Periodic work
    // ------------------------------------------------------------------

    /// Walk the queue: deliver messages whose recipient is now reachable,
    /// drop messages older than the TTL.
    pub fn flush_queue(&mut self, now: u64) {
        let entries = std::mem::take(&mut self.queue.entries);
        for entry in entries {
            let targets = self
                .by_from
                .get(&entry.to)
                .cloned()
                .unwrap_or_default();
            if !targets.is_empty() {
                for target in targets {
                    self.push_frame(target, entry.frame.as_bytes());
                }
                self.queue.bytes -= entry.cost();
                debug!(to = %entry.to, "queued message delivered");
            } else if now.saturating_sub(entry.created) > QUEUED_MSG_TIMEOUT_SECS {
                self.queue.bytes -= entry.cost();
                debug!(to = %entry.to, "queued message expired");
            } else {
                self.queue.entries.push_back(entry);
            }
        }
        if self.queue.entries.is_empty() {
            debug_assert_eq!(self.queue.bytes, 0);
        }
    }

    /// Close every connection whose peer address no longer passes the
    /// blocklist.
    pub fn enforce_blocklist(&mut self, blocklist: &Blocklist) {
        let blocked: Vec<ConnId> = self
            .conns
            .iter()
            .filter(|(_, conn)| !blocklist.check(conn.peer_ip))
            .map(|(&id, _)| id)
            .collect();
        for id in blocked {
            info!(conn = id, "closing connection, address on blocklist");
            self.close_conn(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aerolink_models::{decode, types, Segment};
    use tokio::sync::mpsc::UnboundedReceiver;

    const NOW: u64 = 10_000;

    struct TestConn {
        id: ConnId,
        rx: UnboundedReceiver<ConnCommand>,
    }

    impl TestConn {
        fn drain(&mut self) -> Vec<ConnCommand> {
            let mut out = Vec::new();
            while let Ok(cmd) = self.rx.try_recv() {
                out.push(cmd);
            }
            out
        }

        fn drain_messages(&mut self) -> Vec<Message> {
            self.drain()
                .into_iter()
                .filter_map(|cmd| match cmd {
                    ConnCommand::Send(bytes) => {
                        let (msg, consumed) = decode(&bytes).expect("valid frame");
                        assert_eq!(consumed, bytes.len(), "one frame per command");
                        msg
                    }
                    ConnCommand::Close => None,
                })
                .collect()
        }
    }

    fn router() -> RouterState {
        RouterState::new(std::collections::HashSet::from([
            "ATC1".parse().unwrap(),
        ]))
    }

    fn attach(state: &mut RouterState, id: ConnId, ip: &str) -> TestConn {
        let (tx, rx) = mpsc::unbounded_channel();
        state.register_conn(id, ip.parse().unwrap(), tx);
        TestConn { id, rx }
    }

    fn logon(from: &str, to: Option<&str>) -> Message {
        Message::logon(
            "",
            from.parse().unwrap(),
            to.map(|t| t.parse().unwrap()),
        )
    }

    fn text_msg(to: Option<&str>, body: &str) -> Message {
        let mut msg = Message::with_segment(Segment::new(
            "DM67".parse().unwrap(),
            vec![body.to_string()],
        ));
        msg.min = Some(1);
        msg.to = to.map(|t| t.parse().unwrap());
        msg
    }

    fn do_logon(state: &mut RouterState, conn: &TestConn, from: &str, to: Option<&str>) {
        state.process_msg(conn.id, logon(from, to), NOW);
        assert!(state.is_logged_on(conn.id));
    }

    // -- Logon handshake ---------------------------------------------------

    #[test]
    fn non_logon_before_logon_is_answered_with_error() {
        let mut state = router();
        let mut conn = attach(&mut state, 1, "192.0.2.1");

        state.process_msg(1, text_msg(Some("ATC1"), "HELLO"), NOW);

        let replies = conn.drain_messages();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].segments[0].type_id, types::UM159_ERROR);
        assert_eq!(replies[0].segments[0].args, vec!["LOGON REQUIRED".to_string()]);
        assert_eq!(replies[0].mrn, Some(1), "offender MIN echoed as MRN");
        // The connection survives a policy violation.
        assert_eq!(state.conn_count(), 1);
        assert!(!state.is_logged_on(conn.id));
    }

    #[test]
    fn logon_without_from_fails_but_connection_stays() {
        let mut state = router();
        let mut conn = attach(&mut state, 1, "192.0.2.1");

        let mut msg = logon("B", None);
        msg.from = None;
        state.process_msg(1, msg, NOW);

        let replies = conn.drain_messages();
        assert_eq!(
            replies[0].segments[0].args,
            vec!["LOGON REQUIRES FROM= HEADER".to_string()]
        );
        assert_eq!(state.conn_count(), 1);
        assert!(state.conns_for(&"B".parse().unwrap()).is_empty());
    }

    #[test]
    fn logon_binds_connection_into_index() {
        let mut state = router();
        let conn = attach(&mut state, 1, "192.0.2.1");
        do_logon(&mut state, &conn, "AFR1234", Some("ATC1"));
        assert_eq!(state.conns_for(&"AFR1234".parse().unwrap()), &[1]);
    }

    #[test]
    fn relogon_rebinds_callsign() {
        let mut state = router();
        let conn = attach(&mut state, 1, "192.0.2.1");
        do_logon(&mut state, &conn, "AFR1234", Some("ATC1"));
        do_logon(&mut state, &conn, "AFR5678", Some("ATC1"));

        assert!(state.conns_for(&"AFR1234".parse().unwrap()).is_empty());
        assert_eq!(state.conns_for(&"AFR5678".parse().unwrap()), &[1]);
    }

    #[test]
    fn index_matches_logged_on_connections_exactly() {
        let mut state = router();
        let a = attach(&mut state, 1, "192.0.2.1");
        let _b = attach(&mut state, 2, "192.0.2.2");
        do_logon(&mut state, &a, "AFR1234", None);

        // Only the logged-on connection is reachable through the index.
        assert_eq!(state.conns_for(&"AFR1234".parse().unwrap()), &[1]);
        state.drop_conn(1);
        assert!(state.conns_for(&"AFR1234".parse().unwrap()).is_empty());
        assert_eq!(state.conn_count(), 1);
    }

    // -- Forwarding --------------------------------------------------------

    #[test]
    fn fan_out_delivers_to_every_connection_of_the_callsign() {
        let mut state = router();
        let mut a1 = attach(&mut state, 1, "192.0.2.1");
        let mut a2 = attach(&mut state, 2, "192.0.2.2");
        let mut b = attach(&mut state, 3, "192.0.2.3");
        do_logon(&mut state, &a1, "ATC1", None);
        do_logon(&mut state, &a2, "ATC1", None);
        a1.drain();
        a2.drain();
        do_logon(&mut state, &b, "B", Some("ATC1"));
        // The logon itself was forwarded to both ATC1 connections.
        assert_eq!(a1.drain_messages().len(), 1);
        assert_eq!(a2.drain_messages().len(), 1);

        state.process_msg(3, text_msg(None, "GOOD DAY"), NOW);

        let got1 = a1.drain_messages();
        let got2 = a2.drain_messages();
        assert_eq!(got1.len(), 1);
        assert_eq!(got2.len(), 1);
        assert_eq!(got1[0], got2[0]);
        assert_eq!(got1[0].from, Some("B".parse().unwrap()));
        assert!(b.drain_messages().is_empty(), "sender gets no copy");
    }

    #[test]
    fn from_header_is_overwritten_with_bound_callsign() {
        let mut state = router();
        let mut atc = attach(&mut state, 1, "192.0.2.1");
        let b = attach(&mut state, 2, "192.0.2.2");
        do_logon(&mut state, &atc, "ATC1", None);
        do_logon(&mut state, &b, "B", Some("ATC1"));
        atc.drain();

        // Spoofed FROM: the daemon replaces it with the bound callsign.
        let mut msg = text_msg(None, "SPOOF");
        msg.from = Some("INNOCENT".parse().unwrap());
        state.process_msg(2, msg, NOW);

        let got = atc.drain_messages();
        assert_eq!(got[0].from, Some("B".parse().unwrap()));
    }

    #[test]
    fn message_without_to_falls_back_to_logon_peer() {
        let mut state = router();
        let mut atc = attach(&mut state, 1, "192.0.2.1");
        let b = attach(&mut state, 2, "192.0.2.2");
        do_logon(&mut state, &atc, "ATC1", None);
        do_logon(&mut state, &b, "B", Some("ATC1"));
        atc.drain();

        state.process_msg(2, text_msg(None, "NO TO HEADER"), NOW);
        assert_eq!(atc.drain_messages().len(), 1);
    }

    #[test]
    fn message_without_any_destination_is_an_error() {
        let mut state = router();
        let mut conn = attach(&mut state, 1, "192.0.2.1");
        // Logon without TO= binds the callsign but cannot be routed onward,
        // which already earns the sender a missing-header error.
        do_logon(&mut state, &conn, "B", None);
        conn.drain();

        state.process_msg(1, text_msg(None, "LOST"), NOW);

        let replies = conn.drain_messages();
        assert_eq!(replies.len(), 1);
        assert_eq!(
            replies[0].segments[0].args,
            vec!["MESSAGE MISSING TO= HEADER".to_string()]
        );
        assert_eq!(replies[0].mrn, Some(1));
    }

    #[test]
    fn error_reply_direction_tracks_offender_direction() {
        let mut state = router();
        let mut conn = attach(&mut state, 1, "192.0.2.1");

        // Downlink offender: UM159 comes back.
        state.process_msg(1, text_msg(Some("ATC1"), "DOWNLINK"), NOW);
        assert_eq!(
            conn.drain_messages()[0].segments[0].type_id,
            types::UM159_ERROR
        );

        // Uplink offender: DM62 comes back.
        let mut uplink = Message::with_segment(Segment::new(
            "UM169".parse().unwrap(),
            vec!["FREE TEXT".to_string()],
        ));
        uplink.min = Some(9);
        state.process_msg(1, uplink, NOW);
        let reply = &conn.drain_messages()[0];
        assert_eq!(reply.segments[0].type_id, types::DM62_ERROR);
        assert_eq!(reply.mrn, Some(9));
    }

    // -- Queueing ----------------------------------------------------------

    #[test]
    fn message_for_absent_callsign_queues_then_drains_once() {
        let mut state = router();
        let b = attach(&mut state, 1, "192.0.2.1");
        do_logon(&mut state, &b, "B", Some("ATC1"));
        // With no ATC1 connection, both the forwarded logon and the text
        // message land in the queue.
        state.process_msg(1, text_msg(None, "ANYONE HOME"), NOW);
        assert_eq!(state.queued_count(), 2);
        assert!(state.queued_bytes() > 0);

        // ATC1 appears; the next tick hands everything over exactly once.
        let mut a1 = attach(&mut state, 2, "192.0.2.2");
        do_logon(&mut state, &a1, "ATC1", None);
        a1.drain();
        state.flush_queue(NOW + 5);

        let got = a1.drain_messages();
        assert_eq!(got.len(), 2);
        assert!(got[0].is_logon());
        assert_eq!(got[1].render(), "ANYONE HOME");
        assert_eq!(state.queued_count(), 0);
        assert_eq!(state.queued_bytes(), 0);

        // Nothing further on later ticks.
        state.flush_queue(NOW + 6);
        assert!(a1.drain_messages().is_empty());
    }

    #[test]
    fn queued_message_expires_after_ttl() {
        let mut state = router();
        let b = attach(&mut state, 1, "192.0.2.1");
        do_logon(&mut state, &b, "B", Some("ATC1"));
        state.process_msg(1, text_msg(None, "TOO LATE"), NOW);

        state.flush_queue(NOW + QUEUED_MSG_TIMEOUT_SECS);
        assert_eq!(state.queued_count(), 2, "not yet expired at the boundary");

        state.flush_queue(NOW + QUEUED_MSG_TIMEOUT_SECS + 1);
        assert_eq!(state.queued_count(), 0);
        assert_eq!(state.queued_bytes(), 0);
    }

    #[test]
    fn queue_budget_exhaustion_reports_error_to_sender() {
        let mut state = RouterState::with_queue_budget(
            std::collections::HashSet::new(),
            200, // room for the forwarded logon plus one tiny entry
        );
        let mut b = attach(&mut state, 1, "192.0.2.1");
        do_logon(&mut state, &b, "B", Some("ATC1"));

        state.process_msg(1, text_msg(None, "X"), NOW);
        let queued = state.queued_count();
        state.process_msg(
            1,
            text_msg(None, "THIS ONE DOES NOT FIT ANY MORE AT ALL"),
            NOW,
        );

        assert_eq!(state.queued_count(), queued, "second message rejected");
        let replies = b.drain_messages();
        assert_eq!(
            replies.last().unwrap().segments[0].args,
            vec!["TOO MANY QUEUED MESSAGES".to_string()]
        );
    }

    // -- Blocklist enforcement ---------------------------------------------

    #[test]
    fn blocklisted_connections_are_closed_on_sweep() {
        let mut state = router();
        let mut bad = attach(&mut state, 1, "203.0.113.7");
        let good = attach(&mut state, 2, "192.0.2.1");
        do_logon(&mut state, &bad, "BAD1", None);
        do_logon(&mut state, &good, "GOOD1", None);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(file, "203.0.113.0/24").unwrap();
        file.flush().unwrap();
        let blocklist = Blocklist::new(Some(file.path().to_path_buf()));

        state.enforce_blocklist(&blocklist);

        assert_eq!(state.conn_count(), 1);
        assert!(state.conns_for(&"BAD1".parse().unwrap()).is_empty());
        assert_eq!(state.conns_for(&"GOOD1".parse().unwrap()), &[2]);
        assert!(bad.drain().contains(&ConnCommand::Close));
    }
}
