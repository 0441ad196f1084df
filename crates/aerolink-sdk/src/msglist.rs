//! The message-list engine.
//!
//! Groups individual CPDLC messages into conversational *threads*, assigns
//! sequence numbers (MIN) and reply references (MRN) on send, correlates
//! incoming messages with existing threads by their MRN chain, and derives
//! a per-thread [`ThreadStatus`] from the message history — including the
//! reply-timeout rule that auto-sends a `DM62 ERROR TIMEDOUT` when a
//! reply-required uplink goes unanswered.
//!
//! One internal mutex guards the thread list, all thread state and the MIN
//! counter. No operation sleeps while holding it, and the update callback
//! is invoked with the lock released so callbacks may call back into the
//! engine without deadlocking.

use std::fmt;
use std::sync::{Arc, Mutex};

use aerolink_models::{types, Direction, Message, ResponseClass, Segment};

use crate::error::SdkError;
use crate::transport::{Clock, ClientTransport, LogonStatus, SendStatus, SendToken, SystemClock};

// ---------------------------------------------------------------------------
// ThreadId / ThreadStatus
// ---------------------------------------------------------------------------

/// Identifier of one message thread, unique within its engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "thr-{}", self.0)
    }
}

/// Derived status of a message thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    /// Awaiting further traffic.
    Open,
    /// The last sent message is still in flight.
    Pending,
    /// The last message is a STANDBY: the peer asked for time.
    Standby,
    /// The last message is a WILCO or AFFIRM.
    Accepted,
    /// The last message is an UNABLE, NEGATIVE or ERROR.
    Rejected,
    /// A reply-required uplink exceeded its timeout; the engine auto-sent
    /// an ERROR downlink.
    TimedOut,
    /// The last message is a DISREGARD.
    Disregard,
    /// The last message is an ERROR.
    Error,
    /// Explicitly closed, or the exchange ended with a no-reply terminal.
    Closed,
    /// The transport reported a send failure for the last outgoing message.
    Failed,
    /// The underlying link is no longer logged on.
    ConnEnded,
}

impl ThreadStatus {
    /// Final statuses are never overwritten by the normal
    /// status-recomputation path.
    pub fn is_final(self) -> bool {
        matches!(
            self,
            ThreadStatus::Closed
                | ThreadStatus::Accepted
                | ThreadStatus::Rejected
                | ThreadStatus::TimedOut
                | ThreadStatus::Disregard
                | ThreadStatus::Failed
                | ThreadStatus::Error
                | ThreadStatus::ConnEnded
        )
    }
}

// ---------------------------------------------------------------------------
// Buckets and threads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Bucket {
    msg: Message,
    token: Option<SendToken>,
    sent: bool,
    /// Unix seconds at append time; drives the reply-timeout rule.
    time: u64,
    hours: u8,
    mins: u8,
}

#[derive(Debug)]
struct Thread {
    id: ThreadId,
    status: ThreadStatus,
    dirty: bool,
    buckets: Vec<Bucket>,
}

/// One message of a thread as returned by [`MsgList::get_thr_msg`].
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    /// The message itself.
    pub msg: Message,
    /// Transport token when we sent it, `None` for received messages.
    pub token: Option<SendToken>,
    /// Display clock hours at arrival/send time.
    pub hours: u8,
    /// Display clock minutes at arrival/send time.
    pub mins: u8,
    /// `true` when this station sent the message.
    pub is_sent: bool,
}

struct Inner {
    /// Threads in creation order.
    threads: Vec<Thread>,
    next_min: u32,
    next_thr_id: u64,
}

impl Inner {
    fn index_of(&self, id: ThreadId) -> Result<usize, SdkError> {
        self.threads
            .iter()
            .position(|t| t.id == id)
            .ok_or(SdkError::UnknownThread { id })
    }

    fn new_thread(&mut self) -> usize {
        let id = ThreadId(self.next_thr_id);
        self.next_thr_id += 1;
        self.threads.push(Thread {
            id,
            status: ThreadStatus::Open,
            dirty: false,
            buckets: Vec::new(),
        });
        self.threads.len() - 1
    }
}

// ---------------------------------------------------------------------------
// Catalog-derived message predicates
// ---------------------------------------------------------------------------

fn first_type(msg: &Message) -> Option<aerolink_models::MsgTypeId> {
    msg.segments.first().map(|s| s.type_id)
}

fn first_response(msg: &Message) -> ResponseClass {
    msg.segments
        .first()
        .and_then(|s| s.def())
        .map(|d| d.response)
        .unwrap_or(ResponseClass::None)
}

/// Downlink request: DM6–DM27, DM49–DM54, DM70 or DM71.
fn is_dl_request(msg: &Message) -> bool {
    match first_type(msg) {
        Some(id) if id.dir == Direction::Downlink => {
            (6..=27).contains(&id.code) || (49..=54).contains(&id.code) || id.code == 70 || id.code == 71
        }
        _ => false,
    }
}

/// Reply-required uplink: response class W/U, A/N or NE.
fn is_ul_reply_required(msg: &Message) -> bool {
    matches!(first_type(msg), Some(id) if id.dir == Direction::Uplink)
        && matches!(
            first_response(msg),
            ResponseClass::WU | ResponseClass::AN | ResponseClass::NE
        )
}

fn is_standby(msg: &Message) -> bool {
    matches!(
        first_type(msg),
        Some(types::DM2_STANDBY) | Some(types::UM1_STANDBY)
    )
}

fn is_accept(msg: &Message) -> bool {
    matches!(
        first_type(msg),
        Some(types::DM0_WILCO) | Some(types::DM4_AFFIRM) | Some(types::UM4_AFFIRM)
    )
}

fn is_reject(msg: &Message) -> bool {
    matches!(
        first_type(msg),
        Some(types::DM1_UNABLE)
            | Some(types::DM5_NEGATIVE)
            | Some(types::DM62_ERROR)
            | Some(types::UM0_UNABLE)
            | Some(types::UM5_NEGATIVE)
            | Some(types::UM159_ERROR)
    )
}

fn is_roger(msg: &Message) -> bool {
    matches!(
        first_type(msg),
        Some(types::DM3_ROGER) | Some(types::UM3_ROGER)
    )
}

fn is_link_mgmt(msg: &Message) -> bool {
    matches!(
        first_type(msg),
        Some(types::UM160_NEXT_DATA_AUTHORITY) | Some(types::UM161_END_SERVICE)
    )
}

fn is_disregard(msg: &Message) -> bool {
    matches!(first_type(msg), Some(types::UM168_DISREGARD))
}

fn is_error_msg(msg: &Message) -> bool {
    matches!(
        first_type(msg),
        Some(types::DM62_ERROR) | Some(types::UM159_ERROR)
    )
}

/// Smallest non-zero reply timeout over every segment of every message in
/// the thread; 0 when none applies.
fn thread_timeout(thr: &Thread) -> u32 {
    thr.buckets
        .iter()
        .map(|b| b.msg.min_timeout_secs())
        .filter(|&t| t != 0)
        .min()
        .unwrap_or(0)
}

// ---------------------------------------------------------------------------
// MsgList
// ---------------------------------------------------------------------------

/// Callback invoked with the ids of threads affected by incoming traffic.
pub type UpdateCallback = Arc<dyn Fn(&[ThreadId]) + Send + Sync>;

/// The station-local message list.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use aerolink_models::{Message, Segment};
/// use aerolink_sdk::msglist::MsgList;
/// # fn transport() -> Arc<dyn aerolink_sdk::transport::ClientTransport> { unimplemented!() }
///
/// let list = MsgList::new(transport());
/// let req = Message::with_segment(Segment::new(
///     "DM25".parse().unwrap(),
///     vec![],
/// ));
/// let thr = list.send(req, None).unwrap();
/// let (status, _dirty) = list.get_thr_status(thr).unwrap();
/// println!("thread {thr} is {status:?}");
/// ```
pub struct MsgList {
    transport: Arc<dyn ClientTransport>,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    update_cb: Mutex<Option<UpdateCallback>>,
}

enum Verdict {
    Keep,
    Set(ThreadStatus),
    Timeout,
    ConnEnded,
}

impl MsgList {
    /// Create an engine over the given transport, using the system clock.
    pub fn new(transport: Arc<dyn ClientTransport>) -> Self {
        Self::with_clock(transport, Arc::new(SystemClock))
    }

    /// Create an engine with an explicit time source.
    pub fn with_clock(transport: Arc<dyn ClientTransport>, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            clock,
            inner: Mutex::new(Inner {
                threads: Vec::new(),
                next_min: 0,
                next_thr_id: 0,
            }),
            update_cb: Mutex::new(None),
        }
    }

    /// Register the callback invoked (outside the engine lock) whenever
    /// incoming traffic affects a thread.
    pub fn set_update_cb(&self, cb: impl Fn(&[ThreadId]) + Send + Sync + 'static) {
        *self.update_cb.lock().unwrap() = Some(Arc::new(cb));
    }

    // ------------------------------------------------------------------
    // Send path
    // ------------------------------------------------------------------

    /// Send a message, either continuing thread `thr_id` or starting a new
    /// thread when `None`. Assigns the MIN and, for replies, the MRN.
    /// Returns the thread the message landed in.
    pub fn send(&self, msg: Message, thr_id: Option<ThreadId>) -> Result<ThreadId, SdkError> {
        let mut inner = self.inner.lock().unwrap();
        let idx = match thr_id {
            Some(id) => {
                let idx = inner.index_of(id)?;
                if inner.threads[idx].status.is_final() {
                    return Err(SdkError::ThreadFinal { id });
                }
                idx
            }
            None => inner.new_thread(),
        };
        let id = inner.threads[idx].id;
        self.send_impl(&mut inner, msg, idx);
        self.status_upd(&mut inner, idx);
        Ok(id)
    }

    /// Number, transmit and record one outgoing message.
    fn send_impl(&self, inner: &mut Inner, mut msg: Message, idx: usize) {
        // The MRN references the latest message of the opposite direction
        // in this thread, if any.
        if let Some(dir) = msg.direction() {
            if let Some(bucket) = inner.threads[idx]
                .buckets
                .iter()
                .rev()
                .find(|b| b.msg.direction() == Some(dir.opposite()))
            {
                msg.mrn = bucket.msg.min;
            }
        }
        msg.min = Some(inner.next_min);
        inner.next_min += 1;

        let token = self.transport.send(&msg);
        let (hours, mins) = self.clock.display_time();
        inner.threads[idx].buckets.push(Bucket {
            msg,
            token: Some(token),
            sent: true,
            time: self.clock.unix_time(),
            hours,
            mins,
        });
    }

    // ------------------------------------------------------------------
    // Receive path
    // ------------------------------------------------------------------

    /// Feed one incoming message into the engine.
    ///
    /// Called from the transport's receive task. Correlates the message
    /// into an existing thread by its MRN (or starts a new thread),
    /// recomputes the thread status, and invokes the update callback with
    /// the affected thread id after releasing the engine lock.
    pub fn receive(&self, msg: Message) {
        let affected = {
            let mut inner = self.inner.lock().unwrap();
            let idx = match self.correlate(&inner, &msg) {
                Some(idx) => idx,
                None => inner.new_thread(),
            };
            let (hours, mins) = self.clock.display_time();
            inner.threads[idx].buckets.push(Bucket {
                msg,
                token: None,
                sent: false,
                time: self.clock.unix_time(),
                hours,
                mins,
            });
            inner.threads[idx].dirty = true;
            self.status_upd(&mut inner, idx);
            [inner.threads[idx].id]
        };
        let cb = self.update_cb.lock().unwrap().clone();
        if let Some(cb) = cb {
            cb(&affected);
        }
    }

    /// Find the thread owning the bucket this message replies to.
    ///
    /// Walks threads newest→oldest and buckets newest→oldest. Manually
    /// closed threads are skipped, which lets the front-end force all
    /// further traffic into fresh threads by closing the current one.
    /// A DISREGARD matches the *received* message it cancels; everything
    /// else matches a message we *sent*.
    fn correlate(&self, inner: &Inner, msg: &Message) -> Option<usize> {
        let mrn = msg.mrn?;
        let disregard = is_disregard(msg);
        for (idx, thr) in inner.threads.iter().enumerate().rev() {
            if thr.status == ThreadStatus::Closed {
                continue;
            }
            for bucket in thr.buckets.iter().rev() {
                let wanted_sent = !disregard;
                if bucket.msg.min == Some(mrn) && bucket.sent == wanted_sent {
                    return Some(idx);
                }
            }
        }
        None
    }

    // ------------------------------------------------------------------
    // Status recomputation
    // ------------------------------------------------------------------

    /// Recompute the status of every thread.
    ///
    /// Called periodically so reply timeouts fire even without incoming
    /// traffic.
    pub fn update(&self) {
        let mut inner = self.inner.lock().unwrap();
        for idx in 0..inner.threads.len() {
            self.status_upd(&mut inner, idx);
        }
    }

    fn status_upd(&self, inner: &mut Inner, idx: usize) {
        let verdict = {
            let thr = &inner.threads[idx];
            if thr.status.is_final() {
                return;
            }
            let Some(last) = thr.buckets.last() else {
                return;
            };
            let timeout = thread_timeout(thr);
            let now = self.clock.unix_time();

            if thr.buckets.len() == 1 && last.sent && !first_response(&last.msg).expects_reply() {
                Verdict::Set(ThreadStatus::Closed)
            } else if last.sent && is_dl_request(&last.msg) {
                let st = match last.token.map(|t| self.transport.send_status(t)) {
                    Some(SendStatus::Sending) => ThreadStatus::Pending,
                    Some(SendStatus::SendFailed) => ThreadStatus::Failed,
                    _ => ThreadStatus::Open,
                };
                Verdict::Set(st)
            } else if is_standby(&last.msg) {
                Verdict::Set(ThreadStatus::Standby)
            } else if is_accept(&last.msg) {
                Verdict::Set(ThreadStatus::Accepted)
            } else if is_reject(&last.msg) {
                Verdict::Set(ThreadStatus::Rejected)
            } else if is_roger(&last.msg) || is_link_mgmt(&last.msg) {
                Verdict::Set(ThreadStatus::Closed)
            } else if is_ul_reply_required(&last.msg)
                && thr.status != ThreadStatus::Standby
                && timeout != 0
                && now.saturating_sub(last.time) > u64::from(timeout)
            {
                Verdict::Timeout
            } else if is_disregard(&last.msg) {
                Verdict::Set(ThreadStatus::Disregard)
            } else if is_error_msg(&last.msg) {
                Verdict::Set(ThreadStatus::Error)
            } else if self.transport.logon_status() != LogonStatus::Complete {
                Verdict::ConnEnded
            } else {
                Verdict::Keep
            }
        };

        match verdict {
            Verdict::Keep => {}
            Verdict::Set(status) => inner.threads[idx].status = status,
            Verdict::ConnEnded => {
                let thr = &mut inner.threads[idx];
                thr.dirty = false;
                thr.status = ThreadStatus::ConnEnded;
            }
            Verdict::Timeout => {
                // The unanswered uplink gets an automatic ERROR downlink;
                // the send path assigns its MIN and back-references the
                // uplink through the MRN walk.
                let err = Message::with_segment(Segment::new(
                    types::DM62_ERROR,
                    vec!["TIMEDOUT".to_string()],
                ));
                self.send_impl(inner, err, idx);
                inner.threads[idx].status = ThreadStatus::TimedOut;
            }
        }
    }

    // ------------------------------------------------------------------
    // Read model
    // ------------------------------------------------------------------

    /// Enumerate thread ids in creation order.
    ///
    /// With `ignore_closed`, threads that are both in a final status and
    /// already seen (not dirty) are omitted.
    pub fn get_thr_ids(&self, ignore_closed: bool) -> Vec<ThreadId> {
        let inner = self.inner.lock().unwrap();
        inner
            .threads
            .iter()
            .filter(|t| !(ignore_closed && !t.dirty && t.status.is_final()))
            .map(|t| t.id)
            .collect()
    }

    /// Status and dirty flag of one thread.
    pub fn get_thr_status(&self, id: ThreadId) -> Result<(ThreadStatus, bool), SdkError> {
        let inner = self.inner.lock().unwrap();
        let idx = inner.index_of(id)?;
        let thr = &inner.threads[idx];
        Ok((thr.status, thr.dirty))
    }

    /// Clear a thread's dirty flag.
    pub fn thr_mark_seen(&self, id: ThreadId) -> Result<(), SdkError> {
        let mut inner = self.inner.lock().unwrap();
        let idx = inner.index_of(id)?;
        inner.threads[idx].dirty = false;
        Ok(())
    }

    /// Number of messages in a thread.
    pub fn get_thr_msg_count(&self, id: ThreadId) -> Result<usize, SdkError> {
        let inner = self.inner.lock().unwrap();
        let idx = inner.index_of(id)?;
        Ok(inner.threads[idx].buckets.len())
    }

    /// The `n`-th message of a thread, in wire order.
    pub fn get_thr_msg(&self, id: ThreadId, n: usize) -> Result<ThreadMessage, SdkError> {
        let inner = self.inner.lock().unwrap();
        let idx = inner.index_of(id)?;
        let buckets = &inner.threads[idx].buckets;
        let bucket = buckets.get(n).ok_or(SdkError::MessageIndex {
            index: n,
            count: buckets.len(),
        })?;
        Ok(ThreadMessage {
            msg: bucket.msg.clone(),
            token: bucket.token,
            hours: bucket.hours,
            mins: bucket.mins,
            is_sent: bucket.sent,
        })
    }

    /// `true` when the thread has reached a final status.
    pub fn thr_is_done(&self, id: ThreadId) -> Result<bool, SdkError> {
        let inner = self.inner.lock().unwrap();
        let idx = inner.index_of(id)?;
        Ok(inner.threads[idx].status.is_final())
    }

    /// Force a thread into the CLOSED status unless it is already final.
    pub fn thr_close(&self, id: ThreadId) -> Result<(), SdkError> {
        let mut inner = self.inner.lock().unwrap();
        let idx = inner.index_of(id)?;
        if !inner.threads[idx].status.is_final() {
            inner.threads[idx].status = ThreadStatus::Closed;
        }
        Ok(())
    }

    /// Detach and drop a thread.
    pub fn remove_thr(&self, id: ThreadId) -> Result<(), SdkError> {
        let mut inner = self.inner.lock().unwrap();
        let idx = inner.index_of(id)?;
        inner.threads.remove(idx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    // -- Test doubles ------------------------------------------------------

    #[derive(Default)]
    struct MockTransport {
        next_token: AtomicU64,
        statuses: Mutex<HashMap<SendToken, SendStatus>>,
        sent: Mutex<Vec<Message>>,
        logged_on: Mutex<bool>,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            let t = Arc::new(Self::default());
            *t.logged_on.lock().unwrap() = true;
            t
        }

        fn sent_messages(&self) -> Vec<Message> {
            self.sent.lock().unwrap().clone()
        }

        fn set_status(&self, token: SendToken, status: SendStatus) {
            self.statuses.lock().unwrap().insert(token, status);
        }

        fn set_logged_on(&self, on: bool) {
            *self.logged_on.lock().unwrap() = on;
        }
    }

    impl ClientTransport for MockTransport {
        fn send(&self, msg: &Message) -> SendToken {
            let token = SendToken::new(self.next_token.fetch_add(1, Ordering::SeqCst));
            self.statuses.lock().unwrap().insert(token, SendStatus::Sent);
            self.sent.lock().unwrap().push(msg.clone());
            token
        }

        fn send_status(&self, token: SendToken) -> SendStatus {
            self.statuses
                .lock()
                .unwrap()
                .get(&token)
                .copied()
                .unwrap_or(SendStatus::Sent)
        }

        fn logon_status(&self) -> LogonStatus {
            if *self.logged_on.lock().unwrap() {
                LogonStatus::Complete
            } else {
                LogonStatus::Disconnected
            }
        }
    }

    struct FakeClock {
        secs: AtomicU64,
    }

    impl FakeClock {
        fn new(start: u64) -> Arc<Self> {
            Arc::new(Self {
                secs: AtomicU64::new(start),
            })
        }

        fn advance(&self, by: u64) {
            self.secs.fetch_add(by, Ordering::SeqCst);
        }
    }

    impl Clock for FakeClock {
        fn unix_time(&self) -> u64 {
            self.secs.load(Ordering::SeqCst)
        }

        fn display_time(&self) -> (u8, u8) {
            let secs = self.unix_time();
            (((secs / 3600) % 24) as u8, ((secs / 60) % 60) as u8)
        }
    }

    fn engine() -> (Arc<MockTransport>, Arc<FakeClock>, MsgList) {
        let transport = MockTransport::new();
        let clock = FakeClock::new(1_000_000);
        let list = MsgList::with_clock(transport.clone(), clock.clone());
        (transport, clock, list)
    }

    fn seg(id: &str, args: &[&str]) -> Segment {
        Segment::new(id.parse().unwrap(), args.iter().map(|s| s.to_string()).collect())
    }

    fn msg(id: &str, args: &[&str]) -> Message {
        Message::with_segment(seg(id, args))
    }

    fn uplink(id: &str, args: &[&str], min: u32, mrn: Option<u32>) -> Message {
        Message {
            min: Some(min),
            mrn,
            ..msg(id, args)
        }
    }

    // -- Send path ---------------------------------------------------------

    #[test]
    fn send_assigns_strictly_increasing_mins() {
        let (transport, _clock, list) = engine();
        for _ in 0..4 {
            list.send(msg("DM25", &[]), None).unwrap();
        }
        let mins: Vec<_> = transport.sent_messages().iter().map(|m| m.min).collect();
        assert_eq!(mins, vec![Some(0), Some(1), Some(2), Some(3)]);
    }

    #[test]
    fn send_request_without_reply_stays_open() {
        let (_transport, _clock, list) = engine();
        let thr = list.send(msg("DM9", &["FL390"]), None).unwrap();
        let (status, dirty) = list.get_thr_status(thr).unwrap();
        assert_eq!(status, ThreadStatus::Open);
        assert!(!dirty);
    }

    #[test]
    fn send_no_response_message_closes_single_bucket_thread() {
        let (_transport, _clock, list) = engine();
        // DM65 expects no reply at all
        let thr = list.send(msg("DM65", &[]), None).unwrap();
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Closed);
    }

    #[test]
    fn send_while_transport_still_sending_is_pending() {
        let (transport, _clock, list) = engine();
        let thr = list.send(msg("DM9", &["FL390"]), None).unwrap();
        transport.set_status(SendToken::new(0), SendStatus::Sending);
        list.update();
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Pending);
    }

    #[test]
    fn send_failure_marks_thread_failed_and_final() {
        let (transport, _clock, list) = engine();
        let thr = list.send(msg("DM9", &["FL390"]), None).unwrap();
        transport.set_status(SendToken::new(0), SendStatus::SendFailed);
        list.update();
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Failed);
        // Final: a later status change on the transport no longer matters.
        transport.set_status(SendToken::new(0), SendStatus::Sent);
        list.update();
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Failed);
    }

    #[test]
    fn send_into_final_thread_is_rejected() {
        let (_transport, _clock, list) = engine();
        let thr = list.send(msg("DM65", &[]), None).unwrap();
        assert!(list.thr_is_done(thr).unwrap());
        let err = list.send(msg("DM9", &["FL390"]), Some(thr)).unwrap_err();
        assert!(matches!(err, SdkError::ThreadFinal { .. }));
    }

    #[test]
    fn send_into_unknown_thread_is_rejected() {
        let (_transport, _clock, list) = engine();
        let err = list.send(msg("DM25", &[]), Some(ThreadId(99))).unwrap_err();
        assert!(matches!(err, SdkError::UnknownThread { .. }));
    }

    // -- Reply correlation (MRN chain) -------------------------------------

    #[test]
    fn reply_correlates_into_request_thread() {
        let (transport, _clock, list) = engine();
        let thr = list.send(msg("DM9", &["FL390"]), None).unwrap();
        let m1_min = transport.sent_messages()[0].min.unwrap();

        // Uplink reply referencing our request joins the same thread.
        list.receive(uplink("UM1", &[], 5, Some(m1_min)));
        assert_eq!(list.get_thr_ids(false), vec![thr]);
        assert_eq!(list.get_thr_msg_count(thr).unwrap(), 2);
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Standby);
    }

    #[test]
    fn followup_send_references_latest_opposite_message() {
        let (transport, _clock, list) = engine();
        let thr = list.send(msg("DM9", &["FL390"]), None).unwrap();
        let m1_min = transport.sent_messages()[0].min.unwrap();

        list.receive(uplink("UM20", &["FL390"], 5, Some(m1_min)));
        list.send(msg("DM0", &[]), Some(thr)).unwrap();

        let wilco = &transport.sent_messages()[1];
        assert_eq!(wilco.mrn, Some(5), "reply must reference the uplink MIN");
        assert_eq!(wilco.min, Some(m1_min + 1), "MINs stay monotonic");
    }

    #[test]
    fn uncorrelated_message_starts_new_thread() {
        let (_transport, _clock, list) = engine();
        let first = list.send(msg("DM9", &["FL390"]), None).unwrap();
        list.receive(uplink("UM20", &["FL350"], 9, None));
        let ids = list.get_thr_ids(false);
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[1], first);
    }

    #[test]
    fn mrn_matching_received_bucket_does_not_correlate() {
        let (_transport, _clock, list) = engine();
        // Received uplink with MIN 5 lands in a fresh thread.
        list.receive(uplink("UM133", &[], 5, None));
        // A later uplink referencing MIN 5 must NOT join that thread:
        // only messages WE sent can be reply targets.
        list.receive(uplink("UM133", &[], 6, Some(5)));
        assert_eq!(list.get_thr_ids(false).len(), 2);
    }

    #[test]
    fn disregard_correlates_against_received_bucket() {
        let (_transport, _clock, list) = engine();
        list.receive(uplink("UM20", &["FL350"], 5, None));
        let ids = list.get_thr_ids(false);
        assert_eq!(ids.len(), 1);

        // UM168 DISREGARD cancels the *received* UM20, so it matches the
        // not-sent bucket and joins the same thread.
        list.receive(uplink("UM168", &[], 6, Some(5)));
        assert_eq!(list.get_thr_ids(false).len(), 1);
        assert_eq!(
            list.get_thr_status(ids[0]).unwrap().0,
            ThreadStatus::Disregard
        );
    }

    #[test]
    fn closed_thread_forces_new_thread() {
        let (transport, _clock, list) = engine();
        let thr = list.send(msg("DM9", &["FL390"]), None).unwrap();
        let m1_min = transport.sent_messages()[0].min.unwrap();

        list.thr_close(thr).unwrap();
        list.receive(uplink("UM20", &["FL390"], 5, Some(m1_min)));

        let ids = list.get_thr_ids(false);
        assert_eq!(ids.len(), 2, "reply to a closed thread opens a new one");
        assert_eq!(list.get_thr_msg_count(thr).unwrap(), 1);
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Closed);
    }

    // -- Status state machine ----------------------------------------------

    #[test]
    fn wilco_reply_accepts_thread() {
        let (_transport, _clock, list) = engine();
        list.receive(uplink("UM20", &["FL350"], 5, None));
        let thr = list.get_thr_ids(false)[0];
        list.send(msg("DM0", &[]), Some(thr)).unwrap();
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Accepted);
    }

    #[test]
    fn unable_reply_rejects_thread() {
        let (_transport, _clock, list) = engine();
        list.receive(uplink("UM20", &["FL350"], 5, None));
        let thr = list.get_thr_ids(false)[0];
        list.send(msg("DM1", &[]), Some(thr)).unwrap();
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Rejected);
    }

    #[test]
    fn roger_reply_closes_thread() {
        let (_transport, _clock, list) = engine();
        // Free-text uplink, then our ROGER ends the exchange.
        list.receive(uplink("UM169", &["CONFIRM ATIS K"], 5, None));
        let thr = list.get_thr_ids(false)[0];
        list.send(msg("DM3", &[]), Some(thr)).unwrap();
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Closed);
    }

    #[test]
    fn end_service_closes_thread() {
        let (_transport, _clock, list) = engine();
        list.receive(uplink("UM161", &[], 5, None));
        let thr = list.get_thr_ids(false)[0];
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Closed);
    }

    #[test]
    fn error_uplink_rejects_thread() {
        let (_transport, _clock, list) = engine();
        list.receive(uplink("UM159", &["UNSUPPORTED"], 5, None));
        let thr = list.get_thr_ids(false)[0];
        // The reject rule is evaluated before the bare-error rule and the
        // ERROR types belong to both sets, so the thread lands in REJECTED.
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Rejected);
    }

    #[test]
    fn final_status_survives_correlated_reply() {
        let (transport, _clock, list) = engine();
        list.receive(uplink("UM20", &["FL350"], 5, None));
        let thr = list.get_thr_ids(false)[0];
        list.send(msg("DM0", &[]), Some(thr)).unwrap();
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Accepted);

        // A late correlated uplink still lands in the thread, but the
        // final status must not change.
        let wilco_min = transport.sent_messages()[0].min.unwrap();
        list.receive(uplink("UM3", &[], 6, Some(wilco_min)));
        assert_eq!(list.get_thr_msg_count(thr).unwrap(), 3);
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Accepted);
    }

    #[test]
    fn conn_ended_when_link_drops() {
        let (transport, _clock, list) = engine();
        list.receive(uplink("UM133", &[], 5, None));
        let thr = list.get_thr_ids(false)[0];
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Open);

        transport.set_logged_on(false);
        list.update();
        let (status, dirty) = list.get_thr_status(thr).unwrap();
        assert_eq!(status, ThreadStatus::ConnEnded);
        assert!(!dirty, "losing the link also clears the dirty flag");
    }

    // -- Reply timeout ------------------------------------------------------

    #[test]
    fn unanswered_uplink_times_out_with_auto_error() {
        let (transport, clock, list) = engine();
        // UM20 is W/U with a 300 s reply timeout.
        list.receive(uplink("UM20", &["FL350"], 5, None));
        let thr = list.get_thr_ids(false)[0];

        clock.advance(301);
        list.update();

        let (status, _) = list.get_thr_status(thr).unwrap();
        assert_eq!(status, ThreadStatus::TimedOut);
        assert_eq!(list.get_thr_msg_count(thr).unwrap(), 2);

        let auto = transport.sent_messages().pop().unwrap();
        assert_eq!(auto.segments[0].type_id, types::DM62_ERROR);
        assert_eq!(auto.segments[0].args, vec!["TIMEDOUT".to_string()]);
        assert_eq!(auto.mrn, Some(5), "auto error references the uplink MIN");

        // A second update must not append another error.
        clock.advance(600);
        list.update();
        assert_eq!(list.get_thr_msg_count(thr).unwrap(), 2);
        assert_eq!(transport.sent_messages().len(), 1);
    }

    #[test]
    fn uplink_does_not_time_out_before_deadline() {
        let (transport, clock, list) = engine();
        list.receive(uplink("UM20", &["FL350"], 5, None));
        clock.advance(299);
        list.update();
        assert!(transport.sent_messages().is_empty());
    }

    #[test]
    fn standby_suppresses_timeout() {
        let (transport, clock, list) = engine();
        list.receive(uplink("UM20", &["FL350"], 5, None));
        let thr = list.get_thr_ids(false)[0];
        list.send(msg("DM2", &[]), Some(thr)).unwrap();
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Standby);

        clock.advance(3600);
        list.update();
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Standby);
        // Only the DM2 we sent ourselves; no auto error.
        assert_eq!(transport.sent_messages().len(), 1);
    }

    // -- Read model ---------------------------------------------------------

    #[test]
    fn thread_ids_enumerate_in_creation_order() {
        let (_transport, _clock, list) = engine();
        let a = list.send(msg("DM9", &["FL390"]), None).unwrap();
        let b = list.send(msg("DM10", &["FL310"]), None).unwrap();
        let c = list.send(msg("DM25", &[]), None).unwrap();
        assert_eq!(list.get_thr_ids(false), vec![a, b, c]);
    }

    #[test]
    fn ignore_closed_hides_seen_final_threads() {
        let (_transport, _clock, list) = engine();
        let open = list.send(msg("DM9", &["FL390"]), None).unwrap();
        let closed = list.send(msg("DM65", &[]), None).unwrap();
        assert_eq!(list.get_thr_ids(true), vec![open]);
        // Dirty final threads stay visible until marked seen.
        list.receive(uplink("UM168", &[], 9, None));
        let disregarded = list.get_thr_ids(false)[2];
        assert!(list.get_thr_ids(true).contains(&disregarded));
        list.thr_mark_seen(disregarded).unwrap();
        assert_eq!(list.get_thr_ids(true), vec![open]);
        let _ = closed;
    }

    #[test]
    fn dirty_set_on_receive_and_cleared_by_mark_seen() {
        let (_transport, _clock, list) = engine();
        list.receive(uplink("UM133", &[], 5, None));
        let thr = list.get_thr_ids(false)[0];
        assert!(list.get_thr_status(thr).unwrap().1);
        list.thr_mark_seen(thr).unwrap();
        assert!(!list.get_thr_status(thr).unwrap().1);
    }

    #[test]
    fn get_thr_msg_exposes_bucket_metadata() {
        let (_transport, clock, list) = engine();
        list.receive(uplink("UM20", &["FL350"], 5, None));
        let thr = list.get_thr_ids(false)[0];
        let (hours, mins) = clock.display_time();

        let entry = list.get_thr_msg(thr, 0).unwrap();
        assert!(!entry.is_sent);
        assert_eq!(entry.token, None);
        assert_eq!((entry.hours, entry.mins), (hours, mins));
        assert_eq!(entry.msg.min, Some(5));

        list.send(msg("DM0", &[]), Some(thr)).unwrap();
        let entry = list.get_thr_msg(thr, 1).unwrap();
        assert!(entry.is_sent);
        assert!(entry.token.is_some());
    }

    #[test]
    fn get_thr_msg_rejects_bad_index() {
        let (_transport, _clock, list) = engine();
        let thr = list.send(msg("DM25", &[]), None).unwrap();
        let err = list.get_thr_msg(thr, 5).unwrap_err();
        assert!(matches!(
            err,
            SdkError::MessageIndex { index: 5, count: 1 }
        ));
    }

    #[test]
    fn remove_thr_detaches_thread() {
        let (_transport, _clock, list) = engine();
        let thr = list.send(msg("DM25", &[]), None).unwrap();
        list.remove_thr(thr).unwrap();
        assert!(list.get_thr_ids(false).is_empty());
        assert!(matches!(
            list.get_thr_status(thr),
            Err(SdkError::UnknownThread { .. })
        ));
    }

    #[test]
    fn thr_close_is_idempotent_on_final_threads() {
        let (_transport, _clock, list) = engine();
        list.receive(uplink("UM20", &["FL350"], 5, None));
        let thr = list.get_thr_ids(false)[0];
        list.send(msg("DM0", &[]), Some(thr)).unwrap();
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Accepted);
        list.thr_close(thr).unwrap();
        // Already final: stays ACCEPTED rather than flipping to CLOSED.
        assert_eq!(list.get_thr_status(thr).unwrap().0, ThreadStatus::Accepted);
    }

    // -- Update callback ----------------------------------------------------

    #[test]
    fn update_cb_fires_outside_lock_with_affected_ids() {
        let (_transport, _clock, list) = engine();
        let list = Arc::new(list);
        let seen: Arc<Mutex<Vec<ThreadId>>> = Arc::new(Mutex::new(Vec::new()));

        let cb_list = list.clone();
        let cb_seen = seen.clone();
        list.set_update_cb(move |ids| {
            // Re-entering the engine from the callback must not deadlock.
            for &id in ids {
                let _ = cb_list.get_thr_status(id);
            }
            cb_seen.lock().unwrap().extend_from_slice(ids);
        });

        list.receive(uplink("UM20", &["FL350"], 5, None));
        let thr = list.get_thr_ids(false)[0];
        assert_eq!(*seen.lock().unwrap(), vec![thr]);
    }
}
