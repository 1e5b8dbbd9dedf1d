//! Session types: the server's record of a connected peer.
//!
//! A session tracks:
//! - WHO the peer is (id, name, address)
//! - HOW to reach it (the connection id and callback handle the Host gave us)
//! - WHETHER it is still alive ([`Liveness`])
//! - for clients, WHAT it is doing in its room ([`ClientData`])

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use tetriforge_protocol::{
    AdminCallback, AdminId, AdminNotification, AdminSummary, ClientCallback, ClientId,
    ClientNotification, ClientState, ClientSummary, ConnectionId, Grid, Roles, RoomId,
    VoteKickAnswer,
};
use tokio::time::Instant;
use tracing::debug;

/// Counters for process-wide unique ids.
static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_ADMIN_ID: AtomicU64 = AtomicU64::new(1);

/// Longest accepted display name, in characters.
pub const MAX_NAME_LEN: usize = 24;

/// A display name must contain something visible, no control characters,
/// and at most [`MAX_NAME_LEN`] characters.
pub fn is_valid_name(name: &str) -> bool {
    !name.trim().is_empty()
        && name.chars().count() <= MAX_NAME_LEN
        && !name.chars().any(char::is_control)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Session trait
// ---------------------------------------------------------------------------

/// What a [`SessionRegistry`](crate::SessionRegistry) needs to know about
/// the sessions it stores.
pub trait Session: Send + Sync + 'static {
    type Id: Copy + Eq + fmt::Display + fmt::Debug;

    fn id(&self) -> Self::Id;
    fn name(&self) -> &str;
    fn connection(&self) -> ConnectionId;
    fn address(&self) -> IpAddr;
    fn connected_at(&self) -> SystemTime;
    fn liveness(&self) -> &Liveness;
}

// ---------------------------------------------------------------------------
// Liveness
// ---------------------------------------------------------------------------

/// Outcome of one watchdog pass over a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessCheck {
    /// Nothing to do.
    Alive,
    /// Nothing was sent for a while; push a heartbeat.
    Heartbeat,
    /// Silent for `max_timeout_count` consecutive timeouts.
    TimedOut,
    /// A notification delivery failed earlier.
    ConnectionLost,
}

#[derive(Debug)]
struct Clock {
    last_inbound: Instant,
    last_outbound: Instant,
    timeout_count: u32,
}

/// Inbound/outbound clocks and the connection-lost flag of one session.
///
/// Uses Tokio's clock, so paused-time tests drive it like the watchdog.
#[derive(Debug)]
pub struct Liveness {
    clock: Mutex<Clock>,
    lost: AtomicBool,
}

impl Liveness {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            clock: Mutex::new(Clock {
                last_inbound: now,
                last_outbound: now,
                timeout_count: 0,
            }),
            lost: AtomicBool::new(false),
        }
    }

    /// Records inbound traffic: resets the timeout count and the inbound clock.
    pub fn touch_inbound(&self) {
        let mut clock = lock(&self.clock);
        clock.last_inbound = Instant::now();
        clock.timeout_count = 0;
    }

    pub fn touch_outbound(&self) {
        lock(&self.clock).last_outbound = Instant::now();
    }

    pub fn mark_lost(&self) {
        self.lost.store(true, Ordering::Release);
    }

    pub fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    pub fn timeout_count(&self) -> u32 {
        lock(&self.clock).timeout_count
    }

    /// One watchdog pass.
    ///
    /// Every `timeout_delay` of inbound silence bumps the timeout count and
    /// restarts the inbound clock; reaching `max_timeout_count` times out.
    pub fn check(
        &self,
        now: Instant,
        timeout_delay: Duration,
        heartbeat_delay: Duration,
        max_timeout_count: u32,
    ) -> LivenessCheck {
        if self.is_lost() {
            return LivenessCheck::ConnectionLost;
        }
        let mut clock = lock(&self.clock);
        if now.saturating_duration_since(clock.last_inbound) > timeout_delay {
            clock.timeout_count += 1;
            clock.last_inbound = now;
            if clock.timeout_count >= max_timeout_count {
                return LivenessCheck::TimedOut;
            }
        }
        if now.saturating_duration_since(clock.last_outbound) > heartbeat_delay {
            LivenessCheck::Heartbeat
        } else {
            LivenessCheck::Alive
        }
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// ClientSession
// ---------------------------------------------------------------------------

/// Mutable per-client data. Guarded by the session's own lock and only
/// mutated by the room the client belongs to (or by the server while the
/// client is in no room).
#[derive(Debug, Clone, Default)]
pub struct ClientData {
    pub state: ClientState,
    pub roles: Roles,
    pub team: String,
    /// Highest piece index the client reported placing.
    pub piece_index: u32,
    /// Number of pieces the server has sent this match.
    pub issued: u32,
    pub grid: Grid,
    pub lost_at: Option<Instant>,
    /// Room back-reference. Never an owning pointer.
    pub room: Option<RoomId>,
    pub vote: VoteKickAnswer,
}

/// A connected player or spectator.
pub struct ClientSession {
    id: ClientId,
    name: String,
    address: IpAddr,
    connection: ConnectionId,
    callback: Arc<ClientCallback>,
    connected_at: SystemTime,
    data: Mutex<ClientData>,
    liveness: Liveness,
}

impl ClientSession {
    /// Creates a session with a fresh [`ClientId`].
    pub fn new(
        connection: ConnectionId,
        callback: Arc<ClientCallback>,
        address: IpAddr,
        name: impl Into<String>,
        team: impl Into<String>,
    ) -> Self {
        Self {
            id: ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            address,
            connection,
            callback,
            connected_at: SystemTime::now(),
            data: Mutex::new(ClientData {
                team: team.into(),
                ..ClientData::default()
            }),
            liveness: Liveness::new(),
        }
    }

    /// Locks the mutable client data.
    pub fn data(&self) -> MutexGuard<'_, ClientData> {
        lock(&self.data)
    }

    pub fn state(&self) -> ClientState {
        self.data().state
    }

    pub fn roles(&self) -> Roles {
        self.data().roles
    }

    pub fn room(&self) -> Option<RoomId> {
        self.data().room
    }

    pub fn team(&self) -> String {
        self.data().team.clone()
    }

    /// Sets the room back-reference if the client is in no room.
    ///
    /// Returns `false` (and changes nothing) if it already is.
    pub fn try_attach(&self, room: RoomId) -> bool {
        let mut data = self.data();
        if data.room.is_some() {
            return false;
        }
        data.room = Some(room);
        true
    }

    /// Clears the room back-reference if it points at `room`.
    pub fn detach(&self, room: RoomId) -> bool {
        let mut data = self.data();
        if data.room != Some(room) {
            return false;
        }
        data.room = None;
        true
    }

    /// Delivers a notification. A failed delivery marks the connection
    /// lost; the watchdog disconnects the session on its next pass.
    pub fn notify(&self, notification: ClientNotification) {
        if self.liveness.is_lost() {
            return;
        }
        match self.callback.notify(notification) {
            Ok(()) => self.liveness.touch_outbound(),
            Err(err) => {
                debug!(client = %self.id, name = %self.name, %err, "delivery failed, connection lost");
                self.liveness.mark_lost();
            }
        }
    }

    pub fn summary(&self) -> ClientSummary {
        let data = self.data();
        ClientSummary {
            id: self.id,
            name: self.name.clone(),
            team: data.team.clone(),
            room: data.room,
            state: data.state,
            roles: data.roles,
        }
    }
}

impl Session for ClientSession {
    type Id = ClientId;

    fn id(&self) -> ClientId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn connection(&self) -> ConnectionId {
        self.connection
    }

    fn address(&self) -> IpAddr {
        self.address
    }

    fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    fn liveness(&self) -> &Liveness {
        &self.liveness
    }
}

impl fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// AdminSession
// ---------------------------------------------------------------------------

/// A connected administrator. No gameplay state.
pub struct AdminSession {
    id: AdminId,
    name: String,
    address: IpAddr,
    connection: ConnectionId,
    callback: Arc<AdminCallback>,
    connected_at: SystemTime,
    liveness: Liveness,
}

impl AdminSession {
    pub fn new(
        connection: ConnectionId,
        callback: Arc<AdminCallback>,
        address: IpAddr,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: AdminId(NEXT_ADMIN_ID.fetch_add(1, Ordering::Relaxed)),
            name: name.into(),
            address,
            connection,
            callback,
            connected_at: SystemTime::now(),
            liveness: Liveness::new(),
        }
    }

    pub fn notify(&self, notification: AdminNotification) {
        if self.liveness.is_lost() {
            return;
        }
        match self.callback.notify(notification) {
            Ok(()) => self.liveness.touch_outbound(),
            Err(err) => {
                debug!(admin = %self.id, name = %self.name, %err, "delivery failed, connection lost");
                self.liveness.mark_lost();
            }
        }
    }

    pub fn summary(&self) -> AdminSummary {
        AdminSummary {
            id: self.id,
            name: self.name.clone(),
            address: self.address,
        }
    }
}

impl Session for AdminSession {
    type Id = AdminId;

    fn id(&self) -> AdminId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn connection(&self) -> ConnectionId {
        self.connection
    }

    fn address(&self) -> IpAddr {
        self.address
    }

    fn connected_at(&self) -> SystemTime {
        self.connected_at
    }

    fn liveness(&self) -> &Liveness {
        &self.liveness
    }
}

impl fmt::Debug for AdminSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminSession")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connection", &self.connection)
            .finish_non_exhaustive()
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use tokio::sync::mpsc;

    use super::*;

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    fn client(name: &str) -> (ClientSession, mpsc::UnboundedReceiver<ClientNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = ClientSession::new(ConnectionId::new(1), Arc::new(tx), localhost(), name, "");
        (session, rx)
    }

    #[test]
    fn test_is_valid_name_rules() {
        assert!(is_valid_name("alice"));
        assert!(is_valid_name("Mr Bob"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("   "));
        assert!(!is_valid_name("tab\there"));
        assert!(!is_valid_name(&"x".repeat(MAX_NAME_LEN + 1)));
    }

    #[test]
    fn test_new_client_sessions_get_distinct_ids() {
        let (a, _rx_a) = client("a");
        let (b, _rx_b) = client("b");
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_try_attach_only_once() {
        let (session, _rx) = client("alice");
        assert!(session.try_attach(RoomId(1)));
        assert!(!session.try_attach(RoomId(2)));
        assert_eq!(session.room(), Some(RoomId(1)));
    }

    #[test]
    fn test_detach_requires_matching_room() {
        let (session, _rx) = client("alice");
        session.try_attach(RoomId(1));
        assert!(!session.detach(RoomId(2)));
        assert!(session.detach(RoomId(1)));
        assert_eq!(session.room(), None);
    }

    #[test]
    fn test_notify_delivers_to_callback() {
        let (session, mut rx) = client("alice");
        session.notify(ClientNotification::Heartbeat);
        assert_eq!(rx.try_recv().unwrap(), ClientNotification::Heartbeat);
        assert!(!session.liveness().is_lost());
    }

    #[test]
    fn test_notify_closed_callback_marks_lost() {
        let (session, rx) = client("alice");
        drop(rx);
        session.notify(ClientNotification::Heartbeat);
        assert!(session.liveness().is_lost());
    }

    #[test]
    fn test_summary_reflects_data() {
        let (session, _rx) = client("alice");
        {
            let mut data = session.data();
            data.team = "red".into();
            data.state = ClientState::WaitInRoom;
            data.roles.insert(Roles::PLAYER);
        }
        let summary = session.summary();
        assert_eq!(summary.name, "alice");
        assert_eq!(summary.team, "red");
        assert_eq!(summary.state, ClientState::WaitInRoom);
        assert!(summary.roles.is_player());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_counts_timeouts_until_limit() {
        let liveness = Liveness::new();
        let timeout = Duration::from_secs(5);
        let heartbeat = Duration::from_secs(60);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(liveness.check(Instant::now(), timeout, heartbeat, 3), LivenessCheck::Alive);
        assert_eq!(liveness.timeout_count(), 1);

        // The inbound clock restarted, so an immediate re-check is quiet.
        assert_eq!(liveness.check(Instant::now(), timeout, heartbeat, 3), LivenessCheck::Alive);
        assert_eq!(liveness.timeout_count(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        liveness.check(Instant::now(), timeout, heartbeat, 3);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(
            liveness.check(Instant::now(), timeout, heartbeat, 3),
            LivenessCheck::TimedOut
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_inbound_resets_timeout_count() {
        let liveness = Liveness::new();
        tokio::time::advance(Duration::from_secs(6)).await;
        liveness.check(Instant::now(), Duration::from_secs(5), Duration::from_secs(60), 3);
        assert_eq!(liveness.timeout_count(), 1);

        liveness.touch_inbound();
        assert_eq!(liveness.timeout_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_requests_heartbeat_when_outbound_idle() {
        let liveness = Liveness::new();
        let timeout = Duration::from_secs(5);
        let heartbeat = Duration::from_millis(300);

        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(
            liveness.check(Instant::now(), timeout, heartbeat, 3),
            LivenessCheck::Heartbeat
        );

        liveness.touch_outbound();
        assert_eq!(liveness.check(Instant::now(), timeout, heartbeat, 3), LivenessCheck::Alive);
    }

    #[test]
    fn test_check_reports_lost_first() {
        let liveness = Liveness::new();
        liveness.mark_lost();
        let d = Duration::from_secs(1);
        assert_eq!(liveness.check(Instant::now(), d, d, 3), LivenessCheck::ConnectionLost);
    }
}
