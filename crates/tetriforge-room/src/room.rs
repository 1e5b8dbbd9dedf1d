//! Game room: membership, the match state machine, vote-kicks and
//! sudden death.
//!
//! A room has two entry paths:
//!
//! - **Control plane** (join, leave, start/stop/pause/resume, options,
//!   vote-kick) runs synchronously on the caller's thread, inside the
//!   room's lock.
//! - **Gameplay** (place piece, modify grid, specials, lines, loss) is
//!   validated on the caller's thread, then pushed onto the room's
//!   [`ActionQueue`] and applied by its consumer in arrival order. The
//!   action re-checks its preconditions because the room may have moved on
//!   while it waited.
//!
//! Lock order is room → session data. Notifications are sent while the
//! room lock is held; callbacks never block.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, SystemTime};

use tetriforge_protocol::{
    ClientId, ClientNotification, ClientState, GameFinishedReason, GameJoinResult, GameOptions,
    GameRules, GameStatistics, Grid, Placement, PlayerStatistics, Roles, RoomId, RoomState,
    RoomSummary, Special, VoteKickAnswer, WinEntry,
};
use tetriforge_session::{ClientSession, Session};
use tetriforge_timer::{TimerHandle, TimerService};
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::{ActionQueue, PieceSupplier, RoomConfig, RoomError};

/// Counter for generating unique room IDs.
static NEXT_ROOM_ID: AtomicU64 = AtomicU64::new(1);

/// Fewest players a vote-kick needs.
pub const VOTE_KICK_MIN_PLAYERS: usize = 3;

/// Win-list points for the winner, the runner-up and third place.
const PODIUM_POINTS: [u32; 3] = [3, 2, 1];

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

/// Per-player numbers of the current (or last) match.
#[derive(Debug, Clone)]
struct Tally {
    client: ClientId,
    name: String,
    team: String,
    pieces_placed: u32,
    lines_cleared: u32,
    specials_used: BTreeMap<Special, u32>,
    playing_time: Duration,
    won: bool,
}

impl Tally {
    fn new(client: &ClientSession) -> Self {
        Self {
            client: client.id(),
            name: client.name().to_owned(),
            team: client.team(),
            pieces_placed: 0,
            lines_cleared: 0,
            specials_used: BTreeMap::new(),
            playing_time: Duration::ZERO,
            won: false,
        }
    }

    fn to_statistics(&self) -> PlayerStatistics {
        PlayerStatistics {
            client: Some(self.client),
            name: self.name.clone(),
            team: self.team.clone(),
            pieces_placed: self.pieces_placed,
            lines_cleared: self.lines_cleared,
            specials_used: self.specials_used.iter().map(|(s, n)| (*s, *n)).collect(),
            playing_time: self.playing_time,
            won: self.won,
        }
    }
}

struct VoteKick {
    initiator: ClientId,
    target: Arc<ClientSession>,
    generation: u64,
    /// Dropping the vote cancels its timeout.
    _timeout: TimerHandle,
}

struct RoomInner {
    state: RoomState,
    options: GameOptions,
    /// Join order.
    members: Vec<Arc<ClientSession>>,
    tallies: Vec<Tally>,
    win_list: Vec<WinEntry>,
    vote: Option<VoteKick>,
    vote_generation: u64,
    special_id: u64,
    pieces: PieceSupplier,
    started: Option<Instant>,
    started_at: Option<SystemTime>,
    finished_at: Option<SystemTime>,
    sudden_death: Option<TimerHandle>,
    sudden_death_generation: u64,
}

impl RoomInner {
    fn member(&self, id: ClientId) -> Option<&Arc<ClientSession>> {
        self.members.iter().find(|m| m.id() == id)
    }

    fn players(&self) -> Vec<Arc<ClientSession>> {
        self.members
            .iter()
            .filter(|m| m.roles().is_player())
            .cloned()
            .collect()
    }

    fn player_count(&self) -> usize {
        self.members.iter().filter(|m| m.roles().is_player()).count()
    }

    fn spectator_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.roles().is_spectator())
            .count()
    }

    fn playing(&self) -> Vec<Arc<ClientSession>> {
        self.members
            .iter()
            .filter(|m| m.state() == ClientState::Playing)
            .cloned()
            .collect()
    }

    fn game_master(&self) -> Option<&Arc<ClientSession>> {
        self.members.iter().find(|m| {
            let roles = m.roles();
            roles.is_player() && roles.is_game_master()
        })
    }

    fn broadcast(&self, notification: ClientNotification) {
        for member in &self.members {
            member.notify(notification.clone());
        }
    }

    fn broadcast_except(&self, except: ClientId, notification: ClientNotification) {
        for member in self.members.iter().filter(|m| m.id() != except) {
            member.notify(notification.clone());
        }
    }

    fn tally(&mut self, client: ClientId) -> Option<&mut Tally> {
        self.tallies.iter_mut().find(|t| t.client == client)
    }

    fn elapsed(&self, now: Instant) -> Duration {
        self.started
            .map(|start| now.saturating_duration_since(start))
            .unwrap_or_default()
    }

    fn transition(&mut self, target: RoomState) {
        debug_assert!(
            self.state.can_transition_to(target),
            "illegal room transition {} -> {}",
            self.state,
            target
        );
        self.state = target;
    }

    fn next_special_id(&mut self) -> u64 {
        self.special_id += 1;
        self.special_id
    }

    fn stop_sudden_death(&mut self) {
        self.sudden_death = None;
        self.sudden_death_generation += 1;
    }

    /// Clears every vote answer.
    fn reset_votes(&self) {
        for member in &self.members {
            member.data().vote = VoteKickAnswer::NotVoted;
        }
    }

    fn award(&mut self, ranking: &[Arc<ClientSession>]) {
        for (client, points) in ranking.iter().zip(PODIUM_POINTS) {
            let name = client.name();
            let team = client.team();
            match self
                .win_list
                .iter_mut()
                .find(|e| e.name == name && e.team == team)
            {
                Some(entry) => entry.score = entry.score.saturating_add(points),
                None => self.win_list.push(WinEntry {
                    name: name.to_owned(),
                    team,
                    score: points,
                }),
            }
        }
        // Stable: equal scores keep their first-scored order.
        self.win_list.sort_by_key(|e| Reverse(e.score));
    }

    fn build_statistics(&self, room: RoomId) -> GameStatistics {
        let started_at = self.started_at.unwrap_or(SystemTime::UNIX_EPOCH);
        GameStatistics {
            room,
            started_at,
            finished_at: self.finished_at.unwrap_or_else(SystemTime::now),
            players: self.tallies.iter().map(Tally::to_statistics).collect(),
        }
    }
}

/// Detaches the client from `room` and resets the per-room part of its data.
fn clear_membership(client: &ClientSession, room: RoomId) {
    if !client.detach(room) {
        debug!(client = %client.name(), %room, "client was not attached to this room");
    }
    let mut data = client.data();
    data.roles.clear();
    data.state = ClientState::Connected;
    data.vote = VoteKickAnswer::NotVoted;
    data.lost_at = None;
}

// ---------------------------------------------------------------------------
// GameRoom
// ---------------------------------------------------------------------------

/// One game room.
///
/// Always handled as `Arc<GameRoom>`: queued actions and timers hold a
/// `Weak` back to it and do nothing once the room is dropped.
pub struct GameRoom {
    id: RoomId,
    name: String,
    created_at: SystemTime,
    password: Option<String>,
    rule: GameRules,
    config: RoomConfig,
    timers: TimerService,
    queue: ActionQueue,
    me: Weak<GameRoom>,
    inner: Mutex<RoomInner>,
}

impl GameRoom {
    /// Creates a room in `Created` state with the rule-set's default options.
    ///
    /// An empty password means no password.
    pub fn new(
        name: impl Into<String>,
        password: Option<String>,
        rule: GameRules,
        config: RoomConfig,
        timers: TimerService,
    ) -> Arc<Self> {
        let id = RoomId(NEXT_ROOM_ID.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        let options = GameOptions::for_rules(rule);
        let pieces = PieceSupplier::new(options.pieces.clone(), config.seed);
        let queue = ActionQueue::new(name.clone(), config.queue_poll);
        Arc::new_cyclic(|me| Self {
            id,
            name,
            created_at: SystemTime::now(),
            password: password.filter(|p| !p.is_empty()),
            rule,
            config,
            timers,
            queue,
            me: me.clone(),
            inner: Mutex::new(RoomInner {
                state: RoomState::Created,
                options,
                members: Vec::new(),
                tallies: Vec::new(),
                win_list: Vec::new(),
                vote: None,
                vote_generation: 0,
                special_id: 0,
                pieces,
                started: None,
                started_at: None,
                finished_at: None,
                sudden_death: None,
                sudden_death_generation: 0,
            }),
        })
    }

    pub fn id(&self) -> RoomId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self) -> GameRules {
        self.rule
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }

    pub fn has_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// A room without a password accepts anything.
    pub fn is_password_valid(&self, password: Option<&str>) -> bool {
        match &self.password {
            None => true,
            Some(expected) => password == Some(expected.as_str()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RoomInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` under the room lock and logs a refusal.
    fn guarded<T>(
        &self,
        client: Option<&ClientSession>,
        operation: &'static str,
        f: impl FnOnce(&mut RoomInner) -> Result<T, RoomError>,
    ) -> Result<T, RoomError> {
        let mut inner = self.lock();
        let result = f(&mut inner);
        if let Err(err) = &result {
            match client {
                Some(client) => warn!(
                    room = %self.name,
                    client = %client.name(),
                    operation,
                    %err,
                    "operation refused"
                ),
                None => warn!(room = %self.name, operation, %err, "operation refused"),
            }
        }
        result
    }

    fn is_member(&self, inner: &RoomInner, client: &ClientSession) -> bool {
        client.room() == Some(self.id) && inner.member(client.id()).is_some()
    }

    /// `None` is the server itself and always passes.
    fn check_master(
        &self,
        inner: &RoomInner,
        issuer: Option<&ClientSession>,
    ) -> Result<(), RoomError> {
        let Some(client) = issuer else {
            return Ok(());
        };
        if !self.is_member(inner, client) {
            return Err(RoomError::NotMember(client.id()));
        }
        let roles = client.roles();
        if !roles.is_player() {
            return Err(RoomError::NotPlayer(client.id()));
        }
        if !roles.is_game_master() {
            return Err(RoomError::NotGameMaster(client.id()));
        }
        Ok(())
    }

    // -- Lifecycle ------------------------------------------------------------

    /// `Created` → `WaitStart`; starts the action queue consumer.
    pub fn start(&self) -> Result<(), RoomError> {
        self.guarded(None, "start", |inner| {
            if inner.state != RoomState::Created {
                return Err(RoomError::InvalidState(inner.state));
            }
            self.queue.start(self.timers.runtime());
            inner.transition(RoomState::WaitStart);
            info!(room = %self.name, id = %self.id, "room started");
            Ok(())
        })
    }

    /// Evicts everyone and returns to `Created`.
    ///
    /// Clears statistics, win-list, queue and vote, cancels the timers,
    /// resets the piece supply and stops the consumer. Await
    /// [`wait_stopped`](Self::wait_stopped) to know the consumer is gone.
    pub fn stop(&self) -> Result<(), RoomError> {
        self.guarded(None, "stop", |inner| {
            if !matches!(
                inner.state,
                RoomState::WaitStart | RoomState::Started | RoomState::Paused
            ) {
                return Err(RoomError::InvalidState(inner.state));
            }
            inner.transition(RoomState::Stopping);
            inner.vote = None;
            inner.stop_sudden_death();
            for member in std::mem::take(&mut inner.members) {
                clear_membership(&member, self.id);
                member.notify(ClientNotification::GameLeft);
            }
            inner.tallies.clear();
            inner.win_list.clear();
            inner.started = None;
            inner.started_at = None;
            inner.finished_at = None;
            self.queue.stop();
            inner.pieces.reset();
            inner.special_id = 0;
            inner.transition(RoomState::Created);
            info!(room = %self.name, "room stopped");
            Ok(())
        })
    }

    /// Waits for the action queue consumer to exit after [`stop`](Self::stop).
    pub async fn wait_stopped(&self, timeout: Duration) -> bool {
        self.queue.wait(timeout).await
    }

    // -- Membership -----------------------------------------------------------

    /// Adds a client as player or spectator.
    ///
    /// Password checks are the caller's job ([`is_password_valid`](Self::is_password_valid)).
    pub fn join(&self, client: &Arc<ClientSession>, as_spectator: bool) -> GameJoinResult {
        let mut inner = self.lock();
        let refused = if !inner.state.is_joinable() {
            Some(GameJoinResult::FailedInvalidState)
        } else if as_spectator && inner.spectator_count() >= self.config.max_spectators {
            Some(GameJoinResult::FailedTooManySpectators)
        } else if !as_spectator && inner.player_count() >= self.config.max_players {
            Some(GameJoinResult::FailedTooManyPlayers)
        } else if !client.try_attach(self.id) {
            Some(GameJoinResult::FailedAlreadyInGame)
        } else {
            None
        };
        if let Some(result) = refused {
            warn!(room = %self.name, client = %client.name(), ?result, "join refused");
            return result;
        }

        let needs_master = !as_spectator && inner.game_master().is_none();
        {
            let mut data = client.data();
            data.roles.clear();
            data.roles.insert(if as_spectator {
                Roles::SPECTATOR
            } else {
                Roles::PLAYER
            });
            if needs_master {
                data.roles.insert(Roles::GAME_MASTER);
            }
            data.state = ClientState::WaitInRoom;
            data.vote = VoteKickAnswer::NotVoted;
            data.piece_index = 0;
            data.issued = 0;
            data.grid = Grid::empty();
            data.lost_at = None;
        }
        inner.members.push(Arc::clone(client));

        client.notify(ClientNotification::GameJoined {
            result: GameJoinResult::Successful,
            room: self.id,
            options: inner.options.clone(),
            is_game_master: needs_master,
        });
        inner.broadcast_except(
            client.id(),
            ClientNotification::ClientGameJoined {
                client: client.id(),
                name: client.name().to_owned(),
                as_spectator,
            },
        );
        if needs_master {
            inner.broadcast(ClientNotification::GameMasterModified {
                client: client.id(),
            });
        }
        info!(
            room = %self.name,
            client = %client.name(),
            as_spectator,
            players = inner.player_count(),
            "client joined"
        );
        GameJoinResult::Successful
    }

    /// Removes a member, handling the vote, the game master and forfeits.
    pub fn leave(&self, client: &ClientSession) -> Result<(), RoomError> {
        self.guarded(Some(client), "leave", |inner| self.leave_locked(inner, client))
    }

    fn leave_locked(&self, inner: &mut RoomInner, client: &ClientSession) -> Result<(), RoomError> {
        if client.room() != Some(self.id) {
            return Err(RoomError::NotMember(client.id()));
        }
        let id = client.id();
        let (was_player, was_playing) = {
            let data = client.data();
            (data.roles.is_player(), data.state == ClientState::Playing)
        };
        inner.members.retain(|m| m.id() != id);
        clear_membership(client, self.id);

        client.notify(ClientNotification::GameLeft);
        inner.broadcast(ClientNotification::ClientGameLeft {
            client: id,
            name: client.name().to_owned(),
        });
        info!(room = %self.name, client = %client.name(), "client left");

        // Vote-kick.
        let vote_target = inner.vote.as_ref().map(|v| v.target.id());
        if vote_target == Some(id) {
            inner.vote = None;
            inner.reset_votes();
            info!(room = %self.name, "vote-kick cancelled, target left");
        } else if vote_target.is_some() && was_player {
            if inner.player_count() < VOTE_KICK_MIN_PLAYERS {
                inner.vote = None;
                inner.reset_votes();
                info!(room = %self.name, "vote-kick cancelled, not enough players");
            } else {
                self.evaluate_vote(inner);
            }
        }

        // Game master.
        if inner.game_master().is_none() {
            if let Some(first) = inner.players().first() {
                first.data().roles.insert(Roles::GAME_MASTER);
                inner.broadcast(ClientNotification::GameMasterModified {
                    client: first.id(),
                });
                info!(room = %self.name, client = %first.name(), "game master promoted");
            }
        }

        // Forfeit.
        if inner.state.is_in_game() && was_playing {
            let now = Instant::now();
            let elapsed = inner.elapsed(now);
            if let Some(tally) = inner.tally(id) {
                tally.playing_time = elapsed;
            }
            if inner.playing().len() <= 1 {
                self.finish(inner, GameFinishedReason::NotEnoughPlayers);
            }
        }
        Ok(())
    }

    // -- Match control --------------------------------------------------------

    /// `WaitStart` → `Started` with a fresh piece sequence.
    pub fn start_game(&self, issuer: Option<&ClientSession>) -> Result<(), RoomError> {
        self.guarded(issuer, "start_game", |inner| {
            self.check_master(inner, issuer)?;
            if inner.state != RoomState::WaitStart {
                return Err(RoomError::InvalidState(inner.state));
            }
            let players = inner.players();
            if players.is_empty() {
                return Err(RoomError::NotEnoughPlayers {
                    required: 1,
                    actual: 0,
                });
            }

            self.queue.clear();
            let table = inner.options.pieces.clone();
            inner.pieces.set_occurrences(table);
            inner.pieces.reset();
            inner.special_id = 0;
            let initial = self.config.initial_pieces;
            let batch = inner.pieces.batch(0, initial);

            inner.tallies = players.iter().map(|p| Tally::new(p)).collect();
            inner.started = Some(Instant::now());
            inner.started_at = Some(SystemTime::now());
            inner.finished_at = None;
            inner.transition(RoomState::Started);
            self.arm_sudden_death(inner);

            for member in &inner.members {
                let is_player = {
                    let mut data = member.data();
                    if data.roles.is_player() {
                        data.state = ClientState::Playing;
                        data.piece_index = 0;
                        data.issued = initial;
                        data.grid = Grid::empty();
                        data.lost_at = None;
                        true
                    } else {
                        false
                    }
                };
                member.notify(ClientNotification::GameStarted {
                    pieces: if is_player { batch.clone() } else { Vec::new() },
                });
            }
            info!(room = %self.name, players = players.len(), "game started");
            Ok(())
        })
    }

    /// `Started | Paused` → `Finished(Stopped)` → `WaitStart`.
    pub fn stop_game(&self, issuer: Option<&ClientSession>) -> Result<(), RoomError> {
        self.guarded(issuer, "stop_game", |inner| {
            self.check_master(inner, issuer)?;
            if !inner.state.is_in_game() {
                return Err(RoomError::InvalidState(inner.state));
            }
            self.finish(inner, GameFinishedReason::Stopped);
            Ok(())
        })
    }

    /// `Started` → `Paused`. Sudden death skips its ticks while paused.
    pub fn pause_game(&self, issuer: Option<&ClientSession>) -> Result<(), RoomError> {
        self.guarded(issuer, "pause_game", |inner| {
            self.check_master(inner, issuer)?;
            if inner.state != RoomState::Started {
                return Err(RoomError::InvalidState(inner.state));
            }
            inner.transition(RoomState::Paused);
            inner.broadcast(ClientNotification::GamePaused);
            info!(room = %self.name, "game paused");
            Ok(())
        })
    }

    /// `Paused` → `Started`.
    pub fn resume_game(&self, issuer: Option<&ClientSession>) -> Result<(), RoomError> {
        self.guarded(issuer, "resume_game", |inner| {
            self.check_master(inner, issuer)?;
            if inner.state != RoomState::Paused {
                return Err(RoomError::InvalidState(inner.state));
            }
            inner.transition(RoomState::Started);
            inner.broadcast(ClientNotification::GameResumed);
            info!(room = %self.name, "game resumed");
            Ok(())
        })
    }

    /// Replaces the options. Only between matches; invalid options leave
    /// the current ones untouched.
    pub fn change_options(
        &self,
        issuer: Option<&ClientSession>,
        options: GameOptions,
    ) -> Result<(), RoomError> {
        self.guarded(issuer, "change_options", |inner| {
            self.check_master(inner, issuer)?;
            if inner.state != RoomState::WaitStart {
                return Err(RoomError::InvalidState(inner.state));
            }
            options.validate()?;
            inner.pieces.set_occurrences(options.pieces.clone());
            inner.options = options;
            inner.broadcast(ClientNotification::GameOptionsChanged {
                options: inner.options.clone(),
            });
            info!(room = %self.name, "options changed");
            Ok(())
        })
    }

    /// Empties the win-list in any running state and tells every member.
    pub fn reset_win_list(&self, issuer: Option<&ClientSession>) -> Result<(), RoomError> {
        self.guarded(issuer, "reset_win_list", |inner| {
            self.check_master(inner, issuer)?;
            inner.win_list.clear();
            inner.broadcast(ClientNotification::WinListModified {
                win_list: Vec::new(),
            });
            info!(room = %self.name, "win-list reset");
            Ok(())
        })
    }

    /// The single exit of a running match.
    fn finish(&self, inner: &mut RoomInner, reason: GameFinishedReason) {
        inner.transition(RoomState::Finished);
        inner.stop_sudden_death();

        let now = Instant::now();
        let elapsed = inner.elapsed(now);
        for member in inner.playing() {
            if let Some(tally) = inner.tally(member.id()) {
                tally.playing_time = elapsed;
            }
        }
        inner.finished_at = Some(SystemTime::now());
        let statistics = inner.build_statistics(self.id);

        for member in &inner.members {
            let mut data = member.data();
            if matches!(data.state, ClientState::Playing | ClientState::GameLost) {
                data.state = ClientState::WaitInRoom;
            }
        }
        inner.broadcast(ClientNotification::GameFinished {
            reason,
            statistics,
        });
        info!(room = %self.name, ?reason, "game finished");
        inner.transition(RoomState::WaitStart);
    }

    // -- Sudden death ---------------------------------------------------------

    fn arm_sudden_death(&self, inner: &mut RoomInner) {
        inner.stop_sudden_death();
        let Some(delay) = inner.options.sudden_death_delay() else {
            return;
        };
        let generation = inner.sudden_death_generation;
        let room = self.me.clone();
        inner.sudden_death = Some(self.timers.periodic(
            "sudden-death",
            delay,
            inner.options.sudden_death_tick(),
            move || {
                if let Some(room) = room.upgrade() {
                    room.sudden_death_tick(generation);
                }
            },
        ));
        debug!(room = %self.name, ?delay, "sudden death armed");
    }

    fn sudden_death_tick(&self, generation: u64) {
        let inner = self.lock();
        if inner.sudden_death_generation != generation || inner.state != RoomState::Started {
            return;
        }
        trace!(room = %self.name, "sudden death line");
        for member in inner.playing() {
            member.notify(ClientNotification::ServerLinesAdded { count: 1 });
        }
    }

    // -- Gameplay -------------------------------------------------------------

    fn check_gameplay(
        &self,
        inner: &RoomInner,
        client: &ClientSession,
        in_match: bool,
    ) -> Result<(), RoomError> {
        if in_match && inner.state != RoomState::Started {
            return Err(RoomError::InvalidState(inner.state));
        }
        if !self.is_member(inner, client) {
            return Err(RoomError::NotMember(client.id()));
        }
        if in_match && client.state() != ClientState::Playing {
            return Err(RoomError::NotPlaying(client.id()));
        }
        Ok(())
    }

    /// Validates now, applies later on the action queue.
    fn enqueue_gameplay<F>(
        &self,
        client: &Arc<ClientSession>,
        operation: &'static str,
        in_match: bool,
        apply: F,
    ) -> Result<(), RoomError>
    where
        F: FnOnce(&GameRoom, &mut RoomInner, &ClientSession) + Send + 'static,
    {
        self.guarded(Some(client), operation, |inner| {
            self.check_gameplay(inner, client, in_match)
        })?;
        let room = self.me.clone();
        let client = Arc::clone(client);
        self.queue.enqueue(move || {
            let Some(room) = room.upgrade() else {
                return;
            };
            let mut inner = room.lock();
            if let Err(err) = room.check_gameplay(&inner, &client, in_match) {
                debug!(
                    room = %room.name,
                    client = %client.name(),
                    operation,
                    %err,
                    "stale gameplay action dropped"
                );
                return;
            }
            apply(&room, &mut *inner, &client);
        });
        Ok(())
    }

    /// Stores the grid, forwards it, and tops up the client's pieces.
    pub fn place_piece(
        &self,
        client: &Arc<ClientSession>,
        placement: Placement,
        grid: Grid,
    ) -> Result<(), RoomError> {
        self.enqueue_gameplay(client, "place_piece", true, move |room, inner, client| {
            let reached = placement.index.max(placement.highest);
            let issued = {
                let mut data = client.data();
                data.grid = grid.clone();
                data.piece_index = placement.index;
                data.issued
            };
            if let Some(tally) = inner.tally(client.id()) {
                tally.pieces_placed = tally.pieces_placed.saturating_add(1);
            }
            trace!(
                room = %room.name,
                client = %client.name(),
                index = placement.index,
                piece = ?placement.piece,
                x = placement.x,
                y = placement.y,
                "piece placed"
            );
            inner.broadcast_except(
                client.id(),
                ClientNotification::GridModified {
                    client: client.id(),
                    grid,
                },
            );

            let look_ahead = room.config.look_ahead_pieces;
            let remaining = issued.saturating_sub(reached.saturating_add(1));
            if remaining < look_ahead {
                let count = if remaining == 0 {
                    look_ahead * 2
                } else {
                    look_ahead
                };
                let pieces = inner.pieces.batch(issued, count);
                client.data().issued = issued.saturating_add(count);
                client.notify(ClientNotification::PiecePlaced {
                    first_index: issued,
                    pieces,
                });
            }
        })
    }

    pub fn modify_grid(&self, client: &Arc<ClientSession>, grid: Grid) -> Result<(), RoomError> {
        self.enqueue_gameplay(client, "modify_grid", true, move |_room, inner, client| {
            client.data().grid = grid.clone();
            inner.broadcast_except(
                client.id(),
                ClientNotification::GridModified {
                    client: client.id(),
                    grid,
                },
            );
        })
    }

    /// Uses a special on a playing member. `SwitchFields` swaps the two
    /// stored grids before anyone is told.
    pub fn use_special(
        &self,
        client: &Arc<ClientSession>,
        target: ClientId,
        special: Special,
    ) -> Result<(), RoomError> {
        self.guarded(Some(client), "use_special", |inner| {
            playing_target(inner, target).map(|_| ())
        })?;
        self.enqueue_gameplay(client, "use_special", true, move |room, inner, client| {
            let Ok(target) = playing_target(inner, target) else {
                debug!(room = %room.name, client = %client.name(), %target, "special target gone");
                return;
            };
            if special == Special::SwitchFields && target.id() != client.id() {
                let mine = std::mem::take(&mut client.data().grid);
                let theirs = std::mem::replace(&mut target.data().grid, mine);
                client.data().grid = theirs;
            }
            let special_id = inner.next_special_id();
            if let Some(tally) = inner.tally(client.id()) {
                *tally.specials_used.entry(special).or_default() += 1;
            }
            debug!(
                room = %room.name,
                from = %client.name(),
                to = %target.name(),
                ?special,
                special_id,
                "special used"
            );
            inner.broadcast(ClientNotification::SpecialUsed {
                special_id,
                from: client.id(),
                to: target.id(),
                special,
            });
        })
    }

    /// Counts cleared lines; in classic mode sends 1/2/4 lines for 2/3/4+.
    pub fn clear_lines(&self, client: &Arc<ClientSession>, count: u32) -> Result<(), RoomError> {
        self.enqueue_gameplay(client, "clear_lines", true, move |room, inner, client| {
            if let Some(tally) = inner.tally(client.id()) {
                tally.lines_cleared = tally.lines_cleared.saturating_add(count);
            }
            if !inner.options.classic_multiplayer || count < 2 {
                return;
            }
            let sent = if count >= 4 { 4 } else { count - 1 };
            let special_id = inner.next_special_id();
            debug!(room = %room.name, client = %client.name(), count, sent, "lines sent");
            inner.broadcast_except(
                client.id(),
                ClientNotification::PlayerLinesAdded {
                    special_id,
                    from: client.id(),
                    count: sent,
                },
            );
        })
    }

    /// Marks the client as lost; the last one standing wins.
    pub fn game_lost(&self, client: &Arc<ClientSession>) -> Result<(), RoomError> {
        self.enqueue_gameplay(client, "game_lost", true, |room, inner, client| {
            let now = Instant::now();
            {
                let mut data = client.data();
                data.state = ClientState::GameLost;
                data.lost_at = Some(now);
            }
            let elapsed = inner.elapsed(now);
            if let Some(tally) = inner.tally(client.id()) {
                tally.playing_time = elapsed;
            }
            inner.broadcast(ClientNotification::PlayerLost {
                client: client.id(),
            });
            info!(room = %room.name, client = %client.name(), "player lost");

            let playing = inner.playing();
            match playing.as_slice() {
                [] => room.finish(inner, GameFinishedReason::NoWinner),
                [winner] => {
                    if let Some(tally) = inner.tally(winner.id()) {
                        tally.won = true;
                    }
                    inner.broadcast(ClientNotification::PlayerWon {
                        client: winner.id(),
                    });
                    let mut losers: Vec<_> = inner
                        .members
                        .iter()
                        .filter(|m| m.state() == ClientState::GameLost)
                        .cloned()
                        .collect();
                    losers.sort_by_key(|m| Reverse(m.data().lost_at));
                    let mut ranking = vec![Arc::clone(winner)];
                    ranking.extend(losers);
                    inner.award(&ranking);
                    inner.broadcast(ClientNotification::WinListModified {
                        win_list: inner.win_list.clone(),
                    });
                    info!(room = %room.name, winner = %winner.name(), "player won");
                    room.finish(inner, GameFinishedReason::Won);
                }
                _ => {}
            }
        })
    }

    /// Accepted in any room state, from any member.
    pub fn finish_continuous_special(
        &self,
        client: &Arc<ClientSession>,
        special: Special,
    ) -> Result<(), RoomError> {
        self.enqueue_gameplay(
            client,
            "finish_continuous_special",
            false,
            move |_room, inner, client| {
                inner.broadcast_except(
                    client.id(),
                    ClientNotification::ContinuousSpecialFinished {
                        client: client.id(),
                        special,
                    },
                );
            },
        )
    }

    // -- Vote-kick ------------------------------------------------------------

    /// Opens a vote to evict `target`. The initiator's answer counts as
    /// accepted.
    pub fn vote_kick(
        &self,
        initiator: &ClientSession,
        target: ClientId,
        reason: impl Into<String>,
    ) -> Result<(), RoomError> {
        let reason = reason.into();
        self.guarded(Some(initiator), "vote_kick", |inner| {
            let actual = inner.player_count();
            if actual < VOTE_KICK_MIN_PLAYERS {
                return Err(RoomError::NotEnoughPlayers {
                    required: VOTE_KICK_MIN_PLAYERS,
                    actual,
                });
            }
            if !self.is_member(inner, initiator) || !initiator.roles().is_player() {
                return Err(RoomError::NotPlayer(initiator.id()));
            }
            if target == initiator.id() {
                return Err(RoomError::InvalidTarget(target));
            }
            let target = inner
                .member(target)
                .filter(|m| m.roles().is_player())
                .cloned()
                .ok_or(RoomError::InvalidTarget(target))?;
            if inner.vote.is_some() {
                return Err(RoomError::VoteInProgress);
            }

            inner.vote_generation += 1;
            let generation = inner.vote_generation;
            inner.reset_votes();
            initiator.data().vote = VoteKickAnswer::Accepted;

            let room = self.me.clone();
            let timeout = self
                .timers
                .once("vote-kick", self.config.vote_kick_timeout, move || {
                    if let Some(room) = room.upgrade() {
                        room.vote_timed_out(generation);
                    }
                });

            for player in inner.players() {
                if player.id() != initiator.id() && player.id() != target.id() {
                    player.notify(ClientNotification::VoteKickAsked {
                        initiator: initiator.id(),
                        target: target.id(),
                        reason: reason.clone(),
                    });
                }
            }
            info!(
                room = %self.name,
                initiator = %initiator.name(),
                target = %target.name(),
                %reason,
                "vote-kick started"
            );
            inner.vote = Some(VoteKick {
                initiator: initiator.id(),
                target,
                generation,
                _timeout: timeout,
            });
            Ok(())
        })
    }

    pub fn vote_kick_answer(&self, client: &ClientSession, accepted: bool) -> Result<(), RoomError> {
        self.guarded(Some(client), "vote_kick_answer", |inner| {
            let Some(vote) = inner.vote.as_ref() else {
                return Err(RoomError::NoVoteInProgress);
            };
            if vote.target.id() == client.id() {
                return Err(RoomError::InvalidTarget(client.id()));
            }
            if !self.is_member(inner, client) || !client.roles().is_player() {
                return Err(RoomError::NotPlayer(client.id()));
            }
            {
                let mut data = client.data();
                if data.vote != VoteKickAnswer::NotVoted {
                    return Err(RoomError::AlreadyVoted(client.id()));
                }
                data.vote = if accepted {
                    VoteKickAnswer::Accepted
                } else {
                    VoteKickAnswer::Rejected
                };
            }
            debug!(room = %self.name, client = %client.name(), accepted, "vote-kick answer");
            self.evaluate_vote(inner);
            Ok(())
        })
    }

    /// Resolves the vote once every non-target player answered.
    fn evaluate_vote(&self, inner: &mut RoomInner) {
        let Some(vote) = inner.vote.as_ref() else {
            return;
        };
        let target_id = vote.target.id();
        let answers: Vec<VoteKickAnswer> = inner
            .players()
            .iter()
            .filter(|p| p.id() != target_id)
            .map(|p| p.data().vote)
            .collect();
        if answers.contains(&VoteKickAnswer::NotVoted) {
            return;
        }
        let passed = answers.iter().all(|a| *a == VoteKickAnswer::Accepted);
        let Some(vote) = inner.vote.take() else {
            return;
        };
        inner.reset_votes();
        if passed {
            info!(
                room = %self.name,
                target = %vote.target.name(),
                initiator = %vote.initiator,
                "vote-kick passed"
            );
            if let Err(err) = self.leave_locked(inner, &vote.target) {
                warn!(room = %self.name, %err, "vote-kick eviction failed");
            }
        } else {
            info!(room = %self.name, target = %vote.target.name(), "vote-kick rejected");
        }
    }

    fn vote_timed_out(&self, generation: u64) {
        let mut inner = self.lock();
        if inner.vote.as_ref().map(|v| v.generation) != Some(generation) {
            return;
        }
        inner.vote = None;
        inner.reset_votes();
        info!(room = %self.name, "vote-kick timed out");
    }

    // -- Queries --------------------------------------------------------------

    pub fn state(&self) -> RoomState {
        self.lock().state
    }

    pub fn options(&self) -> GameOptions {
        self.lock().options.clone()
    }

    pub fn members(&self) -> Vec<Arc<ClientSession>> {
        self.lock().members.clone()
    }

    pub fn players(&self) -> Vec<Arc<ClientSession>> {
        self.lock().players()
    }

    pub fn spectators(&self) -> Vec<Arc<ClientSession>> {
        self.lock()
            .members
            .iter()
            .filter(|m| m.roles().is_spectator())
            .cloned()
            .collect()
    }

    pub fn game_master(&self) -> Option<Arc<ClientSession>> {
        self.lock().game_master().cloned()
    }

    pub fn player_count(&self) -> usize {
        self.lock().player_count()
    }

    pub fn spectator_count(&self) -> usize {
        self.lock().spectator_count()
    }

    pub fn win_list(&self) -> Vec<WinEntry> {
        self.lock().win_list.clone()
    }

    /// Statistics of the running match, or of the last one.
    pub fn statistics(&self) -> GameStatistics {
        self.lock().build_statistics(self.id)
    }

    /// Whether a vote-kick is in flight.
    pub fn has_vote(&self) -> bool {
        self.lock().vote.is_some()
    }

    /// Pending gameplay actions.
    pub fn queued_actions(&self) -> usize {
        self.queue.len()
    }

    pub fn summary(&self) -> RoomSummary {
        let inner = self.lock();
        RoomSummary {
            id: self.id,
            name: self.name.clone(),
            rule: self.rule,
            state: inner.state,
            player_count: inner.player_count(),
            max_players: self.config.max_players,
            spectator_count: inner.spectator_count(),
            max_spectators: self.config.max_spectators,
            has_password: self.has_password(),
        }
    }
}

/// A member currently playing the match.
fn playing_target(inner: &RoomInner, target: ClientId) -> Result<Arc<ClientSession>, RoomError> {
    inner
        .member(target)
        .filter(|m| m.state() == ClientState::Playing)
        .cloned()
        .ok_or(RoomError::InvalidTarget(target))
}

impl fmt::Debug for GameRoom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameRoom")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("rule", &self.rule)
            .finish_non_exhaustive()
    }
}
