//! `Server` builder, inbound dispatch and the liveness watchdog.
//!
//! This is the entry point Hosts call into. It ties the layers together:
//! Host → Server (identity by connection) → GameRoom → callbacks → Host.
//!
//! Lock order is client registry → admin registry → room registry → room →
//! session data. Registry locks are only held to look up, add or remove;
//! every fan-out works on a snapshot taken after the lock is released.

use std::net::IpAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use rand::seq::IndexedRandom;
use tetriforge_protocol::{
    AdminCallback, AdminId, AdminNotification, AdminSummary, BanEntry, ClientCallback, ClientId,
    ClientNotification, ClientState, ClientSummary, ConnectResult, ConnectionId, GameCreateResult,
    GameJoinResult, GameOptions, GameRules, Grid, LeaveReason, Placement, RoomId, RoomSummary,
    Special,
};
use tetriforge_room::{GameRoom, RoomError, RoomRegistry};
use tetriforge_session::{
    AdminAuthenticator, AdminRegistry, AdminSession, BanList, ClientRegistry, ClientSession,
    DenyAll, Liveness, LivenessCheck, MemoryBanList, Session, SessionError, is_valid_name,
};
use tetriforge_timer::TimerService;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::{Host, ServerConfig, TetriforgeError};

/// How long [`Server::stop`] waits for each room's action queue to drain.
const ROOM_STOP_TIMEOUT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for a [`Server`].
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use tetriforge::{ServerBuilder, ServerConfig};
/// use tetriforge_session::PasswordAuthenticator;
///
/// # async fn run() -> Result<(), tetriforge::TetriforgeError> {
/// let server = ServerBuilder::new()
///     .config(ServerConfig::from_json_file("tetriforge.json")?)
///     .authenticator(Arc::new(PasswordAuthenticator::new("secret")))
///     .build(tokio::runtime::Handle::current());
/// server.start()?;
/// // ... Hosts call into `server` ...
/// server.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct ServerBuilder {
    config: ServerConfig,
    ban_list: Option<Arc<dyn BanList>>,
    authenticator: Option<Arc<dyn AdminAuthenticator>>,
    hosts: Vec<Arc<dyn Host>>,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            ban_list: None,
            authenticator: None,
            hosts: Vec::new(),
        }
    }

    /// Sets the configuration. Out-of-range values are clamped on build.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Defaults to an empty [`MemoryBanList`].
    pub fn ban_list(mut self, ban_list: Arc<dyn BanList>) -> Self {
        self.ban_list = Some(ban_list);
        self
    }

    /// Defaults to [`DenyAll`].
    pub fn authenticator(mut self, authenticator: Arc<dyn AdminAuthenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn host(mut self, host: Arc<dyn Host>) -> Self {
        self.hosts.push(host);
        self
    }

    /// Builds a stopped server whose tasks run on `runtime`.
    pub fn build(self, runtime: Handle) -> Arc<Server> {
        let config = self.config.validated();
        Arc::new(Server {
            timers: TimerService::new(runtime.clone()),
            runtime,
            ban_list: self
                .ban_list
                .unwrap_or_else(|| Arc::new(MemoryBanList::new())),
            authenticator: self.authenticator.unwrap_or_else(|| Arc::new(DenyAll)),
            hosts: self.hosts,
            clients: Mutex::new(ClientRegistry::new(config.max_clients)),
            admins: Mutex::new(AdminRegistry::new(config.max_admins)),
            rooms: Mutex::new(RoomRegistry::new(config.max_rooms)),
            run: Mutex::new(RunState::default()),
            config,
        })
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

struct Watchdog {
    token: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct RunState {
    started: bool,
    watchdog: Option<Watchdog>,
}

/// The session server.
///
/// Every inbound method takes the Host-assigned [`ConnectionId`] of the
/// caller and refreshes that session's liveness.
pub struct Server {
    config: ServerConfig,
    runtime: Handle,
    timers: TimerService,
    ban_list: Arc<dyn BanList>,
    authenticator: Arc<dyn AdminAuthenticator>,
    hosts: Vec<Arc<dyn Host>>,
    clients: Mutex<ClientRegistry>,
    admins: Mutex<AdminRegistry>,
    rooms: Mutex<RoomRegistry>,
    run: Mutex<RunState>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        lock(&self.run).started
    }

    pub fn ban_list(&self) -> &Arc<dyn BanList> {
        &self.ban_list
    }

    pub fn client_count(&self) -> usize {
        self.clients().len()
    }

    pub fn admin_count(&self) -> usize {
        self.admins().len()
    }

    pub fn rooms(&self) -> Vec<Arc<GameRoom>> {
        self.room_registry().rooms()
    }

    pub fn room_by_name(&self, name: &str) -> Option<Arc<GameRoom>> {
        self.room_registry().by_name(name)
    }

    pub fn client_by_name(&self, name: &str) -> Option<Arc<ClientSession>> {
        self.clients().by_name(name)
    }

    fn clients(&self) -> MutexGuard<'_, ClientRegistry> {
        lock(&self.clients)
    }

    fn admins(&self) -> MutexGuard<'_, AdminRegistry> {
        lock(&self.admins)
    }

    fn room_registry(&self) -> MutexGuard<'_, RoomRegistry> {
        lock(&self.rooms)
    }

    // -- Lifecycle ------------------------------------------------------------

    /// Starts the hosts, creates the preset rooms and the watchdog.
    ///
    /// # Errors
    /// - [`TetriforgeError::AlreadyStarted`] on a second call
    /// - [`TetriforgeError::NoHostStarted`] when hosts are registered and
    ///   every one of them failed
    pub fn start(self: &Arc<Self>) -> Result<(), TetriforgeError> {
        let mut run = lock(&self.run);
        if run.started {
            return Err(TetriforgeError::AlreadyStarted);
        }

        if !self.hosts.is_empty() {
            let mut started = 0;
            for host in &self.hosts {
                match host.start() {
                    Ok(()) => {
                        info!(host = host.name(), "host started");
                        started += 1;
                    }
                    Err(err) => warn!(host = host.name(), %err, "host failed to start"),
                }
            }
            if started == 0 {
                error!(hosts = self.hosts.len(), "no host could be started");
                return Err(TetriforgeError::NoHostStarted);
            }
        }

        for preset in &self.config.rooms {
            match self.create_room(&preset.name, preset.password.clone(), preset.rule) {
                Ok(room) => info!(room = %room.name(), rule = ?room.rule(), "preset room created"),
                Err(err) => warn!(room = %preset.name, %err, "preset room skipped"),
            }
        }

        let token = CancellationToken::new();
        let task = self.runtime.spawn(watchdog(
            Arc::downgrade(self),
            token.clone(),
            self.config.watchdog_period,
        ));
        run.watchdog = Some(Watchdog { token, task });
        run.started = true;
        info!(
            max_clients = self.config.max_clients,
            max_rooms = self.config.max_rooms,
            "server started"
        );
        Ok(())
    }

    /// Stops the watchdog, tells everyone, stops every room and host.
    pub async fn stop(&self) -> Result<(), TetriforgeError> {
        let watchdog = {
            let mut run = lock(&self.run);
            if !run.started {
                return Err(TetriforgeError::NotStarted);
            }
            run.started = false;
            run.watchdog.take()
        };
        if let Some(watchdog) = watchdog {
            watchdog.token.cancel();
            if let Err(err) = watchdog.task.await {
                warn!(%err, "watchdog task ended abnormally");
            }
        }

        let clients = self.clients().snapshot();
        let admins = self.admins().snapshot();
        for client in &clients {
            client.notify(ClientNotification::ServerStopped);
        }
        for admin in &admins {
            admin.notify(AdminNotification::ServerStopped);
        }

        let rooms = {
            let mut registry = self.room_registry();
            let rooms = registry.rooms();
            registry.clear();
            rooms
        };
        for room in &rooms {
            if let Err(err) = room.stop() {
                debug!(room = %room.name(), %err, "room already stopped");
            }
        }
        for room in &rooms {
            if !room.wait_stopped(ROOM_STOP_TIMEOUT).await {
                warn!(room = %room.name(), "room queue did not stop in time");
            }
        }

        self.clients().clear();
        self.admins().clear();
        for host in &self.hosts {
            host.stop();
            debug!(host = host.name(), "host stopped");
        }
        info!(
            clients = clients.len(),
            admins = admins.len(),
            rooms = rooms.len(),
            "server stopped"
        );
        Ok(())
    }

    // -- Watchdog -------------------------------------------------------------

    /// One liveness pass over every session.
    fn watch(&self) {
        let now = Instant::now();
        let check = |liveness: &Liveness| {
            liveness.check(
                now,
                self.config.timeout_delay,
                self.config.heartbeat_delay,
                self.config.max_timeout_count,
            )
        };

        let clients = self.clients().snapshot();
        let mut dropped_clients = Vec::new();
        for client in clients {
            match check(client.liveness()) {
                LivenessCheck::Alive => {}
                LivenessCheck::Heartbeat => client.notify(ClientNotification::Heartbeat),
                LivenessCheck::TimedOut => {
                    dropped_clients.push((client.connection(), LeaveReason::Timeout))
                }
                LivenessCheck::ConnectionLost => {
                    dropped_clients.push((client.connection(), LeaveReason::ConnectionLost))
                }
            }
        }
        let admins = self.admins().snapshot();
        let mut dropped_admins = Vec::new();
        for admin in admins {
            match check(admin.liveness()) {
                LivenessCheck::Alive => {}
                LivenessCheck::Heartbeat => admin.notify(AdminNotification::Heartbeat),
                LivenessCheck::TimedOut => {
                    dropped_admins.push((admin.connection(), LeaveReason::Timeout))
                }
                LivenessCheck::ConnectionLost => {
                    dropped_admins.push((admin.connection(), LeaveReason::ConnectionLost))
                }
            }
        }

        for (connection, reason) in dropped_clients {
            self.remove_client(connection, reason);
        }
        for (connection, reason) in dropped_admins {
            self.remove_admin(connection, reason);
        }
    }

    // -- Fan-out --------------------------------------------------------------

    fn broadcast_clients(&self, except: Option<ClientId>, notification: ClientNotification) {
        let clients = self.clients().snapshot();
        for client in clients {
            if Some(client.id()) != except {
                client.notify(notification.clone());
            }
        }
    }

    fn broadcast_admins(&self, except: Option<AdminId>, notification: AdminNotification) {
        let admins = self.admins().snapshot();
        for admin in admins {
            if Some(admin.id()) != except {
                admin.notify(notification.clone());
            }
        }
    }

    fn announce_room_created(&self, room: &GameRoom) {
        let summary = room.summary();
        self.broadcast_clients(
            None,
            ClientNotification::RoomCreated {
                room: summary.clone(),
            },
        );
        self.broadcast_admins(None, AdminNotification::RoomCreated { room: summary });
    }

    // -- Lookups --------------------------------------------------------------

    /// Resolves the caller and records its inbound traffic.
    fn client(&self, connection: ConnectionId) -> Result<Arc<ClientSession>, TetriforgeError> {
        let client = self.clients().by_connection(connection);
        match client {
            Some(client) => {
                client.liveness().touch_inbound();
                Ok(client)
            }
            None => {
                debug!(%connection, "call from unknown client connection");
                Err(SessionError::NotFound(connection).into())
            }
        }
    }

    fn admin(&self, connection: ConnectionId) -> Result<Arc<AdminSession>, TetriforgeError> {
        let admin = self.admins().by_connection(connection);
        match admin {
            Some(admin) => {
                admin.liveness().touch_inbound();
                Ok(admin)
            }
            None => {
                debug!(%connection, "call from unknown admin connection");
                Err(SessionError::NotFound(connection).into())
            }
        }
    }

    fn room(&self, id: RoomId) -> Result<Arc<GameRoom>, TetriforgeError> {
        self.room_registry()
            .by_id(id)
            .ok_or_else(|| RoomError::NotFound(id).into())
    }

    /// The room the client is in.
    fn room_of(&self, client: &ClientSession) -> Result<Arc<GameRoom>, TetriforgeError> {
        let id = client.room().ok_or(RoomError::NotMember(client.id()))?;
        self.room(id)
    }

    fn client_in_room(
        &self,
        connection: ConnectionId,
    ) -> Result<(Arc<ClientSession>, Arc<GameRoom>), TetriforgeError> {
        let client = self.client(connection)?;
        let room = self.room_of(&client)?;
        Ok((client, room))
    }

    // -- Removal --------------------------------------------------------------

    /// Drops a client. A kicked or banned client is told first, then it
    /// leaves its room and everyone else is told.
    fn remove_client(
        &self,
        connection: ConnectionId,
        reason: LeaveReason,
    ) -> Option<Arc<ClientSession>> {
        let client = self.clients().remove(connection)?;
        let notification = ClientNotification::ClientDisconnected {
            client: client.id(),
            name: client.name().to_owned(),
            reason,
        };
        if matches!(reason, LeaveReason::Kick | LeaveReason::Ban) {
            client.notify(notification.clone());
        }
        if let Ok(room) = self.room_of(&client) {
            if let Err(err) = room.leave(&client) {
                debug!(client = %client.name(), %err, "leave on disconnect failed");
            }
        }
        self.broadcast_clients(None, notification);
        self.broadcast_admins(
            None,
            AdminNotification::ClientDisconnected {
                client: client.id(),
                name: client.name().to_owned(),
                reason,
            },
        );
        info!(client = %client.name(), id = %client.id(), %reason, "client disconnected");
        Some(client)
    }

    fn remove_admin(&self, connection: ConnectionId, reason: LeaveReason) -> Option<Arc<AdminSession>> {
        let admin = self.admins().remove(connection)?;
        self.broadcast_clients(
            None,
            ClientNotification::AdminDisconnected {
                admin: admin.id(),
                name: admin.name().to_owned(),
                reason,
            },
        );
        self.broadcast_admins(
            None,
            AdminNotification::AdminDisconnected {
                admin: admin.id(),
                name: admin.name().to_owned(),
                reason,
            },
        );
        info!(admin = %admin.name(), id = %admin.id(), %reason, "admin disconnected");
        Some(admin)
    }

    // -- Rooms ----------------------------------------------------------------

    /// Creates, registers and starts a room.
    fn create_room(
        &self,
        name: &str,
        password: Option<String>,
        rule: GameRules,
    ) -> Result<Arc<GameRoom>, RoomError> {
        let room = GameRoom::new(
            name,
            password,
            rule,
            self.config.room.clone(),
            self.timers.clone(),
        );
        self.room_registry().add(Arc::clone(&room))?;
        room.start()?;
        Ok(room)
    }

    /// Maps a room creation failure onto the reply code.
    fn create_failure(err: &RoomError) -> GameCreateResult {
        match err {
            RoomError::TooManyRooms(_) => GameCreateResult::FailedTooManyRooms,
            RoomError::NameAlreadyUsed(_) => GameCreateResult::FailedNameAlreadyUsed,
            _ => GameCreateResult::FailedInvalidName,
        }
    }

    /// Removes and stops a room; members are evicted with `GameLeft`.
    fn delete_room(&self, id: RoomId) -> Result<Arc<GameRoom>, TetriforgeError> {
        let room = self
            .room_registry()
            .remove(id)
            .ok_or(RoomError::NotFound(id))?;
        if let Err(err) = room.stop() {
            debug!(room = %room.name(), %err, "deleted room was not running");
        }
        self.broadcast_clients(
            None,
            ClientNotification::RoomDeleted {
                room: id,
                name: room.name().to_owned(),
            },
        );
        self.broadcast_admins(
            None,
            AdminNotification::RoomDeleted {
                room: id,
                name: room.name().to_owned(),
            },
        );
        info!(room = %room.name(), "room deleted");
        Ok(room)
    }

    // =========================================================================
    // Client surface
    // =========================================================================

    /// Admits a client.
    ///
    /// Checked in order: server running, version, ban, name, registry.
    pub fn client_connect(
        &self,
        connection: ConnectionId,
        callback: Arc<ClientCallback>,
        address: IpAddr,
        version: &str,
        name: &str,
        team: &str,
    ) -> ConnectResult {
        let refused = if !self.is_started() {
            Some(ConnectResult::FailedServerStopped)
        } else if version != self.config.client_version {
            Some(ConnectResult::FailedIncompatibleVersion)
        } else if self.ban_list.is_banned(&address) {
            Some(ConnectResult::FailedBanned)
        } else if !is_valid_name(name) {
            Some(ConnectResult::FailedInvalidName)
        } else {
            None
        };
        if let Some(result) = refused {
            warn!(%connection, %address, name, version, ?result, "client refused");
            return result;
        }

        let client = Arc::new(ClientSession::new(connection, callback, address, name, team));
        if let Err(err) = self.clients().add(Arc::clone(&client)) {
            warn!(%connection, %address, name, %err, "client refused");
            return match err {
                SessionError::TooManySessions(_) => ConnectResult::FailedTooManySessions,
                SessionError::DuplicateConnection(_) => ConnectResult::FailedDuplicateConnection,
                _ => ConnectResult::FailedNameAlreadyUsed,
            };
        }

        self.broadcast_clients(
            Some(client.id()),
            ClientNotification::ClientConnected {
                client: client.id(),
                name: client.name().to_owned(),
                team: team.to_owned(),
            },
        );
        self.broadcast_admins(
            None,
            AdminNotification::ClientConnected {
                client: client.id(),
                name: client.name().to_owned(),
                team: team.to_owned(),
            },
        );
        info!(client = %client.name(), id = %client.id(), %address, "client connected");
        ConnectResult::Successful
    }

    pub fn client_disconnect(&self, connection: ConnectionId) -> Result<(), TetriforgeError> {
        self.remove_client(connection, LeaveReason::Disconnected)
            .map(|_| ())
            .ok_or_else(|| SessionError::NotFound(connection).into())
    }

    /// The Host lost the peer; applies to clients and admins.
    pub fn connection_lost(&self, connection: ConnectionId) {
        if self
            .remove_client(connection, LeaveReason::ConnectionLost)
            .is_none()
            && self
                .remove_admin(connection, LeaveReason::ConnectionLost)
                .is_none()
        {
            debug!(%connection, "lost connection had no session");
        }
    }

    pub fn client_heartbeat(&self, connection: ConnectionId) -> Result<(), TetriforgeError> {
        let client = self.client(connection)?;
        trace!(client = %client.name(), "heartbeat");
        Ok(())
    }

    pub fn client_send_private_message(
        &self,
        connection: ConnectionId,
        target: ClientId,
        message: &str,
    ) -> Result<(), TetriforgeError> {
        let client = self.client(connection)?;
        let target = self
            .clients()
            .by_id(target)
            .ok_or(TetriforgeError::UnknownClient(target))?;
        target.notify(ClientNotification::PrivateMessage {
            from: client.name().to_owned(),
            message: message.to_owned(),
        });
        debug!(from = %client.name(), to = %target.name(), "private message");
        Ok(())
    }

    /// Sends a message to every other client and to every admin.
    pub fn client_send_broadcast_message(
        &self,
        connection: ConnectionId,
        message: &str,
    ) -> Result<(), TetriforgeError> {
        let client = self.client(connection)?;
        self.broadcast_clients(
            Some(client.id()),
            ClientNotification::BroadcastMessage {
                from: client.name().to_owned(),
                message: message.to_owned(),
            },
        );
        self.broadcast_admins(
            None,
            AdminNotification::BroadcastMessage {
                from: client.name().to_owned(),
                message: message.to_owned(),
            },
        );
        debug!(from = %client.name(), "broadcast message");
        Ok(())
    }

    /// Refused while the client is playing a match.
    pub fn client_change_team(
        &self,
        connection: ConnectionId,
        team: &str,
    ) -> Result<(), TetriforgeError> {
        let client = self.client(connection)?;
        {
            let mut data = client.data();
            if data.state == ClientState::Playing {
                warn!(client = %client.name(), "team change refused while playing");
                return Err(TetriforgeError::TeamLocked(client.id()));
            }
            data.team = team.to_owned();
        }
        self.broadcast_clients(
            None,
            ClientNotification::TeamChanged {
                client: client.id(),
                team: team.to_owned(),
            },
        );
        info!(client = %client.name(), team, "team changed");
        Ok(())
    }

    pub fn client_get_room_list(
        &self,
        connection: ConnectionId,
    ) -> Result<Vec<RoomSummary>, TetriforgeError> {
        self.client(connection)?;
        Ok(self.rooms().iter().map(|r| r.summary()).collect())
    }

    pub fn client_get_client_list(
        &self,
        connection: ConnectionId,
    ) -> Result<Vec<ClientSummary>, TetriforgeError> {
        self.client(connection)?;
        Ok(self.client_summaries())
    }

    fn client_summaries(&self) -> Vec<ClientSummary> {
        self.clients()
            .snapshot()
            .iter()
            .map(|c| c.summary())
            .collect()
    }

    pub fn client_join_room(
        &self,
        connection: ConnectionId,
        room: RoomId,
        password: Option<&str>,
        as_spectator: bool,
    ) -> Result<GameJoinResult, TetriforgeError> {
        let client = self.client(connection)?;
        let found = self.room_registry().by_id(room);
        let Some(room) = found else {
            warn!(client = %client.name(), %room, "join refused, no such room");
            return Ok(GameJoinResult::FailedNotFound);
        };
        if !room.is_password_valid(password) {
            warn!(client = %client.name(), room = %room.name(), "join refused, wrong password");
            return Ok(GameJoinResult::FailedWrongPassword);
        }
        Ok(room.join(&client, as_spectator))
    }

    /// Joins a random password-less room with a free player slot.
    pub fn client_join_random_room(
        &self,
        connection: ConnectionId,
    ) -> Result<GameJoinResult, TetriforgeError> {
        let client = self.client(connection)?;
        let candidates: Vec<Arc<GameRoom>> = self
            .rooms()
            .into_iter()
            .filter(|room| {
                let summary = room.summary();
                !summary.has_password
                    && summary.state.is_joinable()
                    && summary.player_count < summary.max_players
            })
            .collect();
        let Some(room) = candidates.choose(&mut rand::rng()) else {
            debug!(client = %client.name(), "no room available for random join");
            return Ok(GameJoinResult::FailedNotFound);
        };
        debug!(client = %client.name(), room = %room.name(), candidates = candidates.len(), "random room picked");
        Ok(room.join(&client, false))
    }

    /// Creates a room, announces it and joins the creator.
    pub fn client_create_and_join_room(
        &self,
        connection: ConnectionId,
        name: &str,
        password: Option<String>,
        rule: GameRules,
        as_spectator: bool,
    ) -> Result<GameCreateResult, TetriforgeError> {
        let client = self.client(connection)?;
        if client.room().is_some() {
            warn!(client = %client.name(), "create refused, already in a room");
            return Ok(GameCreateResult::FailedAlreadyInGame);
        }
        if !is_valid_name(name) {
            warn!(client = %client.name(), name, "create refused, invalid room name");
            return Ok(GameCreateResult::FailedInvalidName);
        }
        let room = match self.create_room(name, password, rule) {
            Ok(room) => room,
            Err(err) => {
                warn!(client = %client.name(), name, %err, "create refused");
                return Ok(Self::create_failure(&err));
            }
        };
        let joined = room.join(&client, as_spectator);
        if !joined.is_success() {
            warn!(client = %client.name(), room = %room.name(), ?joined, "creator could not join, room dropped");
            self.room_registry().remove(room.id());
            if let Err(err) = room.stop() {
                debug!(room = %room.name(), %err, "dropped room was not running");
            }
            return Ok(match joined {
                GameJoinResult::FailedAlreadyInGame => GameCreateResult::FailedAlreadyInGame,
                other => GameCreateResult::FailedJoin(other),
            });
        }
        info!(client = %client.name(), room = %room.name(), ?rule, "room created");
        self.announce_room_created(&room);
        Ok(GameCreateResult::Successful)
    }

    pub fn client_leave_room(&self, connection: ConnectionId) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.leave(&client)?)
    }

    pub fn client_start_game(&self, connection: ConnectionId) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.start_game(Some(&*client))?)
    }

    pub fn client_stop_game(&self, connection: ConnectionId) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.stop_game(Some(&*client))?)
    }

    pub fn client_pause_game(&self, connection: ConnectionId) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.pause_game(Some(&*client))?)
    }

    pub fn client_resume_game(&self, connection: ConnectionId) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.resume_game(Some(&*client))?)
    }

    pub fn client_change_options(
        &self,
        connection: ConnectionId,
        options: GameOptions,
    ) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.change_options(Some(&*client), options)?)
    }

    pub fn client_reset_win_list(&self, connection: ConnectionId) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.reset_win_list(Some(&*client))?)
    }

    pub fn client_vote_kick(
        &self,
        connection: ConnectionId,
        target: ClientId,
        reason: &str,
    ) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.vote_kick(&client, target, reason)?)
    }

    pub fn client_vote_kick_answer(
        &self,
        connection: ConnectionId,
        accepted: bool,
    ) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.vote_kick_answer(&client, accepted)?)
    }

    pub fn client_place_piece(
        &self,
        connection: ConnectionId,
        placement: Placement,
        grid: Grid,
    ) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.place_piece(&client, placement, grid)?)
    }

    pub fn client_modify_grid(
        &self,
        connection: ConnectionId,
        grid: Grid,
    ) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.modify_grid(&client, grid)?)
    }

    pub fn client_use_special(
        &self,
        connection: ConnectionId,
        target: ClientId,
        special: Special,
    ) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.use_special(&client, target, special)?)
    }

    pub fn client_clear_lines(
        &self,
        connection: ConnectionId,
        count: u32,
    ) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.clear_lines(&client, count)?)
    }

    pub fn client_game_lost(&self, connection: ConnectionId) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.game_lost(&client)?)
    }

    pub fn client_finish_continuous_special(
        &self,
        connection: ConnectionId,
        special: Special,
    ) -> Result<(), TetriforgeError> {
        let (client, room) = self.client_in_room(connection)?;
        Ok(room.finish_continuous_special(&client, special)?)
    }

    /// Relays an achievement to every other client.
    pub fn client_earn_achievement(
        &self,
        connection: ConnectionId,
        achievement: u32,
        title: &str,
    ) -> Result<(), TetriforgeError> {
        let client = self.client(connection)?;
        self.broadcast_clients(
            Some(client.id()),
            ClientNotification::AchievementEarned {
                client: client.id(),
                achievement,
                title: title.to_owned(),
            },
        );
        info!(client = %client.name(), achievement, title, "achievement earned");
        Ok(())
    }

    // =========================================================================
    // Admin surface
    // =========================================================================

    /// Admits an administrator.
    ///
    /// Checked in order: server running, version, ban, name, credentials,
    /// registry.
    pub fn admin_connect(
        &self,
        connection: ConnectionId,
        callback: Arc<AdminCallback>,
        address: IpAddr,
        version: &str,
        name: &str,
        password: &str,
    ) -> ConnectResult {
        let refused = if !self.is_started() {
            Some(ConnectResult::FailedServerStopped)
        } else if version != self.config.client_version {
            Some(ConnectResult::FailedIncompatibleVersion)
        } else if self.ban_list.is_banned(&address) {
            Some(ConnectResult::FailedBanned)
        } else if !is_valid_name(name) {
            Some(ConnectResult::FailedInvalidName)
        } else if let Err(err) = self.authenticator.authenticate(name, password) {
            warn!(%connection, %address, name, %err, "admin authentication failed");
            Some(ConnectResult::FailedWrongPassword)
        } else {
            None
        };
        if let Some(result) = refused {
            warn!(%connection, %address, name, ?result, "admin refused");
            return result;
        }

        let admin = Arc::new(AdminSession::new(connection, callback, address, name));
        if let Err(err) = self.admins().add(Arc::clone(&admin)) {
            warn!(%connection, %address, name, %err, "admin refused");
            return match err {
                SessionError::TooManySessions(_) => ConnectResult::FailedTooManySessions,
                SessionError::DuplicateConnection(_) => ConnectResult::FailedDuplicateConnection,
                _ => ConnectResult::FailedNameAlreadyUsed,
            };
        }

        self.broadcast_clients(
            None,
            ClientNotification::AdminConnected {
                admin: admin.id(),
                name: admin.name().to_owned(),
            },
        );
        self.broadcast_admins(
            Some(admin.id()),
            AdminNotification::AdminConnected {
                admin: admin.id(),
                name: admin.name().to_owned(),
            },
        );
        info!(admin = %admin.name(), id = %admin.id(), %address, "admin connected");
        ConnectResult::Successful
    }

    pub fn admin_disconnect(&self, connection: ConnectionId) -> Result<(), TetriforgeError> {
        self.remove_admin(connection, LeaveReason::Disconnected)
            .map(|_| ())
            .ok_or_else(|| SessionError::NotFound(connection).into())
    }

    pub fn admin_heartbeat(&self, connection: ConnectionId) -> Result<(), TetriforgeError> {
        let admin = self.admin(connection)?;
        trace!(admin = %admin.name(), "heartbeat");
        Ok(())
    }

    pub fn admin_send_private_admin_message(
        &self,
        connection: ConnectionId,
        target: AdminId,
        message: &str,
    ) -> Result<(), TetriforgeError> {
        let admin = self.admin(connection)?;
        let target = self
            .admins()
            .by_id(target)
            .ok_or(TetriforgeError::UnknownAdmin(target))?;
        target.notify(AdminNotification::PrivateAdminMessage {
            from: admin.name().to_owned(),
            message: message.to_owned(),
        });
        Ok(())
    }

    pub fn admin_send_private_message(
        &self,
        connection: ConnectionId,
        target: ClientId,
        message: &str,
    ) -> Result<(), TetriforgeError> {
        let admin = self.admin(connection)?;
        let target = self
            .clients()
            .by_id(target)
            .ok_or(TetriforgeError::UnknownClient(target))?;
        target.notify(ClientNotification::PrivateMessage {
            from: admin.name().to_owned(),
            message: message.to_owned(),
        });
        Ok(())
    }

    /// Sends a message to every client and every other admin.
    pub fn admin_send_broadcast_message(
        &self,
        connection: ConnectionId,
        message: &str,
    ) -> Result<(), TetriforgeError> {
        let admin = self.admin(connection)?;
        self.broadcast_clients(
            None,
            ClientNotification::BroadcastMessage {
                from: admin.name().to_owned(),
                message: message.to_owned(),
            },
        );
        self.broadcast_admins(
            Some(admin.id()),
            AdminNotification::BroadcastMessage {
                from: admin.name().to_owned(),
                message: message.to_owned(),
            },
        );
        Ok(())
    }

    pub fn admin_get_admin_list(
        &self,
        connection: ConnectionId,
    ) -> Result<Vec<AdminSummary>, TetriforgeError> {
        self.admin(connection)?;
        Ok(self
            .admins()
            .snapshot()
            .iter()
            .map(|a| a.summary())
            .collect())
    }

    pub fn admin_get_client_list(
        &self,
        connection: ConnectionId,
    ) -> Result<Vec<ClientSummary>, TetriforgeError> {
        self.admin(connection)?;
        Ok(self.client_summaries())
    }

    pub fn admin_get_client_list_in_room(
        &self,
        connection: ConnectionId,
        room: RoomId,
    ) -> Result<Vec<ClientSummary>, TetriforgeError> {
        self.admin(connection)?;
        let room = self.room(room)?;
        Ok(room.members().iter().map(|m| m.summary()).collect())
    }

    pub fn admin_get_room_list(
        &self,
        connection: ConnectionId,
    ) -> Result<Vec<RoomSummary>, TetriforgeError> {
        self.admin(connection)?;
        Ok(self.rooms().iter().map(|r| r.summary()).collect())
    }

    pub fn admin_get_banned_list(
        &self,
        connection: ConnectionId,
    ) -> Result<Vec<BanEntry>, TetriforgeError> {
        self.admin(connection)?;
        Ok(self.ban_list.entries())
    }

    pub fn admin_create_room(
        &self,
        connection: ConnectionId,
        name: &str,
        password: Option<String>,
        rule: GameRules,
    ) -> Result<GameCreateResult, TetriforgeError> {
        let admin = self.admin(connection)?;
        if !is_valid_name(name) {
            warn!(admin = %admin.name(), name, "create refused, invalid room name");
            return Ok(GameCreateResult::FailedInvalidName);
        }
        match self.create_room(name, password, rule) {
            Ok(room) => {
                info!(admin = %admin.name(), room = %room.name(), ?rule, "room created");
                self.announce_room_created(&room);
                Ok(GameCreateResult::Successful)
            }
            Err(err) => {
                warn!(admin = %admin.name(), name, %err, "create refused");
                Ok(Self::create_failure(&err))
            }
        }
    }

    pub fn admin_delete_room(
        &self,
        connection: ConnectionId,
        room: RoomId,
    ) -> Result<(), TetriforgeError> {
        let admin = self.admin(connection)?;
        let room = self.delete_room(room)?;
        info!(admin = %admin.name(), room = %room.name(), "room deleted by admin");
        Ok(())
    }

    pub fn admin_kick(&self, connection: ConnectionId, target: ClientId) -> Result<(), TetriforgeError> {
        let admin = self.admin(connection)?;
        let target = self
            .clients()
            .by_id(target)
            .ok_or(TetriforgeError::UnknownClient(target))?;
        info!(admin = %admin.name(), client = %target.name(), "client kicked");
        self.remove_client(target.connection(), LeaveReason::Kick);
        Ok(())
    }

    /// Bans the client's address, then removes the client.
    pub fn admin_ban(
        &self,
        connection: ConnectionId,
        target: ClientId,
        reason: &str,
    ) -> Result<(), TetriforgeError> {
        let admin = self.admin(connection)?;
        let target = self
            .clients()
            .by_id(target)
            .ok_or(TetriforgeError::UnknownClient(target))?;
        self.ban_list.ban(BanEntry {
            address: target.address(),
            name: target.name().to_owned(),
            reason: reason.to_owned(),
        });
        info!(
            admin = %admin.name(),
            client = %target.name(),
            address = %target.address(),
            reason,
            "client banned"
        );
        self.remove_client(target.connection(), LeaveReason::Ban);
        Ok(())
    }

    /// Returns `true` if the address was banned.
    pub fn admin_unban(
        &self,
        connection: ConnectionId,
        address: IpAddr,
    ) -> Result<bool, TetriforgeError> {
        let admin = self.admin(connection)?;
        let removed = self.ban_list.unban(&address);
        info!(admin = %admin.name(), %address, removed, "address unbanned");
        Ok(removed)
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("started", &self.is_started())
            .field("clients", &self.client_count())
            .field("admins", &self.admin_count())
            .field("hosts", &self.hosts.len())
            .finish_non_exhaustive()
    }
}

/// Runs [`Server::watch`] every `period` until cancelled or the server is
/// dropped.
async fn watchdog(server: Weak<Server>, token: CancellationToken, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    debug!(?period, "watchdog running");
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(server) = server.upgrade() else {
            break;
        };
        server.watch();
    }
    debug!("watchdog exited");
}
