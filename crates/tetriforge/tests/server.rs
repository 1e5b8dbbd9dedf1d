//! Integration tests for the server: admission, dispatch, fan-out, admin
//! commands and the liveness watchdog.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tetriforge::prelude::*;
use tetriforge::PresetRoom;
use tetriforge_protocol::{
    BanEntry, ClientState, GameCreateResult, GameFinishedReason, GameJoinResult, LeaveReason,
};
use tetriforge_room::{RoomError, SeedSource};
use tetriforge_session::{BanList, MemoryBanList, PasswordAuthenticator, Session, SessionError};
use tokio::runtime::Handle;
use tokio::sync::mpsc;

// =========================================================================
// Mocks and helpers
// =========================================================================

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

const VERSION: &str = "1.13";
const ADMIN_PASSWORD: &str = "hunter2";

fn next_connection() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed))
}

fn localhost() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// A Host that only records whether it was started and stopped.
#[derive(Default)]
struct MockHost {
    fail: bool,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl MockHost {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

impl Host for MockHost {
    fn name(&self) -> &str {
        if self.fail { "broken" } else { "mock" }
    }

    fn start(&self) -> Result<(), HostError> {
        if self.fail {
            return Err(HostError::Failure("bind failed".into()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

struct Client {
    conn: ConnectionId,
    rx: mpsc::UnboundedReceiver<ClientNotification>,
}

impl Client {
    /// Everything received so far, heartbeats excluded.
    fn drain(&mut self) -> Vec<ClientNotification> {
        let mut received = Vec::new();
        while let Ok(notification) = self.rx.try_recv() {
            if notification != ClientNotification::Heartbeat {
                received.push(notification);
            }
        }
        received
    }
}

struct Admin {
    conn: ConnectionId,
    rx: mpsc::UnboundedReceiver<AdminNotification>,
}

impl Admin {
    fn drain(&mut self) -> Vec<AdminNotification> {
        let mut received = Vec::new();
        while let Ok(notification) = self.rx.try_recv() {
            if notification != AdminNotification::Heartbeat {
                received.push(notification);
            }
        }
        received
    }
}

fn config() -> ServerConfig {
    let mut config = ServerConfig {
        client_version: VERSION.to_owned(),
        ..ServerConfig::default()
    };
    config.room.seed = SeedSource::Fixed(7);
    config
}

fn builder(config: ServerConfig) -> ServerBuilder {
    Server::builder()
        .config(config)
        .authenticator(Arc::new(PasswordAuthenticator::new(ADMIN_PASSWORD)))
}

fn started(config: ServerConfig) -> Arc<Server> {
    let server = builder(config).build(Handle::current());
    server.start().unwrap();
    server
}

fn try_connect(server: &Server, name: &str) -> (ConnectResult, Client) {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = next_connection();
    let result = server.client_connect(conn, Arc::new(tx), localhost(), VERSION, name, "");
    (result, Client { conn, rx })
}

fn connect(server: &Server, name: &str) -> Client {
    let (result, client) = try_connect(server, name);
    assert_eq!(result, ConnectResult::Successful);
    client
}

fn connect_admin(server: &Server, name: &str) -> Admin {
    let (tx, rx) = mpsc::unbounded_channel();
    let conn = next_connection();
    let result =
        server.admin_connect(conn, Arc::new(tx), localhost(), VERSION, name, ADMIN_PASSWORD);
    assert_eq!(result, ConnectResult::Successful);
    Admin { conn, rx }
}

fn client_id(server: &Server, name: &str) -> tetriforge_protocol::ClientId {
    server.client_by_name(name).unwrap().summary().id
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// =========================================================================
// Lifecycle
// =========================================================================

#[tokio::test]
async fn test_start_twice_returns_already_started() {
    let server = started(config());
    assert!(matches!(
        server.start(),
        Err(TetriforgeError::AlreadyStarted)
    ));
    server.stop().await.unwrap();
    assert!(matches!(server.stop().await, Err(TetriforgeError::NotStarted)));
}

#[tokio::test]
async fn test_start_every_host_failing_returns_no_host_started() {
    let server = builder(config())
        .host(Arc::new(MockHost::failing()))
        .build(Handle::current());
    assert!(matches!(
        server.start(),
        Err(TetriforgeError::NoHostStarted)
    ));
    assert!(!server.is_started());
}

#[tokio::test]
async fn test_start_one_working_host_is_enough() {
    let host = Arc::new(MockHost::default());
    let server = builder(config())
        .host(Arc::new(MockHost::failing()))
        .host(host.clone())
        .build(Handle::current());
    server.start().unwrap();
    assert!(host.started.load(Ordering::SeqCst));

    server.stop().await.unwrap();
    assert!(host.stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_start_creates_preset_rooms() {
    let mut config = config();
    config.rooms = vec![
        PresetRoom {
            name: "lobby".into(),
            password: None,
            rule: GameRules::Standard,
        },
        PresetRoom {
            name: "LOBBY".into(),
            password: None,
            rule: GameRules::Classic,
        },
        PresetRoom {
            name: "pros".into(),
            password: Some("x".into()),
            rule: GameRules::Extended,
        },
    ];
    let server = started(config);

    // The duplicate name is skipped.
    assert_eq!(server.rooms().len(), 2);
    let pros = server.room_by_name("pros").unwrap();
    assert!(pros.has_password());
    assert_eq!(pros.rule(), GameRules::Extended);
    assert!(pros.state().is_joinable());
}

#[tokio::test]
async fn test_stop_notifies_everyone_and_clears() {
    let server = started(config());
    let mut alice = connect(&server, "alice");
    let mut root = connect_admin(&server, "root");
    server
        .client_create_and_join_room(alice.conn, "lobby", None, GameRules::Standard, false)
        .unwrap();
    let room = server.room_by_name("lobby").unwrap();

    server.stop().await.unwrap();

    let received = alice.drain();
    assert!(received.contains(&ClientNotification::ServerStopped));
    assert!(received.contains(&ClientNotification::GameLeft));
    assert!(root.drain().contains(&AdminNotification::ServerStopped));
    assert_eq!(server.client_count(), 0);
    assert_eq!(server.admin_count(), 0);
    assert!(server.rooms().is_empty());
    assert!(room.members().is_empty());

    let (result, _) = try_connect(&server, "bob");
    assert_eq!(result, ConnectResult::FailedServerStopped);
}

// =========================================================================
// Client admission
// =========================================================================

#[tokio::test]
async fn test_connect_before_start_returns_server_stopped() {
    let server = builder(config()).build(Handle::current());
    let (result, _) = try_connect(&server, "alice");
    assert_eq!(result, ConnectResult::FailedServerStopped);
}

#[tokio::test]
async fn test_connect_wrong_version_refused() {
    let server = started(config());
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = server.client_connect(next_connection(), Arc::new(tx), localhost(), "1.0", "alice", "");
    assert_eq!(result, ConnectResult::FailedIncompatibleVersion);
    assert_eq!(server.client_count(), 0);
}

#[tokio::test]
async fn test_connect_banned_address_refused() {
    let bans = Arc::new(MemoryBanList::new());
    bans.ban(BanEntry {
        address: localhost(),
        name: "troll".into(),
        reason: "spam".into(),
    });
    let server = builder(config()).ban_list(bans).build(Handle::current());
    server.start().unwrap();

    let (result, _) = try_connect(&server, "alice");
    assert_eq!(result, ConnectResult::FailedBanned);
}

#[tokio::test]
async fn test_connect_invalid_names_refused() {
    let server = started(config());
    for name in ["", "   ", "a\tb", "abcdefghijklmnopqrstuvwxyz"] {
        let (result, _) = try_connect(&server, name);
        assert_eq!(result, ConnectResult::FailedInvalidName, "{name:?}");
    }
}

#[tokio::test]
async fn test_connect_duplicate_name_refused_case_insensitive() {
    let server = started(config());
    let _alice = connect(&server, "alice");
    let (result, _) = try_connect(&server, "ALICE");
    assert_eq!(result, ConnectResult::FailedNameAlreadyUsed);
    assert_eq!(server.client_count(), 1);
}

#[tokio::test]
async fn test_connect_duplicate_connection_refused() {
    let server = started(config());
    let alice = connect(&server, "alice");
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = server.client_connect(alice.conn, Arc::new(tx), localhost(), VERSION, "bob", "");
    assert_eq!(result, ConnectResult::FailedDuplicateConnection);
}

#[tokio::test]
async fn test_connect_over_capacity_refused() {
    let server = started(ServerConfig {
        max_clients: 1,
        ..config()
    });
    let _alice = connect(&server, "alice");
    let (result, _) = try_connect(&server, "bob");
    assert_eq!(result, ConnectResult::FailedTooManySessions);
}

#[tokio::test]
async fn test_connect_announced_to_others_and_admins() {
    let server = started(config());
    let mut root = connect_admin(&server, "root");
    let mut alice = connect(&server, "alice");
    let mut bob = connect(&server, "bob");
    let bob_id = client_id(&server, "bob");

    assert!(alice.drain().contains(&ClientNotification::ClientConnected {
        client: bob_id,
        name: "bob".into(),
        team: String::new(),
    }));
    assert!(!bob
        .drain()
        .iter()
        .any(|n| matches!(n, ClientNotification::ClientConnected { client, .. } if *client == bob_id)));
    let connected = root
        .drain()
        .iter()
        .filter(|n| matches!(n, AdminNotification::ClientConnected { .. }))
        .count();
    assert_eq!(connected, 2);
}

#[tokio::test]
async fn test_unknown_connection_returns_not_found() {
    let server = started(config());
    let stranger = next_connection();
    assert!(matches!(
        server.client_heartbeat(stranger),
        Err(TetriforgeError::Session(SessionError::NotFound(c))) if c == stranger
    ));
    assert!(server.client_start_game(stranger).is_err());
    assert!(server.admin_get_room_list(stranger).is_err());
}

#[tokio::test]
async fn test_disconnect_leaves_room_and_announces() {
    let server = started(config());
    let alice = connect(&server, "alice");
    let mut bob = connect(&server, "bob");
    let alice_id = client_id(&server, "alice");
    let bob_id = client_id(&server, "bob");
    server
        .client_create_and_join_room(alice.conn, "lobby", None, GameRules::Standard, false)
        .unwrap();
    let room = server.room_by_name("lobby").unwrap().id();
    server.client_join_room(bob.conn, room, None, false).unwrap();
    bob.drain();

    server.client_disconnect(alice.conn).unwrap();

    let received = bob.drain();
    assert!(received.contains(&ClientNotification::ClientDisconnected {
        client: alice_id,
        name: "alice".into(),
        reason: LeaveReason::Disconnected,
    }));
    assert!(received.contains(&ClientNotification::GameMasterModified { client: bob_id }));
    assert_eq!(server.client_count(), 1);
    assert!(server.client_disconnect(alice.conn).is_err());
}

// =========================================================================
// Rooms through the server
// =========================================================================

#[tokio::test]
async fn test_create_and_join_room_announces_and_joins() {
    let server = started(config());
    let mut root = connect_admin(&server, "root");
    let mut alice = connect(&server, "alice");
    let mut bob = connect(&server, "bob");
    root.drain();
    bob.drain();

    let result = server
        .client_create_and_join_room(alice.conn, "lobby", None, GameRules::Classic, false)
        .unwrap();
    assert_eq!(result, GameCreateResult::Successful);

    let room = server.room_by_name("lobby").unwrap();
    assert_eq!(room.game_master().unwrap().name(), "alice");
    assert!(alice.drain().iter().any(|n| matches!(
        n,
        ClientNotification::GameJoined { is_game_master: true, .. }
    )));
    assert!(bob
        .drain()
        .iter()
        .any(|n| matches!(n, ClientNotification::RoomCreated { room } if room.name == "lobby")));
    assert!(root
        .drain()
        .iter()
        .any(|n| matches!(n, AdminNotification::RoomCreated { .. })));
}

#[tokio::test]
async fn test_create_and_join_room_refusals() {
    let server = started(ServerConfig {
        max_rooms: 2,
        ..config()
    });
    let alice = connect(&server, "alice");
    let bob = connect(&server, "bob");
    let carol = connect(&server, "carol");

    server
        .client_create_and_join_room(alice.conn, "lobby", None, GameRules::Standard, false)
        .unwrap();
    let again = server
        .client_create_and_join_room(alice.conn, "other", None, GameRules::Standard, false)
        .unwrap();
    assert_eq!(again, GameCreateResult::FailedAlreadyInGame);

    let taken = server
        .client_create_and_join_room(bob.conn, "Lobby", None, GameRules::Standard, false)
        .unwrap();
    assert_eq!(taken, GameCreateResult::FailedNameAlreadyUsed);

    let invalid = server
        .client_create_and_join_room(bob.conn, "", None, GameRules::Standard, false)
        .unwrap();
    assert_eq!(invalid, GameCreateResult::FailedInvalidName);

    server
        .client_create_and_join_room(bob.conn, "second", None, GameRules::Standard, false)
        .unwrap();
    let full = server
        .client_create_and_join_room(carol.conn, "third", None, GameRules::Standard, false)
        .unwrap();
    assert_eq!(full, GameCreateResult::FailedTooManyRooms);
}

#[tokio::test]
async fn test_create_and_join_room_creator_join_failure_drops_room() {
    let mut config = config();
    config.room.max_spectators = 0;
    let server = started(config);
    let alice = connect(&server, "alice");
    let mut bob = connect(&server, "bob");
    bob.drain();

    let result = server
        .client_create_and_join_room(alice.conn, "lobby", None, GameRules::Standard, true)
        .unwrap();

    assert_eq!(
        result,
        GameCreateResult::FailedJoin(GameJoinResult::FailedTooManySpectators)
    );
    assert!(server.rooms().is_empty());
    assert_eq!(server.client_by_name("alice").unwrap().room(), None);
    assert!(!bob
        .drain()
        .iter()
        .any(|n| matches!(n, ClientNotification::RoomCreated { .. })));

    // The name is free again.
    assert_eq!(
        server
            .client_create_and_join_room(alice.conn, "lobby", None, GameRules::Standard, false)
            .unwrap(),
        GameCreateResult::Successful
    );
}

#[tokio::test]
async fn test_join_room_checks_existence_and_password() {
    let server = started(config());
    let alice = connect(&server, "alice");
    let bob = connect(&server, "bob");
    server
        .client_create_and_join_room(
            alice.conn,
            "secret",
            Some("pw".into()),
            GameRules::Standard,
            false,
        )
        .unwrap();
    let room = server.room_by_name("secret").unwrap().id();

    assert_eq!(
        server
            .client_join_room(bob.conn, tetriforge_protocol::RoomId(u64::MAX), None, false)
            .unwrap(),
        GameJoinResult::FailedNotFound
    );
    assert_eq!(
        server.client_join_room(bob.conn, room, Some("nope"), false).unwrap(),
        GameJoinResult::FailedWrongPassword
    );
    assert_eq!(
        server.client_join_room(bob.conn, room, Some("pw"), true).unwrap(),
        GameJoinResult::Successful
    );
}

#[tokio::test]
async fn test_join_random_room_skips_locked_and_full_rooms() {
    let mut config = config();
    config.room.max_players = 1;
    config.rooms = vec![
        PresetRoom {
            name: "locked".into(),
            password: Some("pw".into()),
            rule: GameRules::Standard,
        },
        PresetRoom {
            name: "open".into(),
            password: None,
            rule: GameRules::Standard,
        },
    ];
    let server = started(config);
    let alice = connect(&server, "alice");
    let bob = connect(&server, "bob");

    assert_eq!(
        server.client_join_random_room(alice.conn).unwrap(),
        GameJoinResult::Successful
    );
    assert_eq!(
        server.client_by_name("alice").unwrap().room(),
        Some(server.room_by_name("open").unwrap().id())
    );
    // The only open room is now full.
    assert_eq!(
        server.client_join_random_room(bob.conn).unwrap(),
        GameJoinResult::FailedNotFound
    );
}

#[tokio::test]
async fn test_room_commands_require_membership() {
    let server = started(config());
    let alice = connect(&server, "alice");
    assert!(matches!(
        server.client_start_game(alice.conn),
        Err(TetriforgeError::Room(RoomError::NotMember(_)))
    ));
}

#[tokio::test]
async fn test_change_team_refused_while_playing() {
    let server = started(config());
    let alice = connect(&server, "alice");
    let mut bob = connect(&server, "bob");

    server.client_change_team(alice.conn, "red").unwrap();
    assert!(bob.drain().iter().any(
        |n| matches!(n, ClientNotification::TeamChanged { team, .. } if team == "red")
    ));

    server
        .client_create_and_join_room(alice.conn, "lobby", None, GameRules::Standard, false)
        .unwrap();
    server.client_start_game(alice.conn).unwrap();
    assert!(matches!(
        server.client_change_team(alice.conn, "blue"),
        Err(TetriforgeError::TeamLocked(_))
    ));
    assert_eq!(server.client_by_name("alice").unwrap().team(), "red");
}

#[tokio::test]
async fn test_full_match_through_server() {
    let server = started(config());
    let mut alice = connect(&server, "alice");
    let mut bob = connect(&server, "bob");
    server
        .client_create_and_join_room(alice.conn, "lobby", None, GameRules::Standard, false)
        .unwrap();
    let room = server.room_by_name("lobby").unwrap();
    server.client_join_room(bob.conn, room.id(), None, false).unwrap();

    assert!(server.client_start_game(bob.conn).is_err());
    server.client_start_game(alice.conn).unwrap();
    server.client_clear_lines(alice.conn, 4).unwrap();
    server.client_game_lost(alice.conn).unwrap();
    settle().await;

    assert_eq!(room.state(), tetriforge_protocol::RoomState::WaitStart);
    assert_eq!(room.win_list()[0].name, "bob");
    let received = bob.drain();
    assert!(received.iter().any(|n| matches!(
        n,
        ClientNotification::PlayerLinesAdded { count: 4, .. }
    )));
    assert!(received.iter().any(|n| matches!(
        n,
        ClientNotification::GameFinished { reason: GameFinishedReason::Won, .. }
    )));
    assert!(alice
        .drain()
        .iter()
        .any(|n| matches!(n, ClientNotification::GameStarted { pieces } if pieces.len() == 5)));
    assert_eq!(
        server.client_by_name("bob").unwrap().state(),
        ClientState::WaitInRoom
    );
}

// =========================================================================
// Chat and relays
// =========================================================================

#[tokio::test]
async fn test_messages_reach_their_audience() {
    let server = started(config());
    let mut root = connect_admin(&server, "root");
    let mut alice = connect(&server, "alice");
    let mut bob = connect(&server, "bob");
    let bob_id = client_id(&server, "bob");
    root.drain();
    alice.drain();

    server
        .client_send_private_message(alice.conn, bob_id, "psst")
        .unwrap();
    assert!(bob.drain().contains(&ClientNotification::PrivateMessage {
        from: "alice".into(),
        message: "psst".into(),
    }));

    server.client_send_broadcast_message(alice.conn, "hi all").unwrap();
    let broadcast = ClientNotification::BroadcastMessage {
        from: "alice".into(),
        message: "hi all".into(),
    };
    assert!(bob.drain().contains(&broadcast));
    assert!(!alice.drain().contains(&broadcast));
    assert!(root.drain().contains(&AdminNotification::BroadcastMessage {
        from: "alice".into(),
        message: "hi all".into(),
    }));

    assert!(matches!(
        server.client_send_private_message(
            alice.conn,
            tetriforge_protocol::ClientId(u64::MAX),
            "?"
        ),
        Err(TetriforgeError::UnknownClient(_))
    ));
}

#[tokio::test]
async fn test_achievement_relayed_to_other_clients() {
    let server = started(config());
    let mut alice = connect(&server, "alice");
    let mut bob = connect(&server, "bob");
    alice.drain();

    server
        .client_earn_achievement(alice.conn, 12, "Tetris!")
        .unwrap();

    assert!(bob.drain().iter().any(|n| matches!(
        n,
        ClientNotification::AchievementEarned { achievement: 12, .. }
    )));
    assert!(alice.drain().is_empty());
}

// =========================================================================
// Admins
// =========================================================================

#[tokio::test]
async fn test_admin_connect_checks_password() {
    let server = started(config());
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = server.admin_connect(next_connection(), Arc::new(tx), localhost(), VERSION, "root", "wrong");
    assert_eq!(result, ConnectResult::FailedWrongPassword);
    assert_eq!(server.admin_count(), 0);

    let _root = connect_admin(&server, "root");
    assert_eq!(server.admin_count(), 1);
}

#[tokio::test]
async fn test_admin_connect_refused_without_authenticator() {
    let server = Server::builder().config(config()).build(Handle::current());
    server.start().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    let result = server.admin_connect(next_connection(), Arc::new(tx), localhost(), VERSION, "root", ADMIN_PASSWORD);
    assert_eq!(result, ConnectResult::FailedWrongPassword);
}

#[tokio::test]
async fn test_admin_kick_removes_client_from_room() {
    let server = started(config());
    let root = connect_admin(&server, "root");
    let mut alice = connect(&server, "alice");
    server
        .client_create_and_join_room(alice.conn, "lobby", None, GameRules::Standard, false)
        .unwrap();
    let room = server.room_by_name("lobby").unwrap();
    let alice_id = client_id(&server, "alice");

    server.admin_kick(root.conn, alice_id).unwrap();

    assert_eq!(server.client_count(), 0);
    assert!(room.members().is_empty());
    let received = alice.drain();
    let position = |wanted: &ClientNotification| received.iter().position(|n| n == wanted);
    let kicked = position(&ClientNotification::ClientDisconnected {
        client: alice_id,
        name: "alice".into(),
        reason: LeaveReason::Kick,
    })
    .unwrap();
    let left = position(&ClientNotification::GameLeft).unwrap();
    assert!(kicked < left);
    assert!(matches!(
        server.admin_kick(root.conn, alice_id),
        Err(TetriforgeError::UnknownClient(_))
    ));
}

#[tokio::test]
async fn test_admin_ban_refuses_reconnect_until_unban() {
    let server = started(config());
    let root = connect_admin(&server, "root");
    let alice = connect(&server, "alice");
    let alice_id = client_id(&server, "alice");

    server.admin_ban(root.conn, alice_id, "cheating").unwrap();

    assert_eq!(server.client_count(), 0);
    let banned = server.admin_get_banned_list(root.conn).unwrap();
    assert_eq!(banned.len(), 1);
    assert_eq!(banned[0].name, "alice");
    assert_eq!(banned[0].reason, "cheating");
    let (result, _) = try_connect(&server, "alice");
    assert_eq!(result, ConnectResult::FailedBanned);
    drop(alice);

    assert!(server.admin_unban(root.conn, localhost()).unwrap());
    let (result, _) = try_connect(&server, "alice");
    assert_eq!(result, ConnectResult::Successful);
}

#[tokio::test]
async fn test_admin_create_and_delete_room() {
    let server = started(config());
    let mut root = connect_admin(&server, "root");
    let mut alice = connect(&server, "alice");

    assert_eq!(
        server
            .admin_create_room(root.conn, "arena", None, GameRules::Extended)
            .unwrap(),
        GameCreateResult::Successful
    );
    let room = server.room_by_name("arena").unwrap();
    server.client_join_room(alice.conn, room.id(), None, false).unwrap();

    let listed = server.admin_get_client_list_in_room(root.conn, room.id()).unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "alice");
    assert_eq!(server.admin_get_room_list(root.conn).unwrap().len(), 1);
    root.drain();
    alice.drain();

    server.admin_delete_room(root.conn, room.id()).unwrap();

    assert!(server.rooms().is_empty());
    assert_eq!(server.client_by_name("alice").unwrap().room(), None);
    let received = alice.drain();
    assert!(received.contains(&ClientNotification::GameLeft));
    assert!(received.contains(&ClientNotification::RoomDeleted {
        room: room.id(),
        name: "arena".into(),
    }));
    assert!(root.drain().iter().any(|n| matches!(n, AdminNotification::RoomDeleted { .. })));
    assert!(matches!(
        server.admin_delete_room(root.conn, room.id()),
        Err(TetriforgeError::Room(RoomError::NotFound(_)))
    ));
}

#[tokio::test]
async fn test_admin_lists_and_private_admin_message() {
    let server = started(config());
    let root = connect_admin(&server, "root");
    let mut ops = connect_admin(&server, "ops");
    let _alice = connect(&server, "alice");

    let admins = server.admin_get_admin_list(root.conn).unwrap();
    assert_eq!(admins.len(), 2);
    assert_eq!(server.admin_get_client_list(root.conn).unwrap().len(), 1);

    let ops_id = admins.iter().find(|a| a.name == "ops").unwrap().id;
    server
        .admin_send_private_admin_message(root.conn, ops_id, "coffee?")
        .unwrap();
    assert!(ops.drain().contains(&AdminNotification::PrivateAdminMessage {
        from: "root".into(),
        message: "coffee?".into(),
    }));
}

// =========================================================================
// Watchdog
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_watchdog_silent_client_times_out() {
    let server = started(config());
    let _silent = connect(&server, "silent");
    let mut chatty = connect(&server, "chatty");
    let silent_id = client_id(&server, "silent");

    for _ in 0..14 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        server.client_heartbeat(chatty.conn).unwrap();
    }
    assert_eq!(server.client_count(), 2);

    for _ in 0..2 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        server.client_heartbeat(chatty.conn).unwrap();
    }
    assert_eq!(server.client_count(), 1);
    assert!(chatty.drain().contains(&ClientNotification::ClientDisconnected {
        client: silent_id,
        name: "silent".into(),
        reason: LeaveReason::Timeout,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_failed_delivery_drops_client() {
    let server = started(config());
    let gone = connect(&server, "gone");
    let mut stays = connect(&server, "stays");
    let gone_id = client_id(&server, "gone");
    drop(gone.rx);

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(server.client_count(), 1);
    assert!(stays.drain().contains(&ClientNotification::ClientDisconnected {
        client: gone_id,
        name: "gone".into(),
        reason: LeaveReason::ConnectionLost,
    }));
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_idle_outbound_sends_heartbeat() {
    let server = started(config());
    let mut alice = connect(&server, "alice");

    tokio::time::sleep(Duration::from_millis(450)).await;

    let mut heartbeats = 0;
    while let Ok(notification) = alice.rx.try_recv() {
        if notification == ClientNotification::Heartbeat {
            heartbeats += 1;
        }
    }
    assert!(heartbeats >= 1);
    // A heartbeat is outbound traffic only.
    assert_eq!(server.client_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_watchdog_silent_admin_times_out() {
    let server = started(config());
    let _root = connect_admin(&server, "root");

    tokio::time::sleep(Duration::from_secs(16)).await;

    assert_eq!(server.admin_count(), 0);
}

#[tokio::test]
async fn test_connection_lost_removes_immediately() {
    let server = started(config());
    let alice = connect(&server, "alice");
    let root = connect_admin(&server, "root");

    server.connection_lost(alice.conn);
    server.connection_lost(root.conn);

    assert_eq!(server.client_count(), 0);
    assert_eq!(server.admin_count(), 0);
}
