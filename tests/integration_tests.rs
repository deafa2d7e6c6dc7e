//! Integration tests for the lobby session and replica
//!
//! These tests run the bridge's lobby side against the simulated lobby over
//! real loopback sockets.

use bridge::hasher::NativeHasher;
use bridge::holder::Membership;
use bridge::lobby::{LobbyDispatcher, LobbyState};
use bridge::session::{LobbySession, LoginOutcome, LoginRejection, SessionTimeouts};
use shared::DEFAULT_PROTOCOL_VERSION;
use simserver::script::{self, DiffBuilder};
use simserver::{LobbyConfig, SimError, SimServer};
use std::time::Duration;

fn timeouts() -> SessionTimeouts {
    SessionTimeouts {
        read: Duration::from_millis(100),
        reply: Duration::from_secs(5),
    }
}

async fn connect(port: u16) -> LobbySession<NativeHasher> {
    LobbySession::connect("127.0.0.1", port, DEFAULT_PROTOCOL_VERSION, NativeHasher, timeouts())
        .await
        .expect("session should connect")
}

/// LOGIN TESTS
mod login_tests {
    use super::*;

    /// A registered account answers the salted challenge after a redirect
    #[tokio::test]
    async fn registered_login_after_redirect() {
        let target = SimServer::bind(LobbyConfig::default().with_account("admin", "secret"))
            .await
            .unwrap();
        let front = SimServer::bind(LobbyConfig::default().with_redirect("127.0.0.1", target.port()))
            .await
            .unwrap();
        let front_port = front.port();

        let server = tokio::spawn(async move {
            assert!(matches!(front.accept_lobby().await, Err(SimError::Redirected)));
            let peer = target.accept_lobby().await.unwrap();
            peer.username.clone()
        });

        let mut session = connect(front_port).await;
        let outcome = session.login("admin", "secret").await.unwrap();

        assert_eq!(
            outcome,
            LoginOutcome::Joined {
                username: "admin".to_string()
            }
        );
        assert_eq!(server.await.unwrap().as_deref(), Some("admin"));
        assert_ne!(session.endpoint().1, front_port);
    }

    /// A wrong password is rejected without further attempts
    #[tokio::test]
    async fn wrong_password_is_rejected() {
        let server = SimServer::bind(LobbyConfig::default().with_account("admin", "secret"))
            .await
            .unwrap();
        let port = server.port();

        tokio::spawn(async move {
            let mut peer = server.accept().await.unwrap();
            peer.negotiate_version(server.config()).await.unwrap();
            let _ = peer.serve_login(server.config()).await;
        });

        let mut session = connect(port).await;
        let outcome = session.login("admin", "wrong").await.unwrap();
        assert_eq!(outcome, LoginOutcome::Rejected(LoginRejection::BadPassword));
        assert!(session.username().is_none());
    }

    /// A taken name joins with underscores appended
    #[tokio::test]
    async fn taken_name_is_renamed() {
        let server = SimServer::bind(LobbyConfig::default().with_online("bot").with_online("bot_"))
            .await
            .unwrap();
        let port = server.port();

        tokio::spawn(async move {
            let _peer = server.accept_lobby().await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
        });

        let mut session = connect(port).await;
        let outcome = session.login("bot", "").await.unwrap();
        assert!(outcome.is_joined());
        assert_eq!(session.username(), Some("bot__"));
    }
}

/// REPLICA TESTS
mod replica_tests {
    use super::*;

    async fn receive(session: &mut LobbySession<NativeHasher>) -> String {
        for _ in 0..50 {
            if let Some(text) = session.receive().await.unwrap() {
                return text;
            }
        }
        panic!("no document from the simulated lobby");
    }

    /// Snapshot followed by diffs keeps the replica in server order
    #[tokio::test]
    async fn snapshot_and_diffs_over_the_wire() {
        let server = SimServer::bind(LobbyConfig::default()).await.unwrap();
        let port = server.port();

        let feed = tokio::spawn(async move {
            let mut peer = server.accept_lobby().await.unwrap();
            let users = ["alice", "bob", "carol"].map(script::user);
            let games = [script::game(1, "duel"), script::game(2, "survival")];
            peer.send_node(&script::snapshot(users, games)).await.unwrap();

            // inserts land first; deletes then index the grown list
            let diff = DiffBuilder::new()
                .insert_user(1, script::user("bob").with_attr("status", "playing"))
                .insert_user(4, script::user("dave"))
                .delete_user(2)
                .delete_user(2)
                .insert_game(2, script::game(3, "ladder"))
                .delete_game(0)
                .build();
            peer.send_node(&diff).await.unwrap();
            peer
        });

        let mut session = connect(port).await;
        assert!(session.login("bridge", "").await.unwrap().is_joined());

        let dispatcher = LobbyDispatcher::new();
        let mut state = LobbyState::new();

        dispatcher.handle_text(&mut state, &receive(&mut session).await).unwrap();
        assert_eq!(state.users.keys(), vec!["alice", "bob", "carol"]);
        assert_eq!(state.games.keys(), vec![1, 2]);
        assert_eq!(state.users.take_events().len(), 3);

        dispatcher.handle_text(&mut state, &receive(&mut session).await).unwrap();
        assert_eq!(state.users.keys(), vec!["alice", "bob", "dave"]);
        assert_eq!(state.user("bob").unwrap().status, "playing");
        assert_eq!(state.games.keys(), vec![2, 3]);

        let events = state.users.take_events();
        let appeared: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                Membership::Appeared(u) => Some(u.name.as_str()),
                Membership::Left(_) => None,
            })
            .collect();
        let left: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                Membership::Left(u) => Some(u.name.as_str()),
                Membership::Appeared(_) => None,
            })
            .collect();
        assert_eq!(appeared, vec!["dave"]);
        assert_eq!(left, vec!["carol"]);

        feed.await.unwrap().close().await;
    }
}
