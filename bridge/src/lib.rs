//! # Lobby Bridge Library
//!
//! This library relays between a Wesnoth-style multiplayer lobby and an IRC
//! channel. It keeps a live replica of the lobby's user and game lists and
//! answers chat commands on both sides.
//!
//! ## Architecture Overview
//!
//! The bridge runs a single cooperative loop. Every connection is polled with
//! a short read timeout, so no task ever blocks the others and no state is
//! shared between threads.
//!
//! ### Lobby Connection
//! The lobby speaks gzip compressed WML documents behind a four byte length
//! prefix. A [`session::LobbySession`] negotiates the protocol version,
//! follows server redirects and logs in, answering salted password
//! challenges through a pluggable [`hasher::PasswordHasher`].
//!
//! ### Lobby Replica
//! After login the server sends a full snapshot followed by incremental
//! `[gamelist_diff]` documents. The [`reconciler::DiffReconciler`] applies
//! them to two [`holder::OrderedEntityHolder`]s and turns net changes into
//! membership events. An update that deletes and re-inserts the same user is
//! not reported as a departure.
//!
//! ### Lifecycle
//! Failures never unwind the loop. Each one maps to a set of
//! [`lifecycle::Action`]s which [`lifecycle::plan`] folds into teardown,
//! reconnect or exit decisions once per iteration.
//!
//! ## Module Organization
//!
//! ### Transport (`transport`, `session`)
//! - Framed gzip transport with handshake
//! - Version negotiation and redirects
//! - Login with renames and password challenges
//!
//! ### Replica (`holder`, `reconciler`, `lobby`)
//! - Ordered keyed entity lists
//! - Diff application with move detection
//! - Document dispatch and chat extraction
//!
//! ### Bot (`commands`, `stats`, `irc`)
//! - Permission levels and the command table
//! - Online time statistics per user
//! - Minimal IRC client with channel relay
//!
//! ### Runtime (`app`, `config`, `lifecycle`)
//! - The main loop
//! - TOML configuration with CLI overrides
//! - Error taxonomy and action planning
//!
//! ## Usage Example
//!
//! ```no_run
//! use bridge::app::Bridge;
//! use bridge::config::BridgeConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = BridgeConfig::default();
//! config.lobby.username = "relaybot".to_string();
//! config.irc.enabled = false;
//!
//! let exit = Bridge::new(config).run().await;
//! std::process::exit(exit.code());
//! # }
//! ```

pub mod app;
pub mod commands;
pub mod config;
pub mod hasher;
pub mod holder;
pub mod irc;
pub mod lifecycle;
pub mod lobby;
pub mod reconciler;
pub mod session;
pub mod stats;
pub mod transport;

pub use app::Bridge;
pub use config::BridgeConfig;
pub use lifecycle::{Action, ActionSet, BridgeError, Exit};
