//! # Simulated Lobby Server
//!
//! A small, scripted stand-in for the game server's lobby. It speaks the
//! same framed protocol as the real server so the bridge can be exercised
//! end to end without network access.
//!
//! ## What It Covers
//!
//! ### Connection Setup
//! - The four zero byte handshake, answered with a connection number
//! - The `[version]` request, optionally rejecting other versions
//! - Redirecting clients to another endpoint
//!
//! ### Login
//! - Unregistered names join directly
//! - Registered names receive a `$H$` salt challenge and must answer with
//!   the matching hash and `force_confirmation="yes"`
//! - Names listed as online are reported as taken
//!
//! ### Lobby Feed
//! Tests push snapshots, `[gamelist_diff]` documents and chat through
//! [`SimPeer`], built with the helpers in [`script`].
//!
//! ## Module Organization
//!
//! - `config`: login rules and salt generation
//! - `server`: listening socket and handshake
//! - `peer`: framed I/O, version exchange and login for one client
//! - `script`: snapshot, diff and chat document builders

pub mod config;
pub mod peer;
pub mod script;
pub mod server;

pub use config::LobbyConfig;
pub use peer::{Negotiated, SimError, SimPeer};
pub use server::SimServer;
