//! Wire-level pieces of the lobby protocol shared by the bridge and the
//! simulated server: the markup tree, frame codec, list entities, request
//! builders and the login password hash. Nothing here touches a socket.

pub mod entity;
pub mod frame;
pub mod messages;
pub mod phpass;
pub mod wml;

pub use entity::{Entity, EntityError, Game, User};
pub use wml::Node;

/// Protocol version the bridge announces by default
pub const DEFAULT_PROTOCOL_VERSION: &str = "1.16.0";

/// Default lobby server port
pub const DEFAULT_LOBBY_PORT: u16 = 15000;
