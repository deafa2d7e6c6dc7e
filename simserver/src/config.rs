//! What the simulated lobby accepts and how it answers logins

use rand::Rng;
use std::collections::{HashMap, HashSet};

const ITOA64: &[u8; 64] = b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Server-side login rules
///
/// Registered accounts get a salted challenge; names in `online` are
/// reported as taken; everybody else joins without a password.
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Only this client version is accepted when set
    pub required_version: Option<String>,
    /// Registered account name to clear-text password
    pub accounts: HashMap<String, String>,
    /// Names that are already logged in
    pub online: HashSet<String>,
    /// Challenge salt sent to registered accounts
    pub salt: String,
    /// When set, every client is sent elsewhere after the version exchange
    pub redirect: Option<(String, u16)>,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            required_version: None,
            accounts: HashMap::new(),
            online: HashSet::new(),
            salt: random_salt(7),
            redirect: None,
        }
    }
}

impl LobbyConfig {
    pub fn with_account(mut self, name: &str, password: &str) -> Self {
        self.accounts.insert(name.to_string(), password.to_string());
        self
    }

    pub fn with_online(mut self, name: &str) -> Self {
        self.online.insert(name.to_string());
        self
    }

    pub fn with_redirect(mut self, host: &str, port: u16) -> Self {
        self.redirect = Some((host.to_string(), port));
        self
    }

    pub fn with_required_version(mut self, version: &str) -> Self {
        self.required_version = Some(version.to_string());
        self
    }
}

/// Builds a `$H$` salt: marker, iteration character, then two eight
/// character salts.
///
/// `log2_char` is the index into the hash alphabet; 7 gives 2^7 rounds,
/// which keeps test logins fast.
pub fn random_salt(log2_char: usize) -> String {
    let mut rng = rand::thread_rng();
    let mut salt = String::from("$H$");
    salt.push(ITOA64[log2_char.min(63)] as char);
    for _ in 0..16 {
        salt.push(ITOA64[rng.gen_range(0..ITOA64.len())] as char);
    }
    salt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_salt_shape() {
        let salt = random_salt(7);
        assert_eq!(salt.len(), 20);
        assert!(salt.starts_with("$H$5"));
        assert!(salt.bytes().skip(4).all(|b| ITOA64.contains(&b)));
    }

    #[test]
    fn test_random_salt_usable_by_hash() {
        let salt = random_salt(7);
        assert!(shared::phpass::lobby_password_hash("pw", &salt).is_ok());
    }

    #[test]
    fn test_builders() {
        let config = LobbyConfig::default()
            .with_account("admin", "pw")
            .with_online("bot")
            .with_redirect("localhost", 15001);

        assert_eq!(config.accounts.get("admin").map(String::as_str), Some("pw"));
        assert!(config.online.contains("bot"));
        assert_eq!(config.redirect, Some(("localhost".to_string(), 15001)));
    }
}
