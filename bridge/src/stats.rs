//! In-memory lobby statistics fed by membership events

use crate::holder::Membership;
use log::debug;
use shared::User;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Offline users not seen for this long are dropped by [`LobbyStats::gc`]
pub const GC_AGE: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Start of the current session, `None` while offline
    pub online_since: Option<Instant>,
    /// Time spent online in finished sessions
    pub total_online: Duration,
    pub sessions: u32,
    pub last_seen: Instant,
}

impl UserRecord {
    fn total_at(&self, now: Instant) -> Duration {
        self.total_online
            + self
                .online_since
                .map_or(Duration::ZERO, |since| now.saturating_duration_since(since))
    }
}

#[derive(Debug, Default)]
pub struct LobbyStats {
    first_connect: Option<Instant>,
    last_connect: Option<Instant>,
    users: HashMap<String, UserRecord>,
}

impl LobbyStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called whenever the lobby login succeeds
    pub fn record_connect(&mut self, now: Instant) {
        self.first_connect.get_or_insert(now);
        self.last_connect = Some(now);
    }

    pub fn record(&mut self, events: &[Membership<User>], now: Instant) {
        for event in events {
            match event {
                Membership::Appeared(user) => {
                    let record = self.users.entry(user.name.clone()).or_insert(UserRecord {
                        online_since: None,
                        total_online: Duration::ZERO,
                        sessions: 0,
                        last_seen: now,
                    });
                    if record.online_since.is_none() {
                        record.online_since = Some(now);
                        record.sessions += 1;
                    }
                    record.last_seen = now;
                }
                Membership::Left(user) => {
                    if let Some(record) = self.users.get_mut(&user.name) {
                        if let Some(since) = record.online_since.take() {
                            record.total_online += now.saturating_duration_since(since);
                        }
                        record.last_seen = now;
                    }
                }
            }
        }
    }

    pub fn user(&self, name: &str) -> Option<&UserRecord> {
        self.users.get(name)
    }

    pub fn online_count(&self) -> usize {
        self.users.values().filter(|r| r.online_since.is_some()).count()
    }

    pub fn known_count(&self) -> usize {
        self.users.len()
    }

    /// Every user seen since startup, sorted
    pub fn known_users(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.users.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Drops offline users last seen more than `max_age` ago
    pub fn gc(&mut self, now: Instant, max_age: Duration) -> usize {
        let before = self.users.len();
        self.users.retain(|_, r| {
            r.online_since.is_some() || now.saturating_duration_since(r.last_seen) <= max_age
        });
        let removed = before - self.users.len();
        debug!("Stats gc removed {} users", removed);
        removed
    }

    pub fn uptime_summary(&self, now: Instant) -> String {
        let since = |t: Option<Instant>| {
            t.map_or("never".to_string(), |t| {
                format_duration(now.saturating_duration_since(t))
            })
        };
        format!(
            "Time since first connect: {}, time since last connect: {}",
            since(self.first_connect),
            since(self.last_connect)
        )
    }

    pub fn user_summary(&self, name: &str, now: Instant) -> String {
        match self.user(name) {
            None => format!("No stats for {}", name),
            Some(record) => {
                let state = match record.online_since {
                    Some(since) => format!(
                        "online for {}",
                        format_duration(now.saturating_duration_since(since))
                    ),
                    None => format!(
                        "offline, last seen {} ago",
                        format_duration(now.saturating_duration_since(record.last_seen))
                    ),
                };
                format!(
                    "{}: {}, {} sessions, {} online in total",
                    name,
                    state,
                    record.sessions,
                    format_duration(record.total_at(now))
                )
            }
        }
    }
}

/// Renders whole seconds as e.g. `1h 2m 3s`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, secs / 60 % 60, secs % 60);
    match (h, m) {
        (0, 0) => format!("{}s", s),
        (0, _) => format!("{}m {}s", m, s),
        _ => format!("{}h {}m {}s", h, m, s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::wml::Node;
    use shared::Entity;

    fn user(name: &str) -> User {
        User::from_node(&Node::new("user").with_attr("name", name)).unwrap()
    }

    #[test]
    fn test_sessions_accumulate() {
        let t0 = Instant::now();
        let mut stats = LobbyStats::new();

        stats.record(&[Membership::Appeared(user("alice"))], t0);
        stats.record(&[Membership::Left(user("alice"))], t0 + Duration::from_secs(60));
        stats.record(&[Membership::Appeared(user("alice"))], t0 + Duration::from_secs(120));

        let record = stats.user("alice").unwrap();
        assert_eq!(record.sessions, 2);
        assert_eq!(record.total_online, Duration::from_secs(60));
        assert_eq!(
            record.total_at(t0 + Duration::from_secs(150)),
            Duration::from_secs(90)
        );
        assert_eq!(stats.online_count(), 1);
    }

    #[test]
    fn test_repeated_appearance_is_one_session() {
        let t0 = Instant::now();
        let mut stats = LobbyStats::new();
        stats.record(
            &[
                Membership::Appeared(user("bob")),
                Membership::Appeared(user("bob")),
            ],
            t0,
        );
        assert_eq!(stats.user("bob").unwrap().sessions, 1);
    }

    #[test]
    fn test_gc_keeps_online_and_recent() {
        let t0 = Instant::now();
        let mut stats = LobbyStats::new();
        stats.record(
            &[
                Membership::Appeared(user("old")),
                Membership::Appeared(user("recent")),
                Membership::Appeared(user("online")),
            ],
            t0,
        );
        stats.record(&[Membership::Left(user("old"))], t0);
        stats.record(
            &[Membership::Left(user("recent"))],
            t0 + Duration::from_secs(15 * 60),
        );

        let removed = stats.gc(t0 + Duration::from_secs(20 * 60), GC_AGE);
        assert_eq!(removed, 1);
        assert_eq!(stats.known_users(), vec!["online", "recent"]);
    }

    #[test]
    fn test_uptime_summary() {
        let t0 = Instant::now();
        let mut stats = LobbyStats::new();
        assert!(stats.uptime_summary(t0).contains("never"));

        stats.record_connect(t0);
        stats.record_connect(t0 + Duration::from_secs(3600));
        assert_eq!(
            stats.uptime_summary(t0 + Duration::from_secs(3725)),
            "Time since first connect: 1h 2m 5s, time since last connect: 2m 5s"
        );
    }

    #[test]
    fn test_user_summary() {
        let t0 = Instant::now();
        let mut stats = LobbyStats::new();
        assert_eq!(stats.user_summary("ghost", t0), "No stats for ghost");

        stats.record(&[Membership::Appeared(user("carol"))], t0);
        assert_eq!(
            stats.user_summary("carol", t0 + Duration::from_secs(30)),
            "carol: online for 30s, 1 sessions, 30s online in total"
        );
    }
}
