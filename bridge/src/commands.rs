//! Chat commands, sender permissions and message routing
//!
//! Handlers never touch a connection. They read an explicit
//! [`CommandContext`] and return [`Effect`]s, which the bridge loop carries
//! out against the lobby, IRC, statistics or its own lifecycle.

use crate::config::BridgeConfig;
use crate::lifecycle::{Action, ActionSet};
use crate::lobby::LobbyState;
use crate::stats::{LobbyStats, GC_AGE};
use log::{debug, info};
use shared::messages;
use shared::wml::Node;
use std::time::{Duration, Instant};

pub const PERMISSION_ADMIN: i32 = 90;
pub const PERMISSION_TRUSTED: i32 = 50;
pub const PERMISSION_REGISTERED: i32 = 10;
pub const PERMISSION_PUBLIC: i32 = -1;

/// Where a message came from, and where its replies go
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Lobby,
    Irc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Private answer to the sender on its own network
    Reply(String),
    /// Raw request for the lobby server
    LobbySend(Node),
    /// Whisper to a lobby user
    LobbyWhisper { receiver: String, message: String },
    IrcJoin(String),
    IrcPart(String),
    Trust(String),
    CollectGarbage(Duration),
    Lifecycle { reason: String, actions: ActionSet },
}

/// Everything a handler may look at
pub struct CommandContext<'a> {
    pub sender: &'a str,
    pub args: &'a str,
    pub permission: i32,
    pub origin: Origin,
    pub lobby: &'a LobbyState,
    pub stats: &'a LobbyStats,
    pub config: &'a BridgeConfig,
    pub now: Instant,
}

pub struct Command {
    pub name: &'static str,
    /// Senders need strictly more than this
    pub permission: i32,
    pub handler: fn(&CommandContext) -> Vec<Effect>,
}

pub static COMMANDS: &[Command] = &[
    Command { name: "help", permission: PERMISSION_PUBLIC, handler: help },
    Command { name: "uptime", permission: PERMISSION_PUBLIC, handler: uptime },
    Command { name: "stats", permission: PERMISSION_PUBLIC, handler: stats },
    Command { name: "user", permission: PERMISSION_TRUSTED, handler: user_stats },
    Command { name: "users", permission: PERMISSION_TRUSTED, handler: users },
    Command { name: "games", permission: PERMISSION_TRUSTED, handler: games },
    Command { name: "online", permission: PERMISSION_TRUSTED, handler: online },
    Command { name: "follow", permission: PERMISSION_TRUSTED, handler: follow },
    Command { name: "say", permission: PERMISSION_TRUSTED, handler: say },
    Command { name: "m", permission: PERMISSION_TRUSTED, handler: whisper },
    Command { name: "control", permission: PERMISSION_TRUSTED, handler: control },
    Command { name: "leave", permission: PERMISSION_TRUSTED, handler: leave },
    Command { name: "join", permission: PERMISSION_TRUSTED, handler: join },
    Command { name: "part", permission: PERMISSION_TRUSTED, handler: part },
    Command { name: "trust", permission: PERMISSION_ADMIN, handler: trust },
    Command { name: "gc", permission: PERMISSION_ADMIN, handler: gc },
    Command { name: "quit", permission: PERMISSION_ADMIN, handler: quit },
    Command { name: "quitwes", permission: PERMISSION_ADMIN, handler: quit_lobby },
    Command { name: "quitirc", permission: PERMISSION_ADMIN, handler: quit_irc },
    Command { name: "restart", permission: PERMISSION_ADMIN, handler: restart },
    Command { name: "ircreconnect", permission: PERMISSION_ADMIN, handler: irc_reconnect },
    Command { name: "wesreconnect", permission: PERMISSION_ADMIN, handler: lobby_reconnect },
];

pub fn find(name: &str) -> Option<&'static Command> {
    COMMANDS.iter().find(|c| c.name == name)
}

pub fn lobby_permission(sender: &str, registered: bool, config: &BridgeConfig) -> i32 {
    let master = config.bot.masters.iter().any(|m| m == sender);
    if registered && master {
        PERMISSION_ADMIN + 9
    } else if master && config.lobby.is_local() {
        PERMISSION_ADMIN + 1
    } else if registered && config.bot.trusted.iter().any(|t| t == sender) {
        PERMISSION_TRUSTED + 9
    } else if registered {
        PERMISSION_REGISTERED + 1
    } else {
        0
    }
}

pub fn irc_permission(sender: &str, config: &BridgeConfig) -> i32 {
    if config.bot.masters.iter().any(|m| m == sender) {
        PERMISSION_ADMIN + 5
    } else {
        0
    }
}

/// A chat line addressed to, or overheard by, the bridge
#[derive(Debug, Clone, Copy)]
pub struct Incoming<'a> {
    pub sender: &'a str,
    pub message: &'a str,
    pub permission: i32,
    pub origin: Origin,
    pub private: bool,
}

/// The parts of bridge state commands can read
#[derive(Clone, Copy)]
pub struct Environment<'a> {
    /// Name the bridge is known by, used to notice mentions
    pub own_name: &'a str,
    pub lobby: &'a LobbyState,
    pub stats: &'a LobbyStats,
    pub config: &'a BridgeConfig,
    pub now: Instant,
}

/// Decides whether a message is a command, a help request or neither.
///
/// Public chat from senders below trusted only ever gets help, and only
/// when it mentions the bridge.
pub fn route(incoming: &Incoming, env: &Environment) -> Vec<Effect> {
    let prefix = env.config.bot.prefix.as_str();
    let mentioned = !env.own_name.is_empty() && incoming.message.contains(env.own_name);

    if incoming.permission < PERMISSION_TRUSTED && !incoming.private {
        return if mentioned {
            run("help", incoming, env)
        } else {
            Vec::new()
        };
    }

    if let Some(command) = incoming.message.strip_prefix(prefix).filter(|_| !prefix.is_empty()) {
        run(command, incoming, env)
    } else if incoming.private && (incoming.message == "help" || mentioned) {
        run("help", incoming, env)
    } else if incoming.private {
        vec![Effect::Reply(format!(
            "Message not recognized. You are {} with permission {}",
            incoming.sender, incoming.permission
        ))]
    } else {
        Vec::new()
    }
}

/// Runs `line` (command name and arguments, prefix already removed)
pub fn run(line: &str, incoming: &Incoming, env: &Environment) -> Vec<Effect> {
    let (name, args) = line.split_once(' ').unwrap_or((line, ""));
    debug!("Command {} with args `{}` from {}", name, args, incoming.sender);

    match find(name) {
        Some(command) if incoming.permission > command.permission => {
            info!("{} runs {}", incoming.sender, name);
            let ctx = CommandContext {
                sender: incoming.sender,
                args: args.trim(),
                permission: incoming.permission,
                origin: incoming.origin,
                lobby: env.lobby,
                stats: env.stats,
                config: env.config,
                now: env.now,
            };
            (command.handler)(&ctx)
        }
        _ => vec![Effect::Reply(format!("Command {} not recognized", name))],
    }
}

fn reply(text: impl Into<String>) -> Vec<Effect> {
    vec![Effect::Reply(text.into())]
}

fn lifecycle(ctx: &CommandContext, name: &str, actions: ActionSet) -> Vec<Effect> {
    vec![Effect::Lifecycle {
        reason: format!("{} command used by {}", name, ctx.sender),
        actions,
    }]
}

fn help(ctx: &CommandContext) -> Vec<Effect> {
    reply(format!(
        "This bot relays between the game lobby and IRC channel {}. Current prefix: {}",
        ctx.config.irc.channel, ctx.config.bot.prefix
    ))
}

fn uptime(ctx: &CommandContext) -> Vec<Effect> {
    reply(ctx.stats.uptime_summary(ctx.now))
}

fn stats(ctx: &CommandContext) -> Vec<Effect> {
    reply(format!(
        "Game stats: {} open games, User stats: {} online, {} known",
        ctx.lobby.games.len(),
        ctx.stats.online_count(),
        ctx.stats.known_count()
    ))
}

fn user_stats(ctx: &CommandContext) -> Vec<Effect> {
    if ctx.args.is_empty() {
        return reply("user needs a name");
    }
    reply(ctx.stats.user_summary(ctx.args, ctx.now))
}

fn users(ctx: &CommandContext) -> Vec<Effect> {
    reply(format!("Known users: {}", ctx.stats.known_users().join(", ")))
}

fn games(ctx: &CommandContext) -> Vec<Effect> {
    let listed: Vec<String> = ctx.lobby.games.iter().map(|g| g.to_string()).collect();
    reply(format!("Games: {}", listed.join(", ")))
}

fn online(ctx: &CommandContext) -> Vec<Effect> {
    let names: Vec<&str> = ctx.lobby.users.iter().map(|u| u.name.as_str()).collect();
    reply(format!("Online: {}", names.join(", ")))
}

fn follow(ctx: &CommandContext) -> Vec<Effect> {
    let target = if ctx.args.is_empty() { ctx.sender } else { ctx.args };
    match ctx.lobby.user(target) {
        None => reply(format!("User {} not found", target)),
        Some(user) => match user.current_game() {
            None => reply(format!("User {} is not in a game", target)),
            Some(game_id) => vec![Effect::LobbySend(messages::observe_game(game_id))],
        },
    }
}

fn say(ctx: &CommandContext) -> Vec<Effect> {
    vec![Effect::LobbySend(messages::lobby_message(ctx.args, ""))]
}

fn whisper(ctx: &CommandContext) -> Vec<Effect> {
    match ctx.args.split_once(' ') {
        Some((receiver, message)) if !message.trim().is_empty() => vec![Effect::LobbyWhisper {
            receiver: receiver.to_string(),
            message: message.trim().to_string(),
        }],
        _ => reply("m needs a receiver and a message"),
    }
}

fn control(ctx: &CommandContext) -> Vec<Effect> {
    match ctx.args.split_once(' ') {
        Some((side, player)) if !player.trim().is_empty() => vec![Effect::LobbySend(
            messages::change_controller(side, player.trim()),
        )],
        _ => reply("control needs to have two arguments"),
    }
}

fn leave(_ctx: &CommandContext) -> Vec<Effect> {
    vec![Effect::LobbySend(messages::leave_game())]
}

fn join(ctx: &CommandContext) -> Vec<Effect> {
    vec![Effect::IrcJoin(ctx.args.to_string())]
}

fn part(ctx: &CommandContext) -> Vec<Effect> {
    vec![Effect::IrcPart(ctx.args.to_string())]
}

fn trust(ctx: &CommandContext) -> Vec<Effect> {
    if ctx.args.is_empty() {
        return reply("trust needs a name");
    }
    vec![Effect::Trust(ctx.args.to_string())]
}

fn gc(_ctx: &CommandContext) -> Vec<Effect> {
    vec![Effect::CollectGarbage(GC_AGE)]
}

fn quit(ctx: &CommandContext) -> Vec<Effect> {
    lifecycle(ctx, "quit", ActionSet::of(Action::Quit))
}

fn quit_lobby(ctx: &CommandContext) -> Vec<Effect> {
    lifecycle(ctx, "quitwes", ActionSet::of(Action::DisableLobby))
}

fn quit_irc(ctx: &CommandContext) -> Vec<Effect> {
    lifecycle(ctx, "quitirc", ActionSet::of(Action::DisableChat))
}

fn restart(ctx: &CommandContext) -> Vec<Effect> {
    lifecycle(ctx, "restart", ActionSet::of(Action::RestartProcess))
}

fn irc_reconnect(ctx: &CommandContext) -> Vec<Effect> {
    lifecycle(ctx, "ircreconnect", ActionSet::of(Action::ReconnectChat))
}

fn lobby_reconnect(ctx: &CommandContext) -> Vec<Effect> {
    lifecycle(ctx, "wesreconnect", ActionSet::of(Action::ReconnectLobby))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::LobbyDispatcher;

    fn config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.bot.masters = vec!["admin".to_string()];
        config.bot.trusted = vec!["helper".to_string()];
        config
    }

    fn lobby() -> LobbyState {
        let mut state = LobbyState::new();
        let snapshot = "[gamelist]\n[game]\nid=\"12\"\nname=\"duel\"\n[/game]\n[/gamelist]\n\
                        [user]\nname=\"admin\"\nregistered=\"yes\"\n[/user]\n\
                        [user]\nname=\"player\"\ngame_id=\"12\"\n[/user]\n";
        LobbyDispatcher::new().handle_text(&mut state, snapshot).unwrap();
        state
    }

    fn dispatch(
        message: &str,
        sender: &str,
        permission: i32,
        private: bool,
        lobby: &LobbyState,
        config: &BridgeConfig,
    ) -> Vec<Effect> {
        let stats = LobbyStats::new();
        let env = Environment {
            own_name: "bot",
            lobby,
            stats: &stats,
            config,
            now: Instant::now(),
        };
        let incoming = Incoming {
            sender,
            message,
            permission,
            origin: Origin::Lobby,
            private,
        };
        route(&incoming, &env)
    }

    #[test]
    fn test_lobby_permissions() {
        let config = config();
        assert_eq!(lobby_permission("admin", true, &config), 99);
        assert_eq!(lobby_permission("admin", false, &config), 0);
        assert_eq!(lobby_permission("helper", true, &config), 59);
        assert_eq!(lobby_permission("someone", true, &config), 11);
        assert_eq!(lobby_permission("someone", false, &config), 0);
        assert_eq!(irc_permission("admin", &config), 95);
        assert_eq!(irc_permission("someone", &config), 0);
    }

    #[test]
    fn test_local_master_without_registration() {
        let mut config = config();
        config.lobby.host = "localhost".to_string();
        assert_eq!(lobby_permission("admin", false, &config), 91);
    }

    #[test]
    fn test_admin_quit_requests_quit() {
        let (lobby, config) = (lobby(), config());
        let effects = dispatch("!quit", "admin", 99, true, &lobby, &config);
        assert!(matches!(
            effects.as_slice(),
            [Effect::Lifecycle { actions, .. }] if actions.contains(Action::Quit)
        ));
    }

    #[test]
    fn test_stats_counts_online_users_from_events() {
        let (mut lobby, config) = (lobby(), config());
        let now = Instant::now();
        let mut stats = LobbyStats::new();
        stats.record(&lobby.users.take_events(), now);

        let env = Environment {
            own_name: "bot",
            lobby: &lobby,
            stats: &stats,
            config: &config,
            now,
        };
        let incoming = Incoming {
            sender: "someone",
            message: "!stats",
            permission: 0,
            origin: Origin::Irc,
            private: true,
        };
        assert_eq!(
            route(&incoming, &env),
            vec![Effect::Reply(
                "Game stats: 1 open games, User stats: 2 online, 2 known".into()
            )]
        );
    }

    #[test]
    fn test_permission_is_strict() {
        let (lobby, config) = (lobby(), config());
        // trusted commands need more than 50
        let effects = dispatch("!online", "x", PERMISSION_TRUSTED, true, &lobby, &config);
        assert_eq!(effects, vec![Effect::Reply("Command online not recognized".into())]);

        let effects = dispatch("!online", "helper", 59, true, &lobby, &config);
        assert_eq!(effects, vec![Effect::Reply("Online: admin, player".into())]);
    }

    #[test]
    fn test_unknown_command() {
        let (lobby, config) = (lobby(), config());
        let effects = dispatch("!dance", "admin", 99, true, &lobby, &config);
        assert_eq!(effects, vec![Effect::Reply("Command dance not recognized".into())]);
    }

    #[test]
    fn test_public_chat_from_untrusted_only_gets_help_on_mention() {
        let (lobby, config) = (lobby(), config());
        assert!(dispatch("!uptime", "someone", 11, false, &lobby, &config).is_empty());

        let effects = dispatch("hey bot, what are you?", "someone", 11, false, &lobby, &config);
        assert!(matches!(effects.as_slice(), [Effect::Reply(text)] if text.contains("Current prefix: !")));
    }

    #[test]
    fn test_private_routing() {
        let (lobby, config) = (lobby(), config());
        let effects = dispatch("help", "someone", 0, true, &lobby, &config);
        assert!(matches!(effects.as_slice(), [Effect::Reply(text)] if text.starts_with("This bot")));

        let effects = dispatch("hello", "someone", 0, true, &lobby, &config);
        assert_eq!(
            effects,
            vec![Effect::Reply("Message not recognized. You are someone with permission 0".into())]
        );

        let effects = dispatch("!uptime", "someone", 0, true, &lobby, &config);
        assert!(matches!(effects.as_slice(), [Effect::Reply(text)] if text.starts_with("Time since first connect")));
    }

    #[test]
    fn test_follow_observes_current_game() {
        let (lobby, config) = (lobby(), config());
        let effects = dispatch("!follow player", "admin", 99, true, &lobby, &config);
        assert_eq!(effects, vec![Effect::LobbySend(messages::observe_game("12"))]);

        let effects = dispatch("!follow nobody", "admin", 99, true, &lobby, &config);
        assert_eq!(effects, vec![Effect::Reply("User nobody not found".into())]);

        // without a name the sender is followed
        let effects = dispatch("!follow", "admin", 99, true, &lobby, &config);
        assert_eq!(effects, vec![Effect::Reply("User admin is not in a game".into())]);
    }

    #[test]
    fn test_argument_checks() {
        let (lobby, config) = (lobby(), config());
        assert_eq!(
            dispatch("!control 1", "admin", 99, true, &lobby, &config),
            vec![Effect::Reply("control needs to have two arguments".into())]
        );
        assert_eq!(
            dispatch("!control 2 player", "admin", 99, true, &lobby, &config),
            vec![Effect::LobbySend(messages::change_controller("2", "player"))]
        );
        assert_eq!(
            dispatch("!m player hi there", "admin", 99, true, &lobby, &config),
            vec![Effect::LobbyWhisper {
                receiver: "player".into(),
                message: "hi there".into()
            }]
        );
    }

    #[test]
    fn test_every_command_is_listed_once() {
        for command in COMMANDS {
            assert_eq!(COMMANDS.iter().filter(|c| c.name == command.name).count(), 1);
        }
        assert!(find("wesreconnect").is_some());
    }
}
