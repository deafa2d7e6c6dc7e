//! The bridge's cooperative main loop
//!
//! One iteration polls IRC once, then drains up to [`LOBBY_DRAIN`] lobby
//! documents. Failures and command requests only add to the pending
//! [`ActionSet`]; after the iteration the set becomes a [`Plan`] that tears
//! down, reconnects or ends the process.

use crate::commands::{self, Effect, Environment, Incoming, Origin};
use crate::config::BridgeConfig;
use crate::hasher::ConfiguredHasher;
use crate::irc::{self, IrcConnection, IrcEvent, IrcMessage};
use crate::lifecycle::{self, Action, ActionSet, BridgeError, Exit, Plan};
use crate::lobby::{ChatKind, ChatMessage, LobbyDispatcher, LobbyState};
use crate::session::{LobbySession, LoginOutcome};
use crate::stats::LobbyStats;
use log::{debug, error, info, warn};
use shared::messages;
use std::time::{Duration, Instant};

/// Lobby documents handled per iteration at most
pub const LOBBY_DRAIN: usize = 16;

/// Read timeout of the IRC socket
pub const IRC_READ_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Bridge {
    config: BridgeConfig,
    lobby: Option<LobbySession<ConfiguredHasher>>,
    irc: Option<IrcConnection>,
    state: LobbyState,
    dispatcher: LobbyDispatcher,
    stats: LobbyStats,
    pending: ActionSet,
    lobby_enabled: bool,
    chat_enabled: bool,
    /// Lobby name after login, possibly with rename underscores
    own_name: String,
    /// Failed lobby attempts since the last successful login
    login_failures: u32,
}

impl Bridge {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            lobby_enabled: config.lobby.enabled,
            chat_enabled: config.irc.enabled,
            own_name: config.lobby.username.clone(),
            config,
            lobby: None,
            irc: None,
            state: LobbyState::new(),
            dispatcher: LobbyDispatcher::new(),
            stats: LobbyStats::new(),
            pending: ActionSet::new(),
            login_failures: 0,
        }
    }

    /// Runs until an exit is planned
    pub async fn run(&mut self) -> Exit {
        loop {
            if let Err(e) = self.iterate().await {
                self.fail(e);
            }
            let plan = lifecycle::plan(&self.pending.take(), self.lobby_enabled, self.chat_enabled);
            if let Some(exit) = self.execute(plan).await {
                info!("Bridge stopping: {:?}", exit);
                return exit;
            }
        }
    }

    pub fn lobby_state(&self) -> &LobbyState {
        &self.state
    }

    pub fn stats(&self) -> &LobbyStats {
        &self.stats
    }

    async fn iterate(&mut self) -> Result<(), BridgeError> {
        if !self.lobby_enabled && !self.chat_enabled {
            return Ok(());
        }
        self.ensure_connections().await?;

        if self.irc.is_some() {
            let events = match self.irc.as_mut() {
                Some(irc) => irc.poll().await,
                None => Ok(Vec::new()),
            };
            match events {
                Ok(events) => {
                    for event in events {
                        self.on_irc_event(event).await;
                    }
                }
                Err(e) => self.fail(e),
            }
        }

        for _ in 0..LOBBY_DRAIN {
            let text = match self.lobby.as_mut() {
                Some(lobby) => lobby.receive().await?,
                None => break,
            };
            let Some(text) = text else { break };

            let dispatch = self.dispatcher.handle_text(&mut self.state, &text)?;
            self.pending.merge(dispatch.actions);
            self.record_membership();
            for chat in dispatch.chat {
                self.on_lobby_chat(chat).await;
            }
        }
        Ok(())
    }

    async fn ensure_connections(&mut self) -> Result<(), BridgeError> {
        if self.chat_enabled && self.irc.is_none() {
            match IrcConnection::connect(&self.config.irc, IRC_READ_TIMEOUT).await {
                Ok(irc) => self.irc = Some(irc),
                Err(e) => self.fail(e),
            }
        }
        if self.lobby_enabled && self.lobby.is_none() {
            self.connect_lobby().await?;
        }
        Ok(())
    }

    /// One connect and login attempt per call.
    ///
    /// A refused login surfaces as [`BridgeError::LoginFailed`] so the plan
    /// retries it on a fresh connection; the attempt that exhausts
    /// `login_attempts` is Fatal instead.
    async fn connect_lobby(&mut self) -> Result<(), BridgeError> {
        let attempts = self.config.lobby.login_attempts;
        match self.join_lobby().await {
            Ok(()) => {
                self.login_failures = 0;
                Ok(())
            }
            Err(e @ BridgeError::Fatal(_)) => Err(e),
            Err(e) => {
                self.login_failures += 1;
                warn!("Lobby attempt {}/{} failed: {}", self.login_failures, attempts, e);
                if self.login_failures >= attempts {
                    Err(BridgeError::Fatal(format!(
                        "did not manage to join lobby in {} attempts",
                        attempts
                    )))
                } else {
                    Err(e)
                }
            }
        }
    }

    async fn join_lobby(&mut self) -> Result<(), BridgeError> {
        let lobby = &self.config.lobby;
        let mut session = LobbySession::connect(
            &lobby.host,
            lobby.port,
            &lobby.version,
            lobby.password_hasher(),
            lobby.timeouts(),
        )
        .await?;

        let outcome = session.login(&lobby.username, &lobby.password).await;
        match outcome {
            Ok(LoginOutcome::Joined { username }) => {
                info!("Managed to join lobby as {}", username);
                self.own_name = username;
                self.stats.record_connect(Instant::now());
                self.lobby = Some(session);
                Ok(())
            }
            Ok(LoginOutcome::Rejected(reason)) => {
                session.shutdown().await;
                Err(BridgeError::LoginFailed(format!("{:?}", reason)))
            }
            Err(e) => {
                session.shutdown().await;
                Err(e)
            }
        }
    }

    async fn on_irc_event(&mut self, event: IrcEvent) {
        match event {
            IrcEvent::TooManyConnections => {
                let current = self.config.irc.network.clone();
                let mut rng = rand::thread_rng();
                if let Some(next) = irc::pick_alternative(&current, &self.config.irc.alt_networks, &mut rng) {
                    info!("Switching IRC network from {} to {}", current, next);
                    self.config.irc.network = next;
                }
                self.pending.insert(Action::ReconnectChat);
            }
            IrcEvent::Message(message) => self.on_irc_message(message).await,
        }
    }

    async fn on_irc_message(&mut self, message: IrcMessage) {
        let permission = commands::irc_permission(&message.sender, &self.config);
        let incoming = Incoming {
            sender: &message.sender,
            message: &message.text,
            permission,
            origin: Origin::Irc,
            private: message.is_private(),
        };
        let effects = commands::route(&incoming, &self.environment());
        self.apply_effects(effects, Origin::Irc, &message.sender).await;
    }

    async fn on_lobby_chat(&mut self, chat: ChatMessage) {
        if chat.is_private() {
            self.log_on_irc(&format!("<{}> -> <{}>: {}", chat.sender, self.own_name, chat.message))
                .await;
        } else if chat.kind == ChatKind::Lobby && self.config.irc.relay_public {
            self.log_on_irc(&format!("<{}> {}", chat.sender, chat.message)).await;
        }

        let registered = self.state.is_registered(&chat.sender);
        let permission = commands::lobby_permission(&chat.sender, registered, &self.config);
        let incoming = Incoming {
            sender: &chat.sender,
            message: &chat.message,
            permission,
            origin: Origin::Lobby,
            private: chat.is_private(),
        };
        let effects = commands::route(&incoming, &self.environment());
        self.apply_effects(effects, Origin::Lobby, &chat.sender).await;
    }

    fn environment(&self) -> Environment<'_> {
        Environment {
            own_name: &self.own_name,
            lobby: &self.state,
            stats: &self.stats,
            config: &self.config,
            now: Instant::now(),
        }
    }

    async fn apply_effects(&mut self, effects: Vec<Effect>, origin: Origin, sender: &str) {
        for effect in effects {
            match effect {
                Effect::Reply(text) => self.send_privately(origin, sender, &text).await,
                Effect::LobbySend(node) => self.lobby_send(&messages::document([node])).await,
                Effect::LobbyWhisper { receiver, message } => {
                    self.send_privately(Origin::Lobby, &receiver, &message).await
                }
                Effect::IrcJoin(channel) => {
                    if let Some(irc) = self.irc.as_mut() {
                        if let Err(e) = irc.join(&channel).await {
                            self.fail(e);
                        }
                    }
                }
                Effect::IrcPart(channel) => {
                    if let Some(irc) = self.irc.as_mut() {
                        if let Err(e) = irc.part(&channel).await {
                            self.fail(e);
                        }
                    }
                }
                Effect::Trust(name) => {
                    self.config.bot.trusted.push(name.clone());
                    let reply = format!(
                        "Added '{}' to trusted names. Current list: {}",
                        name,
                        self.config.bot.trusted.join(", ")
                    );
                    self.send_privately(origin, sender, &reply).await;
                }
                Effect::CollectGarbage(age) => {
                    let removed = self.stats.gc(Instant::now(), age);
                    let reply = format!("Users garbage collection done, {} removed", removed);
                    self.send_privately(origin, sender, &reply).await;
                }
                Effect::Lifecycle { reason, actions } => {
                    info!("{}", reason);
                    self.pending.merge(actions);
                }
            }
        }
    }

    async fn send_privately(&mut self, origin: Origin, receiver: &str, text: &str) {
        match origin {
            Origin::Irc => {
                if let Some(irc) = self.irc.as_mut() {
                    if let Err(e) = irc.whisper(receiver, text).await {
                        self.fail(e);
                    }
                }
            }
            Origin::Lobby => {
                self.log_on_irc(&format!("<{}> -> <{}>: {}", self.own_name, receiver, text))
                    .await;
                let whisper = messages::whisper(&self.own_name, receiver, text);
                self.lobby_send(&messages::document([whisper])).await;
            }
        }
    }

    async fn lobby_send(&mut self, document: &str) {
        match self.lobby.as_mut() {
            Some(lobby) => {
                if let Err(e) = lobby.send(document).await {
                    self.fail(e);
                }
            }
            None => warn!("Dropping lobby request while disconnected"),
        }
    }

    async fn log_on_irc(&mut self, text: &str) {
        info!("{}", text);
        if let Some(irc) = self.irc.as_mut() {
            if let Err(e) = irc.say(text).await {
                self.fail(e);
            }
        }
    }

    fn record_membership(&mut self) {
        let events = self.state.users.take_events();
        self.stats.record(&events, Instant::now());
        let games = self.state.games.take_events();
        if !games.is_empty() {
            debug!("{} game list changes", games.len());
        }
    }

    fn fail(&mut self, err: BridgeError) {
        match &err {
            BridgeError::Fatal(_) | BridgeError::ProtocolViolation(_) => error!("{}", err),
            _ => warn!("{}", err),
        }
        self.pending.merge(err.actions());
    }

    async fn execute(&mut self, plan: Plan) -> Option<Exit> {
        if plan.teardown_chat {
            if let Some(mut irc) = self.irc.take() {
                irc.shutdown().await;
            }
        }
        if plan.teardown_lobby {
            if let Some(mut lobby) = self.lobby.take() {
                lobby.shutdown().await;
            }
            self.state.reset();
            self.record_membership();
        }
        self.lobby_enabled = plan.lobby_enabled;
        self.chat_enabled = plan.chat_enabled;

        if plan.exit.is_some() {
            return plan.exit;
        }
        let reconnecting = (plan.teardown_lobby && self.lobby_enabled)
            || (plan.teardown_chat && self.chat_enabled);
        if reconnecting {
            let delay = self.config.bot.reconnect_delay();
            info!("Reconnecting in {:?}", delay);
            tokio::time::sleep(delay).await;
        }
        None
    }
}
