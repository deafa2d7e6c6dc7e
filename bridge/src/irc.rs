//! Line-based IRC client for the relay channel

use crate::config::IrcSection;
use crate::lifecycle::{BridgeError, Link};
use log::{debug, info, trace, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Notice sent by some networks when they refuse another connection
pub const TOO_MANY_CONNECTIONS: &str = "Too many connections from your IP";

/// Longest unterminated line kept while waiting for its newline
pub const MAX_LINE_LEN: usize = 16 * 1024;

const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// A `PRIVMSG` addressed to the channel or to the bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrcMessage {
    pub sender: String,
    pub target: String,
    pub text: String,
}

impl IrcMessage {
    pub fn is_private(&self) -> bool {
        !self.target.starts_with('#')
    }

    /// Parses `:nick!user@host PRIVMSG target :text`
    pub fn parse(line: &str) -> Option<Self> {
        let (prefix, rest) = line.strip_prefix(':')?.split_once(' ')?;
        let (command, rest) = rest.split_once(' ')?;
        if command != "PRIVMSG" {
            return None;
        }
        let (target, text) = rest.split_once(' ')?;
        Some(Self {
            sender: prefix.split('!').next().unwrap_or(prefix).to_string(),
            target: target.to_string(),
            text: text.strip_prefix(':').unwrap_or(text).to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrcEvent {
    Message(IrcMessage),
    /// The network refused us; another network should be tried
    TooManyConnections,
}

pub struct IrcConnection<S = TcpStream> {
    stream: S,
    nick: String,
    password: String,
    channel: String,
    no_highlight: Vec<String>,
    read_timeout: Duration,
    partial: Vec<u8>,
    authenticated: bool,
    in_channel: bool,
}

impl IrcConnection<TcpStream> {
    pub async fn connect(config: &IrcSection, read_timeout: Duration) -> Result<Self, BridgeError> {
        let wait = read_timeout * 10;
        let stream = timeout(wait, TcpStream::connect((config.network.as_str(), config.port)))
            .await
            .map_err(|_| lost(format!("connect to {} timed out", config.network)))?
            .map_err(|e| lost(format!("connect to {}: {}", config.network, e)))?;
        info!("Connected to IRC at {}:{}", config.network, config.port);

        let mut connection = Self::new(stream, config, read_timeout);
        connection.login().await?;
        Ok(connection)
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> IrcConnection<S> {
    pub fn new(stream: S, config: &IrcSection, read_timeout: Duration) -> Self {
        Self {
            stream,
            nick: config.nick.clone(),
            password: config.password.clone(),
            channel: config.channel.clone(),
            no_highlight: config.no_highlight.clone(),
            read_timeout,
            partial: Vec::new(),
            authenticated: false,
            in_channel: false,
        }
    }

    pub async fn login(&mut self) -> Result<(), BridgeError> {
        if !self.password.is_empty() {
            let pass = format!("PASS {}", self.password);
            self.send_line(&pass).await?;
        }
        let nick = format!("NICK {}", self.nick);
        self.send_line(&nick).await?;
        let user = format!("USER {0} {0} {0} :Lobby bridge", self.nick);
        self.send_line(&user).await
    }

    pub async fn join(&mut self, channel: &str) -> Result<(), BridgeError> {
        self.send_line(&format!("JOIN {}", channel)).await
    }

    pub async fn part(&mut self, channel: &str) -> Result<(), BridgeError> {
        self.send_line(&format!("PART {}", channel)).await
    }

    /// Posts to the home channel
    pub async fn say(&mut self, message: &str) -> Result<(), BridgeError> {
        let target = self.channel.clone();
        self.whisper(&target, message).await
    }

    pub async fn whisper(&mut self, target: &str, message: &str) -> Result<(), BridgeError> {
        let text = defuse(&flatten(message), &self.no_highlight);
        self.send_line(&format!("PRIVMSG {} :{}", target, text)).await
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn in_channel(&self) -> bool {
        self.in_channel
    }

    /// Reads once, answering server housekeeping lines itself.
    ///
    /// A timeout yields no events. A trailing partial line stays buffered
    /// until the rest arrives.
    pub async fn poll(&mut self) -> Result<Vec<IrcEvent>, BridgeError> {
        let mut chunk = [0u8; 4096];
        let n = match timeout(self.read_timeout, self.stream.read(&mut chunk)).await {
            Err(_) => return Ok(Vec::new()),
            Ok(Ok(0)) => return Err(lost("server closed the connection".to_string())),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(lost(e.to_string())),
        };
        self.partial.extend_from_slice(&chunk[..n]);

        let mut events = Vec::new();
        while let Some(end) = self.partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.partial.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(&['\r', '\n'][..]);
            if let Some(event) = self.act_on_line(line).await? {
                events.push(event);
            }
        }
        if self.partial.len() > MAX_LINE_LEN {
            return Err(lost(format!(
                "line longer than {} bytes without a newline",
                MAX_LINE_LEN
            )));
        }
        Ok(events)
    }

    async fn act_on_line(&mut self, line: &str) -> Result<Option<IrcEvent>, BridgeError> {
        if let Some(rest) = line.strip_prefix("PING") {
            trace!("recv {}", line);
            self.send_line(&format!("PONG{}", rest)).await?;
            return Ok(None);
        }
        debug!("recv {}", line);

        if is_numeric(line, "451") {
            self.login().await?;
            return Ok(None);
        }
        if line == format!(":NickServ MODE {} :+r", self.nick) {
            info!("Authenticated on IRC as {}", self.nick);
            self.authenticated = true;
            let channel = self.channel.clone();
            self.join(&channel).await?;
            return Ok(None);
        }
        if line.contains(&format!("MODE {} +o {}", self.channel, self.nick)) {
            info!("Operator in {}", self.channel);
            self.in_channel = true;
            return Ok(None);
        }
        if self.password.is_empty() && is_numeric(line, "001") {
            // nothing to identify with, so join right after the welcome
            let channel = self.channel.clone();
            self.join(&channel).await?;
            return Ok(None);
        }

        let from_network = line.starts_with(":IRC ") || line.starts_with(":IRC!");
        if from_network {
            if line.contains(TOO_MANY_CONNECTIONS) {
                warn!("IRC network refuses more connections");
                return Ok(Some(IrcEvent::TooManyConnections));
            }
            return Ok(None);
        }

        Ok(IrcMessage::parse(line).map(IrcEvent::Message))
    }

    async fn send_line(&mut self, line: &str) -> Result<(), BridgeError> {
        if line.starts_with("PONG") {
            trace!("send {}", line);
        } else {
            debug!("send {}", line);
        }
        let framed = format!("{}\r\n", line);
        self.stream
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| lost(e.to_string()))?;
        self.stream.flush().await.map_err(|e| lost(e.to_string()))
    }

    pub async fn shutdown(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("IRC socket shutdown: {}", e);
        }
    }
}

/// Picks a random network other than `current`
pub fn pick_alternative<R: Rng>(current: &str, alternatives: &[String], rng: &mut R) -> Option<String> {
    let others: Vec<&String> = alternatives.iter().filter(|n| *n != current).collect();
    others.choose(rng).map(|n| n.to_string())
}

fn is_numeric(line: &str, code: &str) -> bool {
    line.split(' ').nth(1) == Some(code)
}

fn lost(reason: String) -> BridgeError {
    BridgeError::connection_lost(Link::Chat, reason)
}

fn flatten(message: &str) -> String {
    message.replace('\n', " ").replace('\r', "")
}

/// Breaks configured names with a zero-width space so they do not highlight
fn defuse(message: &str, names: &[String]) -> String {
    names.iter().filter(|n| !n.is_empty()).fold(message.to_string(), |text, name| {
        let mut chars = name.chars();
        let broken = match chars.next() {
            Some(first) => format!("{}{}{}", first, ZERO_WIDTH_SPACE, chars.as_str()),
            None => return text,
        };
        text.replace(name.as_str(), &broken)
    })
}
