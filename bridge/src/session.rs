//! Lobby session setup: version negotiation, redirects and login
//!
//! A session is usable once [`LobbySession::connect`] has negotiated the
//! protocol version and [`LobbySession::login`] has returned
//! [`LoginOutcome::Joined`]. From then on it is a thin wrapper that sends
//! and receives whole documents.

use crate::hasher::PasswordHasher;
use crate::lifecycle::BridgeError;
use crate::transport::FrameTransport;
use log::{debug, info, warn};
use shared::messages::{self, LoginReply};
use shared::wml;
use std::time::Duration;

/// Redirects followed before the server is considered broken
pub const MAX_REDIRECTS: usize = 2;

/// Underscore renames tried when the name is taken
pub const MAX_RENAMES: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct SessionTimeouts {
    /// One socket read; a timeout here just means "no message yet"
    pub read: Duration,
    /// How long a request waits for its reply
    pub reply: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(1),
            reply: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    Joined { username: String },
    Rejected(LoginRejection),
}

impl LoginOutcome {
    pub fn is_joined(&self) -> bool {
        matches!(self, LoginOutcome::Joined { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginRejection {
    /// The hash was checked and is wrong
    BadPassword,
    /// A password is required but none (or an unusable one) was accepted
    PasswordRequested,
    /// The hasher could not produce a hash for the challenge
    Hasher(String),
    Unrecognized(String),
}

enum Negotiation {
    Accepted,
    Redirect { host: Option<String>, port: u16 },
}

enum Attempt {
    Done(LoginOutcome),
    NameTaken,
}

pub struct LobbySession<H> {
    transport: FrameTransport,
    hasher: H,
    host: String,
    port: u16,
    timeouts: SessionTimeouts,
    username: Option<String>,
}

impl<H: PasswordHasher> LobbySession<H> {
    /// Connects, negotiates `version` and follows redirects
    pub async fn connect(
        host: &str,
        port: u16,
        version: &str,
        hasher: H,
        timeouts: SessionTimeouts,
    ) -> Result<Self, BridgeError> {
        let mut host = host.to_string();
        let mut port = port;
        let mut redirects = 0;

        loop {
            let mut transport = FrameTransport::connect(&host, port, timeouts.read).await?;
            match negotiate_version(&mut transport, version, timeouts.reply).await? {
                Negotiation::Accepted => {
                    info!("Lobby at {}:{} accepted version {}", host, port, version);
                    return Ok(Self {
                        transport,
                        hasher,
                        host,
                        port,
                        timeouts,
                        username: None,
                    });
                }
                Negotiation::Redirect {
                    host: new_host,
                    port: new_port,
                } => {
                    transport.shutdown().await;
                    redirects += 1;
                    if redirects > MAX_REDIRECTS {
                        return Err(BridgeError::Fatal(format!(
                            "more than {} redirects, last one to port {}",
                            MAX_REDIRECTS, new_port
                        )));
                    }
                    if let Some(new_host) = new_host {
                        host = new_host;
                    }
                    port = new_port;
                    info!("Redirected to {}:{}", host, port);
                }
            }
        }
    }

    /// Logs in as `username`, answering a password challenge if one comes.
    ///
    /// A taken name is retried with an underscore appended and no password,
    /// at most [`MAX_RENAMES`] times.
    pub async fn login(
        &mut self,
        username: &str,
        password: &str,
    ) -> Result<LoginOutcome, BridgeError> {
        let mut name = username.to_string();
        let mut password = password.to_string();

        for _ in 0..=MAX_RENAMES {
            match self.login_once(&name, &password).await? {
                Attempt::Done(outcome) => {
                    if let LoginOutcome::Joined { username } = &outcome {
                        self.username = Some(username.clone());
                    }
                    return Ok(outcome);
                }
                Attempt::NameTaken => {
                    warn!("Login failed, name {} taken", name);
                    name.push('_');
                    password.clear();
                }
            }
        }
        Err(BridgeError::Fatal(format!(
            "name still taken after {} renames",
            MAX_RENAMES
        )))
    }

    async fn login_once(&mut self, name: &str, password: &str) -> Result<Attempt, BridgeError> {
        self.send(&messages::document([messages::login(name, "", false)]))
            .await?;
        let mut reply = self.transport.await_text(self.timeouts.reply).await?;
        debug!("Login reply: {}", reply.trim());

        if messages::classify_login_reply(&reply) == LoginReply::Joined {
            return Ok(Attempt::Done(joined(name)));
        }

        if let Some(salt) = messages::find_salt(&reply) {
            let hash = match self.hasher.hash(password, &salt) {
                Ok(hash) => hash,
                Err(e) => {
                    warn!("Could not hash password for {}: {}", name, e);
                    return Ok(Attempt::Done(LoginOutcome::Rejected(
                        LoginRejection::Hasher(e.to_string()),
                    )));
                }
            };
            debug!("Answering password challenge for {}", name);
            self.send(&messages::document([messages::login(name, &hash, true)]))
                .await?;
            reply = self.transport.await_text(self.timeouts.reply).await?;
            debug!("Auth reply: {}", reply.trim());
        }

        let outcome = match messages::classify_login_reply(&reply) {
            LoginReply::Joined => joined(name),
            LoginReply::BadPassword => {
                warn!("Login failed, wrong password hash for {}", name);
                LoginOutcome::Rejected(LoginRejection::BadPassword)
            }
            LoginReply::PasswordRequested => {
                warn!("Login failed, no usable password for {}", name);
                LoginOutcome::Rejected(LoginRejection::PasswordRequested)
            }
            LoginReply::NameTaken => return Ok(Attempt::NameTaken),
            LoginReply::Unrecognized => {
                LoginOutcome::Rejected(LoginRejection::Unrecognized(reply.trim().to_string()))
            }
        };
        Ok(Attempt::Done(outcome))
    }

    pub async fn send(&mut self, document: &str) -> Result<(), BridgeError> {
        Ok(self.transport.send_text(document).await?)
    }

    pub async fn receive(&mut self) -> Result<Option<String>, BridgeError> {
        Ok(self.transport.receive_text().await?)
    }

    pub async fn shutdown(&mut self) {
        self.transport.shutdown().await;
    }

    /// Name the session joined under, which may carry rename underscores
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn endpoint(&self) -> (&str, u16) {
        (&self.host, self.port)
    }
}

fn joined(name: &str) -> LoginOutcome {
    info!("Joined lobby as {}", name);
    LoginOutcome::Joined {
        username: name.to_string(),
    }
}

async fn negotiate_version(
    transport: &mut FrameTransport,
    version: &str,
    reply_timeout: Duration,
) -> Result<Negotiation, BridgeError> {
    let request = transport.await_text(reply_timeout).await?;
    if !request.contains("[version]") {
        return Err(BridgeError::Fatal(format!(
            "server did not ask for a version, sent: {}",
            request.trim()
        )));
    }

    transport
        .send_text(&messages::document([messages::version(version)]))
        .await?;
    let response = transport.await_text(reply_timeout).await?;
    let values = wml::parse(&response)?.flatten_child_attributes();

    match values.get("port") {
        None => Ok(Negotiation::Accepted),
        Some(raw) => {
            let port = raw.parse().map_err(|_| {
                BridgeError::ProtocolViolation(format!("redirect to invalid port `{}`", raw))
            })?;
            debug!("Server wants a different endpoint: {:?}", values);
            Ok(Negotiation::Redirect {
                host: values.get("host").filter(|h| !h.is_empty()).cloned(),
                port,
            })
        }
    }
}
