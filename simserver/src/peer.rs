//! One accepted client, seen from the server side

use crate::config::LobbyConfig;
use log::{debug, info, warn};
use shared::frame::{self, FrameError};
use shared::messages::{JOIN_LOBBY, NAME_TAKEN_MARKER};
use shared::wml::{self, Node, WmlError};
use shared::phpass;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Upper bound on waiting for a client document
pub const RECV_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum SimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Wml(#[from] WmlError),

    #[error("client sent nothing within {0:?}")]
    Timeout(Duration),

    #[error("client closed the connection")]
    Closed,

    #[error("unexpected client document: {0}")]
    Protocol(String),

    #[error("client was redirected")]
    Redirected,
}

/// Result of the version exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Negotiated {
    Accepted,
    Redirected,
}

/// A connected client after the handshake
pub struct SimPeer {
    stream: TcpStream,
    inbound: Vec<u8>,
    /// Name the client joined the lobby under
    pub username: Option<String>,
}

impl SimPeer {
    pub(crate) fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            inbound: Vec::new(),
            username: None,
        }
    }

    pub async fn send_text(&mut self, document: &str) -> Result<(), SimError> {
        let bytes = frame::encode_frame(document.as_bytes())?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn send_node(&mut self, node: &Node) -> Result<(), SimError> {
        self.send_text(&node.to_string()).await
    }

    /// Waits up to [`RECV_TIMEOUT`] for the next document
    pub async fn recv_text(&mut self) -> Result<String, SimError> {
        match self.try_recv_text(RECV_TIMEOUT).await? {
            Some(text) => Ok(text),
            None => Err(SimError::Timeout(RECV_TIMEOUT)),
        }
    }

    /// `Ok(None)` when nothing arrives within `wait` or the client hung up
    pub async fn try_recv_text(&mut self, wait: Duration) -> Result<Option<String>, SimError> {
        match timeout(wait, self.read_frame()).await {
            Err(_) | Ok(Err(SimError::Closed)) => Ok(None),
            Ok(result) => result.map(Some),
        }
    }

    pub async fn recv_document(&mut self) -> Result<Node, SimError> {
        let text = self.recv_text().await?;
        Ok(wml::parse(&text)?)
    }

    async fn read_frame(&mut self) -> Result<String, SimError> {
        loop {
            if let Some((body, used)) = frame::split_frame(&self.inbound)? {
                let payload = frame::decompress(body)?;
                self.inbound.drain(..used);
                return Ok(String::from_utf8_lossy(&payload).into_owned());
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await?;
            if n == 0 {
                return Err(SimError::Closed);
            }
            self.inbound.extend_from_slice(&chunk[..n]);
        }
    }

    /// Asks for the client version, then either accepts or redirects it
    pub async fn negotiate_version(&mut self, config: &LobbyConfig) -> Result<Negotiated, SimError> {
        self.send_text("[version]\n[/version]\n").await?;
        let reply = self.recv_document().await?;
        let version = reply
            .child("version")
            .and_then(|v| v.attr("version"))
            .ok_or_else(|| SimError::Protocol(format!("expected [version], got {}", reply)))?
            .to_string();
        debug!("Client reports version {}", version);

        if let Some(required) = &config.required_version {
            if *required != version {
                self.send_node(&Node::new("reject").with_attr("accepted_versions", required.as_str()))
                    .await?;
                return Err(SimError::Protocol(format!("version {} rejected", version)));
            }
        }

        if let Some((host, port)) = &config.redirect {
            info!("Redirecting client to {}:{}", host, port);
            let redirect = Node::new("redirect")
                .with_attr("host", host.as_str())
                .with_attr("port", port.to_string());
            self.send_node(&redirect).await?;
            return Ok(Negotiated::Redirected);
        }

        self.send_node(&Node::new("mustlogin")).await?;
        Ok(Negotiated::Accepted)
    }

    /// Answers `[login]` requests until one of them joins the lobby
    pub async fn serve_login(&mut self, config: &LobbyConfig) -> Result<String, SimError> {
        loop {
            let document = self.recv_document().await?;
            let login = document
                .child("login")
                .ok_or_else(|| SimError::Protocol(format!("expected [login], got {}", document)))?;
            let name = login.attr_or_empty("username").to_string();
            let password = login.attr_or_empty("password");

            if config.online.contains(&name) {
                debug!("Name {} is taken", name);
                let message = format!("The nickname '{}' {}", name, NAME_TAKEN_MARKER);
                self.send_node(&Node::new("error").with_attr("message", message))
                    .await?;
                continue;
            }

            if let Some(expected) = config.accounts.get(&name) {
                if password.is_empty() || login.attr("force_confirmation") != Some("yes") {
                    debug!("Challenging {} with salt {}", name, config.salt);
                    let challenge = Node::new("error")
                        .with_attr(
                            "message",
                            format!("The nickname '{}' is registered on this server.", name),
                        )
                        .with_attr("password_request", "yes")
                        .with_attr("salt", config.salt.as_str());
                    self.send_node(&challenge).await?;
                    continue;
                }

                let wanted = phpass::lobby_password_hash(expected, &config.salt)
                    .map_err(|e| SimError::Protocol(e.to_string()))?;
                if password != wanted {
                    warn!("Wrong password hash for {}", name);
                    let rejection = Node::new("error")
                        .with_attr(
                            "message",
                            format!(
                                "The password you provided for the nickname '{}' was incorrect.",
                                name
                            ),
                        )
                        .with_attr("password_request", "yes");
                    self.send_node(&rejection).await?;
                    continue;
                }
            }

            self.send_text(&format!("{}\n", JOIN_LOBBY)).await?;
            info!("{} joined the lobby", name);
            self.username = Some(name.clone());
            return Ok(name);
        }
    }

    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("Peer shutdown: {}", e);
        }
    }
}
