//! Listening socket and the handshake every client goes through

use crate::config::LobbyConfig;
use crate::peer::{Negotiated, SimError, SimPeer};
use log::{debug, info};
use shared::frame::HANDSHAKE;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// A scripted lobby server bound to a local port
pub struct SimServer {
    listener: TcpListener,
    config: LobbyConfig,
    next_token: AtomicU32,
}

impl SimServer {
    /// Binds to an ephemeral port on the loopback interface
    pub async fn bind(config: LobbyConfig) -> Result<Self, SimError> {
        Self::bind_to("127.0.0.1:0", config).await
    }

    pub async fn bind_to(addr: &str, config: LobbyConfig) -> Result<Self, SimError> {
        let listener = TcpListener::bind(addr).await?;
        info!("Simulated lobby listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            config,
            next_token: AtomicU32::new(1),
        })
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().map(|a| a.port()).unwrap_or(0)
    }

    pub fn config(&self) -> &LobbyConfig {
        &self.config
    }

    /// Accepts one client and completes the four byte handshake
    pub async fn accept(&self) -> Result<SimPeer, SimError> {
        let (mut stream, addr) = self.listener.accept().await?;
        stream.set_nodelay(true)?;

        let mut hello = [0u8; 4];
        stream.read_exact(&mut hello).await?;
        if hello != HANDSHAKE {
            return Err(SimError::Protocol(format!("bad handshake {:?}", hello)));
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        stream.write_all(&token.to_be_bytes()).await?;
        debug!("Client {} connected as number {}", addr, token);

        Ok(SimPeer::new(stream))
    }

    /// Accepts one client and runs it through version check and login.
    ///
    /// Fails with [`SimError::Redirected`] when the configuration redirects
    /// clients elsewhere.
    pub async fn accept_lobby(&self) -> Result<SimPeer, SimError> {
        let mut peer = self.accept().await?;
        if peer.negotiate_version(&self.config).await? == Negotiated::Redirected {
            return Err(SimError::Redirected);
        }
        peer.serve_login(&self.config).await?;
        Ok(peer)
    }
}
