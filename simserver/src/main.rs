use clap::Parser;
use log::{error, info, warn};
use simserver::{script, LobbyConfig, SimError, SimServer};
use std::time::Duration;

/// Runs a simulated lobby for local bridge development
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = shared::DEFAULT_LOBBY_PORT)]
    port: u16,

    /// Registered account as name:password, repeatable
    #[arg(short, long)]
    account: Vec<String>,

    /// Name reported as already taken, repeatable
    #[arg(short, long)]
    online: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = LobbyConfig::default();
    for account in &args.account {
        match account.split_once(':') {
            Some((name, password)) => config = config.with_account(name, password),
            None => warn!("Ignoring account `{}`, expected name:password", account),
        }
    }
    for name in &args.online {
        config = config.with_online(name);
    }

    let server = SimServer::bind_to(&format!("{}:{}", args.host, args.port), config).await?;

    loop {
        let mut peer = match server.accept_lobby().await {
            Ok(peer) => peer,
            Err(e) => {
                warn!("Client did not join: {}", e);
                continue;
            }
        };
        let name = peer.username.clone().unwrap_or_default();

        let mut users = vec![script::registered_user("admin")];
        users.extend(server.config().online.iter().map(|n| script::user(n)));
        users.push(script::user(&name));
        let snapshot = script::snapshot(users, [script::game(1, "Welcome game")]);
        if let Err(e) = peer.send_node(&snapshot).await {
            warn!("Could not send snapshot to {}: {}", name, e);
            continue;
        }

        loop {
            match peer.try_recv_text(Duration::from_secs(60)).await {
                Ok(Some(text)) => info!("{} sent: {}", name, text.trim()),
                Ok(None) => break,
                Err(SimError::Io(e)) => {
                    error!("Connection to {} failed: {}", name, e);
                    break;
                }
                Err(e) => {
                    warn!("Dropping {} after a bad frame: {}", name, e);
                    break;
                }
            }
        }
        info!("{} left", name);
    }
}
