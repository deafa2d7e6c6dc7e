use bridge::app::Bridge;
use bridge::config::{BridgeConfig, CliArgs};
use bridge::lifecycle::Exit;
use clap::Parser;
use log::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let mut logger = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if let Some(ref level) = args.log_level {
        logger.parse_filters(level);
    }
    logger.init();

    let config = BridgeConfig::from_args(&args)?;
    info!(
        "Starting bridge: lobby {}:{} as {}, IRC {} {}",
        config.lobby.host, config.lobby.port, config.lobby.username, config.irc.network, config.irc.channel
    );

    let exit = Bridge::new(config).run().await;
    if exit == Exit::Restart {
        restart()?;
    }
    std::process::exit(exit.code());
}

/// Replaces the running process with a fresh copy of itself
#[cfg(unix)]
fn restart() -> Result<(), Box<dyn std::error::Error>> {
    use std::os::unix::process::CommandExt;

    let exe = std::env::current_exe()?;
    info!("Restarting {}", exe.display());
    let err = std::process::Command::new(exe)
        .args(std::env::args_os().skip(1))
        .exec();
    error!("Restart failed: {}", err);
    Err(err.into())
}

#[cfg(not(unix))]
fn restart() -> Result<(), Box<dyn std::error::Error>> {
    error!("Restart is only supported on unix");
    Ok(())
}
