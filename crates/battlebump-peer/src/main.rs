//! BattleBump peer entry point.
//!
//! Plays one rock-paper-scissors round against another peer on the LAN.
//!
//! # Usage
//!
//! ```text
//! battlebump-peer [OPTIONS] <COMMAND>
//!
//! Commands:
//!   host         Advertise, wait for an opponent, play one round
//!   join         Find an advertising peer, join it, play one round
//!   init-config  Write the default config file
//!
//! Options:
//!   --config <PATH>            Config file [default: platform config dir]
//!   --name <NAME>              Display name (overrides the config file)
//!   --discovery-port <PORT>    UDP discovery port (overrides the config file)
//!   --broadcast <ADDR>         Advertisement destination (overrides the config file)
//! ```
//!
//! | Variable                  | Overrides          |
//! |---------------------------|--------------------|
//! | `BATTLEBUMP_CONFIG`       | `--config`         |
//! | `BATTLEBUMP_NAME`         | `--name`           |
//! | `BATTLEBUMP_DISCOVERY_PORT` | `--discovery-port` |
//! | `RUST_LOG`                | configured `log_level` |

use std::path::PathBuf;

use anyhow::Context;
use battlebump_core::{ConnectionState, Player};
use battlebump_peer::infrastructure::storage::config::{
    config_file_path, load_config, load_config_from, save_config, save_config_to, AppConfig,
};
use battlebump_peer::{ManagerConfig, ManagerEvent, PeerManager};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Local-network rock-paper-scissors peer.
#[derive(Debug, Parser)]
#[command(name = "battlebump-peer", version)]
struct Cli {
    /// Config file to read instead of the platform default.
    #[arg(long, env = "BATTLEBUMP_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Name shown to the opponent.
    #[arg(long, env = "BATTLEBUMP_NAME", global = true)]
    name: Option<String>,

    /// UDP port used for discovery.
    #[arg(long, env = "BATTLEBUMP_DISCOVERY_PORT", global = true)]
    discovery_port: Option<u16>,

    /// Destination address of advertisements, e.g. `192.168.1.255`.
    #[arg(long, global = true)]
    broadcast: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Advertise and wait for an opponent.
    Host {
        /// Moveset advertised to browsers.
        #[arg(long, default_value = "Classic")]
        moveset: String,
        /// Move to play.
        #[arg(long)]
        choice: String,
    },
    /// Join the first advertising peer found.
    Join {
        /// Move to play.
        #[arg(long)]
        choice: String,
    },
    /// Write the default config file and exit.
    InitConfig,
}

impl Cli {
    fn config_path(&self) -> anyhow::Result<PathBuf> {
        match &self.config {
            Some(path) => Ok(path.clone()),
            None => config_file_path().context("no config path given and no platform config dir"),
        }
    }

    /// Loads the file config and applies command-line overrides.
    fn app_config(&self) -> anyhow::Result<AppConfig> {
        let mut config = match &self.config {
            Some(path) => load_config_from(path)
                .with_context(|| format!("failed to load config from {}", path.display()))?,
            None => load_config().context("failed to load the platform config")?,
        };
        if let Some(name) = &self.name {
            config.peer.display_name = name.clone();
        }
        if let Some(port) = self.discovery_port {
            config.network.discovery_port = port;
        }
        if let Some(broadcast) = &self.broadcast {
            config.network.broadcast_address = broadcast.clone();
        }
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.app_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.peer.log_level.as_str())),
        )
        .init();

    if let Command::InitConfig = cli.command {
        let path = cli.config_path()?;
        match &cli.config {
            Some(path) => save_config_to(&config, path),
            None => save_config(&config),
        }
        .with_context(|| format!("failed to write {}", path.display()))?;
        println!("wrote {}", path.display());
        return Ok(());
    }

    let manager_config =
        ManagerConfig::from_app_config(&config).context("invalid network configuration")?;
    let (manager, events) = PeerManager::start(manager_config);
    let me = Player::new(config.peer.display_name.clone());

    let outcome = match cli.command {
        Command::Host { moveset, choice } => {
            manager.start_advertising(moveset.clone());
            let me = Player {
                moveset_name: Some(moveset),
                ..me
            };
            tokio::select! {
                result = play_round(&manager, events, me.choosing(choice), Role::Host) => result,
                _ = tokio::signal::ctrl_c() => Ok(None),
            }
        }
        Command::Join { choice } => {
            manager.start_browsing();
            tokio::select! {
                result = play_round(&manager, events, me.choosing(choice), Role::Joiner) => result,
                _ = tokio::signal::ctrl_c() => Ok(None),
            }
        }
        Command::InitConfig => Ok(None),
    };

    manager.shutdown().await;

    match outcome? {
        Some((mine, theirs)) => println!("{}", describe_round(&mine, &theirs)),
        None => info!("no round played"),
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Host,
    Joiner,
}

/// Drives one round.  Returns both players once the opponent's move arrived,
/// or `None` when the session ended first.
async fn play_round(
    manager: &PeerManager,
    mut events: tokio::sync::mpsc::UnboundedReceiver<ManagerEvent>,
    me: Player,
    role: Role,
) -> anyhow::Result<Option<(Player, Player)>> {
    let mut joined = false;

    while let Some(event) = events.recv().await {
        match event {
            ManagerEvent::DiscoveredPeersChanged(peers) => {
                if role == Role::Joiner && !joined {
                    if let Some(peer) = peers.first() {
                        info!(
                            peer = %peer.identity,
                            moveset = peer.moveset_name.as_deref().unwrap_or("-"),
                            "joining"
                        );
                        manager.join(peer.identity.clone());
                        joined = true;
                    }
                }
            }
            ManagerEvent::SessionStateChanged(ConnectionState::NotConnected) => {
                if role == Role::Joiner {
                    anyhow::bail!("session ended before the round finished");
                }
                warn!("session interrupted; waiting for another opponent");
            }
            ManagerEvent::SessionStateChanged(state) => info!("session {state}"),
            ManagerEvent::ConnectedToPeer => {
                info!("connected; sending move");
                manager.send(&me);
            }
            ManagerEvent::PeerDataReceived { player, from } => {
                info!(peer = %from, "opponent moved");
                manager.disconnect();
                return Ok(Some((me, player)));
            }
            ManagerEvent::ErrorOccurred(err) => warn!("{err}"),
        }
    }
    Ok(None)
}

fn describe_round(mine: &Player, theirs: &Player) -> String {
    let my_move = mine.choice.as_deref().unwrap_or("nothing");
    let their_move = theirs.choice.as_deref().unwrap_or("nothing");
    let verdict = match (beats(my_move, their_move), beats(their_move, my_move)) {
        (true, false) => "you win",
        (false, true) => "you lose",
        _ => "draw",
    };
    format!("{my_move} vs {their_move} ({}): {verdict}", theirs.name)
}

/// Classic moveset rules.  Unknown moves beat nothing.
fn beats(a: &str, b: &str) -> bool {
    matches!(
        (a, b),
        ("rock", "scissors") | ("scissors", "paper") | ("paper", "rock")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_beats_classic_cycle() {
        assert!(beats("rock", "scissors"));
        assert!(beats("scissors", "paper"));
        assert!(beats("paper", "rock"));
        assert!(!beats("rock", "paper"));
        assert!(!beats("rock", "rock"));
    }

    #[test]
    fn test_describe_round_names_verdict() {
        let mine = Player::new("me").choosing("rock");
        let theirs = Player::new("Callum").choosing("scissors");
        assert_eq!(describe_round(&mine, &theirs), "rock vs scissors (Callum): you win");
        assert!(describe_round(&theirs, &mine).ends_with("you lose"));
        assert!(describe_round(&mine, &mine).ends_with("draw"));
    }

    #[test]
    fn test_cli_parses_join_with_overrides() {
        let cli = Cli::try_parse_from([
            "battlebump-peer",
            "join",
            "--choice",
            "paper",
            "--name",
            "Dave",
            "--discovery-port",
            "30000",
        ])
        .unwrap();
        assert_eq!(cli.name.as_deref(), Some("Dave"));
        assert_eq!(cli.discovery_port, Some(30000));
        assert!(matches!(cli.command, Command::Join { ref choice } if choice == "paper"));
    }
}
