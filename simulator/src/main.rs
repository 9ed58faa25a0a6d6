use anyhow::{Context, Result};
use clap::Parser;
use minigame_simulator::{Api, Authority, AuthorityConfig};
use minigame_types::GameType;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::info;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host interface to bind (default: localhost).
    #[arg(long, default_value = "127.0.0.1")]
    host: IpAddr,

    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Daily coin hunt plays (overrides MINIGAME_LIMIT_COIN_HUNT).
    #[arg(long)]
    coin_hunt_limit: Option<u32>,

    /// Daily spin wheel plays (overrides MINIGAME_LIMIT_SPIN_WHEEL).
    #[arg(long)]
    spin_wheel_limit: Option<u32>,

    /// Daily memory match plays (overrides MINIGAME_LIMIT_MEMORY_MATCH).
    #[arg(long)]
    memory_match_limit: Option<u32>,

    /// Completion grace after a session's expiry, in milliseconds.
    #[arg(long)]
    expiry_grace_ms: Option<u64>,

    /// Seed for the spin-wheel prize draw.
    #[arg(long)]
    prize_seed: Option<u64>,
}

fn build_config(args: &Args) -> Result<AuthorityConfig> {
    let mut config = AuthorityConfig::from_env();
    for (game_type, limit) in [
        (GameType::CoinHunt, args.coin_hunt_limit),
        (GameType::SpinWheel, args.spin_wheel_limit),
        (GameType::MemoryMatch, args.memory_match_limit),
    ] {
        if let Some(limit) = limit {
            config.limits.insert(game_type, limit);
        }
    }
    if let Some(grace) = args.expiry_grace_ms {
        if grace > game_type_max_duration_ms() {
            anyhow::bail!("expiry_grace_ms must not exceed the longest round ({grace} given)");
        }
        config.expiry_grace_ms = grace;
    }
    if let Some(seed) = args.prize_seed {
        config.prize_seed = seed;
    }
    Ok(config)
}

fn game_type_max_duration_ms() -> u64 {
    GameType::ALL
        .iter()
        .map(|game_type| game_type.duration_ms())
        .max()
        .unwrap_or(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let config = build_config(&args)?;
    info!(limits = ?config.limits, expiry_grace_ms = config.expiry_grace_ms, "authority configured");
    let authority = Arc::new(Authority::new(config));
    let router = Api::new(authority).router();

    let addr = SocketAddr::new(args.host, args.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "session authority listening");
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_limit_overrides() {
        let args = Args::parse_from([
            "minigame-simulator",
            "--spin-wheel-limit",
            "1",
            "--prize-seed",
            "9",
        ]);
        let config = build_config(&args).expect("config should parse");
        assert_eq!(config.limit(GameType::SpinWheel), 1);
        assert_eq!(config.prize_seed, 9);
    }

    #[test]
    fn rejects_oversized_grace() {
        let args = Args::parse_from(["minigame-simulator", "--expiry-grace-ms", "3600000"]);
        let err = build_config(&args).unwrap_err();
        assert!(
            err.to_string().contains("expiry_grace_ms"),
            "unexpected error: {err}"
        );
    }
}
