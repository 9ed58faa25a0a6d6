//! Play one scripted mini-game round against a session authority.
//!
//! Usage:
//!   cargo run --bin play-session -- --url http://localhost:8080 --game coin_hunt --event 5 --event 10
//!   cargo run --bin play-session -- --game spin_wheel --landed-segment 3 --stop-after-ms 4000

use anyhow::{Context, Result};
use clap::Parser;
use minigame_client::{
    Client, EngineConfig, GameRound, RetryReport, SessionClient, WalletSyncNotifier,
};
use minigame_types::{now_ms, GameType, GameplayEvent, RewardResult};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about = "Play one mini-game round and print the resolved reward")]
struct Args {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: String,

    #[arg(short, long, default_value = "coin_hunt")]
    game: GameType,

    /// Value of each gameplay event, recorded in order.
    #[arg(long = "event")]
    events: Vec<u64>,

    /// Spin-wheel segment the wheel stopped on.
    #[arg(long)]
    landed_segment: Option<usize>,

    /// Stop the round early instead of waiting for the countdown.
    #[arg(long)]
    stop_after_ms: Option<u64>,

    /// Resync queue file, restored before and saved after the round.
    #[arg(long)]
    resync_file: Option<PathBuf>,

    /// Countdown tick (defaults to MINIGAME_TICK_MS or 1000).
    #[arg(long)]
    tick_ms: Option<u64>,
}

#[derive(Serialize)]
struct RoundSummary {
    game_type: GameType,
    session_id: String,
    local_only: bool,
    local_score: u64,
    event_count: u32,
    reward: Option<RewardResult>,
    wheel_segment: Option<usize>,
    error: Option<String>,
    remaining_today: Option<u32>,
    resync_pending: usize,
    finished_at_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut config = EngineConfig::from_env();
    if let Some(tick_ms) = args.tick_ms {
        config.tick = Duration::from_millis(tick_ms);
    }

    let authority = Client::new(&args.url).context("invalid authority url")?;
    let (wallet, mut refreshes) = WalletSyncNotifier::channel(8);
    let client = Arc::new(SessionClient::new(authority, config, wallet));

    if let Some(path) = &args.resync_file {
        if client.restore_resync(path) > 0 {
            let RetryReport {
                reconciled,
                dropped,
                remaining,
            } = client.retry_unreconciled().await;
            info!(reconciled, dropped, remaining, "replayed queued results");
        }
    }

    let quota = client.mount(args.game).await;
    if let Some(quota) = &quota {
        info!(game_type = %args.game, remaining = quota.display_remaining(), limit = quota.limit, "daily quota");
    }

    let round = GameRound::begin(client.clone(), args.game)
        .await
        .with_context(|| format!("failed to start {} session", args.game))?;
    for (id, value) in args.events.iter().enumerate() {
        round.record(GameplayEvent::new(id as u64, *value, now_ms()));
    }
    if let Some(segment) = args.landed_segment {
        round.set_landed_segment(segment);
    }
    if let Some(stop_after_ms) = args.stop_after_ms {
        tokio::time::sleep(Duration::from_millis(stop_after_ms)).await;
        round.stop();
    }

    let snapshot = round.snapshot();
    let (reward, error) = match round.wait().await {
        Some(Ok(result)) => (Some(result), None),
        Some(Err(err)) => (None, Some(err.to_string())),
        None => (None, Some("round ended without an outcome".to_string())),
    };
    while let Ok(refresh) = refreshes.try_recv() {
        info!(source = ?refresh.source, new_balance = ?refresh.new_balance, "wallet refresh requested");
    }

    if let Some(path) = &args.resync_file {
        if let Err(err) = client.save_resync(path) {
            warn!(?err, path = %path.display(), "failed to save resync queue");
        }
    }

    let summary = RoundSummary {
        game_type: args.game,
        session_id: round.handle().session_id.to_string(),
        local_only: round.handle().local_only,
        local_score: snapshot.score,
        event_count: snapshot.event_count,
        wheel_segment: reward
            .as_ref()
            .and_then(|result| round.display_segment(result)),
        reward,
        error,
        remaining_today: client.quota(args.game).map(|quota| quota.display_remaining()),
        resync_pending: client.pending_resync().len(),
        finished_at_ms: now_ms(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
