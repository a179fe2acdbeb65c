use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use futures_util::StreamExt;
use lib_trends::models::Repository;
use serde::Deserialize;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Connects to a trends server and reports what its WebSocket feed delivers", long_about = None)]
struct Args {
    /// Server WebSocket endpoint
    #[clap(short, long, default_value = "ws://127.0.0.1:8080/ws")]
    url: String,

    /// Only receive repositories in this language
    #[clap(short, long)]
    language: Option<String>,

    /// Only receive repositories with at least this many stars
    #[clap(short, long)]
    min_stars: Option<u64>,

    /// Report interval in seconds
    #[clap(short, long, default_value_t = 60)]
    report_interval_seconds: u64,
}

#[derive(Debug, Deserialize)]
struct TrendsMessage {
    #[serde(rename = "type")]
    msg_type: String,
    generation: u64,
    timestamp: DateTime<Utc>,
    repositories: Vec<Repository>,
}

#[derive(Default)]
struct Stats {
    messages: u64,
    snapshots: u64,
    updates: u64,
    last_generation: u64,
    /// Generations that arrived out of order or repeated.
    regressions: u64,
    last_top: Option<String>,
    last_received: Option<DateTime<Utc>>,
}

fn endpoint(args: &Args) -> String {
    let mut params = Vec::new();
    if let Some(ref language) = args.language {
        params.push(format!("language={language}"));
    }
    if let Some(min) = args.min_stars {
        params.push(format!("min_stars={min}"));
    }
    if params.is_empty() {
        args.url.clone()
    } else {
        format!("{}?{}", args.url, params.join("&"))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let stats = Arc::new(Mutex::new(Stats::default()));

    // Clone for the reporter task
    let stats_reporter = Arc::clone(&stats);
    let report_interval = std::time::Duration::from_secs(args.report_interval_seconds.max(1));
    tokio::spawn(async move {
        loop {
            sleep(report_interval).await;
            let data = stats_reporter.lock().unwrap_or_else(PoisonError::into_inner);
            println!("\n----- Feed Summary -----");
            println!(
                "Messages: {} (snapshot {}, update {})",
                data.messages, data.snapshots, data.updates
            );
            println!("Latest generation: {}", data.last_generation);
            println!("Out-of-order generations: {}", data.regressions);
            println!("Top repository: {}", data.last_top.as_deref().unwrap_or("No data"));
            if let Some(at) = data.last_received {
                println!("Last message: {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            println!("------------------------\n");
        }
    });

    let url = endpoint(&args);
    println!("Connecting to {}...", url);
    let (ws_stream, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    let (_write, mut read) = ws_stream.split();
    println!("Connected. Press Ctrl+C to stop.");

    while let Some(msg) = read.next().await {
        let text = match msg.context("connection error")? {
            Message::Text(text) => text,
            Message::Close(frame) => {
                println!("Server closed the connection: {:?}", frame);
                break;
            }
            _ => continue,
        };
        let parsed = match serde_json::from_str::<TrendsMessage>(&text) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("Unparseable message: {e}");
                continue;
            }
        };

        println!(
            "{} generation {} at {}: {} repositories",
            parsed.msg_type,
            parsed.generation,
            parsed.timestamp.format("%H:%M:%S"),
            parsed.repositories.len()
        );

        let mut data = stats.lock().unwrap_or_else(PoisonError::into_inner);
        data.messages += 1;
        match parsed.msg_type.as_str() {
            "snapshot" => data.snapshots += 1,
            "update" => data.updates += 1,
            _ => {}
        }
        if data.messages > 1 && parsed.generation <= data.last_generation {
            data.regressions += 1;
        }
        data.last_generation = data.last_generation.max(parsed.generation);
        data.last_top = parsed
            .repositories
            .first()
            .map(|repo| format!("{} ({:.2})", repo.full_name, repo.trend_score));
        data.last_received = Some(Utc::now());
    }

    Ok(())
}
