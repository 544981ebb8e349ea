//! Tracegrid CLI
//!
//! Command-line client for a running Tracegrid server:
//! - Check status and registered nodes
//! - Flush, clear and keep the master alive
//! - Count and browse events

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracegrid::api::dto::{
    BrowseRequest, BrowseResponse, CountsRequest, CountsResponse, Direction, FlushResponse,
    HealthResponse, NodesResponse, StatsResponse,
};
use tracegrid::db::EventFilter;
use tracegrid::grid::BrowsePosition;

#[derive(Parser)]
#[command(name = "tracegrid-cli")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Client for the Tracegrid execution trace store")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// API server URL
    #[arg(long, default_value = "http://localhost:8470", global = true)]
    pub api_url: String,

    /// Output format (table, json)
    #[arg(short, long, default_value = "table", global = true)]
    pub format: String,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show server health and cluster statistics
    Status,

    /// List registered nodes
    Nodes,

    /// Drain reordering buffers on every node
    Flush,

    /// Drop all stored events and objects
    Clear {
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },

    /// Reset the master watchdog
    Keepalive,

    /// Histogram of events over a time range
    Counts {
        /// Range start (ns, inclusive)
        #[arg(long)]
        from: u64,
        /// Range end (ns, exclusive)
        #[arg(long)]
        to: u64,
        /// Number of buckets
        #[arg(short, long, default_value = "20")]
        slots: usize,
        /// Event filter as JSON, e.g. '{"field": 7}'
        #[arg(long)]
        filter: Option<String>,
    },

    /// Print a page of events
    Browse {
        /// Start timestamp (ns)
        #[arg(long, default_value = "0")]
        from: u64,
        /// Number of events
        #[arg(short, long, default_value = "50")]
        count: usize,
        /// Walk backward from the timestamp
        #[arg(long)]
        backward: bool,
        /// Resume from a cursor printed by a previous page (`timestamp:node:pointer`)
        #[arg(long, conflicts_with = "from")]
        cursor: Option<String>,
        /// Event filter as JSON
        #[arg(long)]
        filter: Option<String>,
    },

    /// Generate default config file
    InitConfig {
        /// Output path (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let json_output = cli.format == "json";

    match cli.command {
        Commands::Status => {
            let response = client
                .get(format!("{}/health", cli.api_url))
                .send()
                .await;

            let health: HealthResponse = match response {
                Ok(resp) => check("API returned error", resp).await?.json().await?,
                Err(e) => {
                    eprintln!("Cannot connect to Tracegrid API at {}", cli.api_url);
                    eprintln!("Error: {}", e);
                    eprintln!();
                    eprintln!("Make sure the Tracegrid server is running:");
                    eprintln!("  cargo run --bin tracegrid");
                    std::process::exit(1);
                }
            };

            let response = client
                .get(format!("{}/api/v1/stats", cli.api_url))
                .send()
                .await?;
            let stats: StatsResponse = check("Failed to fetch stats", response).await?.json().await?;

            if json_output {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "health": health,
                        "stats": stats,
                    }))?
                );
                return Ok(());
            }

            println!("Tracegrid v{}", health.version);
            println!();
            println!("Status: {}", health.status);
            println!("Nodes: {}/{}", health.nodes, health.expected_nodes);
            if health.keep_alive_expired {
                println!("Keepalive: expired");
            }
            println!("Uptime: {}", format_duration(health.uptime_seconds));
            println!();
            println!("Events:");
            println!("  Stored: {}", stats.stats.events_count);
            println!("  Dropped: {}", stats.stats.dropped_events_count);
            println!("  Unordered: {}", stats.stats.unordered_events_count);
            if let (Some(first), Some(last)) = (&stats.first_time, &stats.last_time) {
                println!("  Range: {} .. {}", first, last);
            }
            println!("Objects:");
            println!("  Stored: {}", stats.stats.objects_count);
            println!("  Store size: {} bytes", stats.stats.objects_store_size);
            println!("Threads: {}", stats.stats.threads_count);
        }

        Commands::Nodes => {
            let response = client
                .get(format!("{}/api/v1/nodes", cli.api_url))
                .send()
                .await?;
            let nodes: NodesResponse = check("Failed to fetch nodes", response).await?.json().await?;

            if json_output {
                println!("{}", serde_json::to_string_pretty(&nodes)?);
            } else if nodes.nodes.is_empty() {
                println!("No nodes registered.");
            } else {
                println!("{:<6} {:<24} {:>12} {:>10} {:>10}", "ID", "Host", "Events", "Dropped", "Objects");
                println!("{}", "-".repeat(66));
                for node in nodes.nodes {
                    let (events, dropped, objects) = match &node.stats {
                        Some(s) => (
                            s.events_count.to_string(),
                            s.dropped_events_count.to_string(),
                            s.objects_count.to_string(),
                        ),
                        None => ("-".into(), "-".into(), "-".into()),
                    };
                    println!(
                        "{:<6} {:<24} {:>12} {:>10} {:>10}",
                        node.node_id, node.hostname, events, dropped, objects
                    );
                }
            }
        }

        Commands::Flush => {
            let response = client
                .post(format!("{}/api/v1/flush", cli.api_url))
                .send()
                .await?;
            let result: FlushResponse = check("Flush failed", response).await?.json().await?;
            println!("Flushed {} buffered records", result.flushed);
        }

        Commands::Clear { yes } => {
            if !yes {
                eprintln!("This drops every stored event and object. Re-run with --yes to confirm.");
                std::process::exit(1);
            }
            let response = client
                .post(format!("{}/api/v1/clear", cli.api_url))
                .send()
                .await?;
            check("Clear failed", response).await?;
            println!("Cluster cleared");
        }

        Commands::Keepalive => {
            let response = client
                .post(format!("{}/api/v1/keepalive", cli.api_url))
                .send()
                .await?;
            check("Keepalive failed", response).await?;
            println!("ok");
        }

        Commands::Counts {
            from,
            to,
            slots,
            filter,
        } => {
            let request = CountsRequest {
                filter: parse_filter(filter.as_deref())?,
                t1: from,
                t2: to,
                slots,
            };
            let response = client
                .post(format!("{}/api/v1/counts", cli.api_url))
                .json(&request)
                .send()
                .await?;
            let counts: CountsResponse = check("Count failed", response).await?.json().await?;

            if json_output {
                println!("{}", serde_json::to_string_pretty(&counts)?);
            } else {
                print_histogram(&counts, from, to);
            }
        }

        Commands::Browse {
            from,
            count,
            backward,
            cursor,
            filter,
        } => {
            let request = BrowseRequest {
                filter: parse_filter(filter.as_deref())?,
                timestamp: from,
                count,
                direction: if backward {
                    Direction::Backward
                } else {
                    Direction::Forward
                },
                cursor: cursor.as_deref().map(parse_cursor).transpose()?,
            };
            let response = client
                .post(format!("{}/api/v1/browse", cli.api_url))
                .json(&request)
                .send()
                .await?;
            let page: BrowseResponse = check("Browse failed", response).await?.json().await?;

            if json_output {
                println!("{}", serde_json::to_string_pretty(&page)?);
            } else {
                print_events(&page, backward);
            }
        }

        Commands::InitConfig { output } => {
            let config = tracegrid::config::generate_default_config();

            match output {
                Some(path) => {
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, &config)?;
                    println!("Config written to {:?}", path);
                }
                None => {
                    print!("{}", config);
                }
            }
        }
    }

    Ok(())
}

/// Pass successful responses through, turn others into an error with the body text
async fn check(
    what: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    Err(format!("{} ({}): {}", what, status, text).into())
}

fn parse_filter(filter: Option<&str>) -> Result<EventFilter, Box<dyn std::error::Error>> {
    match filter {
        None => Ok(EventFilter::All),
        Some(json) => serde_json::from_str(json)
            .map_err(|e| format!("Invalid filter {}: {}", json, e).into()),
    }
}

fn parse_cursor(cursor: &str) -> Result<BrowsePosition, Box<dyn std::error::Error>> {
    let invalid = || format!("Invalid cursor {}, expected timestamp:node:pointer", cursor);
    let mut parts = cursor.splitn(3, ':');
    let mut field = || parts.next().ok_or_else(invalid);
    let timestamp = field()?.parse().map_err(|_| invalid())?;
    let node_id = field()?.parse().map_err(|_| invalid())?;
    let pointer = field()?.parse().map_err(|_| invalid())?;
    Ok(BrowsePosition {
        timestamp,
        node_id,
        pointer,
    })
}

fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else if seconds < 86400 {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    } else {
        format!("{}d {}h", seconds / 86400, (seconds % 86400) / 3600)
    }
}

fn print_histogram(counts: &CountsResponse, from: u64, to: u64) {
    if counts.total == 0 {
        println!("No events in range");
        return;
    }

    let max = counts.counts.iter().copied().max().unwrap_or(0).max(1);
    let width = (to - from) / counts.counts.len().max(1) as u64;
    for (i, count) in counts.counts.iter().enumerate() {
        let start = from + width * i as u64;
        let bar = (count * 40 / max) as usize;
        println!("{:>20} | {:<40} {}", start, "#".repeat(bar), count);
    }
    println!();
    println!("Total: {} (bucket counts may be approximate)", counts.total);
}

fn print_events(page: &BrowseResponse, backward: bool) {
    if page.events.is_empty() {
        println!("No events");
        return;
    }

    println!("{:<32} {:<5} {:<12} {:<6} {}", "Time", "Node", "Thread", "Depth", "Kind");
    println!("{}", "-".repeat(72));
    for browsed in &page.events {
        let event = &browsed.event;
        let time = browsed
            .time
            .clone()
            .unwrap_or_else(|| event.timestamp.to_string());
        println!(
            "{:<32} {:<5} {:<12} {:<6} {}",
            time,
            browsed.node_id,
            format!("{}:{}", event.host_id, event.thread_id),
            event.depth,
            event.kind.tag()
        );
    }

    if let Some(next) = page.next_cursor {
        println!();
        println!(
            "More events: --cursor {}:{}:{}{}",
            next.timestamp,
            next.node_id,
            next.pointer,
            if backward { " --backward" } else { "" }
        );
    }
}
