use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use content_sync::{
    AlertSink, CollectionKind, ContentSyncStore, LiveTicket, Origin, ServiceConfig, StoreEvent,
    StoreEventKind, Trend,
};

#[derive(Parser)]
#[command(name = "content-sync")]
#[command(about = "Inspect and edit the travel site's content through the realtime content store", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a collection and print it as JSON
    List {
        /// packages, blogs, destinations or live-tickets
        collection: CollectionKind,
    },

    /// Load everything, then print changes as they arrive until Ctrl+C
    Watch,

    /// Delete a record by id
    Delete {
        collection: CollectionKind,
        id: String,
    },

    /// Publish a live ticket price
    AddTicket {
        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        /// Price in UGX
        #[arg(long)]
        price: u64,

        #[arg(long)]
        min_usd: Option<f64>,

        #[arg(long)]
        max_usd: Option<f64>,

        #[arg(long, default_value = "stable")]
        trend: Trend,
    },
}

struct TerminalAlerts;

impl AlertSink for TerminalAlerts {
    fn alert(&self, message: &str) {
        eprintln!("{} {}", "⚠".red().bold(), message.red());
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = ServiceConfig::from_env()?;
    let store = ContentSyncStore::connect(&config)?.with_alerts(Arc::new(TerminalAlerts));

    match cli.command {
        Commands::List { collection } => {
            if !store.load().await {
                eprintln!("{}", "Some collections failed to load; output may be stale".yellow());
            }
            let rows = match collection {
                CollectionKind::Packages => serde_json::to_value(store.packages())?,
                CollectionKind::Blogs => serde_json::to_value(store.blogs())?,
                CollectionKind::Destinations => serde_json::to_value(store.destinations())?,
                CollectionKind::LiveTickets => serde_json::to_value(store.live_tickets())?,
            };
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }

        Commands::Watch => {
            println!("{}", "👁  Loading content and subscribing to changes...".cyan().bold());
            let mut events = store.subscribe_events();
            store.start().await;

            let all = store.collections();
            println!(
                "{} packages={} blogs={} destinations={} live_tickets={}",
                "✓".green(),
                all.packages.len(),
                all.blogs.len(),
                all.destinations.len(),
                all.live_tickets.len()
            );

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(event) => print_event(&event),
                        Err(RecvError::Lagged(skipped)) => {
                            eprintln!("{}", format!("skipped {skipped} events").yellow());
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }

            store.teardown().await;
            println!("{}", "Stopped".bright_black());
        }

        Commands::Delete { collection, id } => {
            store.delete_in(collection, &id).await?;
            println!("{} Deleted {} from {}", "✓".green(), id.bright_yellow(), collection);
        }

        Commands::AddTicket {
            from,
            to,
            price,
            min_usd,
            max_usd,
            trend,
        } => {
            let ticket = LiveTicket {
                id: String::new(),
                origin: from,
                target: to,
                price_ugx: price,
                min_usd,
                max_usd,
                trend,
            };
            let saved = store.add(ticket).await?;
            println!(
                "{} Published {} → {} as {}",
                "✓".green(),
                saved.origin,
                saved.target,
                saved.id.bright_yellow()
            );
        }
    }

    Ok(())
}

fn print_event(event: &StoreEvent) {
    let kind = match event.kind {
        StoreEventKind::Loaded => "LOADED".bright_blue(),
        StoreEventKind::Inserted => "INSERT".green(),
        StoreEventKind::Updated => "UPDATE".yellow(),
        StoreEventKind::Deleted => "DELETE".red(),
    };
    let origin = match event.origin {
        Origin::Fetch => "fetch",
        Origin::Write => "local",
        Origin::Notification => "remote",
    };

    println!(
        "{} {} {} {}",
        kind.bold(),
        event.collection.to_string().bright_white(),
        event.id.as_deref().unwrap_or("-"),
        format!("({origin}{})", if event.applied { "" } else { ", no match" }).bright_black()
    );
}
