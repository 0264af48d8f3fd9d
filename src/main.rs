//! Command-line interface for exactly-once-consumer
//!
//! # Usage Examples
//!
//! ```bash
//! # Consume with a persistent processed-event ledger
//! exactly-once-consumer consume \
//!   --brokers localhost:9092 \
//!   --group-id orders \
//!   --topic order-events \
//!   --ledger-dir .exactly-once-ledger
//!
//! # Publish one event
//! exactly-once-consumer produce \
//!   --brokers localhost:9092 \
//!   --topic order-events \
//!   --id e1 --correlation-id c1 --causation-id p1 --payload hello
//!
//! # Inspect a wire record
//! exactly-once-consumer decode 'e1|c1|p1|hello'
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use coordinated_consumer::{
    CancellationToken, Config, CoordinatedConsumer, FilesystemLedger, KafkaLog, LedgerTransaction,
    MemoryLedger, StatsSnapshot, Transactor, TracingTelemetry,
};
use exactly_once_consumer::{run_produce, LedgerHandler, ProduceArgs};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "exactly-once-consumer")]
#[command(about = "Kafka consumer with exactly-once effective processing")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume events and record them in the processed-event ledger
    Consume {
        #[command(flatten)]
        config: Config,

        /// Directory of the persistent ledger (in-memory if omitted)
        #[arg(long, value_name = "DIR")]
        ledger_dir: Option<PathBuf>,
    },

    /// Decode a wire record and print it as JSON
    Decode {
        /// Record in the form id|correlationId|causationId|payload
        record: String,
    },

    /// Publish one event in the wire format
    Produce(ProduceArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Consume { config, ledger_dir } => match ledger_dir {
            Some(dir) => {
                let ledger = FilesystemLedger::open(&dir)
                    .with_context(|| format!("Failed to open ledger in {}", dir.display()))?;
                run_consume(&config, ledger).await?;
            }
            None => {
                tracing::warn!("No --ledger-dir given, processed events are kept in memory only");
                run_consume(&config, MemoryLedger::new()).await?;
            }
        },
        Commands::Decode { record } => {
            let event = event_codec::decode(record.as_bytes())?;
            println!("{}", serde_json::to_string_pretty(&event)?);
        }
        Commands::Produce(args) => run_produce(args).await?,
    }

    Ok(())
}

async fn run_consume<R>(config: &Config, ledger: R) -> anyhow::Result<()>
where
    R: Transactor + 'static,
    R::Transaction: LedgerTransaction,
{
    let settings = config.settings()?;
    let log = KafkaLog::new(config)?;
    let consumer = CoordinatedConsumer::new(
        log,
        ledger,
        LedgerHandler::new(),
        TracingTelemetry::with_service("exactly-once-consumer"),
        settings,
    );
    let stats = consumer.stats_handle();

    let cancel = CancellationToken::new();
    let handle = consumer.spawn(cancel.clone());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Received Ctrl-C, stopping consumer");
    cancel.cancel();
    handle.await.context("Consumer task panicked")?;

    print_stats(&stats.snapshot());
    Ok(())
}

fn print_stats(stats: &StatsSnapshot) {
    println!("Committed:   {}", stats.committed);
    println!("Rolled back: {}", stats.rolled_back);
    println!("Faulted:     {}", stats.faulted);
}
