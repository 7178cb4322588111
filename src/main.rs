use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chaintrace_engine::alert::AlertFilter;
use chaintrace_engine::config::Config;
use chaintrace_engine::detect::MovingAveragePredictor;
use chaintrace_engine::model::Transaction;
use chaintrace_engine::pipeline::TransactionPipeline;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=info for output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!("ChainTrace Engine starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    tracing::info!(
        wallets = config.wallets.len(),
        "Configuration loaded from {}",
        config_path
    );

    let predictor = Arc::new(MovingAveragePredictor::default());
    let pipeline = TransactionPipeline::new(config, Some(predictor))?;

    // Replay a transaction feed (one JSON transaction per line) through
    // the engine, then report what it found.
    let feed_path = std::env::args()
        .nth(2)
        .unwrap_or_else(|| "transactions.jsonl".to_string());
    let feed = std::fs::read_to_string(&feed_path)
        .map_err(|e| eyre::eyre!("Failed to read transaction feed {}: {}", feed_path, e))?;

    let mut ingested = 0usize;
    let mut created = 0usize;
    let mut merged = 0usize;
    for (line_no, line) in feed.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let tx: Transaction = serde_json::from_str(line)
            .map_err(|e| eyre::eyre!("Bad transaction on line {}: {}", line_no + 1, e))?;
        match pipeline.ingest(tx).await {
            Ok(report) => {
                ingested += 1;
                created += report.alerts_created;
                merged += report.alerts_merged;
            }
            Err(e) => {
                tracing::warn!(line = line_no + 1, error = %e, "transaction rejected");
            }
        }
    }

    tracing::info!(
        ingested,
        alerts_created = created,
        alerts_merged = merged,
        "Replay complete"
    );

    for alert in pipeline.list_alerts(&AlertFilter::default()).await {
        tracing::info!(
            alert_type = alert.alert_type.as_str(),
            severity = ?alert.severity,
            address = %alert.related_address,
            "{}",
            alert.title
        );
    }

    let cancel = CancellationToken::new();
    for wallet in pipeline.registry().wallets() {
        match pipeline
            .analytics(&wallet.address, wallet.blockchain, None, &cancel)
            .await
        {
            Ok(analytics) => {
                tracing::info!(
                    address = %wallet.address,
                    transactions = analytics.transaction_count,
                    risk_score = analytics.risk_score,
                    high_risk = analytics.high_risk,
                    "Wallet analytics"
                );
            }
            Err(e) => {
                tracing::debug!(address = %wallet.address, error = %e, "No analytics available");
            }
        }
    }

    Ok(())
}
