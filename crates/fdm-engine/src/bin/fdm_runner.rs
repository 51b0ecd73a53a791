use anyhow::Context;
use tracing_subscriber::EnvFilter;

use fdm_engine::{drive, RunConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config_path = std::env::var("FDM_RUN_CONFIG").unwrap_or_else(|_| "fdm_run.json".to_string());
    let resume = std::env::var("FDM_RESUME")
        .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);

    let config = RunConfig::from_json_file(&config_path)
        .with_context(|| format!("loading run config from {config_path}"))?;
    tracing::info!(run = %config.run_key(), resume, "FDM runner starting");

    let status = drive(config, resume).await?;
    tracing::info!(
        evaluations = status.evaluations,
        rounds = status.rounds_completed,
        best = ?status.best,
        "FDM runner finished"
    );
    Ok(())
}
