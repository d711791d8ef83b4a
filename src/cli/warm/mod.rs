//! Warm command - runs one cache warming pass and exits

use clap::Args;
use tracing::info;

use crate::config::AppConfig;
use crate::domain::{WarmRequest, WarmingReport};
use crate::infrastructure::logging::init_logging;
use crate::infrastructure::services::{CacheWarmer, CacheWarmerConfig};

/// Arguments for the warm command
#[derive(Args, Clone, Debug)]
pub struct WarmArgs {
    /// Paths to warm instead of the configured targets (repeatable)
    #[arg(long = "path")]
    pub paths: Vec<String>,

    /// Accept header sent with every path given on the command line
    #[arg(long)]
    pub accept: Option<String>,

    /// Requests in flight at once (overrides config)
    #[arg(long)]
    pub concurrency: Option<usize>,
}

/// Warm the shared store through the full request path.
///
/// Exits with an error when any target fails, so it can gate deploys.
pub async fn run(args: WarmArgs) -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load().unwrap_or_default();
    init_logging(&config.logging);

    let warmer_config = warmer_config(&config, &args);
    if warmer_config.targets.is_empty() {
        anyhow::bail!("No warm targets configured; pass --path or set warmer.targets");
    }

    let state = crate::create_app_state_with_config(&config).await?;
    let app = crate::build_router(state, &config, None);

    info!(targets = warmer_config.targets.len(), "Running cache warming pass");

    let report = CacheWarmer::new(app, warmer_config).run_once().await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    check_report(&report)
}

fn warmer_config(config: &AppConfig, args: &WarmArgs) -> CacheWarmerConfig {
    let mut warmer_config = config.warmer.to_warmer_config();

    if !args.paths.is_empty() {
        warmer_config.targets = args
            .paths
            .iter()
            .map(|path| {
                let request = WarmRequest::new(path);
                match &args.accept {
                    Some(accept) => request.with_accept(accept),
                    None => request,
                }
            })
            .collect();
    }

    if let Some(concurrency) = args.concurrency {
        warmer_config.concurrency = concurrency.max(1);
    }

    warmer_config
}

fn check_report(report: &WarmingReport) -> anyhow::Result<()> {
    if report.is_success() {
        return Ok(());
    }

    let paths: Vec<&str> = report.failed.iter().map(|f| f.path.as_str()).collect();
    anyhow::bail!(
        "{} of {} warm targets failed: {}",
        report.failed.len(),
        report.attempted,
        paths.join(", ")
    )
}
