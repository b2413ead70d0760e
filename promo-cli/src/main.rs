use anyhow::Context;
use clap::Parser;
use promo_cli::{run, Args};
use promo_store::app_config::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "promo_cli=info,promo_offer=info,promo_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::load_from(&args.config_dir).context("Failed to load config")?;
    args.apply(&mut config);

    let report = run(&config, args.model.as_deref())?;
    tracing::info!(
        "Run {} finished: {} rows in {} groups written to {}",
        report.run_id,
        report.ranked_rows,
        report.groups,
        config.output.path.display()
    );
    Ok(())
}
