use anyhow::{bail, Context};
use clap::Parser;
use promo_core::{PromoError, RankedRow};
use promo_offer::{FittedLogistic, LogisticRegression, Pipeline, RunReport};
use promo_store::app_config::Config;
use promo_store::{read_json, write_json, CsvSink, TableSource};
use std::path::{Path, PathBuf};
use tracing::info;

/// Score candidate offers and keep the top K per user, context and date
#[derive(Parser, Debug, Default)]
#[command(name = "promo")]
pub struct Args {
    /// Directory holding default.toml and the optional per-environment layers
    #[arg(long, default_value = "config")]
    pub config_dir: PathBuf,

    /// Override pipeline.top_k
    #[arg(long)]
    pub top_k: Option<usize>,

    /// Override output.path
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Score with a previously saved model instead of training one
    #[arg(long)]
    pub model: Option<PathBuf>,
}

impl Args {
    pub fn apply(&self, config: &mut Config) {
        if let Some(top_k) = self.top_k {
            config.pipeline.top_k = top_k;
        }
        if let Some(output) = &self.output {
            config.output.path = output.clone();
        }
    }
}

/// Load the tables, run the pipeline and write every configured artifact.
///
/// Nothing is written unless the pipeline itself succeeds.
pub fn run(config: &Config, saved_model: Option<&Path>) -> anyhow::Result<RunReport> {
    config.validate()?;
    let source = TableSource::new(config.schema.clone());
    let test = source
        .load_records(&config.input.test_path, "test", false)
        .context("Failed to load scoring records")?;
    let offers = source
        .load_offers(&config.input.offers_path)
        .context("Failed to load offer table")?;
    let pipeline = Pipeline::new(LogisticRegression::new(config.model), &config.pipeline)?;

    let (ranked, report) = match saved_model {
        Some(path) => {
            let model: FittedLogistic = read_json(path)
                .with_context(|| format!("Failed to read model from {}", path.display()))?;
            model.validate()?;
            info!("Scoring with saved model {}", path.display());
            pipeline.run_with_model(&model, &test, &offers)?
        }
        None => {
            let Some(train_path) = &config.input.train_path else {
                bail!(PromoError::ValidationError(
                    "input.train_path is required unless a saved model is given".into()
                ));
            };
            let train = source
                .load_records(train_path, "train", true)
                .context("Failed to load training records")?;
            let output = pipeline.run(&train, &test, &offers)?;
            if let Some(path) = &config.output.model_path {
                write_json(path, &output.model).context("Failed to write model")?;
                info!("Saved model to {}", path.display());
            }
            (output.ranked, output.report)
        }
    };

    write_outputs(config, &ranked, &report)?;
    Ok(report)
}

fn write_outputs(config: &Config, ranked: &[RankedRow], report: &RunReport) -> anyhow::Result<()> {
    CsvSink::new(config.schema.clone(), config.output.score_precision)
        .write_file(&config.output.path, ranked)
        .context("Failed to write ranked output")?;
    if let Some(path) = &config.output.report_path {
        write_json(path, report).context("Failed to write run report")?;
    }
    Ok(())
}
