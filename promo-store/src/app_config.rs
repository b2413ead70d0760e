use promo_core::{PromoError, PromoResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub model: ModelConfig,
    pub input: InputConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub schema: SchemaConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct PipelineConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub missing_feature_default: f64,
    #[serde(default)]
    pub min_match_rate: f64,
}

fn default_top_k() -> usize { 7 }

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            missing_feature_default: 0.0,
            min_match_rate: 0.0,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
pub struct ModelConfig {
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Inverse regularization strength; the intercept is not penalized
    #[serde(default = "default_penalty_c")]
    pub l2_penalty_c: f64,
    /// Training stops once every parameter moves less than this per iteration
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

fn default_max_iter() -> usize { 200 }
fn default_penalty_c() -> f64 { 1.0 }
fn default_tolerance() -> f64 { 1e-8 }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            max_iter: default_max_iter(),
            l2_penalty_c: default_penalty_c(),
            tolerance: default_tolerance(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    /// Not needed when scoring with a saved model
    pub train_path: Option<PathBuf>,
    pub test_path: PathBuf,
    pub offers_path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub path: PathBuf,
    #[serde(default = "default_precision")]
    pub score_precision: usize,
    pub model_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

fn default_precision() -> usize { 6 }

/// Column names in the input tables. The output header reuses them.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SchemaConfig {
    pub user_id: String,
    pub context_id: String,
    pub offer_id: String,
    pub date_key: String,
    pub label: String,
    pub redemption_frequency: String,
    pub discount_rate: String,
    pub score: String,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            user_id: "id1".into(),
            context_id: "id2".into(),
            offer_id: "id3".into(),
            date_key: "id5".into(),
            label: "y".into(),
            redemption_frequency: "f375".into(),
            discount_rate: "f376".into(),
            score: "pred".into(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from(Path::new("config"))
    }

    /// Layered load: `default`, then `$RUN_MODE` and `local` when present, then
    /// `PROMO__*` environment variables (e.g. `PROMO__PIPELINE__TOP_K=5`).
    pub fn load_from(dir: &Path) -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        let layer = |name: &str| dir.join(name).to_string_lossy().into_owned();

        let s = config::Config::builder()
            .add_source(config::File::with_name(&layer("default")))
            .add_source(config::File::with_name(&layer(&run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name(&layer("local")).required(false))
            .add_source(config::Environment::with_prefix("PROMO").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn validate(&self) -> PromoResult<()> {
        let p = &self.pipeline;
        if p.top_k == 0 {
            return Err(PromoError::ValidationError("pipeline.top_k must be at least 1".into()));
        }
        if !p.missing_feature_default.is_finite() {
            return Err(PromoError::ValidationError(
                "pipeline.missing_feature_default must be finite".into(),
            ));
        }
        if !(0.0..=1.0).contains(&p.min_match_rate) {
            return Err(PromoError::ValidationError(
                "pipeline.min_match_rate must be within [0, 1]".into(),
            ));
        }
        if self.model.max_iter == 0 || !(self.model.l2_penalty_c > 0.0) {
            return Err(PromoError::ValidationError(
                "model.max_iter and model.l2_penalty_c must be positive".into(),
            ));
        }
        if self.output.score_precision > 12 {
            return Err(PromoError::ValidationError(
                "output.score_precision must be at most 12".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const MINIMAL: &str = r#"
[input]
train_path = "data/train.csv"
test_path = "data/test.csv"
offers_path = "data/offers.csv"

[output]
path = "out/submission.csv"
"#;

    #[test]
    fn test_defaults_fill_optional_sections() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), MINIMAL).unwrap();

        let config = Config::load_from(dir.path()).expect("Failed to load config");
        assert_eq!(config.pipeline, PipelineConfig::default());
        assert_eq!(config.pipeline.top_k, 7);
        assert_eq!(config.model.max_iter, 200);
        assert_eq!(config.output.score_precision, 6);
        assert_eq!(config.schema.offer_id, "id3");
        assert!(config.output.model_path.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_local_layer_overrides_default() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), MINIMAL).unwrap();
        fs::write(
            dir.path().join("local.toml"),
            "[pipeline]\ntop_k = 3\nmissing_feature_default = -1.0\n\n\
             [schema]\nscore = \"score\"\n",
        )
        .unwrap();

        let config = Config::load_from(dir.path()).expect("Failed to load config");
        assert_eq!(config.pipeline.top_k, 3);
        assert_eq!(config.pipeline.missing_feature_default, -1.0);
        assert_eq!(config.schema.score, "score");
        assert_eq!(config.schema.user_id, "id1");
    }

    #[test]
    fn test_validate_rejects_zero_top_k() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("default.toml"), MINIMAL).unwrap();
        let mut config = Config::load_from(dir.path()).unwrap();

        config.pipeline.top_k = 0;
        assert!(config.validate().is_err());

        config.pipeline.top_k = 7;
        config.pipeline.min_match_rate = 1.5;
        assert!(config.validate().is_err());
    }
}
