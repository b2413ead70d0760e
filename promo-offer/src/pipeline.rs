use crate::features::{FeatureJoiner, JoinConfig, JoinStats};
use crate::model::{FittedModel, ScoringModel};
use crate::ranker::{count_groups, GroupRanker};
use chrono::{DateTime, Utc};
use promo_core::{OfferFeature, PromoError, PromoResult, RankedRow, RecordRow, ScoredRow};
use promo_store::app_config::PipelineConfig;
use serde::Serialize;
use tracing::{info, info_span};
use uuid::Uuid;

/// Summary of one end-to-end run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Absent when scoring with a previously trained model
    pub train_rows: Option<usize>,
    pub test_rows: usize,
    pub offer_rows: usize,
    pub train_join: Option<JoinStats>,
    pub test_join: JoinStats,
    pub model_dimension: usize,
    pub top_k: usize,
    pub groups: usize,
    pub ranked_rows: usize,
}

#[derive(Debug)]
pub struct PipelineOutput<F> {
    pub ranked: Vec<RankedRow>,
    pub model: F,
    pub report: RunReport,
}

/// Join -> fit -> join -> predict -> rank, over in-memory tables.
pub struct Pipeline<M> {
    joiner: FeatureJoiner,
    ranker: GroupRanker,
    model: M,
}

impl<M: ScoringModel> Pipeline<M> {
    pub fn new(model: M, config: &PipelineConfig) -> PromoResult<Self> {
        let join = JoinConfig {
            missing_feature_default: config.missing_feature_default,
            min_match_rate: config.min_match_rate,
        };
        Ok(Self {
            joiner: FeatureJoiner::new(join),
            ranker: GroupRanker::new(config.top_k)?,
            model,
        })
    }

    /// Fit the model on labelled records. Every record must carry a label.
    pub fn train(
        &self,
        records: &[RecordRow],
        offers: &[OfferFeature],
    ) -> PromoResult<(M::Fitted, JoinStats)> {
        let labels = records
            .iter()
            .enumerate()
            .map(|(i, r)| {
                r.label.ok_or_else(|| {
                    PromoError::InvalidTrainingData(format!("training record {} has no label", i))
                })
            })
            .collect::<PromoResult<Vec<bool>>>()?;

        let joined = self.joiner.join_checked(records, offers)?;
        let fitted = self.model.fit(&joined.feature_matrix(), &labels)?;
        Ok((fitted, joined.stats))
    }

    /// Score records with an already fitted model. Output keeps record order.
    pub fn score(
        &self,
        fitted: &M::Fitted,
        records: &[RecordRow],
        offers: &[OfferFeature],
    ) -> PromoResult<(Vec<ScoredRow>, JoinStats)> {
        let joined = self.joiner.join_checked(records, offers)?;
        let scores = fitted.predict(&joined.feature_matrix())?;
        if scores.len() != joined.rows.len() {
            return Err(PromoError::ValidationError(format!(
                "model returned {} scores for {} records",
                scores.len(),
                joined.rows.len()
            )));
        }
        if let Some(bad) = scores.iter().find(|s| !(0.0..=1.0).contains(*s)) {
            return Err(PromoError::ValidationError(format!(
                "model produced a score outside [0, 1]: {}",
                bad
            )));
        }

        let scored = joined
            .rows
            .iter()
            .zip(scores)
            .map(|(row, score)| ScoredRow {
                record: row.record.clone(),
                score,
            })
            .collect();
        Ok((scored, joined.stats))
    }

    pub fn rank(&self, scored: Vec<ScoredRow>) -> Vec<RankedRow> {
        self.ranker.rank(scored)
    }

    /// Train on `train`, then score and rank `test`.
    pub fn run(
        &self,
        train: &[RecordRow],
        test: &[RecordRow],
        offers: &[OfferFeature],
    ) -> PromoResult<PipelineOutput<M::Fitted>> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id);
        let _guard = span.enter();
        let started_at = Utc::now();

        let (model, train_join) = self.train(train, offers)?;
        info!(
            "Trained on {} records ({} matched an offer)",
            train.len(),
            train_join.matched
        );

        let (ranked, mut report) = self.score_and_rank(&model, test, offers, run_id, started_at)?;
        report.train_rows = Some(train.len());
        report.train_join = Some(train_join);

        Ok(PipelineOutput {
            ranked,
            model,
            report,
        })
    }

    /// Score and rank `test` with a model trained earlier.
    pub fn run_with_model(
        &self,
        model: &M::Fitted,
        test: &[RecordRow],
        offers: &[OfferFeature],
    ) -> PromoResult<(Vec<RankedRow>, RunReport)> {
        let run_id = Uuid::new_v4();
        let span = info_span!("pipeline_run", %run_id);
        let _guard = span.enter();
        self.score_and_rank(model, test, offers, run_id, Utc::now())
    }

    fn score_and_rank(
        &self,
        model: &M::Fitted,
        test: &[RecordRow],
        offers: &[OfferFeature],
        run_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> PromoResult<(Vec<RankedRow>, RunReport)> {
        let (scored, test_join) = self.score(model, test, offers)?;
        info!(
            "Scored {} records ({} matched an offer)",
            test.len(),
            test_join.matched
        );

        let ranked = self.rank(scored);
        let groups = count_groups(&ranked);
        info!(
            "Kept {} rows across {} groups (top {})",
            ranked.len(),
            groups,
            self.ranker.top_k()
        );

        let report = RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            train_rows: None,
            test_rows: test.len(),
            offer_rows: offers.len(),
            train_join: None,
            test_join,
            model_dimension: model.dimension(),
            top_k: self.ranker.top_k(),
            groups,
            ranked_rows: ranked.len(),
        };
        Ok((ranked, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeatureMatrix, LogisticRegression};
    use promo_core::FeatureVector;

    /// Returns the same scores whatever it is asked to predict.
    struct FixedScores(Vec<f64>);

    impl FittedModel for FixedScores {
        fn dimension(&self) -> usize {
            FeatureVector::WIDTH
        }

        fn predict(&self, _features: &FeatureMatrix) -> PromoResult<Vec<f64>> {
            Ok(self.0.clone())
        }
    }

    struct FixedModel;

    impl ScoringModel for FixedModel {
        type Fitted = FixedScores;

        fn fit(&self, features: &FeatureMatrix, _labels: &[bool]) -> PromoResult<FixedScores> {
            Ok(FixedScores(vec![0.5; features.nrows()]))
        }
    }

    fn fixed_pipeline() -> Pipeline<FixedModel> {
        Pipeline::new(FixedModel, &PipelineConfig::default()).unwrap()
    }

    fn offers() -> Vec<OfferFeature> {
        vec![
            OfferFeature::new("A", 2.0, 0.5),
            OfferFeature::new("C", 0.5, 0.1),
            OfferFeature::new("D", 4.0, 0.9),
        ]
    }

    fn train_rows() -> Vec<RecordRow> {
        vec![
            RecordRow::new("7", "1", "A", "2023-12-01").with_label(true),
            RecordRow::new("7", "1", "C", "2023-12-01").with_label(false),
            RecordRow::new("8", "2", "D", "2023-12-02").with_label(true),
            RecordRow::new("8", "2", "C", "2023-12-02").with_label(false),
            RecordRow::new("9", "3", "B", "2023-12-03").with_label(false),
        ]
    }

    fn pipeline(top_k: usize) -> Pipeline<LogisticRegression> {
        let config = PipelineConfig {
            top_k,
            ..Default::default()
        };
        Pipeline::new(LogisticRegression::default(), &config).unwrap()
    }

    #[test]
    fn test_run_scenario_keeps_one_row() {
        let test = vec![
            RecordRow::new("1", "10", "A", "2024-01-01"),
            RecordRow::new("1", "10", "B", "2024-01-01"),
        ];
        let output = pipeline(1).run(&train_rows(), &test, &offers()).unwrap();

        assert_eq!(output.ranked.len(), 1);
        // A carries a real discount; B falls back to zeros and the model learned
        // that discounts convert.
        assert_eq!(output.ranked[0].offer_id.as_str(), "A");
        assert_eq!(output.report.groups, 1);
        assert_eq!(output.report.test_join.matched, 1);
        assert_eq!(output.report.model_dimension, FeatureVector::WIDTH);

        let again = pipeline(1).run(&train_rows(), &test, &offers()).unwrap();
        assert_eq!(again.ranked, output.ranked);
    }

    #[test]
    fn test_run_with_saved_model_matches_full_run() {
        let test = vec![
            RecordRow::new("1", "10", "A", "2024-01-01"),
            RecordRow::new("1", "10", "D", "2024-01-01"),
            RecordRow::new("2", "10", "C", "2024-01-01"),
        ];
        let p = pipeline(7);
        let full = p.run(&train_rows(), &test, &offers()).unwrap();
        let (ranked, report) = p.run_with_model(&full.model, &test, &offers()).unwrap();

        assert_eq!(ranked, full.ranked);
        assert_eq!(report.train_rows, None);
        assert_eq!(full.report.train_rows, Some(5));
        assert_eq!(report.groups, 2);
    }

    #[test]
    fn test_unlabelled_training_row_is_rejected() {
        let mut train = train_rows();
        train.push(RecordRow::new("9", "3", "A", "2023-12-03"));
        let result = pipeline(7).train(&train, &offers());
        assert!(matches!(result, Err(PromoError::InvalidTrainingData(_))));
    }

    #[test]
    fn test_key_mismatch_fails_before_ranking() {
        let test = vec![RecordRow::new("1", "10", "X", "2024-01-01")];
        let result = pipeline(7).run(&train_rows(), &test, &offers());
        assert!(matches!(result, Err(PromoError::JoinKeyMismatch { .. })));
    }

    #[test]
    fn test_score_preserves_record_order() {
        let p = pipeline(7);
        let (fitted, _) = p.train(&train_rows(), &offers()).unwrap();
        let test = vec![
            RecordRow::new("2", "10", "D", "2024-01-01"),
            RecordRow::new("1", "10", "A", "2024-01-01"),
        ];
        let (scored, stats) = p.score(&fitted, &test, &offers()).unwrap();
        assert_eq!(scored[0].record.offer_id.as_str(), "D");
        assert_eq!(scored[1].record.offer_id.as_str(), "A");
        assert_eq!(stats.matched, 2);
    }

    #[test]
    fn test_out_of_range_scores_are_rejected() {
        let test = vec![RecordRow::new("1", "10", "A", "2024-01-01")];
        for bad in [1.5, -0.1, f64::NAN] {
            let result = fixed_pipeline().run_with_model(&FixedScores(vec![bad]), &test, &offers());
            assert!(matches!(result, Err(PromoError::ValidationError(_))));
        }
    }

    #[test]
    fn test_score_count_must_match_records() {
        let test = vec![RecordRow::new("1", "10", "A", "2024-01-01")];
        let fitted = FixedScores(vec![0.5, 0.5]);
        let result = fixed_pipeline().score(&fitted, &test, &offers());
        assert!(matches!(result, Err(PromoError::ValidationError(_))));
    }

    #[test]
    fn test_in_range_scores_pass_through() {
        let test = vec![
            RecordRow::new("1", "10", "A", "2024-01-01"),
            RecordRow::new("1", "10", "C", "2024-01-01"),
        ];
        let p = fixed_pipeline();
        let (fitted, _) = p.train(&train_rows(), &offers()).unwrap();
        assert_eq!(fitted.0.len(), 5);
        let (scored, _) = p.score(&FixedScores(vec![0.0, 1.0]), &test, &offers()).unwrap();
        assert_eq!(scored[0].score, 0.0);
        assert_eq!(scored[1].score, 1.0);
    }
}
