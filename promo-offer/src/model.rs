//! Scoring models.
//!
//! A [`ScoringModel`] is trained once on historical records and produces an
//! immutable [`FittedModel`] that turns feature rows into probabilities. The
//! reference implementation is [`LogisticRegression`]: standardized features
//! followed by an L2-regularized logistic fit.

use ndarray::{s, Array1, Array2, ArrayView2, Axis};
use promo_core::{FeatureVector, PromoError, PromoResult};
use promo_store::app_config::ModelConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Dense feature rows handed to a model.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureMatrix {
    values: Array2<f64>,
}

impl FeatureMatrix {
    pub fn from_vectors(vectors: &[FeatureVector]) -> Self {
        let values = Array2::from_shape_fn((vectors.len(), FeatureVector::WIDTH), |(i, j)| {
            vectors[i].to_array()[j]
        });
        Self { values }
    }

    /// Build from arbitrary rows. Every row must have the width of the first.
    pub fn from_rows(rows: &[Vec<f64>]) -> PromoResult<Self> {
        let width = rows.first().map_or(0, Vec::len);
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(PromoError::DimensionMismatch {
                expected: width,
                actual: bad.len(),
            });
        }
        let flat: Vec<f64> = rows.iter().flatten().copied().collect();
        let values = Array2::from_shape_vec((rows.len(), width), flat)
            .map_err(|e| PromoError::ValidationError(e.to_string()))?;
        Ok(Self { values })
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.values.view()
    }
}

/// A trainable binary classifier producing probabilities.
pub trait ScoringModel {
    type Fitted: FittedModel;

    fn fit(&self, features: &FeatureMatrix, labels: &[bool]) -> PromoResult<Self::Fitted>;
}

/// The immutable artifact of training. Safe to share across threads.
pub trait FittedModel: Send + Sync {
    /// Number of features the model was trained on
    fn dimension(&self) -> usize;

    /// Probability of the positive class for each row, in row order.
    fn predict(&self, features: &FeatureMatrix) -> PromoResult<Vec<f64>>;
}

/// Mean / standard-deviation normalization, learned from training data only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

impl StandardScaler {
    /// Population statistics per column. Constant columns get a scale of 1.0.
    pub fn fit(values: &ArrayView2<'_, f64>) -> Self {
        let n = values.nrows().max(1) as f64;
        let mut means = Vec::with_capacity(values.ncols());
        let mut scales = Vec::with_capacity(values.ncols());
        for column in values.axis_iter(Axis(1)) {
            let mean = column.sum() / n;
            let variance = column.mapv(|v| (v - mean).powi(2)).sum() / n;
            let std = variance.sqrt();
            means.push(mean);
            scales.push(if std > f64::EPSILON { std } else { 1.0 });
        }
        Self { means, scales }
    }

    pub fn transform(&self, values: &ArrayView2<'_, f64>) -> Array2<f64> {
        let mut out = values.to_owned();
        for (j, mut column) in out.axis_iter_mut(Axis(1)).enumerate() {
            let (mean, scale) = (self.means[j], self.scales[j]);
            column.mapv_inplace(|v| (v - mean) / scale);
        }
        out
    }
}

/// Logistic regression over standardized features, fit by Newton-Raphson.
#[derive(Debug, Clone, Default)]
pub struct LogisticRegression {
    config: ModelConfig,
}

impl LogisticRegression {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }
}

impl ScoringModel for LogisticRegression {
    type Fitted = FittedLogistic;

    fn fit(&self, features: &FeatureMatrix, labels: &[bool]) -> PromoResult<FittedLogistic> {
        let n = features.nrows();
        if n == 0 {
            return Err(PromoError::InvalidTrainingData("training set is empty".into()));
        }
        if labels.len() != n {
            return Err(PromoError::InvalidTrainingData(format!(
                "{} labels for {} feature rows",
                labels.len(),
                n
            )));
        }
        let positives = labels.iter().filter(|l| **l).count();
        if positives == 0 || positives == n {
            return Err(PromoError::InvalidTrainingData(format!(
                "labels contain a single class ({} positive of {})",
                positives, n
            )));
        }

        let scaler = StandardScaler::fit(&features.view());
        let design = with_intercept(&scaler.transform(&features.view()));
        let targets = Array1::from_iter(labels.iter().map(|&l| if l { 1.0 } else { 0.0 }));
        let c = self.config.l2_penalty_c;
        let d = design.ncols();

        let mut theta = Array1::<f64>::zeros(d);
        let mut iterations = 0;
        let mut converged = false;

        while iterations < self.config.max_iter {
            iterations += 1;
            let probs = design.dot(&theta).mapv(sigmoid);

            let mut gradient = design.t().dot(&(&probs - &targets)) * c;
            let weights = probs.mapv(|p| p * (1.0 - p));
            let weighted = &design * &weights.insert_axis(Axis(1));
            let mut hessian = design.t().dot(&weighted) * c;
            for j in 1..d {
                gradient[j] += theta[j];
                hessian[[j, j]] += 1.0;
            }

            let step = solve(hessian, gradient).ok_or_else(|| {
                PromoError::InvalidTrainingData("training features are degenerate".into())
            })?;
            theta -= &step;

            if step.iter().all(|v| v.abs() < self.config.tolerance) {
                converged = true;
                break;
            }
        }

        if !converged {
            warn!(
                "Logistic regression stopped after {} iterations without converging",
                iterations
            );
        }
        debug!("Fitted logistic regression on {} rows in {} iterations", n, iterations);

        Ok(FittedLogistic {
            scaler,
            intercept: theta[0],
            coefficients: theta.slice(s![1..]).to_vec(),
            iterations,
            converged,
        })
    }
}

/// A trained logistic model together with the scaler it was trained behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedLogistic {
    scaler: StandardScaler,
    intercept: f64,
    coefficients: Vec<f64>,
    iterations: usize,
    converged: bool,
}

impl FittedLogistic {
    pub fn scaler(&self) -> &StandardScaler {
        &self.scaler
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Weights on standardized features
    pub fn coefficients(&self) -> &[f64] {
        &self.coefficients
    }

    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn converged(&self) -> bool {
        self.converged
    }

    /// Check the internal shapes of a deserialized artifact.
    pub fn validate(&self) -> PromoResult<()> {
        let d = self.coefficients.len();
        for len in [self.scaler.means.len(), self.scaler.scales.len()] {
            if len != d {
                return Err(PromoError::DimensionMismatch {
                    expected: d,
                    actual: len,
                });
            }
        }
        if self.scaler.scales.iter().any(|s| *s == 0.0 || !s.is_finite()) {
            return Err(PromoError::ValidationError("scaler has a zero or non-finite scale".into()));
        }
        Ok(())
    }
}

impl FittedModel for FittedLogistic {
    fn dimension(&self) -> usize {
        self.coefficients.len()
    }

    fn predict(&self, features: &FeatureMatrix) -> PromoResult<Vec<f64>> {
        self.validate()?;
        if features.ncols() != self.dimension() {
            return Err(PromoError::DimensionMismatch {
                expected: self.dimension(),
                actual: features.ncols(),
            });
        }
        let scaled = self.scaler.transform(&features.view());
        let weights = Array1::from(self.coefficients.clone());
        let logits = scaled.dot(&weights) + self.intercept;
        Ok(logits.mapv(sigmoid).to_vec())
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn with_intercept(values: &Array2<f64>) -> Array2<f64> {
    let mut design = Array2::ones((values.nrows(), values.ncols() + 1));
    design.slice_mut(s![.., 1..]).assign(values);
    design
}

/// Gaussian elimination with partial pivoting. `None` when the system is singular.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Option<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))?;
        if a[[pivot, col]].abs() < 1e-12 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Some(x)
}
