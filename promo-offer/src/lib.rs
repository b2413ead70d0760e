pub mod features;
pub mod model;
pub mod pipeline;
pub mod ranker;

pub use features::{FeatureJoiner, JoinConfig, JoinOutput, JoinStats, JoinedRecord};
pub use model::{
    FeatureMatrix, FittedLogistic, FittedModel, LogisticRegression, ScoringModel,
    StandardScaler,
};
pub use pipeline::{Pipeline, PipelineOutput, RunReport};
pub use ranker::{GroupRanker, DEFAULT_TOP_K};
